//! Structured pipeline introspection.
//!
//! A [`PipelineSnapshot`] is collected by walking a materialized pipeline
//! from its terminal consumer towards the source. Each stage reports its own
//! counters; nothing is formatted until the caller decides how to render it.

use serde::Serialize;

/// Point-in-time view of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    /// Operator kind, e.g. `"map"` or `"buffer"`.
    pub kind: &'static str,
    /// Optional user supplied name (see `Stream::named`).
    pub name: Option<String>,
    /// Demand granted by the downstream and not yet satisfied.
    pub pending_demand: u64,
    /// Demand this stage has requested from its upstream and not yet received.
    pub upstream_demand: u64,
    /// Elements or signals held inside the stage.
    pub buffered: usize,
    /// The downstream cancelled.
    pub cancelled: bool,
    /// A terminal signal was delivered.
    pub terminated: bool,
    /// Name of the dispatcher running this stage, if any.
    pub dispatcher: Option<String>,
}

impl StageSnapshot {
    /// Creates an idle snapshot for a stage kind.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            name: None,
            pending_demand: 0,
            upstream_demand: 0,
            buffered: 0,
            cancelled: false,
            terminated: false,
            dispatcher: None,
        }
    }
}

/// Snapshot of every stage in a pipeline, ordered downstream to upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    /// Stage snapshots, the stage closest to the consumer first.
    pub stages: Vec<StageSnapshot>,
}

impl PipelineSnapshot {
    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline has no live stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Finds the first stage of the given kind.
    #[must_use]
    pub fn stage(&self, kind: &str) -> Option<&StageSnapshot> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Total elements buffered across all stages.
    #[must_use]
    pub fn total_buffered(&self) -> usize {
        self.stages.iter().map(|s| s.buffered).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes_as_structured_json() {
        let mut map = StageSnapshot::new("map");
        map.pending_demand = 4;
        map.dispatcher = Some("shared".into());
        let snapshot = PipelineSnapshot {
            stages: vec![map, StageSnapshot::new("source")],
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["stages"][0]["kind"], "map");
        assert_eq!(json["stages"][0]["pending_demand"], 4);
        assert_eq!(json["stages"][0]["dispatcher"], "shared");
        assert_eq!(json["stages"][1]["kind"], "source");
    }

    #[test]
    fn test_lookup_helpers() {
        let mut buffer = StageSnapshot::new("buffer");
        buffer.buffered = 3;
        let snapshot = PipelineSnapshot {
            stages: vec![StageSnapshot::new("map"), buffer],
        };
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.stage("buffer").map(|s| s.buffered), Some(3));
        assert_eq!(snapshot.total_buffered(), 3);
        assert!(snapshot.stage("window").is_none());
    }
}
