//! Operator-issued overrides of the position a task starts reading from.
//!
//! A startpoint is written to a durable metadata store out of band (by a
//! deploy tool or an operator) and fanned out per task. At container start
//! the fan-out entries are loaded and take precedence over checkpointed
//! progress; once a checkpoint covering the override has been committed, the
//! fan-out is removed so a later restart resumes from the checkpoint again.
//!
//! The store itself is an external collaborator behind [StartpointManager].
//! The fan-out producer and this crate share the manager; the only lifecycle
//! action taken here is an opportunistic `stop` once no fan-outs are pending.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::stream::{Offset, SystemStreamPartition, TaskName};
use crate::Result;

/// A starting position override. Resolution to a concrete offset is delegated
/// to the owning [SystemAdmin](crate::system::SystemAdmin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Startpoint {
    /// Begin at a broker offset given verbatim.
    SpecificOffset { offset: Offset },
    /// Begin at the first message at or after a point in time.
    Timestamp { timestamp: DateTime<Utc> },
    /// Begin at the oldest retained message.
    Oldest,
    /// Begin at the next message to be written.
    Upcoming,
    /// Adapter-defined position carried as an opaque payload.
    Custom { metadata: String },
}

/// Durable store of startpoint fan-outs, keyed by `(task, ssp)`.
#[async_trait]
pub trait StartpointManager: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Pending fan-out entries for a task, or `None` when the task has none.
    async fn fan_out_for_task(
        &self,
        task: &TaskName,
    ) -> Result<Option<HashMap<SystemStreamPartition, Startpoint>>>;

    /// Delete the fan-out for a task. Called once the override has been
    /// absorbed into a committed checkpoint.
    async fn remove_fan_out_for_task(&self, task: &TaskName) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_startpoint_round_trips_through_json() {
        let points = vec![
            Startpoint::SpecificOffset {
                offset: Offset::new("250"),
            },
            Startpoint::Timestamp {
                timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            },
            Startpoint::Oldest,
            Startpoint::Upcoming,
            Startpoint::Custom {
                metadata: "replica=2".to_string(),
            },
        ];

        for point in points {
            let encoded = serde_json::to_string(&point).unwrap();
            let decoded: Startpoint = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, point);
        }
    }

    #[test]
    fn test_specific_offset_tag() {
        let encoded = serde_json::to_string(&Startpoint::SpecificOffset {
            offset: Offset::new("42"),
        })
        .unwrap();
        assert!(encoded.contains("\"kind\":\"specific-offset\""));
    }
}
