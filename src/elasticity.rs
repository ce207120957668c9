//! Reshaping checkpointed progress across task layouts.
//!
//! When partitions are subdivided by key bucket, the SSPs a task owns after a
//! redeploy need not match the SSPs its checkpoints were written against. The
//! remap strategy bridges the two: given the current task, its SSP set, the
//! full checkpoint history of the store, and the system admins, it produces
//! the effective last-processed offsets for the task. The strategy is
//! injected so deployments can plug in their own reshape rules; the default
//! is the identity (the task's own historical checkpoint, as written).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::checkpoint::Checkpoint;
use crate::stream::{Offset, SystemStreamPartition, TaskName};
use crate::system::SystemAdmin;

/// Strategy that derives a task's effective last-processed offsets from the
/// checkpoint history of a store.
pub trait CheckpointRemapper: Send + Sync {
    fn remap(
        &self,
        task: &TaskName,
        ssps: &HashSet<SystemStreamPartition>,
        checkpoints: &HashMap<TaskName, Checkpoint>,
        admins: &HashMap<String, Arc<dyn SystemAdmin>>,
    ) -> HashMap<SystemStreamPartition, Offset>;
}

/// Hands back the task's own historical checkpoint unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRemapper;

impl CheckpointRemapper for IdentityRemapper {
    fn remap(
        &self,
        task: &TaskName,
        _ssps: &HashSet<SystemStreamPartition>,
        checkpoints: &HashMap<TaskName, Checkpoint>,
        _admins: &HashMap<String, Arc<dyn SystemAdmin>>,
    ) -> HashMap<SystemStreamPartition, Offset> {
        checkpoints
            .get(task)
            .map(|checkpoint| checkpoint.offsets().clone())
            .unwrap_or_default()
    }
}

/// True when any checkpoint in the history was written against key-bucketed
/// SSPs, i.e. a prior deploy ran with elasticity enabled.
pub(crate) fn history_used_key_buckets(checkpoints: &HashMap<TaskName, Checkpoint>) -> bool {
    checkpoints
        .values()
        .flat_map(|checkpoint| checkpoint.offsets().keys())
        .any(|ssp| ssp.key_bucket().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Partition, SystemStream};

    fn ssp(partition: u32) -> SystemStreamPartition {
        SystemStreamPartition::new(SystemStream::new("kafka", "orders"), Partition::new(partition))
    }

    fn bucketed_ssp(partition: u32, bucket: u32) -> SystemStreamPartition {
        SystemStreamPartition::with_key_bucket(
            SystemStream::new("kafka", "orders"),
            Partition::new(partition),
            bucket,
        )
    }

    #[test]
    fn test_history_detection() {
        let plain: HashMap<TaskName, Checkpoint> = [(
            TaskName::new("task-0"),
            Checkpoint::from_iter([(ssp(0), Offset::new("5"))]),
        )]
        .into();
        assert!(!history_used_key_buckets(&plain));

        let bucketed: HashMap<TaskName, Checkpoint> = [(
            TaskName::new("task-0"),
            Checkpoint::from_iter([(bucketed_ssp(0, 1), Offset::new("5"))]),
        )]
        .into();
        assert!(history_used_key_buckets(&bucketed));
    }

    #[test]
    fn test_identity_remap_returns_own_checkpoint() {
        let task = TaskName::new("task-0");
        let checkpoints: HashMap<TaskName, Checkpoint> = [
            (
                task.clone(),
                Checkpoint::from_iter([(ssp(0), Offset::new("7"))]),
            ),
            (
                TaskName::new("task-1"),
                Checkpoint::from_iter([(ssp(1), Offset::new("9"))]),
            ),
        ]
        .into();

        let remapped =
            IdentityRemapper.remap(&task, &HashSet::new(), &checkpoints, &HashMap::new());
        assert_eq!(remapped, HashMap::from([(ssp(0), Offset::new("7"))]));

        let remapped = IdentityRemapper.remap(
            &TaskName::new("task-2"),
            &HashSet::new(),
            &checkpoints,
            &HashMap::new(),
        );
        assert!(remapped.is_empty());
    }
}
