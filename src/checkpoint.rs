//! Durable snapshots of per-task progress. A [Checkpoint] is the map of
//! `SSP -> offset` captured at commit time; the store behind
//! [CheckpointManager] persists one per task and serves the last one back on
//! restart. A checkpoint may carry SSPs the coordination core does not manage
//! (changelog partitions owned by state management); those pass through the
//! store write untouched but never reach listeners or the in-memory tracker.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::stream::{Offset, SystemStreamPartition, TaskName};
use crate::Result;

/// Snapshot of `SSP -> offset` for one task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    offsets: HashMap<SystemStreamPartition, Offset>,
}

impl Checkpoint {
    pub fn new(offsets: HashMap<SystemStreamPartition, Offset>) -> Self {
        Self { offsets }
    }

    pub fn offsets(&self) -> &HashMap<SystemStreamPartition, Offset> {
        &self.offsets
    }

    pub fn get(&self, ssp: &SystemStreamPartition) -> Option<&Offset> {
        self.offsets.get(ssp)
    }

    pub(crate) fn into_offsets(self) -> HashMap<SystemStreamPartition, Offset> {
        self.offsets
    }
}

impl FromIterator<(SystemStreamPartition, Offset)> for Checkpoint {
    fn from_iter<I: IntoIterator<Item = (SystemStreamPartition, Offset)>>(iter: I) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}

/// Durable checkpoint store. One external implementation per deployment,
/// shared by every task in the container.
#[async_trait]
pub trait CheckpointManager: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Announce that a task will read and write checkpoints. Must be called
    /// for every task before `start`.
    async fn register(&self, task: &TaskName) -> Result<()>;

    /// The last committed checkpoint for a task, or `None` on a cold start.
    async fn read_last_checkpoint(&self, task: &TaskName) -> Result<Option<Checkpoint>>;

    /// The last committed checkpoint of every task the store knows about,
    /// including tasks from prior deploys with a different task layout.
    async fn read_all_checkpoints(&self) -> Result<HashMap<TaskName, Checkpoint>>;

    async fn write_checkpoint(&self, task: &TaskName, checkpoint: &Checkpoint) -> Result<()>;
}
