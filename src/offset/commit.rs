//! The commit pipeline. A commit thread first asks
//! [modified_offsets_for_checkpoint](OffsetManager::modified_offsets_for_checkpoint)
//! for the offsets to persist (giving per-system listeners a chance to
//! rewrite them), builds a [Checkpoint] from the result plus whatever else it
//! owns (changelog positions), and hands it to
//! [write_checkpoint](OffsetManager::write_checkpoint). The write order is
//! fixed: store first, listener notification second, startpoint cleanup
//! last. Listeners therefore cannot veto a commit and must be idempotent.
//! Store and listener failures leave the in-memory state untouched so the
//! caller can retry the same commit.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, info};

use super::{group_by_system, OffsetManager, StartedState};
use crate::checkpoint::Checkpoint;
use crate::error::Error;
use crate::stream::{Offset, SystemStreamPartition, TaskName};
use crate::Result;

impl OffsetManager {
    /// The offsets a checkpoint for `task` should carry: the last processed
    /// offsets of its registered partitions, rewritten by each system's
    /// listener where one is registered. A listener is only consulted once at
    /// least one of its partitions has progressed to or past its starting
    /// offset; before that, brokers that derive a safe commit position from
    /// polling cannot answer and the call would fail spuriously. An
    /// incomparable pair counts as progressed.
    pub async fn modified_offsets_for_checkpoint(
        &self,
        task: &TaskName,
    ) -> Result<HashMap<SystemStreamPartition, Offset>> {
        let started = self.started()?;
        let registered = started.tasks.get(task).ok_or_else(|| {
            Error::UnknownPartition(format!("task {task} is not registered in this container"))
        })?;
        let base = started.last_processed.snapshot(task, registered);
        let starting = started.starting_offsets.get(task);

        let mut modified = base.clone();
        for (system, offsets) in group_by_system(&base) {
            let Some(listener) = self.listeners.get(&system) else {
                continue;
            };
            let admin = self.admin(&system)?;
            let progressed = offsets.iter().any(|(ssp, last)| {
                match starting.and_then(|offsets| offsets.get(ssp)) {
                    Some(start) => {
                        !matches!(admin.compare_offsets(last, start), Some(Ordering::Less))
                    }
                    None => true,
                }
            });
            if !progressed {
                debug!(
                    task = %task, system = %system,
                    "no progress past the starting offsets yet, skipping listener"
                );
                continue;
            }
            let rewritten = listener.before_checkpoint(offsets).await?;
            modified.extend(rewritten);
        }
        Ok(modified)
    }

    /// Persist a checkpoint and run the post-commit pipeline. Must be
    /// serialized per task by the caller; commits of distinct tasks are
    /// independent. A `None` checkpoint is a no-op, as is a call when neither
    /// a checkpoint manager nor a listener is configured.
    pub async fn write_checkpoint(
        &self,
        task: &TaskName,
        checkpoint: impl Into<Option<Checkpoint>>,
    ) -> Result<()> {
        let started = self.started()?;
        let Some(checkpoint) = checkpoint.into() else {
            debug!(task = %task, "nothing to checkpoint");
            return Ok(());
        };
        if self.checkpoint_manager.is_none() && self.listeners.is_empty() {
            return Ok(());
        }

        // The full checkpoint goes to the store, changelog partitions and
        // all. Only partitions registered here have gauges; the rest are
        // skipped by the metrics layer.
        if let Some(manager) = &self.checkpoint_manager {
            manager.write_checkpoint(task, &checkpoint).await?;
            for (ssp, offset) in checkpoint.offsets() {
                self.metrics.record_checkpoint(ssp, offset);
            }
            debug!(task = %task, count = checkpoint.offsets().len(), "wrote checkpoint");
        }

        if !self.listeners.is_empty() {
            let registered = started.tasks.get(task).ok_or_else(|| {
                Error::UnknownPartition(format!(
                    "task {task} is not registered in this container"
                ))
            })?;
            // Listeners only ever see partitions this manager owns.
            let confined: HashMap<SystemStreamPartition, Offset> = checkpoint
                .offsets()
                .iter()
                .filter(|(ssp, _)| registered.contains(*ssp))
                .map(|(ssp, offset)| (ssp.clone(), offset.clone()))
                .collect();
            for (system, offsets) in group_by_system(&confined) {
                if let Some(listener) = self.listeners.get(&system) {
                    listener.on_checkpoint(offsets).await?;
                }
            }
        }

        self.prune_startpoints(task, started).await
    }

    /// Drop the task's startpoint fan-out now that a checkpoint covering it
    /// has been committed. The store entry goes first; the in-memory entry is
    /// only dropped once the store removal succeeded, so a failed commit can
    /// be retried. Once the last fan-out drains, the startpoint manager is
    /// stopped.
    async fn prune_startpoints(&self, task: &TaskName, started: &StartedState) -> Result<()> {
        let Some(manager) = &self.startpoint_manager else {
            return Ok(());
        };
        let mut startpoints = started.startpoints.lock().await;
        if !startpoints.contains_key(task) {
            return Ok(());
        }
        manager.remove_fan_out_for_task(task).await?;
        startpoints.remove(task);
        info!(task = %task, "removed startpoint fan-out absorbed by the checkpoint");
        if startpoints.is_empty() {
            drop(startpoints);
            self.stop_startpoint_manager().await;
        }
        Ok(())
    }
}
