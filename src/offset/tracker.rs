//! Last-processed offset tracking. The outer task map is built once at start
//! and never changes; each task owns a concurrent inner map so reader threads
//! of distinct tasks never contend. Within a task the inner map keeps
//! concurrent updates linearizable, and a snapshot is an iterate-and-copy of
//! the inner map, which is consistent because a task has a single writer.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use tracing::debug;

use super::OffsetManager;
use crate::error::Error;
use crate::stream::{Offset, SystemStreamPartition, TaskName};
use crate::Result;

pub(crate) struct LastProcessedOffsets {
    tasks: HashMap<TaskName, DashMap<SystemStreamPartition, Offset>>,
}

impl LastProcessedOffsets {
    /// One inner map per registered task, seeded with the offsets that
    /// survived checkpoint loading and reset stripping.
    pub(crate) fn new(
        tasks: &HashMap<TaskName, HashSet<SystemStreamPartition>>,
        mut loaded: HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>,
    ) -> Self {
        let tasks = tasks
            .keys()
            .map(|task| {
                let seeded: DashMap<SystemStreamPartition, Offset> =
                    loaded.remove(task).unwrap_or_default().into_iter().collect();
                (task.clone(), seeded)
            })
            .collect();
        Self { tasks }
    }

    pub(crate) fn get(&self, task: &TaskName, ssp: &SystemStreamPartition) -> Option<Offset> {
        self.tasks
            .get(task)
            .and_then(|offsets| offsets.get(ssp).map(|entry| entry.value().clone()))
    }

    pub(crate) fn insert(&self, task: &TaskName, ssp: SystemStreamPartition, offset: Offset) {
        if let Some(offsets) = self.tasks.get(task) {
            offsets.insert(ssp, offset);
        }
    }

    /// Point-in-time copy of a task's offsets, restricted to the partitions
    /// the task currently has registered.
    pub(crate) fn snapshot(
        &self,
        task: &TaskName,
        registered: &HashSet<SystemStreamPartition>,
    ) -> HashMap<SystemStreamPartition, Offset> {
        self.tasks
            .get(task)
            .map(|offsets| {
                offsets
                    .iter()
                    .filter(|entry| registered.contains(entry.key()))
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl OffsetManager {
    /// Record the last successfully processed offset of one partition. The
    /// given SSP is matched against the task's registered set by system,
    /// stream, and partition, disambiguating by key bucket where partitions
    /// are subdivided; anything but exactly one match is an error. A `None`
    /// offset and the end-of-stream sentinel are no-ops.
    pub fn update(
        &self,
        task: &TaskName,
        ssp: &SystemStreamPartition,
        offset: impl Into<Option<Offset>>,
    ) -> Result<()> {
        let started = self.started()?;
        let registered = started.tasks.get(task).ok_or_else(|| {
            Error::UnknownPartition(format!("task {task} is not registered in this container"))
        })?;
        let resolved = resolve_registered(registered, task, ssp)?;

        let Some(offset) = offset.into() else {
            return Ok(());
        };
        if offset.is_end_of_stream() {
            debug!(task = %task, %ssp, "end of stream reached, keeping the last processed offset");
            return Ok(());
        }
        started.last_processed.insert(task, resolved, offset);
        Ok(())
    }

    /// Lock-free read of one partition's last processed offset.
    pub fn last_processed_offset(
        &self,
        task: &TaskName,
        ssp: &SystemStreamPartition,
    ) -> Result<Option<Offset>> {
        let started = self.started()?;
        Ok(started.last_processed.get(task, ssp))
    }

    /// Snapshot of a task's last processed offsets for checkpointing,
    /// restricted to its registered partitions. Empty when neither a
    /// checkpoint manager nor a listener is configured, since nothing would
    /// consume the result.
    pub fn last_processed_offsets(
        &self,
        task: &TaskName,
    ) -> Result<HashMap<SystemStreamPartition, Offset>> {
        let started = self.started()?;
        if self.checkpoint_manager.is_none() && self.listeners.is_empty() {
            debug!(task = %task, "neither checkpoints nor listeners configured, empty snapshot");
            return Ok(HashMap::new());
        }
        let registered = started.tasks.get(task).ok_or_else(|| {
            Error::UnknownPartition(format!("task {task} is not registered in this container"))
        })?;
        Ok(started.last_processed.snapshot(task, registered))
    }
}

/// Find the registered SSP the given one addresses. An SSP that carries a key
/// bucket must match it exactly; one without a bucket matches any bucket of
/// the same broker partition, which must be unambiguous.
fn resolve_registered(
    registered: &HashSet<SystemStreamPartition>,
    task: &TaskName,
    ssp: &SystemStreamPartition,
) -> Result<SystemStreamPartition> {
    if registered.contains(ssp) {
        return Ok(ssp.clone());
    }
    let candidates: Vec<&SystemStreamPartition> = registered
        .iter()
        .filter(|candidate| {
            candidate.same_broker_partition(ssp)
                && (ssp.key_bucket().is_none() || candidate.key_bucket() == ssp.key_bucket())
        })
        .collect();
    match candidates.as_slice() {
        [only] => Ok((*only).clone()),
        [] => Err(Error::UnknownPartition(format!(
            "{ssp} is not registered to task {task}"
        ))),
        _ => Err(Error::UnknownPartition(format!(
            "{ssp} is ambiguous across key buckets registered to task {task}"
        ))),
    }
}
