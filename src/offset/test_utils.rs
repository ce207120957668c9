//! In-memory collaborators for exercising the offset manager: a checkpoint
//! store, a startpoint store, a numeric-offset system admin, and a recording
//! listener, all with optional error injection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::OffsetSetting;
use crate::error::Error;
use crate::startpoint::{Startpoint, StartpointManager};
use crate::stream::{Offset, Partition, SystemStream, SystemStreamPartition, TaskName};
use crate::system::{
    CheckpointListener, OffsetType, PartitionMetadata, SystemAdmin, SystemStreamMetadata,
};
use crate::Result;

pub(crate) fn task(name: &str) -> TaskName {
    TaskName::new(name)
}

pub(crate) fn ssp(system: &str, stream: &str, partition: u32) -> SystemStreamPartition {
    SystemStreamPartition::new(SystemStream::new(system, stream), Partition::new(partition))
}

pub(crate) fn bucketed_ssp(
    system: &str,
    stream: &str,
    partition: u32,
    bucket: u32,
) -> SystemStreamPartition {
    SystemStreamPartition::with_key_bucket(
        SystemStream::new(system, stream),
        Partition::new(partition),
        bucket,
    )
}

pub(crate) fn partition_metadata(
    oldest: Option<&str>,
    newest: Option<&str>,
    upcoming: Option<&str>,
) -> PartitionMetadata {
    PartitionMetadata::new(
        oldest.map(Offset::from),
        newest.map(Offset::from),
        upcoming.map(Offset::from),
    )
}

/// One stream's offset setting with the same metadata on every partition.
pub(crate) fn stream_setting(
    system: &str,
    stream: &str,
    partitions: &[u32],
    metadata: PartitionMetadata,
    default_offset: OffsetType,
    reset_offset: bool,
) -> (SystemStream, OffsetSetting) {
    let per_partition = partitions
        .iter()
        .map(|partition| (Partition::new(*partition), metadata.clone()))
        .collect();
    (
        SystemStream::new(system, stream),
        OffsetSetting::new(
            SystemStreamMetadata::new(per_partition),
            default_offset,
            reset_offset,
        ),
    )
}

#[derive(Default)]
pub(crate) struct InMemoryCheckpointManager {
    checkpoints: RwLock<HashMap<TaskName, Checkpoint>>,
    registered: RwLock<HashSet<TaskName>>,
    started: AtomicBool,
    stopped: AtomicBool,
    fail_next_write: AtomicBool,
}

impl InMemoryCheckpointManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed(&self, task: &TaskName, checkpoint: Checkpoint) {
        self.checkpoints.write().insert(task.clone(), checkpoint);
    }

    pub(crate) fn stored(&self, task: &TaskName) -> Option<Checkpoint> {
        self.checkpoints.read().get(task).cloned()
    }

    pub(crate) fn fail_next_write(&self) {
        self.fail_next_write.store(true, AtomicOrdering::SeqCst);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }

    pub(crate) fn registered_tasks(&self) -> HashSet<TaskName> {
        self.registered.read().clone()
    }
}

#[async_trait]
impl CheckpointManager for InMemoryCheckpointManager {
    async fn start(&self) -> Result<()> {
        self.started.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn register(&self, task: &TaskName) -> Result<()> {
        self.registered.write().insert(task.clone());
        Ok(())
    }

    async fn read_last_checkpoint(&self, task: &TaskName) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.read().get(task).cloned())
    }

    async fn read_all_checkpoints(&self) -> Result<HashMap<TaskName, Checkpoint>> {
        Ok(self.checkpoints.read().clone())
    }

    async fn write_checkpoint(&self, task: &TaskName, checkpoint: &Checkpoint) -> Result<()> {
        if self.fail_next_write.swap(false, AtomicOrdering::SeqCst) {
            return Err(Error::Store("injected checkpoint write failure".to_string()));
        }
        self.checkpoints
            .write()
            .insert(task.clone(), checkpoint.clone());
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryStartpointManager {
    fan_outs: RwLock<HashMap<TaskName, HashMap<SystemStreamPartition, Startpoint>>>,
    removals: RwLock<Vec<TaskName>>,
    stopped: AtomicBool,
    fail_next_removal: AtomicBool,
}

impl InMemoryStartpointManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed(
        &self,
        task: &TaskName,
        fan_out: HashMap<SystemStreamPartition, Startpoint>,
    ) {
        self.fan_outs.write().insert(task.clone(), fan_out);
    }

    pub(crate) fn fan_out(&self, task: &TaskName) -> Option<HashMap<SystemStreamPartition, Startpoint>> {
        self.fan_outs.read().get(task).cloned()
    }

    pub(crate) fn removals(&self) -> Vec<TaskName> {
        self.removals.read().clone()
    }

    pub(crate) fn fail_next_removal(&self) {
        self.fail_next_removal.store(true, AtomicOrdering::SeqCst);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl StartpointManager for InMemoryStartpointManager {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn fan_out_for_task(
        &self,
        task: &TaskName,
    ) -> Result<Option<HashMap<SystemStreamPartition, Startpoint>>> {
        Ok(self.fan_outs.read().get(task).cloned())
    }

    async fn remove_fan_out_for_task(&self, task: &TaskName) -> Result<()> {
        if self.fail_next_removal.swap(false, AtomicOrdering::SeqCst) {
            return Err(Error::Store("injected fan-out removal failure".to_string()));
        }
        self.fan_outs.write().remove(task);
        self.removals.write().push(task.clone());
        Ok(())
    }
}

/// Admin over decimal string offsets: the offset after `n` is `n + 1`, and
/// comparison is numeric. Startpoint resolutions are scripted per SSP and
/// default to unresolved.
#[derive(Default)]
pub(crate) struct SimpleSystemAdmin {
    resolutions: RwLock<HashMap<SystemStreamPartition, Result<Option<Offset>>>>,
}

impl SimpleSystemAdmin {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn resolve_to(&self, ssp: &SystemStreamPartition, offset: &str) {
        self.resolutions
            .write()
            .insert(ssp.clone(), Ok(Some(Offset::new(offset))));
    }

    pub(crate) fn resolve_blank(&self, ssp: &SystemStreamPartition) {
        self.resolutions
            .write()
            .insert(ssp.clone(), Ok(Some(Offset::new(""))));
    }

    pub(crate) fn fail_resolution(&self, ssp: &SystemStreamPartition) {
        self.resolutions.write().insert(
            ssp.clone(),
            Err(Error::Startpoint("injected resolution failure".to_string())),
        );
    }
}

#[async_trait]
impl SystemAdmin for SimpleSystemAdmin {
    async fn offsets_after(
        &self,
        offsets: HashMap<SystemStreamPartition, Offset>,
    ) -> Result<HashMap<SystemStreamPartition, Offset>> {
        Ok(offsets
            .into_iter()
            .filter_map(|(ssp, offset)| {
                offset
                    .as_str()
                    .parse::<i64>()
                    .ok()
                    .map(|n| (ssp, Offset::new((n + 1).to_string())))
            })
            .collect())
    }

    async fn resolve_startpoint(
        &self,
        ssp: &SystemStreamPartition,
        _startpoint: &Startpoint,
    ) -> Result<Option<Offset>> {
        self.resolutions
            .read()
            .get(ssp)
            .cloned()
            .unwrap_or(Ok(None))
    }

    fn compare_offsets(&self, a: &Offset, b: &Offset) -> Option<std::cmp::Ordering> {
        let a = a.as_str().parse::<i64>().ok()?;
        let b = b.as_str().parse::<i64>().ok()?;
        Some(a.cmp(&b))
    }
}

/// Listener that records every call and answers `before_checkpoint` with a
/// scripted rewrite.
#[derive(Default)]
pub(crate) struct RecordingListener {
    rewrites: RwLock<HashMap<SystemStreamPartition, Offset>>,
    before_calls: RwLock<Vec<HashMap<SystemStreamPartition, Offset>>>,
    on_calls: RwLock<Vec<HashMap<SystemStreamPartition, Offset>>>,
    fail_before: AtomicBool,
    fail_on: AtomicBool,
}

impl RecordingListener {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn rewrite(&self, ssp: &SystemStreamPartition, offset: &str) {
        self.rewrites
            .write()
            .insert(ssp.clone(), Offset::new(offset));
    }

    pub(crate) fn fail_before_checkpoint(&self) {
        self.fail_before.store(true, AtomicOrdering::SeqCst);
    }

    pub(crate) fn fail_on_checkpoint(&self) {
        self.fail_on.store(true, AtomicOrdering::SeqCst);
    }

    pub(crate) fn before_calls(&self) -> Vec<HashMap<SystemStreamPartition, Offset>> {
        self.before_calls.read().clone()
    }

    pub(crate) fn on_calls(&self) -> Vec<HashMap<SystemStreamPartition, Offset>> {
        self.on_calls.read().clone()
    }
}

#[async_trait]
impl CheckpointListener for RecordingListener {
    async fn before_checkpoint(
        &self,
        offsets: HashMap<SystemStreamPartition, Offset>,
    ) -> Result<HashMap<SystemStreamPartition, Offset>> {
        self.before_calls.write().push(offsets);
        if self.fail_before.swap(false, AtomicOrdering::SeqCst) {
            return Err(Error::Listener("injected pre-checkpoint failure".to_string()));
        }
        Ok(self.rewrites.read().clone())
    }

    async fn on_checkpoint(&self, offsets: HashMap<SystemStreamPartition, Offset>) -> Result<()> {
        self.on_calls.write().push(offsets);
        if self.fail_on.swap(false, AtomicOrdering::SeqCst) {
            return Err(Error::Listener("injected post-checkpoint failure".to_string()));
        }
        Ok(())
    }
}
