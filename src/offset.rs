//! Per-container offset coordination. Before a task reads its first message
//! the [OffsetManager] decides where every owned partition starts; while the
//! task runs it tracks the last successfully processed position; at commit
//! time it drives the checkpoint pipeline. Three sources of truth are
//! reconciled with strict precedence: operator-issued startpoints override
//! checkpointed progress, which overrides the configured per-stream default.
//!
//! One manager exists per container. Registration happens before `start`,
//! reads and commits after; calls in the wrong phase fail fast. The started
//! state (starting offsets, registered partition sets) is published once at
//! the end of `start` and is read-only afterwards, so the hot read paths take
//! no locks beyond the per-task tracker map.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::OffsetSetting;
use crate::elasticity::{self, CheckpointRemapper, IdentityRemapper};
use crate::error::Error;
use crate::metrics::OffsetManagerMetrics;
use crate::startpoint::{Startpoint, StartpointManager};
use crate::stream::{Offset, SystemStream, SystemStreamPartition, TaskName};
use crate::system::{CheckpointListener, SystemAdmin};
use crate::Result;

mod commit;
mod resolver;
mod tracker;

#[cfg(test)]
pub(crate) mod test_utils;

use tracker::LastProcessedOffsets;

/// Phase of the manager. Construction is the uninitialized-to-registering
/// edge; transitions are monotonic and re-entry is a programmer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Registering,
    Started,
    Stopped,
}

impl RunState {
    fn as_str(self) -> &'static str {
        match self {
            RunState::Registering => "registering",
            RunState::Started => "started",
            RunState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State published once at the end of `start`. Everything except the tracker
/// maps and the pending startpoints is immutable from here on.
struct StartedState {
    /// Registered SSPs per task, frozen at start.
    tasks: HashMap<TaskName, HashSet<SystemStreamPartition>>,
    starting_offsets: HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>,
    last_processed: LastProcessedOffsets,
    /// Fan-out entries still waiting to be absorbed into a checkpoint.
    startpoints: Mutex<HashMap<TaskName, HashMap<SystemStreamPartition, Startpoint>>>,
}

pub struct OffsetManager {
    offset_settings: HashMap<SystemStream, OffsetSetting>,
    admins: HashMap<String, Arc<dyn SystemAdmin>>,
    listeners: HashMap<String, Arc<dyn CheckpointListener>>,
    checkpoint_manager: Option<Arc<dyn CheckpointManager>>,
    startpoint_manager: Option<Arc<dyn StartpointManager>>,
    remapper: Arc<dyn CheckpointRemapper>,
    metrics: OffsetManagerMetrics,
    state: RwLock<RunState>,
    registered: RwLock<HashMap<TaskName, HashSet<SystemStreamPartition>>>,
    boot: OnceLock<StartedState>,
    startpoint_manager_stopped: AtomicBool,
}

pub struct OffsetManagerBuilder {
    offset_settings: HashMap<SystemStream, OffsetSetting>,
    admins: HashMap<String, Arc<dyn SystemAdmin>>,
    listeners: HashMap<String, Arc<dyn CheckpointListener>>,
    checkpoint_manager: Option<Arc<dyn CheckpointManager>>,
    startpoint_manager: Option<Arc<dyn StartpointManager>>,
    remapper: Arc<dyn CheckpointRemapper>,
    metrics: Option<OffsetManagerMetrics>,
}

impl OffsetManagerBuilder {
    /// Builder over the mandatory pieces: one offset setting per input stream
    /// and one admin per system.
    pub fn new(
        offset_settings: HashMap<SystemStream, OffsetSetting>,
        admins: HashMap<String, Arc<dyn SystemAdmin>>,
    ) -> Self {
        Self {
            offset_settings,
            admins,
            listeners: HashMap::new(),
            checkpoint_manager: None,
            startpoint_manager: None,
            remapper: Arc::new(IdentityRemapper),
            metrics: None,
        }
    }

    pub fn checkpoint_manager(mut self, manager: Arc<dyn CheckpointManager>) -> Self {
        self.checkpoint_manager = Some(manager);
        self
    }

    pub fn startpoint_manager(mut self, manager: Arc<dyn StartpointManager>) -> Self {
        self.startpoint_manager = Some(manager);
        self
    }

    pub fn checkpoint_listener(
        mut self,
        system: impl Into<String>,
        listener: Arc<dyn CheckpointListener>,
    ) -> Self {
        self.listeners.insert(system.into(), listener);
        self
    }

    pub fn remapper(mut self, remapper: Arc<dyn CheckpointRemapper>) -> Self {
        self.remapper = remapper;
        self
    }

    pub fn metrics(mut self, metrics: OffsetManagerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the manager in its registering phase.
    #[must_use]
    pub fn build(self) -> OffsetManager {
        OffsetManager {
            offset_settings: self.offset_settings,
            admins: self.admins,
            listeners: self.listeners,
            checkpoint_manager: self.checkpoint_manager,
            startpoint_manager: self.startpoint_manager,
            remapper: self.remapper,
            metrics: self.metrics.unwrap_or_else(OffsetManagerMetrics::unregistered),
            state: RwLock::new(RunState::Registering),
            registered: RwLock::new(HashMap::new()),
            boot: OnceLock::new(),
            startpoint_manager_stopped: AtomicBool::new(false),
        }
    }
}

impl OffsetManager {
    pub fn builder(
        offset_settings: HashMap<SystemStream, OffsetSetting>,
        admins: HashMap<String, Arc<dyn SystemAdmin>>,
    ) -> OffsetManagerBuilder {
        OffsetManagerBuilder::new(offset_settings, admins)
    }

    /// Record that `task` owns `ssps`. Legal only before `start`; partitions
    /// are owned by exactly one task within the container.
    pub fn register(
        &self,
        task: &TaskName,
        ssps: impl IntoIterator<Item = SystemStreamPartition>,
    ) -> Result<()> {
        self.ensure_state(RunState::Registering)?;
        let ssps: Vec<SystemStreamPartition> = ssps.into_iter().collect();

        let mut registered = self.registered.write().expect("failed to acquire lock");
        for ssp in &ssps {
            if !self.offset_settings.contains_key(ssp.system_stream()) {
                return Err(Error::Config(format!(
                    "cannot register {ssp} for task {task}, stream {} has no offset setting",
                    ssp.system_stream()
                )));
            }
            if let Some((owner, _)) = registered
                .iter()
                .find(|(owner, owned)| *owner != task && owned.contains(ssp))
            {
                return Err(Error::Config(format!(
                    "cannot register {ssp} for task {task}, already owned by task {owner}"
                )));
            }
        }
        for ssp in &ssps {
            self.metrics.init_partition(ssp);
        }
        debug!(task = %task, count = ssps.len(), "registered partitions");
        registered.entry(task.clone()).or_default().extend(ssps);
        Ok(())
    }

    /// Compute starting offsets for every registered partition and publish
    /// the started state. Checkpointed progress is loaded first, reset
    /// streams are stripped, the admins turn processed positions into next
    /// positions, startpoints override, and anything still missing takes the
    /// configured default.
    pub async fn start(&self) -> Result<()> {
        self.ensure_state(RunState::Registering)?;
        let tasks: HashMap<TaskName, HashSet<SystemStreamPartition>> = self
            .registered
            .read()
            .expect("failed to acquire lock")
            .clone();

        let mut last_processed = self.load_checkpoints(&tasks).await?;
        self.strip_reset_streams(&mut last_processed)?;

        let mut starting_offsets = self.offsets_after_checkpoints(&last_processed).await?;
        let startpoints = self.load_startpoints(&tasks).await?;
        self.apply_startpoints(&startpoints, &mut starting_offsets)
            .await;
        self.fill_default_offsets(&tasks, &mut starting_offsets)?;

        for (task, offsets) in &starting_offsets {
            info!(task = %task, count = offsets.len(), "resolved starting offsets");
        }

        let started = StartedState {
            last_processed: LastProcessedOffsets::new(&tasks, last_processed),
            tasks,
            starting_offsets,
            startpoints: Mutex::new(startpoints),
        };
        self.boot
            .set(started)
            .map_err(|_| Error::Lifecycle("manager was already started".to_string()))?;
        self.set_state(RunState::Started);
        info!("offset manager started");
        Ok(())
    }

    /// Stop the stores. Idempotent once started; in-flight commits are not
    /// interrupted.
    pub async fn stop(&self) -> Result<()> {
        match self.run_state() {
            RunState::Registering => Err(Error::Lifecycle(
                "stop is illegal before start".to_string(),
            )),
            RunState::Stopped => {
                debug!("offset manager already stopped");
                Ok(())
            }
            RunState::Started => {
                if let Some(manager) = &self.checkpoint_manager {
                    manager.stop().await?;
                }
                self.stop_startpoint_manager().await;
                self.set_state(RunState::Stopped);
                info!("offset manager stopped");
                Ok(())
            }
        }
    }

    /// The resolved starting offset for one partition.
    pub fn starting_offset(
        &self,
        task: &TaskName,
        ssp: &SystemStreamPartition,
    ) -> Result<Option<Offset>> {
        let started = self.started()?;
        Ok(started
            .starting_offsets
            .get(task)
            .and_then(|offsets| offsets.get(ssp))
            .cloned())
    }

    /// All resolved starting offsets of one task.
    pub fn starting_offsets(
        &self,
        task: &TaskName,
    ) -> Result<HashMap<SystemStreamPartition, Offset>> {
        let started = self.started()?;
        Ok(started
            .starting_offsets
            .get(task)
            .cloned()
            .unwrap_or_default())
    }

    pub fn offset_settings(&self) -> &HashMap<SystemStream, OffsetSetting> {
        &self.offset_settings
    }

    /// The SSPs a task registered, as of the last `register` call before
    /// start.
    pub fn registered_partitions(&self, task: &TaskName) -> HashSet<SystemStreamPartition> {
        self.registered
            .read()
            .expect("failed to acquire lock")
            .get(task)
            .cloned()
            .unwrap_or_default()
    }

    async fn load_checkpoints(
        &self,
        tasks: &HashMap<TaskName, HashSet<SystemStreamPartition>>,
    ) -> Result<HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>> {
        let mut loaded: HashMap<TaskName, HashMap<SystemStreamPartition, Offset>> = tasks
            .keys()
            .map(|task| (task.clone(), HashMap::new()))
            .collect();
        let Some(manager) = &self.checkpoint_manager else {
            debug!("no checkpoint manager configured, starting from empty state");
            return Ok(loaded);
        };

        for task in tasks.keys() {
            manager.register(task).await?;
        }
        manager.start().await?;

        let history = manager.read_all_checkpoints().await?;
        let bucketed_history = elasticity::history_used_key_buckets(&history);
        if bucketed_history {
            info!("checkpoint history carries key buckets, remapping per task");
        }

        for (task, ssps) in tasks {
            let raw = if bucketed_history {
                self.remapper.remap(task, ssps, &history, &self.admins)
            } else {
                manager
                    .read_last_checkpoint(task)
                    .await?
                    .map(Checkpoint::into_offsets)
                    .unwrap_or_default()
            };

            let mut kept = HashMap::with_capacity(raw.len());
            for (ssp, offset) in raw {
                if !self.offset_settings.contains_key(ssp.system_stream()) {
                    info!(
                        task = %task, %ssp, %offset,
                        "ignoring checkpointed offset, stream is no longer an input"
                    );
                } else if !ssps.contains(&ssp) {
                    info!(
                        task = %task, %ssp, %offset,
                        "ignoring checkpointed offset, partition is no longer owned by this task"
                    );
                } else {
                    kept.insert(ssp, offset);
                }
            }
            loaded.insert(task.clone(), kept);
        }
        Ok(loaded)
    }

    fn strip_reset_streams(
        &self,
        last_processed: &mut HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>,
    ) -> Result<()> {
        for (task, offsets) in last_processed.iter_mut() {
            let mut reset = Vec::new();
            for (ssp, offset) in offsets.iter() {
                let setting = self.offset_settings.get(ssp.system_stream()).ok_or_else(|| {
                    Error::Config(format!(
                        "cannot determine reset policy for {ssp}, stream has no offset setting"
                    ))
                })?;
                if setting.reset_offset() {
                    warn!(
                        task = %task, %ssp, %offset,
                        "ignoring checkpointed offset, stream is configured to reset"
                    );
                    reset.push(ssp.clone());
                }
            }
            for ssp in reset {
                offsets.remove(&ssp);
            }
        }
        Ok(())
    }

    async fn load_startpoints(
        &self,
        tasks: &HashMap<TaskName, HashSet<SystemStreamPartition>>,
    ) -> Result<HashMap<TaskName, HashMap<SystemStreamPartition, Startpoint>>> {
        let mut loaded = HashMap::new();
        let Some(manager) = &self.startpoint_manager else {
            return Ok(loaded);
        };
        manager.start().await?;

        for (task, ssps) in tasks {
            let Some(fan_out) = manager.fan_out_for_task(task).await? else {
                continue;
            };
            let owned: HashMap<SystemStreamPartition, Startpoint> = fan_out
                .into_iter()
                .filter(|(ssp, _)| ssps.contains(ssp))
                .collect();
            if owned.is_empty() {
                continue;
            }
            info!(task = %task, count = owned.len(), "loaded startpoints");
            loaded.insert(task.clone(), owned);
        }

        if loaded.is_empty() {
            debug!("no pending startpoints, stopping the startpoint manager");
            self.stop_startpoint_manager().await;
        }
        Ok(loaded)
    }

    /// Stop the startpoint manager at most once. The manager is shared with
    /// the fan-out producer, so a failure to stop is logged rather than
    /// failing the caller.
    pub(crate) async fn stop_startpoint_manager(&self) {
        let Some(manager) = &self.startpoint_manager else {
            return;
        };
        if self
            .startpoint_manager_stopped
            .swap(true, AtomicOrdering::SeqCst)
        {
            return;
        }
        if let Err(error) = manager.stop().await {
            warn!(%error, "failed to stop the startpoint manager");
        }
    }

    pub(crate) fn admin(&self, system: &str) -> Result<&Arc<dyn SystemAdmin>> {
        self.admins.get(system).ok_or_else(|| {
            Error::Config(format!("no system admin registered for system {system}"))
        })
    }

    fn run_state(&self) -> RunState {
        *self.state.read().expect("failed to acquire lock")
    }

    fn set_state(&self, state: RunState) {
        *self.state.write().expect("failed to acquire lock") = state;
    }

    fn ensure_state(&self, expected: RunState) -> Result<()> {
        let current = self.run_state();
        if current != expected {
            return Err(Error::Lifecycle(format!(
                "operation requires the {expected} phase, manager is {current}"
            )));
        }
        Ok(())
    }

    fn started(&self) -> Result<&StartedState> {
        self.ensure_state(RunState::Started)?;
        self.boot
            .get()
            .ok_or_else(|| Error::Lifecycle("manager has no started state".to_string()))
    }
}

/// Group per-SSP offsets by owning system.
pub(crate) fn group_by_system(
    offsets: &HashMap<SystemStreamPartition, Offset>,
) -> HashMap<String, HashMap<SystemStreamPartition, Offset>> {
    let mut grouped: HashMap<String, HashMap<SystemStreamPartition, Offset>> = HashMap::new();
    for (ssp, offset) in offsets {
        grouped
            .entry(ssp.system().to_string())
            .or_default()
            .insert(ssp.clone(), offset.clone());
    }
    grouped
}
