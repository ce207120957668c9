//! Per-container offset coordination for partitioned stream processing.
//!
//! Each worker process runs tasks that consume a set of partitioned input
//! streams. Before a task reads its first message, the [OffsetManager]
//! decides where every owned partition starts, reconciling operator-issued
//! [startpoints](crate::startpoint), committed [checkpoints](crate::checkpoint),
//! and configured defaults in that order of precedence. While the container
//! runs, the manager tracks the last successfully processed position per
//! partition and drives the periodic checkpoint commit, consulting per-system
//! [CheckpointListener]s and pruning absorbed startpoint fan-outs.
//!
//! Brokers are abstracted behind one [SystemAdmin] per system; offsets are
//! opaque strings the admin alone can interpret. The durable stores and the
//! read loop are external collaborators wired in through the
//! [OffsetManagerBuilder].

pub use crate::error::{Error, Result};

pub mod checkpoint;
pub mod config;
pub mod elasticity;
mod error;
pub mod metrics;
pub mod offset;
pub mod startpoint;
pub mod stream;
pub mod system;

pub use crate::checkpoint::{Checkpoint, CheckpointManager};
pub use crate::config::{build_offset_settings, Config, OffsetSetting};
pub use crate::metrics::OffsetManagerMetrics;
pub use crate::offset::{OffsetManager, OffsetManagerBuilder};
pub use crate::startpoint::{Startpoint, StartpointManager};
pub use crate::stream::{Offset, Partition, SystemStream, SystemStreamPartition, TaskName};
pub use crate::system::{CheckpointListener, OffsetType, SystemAdmin};
