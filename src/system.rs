//! Per-system broker adapters. Every system a container consumes from is
//! represented by one [SystemAdmin], looked up by system name. The admin owns
//! all offset arithmetic: given a processed position it produces the next one
//! to read, it resolves operator-issued startpoints to concrete offsets, and
//! it is the only party that can order two offsets. The traits use
//! `async_trait` to stay object safe, so adapters are held as
//! `Arc<dyn SystemAdmin>` for dynamic dispatch.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::Error;
use crate::startpoint::Startpoint;
use crate::stream::{Offset, Partition, SystemStreamPartition};
use crate::Result;

/// Default-offset policy for a stream. Where to begin reading when no
/// checkpoint and no startpoint applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetType {
    /// The oldest offset still retained by the broker.
    Oldest,
    /// The newest offset present on the broker.
    Newest,
    /// The offset of the next message to be written.
    Upcoming,
}

impl OffsetType {
    pub fn as_str(self) -> &'static str {
        match self {
            OffsetType::Oldest => "oldest",
            OffsetType::Newest => "newest",
            OffsetType::Upcoming => "upcoming",
        }
    }
}

impl fmt::Display for OffsetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "oldest" => Ok(OffsetType::Oldest),
            "newest" => Ok(OffsetType::Newest),
            "upcoming" => Ok(OffsetType::Upcoming),
            other => Err(Error::Config(format!(
                "unknown default offset '{other}', expected one of oldest, newest, upcoming"
            ))),
        }
    }
}

/// Broker-reported offsets for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMetadata {
    oldest: Option<Offset>,
    newest: Option<Offset>,
    upcoming: Option<Offset>,
}

impl PartitionMetadata {
    pub fn new(
        oldest: impl Into<Option<Offset>>,
        newest: impl Into<Option<Offset>>,
        upcoming: impl Into<Option<Offset>>,
    ) -> Self {
        Self {
            oldest: oldest.into(),
            newest: newest.into(),
            upcoming: upcoming.into(),
        }
    }

    /// The offset matching the requested policy. `None` when the partition is
    /// empty for that policy, e.g. newest on a partition nothing has been
    /// written to yet.
    pub fn offset_for(&self, offset_type: OffsetType) -> Option<&Offset> {
        match offset_type {
            OffsetType::Oldest => self.oldest.as_ref(),
            OffsetType::Newest => self.newest.as_ref(),
            OffsetType::Upcoming => self.upcoming.as_ref(),
        }
    }
}

/// Broker-reported metadata for one stream, keyed by partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemStreamMetadata {
    partitions: HashMap<Partition, PartitionMetadata>,
}

impl SystemStreamMetadata {
    pub fn new(partitions: HashMap<Partition, PartitionMetadata>) -> Self {
        Self { partitions }
    }

    pub fn partition(&self, partition: Partition) -> Option<&PartitionMetadata> {
        self.partitions.get(&partition)
    }

    pub fn partitions(&self) -> &HashMap<Partition, PartitionMetadata> {
        &self.partitions
    }
}

/// Broker adapter for one system.
///
/// Offsets are opaque strings owned by the adapter; the coordination core
/// never parses them. This trait is object-safe and is used as
/// `Arc<dyn SystemAdmin>`, keyed by system name.
#[async_trait]
pub trait SystemAdmin: Send + Sync {
    /// For each given processed offset, the next offset to read. The adapter
    /// may return fewer or more entries than it was given; only returned
    /// entries are adopted.
    async fn offsets_after(
        &self,
        offsets: HashMap<SystemStreamPartition, Offset>,
    ) -> Result<HashMap<SystemStreamPartition, Offset>>;

    /// Resolve an operator-issued startpoint to a concrete offset. `None` or
    /// a blank offset means the adapter could not produce a position and the
    /// caller falls back to its default.
    async fn resolve_startpoint(
        &self,
        ssp: &SystemStreamPartition,
        startpoint: &Startpoint,
    ) -> Result<Option<Offset>>;

    /// Order two offsets of this system. `None` means the pair is not
    /// comparable, e.g. cursors from different epochs.
    fn compare_offsets(&self, a: &Offset, b: &Offset) -> Option<Ordering>;
}

/// Per-system hook invoked around checkpointing.
///
/// `before_checkpoint` may rewrite the offsets about to be committed (some
/// brokers track a consumer-side safe position that differs from the last
/// processed one). `on_checkpoint` is notified after the checkpoint has been
/// written; it runs after the store write, so implementations must be
/// idempotent and cannot veto a commit.
#[async_trait]
pub trait CheckpointListener: Send + Sync {
    async fn before_checkpoint(
        &self,
        offsets: HashMap<SystemStreamPartition, Offset>,
    ) -> Result<HashMap<SystemStreamPartition, Offset>>;

    async fn on_checkpoint(&self, offsets: HashMap<SystemStreamPartition, Offset>) -> Result<()>;
}
