//! Identities for the partitioned inputs a container consumes from, and the
//! opaque cursors the brokers hand back for them. A [SystemStreamPartition] is
//! the unit everything else in this crate is keyed by: offsets are tracked,
//! resolved, and checkpointed per SSP. Offsets themselves are never
//! interpreted here; ordering questions are delegated to the owning
//! [SystemAdmin](crate::system::SystemAdmin).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named, partitioned source identified by `(system, stream)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemStream {
    system: String,
    stream: String,
}

impl SystemStream {
    pub fn new(system: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            stream: stream.into(),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

impl fmt::Display for SystemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.system, self.stream)
    }
}

/// Partition index within a stream. Non-negative by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition(u32);

impl Partition {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Partition {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One addressable partition of a stream. When partitions are subdivided by
/// key bucket (elasticity), the bucket is part of the identity: two SSPs with
/// the same `(system, stream, partition)` but different buckets are distinct
/// and may be owned by different tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemStreamPartition {
    system_stream: SystemStream,
    partition: Partition,
    key_bucket: Option<u32>,
}

impl SystemStreamPartition {
    pub fn new(system_stream: SystemStream, partition: Partition) -> Self {
        Self {
            system_stream,
            partition,
            key_bucket: None,
        }
    }

    /// An SSP subdivided by key bucket.
    pub fn with_key_bucket(system_stream: SystemStream, partition: Partition, bucket: u32) -> Self {
        Self {
            system_stream,
            partition,
            key_bucket: Some(bucket),
        }
    }

    pub fn system_stream(&self) -> &SystemStream {
        &self.system_stream
    }

    pub fn system(&self) -> &str {
        self.system_stream.system()
    }

    pub fn stream(&self) -> &str {
        self.system_stream.stream()
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn key_bucket(&self) -> Option<u32> {
        self.key_bucket
    }

    /// True when `other` names the same broker partition, ignoring the key
    /// bucket on either side.
    pub(crate) fn same_broker_partition(&self, other: &SystemStreamPartition) -> bool {
        self.system_stream == other.system_stream && self.partition == other.partition
    }
}

impl fmt::Display for SystemStreamPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_bucket {
            Some(bucket) => write!(f, "{}.{}#{}", self.system_stream, self.partition, bucket),
            None => write!(f, "{}.{}", self.system_stream, self.partition),
        }
    }
}

/// Broker-defined cursor within a partition. The content is opaque to this
/// crate; only the owning system admin can order two of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(String);

/// Sentinel the read loop reports once a bounded partition is drained. It is
/// never stored as a processed position.
pub const END_OF_STREAM_OFFSET: &str = "END_OF_STREAM";

impl Offset {
    pub fn new(offset: impl Into<String>) -> Self {
        Self(offset.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.0 == END_OF_STREAM_OFFSET
    }

    /// Blank resolutions fall through to the configured default.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for Offset {
    fn from(offset: &str) -> Self {
        Self(offset.to_string())
    }
}

impl From<String> for Offset {
    fn from(offset: String) -> Self {
        Self(offset)
    }
}

impl AsRef<str> for Offset {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a logical task. A task owns a set of SSPs that is disjoint
/// from every other task in the same container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bucket_is_part_of_identity() {
        let stream = SystemStream::new("kafka", "orders");
        let plain = SystemStreamPartition::new(stream.clone(), Partition::new(3));
        let bucket0 = SystemStreamPartition::with_key_bucket(stream.clone(), Partition::new(3), 0);
        let bucket1 = SystemStreamPartition::with_key_bucket(stream, Partition::new(3), 1);

        assert_ne!(plain, bucket0);
        assert_ne!(bucket0, bucket1);
        assert!(plain.same_broker_partition(&bucket0));
        assert!(bucket0.same_broker_partition(&bucket1));
    }

    #[test]
    fn test_ssp_display() {
        let ssp = SystemStreamPartition::new(SystemStream::new("kafka", "orders"), 7.into());
        assert_eq!(ssp.to_string(), "kafka.orders.7");

        let bucketed =
            SystemStreamPartition::with_key_bucket(SystemStream::new("kafka", "orders"), 7.into(), 1);
        assert_eq!(bucketed.to_string(), "kafka.orders.7#1");
    }

    #[test]
    fn test_offset_sentinels() {
        assert!(Offset::new(END_OF_STREAM_OFFSET).is_end_of_stream());
        assert!(!Offset::new("42").is_end_of_stream());
        assert!(Offset::new("").is_blank());
        assert!(Offset::new("  ").is_blank());
        assert!(!Offset::new("0").is_blank());
    }
}
