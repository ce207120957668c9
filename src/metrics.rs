//! Prometheus metrics for offset coordination. One gauge per registered SSP
//! carries the last checkpointed offset; because offsets are opaque strings
//! the gauge follows the info pattern (the offset rides as a label with a
//! constant value of 1, and the previous label set is dropped on update). A
//! per-SSP counter tracks how many checkpoint writes covered the partition.
//!
//! The families are registered into a caller-supplied [Registry] so the
//! container can expose them beside its other metrics; nothing here is
//! process-global.

use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::stream::{Offset, SystemStreamPartition};

const SYSTEM_LABEL: &str = "system";
const STREAM_LABEL: &str = "stream";
const PARTITION_LABEL: &str = "partition";
const KEY_BUCKET_LABEL: &str = "key_bucket";
const OFFSET_LABEL: &str = "offset";

const CHECKPOINTED_OFFSET: &str = "checkpointed_offset";
const CHECKPOINT_WRITES: &str = "checkpoint_writes";

type Labels = Vec<(String, String)>;

pub struct OffsetManagerMetrics {
    checkpointed_offset: Family<Labels, Gauge>,
    checkpoint_writes: Family<Labels, Counter>,
    // last exported offset label per SSP, needed to drop the stale label set
    exported: Mutex<HashMap<SystemStreamPartition, Offset>>,
}

impl OffsetManagerMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let checkpointed_offset = Family::<Labels, Gauge>::default();
        let checkpoint_writes = Family::<Labels, Counter>::default();

        registry.register(
            CHECKPOINTED_OFFSET,
            "Last checkpointed offset per partition, carried as the offset label",
            checkpointed_offset.clone(),
        );
        registry.register(
            CHECKPOINT_WRITES,
            "Number of checkpoint writes covering the partition",
            checkpoint_writes.clone(),
        );

        Self {
            checkpointed_offset,
            checkpoint_writes,
            exported: Mutex::new(HashMap::new()),
        }
    }

    /// Metrics for a manager whose container does not expose a registry.
    pub fn unregistered() -> Self {
        Self::new(&mut Registry::default())
    }

    /// Create the gauge for a newly registered SSP with an empty offset.
    pub(crate) fn init_partition(&self, ssp: &SystemStreamPartition) {
        let mut exported = self.exported.lock();
        if exported.contains_key(ssp) {
            return;
        }
        let initial = Offset::new("");
        self.checkpointed_offset
            .get_or_create(&offset_labels(ssp, &initial))
            .set(1);
        exported.insert(ssp.clone(), initial);
    }

    /// Move the gauge of a known SSP to a freshly checkpointed offset. SSPs
    /// without a gauge (never registered here) are skipped.
    pub(crate) fn record_checkpoint(&self, ssp: &SystemStreamPartition, offset: &Offset) {
        let mut exported = self.exported.lock();
        let Some(previous) = exported.get_mut(ssp) else {
            return;
        };
        if previous != offset {
            self.checkpointed_offset.remove(&offset_labels(ssp, previous));
            self.checkpointed_offset
                .get_or_create(&offset_labels(ssp, offset))
                .set(1);
            *previous = offset.clone();
        }
        self.checkpoint_writes.get_or_create(&ssp_labels(ssp)).inc();
    }

    #[cfg(test)]
    pub(crate) fn exported_offset(&self, ssp: &SystemStreamPartition) -> Option<Offset> {
        self.exported.lock().get(ssp).cloned()
    }
}

fn ssp_labels(ssp: &SystemStreamPartition) -> Labels {
    let mut labels = vec![
        (SYSTEM_LABEL.to_string(), ssp.system().to_string()),
        (STREAM_LABEL.to_string(), ssp.stream().to_string()),
        (PARTITION_LABEL.to_string(), ssp.partition().to_string()),
    ];
    if let Some(bucket) = ssp.key_bucket() {
        labels.push((KEY_BUCKET_LABEL.to_string(), bucket.to_string()));
    }
    labels
}

fn offset_labels(ssp: &SystemStreamPartition, offset: &Offset) -> Labels {
    let mut labels = ssp_labels(ssp);
    labels.push((OFFSET_LABEL.to_string(), offset.to_string()));
    labels
}
