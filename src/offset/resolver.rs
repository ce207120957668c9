//! Starting-offset computation. Three stages with strict precedence: the
//! admins first turn checkpointed positions into the next position to read,
//! resolved startpoints then overwrite those, and whatever is still missing
//! is filled from the per-stream default. A later stage never overwrites an
//! earlier one within the same partition; the default fill only touches
//! partitions no earlier stage produced.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use super::{group_by_system, OffsetManager};
use crate::error::Error;
use crate::startpoint::Startpoint;
use crate::stream::{Offset, SystemStreamPartition, TaskName};
use crate::system::OffsetType;
use crate::Result;

impl OffsetManager {
    /// For every surviving last-processed offset, ask the owning admin for
    /// the next offset to read. Admins may answer for fewer or more
    /// partitions than asked; only what comes back is adopted.
    pub(crate) async fn offsets_after_checkpoints(
        &self,
        last_processed: &HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>,
    ) -> Result<HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>> {
        let mut starting: HashMap<TaskName, HashMap<SystemStreamPartition, Offset>> =
            HashMap::new();
        for (task, offsets) in last_processed {
            let resolved = starting.entry(task.clone()).or_default();
            for (system, group) in group_by_system(offsets) {
                let admin = self.admin(&system)?;
                let next = admin.offsets_after(group).await?;
                debug!(
                    task = %task,
                    system = %system,
                    count = next.len(),
                    "computed next offsets after checkpointed positions"
                );
                resolved.extend(next);
            }
        }
        Ok(starting)
    }

    /// Overwrite starting offsets with resolved startpoints. A blank
    /// resolution leaves the earlier stage in place, and a resolution failure
    /// is logged and skipped so the partition falls back to its default.
    pub(crate) async fn apply_startpoints(
        &self,
        startpoints: &HashMap<TaskName, HashMap<SystemStreamPartition, Startpoint>>,
        starting: &mut HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>,
    ) {
        for (task, points) in startpoints {
            for (ssp, startpoint) in points {
                let admin = match self.admin(ssp.system()) {
                    Ok(admin) => admin,
                    Err(error) => {
                        warn!(task = %task, %ssp, %error, "cannot resolve startpoint");
                        continue;
                    }
                };
                match admin.resolve_startpoint(ssp, startpoint).await {
                    Ok(Some(offset)) if !offset.is_blank() => {
                        info!(
                            task = %task, %ssp, %offset,
                            "startpoint resolved, overriding checkpointed position"
                        );
                        starting
                            .entry(task.clone())
                            .or_default()
                            .insert(ssp.clone(), offset);
                    }
                    Ok(_) => {
                        debug!(task = %task, %ssp, "startpoint resolved to a blank offset, ignoring");
                    }
                    Err(error) => {
                        warn!(
                            task = %task, %ssp, %error,
                            "failed to resolve startpoint, falling back"
                        );
                    }
                }
            }
        }
    }

    /// Fill every registered partition that is still missing a starting
    /// offset from the stream's default-offset policy. An empty stream falls
    /// back to the upcoming offset; a partition the broker reported no
    /// metadata for is fatal.
    pub(crate) fn fill_default_offsets(
        &self,
        tasks: &HashMap<TaskName, HashSet<SystemStreamPartition>>,
        starting: &mut HashMap<TaskName, HashMap<SystemStreamPartition, Offset>>,
    ) -> Result<()> {
        for (task, ssps) in tasks {
            let resolved = starting.entry(task.clone()).or_default();
            for ssp in ssps {
                if resolved.contains_key(ssp) {
                    continue;
                }
                let setting = self.offset_settings.get(ssp.system_stream()).ok_or_else(|| {
                    Error::Config(format!(
                        "no offset setting for stream {} of registered {ssp}",
                        ssp.system_stream()
                    ))
                })?;
                let partition = setting
                    .metadata()
                    .partition(ssp.partition())
                    .ok_or_else(|| {
                        Error::Metadata(format!(
                            "no broker metadata for partition {} of stream {}",
                            ssp.partition(),
                            ssp.system_stream()
                        ))
                    })?;

                let offset = match partition.offset_for(setting.default_offset()) {
                    Some(offset) => offset.clone(),
                    None => {
                        warn!(
                            %ssp, default = %setting.default_offset(),
                            "stream is empty for the configured default, using the upcoming offset"
                        );
                        partition
                            .offset_for(OffsetType::Upcoming)
                            .cloned()
                            .ok_or_else(|| {
                                Error::Metadata(format!("no upcoming offset for {ssp}"))
                            })?
                    }
                };
                debug!(task = %task, %ssp, %offset, "using default starting offset");
                resolved.insert(ssp.clone(), offset);
            }
        }
        Ok(())
    }
}
