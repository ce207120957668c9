//! Configuration surface for offset coordination and the derivation of one
//! [OffsetSetting] per input stream. The container hands in a flat key-value
//! configuration (lifted from its deployment spec) together with the broker
//! metadata it fetched for every input stream; derivation binds the two and
//! fixes the default-offset policy and reset flag per stream.
//!
//! Recognized keys:
//! - `streams.<stream>.offset.default` = oldest | newest | upcoming
//! - `systems.<system>.offset.default` = oldest | newest | upcoming
//! - `streams.<stream>.reset.offset` = true | false

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;
use crate::stream::SystemStream;
use crate::system::{OffsetType, SystemStreamMetadata};
use crate::Result;

const DEFAULT_OFFSET_TYPE: OffsetType = OffsetType::Upcoming;

fn stream_default_offset_key(stream: &str) -> String {
    format!("streams.{stream}.offset.default")
}

fn system_default_offset_key(system: &str) -> String {
    format!("systems.{system}.offset.default")
}

fn stream_reset_offset_key(stream: &str) -> String {
    format!("streams.{stream}.reset.offset")
}

/// Flat key-value configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    entries: HashMap<String, String>,
}

impl Config {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.entries.get(key) {
            None => Ok(default),
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(Error::Config(format!(
                    "invalid boolean '{other}' for key {key}"
                ))),
            },
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Config {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Per-stream binding of broker metadata, default-offset policy, and reset
/// flag. Derived once at container start and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSetting {
    metadata: SystemStreamMetadata,
    default_offset: OffsetType,
    reset_offset: bool,
}

impl OffsetSetting {
    pub fn new(
        metadata: SystemStreamMetadata,
        default_offset: OffsetType,
        reset_offset: bool,
    ) -> Self {
        Self {
            metadata,
            default_offset,
            reset_offset,
        }
    }

    pub fn metadata(&self) -> &SystemStreamMetadata {
        &self.metadata
    }

    pub fn default_offset(&self) -> OffsetType {
        self.default_offset
    }

    pub fn reset_offset(&self) -> bool {
        self.reset_offset
    }
}

/// Derive one [OffsetSetting] per input stream. The default-offset policy is
/// resolved per stream first, then per system, then falls back to upcoming.
pub fn build_offset_settings(
    stream_metadata: HashMap<SystemStream, SystemStreamMetadata>,
    config: &Config,
) -> Result<HashMap<SystemStream, OffsetSetting>> {
    stream_metadata
        .into_iter()
        .map(|(system_stream, metadata)| {
            let default_offset = default_offset_for(&system_stream, config)?;
            let reset_offset =
                config.get_bool(&stream_reset_offset_key(system_stream.stream()), false)?;
            Ok((
                system_stream,
                OffsetSetting::new(metadata, default_offset, reset_offset),
            ))
        })
        .collect()
}

fn default_offset_for(system_stream: &SystemStream, config: &Config) -> Result<OffsetType> {
    let configured = config
        .get(&stream_default_offset_key(system_stream.stream()))
        .or_else(|| config.get(&system_default_offset_key(system_stream.system())));

    match configured {
        Some(value) => value.parse(),
        None => {
            info!(
                stream = %system_stream,
                "no configured default offset, falling back to {DEFAULT_OFFSET_TYPE}"
            );
            Ok(DEFAULT_OFFSET_TYPE)
        }
    }
}
