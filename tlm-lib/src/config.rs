//! Mission geometry.
//!
//! Everything that differs between spacecraft (frame length, sync pattern, the position of the
//! minor-frame counter, and the sub-commutated groups) is carried by a [MissionConfig] that is
//! handed to the [Engine](crate::Engine) when it is constructed.
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Operating mode used to select mode-filtered position specifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Engineering,
    Science,
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Engineering => write!(f, "engineering"),
            Mode::Science => write!(f, "science"),
        }
    }
}

/// A logical frame interleaved across fixed columns of every minor frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcomGroup {
    /// Namespace key, e.g. `DS`.
    pub key: String,
    /// Length of one logical frame in bytes.
    pub length: usize,
    /// Minor-frame byte offsets carrying this group, strictly ascending.
    pub columns: Vec<usize>,
}

impl SubcomGroup {
    pub fn new(key: &str, length: usize, columns: &[usize]) -> Self {
        SubcomGroup {
            key: key.to_string(),
            length,
            columns: columns.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// Minor frame length in bytes, including the trailing sync pattern.
    pub frame_length: usize,
    /// Number of minor frames in one major frame.
    pub cycle_length: usize,
    /// Byte offset of the minor-frame counter.
    pub counter_offset: usize,
    /// Sync pattern found at the end of every minor frame.
    pub sync_word: u64,
    /// Length of [Self::sync_word] in bytes.
    pub sync_length: usize,
    /// Consecutive counter matches after which the counter stops being checked on every frame.
    pub trust_limit: usize,
    /// Consecutive counter mismatches tolerated in trusted mode before the index is dropped.
    pub mismatch_limit: usize,
    pub mode: Option<Mode>,
    pub groups: Vec<SubcomGroup>,
}

impl MissionConfig {
    pub const FRAME_LENGTH: usize = 128;
    pub const CYCLE_LENGTH: usize = 256;
    pub const COUNTER_OFFSET: usize = 60;
    pub const SYNC_WORD: u64 = 0x12_fc81_9fbe;
    pub const SYNC_LENGTH: usize = 5;
    pub const SUBCOM_LENGTH: usize = 64;

    /// Load from a JSON file. Missing fields take the reference mission defaults.
    ///
    /// # Errors
    /// [Error::Io] or [Error::Json] if the file cannot be read, or [Error::Config] if the
    /// geometry is inconsistent.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: MissionConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn group(&self, key: &str) -> Option<&SubcomGroup> {
        self.groups.iter().find(|g| g.key == key)
    }

    /// Check that the geometry is self-consistent.
    ///
    /// # Errors
    /// [Error::Config] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.frame_length == 0 || self.cycle_length == 0 {
            return Err(Error::Config(
                "frame and cycle lengths must be non-zero".to_string(),
            ));
        }
        if self.counter_offset >= self.frame_length {
            return Err(Error::Config(format!(
                "counter offset {} outside of {} byte minor frame",
                self.counter_offset, self.frame_length
            )));
        }
        if self.cycle_length > 256 {
            return Err(Error::Config(format!(
                "cycle length {} cannot be indexed by a one byte counter",
                self.cycle_length
            )));
        }
        if self.sync_length == 0 || self.sync_length > 8 || self.sync_length > self.frame_length {
            return Err(Error::Config(format!(
                "invalid sync length {}",
                self.sync_length
            )));
        }
        for (idx, group) in self.groups.iter().enumerate() {
            if group.length == 0 || group.columns.is_empty() {
                return Err(Error::Config(format!(
                    "sub-commutated group {} is empty",
                    group.key
                )));
            }
            if let Some(col) = group.columns.iter().find(|c| **c >= self.frame_length) {
                return Err(Error::Config(format!(
                    "group {} column {col} outside of minor frame",
                    group.key
                )));
            }
            if self.groups[..idx].iter().any(|g| g.key == group.key) {
                return Err(Error::Config(format!(
                    "duplicate sub-commutated group {}",
                    group.key
                )));
            }
        }
        Ok(())
    }
}

impl Default for MissionConfig {
    fn default() -> Self {
        MissionConfig {
            frame_length: Self::FRAME_LENGTH,
            cycle_length: Self::CYCLE_LENGTH,
            counter_offset: Self::COUNTER_OFFSET,
            sync_word: Self::SYNC_WORD,
            sync_length: Self::SYNC_LENGTH,
            trust_limit: 3,
            mismatch_limit: 3,
            mode: None,
            groups: vec![
                SubcomGroup::new(
                    "DS",
                    Self::SUBCOM_LENGTH,
                    &[20, 21, 22, 23, 44, 45, 46, 47, 59, 68, 69, 70, 71, 92, 93, 94, 95],
                ),
                SubcomGroup::new(
                    "AS1",
                    Self::SUBCOM_LENGTH,
                    &[17, 33, 36, 49, 52, 65, 75, 81, 84, 91, 97, 100, 107, 113, 116],
                ),
                SubcomGroup::new(
                    "AS2",
                    Self::SUBCOM_LENGTH,
                    &[19, 25, 35, 38, 41, 51, 54, 57, 67, 73, 83, 89, 99, 105, 115, 121],
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = MissionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.group("DS").unwrap().columns.len(), 17);
        assert!(config.group("XX").is_none());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: MissionConfig =
            serde_json::from_str(r#"{"counter_offset": 12, "mode": "science"}"#).unwrap();
        assert_eq!(config.counter_offset, 12);
        assert_eq!(config.mode, Some(Mode::Science));
        assert_eq!(config.frame_length, MissionConfig::FRAME_LENGTH);
        assert_eq!(config.groups.len(), 3);
    }

    #[test]
    fn column_outside_frame_is_rejected() {
        let mut config = MissionConfig::default();
        config.groups.push(SubcomGroup::new("BAD", 64, &[1, 200]));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn duplicate_group_is_rejected() {
        let mut config = MissionConfig::default();
        config.groups.push(SubcomGroup::new("DS", 64, &[1]));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
