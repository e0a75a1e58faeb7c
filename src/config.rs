//! Session configuration.
//!
//! All tool settings are validated once at session construction; invalid
//! combinations are rejected with a [`ConfigError`] instead of being patched
//! silently at runtime.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUFFER_AFTER, DEFAULT_BUFFER_BEFORE, DEFAULT_MAGNIFICATION, DEFAULT_WORKERS,
};
use crate::viewport::BufferWindow;

/// How scan selection behaves within one specimen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Plain toggle, optionally capped at `threshold` selected scans.
    Toggle {
        /// Maximum selectable scans per specimen; `None` means no cap.
        threshold: Option<usize>,
    },
    /// Selecting a scan deselects every other scan of the specimen.
    Exclusive,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::Toggle { threshold: None }
    }
}

/// Validated tool settings, produced once at session construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Specimens kept warm before the current one.
    #[serde(default = "default_buffer_before")]
    pub buffer_before: usize,

    /// Specimens kept warm after the current one.
    #[serde(default = "default_buffer_after")]
    pub buffer_after: usize,

    /// Background decode worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Whether images are loaded in the background at all.
    #[serde(default = "default_background_loading")]
    pub background_loading: bool,

    /// Target magnification for high-magnification decodes.
    #[serde(default = "default_magnification")]
    pub magnification: f32,

    /// Whether high-magnification images are loaded in addition to
    /// thumbnails.
    #[serde(default)]
    pub load_high_magnification: bool,

    /// Selection behavior per specimen.
    #[serde(default)]
    pub selection: SelectionPolicy,

    /// Whether every scan starts out selected.
    #[serde(default)]
    pub select_by_default: bool,

    /// Case to start the review at; derived when absent.
    #[serde(default)]
    pub starting_index: Option<usize>,

    /// Restricted subset of visitable specimen indices; all when absent.
    #[serde(default)]
    pub visit_indices: Option<Vec<usize>>,

    /// File the selection snapshot is written to on navigation and finish.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

fn default_buffer_before() -> usize {
    DEFAULT_BUFFER_BEFORE
}

fn default_buffer_after() -> usize {
    DEFAULT_BUFFER_AFTER
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_background_loading() -> bool {
    true
}

fn default_magnification() -> f32 {
    DEFAULT_MAGNIFICATION
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_before: default_buffer_before(),
            buffer_after: default_buffer_after(),
            workers: default_workers(),
            background_loading: default_background_loading(),
            magnification: default_magnification(),
            load_high_magnification: false,
            selection: SelectionPolicy::default(),
            select_by_default: false,
            starting_index: None,
            visit_indices: None,
            output_path: None,
        }
    }
}

impl SessionConfig {
    /// Validate against the specimen count and normalize.
    ///
    /// An empty subset becomes "visit everything"; a non-empty subset is
    /// sorted and deduplicated. All invalid combinations are rejected here,
    /// before any session state exists.
    pub fn validated(mut self, specimen_count: usize) -> Result<Self, ConfigError> {
        if self.background_loading && self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }

        if let SelectionPolicy::Toggle { threshold } = self.selection {
            if threshold == Some(0) {
                return Err(ConfigError::ZeroSelectionThreshold);
            }
            if self.select_by_default && threshold.is_some() {
                return Err(ConfigError::ThresholdWithSelectAll);
            }
        }

        if let Some(indices) = self.visit_indices.take() {
            if indices.is_empty() {
                self.visit_indices = None;
            } else {
                let mut indices = indices;
                indices.sort_unstable();
                indices.dedup();
                if let Some(&out_of_bounds) =
                    indices.iter().find(|&&i| i >= specimen_count)
                {
                    return Err(ConfigError::InvalidVisitIndex {
                        index: out_of_bounds,
                        specimen_count,
                    });
                }
                self.visit_indices = Some(indices);
            }
        }

        if let Some(start) = self.starting_index {
            if start >= specimen_count {
                return Err(ConfigError::InvalidStartingIndex {
                    index: start,
                    specimen_count,
                });
            }
            if let Some(indices) = &self.visit_indices {
                if !indices.contains(&start) {
                    return Err(ConfigError::StartingIndexNotVisitable { index: start });
                }
            }
        }

        Ok(self)
    }

    /// Buffer window for the viewport.
    pub fn buffer_window(&self) -> BufferWindow {
        BufferWindow {
            before: self.buffer_before,
            after: self.buffer_after,
        }
    }
}

/// Errors raised by configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Background loading with an empty worker pool
    #[error("background loading requires at least one worker")]
    NoWorkers,

    /// Selection threshold of zero
    #[error("the selection threshold must be larger than zero")]
    ZeroSelectionThreshold,

    /// Threshold combined with select-by-default
    #[error("a selection threshold cannot be combined with selecting all scans by default")]
    ThresholdWithSelectAll,

    /// Visit subset entry out of bounds
    #[error("visit index {index} is out of bounds for {specimen_count} specimens")]
    InvalidVisitIndex {
        /// The offending index
        index: usize,
        /// Number of specimens in the session
        specimen_count: usize,
    },

    /// Starting index out of bounds
    #[error("starting index {index} is out of bounds for {specimen_count} specimens")]
    InvalidStartingIndex {
        /// The offending index
        index: usize,
        /// Number of specimens in the session
        specimen_count: usize,
    },

    /// Starting index excluded by the visit subset
    #[error("starting index {index} is not part of the visit indices")]
    StartingIndexNotVisitable {
        /// The offending index
        index: usize,
    },
}
