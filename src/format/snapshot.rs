//! Selection snapshot for persistence.
//!
//! On demand the session produces one snapshot record per input specimen,
//! preserving input row order: the full metadata with current selection
//! state, the filtered selected scans (absent when nothing is selected),
//! and the reviewer comment.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::format::error::FormatError;
use crate::format::records::SlideSet;
use crate::model::Specimen;

/// Serializable review result for one specimen.
#[derive(Debug, Clone, Serialize)]
pub struct SpecimenSnapshot {
    /// Free-text description from the input record.
    pub description: String,

    /// Full nested metadata with updated selected/score/flags.
    pub slides: SlideSet,

    /// Metadata filtered to selected scans; `None` when nothing is selected.
    pub selected_scans: Option<SlideSet>,

    /// Reviewer comment.
    pub comments: String,
}

impl SpecimenSnapshot {
    /// Capture the current state of a specimen.
    pub fn capture(specimen: &Specimen) -> Self {
        Self {
            description: specimen.description().to_string(),
            slides: specimen.information(),
            selected_scans: specimen.selected_information(),
            comments: specimen.comments().to_string(),
        }
    }
}

/// Write snapshots as pretty-printed JSON, one record per input specimen.
pub fn write_snapshot_json(path: &Path, snapshots: &[SpecimenSnapshot]) -> Result<(), FormatError> {
    let contents = serde_json::to_string_pretty(snapshots)?;
    fs::write(path, contents)?;
    Ok(())
}
