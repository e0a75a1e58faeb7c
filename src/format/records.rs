//! Record schema for specimen metadata.
//!
//! One [`SpecimenRecord`] per archive row. The nested slide metadata either
//! arrives already structured or as a serialized JSON string (the archive
//! export writes single-quoted JSON); [`SlideMetadata::resolve`] normalizes
//! both into a [`SlideSet`] and fails with a clear diagnostic on shape
//! mismatch instead of evaluating untrusted text.

use serde::{Deserialize, Serialize};

use crate::format::error::FormatError;

/// File lists for one scan, keyed the way the archive export keys them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanFilesRecord {
    /// Source files of the scan, one per magnification level.
    #[serde(rename = "SLIDE")]
    pub slide: Vec<String>,

    /// Thumbnail file, if one was exported (at most one is used).
    #[serde(rename = "THUMBNAIL", default)]
    pub thumbnail: Vec<String>,
}

/// One digitized acquisition of a slide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Directory holding the scan's files, with `/` separators.
    pub base_dir: String,

    /// File lists of the scan.
    pub files: ScanFilesRecord,

    /// Selection state from a previous session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,

    /// Score from a previous session, only meaningful when selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,

    /// Free-form string flags ("HE", "automatically selected", ...).
    #[serde(default)]
    pub flags: Vec<String>,
}

/// One physical tissue section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideRecord {
    /// Pathology archive number of the case this slide belongs to.
    pub pa_number: String,

    /// Sub-specimen number within the case (numeric or free text).
    pub specimen_nr: String,

    /// Tissue block identifier.
    pub block: String,

    /// Staining label.
    pub staining: String,

    /// Scans of this slide.
    pub scan: Vec<ScanRecord>,
}

/// Nested slide metadata of one specimen, plus session comments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideSet {
    /// Slides of the specimen.
    pub slides: Vec<SlideRecord>,

    /// Free-text comment carried over from a previous session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Slide metadata as it arrives: structured, or a serialized string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlideMetadata {
    /// Already-structured metadata.
    Parsed(SlideSet),
    /// Serialized JSON string, possibly single-quoted.
    Serialized(String),
}

impl SlideMetadata {
    /// Resolve into a structured [`SlideSet`].
    ///
    /// Serialized metadata is parsed after normalizing the archive's
    /// single-quote convention.
    pub fn resolve(&self) -> Result<SlideSet, FormatError> {
        match self {
            SlideMetadata::Parsed(set) => Ok(set.clone()),
            SlideMetadata::Serialized(text) => {
                let normalized = text.replace('\'', "\"");
                serde_json::from_str(&normalized).map_err(|err| {
                    FormatError::invalid_metadata(format!(
                        "serialized slide metadata does not match the slide schema: {err}"
                    ))
                })
            }
        }
    }
}

/// One archive row: a specimen with description and slide metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecimenRecord {
    /// Free-text description shown alongside the case.
    #[serde(default)]
    pub description: String,

    /// Nested slide metadata.
    pub slides: SlideMetadata,

    /// Filtered selection written by a previous session, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_scans: Option<SlideSet>,

    /// Free-text comment written by a previous session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}
