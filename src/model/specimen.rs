//! Specimen -> Slide -> Scan tree.
//!
//! The tree is owned top-down by the session's specimen list. The flattened
//! scan view and the scan-to-slide back-reference are index lookups, rebuilt
//! whenever the slide order changes.

use std::path::PathBuf;

use thiserror::Error;

use crate::format::{FormatError, ScanFilesRecord, ScanRecord, SlideRecord, SlideSet,
    SpecimenRecord};
use crate::natsort::natural_cmp;
use crate::roman::to_roman;

/// Errors raised while building the specimen tree.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Slides of one specimen disagree on the archive number.
    #[error("at least two slides with a different pa_number were assigned to this specimen: {found:?}")]
    InconsistentPaNumber {
        /// The distinct pa_numbers that were found.
        found: Vec<String>,
    },

    /// A slide arrived without any scans.
    #[error("slide {block:?} ({staining}) has no scans")]
    SlideWithoutScans {
        /// Block identifier of the offending slide.
        block: String,
        /// Staining label of the offending slide.
        staining: String,
    },

    /// Slide metadata could not be resolved.
    #[error(transparent)]
    Metadata(#[from] FormatError),
}

/// One digitized acquisition of a slide.
#[derive(Debug, Clone)]
pub struct Scan {
    base_dir: String,
    files: Vec<String>,
    thumbnail_file: Option<String>,
    /// Tri-state selection: unset, kept, or rejected.
    pub selected: Option<bool>,
    /// Ranking score, only meaningful when selected.
    pub score: Option<u32>,
    flags: Vec<String>,
}

impl Scan {
    fn from_record(record: &ScanRecord) -> Self {
        let mut files = record.files.slide.clone();
        files.sort();
        Self {
            base_dir: record.base_dir.clone(),
            files,
            thumbnail_file: record.files.thumbnail.first().cloned(),
            selected: record.selected,
            score: record.score,
            flags: record.flags.clone(),
        }
    }

    /// Source file paths in sorted order, one per magnification level.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| self.join_base(f)).collect()
    }

    /// Path of the thumbnail file, if one was exported.
    pub fn thumbnail_path(&self) -> Option<PathBuf> {
        self.thumbnail_file.as_deref().map(|f| self.join_base(f))
    }

    fn join_base(&self, file: &str) -> PathBuf {
        let mut path: PathBuf = self.base_dir.split('/').collect();
        path.push(file);
        path
    }

    /// String flags attached to this scan.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Check whether a flag is set.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Set a flag, ignoring duplicates.
    pub fn add_flag(&mut self, flag: &str) {
        if !self.has_flag(flag) {
            self.flags.push(flag.to_string());
        }
    }

    /// Remove a flag if present.
    pub fn remove_flag(&mut self, flag: &str) {
        self.flags.retain(|f| f != flag);
    }

    fn to_record(&self) -> ScanRecord {
        ScanRecord {
            base_dir: self.base_dir.clone(),
            files: ScanFilesRecord {
                slide: self.files.clone(),
                thumbnail: self.thumbnail_file.iter().cloned().collect(),
            },
            selected: self.selected,
            score: self.score,
            flags: self.flags.clone(),
        }
    }
}

/// One physical tissue section, holding at least one scan.
#[derive(Debug, Clone)]
pub struct Slide {
    pa_number: String,
    specimen_nr: String,
    block: String,
    staining: String,
    scans: Vec<Scan>,
}

impl Slide {
    fn from_record(record: &SlideRecord) -> Result<Self, ModelError> {
        if record.scan.is_empty() {
            return Err(ModelError::SlideWithoutScans {
                block: record.block.clone(),
                staining: record.staining.clone(),
            });
        }
        Ok(Self {
            pa_number: record.pa_number.clone(),
            specimen_nr: record.specimen_nr.clone(),
            block: record.block.clone(),
            staining: record.staining.clone(),
            scans: record.scan.iter().map(Scan::from_record).collect(),
        })
    }

    /// Archive number of the case.
    pub fn pa_number(&self) -> &str {
        &self.pa_number
    }

    /// Sub-specimen number, rendered as a roman numeral when numeric.
    pub fn specimen_number(&self) -> String {
        to_roman(&self.specimen_nr)
    }

    /// Tissue block identifier.
    pub fn block(&self) -> &str {
        &self.block
    }

    /// Staining label.
    pub fn staining(&self) -> &str {
        &self.staining
    }

    /// Scans of this slide.
    pub fn scans(&self) -> &[Scan] {
        &self.scans
    }

    fn to_record(&self) -> SlideRecord {
        SlideRecord {
            pa_number: self.pa_number.clone(),
            specimen_nr: self.specimen_nr.clone(),
            block: self.block.clone(),
            staining: self.staining.clone(),
            scan: self.scans.iter().map(Scan::to_record).collect(),
        }
    }

    fn selected_record(&self) -> Option<SlideRecord> {
        let selected: Vec<ScanRecord> = self
            .scans
            .iter()
            .filter(|scan| scan.selected == Some(true))
            .map(Scan::to_record)
            .collect();
        if selected.is_empty() {
            return None;
        }
        Some(SlideRecord {
            pa_number: self.pa_number.clone(),
            specimen_nr: self.specimen_nr.clone(),
            block: self.block.clone(),
            staining: self.staining.clone(),
            scan: selected,
        })
    }
}

/// One clinical case: an ordered list of slides plus review state.
#[derive(Debug, Clone)]
pub struct Specimen {
    pa_number: Option<String>,
    specimen_numbers: String,
    description: String,
    comments: String,
    slides: Vec<Slide>,
    // flattened scan order: (slide index, scan index within slide)
    scan_map: Vec<(usize, usize)>,
}

impl Specimen {
    /// Build a specimen from an archive record.
    pub fn from_record(record: &SpecimenRecord) -> Result<Self, ModelError> {
        let set = record.slides.resolve()?;
        let comments = record
            .comments
            .clone()
            .or_else(|| set.comments.clone())
            .unwrap_or_default();
        Self::new(&set, &record.description, comments)
    }

    fn new(set: &SlideSet, description: &str, comments: String) -> Result<Self, ModelError> {
        let slides = set
            .slides
            .iter()
            .map(Slide::from_record)
            .collect::<Result<Vec<_>, _>>()?;

        let mut pa_numbers: Vec<String> =
            slides.iter().map(|s| s.pa_number.clone()).collect();
        pa_numbers.sort();
        pa_numbers.dedup();
        let pa_number = match pa_numbers.len() {
            0 => None,
            1 => pa_numbers.pop(),
            _ => return Err(ModelError::InconsistentPaNumber { found: pa_numbers }),
        };

        let mut sub_numbers: Vec<String> = slides
            .iter()
            .map(|s| {
                let number = s.specimen_number();
                if number.is_empty() {
                    "''".to_string()
                } else {
                    number
                }
            })
            .collect();
        sub_numbers.sort_by(|a, b| natural_cmp(a, b));
        sub_numbers.dedup();
        let specimen_numbers = sub_numbers.join(", ");

        let mut specimen = Self {
            pa_number,
            specimen_numbers,
            description: description.to_string(),
            comments,
            slides,
            scan_map: Vec::new(),
        };
        specimen.rebuild_scan_map();
        Ok(specimen)
    }

    fn rebuild_scan_map(&mut self) {
        self.scan_map = self
            .slides
            .iter()
            .enumerate()
            .flat_map(|(slide_idx, slide)| {
                (0..slide.scans.len()).map(move |scan_idx| (slide_idx, scan_idx))
            })
            .collect();
    }

    /// Reorder slides by sub-number, block, H&E before non-H&E, staining
    /// text, and original position. Idempotent; the flattened scan order
    /// follows the new slide order.
    pub fn sort_slides(&mut self, is_he: &dyn Fn(&str) -> bool) {
        let slides = std::mem::take(&mut self.slides);
        let mut decorated: Vec<(SlideSortKey, Slide)> = slides
            .into_iter()
            .enumerate()
            .map(|(index, slide)| {
                let key = SlideSortKey {
                    specimen_number: slide.specimen_number(),
                    block: slide.block.clone(),
                    non_he: !is_he(&slide.staining),
                    staining: slide.staining.clone(),
                    index,
                };
                (key, slide)
            })
            .collect();
        decorated.sort_by(|(a, _), (b, _)| a.cmp(b));
        self.slides = decorated.into_iter().map(|(_, slide)| slide).collect();
        self.rebuild_scan_map();
    }

    /// Archive number of the case, absent only for specimens without slides.
    pub fn pa_number(&self) -> Option<&str> {
        self.pa_number.as_deref()
    }

    /// Natural-sorted summary of the distinct sub-numbers ("I, II").
    pub fn specimen_numbers(&self) -> &str {
        &self.specimen_numbers
    }

    /// Free-text description of the case.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Reviewer comment for the case.
    pub fn comments(&self) -> &str {
        &self.comments
    }

    /// Replace the reviewer comment.
    pub fn set_comments(&mut self, comments: impl Into<String>) {
        self.comments = comments.into();
    }

    /// Slides in their current order.
    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    /// Number of scans across all slides.
    pub fn scan_count(&self) -> usize {
        self.scan_map.len()
    }

    /// Scan at a flattened index.
    pub fn scan(&self, index: usize) -> Option<&Scan> {
        let (slide_idx, scan_idx) = *self.scan_map.get(index)?;
        self.slides[slide_idx].scans.get(scan_idx)
    }

    /// Mutable scan at a flattened index.
    pub fn scan_mut(&mut self, index: usize) -> Option<&mut Scan> {
        let (slide_idx, scan_idx) = *self.scan_map.get(index)?;
        self.slides[slide_idx].scans.get_mut(scan_idx)
    }

    /// Slide a flattened scan index belongs to.
    pub fn slide_of_scan(&self, index: usize) -> Option<&Slide> {
        let (slide_idx, _) = *self.scan_map.get(index)?;
        self.slides.get(slide_idx)
    }

    /// Scans in flattened order.
    pub fn scans(&self) -> impl Iterator<Item = &Scan> {
        self.scan_map
            .iter()
            .map(|&(slide_idx, scan_idx)| &self.slides[slide_idx].scans[scan_idx])
    }

    /// Full nested metadata including the current selection state.
    pub fn information(&self) -> SlideSet {
        SlideSet {
            slides: self.slides.iter().map(Slide::to_record).collect(),
            comments: Some(self.comments.clone()),
        }
    }

    /// Nested metadata filtered to selected scans only.
    ///
    /// Returns `None` when zero scans across the whole specimen are
    /// selected, so callers can distinguish "nothing selected" from an
    /// empty structure.
    pub fn selected_information(&self) -> Option<SlideSet> {
        let slides: Vec<SlideRecord> = self
            .slides
            .iter()
            .filter_map(Slide::selected_record)
            .collect();
        if slides.is_empty() {
            return None;
        }
        Some(SlideSet {
            slides,
            comments: Some(self.comments.clone()),
        })
    }
}

#[derive(PartialEq, Eq)]
struct SlideSortKey {
    specimen_number: String,
    block: String,
    non_he: bool,
    staining: String,
    index: usize,
}

impl Ord for SlideSortKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        natural_cmp(&self.specimen_number, &other.specimen_number)
            .then_with(|| natural_cmp(&self.block, &other.block))
            .then_with(|| self.non_he.cmp(&other.non_he))
            .then_with(|| self.staining.cmp(&other.staining))
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for SlideSortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SlideMetadata;
    use crate::model::stain::default_is_he;

    fn scan_record(files: &[&str], thumbnail: Option<&str>) -> ScanRecord {
        ScanRecord {
            base_dir: "archive/case".to_string(),
            files: ScanFilesRecord {
                slide: files.iter().map(|f| f.to_string()).collect(),
                thumbnail: thumbnail.iter().map(|f| f.to_string()).collect(),
            },
            selected: None,
            score: None,
            flags: Vec::new(),
        }
    }

    fn slide_record(pa: &str, nr: &str, block: &str, staining: &str) -> SlideRecord {
        SlideRecord {
            pa_number: pa.to_string(),
            specimen_nr: nr.to_string(),
            block: block.to_string(),
            staining: staining.to_string(),
            scan: vec![scan_record(&["b.dcm", "a.dcm"], Some("thumb.png"))],
        }
    }

    fn specimen_from(slides: Vec<SlideRecord>) -> Result<Specimen, ModelError> {
        let record = SpecimenRecord {
            description: "test case".to_string(),
            slides: SlideMetadata::Parsed(SlideSet {
                slides,
                comments: None,
            }),
            selected_scans: None,
            comments: None,
        };
        Specimen::from_record(&record)
    }

    #[test]
    fn inconsistent_pa_number_fails_construction() {
        let err = specimen_from(vec![
            slide_record("PA-1", "1", "A", "HE"),
            slide_record("PA-2", "1", "B", "HE"),
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::InconsistentPaNumber { .. }));
    }

    #[test]
    fn slide_without_scans_fails_construction() {
        let mut slide = slide_record("PA-1", "1", "A", "HE");
        slide.scan.clear();
        let err = specimen_from(vec![slide]).unwrap_err();
        assert!(matches!(err, ModelError::SlideWithoutScans { .. }));
    }

    #[test]
    fn scan_paths_are_sorted_and_joined() {
        let specimen = specimen_from(vec![slide_record("PA-1", "1", "A", "HE")]).unwrap();
        let scan = specimen.scan(0).unwrap();
        let paths = scan.paths();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a.dcm"));
        assert!(paths[1].ends_with("b.dcm"));
        assert!(scan.thumbnail_path().unwrap().ends_with("thumb.png"));
    }

    #[test]
    fn specimen_numbers_are_roman_and_natural_sorted() {
        let specimen = specimen_from(vec![
            slide_record("PA-1", "2", "A", "HE"),
            slide_record("PA-1", "1", "B", "HE"),
            slide_record("PA-1", "2", "C", "HE"),
        ])
        .unwrap();
        assert_eq!(specimen.specimen_numbers(), "I, II");
    }

    #[test]
    fn sort_slides_orders_by_composite_key() {
        let mut specimen = specimen_from(vec![
            slide_record("PA-1", "2", "A1", "HE"),
            slide_record("PA-1", "1", "A10", "PMS2"),
            slide_record("PA-1", "1", "A10", "HE"),
            slide_record("PA-1", "1", "A2", "HE"),
        ])
        .unwrap();
        specimen.sort_slides(&default_is_he);
        let order: Vec<(String, String, String)> = specimen
            .slides()
            .iter()
            .map(|s| {
                (
                    s.specimen_number(),
                    s.block().to_string(),
                    s.staining().to_string(),
                )
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("I".to_string(), "A2".to_string(), "HE".to_string()),
                ("I".to_string(), "A10".to_string(), "HE".to_string()),
                ("I".to_string(), "A10".to_string(), "PMS2".to_string()),
                ("II".to_string(), "A1".to_string(), "HE".to_string()),
            ]
        );
    }

    #[test]
    fn sort_slides_is_idempotent() {
        let mut specimen = specimen_from(vec![
            slide_record("PA-1", "2", "B", "SOX10"),
            slide_record("PA-1", "1", "A", "HE"),
            slide_record("PA-1", "1", "A", "PMS2"),
        ])
        .unwrap();
        specimen.sort_slides(&default_is_he);
        let once: Vec<String> = specimen
            .slides()
            .iter()
            .map(|s| s.staining().to_string())
            .collect();
        specimen.sort_slides(&default_is_he);
        let twice: Vec<String> = specimen
            .slides()
            .iter()
            .map(|s| s.staining().to_string())
            .collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn selected_information_absent_without_selection() {
        let specimen = specimen_from(vec![
            slide_record("PA-1", "1", "A", "HE"),
            slide_record("PA-1", "1", "B", "HE"),
        ])
        .unwrap();
        assert!(specimen.selected_information().is_none());
    }

    #[test]
    fn selected_information_filters_to_selected_scans() {
        let mut specimen = specimen_from(vec![
            slide_record("PA-1", "1", "A", "HE"),
            slide_record("PA-1", "1", "B", "HE"),
        ])
        .unwrap();
        specimen.scan_mut(1).unwrap().selected = Some(true);
        specimen.scan_mut(0).unwrap().selected = Some(false);

        let info = specimen.selected_information().unwrap();
        assert_eq!(info.slides.len(), 1);
        assert_eq!(info.slides[0].block, "B");
        assert_eq!(info.slides[0].scan.len(), 1);
        assert_eq!(info.slides[0].scan[0].selected, Some(true));
    }

    #[test]
    fn flags_deduplicate() {
        let mut specimen = specimen_from(vec![slide_record("PA-1", "1", "A", "HE")]).unwrap();
        let scan = specimen.scan_mut(0).unwrap();
        scan.add_flag("HE");
        scan.add_flag("HE");
        assert_eq!(scan.flags(), ["HE"]);
        scan.remove_flag("HE");
        assert!(scan.flags().is_empty());
    }
}
