//! Review session: control-thread orchestration.
//!
//! A [`SelectionSession`] owns the specimen list, the shared image cache,
//! the background scheduler, and the viewport. Navigation commits pending
//! edits into the case model, re-derives the in-range window, evicts
//! out-of-range cache entries, synchronously ensures the new current
//! specimen's thumbnails, and queues everything else by distance. Decode
//! failures never interrupt navigation.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

use crate::cache::{CacheEntry, ImageCache, LoadKey, Tier};
use crate::config::{ConfigError, SelectionPolicy, SessionConfig};
use crate::constants::{AUTOSELECTED_FLAG, HE_FLAG, IHC_FLAG};
use crate::decoder::ScanDecoder;
use crate::format::{FormatError, SpecimenRecord, SpecimenSnapshot, write_snapshot_json};
use crate::model::{ModelError, Specimen, default_is_he};
use crate::scheduler::{self, LoadPlan, LoadScheduler};
use crate::viewport::Viewport;

/// Staining classifier capability: does this label mean H&E?
pub type StainFn = dyn Fn(&str) -> bool;

/// Autoselect capability: one boolean per scan of the given specimen.
pub type AutoselectFn = dyn Fn(&Specimen) -> Vec<bool>;

/// Errors raised while constructing or driving a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No specimen records were provided
    #[error("no specimen records were provided")]
    NoSpecimens,

    /// Building the specimen tree failed
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Configuration validation failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Snapshot persistence failed
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The loader worker pool could not be spawned
    #[error("failed to spawn loader workers: {0}")]
    Spawn(#[from] std::io::Error),

    /// The autoselect result does not match the scan count
    #[error("the autoselect result has {got} entries for {expected} scans")]
    AutoselectArity {
        /// Number of scans of the specimen
        expected: usize,
        /// Number of booleans returned
        got: usize,
    },

    /// A jump target is outside the visitable indices
    #[error("specimen index {index} is not visitable")]
    NotVisitable {
        /// The requested index
        index: usize,
    },

    /// A scan index is out of range for the current specimen
    #[error("scan index {index} is out of range")]
    InvalidScan {
        /// The requested scan index
        index: usize,
    },

    /// The session has already ended
    #[error("the session is finished")]
    Finished,
}

/// Result of a navigation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavOutcome {
    /// Moved to the specimen at this raw index.
    Moved(usize),
    /// Stepped past the end of the review; the session is over.
    Finished,
}

/// Pending per-specimen edits, committed to the model on navigation.
#[derive(Debug, Default, Clone)]
struct EditState {
    selected: BTreeSet<usize>,
    scores: HashMap<usize, u32>,
    comment: String,
}

/// Interactive review session over a list of specimens.
#[derive(Debug)]
pub struct SelectionSession {
    specimens: Vec<Specimen>,
    plan: Arc<LoadPlan>,
    cache: ImageCache,
    scheduler: Option<LoadScheduler>,
    viewport: Viewport,
    config: SessionConfig,
    scoring: bool,
    edit: EditState,
    finished: bool,
}

impl SelectionSession {
    /// Create a session with the default stain classifier and no
    /// autoselection.
    pub fn new(
        records: &[SpecimenRecord],
        config: SessionConfig,
        decoder: Arc<dyn ScanDecoder>,
    ) -> Result<Self, SessionError> {
        Self::with_hooks(records, config, decoder, &default_is_he, None)
    }

    /// Create a session with injected stain and autoselect capabilities.
    pub fn with_hooks(
        records: &[SpecimenRecord],
        config: SessionConfig,
        decoder: Arc<dyn ScanDecoder>,
        is_he: &StainFn,
        autoselect: Option<&AutoselectFn>,
    ) -> Result<Self, SessionError> {
        if records.is_empty() {
            return Err(SessionError::NoSpecimens);
        }

        let mut specimens = records
            .iter()
            .map(Specimen::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        let config = config.validated(specimens.len())?;
        let start = resolve_starting_index(records, &config);

        for specimen in &mut specimens {
            specimen.sort_slides(is_he);
            for index in 0..specimen.scan_count() {
                let staining = specimen
                    .slide_of_scan(index)
                    .map(|slide| slide.staining().to_string())
                    .unwrap_or_default();
                let flag = if is_he(&staining) { HE_FLAG } else { IHC_FLAG };
                if let Some(scan) = specimen.scan_mut(index) {
                    scan.add_flag(flag);
                }
            }
        }

        if let Some(autoselect) = autoselect {
            for specimen in &mut specimens {
                let wanted = autoselect(specimen);
                if wanted.len() != specimen.scan_count() {
                    return Err(SessionError::AutoselectArity {
                        expected: specimen.scan_count(),
                        got: wanted.len(),
                    });
                }
                for (index, selected) in wanted.into_iter().enumerate() {
                    if let Some(scan) = specimen.scan_mut(index) {
                        if scan.selected.is_none() {
                            scan.selected = Some(selected);
                            if selected {
                                scan.add_flag(AUTOSELECTED_FLAG);
                            }
                        }
                    }
                }
            }
        }

        for specimen in &mut specimens {
            for index in 0..specimen.scan_count() {
                if let Some(scan) = specimen.scan_mut(index) {
                    if scan.selected.is_none() {
                        scan.selected = Some(config.select_by_default);
                        if config.select_by_default {
                            scan.add_flag(AUTOSELECTED_FLAG);
                        }
                    }
                }
            }
        }

        let plan = Arc::new(LoadPlan::from_specimens(&specimens));
        let cache = ImageCache::new();
        let scheduler = if config.background_loading {
            Some(LoadScheduler::spawn(
                config.workers,
                Arc::clone(&plan),
                decoder,
                cache.clone(),
                config.magnification,
            )?)
        } else {
            None
        };
        let viewport = Viewport::new(
            config.buffer_window(),
            specimens.len(),
            config.visit_indices.clone(),
            start,
        );

        let mut session = Self {
            specimens,
            plan,
            cache,
            scheduler,
            viewport,
            config,
            scoring: false,
            edit: EditState::default(),
            finished: false,
        };
        session.arrive();
        Ok(session)
    }

    /// Continue to the next case; past the last one the session ends.
    pub fn next(&mut self) -> Result<NavOutcome, SessionError> {
        self.ensure_active()?;
        self.commit_edits();
        self.save_if_configured()?;
        match self.viewport.advance() {
            Some(index) => {
                self.arrive();
                Ok(NavOutcome::Moved(index))
            }
            None => {
                self.end_session();
                Ok(NavOutcome::Finished)
            }
        }
    }

    /// Return to the previous case; before the first one the session ends.
    pub fn previous(&mut self) -> Result<NavOutcome, SessionError> {
        self.ensure_active()?;
        self.commit_edits();
        self.save_if_configured()?;
        match self.viewport.retreat() {
            Some(index) => {
                self.arrive();
                Ok(NavOutcome::Moved(index))
            }
            None => {
                self.end_session();
                Ok(NavOutcome::Finished)
            }
        }
    }

    /// Jump to a visitable specimen index.
    pub fn jump(&mut self, index: usize) -> Result<NavOutcome, SessionError> {
        self.ensure_active()?;
        self.commit_edits();
        self.save_if_configured()?;
        if !self.viewport.jump(index) {
            return Err(SessionError::NotVisitable { index });
        }
        self.arrive();
        Ok(NavOutcome::Moved(index))
    }

    /// Commit edits, persist the snapshot, and drain the worker pool.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        if self.finished {
            return Ok(());
        }
        self.commit_edits();
        self.save_if_configured()?;
        self.end_session();
        Ok(())
    }

    /// Toggle the selection of a scan of the current specimen.
    ///
    /// Honors the configured [`SelectionPolicy`]; with scoring enabled,
    /// selection assigns the next rank and only the highest-ranked scan may
    /// be deselected. Returns the scan's selection state afterwards.
    pub fn toggle_scan(&mut self, scan: usize) -> Result<bool, SessionError> {
        self.ensure_active()?;
        if scan >= self.current_specimen().scan_count() {
            return Err(SessionError::InvalidScan { index: scan });
        }

        if !self.edit.selected.contains(&scan) {
            if matches!(self.config.selection, SelectionPolicy::Exclusive) {
                self.edit.selected.clear();
                self.edit.scores.clear();
            }
            let threshold = match self.config.selection {
                SelectionPolicy::Toggle { threshold } => threshold,
                SelectionPolicy::Exclusive => Some(1),
            };
            if threshold.is_none_or(|cap| self.edit.selected.len() < cap) {
                self.edit.selected.insert(scan);
                if self.scoring {
                    let next = self.edit.scores.values().copied().max().unwrap_or(0) + 1;
                    self.edit.scores.insert(scan, next);
                }
                return Ok(true);
            }
            Ok(false)
        } else {
            if let Some(score) = self.edit.scores.get(&scan).copied() {
                let highest = self.edit.scores.values().copied().max().unwrap_or(0);
                if score != highest {
                    // scored scans are deselected in reverse rank order
                    return Ok(true);
                }
                self.edit.scores.remove(&scan);
            }
            self.edit.selected.remove(&scan);
            Ok(false)
        }
    }

    /// Enable or disable scoring for subsequent selections.
    pub fn set_scoring(&mut self, scoring: bool) {
        self.scoring = scoring;
    }

    /// Whether scoring is currently enabled.
    pub fn scoring(&self) -> bool {
        self.scoring
    }

    /// Replace the draft comment for the current specimen.
    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.edit.comment = comment.into();
    }

    /// Draft comment for the current specimen.
    pub fn comment(&self) -> &str {
        &self.edit.comment
    }

    /// Currently selected scan indices of the current specimen.
    pub fn selected_scans(&self) -> Vec<usize> {
        self.edit.selected.iter().copied().collect()
    }

    /// Current score of a scan, if any.
    pub fn score_of(&self, scan: usize) -> Option<u32> {
        self.edit.scores.get(&scan).copied()
    }

    /// Number of specimens under review.
    pub fn specimen_count(&self) -> usize {
        self.specimens.len()
    }

    /// Raw index of the current specimen.
    pub fn current_index(&self) -> usize {
        self.viewport.current()
    }

    /// The current specimen.
    pub fn current_specimen(&self) -> &Specimen {
        &self.specimens[self.viewport.current()]
    }

    /// A specimen by raw index.
    pub fn specimen(&self, index: usize) -> Option<&Specimen> {
        self.specimens.get(index)
    }

    /// Whether navigation has ended the session.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Header line for the current case, e.g. `PA-1-I, II  (3/120)`.
    pub fn case_label(&self) -> String {
        let specimen = self.current_specimen();
        format!(
            "{}-{}  ({}/{})",
            specimen.pa_number().unwrap_or(""),
            specimen.specimen_numbers(),
            self.viewport.current() + 1,
            self.specimens.len()
        )
    }

    /// Cached pixels for a (specimen, scan, tier), without blocking.
    pub fn cached_image(&self, specimen: usize, scan: usize, tier: Tier) -> Option<CacheEntry> {
        self.cache.get(&LoadKey {
            specimen,
            scan,
            tier,
        })
    }

    /// Best available pixels for a scan of the current specimen:
    /// high magnification when cached, else the thumbnail.
    pub fn display_image(&self, scan: usize) -> Option<Arc<RgbImage>> {
        let current = self.viewport.current();
        let high = self
            .cache
            .get(&LoadKey::high_magnification(current, scan))
            .and_then(|entry| entry.image().cloned());
        high.or_else(|| {
            self.cache
                .get(&LoadKey::thumbnail(current, scan))
                .and_then(|entry| entry.image().cloned())
        })
    }

    /// Queue a background load explicitly; `false` when deduplicated or
    /// when background loading is disabled.
    pub fn request_load(&self, priority: usize, key: LoadKey) -> bool {
        match &self.scheduler {
            Some(scheduler) => scheduler.request(priority, key),
            None => false,
        }
    }

    /// Number of queued background loads.
    pub fn queued_loads(&self) -> usize {
        self.scheduler
            .as_ref()
            .map_or(0, LoadScheduler::queued_len)
    }

    /// Snapshot of every specimen in input order, committing pending edits
    /// first.
    pub fn snapshot(&mut self) -> Vec<SpecimenSnapshot> {
        self.commit_edits();
        self.specimens.iter().map(SpecimenSnapshot::capture).collect()
    }

    /// Write the selection snapshot to an explicit path.
    pub fn write_snapshot(&mut self, path: &Path) -> Result<(), SessionError> {
        let snapshots = self.snapshot();
        write_snapshot_json(path, &snapshots)?;
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.finished {
            return Err(SessionError::Finished);
        }
        Ok(())
    }

    /// Load edit state for the newly current specimen and refresh the cache.
    fn arrive(&mut self) {
        let specimen = &self.specimens[self.viewport.current()];
        self.edit = EditState {
            selected: specimen
                .scans()
                .enumerate()
                .filter(|(_, scan)| scan.selected == Some(true))
                .map(|(index, _)| index)
                .collect(),
            scores: specimen
                .scans()
                .enumerate()
                .filter_map(|(index, scan)| scan.score.map(|score| (index, score)))
                .collect(),
            comment: specimen.comments().to_string(),
        };
        self.refresh_cache();
    }

    /// Evict out-of-range entries, ensure current thumbnails synchronously,
    /// and queue the rest of the window by distance.
    fn refresh_cache(&mut self) {
        let current = self.viewport.current();
        let in_range = self.viewport.in_range();
        self.cache.retain_specimens(&self.viewport.in_range_set());

        // the main viewer must show something immediately
        for scan in 0..self.plan.scan_count(current) {
            let key = LoadKey::thumbnail(current, scan);
            if !self.cache.contains(&key) {
                scheduler::load_thumbnail(&self.plan, &self.cache, key);
            }
        }

        let Some(background) = &self.scheduler else {
            return;
        };
        // every thumbnail in range is serviced before any high-mag image
        let high_offset = self.viewport.window().max_extent() + 1;
        for &index in &in_range {
            let priority = current.abs_diff(index);
            for scan in 0..self.plan.scan_count(index) {
                background.request(priority, LoadKey::thumbnail(index, scan));
                if self.config.load_high_magnification {
                    background.request(
                        priority + high_offset,
                        LoadKey::high_magnification(index, scan),
                    );
                }
            }
        }
    }

    /// Write the pending edits back into the case model.
    fn commit_edits(&mut self) {
        let current = self.viewport.current();
        let Some(specimen) = self.specimens.get_mut(current) else {
            return;
        };
        for index in 0..specimen.scan_count() {
            let selected = self.edit.selected.contains(&index);
            let score = self.edit.scores.get(&index).copied();
            if let Some(scan) = specimen.scan_mut(index) {
                scan.selected = Some(selected);
                scan.score = score;
                if !selected {
                    scan.remove_flag(AUTOSELECTED_FLAG);
                }
            }
        }
        specimen.set_comments(self.edit.comment.clone());
    }

    fn save_if_configured(&mut self) -> Result<(), SessionError> {
        if let Some(path) = self.config.output_path.clone() {
            let snapshots: Vec<SpecimenSnapshot> = self
                .specimens
                .iter()
                .map(SpecimenSnapshot::capture)
                .collect();
            write_snapshot_json(&path, &snapshots)?;
        }
        Ok(())
    }

    fn end_session(&mut self) {
        self.finished = true;
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.shutdown();
        }
        log::info!("review session ended");
    }
}

fn resolve_starting_index(records: &[SpecimenRecord], config: &SessionConfig) -> usize {
    if let Some(start) = config.starting_index {
        return start;
    }
    if let Some(indices) = &config.visit_indices {
        return indices.first().copied().unwrap_or(0);
    }
    // resume at the last case with a manual selection from a previous run
    for (index, record) in records.iter().enumerate().rev() {
        if let Some(selected) = &record.selected_scans {
            let any_manual = selected
                .slides
                .iter()
                .flat_map(|slide| &slide.scan)
                .any(|scan| !scan.flags.iter().any(|flag| flag == AUTOSELECTED_FLAG));
            if any_manual {
                return index;
            }
        }
    }
    0
}
