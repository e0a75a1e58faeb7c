//! scanpick - whole-slide image selection core
//!
//! A headless review core for pathology whole-slide images: a case model
//! (specimen -> slide -> scan), a priority-ordered background load scheduler
//! with a bounded worker pool, and a viewport cache manager that keeps a
//! sliding window of specimens warm in memory. UI layers sit on top of
//! [`SelectionSession`] and read decoded images out of the shared cache.

mod cache;
mod config;
mod constants;
mod decoder;
mod format;
mod model;
mod natsort;
mod roman;
mod scheduler;
mod session;
mod viewport;

pub use cache::{CacheEntry, ImageCache, LoadKey, Tier};
pub use config::{ConfigError, SelectionPolicy, SessionConfig};
pub use constants::{AUTOSELECTED_FLAG, HE_FLAG, IHC_FLAG};
pub use decoder::{DecodeError, FlatImageDecoder, ScanDecoder, ScanHandle, decode_thumbnail};
pub use format::{
    FormatError, ScanFilesRecord, ScanRecord, SlideMetadata, SlideRecord, SlideSet,
    SpecimenRecord, SpecimenSnapshot, write_snapshot_json,
};
pub use model::{ModelError, Scan, Slide, Specimen, default_is_he};
pub use scheduler::{LoadPlan, LoadScheduler, ScanSource};
pub use session::{AutoselectFn, NavOutcome, SelectionSession, SessionError, StainFn};
pub use viewport::{BufferWindow, Viewport};
