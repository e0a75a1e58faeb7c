//! Specimen record schema and selection snapshot persistence.

mod error;
mod records;
mod snapshot;

pub use error::FormatError;
pub use records::{
    ScanFilesRecord, ScanRecord, SlideMetadata, SlideRecord, SlideSet, SpecimenRecord,
};
pub use snapshot::{SpecimenSnapshot, write_snapshot_json};
