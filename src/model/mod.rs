//! Case model: specimen, slide, and scan data.

mod specimen;
mod stain;

pub use specimen::{ModelError, Scan, Slide, Specimen};
pub use stain::default_is_he;
