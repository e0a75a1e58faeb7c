//! Default values and well-known flag names.

/// Specimens kept warm before the current one.
pub const DEFAULT_BUFFER_BEFORE: usize = 1;

/// Specimens kept warm after the current one.
pub const DEFAULT_BUFFER_AFTER: usize = 10;

/// Background decode worker threads.
pub const DEFAULT_WORKERS: usize = 2;

/// Target magnification for high-magnification decodes.
pub const DEFAULT_MAGNIFICATION: f32 = 5.0;

/// Flag set on scans that were selected without user interaction.
pub const AUTOSELECTED_FLAG: &str = "automatically selected";

/// Staining flag for H&E stained slides.
pub const HE_FLAG: &str = "HE";

/// Staining flag for immunohistochemistry stained slides.
pub const IHC_FLAG: &str = "IHC";
