//! Default constants for psmatrix configuration.
//!
//! All magic numbers are centralized here with documentation.

use crate::model::Clock;

// =============================================================================
// Matrix Attribute Keys
// =============================================================================

/// Directory holding `{matrix_name}/{partition_id}` files to load from.
/// Absent means the matrix starts empty.
pub const ATTR_LOAD_PATH: &str = "matrix.load.path";

/// Worker threads used by a bulk load
pub const ATTR_LOAD_THREADS: &str = "matrix.load.threads";

/// Worker threads used by a bulk save or export
pub const ATTR_SAVE_THREADS: &str = "matrix.save.threads";

// =============================================================================
// Bulk I/O Defaults
// =============================================================================

/// Upper bound for the default I/O pool size.
/// Disk-bound work stops scaling well past this on typical hosts.
pub const MAX_DEFAULT_IO_THREADS: usize = 16;

/// Default number of bulk I/O worker threads when a matrix does not set one.
/// Uses the number of CPU cores, capped at [`MAX_DEFAULT_IO_THREADS`].
pub fn default_io_threads() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
        .min(MAX_DEFAULT_IO_THREADS)
}

// =============================================================================
// Consistency Defaults
// =============================================================================

/// Default SSP staleness bound, in clocks.
/// Zero makes reads bulk-synchronous.
pub const DEFAULT_STALENESS: Clock = 0;
