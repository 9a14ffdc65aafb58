use once_cell::sync::Lazy;

/// Maximum number of input or output bindings on a connection.
pub const MAX_ARGS: usize = 64;

/// Longest statement text a connection will accept, in bytes.
pub const MAX_STATEMENT_LENGTH: usize = 8191;

/// Size of one buffered temp-file page and of one heap block.
pub const BLOCK_SIZE: usize = 8192;

/// How many heap tuples fit on one block of the in-process heap.
pub const TUPLES_PER_BLOCK: usize = 64;

/// How many item pointers a delegated-scan producer batches before
/// handing them over to the consumer.
pub static TRANSFER_MAX: Lazy<usize> = lazy_env_parse!("LOOM_TRANSFER_MAX", usize, 1024);

/// Working memory for the build side of a hash join, in kilobytes.
/// The planner's `nbatch` choice spills everything beyond this.
pub static SORT_MEM: Lazy<usize> = lazy_env_parse!("LOOM_SORT_MEM", usize, 512);

/// Upper bound on temp files a single executor may hold open. Hash join
/// keeps `3 * nbatch` below this.
pub static MAX_PRIVATE_FILES: Lazy<usize> = lazy_env_parse!("LOOM_MAX_PRIVATE_FILES", usize, 48);

/// Target number of tuples per physical hash bucket.
pub const NTUP_PER_BUCKET: usize = 10;

/// Planner row estimates are inflated by this factor when sizing hash
/// tables, to keep bucket chains short when the estimate is low.
pub const FUDGE_FAC: f64 = 2.0;

/// Largest blob value stored inline in a tuple; indirect blobs stream out
/// in chunks of five times this size.
pub const MAX_INLINE_BLOB: usize = 8 * 1024;

/// How many in-memory tuples the sort node holds before spilling a run.
pub static SORT_SPILL_THRESHOLD: Lazy<usize> =
	lazy_env_parse!("LOOM_SORT_SPILL_THRESHOLD", usize, 10_000);
