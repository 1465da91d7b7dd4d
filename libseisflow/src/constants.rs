/// Group holding all waveform datasets in a data file
pub const WAVEFORMS_GROUP: &str = "Waveforms";
/// Attribute names of a waveform dataset
pub const STARTTIME_ATTR: &str = "starttime";
pub const SAMPLING_RATE_ATTR: &str = "sampling_rate";
/// Separator between the parts of data file names and dataset names
pub const NAME_SEPARATOR: &str = "__";
/// Extension of waveform data files
pub const DATA_FILE_EXTENSION: &str = "h5";
/// Extension of persisted index caches
pub const CACHE_FILE_EXTENSION: &str = "idx";

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Relative tolerance on the duration of the individual data files
pub const DURATION_TOLERANCE: f64 = 0.01;
/// Fraction of the mean file duration that may be missing before a new time range starts
pub const GAP_TOLERANCE: f64 = 0.01;

/// Upper bound on simultaneously open data files
pub const MAX_OPEN_FILES: usize = 20;

/// Bytes hashed per read when computing file hashes
pub const HASH_CHUNK_SIZE: usize = 65536;

/// Gauss-Newton stopping criteria
pub const MAX_LOCATOR_ITERATIONS: usize = 100;
pub const LOCATOR_STEP_TOLERANCE: f64 = 1e-5;
/// Offset of the initial source guess from the earliest receiver (meters)
pub const INITIAL_GUESS_OFFSET: f64 = 0.1;
pub const MIN_PICKS_FOR_LOCATION: usize = 3;
