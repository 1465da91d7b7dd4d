use std::path::PathBuf;
use thiserror::Error;

use super::event::Phase;
use super::timestamp::Timestamp;
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("Could not parse timestamp: {0}")]
    Parse(#[from] time::error::Parse),
    #[error("Timestamp out of range: {0}")]
    Range(#[from] time::error::ComponentRange),
}

#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("Index sampling rate must be nonzero")]
    ZeroRate,
    #[error("Index sampling rate {0} Hz does not give an integer number of nanoseconds per bin")]
    NonIntegerInterval(u32),
    #[error("Invalid data sampling rate {0} Hz")]
    BadSamplingRate(f64),
    #[error("Cannot index an empty trace")]
    EmptyTrace,
}

#[derive(Debug, Error)]
pub enum DataFileError {
    #[error("Data file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("File name {0} does not follow the <start>__<end>__<suffix> convention")]
    BadFileName(String),
    #[error("DataFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("DataFile failed due to timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

#[derive(Debug, Error)]
pub enum WaveformFileError {
    #[error("Could not open waveform file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Channel {0} not found in waveform file {1:?}")]
    MissingChannel(String, PathBuf),
    #[error("Channel {0} is stored {1} times in one waveform file")]
    AmbiguousChannel(String, usize),
    #[error("Invalid waveform file attribute: {0}")]
    BadAttribute(String),
    #[error("WaveformFile failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("CacheStore failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Corrupt cache: {0}")]
    Corrupt(String),
    #[error("Stale cache: {0}")]
    Stale(String),
    #[error("Unknown database type in {0:?}: channels disagree on {1}")]
    InconsistentChannels(PathBuf, String),
    #[error("Waveform file {0:?} contains no traces")]
    EmptyFile(PathBuf),
    #[error("No file indices to combine")]
    NoCaches,
    #[error("File indices have different index sampling rates: {0} Hz and {1} Hz")]
    MismatchedIndexRate(u32, u32),
    #[error("File indices have different data sampling rates: {0} Hz and {1} Hz")]
    MismatchedSamplingRate(f64, f64),
    #[error("CacheStore failed due to index error: {0}")]
    Index(#[from] IndexError),
    #[error("CacheStore failed due to data file error: {0}")]
    DataFile(#[from] DataFileError),
    #[error("CacheStore failed due to waveform file error: {0}")]
    WaveformFile(#[from] WaveformFileError),
}

#[derive(Debug, Error)]
pub enum WaveformHandlerError {
    #[error("No waveform files found in {0:?}")]
    NoDataFiles(Vec<PathBuf>),
    #[error("Waveform file {0:?} lasts {1} s but the mean file duration is {2} s")]
    UnequalDurations(PathBuf, f64, f64),
    #[error("Waveform files form {0} separate time ranges; only one is supported")]
    MultipleTimeRanges(usize),
    #[error("Unknown channel {0}")]
    UnknownChannel(String),
    #[error("No data for channel {0} between {1} and {2}")]
    NoData(String, Timestamp, Timestamp),
    #[error("Channel {0} changes sampling rate across files: {1} Hz and {2} Hz")]
    InconsistentSamplingRate(String, f64, f64),
    #[error("Channel {0} has a gap between {1} and {2}")]
    DataGap(String, Timestamp, Timestamp),
    #[error("WaveformHandler failed due to data file error: {0}")]
    DataFile(#[from] DataFileError),
    #[error("WaveformHandler failed due to cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("WaveformHandler failed due to waveform file error: {0}")]
    WaveformFile(#[from] WaveformFileError),
}

#[derive(Debug, Clone, Error)]
pub enum TriggerError {
    #[error("STA/LTA windows must be at least one sample, got {0} and {1}")]
    BadWindow(usize, usize),
    #[error("Threshold list has {0} entries but {1} are needed")]
    ThresholdLength(usize, usize),
}

#[derive(Debug, Error)]
pub enum PickerError {
    #[error("Unknown picking algorithm {0}")]
    UnknownAlgorithm(String),
    #[error("Picker needs one sampling rate for all traces, found {0} Hz and {1} Hz")]
    VaryingSamplingRates(f64, f64),
    #[error("Picker failed to parse its options: {0}")]
    BadOptions(#[from] serde_yaml::Error),
    #[error("Picker failed due to trigger error: {0}")]
    Trigger(#[from] TriggerError),
}

#[derive(Debug, Clone, Error)]
pub enum LocationError {
    #[error("At least 3 picks are needed for a location, got {0}")]
    TooFewPicks(usize),
    #[error("Pick on channel {0} has no phase hint")]
    MissingPhaseHint(String),
    #[error("Picks have several phases but a single velocity was given; give one velocity per phase")]
    ScalarVelocityMultiplePhases,
    #[error("Picks have several phases but a single set of anisotropy parameters was given")]
    ScalarAnisotropyMultiplePhases,
    #[error("No velocity given for phase {0}")]
    MissingVelocity(Phase),
    #[error("Anisotropy parameters are missing for phase {0}")]
    PartialAnisotropy(Phase),
    #[error("Velocities must be positive and finite")]
    BadVelocity,
    #[error("No coordinates for channel {0}")]
    UnknownChannel(String),
    #[error("Normal equations are singular")]
    SingularSystem,
    #[error("Unknown phase {0}")]
    UnknownPhase(String),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("ChannelMap failed to parse a coordinate: {0}")]
    ParsingError(#[from] std::num::ParseFloatError),
    #[error("ChannelMap found a bad line: {0}")]
    BadFileFormat(String),
    #[error("ChannelMap lists channel {0} twice")]
    DuplicateChannel(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("EventStore failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("EventStore failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config requires at least one thread, got {0}")]
    BadThreadCount(usize),
    #[error("Config has an invalid index sampling rate: {0}")]
    Index(#[from] IndexError),
    #[error("Config temporal range starts at {0} but ends at {1}")]
    BadTemporalRange(Timestamp, Timestamp),
    #[error("Config interval length {0} s must be positive and longer than the overlap {1} s")]
    BadInterval(f64, f64),
    #[error("Config trigger windows are invalid: sta {0} s, lta {1} s")]
    BadTriggerWindows(f64, f64),
    #[error("Config has {0} on thresholds but {1} off thresholds")]
    ThresholdLengths(usize, usize),
    #[error("Config trigger channel {0} has no weight")]
    MissingWeight(String),
    #[error("Config has an invalid locator setup: {0}")]
    Location(#[from] LocationError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to WaveformHandler error: {0}")]
    HandlerError(#[from] WaveformHandlerError),
    #[error("Processor failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
    #[error("Processor failed due to trigger error: {0}")]
    TriggerError(#[from] TriggerError),
    #[error("Processor failed due to Picker error: {0}")]
    PickerError(#[from] PickerError),
    #[error("Processor failed due to location error: {0}")]
    LocationError(#[from] LocationError),
    #[error("Processor failed due to EventStore error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
