use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, Error)]
pub enum WellError {
    #[error("Invalid row {0} for a well; chips have 16 rows")]
    BadRow(usize),
    #[error("Could not parse well label {0:?}")]
    BadLabel(String),
}

#[derive(Debug, Error)]
pub enum TraceFileError {
    #[error("Could not open trace file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Trace file {path:?} has {len} bytes, which is not a multiple of the {block} byte sweep block")]
    BadFileLength { path: PathBuf, len: u64, block: u64 },
    #[error("Trace layout is invalid: {0}")]
    BadLayout(String),
    #[error("Trace file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Protocol folder {0:?} does not contain a json header")]
    NoHeader(PathBuf),
    #[error("Protocol folder name {0:?} does not follow the <name>_<index> format")]
    BadFolderName(PathBuf),
    #[error("No stimulus entry for protocol {0} in the [Stimulus] section")]
    StimulusNotFound(String),
    #[error("Could not parse stimulus info {0:?}; expected <type>,<id>,<sweeps>")]
    BadStimulusInfo(String),
    #[error("Protocol header has {found} entries for {field}, expected {expected}")]
    BadHeaderShape {
        field: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("Protocol header is missing time scaling information")]
    NoTimeScaling,
    #[error("Protocol failed to parse json header: {0}")]
    ParsingError(#[from] serde_json::Error),
    #[error("Protocol failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CompoundError {
    #[error("Sweep {sweep} not found in the compound table of protocol {data_name}")]
    SweepNotFound { sweep: usize, data_name: String },
    #[error("Compound state {index} referenced by sweep {sweep} does not exist in protocol {data_name}")]
    StateNotFound {
        index: usize,
        sweep: usize,
        data_name: String,
    },
    #[error("Well {0} is outside of the compound layout")]
    WellOutOfLayout(String),
    #[error("Compound index {0} is outside of the compound table")]
    CompoundOutOfTable(i64),
    #[error("Could not parse compound concentration {0:?}")]
    BadConcentration(String),
}

#[derive(Debug, Error)]
pub enum UserMetadataError {
    #[error("User metadata {0:?} not found for this experiment")]
    MissingFile(PathBuf),
    #[error("User metadata has no section [{0}]")]
    MissingSection(String),
    #[error("User metadata section [{section}] has no key {key}")]
    MissingKey { section: String, key: String },
    #[error("User metadata line {0} is neither a section, a key nor a comment")]
    BadLine(usize),
    #[error("Could not parse chip column range {0:?}; expected <min>-<max>")]
    BadColumnRange(String),
    #[error("No cell line section covers chip column {0}")]
    CellLineNotFound(usize),
    #[error("User metadata failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("User metadata failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Experiment folder {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Experiment folder {0:?} has no EBoardCheck system protocol")]
    NoSystemProtocol(PathBuf),
    #[error("Stimulus type {0} is used by more than one protocol")]
    DuplicateStimulus(String),
    #[error("Experiment failed due to protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),
    #[error("Experiment failed due to compound error: {0}")]
    CompoundError(#[from] CompoundError),
    #[error("Experiment failed due to user metadata error: {0}")]
    UserMetadataError(#[from] UserMetadataError),
    #[error("Experiment failed to format a date: {0}")]
    FormatError(#[from] time::error::Format),
    #[error("Experiment failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RCellError {
    #[error("RCell failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("RCell failed to encode a string: {0}")]
    StringError(#[from] hdf5::types::StringError),
    #[error("RCell failed to convert metadata: {0}")]
    MetadataError(#[from] serde_json::Error),
    #[error("RCell has an unsupported metadata leaf at {0}")]
    UnsupportedLeaf(String),
    #[error("RCell has an unknown status {0:?}")]
    BadStatus(String),
    #[error("RCell has an invalid data reference {0:?}")]
    BadDataRef(String),
    #[error("RCell is missing member {0}")]
    MissingMember(String),
    #[error("RCell failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Container {path:?} is missing {what}")]
    Missing { path: PathBuf, what: String },
    #[error("Container {path:?} is inconsistent: {reason}")]
    Inconsistent { path: PathBuf, reason: String },
    #[error("Validation failed to reload container: {0}")]
    RCellError(#[from] RCellError),
}

#[derive(Debug, Error)]
pub enum ProtocolDataError {
    #[error("Sweep {sweep} is beyond the {capacity} sweeps expected by protocol {protocol}")]
    SweepOutOfRange {
        sweep: usize,
        capacity: usize,
        protocol: String,
    },
    #[error("Well {0} of the container is not recorded by protocol {1}")]
    WellNotRecorded(String, String),
    #[error("Protocol data failed due to trace file error: {0}")]
    TraceFileError(#[from] TraceFileError),
    #[error("Protocol data failed due to compound error: {0}")]
    CompoundError(#[from] CompoundError),
    #[error("Protocol data failed due to RCell error: {0}")]
    RCellError(#[from] RCellError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Experiment name {0:?} does not start with a two digit year")]
    BadExperimentName(String),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Conversion failed due to experiment error: {0}")]
    ExperimentError(#[from] ExperimentError),
    #[error("Conversion failed due to protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),
    #[error("Conversion of protocol {protocol} failed: {source}")]
    ProtocolDataError {
        protocol: String,
        #[source]
        source: ProtocolDataError,
    },
    #[error("Conversion failed due to RCell error: {0}")]
    RCellError(#[from] RCellError),
    #[error("Conversion failed due to validation error: {0}")]
    ValidationError(#[from] ValidationError),
    #[error("Conversion failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Conversion failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
