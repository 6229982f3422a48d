/// Wells per chip column. Rows are lettered A..P.
pub const N_ROWS: usize = 16;

/// Folder prefixes written by the instrument itself rather than by a user protocol
pub const SYSTEM_PROTOCOLS: [&str; 4] = ["EBoardCheck", "Auxiliary_Data", "QC_Data", "FillChip"];
/// The system protocol carrying the experiment-wide header
pub const SYSTEM_HEADER_PROTOCOL: &str = "EBoardCheck";

/// Stimulus type whose single repetition spans every measured sweep
pub const DRUGS_STIMULUS: &str = "Drugs";

/// Name given to a compound event with no compound name (extracellular wash)
pub const WASH_MARKER: &str = "?EC?";

/// Prefix of the binary trace file names listed in the protocol header
pub const TRACE_FILE_PREFIX: &str = "Tracedata_";

// Unit conversions of the QC channels. Downstream quality thresholds are expressed
// in these units, so they must not change.
pub const CAPACITANCE_SCALE: f64 = 1e12; // F -> pF
pub const RESISTANCE_SCALE: f64 = 1e-6; // Ohm -> MOhm
pub const TIME_AXIS_SCALE: f64 = 1e6; // s -> us
pub const SWEEP_TIME_SCALE: f64 = 1_000.0;
pub const V_OFFSET_SCALE: f64 = 1_000.0; // V -> mV
pub const V_OFFSET_SHIFT: f64 = 9.0;

/// Multiplier of the block size when leak traces are interleaved with the signal
pub const LEAK_DATA_FACTOR: usize = 2;

/// Value of `Leakdata` in the header marking leak-subtraction mode
pub const LEAK_MODE_FLAG: i64 = 2;

// Fixed descriptors of the stimulus presentation group
pub const STIMULUS_SWEEP_INTERVAL: i64 = 5;
pub const STIMULUS_KIND: &str = "Pulse";

/// This is the version of the output format
pub const FORMAT_VERSION: &str = "1.0";

pub const NWB_EXTENSION: &str = "nwb";

// Producer identity written into every container
pub const LAB: &str = "Blue Brain Project";
pub const INSTITUTION: &str = "École Polytechnique fédérale de Lausanne (EPFL), Switzerland";
pub const PROJECT_NAME: &str = "Channelome";
pub const PROJECT_ID: &str = "P0015";
pub const TRYPSINIZATION_TIME: i64 = 60;
pub const DOXYCYCLINE_CONCENTRATION: &str = "1ug/ml";
pub const NO_QUALITY_NOTES: &str = "No record";

// Experimenter written when the ini file names none
pub const DEFAULT_EXPERIMENTER: &str = "Rajnish Ranjan";
pub const DEFAULT_USER_EMAIL: &str = "ranjan.rajnish@epfl.ch";
pub const DEFAULT_USER_INITIALS: &str = "RR";
