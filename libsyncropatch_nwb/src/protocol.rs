use fxhash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::constants::*;
use super::error::ProtocolError;
use super::trace_file::TraceLayout;
use super::user_metadata::{UserMetadata, STIMULUS_SECTION};
use super::well::WellID;

// The json header written by the instrument for every protocol folder. Only the
// fields used by the conversion are modeled; everything else is ignored by serde.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatasetIdentifier {
    pub data_name: String,
    #[serde(rename = "PatchPlateID")]
    pub patch_plate_id: Value,
    pub patch_plate_in_time: String,
    #[serde(rename = "InstrumentID")]
    pub instrument_id: Value,
    #[serde(rename = "UserID")]
    pub user_id: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExperimentConditions {
    pub patch_plate_resistance: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CellTable {
    pub table_data: Vec<Vec<Value>>,
    pub nof_cell_rows: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CellState {
    pub cell_layout: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MeasurementLayout {
    pub nof_sweeps: usize,
    pub leakdata: i64,
    pub nof_samples: usize,
    #[serde(rename = "nCols")]
    pub n_cols: usize,
    pub cols_measured: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileInformation {
    pub file_list: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimeScaling {
    /// Current scaling factor of every well, indexed [column * 16 + row]
    #[serde(rename = "I2DScale")]
    pub i2d_scale: Vec<Option<f64>>,
    #[serde(rename = "TR_Time")]
    pub tr_time: Vec<f64>,
    pub stimulus: Value,
    /// Start time of every sweep, indexed [column][sweep], in seconds
    pub sweep_time: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TraceHeader {
    pub measurement_layout: MeasurementLayout,
    pub file_information: FileInformation,
    #[serde(rename = "TimeScalingIV")]
    pub time_scaling_iv: Option<TimeScaling>,
    pub time_scaling: Option<TimeScaling>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QcEvent {
    pub result: Value,
}

/// QC channels, indexed [sweep][column][row]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct QcData {
    pub capacitance: Vec<Vec<Vec<Option<f64>>>>,
    pub disregarded_sweeps: Vec<Value>,
    #[serde(rename = "RSeal")]
    pub r_seal: Vec<Vec<Vec<Option<f64>>>>,
    pub rseries: Vec<Vec<Vec<Option<f64>>>>,
    #[serde(rename = "QCEvents")]
    pub qc_events: Vec<QcEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompTable {
    pub table_data: Vec<Vec<Value>>,
}

/// State of the compound plate for a range of sweeps. Layouts are indexed [row][column]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompState {
    pub comp_plate_barcode: Value,
    #[serde(rename = "CompType_Enum")]
    pub comp_type: Value,
    #[serde(rename = "Timestamp_s")]
    pub timestamp: f64,
    pub comp_layout: Vec<Vec<i64>>,
    pub concentration: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompoundAddition {
    #[serde(rename = "Sweep2CompIndex")]
    pub sweep_to_comp_index: Vec<usize>,
    pub comp_state_prot: Vec<CompState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ProtocolHeader {
    pub dataset_identifier: DatasetIdentifier,
    pub experiment_conditions: ExperimentConditions,
    pub cell_table: CellTable,
    pub cell_state: CellState,
    pub trace_header: TraceHeader,
    #[serde(rename = "QCData")]
    pub qc_data: QcData,
    pub comp_table: CompTable,
    pub compound_addition: CompoundAddition,
}

impl ProtocolHeader {
    /// Read the first json header found in a protocol folder
    pub fn read(protocol_dir: &Path) -> Result<Self, ProtocolError> {
        let path = find_header(protocol_dir)?;
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// The time scaling block; newer exports call it TimeScalingIV
    pub fn time_scaling(&self) -> Result<&TimeScaling, ProtocolError> {
        self.trace_header
            .time_scaling_iv
            .as_ref()
            .or(self.trace_header.time_scaling.as_ref())
            .ok_or(ProtocolError::NoTimeScaling)
    }
}

/// Find the json header of a protocol folder
pub fn find_header(protocol_dir: &Path) -> Result<PathBuf, ProtocolError> {
    let mut headers: Vec<PathBuf> = Vec::new();
    for item in protocol_dir.read_dir()? {
        let item_path = item?.path();
        if item_path.extension().is_some_and(|ext| ext == "json") {
            headers.push(item_path);
        }
    }
    headers.sort();
    headers
        .into_iter()
        .next()
        .ok_or(ProtocolError::NoHeader(protocol_dir.to_path_buf()))
}

/// The protocol name of a folder is its name without the trailing _<index>
pub fn protocol_name(protocol_dir: &Path) -> Result<String, ProtocolError> {
    let folder = protocol_dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or(ProtocolError::BadFolderName(protocol_dir.to_path_buf()))?;
    match folder.rsplit_once('_') {
        Some((name, _)) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(ProtocolError::BadFolderName(protocol_dir.to_path_buf())),
    }
}

/// Identity of the stimulus applied by a protocol, as declared in the user metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulusInfo {
    pub stim_type: String,
    pub stim_id: i64,
    pub n_sweeps: usize,
}

impl StimulusInfo {
    pub fn is_drugs(&self) -> bool {
        self.stim_type == DRUGS_STIMULUS
    }
}

impl FromStr for StimulusInfo {
    type Err = ProtocolError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entries: Vec<&str> = s.split(',').map(|e| e.trim()).collect();
        if entries.len() < 3 || entries[0].is_empty() {
            return Err(ProtocolError::BadStimulusInfo(s.to_string()));
        }
        let stim_id = entries[1]
            .parse()
            .map_err(|_| ProtocolError::BadStimulusInfo(s.to_string()))?;
        let n_sweeps = entries[2]
            .parse()
            .ok()
            .filter(|n: &usize| *n > 0)
            .ok_or(ProtocolError::BadStimulusInfo(s.to_string()))?;
        Ok(Self {
            stim_type: entries[0].to_string(),
            stim_id,
            n_sweeps,
        })
    }
}

/// The [Stimulus] section of the user metadata, keyed by protocol name
#[derive(Debug, Clone, Default)]
pub struct StimulusTable {
    table: FxHashMap<String, String>,
}

impl StimulusTable {
    pub fn new(user_metadata: &UserMetadata) -> Self {
        let mut table = FxHashMap::default();
        if let Ok(section) = user_metadata.section(STIMULUS_SECTION) {
            for key in section.keys() {
                if let Some(value) = section.get(key) {
                    table.insert(key.clone(), value.to_string());
                }
            }
        }
        Self { table }
    }

    /// Stimulus of a protocol. Protocol names are matched case insensitively
    pub fn lookup(&self, protocol_name: &str) -> Result<StimulusInfo, ProtocolError> {
        self.table
            .get(&protocol_name.to_lowercase())
            .ok_or(ProtocolError::StimulusNotFound(protocol_name.to_string()))?
            .parse()
    }
}

/// A sweep window [start, end) of one repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QcWindow {
    pub start: usize,
    pub end: usize,
}

impl QcWindow {
    /// Window of repetition `rep` (one based).
    ///
    /// Non positive repetitions are coerced to the first window. The end is clipped to
    /// the number of measured sweeps, so the last repetition may be shorter.
    pub fn new(rep: i64, n_sweeps: usize, n_measured_sweeps: usize) -> Self {
        let rep_index = (rep - 1).max(0) as usize;
        let start = (rep_index * n_sweeps).min(n_measured_sweeps);
        let end = (start + n_sweeps).min(n_measured_sweeps);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// QC channels of one cell over one repetition window, in analysis units
#[derive(Debug, Clone, Default)]
pub struct CellQc {
    pub capacitance: Vec<f64>,
    pub seal: Vec<f64>,
    pub r_series: Vec<f64>,
    pub trace_times: Vec<f64>,
    pub v_offset: f64,
    pub disregarded: Vec<bool>,
}

/// Everything the conversion needs to know about one protocol
#[derive(Debug, Clone)]
pub struct ProtocolMetadata {
    pub folder: PathBuf,
    pub name: String,
    pub stimulus: StimulusInfo,
    pub n_measured_sweeps: usize,
    pub n_samples: usize,
    pub n_cols: usize,
    pub leak_subtraction: bool,
    /// Current scaling factor of every well, zero for wells of unmeasured columns
    pub scales: Vec<f64>,
    pub recorded_wells: Vec<usize>,
    /// Sample times in microseconds
    pub time_axis: Vec<f64>,
    pub header: ProtocolHeader,
}

impl ProtocolMetadata {
    /// Parse the header of a protocol folder
    pub fn read(protocol_dir: &Path, stimuli: &StimulusTable) -> Result<Self, ProtocolError> {
        let header = ProtocolHeader::read(protocol_dir)?;
        Self::from_header(protocol_dir, header, stimuli)
    }

    pub fn from_header(
        protocol_dir: &Path,
        header: ProtocolHeader,
        stimuli: &StimulusTable,
    ) -> Result<Self, ProtocolError> {
        let name = protocol_name(protocol_dir)?;
        let stimulus = stimuli.lookup(&name)?;
        let layout = &header.trace_header.measurement_layout;
        let n_measured_sweeps = layout.nof_sweeps;
        let n_samples = layout.nof_samples;
        let n_cols = layout.n_cols;
        let leak_subtraction = layout.leakdata == LEAK_MODE_FLAG;
        let scaling = header.time_scaling()?;

        let cols_measured = &layout.cols_measured;
        if scaling.i2d_scale.len() > N_ROWS * cols_measured.len() {
            return Err(ProtocolError::BadHeaderShape {
                field: "I2DScale",
                found: scaling.i2d_scale.len(),
                expected: N_ROWS * cols_measured.len(),
            });
        }
        let mut scales = Vec::with_capacity(scaling.i2d_scale.len());
        let mut recorded_wells = Vec::new();
        for (well, scale) in scaling.i2d_scale.iter().enumerate() {
            if cols_measured[well / N_ROWS] < 0 {
                scales.push(0.0);
                continue;
            }
            let scale = scale.unwrap_or_else(|| {
                log::warn!(
                    "Protocol {} has no I2DScale for well {}, its traces are NaN",
                    name,
                    WellID::new(well)
                );
                f64::NAN
            });
            scales.push(scale);
            recorded_wells.push(well);
        }

        let time_axis: Vec<f64> = scaling
            .tr_time
            .iter()
            .map(|t| t * TIME_AXIS_SCALE)
            .collect();

        Ok(Self {
            folder: protocol_dir.to_path_buf(),
            name,
            stimulus,
            n_measured_sweeps,
            n_samples,
            n_cols,
            leak_subtraction,
            scales,
            recorded_wells,
            time_axis,
            header,
        })
    }

    pub fn stim_type(&self) -> &str {
        &self.stimulus.stim_type
    }

    /// Sweeps per repetition. Drugs protocols have a single repetition of every sweep
    pub fn sweeps_per_repetition(&self) -> usize {
        if self.stimulus.is_drugs() {
            self.n_measured_sweeps
        } else {
            self.stimulus.n_sweeps
        }
    }

    pub fn n_repetitions(&self) -> usize {
        if self.stimulus.is_drugs() {
            1
        } else {
            self.n_measured_sweeps.div_ceil(self.stimulus.n_sweeps)
        }
    }

    /// Window of repetition `rep` (one based)
    pub fn qc_window(&self, rep: i64) -> QcWindow {
        QcWindow::new(rep, self.sweeps_per_repetition(), self.n_measured_sweeps)
    }

    /// Spacing of the time axis in microseconds
    pub fn x_interval(&self) -> i64 {
        match (self.time_axis.first(), self.time_axis.get(1)) {
            (Some(first), Some(second)) => (second - first) as i64,
            _ => 0,
        }
    }

    pub fn trace_layout(&self) -> TraceLayout {
        TraceLayout {
            n_samples: self.n_samples,
            leak_subtraction: self.leak_subtraction,
            scales: self.scales.clone(),
            recorded_wells: self.recorded_wells.clone(),
        }
    }

    pub fn trace_files(&self) -> &[String] {
        &self.header.trace_header.file_information.file_list
    }

    /// Extract the QC channels of one well over a repetition window.
    ///
    /// Entries missing from the header are NaN (and not disregarded); they are
    /// reported once per window.
    pub fn cell_qc(&self, well: &WellID, window: &QcWindow) -> CellQc {
        let qc = &self.header.qc_data;
        let (col, row) = (well.col, well.row);
        let mut missing = 0;
        let mut qc_value = |data: &Vec<Vec<Vec<Option<f64>>>>, sweep: usize, scale: f64| {
            match data
                .get(sweep)
                .and_then(|s| s.get(col))
                .and_then(|c| c.get(row))
                .copied()
                .flatten()
            {
                Some(v) => v * scale,
                None => {
                    missing += 1;
                    f64::NAN
                }
            }
        };

        let mut cell_qc = CellQc::default();
        for sweep in window.start..window.end {
            cell_qc
                .capacitance
                .push(qc_value(&qc.capacitance, sweep, CAPACITANCE_SCALE));
            cell_qc
                .seal
                .push(qc_value(&qc.r_seal, sweep, RESISTANCE_SCALE));
            cell_qc
                .r_series
                .push(qc_value(&qc.rseries, sweep, RESISTANCE_SCALE));
        }

        let sweep_time = self
            .header
            .time_scaling()
            .ok()
            .and_then(|scaling| scaling.sweep_time.get(col));
        for sweep in window.start..window.end {
            match sweep_time.and_then(|times| times.get(sweep)).copied().flatten() {
                Some(t) => cell_qc.trace_times.push(t * SWEEP_TIME_SCALE),
                None => {
                    missing += 1;
                    cell_qc.trace_times.push(f64::NAN);
                }
            }
            let disregarded = match qc.disregarded_sweeps.get(sweep) {
                Some(Value::Bool(b)) => *b,
                Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
                _ => false,
            };
            cell_qc.disregarded.push(disregarded);
        }

        // The offset is measured by the second QC event, once per cell
        cell_qc.v_offset = match qc
            .qc_events
            .get(1)
            .and_then(|event| event.result.get(col))
            .and_then(|c| c.get(row))
            .and_then(Value::as_f64)
        {
            Some(v) => v * V_OFFSET_SCALE + V_OFFSET_SHIFT,
            None => {
                missing += 1;
                f64::NAN
            }
        };

        if missing > 0 {
            log::warn!(
                "Protocol {}: {} QC entries missing for well {} in sweeps {}..{}; stored as NaN",
                self.name,
                missing,
                well,
                window.start,
                window.end
            );
        }
        cell_qc
    }
}

/// Render a json scalar the way it reads in the header: strings bare, null as None
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::from("None"),
        other => other.to_string(),
    }
}
