use hdf5::types::VarLenUnicode;
use hdf5::{File, Group, H5Type};
use ndarray::{arr0, Array2};
use serde_json::Value;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::cell_record::CellRecord;
use super::constants::FORMAT_VERSION;
use super::error::RCellError;

pub const GENERAL_NAME: &str = "general";
pub const ACQUISITION_NAME: &str = "acquisition";
pub const TIMESERIES_NAME: &str = "timeseries";
pub const IMAGES_NAME: &str = "images";
pub const REPETITIONS_NAME: &str = "repetitions";
pub const ANALYSIS_NAME: &str = "analysis";
pub const PHARMACOLOGY_NAME: &str = "pharmacology";
pub const STIMULUS_NAME: &str = "stimulus";
pub const PRESENTATION_NAME: &str = "presentation";
pub const COMP_LIST_NAME: &str = "compList";
pub const AMP_NAME: &str = "amp";
pub const SWEEP_COUNT_NAME: &str = "sweep_count";
pub const REPETITION_PREFIX: &str = "repetition";
pub const GROUP_PREFIX: &str = "Group";
pub const STATUS_ATTR: &str = "status";
pub const VERSION_ATTR: &str = "version";

// Structure
// / - version, status
// |---- identifier, file_create_date, data_release, session_description(dset)
// |---- general
// |    |---- lab, institution, cell_id, ...(dset)
// |    |---- experiment, experimenter, cell_info, channel_info, code_info, nanion
// |---- acquisition
// |    |---- images
// |    |---- timeseries
// |    |    |---- <stim>
// |    |    |    |---- repetitions
// |    |    |    |    |---- repetition#
// |    |    |    |    |    |---- capacitance_slow, seal, r_series, time, ...(dset)
// |    |    |    |    |    |---- amp
// |---- analysis
// |    |---- pharmacology
// |    |    |---- compList(dset)
// |    |    |---- <stim>
// |    |    |    |---- compList(dset)
// |    |    |    |---- Group#
// |    |    |    |    |---- comp_name, comp_conc, comp_time, data_ref, trace_ids, ...(dset)
// |---- stimulus
// |    |---- presentation
// |    |    |---- <stim>
// |    |    |    |---- command, stim_id, sweep_count, sweep_interval, type(dset)

/// Lifecycle of a container, stored in the root status attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// No container at the expected path
    Missing,
    /// Metadata skeleton written
    Created,
    /// Every protocol written, not validated
    Filled,
    Validated,
}

impl ContainerState {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Validated)
    }
}

impl Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing"),
            Self::Created => write!(f, "created"),
            Self::Filled => write!(f, "protocol_filled"),
            Self::Validated => write!(f, "validated"),
        }
    }
}

impl FromStr for ContainerState {
    type Err = RCellError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "protocol_filled" => Ok(Self::Filled),
            "validated" => Ok(Self::Validated),
            _ => Err(RCellError::BadStatus(s.to_string())),
        }
    }
}

/// Reference of a pharmacology group to the repetition holding its traces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRef {
    pub stim_type: String,
    /// One based
    pub repetition: usize,
}

impl DataRef {
    pub fn new(stim_type: &str, repetition: usize) -> Self {
        Self {
            stim_type: stim_type.to_string(),
            repetition,
        }
    }

    /// Absolute path of the referenced repetition group
    pub fn path(&self) -> String {
        format!(
            "/{ACQUISITION_NAME}/{TIMESERIES_NAME}/{}/{REPETITIONS_NAME}/{}",
            self.stim_type,
            repetition_name(self.repetition)
        )
    }
}

impl FromStr for DataRef {
    type Err = RCellError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.trim_start_matches('/').split('/').collect();
        match tokens.as_slice() {
            [ACQUISITION_NAME, TIMESERIES_NAME, stim_type, REPETITIONS_NAME, repetition] => {
                let repetition = parse_indexed(repetition, REPETITION_PREFIX)
                    .ok_or(RCellError::BadDataRef(s.to_string()))?;
                Ok(Self::new(stim_type, repetition))
            }
            _ => Err(RCellError::BadDataRef(s.to_string())),
        }
    }
}

/// The traces and QC channels of one repetition of a protocol
#[derive(Debug, Clone, PartialEq)]
pub struct Repetition {
    pub capacitance_slow: Vec<f64>,
    pub seal: Vec<f64>,
    pub r_series: Vec<f64>,
    /// Sample times, us
    pub time: Vec<u32>,
    pub x_start: Vec<u32>,
    pub x_interval: i64,
    pub v_offset: f64,
    /// Sweep start times, ms. NaN where the instrument gave none
    pub trace_times: Vec<f64>,
    pub head_temp: f64,
    /// [sweeps, 1]
    pub n_points: Array2<u64>,
    /// [samples, sweeps]
    pub data: Array2<f64>,
}

impl Repetition {
    pub fn n_sweeps(&self) -> usize {
        self.trace_times.len()
    }
}

/// The sweeps of a repetition during which one compound was applied
#[derive(Debug, Clone, PartialEq)]
pub struct PharmacologyGroup {
    pub comp_name: String,
    pub comp_conc: f64,
    pub comp_time: f64,
    pub data_ref: DataRef,
    pub trace_ids: Vec<u64>,
    pub trace_times: Vec<f64>,
    /// Disregard flag of each selected sweep, stored as `trace_valid`
    pub trace_disregarded: Vec<bool>,
}

/// analysis/pharmacology/<stim>
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pharmacology {
    pub comp_list: Vec<String>,
    /// Group1, Group2, ... in order
    pub groups: Vec<PharmacologyGroup>,
}

pub fn repetition_name(repetition: usize) -> String {
    format!("{REPETITION_PREFIX}{repetition}")
}

pub fn group_name(group: usize) -> String {
    format!("{GROUP_PREFIX}{group}")
}

/// Index of a member named <prefix><index>
pub fn parse_indexed(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix).and_then(|i| i.parse().ok())
}

/// Get a subgroup, creating it if needed
pub fn require_group(parent: &Group, name: &str) -> Result<Group, RCellError> {
    match parent.group(name) {
        Ok(group) => Ok(group),
        Err(_) => Ok(parent.create_group(name)?),
    }
}

fn write_scalar<T: H5Type>(group: &Group, name: &str, value: T) -> Result<(), RCellError> {
    group
        .new_dataset_builder()
        .with_data(&arr0(value))
        .create(name)?;
    Ok(())
}

fn write_string(group: &Group, name: &str, value: &str) -> Result<(), RCellError> {
    write_scalar(group, name, VarLenUnicode::from_str(value)?)
}

fn write_array<T: H5Type>(group: &Group, name: &str, values: &[T]) -> Result<(), RCellError> {
    group.new_dataset_builder().with_data(values).create(name)?;
    Ok(())
}

fn write_strings(group: &Group, name: &str, values: &[String]) -> Result<(), RCellError> {
    let encoded = values
        .iter()
        .map(|v| VarLenUnicode::from_str(v))
        .collect::<Result<Vec<_>, _>>()?;
    write_array(group, name, &encoded)
}

/// Write a metadata tree: objects become groups, everything else a scalar dataset.
///
/// Nulls are stored as NaN so optional numbers survive a round trip.
pub fn write_tree(group: &Group, tree: &Value, location: &str) -> Result<(), RCellError> {
    let Value::Object(members) = tree else {
        return Err(RCellError::UnsupportedLeaf(location.to_string()));
    };
    for (name, value) in members.iter() {
        let path = format!("{location}/{name}");
        match value {
            Value::Object(_) => write_tree(&require_group(group, name)?, value, &path)?,
            Value::String(s) => write_string(group, name, s)?,
            Value::Bool(b) => write_scalar(group, name, *b)?,
            Value::Null => write_scalar(group, name, f64::NAN)?,
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    write_scalar(group, name, i)?
                } else if let Some(u) = n.as_u64() {
                    write_scalar(group, name, u)?
                } else {
                    write_scalar(group, name, n.as_f64().unwrap_or(f64::NAN))?
                }
            }
            Value::Array(items) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(String::from))
                    .collect();
                match strings {
                    Some(strings) => write_strings(group, name, &strings)?,
                    None => return Err(RCellError::UnsupportedLeaf(path)),
                }
            }
        }
    }
    Ok(())
}

/// A simple struct which wraps around the hdf5-rust library.
///
/// Owns one rCell container. Containers are written in three passes: the metadata
/// skeleton at creation, then every protocol, then the status stamps.
#[derive(Debug)]
pub struct RCellWriter {
    file_handle: File,
    path: PathBuf,
}

impl RCellWriter {
    /// Create the container of a cell, replacing any file at path, and write its skeleton
    pub fn create(path: &Path, record: &CellRecord) -> Result<Self, RCellError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_handle = File::create(path)?;

        let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
        file_handle
            .new_attr::<VarLenUnicode>()
            .create(VERSION_ATTR)?
            .write_scalar(&VarLenUnicode::from_str(&version)?)?;
        file_handle
            .new_attr::<VarLenUnicode>()
            .create(STATUS_ATTR)?
            .write_scalar(&VarLenUnicode::from_str(
                &ContainerState::Created.to_string(),
            )?)?;

        write_string(&file_handle, "identifier", &record.identifier)?;
        write_string(&file_handle, "file_create_date", &record.file_create_date)?;
        write_string(&file_handle, "data_release", &record.data_release)?;
        write_string(
            &file_handle,
            "session_description",
            &record.session_description,
        )?;

        let general = file_handle.create_group(GENERAL_NAME)?;
        write_tree(
            &general,
            &serde_json::to_value(&record.general)?,
            GENERAL_NAME,
        )?;

        let acquisition = file_handle.create_group(ACQUISITION_NAME)?;
        acquisition.create_group(TIMESERIES_NAME)?;
        acquisition.create_group(IMAGES_NAME)?;

        let pharmacology = file_handle
            .create_group(ANALYSIS_NAME)?
            .create_group(PHARMACOLOGY_NAME)?;
        write_strings(&pharmacology, COMP_LIST_NAME, &record.comp_list)?;

        let presentation = file_handle
            .create_group(STIMULUS_NAME)?
            .create_group(PRESENTATION_NAME)?;
        for (stim_type, stimulus) in record.stimulus.iter() {
            let location = format!("{STIMULUS_NAME}/{PRESENTATION_NAME}/{stim_type}");
            write_tree(
                &presentation.create_group(stim_type)?,
                &serde_json::to_value(stimulus)?,
                &location,
            )?;
        }

        Ok(Self {
            file_handle,
            path: path.to_path_buf(),
        })
    }

    /// Reopen an existing container for writing
    pub fn open(path: &Path) -> Result<Self, RCellError> {
        Ok(Self {
            file_handle: File::open_rw(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    /// Write acquisition/timeseries/<stim>/repetitions/repetition<index>
    pub fn write_repetition(
        &self,
        stim_type: &str,
        index: usize,
        repetition: &Repetition,
    ) -> Result<(), RCellError> {
        let timeseries = self
            .file_handle
            .group(&format!("{ACQUISITION_NAME}/{TIMESERIES_NAME}"))?;
        let repetitions = require_group(&require_group(&timeseries, stim_type)?, REPETITIONS_NAME)?;
        let group = repetitions.create_group(&repetition_name(index))?;

        write_array(&group, "capacitance_slow", &repetition.capacitance_slow)?;
        write_array(&group, "seal", &repetition.seal)?;
        write_array(&group, "r_series", &repetition.r_series)?;
        write_array(&group, "time", &repetition.time)?;
        write_array(&group, "x_start", &repetition.x_start)?;
        write_scalar(&group, "x_interval", repetition.x_interval)?;
        write_scalar(&group, "v_offset", repetition.v_offset)?;
        write_array(&group, "trace_times", &repetition.trace_times)?;
        write_scalar(&group, "head_temp", repetition.head_temp)?;
        group
            .new_dataset_builder()
            .with_data(&repetition.n_points)
            .create("n_points")?;
        group
            .new_dataset_builder()
            .with_data(&repetition.data)
            .create("data")?;
        group.create_group(AMP_NAME)?;
        Ok(())
    }

    /// Write analysis/pharmacology/<stim> and its groups
    pub fn write_pharmacology(
        &self,
        stim_type: &str,
        pharmacology: &Pharmacology,
    ) -> Result<(), RCellError> {
        let parent = self
            .file_handle
            .group(&format!("{ANALYSIS_NAME}/{PHARMACOLOGY_NAME}"))?;
        let protocol = parent.create_group(stim_type)?;
        write_strings(&protocol, COMP_LIST_NAME, &pharmacology.comp_list)?;
        for (index, pharma) in pharmacology.groups.iter().enumerate() {
            let group = protocol.create_group(&group_name(index + 1))?;
            write_string(&group, "comp_name", &pharma.comp_name)?;
            write_scalar(&group, "comp_conc", pharma.comp_conc)?;
            write_scalar(&group, "comp_time", pharma.comp_time)?;
            write_string(&group, "data_ref", &pharma.data_ref.path())?;
            write_array(&group, "trace_ids", &pharma.trace_ids)?;
            write_array(&group, "trace_times", &pharma.trace_times)?;
            write_array(&group, "trace_valid", &pharma.trace_disregarded)?;
        }
        Ok(())
    }

    /// Patch stimulus/presentation/<stim>/sweep_count
    pub fn set_sweep_count(&self, stim_type: &str, sweep_count: i64) -> Result<(), RCellError> {
        self.file_handle
            .dataset(&format!(
                "{STIMULUS_NAME}/{PRESENTATION_NAME}/{stim_type}/{SWEEP_COUNT_NAME}"
            ))?
            .write_scalar(&sweep_count)?;
        Ok(())
    }

    fn set_state(&self, state: ContainerState) -> Result<(), RCellError> {
        self.file_handle
            .attr(STATUS_ATTR)?
            .write_scalar(&VarLenUnicode::from_str(&state.to_string())?)?;
        Ok(())
    }

    /// Every protocol has been written
    pub fn mark_filled(&self) -> Result<(), RCellError> {
        self.set_state(ContainerState::Filled)
    }

    /// The container passed validation
    pub fn mark_validated(&self) -> Result<(), RCellError> {
        self.set_state(ContainerState::Validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_ref_path() {
        let data_ref = DataRef::new("Activation", 2);
        assert_eq!(
            data_ref.path(),
            "/acquisition/timeseries/Activation/repetitions/repetition2"
        );
        assert_eq!(data_ref.path().parse::<DataRef>().unwrap(), data_ref);
        assert!("/acquisition/timeseries/Activation/repetition2"
            .parse::<DataRef>()
            .is_err());
        assert!("/acquisition/timeseries/Activation/repetitions/group2"
            .parse::<DataRef>()
            .is_err());
    }

    #[test]
    fn test_states() {
        for state in [
            ContainerState::Created,
            ContainerState::Filled,
            ContainerState::Validated,
        ] {
            assert_eq!(state.to_string().parse::<ContainerState>().unwrap(), state);
        }
        assert!(ContainerState::Validated.is_complete());
        assert!(!ContainerState::Filled.is_complete());
        assert!("unknown".parse::<ContainerState>().is_err());
    }

    #[test]
    fn test_indexed_names() {
        assert_eq!(parse_indexed(&repetition_name(12), REPETITION_PREFIX), Some(12));
        assert_eq!(parse_indexed(&group_name(3), GROUP_PREFIX), Some(3));
        assert_eq!(parse_indexed("compList", GROUP_PREFIX), None);
    }
}
