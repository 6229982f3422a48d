use hdf5::types::{TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::cell_record::{GeneralInfo, StimulusPresentation};
use super::constants::DRUGS_STIMULUS;
use super::error::{RCellError, ValidationError};
use super::rcell_writer::*;

/// The state of the container at path, Missing when there is no file.
///
/// Files which can not be opened, or have no status, are reported as Created so that
/// they are never mistaken for complete containers.
pub fn container_state(path: &Path) -> ContainerState {
    if !path.exists() {
        return ContainerState::Missing;
    }
    match RCellReader::open(path).and_then(|reader| reader.state()) {
        Ok(state) => state,
        Err(e) => {
            log::warn!(
                "Could not read the status of container {}: {e}",
                path.to_string_lossy()
            );
            ContainerState::Created
        }
    }
}

/// Read back a metadata tree written by write_tree. NaN is read as null.
pub fn read_tree(group: &Group, location: &str) -> Result<Value, RCellError> {
    let mut members = serde_json::Map::new();
    for name in group.member_names()? {
        let path = format!("{location}/{name}");
        let value = match group.group(&name) {
            Ok(child) => read_tree(&child, &path)?,
            Err(_) => read_leaf(&group.dataset(&name)?, &path)?,
        };
        members.insert(name, value);
    }
    Ok(Value::Object(members))
}

fn read_leaf(dataset: &Dataset, path: &str) -> Result<Value, RCellError> {
    let value = match dataset.dtype()?.to_descriptor()? {
        TypeDescriptor::VarLenUnicode if dataset.ndim() == 0 => {
            Value::String(dataset.read_scalar::<VarLenUnicode>()?.to_string())
        }
        TypeDescriptor::VarLenUnicode => Value::Array(
            dataset
                .read_1d::<VarLenUnicode>()?
                .iter()
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        TypeDescriptor::Integer(_) => Value::from(dataset.read_scalar::<i64>()?),
        TypeDescriptor::Unsigned(_) => Value::from(dataset.read_scalar::<u64>()?),
        TypeDescriptor::Float(_) => Value::from(dataset.read_scalar::<f64>()?),
        TypeDescriptor::Boolean => Value::Bool(dataset.read_scalar::<bool>()?),
        _ => return Err(RCellError::UnsupportedLeaf(path.to_string())),
    };
    Ok(value)
}

fn read_string(group: &Group, name: &str) -> Result<String, RCellError> {
    Ok(group
        .dataset(name)?
        .read_scalar::<VarLenUnicode>()?
        .to_string())
}

fn read_strings(group: &Group, name: &str) -> Result<Vec<String>, RCellError> {
    Ok(group
        .dataset(name)?
        .read_1d::<VarLenUnicode>()?
        .iter()
        .map(|s| s.to_string())
        .collect())
}

/// Members named <prefix><index>, in index order. Indices must run from 1 without gaps
fn indexed_members(group: &Group, prefix: &str, location: &str) -> Result<Vec<String>, RCellError> {
    let mut members: BTreeMap<usize, String> = BTreeMap::new();
    for name in group.member_names()? {
        if let Some(index) = parse_indexed(&name, prefix) {
            members.insert(index, name);
        }
    }
    for (position, index) in members.keys().enumerate() {
        if *index != position + 1 {
            return Err(RCellError::MissingMember(format!(
                "{location}/{prefix}{}",
                position + 1
            )));
        }
    }
    Ok(members.into_values().collect())
}

/// Everything stored in one container
#[derive(Debug, Clone)]
pub struct LoadedCell {
    pub path: PathBuf,
    pub version: String,
    pub state: ContainerState,
    pub identifier: String,
    pub file_create_date: String,
    pub data_release: String,
    pub session_description: String,
    pub general: GeneralInfo,
    pub stimulus: BTreeMap<String, StimulusPresentation>,
    pub comp_list: Vec<String>,
    /// Repetitions of every stimulus, keyed by their one based index
    pub repetitions: BTreeMap<String, BTreeMap<usize, Repetition>>,
    pub pharmacology: BTreeMap<String, Pharmacology>,
}

/// Read-only access to an rCell container
#[derive(Debug)]
pub struct RCellReader {
    file_handle: File,
    path: PathBuf,
}

impl RCellReader {
    pub fn open(path: &Path) -> Result<Self, RCellError> {
        Ok(Self {
            file_handle: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    pub fn state(&self) -> Result<ContainerState, RCellError> {
        self.file_handle
            .attr(STATUS_ATTR)?
            .read_scalar::<VarLenUnicode>()?
            .as_str()
            .parse()
    }

    /// Reload every dataset of a container into typed records
    pub fn load(path: &Path) -> Result<LoadedCell, RCellError> {
        let reader = Self::open(path)?;
        let root = &reader.file_handle;

        let general = serde_json::from_value(read_tree(
            &root.group(GENERAL_NAME)?,
            GENERAL_NAME,
        )?)?;

        let mut stimulus = BTreeMap::new();
        let presentation = root.group(&format!("{STIMULUS_NAME}/{PRESENTATION_NAME}"))?;
        for stim_type in presentation.member_names()? {
            let location = format!("{STIMULUS_NAME}/{PRESENTATION_NAME}/{stim_type}");
            let tree = read_tree(&presentation.group(&stim_type)?, &location)?;
            stimulus.insert(stim_type, serde_json::from_value(tree)?);
        }

        let mut repetitions = BTreeMap::new();
        let timeseries = root.group(&format!("{ACQUISITION_NAME}/{TIMESERIES_NAME}"))?;
        for stim_type in timeseries.member_names()? {
            let location =
                format!("{ACQUISITION_NAME}/{TIMESERIES_NAME}/{stim_type}/{REPETITIONS_NAME}");
            let group = timeseries.group(&format!("{stim_type}/{REPETITIONS_NAME}"))?;
            let mut protocol = BTreeMap::new();
            for (index, name) in indexed_members(&group, REPETITION_PREFIX, &location)?
                .iter()
                .enumerate()
            {
                protocol.insert(index + 1, reader.read_repetition(&group.group(name)?)?);
            }
            repetitions.insert(stim_type, protocol);
        }

        let analysis = root.group(&format!("{ANALYSIS_NAME}/{PHARMACOLOGY_NAME}"))?;
        let comp_list = read_strings(&analysis, COMP_LIST_NAME)?;
        let mut pharmacology = BTreeMap::new();
        for stim_type in analysis.member_names()? {
            let Ok(group) = analysis.group(&stim_type) else {
                continue;
            };
            let location = format!("{ANALYSIS_NAME}/{PHARMACOLOGY_NAME}/{stim_type}");
            pharmacology.insert(stim_type, reader.read_pharmacology(&group, &location)?);
        }

        Ok(LoadedCell {
            path: path.to_path_buf(),
            version: root
                .attr(VERSION_ATTR)?
                .read_scalar::<VarLenUnicode>()?
                .to_string(),
            state: reader.state()?,
            identifier: read_string(root, "identifier")?,
            file_create_date: read_string(root, "file_create_date")?,
            data_release: read_string(root, "data_release")?,
            session_description: read_string(root, "session_description")?,
            general,
            stimulus,
            comp_list,
            repetitions,
            pharmacology,
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    fn read_repetition(&self, group: &Group) -> Result<Repetition, RCellError> {
        Ok(Repetition {
            capacitance_slow: group.dataset("capacitance_slow")?.read_raw::<f64>()?,
            seal: group.dataset("seal")?.read_raw::<f64>()?,
            r_series: group.dataset("r_series")?.read_raw::<f64>()?,
            time: group.dataset("time")?.read_raw::<u32>()?,
            x_start: group.dataset("x_start")?.read_raw::<u32>()?,
            x_interval: group.dataset("x_interval")?.read_scalar::<i64>()?,
            v_offset: group.dataset("v_offset")?.read_scalar::<f64>()?,
            trace_times: group.dataset("trace_times")?.read_raw::<f64>()?,
            head_temp: group.dataset("head_temp")?.read_scalar::<f64>()?,
            n_points: group.dataset("n_points")?.read_2d::<u64>()?,
            data: group.dataset("data")?.read_2d::<f64>()?,
        })
    }

    fn read_pharmacology(&self, group: &Group, location: &str) -> Result<Pharmacology, RCellError> {
        let mut groups = Vec::new();
        for name in indexed_members(group, GROUP_PREFIX, location)? {
            let pharma = group.group(&name)?;
            groups.push(PharmacologyGroup {
                comp_name: read_string(&pharma, "comp_name")?,
                comp_conc: pharma.dataset("comp_conc")?.read_scalar::<f64>()?,
                comp_time: pharma.dataset("comp_time")?.read_scalar::<f64>()?,
                data_ref: read_string(&pharma, "data_ref")?.parse()?,
                trace_ids: pharma.dataset("trace_ids")?.read_raw::<u64>()?,
                trace_times: pharma.dataset("trace_times")?.read_raw::<f64>()?,
                trace_disregarded: pharma.dataset("trace_valid")?.read_raw::<bool>()?,
            });
        }
        Ok(Pharmacology {
            comp_list: read_strings(group, COMP_LIST_NAME)?,
            groups,
        })
    }
}

impl LoadedCell {
    fn inconsistent(&self, reason: String) -> ValidationError {
        ValidationError::Inconsistent {
            path: self.path.clone(),
            reason,
        }
    }

    fn missing(&self, what: String) -> ValidationError {
        ValidationError::Missing {
            path: self.path.clone(),
            what,
        }
    }

    /// Check the structural invariants of the container
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (stim_type, protocol) in self.repetitions.iter() {
            if !self.stimulus.contains_key(stim_type) {
                return Err(self.missing(format!("the stimulus presentation of {stim_type}")));
            }
            if !self.pharmacology.contains_key(stim_type) {
                return Err(self.missing(format!("the pharmacology of {stim_type}")));
            }
            for (index, repetition) in protocol.iter() {
                self.validate_repetition(stim_type, *index, repetition)?;
            }
        }

        for (stim_type, pharmacology) in self.pharmacology.iter() {
            if pharmacology.comp_list.len() != pharmacology.groups.len() {
                return Err(self.inconsistent(format!(
                    "{stim_type} lists {} compounds for {} groups",
                    pharmacology.comp_list.len(),
                    pharmacology.groups.len()
                )));
            }
            for (index, group) in pharmacology.groups.iter().enumerate() {
                self.validate_group(stim_type, index + 1, group)?;
            }
            if stim_type == DRUGS_STIMULUS {
                self.validate_drugs(pharmacology)?;
            }
        }
        Ok(())
    }

    fn validate_repetition(
        &self,
        stim_type: &str,
        index: usize,
        repetition: &Repetition,
    ) -> Result<(), ValidationError> {
        let n_sweeps = repetition.n_sweeps();
        let lengths = [
            ("capacitance_slow", repetition.capacitance_slow.len()),
            ("seal", repetition.seal.len()),
            ("r_series", repetition.r_series.len()),
            ("x_start", repetition.x_start.len()),
            ("n_points", repetition.n_points.nrows()),
            ("data", repetition.data.ncols()),
        ];
        for (name, len) in lengths {
            if len != n_sweeps {
                return Err(self.inconsistent(format!(
                    "{stim_type} {} has {len} sweeps in {name} but {n_sweeps} trace times",
                    repetition_name(index)
                )));
            }
        }
        if repetition.time.len() != repetition.data.nrows() {
            return Err(self.inconsistent(format!(
                "{stim_type} {} has {} time points for {} samples",
                repetition_name(index),
                repetition.time.len(),
                repetition.data.nrows()
            )));
        }
        Ok(())
    }

    fn validate_group(
        &self,
        stim_type: &str,
        index: usize,
        group: &PharmacologyGroup,
    ) -> Result<(), ValidationError> {
        let name = format!("{stim_type} {}", group_name(index));
        if group.data_ref.stim_type != stim_type {
            return Err(self.inconsistent(format!(
                "{name} references {}",
                group.data_ref.path()
            )));
        }
        let repetition = self
            .repetitions
            .get(&group.data_ref.stim_type)
            .and_then(|protocol| protocol.get(&group.data_ref.repetition))
            .ok_or_else(|| {
                self.inconsistent(format!(
                    "{name} references missing {}",
                    group.data_ref.path()
                ))
            })?;
        if group.trace_ids.len() != group.trace_times.len()
            || group.trace_ids.len() != group.trace_disregarded.len()
        {
            return Err(self.inconsistent(format!(
                "{name} has {} trace ids, {} trace times and {} disregard flags",
                group.trace_ids.len(),
                group.trace_times.len(),
                group.trace_disregarded.len()
            )));
        }
        for (id, time) in group.trace_ids.iter().zip(group.trace_times.iter()) {
            match repetition.trace_times.get(*id as usize) {
                Some(t) if t == time || (t.is_nan() && time.is_nan()) => (),
                Some(t) => {
                    return Err(self.inconsistent(format!(
                        "{name} gives trace {id} time {time}, the repetition has {t}"
                    )))
                }
                None => {
                    return Err(self.inconsistent(format!(
                        "{name} selects trace {id} of a {} sweep repetition",
                        repetition.n_sweeps()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Drugs groups split their single repetition into consecutive runs of sweeps
    fn validate_drugs(&self, pharmacology: &Pharmacology) -> Result<(), ValidationError> {
        let Some(repetition) = self
            .repetitions
            .get(DRUGS_STIMULUS)
            .and_then(|protocol| protocol.get(&1))
        else {
            return Err(self.missing(format!("{DRUGS_STIMULUS} {}", repetition_name(1))));
        };
        let ids: Vec<u64> = pharmacology
            .groups
            .iter()
            .flat_map(|group| group.trace_ids.iter().copied())
            .collect();
        let expected: Vec<u64> = (0..repetition.n_sweeps() as u64).collect();
        if ids != expected {
            return Err(self.inconsistent(format!(
                "{DRUGS_STIMULUS} groups do not cover the {} sweeps contiguously",
                repetition.n_sweeps()
            )));
        }
        if let Some(stimulus) = self.stimulus.get(DRUGS_STIMULUS) {
            if stimulus.sweep_count != repetition.n_sweeps() as i64 {
                return Err(self.inconsistent(format!(
                    "{DRUGS_STIMULUS} sweep count is {} for {} recorded sweeps",
                    stimulus.sweep_count,
                    repetition.n_sweeps()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_record::{CellRecord, GeneralInfo, StimulusPresentation};
    use crate::well::WellID;
    use ndarray::Array2;

    fn record() -> CellRecord {
        let mut general = GeneralInfo {
            lab: String::from("Lab"),
            cell_id: 3,
            session_id: String::from("230512_001_CL1"),
            ..Default::default()
        };
        general.experiment.trypsinization_time = 60;
        let mut stimulus = BTreeMap::new();
        stimulus.insert(
            String::from("Drugs"),
            StimulusPresentation {
                stim_id: 30,
                sweep_count: 1,
                sweep_interval: 5,
                kind: String::from("Pulse"),
                ..Default::default()
            },
        );
        CellRecord {
            well: WellID::new(3),
            cell_line: String::from("CL1"),
            identifier: String::from("230512_001_CL1_D1"),
            file_create_date: String::from("02-Jan-2024 03:04:05"),
            data_release: String::from("2024.01"),
            session_description: String::new(),
            general,
            stimulus,
            comp_list: vec![String::from("Drugs::None:0.0")],
        }
    }

    fn repetition(n_sweeps: usize) -> Repetition {
        Repetition {
            capacitance_slow: vec![10.0; n_sweeps],
            seal: vec![f64::NAN; n_sweeps],
            r_series: vec![5.0; n_sweeps],
            time: vec![0, 100, 200],
            x_start: vec![0; n_sweeps],
            x_interval: 100,
            v_offset: 11.0,
            trace_times: (0..n_sweeps).map(|s| s as f64 * 1000.0).collect(),
            head_temp: 0.0,
            n_points: Array2::from_elem((n_sweeps, 1), 3),
            data: Array2::zeros((3, n_sweeps)),
        }
    }

    fn drugs(split: usize, n_sweeps: usize) -> Pharmacology {
        let group = |ids: Vec<u64>, name: &str| PharmacologyGroup {
            comp_name: name.to_string(),
            comp_conc: 0.0,
            comp_time: 0.0,
            data_ref: DataRef::new("Drugs", 1),
            trace_times: ids.iter().map(|i| *i as f64 * 1000.0).collect(),
            trace_disregarded: vec![false; ids.len()],
            trace_ids: ids,
        };
        Pharmacology {
            comp_list: vec![String::from("Drugs::None:0.0"), String::from("Drugs:A:1:2.0")],
            groups: vec![
                group((0..split as u64).collect(), "?EC?"),
                group((split as u64..n_sweeps as u64).collect(), "A"),
            ],
        }
    }

    #[test]
    fn test_round_trip_and_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell").join("cell.nwb");
        assert_eq!(container_state(&path), ContainerState::Missing);

        let writer = RCellWriter::create(&path, &record()).unwrap();
        writer.write_repetition("Drugs", 1, &repetition(4)).unwrap();
        writer.write_pharmacology("Drugs", &drugs(2, 4)).unwrap();
        writer.set_sweep_count("Drugs", 4).unwrap();
        writer.mark_filled().unwrap();
        drop(writer);
        assert_eq!(container_state(&path), ContainerState::Filled);

        let cell = RCellReader::load(&path).unwrap();
        assert_eq!(cell.general, record().general);
        assert!(cell.general.experiment.total_cells.is_none());
        assert_eq!(cell.stimulus["Drugs"].sweep_count, 4);
        assert_eq!(cell.comp_list, record().comp_list);
        let loaded = &cell.repetitions["Drugs"][&1];
        assert_eq!(loaded.trace_times, vec![0.0, 1000.0, 2000.0, 3000.0]);
        assert!(loaded.seal.iter().all(|s| s.is_nan()));
        assert_eq!(loaded.data.dim(), (3, 4));
        assert_eq!(cell.pharmacology["Drugs"], drugs(2, 4));
        cell.validate().unwrap();

        RCellWriter::open(&path).unwrap().mark_validated().unwrap();
        assert_eq!(container_state(&path), ContainerState::Validated);
    }

    #[test]
    fn test_validation_catches_broken_containers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell.nwb");
        let writer = RCellWriter::create(&path, &record()).unwrap();
        writer.write_repetition("Drugs", 1, &repetition(4)).unwrap();
        writer.write_pharmacology("Drugs", &drugs(2, 4)).unwrap();
        drop(writer);

        // the sweep count was never patched
        let mut cell = RCellReader::load(&path).unwrap();
        assert!(matches!(
            cell.validate(),
            Err(ValidationError::Inconsistent { .. })
        ));
        cell.stimulus.get_mut("Drugs").unwrap().sweep_count = 4;
        cell.validate().unwrap();

        // overlapping groups
        cell.pharmacology.insert(String::from("Drugs"), drugs(2, 4));
        cell.pharmacology.get_mut("Drugs").unwrap().groups[1].trace_ids[0] = 1;
        assert!(cell.validate().is_err());

        // dangling reference
        let mut broken = drugs(2, 4);
        broken.groups[0].data_ref = DataRef::new("Drugs", 2);
        cell.pharmacology.insert(String::from("Drugs"), broken);
        assert!(cell.validate().is_err());

        // ragged repetition
        cell.pharmacology.insert(String::from("Drugs"), drugs(2, 4));
        let repetition = cell
            .repetitions
            .get_mut("Drugs")
            .and_then(|p| p.get_mut(&1))
            .unwrap();
        repetition.seal.pop();
        assert!(cell.validate().is_err());
    }
}
