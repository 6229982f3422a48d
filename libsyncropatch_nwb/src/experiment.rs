use bitvec::vec::BitVec;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

use super::cell_record::CellRecord;
use super::compound::{sort_list_entries, CompoundTimeline};
use super::constants::{N_ROWS, SYSTEM_HEADER_PROTOCOL, SYSTEM_PROTOCOLS};
use super::error::ExperimentError;
use super::protocol::{
    value_to_string, ProtocolHeader, ProtocolMetadata, StimulusInfo, StimulusTable,
};
use super::user_metadata::UserMetadata;
use super::well::{cell_ids_of_columns, WellID};

/// Current local time, UTC when the local offset can not be determined
pub fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Experiment-wide metadata, read from the header of the system protocol
#[derive(Debug, Clone)]
pub struct ExperimentMetadata {
    /// Name of the experiment folder
    pub name: String,
    pub data_name: String,
    pub patch_plate_id: String,
    pub instrument_id: String,
    pub user_id: String,
    pub patch_plate_resistance: String,
    pub cell_lines: Vec<Vec<String>>,
    pub n_cell_lines: usize,
    /// Wells on the chip
    pub n_cells: usize,
    /// YYYY.MM.DD
    pub date: String,
    /// HH:MM:SS
    pub time: String,
    pub n_cols: usize,
    pub n_rows: usize,
    /// One bit per chip column, set when the column was recorded
    pub columns_measured: BitVec,
}

impl ExperimentMetadata {
    /// Extract the experiment metadata from a system protocol header
    pub fn from_header(
        name: &str,
        header: &ProtocolHeader,
        now: OffsetDateTime,
    ) -> Result<Self, ExperimentError> {
        let identifier = &header.dataset_identifier;
        let layout = &header.trace_header.measurement_layout;

        let (date_token, time_token) = match identifier.patch_plate_in_time.split_once('T') {
            Some((date, time)) => (date, time.trim_end_matches('Z')),
            None => (identifier.patch_plate_in_time.as_str(), ""),
        };
        let date = match Date::parse(date_token, format_description!("[year]-[month]-[day]")) {
            Ok(date) => date,
            Err(_) => {
                log::warn!(
                    "Could not convert date {date_token} from the format YYYY-MM-DD, using today"
                );
                now.date()
            }
        };
        let time = match Time::parse(
            time_token,
            format_description!("[hour]:[minute]:[second].[subsecond]"),
        ) {
            Ok(time) => time,
            Err(_) => {
                log::warn!(
                    "Could not convert time {time_token} from the format HH:MM:SS.f, using now"
                );
                now.time()
            }
        };

        let columns_measured: BitVec = layout.cols_measured.iter().map(|c| *c >= 0).collect();
        let n_cols = header
            .cell_state
            .cell_layout
            .first()
            .map(|row| row.len())
            .unwrap_or(layout.n_cols);

        Ok(Self {
            name: name.to_string(),
            data_name: identifier.data_name.clone(),
            patch_plate_id: value_to_string(&identifier.patch_plate_id),
            instrument_id: value_to_string(&identifier.instrument_id),
            user_id: value_to_string(&identifier.user_id),
            patch_plate_resistance: value_to_string(
                &header.experiment_conditions.patch_plate_resistance,
            ),
            cell_lines: header
                .cell_table
                .table_data
                .iter()
                .map(|row| row.iter().map(value_to_string).collect())
                .collect(),
            n_cell_lines: header.cell_table.nof_cell_rows,
            n_cells: N_ROWS * n_cols,
            date: date.format(format_description!("[year].[month].[day]"))?,
            time: time.format(format_description!("[hour]:[minute]:[second]"))?,
            n_cols: layout.n_cols,
            n_rows: N_ROWS,
            columns_measured,
        })
    }

    /// Cell ids of every recorded well
    pub fn cell_ids(&self) -> Vec<usize> {
        cell_ids_of_columns(self.columns_measured.iter_ones())
    }
}

/// An experiment folder: system protocols, user protocols and the user metadata
#[derive(Debug, Clone)]
pub struct Experiment {
    pub path: PathBuf,
    pub metadata: ExperimentMetadata,
    pub user_metadata: UserMetadata,
    pub stimuli: StimulusTable,
    /// User protocols, in folder name order
    pub protocols: Vec<ProtocolMetadata>,
}

impl Experiment {
    /// Split the subfolders of an experiment into the system header folder and the user protocols
    pub fn discover(path: &Path) -> Result<(PathBuf, Vec<PathBuf>), ExperimentError> {
        if !path.is_dir() {
            return Err(ExperimentError::BadFilePath(path.to_path_buf()));
        }
        let mut folders: Vec<PathBuf> = Vec::new();
        for item in path.read_dir()? {
            let item_path = item?.path();
            if item_path.is_dir() {
                folders.push(item_path);
            }
        }
        folders.sort();

        let folder_name = |p: &PathBuf| -> String {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        };
        let system = folders
            .iter()
            .find(|p| folder_name(p).starts_with(SYSTEM_HEADER_PROTOCOL))
            .cloned()
            .ok_or(ExperimentError::NoSystemProtocol(path.to_path_buf()))?;
        let user_protocols = folders
            .into_iter()
            .filter(|p| {
                let name = folder_name(p);
                !SYSTEM_PROTOCOLS.iter().any(|s| name.starts_with(s))
            })
            .collect();
        Ok((system, user_protocols))
    }

    /// Read all of the metadata of an experiment. No trace data is loaded.
    ///
    /// The user metadata file <path>/<name>.ini is mandatory.
    pub fn read(path: &Path) -> Result<Self, ExperimentError> {
        let (system, user_protocols) = Self::discover(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or(ExperimentError::BadFilePath(path.to_path_buf()))?;

        let system_header = ProtocolHeader::read(&system)?;
        let metadata = ExperimentMetadata::from_header(&name, &system_header, now_local())?;

        let user_metadata = UserMetadata::read(&path.join(format!("{name}.ini")))?;
        let stimuli = StimulusTable::new(&user_metadata);

        let mut protocols = Vec::with_capacity(user_protocols.len());
        let mut stim_types = HashSet::new();
        for protocol_path in user_protocols.iter() {
            log::info!(
                "Reading metadata from protocol {}",
                protocol_path.file_name().unwrap_or_default().to_string_lossy()
            );
            let protocol = ProtocolMetadata::read(protocol_path, &stimuli)?;
            // Containers hold one group per stimulus type
            if !stim_types.insert(protocol.stim_type().to_string()) {
                return Err(ExperimentError::DuplicateStimulus(
                    protocol.stim_type().to_string(),
                ));
            }
            protocols.push(protocol);
        }

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            user_metadata,
            stimuli,
            protocols,
        })
    }

    pub fn stimulus_infos(&self) -> Vec<StimulusInfo> {
        self.protocols.iter().map(|p| p.stimulus.clone()).collect()
    }

    /// Compound list of every recorded cell across all protocols, sorted by time
    pub fn compound_lists(&self) -> Result<BTreeMap<usize, Vec<String>>, ExperimentError> {
        let mut lists: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for protocol in self.protocols.iter() {
            for cell_id in self.metadata.cell_ids() {
                let timeline = CompoundTimeline::build(
                    &protocol.header,
                    protocol.stim_type(),
                    &WellID::new(cell_id),
                    protocol.n_measured_sweeps,
                )?;
                lists
                    .entry(cell_id)
                    .or_default()
                    .extend(timeline.list_entries());
            }
        }
        for list in lists.values_mut() {
            sort_list_entries(list);
        }
        Ok(lists)
    }

    /// Build the metadata-only record of every recorded cell
    pub fn cell_records(&self, now: OffsetDateTime) -> Result<Vec<CellRecord>, ExperimentError> {
        let stimuli = self.stimulus_infos();
        let mut lists = self.compound_lists()?;
        self.metadata
            .cell_ids()
            .into_iter()
            .map(|cell_id| {
                CellRecord::new(
                    &self.metadata,
                    &self.user_metadata,
                    &stimuli,
                    WellID::new(cell_id),
                    lists.remove(&cell_id).unwrap_or_default(),
                    now,
                )
            })
            .collect()
    }
}
