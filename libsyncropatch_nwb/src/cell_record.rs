use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

use super::constants::*;
use super::error::ExperimentError;
use super::experiment::ExperimentMetadata;
use super::protocol::StimulusInfo;
use super::user_metadata::{UserMetadata, CELLS_SECTION, EXPERIMENT_SECTION};
use super::well::WellID;

// Records of the general/ tree of an rCell. Field names are the dataset names in the
// container, so they must not be renamed.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInfo {
    pub ic_id: String,
    pub ic_solution: String,
    pub ec_id: String,
    pub ec_solution: String,
    pub se_id: String,
    pub se_solution: String,
    pub comment: String,
    pub temp: String,
    pub date: String,
    pub time: String,
    pub project_name: String,
    pub project_id: String,
    pub nanioncsv_log: String,
    pub total_cells: Option<f64>,
    pub trypsin_concentration: String,
    pub trypsinization_time: i64,
    pub induction: String,
    pub induction_medium: String,
    pub doxycycline_conc: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimenterInfo {
    pub user_email: String,
    pub experimenter: String,
    pub user_initials: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellInfo {
    pub chip_cols: String,
    pub cell_stock_id: String,
    pub cell_suspension_medium: String,
    pub culture_medium: String,
    pub species: String,
    pub host_cell: String,
    pub passage: String,
    pub cell_countpml: String,
    pub cell_image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub ion_channel: String,
    pub species: String,
    pub host_cell: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeInfo {
    pub date_time: String,
    pub git_repository: String,
    pub git_revision: String,
    pub git_status: String,
    pub hostname: String,
    pub release_date: String,
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NanionInfo {
    pub data_export_version: String,
    pub data_path: String,
    pub heka_id: String,
    pub manufacturer: String,
    pub model_name: String,
    pub onl_file: String,
    pub path: String,
    pub pgf_file: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralInfo {
    pub lab: String,
    pub institution: String,
    pub cell_id: i64,
    pub session_id: String,
    pub data_quality_notes: String,
    pub drn: String,
    pub experiment: ExperimentInfo,
    pub experimenter: ExperimenterInfo,
    pub cell_info: CellInfo,
    pub channel_info: ChannelInfo,
    pub code_info: CodeInfo,
    pub nanion: NanionInfo,
}

/// stimulus/presentation/<stim_type>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StimulusPresentation {
    pub command: String,
    pub stim_id: i64,
    pub sweep_count: i64,
    pub sweep_interval: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

impl StimulusPresentation {
    pub fn new(stimulus: &StimulusInfo) -> Self {
        Self {
            command: String::new(),
            stim_id: stimulus.stim_id,
            sweep_count: stimulus.n_sweeps as i64,
            sweep_interval: STIMULUS_SWEEP_INTERVAL,
            kind: String::from(STIMULUS_KIND),
        }
    }
}

/// The metadata-only skeleton of one rCell, before any trace is attached
#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    pub well: WellID,
    /// Cell line section of the user metadata describing this cell (CL<N>)
    pub cell_line: String,
    pub identifier: String,
    pub file_create_date: String,
    pub data_release: String,
    pub session_description: String,
    pub general: GeneralInfo,
    pub stimulus: BTreeMap<String, StimulusPresentation>,
    /// Every compound application of the experiment, sorted by time
    pub comp_list: Vec<String>,
}

impl CellRecord {
    /// Build the skeleton of a recorded cell
    pub fn new(
        experiment: &ExperimentMetadata,
        user: &UserMetadata,
        stimuli: &[StimulusInfo],
        well: WellID,
        comp_list: Vec<String>,
        now: OffsetDateTime,
    ) -> Result<Self, ExperimentError> {
        let cell_line = user.cell_line_for_column(well.col)?;
        let session = format!("{}_{}", experiment.name, cell_line);

        let experiment_info = ExperimentInfo {
            ic_id: user.get(EXPERIMENT_SECTION, "IC_id")?.to_string(),
            ec_id: user.get(EXPERIMENT_SECTION, "EC_id")?.to_string(),
            se_id: user.get(EXPERIMENT_SECTION, "SE_id")?.to_string(),
            comment: user.get_or_empty(EXPERIMENT_SECTION, "comment"),
            temp: user.get_or_empty(EXPERIMENT_SECTION, "temperature"),
            date: experiment.date.clone(),
            time: experiment.time.clone(),
            project_name: String::from(PROJECT_NAME),
            project_id: String::from(PROJECT_ID),
            total_cells: None,
            trypsinization_time: TRYPSINIZATION_TIME,
            induction: user.get_or_empty(CELLS_SECTION, "induction_time"),
            induction_medium: user.get_or_empty(CELLS_SECTION, "induction_medium"),
            doxycycline_conc: String::from(DOXYCYCLINE_CONCENTRATION),
            ..Default::default()
        };

        let cell_info = CellInfo {
            chip_cols: user.get(&cell_line, "chip_cols")?.to_string(),
            cell_stock_id: user.get_or_empty(&cell_line, "vial_id"),
            cell_suspension_medium: user.get_or_empty(CELLS_SECTION, "cell_suspension_medium"),
            culture_medium: user.get_or_empty(CELLS_SECTION, "culture_medium"),
            species: user.get_or_empty(&cell_line, "species"),
            host_cell: user.get_or_empty(&cell_line, "host_cell"),
            passage: user.get_or_empty(&cell_line, "passage"),
            cell_countpml: user.get_or_empty(&cell_line, "cell_countpml"),
            cell_image: String::new(),
        };
        let channel_info = ChannelInfo {
            ion_channel: user.get_or_empty(&cell_line, "ion_channel"),
            species: cell_info.species.clone(),
            host_cell: cell_info.host_cell.clone(),
        };

        let general = GeneralInfo {
            lab: String::from(LAB),
            institution: String::from(INSTITUTION),
            cell_id: well.cell_id as i64,
            session_id: session.clone(),
            data_quality_notes: String::from(NO_QUALITY_NOTES),
            drn: now.format(format_description!("[year].[month].[day]"))?,
            experiment: experiment_info,
            experimenter: ExperimenterInfo {
                user_email: user.get_or(EXPERIMENT_SECTION, "user_email", DEFAULT_USER_EMAIL),
                experimenter: user.get_or(
                    EXPERIMENT_SECTION,
                    "experimenter",
                    DEFAULT_EXPERIMENTER,
                ),
                user_initials: user.get_or(
                    EXPERIMENT_SECTION,
                    "user_initials",
                    DEFAULT_USER_INITIALS,
                ),
            },
            cell_info,
            channel_info,
            code_info: CodeInfo::default(),
            nanion: NanionInfo {
                model_name: experiment.instrument_id.clone(),
                serial_number: experiment.instrument_id.clone(),
                ..Default::default()
            },
        };

        let stimulus = stimuli
            .iter()
            .map(|s| (s.stim_type.clone(), StimulusPresentation::new(s)))
            .collect();

        Ok(Self {
            well,
            identifier: format!("{}_{}", session, well.label()),
            cell_line,
            file_create_date: now.format(format_description!(
                "[day]-[month repr:short]-[year] [hour]:[minute]:[second]"
            ))?,
            data_release: now.format(format_description!("[year].[month]"))?,
            session_description: user.get_or_empty(EXPERIMENT_SECTION, "exp_description"),
            general,
            stimulus,
            comp_list,
        })
    }

    /// Path of the container of this cell:
    /// <root>/<date>/<date>_<exp>/<session>/<identifier>.nwb
    pub fn container_path(&self, saving_root: &Path) -> PathBuf {
        let session = &self.general.session_id;
        let tokens: Vec<&str> = session.split('_').collect();
        let date = tokens[0];
        let experiment = tokens[..tokens.len().min(2)].join("_");
        saving_root
            .join(date)
            .join(experiment)
            .join(session)
            .join(format!("{}.{}", self.identifier, NWB_EXTENSION))
    }
}
