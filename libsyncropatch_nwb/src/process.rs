use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::config::Config;
use super::error::ConversionError;
use super::experiment::{now_local, Experiment};
use super::protocol_data::ProtocolData;
use super::rcell_reader::{container_state, RCellReader};
use super::rcell_writer::{ContainerState, RCellWriter};
use super::well::WellID;
use super::worker_status::{Phase, WorkerStatus};

/// What a conversion run did with the containers of an experiment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// Containers written by this run
    Created(Vec<PathBuf>),
    /// Every container already existed and overwrite was off. Incomplete containers
    /// were left behind by an interrupted run and never validated.
    Skipped {
        complete: Vec<PathBuf>,
        incomplete: Vec<PathBuf>,
    },
    /// The experiment has no recorded cell
    Empty,
}

fn send_status(
    tx: Option<&Sender<WorkerStatus>>,
    progress: f32,
    phase: Phase,
    label: &str,
) -> Result<(), ConversionError> {
    if let Some(tx) = tx {
        tx.send(WorkerStatus::new(progress, phase, label))?;
    }
    Ok(())
}

/// Write the metadata skeleton of every recorded cell. Returns the containers created
/// along with those which were skipped
fn create_containers(
    experiment: &Experiment,
    config: &Config,
    tx: Option<&Sender<WorkerStatus>>,
) -> Result<(Vec<(WellID, PathBuf)>, Vec<PathBuf>, Vec<PathBuf>), ConversionError> {
    let records = experiment.cell_records(now_local())?;
    let saving_root = config.rcell_directory();
    let mut created = Vec::with_capacity(records.len());
    let mut complete = Vec::new();
    let mut incomplete = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let path = record.container_path(&saving_root);
        let state = container_state(&path);
        if state != ContainerState::Missing && !config.overwrite {
            log::info!(
                "Container {} already exists ({state}), skipping",
                path.to_string_lossy()
            );
            if state.is_complete() {
                complete.push(path);
            } else {
                incomplete.push(path);
            }
            continue;
        }
        RCellWriter::create(&path, record)?;
        created.push((record.well, path));
        send_status(
            tx,
            (index + 1) as f32 / records.len() as f32,
            Phase::Metadata,
            &record.identifier,
        )?;
    }
    Ok((created, complete, incomplete))
}

/// Write every protocol of the experiment into the created containers, one protocol at a time
fn fill_containers(
    experiment: &Experiment,
    created: &[(WellID, PathBuf)],
    tx: Option<&Sender<WorkerStatus>>,
) -> Result<(), ConversionError> {
    let n_protocols = experiment.protocols.len();
    for (index, protocol) in experiment.protocols.iter().enumerate() {
        log::info!(
            "Processing protocol {} ({} sweeps, {} repetitions)...",
            protocol.name,
            protocol.n_measured_sweeps,
            protocol.n_repetitions()
        );
        let data = ProtocolData::load(protocol).map_err(|source| {
            ConversionError::ProtocolDataError {
                protocol: protocol.name.clone(),
                source,
            }
        })?;

        for (cell, (well, path)) in created.iter().enumerate() {
            let writer = RCellWriter::open(path)?;
            data.fill_container(protocol, &writer, well)
                .map_err(|source| ConversionError::ProtocolDataError {
                    protocol: protocol.name.clone(),
                    source,
                })?;
            // The sweep count of Drugs is only known from its own header
            if protocol.stimulus.is_drugs() {
                writer.set_sweep_count(protocol.stim_type(), protocol.n_measured_sweeps as i64)?;
            }
            let progress = (index as f32 + (cell + 1) as f32 / created.len() as f32)
                / n_protocols as f32;
            send_status(tx, progress, Phase::Protocol, &protocol.name)?;
        }
        log::info!("Done with protocol {}.", protocol.name);
    }

    for (_, path) in created.iter() {
        RCellWriter::open(path)?.mark_filled()?;
    }
    Ok(())
}

/// Reload every container, check it and stamp it as validated
fn validate_containers(
    created: &[(WellID, PathBuf)],
    tx: Option<&Sender<WorkerStatus>>,
) -> Result<(), ConversionError> {
    for (index, (_, path)) in created.iter().enumerate() {
        let cell = RCellReader::load(path)?;
        cell.validate()?;
        RCellWriter::open(path)?.mark_validated()?;
        send_status(
            tx,
            (index + 1) as f32 / created.len() as f32,
            Phase::Validation,
            &cell.identifier,
        )?;
    }
    Ok(())
}

/// The main loop of the conversion.
///
/// Converts the experiment folder at experiment_path into one rCell container per
/// recorded cell. Progress is reported through tx when given. Any error aborts the
/// run; containers written so far are left unvalidated.
pub fn convert_to_nwb(
    experiment_path: &Path,
    config: &Config,
    tx: Option<&Sender<WorkerStatus>>,
) -> Result<ConversionOutcome, ConversionError> {
    log::info!(
        "Reading experiment metadata from {}...",
        experiment_path.to_string_lossy()
    );
    let experiment = Experiment::read(experiment_path)?;
    log::info!(
        "Experiment {} recorded on {} at {}: {} protocols, {} recorded cells",
        experiment.metadata.name,
        experiment.metadata.date,
        experiment.metadata.time,
        experiment.protocols.len(),
        experiment.metadata.cell_ids().len()
    );

    let (created, complete, incomplete) = create_containers(&experiment, config, tx)?;
    if created.is_empty() {
        if complete.is_empty() && incomplete.is_empty() {
            log::warn!("Experiment {} has no recorded cell", experiment.metadata.name);
            return Ok(ConversionOutcome::Empty);
        }
        if !incomplete.is_empty() {
            log::warn!(
                "{} containers of experiment {} were never validated; rerun with overwrite to rebuild them",
                incomplete.len(),
                experiment.metadata.name
            );
        }
        return Ok(ConversionOutcome::Skipped {
            complete,
            incomplete,
        });
    }
    log::info!("Created {} containers.", created.len());

    fill_containers(&experiment, &created, tx)?;

    if config.validate {
        log::info!("Validating {} containers...", created.len());
        validate_containers(&created, tx)?;
        log::info!("Validation done.");
    } else {
        log::info!("Validation disabled, containers are left unvalidated.");
    }

    Ok(ConversionOutcome::Created(
        created.into_iter().map(|(_, path)| path).collect(),
    ))
}
