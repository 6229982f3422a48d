use clap::{Arg, ArgAction, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;

use libsyncropatch_nwb::config::Config;
use libsyncropatch_nwb::process::{convert_to_nwb, ConversionOutcome};
use libsyncropatch_nwb::worker_status::{Phase, WorkerStatus};

fn make_template_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

fn phase_name(phase: &Phase) -> &'static str {
    match phase {
        Phase::Metadata => "metadata",
        Phase::Protocol => "protocols",
        Phase::Validation => "validation",
    }
}

fn main() -> ExitCode {
    // Create a cli
    let matches = Command::new("syncropatch_nwb_cli")
        .about("Convert a Syncropatch experiment into rCell containers")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("overwrite")
                .long("overwrite")
                .action(ArgAction::SetTrue)
                .help("Replace containers which already exist"),
        )
        .arg(Arg::new("experiment").help("Name of the experiment, e.g. 230512_001"))
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let Some(config_path) = matches.get_one::<String>("path").map(PathBuf::from) else {
        log::error!("A configuration file is required (-p)");
        return ExitCode::FAILURE;
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        if let Err(e) = make_template_config(&config_path) {
            log::error!("Could not write the template config: {e}");
            return ExitCode::FAILURE;
        }
        log::info!("Done.");
        return ExitCode::SUCCESS;
    }

    let Some(experiment) = matches.get_one::<String>("experiment").cloned() else {
        log::error!("An experiment name is required");
        return ExitCode::FAILURE;
    };

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c.with_overwrite(matches.get_flag("overwrite")),
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Raw data Path: {}", config.raw_data_path.to_string_lossy());
    log::info!("rCell Path: {}", config.rcell_directory().to_string_lossy());
    log::info!("Overwrite: {} Validate: {}", config.overwrite, config.validate);

    let experiment_path = match config.experiment_directory(&experiment) {
        Ok(path) => path,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    if let Ok(style) = ProgressStyle::with_template("{prefix:>10} [{bar:40}] {pos:>3}% {msg}") {
        pb.set_style(style);
    }
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || convert_to_nwb(&experiment_path, &config, Some(&tx)));

    // The channel closes once the worker is done
    for status in rx.iter() {
        pb.set_prefix(phase_name(&status.phase));
        pb.set_message(status.label);
        pb.set_position((status.progress * 100.0) as u64);
    }
    pb.finish();

    let code = match handle.join() {
        Ok(Ok(ConversionOutcome::Created(paths))) => {
            log::info!("Successfully converted {experiment} into {} rCells!", paths.len());
            ExitCode::SUCCESS
        }
        Ok(Ok(ConversionOutcome::Skipped {
            complete,
            incomplete,
        })) => {
            log::info!(
                "Experiment {experiment} was already converted: {} complete, {} incomplete rCells",
                complete.len(),
                incomplete.len()
            );
            for path in incomplete.iter() {
                log::warn!("Incomplete rCell: {}", path.to_string_lossy());
            }
            ExitCode::SUCCESS
        }
        Ok(Ok(ConversionOutcome::Empty)) => {
            log::warn!("Experiment {experiment} has no recorded cells, nothing was written");
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            log::error!("Conversion failed with error: {e}");
            ExitCode::FAILURE
        }
        Err(_) => {
            log::error!("Failed to join conversion task!");
            ExitCode::FAILURE
        }
    };

    log::info!("Done.");
    code
}
