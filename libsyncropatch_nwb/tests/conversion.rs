use libsyncropatch_nwb::config::Config;
use libsyncropatch_nwb::error::{
    ConversionError, ExperimentError, ProtocolDataError, TraceFileError, UserMetadataError,
};
use libsyncropatch_nwb::process::{convert_to_nwb, ConversionOutcome};
use libsyncropatch_nwb::rcell_reader::{container_state, RCellReader};
use libsyncropatch_nwb::rcell_writer::{ContainerState, DataRef};
use libsyncropatch_nwb::worker_status::{Phase, WorkerStatus};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

const EXPERIMENT: &str = "230512_001";
const N_SAMPLES: usize = 4;

const INI: &str = "\
[Experiment]
exp_description = Synthetic activation and drugs
IC_id = IC-1
EC_id = EC-1
SE_id = SE-1
ncell_lines = 1

[Cells]
culture_medium = DMEM

[CL1]
chip_cols = 1-24
species = human
host_cell = CHO
ion_channel = SCN5A

[Stimulus]
Activation = Activation,12,5
Drugs = Drugs,30,1
";

fn per_well(value: Value) -> Value {
    json!([vec![value; 16]])
}

fn write_system_header(exp: &Path) {
    let dir = exp.join("EBoardCheck_000");
    std::fs::create_dir_all(&dir).unwrap();
    let header = json!({
        "DatasetIdentifier": {
            "DataName": "EBoardCheck", "PatchPlateID": "PP-1",
            "PatchPlateInTime": "2023-05-12T09:30:00.0Z",
            "InstrumentID": "SP384-7", "UserID": "rr"
        },
        "ExperimentConditions": {"PatchPlateResistance": 2.5},
        "CellTable": {"TableData": [["CHO", "SCN5A"]], "NofCellRows": 1},
        "CellState": {"CellLayout": vec![vec![0]; 16]},
        "TraceHeader": {"MeasurementLayout": {"nCols": 1, "ColsMeasured": [0]}}
    });
    std::fs::write(dir.join("header.json"), header.to_string()).unwrap();
}

/// A one column protocol. `comp_index` gives the compound state of every sweep and
/// `timestamps` the application time of every state.
fn write_protocol(exp: &Path, folder: &str, comp_index: &[usize], timestamps: &[f64]) {
    let dir = exp.join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    let n_sweeps = comp_index.len();

    let states: Vec<Value> = timestamps
        .iter()
        .enumerate()
        .map(|(state, timestamp)| {
            let layout = if state == 0 { -1 } else { 0 };
            json!({
                "CompPlateBarcode": "",
                "Timestamp_s": timestamp,
                "CompLayout": vec![vec![layout]; 16],
                "Concentration": vec![vec![json!(state * 3)]; 16]
            })
        })
        .collect();
    let per_sweep =
        |value: f64| -> Vec<Value> { (0..n_sweeps).map(|_| per_well(json!(value))).collect() };
    let header = json!({
        "DatasetIdentifier": {"DataName": folder},
        "TraceHeader": {
            "MeasurementLayout": {
                "NofSweeps": n_sweeps, "Leakdata": 1, "NofSamples": N_SAMPLES,
                "nCols": 1, "ColsMeasured": [0]
            },
            "FileInformation": {"FileList": ["Tracedata_1.dat", "Tracedata_0.dat"]},
            "TimeScaling": {
                "I2DScale": vec![0.5; 16],
                "TR_Time": [0.0, 0.25, 0.5, 0.75],
                "SweepTime": [(0..n_sweeps).map(|s| s as f64 * 5.0).collect::<Vec<f64>>()]
            }
        },
        "QCData": {
            "Capacitance": per_sweep(12e-12),
            "RSeal": per_sweep(1e9),
            "Rseries": per_sweep(4e6),
            "DisregardedSweeps": vec![false; n_sweeps],
            "QCEvents": [{"Result": []}, {"Result": per_well(json!(0.001))}]
        },
        "CompTable": {"TableData": [["Flecainide"]]},
        "CompoundAddition": {"Sweep2CompIndex": comp_index, "CompStateProt": states}
    });
    std::fs::write(dir.join("header.json"), header.to_string()).unwrap();

    // Sweeps are split over two files; sample values encode (sweep, cell)
    let first_file_sweeps = n_sweeps / 2;
    for (name, sweeps) in [
        ("Tracedata_0.dat", 0..first_file_sweeps),
        ("Tracedata_1.dat", first_file_sweeps..n_sweeps),
    ] {
        let mut bytes = Vec::new();
        for sweep in sweeps {
            for cell in 0..16 {
                for _ in 0..N_SAMPLES {
                    bytes.extend_from_slice(&((sweep * 100 + cell) as i16).to_le_bytes());
                }
            }
        }
        std::fs::write(dir.join(name), bytes).unwrap();
    }
}

/// Build raw/2023/230512_001 and return the configuration pointing at it
fn synthetic_experiment(root: &Path) -> (PathBuf, Config) {
    let raw = root.join("raw");
    let exp = raw.join("2023").join(EXPERIMENT);
    std::fs::create_dir_all(exp.join("QC_Data_001")).unwrap();
    write_system_header(&exp);
    write_protocol(&exp, "Activation_002", &[0; 10], &[0.0]);
    write_protocol(&exp, "Drugs_003", &[0, 0, 0, 1, 1, 1], &[0.0, 15.0]);
    std::fs::write(exp.join(format!("{EXPERIMENT}.ini")), INI).unwrap();

    let config = Config {
        raw_data_path: raw,
        rcell_path: root.join("out"),
        overwrite: false,
        validate: true,
    };
    let exp_dir = config.experiment_directory(EXPERIMENT).unwrap();
    (exp_dir, config)
}

/// Rewrite the json header of a protocol folder
fn edit_header(protocol: &Path, edit: impl FnOnce(&mut Value)) {
    let path = protocol.join("header.json");
    let mut header: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    edit(&mut header);
    std::fs::write(&path, header.to_string()).unwrap();
}

fn container_of(config: &Config, well: &str) -> PathBuf {
    config
        .rcell_directory()
        .join("230512")
        .join("230512_001")
        .join("230512_001_CL1")
        .join(format!("230512_001_CL1_{well}.nwb"))
}

#[test]
fn test_full_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, config) = synthetic_experiment(dir.path());
    let (tx, rx) = mpsc::channel::<WorkerStatus>();

    let paths = match convert_to_nwb(&exp, &config, Some(&tx)).unwrap() {
        ConversionOutcome::Created(paths) => paths,
        other => panic!("expected created containers, got {other:?}"),
    };
    assert_eq!(paths.len(), 16);
    drop(tx);
    let statuses: Vec<WorkerStatus> = rx.iter().collect();
    assert!(statuses.iter().any(|s| s.phase == Phase::Protocol));
    assert!(statuses
        .last()
        .is_some_and(|s| s.phase == Phase::Validation && s.progress == 1.0));

    let expected = container_of(&config, "B1");
    assert!(paths.contains(&expected));

    for path in paths.iter() {
        assert_eq!(container_state(path), ContainerState::Validated);
    }

    let cell = RCellReader::load(&expected).unwrap();
    cell.validate().unwrap();
    assert_eq!(cell.identifier, "230512_001_CL1_B1");
    assert_eq!(cell.general.cell_id, 1);
    assert_eq!(cell.general.session_id, "230512_001_CL1");
    assert_eq!(cell.general.experiment.date, "2023.05.12");
    assert_eq!(cell.general.experiment.time, "09:30:00");
    assert_eq!(cell.general.channel_info.ion_channel, "SCN5A");
    assert_eq!(cell.stimulus["Activation"].sweep_count, 5);
    assert_eq!(cell.stimulus["Drugs"].sweep_count, 6);
    assert_eq!(
        cell.comp_list,
        vec![
            "Activation::0:0.0",
            "Drugs::0:0.0",
            "Drugs:Flecainide:3:15.0"
        ]
    );

    // Activation: 10 sweeps in 2 repetitions of 5
    let activation = &cell.repetitions["Activation"];
    assert_eq!(activation.len(), 2);
    let second = &activation[&2];
    assert_eq!(second.data.dim(), (N_SAMPLES, 5));
    assert_eq!(second.data[[0, 0]], (500 + 1) as f64 * 0.5);
    assert_eq!(second.trace_times, vec![25000.0, 30000.0, 35000.0, 40000.0, 45000.0]);
    assert_eq!(second.time, vec![0, 250_000, 500_000, 750_000]);
    assert_eq!(second.x_interval, 250_000);
    assert!((second.capacitance_slow[0] - 12.0).abs() < 1e-9);
    assert!((second.seal[0] - 1000.0).abs() < 1e-9);
    assert!((second.r_series[0] - 4.0).abs() < 1e-9);
    assert!((second.v_offset - 10.0).abs() < 1e-9);
    let groups = &cell.pharmacology["Activation"].groups;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].comp_name, "?EC?");
    assert_eq!(groups[0].data_ref, DataRef::new("Activation", 1));

    // Drugs: one repetition split at the application time
    let drugs = &cell.repetitions["Drugs"];
    assert_eq!(drugs.len(), 1);
    assert_eq!(drugs[&1].n_sweeps(), 6);
    let groups = &cell.pharmacology["Drugs"].groups;
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].trace_ids, vec![0, 1, 2]);
    assert_eq!(groups[1].trace_ids, vec![3, 4, 5]);
    assert_eq!(groups[1].comp_name, "Flecainide");
    assert_eq!(groups[1].comp_conc, 3.0);
    assert_eq!(groups[1].comp_time, 15.0);
    assert!(groups[1].trace_disregarded.iter().all(|d| !*d));
}

#[test]
fn test_second_run_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, config) = synthetic_experiment(dir.path());
    let ConversionOutcome::Created(paths) = convert_to_nwb(&exp, &config, None).unwrap() else {
        panic!("first run should create containers");
    };
    let modified = std::fs::metadata(&paths[0]).unwrap().modified().unwrap();

    let outcome = convert_to_nwb(&exp, &config, None).unwrap();
    match outcome {
        ConversionOutcome::Skipped {
            complete,
            incomplete,
        } => {
            assert_eq!(complete.len(), 16);
            assert!(incomplete.is_empty());
        }
        other => panic!("expected a skipped run, got {other:?}"),
    }
    assert_eq!(
        std::fs::metadata(&paths[0]).unwrap().modified().unwrap(),
        modified
    );

    // overwrite rebuilds every container
    let config = config.with_overwrite(true);
    let outcome = convert_to_nwb(&exp, &config, None).unwrap();
    assert!(matches!(outcome, ConversionOutcome::Created(ref p) if p.len() == 16));
}

#[test]
fn test_unvalidated_containers_are_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, mut config) = synthetic_experiment(dir.path());
    config.validate = false;
    let ConversionOutcome::Created(paths) = convert_to_nwb(&exp, &config, None).unwrap() else {
        panic!("first run should create containers");
    };
    assert_eq!(container_state(&paths[0]), ContainerState::Filled);

    match convert_to_nwb(&exp, &config, None).unwrap() {
        ConversionOutcome::Skipped {
            complete,
            incomplete,
        } => {
            assert!(complete.is_empty());
            assert_eq!(incomplete.len(), 16);
        }
        other => panic!("expected a skipped run, got {other:?}"),
    }
}

#[test]
fn test_missing_user_metadata_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, config) = synthetic_experiment(dir.path());
    std::fs::remove_file(exp.join(format!("{EXPERIMENT}.ini"))).unwrap();
    let result = convert_to_nwb(&exp, &config, None);
    assert!(matches!(
        result,
        Err(ConversionError::ExperimentError(
            ExperimentError::UserMetadataError(UserMetadataError::MissingFile(_))
        ))
    ));
    assert!(!config.rcell_directory().exists());
}

#[test]
fn test_empty_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, config) = synthetic_experiment(dir.path());
    // no measured column
    let header = json!({
        "DatasetIdentifier": {"PatchPlateInTime": "2023-05-12T09:30:00.0Z"},
        "TraceHeader": {"MeasurementLayout": {"nCols": 1, "ColsMeasured": [-1]}}
    });
    std::fs::write(
        exp.join("EBoardCheck_000").join("header.json"),
        header.to_string(),
    )
    .unwrap();
    assert_eq!(
        convert_to_nwb(&exp, &config, None).unwrap(),
        ConversionOutcome::Empty
    );
}

#[test]
fn test_header_gaps_are_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, config) = synthetic_experiment(dir.path());
    edit_header(&exp.join("Drugs_003"), |header| {
        header["TraceHeader"]["TimeScaling"]["SweepTime"][0][4] = Value::Null;
    });
    edit_header(&exp.join("Activation_002"), |header| {
        header["TraceHeader"]["TimeScaling"]["I2DScale"][1] = Value::Null;
    });

    let ConversionOutcome::Created(paths) = convert_to_nwb(&exp, &config, None).unwrap() else {
        panic!("header gaps should not stop the conversion");
    };
    for path in paths.iter() {
        assert_eq!(container_state(path), ContainerState::Validated);
    }

    let cell = RCellReader::load(&container_of(&config, "B1")).unwrap();
    // the sweep without a time stays with the compound applied before it
    let drugs = &cell.repetitions["Drugs"][&1];
    assert!(drugs.trace_times[4].is_nan());
    assert_eq!(drugs.trace_times[5], 25000.0);
    let groups = &cell.pharmacology["Drugs"].groups;
    assert_eq!(groups[0].trace_ids, vec![0, 1, 2]);
    assert_eq!(groups[1].trace_ids, vec![3, 4, 5]);
    assert!(groups[1].trace_times[1].is_nan());

    // well B1 has no scale in Activation
    let activation = &cell.repetitions["Activation"][&1];
    assert!(activation.data.iter().all(|v| v.is_nan()));
    let other = RCellReader::load(&container_of(&config, "A1")).unwrap();
    assert_eq!(other.repetitions["Activation"][&1].data[[0, 0]], 0.0);
    assert_eq!(other.repetitions["Activation"][&1].data[[0, 1]], 50.0);
}

#[test]
fn test_truncated_trace_file_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, config) = synthetic_experiment(dir.path());
    let trace = exp.join("Drugs_003").join("Tracedata_0.dat");
    let mut bytes = std::fs::read(&trace).unwrap();
    bytes.truncate(bytes.len() - 2);
    std::fs::write(&trace, bytes).unwrap();

    let result = convert_to_nwb(&exp, &config, None);
    assert!(matches!(
        result,
        Err(ConversionError::ProtocolDataError {
            source: ProtocolDataError::TraceFileError(TraceFileError::BadFileLength { .. }),
            ..
        })
    ));
    // skeletons are left behind unvalidated
    assert_eq!(
        container_state(&container_of(&config, "B1")),
        ContainerState::Created
    );
}

#[test]
fn test_extra_sweep_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let (exp, config) = synthetic_experiment(dir.path());
    // one more whole sweep than the 10 declared by Activation
    let trace = exp.join("Activation_002").join("Tracedata_1.dat");
    let mut bytes = std::fs::read(&trace).unwrap();
    bytes.extend(std::iter::repeat(0u8).take(16 * N_SAMPLES * 2));
    std::fs::write(&trace, bytes).unwrap();

    let result = convert_to_nwb(&exp, &config, None);
    assert!(matches!(
        result,
        Err(ConversionError::ProtocolDataError {
            source: ProtocolDataError::SweepOutOfRange {
                sweep: 10,
                capacity: 10,
                ..
            },
            ..
        })
    ));
    let state = container_state(&container_of(&config, "A1"));
    assert_ne!(state, ContainerState::Validated);
    assert_eq!(state, ContainerState::Created);
}
