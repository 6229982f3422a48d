use ndarray::{s, Array2, Array4};

use super::compound::CompoundTimeline;
use super::constants::N_ROWS;
use super::error::ProtocolDataError;
use super::protocol::{CellQc, ProtocolMetadata};
use super::rcell_writer::{DataRef, Pharmacology, PharmacologyGroup, RCellWriter, Repetition};
use super::trace_file::TraceStack;
use super::well::WellID;

/// The traces of every cell of one protocol, shaped [cells, samples, repetitions, sweeps]
#[derive(Debug)]
pub struct ProtocolData {
    data: Array4<f64>,
}

impl ProtocolData {
    /// Stream every trace file of a protocol into memory.
    ///
    /// In leak-subtraction mode only the leak-corrected half of each block is kept.
    pub fn load(protocol: &ProtocolMetadata) -> Result<Self, ProtocolDataError> {
        let n_cells = (protocol.n_cols * N_ROWS).max(protocol.scales.len());
        let n_sweeps = protocol.sweeps_per_repetition();
        let n_repetitions = protocol.n_repetitions();
        let mut data =
            Array4::<f64>::zeros((n_cells, protocol.n_samples, n_repetitions, n_sweeps));

        let layout = protocol.trace_layout();
        let mut stack = TraceStack::new(&protocol.folder, protocol.trace_files(), &layout)?;
        log::info!(
            "Protocol {} has {} of trace data in {} files",
            protocol.name,
            human_bytes::human_bytes(stack.total_stack_size_bytes as f64),
            protocol.trace_files().len()
        );

        while let Some(file) = stack.next_file()? {
            for block in file.blocks() {
                let repetition = block.sweep.checked_div(n_sweeps).unwrap_or(usize::MAX);
                if repetition >= n_repetitions {
                    return Err(ProtocolDataError::SweepOutOfRange {
                        sweep: block.sweep,
                        capacity: n_repetitions * n_sweeps,
                        protocol: protocol.name.clone(),
                    });
                }
                let sweep = block.sweep % n_sweeps;
                let well = layout.recorded_wells[block.cell];
                let trace = block.leak.unwrap_or(block.samples);
                for (sample, value) in trace.into_iter().enumerate() {
                    data[[well, sample, repetition, sweep]] = value;
                }
            }
        }

        if stack.get_sweeps_read() < protocol.n_measured_sweeps {
            log::warn!(
                "Protocol {} declares {} sweeps but its trace files hold {}; missing sweeps are zero",
                protocol.name,
                protocol.n_measured_sweeps,
                stack.get_sweeps_read()
            );
        }

        Ok(Self { data })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Traces of one cell over one repetition window, [samples, sweeps]
    fn traces(
        &self,
        protocol: &ProtocolMetadata,
        well: &WellID,
        repetition: usize,
        n_sweeps: usize,
    ) -> Result<Array2<f64>, ProtocolDataError> {
        if well.cell_id >= self.data.shape()[0] {
            return Err(ProtocolDataError::WellNotRecorded(
                well.label(),
                protocol.name.clone(),
            ));
        }
        Ok(self
            .data
            .slice(s![well.cell_id, .., repetition - 1, 0..n_sweeps])
            .to_owned())
    }

    /// Build repetition `repetition` (one based) of a cell along with its QC record
    pub fn repetition(
        &self,
        protocol: &ProtocolMetadata,
        well: &WellID,
        repetition: usize,
    ) -> Result<(Repetition, CellQc), ProtocolDataError> {
        let window = protocol.qc_window(repetition as i64);
        let qc = protocol.cell_qc(well, &window);
        let n_sweeps = window.len();
        let record = Repetition {
            capacitance_slow: qc.capacitance.clone(),
            seal: qc.seal.clone(),
            r_series: qc.r_series.clone(),
            time: protocol.time_axis.iter().map(|t| *t as u32).collect(),
            x_start: vec![0; n_sweeps],
            x_interval: protocol.x_interval(),
            v_offset: qc.v_offset,
            trace_times: qc.trace_times.clone(),
            head_temp: 0.0,
            n_points: Array2::from_elem((n_sweeps, 1), protocol.n_samples as u64),
            data: self.traces(protocol, well, repetition, n_sweeps)?,
        };
        Ok((record, qc))
    }

    /// One group per compound event of the cell.
    ///
    /// Drugs events split the sweeps of the single repetition by application time; any
    /// other protocol pairs event K with repetition K.
    pub fn pharmacology(
        protocol: &ProtocolMetadata,
        timeline: &CompoundTimeline,
        repetitions: &[(Repetition, CellQc)],
    ) -> Result<Pharmacology, ProtocolDataError> {
        let stim_type = protocol.stim_type();
        if repetitions.is_empty() {
            log::warn!("Protocol {} has no measured sweeps", protocol.name);
            return Ok(Pharmacology::default());
        }
        let mut groups = Vec::with_capacity(timeline.events.len());

        if protocol.stimulus.is_drugs() {
            let (repetition, qc) = &repetitions[0];
            let selections = timeline.trace_ranges(&repetition.trace_times);
            for (event, selection) in timeline.events.iter().zip(selections) {
                let trace_disregarded = selection
                    .trace_ids
                    .iter()
                    .map(|id| qc.disregarded[*id as usize])
                    .collect();
                groups.push(PharmacologyGroup {
                    comp_name: event.display_name().to_string(),
                    comp_conc: event.concentration_value()?,
                    comp_time: event.timestamp,
                    data_ref: DataRef::new(stim_type, 1),
                    trace_ids: selection.trace_ids,
                    trace_times: selection.trace_times,
                    trace_disregarded,
                });
            }
        } else {
            for (index, event) in timeline.events.iter().enumerate() {
                let referenced = (index + 1).min(repetitions.len());
                if referenced != index + 1 {
                    log::warn!(
                        "Protocol {} has {} compound events for {} repetitions; event {} refers to repetition {}",
                        protocol.name,
                        timeline.events.len(),
                        repetitions.len(),
                        index + 1,
                        referenced
                    );
                }
                let (repetition, qc) = &repetitions[referenced - 1];
                groups.push(PharmacologyGroup {
                    comp_name: event.display_name().to_string(),
                    comp_conc: event.concentration_value()?,
                    comp_time: event.timestamp,
                    data_ref: DataRef::new(stim_type, referenced),
                    trace_ids: (0..repetition.n_sweeps() as u64).collect(),
                    trace_times: repetition.trace_times.clone(),
                    trace_disregarded: qc.disregarded.clone(),
                });
            }
        }

        Ok(Pharmacology {
            comp_list: timeline.list_entries(),
            groups,
        })
    }

    /// Write every repetition and the pharmacology of one cell into its container
    pub fn fill_container(
        &self,
        protocol: &ProtocolMetadata,
        writer: &RCellWriter,
        well: &WellID,
    ) -> Result<(), ProtocolDataError> {
        let stim_type = protocol.stim_type();
        let mut repetitions = Vec::with_capacity(protocol.n_repetitions());
        for index in 1..=protocol.n_repetitions() {
            let (repetition, qc) = self.repetition(protocol, well, index)?;
            writer.write_repetition(stim_type, index, &repetition)?;
            repetitions.push((repetition, qc));
        }

        let timeline = CompoundTimeline::build(
            &protocol.header,
            stim_type,
            well,
            protocol.n_measured_sweeps,
        )?;
        let pharmacology = Self::pharmacology(protocol, &timeline, &repetitions)?;
        writer.write_pharmacology(stim_type, &pharmacology)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StimulusTable;
    use crate::user_metadata::UserMetadata;
    use serde_json::json;
    use std::path::{Path, PathBuf};

    const N_SAMPLES: usize = 3;

    // One measured column, leak-subtraction mode. The leak half of every block holds
    // sweep * 10 + cell, the signal half holds 1.
    fn write_protocol(
        dir: &Path,
        folder: &str,
        n_measured: usize,
        n_file_sweeps: usize,
    ) -> PathBuf {
        let path = dir.join(folder);
        std::fs::create_dir_all(&path).unwrap();
        let layout_wash: Vec<Vec<i64>> = vec![vec![-1]; 16];
        let layout_drug: Vec<Vec<i64>> = vec![vec![0]; 16];
        let conc = vec![vec![json!(2)]; 16];
        let header = json!({
            "DatasetIdentifier": {"DataName": folder},
            "TraceHeader": {
                "MeasurementLayout": {
                    "NofSweeps": n_measured, "Leakdata": 2, "NofSamples": N_SAMPLES,
                    "nCols": 1, "ColsMeasured": [0]
                },
                "FileInformation": {"FileList": ["Tracedata_0.dat"]},
                "TimeScaling": {
                    "I2DScale": vec![2.0; 16],
                    "TR_Time": [0.0, 0.5, 1.0],
                    "SweepTime": [[0.0, 5.0, 10.0, 15.0]]
                }
            },
            "QCData": {"DisregardedSweeps": [false, true, false, false]},
            "CompTable": {"TableData": [["Flecainide"]]},
            "CompoundAddition": {
                "Sweep2CompIndex": [0, 0, 1, 1],
                "CompStateProt": [
                    {"CompPlateBarcode": "", "Timestamp_s": 0.0,
                     "CompLayout": layout_wash, "Concentration": conc.clone()},
                    {"CompPlateBarcode": "", "Timestamp_s": 7.5,
                     "CompLayout": layout_drug, "Concentration": conc}
                ]
            }
        });
        std::fs::write(path.join("header.json"), header.to_string()).unwrap();

        let mut bytes = Vec::new();
        for sweep in 0..n_file_sweeps {
            for cell in 0..16 {
                for _ in 0..N_SAMPLES {
                    bytes.extend_from_slice(&1i16.to_le_bytes());
                }
                for _ in 0..N_SAMPLES {
                    bytes.extend_from_slice(&((sweep * 10 + cell) as i16).to_le_bytes());
                }
            }
        }
        std::fs::write(path.join("Tracedata_0.dat"), bytes).unwrap();
        path
    }

    fn stimuli() -> StimulusTable {
        let ini = "[Stimulus]\nActivation = Activation,12,2\nDrugs = Drugs,30,1\n";
        StimulusTable::new(&UserMetadata::parse(ini).unwrap())
    }

    #[test]
    fn test_load_keeps_leak_half() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_protocol(dir.path(), "Drugs_001", 4, 4);
        let protocol = ProtocolMetadata::read(&path, &stimuli()).unwrap();
        let data = ProtocolData::load(&protocol).unwrap();
        assert_eq!(data.shape(), &[16, N_SAMPLES, 1, 4]);

        let (repetition, _) = data.repetition(&protocol, &WellID::new(5), 1).unwrap();
        assert_eq!(repetition.data.dim(), (N_SAMPLES, 4));
        assert_eq!(repetition.data[[0, 2]], 50.0);
        assert_eq!(repetition.time, vec![0, 500_000, 1_000_000]);
        assert_eq!(repetition.x_interval, 500_000);
        assert_eq!(repetition.trace_times, vec![0.0, 5000.0, 10000.0, 15000.0]);
        assert_eq!(repetition.n_points.dim(), (4, 1));
        assert!(repetition.capacitance_slow.iter().all(|c| c.is_nan()));
    }

    #[test]
    fn test_extra_sweeps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_protocol(dir.path(), "Drugs_001", 2, 4);
        let protocol = ProtocolMetadata::read(&path, &stimuli()).unwrap();
        assert!(matches!(
            ProtocolData::load(&protocol),
            Err(ProtocolDataError::SweepOutOfRange { sweep: 2, .. })
        ));
    }

    #[test]
    fn test_drugs_groups_split_the_repetition() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_protocol(dir.path(), "Drugs_001", 4, 4);
        let protocol = ProtocolMetadata::read(&path, &stimuli()).unwrap();
        let data = ProtocolData::load(&protocol).unwrap();
        let well = WellID::new(5);
        let repetitions = vec![data.repetition(&protocol, &well, 1).unwrap()];
        let timeline = CompoundTimeline::build(&protocol.header, "Drugs", &well, 4).unwrap();

        let pharmacology = ProtocolData::pharmacology(&protocol, &timeline, &repetitions).unwrap();
        assert_eq!(pharmacology.comp_list, vec!["Drugs::2:0.0", "Drugs:Flecainide:2:7.5"]);
        let groups = &pharmacology.groups;
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].comp_name, "?EC?");
        assert_eq!(groups[0].trace_ids, vec![0, 1]);
        assert_eq!(groups[0].trace_disregarded, vec![false, true]);
        assert_eq!(groups[1].comp_name, "Flecainide");
        assert_eq!(groups[1].comp_conc, 2.0);
        assert_eq!(groups[1].trace_ids, vec![2, 3]);
        assert_eq!(groups[1].trace_times, vec![10000.0, 15000.0]);
        assert!(groups.iter().all(|g| g.data_ref == DataRef::new("Drugs", 1)));
    }

    #[test]
    fn test_groups_follow_repetitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_protocol(dir.path(), "Activation_001", 4, 4);
        let protocol = ProtocolMetadata::read(&path, &stimuli()).unwrap();
        let data = ProtocolData::load(&protocol).unwrap();
        assert_eq!(data.shape(), &[16, N_SAMPLES, 2, 2]);

        let well = WellID::new(0);
        let repetitions: Vec<(Repetition, CellQc)> = (1..=2)
            .map(|rep| data.repetition(&protocol, &well, rep).unwrap())
            .collect();
        assert_eq!(repetitions[1].0.data[[1, 1]], 60.0);
        assert_eq!(repetitions[1].0.trace_times, vec![10000.0, 15000.0]);

        let timeline = CompoundTimeline::build(&protocol.header, "Activation", &well, 4).unwrap();
        let pharmacology = ProtocolData::pharmacology(&protocol, &timeline, &repetitions).unwrap();
        assert_eq!(pharmacology.groups.len(), 2);
        assert_eq!(pharmacology.groups[1].data_ref, DataRef::new("Activation", 2));
        assert_eq!(pharmacology.groups[1].trace_ids, vec![0, 1]);
        assert_eq!(pharmacology.groups[1].trace_times, vec![10000.0, 15000.0]);
        assert_eq!(pharmacology.groups[0].trace_disregarded, vec![false, true]);
    }
}
