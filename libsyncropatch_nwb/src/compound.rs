use super::constants::{SWEEP_TIME_SCALE, WASH_MARKER};
use super::error::CompoundError;
use super::protocol::{value_to_string, ProtocolHeader};
use super::well::WellID;

/// One application of a compound (or solution) to a cell
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundEvent {
    pub stim_type: String,
    pub name: String,
    pub concentration: String,
    /// Application time in seconds
    pub timestamp: f64,
}

impl CompoundEvent {
    /// True when two events describe the same application
    fn same_application(&self, other: &CompoundEvent) -> bool {
        self.name == other.name
            && self.concentration == other.concentration
            && self.timestamp == other.timestamp
    }

    /// Name as stored in the container; a nameless application is a wash
    pub fn display_name(&self) -> &str {
        normalize_name(&self.name)
    }

    /// Numeric concentration as stored in the container
    pub fn concentration_value(&self) -> Result<f64, CompoundError> {
        let normalized = normalize_concentration(&self.concentration);
        normalized
            .parse()
            .map_err(|_| CompoundError::BadConcentration(self.concentration.clone()))
    }

    /// Entry of the compound list, <stim>:<name>:<concentration>:<time>
    pub fn list_entry(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.stim_type,
            self.name,
            self.concentration,
            format_timestamp(self.timestamp)
        )
    }
}

/// Empty names mark a wash with extracellular solution
pub fn normalize_name(name: &str) -> &str {
    if name.is_empty() {
        WASH_MARKER
    } else {
        name
    }
}

/// Empty and None concentrations mean no compound
pub fn normalize_concentration(concentration: &str) -> &str {
    if concentration.is_empty() || concentration == "None" {
        "0"
    } else {
        concentration
    }
}

/// Whole timestamps keep a trailing .0 so list entries read like the instrument header
fn format_timestamp(timestamp: f64) -> String {
    if timestamp.is_finite() && timestamp.fract() == 0.0 {
        format!("{timestamp:.1}")
    } else {
        format!("{timestamp}")
    }
}

/// The compound applied to a well during a sweep
pub fn compound_at(
    header: &ProtocolHeader,
    stim_type: &str,
    well: &WellID,
    sweep: usize,
) -> Result<CompoundEvent, CompoundError> {
    let addition = &header.compound_addition;
    let data_name = &header.dataset_identifier.data_name;
    let index = *addition
        .sweep_to_comp_index
        .get(sweep)
        .ok_or(CompoundError::SweepNotFound {
            sweep,
            data_name: data_name.clone(),
        })?;
    let state = addition
        .comp_state_prot
        .get(index)
        .ok_or(CompoundError::StateNotFound {
            index,
            sweep,
            data_name: data_name.clone(),
        })?;

    let layout = *state
        .comp_layout
        .get(well.row)
        .and_then(|row| row.get(well.col))
        .ok_or(CompoundError::WellOutOfLayout(well.label()))?;
    let concentration = state
        .concentration
        .get(well.row)
        .and_then(|row| row.get(well.col))
        .map(value_to_string)
        .ok_or(CompoundError::WellOutOfLayout(well.label()))?;

    // A negative layout entry means the well only saw the plate's solution
    let name = if layout >= 0 {
        header
            .comp_table
            .table_data
            .get(layout as usize)
            .and_then(|entry| entry.first())
            .map(value_to_string)
            .ok_or(CompoundError::CompoundOutOfTable(layout))?
    } else {
        value_to_string(&state.comp_plate_barcode)
    };

    Ok(CompoundEvent {
        stim_type: stim_type.to_string(),
        name,
        concentration,
        timestamp: state.timestamp,
    })
}

/// Sweeps owned by one compound event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceSelection {
    pub trace_ids: Vec<u64>,
    pub trace_times: Vec<f64>,
}

/// The ordered compound applications of one well during one protocol
#[derive(Debug, Clone, Default)]
pub struct CompoundTimeline {
    pub stim_type: String,
    pub events: Vec<CompoundEvent>,
}

impl CompoundTimeline {
    /// Scan the sweeps of a protocol and keep every change of compound.
    ///
    /// The first sweep always opens an event; later sweeps only when the
    /// (name, concentration, timestamp) differs from the previous one.
    pub fn build(
        header: &ProtocolHeader,
        stim_type: &str,
        well: &WellID,
        n_measured_sweeps: usize,
    ) -> Result<Self, CompoundError> {
        let mut events: Vec<CompoundEvent> = vec![compound_at(header, stim_type, well, 0)?];
        for sweep in 1..n_measured_sweeps {
            let event = compound_at(header, stim_type, well, sweep)?;
            let changed = events
                .last()
                .is_some_and(|last| !last.same_application(&event));
            if changed {
                log::debug!(
                    "Well {} protocol {} sweep {}: compound {} conc {} time {}",
                    well,
                    stim_type,
                    sweep,
                    event.name,
                    event.concentration,
                    event.timestamp
                );
                events.push(event);
            }
        }
        Ok(Self {
            stim_type: stim_type.to_string(),
            events,
        })
    }

    pub fn list_entries(&self) -> Vec<String> {
        self.events.iter().map(|e| e.list_entry()).collect()
    }

    /// Split the sweeps of a repetition between the events by application time.
    ///
    /// Event k owns the sweeps whose trace time falls in [t_k, t_k+1), the last event
    /// owns everything after it and the first everything before. Trace times are in ms,
    /// timestamps in s. A sweep without a trace time (NaN) stays with the event of the
    /// sweep before it.
    pub fn trace_ranges(&self, trace_times: &[f64]) -> Vec<TraceSelection> {
        let bounds: Vec<f64> = self
            .events
            .iter()
            .map(|e| e.timestamp * SWEEP_TIME_SCALE)
            .collect();
        let mut selections = vec![TraceSelection::default(); self.events.len()];
        if selections.is_empty() {
            return selections;
        }
        let mut owner = 0;
        for (id, time) in trace_times.iter().enumerate() {
            if time.is_nan() {
                log::warn!(
                    "Protocol {} sweep {} has no trace time, it is kept with compound event {}",
                    self.stim_type,
                    id,
                    owner + 1
                );
            } else {
                // the first event has no lower bound
                owner = bounds
                    .iter()
                    .skip(1)
                    .take_while(|start| *time >= **start)
                    .count();
            }
            selections[owner].trace_ids.push(id as u64);
            selections[owner].trace_times.push(*time);
        }
        selections
    }
}

/// Sort compound list entries by their application time
pub fn sort_list_entries(entries: &mut [String]) {
    let time_of = |entry: &String| -> f64 {
        entry
            .rsplit(':')
            .next()
            .and_then(|t| t.parse().ok())
            .unwrap_or(f64::INFINITY)
    };
    entries.sort_by(|a, b| time_of(a).total_cmp(&time_of(b)));
}
