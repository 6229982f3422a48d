/// The phase of a conversion run a status message refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Metadata,
    Protocol,
    Validation,
}

/// Progress report sent by a conversion run to whoever drives it (typically the CLI)
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub phase: Phase,
    pub label: String,
}

impl WorkerStatus {
    pub fn new(progress: f32, phase: Phase, label: &str) -> Self {
        Self {
            progress,
            phase,
            label: label.to_string(),
        }
    }
}
