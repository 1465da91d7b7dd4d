#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    RED,
    GREEN,
}

/// Progress message sent from a pipeline worker to whoever drives the progress bars
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    /// Fraction of this worker's intervals that are done
    pub progress: f32,
    pub intervals_done: usize,
    pub events_stored: usize,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(
        progress: f32,
        intervals_done: usize,
        events_stored: usize,
        worker_id: usize,
        color: BarColor,
    ) -> Self {
        Self {
            progress,
            intervals_done,
            events_stored,
            worker_id,
            color,
        }
    }
}
