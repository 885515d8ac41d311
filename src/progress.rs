use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Fetching,
    Extracting,
    Installing,
    Uninstalling,
    RollingBack,
    Done,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Fetching => "fetching",
            Phase::Extracting => "extracting",
            Phase::Installing => "installing",
            Phase::Uninstalling => "uninstalling",
            Phase::RollingBack => "rolling back",
            Phase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub current: Option<String>,
    pub bytes: (u64, u64), // downloaded .. out of .. bytes
    pub files: (u64, u64), // written .. out of .. files
}

impl StatusSnapshot {
    /// Percentage of the active phase, when its total is known.
    pub fn percent(&self) -> Option<u8> {
        let (done, total) = match self.phase {
            Phase::Fetching => self.bytes,
            _ => self.files,
        };
        if total == 0 {
            return None;
        }
        Some(((done.min(total) * 100) / total) as u8)
    }
}

/// Shared polling handle for a long-running fetch or install. Clones observe
/// the same state; `cancel` is honoured at the next safe point.
#[derive(Debug, Clone, Default)]
pub struct OperationStatus {
    inner: Arc<Mutex<StatusSnapshot>>,
    cancelled: Arc<AtomicBool>,
}

impl OperationStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn set_phase(&self, phase: Phase) {
        let mut state = self.lock();
        state.phase = phase;
        state.current = None;
    }

    pub fn start_files(&self, phase: Phase, total: usize) {
        let mut state = self.lock();
        state.phase = phase;
        state.files = (0, total as u64);
        state.current = None;
    }

    pub fn file_done(&self, path: &str) {
        let mut state = self.lock();
        state.files.0 += 1;
        state.current = Some(path.to_string());
    }

    pub fn start_download(&self, name: &str, total: Option<u64>) {
        let mut state = self.lock();
        state.phase = Phase::Fetching;
        state.bytes = (0, total.unwrap_or(0));
        state.current = Some(name.to_string());
    }

    pub fn add_bytes(&self, amount: u64) {
        self.lock().bytes.0 += amount;
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state_and_cancellation() {
        let status = OperationStatus::new();
        let observer = status.clone();
        status.start_files(Phase::Installing, 4);
        status.file_done("fonts/a.ttf");
        status.cancel();

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.phase, Phase::Installing);
        assert_eq!(snapshot.files, (1, 4));
        assert_eq!(snapshot.percent(), Some(25));
        assert_eq!(snapshot.current.as_deref(), Some("fonts/a.ttf"));
        assert!(observer.is_cancelled());
    }

    #[test]
    fn percent_unknown_without_total() {
        let status = OperationStatus::new();
        status.start_download("bundle.zip", None);
        status.add_bytes(1024);
        assert_eq!(status.snapshot().percent(), None);
    }
}
