use std::sync::Arc;

use tokio::sync::mpsc;

use crate::stats::RunStats;

/// Events surfaced to the observer (the CLI's progress printer). The
/// channel is bounded and sends never block: when the observer falls
/// behind, events are dropped and the drop is counted.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    VuStarted {
        vu: u64,
    },
    IterationStarted {
        vu: u64,
        iter: u64,
    },
    RequestCompleted {
        vu: u64,
        iter: u64,
        name: String,
        /// None for transport failures before any response.
        status: Option<u16>,
        latency_ms: f64,
        attempts: u32,
        error: Option<String>,
    },
    VuFinished {
        vu: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
    stats: Arc<RunStats>,
}

/// Default capacity of the progress channel.
pub const PROGRESS_CAPACITY: usize = 1024;

pub fn progress_channel(
    capacity: usize,
    stats: Arc<RunStats>,
) -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx, stats }, rx)
}

impl ProgressSender {
    /// Non-blocking emit; a full channel drops the event.
    pub fn emit(&self, event: ProgressEvent) {
        if self.tx.try_send(event).is_err() {
            self.stats.record_dropped_event();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let stats = Arc::new(RunStats::new());
        let (sender, mut rx) = progress_channel(1, stats.clone());

        sender.emit(ProgressEvent::VuStarted { vu: 1 });
        sender.emit(ProgressEvent::VuStarted { vu: 2 });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::VuStarted { vu: 1 }));

        let summary = stats.summarize(std::time::Duration::from_secs(1));
        assert_eq!(summary.dropped_events_total, 1);
    }
}
