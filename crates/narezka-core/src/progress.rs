use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

/// Pipeline phases in execution order. Percent ranges are fixed per phase
/// so consumers can render one continuous bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    ExtractingAudio,
    GeneratingTranscription,
    AnalyzingWithAi,
    Finalizing,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::ExtractingAudio => "extracting_audio",
            Phase::GeneratingTranscription => "generating_transcription",
            Phase::AnalyzingWithAi => "analyzing_with_ai",
            Phase::Finalizing => "finalizing",
            Phase::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub percent: u8,
    pub message: String,
}

/// Bounded producer side of the worker-to-UI progress queue. Sending never
/// blocks the pipeline: a full or disconnected queue drops the update.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards every update, for headless callers and tests.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Create a sink together with its consumer end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn send(&self, phase: Phase, percent: u8, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(ProgressUpdate {
                phase,
                percent: percent.min(100),
                message: message.into(),
            });
        }
    }
}

/// Cooperative cancellation flag checked at phase boundaries and inside the
/// transcription streaming loop. Does not interrupt a network call already
/// in flight.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_updates_instead_of_blocking() {
        let (sink, mut rx) = ProgressSink::channel(1);
        sink.send(Phase::ExtractingAudio, 10, "one");
        sink.send(Phase::ExtractingAudio, 20, "two");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.percent, 10);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn percent_is_capped_at_one_hundred() {
        let (sink, mut rx) = ProgressSink::channel(4);
        sink.send(Phase::Complete, 150, "done");
        assert_eq!(rx.try_recv().unwrap().percent, 100);
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
