use crate::state::{TranscriptRequest, TranscriptResult};
use ocm_core::transcript::{TranscriptStore, TranscriptView};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runs transcript reads on the blocking pool, one at a time.
///
/// A started read cannot be interrupted, so instead of piling up reads the
/// reader keeps a single queued request and lets the newest one replace it.
pub struct TranscriptReader {
    store: TranscriptStore,
    in_flight: Option<(String, JoinHandle<TranscriptView>)>,
    queued: Option<TranscriptRequest>,
}

impl TranscriptReader {
    pub fn new(store: TranscriptStore) -> Self {
        Self {
            store,
            in_flight: None,
            queued: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn request(&mut self, request: TranscriptRequest) {
        if let Some(replaced) = self.queued.replace(request) {
            debug!("transcript_request_replaced: {}", replaced.session_key);
        }
        self.start_queued();
    }

    fn start_queued(&mut self) {
        if self.is_busy() {
            return;
        }
        let Some(request) = self.queued.take() else {
            return;
        };
        let store = self.store.clone();
        let session_key = request.session_key.clone();
        let handle = tokio::task::spawn_blocking(move || {
            TranscriptView::from(store.transcript_for(&request.record, request.limit))
        });
        self.in_flight = Some((session_key, handle));
    }

    /// Resolves when the running read completes and starts the queued one.
    /// Never resolves while idle. Cancel-safe: dropping the future leaves the
    /// read in place for the next call.
    pub async fn finished(&mut self) -> TranscriptResult {
        let Some((_, handle)) = self.in_flight.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        let session_key = match self.in_flight.take() {
            Some((session_key, _)) => session_key,
            None => String::new(),
        };
        let view = match joined {
            Ok(view) => view,
            Err(err) => {
                warn!("transcript_read_failed: {session_key}: {err}");
                TranscriptView::Empty
            }
        };
        self.start_queued();
        TranscriptResult { session_key, view }
    }
}
