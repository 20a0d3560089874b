//! In-memory transport and pacer shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::batch::Pacer;
use crate::error::{ApiError, Result};
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::Transport;

/// Replays canned responses and records every request it receives.
#[derive(Clone, Default)]
pub(crate) struct Canned {
    responses: Arc<Mutex<VecDeque<HttpResponse>>>,
    seen: Arc<Mutex<Vec<HttpRequest>>>,
}

impl Canned {
    pub(crate) fn with(responses: impl IntoIterator<Item = HttpResponse>) -> Self {
        let canned = Self::default();
        canned.responses.lock().unwrap().extend(responses);
        canned
    }

    pub(crate) fn seen(&self) -> Vec<HttpRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Transport for Canned {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self.seen.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ApiError::Transport("no canned response left".to_string()))
    }
}

/// Records requested pauses instead of sleeping.
#[derive(Clone, Default)]
pub(crate) struct RecordingPacer(Arc<Mutex<Vec<Duration>>>);

impl RecordingPacer {
    pub(crate) fn pauses(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

impl Pacer for RecordingPacer {
    fn pause(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}
