//! Acknowledgement gathering for broadcasts that expect client replies.
//!
//! The caller wants a single terminal callback that fires when either every
//! expected reply has arrived or the deadline elapsed — without knowing up
//! front how many servers will report, nor how many clients each notifies.
//! Server counts arrive through per-server reports; the local server count
//! is recorded only after dispatch returns, which also covers the case of a
//! broadcast that reached nobody.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;

use crate::error::AckError;
use crate::packet::Payload;

/// Terminal callback for an ack-gathering emit. Fired exactly once, with
/// either every reply or, on deadline, the partial list inside the error.
pub type AckCallback = Box<dyn FnOnce(Result<Vec<Payload>, AckError>) + Send + 'static>;

struct AckState {
    responses: Vec<Payload>,
    timed_out: bool,
    /// Expected number of reporting servers; -1 until discovery completes.
    expected_servers: i64,
    actual_servers: i64,
    expected_clients: u64,
    callback: Option<AckCallback>,
    timer: Option<JoinHandle<()>>,
}

/// Collects per-client replies across an asynchronously discovered number of
/// servers and delivers one terminal callback on completion or deadline.
pub(crate) struct AckGatherer {
    state: Mutex<AckState>,
}

impl AckGatherer {
    /// Creates a gatherer and arms its deadline. A missing or zero timeout
    /// fires right after dispatch: "no deadline configured" fails fast
    /// rather than waiting forever. Must be called within a Tokio runtime.
    pub(crate) fn arm(timeout: Option<Duration>, callback: AckCallback) -> Arc<Self> {
        let gatherer = Arc::new(Self {
            state: Mutex::new(AckState {
                responses: Vec::new(),
                timed_out: false,
                expected_servers: -1,
                actual_servers: 0,
                expected_clients: 0,
                callback: Some(callback),
                timer: None,
            }),
        });
        let deadline = timeout.unwrap_or(Duration::ZERO);
        let target = Arc::clone(&gatherer);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            target.expire();
        });
        gatherer.lock().timer = Some(timer);
        gatherer
    }

    fn lock(&self) -> MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes the terminal callback iff every expected server has reported
    /// and every expected client has replied. The callback is invoked by the
    /// caller after the state lock is released.
    fn completion(state: &mut AckState) -> Option<(AckCallback, Vec<Payload>)> {
        if state.timed_out || state.callback.is_none() {
            return None;
        }
        if state.expected_servers != state.actual_servers
            || state.responses.len() as u64 != state.expected_clients
        {
            return None;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let responses = std::mem::take(&mut state.responses);
        state.callback.take().map(|callback| (callback, responses))
    }

    /// Handler for a per-server recipient count report.
    pub(crate) fn on_server_report(&self, clients: u64) {
        let done = {
            let mut state = self.lock();
            state.expected_clients += clients;
            state.actual_servers += 1;
            Self::completion(&mut state)
        };
        if let Some((callback, responses)) = done {
            callback(Ok(responses));
        }
    }

    /// Handler for a single client reply. Replies arriving after the
    /// deadline are dropped.
    pub(crate) fn on_client_reply(&self, mut reply: Vec<Payload>) {
        let done = {
            let mut state = self.lock();
            if state.timed_out || state.callback.is_none() {
                debug!("dropping ack reply received after completion");
                return;
            }
            state.responses.append(&mut reply);
            Self::completion(&mut state)
        };
        if let Some((callback, responses)) = done {
            callback(Ok(responses));
        }
    }

    /// Records the discovered server count once dispatch has returned and
    /// re-checks completion; this is what terminates a broadcast that
    /// reached zero recipients.
    pub(crate) fn finish_dispatch(&self, server_count: u64) {
        let done = {
            let mut state = self.lock();
            state.expected_servers = server_count as i64;
            Self::completion(&mut state)
        };
        if let Some((callback, responses)) = done {
            callback(Ok(responses));
        }
    }

    fn expire(&self) {
        let fired = {
            let mut state = self.lock();
            if state.callback.is_none() {
                return;
            }
            state.timed_out = true;
            state.timer = None;
            let responses = std::mem::take(&mut state.responses);
            state.callback.take().map(|callback| (callback, responses))
        };
        if let Some((callback, responses)) = fired {
            callback(Err(AckError::Timeout { responses }));
        }
    }
}
