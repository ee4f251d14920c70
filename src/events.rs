//! Per-job event log.
//!
//! [`EventLog`] is the append handle the orchestrator narrates through. Each
//! append is one durable insert and is mirrored to `tracing` at the matching
//! level. A failed append is returned to the caller.
//!
//! [`follow_events`] is the read side for live observers: a `Stream` that
//! yields every event of a job in insertion order, polling the store, and
//! ends once the job is terminal and every event has been delivered.

use crate::error::SyncError;
use crate::store::{EventType, Store, SyncEvent};
use futures::stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::{error, info, warn};

/// Append handle for one job's event stream.
#[derive(Debug, Clone)]
pub struct EventLog {
    store: Store,
    job_id: String,
}

impl EventLog {
    pub fn new(store: Store, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }

    /// Append one event of any type.
    pub async fn append(
        &self,
        event_type: EventType,
        message: impl AsRef<str>,
    ) -> Result<SyncEvent, SyncError> {
        let message = message.as_ref();
        match event_type {
            EventType::Info | EventType::Success => info!(job_id = %self.job_id, "{message}"),
            EventType::Warning => warn!(job_id = %self.job_id, "{message}"),
            EventType::Error => error!(job_id = %self.job_id, "{message}"),
        }
        self.store.append_event(&self.job_id, event_type, message).await
    }

    pub async fn info(&self, message: impl AsRef<str>) -> Result<SyncEvent, SyncError> {
        self.append(EventType::Info, message).await
    }

    pub async fn warning(&self, message: impl AsRef<str>) -> Result<SyncEvent, SyncError> {
        self.append(EventType::Warning, message).await
    }

    pub async fn error(&self, message: impl AsRef<str>) -> Result<SyncEvent, SyncError> {
        self.append(EventType::Error, message).await
    }

    pub async fn success(&self, message: impl AsRef<str>) -> Result<SyncEvent, SyncError> {
        self.append(EventType::Success, message).await
    }
}

/// A boxed stream of job events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SyncEvent, SyncError>> + Send>>;

struct FollowState {
    store: Store,
    job_id: String,
    poll_interval: Duration,
    last_id: i64,
    buffer: VecDeque<SyncEvent>,
    finished: bool,
}

/// Stream every event of `job_id`, then end once the job is terminal.
///
/// Events already in the store are yielded immediately. The stream yields a
/// single `Err` and ends if the job does not exist or a read fails.
pub fn follow_events(store: Store, job_id: impl Into<String>, poll_interval: Duration) -> EventStream {
    let state = FollowState {
        store,
        job_id: job_id.into(),
        poll_interval,
        last_id: 0,
        buffer: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.buffer.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            // Status first: a terminal job has already written its last event,
            // so the read that follows is guaranteed to drain it.
            let terminal = match state.store.get_job(&state.job_id).await {
                Ok(job) => job.status.is_terminal(),
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            };
            match state.store.events_after(&state.job_id, state.last_id).await {
                Ok(events) => {
                    if let Some(last) = events.last() {
                        state.last_id = last.id;
                    }
                    let empty = events.is_empty();
                    state.buffer.extend(events);
                    if terminal {
                        state.finished = true;
                    } else if empty {
                        tokio::time::sleep(state.poll_interval).await;
                    }
                }
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    }))
}
