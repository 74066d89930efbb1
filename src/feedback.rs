//! Feedback correlator
//!
//! Matches host responses to the requests waiting for them. Each pending
//! request owns a single-slot channel: the listener thread fills it, the
//! waiting caller drains it. Anything that is not an answer to a pending
//! request lands in the bounded unsolicited queue.

use chrono::{DateTime, Local};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::error::{CorrelationError, DecodeError, WaitError};
use crate::protocol::{correlation_id, Codec, Command, Payload, RESPONSE_TO_KEY};

/// Default unsolicited queue bound
pub const DEFAULT_UNSOLICITED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
}

/// A host answer to one request, without its `response_to` key
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: ResponseStatus,
    pub payload: Payload,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Error text reported by the host, if any
    pub fn message(&self) -> Option<&str> {
        self.payload
            .get("message")
            .or_else(|| self.payload.get("error"))
            .and_then(|v| v.as_str())
    }
}

/// Why a message ended up in the unsolicited queue
#[derive(Debug, Clone, PartialEq)]
pub enum UnsolicitedKind {
    /// ASYNC_UPDATE push from the host
    AsyncUpdate,
    /// Response to a request that is no longer (or never was) pending,
    /// or a duplicate answer
    StaleResponse,
    /// Response without a correlation id, or a non-reply command id
    Unexpected,
    /// Bytes that carried our header but failed to decode
    Malformed(DecodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unsolicited {
    pub received_at: DateTime<Local>,
    pub command_id: u8,
    pub payload: Payload,
    pub kind: UnsolicitedKind,
}

struct PendingSlot {
    tx: Sender<Response>,
    /// Taken by the caller currently waiting
    rx: Option<Receiver<Response>>,
}

struct Table {
    pending: HashMap<u16, PendingSlot>,
    next_id: u16,
}

pub struct FeedbackCorrelator {
    table: Mutex<Table>,
    unsolicited_tx: Sender<Unsolicited>,
    unsolicited_rx: Receiver<Unsolicited>,
    default_timeout: Duration,
    dropped: AtomicU64,
}

impl FeedbackCorrelator {
    pub fn new(default_timeout: Duration, unsolicited_capacity: usize) -> Self {
        let (unsolicited_tx, unsolicited_rx) = channel::bounded(unsolicited_capacity.max(1));
        Self {
            table: Mutex::new(Table {
                pending: HashMap::new(),
                next_id: 1,
            }),
            unsolicited_tx,
            unsolicited_rx,
            default_timeout,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    /// Unsolicited messages discarded because the queue was full
    pub fn dropped_unsolicited(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Allocate a request id and its pending slot
    ///
    /// Ids count up from 1, wrap, and skip 0 and ids still pending.
    pub fn register(&self) -> Result<u16, CorrelationError> {
        let mut table = self.table.lock();
        if table.pending.len() >= usize::from(u16::MAX) {
            return Err(CorrelationError::Exhausted);
        }

        loop {
            let id = table.next_id;
            table.next_id = match table.next_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if id != 0 && !table.pending.contains_key(&id) {
                let (tx, rx) = channel::bounded(1);
                table.pending.insert(id, PendingSlot { tx, rx: Some(rx) });
                trace!("Registered request {}", id);
                return Ok(id);
            }
        }
    }

    /// Block until the response for `id` arrives or `timeout` elapses
    ///
    /// The pending slot is removed before this returns, whatever the outcome.
    pub fn wait(&self, id: u16, timeout: Duration) -> Result<Response, WaitError> {
        let rx = {
            let mut table = self.table.lock();
            let slot = table
                .pending
                .get_mut(&id)
                .ok_or(CorrelationError::UnknownRequest(id))?;
            slot.rx.take().ok_or(CorrelationError::AlreadyWaiting(id))?
        };

        let started = Instant::now();
        let outcome = rx.recv_timeout(timeout);

        self.table.lock().pending.remove(&id);

        match outcome {
            Ok(response) => {
                debug!("Request {} answered after {:?}", id, started.elapsed());
                Ok(response)
            }
            Err(RecvTimeoutError::Timeout) => match rx.try_recv() {
                // Arrived between the timeout and the removal
                Ok(response) => Ok(response),
                Err(_) => {
                    let waited = started.elapsed();
                    warn!("Request {} timed out after {:?}", id, waited);
                    Err(WaitError::Timeout { request_id: id, waited })
                }
            },
            // Slot was cancelled while we waited
            Err(RecvTimeoutError::Disconnected) => {
                Err(CorrelationError::UnknownRequest(id).into())
            }
        }
    }

    /// Wait with the configured default timeout
    pub fn wait_default(&self, id: u16) -> Result<Response, WaitError> {
        self.wait(id, self.default_timeout)
    }

    /// Drop a request that will never be answered, e.g. because sending failed
    ///
    /// Returns false if the id was not pending.
    pub fn cancel(&self, id: u16) -> bool {
        let removed = self.table.lock().pending.remove(&id).is_some();
        if removed {
            debug!("Cancelled request {}", id);
        }
        removed
    }

    /// Route one decoded frame; called from the listener thread
    pub fn on_frame(&self, command_id: u8, payload: Payload) {
        let command = Command::from_id(command_id);

        let kind = match command {
            Some(Command::ResponseSuccess) | Some(Command::ResponseError) => {
                let status = if command == Some(Command::ResponseSuccess) {
                    ResponseStatus::Success
                } else {
                    ResponseStatus::Error
                };
                match correlation_id(&payload, RESPONSE_TO_KEY) {
                    Some(id) => match self.signal(id, status, &payload) {
                        Ok(()) => return,
                        Err(kind) => kind,
                    },
                    None => {
                        warn!("Response 0x{:02X} without {}", command_id, RESPONSE_TO_KEY);
                        UnsolicitedKind::Unexpected
                    }
                }
            }
            Some(Command::AsyncUpdate) => {
                debug!("Async update: {}", serde_json::Value::Object(payload.clone()));
                UnsolicitedKind::AsyncUpdate
            }
            _ => {
                warn!("Unexpected command 0x{:02X} from host", command_id);
                UnsolicitedKind::Unexpected
            }
        };

        self.push_unsolicited(Unsolicited {
            received_at: Local::now(),
            command_id,
            payload,
            kind,
        });
    }

    fn signal(&self, id: u16, status: ResponseStatus, payload: &Payload) -> Result<(), UnsolicitedKind> {
        let table = self.table.lock();
        let Some(slot) = table.pending.get(&id) else {
            warn!("Stale response for request {} (not pending)", id);
            return Err(UnsolicitedKind::StaleResponse);
        };

        let mut data = payload.clone();
        data.remove(RESPONSE_TO_KEY);

        match slot.tx.try_send(Response { status, payload: data }) {
            Ok(()) => {
                trace!("Signalled request {}", id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!("Duplicate response for request {}", id);
                Err(UnsolicitedKind::StaleResponse)
            }
            Err(TrySendError::Disconnected(_)) => Err(UnsolicitedKind::StaleResponse),
        }
    }

    /// Decode raw bytes from the listener and route them
    pub fn on_raw_frame(&self, bytes: &[u8], codec: &Codec) {
        match codec.decode(bytes) {
            Ok(frame) => self.on_frame(frame.command_id, frame.payload),
            Err(DecodeError::NotOurs) => trace!("Dropping foreign SysEx ({} bytes)", bytes.len()),
            Err(e) => {
                warn!("Malformed frame: {}", e);
                self.push_unsolicited(Unsolicited {
                    received_at: Local::now(),
                    command_id: bytes.get(codec.prefix().len()).copied().unwrap_or(0),
                    payload: Payload::new(),
                    kind: UnsolicitedKind::Malformed(e),
                });
            }
        }
    }

    fn push_unsolicited(&self, mut item: Unsolicited) {
        loop {
            match self.unsolicited_tx.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    // Oldest entry goes
                    if self.unsolicited_rx.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!("Unsolicited queue full, dropped oldest message");
                    }
                    item = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Take the next unsolicited message
    ///
    /// Non-blocking unless `blocking` is set; a blocking call without a
    /// timeout waits at most `default_timeout`.
    pub fn drain_unsolicited(&self, blocking: bool, timeout: Option<Duration>) -> Option<Unsolicited> {
        if !blocking {
            return self.unsolicited_rx.try_recv().ok();
        }
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.unsolicited_rx.recv_timeout(timeout).ok()
    }

    pub fn unsolicited_len(&self) -> usize {
        self.unsolicited_rx.len()
    }
}

impl Default for FeedbackCorrelator {
    fn default() -> Self {
        Self::new(Duration::from_millis(7000), DEFAULT_UNSOLICITED_CAPACITY)
    }
}
