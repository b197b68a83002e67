//! Per-connection command queue and reply correlation
//!
//! The protocol carries no request identifiers. Replies arrive in the order the
//! requests were written, so an [`Endpoint`] writes each frame and appends its
//! command to the in-flight queue under one lock, and pops the queue head for
//! every decoded reply.

use crate::command::RedisCommand;
use crate::core::{
    config::{DisconnectedBehavior, EndpointConfig},
    error::{RedisError, RedisResult},
    value::RespValue,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, info, warn};

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Write side of a physical connection.
///
/// `write` must not block: it hands the frame to whatever performs the I/O
/// and returns. Frames passed to consecutive calls must reach the wire in
/// call order.
pub trait Transport: Send + Sync {
    /// Schedule a complete frame for writing
    ///
    /// # Errors
    ///
    /// Returns an error when the connection can no longer accept frames.
    fn write(&self, frame: Bytes) -> RedisResult<()>;

    /// Stop writing and shut the connection down
    fn close(&self);
}

/// Callbacks a connection driver delivers to the object that owns its queue
pub trait ConnectionEvents: Send + Sync {
    /// A connection is ready for writing
    fn notify_connected(&self, transport: Arc<dyn Transport>);

    /// One complete reply was decoded
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Desync`] when no command was waiting for it. The
    /// driver must treat the connection as broken.
    fn notify_reply(&self, value: RespValue) -> RedisResult<()>;

    /// The connection was lost
    fn notify_disconnected(&self, cause: RedisError);

    /// Whether the application closed this endpoint
    fn is_closed(&self) -> bool;

    /// Close the endpoint and release the transport
    fn close(&self);
}

struct QueuedCommand {
    command: Box<dyn RedisCommand>,
    // Released when the entry is dropped, i.e. after completion.
    _permit: OwnedSemaphorePermit,
}

enum Pending {
    Command(QueuedCommand),
    Frame(Bytes),
}

struct EndpointState {
    transport: Option<Arc<dyn Transport>>,
    in_flight: VecDeque<QueuedCommand>,
    buffered: VecDeque<Pending>,
    closed: bool,
}

/// Command queue of one logical connection
pub struct Endpoint {
    id: u64,
    state: Mutex<EndpointState>,
    permits: Arc<Semaphore>,
    config: EndpointConfig,
}

impl Endpoint {
    /// Create a disconnected endpoint
    #[must_use]
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(EndpointState {
                transport: None,
                in_flight: VecDeque::new(),
                buffered: VecDeque::new(),
                closed: false,
            }),
            permits: Arc::new(Semaphore::new(config.request_queue_size)),
            config,
        }
    }

    /// Process-unique identifier, used in log events
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Configuration this endpoint was created with
    #[must_use]
    pub const fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Submit a command, waiting for a queue slot when the queue is full.
    ///
    /// Returns once the frame was handed to the transport (or buffered while
    /// disconnected). The reply is observed through the command's
    /// [`Completion`](crate::command::Completion).
    ///
    /// # Errors
    ///
    /// The command is failed with the same error when it cannot be accepted:
    /// the endpoint is closed, or it is disconnected and configured to reject.
    pub async fn enqueue<T: RedisCommand + 'static>(&self, command: T) -> RedisResult<()> {
        let mut command: Box<dyn RedisCommand> = Box::new(command);
        if self.is_closed() {
            return Self::reject(command.as_mut(), RedisError::Closed);
        }
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => self.submit(command, permit),
            Err(_) => Self::reject(command.as_mut(), RedisError::Closed),
        }
    }

    /// Submit a command without waiting for a queue slot
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::QueueFull`] when the queue is at its configured
    /// depth, plus everything [`Endpoint::enqueue`] returns.
    pub fn try_enqueue<T: RedisCommand + 'static>(&self, command: T) -> RedisResult<()> {
        let mut command: Box<dyn RedisCommand> = Box::new(command);
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => self.submit(command, permit),
            Err(TryAcquireError::NoPermits) => Self::reject(
                command.as_mut(),
                RedisError::QueueFull(self.config.request_queue_size),
            ),
            Err(TryAcquireError::Closed) => Self::reject(command.as_mut(), RedisError::Closed),
        }
    }

    fn reject(command: &mut dyn RedisCommand, cause: RedisError) -> RedisResult<()> {
        command.fail(cause.clone());
        Err(cause)
    }

    fn submit(
        &self,
        mut command: Box<dyn RedisCommand>,
        permit: OwnedSemaphorePermit,
    ) -> RedisResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            return Self::reject(command.as_mut(), RedisError::Closed);
        }

        let Some(transport) = state.transport.clone() else {
            return match self.config.disconnected_behavior {
                DisconnectedBehavior::Accept => {
                    debug!(
                        endpoint = self.id,
                        command = command.keyword(),
                        "Buffering command while disconnected"
                    );
                    state.buffered.push_back(Pending::Command(QueuedCommand {
                        command,
                        _permit: permit,
                    }));
                    Ok(())
                }
                DisconnectedBehavior::Reject => {
                    drop(state);
                    Self::reject(
                        command.as_mut(),
                        RedisError::Connection("Endpoint is not connected".to_string()),
                    )
                }
            };
        };

        // Writing and queueing under the same lock keeps queue order equal to
        // wire order.
        match transport.write(command.encoded().clone()) {
            Ok(()) => {
                state.in_flight.push_back(QueuedCommand {
                    command,
                    _permit: permit,
                });
                Ok(())
            }
            Err(e) => {
                drop(state);
                Self::reject(command.as_mut(), e)
            }
        }
    }

    /// Write a frame that expects no correlated reply
    ///
    /// # Errors
    ///
    /// Same as [`Endpoint::enqueue`] except that no slot is consumed.
    pub(crate) fn write_untracked(&self, frame: Bytes) -> RedisResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RedisError::Closed);
        }
        match state.transport.clone() {
            Some(transport) => transport.write(frame),
            None => match self.config.disconnected_behavior {
                DisconnectedBehavior::Accept => {
                    state.buffered.push_back(Pending::Frame(frame));
                    Ok(())
                }
                DisconnectedBehavior::Reject => Err(RedisError::Connection(
                    "Endpoint is not connected".to_string(),
                )),
            },
        }
    }

    /// Attach a transport and flush everything buffered while disconnected
    pub fn notify_connected(&self, transport: Arc<dyn Transport>) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            transport.close();
            return;
        }

        let flushed = state.buffered.len();
        while let Some(pending) = state.buffered.pop_front() {
            let result = match pending {
                Pending::Command(entry) => match transport.write(entry.command.encoded().clone()) {
                    Ok(()) => {
                        state.in_flight.push_back(entry);
                        Ok(())
                    }
                    Err(e) => {
                        state.buffered.push_front(Pending::Command(entry));
                        Err(e)
                    }
                },
                Pending::Frame(frame) => match transport.write(frame.clone()) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        state.buffered.push_front(Pending::Frame(frame));
                        Err(e)
                    }
                },
            };
            if let Err(e) = result {
                warn!(
                    endpoint = self.id,
                    error = %e,
                    "Transport failed while flushing buffered commands"
                );
                return;
            }
        }

        state.transport = Some(transport);
        info!(endpoint = self.id, flushed, "Endpoint connected");
    }

    /// Complete the oldest in-flight command with `value`
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Desync`] when the queue is empty.
    pub fn notify_reply(&self, value: RespValue) -> RedisResult<()> {
        let entry = self.state.lock().in_flight.pop_front();
        match entry {
            Some(mut entry) => {
                entry.command.complete(value);
                Ok(())
            }
            None => {
                error!(
                    endpoint = self.id,
                    reply = value.type_name(),
                    "Received a reply with no command pending"
                );
                Err(RedisError::Desync(format!(
                    "unexpected {} reply with empty command queue",
                    value.type_name()
                )))
            }
        }
    }

    /// Detach the transport and fail every in-flight command with `cause`,
    /// oldest first. Buffered commands stay queued for the next connection.
    pub fn notify_disconnected(&self, cause: RedisError) {
        let failed: Vec<QueuedCommand> = {
            let mut state = self.state.lock();
            state.transport = None;
            state.in_flight.drain(..).collect()
        };

        if failed.is_empty() {
            debug!(endpoint = self.id, error = %cause, "Endpoint disconnected");
        } else {
            warn!(
                endpoint = self.id,
                error = %cause,
                count = failed.len(),
                "Endpoint disconnected, failing in-flight commands"
            );
        }
        for mut entry in failed {
            entry.command.fail(cause.clone());
        }
    }

    /// Fail everything still queued with [`RedisError::Closed`] and close the
    /// transport. Later submissions fail immediately.
    pub fn close(&self) {
        let (in_flight, buffered, transport) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.in_flight),
                std::mem::take(&mut state.buffered),
                state.transport.take(),
            )
        };
        self.permits.close();

        for mut entry in in_flight {
            entry.command.fail(RedisError::Closed);
        }
        for pending in buffered {
            if let Pending::Command(mut entry) = pending {
                entry.command.fail(RedisError::Closed);
            }
        }
        if let Some(transport) = transport {
            transport.close();
        }
        info!(endpoint = self.id, "Endpoint closed");
    }

    /// Whether [`Endpoint::close`] was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether a transport is attached
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.lock().transport.is_some()
    }

    /// Commands written and waiting for their reply
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Commands and frames held back while disconnected
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffered.len()
    }
}

impl ConnectionEvents for Endpoint {
    fn notify_connected(&self, transport: Arc<dyn Transport>) {
        Self::notify_connected(self, transport);
    }

    fn notify_reply(&self, value: RespValue) -> RedisResult<()> {
        Self::notify_reply(self, value)
    }

    fn notify_disconnected(&self, cause: RedisError) {
        Self::notify_disconnected(self, cause);
    }

    fn is_closed(&self) -> bool {
        Self::is_closed(self)
    }

    fn close(&self) {
        Self::close(self);
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("connected", &state.transport.is_some())
            .field("in_flight", &state.in_flight.len())
            .field("buffered", &state.buffered.len())
            .field("closed", &state.closed)
            .finish()
    }
}
