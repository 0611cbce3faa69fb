//! Request dispatcher with correlation ids and overflow shedding
//!
//! Requests wait in a bounded FIFO queue and are written one per tick. Each
//! request carries a one-shot completion that is resolved exactly once: with
//! the matching response, with an overflow error when the queue is shed, or
//! with a timeout when no reply arrives in time.
//!
//! # Features
//! - Correlation ids in `[0, 300000)`, skipping ids still in flight
//! - Queue shedding when a submission finds the queue full
//! - Requeue at the front when a write fails
//! - Expiry of requests whose reply never arrived

use super::message::{Request, Response};
use acelink_core::RequestError;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Request ids wrap to zero on reaching this value
pub const REQUEST_ID_WRAP: u32 = 300_000;

/// Outcome delivered to a completion
pub type ResponseResult = Result<Response, RequestError>;

/// Receiving half of a reply completion
pub type ResponseReceiver = oneshot::Receiver<ResponseResult>;

type Callback = Box<dyn FnOnce(ResponseResult) + Send>;

/// One-shot completion attached to a request
pub enum Completion {
    /// Deliver the outcome over a channel
    Reply(oneshot::Sender<ResponseResult>),
    /// Run a callback with the outcome
    Callback(Callback),
    /// Nobody is interested in the outcome
    Detached,
}

impl Completion {
    /// Wrap a callback
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(ResponseResult) + Send + 'static,
    {
        Completion::Callback(Box::new(f))
    }

    fn resolve(self, id: u32, result: ResponseResult) {
        match self {
            Completion::Reply(sender) => {
                if sender.send(result).is_err() {
                    tracing::debug!("Caller stopped waiting for request {}", id);
                }
            }
            Completion::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
                    tracing::error!("Callback for request {} panicked", id);
                }
            }
            Completion::Detached => {}
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Reply(_) => write!(f, "Reply"),
            Completion::Callback(_) => write!(f, "Callback"),
            Completion::Detached => write!(f, "Detached"),
        }
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of queued requests
    pub queue_size: usize,
    /// How long a written request may wait for its reply
    pub response_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: 20,
            response_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
struct QueuedRequest {
    request: Request,
    completion: Completion,
}

#[derive(Debug)]
struct PendingRequest {
    method: String,
    completion: Completion,
    sent_at: Instant,
}

type OverflowObserver = Box<dyn Fn(usize) + Send>;

/// Request queue plus pending-reply table
pub struct RequestDispatcher {
    config: DispatcherConfig,
    queue: VecDeque<QueuedRequest>,
    pending: HashMap<u32, PendingRequest>,
    last_id: u32,
    on_overflow: Option<OverflowObserver>,
}

impl RequestDispatcher {
    /// Create a dispatcher
    pub fn new(mut config: DispatcherConfig) -> Self {
        config.queue_size = config.queue_size.max(1);
        Self {
            config,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            last_id: 0,
            on_overflow: None,
        }
    }

    /// Register a function called with the number of requests shed on overflow
    pub fn set_overflow_observer<F>(&mut self, observer: F)
    where
        F: Fn(usize) + Send + 'static,
    {
        self.on_overflow = Some(Box::new(observer));
    }

    /// Queue a request; returns the id assigned to it
    ///
    /// If the queue is already full every queued request is failed with
    /// [`RequestError::QueueOverflow`] before this one is admitted.
    pub fn submit(&mut self, mut request: Request, completion: Completion) -> u32 {
        if self.queue.len() >= self.config.queue_size {
            self.shed_queue();
        }

        let id = self.next_id();
        request.id = id;
        tracing::trace!("Queued request {} ({})", id, request.method);
        self.queue.push_back(QueuedRequest {
            request,
            completion,
        });
        id
    }

    /// Queue a request and get a receiver for its outcome
    pub fn submit_reply(&mut self, request: Request) -> (u32, ResponseReceiver) {
        let (sender, receiver) = oneshot::channel();
        let id = self.submit(request, Completion::Reply(sender));
        (id, receiver)
    }

    /// Queue a request whose outcome nobody awaits
    pub fn submit_detached(&mut self, request: Request) -> u32 {
        self.submit(request, Completion::Detached)
    }

    fn shed_queue(&mut self) {
        let dropped = self.queue.len();
        tracing::info!("Request queue overflow, clearing {} queued requests", dropped);
        for item in self.queue.drain(..) {
            item.completion
                .resolve(item.request.id, Err(RequestError::QueueOverflow));
        }
        if let Some(observer) = &self.on_overflow {
            observer(dropped);
        }
    }

    fn next_id(&mut self) -> u32 {
        loop {
            self.last_id += 1;
            if self.last_id >= REQUEST_ID_WRAP {
                self.last_id = 0;
            }
            if !self.is_in_flight(self.last_id) {
                return self.last_id;
            }
        }
    }

    fn is_in_flight(&self, id: u32) -> bool {
        self.pending.contains_key(&id) || self.queue.iter().any(|q| q.request.id == id)
    }

    /// Write the request at the head of the queue
    ///
    /// Returns the id written, or `None` when the queue was empty. If `send`
    /// fails the request goes back to the front of the queue and the error is
    /// returned.
    pub fn tick<E, F>(&mut self, now: Instant, send: F) -> Result<Option<u32>, E>
    where
        F: FnOnce(&[u8]) -> Result<(), E>,
        E: std::fmt::Display,
    {
        let Some(item) = self.queue.pop_front() else {
            return Ok(None);
        };
        let id = item.request.id;

        let frame = match super::frame::encode_request(&item.request) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode request {}: {}", id, e);
                item.completion.resolve(id, Err(e));
                return Ok(None);
            }
        };

        match send(&frame) {
            Ok(()) => {
                tracing::debug!("Sent request {} ({})", id, item.request.method);
                self.pending.insert(
                    id,
                    PendingRequest {
                        method: item.request.method,
                        completion: item.completion,
                        sent_at: now,
                    },
                );
                Ok(Some(id))
            }
            Err(e) => {
                tracing::warn!("Failed to send request {}, requeuing: {}", id, e);
                self.queue.push_front(item);
                Err(e)
            }
        }
    }

    /// Deliver a response to the request it answers
    ///
    /// Returns false when no pending request matches.
    pub fn resolve(&mut self, response: &Response) -> bool {
        let Some(id) = response.id else {
            return false;
        };
        match self.pending.remove(&id) {
            Some(pending) => {
                tracing::trace!("Response for request {} ({})", id, pending.method);
                pending.completion.resolve(id, Ok(response.clone()));
                true
            }
            None => {
                tracing::debug!("Response for unknown request {}", id);
                false
            }
        }
    }

    /// Fail pending requests older than the response timeout
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.config.response_timeout;
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.sent_at) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                tracing::warn!("No response to request {} ({})", id, pending.method);
                pending.completion.resolve(
                    *id,
                    Err(RequestError::ResponseTimeout {
                        id: *id,
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                );
            }
        }
        expired.len()
    }

    /// Fail everything with [`RequestError::Cancelled`]
    pub fn clear(&mut self) {
        for item in self.queue.drain(..) {
            item.completion
                .resolve(item.request.id, Err(RequestError::Cancelled));
        }
        for (id, pending) in self.pending.drain() {
            pending.completion.resolve(id, Err(RequestError::Cancelled));
        }
    }

    /// Get the number of queued requests
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Get the number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check whether a reply for `id` is still expected
    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    /// Queue capacity
    pub fn capacity(&self) -> usize {
        self.config.queue_size
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("queued", &self.queue.len())
            .field("pending", &self.pending.len())
            .field("last_id", &self.last_id)
            .finish()
    }
}

impl Drop for RequestDispatcher {
    fn drop(&mut self) {
        self.clear();
    }
}
