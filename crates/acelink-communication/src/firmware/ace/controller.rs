//! ACE controller
//!
//! Async front end for the engine. Owns the connection supervision timers
//! (read tick, write tick, background retry, reconnect) and serializes
//! multi-step sequences. Device operations live in `operations.rs`, tool
//! changes in `toolchange.rs` and infinity spool in `infinity.rs`.

use super::commands::AceCommand;
use super::engine::AceEngine;
use super::parking::{ParkingOutcome, ParkingPhase};
use crate::communication::{
    LinkState, PortConnector, Reschedule, Response, Scheduler, TimerHandle,
    BACKGROUND_RETRY_INTERVAL, READ_INTERVAL, RECONNECT_DELAY, RETRY_PAUSE, STARTUP_ATTEMPTS,
    WRITE_INTERVAL,
};
use acelink_core::{
    tool_from_value, AceConfig, AceEvent, ConnectionError, ConnectionEvent, DeviceTelemetry,
    EventBus, HostHooks, OperationError, RequestError, Result, VariableStore, SLOT_COUNT,
    VAR_CURRENT_INDEX,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct LinkTimers {
    reader: Option<TimerHandle>,
    writer: Option<TimerHandle>,
    reconnect: Option<TimerHandle>,
    watchdog: Option<TimerHandle>,
}

pub(super) struct ControllerInner {
    pub(super) config: AceConfig,
    pub(super) engine: Mutex<AceEngine>,
    pub(super) hooks: Arc<dyn HostHooks>,
    pub(super) variables: Arc<dyn VariableStore>,
    pub(super) events: Arc<EventBus>,
    pub(super) sequence: tokio::sync::Mutex<()>,
    connector: Arc<dyn PortConnector>,
    scheduler: Scheduler,
    timers: Mutex<LinkTimers>,
}

/// Snapshot of everything the driver knows
#[derive(Debug, Clone, Serialize)]
pub struct AceStatus {
    /// Link state
    pub link: LinkState,
    /// Last-known telemetry
    pub telemetry: DeviceTelemetry,
    /// Loaded tool
    pub current_tool: Option<u8>,
    /// Slot with feed assist enabled
    pub feed_assist_slot: Option<u8>,
    /// Slot being parked
    pub parking_slot: Option<u8>,
    /// Requests waiting to be written
    pub queued_requests: usize,
    /// Requests waiting for a reply
    pub pending_requests: usize,
    /// Status payloads merged since startup
    pub telemetry_updates: u64,
    /// Milliseconds since the last status payload
    pub telemetry_age_ms: Option<u64>,
}

/// Driver handle
///
/// Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct AceController {
    pub(super) inner: Arc<ControllerInner>,
}

impl AceController {
    /// Create a controller
    ///
    /// Must be called from within a tokio runtime; timers are spawned on it.
    pub fn new(
        config: AceConfig,
        connector: Arc<dyn PortConnector>,
        hooks: Arc<dyn HostHooks>,
        variables: Arc<dyn VariableStore>,
    ) -> Self {
        Self::with_event_bus(config, connector, hooks, variables, Arc::new(EventBus::new()))
    }

    /// Create a controller publishing on an existing bus
    pub fn with_event_bus(
        config: AceConfig,
        connector: Arc<dyn PortConnector>,
        hooks: Arc<dyn HostHooks>,
        variables: Arc<dyn VariableStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let engine = AceEngine::new(config.clone(), events.clone());
        Self {
            inner: Arc::new(ControllerInner {
                config,
                engine: Mutex::new(engine),
                hooks,
                variables,
                events,
                sequence: tokio::sync::Mutex::new(()),
                connector,
                scheduler: Scheduler::current(),
                timers: Mutex::new(LinkTimers::default()),
            }),
        }
    }

    fn from_weak(weak: &Weak<ControllerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // Connection supervision

    /// Connect, retrying a few times, then keep reconnecting in the
    /// background
    ///
    /// Returns an error when the startup burst fails; the background retry
    /// keeps running regardless.
    pub async fn start(&self) -> std::result::Result<(), ConnectionError> {
        let mut outcome = Err(ConnectionError::AttemptsExhausted {
            attempts: STARTUP_ATTEMPTS,
        });

        for attempt in 1..=STARTUP_ATTEMPTS {
            match self.try_connect() {
                Ok(()) => {
                    outcome = Ok(());
                    break;
                }
                Err(e) => {
                    tracing::info!("Connection attempt {} failed: {}", attempt, e);
                    if attempt < STARTUP_ATTEMPTS {
                        tokio::time::sleep(RETRY_PAUSE).await;
                    }
                }
            }
        }

        if outcome.is_err() {
            tracing::warn!(
                "Failed to connect to {} after {} attempts",
                self.inner.connector.port_name(),
                STARTUP_ATTEMPTS
            );
            self.inner
                .events
                .publish(AceEvent::Connection(ConnectionEvent::AttemptsExhausted {
                    attempts: STARTUP_ATTEMPTS,
                }));
        }

        self.start_watchdog();
        outcome
    }

    /// Make a single connection attempt
    pub fn try_connect(&self) -> std::result::Result<(), ConnectionError> {
        {
            let mut engine = self.inner.engine.lock();
            if engine.is_connected() {
                return Ok(());
            }
            engine.attach(self.inner.connector.as_ref())?;
            // Installed under the engine lock so a concurrent failure
            // handler can only ever cancel the timers of its own link.
            self.start_link_timers();
        }

        self.inner
            .events
            .publish(AceEvent::Connection(ConnectionEvent::Connected {
                port: self.inner.connector.port_name(),
            }));
        Ok(())
    }

    /// Close the link and stop all supervision
    pub fn disconnect(&self) {
        let was_connected = {
            let mut engine = self.inner.engine.lock();
            let timers = std::mem::take(&mut *self.inner.timers.lock());
            Self::cancel_timers(
                [timers.reader, timers.writer, timers.reconnect, timers.watchdog]
                    .into_iter()
                    .flatten(),
            );
            let connected = engine.is_connected();
            engine.detach();
            connected
        };
        if was_connected {
            tracing::info!("Disconnected from {}", self.inner.connector.port_name());
            self.publish_disconnected("disconnect requested".to_string());
        }
    }

    /// Caller holds the engine lock
    fn start_link_timers(&self) {
        let scheduler = &self.inner.scheduler;

        let weak = Arc::downgrade(&self.inner);
        let reader = scheduler.register_timer("ace-reader", Duration::ZERO, move |now| {
            match Self::from_weak(&weak) {
                Some(controller) => controller.reader_tick(now),
                None => Reschedule::Stop,
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let writer = scheduler.register_timer("ace-writer", Duration::ZERO, move |now| {
            match Self::from_weak(&weak) {
                Some(controller) => controller.writer_tick(now),
                None => Reschedule::Stop,
            }
        });

        let mut timers = self.inner.timers.lock();
        let stale = [
            timers.reader.replace(reader),
            timers.writer.replace(writer),
            timers.reconnect.take(),
        ];
        Self::cancel_timers(stale.into_iter().flatten());
    }

    fn cancel_timers(timers: impl IntoIterator<Item = TimerHandle>) {
        for timer in timers {
            tracing::trace!("Cancelling timer {}", timer.name());
            timer.cancel();
        }
    }

    fn start_watchdog(&self) {
        let weak = Arc::downgrade(&self.inner);
        let watchdog = self.inner.scheduler.register_periodic(
            "ace-watchdog",
            BACKGROUND_RETRY_INTERVAL,
            move |_| {
                let Some(controller) = Self::from_weak(&weak) else {
                    return false;
                };
                if !controller.is_connected() {
                    if let Err(e) = controller.try_connect() {
                        tracing::debug!("Background connection attempt failed: {}", e);
                    }
                }
                true
            },
        );
        self.inner.timers.lock().watchdog = Some(watchdog);
    }

    fn reader_tick(&self, now: Instant) -> Reschedule {
        let result = self.inner.engine.lock().read_tick(now);
        match result {
            Ok(_) => Reschedule::After(READ_INTERVAL),
            Err(e) => {
                self.handle_link_failure(e);
                Reschedule::Stop
            }
        }
    }

    fn writer_tick(&self, now: Instant) -> Reschedule {
        let result = self.inner.engine.lock().write_tick(now);
        match result {
            Ok(_) => Reschedule::After(WRITE_INTERVAL),
            Err(e) => {
                self.handle_link_failure(e);
                Reschedule::Stop
            }
        }
    }

    fn handle_link_failure(&self, error: ConnectionError) {
        {
            let mut engine = self.inner.engine.lock();
            if !engine.is_connected() {
                return;
            }
            engine.detach();

            // Timers are swapped in the same critical section as the detach;
            // a reconnect can only install new ones once the lock is released.
            let weak = Arc::downgrade(&self.inner);
            let reconnect =
                self.inner
                    .scheduler
                    .register_timer("ace-reconnect", RECONNECT_DELAY, move |_| {
                        if let Some(controller) = Self::from_weak(&weak) {
                            if let Err(e) = controller.try_connect() {
                                tracing::info!("Reconnect failed: {}", e);
                            }
                        }
                        Reschedule::Stop
                    });

            let mut timers = self.inner.timers.lock();
            let stale = [
                timers.reader.take(),
                timers.writer.take(),
                timers.reconnect.replace(reconnect),
            ];
            Self::cancel_timers(stale.into_iter().flatten());
        }

        tracing::warn!("Link failure, reconnecting: {}", error);
        self.publish_disconnected(error.to_string());
    }

    fn publish_disconnected(&self, reason: String) {
        self.inner
            .events
            .publish(AceEvent::Connection(ConnectionEvent::Disconnected { reason }));
    }

    // Request plumbing

    /// How long a caller waits for a reply: the response timeout plus the
    /// time a full queue needs to drain
    pub(super) fn reply_deadline(&self) -> Duration {
        let queue = u32::try_from(self.inner.config.max_queue_size).unwrap_or(u32::MAX);
        self.inner.config.response_timeout_duration() + WRITE_INTERVAL.saturating_mul(queue.saturating_add(1))
    }

    /// Send a command and wait for the reply, whatever its code
    pub(super) async fn exchange(&self, command: AceCommand) -> Result<Response> {
        let method = command.method().to_string();
        let (id, receiver) = self.inner.engine.lock().submit(command);
        let deadline = self.reply_deadline();

        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(RequestError::Cancelled.into()),
            Err(_) => {
                tracing::warn!("No reply to {} (request {})", method, id);
                Err(RequestError::ResponseTimeout {
                    id,
                    timeout_ms: deadline.as_millis() as u64,
                }
                .into())
            }
        }
    }

    /// Send a command and fail on a non-zero code
    pub(super) async fn request(&self, command: AceCommand) -> Result<Response> {
        let method = command.method().to_string();
        let response = self.exchange(command).await?;
        response.into_result().map_err(|e| {
            tracing::error!("{} failed: {}", method, e);
            e.into()
        })
    }

    pub(super) fn check_slot(index: u8) -> std::result::Result<u8, OperationError> {
        if usize::from(index) < SLOT_COUNT {
            Ok(index)
        } else {
            Err(OperationError::InvalidSlot {
                index: i64::from(index),
            })
        }
    }

    // Accessors

    /// Event bus
    pub fn events(&self) -> Arc<EventBus> {
        self.inner.events.clone()
    }

    /// Driver configuration
    pub fn config(&self) -> &AceConfig {
        &self.inner.config
    }

    /// Link state
    pub fn link_state(&self) -> LinkState {
        self.inner.engine.lock().link_state()
    }

    /// True while the link is open
    pub fn is_connected(&self) -> bool {
        self.inner.engine.lock().is_connected()
    }

    /// Copy of the last-known telemetry
    pub fn telemetry(&self) -> DeviceTelemetry {
        self.inner.engine.lock().telemetry().clone()
    }

    /// Loaded tool according to the variable store
    pub fn current_tool(&self) -> Option<u8> {
        tool_from_value(self.inner.variables.get_i64(VAR_CURRENT_INDEX))
    }

    /// Slot with feed assist enabled
    pub fn feed_assist_slot(&self) -> Option<u8> {
        self.inner.engine.lock().feed_assist_slot()
    }

    /// Phase of the parking supervisor
    pub fn parking_phase(&self) -> ParkingPhase {
        self.inner.engine.lock().parking().phase()
    }

    /// How the most recent parking session ended
    pub fn last_parking_outcome(&self) -> Option<ParkingOutcome> {
        self.inner.engine.lock().parking().last_outcome().cloned()
    }

    /// Full driver snapshot
    pub fn status(&self) -> AceStatus {
        let current_tool = self.current_tool();
        let engine = self.inner.engine.lock();
        AceStatus {
            link: engine.link_state(),
            telemetry: engine.telemetry().clone(),
            current_tool,
            feed_assist_slot: engine.feed_assist_slot(),
            parking_slot: engine.parking().session().map(|s| s.slot),
            queued_requests: engine.dispatcher().queued_count(),
            pending_requests: engine.dispatcher().pending_count(),
            telemetry_updates: engine.store().update_count(),
            telemetry_age_ms: engine
                .store()
                .last_update()
                .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl std::fmt::Debug for AceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AceController")
            .field("port", &self.inner.connector.port_name())
            .field("engine", &*self.inner.engine.lock())
            .finish()
    }
}
