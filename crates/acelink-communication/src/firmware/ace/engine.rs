//! Synchronous device engine
//!
//! [`AceEngine`] owns every piece of mutable driver state. The controller
//! keeps it behind a single mutex and calls into it from the read tick, the
//! write tick and orchestration steps, so each call runs to completion
//! before another can observe the state.

use super::commands::AceCommand;
use super::parking::{ParkingOutcome, ParkingSupervisor};
use super::state::TelemetryStore;
use crate::communication::{
    Completion, DispatcherConfig, FrameAssembler, Link, LinkState, PortConnector, Request,
    RequestDispatcher, Response, ResponseReceiver,
};
use acelink_core::{
    AceConfig, AceEvent, ConnectionError, DeviceStatus, DeviceTelemetry, EventBus,
    OperationError, ParkingEvent, QueueEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Status poll cadence while parking
pub const PARKING_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Status poll cadence otherwise
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Driver state
pub struct AceEngine {
    config: AceConfig,
    link: Link,
    assembler: FrameAssembler,
    dispatcher: RequestDispatcher,
    store: TelemetryStore,
    parking: ParkingSupervisor,
    events: Arc<EventBus>,
    last_status_poll: Option<Instant>,
    feed_assist_slot: Option<u8>,
}

impl AceEngine {
    /// Create an engine with a closed link
    pub fn new(config: AceConfig, events: Arc<EventBus>) -> Self {
        let mut dispatcher = RequestDispatcher::new(DispatcherConfig {
            queue_size: config.max_queue_size,
            response_timeout: config.response_timeout_duration(),
        });
        let bus = events.clone();
        dispatcher.set_overflow_observer(move |dropped| {
            bus.publish(AceEvent::Queue(QueueEvent::Overflow { dropped }));
        });

        Self {
            parking: ParkingSupervisor::new(config.park_hit_count),
            config,
            link: Link::new(),
            assembler: FrameAssembler::new(),
            dispatcher,
            store: TelemetryStore::new(),
            events,
            last_status_poll: None,
            feed_assist_slot: None,
        }
    }

    /// Open the link and introduce ourselves to the device
    pub fn attach(&mut self, connector: &dyn PortConnector) -> Result<(), ConnectionError> {
        if self.link.is_connected() {
            return Ok(());
        }
        self.link.open(connector)?;
        self.assembler.clear();
        self.last_status_poll = None;
        self.store.set_status(DeviceStatus::Ready);

        self.dispatcher.submit(
            AceCommand::GetInfo.into(),
            Completion::callback(|result| match result {
                Ok(response) if response.is_ok() => {
                    let result = response.result.unwrap_or_default();
                    tracing::info!(
                        "Device info: model {}, firmware {}",
                        result.get("model").and_then(|v| v.as_str()).unwrap_or("Unknown"),
                        result.get("firmware").and_then(|v| v.as_str()).unwrap_or("Unknown")
                    );
                }
                Ok(response) => {
                    tracing::warn!("get_info rejected: {}", response.error_message())
                }
                Err(e) => tracing::warn!("get_info failed: {}", e),
            }),
        );
        Ok(())
    }

    /// Close the link
    pub fn detach(&mut self) {
        self.link.close();
        self.store.set_status(DeviceStatus::Disconnected);
    }

    /// Read one chunk and process every frame it completes
    ///
    /// Returns the number of responses handled. An error means the link must
    /// be torn down.
    pub fn read_tick(&mut self, now: Instant) -> Result<usize, ConnectionError> {
        if !self.link.is_connected() {
            return Ok(0);
        }

        let chunk = self.link.read_chunk()?;
        if chunk.is_empty() {
            return Ok(0);
        }

        let output = self.assembler.push(&chunk);
        let handled = output.responses.len();
        for response in output.responses {
            self.handle_response(now, response);
        }

        if output.reset_requested {
            return Err(ConnectionError::TooManyIncomplete {
                count: crate::communication::MAX_INCOMPLETE_MESSAGES + 1,
            });
        }
        Ok(handled)
    }

    /// Route one decoded response
    pub fn handle_response(&mut self, now: Instant, response: Response) {
        if response.id.is_some() {
            self.dispatcher.resolve(&response);
        }

        let merged = match &response.result {
            Some(result) => self.store.apply(result, now),
            None => false,
        };

        let outcome = if merged {
            self.parking
                .on_update(now, self.store.telemetry(), &mut self.dispatcher)
        } else {
            self.parking.on_tick(now, self.store.telemetry())
        };
        if let Some(outcome) = outcome {
            self.finish_parking(outcome);
        }
    }

    /// Expire stale requests, poll status when due and write one request
    pub fn write_tick(&mut self, now: Instant) -> Result<Option<u32>, ConnectionError> {
        if !self.link.is_connected() {
            return Ok(None);
        }

        self.dispatcher.expire(now);
        if let Some(outcome) = self.parking.on_tick(now, self.store.telemetry()) {
            self.finish_parking(outcome);
        }

        let cadence = if self.parking.is_active() {
            PARKING_POLL_INTERVAL
        } else {
            IDLE_POLL_INTERVAL
        };
        let due = self
            .last_status_poll
            .is_none_or(|last| now.saturating_duration_since(last) > cadence);
        if due {
            self.dispatcher.submit_detached(AceCommand::GetStatus.into());
            self.last_status_poll = Some(now);
        }

        let link = &mut self.link;
        self.dispatcher.tick(now, |frame| link.write_frame(frame))
    }

    fn finish_parking(&mut self, outcome: ParkingOutcome) {
        let event = match &outcome {
            ParkingOutcome::Completed { slot } => {
                if self.config.disable_assist_after_toolchange {
                    self.feed_assist_slot = None;
                }
                ParkingEvent::Completed { slot: *slot }
            }
            ParkingOutcome::Failed { slot, reason } => ParkingEvent::Failed {
                slot: *slot,
                reason: reason.to_string(),
            },
        };
        self.events.publish(AceEvent::Parking(event));
    }

    /// Queue a command and get a receiver for the reply
    pub fn submit(&mut self, command: AceCommand) -> (u32, ResponseReceiver) {
        self.dispatcher.submit_reply(command.into())
    }

    /// Queue a request whose reply is not awaited
    pub fn submit_detached(&mut self, request: Request) -> u32 {
        self.dispatcher.submit_detached(request)
    }

    /// Begin a parking session
    pub fn start_parking(&mut self, slot: u8, now: Instant) -> Result<(), OperationError> {
        self.parking.start(slot, now, &mut self.dispatcher)?;
        self.events
            .publish(AceEvent::Parking(ParkingEvent::Started { slot }));
        Ok(())
    }

    /// Cancel the active parking session
    pub fn abort_parking(&mut self) {
        if let Some(outcome) = self.parking.abort() {
            self.finish_parking(outcome);
        }
    }

    /// Parking supervisor
    pub fn parking(&self) -> &ParkingSupervisor {
        &self.parking
    }

    /// Current telemetry
    pub fn telemetry(&self) -> &DeviceTelemetry {
        self.store.telemetry()
    }

    /// Telemetry store
    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    /// Request dispatcher
    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Link state
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// True while the link is open
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Slot feed assist was last enabled on
    pub fn feed_assist_slot(&self) -> Option<u8> {
        self.feed_assist_slot
    }

    /// Record the slot feed assist is enabled on
    pub fn set_feed_assist_slot(&mut self, slot: Option<u8>) {
        self.feed_assist_slot = slot;
    }

    /// Driver configuration
    pub fn config(&self) -> &AceConfig {
        &self.config
    }
}

impl std::fmt::Debug for AceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AceEngine")
            .field("link", &self.link)
            .field("dispatcher", &self.dispatcher)
            .field("parking", &self.parking.phase())
            .field("feed_assist_slot", &self.feed_assist_slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::SerialPort;
    use crate::communication::{decode_frame, encode_frame};
    use acelink_core::SlotStatus;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::io;

    #[derive(Default)]
    struct Wire {
        sent: Vec<Value>,
        inbound: VecDeque<u8>,
    }

    struct WirePort(Arc<Mutex<Wire>>);

    impl SerialPort for WirePort {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let payload = decode_frame(data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            let value = serde_json::from_slice(payload)?;
            self.0.lock().sent.push(value);
            Ok(data.len())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut wire = self.0.lock();
            let n = buf.len().min(wire.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn name(&self) -> String {
            "wire".to_string()
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct WireConnector(Arc<Mutex<Wire>>);

    impl PortConnector for WireConnector {
        fn open(&self) -> Result<Box<dyn SerialPort>, ConnectionError> {
            Ok(Box::new(WirePort(self.0.clone())))
        }

        fn port_name(&self) -> String {
            "wire".to_string()
        }
    }

    fn connected_engine() -> (AceEngine, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let mut engine = AceEngine::new(AceConfig::default(), Arc::new(EventBus::new()));
        engine.attach(&WireConnector(wire.clone())).unwrap();
        (engine, wire)
    }

    fn reply(wire: &Arc<Mutex<Wire>>, value: Value) {
        let frame = encode_frame(&serde_json::to_vec(&value).unwrap()).unwrap();
        wire.lock().inbound.extend(frame);
    }

    fn drain(engine: &mut AceEngine, wire: &Arc<Mutex<Wire>>, now: Instant) {
        while !wire.lock().inbound.is_empty() {
            engine.read_tick(now).unwrap();
        }
    }

    #[test]
    fn test_attach_sets_ready_and_queues_get_info() {
        let (mut engine, wire) = connected_engine();
        assert_eq!(engine.telemetry().status, DeviceStatus::Ready);

        let now = Instant::now();
        engine.write_tick(now).unwrap();
        assert_eq!(wire.lock().sent[0]["method"], "get_info");

        engine.detach();
        assert_eq!(engine.telemetry().status, DeviceStatus::Disconnected);
        assert_eq!(engine.link_state(), LinkState::Disconnected);
    }

    #[test]
    fn test_status_poll_cadence() {
        let (mut engine, wire) = connected_engine();
        let start = Instant::now();

        engine.write_tick(start).unwrap();
        engine.write_tick(start + Duration::from_millis(50)).unwrap();
        engine.write_tick(start + Duration::from_millis(500)).unwrap();
        engine.write_tick(start + Duration::from_millis(1100)).unwrap();

        let methods: Vec<String> = wire
            .lock()
            .sent
            .iter()
            .map(|v| v["method"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(methods, vec!["get_info", "get_status", "get_status"]);
    }

    #[test]
    fn test_response_merges_telemetry() {
        let (mut engine, wire) = connected_engine();
        let now = Instant::now();
        reply(
            &wire,
            json!({"id": 999, "code": 0, "result": {
                "status": "busy",
                "slots": [{"index": 0, "status": "ready"}, {"index": 1, "status": "empty"}]
            }}),
        );
        drain(&mut engine, &wire, now);

        assert_eq!(engine.telemetry().status, DeviceStatus::Busy);
        assert_eq!(engine.telemetry().slot_status(0), SlotStatus::Ready);
    }

    #[test]
    fn test_too_many_incomplete_requests_reset() {
        let (mut engine, wire) = connected_engine();
        let now = Instant::now();
        for _ in 0..11 {
            wire.lock()
                .inbound
                .extend([0xFF, 0xAA, 0x20, 0x00, b'{', b'}', 0xFE]);
        }

        let mut result = Ok(0);
        for _ in 0..100 {
            result = engine.read_tick(now);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(
            result,
            Err(ConnectionError::TooManyIncomplete { .. })
        ));
    }
}
