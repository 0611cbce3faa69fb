// Simulated ACE device shared by the integration tests
#![allow(dead_code)]

use acelink_communication::communication::frame::{decode_frame, encode_frame, FRAME_TERMINATOR};
use acelink_communication::{PortConnector, Request, SerialPort};
use acelink_core::{ConnectionError, HostHooks};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

pub struct DeviceState {
    pub slots: [&'static str; 4],
    pub feed_assist_count: i64,
    pub assist_slot: Option<u8>,
    /// Status polls that advance the counter after feed assist starts
    pub increments_per_park: u32,
    increments_left: u32,
    /// Status polls a retracted slot stays busy; `None` keeps it busy
    pub retract_recovery: Option<u32>,
    busy_slot: Option<(usize, Option<u32>)>,
    pub reject: HashSet<String>,
    pub fail_open: bool,
    /// Make reads fail until cleared
    pub drop_link: bool,
    pub opens: u32,
    pub received: Vec<Request>,
    outbound: VecDeque<u8>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            slots: ["ready"; 4],
            feed_assist_count: 0,
            assist_slot: None,
            increments_per_park: 3,
            increments_left: 0,
            retract_recovery: Some(2),
            busy_slot: None,
            reject: HashSet::new(),
            fail_open: false,
            drop_link: false,
            opens: 0,
            received: Vec::new(),
            outbound: VecDeque::new(),
        }
    }
}

impl DeviceState {
    pub fn methods(&self) -> Vec<String> {
        self.received.iter().map(|r| r.method.clone()).collect()
    }

    pub fn count_of(&self, method: &str) -> usize {
        self.received.iter().filter(|r| r.method == method).count()
    }

    fn handle(&mut self, request: Request) {
        let method = request.method.clone();
        let index = request
            .params
            .as_ref()
            .and_then(|p| p.get("index"))
            .and_then(Value::as_u64)
            .map(|i| i as usize);
        self.received.push(request.clone());

        if self.reject.contains(&method) {
            self.reply(json!({"id": request.id, "code": 1, "msg": "rejected"}));
            return;
        }

        let result = match method.as_str() {
            "get_status" => self.status(),
            "get_info" => json!({"model": "Anycubic Color Engine Pro", "firmware": "V1.3.84"}),
            "start_feed_assist" => {
                self.assist_slot = index.map(|i| i as u8);
                self.increments_left = self.increments_per_park;
                json!({"feed_assist_count": self.feed_assist_count})
            }
            "stop_feed_assist" => {
                self.assist_slot = None;
                self.increments_left = 0;
                Value::Null
            }
            "unwind_filament" => {
                if let Some(i) = index {
                    self.slots[i] = "busy";
                    self.busy_slot = Some((i, self.retract_recovery));
                }
                Value::Null
            }
            _ => Value::Null,
        };

        if result.is_null() {
            self.reply(json!({"id": request.id, "code": 0, "msg": "success"}));
        } else {
            self.reply(json!({"id": request.id, "code": 0, "msg": "success", "result": result}));
        }
    }

    fn status(&mut self) -> Value {
        if self.assist_slot.is_some() && self.increments_left > 0 {
            self.feed_assist_count += 1;
            self.increments_left -= 1;
        }
        if let Some((slot, remaining)) = self.busy_slot {
            match remaining {
                Some(0) => {
                    self.slots[slot] = "ready";
                    self.busy_slot = None;
                }
                Some(n) => self.busy_slot = Some((slot, Some(n - 1))),
                None => {}
            }
        }

        let slots: Vec<Value> = self
            .slots
            .iter()
            .enumerate()
            .map(|(index, status)| json!({"index": index, "status": status}))
            .collect();
        json!({
            "status": "ready",
            "feed_assist_count": self.feed_assist_count,
            "slots": slots,
        })
    }

    // The host splits frames at every 0xFE, so pad the payload with
    // whitespace until neither the length nor the checksum contains one
    fn reply(&mut self, body: Value) {
        let mut payload = serde_json::to_vec(&body).unwrap();
        loop {
            let frame = encode_frame(&payload).unwrap();
            if !frame[..frame.len() - 1].contains(&FRAME_TERMINATOR) {
                self.outbound.extend(frame);
                return;
            }
            payload.push(b' ');
        }
    }
}

pub type SharedDevice = Arc<Mutex<DeviceState>>;

pub fn device() -> SharedDevice {
    Arc::new(Mutex::new(DeviceState::default()))
}

struct SimPort {
    device: SharedDevice,
}

impl SerialPort for SimPort {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let payload = decode_frame(data)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let request: Request = serde_json::from_slice(payload)?;
        self.device.lock().handle(request);
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut device = self.device.lock();
        if device.drop_link {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled"));
        }
        let n = buf.len().min(device.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(device.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn name(&self) -> String {
        "sim".to_string()
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct SimConnector {
    pub device: SharedDevice,
}

impl PortConnector for SimConnector {
    fn open(&self) -> Result<Box<dyn SerialPort>, ConnectionError> {
        let mut device = self.device.lock();
        device.opens += 1;
        if device.fail_open {
            return Err(ConnectionError::FailedToOpen {
                port: "sim".to_string(),
                reason: "unplugged".to_string(),
            });
        }
        device.outbound.clear();
        Ok(Box::new(SimPort {
            device: self.device.clone(),
        }))
    }

    fn port_name(&self) -> String {
        "sim".to_string()
    }
}

/// Hooks that record every call
#[derive(Default)]
pub struct RecordingHooks {
    pub calls: Mutex<Vec<String>>,
    pub fail_pre: bool,
}

impl RecordingHooks {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl HostHooks for RecordingHooks {
    async fn pre_toolchange(&self, from: Option<u8>, to: Option<u8>) -> anyhow::Result<()> {
        self.calls.lock().push(format!("pre_toolchange {:?} {:?}", from, to));
        if self.fail_pre {
            anyhow::bail!("toolhead not homed");
        }
        Ok(())
    }

    async fn post_toolchange(&self, from: Option<u8>, to: Option<u8>) -> anyhow::Result<()> {
        self.calls.lock().push(format!("post_toolchange {:?} {:?}", from, to));
        Ok(())
    }

    async fn pre_infinity_spool(&self) -> anyhow::Result<()> {
        self.calls.lock().push("pre_infinity_spool".to_string());
        Ok(())
    }

    async fn post_infinity_spool(&self) -> anyhow::Result<()> {
        self.calls.lock().push("post_infinity_spool".to_string());
        Ok(())
    }

    async fn dwell(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
