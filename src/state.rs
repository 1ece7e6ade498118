use log::warn;
use std::sync::{
    atomic::{AtomicU16, AtomicU32, AtomicUsize, Ordering},
    Mutex,
};

use crate::resources::HandlerError;
use crate::sensor::{EnvironmentSensor, SensorError};

/// Counters and devices shared by the server, the notifier and the shell.
pub struct NodeState {
    requests_sent: AtomicU16,
    open_requests: AtomicUsize,
    ticks: AtomicU32,
    message_id: AtomicU16,
    sensor: Option<Mutex<Box<dyn EnvironmentSensor>>>,
}

impl NodeState {
    /// Creates the state. A node whose sensor failed to start runs with
    /// `None` and answers sensor resources as unavailable.
    pub fn new(sensor: Option<Box<dyn EnvironmentSensor>>) -> Self {
        Self {
            requests_sent: AtomicU16::new(0),
            open_requests: AtomicUsize::new(0),
            ticks: AtomicU32::new(0),
            message_id: AtomicU16::new(rand::random()),
            sensor: sensor.map(Mutex::new),
        }
    }

    /// Number of requests sent by the shell. Wraps like the 16-bit counter
    /// it is.
    pub fn requests_sent(&self) -> u16 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn record_request_sent(&self) -> u16 {
        self.requests_sent
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }

    pub fn open_requests(&self) -> usize {
        self.open_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn request_opened(&self) {
        self.open_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn request_closed(&self) {
        self.open_requests.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub(crate) fn tick(&self) -> u32 {
        self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Message id for messages originated by this node.
    pub fn next_message_id(&self) -> u16 {
        self.message_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn has_sensor(&self) -> bool {
        self.sensor.is_some()
    }

    /// Runs `read` against the sensor, holding it for the whole closure so
    /// that multi-step readings are not interleaved.
    pub fn with_sensor<T, F>(&self, read: F) -> Result<T, HandlerError>
    where
        F: FnOnce(&mut dyn EnvironmentSensor) -> Result<T, SensorError>,
    {
        let sensor = self
            .sensor
            .as_ref()
            .ok_or_else(|| HandlerError::Unavailable("no sensor".to_string()))?;
        let mut sensor = sensor
            .lock()
            .map_err(|_| HandlerError::Internal("sensor lock poisoned".to_string()))?;

        read(&mut **sensor).map_err(|e| {
            warn!("sensor read failed: {}", e);
            HandlerError::Internal(e.to_string())
        })
    }
}
