//! Tracker publisher.
//!
//! Turns a device into a live location source for one float. A session runs
//! Idle → Validating → Publishing and returns to Idle on [`Tracker::stop`] or
//! when the sensor fails. While publishing, every sample is merged into the
//! float's record as it arrives.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::{Error, Precondition, Result};
use crate::float;
use crate::registry::{self, Entity};
use crate::sensor::{LocationSensor, SensorEvent, WatchOptions, SAMPLE_CHANNEL_CAPACITY};
use crate::store::DocumentStore;
use crate::subscription::Subscription;

/// Where the tracker is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrackerState {
    /// Not publishing.
    #[default]
    Idle,
    /// Checking start preconditions.
    Validating,
    /// Publishing samples for a float.
    Publishing {
        /// Float being published.
        float_id: &'static str,
        /// Name of this device.
        device: String,
    },
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerNotice {
    /// Publishing started.
    Started {
        /// Float being published.
        float_id: &'static str,
    },
    /// The sensor failed and the session ended.
    SensingFailed {
        /// Sensor error description.
        message: String,
    },
    /// The session was stopped.
    Stopped,
}

/// What the user entered to start publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// Float identifier.
    pub float_id: String,
    /// Free-form device name.
    pub device: String,
    /// Shared passcode.
    pub passcode: String,
}

#[derive(Debug)]
struct Session {
    watch: Subscription,
    task: JoinHandle<()>,
}

/// Publishes this device's location for one float.
#[derive(Debug)]
pub struct Tracker {
    store: Arc<dyn DocumentStore>,
    sensor: Arc<dyn LocationSensor>,
    config: TrackerConfig,
    state: Arc<Mutex<TrackerState>>,
    session: Option<Session>,
    notices: mpsc::UnboundedSender<TrackerNotice>,
}

impl Tracker {
    /// Create an idle tracker and the receiver for its notices.
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sensor: Arc<dyn LocationSensor>,
        config: TrackerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TrackerNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            store,
            sensor,
            config,
            state: Arc::new(Mutex::new(TrackerState::Idle)),
            session: None,
            notices,
        };
        (tracker, rx)
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> TrackerState {
        lock(&self.state).clone()
    }

    /// Check if a session is publishing.
    #[must_use]
    pub fn is_publishing(&self) -> bool {
        matches!(*lock(&self.state), TrackerState::Publishing { .. })
    }

    /// Start publishing.
    ///
    /// Preconditions are checked in order (passcode, device name, float,
    /// sensor) before anything is written or watched. On success the session
    /// start is recorded, the sensor watch begins and every sample is merged
    /// into the float's record until [`Tracker::stop`] or a sensing error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if a precondition fails,
    /// [`Error::AlreadyPublishing`] if a session is running, or the sensor's
    /// error if the watch cannot be started. The tracker is Idle afterwards
    /// in every error case.
    pub async fn start(&mut self, request: &StartRequest) -> Result<()> {
        if let TrackerState::Publishing { float_id, .. } = self.state() {
            return Err(Error::AlreadyPublishing {
                float_id: float_id.to_string(),
            });
        }
        if let Some(old) = self.session.take() {
            old.task.abort();
        }

        self.set_state(TrackerState::Validating);
        let (entity, device) = match self.validate(request) {
            Ok(validated) => validated,
            Err(e) => {
                self.set_state(TrackerState::Idle);
                debug!(error = %e, "Tracker start rejected");
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .merge(entity.id, float::session_start_patch(&device))
            .await
        {
            warn!(float = entity.id, error = %e, "Failed to record session start");
        }

        let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let watch = match self.sensor.start_watch(WatchOptions::from(&self.config), tx) {
            Ok(watch) => watch,
            Err(e) => {
                self.set_state(TrackerState::Idle);
                return Err(e);
            }
        };

        self.set_state(TrackerState::Publishing {
            float_id: entity.id,
            device: device.clone(),
        });
        info!(
            float = entity.id,
            device = %device,
            sensor = self.sensor.name(),
            "Tracker started"
        );
        let _ = self.notices.send(TrackerNotice::Started {
            float_id: entity.id,
        });

        let publisher = Publisher {
            store: Arc::clone(&self.store),
            float_id: entity.id,
            device,
            watch: watch.clone(),
            state: Arc::clone(&self.state),
            notices: self.notices.clone(),
        };
        let task = tokio::spawn(publisher.run(rx));
        self.session = Some(Session { watch, task });
        Ok(())
    }

    /// Stop publishing. Returns whether a running session was stopped.
    ///
    /// Nothing is written on stop.
    pub fn stop(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        let cancelled = session.watch.cancel();
        session.task.abort();
        if cancelled {
            self.set_state(TrackerState::Idle);
            info!("Tracker stopped");
            let _ = self.notices.send(TrackerNotice::Stopped);
        }
        cancelled
    }

    fn validate(&self, request: &StartRequest) -> Result<(Entity, String)> {
        if request.passcode != self.config.passcode {
            return Err(Precondition::WrongPasscode.into());
        }
        let device = request.device.trim();
        if device.is_empty() {
            return Err(Precondition::MissingDeviceName.into());
        }
        let entity = registry::lookup(&request.float_id)
            .ok_or_else(|| Precondition::UnknownFloat(request.float_id.clone()))?;
        if !self.sensor.is_available() {
            return Err(Precondition::SensorUnavailable.into());
        }
        Ok((entity, device.to_string()))
    }

    fn set_state(&self, state: TrackerState) {
        *lock(&self.state) = state;
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(state: &Mutex<TrackerState>) -> std::sync::MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards samples from one watch to the store.
struct Publisher {
    store: Arc<dyn DocumentStore>,
    float_id: &'static str,
    device: String,
    watch: Subscription,
    state: Arc<Mutex<TrackerState>>,
    notices: mpsc::UnboundedSender<TrackerNotice>,
}

impl Publisher {
    async fn run(self, mut rx: mpsc::Receiver<SensorEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                SensorEvent::Sample(sample) => {
                    if !self.watch.is_active() {
                        return;
                    }
                    let patch = float::sample_patch(&sample, &self.device);
                    if let Err(e) = self.store.merge(self.float_id, patch).await {
                        warn!(float = self.float_id, error = %e, "Failed to publish sample");
                    }
                }
                SensorEvent::Error(message) => {
                    self.end(message);
                    return;
                }
            }
        }
        self.end("location source stopped".to_string());
    }

    /// End the session after a sensor failure, unless it was already stopped.
    fn end(&self, message: String) {
        if !self.watch.cancel() {
            return;
        }
        *lock(&self.state) = TrackerState::Idle;
        warn!(float = self.float_id, error = %message, "Tracker stopped by sensing error");
        let _ = self.notices.send(TrackerNotice::SensingFailed { message });
    }
}
