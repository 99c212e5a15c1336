//! The oscilloscope detector.
//!
//! `LecroyDetector` owns the instrument session and follows the usual detector
//! lifecycle: `initialize` → repeated {`apply_setting`, `grab`} → `stop` →
//! `close`.
//!
//! All session state (driver handle, settings tree, channel list, segment
//! layout, rate bookkeeping) sits behind one `tokio::sync::Mutex`. Dispatch and
//! grabs hold it for their whole duration, so a setting change never lands in
//! the middle of a grab and two grabs never share the instrument.
//!
//! Results and status notifications go out on a broadcast channel; every
//! failure is both returned to the caller and published as an error status.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::acquisition::Acquisition;
use crate::config::{ConnectionConfig, LecroyConfig, TransportConfig};
use crate::dispatch::{Dispatcher, ScopeState};
use crate::driver::{self, DsoDriver};
use crate::error::{DsoError, DsoResult};
use crate::events::{AcquisitionResult, DetectorEvent, StatusMessage};
use crate::settings::{Channel, EntrySnapshot, ScopeSettings, Setting, SettingId};

/// Capacity of the event channel; slow subscribers lose the oldest events.
pub const EVENT_CAPACITY: usize = 64;

/// Outcome of [`LecroyDetector::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitInfo {
    /// Instrument identification
    pub info: String,
    /// Whether the detector is ready to grab
    pub initialized: bool,
}

struct Session {
    driver: Option<Arc<dyn DsoDriver>>,
    state: ScopeState,
    acquisition: Acquisition,
}

impl Session {
    fn driver(&self) -> DsoResult<Arc<dyn DsoDriver>> {
        self.driver.clone().ok_or_else(|| {
            DsoError::ConnectionUnavailable("detector is not initialized".to_string())
        })
    }
}

/// LeCroy WaveRunner as a 1-D detector.
pub struct LecroyDetector {
    session: Mutex<Session>,
    connection: ConnectionConfig,
    events: broadcast::Sender<DetectorEvent>,
}

impl LecroyDetector {
    /// Build a detector from a validated configuration. No connection is made
    /// until [`initialize`](Self::initialize).
    pub fn new(config: &LecroyConfig) -> DsoResult<Self> {
        config.validate().map_err(DsoError::Configuration)?;

        let state = ScopeState::new(ScopeSettings::from_config(&config.settings))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            session: Mutex::new(Session {
                driver: None,
                state,
                acquisition: Acquisition::new(config.acquisition.clone()),
            }),
            connection: config.connection.clone(),
            events,
        })
    }

    /// Receive results and status notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DetectorEvent> {
        self.events.subscribe()
    }

    /// Connect with the configured transport, then bring the instrument into
    /// the state described by the settings tree.
    pub async fn initialize(&self) -> DsoResult<InitInfo> {
        let driver = match driver::connect(&self.connection).await {
            Ok(driver) => driver,
            Err(err) => return Err(self.fail("initialize", err)),
        };
        let address = describe_transport(&self.connection.transport);
        self.initialize_inner(driver, Some(address)).await
    }

    /// Same as [`initialize`](Self::initialize) with an already connected
    /// driver.
    pub async fn initialize_with(&self, driver: Arc<dyn DsoDriver>) -> DsoResult<InitInfo> {
        self.initialize_inner(driver, None).await
    }

    async fn initialize_inner(
        &self,
        driver: Arc<dyn DsoDriver>,
        address: Option<String>,
    ) -> DsoResult<InitInfo> {
        let mut session = self.session.lock().await;

        if let Some(previous) = session.driver.take() {
            tracing::warn!(
                driver = previous.driver_type(),
                "Initialize while a session is open, releasing the previous driver"
            );
            if let Err(err) = previous.disconnect().await {
                tracing::warn!("Releasing the previous driver failed: {}", err);
            }
            self.publish(DetectorEvent::Status(StatusMessage::warning(
                "initialize",
                "previous instrument session released",
            )));
        }

        let result = async {
            let info = driver.identify().await?;

            if let Some(address) = address {
                session
                    .state
                    .settings
                    .store(&Setting::ResourceAddress(address))
                    .await?;
            }

            Dispatcher::new(driver.as_ref(), &mut session.state)
                .replay()
                .await?;
            Ok::<_, DsoError>(info)
        }
        .await;

        match result {
            Ok(info) => {
                tracing::info!(driver = driver.driver_type(), "Detector initialized: {}", info);
                session.driver = Some(driver);
                self.publish(DetectorEvent::Status(StatusMessage::info(
                    "initialize",
                    info.clone(),
                )));
                Ok(InitInfo {
                    info,
                    initialized: true,
                })
            }
            Err(err) => Err(self.fail("initialize", err)),
        }
    }

    /// Apply one changed entry.
    pub async fn apply_setting(&self, setting: Setting) -> DsoResult<()> {
        let mut session = self.session.lock().await;
        let result = async {
            let driver = session.driver()?;
            Dispatcher::new(driver.as_ref(), &mut session.state)
                .apply(setting)
                .await
        }
        .await;
        result.map_err(|err| self.fail("apply_setting", err))
    }

    /// Apply one entry by its stable name; unknown names are ignored.
    pub async fn apply_named(&self, name: &str, value: &Value) -> DsoResult<()> {
        let mut session = self.session.lock().await;
        let result = async {
            let driver = session.driver()?;
            Dispatcher::new(driver.as_ref(), &mut session.state)
                .apply_named(name, value)
                .await
        }
        .await;
        result.map_err(|err| self.fail("apply_setting", err))
    }

    /// Acquire one result and publish it.
    pub async fn grab(&self) -> DsoResult<AcquisitionResult> {
        let mut session = self.session.lock().await;
        let result = async {
            let driver = session.driver()?;
            let Session {
                state, acquisition, ..
            } = &mut *session;
            acquisition.grab(driver.as_ref(), state).await
        }
        .await;

        match result {
            Ok(data) => {
                self.publish(DetectorEvent::Data(data.clone()));
                Ok(data)
            }
            Err(err) => Err(self.fail("grab", err)),
        }
    }

    /// Stop an acquisition. Grabs are request/response, so nothing is sent to
    /// the instrument.
    pub async fn stop(&self) -> DsoResult<()> {
        tracing::info!("Stop requested");
        Ok(())
    }

    /// Release the instrument. Later grabs fail with `ConnectionUnavailable`
    /// until the detector is initialized again.
    pub async fn close(&self) -> DsoResult<()> {
        let mut session = self.session.lock().await;
        let Some(driver) = session.driver.take() else {
            return Ok(());
        };

        match driver.disconnect().await {
            Ok(()) => {
                tracing::info!("Detector closed");
                self.publish(DetectorEvent::Status(StatusMessage::info(
                    "close",
                    "instrument released",
                )));
                Ok(())
            }
            Err(err) => Err(self.fail("close", err)),
        }
    }

    /// Whether a driver is currently held.
    pub async fn is_initialized(&self) -> bool {
        self.session.lock().await.driver.is_some()
    }

    /// Enabled channels in C1..C4 order.
    pub async fn channels(&self) -> Vec<Channel> {
        self.session.lock().await.state.channels().to_vec()
    }

    /// Serializable view of the settings tree.
    pub async fn settings_snapshot(&self) -> Vec<EntrySnapshot> {
        self.session.lock().await.state.settings.snapshot()
    }

    /// Current value of one entry.
    pub async fn current(&self, id: SettingId) -> Setting {
        self.session.lock().await.state.settings.current(id)
    }

    fn publish(&self, event: DetectorEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn fail(&self, operation: &str, err: DsoError) -> DsoError {
        tracing::error!(operation, kind = err.kind(), "{}", err);
        self.publish(DetectorEvent::Status(StatusMessage::from_error(
            operation, &err,
        )));
        err
    }
}

fn describe_transport(transport: &TransportConfig) -> String {
    match transport {
        TransportConfig::Mock => "mock".to_string(),
        TransportConfig::Tcp { host, port } => format!("{host}:{port}"),
        TransportConfig::Visa { resource } => resource
            .clone()
            .unwrap_or_else(|| "first VISA resource".to_string()),
    }
}
