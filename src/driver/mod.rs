//! Instrument drivers.
//!
//! [`DsoDriver`] is the seam between the detector and the oscilloscope: named
//! setters for the handful of settings the detector exposes, a raw command
//! write, and the two scaled-waveform fetches. Implementations:
//!
//! - [`scpi::LecroyScpiDriver`] speaks the WaveRunner remote command set over
//!   any [`scpi::ScpiTransport`] (VICP over TCP, or VISA).
//! - [`mock::MockDso`] records calls and serves programmed waveforms, for tests
//!   and for running without hardware.
//!
//! [`connect`] builds a driver from a [`ConnectionConfig`]; the connection is
//! owned by whoever calls it and released with [`DsoDriver::disconnect`].

pub mod mock;
pub mod scpi;
#[cfg(feature = "instrument_visa")]
pub mod visa;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConnectionConfig, TransportConfig};
use crate::error::{DsoError, DsoResult};
use crate::settings::{Channel, SampleMode, TriggerMode, TriggerSource};

pub use mock::MockDso;
pub use scpi::{LecroyScpiDriver, ScpiTransport, VicpTransport};

/// A scaled waveform together with its time vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimedWaveform {
    /// Sample times in seconds
    pub times: Vec<f64>,
    /// Amplitudes in physical units
    pub values: Vec<f64>,
}

/// Capability: LeCroy-style digital oscilloscope.
///
/// # Contract
/// - Every setter issues exactly the commands needed for that one setting.
/// - Amplitudes returned by the waveform fetches are already scaled to volts.
/// - Failures are returned, never retried.
#[async_trait]
pub trait DsoDriver: Send + Sync {
    /// Short tag naming the implementation (e.g. "vicp", "mock").
    fn driver_type(&self) -> &'static str;

    /// Instrument identification string.
    async fn identify(&self) -> DsoResult<String>;

    /// Select the edge trigger source.
    async fn set_trigger_source(&self, source: TriggerSource) -> DsoResult<()>;

    /// Select the trigger sweep mode.
    async fn set_trigger_mode(&self, mode: TriggerMode) -> DsoResult<()>;

    /// Set the trigger level of the given source, in volts.
    async fn set_trigger_level(&self, source: TriggerSource, level: f64) -> DsoResult<()>;

    /// Set vertical scale in volts per division.
    async fn set_ver_scale(&self, channel: Channel, volts_per_div: f64) -> DsoResult<()>;

    /// Set vertical offset in volts.
    async fn set_ver_offset(&self, channel: Channel, offset: f64) -> DsoResult<()>;

    /// Set horizontal offset in seconds.
    async fn set_hor_offset(&self, seconds: f64) -> DsoResult<()>;

    /// Switch between real-time and sequence acquisition.
    async fn set_sample_mode(&self, mode: SampleMode) -> DsoResult<()>;

    /// Clear accumulated sweeps (averages, persistence, statistics).
    async fn clear_sweeps(&self) -> DsoResult<()>;

    /// Send a raw remote command.
    async fn write(&self, command: &str) -> DsoResult<()>;

    /// Fetch a scaled waveform and its time vector.
    async fn scaled_waveform_with_times(&self, channel: Channel) -> DsoResult<TimedWaveform>;

    /// Fetch a scaled waveform without times.
    async fn scaled_waveform(&self, channel: Channel) -> DsoResult<Vec<f64>>;

    /// Release the connection.
    async fn disconnect(&self) -> DsoResult<()> {
        Ok(())
    }
}

/// Open a driver for the configured transport.
///
/// For VISA without an explicit resource the first discovered resource is
/// used.
pub async fn connect(config: &ConnectionConfig) -> DsoResult<Arc<dyn DsoDriver>> {
    let timeout = Duration::from_millis(config.timeout_ms);

    match &config.transport {
        TransportConfig::Mock => {
            tracing::info!("Creating mock oscilloscope driver");
            Ok(Arc::new(MockDso::new()))
        }
        TransportConfig::Tcp { host, port } => {
            tracing::info!("Connecting to oscilloscope at {}:{} (VICP)", host, port);
            let transport = VicpTransport::connect(host, *port, timeout).await?;
            let driver = LecroyScpiDriver::connect(transport).await?;
            Ok(Arc::new(driver))
        }
        TransportConfig::Visa { resource } => connect_visa(resource.as_deref(), timeout).await,
    }
}

#[cfg(feature = "instrument_visa")]
async fn connect_visa(resource: Option<&str>, timeout: Duration) -> DsoResult<Arc<dyn DsoDriver>> {
    let resource = match resource {
        Some(resource) => resource.to_string(),
        None => discover_resources()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DsoError::ConnectionUnavailable("no VISA resources found".into()))?,
    };
    tracing::info!("Connecting to oscilloscope at {} (VISA)", resource);
    let transport = visa::VisaTransport::open(&resource, timeout).await?;
    let driver = LecroyScpiDriver::connect(transport).await?;
    Ok(Arc::new(driver))
}

#[cfg(not(feature = "instrument_visa"))]
async fn connect_visa(
    _resource: Option<&str>,
    _timeout: Duration,
) -> DsoResult<Arc<dyn DsoDriver>> {
    Err(DsoError::FeatureNotEnabled("instrument_visa".into()))
}

/// List instrument addresses known to the VISA resource manager.
pub async fn discover_resources() -> DsoResult<Vec<String>> {
    #[cfg(feature = "instrument_visa")]
    {
        visa::discover_resources().await
    }
    #[cfg(not(feature = "instrument_visa"))]
    {
        Err(DsoError::FeatureNotEnabled("instrument_visa".into()))
    }
}
