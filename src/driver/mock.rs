//! Mock oscilloscope for testing
//!
//! `MockDso` implements [`DsoDriver`] without hardware. It provides:
//! - a call log for verifying exactly which driver calls a setting produced
//! - one-shot failure injection
//! - simulated fetch latency, for exercising acquisition timeouts
//! - programmable waveforms and time axes
//!
//! Without a programmed waveform, a channel returns a synthetic pulse record
//! whose length follows the memory size (`MSIZ`) and segment count the mock
//! has been told about, so that segment averaging sees a consistent buffer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{DsoDriver, TimedWaveform};
use crate::error::{DsoError, DsoResult};
use crate::settings::{
    decode_memory_size, Channel, SampleMode, TriggerMode, TriggerSource, SEGMENT_PADDING,
};

/// Sample interval of synthetic records, in seconds.
pub const MOCK_SAMPLE_INTERVAL: f64 = 1e-10;

const MOCK_DEFAULT_MEMORY: usize = 10_000;

#[derive(Debug)]
struct MockState {
    memory: usize,
    segments: u32,
    hor_offset: f64,
    trigger_source: TriggerSource,
    trigger_mode: TriggerMode,
    waveforms: HashMap<Channel, Vec<f64>>,
    time_axis: Option<Vec<f64>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            memory: MOCK_DEFAULT_MEMORY,
            segments: 1,
            hor_offset: 0.0,
            trigger_source: TriggerSource::Ext,
            trigger_mode: TriggerMode::Normal,
            waveforms: HashMap::new(),
            time_axis: None,
        }
    }
}

/// Mock oscilloscope driver
///
/// # Example
///
/// ```
/// use lecroy_daq::driver::{DsoDriver, MockDso};
/// use lecroy_daq::settings::Channel;
///
/// # tokio_test::block_on(async {
/// let dso = MockDso::new().with_waveform(Channel::C1, vec![0.0, 1.0, 0.0]);
/// let wf = dso.scaled_waveform(Channel::C1).await.unwrap();
/// assert_eq!(wf, vec![0.0, 1.0, 0.0]);
/// assert_eq!(dso.call_log(), vec!["scaled_waveform(C1)"]);
/// # })
/// ```
pub struct MockDso {
    connected: AtomicBool,
    latency: Duration,
    should_fail_next: AtomicBool,
    call_log: Arc<Mutex<Vec<String>>>,
    state: Mutex<MockState>,
}

impl MockDso {
    /// Create a new mock with no latency and synthetic waveforms
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            latency: Duration::ZERO,
            should_fail_next: AtomicBool::new(false),
            call_log: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Delay every waveform fetch by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Serve `values` for `channel`
    pub fn with_waveform(self, channel: Channel, values: Vec<f64>) -> Self {
        self.set_waveform(channel, values);
        self
    }

    /// Serve `values` for `channel` from now on
    pub fn set_waveform(&self, channel: Channel, values: Vec<f64>) {
        self.state().waveforms.insert(channel, values);
    }

    /// Serve `times` as the time vector of every channel
    pub fn set_time_axis(&self, times: Vec<f64>) {
        self.state().time_axis = Some(times);
    }

    /// Fail the next driver call
    pub fn trigger_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Get a copy of the call log for verification
    pub fn call_log(&self) -> Vec<String> {
        self.log().clone()
    }

    /// Clear the call log
    pub fn clear_call_log(&self) {
        self.log().clear();
    }

    /// Whether `disconnect` has been called
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Trigger mode last set through the driver
    pub fn trigger_mode(&self) -> TriggerMode {
        self.state().trigger_mode
    }

    /// Record length the mock currently produces for synthetic waveforms
    pub fn record_len(&self) -> usize {
        let state = self.state();
        state.segments as usize * (state.memory + SEGMENT_PADDING)
    }

    fn log(&self) -> MutexGuard<'_, Vec<String>> {
        self.call_log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log the call, then apply connection state and injected failure.
    fn enter(&self, call: String) -> DsoResult<()> {
        self.log().push(call.clone());

        if !self.is_connected() {
            return Err(DsoError::ConnectionUnavailable("mock disconnected".into()));
        }
        if self.should_fail_next.swap(false, Ordering::SeqCst) {
            return Err(DsoError::rejected(call, "mock failure"));
        }
        Ok(())
    }

    fn synthetic(&self, channel: Channel) -> Vec<f64> {
        let state = self.state();
        let segment_len = state.memory + SEGMENT_PADDING;
        let amplitude = -0.1 * f64::from(channel.number());
        let center = segment_len as f64 / 4.0;
        let width = (segment_len as f64 / 50.0).max(1.0);

        (0..state.segments as usize * segment_len)
            .map(|i| {
                let x = (i % segment_len) as f64 - center;
                amplitude * (-(x * x) / (2.0 * width * width)).exp()
            })
            .collect()
    }

    fn values(&self, channel: Channel) -> Vec<f64> {
        let programmed = self.state().waveforms.get(&channel).cloned();
        programmed.unwrap_or_else(|| self.synthetic(channel))
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for MockDso {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DsoDriver for MockDso {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    async fn identify(&self) -> DsoResult<String> {
        self.enter("identify".into())?;
        Ok("LECROY,MOCK-WAVERUNNER,0000,0.0".into())
    }

    async fn set_trigger_source(&self, source: TriggerSource) -> DsoResult<()> {
        self.enter(format!("set_trigger_source({})", source.label()))?;
        self.state().trigger_source = source;
        Ok(())
    }

    async fn set_trigger_mode(&self, mode: TriggerMode) -> DsoResult<()> {
        self.enter(format!("set_trigger_mode({})", mode.label()))?;
        self.state().trigger_mode = mode;
        Ok(())
    }

    async fn set_trigger_level(&self, source: TriggerSource, level: f64) -> DsoResult<()> {
        self.enter(format!("set_trigger_level({}, {})", source.label(), level))
    }

    async fn set_ver_scale(&self, channel: Channel, volts_per_div: f64) -> DsoResult<()> {
        self.enter(format!("set_ver_scale({}, {})", channel, volts_per_div))
    }

    async fn set_ver_offset(&self, channel: Channel, offset: f64) -> DsoResult<()> {
        self.enter(format!("set_ver_offset({}, {})", channel, offset))
    }

    async fn set_hor_offset(&self, seconds: f64) -> DsoResult<()> {
        self.enter(format!("set_hor_offset({})", seconds))?;
        self.state().hor_offset = seconds;
        Ok(())
    }

    async fn set_sample_mode(&self, mode: SampleMode) -> DsoResult<()> {
        match mode {
            SampleMode::RealTime => {
                self.enter("set_sample_mode(REAL_TIME)".into())?;
                self.state().segments = 1;
            }
            SampleMode::Sequence(n) => {
                self.enter(format!("set_sample_mode(SEQUENCE {})", n))?;
                self.state().segments = n.max(1);
            }
        }
        Ok(())
    }

    async fn clear_sweeps(&self) -> DsoResult<()> {
        self.enter("clear_sweeps".into())
    }

    async fn write(&self, command: &str) -> DsoResult<()> {
        self.enter(format!("write({})", command))?;

        if let Some(size) = command.strip_prefix("MSIZ ") {
            self.state().memory = decode_memory_size(size)?;
        }
        Ok(())
    }

    async fn scaled_waveform_with_times(&self, channel: Channel) -> DsoResult<TimedWaveform> {
        self.enter(format!("scaled_waveform_with_times({})", channel))?;
        self.simulate_latency().await;

        let values = self.values(channel);
        let (programmed, offset) = {
            let state = self.state();
            (state.time_axis.clone(), state.hor_offset)
        };
        let times = programmed.unwrap_or_else(|| {
            (0..values.len())
                .map(|i| offset + MOCK_SAMPLE_INTERVAL * i as f64)
                .collect()
        });
        Ok(TimedWaveform { times, values })
    }

    async fn scaled_waveform(&self, channel: Channel) -> DsoResult<Vec<f64>> {
        self.enter(format!("scaled_waveform({})", channel))?;
        self.simulate_latency().await;
        Ok(self.values(channel))
    }

    async fn disconnect(&self) -> DsoResult<()> {
        self.log().push("disconnect".into());
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("MockDso disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logs_calls_in_order() {
        let dso = MockDso::new();
        dso.set_trigger_level(TriggerSource::Ext, 0.3).await.unwrap();
        dso.write("C2:TRA OFF").await.unwrap();
        dso.set_sample_mode(SampleMode::Sequence(3)).await.unwrap();

        assert_eq!(
            dso.call_log(),
            vec![
                "set_trigger_level(EXT, 0.3)",
                "write(C2:TRA OFF)",
                "set_sample_mode(SEQUENCE 3)",
            ]
        );

        dso.clear_call_log();
        assert!(dso.call_log().is_empty());
    }

    #[tokio::test]
    async fn failure_is_one_shot() {
        let dso = MockDso::new();
        dso.trigger_failure();

        let err = dso.clear_sweeps().await.unwrap_err();
        assert!(matches!(err, DsoError::CommandRejected { .. }));
        assert!(dso.clear_sweeps().await.is_ok());
    }

    #[tokio::test]
    async fn synthetic_record_follows_memory_and_segments() {
        let dso = MockDso::new();
        assert_eq!(dso.scaled_waveform(Channel::C1).await.unwrap().len(), 10_002);

        dso.write("MSIZ 1K").await.unwrap();
        dso.set_sample_mode(SampleMode::Sequence(4)).await.unwrap();
        assert_eq!(dso.record_len(), 4 * 1002);

        let wf = dso.scaled_waveform_with_times(Channel::C2).await.unwrap();
        assert_eq!(wf.values.len(), 4 * 1002);
        assert_eq!(wf.times.len(), wf.values.len());
        assert!(wf.values.iter().any(|v| *v < -0.1));
    }

    #[tokio::test]
    async fn programmed_time_axis_is_served() {
        let dso = MockDso::new().with_waveform(Channel::C3, vec![1.0, 2.0]);
        dso.set_time_axis(vec![0.5, 0.6]);

        let wf = dso.scaled_waveform_with_times(Channel::C3).await.unwrap();
        assert_eq!(wf.times, vec![0.5, 0.6]);
        assert_eq!(wf.values, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn disconnected_mock_refuses_calls() {
        let dso = MockDso::new();
        dso.disconnect().await.unwrap();
        assert!(!dso.is_connected());

        let err = dso.identify().await.unwrap_err();
        assert!(matches!(err, DsoError::ConnectionUnavailable(_)));
    }

    #[tokio::test]
    async fn trigger_mode_is_tracked() {
        let dso = MockDso::new();
        dso.set_trigger_mode(TriggerMode::Single).await.unwrap();
        assert_eq!(dso.trigger_mode(), TriggerMode::Single);
    }
}
