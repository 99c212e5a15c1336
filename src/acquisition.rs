//! Acquisition loop.
//!
//! A grab fetches one scaled waveform per enabled channel, averages segmented
//! buffers when the scope runs in sequence mode, and packages the traces with
//! a shared time axis into an [`AcquisitionResult`].
//!
//! # Segment layout
//!
//! In sequence mode the scope returns all segments of a channel back to back
//! in one flat buffer. Every segment is `memory + 2` samples long, so segment
//! `k` starts at `k * (memory + 2)`. The averaged trace is the sample-by-sample
//! arithmetic mean over all segments.
//!
//! # Time axis
//!
//! [`TimeAxisFetch::SharedFromFirst`] fetches the first enabled channel with
//! its time vector and every other channel amplitude-only.
//! [`TimeAxisFetch::PerChannelByPosition`] reproduces the behaviour older
//! acquisition setups were recorded with: every trace is fetched with times
//! from the channel whose number is its position in the channel list plus
//! one, and the last time vector wins. With channels C2 and C4 enabled that
//! fetches C1 and C2.

use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::instrument;

use crate::config::AcquisitionConfig;
use crate::dispatch::ScopeState;
use crate::driver::{DsoDriver, TimedWaveform};
use crate::error::{DsoError, DsoResult};
use crate::events::{AcquisitionResult, Axis, ChannelTrace};
use crate::settings::{Channel, ScopeSettings, TriggerMode, SEGMENT_PADDING};

// =============================================================================
// Segments
// =============================================================================

/// Geometry of a (possibly segmented) waveform buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    /// Samples per segment, padding included
    pub segment_len: usize,
    /// Number of segments in the buffer
    pub segments: usize,
}

impl SegmentLayout {
    /// Layout for `memory` samples per segment and `segments` segments.
    pub fn new(memory: usize, segments: usize) -> Self {
        Self {
            segment_len: memory + SEGMENT_PADDING,
            segments: segments.max(1),
        }
    }

    /// Layout implied by the memory size and segment count of the tree.
    pub fn from_settings(settings: &ScopeSettings) -> DsoResult<Self> {
        let memory = settings.memory_samples()?;
        let segments = settings.number_of_segments.get() as usize;
        Ok(Self::new(memory, segments))
    }

    /// Whether the buffer holds more than one segment.
    pub fn is_sequence(&self) -> bool {
        self.segments > 1
    }

    /// Samples needed to cover every segment.
    pub fn total_len(&self) -> usize {
        self.segments * self.segment_len
    }

    /// Start offset of each segment.
    pub fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.segments).map(move |k| k * self.segment_len)
    }
}

/// Average the segments of a flat buffer sample by sample.
///
/// Samples past the last segment are ignored.
pub fn average_segments(buffer: &[f64], layout: SegmentLayout) -> DsoResult<Vec<f64>> {
    let expected = layout.total_len();
    if buffer.len() < expected {
        return Err(DsoError::WaveformTooShort {
            expected,
            actual: buffer.len(),
        });
    }

    let mut sum = vec![0.0; layout.segment_len];
    for offset in layout.offsets() {
        let segment = &buffer[offset..offset + layout.segment_len];
        for (acc, v) in sum.iter_mut().zip(segment) {
            *acc += v;
        }
    }

    let n = layout.segments as f64;
    Ok(sum.into_iter().map(|s| s / n).collect())
}

// =============================================================================
// Rates
// =============================================================================

/// How traces obtain their time axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAxisFetch {
    /// First enabled channel with times, the others amplitude-only
    #[default]
    SharedFromFirst,
    /// Every trace with times, addressed by list position
    PerChannelByPosition,
}

/// Grab-rate bookkeeping.
#[derive(Debug, Default)]
pub struct RateTracker {
    last_start: Option<Instant>,
}

impl RateTracker {
    /// Record the start of a grab and return the grab rate in Hz, measured
    /// between this start and the previous one (0 for the first grab).
    pub fn record_start(&mut self, now: Instant) -> f64 {
        let rate = match self.last_start {
            Some(previous) => {
                let interval = now.saturating_duration_since(previous).as_secs_f64();
                if interval > 0.0 {
                    1.0 / interval
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last_start = Some(now);
        rate
    }
}

// =============================================================================
// Grab
// =============================================================================

/// Runs grabs against a driver.
#[derive(Debug)]
pub struct Acquisition {
    config: AcquisitionConfig,
    rates: RateTracker,
}

impl Acquisition {
    /// Acquisition with the given loop configuration.
    pub fn new(config: AcquisitionConfig) -> Self {
        Self {
            config,
            rates: RateTracker::default(),
        }
    }

    /// Loop configuration in use.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Perform one grab and update the rate counters of the tree.
    #[instrument(skip_all, fields(channels = ?state.channels()))]
    pub async fn grab(
        &mut self,
        driver: &dyn DsoDriver,
        state: &mut ScopeState,
    ) -> DsoResult<AcquisitionResult> {
        let started = Instant::now();
        let timestamp = Utc::now();
        let grabs_per_second = self.rates.record_start(started);

        if state.settings.trigger_mode.get() == TriggerMode::Single {
            driver.set_trigger_mode(TriggerMode::Single).await?;
        }

        let channels = state.channels().to_vec();
        let layout = state.layout();

        let (mut times, mut traces) = match self.config.time_axis {
            TimeAxisFetch::SharedFromFirst => self.fetch_shared(driver, &channels).await?,
            TimeAxisFetch::PerChannelByPosition => {
                self.fetch_by_position(driver, &channels).await?
            }
        };

        if layout.is_sequence() && !traces.is_empty() {
            for trace in &mut traces {
                *trace = average_segments(trace, layout)?;
            }
            times.truncate(layout.segment_len);
        }

        let elapsed = started.elapsed().as_secs_f64();
        state
            .settings
            .publish_rates(grabs_per_second, elapsed)
            .await;
        tracing::debug!(elapsed, grabs_per_second, "Grab complete");

        Ok(AcquisitionResult {
            name: self.config.result_name.clone(),
            timestamp,
            time_axis: Axis::time_of_flight(times),
            channels: channels
                .iter()
                .zip(traces)
                .map(|(c, data)| ChannelTrace {
                    label: c.to_string(),
                    data,
                })
                .collect(),
        })
    }

    async fn fetch_shared(
        &self,
        driver: &dyn DsoDriver,
        channels: &[Channel],
    ) -> DsoResult<(Vec<f64>, Vec<Vec<f64>>)> {
        let Some((first, rest)) = channels.split_first() else {
            return Ok((Vec::new(), Vec::new()));
        };

        let TimedWaveform { times, values } = self
            .bounded(driver.scaled_waveform_with_times(*first))
            .await?;

        let others = try_join_all(
            rest.iter()
                .map(|c| self.bounded(driver.scaled_waveform(*c))),
        )
        .await?;

        let mut traces = Vec::with_capacity(channels.len());
        traces.push(values);
        traces.extend(others);
        Ok((times, traces))
    }

    async fn fetch_by_position(
        &self,
        driver: &dyn DsoDriver,
        channels: &[Channel],
    ) -> DsoResult<(Vec<f64>, Vec<Vec<f64>>)> {
        let mut times = Vec::new();
        let mut traces = Vec::with_capacity(channels.len());

        for position in 0..channels.len() {
            let channel = Channel::from_number(position + 1).ok_or_else(|| {
                DsoError::rejected(
                    "scaled_waveform_with_times",
                    format!("no channel at position {}", position + 1),
                )
            })?;
            let wf = self
                .bounded(driver.scaled_waveform_with_times(channel))
                .await?;
            times = wf.times;
            traces.push(wf.values);
        }
        Ok((times, traces))
    }

    async fn bounded<T>(&self, fetch: impl Future<Output = DsoResult<T>>) -> DsoResult<T> {
        let limit: Duration = self.config.timeout();
        tokio::time::timeout(limit, fetch)
            .await
            .map_err(|_| DsoError::AcquisitionTimeout(limit))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDso;
    use crate::settings::Setting;

    fn state_with(settings: &[Setting]) -> ScopeState {
        let mut tree = ScopeSettings::default();
        futures::executor::block_on(async {
            for s in settings {
                tree.store(s).await.unwrap();
            }
        });
        ScopeState::new(tree).unwrap()
    }

    #[test]
    fn layout_offsets_follow_stride() {
        let layout = SegmentLayout::new(10_000, 3);
        assert_eq!(layout.segment_len, 10_002);
        assert_eq!(layout.total_len(), 30_006);
        assert_eq!(layout.offsets().collect::<Vec<_>>(), vec![0, 10_002, 20_004]);
        assert!(layout.is_sequence());
        assert!(!SegmentLayout::new(500, 1).is_sequence());
    }

    #[test]
    fn averages_elementwise() {
        let layout = SegmentLayout::new(1, 2);
        let buffer = [1.0, 2.0, 3.0, 3.0, 4.0, 5.0, 99.0];
        assert_eq!(average_segments(&buffer, layout).unwrap(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let layout = SegmentLayout::new(1, 2);
        let err = average_segments(&[1.0; 5], layout).unwrap_err();
        assert!(matches!(
            err,
            DsoError::WaveformTooShort {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn rate_tracker_measures_interval() {
        let mut rates = RateTracker::default();
        let t0 = Instant::now();
        assert_eq!(rates.record_start(t0), 0.0);
        let gps = rates.record_start(t0 + Duration::from_millis(250));
        assert!((gps - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shared_axis_fetches_times_once() {
        let dso = MockDso::new()
            .with_waveform(Channel::C1, vec![1.0, 2.0])
            .with_waveform(Channel::C3, vec![3.0, 4.0]);
        dso.set_time_axis(vec![0.0, 1e-9]);
        let mut state = state_with(&[
            Setting::ChannelEnabled(Channel::C2, false),
            Setting::ChannelEnabled(Channel::C4, false),
        ]);

        let mut acq = Acquisition::new(AcquisitionConfig::default());
        let result = acq.grab(&dso, &mut state).await.unwrap();

        assert_eq!(
            dso.call_log(),
            vec!["scaled_waveform_with_times(C1)", "scaled_waveform(C3)"]
        );
        assert_eq!(result.labels(), vec!["C1", "C3"]);
        assert_eq!(result.channel("C3").unwrap().data, vec![3.0, 4.0]);
        assert_eq!(result.time_axis.data, vec![0.0, 1e-9]);
        assert_eq!(result.time_axis.label, "Time of flight");
    }

    #[tokio::test]
    async fn legacy_axis_addresses_by_position() {
        let dso = MockDso::new()
            .with_waveform(Channel::C1, vec![1.0])
            .with_waveform(Channel::C2, vec![2.0]);
        let mut state = state_with(&[
            Setting::ChannelEnabled(Channel::C1, false),
            Setting::ChannelEnabled(Channel::C3, false),
        ]);

        let config = AcquisitionConfig {
            time_axis: TimeAxisFetch::PerChannelByPosition,
            ..Default::default()
        };
        let mut acq = Acquisition::new(config);
        let result = acq.grab(&dso, &mut state).await.unwrap();

        assert_eq!(
            dso.call_log(),
            vec![
                "scaled_waveform_with_times(C1)",
                "scaled_waveform_with_times(C2)",
            ]
        );
        assert_eq!(result.labels(), vec!["C2", "C4"]);
        assert_eq!(result.channel("C4").unwrap().data, vec![2.0]);
    }

    #[tokio::test]
    async fn sequence_mode_averages_and_truncates_axis() {
        let dso = MockDso::new();
        let mut state = state_with(&[
            Setting::MemorySize("500".into()),
            Setting::NumberOfSegments(2),
            Setting::ChannelEnabled(Channel::C2, false),
            Setting::ChannelEnabled(Channel::C3, false),
            Setting::ChannelEnabled(Channel::C4, false),
        ]);
        let first: Vec<f64> = (0..502).map(f64::from).collect();
        let second: Vec<f64> = (0..502).map(|i| f64::from(i) + 2.0).collect();
        dso.set_waveform(Channel::C1, [first, second].concat());

        let mut acq = Acquisition::new(AcquisitionConfig::default());
        let result = acq.grab(&dso, &mut state).await.unwrap();

        let c1 = &result.channel("C1").unwrap().data;
        assert_eq!(c1.len(), 502);
        assert_eq!(c1[0], 1.0);
        assert_eq!(c1[501], 502.0);
        assert_eq!(result.time_axis.data.len(), 502);
    }

    #[tokio::test]
    async fn single_mode_rearms_trigger() {
        let dso = MockDso::new();
        let mut state = state_with(&[
            Setting::TriggerMode(TriggerMode::Single),
            Setting::ChannelEnabled(Channel::C1, false),
            Setting::ChannelEnabled(Channel::C2, false),
            Setting::ChannelEnabled(Channel::C3, false),
            Setting::ChannelEnabled(Channel::C4, false),
        ]);

        let mut acq = Acquisition::new(AcquisitionConfig::default());
        let result = acq.grab(&dso, &mut state).await.unwrap();

        assert_eq!(dso.call_log(), vec!["set_trigger_mode(SINGLE)"]);
        assert!(result.is_empty());
        assert!(result.time_axis.data.is_empty());
    }

    #[tokio::test]
    async fn slow_fetch_times_out() {
        let dso = MockDso::new().with_latency(Duration::from_millis(200));
        let mut state = state_with(&[]);

        let config = AcquisitionConfig {
            timeout_ms: 20,
            ..Default::default()
        };
        let mut acq = Acquisition::new(config);
        let err = acq.grab(&dso, &mut state).await.unwrap_err();
        assert!(matches!(err, DsoError::AcquisitionTimeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn grab_publishes_rates() {
        let dso = MockDso::new().with_waveform(Channel::C1, vec![0.0]);
        let mut state = state_with(&[
            Setting::ChannelEnabled(Channel::C2, false),
            Setting::ChannelEnabled(Channel::C3, false),
            Setting::ChannelEnabled(Channel::C4, false),
        ]);
        let mut tps = state.settings.treatment_per_second.subscribe();

        let mut acq = Acquisition::new(AcquisitionConfig::default());
        acq.grab(&dso, &mut state).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        acq.grab(&dso, &mut state).await.unwrap();

        assert!(tps.has_changed().unwrap());
        assert!(state.settings.grabs_per_second.get() > 0.0);
        assert!(state.settings.treatment_per_second.get() >= 0.0);
    }
}
