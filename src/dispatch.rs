//! Settings dispatcher and channel-list maintainer.
//!
//! [`Dispatcher::apply`] takes exactly one changed entry, validates and stores
//! it in the settings tree, then issues the driver call(s) that entry maps to.
//! The mapping is an exhaustive `match` over [`Setting`].
//!
//! Changing a channel enable flag recomputes the ordered channel list and
//! mirrors the flag into that channel's display entry, which then goes through
//! the same path as a direct display change. Memory-size and segment-count
//! changes recompute the segment layout used by the acquisition loop.

use serde_json::Value;
use tracing::instrument;

use crate::acquisition::SegmentLayout;
use crate::driver::DsoDriver;
use crate::error::{DsoError, DsoResult};
use crate::settings::{Channel, SampleMode, ScopeSettings, Setting, SettingId};

/// Settings tree plus the values derived from it.
#[derive(Debug)]
pub struct ScopeState {
    /// The settings tree
    pub settings: ScopeSettings,
    channels: Vec<Channel>,
    layout: SegmentLayout,
}

impl ScopeState {
    /// Derive the channel list and segment layout from `settings`.
    pub fn new(settings: ScopeSettings) -> DsoResult<Self> {
        let channels = settings.enabled_channels();
        let layout = SegmentLayout::from_settings(&settings)?;
        Ok(Self {
            settings,
            channels,
            layout,
        })
    }

    /// Enabled channels in C1..C4 order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Current segment layout.
    pub fn layout(&self) -> SegmentLayout {
        self.layout
    }

    fn refresh_channels(&mut self) {
        self.channels = self.settings.enabled_channels();
        tracing::debug!(channels = ?self.channels, "Channel list updated");
    }

    fn refresh_layout(&mut self) -> DsoResult<()> {
        self.layout = SegmentLayout::from_settings(&self.settings)?;
        tracing::debug!(
            segment_len = self.layout.segment_len,
            segments = self.layout.segments,
            "Segment layout updated"
        );
        Ok(())
    }
}

/// Applies setting changes to the tree and the instrument.
pub struct Dispatcher<'a> {
    driver: &'a dyn DsoDriver,
    state: &'a mut ScopeState,
}

impl<'a> Dispatcher<'a> {
    /// Dispatch through `driver` against `state`.
    pub fn new(driver: &'a dyn DsoDriver, state: &'a mut ScopeState) -> Self {
        Self { driver, state }
    }

    /// Apply one entry by its stable name.
    ///
    /// Unknown names are ignored.
    pub async fn apply_named(&mut self, name: &str, value: &Value) -> DsoResult<()> {
        match SettingId::from_name(name) {
            Some(id) => self.apply(Setting::from_json(id, value)?).await,
            None => {
                tracing::debug!("Ignoring unknown setting '{}'", name);
                Ok(())
            }
        }
    }

    /// Push every entry to the instrument in tree order.
    ///
    /// Each value is read just before it is applied, so a display entry
    /// mirrored from its enable flag is replayed with the mirrored value.
    pub async fn replay(&mut self) -> DsoResult<()> {
        for id in SettingId::tree_order() {
            let setting = self.state.settings.current(id);
            self.apply(setting).await?;
        }
        Ok(())
    }

    /// Apply one changed entry.
    #[instrument(skip(self, setting), fields(entry = %setting.id().name()))]
    pub async fn apply(&mut self, setting: Setting) -> DsoResult<()> {
        if matches!(
            setting,
            Setting::GrabsPerSecond(_) | Setting::TreatmentPerSecond(_)
        ) {
            return self.check_read_only(&setting);
        }

        self.state.settings.store(&setting).await?;
        tracing::debug!(value = %setting.value_json(), "Setting stored");

        let driver = self.driver;
        match setting {
            Setting::ResourceAddress(_) => Ok(()),
            Setting::ChannelEnabled(..) => self.sync_channels().await,
            Setting::VerticalScale(c, v) => driver.set_ver_scale(c, v).await,
            Setting::VerticalOffset(c, v) => driver.set_ver_offset(c, v).await,
            Setting::ChannelDisplay(c, on) => write_trace_display(driver, c, on).await,
            Setting::HorizontalOffset(v) => driver.set_hor_offset(v).await,
            Setting::TimeDivision(s) => driver.write(&format!("TDIV {}", s)).await,
            Setting::TriggerSource(src) => driver.set_trigger_source(src).await,
            Setting::TriggerDelay(v) => driver.write(&format!("TRIG_DELAY {}", v)).await,
            Setting::TriggerLevel(v) => {
                let source = self.state.settings.trigger_source.get();
                driver.set_trigger_level(source, v).await
            }
            Setting::TriggerMode(mode) => driver.set_trigger_mode(mode).await,
            Setting::Display(on) => driver.write(on_off("DISP", on).as_str()).await,
            Setting::NumberOfSegments(n) => {
                self.state.refresh_layout()?;
                driver.set_sample_mode(SampleMode::for_segments(n)).await
            }
            Setting::MemorySize(s) => {
                self.state.refresh_layout()?;
                driver.write(&format!("MSIZ {}", s)).await
            }
            Setting::ClearSweeps(_) => driver.clear_sweeps().await,
            Setting::ForceTrigger(_) => driver.write("FRTR").await,
            Setting::GrabsPerSecond(_) | Setting::TreatmentPerSecond(_) => Ok(()),
        }
    }

    /// Recompute the channel list and mirror every enable flag into its
    /// channel's display entry, rewriting all four trace displays.
    async fn sync_channels(&mut self) -> DsoResult<()> {
        self.state.refresh_channels();

        for channel in Channel::ALL {
            let enabled = self.state.settings.channel(channel).enabled.get();
            self.state
                .settings
                .store(&Setting::ChannelDisplay(channel, enabled))
                .await?;
            write_trace_display(self.driver, channel, enabled).await?;
        }
        Ok(())
    }

    /// Derived counters accept their own value (as during replay) and refuse
    /// anything else.
    fn check_read_only(&self, setting: &Setting) -> DsoResult<()> {
        let id = setting.id();
        if self.state.settings.current(id) == *setting {
            Ok(())
        } else {
            Err(DsoError::ParameterReadOnly(id.name()))
        }
    }
}

fn on_off(prefix: &str, on: bool) -> String {
    format!("{} {}", prefix, if on { "ON" } else { "OFF" })
}

async fn write_trace_display(driver: &dyn DsoDriver, channel: Channel, on: bool) -> DsoResult<()> {
    driver.write(&on_off(&format!("{channel}:TRA"), on)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDso;
    use crate::settings::{TriggerMode, TriggerSource};
    use serde_json::json;

    fn state() -> ScopeState {
        ScopeState::new(ScopeSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn trigger_level_uses_current_source() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        dispatcher.apply(Setting::TriggerLevel(0.3)).await.unwrap();
        assert_eq!(dso.call_log(), vec!["set_trigger_level(EXT, 0.3)"]);
        assert_eq!(state.settings.trigger_level.get(), 0.3);
    }

    #[tokio::test]
    async fn out_of_range_level_never_reaches_driver() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        let err = dispatcher.apply(Setting::TriggerLevel(5.0)).await.unwrap_err();
        assert!(matches!(err, DsoError::ParameterInvalidChoice { .. }));
        assert!(dso.call_log().is_empty());
        assert_eq!(state.settings.trigger_level.get(), 0.15);
    }

    #[tokio::test]
    async fn command_mapping() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        let settings = [
            Setting::TriggerSource(TriggerSource::C2),
            Setting::TriggerMode(TriggerMode::Auto),
            Setting::TriggerDelay(-2e-6),
            Setting::VerticalScale(Channel::C1, 0.5),
            Setting::VerticalOffset(Channel::C4, 0.1),
            Setting::TimeDivision("1US".into()),
            Setting::HorizontalOffset(1e-7),
            Setting::Display(false),
            Setting::ClearSweeps(false),
            Setting::ForceTrigger(true),
            Setting::ResourceAddress("TCPIP0::scope::INSTR".into()),
        ];
        for setting in settings {
            dispatcher.apply(setting).await.unwrap();
        }

        assert_eq!(
            dso.call_log(),
            vec![
                "set_trigger_source(C2)",
                "set_trigger_mode(AUTO)",
                "write(TRIG_DELAY -0.000002)",
                "set_ver_scale(C1, 0.5)",
                "set_ver_offset(C4, 0.1)",
                "write(TDIV 1US)",
                "set_hor_offset(0.0000001)",
                "write(DISP OFF)",
                "clear_sweeps",
                "write(FRTR)",
            ]
        );
    }

    #[tokio::test]
    async fn disabling_channel_updates_list_and_display() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        dispatcher
            .apply(Setting::ChannelEnabled(Channel::C3, false))
            .await
            .unwrap();

        assert_eq!(
            dso.call_log(),
            vec![
                "write(C1:TRA ON)",
                "write(C2:TRA ON)",
                "write(C3:TRA OFF)",
                "write(C4:TRA ON)",
            ]
        );
        assert_eq!(state.channels(), &[Channel::C1, Channel::C2, Channel::C4]);
        assert!(!state.settings.channel(Channel::C3).display.get());
    }

    #[tokio::test]
    async fn segments_and_memory_recompute_layout() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        dispatcher.apply(Setting::NumberOfSegments(3)).await.unwrap();
        dispatcher
            .apply(Setting::MemorySize("25K".into()))
            .await
            .unwrap();
        dispatcher.apply(Setting::NumberOfSegments(1)).await.unwrap();

        assert_eq!(
            dso.call_log(),
            vec![
                "set_sample_mode(SEQUENCE 3)",
                "write(MSIZ 25K)",
                "set_sample_mode(REAL_TIME)",
            ]
        );
        assert_eq!(state.layout().segment_len, 25_002);
        assert_eq!(state.layout().segments, 1);
    }

    #[tokio::test]
    async fn malformed_memory_size_is_rejected() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        let err = dispatcher
            .apply(Setting::MemorySize("12Q".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DsoError::MalformedConfigurationValue { .. }));
        assert!(dso.call_log().is_empty());
        assert_eq!(state.layout().segment_len, 10_002);
    }

    #[tokio::test]
    async fn non_finite_trigger_level_is_rejected() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        let err = dispatcher
            .apply(Setting::TriggerLevel(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, DsoError::ParameterInvalidChoice { .. }));
        assert!(dso.call_log().is_empty());
        assert_eq!(state.settings.trigger_level.get(), 0.15);
    }

    #[tokio::test]
    async fn rate_counters_are_read_only() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        dispatcher.apply(Setting::GrabsPerSecond(0.0)).await.unwrap();
        let err = dispatcher
            .apply(Setting::TreatmentPerSecond(3.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DsoError::ParameterReadOnly(_)));
        assert!(dso.call_log().is_empty());
    }

    #[tokio::test]
    async fn apply_named_ignores_unknown_entries() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        dispatcher
            .apply_named("VOffset_C1", &json!(0.2))
            .await
            .unwrap();
        dispatcher
            .apply_named("offset_C1", &json!(0.2))
            .await
            .unwrap();

        assert_eq!(dso.call_log(), vec!["set_ver_offset(C1, 0.2)"]);
    }

    #[tokio::test]
    async fn replay_keeps_mirrored_display() {
        let dso = MockDso::new();
        let mut tree = ScopeSettings::default();
        tree.store(&Setting::ChannelEnabled(Channel::C4, false))
            .await
            .unwrap();
        let mut state = ScopeState::new(tree).unwrap();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        dispatcher.replay().await.unwrap();

        let log = dso.call_log();
        assert!(log.contains(&"write(C4:TRA OFF)".to_string()));
        assert!(!log.contains(&"write(C4:TRA ON)".to_string()));
        assert!(log.contains(&"write(C1:TRA ON)".to_string()));
        assert_eq!(state.channels(), &[Channel::C1, Channel::C2, Channel::C3]);
    }

    #[tokio::test]
    async fn driver_failure_propagates() {
        let dso = MockDso::new();
        let mut state = state();
        let mut dispatcher = Dispatcher::new(&dso, &mut state);

        dso.trigger_failure();
        let err = dispatcher.apply(Setting::Display(true)).await.unwrap_err();
        assert!(matches!(err, DsoError::CommandRejected { .. }));
    }
}
