//! The scope settings tree.
//!
//! `ScopeSettings` holds one [`Parameter`] per configurable entry of the
//! detector: four channel groups (enable flag with vertical scale, offset and
//! display children), the horizontal group, the trigger group, display,
//! sequence, memory size, the two read-only rate counters and the clear-sweep
//! and force-trigger toggles. Initial values come from [`SettingsConfig`].

pub mod entry;
pub mod values;

use serde::{Deserialize, Serialize};

use crate::error::DsoResult;
use crate::parameter::Parameter;
pub use entry::{Setting, SettingId};
pub use values::{
    decode_memory_size, parse_time_division, Channel, SampleMode, TriggerMode, TriggerSource,
    MEMORY_SIZES, SEGMENT_PADDING, TIME_DIVISIONS,
};

/// Lowest accepted trigger level in volts.
pub const TRIGGER_LEVEL_MIN: f64 = -4.0;
/// Highest accepted trigger level in volts.
pub const TRIGGER_LEVEL_MAX: f64 = 4.0;

// =============================================================================
// Configuration
// =============================================================================

/// Initial value of one channel group.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub vertical_scale: f64,
    pub vertical_offset: f64,
    pub display: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vertical_scale: 2.0,
            vertical_offset: 0.0,
            display: true,
        }
    }
}

/// Initial values of the whole settings tree.
///
/// Missing fields fall back to the values the instrument is usually operated
/// with; missing channel groups fall back to [`ChannelConfig::default`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub channels: Vec<ChannelConfig>,
    pub horizontal_offset: f64,
    pub time_division: String,
    pub trigger_source: TriggerSource,
    pub trigger_delay: f64,
    pub trigger_level: f64,
    pub trigger_mode: TriggerMode,
    pub display: bool,
    pub number_of_segments: u32,
    pub memory_size: String,
    pub clear_sweeps: bool,
    pub force_trigger: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            channels: vec![ChannelConfig::default(); Channel::ALL.len()],
            horizontal_offset: -1e-6,
            time_division: "100NS".to_string(),
            trigger_source: TriggerSource::Ext,
            trigger_delay: -1e-6,
            trigger_level: 0.15,
            trigger_mode: TriggerMode::Normal,
            display: true,
            number_of_segments: 1,
            memory_size: "10K".to_string(),
            clear_sweeps: true,
            force_trigger: false,
        }
    }
}

impl SettingsConfig {
    /// Initial values for one channel group.
    pub fn channel(&self, channel: Channel) -> ChannelConfig {
        self.channels
            .get(channel.index())
            .cloned()
            .unwrap_or_default()
    }

    /// Reject values the settings tree would refuse.
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.len() > Channel::ALL.len() {
            return Err(format!(
                "{} channel groups configured, the scope has {}",
                self.channels.len(),
                Channel::ALL.len()
            ));
        }
        if !TIME_DIVISIONS.contains(&self.time_division.as_str()) {
            return Err(format!("Invalid time_division '{}'", self.time_division));
        }
        if !MEMORY_SIZES.contains(&self.memory_size.as_str()) {
            return Err(format!("Invalid memory_size '{}'", self.memory_size));
        }
        if !(TRIGGER_LEVEL_MIN..=TRIGGER_LEVEL_MAX).contains(&self.trigger_level) {
            return Err(format!(
                "Invalid trigger_level {}. Must be within [{}, {}]",
                self.trigger_level, TRIGGER_LEVEL_MIN, TRIGGER_LEVEL_MAX
            ));
        }
        if self.number_of_segments < 1 {
            return Err("number_of_segments must be at least 1".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Settings tree
// =============================================================================

/// Entries of one channel group.
#[allow(missing_docs)]
#[derive(Debug)]
pub struct ChannelSettings {
    pub enabled: Parameter<bool>,
    pub vertical_scale: Parameter<f64>,
    pub vertical_offset: Parameter<f64>,
    pub display: Parameter<bool>,
}

impl ChannelSettings {
    fn new(channel: Channel, config: &ChannelConfig) -> Self {
        Self {
            enabled: Parameter::new(SettingId::ChannelEnabled(channel).name(), config.enabled),
            vertical_scale: Parameter::new(
                SettingId::VerticalScale(channel).name(),
                config.vertical_scale,
            )
            .with_title("Vertical/Div")
            .with_unit("V"),
            vertical_offset: Parameter::new(
                SettingId::VerticalOffset(channel).name(),
                config.vertical_offset,
            )
            .with_title("Offset")
            .with_unit("V"),
            display: Parameter::new(SettingId::ChannelDisplay(channel).name(), config.display)
                .with_title("Display"),
        }
    }
}

/// The full settings tree.
#[allow(missing_docs)]
#[derive(Debug)]
pub struct ScopeSettings {
    pub resource_address: Parameter<String>,
    pub channels: [ChannelSettings; 4],
    pub horizontal_offset: Parameter<f64>,
    pub time_division: Parameter<String>,
    pub trigger_source: Parameter<TriggerSource>,
    pub trigger_delay: Parameter<f64>,
    pub trigger_level: Parameter<f64>,
    pub trigger_mode: Parameter<TriggerMode>,
    pub display: Parameter<bool>,
    pub number_of_segments: Parameter<u32>,
    pub memory_size: Parameter<String>,
    pub grabs_per_second: Parameter<f64>,
    pub treatment_per_second: Parameter<f64>,
    pub clear_sweeps: Parameter<bool>,
    pub force_trigger: Parameter<bool>,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self::from_config(&SettingsConfig::default())
    }
}

impl ScopeSettings {
    /// Build the tree with the given initial values.
    pub fn from_config(config: &SettingsConfig) -> Self {
        let name = |id: SettingId| id.name();

        Self {
            resource_address: Parameter::new(name(SettingId::ResourceAddress), String::new())
                .with_title("VISA:"),
            channels: Channel::ALL.map(|c| ChannelSettings::new(c, &config.channel(c))),
            horizontal_offset: Parameter::new(
                name(SettingId::HorizontalOffset),
                config.horizontal_offset,
            )
            .with_title("t0")
            .with_unit("s"),
            time_division: Parameter::new(
                name(SettingId::TimeDivision),
                config.time_division.clone(),
            )
            .with_title("Time/Div")
            .with_choices(TIME_DIVISIONS.iter().map(|s| s.to_string()).collect()),
            trigger_source: Parameter::new(name(SettingId::TriggerSource), config.trigger_source)
                .with_title("source")
                .with_choices(TriggerSource::ALL.to_vec()),
            trigger_delay: Parameter::new(name(SettingId::TriggerDelay), config.trigger_delay)
                .with_title("delay")
                .with_unit("s"),
            trigger_level: Parameter::new(name(SettingId::TriggerLevel), config.trigger_level)
                .with_title("level")
                .with_unit("V")
                .with_range(TRIGGER_LEVEL_MIN, TRIGGER_LEVEL_MAX),
            trigger_mode: Parameter::new(name(SettingId::TriggerMode), config.trigger_mode)
                .with_title("mode")
                .with_choices(TriggerMode::ALL.to_vec()),
            display: Parameter::new(name(SettingId::Display), config.display)
                .with_title("Display"),
            number_of_segments: Parameter::new(
                name(SettingId::NumberOfSegments),
                config.number_of_segments,
            )
            .with_title("Sequence")
            .with_range(1, u32::MAX),
            memory_size: Parameter::new(name(SettingId::MemorySize), config.memory_size.clone())
                .with_title("Memory Size")
                .with_choices(MEMORY_SIZES.iter().map(|s| s.to_string()).collect()),
            grabs_per_second: Parameter::new(name(SettingId::GrabsPerSecond), 0.0)
                .with_title("GrabPerSecond")
                .with_unit("Hz")
                .read_only(),
            treatment_per_second: Parameter::new(name(SettingId::TreatmentPerSecond), 0.0)
                .with_title("TreatmentPerSecond")
                .with_unit("s")
                .read_only(),
            clear_sweeps: Parameter::new(name(SettingId::ClearSweeps), config.clear_sweeps)
                .with_title("Clear sweep"),
            force_trigger: Parameter::new(name(SettingId::ForceTrigger), config.force_trigger)
                .with_title("Force trigger"),
        }
    }

    /// Entries of one channel group.
    pub fn channel(&self, channel: Channel) -> &ChannelSettings {
        &self.channels[channel.index()]
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelSettings {
        &mut self.channels[channel.index()]
    }

    /// Enabled channels, in fixed C1..C4 order.
    pub fn enabled_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.channel(*c).enabled.get())
            .collect()
    }

    /// Current value of an entry.
    pub fn current(&self, id: SettingId) -> Setting {
        match id {
            SettingId::ResourceAddress => Setting::ResourceAddress(self.resource_address.get()),
            SettingId::ChannelEnabled(c) => Setting::ChannelEnabled(c, self.channel(c).enabled.get()),
            SettingId::VerticalScale(c) => {
                Setting::VerticalScale(c, self.channel(c).vertical_scale.get())
            }
            SettingId::VerticalOffset(c) => {
                Setting::VerticalOffset(c, self.channel(c).vertical_offset.get())
            }
            SettingId::ChannelDisplay(c) => Setting::ChannelDisplay(c, self.channel(c).display.get()),
            SettingId::HorizontalOffset => Setting::HorizontalOffset(self.horizontal_offset.get()),
            SettingId::TimeDivision => Setting::TimeDivision(self.time_division.get()),
            SettingId::TriggerSource => Setting::TriggerSource(self.trigger_source.get()),
            SettingId::TriggerDelay => Setting::TriggerDelay(self.trigger_delay.get()),
            SettingId::TriggerLevel => Setting::TriggerLevel(self.trigger_level.get()),
            SettingId::TriggerMode => Setting::TriggerMode(self.trigger_mode.get()),
            SettingId::Display => Setting::Display(self.display.get()),
            SettingId::NumberOfSegments => Setting::NumberOfSegments(self.number_of_segments.get()),
            SettingId::MemorySize => Setting::MemorySize(self.memory_size.get()),
            SettingId::GrabsPerSecond => Setting::GrabsPerSecond(self.grabs_per_second.get()),
            SettingId::TreatmentPerSecond => {
                Setting::TreatmentPerSecond(self.treatment_per_second.get())
            }
            SettingId::ClearSweeps => Setting::ClearSweeps(self.clear_sweeps.get()),
            SettingId::ForceTrigger => Setting::ForceTrigger(self.force_trigger.get()),
        }
    }

    /// Validate and store a new value for one entry.
    ///
    /// Enumerated strings are decoded here so that a malformed value never
    /// reaches the tree.
    pub async fn store(&mut self, setting: &Setting) -> DsoResult<()> {
        match setting {
            Setting::ResourceAddress(v) => self.resource_address.set(v.clone()).await,
            Setting::ChannelEnabled(c, v) => self.channel_mut(*c).enabled.set(*v).await,
            Setting::VerticalScale(c, v) => self.channel_mut(*c).vertical_scale.set(*v).await,
            Setting::VerticalOffset(c, v) => self.channel_mut(*c).vertical_offset.set(*v).await,
            Setting::ChannelDisplay(c, v) => self.channel_mut(*c).display.set(*v).await,
            Setting::HorizontalOffset(v) => self.horizontal_offset.set(*v).await,
            Setting::TimeDivision(v) => {
                parse_time_division(v)?;
                self.time_division.set(v.clone()).await
            }
            Setting::TriggerSource(v) => self.trigger_source.set(*v).await,
            Setting::TriggerDelay(v) => self.trigger_delay.set(*v).await,
            Setting::TriggerLevel(v) => self.trigger_level.set(*v).await,
            Setting::TriggerMode(v) => self.trigger_mode.set(*v).await,
            Setting::Display(v) => self.display.set(*v).await,
            Setting::NumberOfSegments(v) => self.number_of_segments.set(*v).await,
            Setting::MemorySize(v) => {
                decode_memory_size(v)?;
                self.memory_size.set(v.clone()).await
            }
            Setting::GrabsPerSecond(v) => self.grabs_per_second.set(*v).await,
            Setting::TreatmentPerSecond(v) => self.treatment_per_second.set(*v).await,
            Setting::ClearSweeps(v) => self.clear_sweeps.set(*v).await,
            Setting::ForceTrigger(v) => self.force_trigger.set(*v).await,
        }
    }

    /// Decoded memory size in samples.
    pub fn memory_samples(&self) -> DsoResult<usize> {
        decode_memory_size(&self.memory_size.get())
    }

    /// Serializable view of every entry, for hosts and the CLI.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        SettingId::tree_order()
            .into_iter()
            .map(|id| {
                let (title, unit, read_only) = self.describe(id);
                EntrySnapshot {
                    name: id.name(),
                    title: title.to_string(),
                    value: self.current(id).value_json(),
                    unit: unit.map(str::to_string),
                    read_only,
                    parent: id.channel().map(|c| c.to_string()).filter(|_| {
                        !matches!(id, SettingId::ChannelEnabled(_))
                    }),
                }
            })
            .collect()
    }

    fn describe(&self, id: SettingId) -> (&str, Option<&str>, bool) {
        fn info<T>(p: &Parameter<T>) -> (&str, Option<&str>, bool)
        where
            T: Clone + Send + Sync + PartialEq + PartialOrd + std::fmt::Debug + 'static,
        {
            (p.title(), p.unit(), p.is_read_only())
        }

        match id {
            SettingId::ResourceAddress => info(&self.resource_address),
            SettingId::ChannelEnabled(c) => info(&self.channel(c).enabled),
            SettingId::VerticalScale(c) => info(&self.channel(c).vertical_scale),
            SettingId::VerticalOffset(c) => info(&self.channel(c).vertical_offset),
            SettingId::ChannelDisplay(c) => info(&self.channel(c).display),
            SettingId::HorizontalOffset => info(&self.horizontal_offset),
            SettingId::TimeDivision => info(&self.time_division),
            SettingId::TriggerSource => info(&self.trigger_source),
            SettingId::TriggerDelay => info(&self.trigger_delay),
            SettingId::TriggerLevel => info(&self.trigger_level),
            SettingId::TriggerMode => info(&self.trigger_mode),
            SettingId::Display => info(&self.display),
            SettingId::NumberOfSegments => info(&self.number_of_segments),
            SettingId::MemorySize => info(&self.memory_size),
            SettingId::GrabsPerSecond => info(&self.grabs_per_second),
            SettingId::TreatmentPerSecond => info(&self.treatment_per_second),
            SettingId::ClearSweeps => info(&self.clear_sweeps),
            SettingId::ForceTrigger => info(&self.force_trigger),
        }
    }

    /// Update the derived rate counters. Only the acquisition loop calls this.
    pub(crate) async fn publish_rates(&mut self, grabs_per_second: f64, grab_seconds: f64) {
        self.grabs_per_second.publish(grabs_per_second).await;
        self.treatment_per_second.publish(grab_seconds).await;
    }
}

/// One entry of [`ScopeSettings::snapshot`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub name: String,
    pub title: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}
