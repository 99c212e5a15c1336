//! Closed identities for every settings-tree entry.
//!
//! `SettingId` names an entry; `Setting` is an entry together with a new value.
//! The dispatcher matches on `Setting` exhaustively, so adding an entry here
//! without giving it a driver mapping is a compile error.

use serde_json::Value;

use super::values::{Channel, TriggerMode, TriggerSource};
use crate::error::{DsoError, DsoResult};

/// Identity of a settings-tree entry.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    ResourceAddress,
    ChannelEnabled(Channel),
    VerticalScale(Channel),
    VerticalOffset(Channel),
    ChannelDisplay(Channel),
    HorizontalOffset,
    TimeDivision,
    TriggerSource,
    TriggerDelay,
    TriggerLevel,
    TriggerMode,
    Display,
    NumberOfSegments,
    MemorySize,
    GrabsPerSecond,
    TreatmentPerSecond,
    ClearSweeps,
    ForceTrigger,
}

impl SettingId {
    /// Every entry in settings-tree order: each channel followed by its
    /// children, then the horizontal group, the trigger group and the
    /// top-level entries.
    pub fn tree_order() -> Vec<SettingId> {
        let mut ids = vec![SettingId::ResourceAddress];
        for channel in Channel::ALL {
            ids.extend([
                SettingId::ChannelEnabled(channel),
                SettingId::VerticalScale(channel),
                SettingId::VerticalOffset(channel),
                SettingId::ChannelDisplay(channel),
            ]);
        }
        ids.extend([
            SettingId::HorizontalOffset,
            SettingId::TimeDivision,
            SettingId::TriggerSource,
            SettingId::TriggerDelay,
            SettingId::TriggerLevel,
            SettingId::TriggerMode,
            SettingId::Display,
            SettingId::NumberOfSegments,
            SettingId::MemorySize,
            SettingId::GrabsPerSecond,
            SettingId::TreatmentPerSecond,
            SettingId::ClearSweeps,
            SettingId::ForceTrigger,
        ]);
        ids
    }

    /// Stable entry name as exposed to hosts.
    pub fn name(self) -> String {
        match self {
            SettingId::ResourceAddress => "VISA_ressources".into(),
            SettingId::ChannelEnabled(c) => c.as_str().into(),
            SettingId::VerticalScale(c) => format!("VScale_{c}"),
            SettingId::VerticalOffset(c) => format!("offset_{c}"),
            SettingId::ChannelDisplay(c) => format!("doDisplay_{c}"),
            SettingId::HorizontalOffset => "tOffset".into(),
            SettingId::TimeDivision => "tDiv".into(),
            SettingId::TriggerSource => "triggerSource".into(),
            SettingId::TriggerDelay => "triggerDelay".into(),
            SettingId::TriggerLevel => "triggerLevel".into(),
            SettingId::TriggerMode => "triggerMode".into(),
            SettingId::Display => "doDisplay".into(),
            SettingId::NumberOfSegments => "number_of_segments".into(),
            SettingId::MemorySize => "memorySize".into(),
            SettingId::GrabsPerSecond => "GPS".into(),
            SettingId::TreatmentPerSecond => "TPS".into(),
            SettingId::ClearSweeps => "clear_sweeps".into(),
            SettingId::ForceTrigger => "force_trigger".into(),
        }
    }

    /// Look an entry up by its stable name.
    pub fn from_name(name: &str) -> Option<SettingId> {
        SettingId::tree_order()
            .into_iter()
            .find(|id| id.name() == name)
    }

    /// Channel this entry belongs to, if any.
    pub fn channel(self) -> Option<Channel> {
        match self {
            SettingId::ChannelEnabled(c)
            | SettingId::VerticalScale(c)
            | SettingId::VerticalOffset(c)
            | SettingId::ChannelDisplay(c) => Some(c),
            _ => None,
        }
    }
}

/// A settings-tree entry carrying its new value.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    ResourceAddress(String),
    ChannelEnabled(Channel, bool),
    VerticalScale(Channel, f64),
    VerticalOffset(Channel, f64),
    ChannelDisplay(Channel, bool),
    HorizontalOffset(f64),
    TimeDivision(String),
    TriggerSource(TriggerSource),
    TriggerDelay(f64),
    TriggerLevel(f64),
    TriggerMode(TriggerMode),
    Display(bool),
    NumberOfSegments(u32),
    MemorySize(String),
    GrabsPerSecond(f64),
    TreatmentPerSecond(f64),
    ClearSweeps(bool),
    ForceTrigger(bool),
}

impl Setting {
    /// Identity of the entry this value belongs to.
    pub fn id(&self) -> SettingId {
        match self {
            Setting::ResourceAddress(_) => SettingId::ResourceAddress,
            Setting::ChannelEnabled(c, _) => SettingId::ChannelEnabled(*c),
            Setting::VerticalScale(c, _) => SettingId::VerticalScale(*c),
            Setting::VerticalOffset(c, _) => SettingId::VerticalOffset(*c),
            Setting::ChannelDisplay(c, _) => SettingId::ChannelDisplay(*c),
            Setting::HorizontalOffset(_) => SettingId::HorizontalOffset,
            Setting::TimeDivision(_) => SettingId::TimeDivision,
            Setting::TriggerSource(_) => SettingId::TriggerSource,
            Setting::TriggerDelay(_) => SettingId::TriggerDelay,
            Setting::TriggerLevel(_) => SettingId::TriggerLevel,
            Setting::TriggerMode(_) => SettingId::TriggerMode,
            Setting::Display(_) => SettingId::Display,
            Setting::NumberOfSegments(_) => SettingId::NumberOfSegments,
            Setting::MemorySize(_) => SettingId::MemorySize,
            Setting::GrabsPerSecond(_) => SettingId::GrabsPerSecond,
            Setting::TreatmentPerSecond(_) => SettingId::TreatmentPerSecond,
            Setting::ClearSweeps(_) => SettingId::ClearSweeps,
            Setting::ForceTrigger(_) => SettingId::ForceTrigger,
        }
    }

    /// Build a typed setting from a JSON value, as sent by a host or the CLI.
    pub fn from_json(id: SettingId, value: &Value) -> DsoResult<Setting> {
        let name = id.name();
        let bad = |expected: &str| DsoError::malformed(name.clone(), value.to_string(), expected);

        let as_f64 = || value.as_f64().ok_or_else(|| bad("expected a number"));
        let as_bool = || value.as_bool().ok_or_else(|| bad("expected a boolean"));
        let as_string = || {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| bad("expected a string"))
        };

        let setting = match id {
            SettingId::ResourceAddress => Setting::ResourceAddress(as_string()?),
            SettingId::ChannelEnabled(c) => Setting::ChannelEnabled(c, as_bool()?),
            SettingId::VerticalScale(c) => Setting::VerticalScale(c, as_f64()?),
            SettingId::VerticalOffset(c) => Setting::VerticalOffset(c, as_f64()?),
            SettingId::ChannelDisplay(c) => Setting::ChannelDisplay(c, as_bool()?),
            SettingId::HorizontalOffset => Setting::HorizontalOffset(as_f64()?),
            SettingId::TimeDivision => Setting::TimeDivision(as_string()?),
            SettingId::TriggerSource => Setting::TriggerSource(as_string()?.parse()?),
            SettingId::TriggerDelay => Setting::TriggerDelay(as_f64()?),
            SettingId::TriggerLevel => Setting::TriggerLevel(as_f64()?),
            SettingId::TriggerMode => Setting::TriggerMode(as_string()?.parse()?),
            SettingId::Display => Setting::Display(as_bool()?),
            SettingId::NumberOfSegments => {
                let n = value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| bad("expected a positive integer"))?;
                Setting::NumberOfSegments(n)
            }
            SettingId::MemorySize => Setting::MemorySize(as_string()?),
            SettingId::GrabsPerSecond => Setting::GrabsPerSecond(as_f64()?),
            SettingId::TreatmentPerSecond => Setting::TreatmentPerSecond(as_f64()?),
            SettingId::ClearSweeps => Setting::ClearSweeps(as_bool()?),
            SettingId::ForceTrigger => Setting::ForceTrigger(as_bool()?),
        };
        Ok(setting)
    }

    /// Value as JSON, the inverse of [`Setting::from_json`].
    pub fn value_json(&self) -> Value {
        match self {
            Setting::ResourceAddress(s) | Setting::TimeDivision(s) | Setting::MemorySize(s) => {
                Value::from(s.as_str())
            }
            Setting::ChannelEnabled(_, b)
            | Setting::ChannelDisplay(_, b)
            | Setting::Display(b)
            | Setting::ClearSweeps(b)
            | Setting::ForceTrigger(b) => Value::from(*b),
            Setting::VerticalScale(_, v)
            | Setting::VerticalOffset(_, v)
            | Setting::HorizontalOffset(v)
            | Setting::TriggerDelay(v)
            | Setting::TriggerLevel(v)
            | Setting::GrabsPerSecond(v)
            | Setting::TreatmentPerSecond(v) => Value::from(*v),
            Setting::TriggerSource(src) => Value::from(src.label()),
            Setting::TriggerMode(mode) => Value::from(mode.label()),
            Setting::NumberOfSegments(n) => Value::from(*n),
        }
    }
}
