//! Value types of the settings tree and the decoders for suffix-encoded strings.
//!
//! The scope encodes memory depth and timebase as enumerated strings
//! ("10K", "2.5MA", "100NS"). The decoders here turn them into numbers and
//! report anything outside that grammar as `MalformedConfigurationValue`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DsoError, DsoResult};

/// Accepted memory-size strings, in the order the scope lists them.
pub const MEMORY_SIZES: &[&str] = &[
    "500", "1000", "2500", "5000", "10K", "25K", "50K", "100K", "250K", "500K", "1MA", "2.5MA",
    "5MA", "10MA", "25MA", "50MA", "100MA",
];

/// Accepted time/division strings.
pub const TIME_DIVISIONS: &[&str] = &[
    "1NS", "2NS", "5NS", "10NS", "20NS", "50NS", "100NS", "200NS", "500NS", "1US", "2US", "5US",
    "10US", "20US", "50US", "100US", "200US", "500US", "1MS", "2MS", "5MS", "10MS", "20MS",
    "50MS", "100MS", "200MS", "500MS", "1S", "2S", "5S", "10S", "20S", "50S", "100S",
];

/// Extra samples the scope appends to every segment of a sequence buffer.
pub const SEGMENT_PADDING: usize = 2;

// =============================================================================
// Channels
// =============================================================================

/// Analog input channel of a four-channel WaveRunner.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    C1,
    C2,
    C3,
    C4,
}

impl Channel {
    /// All channels in fixed acquisition order.
    pub const ALL: [Channel; 4] = [Channel::C1, Channel::C2, Channel::C3, Channel::C4];

    /// 1-based channel number.
    pub fn number(self) -> u8 {
        match self {
            Channel::C1 => 1,
            Channel::C2 => 2,
            Channel::C3 => 3,
            Channel::C4 => 4,
        }
    }

    /// 0-based index into per-channel arrays.
    pub fn index(self) -> usize {
        usize::from(self.number() - 1)
    }

    /// Channel from a 1-based number.
    pub fn from_number(number: usize) -> Option<Channel> {
        Channel::ALL.get(number.checked_sub(1)?).copied()
    }

    /// Remote-command prefix, e.g. `C2`.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::C1 => "C1",
            Channel::C2 => "C2",
            Channel::C3 => "C3",
            Channel::C4 => "C4",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = DsoError;

    fn from_str(s: &str) -> DsoResult<Self> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| DsoError::malformed("channel", s, "expected C1..C4"))
    }
}

// =============================================================================
// Trigger
// =============================================================================

/// Edge trigger source.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriggerSource {
    #[serde(rename = "EXT")]
    Ext,
    C1,
    C2,
    C3,
    C4,
    #[serde(rename = "EXT10")]
    Ext10,
}

impl TriggerSource {
    /// Every selectable source.
    pub const ALL: [TriggerSource; 6] = [
        TriggerSource::Ext,
        TriggerSource::C1,
        TriggerSource::C2,
        TriggerSource::C3,
        TriggerSource::C4,
        TriggerSource::Ext10,
    ];

    /// Remote-command mnemonic.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Ext => "EX",
            TriggerSource::C1 => "C1",
            TriggerSource::C2 => "C2",
            TriggerSource::C3 => "C3",
            TriggerSource::C4 => "C4",
            TriggerSource::Ext10 => "EX10",
        }
    }

    /// Name as shown in the settings tree.
    pub fn label(self) -> &'static str {
        match self {
            TriggerSource::Ext => "EXT",
            TriggerSource::Ext10 => "EXT10",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TriggerSource {
    type Err = DsoError;

    fn from_str(s: &str) -> DsoResult<Self> {
        TriggerSource::ALL
            .into_iter()
            .find(|src| src.label() == s || src.as_str() == s)
            .ok_or_else(|| DsoError::malformed("triggerSource", s, "expected EXT, C1..C4 or EXT10"))
    }
}

/// Trigger sweep mode.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerMode {
    Auto,
    Normal,
    Stopped,
    Single,
}

impl TriggerMode {
    /// Every selectable mode.
    pub const ALL: [TriggerMode; 4] = [
        TriggerMode::Auto,
        TriggerMode::Normal,
        TriggerMode::Stopped,
        TriggerMode::Single,
    ];

    /// Remote-command mnemonic.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerMode::Auto => "AUTO",
            TriggerMode::Normal => "NORMAL",
            TriggerMode::Stopped => "STOP",
            TriggerMode::Single => "SINGLE",
        }
    }

    /// Name as shown in the settings tree.
    pub fn label(self) -> &'static str {
        match self {
            TriggerMode::Stopped => "STOPPED",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TriggerMode {
    type Err = DsoError;

    fn from_str(s: &str) -> DsoResult<Self> {
        TriggerMode::ALL
            .into_iter()
            .find(|m| m.label() == s)
            .ok_or_else(|| {
                DsoError::malformed("triggerMode", s, "expected AUTO, NORMAL, STOPPED or SINGLE")
            })
    }
}

/// Acquisition sample mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// One waveform per trigger.
    RealTime,
    /// Segmented capture of the given number of triggers into one buffer.
    Sequence(u32),
}

impl SampleMode {
    /// Sample mode implied by a segment count.
    pub fn for_segments(segments: u32) -> Self {
        if segments > 1 {
            SampleMode::Sequence(segments)
        } else {
            SampleMode::RealTime
        }
    }
}

// =============================================================================
// Decoders
// =============================================================================

/// Decode a memory-size string into a sample count.
///
/// `K` multiplies by 1 000 and `MA` by 1 000 000; a bare number is taken
/// as-is. A decimal mantissa is accepted as long as the product is a whole
/// number of samples, so `"2.5MA"` is 2 500 000 but `"0.0005K"` is rejected.
pub fn decode_memory_size(value: &str) -> DsoResult<usize> {
    let malformed = |reason: &str| DsoError::malformed("memorySize", value, reason);

    let trimmed = value.trim();
    let (mantissa, multiplier) = if let Some(m) = trimmed.strip_suffix("MA") {
        (m, 1_000_000u64)
    } else if let Some(m) = trimmed.strip_suffix('K') {
        (m, 1_000u64)
    } else {
        (trimmed, 1u64)
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((int_part, frac_part)) if is_digits(frac_part) => (int_part, frac_part),
        Some(_) => return Err(malformed("expected digits after the decimal point")),
        None => (mantissa, ""),
    };
    if !is_digits(int_part) {
        return Err(malformed("expected digits with optional K or MA suffix"));
    }

    let overflow = || malformed("value too large");
    let whole = int_part
        .parse::<u64>()
        .map_err(|_| overflow())?
        .checked_mul(multiplier)
        .ok_or_else(overflow)?;

    let fraction = if frac_part.is_empty() {
        0
    } else {
        let digits = u32::try_from(frac_part.len()).map_err(|_| overflow())?;
        let scale = 10u64.checked_pow(digits).ok_or_else(overflow)?;
        let numerator = frac_part
            .parse::<u64>()
            .map_err(|_| overflow())?
            .checked_mul(multiplier)
            .ok_or_else(overflow)?;
        if numerator % scale != 0 {
            return Err(malformed("not a whole number of samples"));
        }
        numerator / scale
    };

    let total = whole.checked_add(fraction).ok_or_else(overflow)?;
    usize::try_from(total).map_err(|_| overflow())
}

/// Decode a time/division string (`NS`, `US`, `MS` or `S` suffix) into seconds.
pub fn parse_time_division(value: &str) -> DsoResult<f64> {
    let malformed = |reason: &str| DsoError::malformed("tDiv", value, reason);

    let trimmed = value.trim();
    let (mantissa, scale) = [("NS", 1e-9), ("US", 1e-6), ("MS", 1e-3), ("S", 1.0)]
        .into_iter()
        .find_map(|(suffix, scale)| trimmed.strip_suffix(suffix).map(|m| (m, scale)))
        .ok_or_else(|| malformed("expected NS, US, MS or S suffix"))?;

    let number: f64 = mantissa
        .parse()
        .map_err(|_| malformed("mantissa is not a number"))?;
    if !number.is_finite() || number <= 0.0 {
        return Err(malformed("time/division must be positive"));
    }
    Ok(number * scale)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
