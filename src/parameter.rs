//! Parameter<T> - typed entries of the scope settings tree
//!
//! Each entry of the settings tree is a `Parameter<T>`: a named value with an
//! optional title, unit and constraints. The current value lives in a tokio
//! watch channel so a host can observe edits (including the read-only rate
//! counters updated by the acquisition loop) without polling.
//!
//! # Example
//!
//! ```rust
//! use lecroy_daq::parameter::Parameter;
//!
//! # tokio_test::block_on(async {
//! let mut level = Parameter::new("triggerLevel", 0.15)
//!     .with_title("level")
//!     .with_unit("V")
//!     .with_range(-4.0, 4.0);
//!
//! level.set(0.5).await.unwrap();
//! assert!(level.set(5.0).await.is_err());
//! assert_eq!(level.get(), 0.5);
//! # })
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::watch;

use crate::error::{DsoError, DsoResult};

// =============================================================================
// Constraints
// =============================================================================

/// Parameter constraints for validation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Constraints<T> {
    /// No constraints
    None,

    /// Numeric range (min, max), inclusive
    Range {
        /// Lower bound
        min: T,
        /// Upper bound
        max: T,
    },

    /// Allowed discrete values
    Choices(Vec<T>),
}

impl<T: PartialOrd + Clone + Debug> Constraints<T> {
    /// Validate value against constraints
    pub fn validate(&self, name: &str, value: &T) -> DsoResult<()> {
        let ok = match self {
            Constraints::None => true,
            // NaN compares false both ways and is rejected.
            Constraints::Range { min, max } => value >= min && value <= max,
            Constraints::Choices(choices) => choices.iter().any(|c| c == value),
        };

        if ok {
            Ok(())
        } else {
            Err(DsoError::ParameterInvalidChoice {
                name: name.to_string(),
                value: format!("{:?}", value),
            })
        }
    }
}

impl<T> Default for Constraints<T> {
    fn default() -> Self {
        Constraints::None
    }
}

// =============================================================================
// Parameter<T>
// =============================================================================

/// Typed, observable settings entry.
///
/// T must implement:
/// - Clone: for distributing values to subscribers
/// - PartialOrd: for range validation
/// - Debug: for logging and error messages
pub struct Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + PartialOrd + Debug,
{
    /// Parameter name (unique identifier, matches the settings-entry wire name)
    name: String,

    /// Human-readable title shown by a host
    title: Option<String>,

    /// Unit of measurement (e.g., "V", "s")
    unit: Option<String>,

    value_rx: watch::Receiver<T>,
    value_tx: watch::Sender<T>,

    constraints: Constraints<T>,

    /// Read-only entries refuse `set()`; only the owner may `publish()`
    read_only: bool,
}

impl<T> Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + PartialOrd + Debug + 'static,
{
    /// Create new parameter with initial value
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        let (value_tx, value_rx) = watch::channel(initial);

        Self {
            name: name.into(),
            title: None,
            unit: None,
            value_rx,
            value_tx,
            constraints: Constraints::None,
            read_only: false,
        }
    }

    /// Set parameter title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set parameter unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set numeric range constraints
    pub fn with_range(mut self, min: T, max: T) -> Self {
        self.constraints = Constraints::Range { min, max };
        self
    }

    /// Set discrete choice constraints
    pub fn with_choices(mut self, choices: Vec<T>) -> Self {
        self.constraints = Constraints::Choices(choices);
        self
    }

    /// Make parameter read-only
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Get current value
    pub fn get(&self) -> T {
        self.value_rx.borrow().clone()
    }

    /// Check a candidate value without storing it.
    pub fn validate(&self, value: &T) -> DsoResult<()> {
        if self.read_only {
            return Err(DsoError::ParameterReadOnly(self.name.clone()));
        }
        self.constraints.validate(&self.name, value)
    }

    /// Set value (validates, stores and notifies subscribers).
    ///
    /// An invalid value leaves the stored value untouched.
    pub async fn set(&mut self, value: T) -> DsoResult<()> {
        self.validate(&value)?;
        self.store(value).await;
        Ok(())
    }

    /// Update a value bypassing the read-only flag and constraints.
    ///
    /// Used by the acquisition loop for the derived rate counters.
    pub(crate) async fn publish(&mut self, value: T) {
        self.store(value).await;
    }

    async fn store(&mut self, value: T) {
        self.value_tx.send_replace(value);
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value_rx.clone()
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter title, falls back to the name
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Unit of measurement
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Whether `set()` is refused
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl<T> Debug for Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + PartialOrd + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value", &*self.value_rx.borrow())
            .field("unit", &self.unit)
            .field("constraints", &self.constraints)
            .field("read_only", &self.read_only)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
