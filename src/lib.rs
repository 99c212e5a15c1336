//! # LeCroy DAQ
//!
//! Operates a LeCroy/Teledyne WaveRunner oscilloscope as a 1-D waveform
//! detector. The detector exposes a settings tree (channels, vertical scale and
//! offset, timebase, trigger, memory size, segment count), maps every setting
//! change onto the instrument, and on each grab pulls the enabled channels,
//! averages segmented acquisitions and publishes labelled traces with a shared
//! time axis.
//!
//! ## Crate Structure
//!
//! - **`detector`**: `LecroyDetector`, the lifecycle entry point
//!   (initialize, apply setting, grab, stop, close).
//! - **`settings`**: the settings tree, its closed entry identities and the
//!   memory-size / time-division decoders.
//! - **`parameter`**: `Parameter<T>`, the typed observable value behind every
//!   settings entry.
//! - **`dispatch`**: maps one changed entry to its driver call(s) and keeps the
//!   channel list in line with the enable flags.
//! - **`acquisition`**: segment layout, segment averaging and the grab routine.
//! - **`driver`**: the `DsoDriver` seam with the VICP/TCP, VISA and mock
//!   implementations.
//! - **`events`**: results and status notifications published to hosts.
//! - **`storage`**: CSV export of results.
//! - **`config`**: figment-based configuration (TOML + environment).
//! - **`tracing_setup`**: subscriber initialisation.
//! - **`error`**: the `DsoError` taxonomy.

pub mod acquisition;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod events;
pub mod parameter;
pub mod settings;
pub mod storage;
pub mod tracing_setup;

pub use detector::{InitInfo, LecroyDetector};
pub use error::{DsoError, DsoResult};
