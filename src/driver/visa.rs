//! VISA transport (feature `instrument_visa`).
//!
//! VISA calls are blocking, so every operation runs on Tokio's blocking pool
//! with the instrument handle behind a `std::sync::Mutex`.

use async_trait::async_trait;
use std::ffi::CString;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visa_rs::flags::AccessMode;
use visa_rs::{DefaultRM, Instrument};

use super::scpi::{read_message, ScpiTransport};
use crate::error::{DsoError, DsoResult};

/// Resource expression matching every instrument the resource manager knows.
const INSTRUMENT_PATTERN: &str = "?*INSTR";

fn visa_unavailable(e: impl std::fmt::Display) -> DsoError {
    DsoError::ConnectionUnavailable(format!("VISA: {e}"))
}

/// List instrument resources known to the default VISA resource manager.
pub async fn discover_resources() -> DsoResult<Vec<String>> {
    tokio::task::spawn_blocking(|| {
        let rm = DefaultRM::new().map_err(visa_unavailable)?;
        let pattern = CString::new(INSTRUMENT_PATTERN).map_err(visa_unavailable)?;
        let mut list = rm
            .find_res_list(&pattern.into())
            .map_err(visa_unavailable)?;

        let mut resources = Vec::new();
        while let Some(resource) = list.find_next().map_err(visa_unavailable)? {
            resources.push(CString::from(resource).to_string_lossy().into_owned());
        }
        tracing::debug!("VISA resources: {:?}", resources);
        Ok(resources)
    })
    .await
    .map_err(visa_unavailable)?
}

/// Message transport through a VISA session.
pub struct VisaTransport {
    instrument: Arc<Mutex<Instrument>>,
    resource: String,
}

impl VisaTransport {
    /// Open `resource` (e.g. "TCPIP0::192.168.0.10::inst0::INSTR").
    pub async fn open(resource: &str, timeout: Duration) -> DsoResult<Self> {
        let name = resource.to_string();
        let instrument = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().map_err(visa_unavailable)?;
            let id = CString::new(name).map_err(visa_unavailable)?;
            rm.open(&id.into(), AccessMode::NO_LOCK, timeout)
                .map_err(visa_unavailable)
        })
        .await
        .map_err(visa_unavailable)??;

        tracing::info!("Opened VISA resource {}", resource);
        Ok(Self {
            instrument: Arc::new(Mutex::new(instrument)),
            resource: resource.to_string(),
        })
    }

    async fn blocking<R, F>(&self, command: &str, f: F) -> DsoResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Instrument) -> std::io::Result<R> + Send + 'static,
    {
        let instrument = Arc::clone(&self.instrument);
        let cmd = command.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = instrument.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard).map_err(|e| DsoError::rejected(cmd, e))
        })
        .await
        .map_err(|e| DsoError::rejected(command, e))?
    }
}

#[async_trait]
impl ScpiTransport for VisaTransport {
    fn transport_type(&self) -> &'static str {
        "visa"
    }

    async fn write(&self, command: &str) -> DsoResult<()> {
        tracing::debug!(resource = %self.resource, "VISA write: {}", command);
        let line = format!("{command}\n");
        self.blocking(command, move |instr| instr.write_all(line.as_bytes()))
            .await
    }

    async fn query(&self, query: &str) -> DsoResult<String> {
        tracing::debug!(resource = %self.resource, "VISA query: {}", query);
        let line = format!("{query}\n");
        self.blocking(query, move |instr| {
            instr.write_all(line.as_bytes())?;
            read_message(&*instr)
        })
        .await
    }
}
