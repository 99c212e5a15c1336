//! CSV export of acquisition results.
//!
//! Each result becomes one file named after the result and its timestamp,
//! with a `time` column followed by one column per channel. Channels shorter
//! than the time axis leave empty cells.

use std::path::{Path, PathBuf};

use crate::error::{DsoError, DsoResult};
use crate::events::AcquisitionResult;

/// Writes acquisition results as CSV files into a directory.
#[cfg(feature = "storage_csv")]
pub struct CsvWriter {
    dir: PathBuf,
}

#[cfg(feature = "storage_csv")]
impl CsvWriter {
    /// Writer storing files in `dir`, created if missing.
    pub fn new(dir: impl AsRef<Path>) -> DsoResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        tracing::info!("CSV files will be written to '{}'", dir.display());
        Ok(Self { dir })
    }

    /// File name used for `result`.
    pub fn file_name(result: &AcquisitionResult) -> String {
        format!(
            "{}_{}.csv",
            result.name,
            result.timestamp.format("%Y%m%d_%H%M%S%.3f")
        )
    }

    /// Write one result and return the path of the new file.
    pub fn write(&self, result: &AcquisitionResult) -> DsoResult<PathBuf> {
        let path = self.dir.join(Self::file_name(result));
        let mut writer = csv::Writer::from_path(&path).map_err(storage)?;

        let mut header = vec![result.time_axis.label.clone()];
        header.extend(result.channels.iter().map(|c| c.label.clone()));
        writer.write_record(&header).map_err(storage)?;

        let rows = result
            .channels
            .iter()
            .map(|c| c.data.len())
            .chain(std::iter::once(result.time_axis.data.len()))
            .max()
            .unwrap_or(0);

        for i in 0..rows {
            let cell = |data: &[f64]| data.get(i).map_or(String::new(), |v| v.to_string());
            let mut record = vec![cell(&result.time_axis.data)];
            record.extend(result.channels.iter().map(|c| cell(&c.data)));
            writer.write_record(&record).map_err(storage)?;
        }

        writer.flush()?;
        tracing::debug!("Wrote {} rows to '{}'", rows, path.display());
        Ok(path)
    }
}

#[cfg(feature = "storage_csv")]
fn storage(e: csv::Error) -> DsoError {
    DsoError::Storage(e.to_string())
}

/// Stand-in when the `storage_csv` feature is disabled.
#[cfg(not(feature = "storage_csv"))]
pub struct CsvWriter;

#[cfg(not(feature = "storage_csv"))]
impl CsvWriter {
    /// Always fails: CSV support is not compiled in.
    pub fn new(_dir: impl AsRef<Path>) -> DsoResult<Self> {
        Err(DsoError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Always fails: CSV support is not compiled in.
    pub fn write(&self, _result: &AcquisitionResult) -> DsoResult<PathBuf> {
        Err(DsoError::FeatureNotEnabled("storage_csv".to_string()))
    }
}
