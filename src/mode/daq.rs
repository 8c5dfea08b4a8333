use std::{
    fs::{self, File},
    io::{self, BufRead},
    path::{Path, PathBuf},
};

use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaqError {
    #[error("Cannot create test data file '{path}'")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error writing test data")]
    Csv(#[from] csv::Error),

    #[error("Error reading uploaded test data")]
    Io(#[from] io::Error),
}

/// Persistent storage for uploaded test altitudes.
pub trait TestDataStore: Send {
    fn append(&mut self, altitude_m: f64) -> Result<(), DaqError>;

    fn flush(&mut self) -> Result<(), DaqError>;
}

/// Stores altitudes in a one column CSV file, readable back by the replay
/// loader.
pub struct CsvTestDataStore {
    writer: csv::Writer<File>,
}

impl CsvTestDataStore {
    pub fn create(path: &Path) -> Result<Self, DaqError> {
        let create_err = |source| DaqError::Create {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(create_err)?;
        }

        let mut writer = csv::Writer::from_writer(File::create(path).map_err(create_err)?);
        writer.write_record(["altitude_m"])?;

        info!("Storing test data to '{}'", path.display());

        Ok(Self { writer })
    }
}

impl TestDataStore for CsvTestDataStore {
    fn append(&mut self, altitude_m: f64) -> Result<(), DaqError> {
        self.writer.write_record([altitude_m.to_string()])?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DaqError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Stored,
    Skipped,
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaqSummary {
    pub lines: u64,
    pub stored: u64,
    pub rejected: u64,
}

/// Receives an uploaded test altitude sequence, one value per line.
pub struct DaqSession {
    store: Box<dyn TestDataStore>,
    summary: DaqSummary,
    seen_data: bool,
}

impl DaqSession {
    pub fn new(store: Box<dyn TestDataStore>) -> Self {
        Self {
            store,
            summary: DaqSummary::default(),
            seen_data: false,
        }
    }

    pub fn accept_line(&mut self, line: &str) -> Result<LineOutcome, DaqError> {
        self.summary.lines += 1;
        let value = line.trim();

        if value.is_empty() || value.starts_with('#') {
            return Ok(LineOutcome::Skipped);
        }

        let first_data_line = !self.seen_data;
        self.seen_data = true;

        match value.parse::<f64>() {
            Ok(altitude_m) if altitude_m.is_finite() => {
                self.store.append(altitude_m)?;
                self.summary.stored += 1;
                Ok(LineOutcome::Stored)
            }
            // Column header
            _ if first_data_line => Ok(LineOutcome::Skipped),
            _ => {
                warn!(
                    "Line {}: rejected '{value}', not an altitude",
                    self.summary.lines
                );
                self.summary.rejected += 1;
                Ok(LineOutcome::Rejected)
            }
        }
    }

    /// Reads `reader` to the end and flushes the store.
    pub fn ingest<R: BufRead>(&mut self, reader: R) -> Result<DaqSummary, DaqError> {
        for line in reader.lines() {
            self.accept_line(&line?)?;
        }

        self.store.flush()?;

        info!(
            "Upload complete: {} altitudes stored, {} lines rejected",
            self.summary.stored, self.summary.rejected
        );

        Ok(self.summary.clone())
    }

    pub fn summary(&self) -> &DaqSummary {
        &self.summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sensors::replay::read_altitude_csv;

    #[derive(Clone, Default)]
    struct MemoryStore(Arc<Mutex<Vec<f64>>>);

    impl TestDataStore for MemoryStore {
        fn append(&mut self, altitude_m: f64) -> Result<(), DaqError> {
            self.0.lock().unwrap().push(altitude_m);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), DaqError> {
            Ok(())
        }
    }

    #[test]
    fn test_accept_lines() {
        let store = MemoryStore::default();
        let mut daq = DaqSession::new(Box::new(store.clone()));

        let outcomes: Vec<LineOutcome> = ["altitude", "", "0", " 12.5 ", "# note", "x1", "-3"]
            .iter()
            .map(|l| daq.accept_line(l).unwrap())
            .collect();

        assert_eq!(
            outcomes,
            vec![
                LineOutcome::Skipped,
                LineOutcome::Skipped,
                LineOutcome::Stored,
                LineOutcome::Stored,
                LineOutcome::Skipped,
                LineOutcome::Rejected,
                LineOutcome::Stored,
            ]
        );
        assert_eq!(*store.0.lock().unwrap(), vec![0.0, 12.5, -3.0]);
        assert_eq!(
            daq.summary(),
            &DaqSummary {
                lines: 7,
                stored: 3,
                rejected: 1
            }
        );
    }

    #[test]
    fn test_csv_store_replays_back() {
        let path = std::env::temp_dir()
            .join(format!("n4-daq-{}", std::process::id()))
            .join("upload.csv");

        let store = CsvTestDataStore::create(&path).unwrap();
        let mut daq = DaqSession::new(Box::new(store));

        let summary = daq.ingest("0\n5.5\n100\nNaN\n".as_bytes()).unwrap();
        assert_eq!(summary.stored, 3);
        assert_eq!(summary.rejected, 1);

        assert_eq!(read_altitude_csv(&path).unwrap(), vec![0.0, 5.5, 100.0]);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
