use std::{collections::VecDeque, fs::File, io::Read, path::Path};

use chrono::TimeDelta;
use log::info;
use thiserror::Error;

use super::{SensorError, SensorProducer, SensorReading};
use crate::utils::time::Instant;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Cannot read altitude file '{path}'")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed altitude file")]
    Csv(#[from] csv::Error),

    #[error("Line {line}: '{value}' is not an altitude")]
    BadValue { line: u64, value: String },

    #[error("No altitude samples found")]
    Empty,
}

/// Parses a recorded altitude sequence: one value in the first column of each
/// row. A non numeric first row is taken as a header, `#` starts a comment.
pub fn parse_altitude_csv<R: Read>(reader: R) -> Result<Vec<f64>, ReplayError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut altitudes = vec![];

    for (i, record) in reader.records().enumerate() {
        let record = record?;

        let Some(field) = record.get(0).filter(|f| !f.is_empty()) else {
            continue;
        };

        match field.parse::<f64>() {
            Ok(v) if v.is_finite() => altitudes.push(v),
            _ if i == 0 => continue,
            _ => {
                return Err(ReplayError::BadValue {
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    value: field.to_string(),
                });
            }
        }
    }

    if altitudes.is_empty() {
        return Err(ReplayError::Empty);
    }

    Ok(altitudes)
}

pub fn read_altitude_csv(path: &Path) -> Result<Vec<f64>, ReplayError> {
    let file = File::open(path).map_err(|source| ReplayError::Open {
        path: path.display().to_string(),
        source,
    })?;

    let altitudes = parse_altitude_csv(file)?;
    info!(
        "Loaded {} altitude samples from '{}'",
        altitudes.len(),
        path.display()
    );

    Ok(altitudes)
}

/// Plays back a recorded altitude sequence, one value per period.
#[derive(Debug, Clone)]
pub struct ReplayProducer {
    altitudes: VecDeque<f64>,
    period: TimeDelta,
}

impl ReplayProducer {
    pub fn new(altitudes: impl IntoIterator<Item = f64>, period: TimeDelta) -> Self {
        Self {
            altitudes: altitudes.into_iter().collect(),
            period,
        }
    }

    pub fn remaining(&self) -> usize {
        self.altitudes.len()
    }
}

impl SensorProducer for ReplayProducer {
    fn name(&self) -> &str {
        "replay"
    }

    fn period(&self) -> TimeDelta {
        self.period
    }

    fn sample(&mut self, _: Instant) -> Result<Option<SensorReading>, SensorError> {
        Ok(self
            .altitudes
            .pop_front()
            .map(|altitude_m| SensorReading::Altitude {
                pressure_pa: None,
                altitude_m,
            }))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_with_header_and_comments() {
        let data = "altitude_m\n# pad\n0.0\n 2.5 \n\n10,extra\n-1\n";

        assert_eq!(
            parse_altitude_csv(data.as_bytes()).unwrap(),
            vec![0.0, 2.5, 10.0, -1.0]
        );
    }

    #[test]
    fn test_parse_without_header() {
        assert_eq!(
            parse_altitude_csv("1\n2\n3".as_bytes()).unwrap(),
            vec![1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_bad_value_reports_line() {
        let err = parse_altitude_csv("altitude\n1.0\nabc\n".as_bytes()).unwrap_err();

        assert!(matches!(err, ReplayError::BadValue { line: 3, ref value } if value == "abc"));
    }

    #[test]
    fn test_empty() {
        assert!(matches!(
            parse_altitude_csv("altitude\n# nothing\n".as_bytes()),
            Err(ReplayError::Empty)
        ));
    }

    #[test]
    fn test_producer_exhausts() {
        let mut producer = ReplayProducer::new([1.0, 2.0], TimeDelta::milliseconds(50));

        assert_eq!(
            producer.sample(Instant::ZERO).unwrap().and_then(|r| r.altitude_m()),
            Some(1.0)
        );
        assert_eq!(producer.remaining(), 1);
        assert!(producer.sample(Instant::ZERO).unwrap().is_some());
        assert_eq!(producer.sample(Instant::ZERO).unwrap(), None);
    }
}
