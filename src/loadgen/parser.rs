//! Load generator result parsing
//!
//! Reads the generator's CSV artifact row by row.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::ExecutionError;

/// Locust's trailing summary row
const AGGREGATED_ROW: &str = "Aggregated";

const STATUS_COLUMNS: &[&str] = &["status", "result", "outcome"];
const RESPONSE_TIME_COLUMNS: &[&str] = &[
    "response time",
    "response_time",
    "response_time_ms",
    "average response time",
];

/// One row of the result artifact, keyed by header
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultRecord {
    fields: BTreeMap<String, String>,
}

impl ResultRecord {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Case-insensitive lookup over a list of candidate headers
    fn lookup(&self, candidates: &[&str]) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| candidates.iter().any(|c| k.trim().eq_ignore_ascii_case(c)))
            .map(|(_, v)| v.trim())
    }

    pub fn name(&self) -> Option<&str> {
        self.lookup(&["name"])
    }

    pub fn status(&self) -> Option<&str> {
        self.lookup(STATUS_COLUMNS)
    }

    pub fn response_time_ms(&self) -> Option<f64> {
        self.lookup(RESPONSE_TIME_COLUMNS)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// Locust stats rows carry per-endpoint failure counts
    pub fn failure_count(&self) -> Option<u64> {
        self.lookup(&["failure count"])
            .and_then(|v| v.parse().ok())
    }

    fn is_summary_row(&self) -> bool {
        self.name() == Some(AGGREGATED_ROW)
            && self.lookup(&["type"]).map(str::is_empty).unwrap_or(true)
    }
}

/// Opens result artifacts
pub struct ResultParser;

impl ResultParser {
    /// Open a result artifact for a single pass over its rows
    pub fn open(path: impl AsRef<Path>) -> Result<ResultRows, ExecutionError> {
        let path = path.as_ref();
        let unavailable = |reason: String| ExecutionError::ResultUnavailable {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        let headers = reader
            .headers()
            .map_err(|e| unavailable(e.to_string()))?
            .clone();

        Ok(ResultRows {
            path: path.to_path_buf(),
            headers,
            records: reader.into_records(),
        })
    }
}

/// Lazy, single-pass iterator over a result artifact
pub struct ResultRows {
    path: PathBuf,
    headers: csv::StringRecord,
    records: csv::StringRecordsIntoIter<File>,
}

impl Iterator for ResultRows {
    type Item = Result<ResultRecord, ExecutionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.records.next()? {
                Ok(row) => row,
                Err(e) => {
                    return Some(Err(ExecutionError::ResultUnavailable {
                        path: self.path.display().to_string(),
                        reason: format!("malformed row: {e}"),
                    }))
                }
            };

            let record = ResultRecord::from_pairs(
                self.headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string())),
            );

            if record.is_summary_row() {
                continue;
            }
            return Some(Ok(record));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_status_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run_stats.csv");
        std::fs::write(
            &path,
            "Name,Status,Response Time\n/login,success,12.5\n/cart,failure,40\n",
        )
        .unwrap();

        let rows: Vec<_> = ResultParser::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name(), Some("/login"));
        assert_eq!(rows[0].status(), Some("success"));
        assert_eq!(rows[0].response_time_ms(), Some(12.5));
        assert_eq!(rows[1].status(), Some("failure"));
    }

    #[test]
    fn test_locust_stats_skip_aggregated_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locust_result_stats.csv");
        std::fs::write(
            &path,
            "Type,Name,Request Count,Failure Count,Average Response Time\n\
             GET,/,120,0,33.2\n\
             POST,/order,40,3,80.0\n\
             ,Aggregated,160,3,44.9\n",
        )
        .unwrap();

        let rows: Vec<_> = ResultParser::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].failure_count(), Some(3));
        assert_eq!(rows[0].response_time_ms(), Some(33.2));
        assert!(rows[0].status().is_none());
    }

    #[test]
    fn test_missing_artifact_is_unavailable() {
        let dir = tempdir().unwrap();
        let result = ResultParser::open(dir.path().join("absent.csv"));
        assert!(matches!(
            result,
            Err(ExecutionError::ResultUnavailable { .. })
        ));
    }

    #[test]
    fn test_reopen_restarts_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.csv");
        std::fs::write(&path, "Name,Status\na,success\nb,success\n").unwrap();

        assert_eq!(ResultParser::open(&path).unwrap().count(), 2);
        assert_eq!(ResultParser::open(&path).unwrap().count(), 2);
    }

    #[test]
    fn test_empty_artifact_yields_no_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "").unwrap();

        assert_eq!(ResultParser::open(&path).unwrap().count(), 0);
    }
}
