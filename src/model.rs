// src/model.rs
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One row, positionally bound to the result's column list.
pub type Row = Vec<serde_json::Value>;

/*──────────────────────── identifiers ─────────────────────────*/
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(String);

impl TabId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation id binding a run's local state to its remote query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(String);

impl QueryId {
    /// Fresh, process-unique id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/*──────────────────────── results ─────────────────────────────*/
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self { name: name.into(), data_type: data_type.into() }
    }
}

/// Server-side cost of a statement (or, summed, of a whole run).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStatistics {
    /// Seconds.
    #[serde(default)]
    pub elapsed: f64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub rows_read: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub bytes_read: u64,
    #[serde(default, deserialize_with = "lenient_opt_u64", skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
}

impl QueryStatistics {
    /// Fold another statement's numbers into a run total. Memory is a peak,
    /// everything else adds up.
    pub fn accumulate(&mut self, other: &QueryStatistics) {
        self.elapsed += other.elapsed;
        self.rows_read += other.rows_read;
        self.bytes_read += other.bytes_read;
        self.memory_usage = match (self.memory_usage, other.memory_usage) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub statistics: QueryStatistics,
    pub limit_reached: bool,
}

impl QueryResult {
    /// Single-cell result used when a run produced no row data.
    pub fn message(text: impl Into<String>, statistics: QueryStatistics) -> Self {
        Self {
            columns: vec![Column::new("result", "String")],
            rows: vec![vec![serde_json::Value::String(text.into())]],
            row_count: 1,
            statistics,
            limit_reached: false,
        }
    }

    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }
}

/*──────────────────────── run state ───────────────────────────*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunErrorKind {
    /// The server rejected a statement.
    Statement,
    /// Connection failure, non-2xx response or unreadable stream.
    Network,
    Authentication,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
}

impl RunError {
    pub fn statement(code: Option<i64>, message: impl Into<String>) -> Self {
        Self { kind: RunErrorKind::Statement, code, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self { kind: RunErrorKind::Network, code: None, message: message.into() }
    }

    pub fn authentication(code: Option<i64>, message: impl Into<String>) -> Self {
        Self { kind: RunErrorKind::Authentication, code, message: message.into() }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: RunErrorKind::Cancelled,
            code: None,
            message: "Query cancelled by user".to_owned(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/*──────────────────────── serde helpers ───────────────────────*/
// Some servers quote 64-bit integers in JSON; accept both spellings.
fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(lenient_opt_u64(d)?.unwrap_or(0))
}

fn lenient_opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    use serde::de::Error;
    match Option::<serde_json::Value>::deserialize(d)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .map(Some)
            .ok_or_else(|| D::Error::custom("invalid counter")),
        Some(serde_json::Value::String(s)) => s.parse().map(Some).map_err(D::Error::custom),
        Some(other) => Err(D::Error::custom(format!("invalid counter: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_accept_quoted_counters() {
        let stats: QueryStatistics =
            serde_json::from_str(r#"{"elapsed":0.5,"rows_read":"12","bytes_read":34,"memory_usage":null}"#).unwrap();
        assert_eq!(stats.rows_read, 12);
        assert_eq!(stats.bytes_read, 34);
        assert_eq!(stats.memory_usage, None);

        let empty: QueryStatistics = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, QueryStatistics::default());
    }

    #[test]
    fn accumulate_sums_counters_and_keeps_peak_memory() {
        let mut total = QueryStatistics { memory_usage: Some(10), ..Default::default() };
        total.accumulate(&QueryStatistics { elapsed: 1.0, rows_read: 5, bytes_read: 50, memory_usage: Some(7) });
        total.accumulate(&QueryStatistics { elapsed: 0.5, rows_read: 1, bytes_read: 2, memory_usage: Some(30) });
        assert_eq!(total.rows_read, 6);
        assert_eq!(total.bytes_read, 52);
        assert_eq!(total.memory_usage, Some(30));
        assert!((total.elapsed - 1.5).abs() < f64::EPSILON);
    }
}
