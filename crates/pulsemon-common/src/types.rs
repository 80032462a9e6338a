use serde::{Deserialize, Serialize};

/// Metric kind, which also selects the accumulation rule applied on the
/// server.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Each update replaces the stored value.
    Gauge,
    /// Each update adds its delta to the stored total.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            _ => Err(format!("unknown metric type: {s}")),
        }
    }
}

/// One metric observation in the fixed JSON wire schema:
///
/// ```json
/// { "id": "PollCount", "type": "counter", "delta": 1 }
/// ```
///
/// Exactly one of `delta` (counter) or `value` (gauge) is expected to be
/// present. The absent field is omitted on the wire rather than sent as zero;
/// whether a received metric actually honours this is checked by the storage
/// accumulator, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Plain-text rendering of the populated field, as used by the path-style
    /// HTTP endpoints. Returns `None` when the field matching `kind` is absent.
    pub fn text_value(&self) -> Option<String> {
        match self.kind {
            MetricKind::Gauge => self.value.map(|v| v.to_string()),
            MetricKind::Counter => self.delta.map(|d| d.to_string()),
        }
    }
}

/// Request body of `POST /value/`: identifies a metric without carrying a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricKey {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

/// Ordered sequence of observations produced by one poll cycle or request.
pub type MetricBatch = Vec<Metric>;
