//! Cloud Monitoring API (v3) client
//!
//! Only the time-series list used by the replication-lag evaluator.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use super::{ApiClient, GcpError, Result};

const BASE_URL: &str = "https://monitoring.googleapis.com/v3";

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ListTimeSeriesResponse {
    #[serde(default)]
    time_series: Vec<TimeSeries>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeries {
    #[serde(default)]
    pub points: Vec<Point>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    #[serde(default)]
    pub value: TypedValue,
}

/// Metric point value. The REST encoding carries int64 as a decimal
/// string; the lag metric is strictly int64 and anything else is an error.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TypedValue {
    #[serde(default)]
    pub int64_value: Option<String>,

    #[serde(default)]
    pub double_value: Option<f64>,

    #[serde(default)]
    pub bool_value: Option<bool>,
}

impl TypedValue {
    pub fn as_i64(&self) -> Result<i64> {
        let raw = self.int64_value.as_deref().ok_or_else(|| {
            GcpError::Malformed("time-series point value is not int64".to_string())
        })?;
        raw.parse::<i64>()
            .map_err(|_| GcpError::Malformed(format!("unparseable int64 point value {raw:?}")))
    }
}

#[derive(Clone)]
pub struct MonitoringClient {
    api: ApiClient,
}

impl MonitoringClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// List time series matching `filter` over `[start, end]`, max-aligned
    /// into `alignment_secs` buckets. Points come newest-first.
    pub async fn list_time_series(
        &self,
        project: &str,
        filter: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        alignment_secs: u64,
    ) -> Result<Vec<TimeSeries>> {
        let url = format!("{BASE_URL}/projects/{project}/timeSeries");
        let query = [
            ("filter", filter.to_string()),
            (
                "interval.startTime",
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "interval.endTime",
                end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("aggregation.alignmentPeriod", format!("{alignment_secs}s")),
            ("aggregation.perSeriesAligner", "ALIGN_MAX".to_string()),
            ("view", "FULL".to_string()),
        ];
        let resp: ListTimeSeriesResponse = self.api.get_json_with_query(&url, &query).await?;
        Ok(resp.time_series)
    }
}
