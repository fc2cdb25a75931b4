// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Datadog intake client, used as the primary sink.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use serde::Serialize;
use tracing::debug;

use crate::errors::SinkError;
use crate::observation::{Dimensions, Event, Point, PointKind};
use crate::sink::{EventSubmitter, PointSubmitter};

const SERIES_PATH: &str = "/api/v2/series";
const EVENTS_PATH: &str = "/api/v1/events";

/// Metric intake type, as numbered by the v2 series API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum IntakeType {
    Count = 1,
    Gauge = 3,
}

impl Serialize for IntakeType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Serialize)]
struct Series<'a> {
    series: Vec<SeriesEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct SeriesEntry<'a> {
    metric: &'a str,
    #[serde(rename = "type")]
    kind: IntakeType,
    points: [SeriesPoint; 1],
    tags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SeriesPoint {
    timestamp: i64,
    value: f64,
}

#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    title: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_happened: Option<i64>,
    tags: Vec<String>,
    alert_type: &'static str,
    source_type_name: &'a str,
}

fn tags(dimensions: &Dimensions) -> Vec<String> {
    dimensions.iter().map(|(k, v)| format!("{k}:{v}")).collect()
}

impl<'a> SeriesEntry<'a> {
    /// Points without a timestamp are stamped with `now`, the intake rejects
    /// anything older than an hour.
    fn new(point: &'a Point, now: i64) -> Self {
        let kind = match point.kind {
            PointKind::Counter => IntakeType::Count,
            PointKind::Gauge => IntakeType::Gauge,
        };
        SeriesEntry {
            metric: &point.series,
            kind,
            points: [SeriesPoint {
                timestamp: point.timestamp.map_or(now, |ts| ts.timestamp()),
                value: point.value.as_f64(),
            }],
            tags: tags(&point.dimensions),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DdApi {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    compression_level: i32,
}

impl DdApi {
    /// `base_url` is the API root, e.g. `https://api.datadoghq.com`.
    pub fn new(
        api_key: String,
        base_url: String,
        timeout: Duration,
        compression_level: i32,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(format!("unable to build HTTP client: {e}")))?;
        Ok(DdApi {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            compression_level,
        })
    }

    fn headers(&self, compressed: bool) -> Result<HeaderMap, SinkError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "DD-API-KEY",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| SinkError::Payload(format!("invalid API key header: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if compressed {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        }
        Ok(headers)
    }

    async fn post(&self, path: &str, body: Vec<u8>, compressed: bool) -> Result<(), SinkError> {
        let url = format!("{}{path}", self.base_url);
        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .headers(self.headers(compressed)?)
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(
            "POST {path} returned {status} in {} ms",
            start.elapsed().as_millis()
        );
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl PointSubmitter for DdApi {
    async fn submit_points(&self, points: &[Point]) -> Result<(), SinkError> {
        let now = Utc::now().timestamp();
        let payload = Series {
            series: points.iter().map(|p| SeriesEntry::new(p, now)).collect(),
        };
        let json = serde_json::to_vec(&payload).map_err(|e| SinkError::Payload(e.to_string()))?;
        let compressed = zstd::encode_all(json.as_slice(), self.compression_level)
            .map_err(|e| SinkError::Payload(format!("unable to compress series: {e}")))?;
        self.post(SERIES_PATH, compressed, true).await
    }
}

#[async_trait]
impl EventSubmitter for DdApi {
    /// One request per event, stopping at the first failure.
    async fn submit_events(&self, events: &[Event]) -> Result<(), SinkError> {
        for event in events {
            let payload = EventPayload {
                title: &event.series,
                text: &event.series,
                date_happened: event.timestamp.map(|ts| ts.timestamp()),
                tags: tags(&event.dimensions),
                alert_type: "info",
                source_type_name: &event.category,
            };
            let json =
                serde_json::to_vec(&payload).map_err(|e| SinkError::Payload(e.to_string()))?;
            self.post(EVENTS_PATH, json, false).await?;
        }
        Ok(())
    }
}
