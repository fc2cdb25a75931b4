// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use log_alerts::{
    flush_loop::flush_once,
    observation::{Event, Point, PointValue, VendorMetric},
    sink::{EventSubmitter, PointSubmitter, VendorMetricSubmitter},
    AlertsConsumer, DdApi, Delivery, DeliveryError, LagTracker, ProcessedRecord, RetryPolicy,
    Rollups, SinkError, VolumeService, DEFAULT_TAG,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MemorySink {
    points: Mutex<Vec<Point>>,
    events: Mutex<Vec<Event>>,
    vendor_metrics: Mutex<Vec<VendorMetric>>,
}

#[async_trait]
impl PointSubmitter for MemorySink {
    async fn submit_points(&self, points: &[Point]) -> Result<(), SinkError> {
        self.points.lock().unwrap().extend_from_slice(points);
        Ok(())
    }
}

#[async_trait]
impl EventSubmitter for MemorySink {
    async fn submit_events(&self, events: &[Event]) -> Result<(), SinkError> {
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}

#[async_trait]
impl VendorMetricSubmitter for MemorySink {
    async fn submit_vendor_metrics(&self, metrics: &[VendorMetric]) -> Result<(), SinkError> {
        self.vendor_metrics.lock().unwrap().extend_from_slice(metrics);
        Ok(())
    }
}

fn syslog(body: serde_json::Value) -> Vec<u8> {
    format!(
        "{} ip-10-0-0-1 production--api/task-1[1]: {body}",
        (Utc::now() - ChronoDuration::minutes(5)).to_rfc3339()
    )
    .into_bytes()
}

/// Groups processed records by routing tag, the way the consumer binary does.
fn batch_by_tag(consumer: &AlertsConsumer, lines: &[Vec<u8>]) -> HashMap<String, Vec<Vec<u8>>> {
    let mut batches: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
    for line in lines {
        if let ProcessedRecord::Encoded { item, tag } = consumer.process_record(line).unwrap() {
            batches.entry(tag).or_default().push(item);
        }
    }
    batches
}

#[tokio::test]
async fn records_flow_to_primary_and_regional_sinks() {
    let primary = Arc::new(MemorySink::default());
    let regional = Arc::new(MemorySink::default());
    let lag = Arc::new(LagTracker::new());
    let rollups = Arc::new(Rollups::new());
    let (volume_service, volume) = VolumeService::new();
    let volume_task = tokio::spawn(volume_service.run());

    let delivery = Delivery::new(primary.clone(), lag.clone(), RetryPolicy::default())
        .with_regional_sink("us-west-2", regional.clone());
    let consumer =
        AlertsConsumer::for_deploy_env("production", rollups.clone(), volume.clone(), delivery);

    let lines = vec![
        syslog(json!({
            "value": 123,
            "dim_a": "x",
            "_kvmeta": {"team": "eng", "routes": [{
                "type": "alerts", "series": "s", "dimensions": ["dim_a"],
                "stat_type": "counter", "value_field": "value", "rule": "r1"
            }]}
        })),
        syslog(json!({
            "title": "request-finished",
            "via": "kayvee-middleware",
            "canary": false,
            "response-time": 20.0,
            "status-code": 200
        })),
        syslog(json!({
            "region": "us-west-2",
            "_kvmeta": {"team": "eng", "routes": [{
                "type": "alerts", "series": "ContainerExitCount",
                "dimensions": ["container_app"], "stat_type": "counter", "rule": "exits"
            }]}
        })),
        syslog(json!({
            "category": "app_lifecycle",
            "title": "app_deploying",
            "user": "someone",
            "version": "v1"
        })),
        b"not a log line".to_vec(),
    ];

    let mut batches = HashMap::new();
    for line in &lines {
        match consumer.process_record(line) {
            Ok(ProcessedRecord::Encoded { item, tag }) => {
                batches.entry(tag).or_insert_with(Vec::new).push(item)
            }
            Ok(ProcessedRecord::Skipped) | Err(_) => {}
        }
    }
    assert_eq!(batches.get(DEFAULT_TAG).map(Vec::len), Some(2));
    assert_eq!(batches.get("us-west-2").map(Vec::len), Some(1));

    for (tag, batch) in &batches {
        consumer.send_batch(batch, tag).await.unwrap();
    }

    let points = primary.points.lock().unwrap().clone();
    let counter = points.iter().find(|p| p.series == "s").unwrap();
    assert_eq!(counter.value, PointValue::Int(123));
    assert_eq!(counter.dimensions.get("dim_a").map(String::as_str), Some("x"));
    // five minutes old, so the record's own timestamp is kept
    assert!(counter.timestamp.is_some());
    assert!(points.iter().any(|p| p.series == "ContainerExitCount"));

    let events = primary.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].series, "app_lifecycle");
    assert_eq!(
        events[0].dimensions.get("container_app").map(String::as_str),
        Some("api")
    );

    let vendor = regional.vendor_metrics.lock().unwrap().clone();
    assert_eq!(vendor.len(), 1);
    assert_eq!(vendor[0].name, "ContainerExitCount");
    assert!(!vendor[0].dimensions.contains_key("Hostname"));

    assert!(lag.current() >= Duration::from_secs(299));

    // background aggregators
    let flush_sink = MemorySink::default();
    assert!(flush_once(rollups.as_ref(), &flush_sink, RetryPolicy::default())
        .await
        .is_none());
    assert!(flush_once(&volume, &flush_sink, RetryPolicy::default())
        .await
        .is_none());
    assert!(flush_once(lag.as_ref(), &flush_sink, RetryPolicy::default())
        .await
        .is_none());

    let flushed = flush_sink.points.lock().unwrap().clone();
    let series: Vec<&str> = flushed.iter().map(|p| p.series.as_str()).collect();
    for expected in [
        "request-finished-response-time.count",
        "request-finished-response-time.sum",
        "request-finished-response-time.sumsquare",
        "request-finished-status-code.count",
        "kinesis-consumer.log-volume-count",
        "kinesis-consumer.log-volume-size",
        "kinesis-consumer.log-route-volume-count",
        "kinesis-consumer.log-route-volume-size",
        "max-log-delay",
    ] {
        assert!(series.contains(&expected), "missing {expected} in {series:?}");
    }
    let sum = flushed
        .iter()
        .find(|p| p.series == "request-finished-response-time.sum")
        .unwrap();
    assert_eq!(sum.value.as_f64(), 20.0);
    assert_eq!(lag.current(), Duration::ZERO);

    volume.shutdown().unwrap();
    volume_task.await.unwrap();
}

#[tokio::test]
async fn intake_outage_returns_whole_batch() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/series")
        .match_header("DD-API-KEY", "mock-api-key")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let api = DdApi::new(
        "mock-api-key".to_string(),
        server.url(),
        Duration::from_secs(5),
        6,
    )
    .unwrap();
    let retry = RetryPolicy {
        attempts: 2,
        base_delay: Duration::from_millis(1),
    };
    let (_volume_service, volume) = VolumeService::new();
    let delivery = Delivery::new(Arc::new(api), Arc::new(LagTracker::new()), retry);
    let consumer =
        AlertsConsumer::for_deploy_env("production", Arc::new(Rollups::new()), volume, delivery);

    let batches = batch_by_tag(
        &consumer,
        &[syslog(json!({
            "_kvmeta": {"routes": [{
                "type": "alerts", "series": "s", "dimensions": [],
                "stat_type": "gauge", "rule": "r1"
            }]}
        }))],
    );
    let batch = &batches[DEFAULT_TAG];

    let err = consumer.send_batch(batch, DEFAULT_TAG).await.unwrap_err();
    match err {
        DeliveryError::PartialBatch { message, failed } => {
            assert!(message.starts_with("failed to add datapoints"));
            assert_eq!(&failed, batch);
        }
        DeliveryError::Decode(e) => panic!("unexpected decode error {e}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn intake_accepts_series_and_events() {
    let mut server = Server::new_async().await;
    let series = server
        .mock("POST", "/api/v2/series")
        .match_header("Content-Encoding", "zstd")
        .with_status(202)
        .create_async()
        .await;
    let events = server
        .mock("POST", "/api/v1/events")
        .with_status(202)
        .create_async()
        .await;

    let api = DdApi::new(
        "mock-api-key".to_string(),
        server.url(),
        Duration::from_secs(5),
        6,
    )
    .unwrap();
    let (_volume_service, volume) = VolumeService::new();
    let delivery = Delivery::new(
        Arc::new(api),
        Arc::new(LagTracker::new()),
        RetryPolicy::default(),
    );
    let consumer =
        AlertsConsumer::for_deploy_env("production", Arc::new(Rollups::new()), volume, delivery);

    let batches = batch_by_tag(
        &consumer,
        &[
            syslog(json!({
                "value": 2.5,
                "_kvmeta": {"routes": [{
                    "type": "alerts", "series": "g", "dimensions": [],
                    "stat_type": "gauge", "value_field": "value", "rule": "r1"
                }]}
            })),
            syslog(json!({"category": "app_lifecycle", "title": "app_scaling"})),
        ],
    );
    consumer
        .send_batch(&batches[DEFAULT_TAG], DEFAULT_TAG)
        .await
        .unwrap();

    series.assert_async().await;
    events.assert_async().await;
}

#[tokio::test]
async fn accepted_events_are_not_reposted_on_retry() {
    let mut server = Server::new_async().await;
    let _series = server
        .mock("POST", "/api/v2/series")
        .with_status(202)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/api/v1/events")
        .match_body(Matcher::Regex("title:app_deploying".to_string()))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;
    let rejected = server
        .mock("POST", "/api/v1/events")
        .match_body(Matcher::Regex("title:app_scaling".to_string()))
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let api = DdApi::new(
        "mock-api-key".to_string(),
        server.url(),
        Duration::from_secs(5),
        6,
    )
    .unwrap();
    let retry = RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
    };
    let (_volume_service, volume) = VolumeService::new();
    let delivery = Delivery::new(Arc::new(api), Arc::new(LagTracker::new()), retry);
    let consumer =
        AlertsConsumer::for_deploy_env("production", Arc::new(Rollups::new()), volume, delivery);

    let batches = batch_by_tag(
        &consumer,
        &[
            syslog(json!({"category": "app_lifecycle", "title": "app_deploying"})),
            syslog(json!({"category": "app_lifecycle", "title": "app_scaling"})),
        ],
    );
    let err = consumer
        .send_batch(&batches[DEFAULT_TAG], DEFAULT_TAG)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to add events"));

    accepted.assert_async().await;
    rejected.assert_async().await;
}
