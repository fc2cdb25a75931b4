// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::errors::VolumeError;
use crate::observation::{Dimensions, Observation, Point};

const UNKNOWN: &str = "unknown";

/// Series prefixes, completed with `-count` and `-size`.
pub const LOG_VOLUME_SERIES: &str = "kinesis-consumer.log-volume";
pub const LOG_ROUTE_VOLUME_SERIES: &str = "kinesis-consumer.log-route-volume";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvAppTeam {
    pub env: String,
    pub app: String,
    pub team: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppRule {
    pub app: String,
    pub rule: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Volume {
    pub count: u64,
    pub bytes: u64,
}

impl Volume {
    fn add(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

/// One record seen by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeRecord {
    pub env: String,
    pub app: String,
    pub team: String,
    pub bytes: u64,
    pub rules: Vec<String>,
}

#[derive(Debug)]
pub enum VolumeCommand {
    Record(VolumeRecord),
    Flush(oneshot::Sender<Vec<Observation>>),
    Shutdown,
}

#[derive(Clone)]
pub struct VolumeHandle {
    tx: mpsc::UnboundedSender<VolumeCommand>,
}

impl VolumeHandle {
    /// Never blocks. Empty env, app or team are reported as `unknown`.
    pub fn record(
        &self,
        env: &str,
        app: &str,
        team: &str,
        bytes: u64,
        rules: Vec<String>,
    ) -> Result<(), VolumeError> {
        let record = VolumeRecord {
            env: or_unknown(env),
            app: or_unknown(app),
            team: or_unknown(team),
            bytes,
            rules,
        };
        self.tx
            .send(VolumeCommand::Record(record))
            .map_err(|_| VolumeError::Unavailable)
    }

    pub async fn flush(&self) -> Result<Vec<Observation>, VolumeError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(VolumeCommand::Flush(response_tx))
            .map_err(|_| VolumeError::Unavailable)?;

        response_rx.await.map_err(|_| VolumeError::ResponseDropped)
    }

    pub fn shutdown(&self) -> Result<(), VolumeError> {
        self.tx
            .send(VolumeCommand::Shutdown)
            .map_err(|_| VolumeError::Unavailable)
    }
}

fn or_unknown(s: &str) -> String {
    if s.is_empty() {
        UNKNOWN.to_string()
    } else {
        s.to_string()
    }
}

/// Single owner of the volume counters. Everything else talks to it through a
/// [`VolumeHandle`].
pub struct VolumeService {
    by_env_app_team: HashMap<EnvAppTeam, Volume>,
    by_app_rule: HashMap<AppRule, Volume>,
    rx: mpsc::UnboundedReceiver<VolumeCommand>,
}

impl VolumeService {
    #[must_use]
    pub fn new() -> (Self, VolumeHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            by_env_app_team: HashMap::new(),
            by_app_rule: HashMap::new(),
            rx,
        };
        (service, VolumeHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Volume service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                VolumeCommand::Record(record) => self.record(record),
                VolumeCommand::Flush(response_tx) => {
                    let observations = self.drain();
                    if response_tx.send(observations).is_err() {
                        error!("Failed to send volume flush response - receiver dropped");
                    }
                }
                VolumeCommand::Shutdown => {
                    debug!("Volume service shutting down");
                    break;
                }
            }
        }

        let unflushed = self.by_env_app_team.len();
        if unflushed > 0 {
            warn!("Volume service stopped with {unflushed} unflushed env/app/team counters");
        }
        debug!("Volume service stopped");
    }

    fn record(&mut self, record: VolumeRecord) {
        self.by_env_app_team
            .entry(EnvAppTeam {
                env: record.env,
                app: record.app.clone(),
                team: record.team,
            })
            .or_default()
            .add(record.bytes);

        for rule in record.rules {
            self.by_app_rule
                .entry(AppRule {
                    app: record.app.clone(),
                    rule,
                })
                .or_default()
                .add(record.bytes);
        }
    }

    fn drain(&mut self) -> Vec<Observation> {
        let now = Utc::now();
        let mut out =
            Vec::with_capacity(2 * (self.by_env_app_team.len() + self.by_app_rule.len()));
        let (mut total_count, mut total_bytes) = (0_u64, 0_u64);

        for (key, volume) in self.by_env_app_team.drain() {
            total_count += volume.count;
            total_bytes += volume.bytes;
            let dims = dimensions(&[
                ("env", key.env),
                ("application", key.app),
                ("team", key.team),
            ]);
            push_volume(&mut out, LOG_VOLUME_SERIES, dims, volume, now);
        }
        for (key, volume) in self.by_app_rule.drain() {
            let dims = dimensions(&[("application", key.app), ("rule", key.rule)]);
            push_volume(&mut out, LOG_ROUTE_VOLUME_SERIES, dims, volume, now);
        }

        debug!(
            "Flushing log volumes: {} points, {total_count} logs, {total_bytes} bytes",
            out.len()
        );
        out
    }
}

fn dimensions(pairs: &[(&str, String)]) -> Dimensions {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

fn push_volume(
    out: &mut Vec<Observation>,
    prefix: &str,
    dims: Dimensions,
    volume: Volume,
    now: chrono::DateTime<Utc>,
) {
    let count = i64::try_from(volume.count).unwrap_or(i64::MAX);
    let bytes = i64::try_from(volume.bytes).unwrap_or(i64::MAX);
    out.push(Observation::Point(
        Point::counter(format!("{prefix}-count"), dims.clone(), count).with_timestamp(now),
    ));
    out.push(Observation::Point(
        Point::counter(format!("{prefix}-size"), dims, bytes).with_timestamp(now),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::PointValue;

    fn points(observations: Vec<Observation>) -> Vec<Point> {
        observations
            .into_iter()
            .map(|o| match o {
                Observation::Point(p) => p,
                Observation::Event(e) => panic!("unexpected event {e:?}"),
            })
            .collect()
    }

    fn value_of(points: &[Point], series: &str, dim: (&str, &str)) -> Option<PointValue> {
        points
            .iter()
            .find(|p| p.series == series && p.dimensions.get(dim.0).map(String::as_str) == Some(dim.1))
            .map(|p| p.value)
    }

    #[tokio::test]
    async fn test_volume_service_basic_flow() {
        let (service, handle) = VolumeService::new();
        let service_task = tokio::spawn(service.run());

        handle
            .record("production", "api", "eng", 100, vec!["rule-a".to_string()])
            .expect("record failed");
        handle
            .record("production", "api", "eng", 50, vec!["rule-a".to_string(), "rule-b".to_string()])
            .expect("record failed");

        let flushed = points(handle.flush().await.expect("flush failed"));
        assert_eq!(flushed.len(), 6);
        assert!(flushed.iter().all(|p| p.timestamp.is_some()));
        assert_eq!(
            value_of(&flushed, "kinesis-consumer.log-volume-count", ("application", "api")),
            Some(PointValue::Int(2))
        );
        assert_eq!(
            value_of(&flushed, "kinesis-consumer.log-volume-size", ("team", "eng")),
            Some(PointValue::Int(150))
        );
        assert_eq!(
            value_of(&flushed, "kinesis-consumer.log-route-volume-count", ("rule", "rule-a")),
            Some(PointValue::Int(2))
        );
        assert_eq!(
            value_of(&flushed, "kinesis-consumer.log-route-volume-size", ("rule", "rule-b")),
            Some(PointValue::Int(50))
        );

        handle.shutdown().expect("shutdown failed");
        service_task.await.expect("service task failed");
    }

    #[tokio::test]
    async fn test_flush_resets_counters() {
        let (service, handle) = VolumeService::new();
        let service_task = tokio::spawn(service.run());

        handle.record("", "", "", 10, vec![]).expect("record failed");
        let flushed = points(handle.flush().await.expect("flush failed"));
        assert_eq!(flushed.len(), 2);
        assert_eq!(
            value_of(&flushed, "kinesis-consumer.log-volume-count", ("env", "unknown")),
            Some(PointValue::Int(1))
        );
        assert_eq!(
            flushed[0].dimensions.get("team").map(String::as_str),
            Some("unknown")
        );

        assert!(handle.flush().await.expect("flush failed").is_empty());

        handle.shutdown().expect("shutdown failed");
        service_task.await.expect("service task failed");
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (service, handle) = VolumeService::new();
        let service_task = tokio::spawn(service.run());
        handle.shutdown().expect("shutdown failed");
        service_task.await.expect("service task failed");

        assert_eq!(
            handle.record("e", "a", "t", 1, vec![]),
            Err(VolumeError::Unavailable)
        );
        assert_eq!(handle.flush().await.err(), Some(VolumeError::Unavailable));
    }
}
