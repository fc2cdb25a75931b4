// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic flushing of the background aggregators into the primary sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::lag::LagTracker;
use crate::observation::{Observation, Point};
use crate::retry::RetryPolicy;
use crate::rollups::Rollups;
use crate::sink::PointSubmitter;
use crate::volume_service::VolumeHandle;

/// Something that periodically turns its state into observations.
#[async_trait]
pub trait Flushable: Send + Sync {
    async fn flush(&self) -> Vec<Observation>;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl Flushable for Rollups {
    async fn flush(&self) -> Vec<Observation> {
        Rollups::flush(self)
    }

    fn name(&self) -> &'static str {
        "rollups"
    }
}

#[async_trait]
impl Flushable for LagTracker {
    async fn flush(&self) -> Vec<Observation> {
        LagTracker::flush(self)
    }

    fn name(&self) -> &'static str {
        "lag"
    }
}

#[async_trait]
impl Flushable for VolumeHandle {
    async fn flush(&self) -> Vec<Observation> {
        match VolumeHandle::flush(self).await {
            Ok(observations) => observations,
            Err(e) => {
                error!("Failed to flush log volumes: {e}");
                Vec::new()
            }
        }
    }

    fn name(&self) -> &'static str {
        "volume"
    }
}

/// Runs one flush cycle: collect, then send with retry. Returns the points
/// that could not be delivered.
pub async fn flush_once(
    task: &dyn Flushable,
    sink: &dyn PointSubmitter,
    retry: RetryPolicy,
) -> Option<Vec<Point>> {
    let observations = task.flush().await;
    let mut points = Vec::with_capacity(observations.len());
    for observation in observations {
        match observation {
            Observation::Point(p) => points.push(p),
            Observation::Event(e) => {
                warn!("Dropping event {} flushed by {}", e.series, task.name());
            }
        }
    }
    if points.is_empty() {
        return None;
    }

    debug!("Flushing {} points from {}", points.len(), task.name());
    let what = format!("send {} points", task.name());
    let batch = &points;
    match retry.run(&what, move || sink.submit_points(batch)).await {
        Ok(()) => None,
        Err(e) => {
            error!(
                "Failed to send {} {} points after retries: {e}",
                points.len(),
                task.name()
            );
            Some(points)
        }
    }
}

pub struct FlushLoop;

impl FlushLoop {
    /// Flushes `task` every `interval` until `cancel` fires, then flushes one
    /// last time.
    pub fn spawn(
        task: Arc<dyn Flushable>,
        sink: Arc<dyn PointSubmitter>,
        interval: Duration,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Final flush of {}", task.name());
                        flush_once(task.as_ref(), sink.as_ref(), retry).await;
                        break;
                    }
                    _ = ticker.tick() => {
                        flush_once(task.as_ref(), sink.as_ref(), retry).await;
                    }
                }
            }
        })
    }
}
