// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch delivery to the primary sink and, per routing tag, regional sinks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use crate::batch::{BatchItem, DEFAULT_TAG};
use crate::errors::{DeliveryError, SinkError};
use crate::lag::LagTracker;
use crate::observation::Point;
use crate::retry::RetryPolicy;
use crate::sink::{PrimarySink, VendorMetricSubmitter};

/// Points younger than this are sent without a timestamp so the backend
/// stamps them on arrival and keeps each series in order.
pub const RECENT_THRESHOLD_SECS: i64 = 30;

#[derive(Clone)]
pub struct Delivery {
    primary: Arc<dyn PrimarySink>,
    regional: HashMap<String, Arc<dyn VendorMetricSubmitter>>,
    lag: Arc<LagTracker>,
    retry: RetryPolicy,
}

impl Delivery {
    pub fn new(primary: Arc<dyn PrimarySink>, lag: Arc<LagTracker>, retry: RetryPolicy) -> Self {
        Delivery {
            primary,
            regional: HashMap::new(),
            lag,
            retry,
        }
    }

    /// Registers the vendor sink for batches tagged with `tag`.
    #[must_use]
    pub fn with_regional_sink(
        mut self,
        tag: impl Into<String>,
        sink: Arc<dyn VendorMetricSubmitter>,
    ) -> Self {
        self.regional.insert(tag.into(), sink);
        self
    }

    #[must_use]
    pub fn has_regional_sink(&self, tag: &str) -> bool {
        self.regional.contains_key(tag)
    }

    /// Delivers one batch of encoded items.
    ///
    /// When the primary sink keeps failing, the error carries `batch` exactly
    /// as it was given so the caller can retry it later. Regional failures are
    /// only logged.
    pub async fn deliver(&self, batch: &[Vec<u8>], tag: &str) -> Result<(), DeliveryError> {
        let BatchItem {
            mut points,
            events,
            vendor_metrics,
        } = BatchItem::decode_batch(batch)?;

        self.lag.update(points.iter().map(|p| p.timestamp));
        rewrite_recent_timestamps(&mut points, Utc::now());

        debug!(
            "Delivering {} points and {} events for tag {tag}",
            points.len(),
            events.len()
        );

        if !points.is_empty() {
            let sink = self.primary.as_ref();
            let points = &points;
            if let Err(e) = self
                .retry
                .run("submit points", move || sink.submit_points(points))
                .await
            {
                return Err(DeliveryError::PartialBatch {
                    message: format!("failed to add datapoints: {e}"),
                    failed: batch.to_vec(),
                });
            }
        }

        if !events.is_empty() {
            // events are not idempotent, a retry resumes after the last accepted one
            let sink = self.primary.as_ref();
            let events = &events;
            let sent = &AtomicUsize::new(0);
            if let Err(e) = self
                .retry
                .run("submit events", move || async move {
                    while let Some(event) = events.get(sent.load(Ordering::SeqCst)) {
                        sink.submit_events(std::slice::from_ref(event)).await?;
                        sent.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok::<(), SinkError>(())
                })
                .await
            {
                return Err(DeliveryError::PartialBatch {
                    message: format!("failed to add events: {e}"),
                    failed: batch.to_vec(),
                });
            }
        }

        match self.regional.get(tag) {
            Some(sink) => {
                if !vendor_metrics.is_empty() {
                    let metrics = &vendor_metrics;
                    let sink = sink.as_ref();
                    if let Err(e) = self
                        .retry
                        .run("submit vendor metrics", move || {
                            sink.submit_vendor_metrics(metrics)
                        })
                        .await
                    {
                        error!(
                            "Failed to send {} vendor metrics to {tag}: {e}",
                            vendor_metrics.len()
                        );
                    }
                }
            }
            None if tag != DEFAULT_TAG => {
                warn!("No regional sink configured for tag {tag}");
            }
            None => {}
        }

        Ok(())
    }
}

/// Clears the timestamp of every point at most [`RECENT_THRESHOLD_SECS`] old.
/// Points from the future count as recent.
pub fn rewrite_recent_timestamps(points: &mut [Point], now: DateTime<Utc>) {
    let threshold = Duration::seconds(RECENT_THRESHOLD_SECS);
    for point in points {
        if point.timestamp.is_some_and(|ts| now - ts <= threshold) {
            point.timestamp = None;
        }
    }
}
