// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::observation::{Dimensions, Observation, Point};

pub const MAX_LOG_DELAY_SERIES: &str = "max-log-delay";

/// Largest delay observed between a record's timestamp and its delivery,
/// since the last flush.
#[derive(Debug, Default)]
pub struct LagTracker {
    max_delay_ms: AtomicU64,
}

impl LagTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<I>(&self, timestamps: I)
    where
        I: IntoIterator<Item = Option<DateTime<Utc>>>,
    {
        self.update_at(timestamps, Utc::now());
    }

    /// Timestamps in the future count as no delay.
    pub fn update_at<I>(&self, timestamps: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = Option<DateTime<Utc>>>,
    {
        let max = timestamps
            .into_iter()
            .flatten()
            .filter_map(|ts| u64::try_from((now - ts).num_milliseconds()).ok())
            .max();
        if let Some(max) = max {
            self.max_delay_ms.fetch_max(max, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn current(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_delay_ms.load(Ordering::Relaxed))
    }

    /// Resets the tracker and reports what it held, in seconds.
    pub fn flush(&self) -> Vec<Observation> {
        let delay_ms = self.max_delay_ms.swap(0, Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let seconds = delay_ms as f64 / 1000.0;
        info!("{}={}", MAX_LOG_DELAY_SERIES, seconds);
        vec![Observation::Point(Point::gauge(
            MAX_LOG_DELAY_SERIES,
            Dimensions::new(),
            seconds,
        ))]
    }
}
