// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capabilities of the downstream metrics backends.
//!
//! The primary backend accepts points and events. Regional backends only accept
//! vendor metrics, so each capability is its own trait.

use async_trait::async_trait;

use crate::errors::SinkError;
use crate::observation::{Event, Point, VendorMetric};

#[async_trait]
pub trait PointSubmitter: Send + Sync {
    async fn submit_points(&self, points: &[Point]) -> Result<(), SinkError>;
}

#[async_trait]
pub trait EventSubmitter: Send + Sync {
    async fn submit_events(&self, events: &[Event]) -> Result<(), SinkError>;
}

#[async_trait]
pub trait VendorMetricSubmitter: Send + Sync {
    async fn submit_vendor_metrics(&self, metrics: &[VendorMetric]) -> Result<(), SinkError>;
}

/// A backend able to take both points and events.
pub trait PrimarySink: PointSubmitter + EventSubmitter {}

impl<T: PointSubmitter + EventSubmitter> PrimarySink for T {}
