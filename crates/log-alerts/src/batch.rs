// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::errors::{DeliveryError, RecordError};
use crate::observation::{Event, Observation, Point, VendorMetric};

/// Tag for records that carry no region.
pub const DEFAULT_TAG: &str = "default";

/// Everything one record produced, serialized between `process_record` and
/// `send_batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub vendor_metrics: Vec<VendorMetric>,
}

impl BatchItem {
    pub fn push(&mut self, observation: Observation) {
        match observation {
            Observation::Point(p) => self.points.push(p),
            Observation::Event(e) => self.events.push(e),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        serde_json::to_vec(self).map_err(|e| RecordError::Encode(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Decodes and concatenates every item of a batch, in order.
    pub fn decode_batch(batch: &[Vec<u8>]) -> Result<Self, DeliveryError> {
        let mut merged = BatchItem::default();
        for raw in batch {
            let item = Self::decode(raw).map_err(|e| DeliveryError::Decode(e.to_string()))?;
            merged.points.extend(item.points);
            merged.events.extend(item.events);
            merged.vendor_metrics.extend(item.vendor_metrics);
        }
        Ok(merged)
    }
}
