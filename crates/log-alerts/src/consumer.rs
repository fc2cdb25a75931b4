// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-record and per-batch entry points used by the stream consumer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::{BatchItem, DEFAULT_TAG};
use crate::delivery::Delivery;
use crate::errors::{DeliveryError, RecordError};
use crate::extract::{FieldExtractor, LogLineExtractor};
use crate::fields::{get_str, FieldMap, FieldValue, TIMESTAMP_FIELD};
use crate::observation::{build, vendor_metric, Observation};
use crate::route::{kvmeta_team, resolve};
use crate::rollups::Rollups;
use crate::volume_service::VolumeHandle;

/// Field naming the region whose vendor sink receives allow-listed series.
pub const REGION_FIELD: &str = "region";

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedRecord {
    /// Encoded batch item and the tag of the batch it belongs to.
    Encoded { item: Vec<u8>, tag: String },
    /// The record matched no route.
    Skipped,
}

pub struct AlertsConsumer {
    extractor: Arc<dyn FieldExtractor>,
    rollups: Arc<Rollups>,
    volume: VolumeHandle,
    delivery: Delivery,
}

impl AlertsConsumer {
    pub fn new(
        extractor: Arc<dyn FieldExtractor>,
        rollups: Arc<Rollups>,
        volume: VolumeHandle,
        delivery: Delivery,
    ) -> Self {
        AlertsConsumer {
            extractor,
            rollups,
            volume,
            delivery,
        }
    }

    /// Consumer reading log lines, with `deploy_env` as the default `env`.
    pub fn for_deploy_env(
        deploy_env: &str,
        rollups: Arc<Rollups>,
        volume: VolumeHandle,
        delivery: Delivery,
    ) -> Self {
        Self::new(
            Arc::new(LogLineExtractor::new(deploy_env)),
            rollups,
            volume,
            delivery,
        )
    }

    /// Turns one raw record into an encoded batch item.
    ///
    /// Errors abort this record only. Volume accounting happens once the
    /// record has been encoded or skipped.
    pub fn process_record(&self, raw: &[u8]) -> Result<ProcessedRecord, RecordError> {
        let mut fields = self.extractor.extract(raw)?;
        self.rollups.process(&fields)?;

        let routes = resolve(&mut fields);
        if routes.is_empty() {
            self.record_volume(&fields, raw.len(), Vec::new());
            return Ok(ProcessedRecord::Skipped);
        }

        if let Some(hostname) = fields.get("hostname").cloned() {
            fields.insert("Hostname".to_string(), hostname);
        }
        let timestamp = fields
            .get(TIMESTAMP_FIELD)
            .and_then(FieldValue::as_timestamp)
            .ok_or(RecordError::MissingTimestamp)?;

        let mut item = BatchItem::default();
        for route in &routes {
            let observation = build(&fields, route, timestamp)?;
            if let Observation::Point(point) = &observation {
                if let Some(metric) = vendor_metric(point) {
                    item.vendor_metrics.push(metric);
                }
            }
            item.push(observation);
        }
        let encoded = item.encode()?;
        let tag = self.routing_tag(&fields, &item);

        let rules = routes.into_iter().map(|r| r.rule_name).collect();
        self.record_volume(&fields, raw.len(), rules);

        Ok(ProcessedRecord::Encoded { item: encoded, tag })
    }

    /// Delivers a batch of items previously returned by
    /// [`AlertsConsumer::process_record`] under the same tag.
    pub async fn send_batch(&self, batch: &[Vec<u8>], tag: &str) -> Result<(), DeliveryError> {
        self.delivery.deliver(batch, tag).await
    }

    fn routing_tag(&self, fields: &FieldMap, item: &BatchItem) -> String {
        if item.vendor_metrics.is_empty() {
            return DEFAULT_TAG.to_string();
        }
        match get_str(fields, REGION_FIELD) {
            Some(region) if self.delivery.has_regional_sink(region) => region.to_string(),
            Some(region) if !region.is_empty() => {
                debug!("No regional sink for {region}, vendor metrics are not forwarded");
                DEFAULT_TAG.to_string()
            }
            _ => {
                let names: Vec<&str> = item.vendor_metrics.iter().map(|m| m.name.as_str()).collect();
                warn!("Record with vendor metrics {names:?} has no {REGION_FIELD} field");
                DEFAULT_TAG.to_string()
            }
        }
    }

    fn record_volume(&self, fields: &FieldMap, bytes: usize, rules: Vec<String>) {
        let env = get_str(fields, "container_env").unwrap_or_default();
        let app = get_str(fields, "container_app").unwrap_or_default();
        let team = kvmeta_team(fields).unwrap_or_default();
        let bytes = u64::try_from(bytes).unwrap_or(u64::MAX);
        if let Err(e) = self.volume.record(env, app, team, bytes, rules) {
            debug!("Dropping volume record: {e}");
        }
    }
}
