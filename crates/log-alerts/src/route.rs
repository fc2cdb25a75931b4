// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Route resolution.
//!
//! A route says which series a record feeds, with which dimensions and which
//! statistic. Routes come from two places, in this order:
//!
//! 1. the routing metadata the log producer embedded in the record
//!    (`_kvmeta.routes`, entries of type `alerts`), and
//! 2. the compiled-in global rules in [`crate::global_routes`].

use std::str::FromStr;

use crate::fields::{FieldMap, FieldValue, KVMETA_FIELD};
use crate::global_routes::global_routes;

/// Dimensions appended to every self-declared route.
pub const DEFAULT_DIMENSIONS: [&str; 2] = ["Hostname", "env"];

/// Value field used when a rule doesn't name one.
pub const DEFAULT_VALUE_FIELD: &str = "value";

const ALERTS_ROUTE_TYPE: &str = "alerts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub series: String,
    pub dimensions: Vec<String>,
    /// Declared statistic, validated when the route is applied.
    pub stat_type: String,
    /// Field holding the metric value. Empty means "use the default".
    pub value_field: String,
    pub rule_name: String,
}

impl Route {
    pub(crate) fn new(
        series: impl Into<String>,
        dimensions: &[&str],
        stat_type: impl Into<String>,
        value_field: &str,
        rule_name: &str,
    ) -> Self {
        Self {
            series: series.into(),
            dimensions: dimensions.iter().map(|d| (*d).to_string()).collect(),
            stat_type: stat_type.into(),
            value_field: value_field.to_string(),
            rule_name: rule_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Counter,
    Gauge,
    Event,
}

impl StatKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Counter => "counter",
            StatKind::Gauge => "gauge",
            StatKind::Event => "event",
        }
    }
}

impl FromStr for StatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(StatKind::Counter),
            "gauge" => Ok(StatKind::Gauge),
            "event" => Ok(StatKind::Event),
            other => Err(other.to_string()),
        }
    }
}

/// Resolves every route for a record.
///
/// Never fails: a record matching nothing yields an empty list, which the
/// caller treats as an intentionally skipped record. Some global rules write
/// derived fields back into `fields`.
pub fn resolve(fields: &mut FieldMap) -> Vec<Route> {
    let mut routes = kvmeta_routes(fields);
    routes.extend(global_routes(fields));
    routes
}

/// Team declared in the record's routing metadata, if any.
#[must_use]
pub fn kvmeta_team(fields: &FieldMap) -> Option<&str> {
    fields
        .get(KVMETA_FIELD)
        .and_then(FieldValue::as_map)
        .and_then(|meta| meta.get("team"))
        .and_then(FieldValue::as_str)
}

/// Alert routes declared by the producer, with the default dimensions appended.
#[must_use]
pub fn kvmeta_routes(fields: &FieldMap) -> Vec<Route> {
    let Some(declared) = fields
        .get(KVMETA_FIELD)
        .and_then(FieldValue::as_map)
        .and_then(|meta| meta.get("routes"))
        .and_then(FieldValue::as_list)
    else {
        return Vec::new();
    };

    declared
        .iter()
        .filter_map(FieldValue::as_map)
        .filter(|entry| entry.get("type").and_then(FieldValue::as_str) == Some(ALERTS_ROUTE_TYPE))
        .map(|entry| {
            let text = |key: &str| {
                entry
                    .get(key)
                    .and_then(FieldValue::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            let mut dimensions: Vec<String> = entry
                .get("dimensions")
                .and_then(FieldValue::as_list)
                .unwrap_or_default()
                .iter()
                .filter_map(FieldValue::as_str)
                .map(str::to_string)
                .collect();
            dimensions.extend(DEFAULT_DIMENSIONS.iter().map(|d| (*d).to_string()));

            Route {
                series: text("series"),
                dimensions,
                stat_type: text("stat_type"),
                value_field: text("value_field"),
                rule_name: text("rule"),
            }
        })
        .collect()
}
