// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed observations built from a record and one of its routes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RecordError;
use crate::fields::{FieldMap, FieldValue};
use crate::route::{Route, StatKind, DEFAULT_DIMENSIONS};

/// Category attached to every event built from a route.
pub const USER_DEFINED_CATEGORY: &str = "USER_DEFINED";

/// Series that are also forwarded to the regional vendor sink.
pub const VENDOR_ALLOW_LIST: [&str; 1] = ["ContainerExitCount"];

pub type Dimensions = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointValue {
    Int(i64),
    Float(f64),
}

impl PointValue {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match self {
            PointValue::Int(i) => *i as f64,
            PointValue::Float(f) => *f,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Counter,
    Gauge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub series: String,
    pub dimensions: Dimensions,
    pub value: PointValue,
    pub kind: PointKind,
    /// `None` lets the backend assign the arrival time.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Point {
    #[must_use]
    pub fn counter(series: impl Into<String>, dimensions: Dimensions, value: i64) -> Self {
        Self {
            series: series.into(),
            dimensions,
            value: PointValue::Int(value),
            kind: PointKind::Counter,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn gauge(series: impl Into<String>, dimensions: Dimensions, value: f64) -> Self {
        Self {
            series: series.into(),
            dimensions,
            value: PointValue::Float(value),
            kind: PointKind::Gauge,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub series: String,
    pub dimensions: Dimensions,
    pub category: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A data point for the regional vendor sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorMetric {
    pub name: String,
    pub dimensions: Dimensions,
    pub value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Point(Point),
    Event(Event),
}

/// Builds the observation a route produces for a record.
///
/// `timestamp` is the record's own timestamp, attached to every observation.
pub fn build(
    fields: &FieldMap,
    route: &Route,
    timestamp: DateTime<Utc>,
) -> Result<Observation, RecordError> {
    let dimensions = dimensions(fields, route)?;
    let value = value(fields, route)?;

    let kind = route
        .stat_type
        .parse::<StatKind>()
        .map_err(|stat_type| RecordError::InvalidStatType {
            rule: route.rule_name.clone(),
            stat_type,
        })?;

    let observation = match kind {
        StatKind::Counter => {
            // saturating float to int cast, fractional part dropped
            #[allow(clippy::cast_possible_truncation)]
            let count = value.map_or(1, |v| v as i64);
            Observation::Point(
                Point::counter(route.series.clone(), dimensions, count).with_timestamp(timestamp),
            )
        }
        StatKind::Gauge => Observation::Point(
            Point::gauge(route.series.clone(), dimensions, value.unwrap_or(0.0))
                .with_timestamp(timestamp),
        ),
        StatKind::Event => Observation::Event(Event {
            series: route.series.clone(),
            dimensions,
            category: USER_DEFINED_CATEGORY.to_string(),
            timestamp: Some(timestamp),
        }),
    };
    Ok(observation)
}

/// Vendor copy of a point whose series is in [`VENDOR_ALLOW_LIST`].
///
/// The default dimensions are dropped: the vendor sink keys series on the
/// remaining dimensions only.
#[must_use]
pub fn vendor_metric(point: &Point) -> Option<VendorMetric> {
    if !VENDOR_ALLOW_LIST.contains(&point.series.as_str()) {
        return None;
    }
    let dimensions = point
        .dimensions
        .iter()
        .filter(|(name, _)| !DEFAULT_DIMENSIONS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    Some(VendorMetric {
        name: point.series.clone(),
        dimensions,
        value: point.value.as_f64(),
        timestamp: point.timestamp,
    })
}

fn dimensions(fields: &FieldMap, route: &Route) -> Result<Dimensions, RecordError> {
    let mut dimensions = Dimensions::new();
    for name in &route.dimensions {
        let Some(raw) = fields.get(name) else {
            continue;
        };
        let rendered = raw
            .to_dimension()
            .ok_or_else(|| RecordError::DimensionType {
                rule: route.rule_name.clone(),
                dimension: name.clone(),
                value: raw.to_string(),
            })?;
        dimensions.insert(name.clone(), rendered);
    }
    Ok(dimensions)
}

/// Present and numeric: the value. Absent: `None`, callers apply the default.
fn value(fields: &FieldMap, route: &Route) -> Result<Option<f64>, RecordError> {
    match fields.get(&route.value_field) {
        None => Ok(None),
        Some(FieldValue::Number(n)) => Ok(Some(*n)),
        Some(other) => Err(RecordError::ValueType {
            rule: route.rule_name.clone(),
            field: route.value_field.clone(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn route(stat_type: &str, dims: &[&str], value_field: &str) -> Route {
        Route::new("series", dims, stat_type, value_field, "rule-1")
    }

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn point(observation: Observation) -> Point {
        match observation {
            Observation::Point(p) => p,
            Observation::Event(e) => panic!("expected a point, got {e:?}"),
        }
    }

    #[test]
    fn test_counter_uses_value() {
        let record = fields(&[("value", FieldValue::from(123.0)), ("dim_a", "x".into())]);
        let p = point(build(&record, &route("counter", &["dim_a"], "value"), ts()).unwrap());
        assert_eq!(p.value, PointValue::Int(123));
        assert_eq!(p.kind, PointKind::Counter);
        assert_eq!(p.timestamp, Some(ts()));
        assert_eq!(p.dimensions.get("dim_a").map(String::as_str), Some("x"));
    }

    #[test]
    fn test_counter_truncates_value() {
        let record = fields(&[("value", FieldValue::from(2.9))]);
        let p = point(build(&record, &route("counter", &[], "value"), ts()).unwrap());
        assert_eq!(p.value, PointValue::Int(2));
    }

    #[test]
    fn test_default_values() {
        let record = FieldMap::new();
        let counter = point(build(&record, &route("counter", &[], "value"), ts()).unwrap());
        assert_eq!(counter.value, PointValue::Int(1));

        let gauge = point(build(&record, &route("gauge", &[], "value"), ts()).unwrap());
        assert_eq!(gauge.value, PointValue::Float(0.0));
        assert_eq!(gauge.kind, PointKind::Gauge);

        let no_field = point(build(&record, &route("counter", &[], ""), ts()).unwrap());
        assert_eq!(no_field.value, PointValue::Int(1));
    }

    #[test]
    fn test_wrong_value_type() {
        let record = fields(&[("value", "12345".into())]);
        let err = build(&record, &route("counter", &[], "value"), ts()).unwrap_err();
        assert_eq!(
            err,
            RecordError::ValueType {
                rule: "rule-1".to_string(),
                field: "value".to_string(),
                value: "12345".to_string(),
            }
        );
    }

    #[test]
    fn test_dimension_types() {
        let record = fields(&[
            ("dim_float", FieldValue::from(3.2)),
            ("dim_bool", FieldValue::from(true)),
            ("dim_str", "abc".into()),
        ]);
        let p = point(
            build(
                &record,
                &route("gauge", &["dim_float", "dim_bool", "dim_str", "absent"], "value"),
                ts(),
            )
            .unwrap(),
        );
        let expected: Dimensions = [
            ("dim_float", "3"),
            ("dim_bool", "true"),
            ("dim_str", "abc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(p.dimensions, expected);
    }

    #[test]
    fn test_dimension_wrong_type() {
        let record = fields(&[("dim_error", FieldValue::Map(FieldMap::new()))]);
        let err = build(&record, &route("counter", &["dim_error"], "value"), ts()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "error casting dimension value. rule=rule-1 dim=dim_error val={}"
        );
    }

    #[test]
    fn test_duplicate_dimensions_collapse() {
        let record = fields(&[("env", "prod".into())]);
        let p = point(build(&record, &route("counter", &["env", "env"], ""), ts()).unwrap());
        assert_eq!(p.dimensions.len(), 1);
    }

    #[test]
    fn test_event() {
        let record = fields(&[("title", "app_deploying".into())]);
        let obs = build(&record, &route("event", &["title"], ""), ts()).unwrap();
        match obs {
            Observation::Event(e) => {
                assert_eq!(e.category, USER_DEFINED_CATEGORY);
                assert_eq!(e.timestamp, Some(ts()));
                assert_eq!(e.dimensions.get("title").map(String::as_str), Some("app_deploying"));
            }
            Observation::Point(p) => panic!("expected an event, got {p:?}"),
        }
    }

    #[test]
    fn test_invalid_stat_type() {
        let err = build(&FieldMap::new(), &route("histogram", &[], ""), ts()).unwrap_err();
        assert_eq!(
            err,
            RecordError::InvalidStatType {
                rule: "rule-1".to_string(),
                stat_type: "histogram".to_string(),
            }
        );
    }

    #[test]
    fn test_vendor_metric_strips_default_dimensions() {
        let dims: Dimensions = [("Hostname", "h"), ("env", "prod"), ("app", "api")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let p = Point::counter("ContainerExitCount", dims, 1).with_timestamp(ts());
        let vendor = vendor_metric(&p).unwrap();
        assert_eq!(vendor.name, "ContainerExitCount");
        assert_eq!(vendor.value, 1.0);
        assert_eq!(vendor.timestamp, Some(ts()));
        assert_eq!(vendor.dimensions.keys().collect::<Vec<_>>(), vec!["app"]);

        let other = Point::counter("other", Dimensions::new(), 1);
        assert!(vendor_metric(&other).is_none());
    }
}
