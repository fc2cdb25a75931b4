// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rolling statistics over request-finished logs.
//!
//! Per-request logs are too high cardinality to forward one by one, so they are
//! collapsed into buckets keyed by a handful of dimensions and flushed
//! periodically as summary counters.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::info;

use crate::errors::RecordError;
use crate::fields::{str_eq, FieldMap, FieldValue};
use crate::observation::{Dimensions, Observation, Point, PointKind, PointValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rollup {
    HttpResponseTime,
    HttpStatusCode,
    ThriftResponseTime,
    ThriftTypeId,
}

impl Rollup {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Rollup::HttpResponseTime | Rollup::ThriftResponseTime => {
                "request-finished-response-time"
            }
            Rollup::HttpStatusCode => "request-finished-status-code",
            Rollup::ThriftTypeId => "request-finished-type-id",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RollingBucket {
    pub count: u64,
    pub sum: f64,
    pub sum_of_squares: f64,
}

impl RollingBucket {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_of_squares += value * value;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeBucket {
    pub count: u64,
}

impl CumulativeBucket {
    pub fn add(&mut self, n: u64) {
        self.count += n;
    }
}

/// Buckets are keyed by the full dimension map, so two combinations never
/// share a bucket.
type BucketKey = (Rollup, Dimensions);

#[derive(Debug, Default)]
struct Buckets {
    rolling: BTreeMap<BucketKey, RollingBucket>,
    cumulative: BTreeMap<BucketKey, CumulativeBucket>,
}

impl Buckets {
    fn rolling(&mut self, rollup: Rollup, dimensions: Dimensions) -> &mut RollingBucket {
        self.rolling
            .entry((rollup, dimensions))
            .or_insert_with_key(|(rollup, dimensions)| {
                info!("Creating rollup bucket {} dims={dimensions:?}", rollup.name());
                RollingBucket::default()
            })
    }

    fn cumulative(&mut self, rollup: Rollup, dimensions: Dimensions) -> &mut CumulativeBucket {
        self.cumulative
            .entry((rollup, dimensions))
            .or_insert_with_key(|(rollup, dimensions)| {
                info!("Creating rollup bucket {} dims={dimensions:?}", rollup.name());
                CumulativeBucket::default()
            })
    }
}

#[derive(Debug, Default)]
pub struct Rollups {
    buckets: Mutex<Buckets>,
}

struct HttpRequest<'a> {
    env: &'a str,
    container_app: &'a str,
    canary: bool,
    response_time: f64,
    status_code: f64,
}

struct ThriftRequest<'a> {
    env: &'a str,
    container_app: &'a str,
    response_time: f64,
    type_id: f64,
}

impl Rollups {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one record into the matching rollups. Records that match no
    /// rollup are ignored.
    pub fn process(&self, fields: &FieldMap) -> Result<(), RecordError> {
        if let Some(request) = http_request(fields)? {
            let base = dims(&[
                ("env", request.env.to_string()),
                ("container_app", request.container_app.to_string()),
                ("canary", request.canary.to_string()),
            ]);
            let mut with_status = base.clone();
            with_status.insert("status-code".to_string(), integer(request.status_code));

            #[allow(clippy::expect_used)]
            let mut buckets = self.buckets.lock().expect("lock poisoned");
            buckets
                .rolling(Rollup::HttpResponseTime, base)
                .add(request.response_time);
            buckets.cumulative(Rollup::HttpStatusCode, with_status).add(1);
        } else if let Some(request) = thrift_request(fields)? {
            let base = dims(&[
                ("env", request.env.to_string()),
                ("container_app", request.container_app.to_string()),
            ]);
            let mut with_type = base.clone();
            with_type.insert("type_id".to_string(), integer(request.type_id));

            #[allow(clippy::expect_used)]
            let mut buckets = self.buckets.lock().expect("lock poisoned");
            buckets
                .rolling(Rollup::ThriftResponseTime, base)
                .add(request.response_time);
            buckets.cumulative(Rollup::ThriftTypeId, with_type).add(1);
        }
        Ok(())
    }

    /// Emits every bucket as counters without a timestamp and resets it.
    /// Buckets that saw nothing since the last flush still report zeros.
    pub fn flush(&self) -> Vec<Observation> {
        #[allow(clippy::expect_used)]
        let mut buckets = self.buckets.lock().expect("lock poisoned");
        let mut out = Vec::with_capacity(buckets.rolling.len() * 3 + buckets.cumulative.len());

        for ((rollup, dimensions), entry) in &mut buckets.rolling {
            let bucket = std::mem::take(entry);
            let name = rollup.name();
            out.push(count_point(name, dimensions, bucket.count));
            out.push(float_counter(format!("{name}.sum"), dimensions, bucket.sum));
            out.push(float_counter(
                format!("{name}.sumsquare"),
                dimensions,
                bucket.sum_of_squares,
            ));
        }
        for ((rollup, dimensions), entry) in &mut buckets.cumulative {
            let bucket = std::mem::take(entry);
            out.push(count_point(rollup.name(), dimensions, bucket.count));
        }
        out
    }
}

fn http_request(fields: &FieldMap) -> Result<Option<HttpRequest<'_>>, RecordError> {
    let matches = str_eq(fields, "title", "request-finished")
        && str_eq(fields, "via", "kayvee-middleware")
        && has_all(
            fields,
            &["env", "container_app", "canary", "response-time", "status-code"],
        );
    if !matches {
        return Ok(None);
    }
    Ok(Some(HttpRequest {
        env: required(fields, "env", "string", FieldValue::as_str)?,
        container_app: required(fields, "container_app", "string", FieldValue::as_str)?,
        canary: required(fields, "canary", "bool", FieldValue::as_bool)?,
        response_time: required(fields, "response-time", "number", FieldValue::as_f64)?,
        status_code: required(fields, "status-code", "number", FieldValue::as_f64)?,
    }))
}

fn thrift_request(fields: &FieldMap) -> Result<Option<ThriftRequest<'_>>, RecordError> {
    let matches = str_eq(fields, "proto", "thrift")
        && str_eq(fields, "title", "request_finished")
        && has_all(fields, &["env", "container_app", "response_time", "type_id"]);
    if !matches {
        return Ok(None);
    }
    Ok(Some(ThriftRequest {
        env: required(fields, "env", "string", FieldValue::as_str)?,
        container_app: required(fields, "container_app", "string", FieldValue::as_str)?,
        response_time: required(fields, "response_time", "number", FieldValue::as_f64)?,
        type_id: required(fields, "type_id", "number", FieldValue::as_f64)?,
    }))
}

fn has_all(fields: &FieldMap, keys: &[&str]) -> bool {
    keys.iter().all(|k| fields.contains_key(*k))
}

fn required<'a, T>(
    fields: &'a FieldMap,
    field: &'static str,
    expected: &'static str,
    get: impl Fn(&'a FieldValue) -> Option<T>,
) -> Result<T, RecordError> {
    let value = fields.get(field).ok_or(RecordError::TypeMismatch {
        field,
        expected,
        actual: "missing",
    })?;
    get(value).ok_or(RecordError::TypeMismatch {
        field,
        expected,
        actual: value.type_name(),
    })
}

fn dims(pairs: &[(&str, String)]) -> Dimensions {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn integer(n: f64) -> String {
    (n as i64).to_string()
}

fn count_point(name: &str, dimensions: &Dimensions, count: u64) -> Observation {
    let count = i64::try_from(count).unwrap_or(i64::MAX);
    Observation::Point(Point::counter(
        format!("{name}.count"),
        dimensions.clone(),
        count,
    ))
}

fn float_counter(series: String, dimensions: &Dimensions, value: f64) -> Observation {
    Observation::Point(Point {
        series,
        dimensions: dimensions.clone(),
        value: PointValue::Float(value),
        kind: PointKind::Counter,
        timestamp: None,
    })
}
