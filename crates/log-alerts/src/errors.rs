// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for per-record processing and batch delivery.

use thiserror::Error;

/// Errors that abort processing of a single record.
///
/// None of these touch shared aggregation state: rollups, volume counters and
/// the lag tracker are only updated once the record has been validated.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("unable to decode record: {0}")]
    Decode(String),

    #[error("error casting dimension value. rule={rule} dim={dimension} val={value}")]
    DimensionType {
        rule: String,
        dimension: String,
        value: String,
    },

    #[error("value exists but is wrong type. rule={rule} value_field={field} value={value}")]
    ValueType {
        rule: String,
        field: String,
        value: String,
    },

    #[error("invalid stat type in route. rule={rule} stat_type={stat_type}")]
    InvalidStatType { rule: String, stat_type: String },

    #[error("unable to parse time from record's 'timestamp' field")]
    MissingTimestamp,

    #[error("expected {field} to be {expected}, got {actual}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("unable to encode batch item: {0}")]
    Encode(String),
}

/// Errors returned by a downstream sink for one submission attempt.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status code {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unable to build payload: {0}")]
    Payload(String),
}

/// Outcome of a failed `send_batch` call.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// An item of the batch could not be decoded, nothing was sent.
    #[error("unable to decode batch item: {0}")]
    Decode(String),

    /// The primary sink kept failing after every retry. `failed` holds the
    /// batch exactly as it was handed in so the caller can requeue it.
    #[error("{message}")]
    PartialBatch {
        message: String,
        failed: Vec<Vec<u8>>,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum VolumeError {
    #[error("volume service is not running")]
    Unavailable,

    #[error("volume service dropped the flush response")]
    ResponseDropped,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
}
