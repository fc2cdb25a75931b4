// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Routes structured log records to metric observations.
//!
//! Records are matched against self-declared `_kvmeta` routes and a fixed set
//! of global rules, turned into points and events, and delivered in batches to
//! a primary sink and optional per-region vendor sinks. Request statistics,
//! log volume and processing lag are aggregated in the background and flushed
//! on their own schedules.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod config;
pub mod consumer;
pub mod datadog;
pub mod delivery;
pub mod errors;
pub mod extract;
pub mod fields;
pub mod flush_loop;
mod global_routes;
pub mod lag;
pub mod observation;
pub mod retry;
pub mod rollups;
pub mod route;
pub mod sink;
pub mod volume_service;

pub use batch::{BatchItem, DEFAULT_TAG};
pub use config::ConsumerConfig;
pub use consumer::{AlertsConsumer, ProcessedRecord};
pub use datadog::DdApi;
pub use delivery::Delivery;
pub use errors::{ConfigError, DeliveryError, RecordError, SinkError, VolumeError};
pub use flush_loop::{FlushLoop, Flushable};
pub use lag::LagTracker;
pub use retry::RetryPolicy;
pub use rollups::Rollups;
pub use volume_service::{VolumeHandle, VolumeService};
