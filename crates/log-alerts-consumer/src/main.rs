// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use log_alerts::{
    AlertsConsumer, ConsumerConfig, DdApi, Delivery, DeliveryError, FlushLoop, Flushable,
    LagTracker, ProcessedRecord, RetryPolicy, Rollups, VolumeService,
};

/// Encoded items waiting to be delivered, grouped by routing tag.
#[derive(Default)]
struct Batches {
    pending: HashMap<String, Vec<Vec<u8>>>,
}

impl Batches {
    /// Adds an item and returns the tag's batch once it holds `limit` items.
    fn push(
        &mut self,
        tag: String,
        item: Vec<u8>,
        limit: usize,
    ) -> Option<(String, Vec<Vec<u8>>)> {
        let batch = self.pending.entry(tag.clone()).or_default();
        batch.push(item);
        if batch.len() < limit {
            return None;
        }
        self.pending.remove(&tag).map(|batch| (tag, batch))
    }

    fn drain(&mut self) -> Vec<(String, Vec<Vec<u8>>)> {
        self.pending
            .drain()
            .filter(|(_, batch)| !batch.is_empty())
            .collect()
    }
}

async fn send(consumer: &AlertsConsumer, tag: &str, batch: Vec<Vec<u8>>) {
    debug!("Sending batch of {} items tag={tag}", batch.len());
    match consumer.send_batch(&batch, tag).await {
        Ok(()) => {}
        Err(DeliveryError::PartialBatch { message, failed }) => {
            error!("{message} tag={tag} failed_items={}", failed.len());
        }
        Err(e) => error!("Failed to send batch tag={tag}: {e}"),
    }
}

#[tokio::main]
pub async fn main() {
    let config = match ConsumerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading log alerts consumer configuration: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let api = match DdApi::new(
        config.api_key.clone(),
        config.intake_url(),
        config.flush_timeout,
        config.compression_level,
    ) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            error!("Error creating Datadog client: {e}");
            return;
        }
    };

    let retry = RetryPolicy::default();
    let lag = Arc::new(LagTracker::new());
    let rollups = Arc::new(Rollups::new());

    let (volume_service, volume) = VolumeService::new();
    let volume_task = tokio::spawn(volume_service.run());

    let cancel = CancellationToken::new();
    let flushables = [
        (
            rollups.clone() as Arc<dyn Flushable>,
            config.rollup_flush_interval,
        ),
        (
            Arc::new(volume.clone()) as Arc<dyn Flushable>,
            config.volume_flush_interval,
        ),
        (lag.clone() as Arc<dyn Flushable>, config.lag_flush_interval),
    ];
    let flush_loops: Vec<_> = flushables
        .into_iter()
        .map(|(task, period)| FlushLoop::spawn(task, api.clone(), period, retry, cancel.clone()))
        .collect();

    let delivery = Delivery::new(api, lag, retry);
    let consumer =
        AlertsConsumer::for_deploy_env(&config.deploy_env, rollups, volume.clone(), delivery);
    info!(
        "Log alerts consumer started env={} intake={}",
        config.deploy_env,
        config.intake_url()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batches = Batches::default();
    let mut batch_interval = interval(config.batch_interval);
    batch_interval.tick().await; // discard first tick, which is instantaneous

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match consumer.process_record(line.as_bytes()) {
                    Ok(ProcessedRecord::Encoded { item, tag }) => {
                        if let Some((tag, batch)) = batches.push(tag, item, config.batch_count) {
                            send(&consumer, &tag, batch).await;
                        }
                    }
                    Ok(ProcessedRecord::Skipped) => {}
                    Err(e) => warn!("Dropping record: {e}"),
                },
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Error reading input: {e}");
                    break;
                }
            },
            _ = batch_interval.tick() => {
                for (tag, batch) in batches.drain() {
                    send(&consumer, &tag, batch).await;
                }
            }
            _ = &mut shutdown => {
                info!("Received interrupt, shutting down");
                break;
            }
        }
    }

    for (tag, batch) in batches.drain() {
        send(&consumer, &tag, batch).await;
    }

    cancel.cancel();
    for handle in flush_loops {
        if let Err(e) = handle.await {
            error!("Flush loop ended abnormally: {e}");
        }
    }
    if let Err(e) = volume.shutdown() {
        warn!("Unable to stop volume service: {e}");
    }
    if let Err(e) = volume_task.await {
        error!("Volume service ended abnormally: {e}");
    }
    debug!("Log alerts consumer stopped");
}
