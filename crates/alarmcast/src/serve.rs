// SPDX-FileCopyrightText: 2026 Alarmcast Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `alarmcast serve` command implementation.
//!
//! Opens SQLite storage and the queue, builds one breaker registry and the
//! enabled channel senders, then runs the queue consumer in the foreground
//! with the dead-letter reprocessor, the worker registry loops, and the
//! metrics snapshot in the background. SIGINT or SIGTERM stops dequeuing;
//! the in-flight batch finishes before exit.

use std::sync::Arc;
use std::time::Duration;

use alarmcast_config::model::AlarmcastConfig;
use alarmcast_core::{AlarmcastError, ChannelSender, PluginAdapter};
use alarmcast_engine::{
    drain, install_signal_handler, worker_id, AlarmProcessor, DeadLetterReprocessor,
    QueueConsumer, WorkerRegistry,
};
use alarmcast_resilience::{BreakerRegistry, CircuitBreakerConfig};
use alarmcast_storage::{SqliteQueue, SqliteStorage};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long background loops get to wind down after the consumer stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the `alarmcast serve` command.
pub async fn run_serve(config: AlarmcastConfig) -> Result<(), AlarmcastError> {
    info!(service = %config.service.name, "starting alarmcast serve");

    let storage = {
        let storage = SqliteStorage::new(config.storage.clone()).with_dead_letter_delay(
            Duration::from_millis(config.dead_letter.base_delay_ms),
        );
        storage.initialize().await?;
        Arc::new(storage)
    };
    let queue = Arc::new(SqliteQueue::from_config(
        storage.database()?.clone(),
        &config.queue,
    ));

    #[cfg(feature = "prometheus")]
    let prometheus = if config.metrics.enabled {
        match alarmcast_prometheus::PrometheusAdapter::new() {
            Ok(adapter) => Some(Arc::new(adapter)),
            Err(e) => {
                warn!(error = %e, "prometheus initialization failed, continuing without metrics");
                None
            }
        }
    } else {
        debug!("metrics disabled by configuration");
        None
    };

    let breakers = Arc::new(BreakerRegistry::new(CircuitBreakerConfig::from(
        &config.breaker,
    )));
    let processor = Arc::new(build_processor(&config, &storage, &breakers).await?);
    if processor.channels().is_empty() {
        warn!("no channel enabled; every alarm will be skipped");
    }

    let cancel = install_signal_handler();
    let mut background: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    let registry = Arc::new(WorkerRegistry::new(&config.workers));
    let me = worker_id(&config.service);
    info!(worker_id = %me, "worker identity assigned");
    background.push((
        "heartbeat",
        tokio::spawn(registry.clone().heartbeat_loop(
            me,
            Duration::from_secs(config.workers.heartbeat_interval_secs),
            cancel.clone(),
        )),
    ));
    background.push((
        "worker-cleanup",
        tokio::spawn(registry.clone().cleanup_loop(
            Duration::from_secs(config.workers.cleanup_interval_secs),
            cancel.clone(),
        )),
    ));

    if config.dead_letter.enabled {
        let reprocessor =
            DeadLetterReprocessor::new(storage.clone(), processor.clone(), config.dead_letter.clone());
        let token = cancel.clone();
        background.push((
            "dead-letter",
            tokio::spawn(async move { reprocessor.run(token).await }),
        ));
    } else {
        info!("dead-letter reprocessing disabled by configuration");
    }

    #[cfg(feature = "prometheus")]
    if let (Some(adapter), Some(path)) = (prometheus.clone(), config.metrics.textfile_path.clone())
    {
        let interval = Duration::from_secs(config.metrics.snapshot_interval_secs.max(1));
        background.push((
            "metrics-snapshot",
            tokio::spawn(metrics_snapshot(adapter, path, interval, cancel.clone())),
        ));
    }

    let consumer = Arc::new(QueueConsumer::new(
        queue.clone(),
        processor,
        storage.clone(),
        storage.clone(),
        config.queue.clone(),
    ));
    let result = consumer.run(cancel.clone()).await;
    if let Err(e) = &result {
        error!(error = %e, "queue consumer failed");
    }

    cancel.cancel();
    for (name, handle) in background {
        drain(name, handle, DRAIN_TIMEOUT).await;
    }
    if let Err(e) = storage.shutdown().await {
        warn!(error = %e, "storage shutdown failed");
    }

    info!("alarmcast serve shutdown complete");
    result
}

/// Build the processor with a sender for every enabled channel.
async fn build_processor(
    config: &AlarmcastConfig,
    storage: &Arc<SqliteStorage>,
    breakers: &Arc<BreakerRegistry>,
) -> Result<AlarmProcessor, AlarmcastError> {
    let mut builder = AlarmProcessor::builder(
        storage.clone(),
        storage.clone(),
        storage.clone(),
        config.processor.clone(),
    );

    #[cfg(feature = "email")]
    if config.email.enabled {
        let transport = alarmcast_email::SmtpMailTransport::from_config(&config.email)?;
        let breaker = breakers.get(&alarmcast_email::breaker_name(transport.host()));
        let from = config
            .email
            .from
            .as_deref()
            .ok_or_else(|| AlarmcastError::Config("email.from is required".into()))?;
        let sender = alarmcast_email::EmailSender::new(Arc::new(transport), breaker, from)?;
        builder = builder.channel(
            announce(Arc::new(sender)).await,
            config.email.max_concurrent,
            config.email.max_retries,
        );
    }

    #[cfg(feature = "sms")]
    if config.sms.enabled {
        let gateway = alarmcast_sms::HttpModemGateway::new(Duration::from_secs(
            config.sms.timeout_secs,
        ))?;
        let pool = alarmcast_sms::ModemPool::new(
            storage.clone(),
            Arc::new(gateway),
            breakers.clone(),
            &config.modem_pool,
        )
        .await?;
        let sender = alarmcast_sms::SmsSender::new(Arc::new(pool));
        builder = builder.channel(
            announce(Arc::new(sender)).await,
            config.sms.max_concurrent,
            config.sms.max_retries,
        );
    }

    #[cfg(feature = "voice")]
    if config.voice.enabled {
        let sender = alarmcast_voice::VoiceSender::from_config(&config.voice, breakers)?;
        builder = builder.channel(
            announce(Arc::new(sender)).await,
            config.voice.max_concurrent,
            config.voice.max_retries,
        );
    }

    #[cfg(feature = "push")]
    if config.push.enabled {
        let sender = alarmcast_push::PushSender::from_config(&config.push, breakers)?;
        builder = builder.channel(
            announce(Arc::new(sender)).await,
            config.push.max_concurrent,
            config.push.max_retries,
        );
    }

    Ok(builder.build())
}

/// Log a sender's startup health and hand it back as a trait object.
async fn announce<S: ChannelSender + 'static>(sender: Arc<S>) -> Arc<dyn ChannelSender> {
    match sender.health_check().await {
        Ok(health) => info!(
            channel = %sender.channel(),
            provider = sender.provider(),
            health = ?health,
            "channel enabled"
        ),
        Err(e) => warn!(channel = %sender.channel(), error = %e, "channel health check failed"),
    }
    sender
}

/// Write the Prometheus exposition to `path` every `interval`, for a
/// node-exporter textfile collector.
#[cfg(feature = "prometheus")]
async fn metrics_snapshot(
    adapter: Arc<alarmcast_prometheus::PrometheusAdapter>,
    path: String,
    interval: Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let tmp = format!("{path}.tmp");
        let written = async {
            tokio::fs::write(&tmp, adapter.render()).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            warn!(path = %path, error = %e, "metrics snapshot failed");
        }
    }
    debug!("metrics snapshot task stopped");
}
