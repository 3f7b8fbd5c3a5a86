use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use driftboard_common::config::KafkaConfig;
use driftboard_common::{ConsumeStatus, IdGenerator, LocalCache, RedisClient, StatusBoard};

use super::handlers::{self, Applied};
use super::{Event, GROUP_COMMENT, GROUP_EMAIL, GROUP_LIKE, TOPIC_COMMENT, TOPIC_EMAIL, TOPIC_LIKE};
use crate::email::Mailer;
use crate::rebuild::Rebuilder;

/// Collaborators the consumer handlers reach for.
pub struct QueueContext {
    pub db: PgPool,
    pub redis: Arc<RedisClient>,
    pub cache: Arc<LocalCache>,
    pub status: Arc<StatusBoard>,
    pub rebuild: Arc<Rebuilder>,
    pub mailer: Arc<Mailer>,
    pub ids: Arc<IdGenerator>,
    pub kafka: KafkaConfig,
    pub email_code_ttl: i64,
}

/// One consumer task per partition per group, so each partition is processed
/// strictly in order. The shutdown receiver is observed between batches.
pub fn spawn_consumers(
    ctx: Arc<QueueContext>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    let plan = [
        (TOPIC_COMMENT, GROUP_COMMENT, ctx.kafka.partitions_comment),
        (TOPIC_LIKE, GROUP_LIKE, ctx.kafka.partitions_like),
        (TOPIC_EMAIL, GROUP_EMAIL, ctx.kafka.partitions_email),
    ];

    for (topic, group, partitions) in plan {
        for _ in 0..partitions.max(1) {
            let ctx = Arc::clone(&ctx);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_partition(topic, group, ctx, shutdown).await;
            }));
        }
    }
    handles
}

async fn run_partition(
    topic: &'static str,
    group: &'static str,
    ctx: Arc<QueueContext>,
    shutdown: watch::Receiver<bool>,
) {
    let consumer: StreamConsumer = match ClientConfig::new()
        .set("bootstrap.servers", &ctx.kafka.brokers)
        .set("group.id", group)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
    {
        Ok(consumer) => consumer,
        Err(err) => {
            tracing::error!(topic, %err, "failed to build consumer");
            return;
        }
    };
    if let Err(err) = consumer.subscribe(&[topic]) {
        tracing::error!(topic, %err, "failed to subscribe");
        return;
    }

    loop {
        if *shutdown.borrow() {
            break;
        }
        let batch = fetch_batch(&consumer, ctx.kafka.consumer_batch_size).await;
        if batch.is_empty() {
            continue;
        }
        process_batch(&ctx, &consumer, &batch).await;
    }
    tracing::info!(topic, "consumer exiting");
}

/// Fetch up to `n` messages: a long poll for the first (which doubles as the
/// shutdown check cadence), then a short per-message timeout so a trickle of
/// traffic does not stall the batch.
async fn fetch_batch<'a>(consumer: &'a StreamConsumer, n: usize) -> Vec<BorrowedMessage<'a>> {
    let mut batch = Vec::with_capacity(n);

    match timeout(Duration::from_secs(5), consumer.recv()).await {
        Err(_) => return batch,
        Ok(Err(err)) => {
            tracing::error!(%err, "fetch message failed");
            tokio::time::sleep(Duration::from_secs(1)).await;
            return batch;
        }
        Ok(Ok(message)) => batch.push(message),
    }

    while batch.len() < n {
        match timeout(Duration::from_millis(8), consumer.recv()).await {
            Err(_) => break,
            Ok(Err(err)) => {
                tracing::error!(%err, "fetch message failed");
                break;
            }
            Ok(Ok(message)) => batch.push(message),
        }
    }
    batch
}

/// Process one batch under one record-store transaction.
///
/// Convert errors (malformed payloads) fail only their message; the batch
/// proceeds without it. A transactional error rolls the whole batch back for
/// a retry. Outcomes reach the status board and cache effects run only after
/// the transaction commits, and the offset is committed strictly last, so a
/// rolled-back mutation can never sit behind a committed offset.
async fn process_batch(
    ctx: &QueueContext,
    consumer: &StreamConsumer,
    batch: &[BorrowedMessage<'_>],
) {
    let mut events: Vec<Event> = Vec::with_capacity(batch.len());
    let mut convert_failures = 0_u32;
    for message in batch {
        let payload = message.payload().unwrap_or_default();
        match Event::decode(payload) {
            Ok(event) => events.push(event),
            Err(err) => {
                convert_failures += 1;
                tracing::error!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    %err,
                    "dropping undecodable message"
                );
            }
        }
    }

    let retries = ctx.kafka.consumer_retry.max(1);
    let mut consumed = false;
    for attempt in 1..=retries {
        match run_transaction(ctx, &events).await {
            Ok(applied) => {
                for (event, applied) in events.iter().zip(applied.iter()) {
                    handlers::finalize(ctx, event, applied).await;
                    ctx.status
                        .set(applied.unique_key.clone(), ConsumeStatus::Success);
                }
                consumed = true;
                break;
            }
            Err(err) => {
                tracing::error!(attempt, %err, "batch transaction failed, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    if !consumed && !events.is_empty() {
        // Retries exhausted: give the batch up (dead-letter hook) and move
        // on, or the partition would wedge behind one poisoned batch.
        let keys: Vec<String> = events.iter().map(Event::unique_key).collect();
        tracing::error!(?keys, "giving up on batch after {retries} retries");
        for key in keys {
            ctx.status.set(key, ConsumeStatus::Failed);
        }
    }
    if convert_failures > 0 {
        tracing::warn!(convert_failures, "batch contained undecodable messages");
    }

    if let Some(last) = batch.last() {
        if let Err(err) = consumer.commit_message(last, CommitMode::Sync) {
            tracing::error!(%err, "offset commit failed");
        }
    }
}

async fn run_transaction(
    ctx: &QueueContext,
    events: &[Event],
) -> driftboard_common::Result<Vec<Applied>> {
    let mut tx = ctx.db.begin().await?;
    let mut applied = Vec::with_capacity(events.len());
    for event in events {
        match handlers::apply(&mut tx, ctx, event).await {
            Ok(result) => applied.push(result),
            Err(err) => {
                tx.rollback().await.ok();
                return Err(err);
            }
        }
    }
    tx.commit().await?;
    Ok(applied)
}
