use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

use driftboard_common::config::KafkaConfig;
use driftboard_common::{Error, Result};

use super::{Event, TOPIC_COMMENT, TOPIC_EMAIL, TOPIC_LIKE};

/// Create the three topics with their configured partition counts. Running
/// against an already provisioned cluster is fine: "topic exists" is ignored.
pub async fn init_topics(cfg: &KafkaConfig) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &cfg.brokers)
        .create()
        .map_err(|e| Error::Internal(format!("kafka admin client: {e}")))?;

    let topics = [
        NewTopic::new(
            TOPIC_COMMENT,
            cfg.partitions_comment,
            TopicReplication::Fixed(cfg.replication_comment),
        ),
        NewTopic::new(
            TOPIC_LIKE,
            cfg.partitions_like,
            TopicReplication::Fixed(cfg.replication_like),
        ),
        NewTopic::new(
            TOPIC_EMAIL,
            cfg.partitions_email,
            TopicReplication::Fixed(cfg.replication_email),
        ),
    ];

    let results = admin
        .create_topics(topics.iter(), &AdminOptions::new())
        .await
        .map_err(|e| Error::Internal(format!("create topics: {e}")))?;

    for result in results {
        match result {
            Ok(_) => {}
            Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
            Err((topic, code)) => {
                return Err(Error::Internal(format!("create topic {topic}: {code}")));
            }
        }
    }
    Ok(())
}

/// Event-log producer. One writer per topic: comment messages require acks
/// from all replicas, like and email use the broker default. Publishing
/// retries synchronously before surfacing the failure to the caller.
pub struct Producer {
    comment: FutureProducer,
    like: FutureProducer,
    email: FutureProducer,
    retry: u32,
}

impl Producer {
    pub fn new(cfg: &KafkaConfig) -> Result<Self> {
        Ok(Producer {
            comment: build_producer(&cfg.brokers, Some("all"))?,
            like: build_producer(&cfg.brokers, None)?,
            email: build_producer(&cfg.brokers, None)?,
            retry: cfg.producer_retry.max(1),
        })
    }

    pub async fn publish(&self, event: &Event) -> Result<()> {
        let topic = event.topic();
        let key = event.partition_key();
        let payload = event.encode()?;
        let producer = match topic {
            TOPIC_COMMENT => &self.comment,
            TOPIC_LIKE => &self.like,
            _ => &self.email,
        };

        let mut last_err = None;
        for _ in 0..self.retry {
            let record = FutureRecord::to(topic).key(&key).payload(&payload);
            match producer
                .send(record, Timeout::After(Duration::from_secs(5)))
                .await
            {
                Ok(_) => return Ok(()),
                Err((err, _)) => last_err = Some(err),
            }
        }
        Err(Error::Internal(format!(
            "publish to {topic} failed after {} attempts: {}",
            self.retry,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Fire-and-forget publish used by request handlers: failures are logged,
    /// never surfaced to the caller.
    pub fn publish_background(self: &Arc<Self>, event: Event) {
        let producer = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = producer.publish(&event).await {
                tracing::error!(unique_key = event.unique_key(), %err, "background publish failed");
            }
        });
    }

}

fn build_producer(brokers: &str, acks: Option<&str>) -> Result<FutureProducer> {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000");
    if let Some(acks) = acks {
        config.set("acks", acks);
    }
    config
        .create()
        .map_err(|e| Error::Internal(format!("kafka producer: {e}")))
}
