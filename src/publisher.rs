//! Appends transactions to the topic, keyed by transaction id
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    error::{KafkaError, RDKafkaErrorCode},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
    ClientConfig,
};
use tracing::{debug, info, warn};

use crate::{codec::json, error::PublishError, settings, transaction::Transaction};

/// Broker confirmation of a durable append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub partition: i32,
    pub offset: i64,
}

/// Something that can durably append a transaction to the topic.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, tx: Transaction) -> Result<Ack, PublishError>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    message_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(cfg: &settings::Kafka) -> Result<KafkaPublisher, anyhow::Error> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.broker)
            .set("acks", &cfg.acks)
            .set("enable.idempotence", cfg.idempotence.to_string())
            .set("message.timeout.ms", cfg.message_timeout_ms.to_string())
            .create()
            .map_err(|e| anyhow!("creating kafka producer: {e}"))?;
        Ok(KafkaPublisher {
            producer,
            topic: cfg.topic.clone(),
            message_timeout: Duration::from_millis(cfg.message_timeout_ms),
        })
    }

    /// Waits for every queued record to be delivered or to fail
    pub fn flush(&self) {
        if let Err(e) = self.producer.flush(Timeout::After(self.message_timeout)) {
            warn!(error = %e, "flushing producer queue");
        }
    }
}

#[async_trait]
impl Publish for KafkaPublisher {
    async fn publish(&self, tx: Transaction) -> Result<Ack, PublishError> {
        let payload = json::encode(&tx)?;
        let record = FutureRecord::to(&self.topic)
            .key(tx.transaction_id.as_str())
            .payload(&payload);
        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.message_timeout))
            .await
            .map_err(|(err, _)| classify(err))?;
        debug!(transaction_id = %tx.transaction_id, partition, offset, "record appended");
        Ok(Ack { partition, offset })
    }
}

fn classify(err: KafkaError) -> PublishError {
    match err {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut)
        | KafkaError::MessageProduction(RDKafkaErrorCode::RequestTimedOut) => PublishError::Timeout,
        KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => {
            PublishError::Unavailable(String::from("local producer queue full"))
        }
        e => PublishError::Unavailable(e.to_string()),
    }
}

/// Creates the topic unless it already exists
pub async fn ensure_topic(cfg: &settings::Kafka) -> Result<(), anyhow::Error> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &cfg.broker)
        .create()
        .map_err(|e| anyhow!("creating admin client: {e}"))?;
    let topic = NewTopic::new(&cfg.topic, cfg.partitions, TopicReplication::Fixed(1));
    let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

    let results = admin
        .create_topics(&[topic], &opts)
        .await
        .map_err(|e| anyhow!("creating topic {}: {e}", cfg.topic))?;
    for result in results {
        match result {
            Ok(name) => info!(topic = %name, partitions = cfg.partitions, "topic created"),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                info!(topic = %name, "topic already exists")
            }
            Err((name, code)) => return Err(anyhow!("creating topic {name}: {code}")),
        }
    }
    Ok(())
}
