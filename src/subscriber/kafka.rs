use anyhow::anyhow;
use async_trait::async_trait;
use rdkafka::{
    config::RDKafkaLogLevel,
    consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer},
    error::KafkaResult,
    ClientConfig, ClientContext, Message, Offset, TopicPartitionList,
};
use tracing::{info, warn};

use super::{Record, RecordSource, StateHandle, SubscriberState};
use crate::{error::ConsumeError, settings};

/// Reports group rebalances into the member's [StateHandle]
pub struct PipelineContext {
    state: StateHandle,
}

impl ClientContext for PipelineContext {}

impl ConsumerContext for PipelineContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                info!(partitions = ?partitions(tpl), "partitions revoked");
                self.state.set(SubscriberState::Rebalancing);
            }
            Rebalance::Assign(tpl) => {
                info!(partitions = ?partitions(tpl), "partitions being assigned");
            }
            _ => {
                warn!("rebalance error");
                self.state.set(SubscriberState::Rebalancing);
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            info!(partitions = ?partitions(tpl), "partitions assigned");
            self.state.set(SubscriberState::Streaming);
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(error = %e, "offset commit rejected by broker");
        }
    }
}

fn partitions(tpl: &TopicPartitionList) -> Vec<i32> {
    tpl.elements().iter().map(|e| e.partition()).collect()
}

/// Group member backed by an rdkafka [StreamConsumer] with manual offset commits
pub struct KafkaSource {
    consumer: StreamConsumer<PipelineContext>,
    state: StateHandle,
}

impl KafkaSource {
    pub fn new(
        kafka: &settings::Kafka,
        cfg: &settings::Consumer,
    ) -> Result<KafkaSource, anyhow::Error> {
        let state = StateHandle::new();
        let consumer: StreamConsumer<PipelineContext> = ClientConfig::new()
            .set("bootstrap.servers", &kafka.broker)
            .set("group.id", &cfg.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", cfg.offset_reset.as_str())
            .set("session.timeout.ms", cfg.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .set_log_level(RDKafkaLogLevel::Warning)
            .create_with_context(PipelineContext {
                state: state.clone(),
            })
            .map_err(|e| anyhow!("creating kafka consumer: {e}"))?;
        consumer
            .subscribe(&[kafka.topic.as_str()])
            .map_err(|e| anyhow!("subscribing to {}: {e}", kafka.topic))?;
        info!(topic = %kafka.topic, group = %cfg.group, "joining consumer group");
        Ok(KafkaSource { consumer, state })
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn next(&mut self) -> Result<Record, ConsumeError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| ConsumeError::BrokerDisconnected(e.to_string()))?;
        // records buffered before a revoke must not end Rebalancing early
        self.state.promote(SubscriberState::Joining, SubscriberState::Streaming);
        Ok(Record {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    fn commit(&mut self, record: &Record) -> Result<(), ConsumeError> {
        let mut tpl = TopicPartitionList::new();
        // commit the _next_ offset, see
        // https://docs.rs/rdkafka/latest/rdkafka/consumer/trait.Consumer.html#tymethod.commit
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| ConsumeError::BrokerDisconnected(e.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| ConsumeError::BrokerDisconnected(e.to_string()))
    }

    fn close(&mut self) {
        // dropping the consumer afterwards closes it, which leaves the group
        self.consumer.unsubscribe();
        self.state.set(SubscriberState::Closed);
        info!("left consumer group");
    }

    fn state(&self) -> &StateHandle {
        &self.state
    }
}
