use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use towwatch_core::{NotificationSource, PortError, PortResult};
use tracing::{debug, info, warn};

use crate::app_config::KafkaConfig;

/// A purge also stops once nothing has arrived for this long
const PURGE_QUIET_PERIOD: Duration = Duration::from_millis(500);
/// Upper bound on one purge, however busy the topic
const PURGE_MAX_DURATION: Duration = Duration::from_secs(30);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Per partition, the high watermark a purge must read up to
#[derive(Debug, Default, PartialEq, Eq)]
struct DrainTarget {
    remaining: HashMap<i32, i64>,
}

impl DrainTarget {
    /// `positions` holds the next offset to be read per partition, if known.
    /// An unknown position starts at the end (`auto.offset.reset = latest`).
    fn new(positions: impl IntoIterator<Item = (i32, Option<i64>)>, highs: &HashMap<i32, i64>) -> Self {
        let remaining = positions
            .into_iter()
            .filter_map(|(partition, next)| {
                let high = *highs.get(&partition)?;
                (next.unwrap_or(high) < high).then_some((partition, high))
            })
            .collect();
        Self { remaining }
    }

    fn observe(&mut self, partition: i32, offset: i64) {
        if let Some(&high) = self.remaining.get(&partition) {
            if offset + 1 >= high {
                self.remaining.remove(&partition);
            }
        }
    }

    fn is_done(&self) -> bool {
        self.remaining.is_empty()
    }
}

pub struct KafkaNotifications {
    consumer: Arc<StreamConsumer>,
    topic: String,
    // Held by whoever is reading: a purge never interleaves with a poll
    gate: Mutex<()>,
}

impl KafkaNotifications {
    pub fn new(config: &KafkaConfig) -> PortResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| PortError::Resource(format!("Consumer creation failed: {}", e)))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| PortError::Resource(format!("Can't subscribe to {}: {}", config.topic, e)))?;

        info!(topic = %config.topic, "Subscribed to notification topic");
        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic.clone(),
            gate: Mutex::new(()),
        })
    }

    /// Snapshot of what is readable right now on the assigned partitions
    async fn drain_target(&self) -> PortResult<DrainTarget> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();

        let target = tokio::task::spawn_blocking(move || -> KafkaResult<DrainTarget> {
            let assignment = consumer.assignment()?;
            let position = consumer.position()?;
            let committed = consumer.committed(METADATA_TIMEOUT)?;

            let mut highs = HashMap::new();
            for elem in assignment.elements_for_topic(&topic) {
                let (_, high) = consumer.fetch_watermarks(&topic, elem.partition(), METADATA_TIMEOUT)?;
                highs.insert(elem.partition(), high);
            }

            let next = |list: &TopicPartitionList, partition: i32| match list
                .find_partition(&topic, partition)
                .map(|elem| elem.offset())
            {
                Some(Offset::Offset(n)) => Some(n),
                _ => None,
            };
            let positions = highs
                .keys()
                .map(|&p| (p, next(&position, p).or_else(|| next(&committed, p))));
            Ok(DrainTarget::new(positions, &highs))
        })
        .await
        .map_err(|e| PortError::Resource(format!("Watermark lookup aborted: {}", e)))?;

        target.map_err(|e| PortError::Resource(format!("Watermark lookup on {} failed: {}", self.topic, e)))
    }
}

#[async_trait]
impl NotificationSource for KafkaNotifications {
    async fn purge(&self) -> PortResult<usize> {
        let _reading = self.gate.lock().await;

        let mut target = self.drain_target().await?;
        let deadline = Instant::now() + PURGE_MAX_DURATION;
        let mut dropped = 0;

        while !target.is_done() {
            let wait = PURGE_QUIET_PERIOD.min(deadline.saturating_duration_since(Instant::now()));
            if wait.is_zero() {
                warn!(topic = %self.topic, dropped, "Purge hit its time limit, backlog may remain");
                break;
            }
            match timeout(wait, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(m)) => {
                    dropped += 1;
                    target.observe(m.partition(), m.offset());
                }
                Ok(Err(e)) => {
                    return Err(PortError::Resource(format!(
                        "Purging {} failed: {}",
                        self.topic, e
                    )))
                }
            }
        }
        debug!(topic = %self.topic, dropped, "Notification backlog purged");
        Ok(dropped)
    }

    async fn next_payload(&self, wait: Duration) -> PortResult<Option<String>> {
        let _reading = self.gate.lock().await;

        match timeout(wait, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(PortError::Transport(format!("Kafka error on {}: {}", self.topic, e))),
            Ok(Ok(m)) => match m.payload() {
                // Undecodable bytes still reach the parser so they get logged
                Some(bytes) => Ok(Some(String::from_utf8_lossy(bytes).into_owned())),
                None => {
                    debug!(topic = %self.topic, offset = m.offset(), "Empty message ignored");
                    Ok(None)
                }
            },
        }
    }
}
