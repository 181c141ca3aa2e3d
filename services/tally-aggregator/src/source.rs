//! Event source layer for the tally aggregator
//!
//! Abstracts the partitioned, at-least-once tally stream behind a single
//! bounded-wait operation: `poll(topic, timeout)` returns whatever records
//! are ready, waits at most `timeout` for the first one otherwise, and never
//! blocks longer than that.
//!
//! The shipped backend is an in-process channel stream. A producer handle
//! publishes raw payloads; the source side drains them in batches. Like a
//! real broker it does not deduplicate: the same payload published twice is
//! delivered twice.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// Topics consumed by the aggregator. The topic decides the record schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `aggregated_votes_per_candidate`
    CandidateVotes,
    /// `aggregated_turnout_by_location`
    LocationTurnout,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::CandidateVotes, Topic::LocationTurnout];

    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::CandidateVotes => "aggregated_votes_per_candidate",
            Topic::LocationTurnout => "aggregated_turnout_by_location",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = IngestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| IngestionError::UnknownTopic(s.to_string()))
    }
}

/// A raw, undecoded record as delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: Topic,
    /// Position assigned by the producer. Unique per topic, not dense.
    pub offset: u64,
    pub payload: Vec<u8>,
}

/// Transient stream failures. None of these are fatal to the pipeline; the
/// caller treats the affected poll as an empty batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("stream for topic {0} is disconnected")]
    Disconnected(Topic),

    #[error("stream for topic {topic} is full: capacity {capacity}")]
    Backpressure { topic: Topic, capacity: usize },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// A partitioned, at-least-once message stream polled in bounded batches.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Return the records currently available on `topic`.
    ///
    /// Returns immediately if records are buffered, otherwise waits at most
    /// `timeout` and returns an empty batch if nothing arrives.
    async fn poll(&self, topic: Topic, timeout: Duration) -> Result<Vec<RawRecord>, IngestionError>;
}

/// Configuration for the in-process channel stream.
#[derive(Debug, Clone)]
pub struct ChannelSourceConfig {
    /// Maximum number of undelivered records per topic.
    pub capacity: usize,
    /// Maximum number of records returned by one poll.
    pub max_batch_records: usize,
}

impl Default for ChannelSourceConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            max_batch_records: 10_000,
        }
    }
}

/// Create a connected producer/source pair with one channel per topic.
pub fn channel(config: ChannelSourceConfig) -> (ChannelProducer, ChannelSource) {
    let mut senders = BTreeMap::new();
    let mut receivers = BTreeMap::new();

    for topic in Topic::ALL {
        let (tx, rx) = mpsc::channel(config.capacity);
        senders.insert(
            topic,
            TopicSender {
                tx,
                next_offset: AtomicU64::new(0),
            },
        );
        receivers.insert(topic, Mutex::new(rx));
    }

    info!(
        capacity = config.capacity,
        max_batch_records = config.max_batch_records,
        "Channel stream initialized"
    );

    let producer = ChannelProducer {
        senders: Arc::new(senders),
        capacity: config.capacity,
    };
    let source = ChannelSource {
        receivers,
        max_batch_records: config.max_batch_records,
    };
    (producer, source)
}

struct TopicSender {
    tx: mpsc::Sender<RawRecord>,
    next_offset: AtomicU64,
}

/// Publishing half of the channel stream. Cheap to clone.
#[derive(Clone)]
pub struct ChannelProducer {
    senders: Arc<BTreeMap<Topic, TopicSender>>,
    capacity: usize,
}

impl ChannelProducer {
    /// Publish one raw payload, returning its assigned offset.
    ///
    /// Never waits: a full topic is reported as backpressure.
    pub fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<u64, IngestionError> {
        let sender = self
            .senders
            .get(&topic)
            .ok_or_else(|| IngestionError::UnknownTopic(topic.to_string()))?;

        let offset = sender.next_offset.fetch_add(1, Ordering::Relaxed);
        let record = RawRecord {
            topic,
            offset,
            payload,
        };

        sender.tx.try_send(record).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => IngestionError::Backpressure {
                topic,
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => IngestionError::Disconnected(topic),
        })?;

        debug!(topic = %topic, offset, "Record published");
        Ok(offset)
    }
}

/// Consuming half of the channel stream.
pub struct ChannelSource {
    receivers: BTreeMap<Topic, Mutex<mpsc::Receiver<RawRecord>>>,
    max_batch_records: usize,
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn poll(&self, topic: Topic, timeout: Duration) -> Result<Vec<RawRecord>, IngestionError> {
        let receiver = self
            .receivers
            .get(&topic)
            .ok_or_else(|| IngestionError::UnknownTopic(topic.to_string()))?;
        let max = self.max_batch_records;

        // The lock wait counts against the timeout too.
        let bounded = tokio::time::timeout(timeout, async {
            let mut rx = receiver.lock().await;
            let mut batch = Vec::new();

            drain_ready(&mut rx, &mut batch, max);
            if batch.is_empty() {
                match rx.recv().await {
                    Some(record) => {
                        batch.push(record);
                        drain_ready(&mut rx, &mut batch, max);
                    }
                    None => return Err(IngestionError::Disconnected(topic)),
                }
            }
            Ok(batch)
        })
        .await;

        match bounded {
            Ok(result) => result,
            Err(_elapsed) => Ok(Vec::new()),
        }
    }
}

fn drain_ready(rx: &mut mpsc::Receiver<RawRecord>, batch: &mut Vec<RawRecord>, max: usize) {
    while batch.len() < max {
        match rx.try_recv() {
            Ok(record) => batch.push(record),
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ChannelSourceConfig {
        ChannelSourceConfig {
            capacity: 4,
            max_batch_records: 3,
        }
    }

    #[test]
    fn test_topic_names_roundtrip() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
        assert_eq!(
            "votes".parse::<Topic>(),
            Err(IngestionError::UnknownTopic("votes".to_string()))
        );
    }

    #[tokio::test]
    async fn test_poll_returns_buffered_records() {
        let (producer, source) = channel(ChannelSourceConfig::default());

        producer.publish(Topic::CandidateVotes, b"a".to_vec()).unwrap();
        producer.publish(Topic::CandidateVotes, b"b".to_vec()).unwrap();

        let batch = source
            .poll(Topic::CandidateVotes, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, 0);
        assert_eq!(batch[1].payload, b"b".to_vec());

        // Other topic untouched
        let other = source
            .poll(Topic::LocationTurnout, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_with_empty_batch() {
        let (_producer, source) = channel(ChannelSourceConfig::default());

        let start = tokio::time::Instant::now();
        let batch = source
            .poll(Topic::LocationTurnout, Duration::from_millis(250))
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_poll_caps_batch_size() {
        let (producer, source) = channel(small_config());
        for i in 0..4u8 {
            producer.publish(Topic::LocationTurnout, vec![i]).unwrap();
        }

        let first = source
            .poll(Topic::LocationTurnout, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.len(), 3);

        let second = source
            .poll(Topic::LocationTurnout, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, vec![3]);
    }

    #[tokio::test]
    async fn test_publish_backpressure() {
        let (producer, _source) = channel(small_config());
        for i in 0..4u8 {
            producer.publish(Topic::CandidateVotes, vec![i]).unwrap();
        }

        let err = producer.publish(Topic::CandidateVotes, vec![9]).unwrap_err();
        assert_eq!(
            err,
            IngestionError::Backpressure {
                topic: Topic::CandidateVotes,
                capacity: 4
            }
        );
    }

    #[tokio::test]
    async fn test_disconnected_producer_is_transient_error() {
        let (producer, source) = channel(ChannelSourceConfig::default());
        producer.publish(Topic::CandidateVotes, b"last".to_vec()).unwrap();
        drop(producer);

        // Buffered records still drain
        let batch = source
            .poll(Topic::CandidateVotes, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);

        let err = source
            .poll(Topic::CandidateVotes, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, IngestionError::Disconnected(Topic::CandidateVotes));
    }

    #[tokio::test]
    async fn test_offsets_are_per_topic() {
        let (producer, _source) = channel(ChannelSourceConfig::default());
        assert_eq!(producer.publish(Topic::CandidateVotes, vec![]).unwrap(), 0);
        assert_eq!(producer.publish(Topic::CandidateVotes, vec![]).unwrap(), 1);
        assert_eq!(producer.publish(Topic::LocationTurnout, vec![]).unwrap(), 0);
    }
}
