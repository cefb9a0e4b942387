//! Kafka producer for the bus sink.
//!
//! Wraps an `rdkafka` [`BaseProducer`]; delivery reports are counted in the
//! producer context. Client settings:
//!
//! | Property | Value |
//! |----------|-------|
//! | `bootstrap.servers` | `bus_sink.brokers` |
//! | `acks` | `1` |
//! | `compression.codec` | `snappy` |
//! | `queue.buffering.max.ms` | `0` |
//! | `queue.buffering.max.messages` | `500000` |
//!
//! Entries of `bus_sink.properties` are applied last and override these.

use super::bus::{BusProducer, DeliveryCounts, EnqueueError};
use crate::error::{DaqError, DaqResult};
use daq_common::config::BusSinkConfig;
use daq_common::consts::BUS_QUEUE_MAX_MESSAGES;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Producer context counting delivery reports.
#[derive(Debug, Default)]
pub struct DeliveryCounter {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl ClientContext for DeliveryCounter {}

impl ProducerContext for DeliveryCounter {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match result {
            Ok(_) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err((e, _)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Message delivery failed: {}", e);
            }
        }
    }
}

/// Kafka-backed [`BusProducer`].
pub struct KafkaProducer {
    producer: BaseProducer<DeliveryCounter>,
    topic: String,
}

impl KafkaProducer {
    /// Create the client.
    ///
    /// # Errors
    /// Returns `DaqError::Bus` when the client configuration is rejected.
    pub fn new(config: &BusSinkConfig) -> DaqResult<Self> {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "1")
            .set("compression.codec", "snappy")
            .set("queue.buffering.max.ms", "0")
            .set(
                "queue.buffering.max.messages",
                BUS_QUEUE_MAX_MESSAGES.to_string(),
            );
        for (key, value) in &config.properties {
            client.set(key, value);
        }

        let producer: BaseProducer<DeliveryCounter> = client
            .create_with_context(DeliveryCounter::default())
            .map_err(|e| DaqError::Bus(format!("cannot create producer: {e}")))?;
        info!(
            "Kafka producer connected to {} (topic '{}')",
            config.brokers, config.topic
        );
        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

impl BusProducer for KafkaProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn enqueue(&mut self, message: &[u8]) -> Result<(), EnqueueError> {
        let record = BaseRecord::<(), [u8]>::to(&self.topic).payload(message);
        match self.producer.send(record) {
            Ok(()) => Ok(()),
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                Err(EnqueueError::QueueFull)
            }
            Err((e, _)) => Err(EnqueueError::Other(e.to_string())),
        }
    }

    fn poll(&mut self, timeout: Duration) {
        self.producer.poll(timeout);
    }

    fn flush(&mut self, timeout: Duration) -> DaqResult<()> {
        self.producer.flush(timeout).map_err(|e| {
            DaqError::Bus(format!(
                "flush incomplete, {} message(s) undelivered: {e}",
                self.producer.in_flight_count()
            ))
        })
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }

    fn deliveries(&self) -> DeliveryCounts {
        let context = self.producer.context();
        DeliveryCounts {
            delivered: context.delivered.load(Ordering::Relaxed),
            failed: context.failed.load(Ordering::Relaxed),
        }
    }
}
