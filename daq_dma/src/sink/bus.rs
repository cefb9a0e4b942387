//! Message-bus sink.
//!
//! Every accepted block becomes one unkeyed message on a single topic:
//! an optional 8-byte host-endian run-number prefix followed by the
//! payload, copied into a sink-owned buffer.
//!
//! # Backpressure
//!
//! | Enqueue result | Action |
//! |----------------|--------|
//! | accepted | done |
//! | queue full | blocking poll, check cancellation, retry the same message |
//! | other error | log, drop the message |
//!
//! Every enqueue attempt is followed by a non-blocking poll so delivery
//! reports are serviced. A cancelled retry drops the message.

use super::Sink;
use crate::cancel::CancelToken;
use crate::error::DaqResult;
use daq_common::config::BusSinkConfig;
use daq_common::consts::RUN_NUMBER_PREFIX_BYTES;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Enqueue failure reported by a [`BusProducer`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// Producer queue saturated; retry after polling.
    #[error("producer queue full")]
    QueueFull,
    /// Any other failure; the message is dropped.
    #[error("{0}")]
    Other(String),
}

/// Delivery-report counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    /// Messages acknowledged by the broker.
    pub delivered: u64,
    /// Messages reported as failed.
    pub failed: u64,
}

/// Client boundary of the bus sink.
pub trait BusProducer: Send {
    /// Destination topic.
    fn topic(&self) -> &str;

    /// Queue one message. The producer copies `message`.
    fn enqueue(&mut self, message: &[u8]) -> Result<(), EnqueueError>;

    /// Service delivery reports, blocking for at most `timeout`.
    fn poll(&mut self, timeout: Duration);

    /// Wait up to `timeout` for every queued message to be delivered.
    ///
    /// # Errors
    /// Returns `DaqError::Bus` when messages are still outstanding at the
    /// deadline.
    fn flush(&mut self, timeout: Duration) -> DaqResult<()>;

    /// Messages queued but not yet reported.
    fn in_flight(&self) -> usize;

    /// Delivery reports received so far.
    fn deliveries(&self) -> DeliveryCounts;
}

/// Producer-side statistics of a [`BusSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages accepted by the producer.
    pub produced: u64,
    /// Queue-full results (one per retry).
    pub queue_full: u64,
    /// Messages given up on (enqueue error or cancellation).
    pub dropped: u64,
    /// Delivery reports at the last poll.
    pub deliveries: DeliveryCounts,
}

/// Bus sink over a [`BusProducer`].
pub struct BusSink<P: BusProducer> {
    producer: P,
    run_number: Option<u32>,
    poll_interval: Duration,
    flush_timeout: Duration,
    cancel: CancelToken,
    message: Vec<u8>,
    stats: BusStats,
    closed: bool,
}

impl<P: BusProducer> BusSink<P> {
    /// Create a sink with the poll interval and flush timeout of `config`.
    pub fn new(producer: P, config: &BusSinkConfig, cancel: CancelToken) -> Self {
        info!("Bus sink producing to topic '{}'", producer.topic());
        Self {
            producer,
            run_number: None,
            poll_interval: config.poll_interval(),
            flush_timeout: config.flush_timeout(),
            cancel,
            message: Vec::new(),
            stats: BusStats::default(),
            closed: false,
        }
    }

    /// Prefix every message with `run_number` as 8 host-endian bytes.
    pub fn with_run_number(mut self, run_number: Option<u32>) -> Self {
        self.run_number = run_number;
        self
    }

    /// Statistics so far.
    pub fn stats(&self) -> BusStats {
        let mut stats = self.stats;
        stats.deliveries = self.producer.deliveries();
        stats
    }

    /// Underlying producer.
    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// Produce one payload, retrying on queue-full until accepted or
    /// cancelled. Empty payloads are ignored.
    pub fn produce(&mut self, payload: &[u8]) {
        if payload.is_empty() || self.closed {
            return;
        }

        self.message.clear();
        if let Some(run_number) = self.run_number {
            let prefix = u64::from(run_number).to_ne_bytes();
            self.message.extend_from_slice(&prefix[..RUN_NUMBER_PREFIX_BYTES]);
        }
        self.message.extend_from_slice(payload);

        loop {
            let result = self.producer.enqueue(&self.message);
            self.producer.poll(Duration::ZERO);
            match result {
                Ok(()) => {
                    self.stats.produced += 1;
                    return;
                }
                Err(EnqueueError::QueueFull) => {
                    self.stats.queue_full += 1;
                    debug!(
                        "Producer queue full ({} in flight); polling {:?}",
                        self.producer.in_flight(),
                        self.poll_interval
                    );
                    self.producer.poll(self.poll_interval);
                    if self.cancel.is_cancelled() {
                        warn!(
                            "Cancelled while the producer queue was full; dropping {} byte message",
                            self.message.len()
                        );
                        self.stats.dropped += 1;
                        return;
                    }
                }
                Err(EnqueueError::Other(reason)) => {
                    warn!(
                        "Failed to produce to topic '{}': {}",
                        self.producer.topic(),
                        reason
                    );
                    self.stats.dropped += 1;
                    return;
                }
            }
        }
    }
}

impl<P: BusProducer> Sink for BusSink<P> {
    fn name(&self) -> &'static str {
        "bus"
    }

    fn accept(&mut self, payload: &[u8]) -> DaqResult<()> {
        self.produce(payload);
        Ok(())
    }

    fn close(&mut self) -> DaqResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!(
            "Flushing {} outstanding messages (timeout {:?})",
            self.producer.in_flight(),
            self.flush_timeout
        );
        if let Err(e) = self.producer.flush(self.flush_timeout) {
            warn!("{}", e);
        }
        let stats = self.stats();
        info!(
            "Bus sink closed: produced={} dropped={} queue_full={} delivered={} failed={}",
            stats.produced,
            stats.dropped,
            stats.queue_full,
            stats.deliveries.delivered,
            stats.deliveries.failed
        );
        Ok(())
    }
}

/// In-process producer with a bounded queue.
///
/// Messages move from the queue to `delivered` on blocking polls and on
/// flush. Non-blocking polls only count.
#[derive(Debug)]
pub struct MemoryProducer {
    topic: String,
    capacity: usize,
    queue: VecDeque<Vec<u8>>,
    delivered: Vec<Vec<u8>>,
    injected: VecDeque<EnqueueError>,
    enqueue_calls: u64,
    nonblocking_polls: u64,
    blocking_polls: u64,
}

impl MemoryProducer {
    /// Create a producer holding at most `capacity` undelivered messages.
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            topic: topic.into(),
            capacity,
            queue: VecDeque::new(),
            delivered: Vec::new(),
            injected: VecDeque::new(),
            enqueue_calls: 0,
            nonblocking_polls: 0,
            blocking_polls: 0,
        }
    }

    /// Fail the next enqueue with `error`, before the capacity check.
    pub fn inject(&mut self, error: EnqueueError) {
        self.injected.push_back(error);
    }

    /// Messages delivered so far, in order.
    pub fn delivered(&self) -> &[Vec<u8>] {
        &self.delivered
    }

    /// Enqueue attempts so far.
    pub fn enqueue_calls(&self) -> u64 {
        self.enqueue_calls
    }

    /// Polls with a zero timeout.
    pub fn nonblocking_polls(&self) -> u64 {
        self.nonblocking_polls
    }

    /// Polls with a non-zero timeout.
    pub fn blocking_polls(&self) -> u64 {
        self.blocking_polls
    }

    fn deliver_all(&mut self) {
        self.delivered.extend(self.queue.drain(..));
    }
}

impl BusProducer for MemoryProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn enqueue(&mut self, message: &[u8]) -> Result<(), EnqueueError> {
        self.enqueue_calls += 1;
        if let Some(error) = self.injected.pop_front() {
            return Err(error);
        }
        if self.queue.len() >= self.capacity {
            return Err(EnqueueError::QueueFull);
        }
        self.queue.push_back(message.to_vec());
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) {
        if timeout.is_zero() {
            self.nonblocking_polls += 1;
        } else {
            self.blocking_polls += 1;
            self.deliver_all();
        }
    }

    fn flush(&mut self, _timeout: Duration) -> DaqResult<()> {
        self.deliver_all();
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.queue.len()
    }

    fn deliveries(&self) -> DeliveryCounts {
        DeliveryCounts {
            delivered: self.delivered.len() as u64,
            failed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaqError;

    fn config() -> BusSinkConfig {
        BusSinkConfig {
            enabled: true,
            brokers: "localhost:9092".to_string(),
            topic: "daq".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn run_number_prefix_is_host_endian() {
        let producer = MemoryProducer::new("daq", 8);
        let mut sink =
            BusSink::new(producer, &config(), CancelToken::new()).with_run_number(Some(7));
        sink.accept(&[1, 2, 3]).unwrap();
        sink.close().unwrap();

        let delivered = sink.producer().delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(&delivered[0][..8], &7u64.to_ne_bytes());
        assert_eq!(&delivered[0][8..], &[1, 2, 3]);
    }

    #[test]
    fn empty_payload_is_not_produced() {
        let mut sink = BusSink::new(MemoryProducer::new("daq", 8), &config(), CancelToken::new());
        sink.accept(&[]).unwrap();
        assert_eq!(sink.producer().enqueue_calls(), 0);
        assert_eq!(sink.stats().produced, 0);
    }

    #[test]
    fn every_enqueue_is_followed_by_a_poll() {
        let mut sink = BusSink::new(MemoryProducer::new("daq", 8), &config(), CancelToken::new());
        for _ in 0..3 {
            sink.accept(&[0xAA; 16]).unwrap();
        }
        assert_eq!(sink.producer().enqueue_calls(), 3);
        assert_eq!(sink.producer().nonblocking_polls(), 3);
        assert_eq!(sink.producer().in_flight(), 3);
    }

    #[test]
    fn queue_full_polls_then_retries() {
        let mut sink = BusSink::new(MemoryProducer::new("daq", 2), &config(), CancelToken::new());
        sink.accept(&[1]).unwrap();
        sink.accept(&[2]).unwrap();
        // Third message hits a full queue, the blocking poll drains it.
        sink.accept(&[3]).unwrap();

        let stats = sink.stats();
        assert_eq!(stats.produced, 3);
        assert_eq!(stats.queue_full, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(sink.producer().blocking_polls(), 1);
        assert_eq!(sink.producer().enqueue_calls(), 4);

        sink.close().unwrap();
        let delivered: Vec<u8> = sink.producer().delivered().iter().map(|m| m[0]).collect();
        assert_eq!(delivered, vec![1, 2, 3]);
    }

    #[test]
    fn other_errors_drop_without_retry() {
        let mut producer = MemoryProducer::new("daq", 8);
        producer.inject(EnqueueError::Other("message too large".to_string()));
        let mut sink = BusSink::new(producer, &config(), CancelToken::new());
        sink.accept(&[1, 2]).unwrap();
        sink.accept(&[3, 4]).unwrap();

        assert_eq!(sink.producer().enqueue_calls(), 2);
        assert_eq!(sink.stats().dropped, 1);
        assert_eq!(sink.stats().produced, 1);
        assert_eq!(sink.producer().blocking_polls(), 0);
    }

    /// Always full; cancels the token after a number of blocking polls.
    struct StuckProducer {
        cancel: CancelToken,
        polls_before_cancel: u32,
        blocking_polls: u32,
    }

    impl BusProducer for StuckProducer {
        fn topic(&self) -> &str {
            "stuck"
        }

        fn enqueue(&mut self, _message: &[u8]) -> Result<(), EnqueueError> {
            Err(EnqueueError::QueueFull)
        }

        fn poll(&mut self, timeout: Duration) {
            if !timeout.is_zero() {
                self.blocking_polls += 1;
                if self.blocking_polls >= self.polls_before_cancel {
                    self.cancel.cancel();
                }
            }
        }

        fn flush(&mut self, _timeout: Duration) -> DaqResult<()> {
            Err(DaqError::Bus("1 message(s) undelivered".to_string()))
        }

        fn in_flight(&self) -> usize {
            1
        }

        fn deliveries(&self) -> DeliveryCounts {
            DeliveryCounts::default()
        }
    }

    #[test]
    fn cancellation_ends_queue_full_retry() {
        let cancel = CancelToken::new();
        let producer = StuckProducer {
            cancel: cancel.clone(),
            polls_before_cancel: 3,
            blocking_polls: 0,
        };
        let mut sink = BusSink::new(producer, &config(), cancel);
        sink.accept(&[9; 8]).unwrap();

        let stats = sink.stats();
        assert_eq!(stats.queue_full, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.produced, 0);
        assert_eq!(sink.producer().blocking_polls, 3);

        // Flush failure is logged, not returned.
        assert!(sink.close().is_ok());
    }
}
