//! Audit outbox for the external append-only ledger.
//!
//! Engine operations commit their state and enqueue an event here; nothing in the
//! core ever talks to the ledger. A separate drain step delivers queued messages in
//! order through a [`LedgerSink`]. A failed delivery stays at the head of the queue
//! for the next drain until it has used up its attempts, then it is dropped.

use crate::events::{Event, EventId};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReceipt {
    pub transaction_id: String,
    pub sequence_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditMessage {
    pub event_id: EventId,
    pub kind: String,
    /// JSON-encoded event
    pub payload: String,
    pub attempts: u32,
    pub enqueued_at: Timestamp,
}

/// Destination for audit messages, e.g. a consensus-service topic.
pub trait LedgerSink {
    fn submit_message(&mut self, topic_id: &str, payload: &str) -> Result<AuditReceipt, AuditError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditOutbox {
    pending: VecDeque<AuditMessage>,
    delivered_total: u64,
    dropped_total: u64,
    last_receipt: Option<AuditReceipt>,
}

impl AuditOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &AuditMessage> {
        self.pending.iter()
    }

    pub fn delivered_total(&self) -> u64 {
        self.delivered_total
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    pub fn last_receipt(&self) -> Option<&AuditReceipt> {
        self.last_receipt.as_ref()
    }

    pub fn enqueue(&mut self, event: &Event) -> Result<(), AuditError> {
        let payload = serde_json::to_string(event).map_err(|e| AuditError::Serialization(e.to_string()))?;
        self.pending.push_back(AuditMessage {
            event_id: event.id,
            kind: event.payload.kind().to_string(),
            payload,
            attempts: 0,
            enqueued_at: event.timestamp,
        });
        Ok(())
    }

    /// Delivers queued messages in order. Stops at the first failure so ordering holds.
    pub fn drain(&mut self, sink: &mut dyn LedgerSink, topic_id: &str, max_attempts: u32) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(message) = self.pending.front_mut() {
            match sink.submit_message(topic_id, &message.payload) {
                Ok(receipt) => {
                    debug!(
                        event_id = message.event_id.0,
                        kind = %message.kind,
                        sequence = receipt.sequence_number,
                        "audit message delivered"
                    );
                    self.last_receipt = Some(receipt);
                    self.delivered_total += 1;
                    report.delivered += 1;
                    self.pending.pop_front();
                }
                Err(err) => {
                    message.attempts += 1;
                    report.failed += 1;
                    if message.attempts >= max_attempts {
                        warn!(
                            event_id = message.event_id.0,
                            kind = %message.kind,
                            attempts = message.attempts,
                            error = %err,
                            "audit message dropped"
                        );
                        self.dropped_total += 1;
                        report.dropped += 1;
                        self.pending.pop_front();
                        continue;
                    }
                    warn!(
                        event_id = message.event_id.0,
                        attempts = message.attempts,
                        error = %err,
                        "audit delivery failed, will retry"
                    );
                    break;
                }
            }
        }
        report
    }
}

/// In-process ledger. Records every delivered message; can be told to fail.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    pub messages: Vec<(String, String, AuditReceipt)>,
    next_sequence: u64,
    fail_next: u32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` submissions fail.
    pub fn fail_next(&mut self, count: u32) {
        self.fail_next = count;
    }
}

impl LedgerSink for MemoryLedger {
    fn submit_message(&mut self, topic_id: &str, payload: &str) -> Result<AuditReceipt, AuditError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(AuditError::Unavailable(topic_id.to_string()));
        }
        self.next_sequence += 1;
        let receipt = AuditReceipt {
            transaction_id: format!("{}@{}", topic_id, self.next_sequence),
            sequence_number: self.next_sequence,
        };
        self.messages.push((topic_id.to_string(), payload.to_string(), receipt.clone()));
        Ok(receipt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    #[error("Ledger topic {0} unavailable")]
    Unavailable(String),

    #[error("Ledger rejected message: {0}")]
    Rejected(String),

    #[error("Cannot encode audit message: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use crate::types::AccountId;

    fn event(id: u64) -> Event {
        Event::new(
            EventId(id),
            Timestamp::from_millis(id as i64),
            EventPayload::MarginModeChanged {
                account_id: AccountId::new("0.0.7"),
                mode: crate::account::MarginMode::Isolated,
            },
        )
    }

    #[test]
    fn drains_in_order() {
        let mut outbox = AuditOutbox::new();
        outbox.enqueue(&event(1)).unwrap();
        outbox.enqueue(&event(2)).unwrap();

        let mut ledger = MemoryLedger::new();
        let report = outbox.drain(&mut ledger, "0.0.42", 3);
        assert_eq!(report.delivered, 2);
        assert!(outbox.is_empty());
        assert_eq!(ledger.messages.len(), 2);
        assert_eq!(ledger.messages[1].2.sequence_number, 2);
        assert_eq!(outbox.last_receipt().unwrap().sequence_number, 2);
    }

    #[test]
    fn failure_keeps_message_for_next_drain() {
        let mut outbox = AuditOutbox::new();
        outbox.enqueue(&event(1)).unwrap();
        outbox.enqueue(&event(2)).unwrap();

        let mut ledger = MemoryLedger::new();
        ledger.fail_next(1);
        let report = outbox.drain(&mut ledger, "0.0.42", 3);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(outbox.len(), 2);

        let report = outbox.drain(&mut ledger, "0.0.42", 3);
        assert_eq!(report.delivered, 2);
        assert!(outbox.is_empty());
    }

    #[test]
    fn message_dropped_after_max_attempts() {
        let mut outbox = AuditOutbox::new();
        outbox.enqueue(&event(1)).unwrap();
        outbox.enqueue(&event(2)).unwrap();

        let mut ledger = MemoryLedger::new();
        ledger.fail_next(2);
        outbox.drain(&mut ledger, "0.0.42", 2);
        // second attempt exhausts the first message, the second one then goes through
        let report = outbox.drain(&mut ledger, "0.0.42", 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(outbox.dropped_total(), 1);
        assert!(outbox.is_empty());
    }
}
