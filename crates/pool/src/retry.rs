//! Per-target retry controller (C4, §4.4).

use dashmap::DashMap;
use protocol::{CommunicationData, InfoType};
use tokio_util::sync::CancellationToken;

use crate::priority_table::PriorityTable;

/// A queued outbound message plus its retry bookkeeping.
#[derive(Clone, Debug)]
pub struct OutboundEnvelope {
    /// The message to (re)send.
    pub data: CommunicationData,
    /// Number of retry attempts already made.
    pub retry_count: u32,
}

impl OutboundEnvelope {
    /// Wraps a freshly-built message with a zeroed retry count.
    #[must_use]
    pub fn new(data: CommunicationData) -> Self {
        OutboundEnvelope { data, retry_count: 0 }
    }
}

/// Acknowledgements and file-completion acknowledgements are terminal by
/// definition: retransmitting them would only prompt the peer to answer
/// with more of the same.
#[must_use]
pub fn is_non_retryable(data: &CommunicationData) -> bool {
    matches!(data.info_type, InfoType::Ack | InfoType::FileCompleteAck)
}

/// Decides the fate of a failed outbound send: retry after a cancellable
/// delay, or give up and file the envelope under its target's resume queue.
///
/// Keyed by `target_id` (§4.4) rather than by session, so an envelope
/// survives the session that queued it and can be redelivered once its
/// target reconnects.
pub struct RetryController {
    table: PriorityTable,
    resume_queues: DashMap<u32, Vec<OutboundEnvelope>>,
}

impl RetryController {
    /// Builds a controller using `table` for per-priority retry bounds.
    #[must_use]
    pub fn new(table: PriorityTable) -> Self {
        RetryController {
            table,
            resume_queues: DashMap::new(),
        }
    }

    /// Handles one failed send attempt for `envelope`.
    ///
    /// Returns `Some(envelope)` with an incremented `retry_count` once the
    /// retry delay has elapsed, for the caller to re-enqueue on the same
    /// tier. Returns `None` when the message is not retryable, when the
    /// delay was cut short by `cancel`, or once `max_retries` is exhausted
    /// (in which case the envelope is filed on its target's resume queue).
    pub async fn on_send_failure(
        &self,
        mut envelope: OutboundEnvelope,
        cancel: &CancellationToken,
    ) -> Option<OutboundEnvelope> {
        if is_non_retryable(&envelope.data) {
            return None;
        }

        let policy = self.table.policy(envelope.data.priority);
        if envelope.retry_count >= policy.max_retries {
            let target_id = envelope.data.target_id;
            tracing::warn!(
                target_id,
                retry_count = envelope.retry_count,
                priority = ?envelope.data.priority,
                "retries exhausted, moving envelope to resume queue"
            );
            self.resume_queues
                .entry(target_id)
                .or_default()
                .push(envelope);
            return None;
        }

        tokio::select! {
            () = cancel.cancelled() => None,
            () = tokio::time::sleep(policy.retry_interval) => {
                envelope.retry_count += 1;
                Some(envelope)
            }
        }
    }

    /// Removes and returns every envelope queued for `target_id`, for
    /// redelivery once that target reconnects.
    pub fn drain_resume_queue(&self, target_id: u32) -> Vec<OutboundEnvelope> {
        self.resume_queues
            .remove(&target_id)
            .map(|(_, envelopes)| envelopes)
            .unwrap_or_default()
    }

    /// Number of envelopes currently parked for `target_id`.
    #[must_use]
    pub fn resume_queue_len(&self, target_id: u32) -> usize {
        self.resume_queues
            .get(&target_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::DataPriority;
    use std::time::Duration;

    fn ack() -> CommunicationData {
        let mut data = CommunicationData::default();
        data.info_type = InfoType::Ack;
        data
    }

    fn outbound(priority: DataPriority, target_id: u32) -> CommunicationData {
        let mut data = CommunicationData::default();
        data.info_type = InfoType::CtsNormal;
        data.priority = priority;
        data.target_id = target_id;
        data
    }

    #[test]
    fn acks_and_file_complete_acks_are_never_retried() {
        assert!(is_non_retryable(&ack()));
        let mut complete_ack = CommunicationData::default();
        complete_ack.info_type = InfoType::FileCompleteAck;
        assert!(is_non_retryable(&complete_ack));

        let normal = outbound(DataPriority::High, 1);
        assert!(!is_non_retryable(&normal));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_moves_the_envelope_to_the_resume_queue() {
        let table = PriorityTable::from_processor_count(1);
        let controller = RetryController::new(table);
        let cancel = CancellationToken::new();

        let mut envelope = OutboundEnvelope::new(outbound(DataPriority::High, 7));
        let max_retries = table.policy(DataPriority::High).max_retries;

        for _ in 0..max_retries {
            envelope = controller
                .on_send_failure(envelope, &cancel)
                .await
                .expect("should retry until exhausted");
        }

        assert_eq!(controller.resume_queue_len(7), 0);
        let result = controller.on_send_failure(envelope, &cancel).await;
        assert!(result.is_none());
        assert_eq!(controller.resume_queue_len(7), 1);

        let drained = controller.drain_resume_queue(7);
        assert_eq!(drained.len(), 1);
        assert_eq!(controller.resume_queue_len(7), 0);
    }

    #[tokio::test]
    async fn cancellation_cuts_the_retry_delay_short() {
        let table = PriorityTable::from_processor_count(1);
        let controller = RetryController::new(table);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let envelope = OutboundEnvelope::new(outbound(DataPriority::Low, 3));
        let result = controller.on_send_failure(envelope, &cancel).await;
        assert!(result.is_none());
        assert_eq!(controller.resume_queue_len(3), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acks_never_enter_a_resume_queue() {
        let table = PriorityTable::from_processor_count(1);
        let controller = RetryController::new(table);
        let cancel = CancellationToken::new();

        let mut ack_envelope = OutboundEnvelope::new(ack());
        ack_envelope.data.target_id = 9;
        let result = controller.on_send_failure(ack_envelope, &cancel).await;
        assert!(result.is_none());
        assert_eq!(controller.resume_queue_len(9), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(controller.resume_queue_len(9), 0);
    }
}
