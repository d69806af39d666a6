//! QoS Engine: in-flight table, retransmission, QoS 1/2 handshakes and DUP
//! suppression (§4.F). The in-flight table is a dense slot map (slab-style)
//! rather than a `HashMap`, mirroring this codebase's existing
//! message-tracking structure: lookup and retransmission scans stay
//! allocation-free once the table is warm.

use slab::Slab;

use mqttsn_core::QoS;

const HELD_QOS2_CAPACITY: usize = 16;
const DISPATCHED_QOS1_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InflightState {
    AwaitingPubAck,
    AwaitingPubRec,
    AwaitingPubComp,
}

#[derive(Debug, Clone)]
pub struct InflightEntry {
    pub msg_id: u16,
    pub qos: QoS,
    pub topic_id: u16,
    pub payload: Vec<u8>,
    pub send_time: u32,
    pub retry_count: u32,
    pub state: InflightState,
}

/// A bounded ring of recently-seen `(topic_id, msg_id)` pairs, used to
/// detect duplicates without unbounded growth. Allocated once, at session
/// start, per §5's "steady-state must not allocate" rule.
#[derive(Debug)]
struct RecentIds {
    seen: Vec<(u16, u16)>,
    capacity: usize,
    next: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        RecentIds {
            seen: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    fn contains(&self, key: (u16, u16)) -> bool {
        self.seen.contains(&key)
    }

    fn remember(&mut self, key: (u16, u16)) {
        if self.contains(key) {
            return;
        }
        if self.seen.len() < self.capacity {
            self.seen.push(key);
        } else {
            self.seen[self.next] = key;
            self.next = (self.next + 1) % self.capacity;
        }
    }

    fn forget(&mut self, key: (u16, u16)) {
        self.seen.retain(|&k| k != key);
    }

    /// PUBREL on the wire carries only a message-id, not a topic-id, so
    /// releasing a QoS 2 hold can only match on the second tuple field.
    fn contains_msg_id(&self, msg_id: u16) -> bool {
        self.seen.iter().any(|&(_, id)| id == msg_id)
    }

    fn forget_msg_id(&mut self, msg_id: u16) {
        self.seen.retain(|&(_, id)| id != msg_id);
    }
}

/// Outcome of receiving an inbound PUBLISH, telling the caller what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    /// Dispatch to the application; no acknowledgment required (QoS 0).
    Dispatch,
    /// Dispatch to the application, then send PUBACK(accepted).
    DispatchAndAck,
    /// Dispatch to the application, then send PUBREC (first QoS 2 receipt).
    DispatchAndRec,
    /// Already acknowledged/held; send the ack again but do not re-dispatch.
    AckOnly,
    /// Already held awaiting PUBREL; send PUBREC again, no re-dispatch.
    RecOnly,
}

pub struct QosEngine {
    inflight: Slab<InflightEntry>,
    held_qos2: RecentIds,
    dispatched_qos1: RecentIds,
}

impl Default for QosEngine {
    fn default() -> Self {
        QosEngine {
            inflight: Slab::with_capacity(10),
            held_qos2: RecentIds::new(HELD_QOS2_CAPACITY),
            dispatched_qos1: RecentIds::new(DISPATCHED_QOS1_CAPACITY),
        }
    }
}

pub type InflightKey = usize;

impl QosEngine {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- outbound ----

    pub fn track_outbound(
        &mut self,
        msg_id: u16,
        qos: QoS,
        topic_id: u16,
        payload: Vec<u8>,
        now: u32,
    ) -> InflightKey {
        let state = if qos == QoS::Two {
            InflightState::AwaitingPubRec
        } else {
            InflightState::AwaitingPubAck
        };
        self.inflight.insert(InflightEntry {
            msg_id,
            qos,
            topic_id,
            payload,
            send_time: now,
            retry_count: 0,
            state,
        })
    }

    fn find_by_msg_id(&self, msg_id: u16, state: InflightState) -> Option<InflightKey> {
        self.inflight
            .iter()
            .find(|(_, e)| e.msg_id == msg_id && e.state == state)
            .map(|(k, _)| k)
    }

    /// A PUBACK arrived for `msg_id`. Returns the removed entry, or `None`
    /// if there is no matching `AwaitingPubAck` entry (already acked or unknown).
    pub fn on_puback(&mut self, msg_id: u16) -> Option<InflightEntry> {
        let key = self.find_by_msg_id(msg_id, InflightState::AwaitingPubAck)?;
        Some(self.inflight.remove(key))
    }

    /// A PUBREC arrived for `msg_id`. Advances the entry to `AwaitingPubComp`
    /// and returns its key so the caller can emit PUBREL.
    pub fn on_pubrec(&mut self, msg_id: u16) -> Option<InflightKey> {
        let key = self.find_by_msg_id(msg_id, InflightState::AwaitingPubRec)?;
        self.inflight[key].state = InflightState::AwaitingPubComp;
        Some(key)
    }

    pub fn on_pubcomp(&mut self, msg_id: u16) -> Option<InflightEntry> {
        let key = self.find_by_msg_id(msg_id, InflightState::AwaitingPubComp)?;
        Some(self.inflight.remove(key))
    }

    /// Cancel an inflight entry synchronously; no local ack is synthesized.
    pub fn cancel(&mut self, msg_id: u16) -> bool {
        let key = self
            .inflight
            .iter()
            .find(|(_, e)| e.msg_id == msg_id)
            .map(|(k, _)| k);
        match key {
            Some(k) => {
                self.inflight.remove(k);
                true
            }
            None => false,
        }
    }

    /// Entries due for retransmission: `now - send_time >= timeout_ms`.
    /// Bumps `retry_count` and `send_time` for every entry returned, as if
    /// the retransmit had already happened; `retry_count_max` (`None` =
    /// unbounded) entries that would exceed the budget are removed instead
    /// and returned via the `expired` slot of the tuple.
    pub fn due_for_retransmit(
        &mut self,
        now: u32,
        timeout_ms: u32,
        retry_count_max: Option<u32>,
    ) -> (Vec<InflightEntry>, Vec<InflightEntry>) {
        let due_keys: Vec<InflightKey> = self
            .inflight
            .iter()
            .filter(|(_, e)| mqttsn_core::clock::elapsed_since(now, e.send_time) >= timeout_ms)
            .map(|(k, _)| k)
            .collect();

        let mut retransmit = Vec::new();
        let mut expired = Vec::new();

        for key in due_keys {
            let exceeded = retry_count_max
                .map(|max| self.inflight[key].retry_count >= max)
                .unwrap_or(false);

            if exceeded {
                expired.push(self.inflight.remove(key));
            } else {
                let entry = &mut self.inflight[key];
                entry.retry_count += 1;
                entry.send_time = now;
                retransmit.push(entry.clone());
            }
        }

        (retransmit, expired)
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    // ---- inbound ----

    pub fn on_inbound_publish(&mut self, qos: QoS, topic_id: u16, msg_id: u16) -> InboundAction {
        match qos {
            QoS::Zero | QoS::MinusOne => InboundAction::Dispatch,
            QoS::One => {
                let key = (topic_id, msg_id);
                if self.dispatched_qos1.contains(key) {
                    InboundAction::AckOnly
                } else {
                    self.dispatched_qos1.remember(key);
                    InboundAction::DispatchAndAck
                }
            }
            QoS::Two => {
                let key = (topic_id, msg_id);
                if self.held_qos2.contains(key) {
                    InboundAction::RecOnly
                } else {
                    self.held_qos2.remember(key);
                    InboundAction::DispatchAndRec
                }
            }
        }
    }

    /// A PUBREL arrived for `msg_id`: release the hold. Returns `true` if a
    /// held entry existed (PUBCOMP should be sent either way per the
    /// handshake, but this tells the caller whether it was a meaningful
    /// release or a stray PUBREL). PUBREL carries no topic-id on the wire,
    /// so the hold is matched by message-id alone.
    pub fn on_pubrel(&mut self, msg_id: u16) -> bool {
        let existed = self.held_qos2.contains_msg_id(msg_id);
        self.held_qos2.forget_msg_id(msg_id);
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos1_outbound_round_trip() {
        let mut qos = QosEngine::new();
        let key = qos.track_outbound(1, QoS::One, 7, b"hi".to_vec(), 0);
        assert_eq!(qos.inflight_len(), 1);
        let entry = qos.on_puback(1).unwrap();
        assert_eq!(entry.topic_id, 7);
        assert_eq!(qos.inflight_len(), 0);
        let _ = key;
    }

    #[test]
    fn qos1_retransmit_after_timeout_then_terminates() {
        let mut qos = QosEngine::new();
        qos.track_outbound(1, QoS::One, 7, b"hi".to_vec(), 0);

        let (due, expired) = qos.due_for_retransmit(500, 1_000, Some(3));
        assert!(due.is_empty() && expired.is_empty());

        let (due, expired) = qos.due_for_retransmit(1_000, 1_000, Some(3));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].retry_count, 1);
        assert!(expired.is_empty());

        for retry in 2..=3u32 {
            let (due, _) = qos.due_for_retransmit(1_000 * retry as u32 + 1_000, 1_000, Some(3));
            assert_eq!(due.len(), 1);
        }

        let (_, expired) = qos.due_for_retransmit(10_000, 1_000, Some(3));
        assert_eq!(expired.len(), 1);
        assert_eq!(qos.inflight_len(), 0);
    }

    #[test]
    fn qos2_outbound_handshake_sequence() {
        let mut qos = QosEngine::new();
        qos.track_outbound(5, QoS::Two, 7, b"hi".to_vec(), 0);
        let key = qos.on_pubrec(5).unwrap();
        assert_eq!(qos.inflight[key].state, InflightState::AwaitingPubComp);
        let entry = qos.on_pubcomp(5).unwrap();
        assert_eq!(entry.msg_id, 5);
        assert_eq!(qos.inflight_len(), 0);
    }

    #[test]
    fn qos1_inbound_duplicate_is_acked_not_redispatched() {
        let mut qos = QosEngine::new();
        assert_eq!(
            qos.on_inbound_publish(QoS::One, 7, 1),
            InboundAction::DispatchAndAck
        );
        assert_eq!(qos.on_inbound_publish(QoS::One, 7, 1), InboundAction::AckOnly);
    }

    #[test]
    fn qos2_inbound_first_receipt_dispatches_duplicate_does_not() {
        let mut qos = QosEngine::new();
        assert_eq!(
            qos.on_inbound_publish(QoS::Two, 7, 9),
            InboundAction::DispatchAndRec
        );
        assert_eq!(qos.on_inbound_publish(QoS::Two, 7, 9), InboundAction::RecOnly);
        assert!(qos.on_pubrel(9));
        assert!(!qos.on_pubrel(9));
    }

    #[test]
    fn cancel_removes_without_synthesizing_ack() {
        let mut qos = QosEngine::new();
        qos.track_outbound(2, QoS::One, 7, b"hi".to_vec(), 0);
        assert!(qos.cancel(2));
        assert_eq!(qos.inflight_len(), 0);
        assert!(qos.on_puback(2).is_none());
    }
}
