//! Block Sender (§4.H): chunking, pacing and NACK-driven retransmission.
//!
//! Pacing delays are real wall-clock gaps on a cooperative single-threaded
//! loop, so the chunked send is a resumable step function (`pump`) rather
//! than a blocking sleep — the caller's main loop stays responsive to
//! inbound frames between chunks, the same shape the session layer uses
//! for its own waits.

use std::collections::VecDeque;

use mqttsn_core::chunk::{parse_nack, ChunkHeader};
use mqttsn_core::QoS;

const RETRANSMIT_DELAY_MS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendAction {
    /// A chunk is ready to publish now.
    SendChunk { topic_id: u16, qos: QoS, bytes: Vec<u8> },
    /// Nothing to send yet; caller should poll again no earlier than `retry_at_ms`.
    Wait { retry_at_ms: u32 },
    /// No transfer in progress and nothing queued.
    Idle,
}

struct ActiveTransfer {
    block_id: u16,
    topic_id: u16,
    qos: QoS,
    payload: Vec<u8>,
    chunk_payload_size: usize,
    total_parts: u16,
    next_initial_part: Option<u16>,
    chunks_sent_since_pause: u32,
    next_send_allowed: u32,
}

pub struct BlockSender {
    inter_chunk_delay_ms: u32,
    every_n_chunks: u32,
    burst_pause_ms: u32,
    transfer: Option<ActiveTransfer>,
    pending_retransmits: VecDeque<u16>,
    next_retransmit_allowed: u32,
}

impl BlockSender {
    pub fn new(inter_chunk_delay_ms: u32, every_n_chunks: u32, burst_pause_ms: u32) -> Self {
        BlockSender {
            inter_chunk_delay_ms,
            every_n_chunks,
            burst_pause_ms,
            transfer: None,
            pending_retransmits: VecDeque::new(),
            next_retransmit_allowed: 0,
        }
    }

    /// Begin a new transfer, discarding any previous one.
    pub fn start(&mut self, block_id: u16, topic_id: u16, qos: QoS, payload: Vec<u8>, chunk_payload_size: usize, now: u32) {
        let total_parts = ((payload.len() + chunk_payload_size - 1) / chunk_payload_size).max(1) as u16;
        self.transfer = Some(ActiveTransfer {
            block_id,
            topic_id,
            qos,
            payload,
            chunk_payload_size,
            total_parts,
            next_initial_part: Some(1),
            chunks_sent_since_pause: 0,
            next_send_allowed: now,
        });
        self.pending_retransmits.clear();
    }

    pub fn reset(&mut self) {
        self.transfer = None;
        self.pending_retransmits.clear();
    }

    pub fn is_active(&self) -> bool {
        self.transfer.is_some()
    }

    fn build_chunk(transfer: &ActiveTransfer, part_num: u16) -> Vec<u8> {
        let offset = (part_num as usize - 1) * transfer.chunk_payload_size;
        let end = (offset + transfer.chunk_payload_size).min(transfer.payload.len());
        let data = &transfer.payload[offset..end];

        let header = ChunkHeader {
            block_id: transfer.block_id,
            part_num,
            total_parts: transfer.total_parts,
            data_len: data.len() as u16,
        };

        let mut bytes = Vec::with_capacity(8 + data.len());
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(data);
        bytes
    }

    /// Advance the transfer by at most one chunk. Call repeatedly from the
    /// main loop; returns `Wait` when pacing forbids sending right now.
    pub fn pump(&mut self, now: u32) -> SendAction {
        if let Some(part) = self.pending_retransmits.front().copied() {
            if now < self.next_retransmit_allowed {
                return SendAction::Wait {
                    retry_at_ms: self.next_retransmit_allowed,
                };
            }
            let transfer = match &self.transfer {
                Some(t) => t,
                None => {
                    self.pending_retransmits.clear();
                    return SendAction::Idle;
                }
            };
            let bytes = Self::build_chunk(transfer, part);
            let topic_id = transfer.topic_id;
            self.pending_retransmits.pop_front();
            self.next_retransmit_allowed = now + RETRANSMIT_DELAY_MS;
            return SendAction::SendChunk {
                topic_id,
                qos: QoS::Zero,
                bytes,
            };
        }

        let transfer = match &mut self.transfer {
            Some(t) => t,
            None => return SendAction::Idle,
        };

        let part = match transfer.next_initial_part {
            Some(p) => p,
            None => return SendAction::Idle,
        };

        if now < transfer.next_send_allowed {
            return SendAction::Wait {
                retry_at_ms: transfer.next_send_allowed,
            };
        }

        let bytes = Self::build_chunk(transfer, part);
        let topic_id = transfer.topic_id;
        let qos = transfer.qos;

        transfer.next_initial_part = if part >= transfer.total_parts {
            None
        } else {
            Some(part + 1)
        };
        transfer.chunks_sent_since_pause += 1;

        transfer.next_send_allowed = if transfer.chunks_sent_since_pause >= self.every_n_chunks {
            transfer.chunks_sent_since_pause = 0;
            now + self.burst_pause_ms
        } else {
            now + self.inter_chunk_delay_ms
        };

        SendAction::SendChunk { topic_id, qos, bytes }
    }

    /// Parse and accept a NACK. Returns `true` if it matched the active
    /// transfer's block id and queued chunks for retransmission.
    pub fn handle_nack(&mut self, text: &str) -> bool {
        let nack = match parse_nack(text) {
            Some(n) => n,
            None => return false,
        };
        let transfer = match &self.transfer {
            Some(t) => t,
            None => return false,
        };
        if transfer.block_id != nack.block_id {
            return false;
        }
        for part in nack.chunks {
            if part >= 1 && part <= transfer.total_parts && !self.pending_retransmits.contains(&part) {
                self.pending_retransmits.push_back(part);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_chunk_transfer_sends_in_order() {
        let mut sender = BlockSender::new(10, 20, 50);
        let payload = vec![0xABu8; 130];
        sender.start(1, 7, QoS::One, payload.clone(), 120, 0);

        let first = sender.pump(0);
        match first {
            SendAction::SendChunk { bytes, .. } => {
                let header = ChunkHeader::decode(&bytes).unwrap();
                assert_eq!(header.part_num, 1);
                assert_eq!(header.total_parts, 2);
                assert_eq!(header.data_len, 120);
            }
            other => panic!("expected SendChunk, got {:?}", other),
        }

        let second = sender.pump(10);
        match second {
            SendAction::SendChunk { bytes, .. } => {
                let header = ChunkHeader::decode(&bytes).unwrap();
                assert_eq!(header.part_num, 2);
                assert_eq!(header.data_len, 10);
            }
            other => panic!("expected SendChunk, got {:?}", other),
        }

        assert_eq!(sender.pump(20), SendAction::Idle);
    }

    #[test]
    fn pacing_forces_wait_before_interval_elapses() {
        let mut sender = BlockSender::new(10, 20, 50);
        sender.start(1, 7, QoS::Zero, vec![0u8; 300], 120, 0);
        sender.pump(0);
        match sender.pump(5) {
            SendAction::Wait { retry_at_ms } => assert_eq!(retry_at_ms, 10),
            other => panic!("expected Wait, got {:?}", other),
        }
    }

    #[test]
    fn nack_queues_requested_chunks_for_retransmission() {
        let mut sender = BlockSender::new(10, 20, 50);
        sender.start(5, 7, QoS::Zero, vec![0u8; 600], 120, 0);
        while sender.pump(0) != SendAction::Idle {}

        assert!(sender.handle_nack("NACK:BLOCK=5,CHUNKS=3"));
        match sender.pump(1_000) {
            SendAction::SendChunk { bytes, qos, .. } => {
                let header = ChunkHeader::decode(&bytes).unwrap();
                assert_eq!(header.part_num, 3);
                assert_eq!(qos, QoS::Zero);
            }
            other => panic!("expected SendChunk, got {:?}", other),
        }
    }

    #[test]
    fn nack_for_wrong_block_id_is_ignored() {
        let mut sender = BlockSender::new(10, 20, 50);
        sender.start(5, 7, QoS::Zero, vec![0u8; 600], 120, 0);
        assert!(!sender.handle_nack("NACK:BLOCK=6,CHUNKS=1"));
    }

    #[test]
    fn reset_releases_cached_payload() {
        let mut sender = BlockSender::new(10, 20, 50);
        sender.start(5, 7, QoS::Zero, vec![0u8; 600], 120, 0);
        sender.reset();
        assert!(!sender.is_active());
        assert_eq!(sender.pump(0), SendAction::Idle);
    }
}
