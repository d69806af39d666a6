//! Block Receiver (§4.I): reassembly with bit-mask tracking, completion
//! detection and NACK emission.

use mqttsn_core::chunk::{encode_nack, ChunkHeader, HEADER_LEN};
use mqttsn_core::clock::elapsed_since;
use mqttsn_core::sniff::{sniff, FileType};

const DEFAULT_MAX_CHUNKS: u16 = 1000;
const DEFAULT_RECEIVE_BUDGET_BYTES: usize = 55_000;
const DEFAULT_CHUNK_PAYLOAD_SIZE: usize = 120;
const QUIET_WINDOW_MS: u32 = 3_000;
const IDLE_TIMEOUT_MS: u32 = 60_000;
const NO_PROGRESS_INITIAL_COMPLETE_MS: u32 = 10_000;
const EXPECTED_MS_PER_CHUNK: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Receiving,
    InitialComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Accepted,
    Completed { size: usize, file_type: FileType },
    Rejected(&'static str),
}

struct Reassembly {
    block_id: u16,
    total_parts: u16,
    chunk_payload_size: usize,
    mask: Vec<bool>,
    received_count: u16,
    buffer: Vec<u8>,
    last_part_len: usize,
    highest_part_seen: u16,
    last_update: u32,
    phase: Phase,
}

pub struct BlockReceiver {
    max_chunks: u16,
    receive_budget_bytes: usize,
    chunk_payload_size: usize,
    state: Option<Reassembly>,
}

impl BlockReceiver {
    pub fn new() -> Self {
        BlockReceiver {
            max_chunks: DEFAULT_MAX_CHUNKS,
            receive_budget_bytes: DEFAULT_RECEIVE_BUDGET_BYTES,
            chunk_payload_size: DEFAULT_CHUNK_PAYLOAD_SIZE,
            state: None,
        }
    }

    pub fn with_limits(max_chunks: u16, receive_budget_bytes: usize, chunk_payload_size: usize) -> Self {
        BlockReceiver {
            max_chunks,
            receive_budget_bytes,
            chunk_payload_size,
            state: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.as_ref().map(|s| s.phase).unwrap_or(Phase::Idle)
    }

    pub fn block_id(&self) -> Option<u16> {
        self.state.as_ref().map(|s| s.block_id)
    }

    pub fn total_parts(&self) -> Option<u16> {
        self.state.as_ref().map(|s| s.total_parts)
    }

    /// Start a fresh reassembly using the configured nominal chunk size
    /// (shared with the sender, §6) rather than inferring it from whichever
    /// chunk happens to arrive first — UDP may reorder delivery and the final
    /// chunk is legitimately shorter than the nominal size. Rejects if the
    /// memory required would exceed `receive_budget_bytes`.
    fn start(&mut self, header: &ChunkHeader, now: u32) -> Result<(), &'static str> {
        let chunk_payload_size = self.chunk_payload_size;
        let mask_bits = (header.total_parts as usize + 7) / 8;
        let required = header.total_parts as usize * chunk_payload_size + mask_bits;

        if required > self.receive_budget_bytes {
            return Err("receive budget exceeded");
        }

        self.state = Some(Reassembly {
            block_id: header.block_id,
            total_parts: header.total_parts,
            chunk_payload_size,
            mask: vec![false; header.total_parts as usize],
            received_count: 0,
            buffer: vec![0u8; header.total_parts as usize * chunk_payload_size],
            last_part_len: 0,
            highest_part_seen: 0,
            last_update: now,
            phase: Phase::Receiving,
        });
        Ok(())
    }

    /// Validate and store one chunk. `bytes` begins with the 8-byte header.
    pub fn process_chunk(&mut self, bytes: &[u8], now: u32) -> ChunkOutcome {
        if bytes.len() < HEADER_LEN {
            return ChunkOutcome::Rejected("frame shorter than chunk header");
        }
        let header = match ChunkHeader::decode(bytes) {
            Some(h) => h,
            None => return ChunkOutcome::Rejected("malformed chunk header"),
        };

        if header.part_num == 0 || header.part_num > header.total_parts {
            return ChunkOutcome::Rejected("part number out of range");
        }
        if header.total_parts > self.max_chunks {
            return ChunkOutcome::Rejected("total parts exceeds max_chunks");
        }

        let data = &bytes[HEADER_LEN..];
        if data.len() != header.data_len as usize {
            return ChunkOutcome::Rejected("data length does not match frame");
        }

        let is_new_block = self.state.as_ref().map_or(true, |s| s.block_id != header.block_id);
        if is_new_block {
            if let Err(reason) = self.start(&header, now) {
                return ChunkOutcome::Rejected(reason);
            }
        }

        let state = self.state.as_mut().expect("just initialized above");

        if data.len() > state.chunk_payload_size {
            return ChunkOutcome::Rejected("chunk payload exceeds nominal chunk size");
        }

        let idx = header.part_num as usize - 1;
        let offset = idx * state.chunk_payload_size;
        state.buffer[offset..offset + data.len()].copy_from_slice(data);

        if header.part_num == header.total_parts {
            state.last_part_len = data.len();
        }
        if !state.mask[idx] {
            state.mask[idx] = true;
            state.received_count += 1;
        }
        state.highest_part_seen = state.highest_part_seen.max(header.part_num);
        state.last_update = now;

        if state.received_count == state.total_parts {
            let total_size = (state.total_parts as usize - 1) * state.chunk_payload_size + state.last_part_len;
            state.phase = Phase::InitialComplete;
            return ChunkOutcome::Completed {
                size: total_size,
                file_type: sniff(&state.buffer[..total_size]),
            };
        }

        ChunkOutcome::Accepted
    }

    /// The reassembled buffer once complete, truncated to the real payload size.
    pub fn completed_buffer(&self) -> Option<&[u8]> {
        let state = self.state.as_ref()?;
        if state.received_count != state.total_parts {
            return None;
        }
        let total_size = (state.total_parts as usize - 1) * state.chunk_payload_size + state.last_part_len;
        Some(&state.buffer[..total_size])
    }

    fn missing_parts(state: &Reassembly) -> Vec<u16> {
        (1..=state.highest_part_seen)
            .filter(|&p| !state.mask[p as usize - 1])
            .collect()
    }

    /// Build a NACK string for the missing parts, or `None` if a NACK would
    /// be a no-op right now (§4.I).
    pub fn request_missing(&self, now: u32) -> Option<String> {
        let state = self.state.as_ref()?;

        if state.received_count == state.total_parts || state.highest_part_seen == 0 {
            return None;
        }
        if elapsed_since(now, state.last_update) < QUIET_WINDOW_MS {
            return None;
        }

        let missing = Self::missing_parts(state);
        if missing.is_empty() {
            return None;
        }

        Some(encode_nack(state.block_id, &missing))
    }

    /// Periodic housekeeping: times out an idle transfer, or raises the
    /// "initial transfer complete" marker on its three-condition heuristic.
    pub fn tick(&mut self, now: u32) {
        let state = match &self.state {
            Some(s) => s,
            None => return,
        };

        if elapsed_since(now, state.last_update) >= IDLE_TIMEOUT_MS {
            self.state = None;
            return;
        }

        let no_progress = elapsed_since(now, state.last_update) >= NO_PROGRESS_INITIAL_COMPLETE_MS;
        let expected_duration = u32::from(state.total_parts) * EXPECTED_MS_PER_CHUNK;
        let enough_time_elapsed = now >= expected_duration;
        let half_received = u32::from(state.received_count) * 2 >= u32::from(state.total_parts);

        if state.phase == Phase::Receiving && no_progress && enough_time_elapsed && half_received {
            self.state.as_mut().unwrap().phase = Phase::InitialComplete;
        }
    }
}

impl Default for BlockReceiver {
    fn default() -> Self {
        Self::new()
    }
}
