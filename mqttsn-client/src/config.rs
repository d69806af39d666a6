//! Client configuration: a validated, builder-constructed struct. Building
//! never touches the network; invalid values are caught at [`ClientConfig::build`].

use std::net::IpAddr;

use crate::error::{Error, Result};

const CLIENT_ID_MAX_LEN: usize = 23;
const CHUNK_PAYLOAD_MIN: usize = 1;
const CHUNK_PAYLOAD_MAX: usize = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub gateway_ip: IpAddr,
    pub gateway_port: u16,
    pub client_id: String,
    pub keep_alive_sec: u16,
    pub clean_session: bool,
    pub chunk_payload_size: usize,
    pub max_chunks: u16,
    pub receive_budget_bytes: usize,
    pub qos1_retry_count: Option<u32>,
    pub qos1_retry_timeout_ms: u32,
    pub connack_timeout_ms: u32,
    pub inter_chunk_delay_ms: u32,
    pub every_n_chunks: u32,
    pub burst_pause_ms: u32,
    pub predefined_topics: &'static [(u16, &'static str)],
}

impl ClientConfig {
    pub const DEFAULT_KEEP_ALIVE_SEC: u16 = 60;
    pub const DEFAULT_CHUNK_PAYLOAD_SIZE: usize = 120;
    pub const DEFAULT_MAX_CHUNKS: u16 = 1000;
    pub const DEFAULT_RECEIVE_BUDGET_BYTES: usize = 55_000;
    pub const DEFAULT_QOS1_RETRY_COUNT: u32 = 3;
    pub const DEFAULT_QOS1_RETRY_TIMEOUT_MS: u32 = 1_000;
    pub const DEFAULT_CONNACK_TIMEOUT_MS: u32 = 5_000;
    pub const DEFAULT_INTER_CHUNK_DELAY_MS: u32 = 10;
    pub const DEFAULT_EVERY_N_CHUNKS: u32 = 20;
    pub const DEFAULT_BURST_PAUSE_MS: u32 = 50;

    pub fn new(gateway_ip: IpAddr, gateway_port: u16, client_id: impl Into<String>) -> Self {
        ClientConfig {
            gateway_ip,
            gateway_port,
            client_id: client_id.into(),
            keep_alive_sec: Self::DEFAULT_KEEP_ALIVE_SEC,
            clean_session: true,
            chunk_payload_size: Self::DEFAULT_CHUNK_PAYLOAD_SIZE,
            max_chunks: Self::DEFAULT_MAX_CHUNKS,
            receive_budget_bytes: Self::DEFAULT_RECEIVE_BUDGET_BYTES,
            qos1_retry_count: Some(Self::DEFAULT_QOS1_RETRY_COUNT),
            qos1_retry_timeout_ms: Self::DEFAULT_QOS1_RETRY_TIMEOUT_MS,
            connack_timeout_ms: Self::DEFAULT_CONNACK_TIMEOUT_MS,
            inter_chunk_delay_ms: Self::DEFAULT_INTER_CHUNK_DELAY_MS,
            every_n_chunks: Self::DEFAULT_EVERY_N_CHUNKS,
            burst_pause_ms: Self::DEFAULT_BURST_PAUSE_MS,
            predefined_topics: &[],
        }
    }

    pub fn with_keep_alive_sec(mut self, secs: u16) -> Self {
        self.keep_alive_sec = secs;
        self
    }

    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn with_chunk_payload_size(mut self, size: usize) -> Self {
        self.chunk_payload_size = size;
        self
    }

    pub fn with_max_chunks(mut self, n: u16) -> Self {
        self.max_chunks = n;
        self
    }

    pub fn with_receive_budget_bytes(mut self, bytes: usize) -> Self {
        self.receive_budget_bytes = bytes;
        self
    }

    /// `None` means unbounded retries.
    pub fn with_qos1_retry_count(mut self, count: Option<u32>) -> Self {
        self.qos1_retry_count = count;
        self
    }

    pub fn with_qos1_retry_timeout_ms(mut self, ms: u32) -> Self {
        self.qos1_retry_timeout_ms = ms;
        self
    }

    pub fn with_connack_timeout_ms(mut self, ms: u32) -> Self {
        self.connack_timeout_ms = ms;
        self
    }

    pub fn with_pacing(mut self, inter_chunk_delay_ms: u32, every_n_chunks: u32, burst_pause_ms: u32) -> Self {
        self.inter_chunk_delay_ms = inter_chunk_delay_ms;
        self.every_n_chunks = every_n_chunks;
        self.burst_pause_ms = burst_pause_ms;
        self
    }

    pub fn with_predefined_topics(mut self, table: &'static [(u16, &'static str)]) -> Self {
        self.predefined_topics = table;
        self
    }

    /// Validate and freeze the configuration. Called implicitly on first use
    /// by [`crate::pubsub::Client::connect`]; exposed directly for callers
    /// who want to fail fast at startup.
    pub fn build(self) -> Result<ClientConfig> {
        if self.client_id.is_empty() || self.client_id.len() > CLIENT_ID_MAX_LEN {
            return Err(Error::InvalidArgument("client_id must be 1..=23 bytes"));
        }
        if !(CHUNK_PAYLOAD_MIN..=CHUNK_PAYLOAD_MAX).contains(&self.chunk_payload_size) {
            return Err(Error::InvalidArgument("chunk_payload_size must be 1..=120"));
        }
        if self.max_chunks == 0 {
            return Err(Error::InvalidArgument("max_chunks must be non-zero"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn defaults_validate() {
        let cfg = ClientConfig::new(addr(), 1883, "pico_w").build();
        assert!(cfg.is_ok());
    }

    #[test]
    fn client_id_too_long_rejected() {
        let cfg = ClientConfig::new(addr(), 1883, "x".repeat(24)).build();
        assert_eq!(cfg, Err(Error::InvalidArgument("client_id must be 1..=23 bytes")));
    }

    #[test]
    fn chunk_payload_out_of_range_rejected() {
        let cfg = ClientConfig::new(addr(), 1883, "pico_w")
            .with_chunk_payload_size(200)
            .build();
        assert!(cfg.is_err());
    }

    #[test]
    fn builder_chains_override_defaults() {
        let cfg = ClientConfig::new(addr(), 1883, "pico_w")
            .with_keep_alive_sec(30)
            .with_clean_session(false)
            .build()
            .unwrap();
        assert_eq!(cfg.keep_alive_sec, 30);
        assert!(!cfg.clean_session);
    }
}
