//! Connection table for flow tracking
//!
//! Flows are indexed twice: by conversation id (ingress) and by the
//! observed 4-tuple (egress). There is no background timer; every id-based
//! lookup sweeps closed and idle flows before answering, which is the only
//! bound on table growth.

use crate::config::TranslatorConfig;
use crate::fsm::{FlowShadow, TcpState};
use crate::options::TUNNEL_WINDOW_SCALE;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Flow key as seen on the IP/TCP side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
}

impl FlowKey {
    pub fn new(local: SocketAddrV4, remote: SocketAddrV4) -> Self {
        Self { local, remote }
    }
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.local, self.remote)
    }
}

/// Shadow record of one translated TCP connection
#[derive(Debug, Clone)]
pub struct Flow {
    pub conv: u32,
    pub key: FlowKey,
    pub shadow: FlowShadow,
    /// Window scale the local stack advertised in its SYN.
    pub window_scale: u8,
    pub created: Instant,
    pub last_activity: Instant,
    pub bytes_tx: u64,
    pub bytes_rx: u64,
}

impl Flow {
    fn new(conv: u32, key: FlowKey, now: Instant) -> Self {
        Self {
            conv,
            key,
            shadow: FlowShadow::new(),
            window_scale: TUNNEL_WINDOW_SCALE,
            created: now,
            last_activity: now,
            bytes_tx: 0,
            bytes_rx: 0,
        }
    }

    pub fn state(&self) -> TcpState {
        self.shadow.confirmed
    }

    pub fn local(&self) -> SocketAddrV4 {
        self.key.local
    }

    pub fn remote(&self) -> SocketAddrV4 {
        self.key.remote
    }

    /// Record activity at `now`; never moves the stamp backwards.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

/// Connection table
pub struct ConnectionTable {
    flows: HashMap<u32, Flow>,
    by_tuple: HashMap<FlowKey, u32>,
    closing_timeout: Duration,
    idle_timeout: Duration,
    evicted_total: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::with_config(&TranslatorConfig::default())
    }

    pub fn with_config(config: &TranslatorConfig) -> Self {
        Self::with_timeouts(config.closing_timeout(), config.idle_timeout())
    }

    pub fn with_timeouts(closing_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            flows: HashMap::new(),
            by_tuple: HashMap::new(),
            closing_timeout,
            idle_timeout,
            evicted_total: 0,
        }
    }

    /// Egress lookup; no side effects.
    pub fn find_by_tuple(&self, key: &FlowKey) -> Option<&Flow> {
        self.by_tuple.get(key).and_then(|conv| self.flows.get(conv))
    }

    pub fn find_by_tuple_mut(&mut self, key: &FlowKey) -> Option<&mut Flow> {
        let conv = self.by_tuple.get(key).copied()?;
        self.flows.get_mut(&conv)
    }

    /// Ingress lookup. Sweeps every other flow first, then refreshes the
    /// match's activity time. An id nobody holds just runs the sweep.
    pub fn find_by_id(&mut self, conv: u32, now: Instant) -> Option<&mut Flow> {
        self.sweep_others(conv, now);
        let flow = self.flows.get_mut(&conv)?;
        flow.touch(now);
        Some(flow)
    }

    /// The sweep half of [`Self::find_by_id`]: evicts expired flows other
    /// than `conv`, returning how many were removed.
    pub fn sweep_others(&mut self, conv: u32, now: Instant) -> usize {
        self.sweep_except(now, Some(conv))
    }

    /// Read-only id lookup; no sweep, no refresh.
    pub fn get(&self, conv: u32) -> Option<&Flow> {
        self.flows.get(&conv)
    }

    /// Mutable id lookup; no sweep, no refresh.
    pub fn get_mut(&mut self, conv: u32) -> Option<&mut Flow> {
        self.flows.get_mut(&conv)
    }

    /// Register a flow for `key`, returning the live one if it already exists.
    pub fn insert(&mut self, key: FlowKey, now: Instant) -> &mut Flow {
        let conv = match self.by_tuple.get(&key) {
            Some(&conv) => conv,
            None => {
                self.sweep(now);
                let conv = self.alloc_conv();
                self.by_tuple.insert(key, conv);
                debug!("tcpup flow {:08x} created: {} ({} live)", conv, key, self.flows.len() + 1);
                conv
            }
        };
        self.flows.entry(conv).or_insert_with(|| Flow::new(conv, key, now))
    }

    pub fn remove(&mut self, conv: u32) -> Option<Flow> {
        let flow = self.flows.remove(&conv)?;
        self.by_tuple.remove(&flow.key);
        Some(flow)
    }

    /// Evict closed and idle flows, returning how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.sweep_except(now, None)
    }

    fn sweep_except(&mut self, now: Instant, keep: Option<u32>) -> usize {
        let expired: Vec<u32> = self
            .flows
            .values()
            .filter(|flow| Some(flow.conv) != keep && self.is_expired(flow, now))
            .map(|flow| flow.conv)
            .collect();
        for conv in &expired {
            if let Some(flow) = self.remove(*conv) {
                trace!(
                    "tcpup flow {:08x} evicted in {}: {} (tx {} rx {})",
                    conv,
                    flow.state(),
                    flow.key,
                    flow.bytes_tx,
                    flow.bytes_rx
                );
            }
        }
        self.evicted_total += expired.len() as u64;
        expired.len()
    }

    fn is_expired(&self, flow: &Flow, now: Instant) -> bool {
        let idle = now.saturating_duration_since(flow.last_activity);
        match flow.state() {
            TcpState::Closed => true,
            state if state.is_closing() => idle >= self.closing_timeout,
            _ => idle >= self.idle_timeout,
        }
    }

    fn alloc_conv(&self) -> u32 {
        loop {
            let conv: u32 = rand::random();
            if !self.flows.contains_key(&conv) {
                return conv;
            }
        }
    }

    /// Flows removed by sweeps since creation.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flow> + '_ {
        self.flows.values()
    }

    pub fn clear(&mut self) {
        self.flows.clear();
        self.by_tuple.clear();
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}
