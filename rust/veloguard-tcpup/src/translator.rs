//! Entry points: egress and ingress translation with flow lookup
//!
//! A [`Translator`] owns the connection table and is driven through
//! `&mut self` by one logical thread. [`SharedTranslator`] puts the whole
//! translator behind a single mutex for callers with several workers.

use crate::config::TranslatorConfig;
use crate::egress;
use crate::error::{Result, TcpupError};
use crate::fsm::FlowShadow;
use crate::ingress;
use crate::packet::{parse_packet, ParsedPacket, TcpFlags};
use crate::stats::{StatsSnapshot, TranslatorStats};
use crate::table::{ConnectionTable, FlowKey};
use crate::tunnel::TunnelFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Why a packet produced no output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Egress packet carrying something other than TCP
    NotTcp,
    /// RST for a flow that does not exist
    UnmatchedReset,
    /// Neither SYN nor ACK and no flow to attach to
    UnmatchedSegment,
}

/// Outcome of one translation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Bytes written to the output buffer
    Forward(usize),
    /// Nothing written; the packet is discarded
    Drop(DropReason),
    /// An ACK with no flow. The caller answers it with
    /// [`crate::reset::fill_reset_ip`] or [`crate::reset::fill_reset_tunnel`].
    ResetRequired,
}

impl Verdict {
    pub fn is_forward(&self) -> bool {
        matches!(self, Verdict::Forward(_))
    }

    /// Bytes written, zero unless forwarded.
    pub fn bytes_written(&self) -> usize {
        match self {
            Verdict::Forward(n) => *n,
            _ => 0,
        }
    }
}

/// Verdict for a packet that found no flow and cannot open one.
fn unmatched(flags: TcpFlags) -> Verdict {
    if flags.rst {
        Verdict::Drop(DropReason::UnmatchedReset)
    } else if flags.ack {
        Verdict::ResetRequired
    } else {
        Verdict::Drop(DropReason::UnmatchedSegment)
    }
}

/// TCP/IP <-> tunnel translator
pub struct Translator {
    config: TranslatorConfig,
    table: ConnectionTable,
    stats: Arc<TranslatorStats>,
}

impl Translator {
    pub fn new() -> Self {
        let config = TranslatorConfig::default();
        Self {
            table: ConnectionTable::with_config(&config),
            config,
            stats: Arc::new(TranslatorStats::new()),
        }
    }

    pub fn with_config(config: TranslatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            table: ConnectionTable::with_config(&config),
            config,
            stats: Arc::new(TranslatorStats::new()),
        })
    }

    /// Translate an IPv4/TCP packet from the local stack into a tunnel frame.
    pub fn translate_egress(&mut self, input: &[u8], out: &mut [u8]) -> Result<Verdict> {
        self.translate_egress_at(input, out, Instant::now())
    }

    pub fn translate_egress_at(
        &mut self,
        input: &[u8],
        out: &mut [u8],
        now: Instant,
    ) -> Result<Verdict> {
        let result = self.egress_inner(input, out, now);
        self.account(&result, true);
        result
    }

    /// Translate a tunnel frame into an IPv4/TCP packet for the local stack.
    pub fn translate_ingress(&mut self, input: &[u8], out: &mut [u8]) -> Result<Verdict> {
        self.translate_ingress_at(input, out, Instant::now())
    }

    pub fn translate_ingress_at(
        &mut self,
        input: &[u8],
        out: &mut [u8],
        now: Instant,
    ) -> Result<Verdict> {
        let result = self.ingress_inner(input, out, now);
        self.account(&result, false);
        result
    }

    fn egress_inner(&mut self, input: &[u8], out: &mut [u8], now: Instant) -> Result<Verdict> {
        let seg = match parse_packet(input)? {
            ParsedPacket::Tcp(seg) => seg,
            ParsedPacket::Other(proto) => {
                trace!("egress: dropping non-TCP packet ({})", proto);
                return Ok(Verdict::Drop(DropReason::NotTcp));
            }
        };
        let flags = seg.flags();
        let key = FlowKey::new(seg.src, seg.dst);

        if self.table.find_by_tuple(&key).is_none() {
            if !(flags.syn && !flags.ack && !flags.rst) {
                let verdict = unmatched(flags);
                trace!(
                    "egress: no flow for {} (flags {:#04x}): {:?}",
                    key,
                    flags.to_byte(),
                    verdict
                );
                return Ok(verdict);
            }
            let conv = self.table.insert(key, now).conv;
            self.stats.record_flow_created();
            info!("tcpup flow {:08x} opened: {}", conv, key);
        }

        let log_transitions = self.config.log_transitions;
        let flow = self
            .table
            .find_by_tuple_mut(&key)
            .ok_or_else(|| TcpupError::InvalidPacket(format!("flow for {} vanished", key)))?;
        let before = flow.shadow;
        let n = egress::translate_segment(flow, &seg, out)?;
        if log_transitions {
            log_transition(flow.conv, &before, &flow.shadow);
        }
        trace!("egress: {:08x} {} bytes seq={} ack={}", flow.conv, n, seg.seq, seg.ack);
        Ok(Verdict::Forward(n))
    }

    fn ingress_inner(&mut self, input: &[u8], out: &mut [u8], now: Instant) -> Result<Verdict> {
        let frame = TunnelFrame::new_checked(input)?;
        let flags = frame.flags();
        let conv = frame.conv();

        let evicted = self.table.sweep_others(conv, now);
        if evicted > 0 {
            info!("tcpup sweep evicted {} flows ({} live)", evicted, self.table.len());
        }

        let Some(flow) = self.table.get_mut(conv) else {
            let verdict = unmatched(flags);
            trace!(
                "ingress: no flow {:08x} (flags {:#04x}): {:?}",
                conv,
                flags.to_byte(),
                verdict
            );
            return Ok(verdict);
        };

        // Rejected frames do not keep the flow alive.
        let before = flow.shadow;
        let n = ingress::translate_frame(flow, &frame, out, self.config.ip_ttl)?;
        flow.touch(now);
        if self.config.log_transitions {
            log_transition(conv, &before, &flow.shadow);
        }
        trace!("ingress: {:08x} {} bytes seq={} ack={}", conv, n, frame.seq(), frame.ack());
        Ok(Verdict::Forward(n))
    }

    fn account(&self, result: &Result<Verdict>, egress: bool) {
        match result {
            Ok(Verdict::Forward(n)) if egress => self.stats.record_egress(*n),
            Ok(Verdict::Forward(n)) => self.stats.record_ingress(*n),
            Ok(Verdict::Drop(_)) => self.stats.record_dropped(),
            Ok(Verdict::ResetRequired) => self.stats.record_reset_required(),
            Err(e) => {
                let dir = if egress { "egress" } else { "ingress" };
                if e.is_malformed_input() {
                    self.stats.record_malformed();
                    warn!("{}: rejected malformed packet: {}", dir, e);
                } else {
                    self.stats.record_dropped();
                    debug!("{}: translation failed: {}", dir, e);
                }
            }
        }
    }

    /// Evict closed and idle flows now.
    pub fn sweep(&mut self) -> usize {
        self.table.sweep(Instant::now())
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut ConnectionTable {
        &mut self.table
    }

    pub fn stats(&self) -> Arc<TranslatorStats> {
        Arc::clone(&self.stats)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.table.len(), self.table.evicted_total())
    }
}

impl Default for Translator {
    fn default() -> Self {
        Self::new()
    }
}

fn log_transition(conv: u32, before: &FlowShadow, after: &FlowShadow) {
    if before.confirmed != after.confirmed {
        debug!("tcpup {:08x}: {} -> {}", conv, before.confirmed, after.confirmed);
    }
    if before.tentative != after.tentative && after.tentative != after.confirmed {
        debug!("tcpup {:08x}: {} <- {}", conv, after.confirmed, after.tentative);
    }
}

/// A [`Translator`] shared between workers behind one lock.
#[derive(Clone)]
pub struct SharedTranslator {
    inner: Arc<Mutex<Translator>>,
    stats: Arc<TranslatorStats>,
}

impl SharedTranslator {
    pub fn new(translator: Translator) -> Self {
        let stats = translator.stats();
        Self {
            inner: Arc::new(Mutex::new(translator)),
            stats,
        }
    }

    pub fn translate_egress(&self, input: &[u8], out: &mut [u8]) -> Result<Verdict> {
        self.inner.lock().translate_egress(input, out)
    }

    pub fn translate_ingress(&self, input: &[u8], out: &mut [u8]) -> Result<Verdict> {
        self.inner.lock().translate_ingress(input, out)
    }

    pub fn sweep(&self) -> usize {
        self.inner.lock().sweep()
    }

    pub fn flow_count(&self) -> usize {
        self.inner.lock().table().len()
    }

    /// Counters, readable without taking the table lock.
    pub fn stats(&self) -> &TranslatorStats {
        &self.stats
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::build_ipv4_tcp;
    use crate::tunnel::TUNNEL_HEADER_LEN;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn local() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 4000)
    }

    fn remote() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(93, 1, 1, 1), 80)
    }

    fn frame(conv: u32, flags: TcpFlags) -> Vec<u8> {
        let mut buf = vec![0u8; TUNNEL_HEADER_LEN];
        let mut f = TunnelFrame::new_unchecked(&mut buf[..]);
        f.set_conv(conv);
        f.set_magic();
        f.set_flags_raw(flags.to_byte());
        f.set_options_len(0).unwrap();
        buf
    }

    #[test]
    fn test_non_tcp_dropped() {
        let mut packet =
            build_ipv4_tcp(local(), remote(), 1, 0, TcpFlags::syn_only(), 100, &[], &[]).unwrap();
        packet[9] = 17;

        let mut t = Translator::new();
        let mut out = [0u8; 128];
        let verdict = t.translate_egress(&packet, &mut out).unwrap();
        assert_eq!(verdict, Verdict::Drop(DropReason::NotTcp));
        assert!(t.table().is_empty());
    }

    #[test]
    fn test_unmatched_egress() {
        let mut t = Translator::new();
        let mut out = [0u8; 128];
        let cases = [
            (TcpFlags::rst_only(), Verdict::Drop(DropReason::UnmatchedReset)),
            (TcpFlags::ack_only(), Verdict::ResetRequired),
            (TcpFlags::syn_ack(), Verdict::ResetRequired),
            (
                TcpFlags { fin: true, ..Default::default() },
                Verdict::Drop(DropReason::UnmatchedSegment),
            ),
        ];
        for (flags, expected) in cases {
            let packet = build_ipv4_tcp(local(), remote(), 1, 2, flags, 100, &[], &[]).unwrap();
            assert_eq!(t.translate_egress(&packet, &mut out).unwrap(), expected);
        }
        assert!(t.table().is_empty());

        let snap = t.snapshot();
        assert_eq!(snap.resets_required, 2);
        assert_eq!(snap.packets_dropped, 2);
    }

    #[test]
    fn test_unmatched_ingress() {
        let mut t = Translator::new();
        let mut out = [0u8; 128];
        let cases = [
            (TcpFlags::rst_only(), Verdict::Drop(DropReason::UnmatchedReset)),
            (TcpFlags::ack_only(), Verdict::ResetRequired),
            (TcpFlags::syn_only(), Verdict::Drop(DropReason::UnmatchedSegment)),
        ];
        for (flags, expected) in cases {
            assert_eq!(t.translate_ingress(&frame(7, flags), &mut out).unwrap(), expected);
        }
    }

    #[test]
    fn test_bad_magic_counted_as_malformed() {
        let mut t = Translator::new();
        let mut input = frame(7, TcpFlags::ack_only());
        input[12] = 0;
        let mut out = [0u8; 128];
        assert!(t.translate_ingress(&input, &mut out).is_err());
        assert_eq!(t.snapshot().packets_malformed, 1);
    }

    #[test]
    fn test_with_config_validates() {
        let config = TranslatorConfig { idle_timeout_secs: 0, ..Default::default() };
        assert!(matches!(Translator::with_config(config), Err(TcpupError::Config(_))));
    }

    #[test]
    fn test_shared_translator_counts_flows() {
        let shared = SharedTranslator::new(Translator::new());
        let worker = shared.clone();
        let syn =
            build_ipv4_tcp(local(), remote(), 1, 0, TcpFlags::syn_only(), 100, &[], &[]).unwrap();

        let handle = std::thread::spawn(move || {
            let mut out = [0u8; 128];
            worker.translate_egress(&syn, &mut out).unwrap()
        });
        assert!(handle.join().unwrap().is_forward());
        assert_eq!(shared.flow_count(), 1);
        assert_eq!(shared.snapshot().flows_created, 1);
        assert_eq!(shared.stats().egress_packets.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
