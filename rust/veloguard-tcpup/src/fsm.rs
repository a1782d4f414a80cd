//! Shadow TCP state machine
//!
//! The translator never terminates TCP; it only mirrors enough of RFC 793
//! to translate fields correctly and to know when a flow may be reclaimed.
//! Egress and ingress packets arrive independently, so each flow carries two
//! state slots:
//!
//! - `confirmed`: the state both directions agree on.
//! - `tentative`: a state inferred from an ingress segment, held until the
//!   egress side acknowledges past `rcv_una`.
//!
//! Transitions are pure: they take a [`FlowShadow`] by value and return the
//! next one. Callers compare the two to report what changed.

use crate::error::{Result, TcpupError};
use crate::packet::TcpFlags;
use crate::seq::seq_gt;

/// TCP state (RFC 793)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TcpState {
    #[default]
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    CloseWait,
    FinWait1,
    Closing,
    LastAck,
    FinWait2,
    TimeWait,
}

impl TcpState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TcpState::Closed => "CLOSED",
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynReceived => "SYN_RCVD",
            TcpState::Established => "ESTABLISHED",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::FinWait1 => "FIN_WAIT_1",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::FinWait2 => "FIN_WAIT_2",
            TcpState::TimeWait => "TIME_WAIT",
        }
    }

    /// States reclaimed on the short idle timeout.
    pub fn is_closing(&self) -> bool {
        matches!(self, TcpState::LastAck | TcpState::TimeWait)
    }
}

impl std::fmt::Display for TcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fields of one observed segment that drive a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEvent {
    pub flags: TcpFlags,
    pub seq: u32,
    pub ack: u32,
    pub payload_len: u32,
}

impl SegmentEvent {
    pub fn new(flags: TcpFlags, seq: u32, ack: u32, payload_len: u32) -> Self {
        Self { flags, seq, ack, payload_len }
    }

    fn end_seq(&self) -> u32 {
        self.seq.wrapping_add(self.payload_len)
    }

    /// ACK set and `ack` beyond `mark`
    fn acks_past(&self, mark: u32) -> bool {
        self.flags.ack && seq_gt(self.ack, mark)
    }
}

/// Per-flow dual-slot state plus the sequence watermarks it is judged by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowShadow {
    pub confirmed: TcpState,
    pub tentative: TcpState,
    /// Highest sequence point the local side has committed to (SYN or FIN).
    pub snd_una: u32,
    /// Watermark the egress side must acknowledge past to commit `tentative`.
    pub rcv_una: u32,
}

impl FlowShadow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both slots agree.
    pub fn is_settled(&self) -> bool {
        self.confirmed == self.tentative
    }

    fn commit(&mut self, state: TcpState) {
        self.confirmed = state;
        self.tentative = state;
    }

    fn preload(&mut self, state: TcpState, watermark: u32) {
        if self.tentative != state {
            self.tentative = state;
            self.rcv_una = watermark;
        }
    }

    fn violation(&self, ev: &SegmentEvent) -> TcpupError {
        TcpupError::ProtocolViolation { state: self.confirmed, flags: ev.flags.to_byte() }
    }

    /// Transition for a segment leaving the local stack toward the tunnel.
    pub fn on_segment_sent(mut self, ev: &SegmentEvent) -> Result<FlowShadow> {
        let f = ev.flags;
        if f.rst {
            self.commit(TcpState::Closed);
            return Ok(self);
        }

        if !self.is_settled() && ev.acks_past(self.rcv_una) {
            self.commit(self.tentative);
        }

        match self.confirmed {
            TcpState::Closed => {
                if f.syn && !f.ack {
                    self.snd_una = ev.seq;
                    self.commit(TcpState::SynSent);
                }
            }
            TcpState::SynReceived => {
                if f.fin {
                    return Err(self.violation(ev));
                }
                if f.ack && !f.syn && seq_gt(ev.seq, self.snd_una) {
                    self.commit(self.tentative);
                }
            }
            TcpState::Established => {
                if f.fin {
                    self.snd_una = ev.end_seq();
                    self.commit(TcpState::FinWait1);
                }
            }
            TcpState::CloseWait => {
                if f.fin {
                    self.snd_una = ev.end_seq();
                    self.commit(TcpState::LastAck);
                }
            }
            TcpState::FinWait1 => {
                if f.ack && !f.fin {
                    self.commit(self.tentative);
                }
            }
            _ => {}
        }
        Ok(self)
    }

    /// Transition for a segment arriving from the tunnel toward the local stack.
    pub fn on_segment_received(mut self, ev: &SegmentEvent) -> Result<FlowShadow> {
        let f = ev.flags;
        if f.rst {
            self.commit(TcpState::Closed);
            return Ok(self);
        }

        match self.confirmed {
            TcpState::SynSent => {
                if f.syn && !f.ack {
                    if f.fin {
                        return Err(self.violation(ev));
                    }
                    self.preload(TcpState::SynReceived, ev.seq);
                } else if f.syn && ev.acks_past(self.snd_una) {
                    if f.fin {
                        return Err(self.violation(ev));
                    }
                    self.preload(TcpState::Established, ev.seq);
                }
            }
            TcpState::SynReceived => {
                if ev.acks_past(self.snd_una) {
                    if f.fin {
                        return Err(self.violation(ev));
                    }
                    self.preload(TcpState::Established, ev.seq);
                }
            }
            TcpState::Established => {
                if f.fin {
                    self.preload(TcpState::CloseWait, ev.seq);
                }
            }
            TcpState::FinWait1 => {
                if f.fin && ev.acks_past(self.snd_una) {
                    self.preload(TcpState::TimeWait, ev.end_seq());
                } else if f.fin {
                    self.preload(TcpState::Closing, ev.end_seq());
                } else if ev.acks_past(self.snd_una) {
                    self.preload(TcpState::FinWait2, ev.end_seq());
                }
            }
            TcpState::FinWait2 => {
                if f.fin {
                    self.preload(TcpState::TimeWait, ev.end_seq());
                }
            }
            TcpState::Closing => {
                if ev.acks_past(self.snd_una) {
                    self.preload(TcpState::TimeWait, ev.end_seq());
                }
            }
            TcpState::LastAck => {
                if ev.acks_past(self.snd_una) {
                    self.preload(TcpState::Closed, ev.end_seq());
                }
            }
            _ => {}
        }
        Ok(self)
    }
}
