//! VeloGuard TCPUP - TCP/IP to TCP-over-UDP translation
//!
//! This crate rewrites IPv4/TCP segments produced by a local TCP stack into
//! tcpup tunnel frames and back, tracking just enough per-flow state to
//! translate fields correctly and to reclaim flows once they close.
//!
//! # Features
//!
//! - Shadow TCP state machine with confirmed/tentative slots per flow
//! - Connection table indexed by conversation id and 4-tuple
//! - Lazy eviction of closed and idle flows, no timers
//! - Relay-address option carrying the original destination on SYN
//! - Window-scale renormalization to the tunnel's fixed scale
//! - RST synthesis for unmatched segments in both wire formats
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                   Local TCP stack (TUN)                     |
//! +-------------------------------------------------------------+
//!            | IPv4/TCP                      ^ IPv4/TCP
//!            v                               |
//! +-------------------------------------------------------------+
//! |                   Translator                                |
//! | +-------------+ +-----------------+ +-------------+         |
//! | |  Egress     | | ConnectionTable | |  Ingress    |         |
//! | | (seg->frame)| | (conv, 4-tuple) | | (frame->seg)|         |
//! | +-------------+ +-----------------+ +-------------+         |
//! |          |       FlowShadow (FSM)          |                |
//! |          +---------------+-----------------+                |
//! |                          |                                  |
//! | +-----------------------------------------------------+    |
//! | |        Options / Relay address / Checksums          |    |
//! | +-----------------------------------------------------+    |
//! +-------------------------------------------------------------+
//!            | tcpup frame                   ^ tcpup frame
//!            v                               |
//! +-------------------------------------------------------------+
//! |                   UDP transport                             |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use veloguard_tcpup::{fill_reset_ip, Translator, Verdict};
//!
//! let mut translator = Translator::new();
//! let mut frame = [0u8; 2048];
//! match translator.translate_egress(&packet, &mut frame)? {
//!     Verdict::Forward(n) => udp.send(&frame[..n])?,
//!     Verdict::ResetRequired => {
//!         let n = fill_reset_ip(&mut frame, &packet)?;
//!         tun.write(&frame[..n])?;
//!     }
//!     Verdict::Drop(_) => {}
//! }
//! ```

pub mod config;
pub mod egress;
pub mod error;
pub mod fsm;
pub mod ingress;
pub mod options;
pub mod packet;
pub mod relay;
pub mod reset;
pub mod seq;
pub mod stats;
pub mod table;
pub mod translator;
pub mod tunnel;

// Re-exports for convenience
pub use config::TranslatorConfig;
pub use error::{Result, TcpupError};
pub use fsm::{FlowShadow, SegmentEvent, TcpState};
pub use options::{OptionSet, Timestamp};
pub use packet::{build_ipv4_tcp, parse_packet, ParsedPacket, TcpFlags, TcpSegment};
pub use relay::{AddressFamily, RelayAddress};
pub use reset::{fill_reset_ip, fill_reset_tunnel};
pub use stats::{StatsSnapshot, TranslatorStats};
pub use table::{ConnectionTable, Flow, FlowKey};
pub use translator::{DropReason, SharedTranslator, Translator, Verdict};
pub use tunnel::{TunnelFrame, TUNNEL_HEADER_LEN, TUNNEL_MAGIC};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::TranslatorConfig;
    pub use crate::error::{Result, TcpupError};
    pub use crate::reset::{fill_reset_ip, fill_reset_tunnel};
    pub use crate::translator::{SharedTranslator, Translator, Verdict};
}

#[cfg(test)]
mod tests;
