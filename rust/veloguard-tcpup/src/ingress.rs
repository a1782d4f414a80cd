//! Ingress translation: tunnel frame -> IPv4/TCP packet

use crate::error::{ensure_capacity, Result};
use crate::fsm::SegmentEvent;
use crate::options::{
    parse_tunnel_options, write_tcp_options, OptionSet, Timestamp, TUNNEL_WINDOW_SCALE,
};
use crate::packet::{
    write_ipv4_tcp, TcpHeader, IPV4_HEADER_LEN, TCP_HEADER_LEN, TCP_MAX_OPTIONS_LEN,
};
use crate::relay::RelayAddress;
use crate::table::Flow;
use crate::tunnel::TunnelFrame;

/// Rebuild the IPv4/TCP packet for `frame` into `out`, addressed from the
/// flow's remote endpoint to its local one. Returns the packet length.
pub fn translate_frame(
    flow: &mut Flow,
    frame: &TunnelFrame<&[u8]>,
    out: &mut [u8],
    ttl: u8,
) -> Result<usize> {
    let flags = frame.flags();
    let tunnel_opts = parse_tunnel_options(frame.options())?;

    let tcp_opts = OptionSet {
        mss: tunnel_opts.mss,
        timestamp: Some(Timestamp { tsval: frame.tsval(), tsecr: frame.tsecr() }),
        window_scale: flags.syn.then_some(TUNNEL_WINDOW_SCALE),
        sack_permitted: flags.syn || tunnel_opts.sack_permitted,
        destination: None,
    };
    let mut opt_buf = [0u8; TCP_MAX_OPTIONS_LEN];
    let opt_len = write_tcp_options(&tcp_opts, &mut opt_buf)?;

    let payload = frame.payload();
    let event = SegmentEvent::new(flags, frame.seq(), frame.ack(), payload.len() as u32);
    let next = flow.shadow.on_segment_received(&event)?;

    let header_len = TCP_HEADER_LEN + opt_len;
    ensure_capacity(out, IPV4_HEADER_LEN + header_len + payload.len())?;

    let (local, remote) = (flow.local(), flow.remote());
    let hdr = TcpHeader {
        src_port: remote.port(),
        dst_port: local.port(),
        seq: frame.seq(),
        ack: frame.ack(),
        flags: frame.flags_raw(),
        window: frame.window(),
        header_len,
    };
    let total = write_ipv4_tcp(out, remote, local, &hdr, &opt_buf[..opt_len], payload, ttl)?;

    flow.shadow = next;
    flow.bytes_rx += payload.len() as u64;
    Ok(total)
}

/// The relay destination carried by a handshake frame, if any.
///
/// Gateways use this on the first SYN of a conversation to learn where the
/// originating side was connecting.
pub fn relay_destination(frame: &[u8]) -> Result<Option<RelayAddress>> {
    let frame = TunnelFrame::new_checked(frame)?;
    if !frame.flags().syn {
        return Ok(None);
    }
    Ok(parse_tunnel_options(frame.options())?.destination)
}
