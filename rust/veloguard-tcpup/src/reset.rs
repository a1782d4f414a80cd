//! RST synthesis for segments that match no flow
//!
//! The translators only report [`crate::translator::Verdict::ResetRequired`];
//! the caller builds the reply here and sends it back the way the trigger
//! came.

use crate::error::{ensure_capacity, Result, TcpupError};
use crate::packet::{
    parse_packet, write_ipv4_tcp, ParsedPacket, TcpFlags, TcpHeader, DEFAULT_TTL, TCP_HEADER_LEN,
};
use crate::tunnel::{TunnelFrame, TUNNEL_HEADER_LEN};

/// seq, ack and flags of the RST answering a trigger.
fn reset_fields(flags: TcpFlags, seq: u32, ack: u32) -> Result<(u32, u32, u8)> {
    if flags.syn {
        Ok((0, seq.wrapping_add(1), TcpFlags::rst_ack().to_byte()))
    } else if flags.ack {
        Ok((ack, 0, TcpFlags::rst_only().to_byte()))
    } else {
        Err(TcpupError::InvalidPacket(format!(
            "no reset for a segment without SYN or ACK (flags {:#04x})",
            flags.to_byte()
        )))
    }
}

/// Write an IPv4/TCP RST answering `trigger` into `out`.
pub fn fill_reset_ip(out: &mut [u8], trigger: &[u8]) -> Result<usize> {
    let seg = match parse_packet(trigger)? {
        ParsedPacket::Tcp(seg) => seg,
        ParsedPacket::Other(proto) => {
            return Err(TcpupError::InvalidPacket(format!("reset trigger is not TCP: {}", proto)))
        }
    };
    let (seq, ack, flags) = reset_fields(seg.flags(), seg.seq, seg.ack)?;
    let hdr = TcpHeader {
        src_port: seg.dst.port(),
        dst_port: seg.src.port(),
        seq,
        ack,
        flags,
        window: 0,
        header_len: TCP_HEADER_LEN,
    };
    write_ipv4_tcp(out, seg.dst, seg.src, &hdr, &[], &[], DEFAULT_TTL)
}

/// Write a tunnel RST answering the tunnel frame `trigger` into `out`.
pub fn fill_reset_tunnel(out: &mut [u8], trigger: &[u8]) -> Result<usize> {
    let trigger = TunnelFrame::new_checked(trigger)?;
    let (seq, ack, flags) = reset_fields(trigger.flags(), trigger.seq(), trigger.ack())?;
    ensure_capacity(out, TUNNEL_HEADER_LEN)?;

    let mut frame = TunnelFrame::new_unchecked(&mut out[..TUNNEL_HEADER_LEN]);
    frame.set_conv(trigger.conv());
    frame.set_seq(seq);
    frame.set_ack(ack);
    frame.set_magic();
    frame.set_flags_raw(flags);
    frame.set_window(0);
    frame.set_tsval(0);
    frame.set_tsecr(0);
    frame.set_options_len(0)?;
    Ok(TUNNEL_HEADER_LEN)
}
