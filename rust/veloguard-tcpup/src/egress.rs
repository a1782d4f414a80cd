//! Egress translation: IP/TCP segment -> tunnel frame

use crate::error::{ensure_capacity, Result};
use crate::fsm::SegmentEvent;
use crate::options::{parse_tcp_options, write_tunnel_options, OptionSet, TUNNEL_WINDOW_SCALE};
use crate::packet::TcpSegment;
use crate::relay::RelayAddress;
use crate::table::Flow;
use crate::tunnel::{TunnelFrame, TUNNEL_HEADER_LEN};

/// Re-express `window`, scaled by `scale` on the local side, in the
/// tunnel's fixed scale. Saturates instead of wrapping.
pub fn renormalize_window(window: u16, scale: u8) -> u16 {
    if scale == TUNNEL_WINDOW_SCALE {
        return window;
    }
    let effective = (window as u32) << scale;
    (effective >> TUNNEL_WINDOW_SCALE).min(u16::MAX as u32) as u16
}

/// Translate one segment of `flow` into `out`, returning the frame length.
///
/// The shadow transition is computed first; on error neither the flow nor
/// any accounting is touched.
pub fn translate_segment(flow: &mut Flow, seg: &TcpSegment<'_>, out: &mut [u8]) -> Result<usize> {
    let flags = seg.flags();
    let tcp_opts = parse_tcp_options(seg.options)?;

    let mut window_scale = flow.window_scale;
    let mut tunnel_opts = OptionSet {
        mss: tcp_opts.mss,
        sack_permitted: tcp_opts.sack_permitted,
        ..Default::default()
    };
    if flags.syn {
        tunnel_opts.destination = Some(RelayAddress::new(seg.dst));
        if let Some(ws) = tcp_opts.window_scale {
            window_scale = ws;
        }
    }

    let payload_len = seg.payload.len();
    let event = SegmentEvent::new(flags, seg.seq, seg.ack, payload_len as u32);
    let next = flow.shadow.on_segment_sent(&event)?;

    ensure_capacity(out, TUNNEL_HEADER_LEN)?;
    let opt_len = write_tunnel_options(&tunnel_opts, &mut out[TUNNEL_HEADER_LEN..])?;
    let total = TUNNEL_HEADER_LEN + opt_len + payload_len;
    ensure_capacity(out, total)?;

    let ts = tcp_opts.timestamp.unwrap_or_default();
    let mut frame = TunnelFrame::new_unchecked(&mut out[..total]);
    frame.set_conv(flow.conv);
    frame.set_seq(seg.seq);
    frame.set_ack(seg.ack);
    frame.set_magic();
    frame.set_flags_raw(seg.flags_raw);
    frame.set_window(renormalize_window(seg.window, window_scale));
    frame.set_tsval(ts.tsval);
    frame.set_tsecr(ts.tsecr);
    frame.set_options_len(opt_len)?;
    frame.payload_mut().copy_from_slice(seg.payload);

    flow.shadow = next;
    flow.window_scale = window_scale;
    flow.bytes_tx += payload_len as u64;
    Ok(total)
}
