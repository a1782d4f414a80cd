//! Option-set codec for both wire formats
//!
//! TCP options follow RFC 793/7323. Tunnel options reuse the kind/length
//! TLV shape but only carry what the tunnel header cannot: MSS,
//! SACK-permitted and the relay destination. The window scale is fixed at
//! [`TUNNEL_WINDOW_SCALE`] and timestamps live in the tunnel header.

use crate::error::{Result, TcpupError};
use crate::relay::RelayAddress;

pub const TCPOPT_EOL: u8 = 0;
pub const TCPOPT_NOP: u8 = 1;
pub const TCPOPT_MSS: u8 = 2;
pub const TCPOPT_WINDOW: u8 = 3;
pub const TCPOPT_SACK_PERMITTED: u8 = 4;
pub const TCPOPT_TIMESTAMP: u8 = 8;

pub const TUNNEL_OPT_DESTINATION: u8 = 0x8e;

/// Window scale both tunnel endpoints assume.
pub const TUNNEL_WINDOW_SCALE: u8 = 7;
/// RFC 7323 upper bound on the shift count.
pub const MAX_WINDOW_SCALE: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub tsval: u32,
    pub tsecr: u32,
}

/// Structured options, independent of which wire format they came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    pub mss: Option<u16>,
    pub window_scale: Option<u8>,
    pub sack_permitted: bool,
    pub timestamp: Option<Timestamp>,
    pub destination: Option<RelayAddress>,
}

fn for_each_option<'a>(
    opts: &'a [u8],
    mut f: impl FnMut(u8, &'a [u8]) -> Result<()>,
) -> Result<()> {
    let mut i = 0;
    while i < opts.len() {
        match opts[i] {
            TCPOPT_EOL => break,
            TCPOPT_NOP => i += 1,
            kind => {
                let Some(&len) = opts.get(i + 1) else {
                    return Err(TcpupError::Malformed(format!("option {} without length", kind)));
                };
                let len = len as usize;
                if len < 2 || i + len > opts.len() {
                    return Err(TcpupError::Malformed(format!(
                        "option {} length {} at offset {} overruns {} bytes",
                        kind,
                        len,
                        i,
                        opts.len()
                    )));
                }
                f(kind, &opts[i + 2..i + len])?;
                i += len;
            }
        }
    }
    Ok(())
}

fn expect_len(kind: u8, data: &[u8], want: usize) -> Result<()> {
    if data.len() != want {
        return Err(TcpupError::Malformed(format!(
            "option {} carries {} bytes, expected {}",
            kind,
            data.len(),
            want
        )));
    }
    Ok(())
}

/// Parse the option area of a TCP header.
pub fn parse_tcp_options(opts: &[u8]) -> Result<OptionSet> {
    let mut set = OptionSet::default();
    for_each_option(opts, |kind, data| {
        match kind {
            TCPOPT_MSS => {
                expect_len(kind, data, 2)?;
                set.mss = Some(u16::from_be_bytes([data[0], data[1]]));
            }
            TCPOPT_WINDOW => {
                expect_len(kind, data, 1)?;
                set.window_scale = Some(data[0].min(MAX_WINDOW_SCALE));
            }
            TCPOPT_SACK_PERMITTED => {
                expect_len(kind, data, 0)?;
                set.sack_permitted = true;
            }
            TCPOPT_TIMESTAMP => {
                expect_len(kind, data, 8)?;
                set.timestamp = Some(Timestamp {
                    tsval: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                    tsecr: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                });
            }
            // SACK blocks and anything else are not translated.
            _ => {}
        }
        Ok(())
    })?;
    Ok(set)
}

/// Parse a tunnel option area.
pub fn parse_tunnel_options(opts: &[u8]) -> Result<OptionSet> {
    let mut set = OptionSet::default();
    for_each_option(opts, |kind, data| {
        match kind {
            TCPOPT_MSS => {
                expect_len(kind, data, 2)?;
                set.mss = Some(u16::from_be_bytes([data[0], data[1]]));
            }
            TCPOPT_SACK_PERMITTED => {
                expect_len(kind, data, 0)?;
                set.sack_permitted = true;
            }
            TUNNEL_OPT_DESTINATION => {
                let (relay, _) = RelayAddress::decode(data)?;
                set.destination = Some(relay);
            }
            _ => {}
        }
        Ok(())
    })?;
    Ok(set)
}

struct OptionWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> OptionWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn reserve(&mut self, n: usize) -> Result<&mut [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(TcpupError::BufferTooSmall { needed: end, capacity: self.buf.len() });
        }
        let slot = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(slot)
    }

    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    fn push_timestamp(&mut self, ts: &Timestamp) -> Result<()> {
        self.push(&[TCPOPT_TIMESTAMP, 10])?;
        self.push(&ts.tsval.to_be_bytes())?;
        self.push(&ts.tsecr.to_be_bytes())
    }

    fn pad(mut self) -> Result<usize> {
        while self.pos % 4 != 0 {
            self.push(&[TCPOPT_EOL])?;
        }
        Ok(self.pos)
    }
}

/// Emit TCP options in the usual Linux order, 4-byte aligned.
pub fn write_tcp_options(set: &OptionSet, out: &mut [u8]) -> Result<usize> {
    let mut w = OptionWriter::new(out);
    if let Some(mss) = set.mss {
        let [hi, lo] = mss.to_be_bytes();
        w.push(&[TCPOPT_MSS, 4, hi, lo])?;
    }
    match (set.sack_permitted, &set.timestamp) {
        (true, Some(ts)) => {
            w.push(&[TCPOPT_SACK_PERMITTED, 2])?;
            w.push_timestamp(ts)?;
        }
        (false, Some(ts)) => {
            w.push(&[TCPOPT_NOP, TCPOPT_NOP])?;
            w.push_timestamp(ts)?;
        }
        (true, None) => w.push(&[TCPOPT_NOP, TCPOPT_NOP, TCPOPT_SACK_PERMITTED, 2])?,
        (false, None) => {}
    }
    if let Some(ws) = set.window_scale {
        w.push(&[TCPOPT_NOP, TCPOPT_WINDOW, 3, ws.min(MAX_WINDOW_SCALE)])?;
    }
    w.pad()
}

/// Emit tunnel options, padded to whole 32-bit words.
pub fn write_tunnel_options(set: &OptionSet, out: &mut [u8]) -> Result<usize> {
    let mut w = OptionWriter::new(out);
    if let Some(mss) = set.mss {
        let [hi, lo] = mss.to_be_bytes();
        w.push(&[TCPOPT_MSS, 4, hi, lo])?;
    }
    if set.sack_permitted {
        w.push(&[TCPOPT_SACK_PERMITTED, 2])?;
    }
    if let Some(relay) = &set.destination {
        let body_len = relay.encoded_len();
        w.push(&[TUNNEL_OPT_DESTINATION, (2 + body_len) as u8])?;
        relay.encode(w.reserve(body_len)?)?;
    }
    w.pad()
}
