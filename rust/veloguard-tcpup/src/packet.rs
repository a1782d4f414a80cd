//! IPv4/TCP parsing and building
//!
//! Parsing goes through smoltcp wire types; headers are emitted by hand into
//! caller-supplied buffers so the translators never allocate.

use crate::error::{ensure_capacity, Result, TcpupError};
use smoltcp::wire::{IpProtocol, Ipv4Packet, TcpPacket};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};

pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const TCP_MAX_OPTIONS_LEN: usize = 40;
pub const DEFAULT_TTL: u8 = 64;

const IP_DONT_FRAGMENT: u16 = 0x4000;

static IP_ID: AtomicU16 = AtomicU16::new(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
}

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn syn_only() -> Self {
        Self { syn: true, ..Default::default() }
    }
    pub fn syn_ack() -> Self {
        Self { syn: true, ack: true, ..Default::default() }
    }
    pub fn ack_only() -> Self {
        Self { ack: true, ..Default::default() }
    }
    pub fn fin_ack() -> Self {
        Self { fin: true, ack: true, ..Default::default() }
    }
    pub fn rst_ack() -> Self {
        Self { rst: true, ack: true, ..Default::default() }
    }
    pub fn rst_only() -> Self {
        Self { rst: true, ..Default::default() }
    }
    pub fn psh_ack() -> Self {
        Self { psh: true, ack: true, ..Default::default() }
    }

    pub fn from_byte(b: u8) -> Self {
        Self {
            fin: b & Self::FIN != 0,
            syn: b & Self::SYN != 0,
            rst: b & Self::RST != 0,
            psh: b & Self::PSH != 0,
            ack: b & Self::ACK != 0,
            urg: b & Self::URG != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.fin { flags |= Self::FIN; }
        if self.syn { flags |= Self::SYN; }
        if self.rst { flags |= Self::RST; }
        if self.psh { flags |= Self::PSH; }
        if self.ack { flags |= Self::ACK; }
        if self.urg { flags |= Self::URG; }
        flags
    }
}

/// A TCP segment carried in an IPv4 packet, borrowed from the input buffer.
#[derive(Debug, Clone)]
pub struct TcpSegment<'a> {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub seq: u32,
    pub ack: u32,
    /// Raw flag byte; ECE/CWR are carried through untouched.
    pub flags_raw: u8,
    pub window: u16,
    pub options: &'a [u8],
    pub payload: &'a [u8],
}

impl TcpSegment<'_> {
    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_byte(self.flags_raw)
    }
}

#[derive(Debug, Clone)]
pub enum ParsedPacket<'a> {
    Tcp(TcpSegment<'a>),
    Other(IpProtocol),
}

/// Parse an IPv4 packet, borrowing the TCP header fields when it carries TCP.
pub fn parse_packet(data: &[u8]) -> Result<ParsedPacket<'_>> {
    if data.is_empty() {
        return Err(TcpupError::PacketTooShort { expected: IPV4_HEADER_LEN, actual: 0 });
    }
    let version = data[0] >> 4;
    if version != 4 {
        return Err(TcpupError::InvalidIpVersion(version));
    }

    let ip = Ipv4Packet::new_checked(data)
        .map_err(|e| TcpupError::InvalidPacket(format!("IPv4: {}", e)))?;
    let protocol = ip.next_header();
    if protocol != IpProtocol::Tcp {
        return Ok(ParsedPacket::Other(protocol));
    }
    let (src_ip, dst_ip) = (ip.src_addr(), ip.dst_addr());

    let ihl = ip.header_len() as usize;
    if ihl < IPV4_HEADER_LEN {
        return Err(TcpupError::Malformed(format!("IPv4 header length {}", ihl)));
    }
    let total = ip.total_len() as usize;
    let tcp_bytes = &data[ihl..total];
    if tcp_bytes.len() < TCP_HEADER_LEN {
        return Err(TcpupError::PacketTooShort { expected: ihl + TCP_HEADER_LEN, actual: total });
    }
    let data_offset = ((tcp_bytes[12] >> 4) as usize) * 4;
    if data_offset < TCP_HEADER_LEN {
        return Err(TcpupError::Malformed(format!("TCP data offset {}", data_offset)));
    }
    if data_offset > tcp_bytes.len() {
        return Err(TcpupError::Malformed(format!(
            "TCP header length {} exceeds segment length {}",
            data_offset,
            tcp_bytes.len()
        )));
    }

    let tcp = TcpPacket::new_checked(tcp_bytes)
        .map_err(|e| TcpupError::InvalidPacket(format!("TCP: {}", e)))?;

    Ok(ParsedPacket::Tcp(TcpSegment {
        src: SocketAddrV4::new(src_ip, tcp.src_port()),
        dst: SocketAddrV4::new(dst_ip, tcp.dst_port()),
        seq: tcp.seq_number().0 as u32,
        ack: tcp.ack_number().0 as u32,
        flags_raw: tcp_bytes[13],
        window: tcp.window_len(),
        options: &tcp_bytes[TCP_HEADER_LEN..data_offset],
        payload: &tcp_bytes[data_offset..],
    }))
}

/// Fixed TCP header fields to emit.
#[derive(Debug, Clone, Copy)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub window: u16,
    /// Header length including options, multiple of 4.
    pub header_len: usize,
}

/// Write the fixed 20-byte TCP header; checksum and urgent pointer are zeroed.
pub fn emit_tcp_header(buf: &mut [u8], hdr: &TcpHeader) -> Result<()> {
    ensure_capacity(buf, TCP_HEADER_LEN)?;
    buf[0..2].copy_from_slice(&hdr.src_port.to_be_bytes());
    buf[2..4].copy_from_slice(&hdr.dst_port.to_be_bytes());
    buf[4..8].copy_from_slice(&hdr.seq.to_be_bytes());
    buf[8..12].copy_from_slice(&hdr.ack.to_be_bytes());
    buf[12] = ((hdr.header_len / 4) as u8) << 4;
    buf[13] = hdr.flags;
    buf[14..16].copy_from_slice(&hdr.window.to_be_bytes());
    buf[16..20].fill(0);
    Ok(())
}

/// Write a 20-byte IPv4 header for a TCP payload of `tcp_len` bytes.
pub fn emit_ipv4_header(
    buf: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    tcp_len: usize,
    ttl: u8,
) -> Result<()> {
    ensure_capacity(buf, IPV4_HEADER_LEN)?;
    let total_len = IPV4_HEADER_LEN + tcp_len;
    if total_len > u16::MAX as usize {
        return Err(TcpupError::Malformed(format!("IPv4 total length {}", total_len)));
    }

    buf[0] = 0x45;
    buf[1] = 0x00;
    buf[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    let ip_id = IP_ID.fetch_add(1, Ordering::Relaxed);
    buf[4..6].copy_from_slice(&ip_id.to_be_bytes());
    buf[6..8].copy_from_slice(&IP_DONT_FRAGMENT.to_be_bytes());
    buf[8] = ttl;
    buf[9] = 6;
    buf[10..12].fill(0);
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());

    let ip_cksum = checksum(&buf[..IPV4_HEADER_LEN]);
    buf[10..12].copy_from_slice(&ip_cksum.to_be_bytes());
    Ok(())
}

/// Compute and store the TCP checksum of a complete segment.
pub fn fill_tcp_checksum(src: Ipv4Addr, dst: Ipv4Addr, tcp: &mut [u8]) {
    tcp[16..18].fill(0);
    let cksum = tcp_checksum(&src.octets(), &dst.octets(), tcp);
    tcp[16..18].copy_from_slice(&cksum.to_be_bytes());
}

/// Write a complete IPv4/TCP packet into `out`, returning its length.
pub fn write_ipv4_tcp(
    out: &mut [u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
    hdr: &TcpHeader,
    options: &[u8],
    payload: &[u8],
    ttl: u8,
) -> Result<usize> {
    let tcp_len = hdr.header_len + payload.len();
    let total = IPV4_HEADER_LEN + tcp_len;
    ensure_capacity(out, total)?;
    if hdr.header_len != TCP_HEADER_LEN + options.len() {
        return Err(TcpupError::Malformed(format!(
            "TCP header length {} does not match {} option bytes",
            hdr.header_len,
            options.len()
        )));
    }

    emit_ipv4_header(out, *src.ip(), *dst.ip(), tcp_len, ttl)?;
    let tcp = &mut out[IPV4_HEADER_LEN..total];
    emit_tcp_header(tcp, hdr)?;
    tcp[TCP_HEADER_LEN..hdr.header_len].copy_from_slice(options);
    tcp[hdr.header_len..].copy_from_slice(payload);
    fill_tcp_checksum(*src.ip(), *dst.ip(), tcp);
    Ok(total)
}

/// Build an IPv4/TCP packet into a fresh buffer.
#[allow(clippy::too_many_arguments)]
pub fn build_ipv4_tcp(
    src: SocketAddrV4,
    dst: SocketAddrV4,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    window: u16,
    options: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>> {
    if options.len() % 4 != 0 || options.len() > TCP_MAX_OPTIONS_LEN {
        return Err(TcpupError::Malformed(format!("TCP options length {}", options.len())));
    }
    let hdr = TcpHeader {
        src_port: src.port(),
        dst_port: dst.port(),
        seq,
        ack,
        flags: flags.to_byte(),
        window,
        header_len: TCP_HEADER_LEN + options.len(),
    };
    let mut pkt = vec![0u8; IPV4_HEADER_LEN + hdr.header_len + payload.len()];
    write_ipv4_tcp(&mut pkt, src, dst, &hdr, options, payload, DEFAULT_TTL)?;
    Ok(pkt)
}

/// RFC 1071 internet checksum.
pub fn checksum(data: &[u8]) -> u16 {
    !fold(sum_words(0, data)) as u16
}

pub fn tcp_checksum(src: &[u8; 4], dst: &[u8; 4], tcp: &[u8]) -> u16 {
    let mut sum = 0u32;
    sum = sum.wrapping_add(((src[0] as u32) << 8) | src[1] as u32);
    sum = sum.wrapping_add(((src[2] as u32) << 8) | src[3] as u32);
    sum = sum.wrapping_add(((dst[0] as u32) << 8) | dst[1] as u32);
    sum = sum.wrapping_add(((dst[2] as u32) << 8) | dst[3] as u32);
    sum = sum.wrapping_add(6);
    sum = sum.wrapping_add(tcp.len() as u32);
    !fold(sum_words(sum, tcp)) as u16
}

fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for word in &mut chunks {
        sum = sum.wrapping_add(((word[0] as u32) << 8) | word[1] as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

fn fold(mut sum: u32) -> u32 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum
}
