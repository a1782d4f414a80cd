//! Tunnel (tcpup) frame wire format
//!
//! A tunnel frame replaces the IP and TCP headers with one fixed header.
//! There is no addressing: the conversation id selects the flow. All
//! multi-byte fields are big-endian.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Conversation Id                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Acknowledgment Number                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Magic     |     Flags     |            Window             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Timestamp Value                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Timestamp Echo Reply                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Option Words |                   Reserved                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Options (Option Words * 4)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Payload                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::error::{Result, TcpupError};
use crate::packet::TcpFlags;

pub const TUNNEL_MAGIC: u8 = 0xcc;
pub const TUNNEL_HEADER_LEN: usize = 28;
pub const TUNNEL_MAX_OPTIONS_LEN: usize = u8::MAX as usize * 4;

mod field {
    use std::ops::Range;

    pub const CONV: Range<usize> = 0..4;
    pub const SEQ: Range<usize> = 4..8;
    pub const ACK: Range<usize> = 8..12;
    pub const MAGIC: usize = 12;
    pub const FLAGS: usize = 13;
    pub const WINDOW: Range<usize> = 14..16;
    pub const TSVAL: Range<usize> = 16..20;
    pub const TSECR: Range<usize> = 20..24;
    pub const OPT_WORDS: usize = 24;
    pub const RESERVED: Range<usize> = 25..28;
}

/// Read/write view over a buffer holding a tunnel frame.
#[derive(Debug, Clone)]
pub struct TunnelFrame<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> TunnelFrame<T> {
    pub fn new_unchecked(buffer: T) -> Self {
        Self { buffer }
    }

    /// Wrap `buffer`, validating length, magic and the option area.
    pub fn new_checked(buffer: T) -> Result<Self> {
        let frame = Self::new_unchecked(buffer);
        frame.check()?;
        Ok(frame)
    }

    pub fn check(&self) -> Result<()> {
        let data = self.buffer.as_ref();
        if data.len() < TUNNEL_HEADER_LEN {
            return Err(TcpupError::PacketTooShort {
                expected: TUNNEL_HEADER_LEN,
                actual: data.len(),
            });
        }
        if self.magic() != TUNNEL_MAGIC {
            return Err(TcpupError::InvalidPacket(format!("tunnel magic {:#04x}", self.magic())));
        }
        if data.len() < self.header_len() {
            return Err(TcpupError::Malformed(format!(
                "tunnel option area of {} bytes exceeds frame length {}",
                self.options_len(),
                data.len()
            )));
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    fn read_u32(&self, range: std::ops::Range<usize>) -> u32 {
        let b = &self.buffer.as_ref()[range];
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn conv(&self) -> u32 {
        self.read_u32(field::CONV)
    }

    pub fn seq(&self) -> u32 {
        self.read_u32(field::SEQ)
    }

    pub fn ack(&self) -> u32 {
        self.read_u32(field::ACK)
    }

    pub fn magic(&self) -> u8 {
        self.buffer.as_ref()[field::MAGIC]
    }

    pub fn flags_raw(&self) -> u8 {
        self.buffer.as_ref()[field::FLAGS]
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_byte(self.flags_raw())
    }

    pub fn window(&self) -> u16 {
        let b = &self.buffer.as_ref()[field::WINDOW];
        u16::from_be_bytes([b[0], b[1]])
    }

    pub fn tsval(&self) -> u32 {
        self.read_u32(field::TSVAL)
    }

    pub fn tsecr(&self) -> u32 {
        self.read_u32(field::TSECR)
    }

    /// Option area length in bytes.
    pub fn options_len(&self) -> usize {
        self.buffer.as_ref()[field::OPT_WORDS] as usize * 4
    }

    pub fn header_len(&self) -> usize {
        TUNNEL_HEADER_LEN + self.options_len()
    }

    pub fn options(&self) -> &[u8] {
        &self.buffer.as_ref()[TUNNEL_HEADER_LEN..self.header_len()]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> TunnelFrame<T> {
    fn write_u32(&mut self, range: std::ops::Range<usize>, value: u32) {
        self.buffer.as_mut()[range].copy_from_slice(&value.to_be_bytes());
    }

    pub fn set_conv(&mut self, value: u32) {
        self.write_u32(field::CONV, value)
    }

    pub fn set_seq(&mut self, value: u32) {
        self.write_u32(field::SEQ, value)
    }

    pub fn set_ack(&mut self, value: u32) {
        self.write_u32(field::ACK, value)
    }

    pub fn set_magic(&mut self) {
        self.buffer.as_mut()[field::MAGIC] = TUNNEL_MAGIC;
    }

    pub fn set_flags_raw(&mut self, value: u8) {
        self.buffer.as_mut()[field::FLAGS] = value;
    }

    pub fn set_window(&mut self, value: u16) {
        self.buffer.as_mut()[field::WINDOW].copy_from_slice(&value.to_be_bytes());
    }

    pub fn set_tsval(&mut self, value: u32) {
        self.write_u32(field::TSVAL, value)
    }

    pub fn set_tsecr(&mut self, value: u32) {
        self.write_u32(field::TSECR, value)
    }

    /// Set the option area length; `bytes` must be a multiple of 4.
    pub fn set_options_len(&mut self, bytes: usize) -> Result<()> {
        if bytes % 4 != 0 || bytes > TUNNEL_MAX_OPTIONS_LEN {
            return Err(TcpupError::Malformed(format!("tunnel option length {}", bytes)));
        }
        self.buffer.as_mut()[field::OPT_WORDS] = (bytes / 4) as u8;
        self.buffer.as_mut()[field::RESERVED].fill(0);
        Ok(())
    }

    pub fn options_mut(&mut self) -> &mut [u8] {
        let end = self.header_len();
        &mut self.buffer.as_mut()[TUNNEL_HEADER_LEN..end]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.header_len();
        &mut self.buffer.as_mut()[start..]
    }
}
