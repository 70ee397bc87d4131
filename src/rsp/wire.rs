//! RSP framing: escape/unescape, checksum, hex helpers, and a stateful
//! sliding-window frame decoder implementing the full wire format GDB
//! actually speaks, including wire-escaping and the ack/nak byte.

use crate::dm::backend::Xlen;
use crate::error::{Error, Result};

/// Largest unescaped payload this codec will emit or accept.
pub const MAX_PAYLOAD: usize = 16 * 1024;

/// Size of the sliding receive buffer.
pub const WINDOW_SIZE: usize = 2 * MAX_PAYLOAD + 4;

const ESCAPE_BYTE: u8 = b'}';
const INTERRUPT_BYTE: u8 = 0x03;

fn needs_escape(b: u8) -> bool {
    matches!(b, b'$' | b'#' | b'*' | b'}')
}

/// Escapes `$ # * }` as `}` followed by `byte ^ 0x20`.
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len());
    for &b in payload {
        if needs_escape(b) {
            out.push(ESCAPE_BYTE);
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out
}

/// Inverse of [`escape`]. A trailing lone escape byte (malformed input) is
/// dropped rather than panicking; well-formed frames never produce one.
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied();
    while let Some(b) = iter.next() {
        if b == ESCAPE_BYTE {
            if let Some(next) = iter.next() {
                out.push(next ^ 0x20);
            }
        } else {
            out.push(b);
        }
    }
    out
}

/// Unsigned 8-bit sum of the given (already-escaped) bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Builds a complete outgoing frame: `$<escaped payload>#<hex checksum>`.
pub fn format_frame(payload: &[u8]) -> Vec<u8> {
    let escaped = escape(payload);
    let cs = checksum(&escaped);
    let mut out = Vec::with_capacity(escaped.len() + 4);
    out.push(b'$');
    out.extend_from_slice(&escaped);
    out.push(b'#');
    out.extend_from_slice(format!("{cs:02x}").as_bytes());
    out
}

/// Renders `v` as `xlen.hex_digits()` lowercase hex digits, little-endian
/// by byte (the byte order GDB expects for register payloads).
pub fn val_to_hex(v: u64, xlen: Xlen) -> String {
    let nbytes = xlen.hex_digits() / 2;
    let mut out = String::with_capacity(nbytes * 2);
    for i in 0..nbytes {
        let byte = (v >> (8 * i)) as u8;
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Renders raw bytes (memory dumps, monitor command output) as hex in
/// address/byte order — unlike [`val_to_hex`], this is not byte-reversed.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Inverse of [`bytes_to_hex`].
pub fn hex_to_bytes(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::BadArguments);
    }
    hex.chunks(2)
        .map(|c| {
            let s = std::str::from_utf8(c).map_err(|_| Error::BadArguments)?;
            u8::from_str_radix(s, 16).map_err(|_| Error::BadArguments)
        })
        .collect()
}

/// Parses a variable-length (no fixed width, no `0x` prefix) hex integer,
/// as used in command arguments like `m<addr>,<len>`.
pub fn parse_hex_u64(s: &[u8]) -> Result<u64> {
    if s.is_empty() || s.len() > 16 || !s.iter().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::BadArguments);
    }
    let text = std::str::from_utf8(s).map_err(|_| Error::BadArguments)?;
    u64::from_str_radix(text, 16).map_err(|_| Error::BadArguments)
}

/// Inverse of [`val_to_hex`]; requires exactly `xlen.hex_digits()` hex
/// characters.
pub fn hex_to_val(s: &str, xlen: Xlen) -> Result<u64> {
    let digits = xlen.hex_digits();
    if s.len() != digits || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::BadArguments);
    }
    let mut v: u64 = 0;
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let byte = u8::from_str_radix(std::str::from_utf8(chunk).unwrap(), 16)
            .map_err(|_| Error::BadArguments)?;
        v |= (byte as u64) << (8 * i);
    }
    Ok(v)
}

/// Outcome of one [`FrameDecoder::scan`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// No complete frame or interrupt byte is available yet.
    Incomplete,
    /// A `0x03` interrupt byte was consumed.
    Interrupt,
    /// A frame with a valid checksum; payload is already unescaped.
    Frame(Vec<u8>),
    /// A frame was delimited but its checksum did not match.
    BadChecksum,
}

/// Owns the sliding receive buffer and turns raw bytes into RSP events.
///
/// After every scan, byte 0 of the buffer (if present) is either `$` or
/// `0x03`; any other leading bytes are discarded as noise.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    discarded: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buf: Vec::new(),
            discarded: 0,
        }
    }

    /// Appends newly-read bytes, bounded to [`WINDOW_SIZE`]. Bytes beyond
    /// the window's remaining capacity are dropped; a real transport only
    /// ever hands this one `read()` worth of data at a time, which is
    /// always far smaller than the window.
    pub fn ingest(&mut self, chunk: &[u8]) {
        let room = WINDOW_SIZE.saturating_sub(self.buf.len());
        let take = room.min(chunk.len());
        self.buf.extend_from_slice(&chunk[..take]);
    }

    /// Count of leading non-frame bytes discarded so far (diagnostic only).
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn scan(&mut self) -> ReceiveEvent {
        while !self.buf.is_empty() && self.buf[0] != b'$' && self.buf[0] != INTERRUPT_BYTE {
            self.buf.remove(0);
            self.discarded += 1;
        }
        if self.buf.is_empty() {
            return ReceiveEvent::Incomplete;
        }
        if self.buf[0] == INTERRUPT_BYTE {
            self.buf.remove(0);
            return ReceiveEvent::Interrupt;
        }

        let hash_pos = match self.buf.iter().skip(1).position(|&b| b == b'#') {
            Some(i) => i + 1,
            None => return ReceiveEvent::Incomplete,
        };
        if self.buf.len() < hash_pos + 3 {
            return ReceiveEvent::Incomplete;
        }

        let escaped_payload = self.buf[1..hash_pos].to_vec();
        let cs_hex = &self.buf[hash_pos + 1..hash_pos + 3];
        let frame_len = hash_pos + 3;

        let parsed_cs = std::str::from_utf8(cs_hex)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok());
        self.buf.drain(0..frame_len);

        match parsed_cs {
            Some(cs) if cs == checksum(&escaped_payload) => {
                ReceiveEvent::Frame(unescape(&escaped_payload))
            }
            _ => ReceiveEvent::BadChecksum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn escape_unescape_roundtrip_fixed() {
        let payload = b"$foo#bar*baz}qux";
        assert_eq!(unescape(&escape(payload)), payload);
    }

    #[test]
    fn format_frame_matches_invariant() {
        let frame = format_frame(b"qSupported");
        assert_eq!(frame[0], b'$');
        let escaped = escape(b"qSupported");
        let hash_pos = 1 + escaped.len();
        assert_eq!(frame[hash_pos], b'#');
        let cs = checksum(&escaped);
        assert_eq!(&frame[hash_pos + 1..], format!("{cs:02x}").as_bytes());
    }

    #[test]
    fn val_to_hex_is_little_endian_by_byte() {
        assert_eq!(val_to_hex(0x8000_0000, Xlen::Bits64), "0000008000000000");
    }

    #[test]
    fn hex_to_val_rejects_wrong_length() {
        assert!(hex_to_val("1234", Xlen::Bits64).is_err());
    }

    #[test]
    fn hex_to_val_rejects_non_hex() {
        assert!(hex_to_val("zzzzzzzzzzzzzzzz", Xlen::Bits64).is_err());
    }

    #[test]
    fn decoder_discards_leading_noise() {
        let mut dec = FrameDecoder::new();
        dec.ingest(b"garbage$#00");
        assert_eq!(dec.scan(), ReceiveEvent::Frame(Vec::new()));
        assert_eq!(dec.discarded(), "garbage".len());
    }

    #[test]
    fn decoder_reports_incomplete_until_checksum_arrives() {
        let mut dec = FrameDecoder::new();
        dec.ingest(b"$qA");
        assert_eq!(dec.scan(), ReceiveEvent::Incomplete);
        dec.ingest(b"ttached#");
        assert_eq!(dec.scan(), ReceiveEvent::Incomplete);
        dec.ingest(b"8f");
        assert_eq!(dec.scan(), ReceiveEvent::Frame(b"qAttached".to_vec()));
    }

    #[test]
    fn decoder_reports_bad_checksum() {
        let mut dec = FrameDecoder::new();
        dec.ingest(b"$qAttached#00");
        assert_eq!(dec.scan(), ReceiveEvent::BadChecksum);
    }

    #[test]
    fn decoder_recognizes_interrupt_byte() {
        let mut dec = FrameDecoder::new();
        dec.ingest(&[0x03]);
        assert_eq!(dec.scan(), ReceiveEvent::Interrupt);
    }

    proptest! {
        #[test]
        fn prop_escape_unescape_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(unescape(&escape(&payload)), payload);
        }

        #[test]
        fn prop_frame_matches_invariant(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frame = format_frame(&payload);
            let escaped = escape(&payload);
            prop_assert_eq!(frame[0], b'$');
            let hash_pos = 1 + escaped.len();
            prop_assert_eq!(frame[hash_pos], b'#');
            prop_assert_eq!(&frame[hash_pos + 1..], format!("{:02x}", checksum(&escaped)).as_bytes());
        }

        #[test]
        fn prop_hex_roundtrip_32(v in any::<u32>()) {
            let hex = val_to_hex(v as u64, Xlen::Bits32);
            prop_assert_eq!(hex.len(), 8);
            prop_assert_eq!(hex_to_val(&hex, Xlen::Bits32).unwrap(), v as u64);
        }

        #[test]
        fn prop_hex_roundtrip_64(v in any::<u64>()) {
            let hex = val_to_hex(v, Xlen::Bits64);
            prop_assert_eq!(hex.len(), 16);
            prop_assert_eq!(hex_to_val(&hex, Xlen::Bits64).unwrap(), v);
        }
    }
}
