//! Delta-encoded VLQ line table: maps bytecode offsets to source lines.
//!
//! An entry is recorded only where the line changes. Each entry is 2 VLQ
//! values:
//! - `delta_offset` (unsigned VLQ)
//! - `delta_line` (signed, zigzag + VLQ)

/// Accumulates line entries while bytecode is emitted.
pub struct LineTableBuilder {
    entries: Vec<(u32, u32)>, // (offset, line)
}

impl LineTableBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Record that the instruction at `offset` comes from `line`.
    pub fn add(&mut self, offset: u32, line: u32) {
        if self.entries.last().is_some_and(|&(_, last)| last == line) {
            return;
        }
        self.entries.push((offset, line));
    }

    pub fn finish(self) -> LineTable {
        let mut encoded = Vec::new();
        let mut prev_offset: u32 = 0;
        let mut prev_line: i64 = 0;

        for &(offset, line) in &self.entries {
            encode_unsigned_vlq(offset - prev_offset, &mut encoded);
            encode_unsigned_vlq(zigzag_encode(line as i64 - prev_line), &mut encoded);
            prev_offset = offset;
            prev_line = line as i64;
        }

        LineTable { encoded }
    }
}

impl Default for LineTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded offset → line mapping of one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTable {
    encoded: Vec<u8>,
}

impl LineTable {
    /// Source line of the instruction covering byte `offset`: the line of
    /// the last entry at or before it.
    pub fn line_at(&self, offset: usize) -> Option<u32> {
        let target = offset as u32;
        let mut pos = 0;
        let mut at: u32 = 0;
        let mut line: i64 = 0;
        let mut best = None;

        while pos < self.encoded.len() {
            at += decode_unsigned_vlq(&self.encoded, &mut pos)?;
            line += zigzag_decode(decode_unsigned_vlq(&self.encoded, &mut pos)?);
            if at > target {
                break;
            }
            best = Some(line as u32);
        }

        best
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }
}

// ── VLQ helpers ─────────────────────────────────────────────────────

/// 7 data bits per byte, MSB set on every byte but the last.
fn encode_unsigned_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 35 {
            return None;
        }
    }
}

fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn zigzag_decode(value: u32) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table() {
        let table = LineTableBuilder::new().finish();
        assert_eq!(table.encoded_len(), 0);
        assert_eq!(table.line_at(0), None);
    }

    #[test]
    fn lines_cover_following_offsets() {
        let mut builder = LineTableBuilder::new();
        builder.add(0, 1);
        builder.add(2, 1);
        builder.add(4, 3);
        builder.add(9, 2);
        let table = builder.finish();

        assert_eq!(table.line_at(0), Some(1));
        assert_eq!(table.line_at(3), Some(1));
        assert_eq!(table.line_at(4), Some(3));
        assert_eq!(table.line_at(8), Some(3));
        assert_eq!(table.line_at(9), Some(2));
        assert_eq!(table.line_at(500), Some(2));
    }

    #[test]
    fn repeated_lines_are_not_stored() {
        let mut builder = LineTableBuilder::new();
        for offset in 0..100 {
            builder.add(offset, 7);
        }
        let table = builder.finish();
        assert_eq!(table.encoded_len(), 2);
        assert_eq!(table.line_at(99), Some(7));
    }

    #[test]
    fn vlq_handles_multi_byte_values() {
        for v in [0, 127, 128, 16384, u32::MAX >> 4] {
            let mut buf = Vec::new();
            encode_unsigned_vlq(v, &mut buf);
            let mut pos = 0;
            assert_eq!(decode_unsigned_vlq(&buf, &mut pos), Some(v));
            assert_eq!(pos, buf.len());
        }
    }
}
