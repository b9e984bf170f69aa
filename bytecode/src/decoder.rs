use core::fmt;

use crate::instruction::Instruction;
use crate::op::{Op, Shape};

/// Reason a byte sequence could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte at `offset` is not an opcode.
    InvalidOpcode { offset: usize, byte: u8 },
    /// The instruction at `offset` runs past the end of the code.
    Truncated { offset: usize, op: Op },
    /// `offset` lies outside the code.
    OutOfBounds { offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOpcode { offset, byte } => {
                write!(f, "invalid opcode 0x{byte:02x} at {offset}")
            }
            Self::Truncated { offset, op } => {
                write!(f, "truncated {op:?} at {offset}")
            }
            Self::OutOfBounds { offset } => {
                write!(f, "offset {offset} is outside the code")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode the instruction starting at `pos`.
///
/// Returns the instruction and the offset of the byte following it, which
/// is also the base of any jump offset.
#[inline]
pub fn decode_at(
    bytes: &[u8],
    pos: usize,
) -> Result<(Instruction, usize), DecodeError> {
    let byte = *bytes
        .get(pos)
        .ok_or(DecodeError::OutOfBounds { offset: pos })?;
    let op = Op::try_from(byte)
        .map_err(|byte| DecodeError::InvalidOpcode { offset: pos, byte })?;
    let start = pos + 1;
    let end = start + op.operand_len();
    let operand = bytes
        .get(start..end)
        .ok_or(DecodeError::Truncated { offset: pos, op })?;

    let instruction = match op.shape() {
        Shape::Simple => Instruction::simple(op),
        Shape::Constant { .. } | Shape::Operand { .. } => {
            Instruction::with_operand(op, read_be(operand))
        }
        Shape::Jump { backward } => {
            let magnitude = read_be(operand) as i32;
            let offset = if backward { -magnitude } else { magnitude };
            Instruction::jump(op, offset)
        }
    };

    // Every opcode maps to exactly one instruction family.
    let instruction =
        instruction.ok_or(DecodeError::InvalidOpcode { offset: pos, byte })?;
    Ok((instruction, end))
}

/// Big-endian read of a 1-3 byte operand.
#[inline(always)]
fn read_be(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Walks a byte slice, yielding `(offset, instruction)` pairs.
///
/// Stops after the first [`DecodeError`], which is yielded once.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            failed: false,
        }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.is_at_end() {
            return None;
        }
        let at = self.pos;
        match decode_at(self.bytes, at) {
            Ok((instruction, next)) => {
                self.pos = next;
                Some(Ok((at, instruction)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
