use core::fmt;

use crate::line_table::{LineTable, LineTableBuilder};
use crate::op::{Op, Shape};

/// Largest index a `*Long` operand can carry.
pub const MAX_LONG_OPERAND: u32 = 0x00FF_FFFF;

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`] and friends. Resolve it with
/// [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "a forward jump must be bound"]
pub struct Label {
    /// Position of the u16 offset bytes in the buffer.
    offset_pos: usize,
    /// Position right after the jump instruction (base for relative offset).
    base: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// A jump distance does not fit the 16-bit operand.
    JumpTooFar { distance: usize },
    /// An operand does not fit the 24-bit long encoding.
    OperandTooLarge { op: Op, value: u32 },
    /// A backward jump target lies after the jump.
    InvalidLoopTarget { target: usize, at: usize },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JumpTooFar { distance } => {
                write!(f, "jump of {distance} bytes does not fit in 16 bits")
            }
            Self::OperandTooLarge { op, value } => {
                write!(f, "operand {value} too large for {op:?}")
            }
            Self::InvalidLoopTarget { target, at } => {
                write!(f, "loop target {target} is not before {at}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// Builds a bytecode byte sequence together with its line table.
///
/// The builder picks the short or `*Long` form of constant and operand
/// opcodes from the operand value.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
    lines: LineTableBuilder,
    line: u32,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            lines: LineTableBuilder::new(),
            line: 1,
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    /// Source line attributed to instructions emitted from now on.
    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> (Vec<u8>, LineTable) {
        (self.buf, self.lines.finish())
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_op(&mut self, op: Op) {
        self.lines.add(self.buf.len() as u32, self.line);
        self.buf.push(op as u8);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn emit_u24(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes()[1..]);
    }

    /// Emit an operand-less opcode.
    pub fn emit(&mut self, op: Op) {
        debug_assert!(
            op.shape() == Shape::Simple,
            "{op:?} takes an operand"
        );
        self.emit_op(op);
    }

    /// Emit a constant or operand opcode, switching to the long form when
    /// `value` does not fit in one byte.
    pub fn emit_with_operand(
        &mut self,
        op: Op,
        value: u32,
    ) -> Result<(), BuildError> {
        debug_assert!(
            matches!(
                op.shape(),
                Shape::Constant { long: false } | Shape::Operand { long: false }
            ),
            "{op:?} is not a short operand opcode"
        );
        if value <= u8::MAX as u32 {
            self.emit_op(op);
            self.buf.push(value as u8);
            return Ok(());
        }
        if value > MAX_LONG_OPERAND {
            return Err(BuildError::OperandTooLarge { op, value });
        }
        let long = op.long_form().ok_or(BuildError::OperandTooLarge { op, value })?;
        self.emit_op(long);
        self.emit_u24(value);
        Ok(())
    }

    /// `Constant <idx>` - push a constant pool entry.
    pub fn constant(&mut self, idx: u32) -> Result<(), BuildError> {
        self.emit_with_operand(Op::Constant, idx)
    }

    pub fn define_global(&mut self, name_idx: u32) -> Result<(), BuildError> {
        self.emit_with_operand(Op::DefineGlobal, name_idx)
    }

    pub fn get_global(&mut self, name_idx: u32) -> Result<(), BuildError> {
        self.emit_with_operand(Op::GetGlobal, name_idx)
    }

    pub fn set_global(&mut self, name_idx: u32) -> Result<(), BuildError> {
        self.emit_with_operand(Op::SetGlobal, name_idx)
    }

    pub fn get_local(&mut self, slot: u32) -> Result<(), BuildError> {
        self.emit_with_operand(Op::GetLocal, slot)
    }

    pub fn set_local(&mut self, slot: u32) -> Result<(), BuildError> {
        self.emit_with_operand(Op::SetLocal, slot)
    }

    pub fn call(&mut self, argc: u32) -> Result<(), BuildError> {
        self.emit_with_operand(Op::Call, argc)
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// Emit a forward jump opcode with a placeholder offset. Returns a
    /// [`Label`] that must be resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self, op: Op) -> Label {
        debug_assert!(
            op.shape() == Shape::Jump { backward: false },
            "{op:?} is not a forward jump"
        );
        self.emit_op(op);
        let offset_pos = self.buf.len();
        self.emit_u16(0);
        Label {
            offset_pos,
            base: self.buf.len(),
        }
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) -> Result<(), BuildError> {
        let distance = self.buf.len() - label.base;
        let offset = u16::try_from(distance)
            .map_err(|_| BuildError::JumpTooFar { distance })?;
        self.buf[label.offset_pos..label.offset_pos + 2]
            .copy_from_slice(&offset.to_be_bytes());
        Ok(())
    }

    /// Emit a backward jump (`Loop` or `LoopIter`) to `target`, a byte
    /// offset obtained from [`current_offset`](Self::current_offset).
    pub fn loop_to(&mut self, op: Op, target: usize) -> Result<(), BuildError> {
        debug_assert!(
            op.shape() == Shape::Jump { backward: true },
            "{op:?} is not a backward jump"
        );
        let at = self.buf.len();
        if target > at {
            return Err(BuildError::InvalidLoopTarget { target, at });
        }
        let distance = at + 3 - target;
        let offset = u16::try_from(distance)
            .map_err(|_| BuildError::JumpTooFar { distance })?;
        self.emit_op(op);
        self.emit_u16(offset);
        Ok(())
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
