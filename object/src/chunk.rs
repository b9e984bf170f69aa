use core::fmt::Write as _;
use core::ops::{Deref, DerefMut};

use bytecode::{BuildError, BytecodeBuilder, BytecodeDecoder, LineTable};

use crate::value::Value;

/// A unit of compiled bytecode: code bytes, their source lines and the
/// constant pool. Immutable once built.
#[derive(Debug)]
pub struct Chunk {
    name: String,
    code: Vec<u8>,
    lines: LineTable,
    constants: Vec<Value>,
}

impl Chunk {
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn lines(&self) -> &LineTable {
        &self.lines
    }

    #[inline(always)]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    #[inline(always)]
    pub fn constant(&self, idx: u32) -> Option<Value> {
        self.constants.get(idx as usize).copied()
    }

    /// Source line of the instruction covering `offset`.
    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.line_at(offset).unwrap_or(0)
    }

    /// Human-readable listing, one instruction per line. `render` formats
    /// constant operands.
    pub fn disassemble(&self, render: &dyn Fn(Value) -> String) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {} ==", self.name);
        let mut last_line = None;
        for item in BytecodeDecoder::new(&self.code) {
            let (offset, instruction) = match item {
                Ok(decoded) => decoded,
                Err(err) => {
                    let _ = writeln!(out, "<{err}>");
                    break;
                }
            };
            let line = self.lines.line_at(offset);
            if line == last_line {
                let _ = write!(out, "{offset:04}    | {instruction}");
            } else {
                let _ = write!(out, "{offset:04} {:>4} {instruction}", line.unwrap_or(0));
            }
            last_line = line;
            if let Some(value) = instruction
                .constant_index()
                .and_then(|idx| self.constant(idx))
            {
                let _ = write!(out, " ({})", render(value));
            }
            out.push('\n');
        }
        out
    }
}

/// Assembles a [`Chunk`]: bytecode emission is delegated to the wrapped
/// [`BytecodeBuilder`], constants are collected here.
pub struct ChunkBuilder {
    name: String,
    code: BytecodeBuilder,
    constants: Vec<Value>,
}

impl ChunkBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: BytecodeBuilder::new(),
            constants: Vec::new(),
        }
    }

    /// Append to the constant pool and return the new index.
    pub fn add_constant(&mut self, value: Value) -> u32 {
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Add a constant and emit the instruction that pushes it.
    pub fn emit_constant(&mut self, value: Value) -> Result<u32, BuildError> {
        let idx = self.add_constant(value);
        self.code.constant(idx)?;
        Ok(idx)
    }

    pub fn finish(self) -> Chunk {
        let (code, lines) = self.code.finish();
        Chunk {
            name: self.name,
            code,
            lines,
            constants: self.constants,
        }
    }
}

impl Deref for ChunkBuilder {
    type Target = BytecodeBuilder;

    fn deref(&self) -> &BytecodeBuilder {
        &self.code
    }
}

impl DerefMut for ChunkBuilder {
    fn deref_mut(&mut self) -> &mut BytecodeBuilder {
        &mut self.code
    }
}
