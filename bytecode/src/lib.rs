mod builder;
mod decoder;
mod instruction;
mod line_table;
mod op;

pub use builder::{BuildError, BytecodeBuilder, Label, MAX_LONG_OPERAND};
pub use decoder::{BytecodeDecoder, DecodeError, decode_at};
pub use instruction::Instruction;
pub use line_table::{LineTable, LineTableBuilder};
pub use op::{Op, Shape};
