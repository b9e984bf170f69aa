//! Sable: the execution core of a small class-based scripting language.
//!
//! Programs arrive as pre-built bytecode [`object::Chunk`]s. [`Vm`] owns
//! the heap, globals and the operand stack and runs chunks through a
//! single non-recursive dispatch loop.

mod attributes;
mod builtins;
mod calls;
pub mod demos;
mod error;
mod exceptions;
mod format;
mod frame;
mod interpreter;
mod lookup;
pub mod natives;
mod ops;
mod upvalues;
mod vm;

pub use builtins::Builtins;
pub use error::{ErrorKind, RuntimeError};
pub use format::format_g;
pub use natives::{NativeClass, NativeFn, NativeMethod};
pub use vm::{Vm, VmSettings};
