use std::rc::Rc;

use object::{Chunk, Handler, ObjRef, Value};

/// What happens to a call's result once the callee returns.
///
/// Opcodes that run managed code (iteration, `__eq__`, `__enter__`, ...)
/// record their continuation here instead of re-entering the interpreter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ReturnAction {
    /// Push the result for the caller.
    Push,
    /// Drop the result.
    Discard,
    /// `CallIter`: push the next item, or jump to `target` once the
    /// iterator returns itself.
    IterStep { iterator: Value, target: usize },
    /// `YieldFrom`: re-yield the item from the enclosing generator, or
    /// jump to `done_target` once the inner iterator is exhausted.
    YieldFrom {
        iterator: Value,
        resume_ip: usize,
        done_target: usize,
    },
    /// `PushWith`: push the result of `__enter__` and install the cleanup
    /// handler jumping to `target`.
    EnterWith { target: usize },
    /// `Print`: write the display form of the result.
    Print,
    /// Bottom frame of an `interpret` call.
    Exit,
}

impl ReturnAction {
    pub(crate) fn trace(&self, visitor: &mut dyn FnMut(Value)) {
        match *self {
            ReturnAction::IterStep { iterator, .. }
            | ReturnAction::YieldFrom { iterator, .. } => visitor(iterator),
            ReturnAction::Push
            | ReturnAction::Discard
            | ReturnAction::EnterWith { .. }
            | ReturnAction::Print
            | ReturnAction::Exit => {}
        }
    }
}

#[derive(Debug)]
pub(crate) struct CallFrame {
    pub closure: ObjRef,
    pub chunk: Rc<Chunk>,
    pub ip: usize,
    /// Stack index of local slot 0.
    pub base: usize,
    /// Stack height to restore on return; the result lands here.
    pub return_slot: usize,
    pub handlers: Vec<Handler>,
    /// Generator driving this frame, if any.
    pub generator: Option<ObjRef>,
    pub on_return: ReturnAction,
    /// Replaces the returned value (instantiation returns the instance,
    /// whatever `__init__` returns).
    pub result_override: Option<Value>,
}

impl CallFrame {
    pub(crate) fn trace(&self, visitor: &mut dyn FnMut(Value)) {
        visitor(Value::Object(self.closure));
        if let Some(generator) = self.generator {
            visitor(Value::Object(generator));
        }
        self.on_return.trace(visitor);
        if let Some(value) = self.result_override {
            visitor(value);
        }
    }

    /// Source line of the instruction being executed.
    pub(crate) fn line(&self) -> u32 {
        self.chunk.line_at(self.ip.saturating_sub(1))
    }
}
