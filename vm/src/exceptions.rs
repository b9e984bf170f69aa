//! Raising, handler frames and unwinding.

use std::io::Write as _;

use object::{GeneratorState, Handler, HandlerKind, ObjectKind, SpecialMethod, SuspendedFrame, Value};

use crate::error::{ErrorKind, RuntimeError};
use crate::frame::ReturnAction;
use crate::interpreter::Flow;
use crate::vm::Vm;

impl Vm {
    /// Turn `error` into a script exception and unwind to the nearest
    /// handler. An error nothing handles is reported on the error stream,
    /// the interpreter state is reset and the error is returned.
    pub(crate) fn throw(&mut self, error: RuntimeError) -> Result<(), RuntimeError> {
        let location = self.frames.last().map(|frame| {
            let name = match self.heap.kind(frame.closure) {
                Some(ObjectKind::Closure(closure)) => self.function_name(closure.function),
                _ => "?".to_string(),
            };
            (frame.line(), name)
        });

        let exception = match self.exception_value(error) {
            Ok(exception) => exception,
            Err(fatal) => {
                self.report(&fatal, location);
                self.reset();
                return Err(fatal);
            }
        };
        log::debug!("raised {}", self.exception_text(exception));
        if self.unwind(exception) {
            return Ok(());
        }
        let error = self.uncaught(exception);
        self.report(&error, location);
        self.reset();
        Err(error)
    }

    /// The exception object for `error`. Internal errors are not
    /// catchable and come back as `Err`.
    fn exception_value(&mut self, error: RuntimeError) -> Result<Value, RuntimeError> {
        let kind = match &error {
            RuntimeError::Raised(value) => return Ok(*value),
            RuntimeError::Internal(_) => return Err(error),
            other => other.kind().unwrap_or(ErrorKind::Exception),
        };
        let instance = Value::Object(self.instantiate(self.builtins.exception(kind))?);
        self.stack.push(instance);
        let message = self.intern(&error.message());
        self.stack.pop();
        let key = self.names.arg;
        if let Some(fields) = self.as_instance_mut(instance).map(|i| &mut i.fields) {
            fields.insert(key, Value::Object(message));
        }
        Ok(instance)
    }

    /// Jump to the innermost handler, popping frames that have none.
    /// Stops at the bottom frame of the current `interpret` call.
    fn unwind(&mut self, exception: Value) -> bool {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return false;
            };
            if let Some(handler) = frame.handlers.pop() {
                frame.ip = handler.target;
                let depth = frame.base + handler.depth;
                self.close_upvalues(depth);
                self.stack.truncate(depth);
                self.stack.push(exception);
                return true;
            }

            let Some(frame) = self.frames.pop() else {
                return false;
            };
            self.close_upvalues(frame.base);
            self.stack.truncate(frame.return_slot);
            if let Some(generator) = frame.generator {
                if let Some(ObjectKind::Generator(g)) = self.heap.kind_mut(generator) {
                    g.state = GeneratorState::Done;
                    g.frame = SuspendedFrame::default();
                }
            }
            if frame.on_return == ReturnAction::Exit {
                return false;
            }
        }
    }

    /// Error value for an exception that escaped every handler.
    fn uncaught(&self, exception: Value) -> RuntimeError {
        let class = self.class_of(exception);
        let message = self.exception_message(exception);
        match self.builtins.exception_kind(class) {
            Some(kind) => RuntimeError::from_kind(kind, message),
            None => RuntimeError::Uncaught {
                class: self.type_name(exception),
                message,
            },
        }
    }

    fn report(&mut self, error: &RuntimeError, location: Option<(u32, String)>) {
        // The error is returned to the caller as well; a failing error
        // stream must not mask it.
        let _ = writeln!(self.err, "{error}");
        if let Some((line, name)) = location {
            let _ = writeln!(self.err, "[line {line}] in {name}");
        }
    }

    /// Drop all frames and stack contents after an uncaught error.
    fn reset(&mut self) {
        self.close_upvalues(0);
        self.frames.clear();
        self.stack.clear();
    }

    pub(crate) fn push_handler(
        &mut self,
        kind: HandlerKind,
        offset: i32,
    ) -> Result<(), RuntimeError> {
        let target = self.jump_target(offset)?;
        self.install_handler(kind, target)
    }

    /// Record a handler of the current frame covering the stack as it is.
    pub(crate) fn install_handler(
        &mut self,
        kind: HandlerKind,
        target: usize,
    ) -> Result<(), RuntimeError> {
        let depth = self.stack.len();
        let frame = self.frame_mut()?;
        let depth = depth
            .checked_sub(frame.base)
            .ok_or_else(|| RuntimeError::internal("handler below frame base"))?;
        frame.handlers.push(Handler { kind, target, depth });
        Ok(())
    }

    /// `PushWith`: `[m]` -> `[m, m.__enter__()]`. The cleanup handler
    /// covering `m` is installed once `__enter__` has returned.
    pub(crate) fn push_with(&mut self, offset: i32) -> Result<Flow, RuntimeError> {
        let manager = self.peek(0)?;
        let enter = self.context_method(manager, SpecialMethod::Enter)?;
        self.context_method(manager, SpecialMethod::Exit)?;
        let target = self.jump_target(offset)?;
        self.stack.push(manager);
        let slot = self.stack.len() - 1;
        self.invoke(enter, slot, 1, slot, ReturnAction::EnterWith { target }, None)
    }

    fn context_method(&self, manager: Value, method: SpecialMethod) -> Result<Value, RuntimeError> {
        self.special_of(manager, method).ok_or_else(|| {
            RuntimeError::AttributeError(format!(
                "'{}' object has no attribute '{}'",
                self.type_name(manager),
                method.name()
            ))
        })
    }

    /// `CleanupWith`: `[m, e]` -> `[e, m.__exit__(e)]`.
    pub(crate) fn cleanup_with(&mut self) -> Result<Flow, RuntimeError> {
        let pending = self.pop()?;
        let manager = self.pop()?;
        self.stack.extend([pending, manager, pending]);
        let exit = self.context_method(manager, SpecialMethod::Exit)?;
        let base = self.stack.len() - 2;
        self.invoke(exit, base, 2, base, ReturnAction::Push, None)
    }

    /// `Raise`: classes are instantiated without running `__init__`.
    pub(crate) fn raise(&mut self) -> Result<RuntimeError, RuntimeError> {
        let value = self.peek(0)?;
        let exception = match self.as_class(value) {
            Some(class) => Value::Object(self.instantiate(class)?),
            None => value,
        };
        self.pop()?;
        let is_instance = exception
            .as_object()
            .is_some_and(|r| matches!(self.heap.kind(r), Some(ObjectKind::Instance(_))));
        if !is_instance {
            return Ok(RuntimeError::type_error(format!(
                "exceptions must be instances, not '{}'",
                self.type_name(exception)
            )));
        }
        Ok(RuntimeError::Raised(exception))
    }

    /// `FilterExcept`: `[e, cls]` -> `[e, matched]`. A `None` filter
    /// matches everything.
    pub(crate) fn filter_except(&mut self) -> Result<Flow, RuntimeError> {
        let filter = self.pop()?;
        let exception = self.peek(0)?;
        let matched = match filter {
            Value::None => true,
            _ => match self.as_class(filter) {
                Some(class) => self.is_instance_of(exception, class),
                None => {
                    return Err(RuntimeError::type_error(format!(
                        "except filter must be a class, not '{}'",
                        self.type_name(filter)
                    )));
                }
            },
        };
        Ok(self.push(Value::Boolean(matched)))
    }
}
