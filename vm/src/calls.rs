//! Call protocol: closures, natives, bound methods, construction and
//! generator resumption, plus what happens to a result on return.

use std::io::Write as _;
use std::rc::Rc;

use object::{
    Chunk, Generator, GeneratorState, HandlerKind, ObjRef, ObjectKind, ObjectType,
    SpecialMethod, SuspendedFrame, Value,
};

use crate::error::RuntimeError;
use crate::frame::{CallFrame, ReturnAction};
use crate::interpreter::Flow;
use crate::vm::Vm;

impl Vm {
    /// Call the value `argc + 1` slots down the stack with the `argc`
    /// values above it.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        argc: usize,
        action: ReturnAction,
    ) -> Result<Flow, RuntimeError> {
        let slot = self
            .stack
            .len()
            .checked_sub(argc + 1)
            .ok_or_else(|| RuntimeError::internal("stack underflow in call"))?;
        let Some(r) = callee.as_object() else {
            return Err(self.not_callable(callee));
        };
        match self.kind(r)?.object_type() {
            ObjectType::Closure => self.call_closure(r, slot + 1, argc, slot, action, None),
            ObjectType::NativeFunction => self.call_native(r, slot + 1, argc, slot, action, None),
            ObjectType::BoundMethod => {
                let (receiver, method) = match self.kind(r)? {
                    ObjectKind::BoundMethod(bound) => (bound.receiver, bound.method),
                    _ => return Err(RuntimeError::internal("bound method expected")),
                };
                self.stack[slot] = receiver;
                self.invoke(method, slot, argc + 1, slot, action, None)
            }
            ObjectType::Class => self.construct(r, slot, argc, action),
            ObjectType::Generator => self.resume(r, slot, argc, action),
            ObjectType::Instance => match self.special_of(callee, SpecialMethod::Call) {
                Some(call) => self.invoke(call, slot, argc + 1, slot, action, None),
                None => Err(self.not_callable(callee)),
            },
            _ => Err(self.not_callable(callee)),
        }
    }

    /// Call a method whose receiver already sits at `base`; `argc`
    /// counts the receiver.
    pub(crate) fn invoke(
        &mut self,
        method: Value,
        base: usize,
        argc: usize,
        return_slot: usize,
        action: ReturnAction,
        result_override: Option<Value>,
    ) -> Result<Flow, RuntimeError> {
        let Some(r) = method.as_object() else {
            return Err(self.not_callable(method));
        };
        match self.kind(r)?.object_type() {
            ObjectType::Closure => {
                self.call_closure(r, base, argc, return_slot, action, result_override)
            }
            ObjectType::NativeFunction => {
                self.call_native(r, base, argc, return_slot, action, result_override)
            }
            _ => Err(self.not_callable(method)),
        }
    }

    fn not_callable(&self, value: Value) -> RuntimeError {
        RuntimeError::type_error(format!(
            "'{}' object is not callable",
            self.type_name(value)
        ))
    }

    fn closure_function(&self, closure: ObjRef) -> Result<ObjRef, RuntimeError> {
        match self.kind(closure)? {
            ObjectKind::Closure(c) => Ok(c.function),
            _ => Err(RuntimeError::internal("closure expected")),
        }
    }

    fn closure_chunk(&self, closure: ObjRef) -> Result<Rc<Chunk>, RuntimeError> {
        match self.kind(self.closure_function(closure)?)? {
            ObjectKind::Function(f) => Ok(Rc::clone(&f.chunk)),
            _ => Err(RuntimeError::internal("function expected")),
        }
    }

    pub(crate) fn call_closure(
        &mut self,
        closure: ObjRef,
        base: usize,
        argc: usize,
        return_slot: usize,
        action: ReturnAction,
        result_override: Option<Value>,
    ) -> Result<Flow, RuntimeError> {
        let function = self.closure_function(closure)?;
        let (arity, kind, chunk) = match self.kind(function)? {
            ObjectKind::Function(f) => (f.arity, f.kind, Rc::clone(&f.chunk)),
            _ => return Err(RuntimeError::internal("function expected")),
        };
        if argc != arity {
            return Err(RuntimeError::Arity(format!(
                "{}() takes exactly {arity} arguments ({argc} given)",
                self.function_name(function)
            )));
        }

        if kind == object::FunctionKind::Generator {
            let slots = self
                .stack
                .get(base..base + argc)
                .ok_or_else(|| RuntimeError::internal("arguments out of range"))?
                .to_vec();
            let generator = self.alloc(
                self.builtins.generator,
                ObjectKind::Generator(Generator {
                    closure,
                    state: GeneratorState::Fresh,
                    frame: SuspendedFrame {
                        slots,
                        ..SuspendedFrame::default()
                    },
                    result: Value::None,
                }),
            );
            self.stack.truncate(return_slot);
            let value = result_override.unwrap_or(Value::Object(generator));
            return self.finish_call(value, action);
        }

        if self.frames.len() >= self.settings.max_frames {
            return Err(RuntimeError::StackOverflow);
        }
        self.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            base,
            return_slot,
            handlers: Vec::new(),
            generator: None,
            on_return: action,
            result_override,
        });
        Ok(Flow::Continue)
    }

    fn call_native(
        &mut self,
        native: ObjRef,
        base: usize,
        argc: usize,
        return_slot: usize,
        action: ReturnAction,
        result_override: Option<Value>,
    ) -> Result<Flow, RuntimeError> {
        let (name, arity, index) = match self.kind(native)? {
            ObjectKind::NativeFunction(n) => (n.name, n.arity, n.index),
            _ => return Err(RuntimeError::internal("native function expected")),
        };
        if !arity.accepts(argc) {
            return Err(RuntimeError::Arity(format!(
                "{name}() takes {arity} arguments ({argc} given)"
            )));
        }
        let func = self
            .natives
            .get(index)
            .map(|m| m.func)
            .ok_or_else(|| RuntimeError::internal(format!("no native #{index}")))?;
        // Arguments stay on the stack, and so rooted, for the whole call.
        let args = self
            .stack
            .get(base..base + argc)
            .ok_or_else(|| RuntimeError::internal("arguments out of range"))?
            .to_vec();
        let result = func(self, &args)?;
        self.stack.truncate(return_slot);
        self.finish_call(result_override.unwrap_or(result), action)
    }

    /// Instantiate `class` in place of the callee and run `__init__`.
    fn construct(
        &mut self,
        class: ObjRef,
        slot: usize,
        argc: usize,
        action: ReturnAction,
    ) -> Result<Flow, RuntimeError> {
        let instance = Value::Object(self.instantiate(class)?);
        self.stack[slot] = instance;
        match self.special_method(class, SpecialMethod::Init) {
            Some(init) => self.invoke(init, slot, argc + 1, slot, action, Some(instance)),
            None if argc == 0 => {
                self.stack.truncate(slot);
                self.finish_call(instance, action)
            }
            None => Err(RuntimeError::Arity(format!(
                "{}() takes no arguments ({argc} given)",
                self.class(class)?.name
            ))),
        }
    }

    /// Continue a generator from its saved frame. Calling a finished
    /// generator returns the generator itself.
    fn resume(
        &mut self,
        generator: ObjRef,
        slot: usize,
        argc: usize,
        action: ReturnAction,
    ) -> Result<Flow, RuntimeError> {
        if argc > 1 {
            return Err(RuntimeError::Arity(format!(
                "generator takes at most 1 argument ({argc} given)"
            )));
        }
        let sent = if argc == 1 { self.peek(0)? } else { Value::None };
        let (state, closure) = match self.kind(generator)? {
            ObjectKind::Generator(g) => (g.state, g.closure),
            _ => return Err(RuntimeError::internal("generator expected")),
        };
        match state {
            GeneratorState::Done => {
                self.stack.truncate(slot);
                return self.finish_call(Value::Object(generator), action);
            }
            GeneratorState::Running => {
                return Err(RuntimeError::ValueError(
                    "generator already executing".into(),
                ));
            }
            GeneratorState::Fresh | GeneratorState::Suspended => {}
        }
        if self.frames.len() >= self.settings.max_frames {
            return Err(RuntimeError::StackOverflow);
        }
        let chunk = self.closure_chunk(closure)?;
        let saved = match self.kind_mut(generator)? {
            ObjectKind::Generator(g) => {
                g.state = GeneratorState::Running;
                core::mem::take(&mut g.frame)
            }
            _ => return Err(RuntimeError::internal("generator expected")),
        };

        let base = slot + 1;
        self.stack.truncate(base);
        self.stack.extend(saved.slots);
        if state == GeneratorState::Suspended && saved.push_on_resume {
            self.stack.push(sent);
        }
        self.frames.push(CallFrame {
            closure,
            chunk,
            ip: saved.ip,
            base,
            return_slot: slot,
            handlers: saved.handlers,
            generator: Some(generator),
            on_return: action,
            result_override: None,
        });
        Ok(Flow::Continue)
    }

    /// `Return`: pop the frame and hand its result to the caller.
    pub(crate) fn return_from_frame(&mut self) -> Result<Flow, RuntimeError> {
        let result = self.pop()?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::internal("return without a frame"))?;
        self.close_upvalues(frame.base);
        self.stack.truncate(frame.return_slot);
        let value = match frame.generator {
            Some(generator) => {
                if let ObjectKind::Generator(g) = self.kind_mut(generator)? {
                    g.state = GeneratorState::Done;
                    g.result = result;
                    g.frame = SuspendedFrame::default();
                }
                Value::Object(generator)
            }
            None => frame.result_override.unwrap_or(result),
        };
        self.finish_call(value, frame.on_return)
    }

    /// Save the current generator frame and hand `value` to whoever
    /// resumed it. The frame continues at `resume_ip` next time.
    pub(crate) fn suspend(
        &mut self,
        value: Value,
        resume_ip: usize,
        push_on_resume: bool,
    ) -> Result<Flow, RuntimeError> {
        let generator = self
            .frame()?
            .generator
            .ok_or_else(|| RuntimeError::internal("yield outside of a generator"))?;
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::internal("yield without a frame"))?;
        if frame.base > self.stack.len() {
            return Err(RuntimeError::internal("generator frame below stack"));
        }
        self.close_upvalues(frame.base);
        let slots = self.stack.split_off(frame.base);
        self.stack.truncate(frame.return_slot);
        if let ObjectKind::Generator(g) = self.kind_mut(generator)? {
            g.state = GeneratorState::Suspended;
            g.frame = SuspendedFrame {
                ip: resume_ip,
                slots,
                handlers: frame.handlers,
                push_on_resume,
            };
        }
        self.finish_call(value, frame.on_return)
    }

    /// Deliver a call result according to the caller's continuation.
    pub(crate) fn finish_call(
        &mut self,
        value: Value,
        action: ReturnAction,
    ) -> Result<Flow, RuntimeError> {
        match action {
            ReturnAction::Push => {
                self.stack.push(value);
            }
            ReturnAction::Discard => {}
            ReturnAction::IterStep { iterator, target } => {
                if value.is_same(iterator) {
                    self.frame_mut()?.ip = target;
                } else {
                    self.stack.push(value);
                }
            }
            ReturnAction::YieldFrom {
                iterator,
                resume_ip,
                done_target,
            } => {
                if !value.is_same(iterator) {
                    return self.suspend(value, resume_ip, false);
                }
                self.pop()?;
                let result = match iterator.as_object().and_then(|r| self.heap.kind(r)) {
                    Some(ObjectKind::Generator(g)) => g.result,
                    _ => Value::None,
                };
                self.stack.push(result);
                self.frame_mut()?.ip = done_target;
            }
            ReturnAction::EnterWith { target } => {
                self.install_handler(HandlerKind::With, target)?;
                self.stack.push(value);
            }
            ReturnAction::Print => self.write_display(value)?,
            ReturnAction::Exit => {
                if value != Value::None {
                    self.write_display(value)?;
                }
                return Ok(Flow::Exit(value));
            }
        }
        Ok(Flow::Continue)
    }

    /// `InvokeIter`: replace the top of stack with its iterator.
    pub(crate) fn invoke_iter(&mut self) -> Result<Flow, RuntimeError> {
        let value = self.peek(0)?;
        let Some(iter) = self.special_of(value, SpecialMethod::Iter) else {
            return Err(RuntimeError::type_error(format!(
                "'{}' object is not iterable",
                self.type_name(value)
            )));
        };
        let slot = self.stack.len() - 1;
        self.invoke(iter, slot, 1, slot, ReturnAction::Push, None)
    }

    /// `Print`. A managed `__repr__` runs as a call whose result is
    /// printed on return.
    pub(crate) fn print(&mut self) -> Result<Flow, RuntimeError> {
        let value = self.peek(0)?;
        if let Some(repr) = self.special_of(value, SpecialMethod::Repr) {
            let managed = repr
                .as_object()
                .is_some_and(|r| matches!(self.heap.kind(r), Some(ObjectKind::Closure(_))));
            if managed {
                let slot = self.stack.len() - 1;
                return self.invoke(repr, slot, 1, slot, ReturnAction::Print, None);
            }
        }
        self.write_display(value)?;
        self.pop()?;
        Ok(Flow::Continue)
    }

    pub(crate) fn write_display(&mut self, value: Value) -> Result<(), RuntimeError> {
        self.stack.push(value);
        let text = self.display(value);
        self.stack.pop();
        writeln!(self.out, "{}", text?)
            .map_err(|e| RuntimeError::internal(format!("write to output failed: {e}")))
    }
}
