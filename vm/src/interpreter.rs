//! The dispatch loop.
//!
//! One `step` decodes and executes one instruction of the top frame.
//! Errors surface as `Err` from `step` and are turned into script
//! exceptions by `run`, which unwinds to the nearest handler.

use std::rc::Rc;

use bytecode::{Instruction, decode_at};
use object::{
    Chunk, Closure, Function, FunctionKind, HandlerKind, ObjRef, ObjectKind, SpecialMethod,
    UpvalueDescriptor, Value,
};

use crate::error::RuntimeError;
use crate::frame::{CallFrame, ReturnAction};
use crate::ops::{BinaryOp, BitOp, Comparison};
use crate::vm::Vm;

/// What the loop does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Flow {
    Continue,
    /// The bottom frame returned.
    Exit(Value),
}

impl Vm {
    /// Run `chunk` as a module body. Returns the module's result, or the
    /// uncaught error after reporting it on the error stream.
    pub fn interpret(&mut self, chunk: Chunk) -> Result<Value, RuntimeError> {
        let function = self.alloc(
            self.builtins.function,
            ObjectKind::Function(Function {
                name: "<module>".to_string(),
                arity: 0,
                upvalues: Vec::new(),
                chunk: Rc::new(chunk),
                kind: FunctionKind::Plain,
            }),
        );
        self.stack.push(Value::Object(function));
        let closure = self.alloc(
            self.builtins.function,
            ObjectKind::Closure(Closure {
                function,
                upvalues: Vec::new(),
            }),
        );
        self.stack.pop();
        self.retained.clear();

        let slot = self.stack.len();
        self.stack.push(Value::Object(closure));
        if let Err(err) = self.call_closure(closure, slot + 1, 0, slot, ReturnAction::Exit, None) {
            self.stack.truncate(slot);
            return Err(err);
        }
        self.run()
    }

    /// Allocate a function prototype for use as a chunk constant. The
    /// function stays alive until the next `interpret`.
    pub fn function(
        &mut self,
        name: &str,
        arity: usize,
        upvalues: Vec<UpvalueDescriptor>,
        chunk: Chunk,
        kind: FunctionKind,
    ) -> Value {
        let r = self.alloc(
            self.builtins.function,
            ObjectKind::Function(Function {
                name: name.to_string(),
                arity,
                upvalues,
                chunk: Rc::new(chunk),
                kind,
            }),
        );
        self.retain(Value::Object(r))
    }

    /// Listing of `chunk` with constants rendered.
    pub fn disassemble(&self, chunk: &Chunk) -> String {
        chunk.disassemble(&|value| match self.as_str(value) {
            Some(s) => format!("{s:?}"),
            None => self.plain_form(value),
        })
    }

    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit(value)) => return Ok(value),
                Err(err) => self.throw(err)?,
            }
        }
    }

    fn step(&mut self) -> Result<Flow, RuntimeError> {
        let frame = self.frame_mut()?;
        let start = frame.ip;
        let (instruction, next) = decode_at(frame.chunk.code(), start)
            .map_err(|e| RuntimeError::internal(format!("in {}: {e}", frame.chunk.name())))?;
        frame.ip = next;
        let base = frame.base;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "{start:04} {:<24} {:?}",
                instruction.to_string(),
                self.stack.get(base..).unwrap_or(&[])
            );
        }

        let flow = match instruction {
            Instruction::Constant { idx } => {
                let value = self.constant(idx)?;
                self.stack.push(value);
                Flow::Continue
            }
            Instruction::None => self.push(Value::None),
            Instruction::True => self.push(Value::Boolean(true)),
            Instruction::False => self.push(Value::Boolean(false)),
            Instruction::Pop => {
                self.pop()?;
                Flow::Continue
            }
            Instruction::Swap => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(RuntimeError::internal("stack underflow"));
                }
                self.stack.swap(len - 1, len - 2);
                Flow::Continue
            }
            Instruction::Dup { depth } => {
                let value = self.peek(depth as usize)?;
                self.push(value)
            }

            Instruction::Add => self.binary(BinaryOp::Add)?,
            Instruction::Subtract => self.binary(BinaryOp::Sub)?,
            Instruction::Multiply => self.binary(BinaryOp::Mul)?,
            Instruction::Divide => self.binary(BinaryOp::Div)?,
            Instruction::FloorDiv => self.binary(BinaryOp::FloorDiv)?,
            Instruction::Modulo => self.binary(BinaryOp::Mod)?,
            Instruction::Pow => self.binary(BinaryOp::Pow)?,
            Instruction::BitOr => self.bitwise(BitOp::Or)?,
            Instruction::BitXor => self.bitwise(BitOp::Xor)?,
            Instruction::BitAnd => self.bitwise(BitOp::And)?,
            Instruction::ShiftLeft => self.bitwise(BitOp::Shl)?,
            Instruction::ShiftRight => self.bitwise(BitOp::Shr)?,
            Instruction::Negate => self.negate()?,
            Instruction::BitNegate => self.bit_negate()?,
            Instruction::Not => {
                let value = self.pop()?;
                self.push(Value::Boolean(value.is_falsey()))
            }
            Instruction::Equal => self.equal()?,
            Instruction::Greater => self.compare(Comparison::Greater)?,
            Instruction::Less => self.compare(Comparison::Less)?,
            Instruction::GreaterEqual => self.compare(Comparison::GreaterEqual)?,
            Instruction::LessEqual => self.compare(Comparison::LessEqual)?,
            Instruction::Is => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Boolean(a.is_same(b)))
            }

            Instruction::DefineGlobal { idx } => {
                let name = self.constant_name(idx)?;
                let value = self.pop()?;
                self.globals.insert(name, value);
                Flow::Continue
            }
            Instruction::GetGlobal { idx } => {
                let name = self.constant_name(idx)?;
                match self.globals.get(&name) {
                    Some(&value) => self.push(value),
                    None => return Err(self.undefined(name)),
                }
            }
            Instruction::SetGlobal { idx } => {
                let name = self.constant_name(idx)?;
                if !self.globals.contains_key(&name) {
                    return Err(self.undefined(name));
                }
                let value = self.peek(0)?;
                self.globals.insert(name, value);
                Flow::Continue
            }
            Instruction::DelGlobal { idx } => {
                let name = self.constant_name(idx)?;
                if self.globals.remove(&name).is_none() {
                    return Err(self.undefined(name));
                }
                Flow::Continue
            }

            Instruction::GetLocal { slot } => {
                let value = self.local(base, slot)?;
                self.push(value)
            }
            Instruction::SetLocal { slot } => {
                let value = self.peek(0)?;
                let index = base + slot as usize;
                let local = self
                    .stack
                    .get_mut(index)
                    .ok_or_else(|| RuntimeError::internal(format!("local {slot} out of range")))?;
                *local = value;
                Flow::Continue
            }
            Instruction::SetLocalPop { slot } => {
                let value = self.pop()?;
                let index = base + slot as usize;
                let local = self
                    .stack
                    .get_mut(index)
                    .ok_or_else(|| RuntimeError::internal(format!("local {slot} out of range")))?;
                *local = value;
                Flow::Continue
            }
            Instruction::GetUpvalue { index } => {
                let value = self.get_upvalue(index)?;
                self.push(value)
            }
            Instruction::SetUpvalue { index } => {
                let value = self.peek(0)?;
                self.set_upvalue(index, value)?;
                Flow::Continue
            }
            Instruction::CloseUpvalue => {
                let top = self
                    .stack
                    .len()
                    .checked_sub(1)
                    .ok_or_else(|| RuntimeError::internal("stack underflow"))?;
                self.close_upvalues(top);
                self.pop()?;
                Flow::Continue
            }
            Instruction::Closure { idx } => self.make_closure(idx, base)?,

            Instruction::Jump { offset } | Instruction::Loop { offset } | Instruction::LoopIter { offset } => {
                self.jump(offset)?
            }
            Instruction::JumpIfFalse { offset } => {
                if self.peek(0)?.is_falsey() {
                    self.jump(offset)?;
                }
                Flow::Continue
            }
            Instruction::JumpIfTrue { offset } => {
                if !self.peek(0)?.is_falsey() {
                    self.jump(offset)?;
                }
                Flow::Continue
            }
            Instruction::PopJumpIfFalse { offset } => {
                if self.pop()?.is_falsey() {
                    self.jump(offset)?;
                }
                Flow::Continue
            }
            Instruction::JumpIfFalseOrPop { offset } => {
                if self.peek(0)?.is_falsey() {
                    self.jump(offset)?;
                } else {
                    self.pop()?;
                }
                Flow::Continue
            }
            Instruction::JumpIfTrueOrPop { offset } => {
                if self.peek(0)?.is_falsey() {
                    self.pop()?;
                } else {
                    self.jump(offset)?;
                }
                Flow::Continue
            }

            Instruction::Call { argc } => {
                let callee = self.peek(argc as usize)?;
                self.call_value(callee, argc as usize, ReturnAction::Push)?
            }
            Instruction::CallMethod { argc } => self.call_method(argc as usize)?,
            Instruction::Return => self.return_from_frame()?,

            Instruction::Class { idx } => self.make_class(idx)?,
            Instruction::ClassProperty { idx } => self.class_property(idx)?,
            Instruction::Inherit => self.inherit()?,
            Instruction::Finalize => {
                let value = self.peek(0)?;
                let class = self
                    .as_class(value)
                    .ok_or_else(|| RuntimeError::internal("Finalize on a non-class"))?;
                self.finalize_class(class)?;
                Flow::Continue
            }
            Instruction::GetProperty { idx } => self.get_property(idx)?,
            Instruction::SetProperty { idx } => self.set_property(idx)?,
            Instruction::DelProperty { idx } => self.del_property(idx)?,
            Instruction::GetMethod { idx } => self.get_method(idx)?,
            Instruction::GetSuper { idx } => self.get_super(idx)?,

            Instruction::InvokeIter => self.invoke_iter()?,
            Instruction::CallIter { offset } => {
                let target = self.jump_target(offset)?;
                let iterator = self.peek(0)?;
                self.stack.push(iterator);
                self.call_value(iterator, 0, ReturnAction::IterStep { iterator, target })?
            }
            Instruction::Yield => {
                let value = self.pop()?;
                self.suspend(value, next, true)?
            }
            Instruction::YieldFrom { offset } => {
                let done_target = self.jump_target(offset)?;
                let iterator = self.peek(0)?;
                self.stack.push(iterator);
                let action = ReturnAction::YieldFrom {
                    iterator,
                    resume_ip: start,
                    done_target,
                };
                self.call_value(iterator, 0, action)?
            }

            Instruction::PushTry { offset } => {
                self.push_handler(HandlerKind::Try, offset)?;
                Flow::Continue
            }
            Instruction::PushWith { offset } => self.push_with(offset)?,
            Instruction::PopHandler => {
                self.frame_mut()?
                    .handlers
                    .pop()
                    .ok_or_else(|| RuntimeError::internal("PopHandler without a handler"))?;
                Flow::Continue
            }
            Instruction::Raise => return Err(self.raise()?),
            Instruction::FilterExcept => self.filter_except()?,
            Instruction::BeginFinally => {
                self.peek(0)?;
                Flow::Continue
            }
            Instruction::EndFinally => {
                let pending = self.pop()?;
                if pending != Value::None {
                    return Err(RuntimeError::Raised(pending));
                }
                Flow::Continue
            }
            Instruction::CleanupWith => self.cleanup_with()?,

            Instruction::InvokeGetter => self.invoke_item(SpecialMethod::GetItem, 2)?,
            Instruction::InvokeSetter => self.invoke_item(SpecialMethod::SetItem, 3)?,
            Instruction::InvokeDelete => self.invoke_item(SpecialMethod::DelItem, 2)?,
            Instruction::InvokeContains => {
                let len = self.stack.len();
                if len < 2 {
                    return Err(RuntimeError::internal("stack underflow in InvokeContains"));
                }
                self.stack.swap(len - 1, len - 2);
                self.invoke_item(SpecialMethod::Contains, 2)?
            }
            Instruction::Docstring => self.docstring()?,

            Instruction::Print => self.print()?,
        };
        Ok(flow)
    }

    // ── stack and frame helpers ────────────────────────────────────

    #[inline]
    pub(crate) fn push(&mut self, value: Value) -> Flow {
        self.stack.push(value);
        Flow::Continue
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::internal("stack underflow"))
    }

    #[inline]
    pub(crate) fn peek(&self, depth: usize) -> Result<Value, RuntimeError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|i| self.stack[i])
            .ok_or_else(|| RuntimeError::internal("stack underflow"))
    }

    pub(crate) fn frame(&self) -> Result<&CallFrame, RuntimeError> {
        self.frames
            .last()
            .ok_or_else(|| RuntimeError::internal("no active frame"))
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut CallFrame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::internal("no active frame"))
    }

    fn local(&self, base: usize, slot: u32) -> Result<Value, RuntimeError> {
        self.stack
            .get(base + slot as usize)
            .copied()
            .ok_or_else(|| RuntimeError::internal(format!("local {slot} out of range")))
    }

    fn constant(&self, idx: u32) -> Result<Value, RuntimeError> {
        let frame = self.frame()?;
        frame.chunk.constant(idx).ok_or_else(|| {
            RuntimeError::internal(format!("constant #{idx} out of range in {}", frame.chunk.name()))
        })
    }

    /// Constant operand that must be an interned string.
    pub(crate) fn constant_name(&self, idx: u32) -> Result<ObjRef, RuntimeError> {
        let value = self.constant(idx)?;
        match value.as_object() {
            Some(r) if self.as_str(value).is_some() => Ok(r),
            _ => Err(RuntimeError::internal(format!("constant #{idx} is not a name"))),
        }
    }

    pub(crate) fn name_str(&self, name: ObjRef) -> String {
        self.as_str(Value::Object(name)).unwrap_or("?").to_string()
    }

    fn undefined(&self, name: ObjRef) -> RuntimeError {
        RuntimeError::NameError(format!("Undefined variable '{}'.", self.name_str(name)))
    }

    /// Absolute target of a jump decoded in the current frame.
    pub(crate) fn jump_target(&self, offset: i32) -> Result<usize, RuntimeError> {
        let frame = self.frame()?;
        let target = frame.ip as i64 + offset as i64;
        if target < 0 || target as usize > frame.chunk.code().len() {
            return Err(RuntimeError::internal(format!("jump to {target} out of range")));
        }
        Ok(target as usize)
    }

    fn jump(&mut self, offset: i32) -> Result<Flow, RuntimeError> {
        let target = self.jump_target(offset)?;
        self.frame_mut()?.ip = target;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::{self, Write};

    use bytecode::{BuildError, Op};
    use heap::HeapSettings;
    use object::ChunkBuilder;

    use super::*;
    use crate::demos::{self, WithFault};
    use crate::vm::VmSettings;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        vm: Vm,
        out: SharedBuffer,
        err: SharedBuffer,
    }

    fn harness_with(settings: VmSettings) -> Harness {
        let mut vm = Vm::new(settings).unwrap();
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        vm.set_output(Box::new(out.clone()));
        vm.set_error_output(Box::new(err.clone()));
        Harness { vm, out, err }
    }

    fn harness() -> Harness {
        harness_with(VmSettings::default())
    }

    fn stressed() -> Harness {
        harness_with(VmSettings {
            heap: HeapSettings {
                stress: true,
                ..HeapSettings::default()
            },
            ..VmSettings::default()
        })
    }

    impl Harness {
        fn run(
            &mut self,
            build: impl FnOnce(&mut Vm) -> Result<Chunk, BuildError>,
        ) -> Result<Value, RuntimeError> {
            let chunk = build(&mut self.vm).unwrap();
            self.vm.interpret(chunk)
        }

        fn demo(&mut self, name: &str) -> Result<Value, RuntimeError> {
            let demo = demos::find(name).unwrap();
            self.run(demo.build)
        }
    }

    fn module(build: impl FnOnce(&mut Vm, &mut ChunkBuilder) -> Result<(), BuildError>)
    -> impl FnOnce(&mut Vm) -> Result<Chunk, BuildError> {
        move |vm| {
            let mut b = ChunkBuilder::new("<module>");
            build(vm, &mut b)?;
            Ok(b.finish())
        }
    }

    // ── end to end ─────────────────────────────────────────────────

    #[test]
    fn one_plus_two_prints_three() {
        let mut h = harness();
        assert_eq!(h.demo("arith"), Ok(Value::Integer(3)));
        assert_eq!(h.out.text(), "3\n");
        assert_eq!(h.vm.stack_len(), 0);
    }

    #[test]
    fn string_plus_int_concatenates() {
        let mut h = harness();
        h.demo("concat").unwrap();
        assert_eq!(h.out.text(), "a1\n");
    }

    #[test]
    fn concatenation_stringifies_scalars() {
        let mut h = harness();
        h.run(module(|vm, b| {
            b.emit_constant(vm.string("x="))?;
            b.emit_constant(Value::Floating(2.5))?;
            b.emit(Op::Add);
            b.emit(Op::True);
            b.emit(Op::Add);
            b.emit(Op::None);
            b.emit(Op::Add);
            b.emit(Op::Print);
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(())
        }))
        .unwrap();
        assert_eq!(h.out.text(), "x=2.5TrueNone\n");
    }

    #[test]
    fn incompatible_operands_raise_type_error() {
        let mut h = harness();
        let err = h.demo("error").unwrap_err();
        assert_eq!(
            err,
            RuntimeError::TypeError("Incompatible types for binary operand +: int and str".into())
        );
        assert_eq!(
            h.err.text(),
            "TypeError: Incompatible types for binary operand +: int and str\n[line 3] in <module>\n"
        );
        assert_eq!(h.vm.stack_len(), 0);
    }

    #[test]
    fn undefined_global_is_a_name_error() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let name = b.add_constant(vm.string("missing"));
                b.get_global(name)?;
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(err, RuntimeError::NameError("Undefined variable 'missing'.".into()));
    }

    #[test]
    fn set_global_requires_definition() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let name = b.add_constant(vm.string("y"));
                b.emit_constant(Value::Integer(1))?;
                b.set_global(name)?;
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NameError(_)));
        assert_eq!(h.vm.global("y"), None);
    }

    #[test]
    fn globals_persist_between_runs() {
        let mut h = harness();
        h.demo("globals").unwrap();
        assert_eq!(h.out.text(), "20\n");
        assert_eq!(h.vm.global("x"), Some(Value::Integer(20)));
    }

    #[test]
    fn arithmetic_semantics() {
        let cases: &[(Op, Value, Value, Value)] = &[
            (Op::Divide, Value::Integer(7), Value::Integer(2), Value::Floating(3.5)),
            (Op::FloorDiv, Value::Integer(-7), Value::Integer(2), Value::Integer(-4)),
            (Op::Modulo, Value::Integer(-7), Value::Integer(3), Value::Integer(2)),
            (Op::Pow, Value::Integer(2), Value::Integer(10), Value::Integer(1024)),
            (Op::Multiply, Value::Integer(i64::MAX), Value::Integer(2), Value::Integer(-2)),
            (Op::Add, Value::Integer(1), Value::Floating(0.5), Value::Floating(1.5)),
            (Op::ShiftLeft, Value::Integer(1), Value::Integer(4), Value::Integer(16)),
            (Op::BitXor, Value::Integer(6), Value::Integer(3), Value::Integer(5)),
            (Op::Less, Value::Integer(1), Value::Floating(1.5), Value::Boolean(true)),
            (Op::Equal, Value::Integer(1), Value::Floating(1.0), Value::Boolean(true)),
            (Op::Is, Value::Integer(1), Value::Floating(1.0), Value::Boolean(false)),
        ];
        for &(op, a, b, expected) in cases {
            let mut h = harness();
            let result = h.run(module(|_, builder| {
                builder.emit_constant(a)?;
                builder.emit_constant(b)?;
                builder.emit(op);
                builder.emit(Op::Return);
                Ok(())
            }));
            assert_eq!(result, Ok(expected), "{op:?}");
        }
    }

    #[test]
    fn addition_and_subtraction_match_host_arithmetic() {
        let ints = [0, 1, -1, i64::MAX, i64::MIN, 1 << 24, -(1 << 24) - 1];
        let floats = [0.0, 1.5, -2.25, 16777216.0];
        let mut operands: Vec<Value> = ints.iter().map(|&n| Value::Integer(n)).collect();
        operands.extend(floats.iter().map(|&x| Value::Floating(x)));

        let host = |op: Op, a: Value, b: Value| -> Value {
            let (x, y) = match (a, b) {
                (Value::Integer(x), Value::Integer(y)) => {
                    return Value::Integer(match op {
                        Op::Add => x.wrapping_add(y),
                        _ => x.wrapping_sub(y),
                    });
                }
                (Value::Integer(x), Value::Floating(y)) => (x as f64, y),
                (Value::Floating(x), Value::Integer(y)) => (x, y as f64),
                (Value::Floating(x), Value::Floating(y)) => (x, y),
                _ => unreachable!(),
            };
            Value::Floating(match op {
                Op::Add => x + y,
                _ => x - y,
            })
        };

        let mut h = harness();
        for &a in &operands {
            for &b in &operands {
                for op in [Op::Add, Op::Subtract] {
                    let result = h.run(module(|_, builder| {
                        builder.emit_constant(a)?;
                        builder.emit_constant(b)?;
                        builder.emit(op);
                        builder.emit(Op::Return);
                        Ok(())
                    }));
                    assert_eq!(result, Ok(host(op, a, b)), "{a:?} {op:?} {b:?}");
                }
            }
        }
    }

    #[test]
    fn division_by_zero() {
        let mut h = harness();
        let err = h
            .run(module(|_, b| {
                b.emit_constant(Value::Integer(1))?;
                b.emit_constant(Value::Integer(0))?;
                b.emit(Op::Modulo);
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ZeroDivision(_)));
    }

    #[test]
    fn negation_of_non_number() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                b.emit_constant(vm.string("s"))?;
                b.emit(Op::Negate);
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::TypeError("Incompatible operand type for prefix negation.".into())
        );
    }

    #[test]
    fn jumps_select_branches() {
        let mut h = harness();
        let result = h.run(module(|vm, b| {
            b.emit(Op::False);
            let else_branch = b.jump(Op::PopJumpIfFalse);
            b.emit_constant(vm.string("then"))?;
            let end = b.jump(Op::Jump);
            b.bind(else_branch)?;
            b.emit_constant(vm.string("else"))?;
            b.bind(end)?;
            b.emit(Op::Print);
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(())
        }));
        assert_eq!(result, Ok(Value::None));
        assert_eq!(h.out.text(), "else\n");
    }

    #[test]
    fn loop_counts_down() {
        let mut h = harness();
        h.run(module(|_, b| {
            // n = 3; while n: print n; n = n - 1
            b.emit_constant(Value::Integer(3))?;
            let top = b.current_offset();
            b.get_local(0)?;
            let exit = b.jump(Op::PopJumpIfFalse);
            b.get_local(0)?;
            b.emit(Op::Print);
            b.get_local(0)?;
            b.emit_constant(Value::Integer(1))?;
            b.emit(Op::Subtract);
            b.set_local(0)?;
            b.emit(Op::Pop);
            b.loop_to(Op::Loop, top)?;
            b.bind(exit)?;
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(())
        }))
        .unwrap();
        assert_eq!(h.out.text(), "3\n2\n1\n");
    }

    #[test]
    fn closures_share_captured_variable() {
        let mut h = harness();
        h.demo("closure").unwrap();
        assert_eq!(h.out.text(), "3\n");
    }

    #[test]
    fn classes_inherit_and_call_super() {
        let mut h = harness();
        h.demo("class").unwrap();
        assert_eq!(h.out.text(), "Rex makes a sound!\n");
    }

    #[test]
    fn special_method_added_to_base_reaches_finalized_subclass() {
        let mut h = harness();
        h.run(|vm| {
            // def __repr__(self): return "custom"
            let mut body = ChunkBuilder::new("__repr__");
            let text = vm.string("custom");
            body.emit_constant(text)?;
            body.emit(Op::Return);
            let repr = vm.function("__repr__", 1, Vec::new(), body.finish(), FunctionKind::Plain);

            let mut b = ChunkBuilder::new("<module>");
            let a = b.add_constant(vm.string("A"));
            let sub = b.add_constant(vm.string("B"));
            let repr_name = b.add_constant(vm.string("__repr__"));
            let repr = b.add_constant(repr);
            b.emit_with_operand(Op::Class, a)?;
            b.emit(Op::Finalize);
            b.define_global(a)?;
            b.emit_with_operand(Op::Class, sub)?;
            b.get_global(a)?;
            b.emit(Op::Inherit);
            b.emit(Op::Finalize);
            b.define_global(sub)?;

            // A.__repr__ = __repr__
            b.get_global(a)?;
            b.emit_with_operand(Op::Closure, repr)?;
            b.emit_with_operand(Op::SetProperty, repr_name)?;
            b.emit(Op::Pop);

            for class in [a, sub] {
                b.get_global(class)?;
                b.call(0)?;
                b.emit(Op::Print);
            }
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(b.finish())
        })
        .unwrap();
        assert_eq!(h.out.text(), "custom\ncustom\n");
    }

    /// Emit `Closure` for `body` and store it on the class below it.
    fn class_method(
        vm: &mut Vm,
        b: &mut ChunkBuilder,
        name: &str,
        arity: usize,
        body: ChunkBuilder,
    ) -> Result<(), BuildError> {
        let function = vm.function(name, arity, Vec::new(), body.finish(), FunctionKind::Plain);
        let function = b.add_constant(function);
        let key = b.add_constant(vm.string(name));
        b.emit_with_operand(Op::Closure, function)?;
        b.emit_with_operand(Op::ClassProperty, key)
    }

    #[test]
    fn item_access_dispatches_to_special_methods() {
        let mut h = harness();
        h.run(|vm| {
            let mut b = ChunkBuilder::new("<module>");
            let class = b.add_constant(vm.string("Box"));
            let instance = b.add_constant(vm.string("b"));
            b.emit_with_operand(Op::Class, class)?;

            // def __getitem__(self, key): return key + key
            let mut get = ChunkBuilder::new("__getitem__");
            get.get_local(1)?;
            get.get_local(1)?;
            get.emit(Op::Add);
            get.emit(Op::Return);
            class_method(vm, &mut b, "__getitem__", 2, get)?;

            // def __setitem__(self, key, value): print(value)
            let mut set = ChunkBuilder::new("__setitem__");
            set.get_local(2)?;
            set.emit(Op::Print);
            set.emit(Op::None);
            set.emit(Op::Return);
            class_method(vm, &mut b, "__setitem__", 3, set)?;

            // def __delitem__(self, key): print(key)
            let mut del = ChunkBuilder::new("__delitem__");
            del.get_local(1)?;
            del.emit(Op::Print);
            del.emit(Op::None);
            del.emit(Op::Return);
            class_method(vm, &mut b, "__delitem__", 2, del)?;

            // def __contains__(self, item): return item
            let mut contains = ChunkBuilder::new("__contains__");
            contains.get_local(1)?;
            contains.emit(Op::Return);
            class_method(vm, &mut b, "__contains__", 2, contains)?;

            b.emit(Op::Finalize);
            b.call(0)?;
            b.define_global(instance)?;

            // print(b[21])
            b.get_global(instance)?;
            b.emit_constant(Value::Integer(21))?;
            b.emit(Op::InvokeGetter);
            b.emit(Op::Print);
            // b[1] = 7
            b.get_global(instance)?;
            b.emit_constant(Value::Integer(1))?;
            b.emit_constant(Value::Integer(7))?;
            b.emit(Op::InvokeSetter);
            b.emit(Op::Pop);
            // del b[3]
            b.get_global(instance)?;
            b.emit_constant(Value::Integer(3))?;
            b.emit(Op::InvokeDelete);
            // print(5 in b)
            b.emit_constant(Value::Integer(5))?;
            b.get_global(instance)?;
            b.emit(Op::InvokeContains);
            b.emit(Op::Print);
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(b.finish())
        })
        .unwrap();
        assert_eq!(h.out.text(), "42\n7\n3\n5\n");
        assert_eq!(h.vm.stack_len(), 0);
    }

    #[test]
    fn item_access_without_special_method_is_a_type_error() {
        let mut h = harness();
        let err = h
            .run(module(|_, b| {
                b.emit_constant(Value::Integer(1))?;
                b.emit_constant(Value::Integer(0))?;
                b.emit(Op::InvokeGetter);
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(err, RuntimeError::TypeError("'int' object is not subscriptable".into()));

        let err = h
            .run(module(|_, b| {
                b.emit_constant(Value::Integer(1))?;
                b.emit(Op::None);
                b.emit(Op::InvokeContains);
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::TypeError("'NoneType' object can not be tested for membership".into())
        );
    }

    #[test]
    fn docstring_and_set_local_pop() {
        let mut h = harness();
        h.run(module(|vm, b| {
            let class = b.add_constant(vm.string("Documented"));
            let doc = b.add_constant(vm.string("__doc__"));
            b.emit_with_operand(Op::Class, class)?;
            b.emit_constant(vm.string("Says hello."))?;
            b.emit(Op::Docstring);
            b.emit_with_operand(Op::GetProperty, doc)?;
            b.emit(Op::Print);

            // x = 1; x = 2 (as a statement); print(x)
            b.emit_constant(Value::Integer(1))?;
            b.emit_constant(Value::Integer(2))?;
            b.emit_with_operand(Op::SetLocalPop, 0)?;
            b.get_local(0)?;
            b.emit(Op::Print);
            b.emit(Op::Pop);
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(())
        }))
        .unwrap();
        assert_eq!(h.out.text(), "Says hello.\n2\n");
    }

    #[test]
    fn range_iteration() {
        let mut h = harness();
        h.demo("range").unwrap();
        assert_eq!(h.out.text(), "1\n2\n3\n");
    }

    /// Output of `for i in range(*args): print(i)`.
    fn print_range(args: &[i64]) -> String {
        let mut h = harness();
        h.run(module(|vm, b| {
            let range = b.add_constant(vm.string("range"));
            b.get_global(range)?;
            for &n in args {
                b.emit_constant(Value::Integer(n))?;
            }
            b.call(args.len() as u32)?;
            b.emit(Op::InvokeIter);
            let top = b.current_offset();
            let done = b.jump(Op::CallIter);
            b.emit(Op::Print);
            b.loop_to(Op::LoopIter, top)?;
            b.bind(done)?;
            b.emit(Op::Pop);
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(())
        }))
        .unwrap();
        h.out.text()
    }

    #[test]
    fn range_forms() {
        assert_eq!(print_range(&[5]), "0\n1\n2\n3\n4\n");
        assert_eq!(print_range(&[5, 0, -1]), "5\n4\n3\n2\n1\n");
        assert_eq!(print_range(&[0, 10, 4]), "0\n4\n8\n");
        assert_eq!(print_range(&[3, 3]), "");
        assert_eq!(print_range(&[0, i64::MAX, i64::MAX - 1]), format!("0\n{}\n", i64::MAX - 1));
    }

    #[test]
    fn bigint_with_failed_init_is_swept_once() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let bigint = b.add_constant(vm.string("bigint"));
                b.get_global(bigint)?;
                b.emit_constant(vm.string("x"))?;
                b.call(1)?;
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::TypeError("bigint() argument must be int, not 'str'".into())
        );
        let stats = h.vm.collect();
        assert_eq!(stats.finalized, 1);
        assert_eq!(h.vm.collect().finalized, 0);
    }

    #[test]
    fn range_rejects_zero_step() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let range = b.add_constant(vm.string("range"));
                b.get_global(range)?;
                for n in [0, 5, 0] {
                    b.emit_constant(Value::Integer(n))?;
                }
                b.call(3)?;
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(err, RuntimeError::ValueError("range() arg 3 must not be zero".into()));
    }

    #[test]
    fn range_repr_and_arity() {
        let mut h = harness();
        h.run(module(|vm, b| {
            let range = b.add_constant(vm.string("range"));
            b.get_global(range)?;
            b.emit_constant(Value::Integer(1))?;
            b.emit_constant(Value::Integer(9))?;
            b.emit_constant(Value::Integer(2))?;
            b.call(3)?;
            b.emit(Op::Print);
            b.emit(Op::None);
            b.emit(Op::Return);
            Ok(())
        }))
        .unwrap();
        assert_eq!(h.out.text(), "range(1,9,2)\n");

        let err = h
            .run(module(|vm, b| {
                let range = b.add_constant(vm.string("range"));
                b.get_global(range)?;
                b.call(0)?;
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Arity(_)));
    }

    #[test]
    fn subclassing_range_is_rejected() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let name = b.add_constant(vm.string("MyRange"));
                let range = b.add_constant(vm.string("range"));
                b.emit_with_operand(Op::Class, name)?;
                b.get_global(range)?;
                b.emit(Op::Inherit);
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(err, RuntimeError::TypeError("'range' can not be subclassed".into()));
    }

    #[test]
    fn generators_yield_then_return_themselves() {
        let mut h = harness();
        h.demo("generator").unwrap();
        assert_eq!(h.out.text(), "1\n2\n3\n");
    }

    #[test]
    fn yield_from_delegates_and_returns_inner_result() {
        let mut h = harness();
        h.demo("yield-from").unwrap();
        assert_eq!(h.out.text(), "1\n2\n10\n");
    }

    #[test]
    fn try_catches_name_error() {
        let mut h = harness();
        h.demo("try").unwrap();
        assert_eq!(h.out.text(), "caught\n");
        assert_eq!(h.err.text(), "");
    }

    #[test]
    fn unmatched_filter_reraises() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let missing = b.add_constant(vm.string("missing"));
                let value_error = b.add_constant(vm.string("ValueError"));
                let handler = b.jump(Op::PushTry);
                b.get_global(missing)?;
                b.emit(Op::Return);
                b.bind(handler)?;
                b.get_global(value_error)?;
                b.emit(Op::FilterExcept);
                let reraise = b.jump(Op::PopJumpIfFalse);
                b.emit(Op::Return);
                b.bind(reraise)?;
                b.emit(Op::Raise);
                Ok(())
            }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NameError(_)));
    }

    #[test]
    fn raised_exception_class_is_instantiated() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let value_error = b.add_constant(vm.string("ValueError"));
                b.get_global(value_error)?;
                b.emit_constant(vm.string("bad value"))?;
                b.call(1)?;
                b.emit(Op::Raise);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(err, RuntimeError::ValueError("bad value".into()));
        assert!(h.err.text().starts_with("ValueError: bad value\n[line 1]"));
    }

    #[test]
    fn user_exception_classes_are_reported_by_name() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let name = b.add_constant(vm.string("Oops"));
                let exception = b.add_constant(vm.string("Exception"));
                b.emit_with_operand(Op::Class, name)?;
                b.get_global(exception)?;
                b.emit(Op::Inherit);
                b.emit(Op::Finalize);
                b.emit(Op::Raise);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(
            err,
            RuntimeError::Uncaught {
                class: "Oops".into(),
                message: String::new(),
            }
        );
    }

    #[test]
    fn with_calls_enter_and_exit() {
        let mut h = harness();
        h.demo("with").unwrap();
        assert_eq!(h.out.text(), "enter\nbody\nexit\n");
    }

    #[test]
    fn with_reraises_after_cleanup() {
        let mut h = harness();
        let err = h
            .run(|vm| demos::with_statement(vm, WithFault::Body))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NameError(_)));
        assert_eq!(h.out.text(), "enter\nexit\n");
    }

    #[test]
    fn failing_enter_skips_exit() {
        let mut h = harness();
        let err = h
            .run(|vm| demos::with_statement(vm, WithFault::Enter))
            .unwrap_err();
        assert_eq!(err, RuntimeError::NameError("Undefined variable 'missing'.".into()));
        assert_eq!(h.out.text(), "enter\n");
        assert_eq!(h.vm.stack_len(), 0);
    }

    #[test]
    fn bigint_addition_through_operator() {
        let mut h = harness();
        h.demo("bigint").unwrap();
        assert_eq!(h.out.text(), "<bigint +0x1000000>\n");
    }

    #[test]
    fn bigint_mixed_signs_not_implemented() {
        let mut h = harness();
        let err = h
            .run(module(|vm, b| {
                let bigint = b.add_constant(vm.string("bigint"));
                for n in [5, -5] {
                    b.get_global(bigint)?;
                    b.emit_constant(Value::Integer(n))?;
                    b.call(1)?;
                }
                b.emit(Op::Add);
                b.emit(Op::Return);
                Ok(())
            }))
            .unwrap_err();
        assert_eq!(err, RuntimeError::NotImplemented("todo subtraction".into()));
    }

    #[test]
    fn deep_recursion_is_a_recursion_error() {
        let mut h = harness_with(VmSettings {
            max_frames: 32,
            ..VmSettings::default()
        });
        let err = h
            .run(|vm| {
                // def f(): return f()
                let name = vm.string("f");
                let mut body = ChunkBuilder::new("f");
                let f = body.add_constant(name);
                body.get_global(f)?;
                body.call(0)?;
                body.emit(Op::Return);
                let function = vm.function("f", 0, Vec::new(), body.finish(), FunctionKind::Plain);

                let mut b = ChunkBuilder::new("<module>");
                let f = b.add_constant(name);
                let function = b.add_constant(function);
                b.emit_with_operand(Op::Closure, function)?;
                b.define_global(f)?;
                b.get_global(f)?;
                b.call(0)?;
                b.emit(Op::Return);
                Ok(b.finish())
            })
            .unwrap_err();
        assert_eq!(err, RuntimeError::StackOverflow);
        assert_eq!(h.vm.stack_len(), 0);
    }

    #[test]
    fn malformed_bytecode_is_internal() {
        let mut h = harness();
        let err = h
            .run(module(|_, b| {
                b.emit_constant(Value::Integer(1))?;
                Ok(())
            }))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Internal(_)));
    }

    #[test]
    fn every_demo_survives_gc_stress() {
        for demo in demos::DEMOS {
            let mut plain = harness();
            let expected = plain.run(demo.build);
            let mut h = stressed();
            let result = h.run(demo.build);
            assert_eq!(result.is_ok(), expected.is_ok(), "{}", demo.name);
            assert_eq!(h.out.text(), plain.out.text(), "{}", demo.name);
            assert!(h.vm.heap().collections() > 0);
        }
    }

    #[test]
    fn collection_reclaims_garbage_and_keeps_globals() {
        let mut h = harness();
        h.demo("class").unwrap();
        let before = h.vm.heap().live_objects();
        let stats = h.vm.collect();
        assert!(stats.freed > 0);
        assert!(h.vm.heap().live_objects() < before);
        assert!(h.vm.global("Dog").is_some());
        h.run(module(|vm, b| {
            let d = b.add_constant(vm.string("d"));
            let speak = b.add_constant(vm.string("speak"));
            b.get_global(d)?;
            b.emit_with_operand(Op::GetMethod, speak)?;
            b.emit_with_operand(Op::CallMethod, 0)?;
            b.emit(Op::Return);
            Ok(())
        }))
        .unwrap();
        assert!(h.out.text().ends_with("Rex makes a sound!\n"));
    }
}
