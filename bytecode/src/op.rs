/// Bytecode opcodes.
///
/// Every opcode is one byte followed by zero or more operand bytes. The
/// operand layout is fixed per opcode, see [`Op::shape`]:
///
/// - constant pool indices are 8-bit, the `*Long` twin takes a 24-bit
///   big-endian index
/// - stack slots, upvalue indices and argument counts follow the same
///   8-bit / 24-bit scheme
/// - jump offsets are always 16-bit big-endian, relative to the first byte
///   after the operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Return the top of the stack from the current frame.
    Return = 0x00,

    /// Pop two operands, push their sum (or string concatenation).
    Add,
    Subtract,
    Multiply,
    /// True division, always produces a float for numeric operands.
    Divide,
    FloorDiv,
    Modulo,
    Pow,
    /// Negate the top of the stack.
    Negate,

    /// Push `None`.
    None,
    /// Push `True`.
    True,
    /// Push `False`.
    False,

    /// Replace the top of the stack with its logical negation.
    Not,
    Equal,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    /// Identity comparison.
    Is,

    /// Discard the top of the stack.
    Pop,
    /// Exchange the two topmost values.
    Swap,

    BitOr,
    BitXor,
    BitAnd,
    ShiftLeft,
    ShiftRight,
    BitNegate,

    /// Stack: `class, superclass` -> `class`.
    Inherit,
    /// Populate the special-method cache of the class on top of the stack.
    Finalize,
    /// Raise the value on top of the stack.
    Raise,
    /// Close the upvalue that refers to the top slot, then pop it.
    CloseUpvalue,
    /// Pop and print the display form of a value.
    Print,
    /// Suspend the current generator, handing the top of the stack to its
    /// caller.
    Yield,
    /// Replace the top of the stack with the result of its `__iter__`.
    InvokeIter,
    /// Leave the innermost handler scope of the current frame.
    PopHandler,
    /// Stack: `exception, class` -> `exception, matched`.
    FilterExcept,
    /// Enter a `finally` block. The top of the stack is `None` or the
    /// exception that interrupted the protected region.
    BeginFinally,
    /// Leave a `finally` block, re-raising the saved exception if any.
    EndFinally,
    /// Stack: `manager, exception-or-None`. Calls `manager.__exit__`.
    CleanupWith,
    /// Stack: `object, key` -> `object.__getitem__(key)`.
    InvokeGetter,
    /// Stack: `object, key, value` -> `object.__setitem__(key, value)`.
    InvokeSetter,
    /// Stack: `object, key` -> (empty). Calls `object.__delitem__(key)`.
    InvokeDelete,
    /// Stack: `item, container` -> `container.__contains__(item)`.
    InvokeContains,
    /// Stack: `class, string` -> `class`; stores the string as `__doc__`.
    Docstring,

    /// Push a constant.
    /// Operands: `idx:u8`
    Constant,
    /// Operands: `idx:u24`
    ConstantLong,
    /// Pop a value into a new global named by a constant.
    DefineGlobal,
    DefineGlobalLong,
    GetGlobal,
    GetGlobalLong,
    /// Assign an existing global. The value stays on the stack.
    SetGlobal,
    SetGlobalLong,
    DelGlobal,
    DelGlobalLong,
    /// Push a new class named by a constant.
    Class,
    ClassLong,
    /// Stack: `class, value` -> `class`; stores `value` under the name.
    ClassProperty,
    ClassPropertyLong,
    GetProperty,
    GetPropertyLong,
    /// Stack: `object, value` -> `value`.
    SetProperty,
    SetPropertyLong,
    DelProperty,
    DelPropertyLong,
    /// Stack: `object` -> `callable, receiver` (or `None, attribute`).
    GetMethod,
    GetMethodLong,
    /// Stack: `receiver, superclass` -> `bound method`.
    GetSuper,
    GetSuperLong,
    /// Create a closure from a function constant.
    Closure,
    ClosureLong,

    /// Push a copy of a local slot.
    /// Operands: `slot:u8`
    GetLocal,
    /// Operands: `slot:u24`
    GetLocalLong,
    /// Store the top of the stack into a local slot without popping.
    SetLocal,
    SetLocalLong,
    /// Pop the top of the stack into a local slot.
    SetLocalPop,
    SetLocalPopLong,
    GetUpvalue,
    GetUpvalueLong,
    SetUpvalue,
    SetUpvalueLong,
    /// Call the value below `argc` arguments.
    Call,
    CallLong,
    /// Call a `GetMethod` pair with `argc` arguments.
    CallMethod,
    CallMethodLong,
    /// Push a copy of the value `n` slots below the top.
    Dup,
    DupLong,

    /// Unconditional forward jump.
    /// Operands: `offset:u16`
    Jump,
    /// Jump if the top of the stack is falsey. Does not pop.
    JumpIfFalse,
    /// Jump if the top of the stack is truthy. Does not pop.
    JumpIfTrue,
    /// Pop, then jump if the popped value was falsey.
    PopJumpIfFalse,
    /// Jump if falsey, otherwise pop.
    JumpIfFalseOrPop,
    /// Jump if truthy, otherwise pop.
    JumpIfTrueOrPop,
    /// Unconditional backward jump.
    Loop,
    /// Open a `try` handler scope whose landing pad is the jump target.
    PushTry,
    /// Open a `with` scope over the context manager on top of the stack.
    PushWith,
    /// Call the iterator on top of the stack, jump when it is exhausted.
    CallIter,
    /// Backward jump closing an iteration loop.
    LoopIter,
    /// Delegate to the iterator on top of the stack until it is exhausted,
    /// then jump.
    YieldFrom,
}

/// Operand layout of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// No operand bytes.
    Simple,
    /// A constant pool index, 1 byte or 3 bytes when `long`.
    Constant { long: bool },
    /// A slot, index or count, 1 byte or 3 bytes when `long`.
    Operand { long: bool },
    /// A 2-byte jump offset.
    Jump { backward: bool },
}

impl Op {
    pub const COUNT: usize = Op::YieldFrom as usize + 1;

    pub const fn shape(self) -> Shape {
        use Op::*;
        match self {
            Constant | DefineGlobal | GetGlobal | SetGlobal | DelGlobal
            | Class | ClassProperty | GetProperty | SetProperty
            | DelProperty | GetMethod | GetSuper | Closure => {
                Shape::Constant { long: false }
            }
            ConstantLong | DefineGlobalLong | GetGlobalLong | SetGlobalLong
            | DelGlobalLong | ClassLong | ClassPropertyLong
            | GetPropertyLong | SetPropertyLong | DelPropertyLong
            | GetMethodLong | GetSuperLong | ClosureLong => {
                Shape::Constant { long: true }
            }
            GetLocal | SetLocal | SetLocalPop | GetUpvalue | SetUpvalue
            | Call | CallMethod | Dup => Shape::Operand { long: false },
            GetLocalLong | SetLocalLong | SetLocalPopLong | GetUpvalueLong
            | SetUpvalueLong | CallLong | CallMethodLong | DupLong => {
                Shape::Operand { long: true }
            }
            Jump | JumpIfFalse | JumpIfTrue | PopJumpIfFalse
            | JumpIfFalseOrPop | JumpIfTrueOrPop | PushTry | PushWith
            | CallIter | YieldFrom => Shape::Jump { backward: false },
            Loop | LoopIter => Shape::Jump { backward: true },
            _ => Shape::Simple,
        }
    }

    /// The 24-bit twin of a short constant/operand opcode.
    pub fn long_form(self) -> Option<Op> {
        match self.shape() {
            // Long twins directly follow their short form.
            Shape::Constant { long: false } | Shape::Operand { long: false } => {
                Op::try_from(self as u8 + 1).ok()
            }
            _ => None,
        }
    }

    /// Number of operand bytes following the opcode.
    pub const fn operand_len(self) -> usize {
        match self.shape() {
            Shape::Simple => 0,
            Shape::Constant { long } | Shape::Operand { long } => {
                if long {
                    3
                } else {
                    1
                }
            }
            Shape::Jump { .. } => 2,
        }
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_forms_are_adjacent() {
        for byte in 0..Op::COUNT as u8 {
            let op = Op::try_from(byte).unwrap();
            if let Some(long) = op.long_form() {
                assert_eq!(long as u8, byte + 1);
                assert_eq!(long.operand_len(), 3);
                assert_eq!(op.operand_len(), 1);
            }
        }
    }

    #[test]
    fn out_of_range_byte_is_rejected() {
        assert_eq!(Op::try_from(Op::COUNT as u8), Err(Op::COUNT as u8));
        assert_eq!(Op::try_from(0xFF), Err(0xFF));
    }

    #[test]
    fn loops_jump_backward() {
        assert_eq!(Op::Loop.shape(), Shape::Jump { backward: true });
        assert_eq!(Op::LoopIter.shape(), Shape::Jump { backward: true });
        assert_eq!(Op::PushTry.shape(), Shape::Jump { backward: false });
    }
}
