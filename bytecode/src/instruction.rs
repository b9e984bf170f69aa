use core::fmt;

use crate::op::Op;

/// A decoded instruction with operands widened to `u32`.
///
/// Short and `*Long` encodings decode to the same variant. Jump offsets are
/// signed: backward opcodes ([`Op::Loop`], [`Op::LoopIter`]) decode to a
/// negative offset, relative to the byte after the operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Return,
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDiv,
    Modulo,
    Pow,
    Negate,
    None,
    True,
    False,
    Not,
    Equal,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Is,
    Pop,
    Swap,
    BitOr,
    BitXor,
    BitAnd,
    ShiftLeft,
    ShiftRight,
    BitNegate,
    Inherit,
    Finalize,
    Raise,
    CloseUpvalue,
    Print,
    Yield,
    InvokeIter,
    PopHandler,
    FilterExcept,
    BeginFinally,
    EndFinally,
    CleanupWith,
    InvokeGetter,
    InvokeSetter,
    InvokeDelete,
    InvokeContains,
    Docstring,

    Constant { idx: u32 },
    DefineGlobal { idx: u32 },
    GetGlobal { idx: u32 },
    SetGlobal { idx: u32 },
    DelGlobal { idx: u32 },
    Class { idx: u32 },
    ClassProperty { idx: u32 },
    GetProperty { idx: u32 },
    SetProperty { idx: u32 },
    DelProperty { idx: u32 },
    GetMethod { idx: u32 },
    GetSuper { idx: u32 },
    Closure { idx: u32 },

    GetLocal { slot: u32 },
    SetLocal { slot: u32 },
    SetLocalPop { slot: u32 },
    GetUpvalue { index: u32 },
    SetUpvalue { index: u32 },
    Call { argc: u32 },
    CallMethod { argc: u32 },
    Dup { depth: u32 },

    Jump { offset: i32 },
    JumpIfFalse { offset: i32 },
    JumpIfTrue { offset: i32 },
    PopJumpIfFalse { offset: i32 },
    JumpIfFalseOrPop { offset: i32 },
    JumpIfTrueOrPop { offset: i32 },
    Loop { offset: i32 },
    PushTry { offset: i32 },
    PushWith { offset: i32 },
    CallIter { offset: i32 },
    LoopIter { offset: i32 },
    YieldFrom { offset: i32 },
}

impl Instruction {
    /// Build the instruction for a simple (operand-less) opcode.
    pub(crate) fn simple(op: Op) -> Option<Self> {
        Some(match op {
            Op::Return => Self::Return,
            Op::Add => Self::Add,
            Op::Subtract => Self::Subtract,
            Op::Multiply => Self::Multiply,
            Op::Divide => Self::Divide,
            Op::FloorDiv => Self::FloorDiv,
            Op::Modulo => Self::Modulo,
            Op::Pow => Self::Pow,
            Op::Negate => Self::Negate,
            Op::None => Self::None,
            Op::True => Self::True,
            Op::False => Self::False,
            Op::Not => Self::Not,
            Op::Equal => Self::Equal,
            Op::Greater => Self::Greater,
            Op::Less => Self::Less,
            Op::GreaterEqual => Self::GreaterEqual,
            Op::LessEqual => Self::LessEqual,
            Op::Is => Self::Is,
            Op::Pop => Self::Pop,
            Op::Swap => Self::Swap,
            Op::BitOr => Self::BitOr,
            Op::BitXor => Self::BitXor,
            Op::BitAnd => Self::BitAnd,
            Op::ShiftLeft => Self::ShiftLeft,
            Op::ShiftRight => Self::ShiftRight,
            Op::BitNegate => Self::BitNegate,
            Op::Inherit => Self::Inherit,
            Op::Finalize => Self::Finalize,
            Op::Raise => Self::Raise,
            Op::CloseUpvalue => Self::CloseUpvalue,
            Op::Print => Self::Print,
            Op::Yield => Self::Yield,
            Op::InvokeIter => Self::InvokeIter,
            Op::PopHandler => Self::PopHandler,
            Op::FilterExcept => Self::FilterExcept,
            Op::BeginFinally => Self::BeginFinally,
            Op::EndFinally => Self::EndFinally,
            Op::CleanupWith => Self::CleanupWith,
            Op::InvokeGetter => Self::InvokeGetter,
            Op::InvokeSetter => Self::InvokeSetter,
            Op::InvokeDelete => Self::InvokeDelete,
            Op::InvokeContains => Self::InvokeContains,
            Op::Docstring => Self::Docstring,
            _ => return Option::None,
        })
    }

    /// Build the instruction for a constant or operand opcode (either width).
    pub(crate) fn with_operand(op: Op, value: u32) -> Option<Self> {
        Some(match op {
            Op::Constant | Op::ConstantLong => Self::Constant { idx: value },
            Op::DefineGlobal | Op::DefineGlobalLong => {
                Self::DefineGlobal { idx: value }
            }
            Op::GetGlobal | Op::GetGlobalLong => Self::GetGlobal { idx: value },
            Op::SetGlobal | Op::SetGlobalLong => Self::SetGlobal { idx: value },
            Op::DelGlobal | Op::DelGlobalLong => Self::DelGlobal { idx: value },
            Op::Class | Op::ClassLong => Self::Class { idx: value },
            Op::ClassProperty | Op::ClassPropertyLong => {
                Self::ClassProperty { idx: value }
            }
            Op::GetProperty | Op::GetPropertyLong => {
                Self::GetProperty { idx: value }
            }
            Op::SetProperty | Op::SetPropertyLong => {
                Self::SetProperty { idx: value }
            }
            Op::DelProperty | Op::DelPropertyLong => {
                Self::DelProperty { idx: value }
            }
            Op::GetMethod | Op::GetMethodLong => Self::GetMethod { idx: value },
            Op::GetSuper | Op::GetSuperLong => Self::GetSuper { idx: value },
            Op::Closure | Op::ClosureLong => Self::Closure { idx: value },
            Op::GetLocal | Op::GetLocalLong => Self::GetLocal { slot: value },
            Op::SetLocal | Op::SetLocalLong => Self::SetLocal { slot: value },
            Op::SetLocalPop | Op::SetLocalPopLong => {
                Self::SetLocalPop { slot: value }
            }
            Op::GetUpvalue | Op::GetUpvalueLong => {
                Self::GetUpvalue { index: value }
            }
            Op::SetUpvalue | Op::SetUpvalueLong => {
                Self::SetUpvalue { index: value }
            }
            Op::Call | Op::CallLong => Self::Call { argc: value },
            Op::CallMethod | Op::CallMethodLong => {
                Self::CallMethod { argc: value }
            }
            Op::Dup | Op::DupLong => Self::Dup { depth: value },
            _ => return Option::None,
        })
    }

    /// Build the instruction for a jump opcode. `offset` is already signed.
    pub(crate) fn jump(op: Op, offset: i32) -> Option<Self> {
        Some(match op {
            Op::Jump => Self::Jump { offset },
            Op::JumpIfFalse => Self::JumpIfFalse { offset },
            Op::JumpIfTrue => Self::JumpIfTrue { offset },
            Op::PopJumpIfFalse => Self::PopJumpIfFalse { offset },
            Op::JumpIfFalseOrPop => Self::JumpIfFalseOrPop { offset },
            Op::JumpIfTrueOrPop => Self::JumpIfTrueOrPop { offset },
            Op::Loop => Self::Loop { offset },
            Op::PushTry => Self::PushTry { offset },
            Op::PushWith => Self::PushWith { offset },
            Op::CallIter => Self::CallIter { offset },
            Op::LoopIter => Self::LoopIter { offset },
            Op::YieldFrom => Self::YieldFrom { offset },
            _ => return Option::None,
        })
    }

    /// Constant pool index referenced by this instruction, if any.
    pub fn constant_index(&self) -> Option<u32> {
        match *self {
            Self::Constant { idx }
            | Self::DefineGlobal { idx }
            | Self::GetGlobal { idx }
            | Self::SetGlobal { idx }
            | Self::DelGlobal { idx }
            | Self::Class { idx }
            | Self::ClassProperty { idx }
            | Self::GetProperty { idx }
            | Self::SetProperty { idx }
            | Self::DelProperty { idx }
            | Self::GetMethod { idx }
            | Self::GetSuper { idx }
            | Self::Closure { idx } => Some(idx),
            _ => Option::None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { idx } => write!(f, "Constant #{idx}"),
            Self::DefineGlobal { idx } => write!(f, "DefineGlobal #{idx}"),
            Self::GetGlobal { idx } => write!(f, "GetGlobal #{idx}"),
            Self::SetGlobal { idx } => write!(f, "SetGlobal #{idx}"),
            Self::DelGlobal { idx } => write!(f, "DelGlobal #{idx}"),
            Self::Class { idx } => write!(f, "Class #{idx}"),
            Self::ClassProperty { idx } => write!(f, "ClassProperty #{idx}"),
            Self::GetProperty { idx } => write!(f, "GetProperty #{idx}"),
            Self::SetProperty { idx } => write!(f, "SetProperty #{idx}"),
            Self::DelProperty { idx } => write!(f, "DelProperty #{idx}"),
            Self::GetMethod { idx } => write!(f, "GetMethod #{idx}"),
            Self::GetSuper { idx } => write!(f, "GetSuper #{idx}"),
            Self::Closure { idx } => write!(f, "Closure #{idx}"),
            Self::GetLocal { slot } => write!(f, "GetLocal s{slot}"),
            Self::SetLocal { slot } => write!(f, "SetLocal s{slot}"),
            Self::SetLocalPop { slot } => write!(f, "SetLocalPop s{slot}"),
            Self::GetUpvalue { index } => write!(f, "GetUpvalue u{index}"),
            Self::SetUpvalue { index } => write!(f, "SetUpvalue u{index}"),
            Self::Call { argc } => write!(f, "Call {argc}"),
            Self::CallMethod { argc } => write!(f, "CallMethod {argc}"),
            Self::Dup { depth } => write!(f, "Dup {depth}"),
            Self::Jump { offset } => write!(f, "Jump {offset:+}"),
            Self::JumpIfFalse { offset } => write!(f, "JumpIfFalse {offset:+}"),
            Self::JumpIfTrue { offset } => write!(f, "JumpIfTrue {offset:+}"),
            Self::PopJumpIfFalse { offset } => {
                write!(f, "PopJumpIfFalse {offset:+}")
            }
            Self::JumpIfFalseOrPop { offset } => {
                write!(f, "JumpIfFalseOrPop {offset:+}")
            }
            Self::JumpIfTrueOrPop { offset } => {
                write!(f, "JumpIfTrueOrPop {offset:+}")
            }
            Self::Loop { offset } => write!(f, "Loop {offset:+}"),
            Self::PushTry { offset } => write!(f, "PushTry {offset:+}"),
            Self::PushWith { offset } => write!(f, "PushWith {offset:+}"),
            Self::CallIter { offset } => write!(f, "CallIter {offset:+}"),
            Self::LoopIter { offset } => write!(f, "LoopIter {offset:+}"),
            Self::YieldFrom { offset } => write!(f, "YieldFrom {offset:+}"),
            // Operand-less variants print their name.
            other => write!(f, "{other:?}"),
        }
    }
}
