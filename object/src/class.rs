use core::any::Any;
use core::fmt;

use bitflags::bitflags;

use crate::Table;
use crate::objects::Instance;
use crate::value::{ObjRef, Value};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassFlags: u8 {
        /// Subclassing this class is a TypeError.
        const NO_INHERIT = 1 << 0;
        /// Created by the runtime rather than by `Class` bytecode.
        const BUILTIN = 1 << 1;
        /// Special-method cache is populated.
        const FINALIZED = 1 << 2;
    }
}

/// Fixed-size native storage attached to an instance of a native class.
///
/// Variable-length buffers live inside the storage as owned values and are
/// released by the class's sweep hook, never by the instance itself.
pub trait NativeData: Any + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Visit every script value held by the storage.
    fn trace(&self, _visitor: &mut dyn FnMut(Value)) {}

    /// Bytes owned outside the fixed storage.
    fn extra_bytes(&self) -> usize {
        0
    }
}

/// Installs the native storage of a freshly allocated instance.
pub type InitHook = fn(&mut Instance);

/// Releases native buffers of an unreachable instance. Runs exactly once,
/// before the instance's slot is reclaimed.
pub type SweepHook = fn(&mut Instance);

/// Native storage layout of a class, copied into subclasses on inherit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeLayout {
    /// Size of the native storage of an instance, zero for plain classes.
    pub alloc_size: usize,
    pub on_init: Option<InitHook>,
    pub on_gc_sweep: Option<SweepHook>,
}

/// Methods the runtime looks up on hot paths. Resolved once per class when
/// it is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum SpecialMethod {
    Init = 0,
    Eq,
    Iter,
    Call,
    Repr,
    Add,
    Sub,
    Enter,
    Exit,
    GetItem,
    SetItem,
    DelItem,
    Contains,
}

impl SpecialMethod {
    pub const COUNT: usize = SpecialMethod::Contains as usize + 1;

    pub const ALL: [SpecialMethod; Self::COUNT] = [
        SpecialMethod::Init,
        SpecialMethod::Eq,
        SpecialMethod::Iter,
        SpecialMethod::Call,
        SpecialMethod::Repr,
        SpecialMethod::Add,
        SpecialMethod::Sub,
        SpecialMethod::Enter,
        SpecialMethod::Exit,
        SpecialMethod::GetItem,
        SpecialMethod::SetItem,
        SpecialMethod::DelItem,
        SpecialMethod::Contains,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            SpecialMethod::Init => "__init__",
            SpecialMethod::Eq => "__eq__",
            SpecialMethod::Iter => "__iter__",
            SpecialMethod::Call => "__call__",
            SpecialMethod::Repr => "__repr__",
            SpecialMethod::Add => "__add__",
            SpecialMethod::Sub => "__sub__",
            SpecialMethod::Enter => "__enter__",
            SpecialMethod::Exit => "__exit__",
            SpecialMethod::GetItem => "__getitem__",
            SpecialMethod::SetItem => "__setitem__",
            SpecialMethod::DelItem => "__delitem__",
            SpecialMethod::Contains => "__contains__",
        }
    }
}

/// A class: name, single superclass, method table and native hooks.
#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub superclass: Option<ObjRef>,
    /// Methods and class attributes, keyed by interned name.
    pub methods: Table,
    pub layout: NativeLayout,
    pub flags: ClassFlags,
    special: [Option<Value>; SpecialMethod::COUNT],
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            methods: Table::default(),
            layout: NativeLayout::default(),
            flags: ClassFlags::empty(),
            special: [None; SpecialMethod::COUNT],
        }
    }

    #[inline]
    pub fn special(&self, method: SpecialMethod) -> Option<Value> {
        self.special[method as usize]
    }

    pub fn set_special(&mut self, method: SpecialMethod, value: Option<Value>) {
        self.special[method as usize] = value;
    }

    pub fn trace(&self, visitor: &mut dyn FnMut(Value)) {
        if let Some(superclass) = self.superclass {
            visitor(Value::Object(superclass));
        }
        for (&name, &value) in &self.methods {
            visitor(Value::Object(name));
            visitor(value);
        }
        self.special.iter().flatten().for_each(|&v| visitor(v));
    }
}
