use core::fmt;
use std::rc::Rc;

use crate::Table;
use crate::chunk::Chunk;
use crate::class::{Class, NativeData};
use crate::header::{Header, ObjectType};
use crate::value::{ObjRef, Value};

/// An interned string.
#[derive(Debug)]
pub struct Str {
    chars: Box<str>,
}

impl Str {
    pub fn new(chars: impl Into<Box<str>>) -> Self {
        Self {
            chars: chars.into(),
        }
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

/// An instance of a class: open attribute map plus optional native storage.
#[derive(Debug, Default)]
pub struct Instance {
    pub fields: Table,
    pub native: Option<Box<dyn NativeData>>,
}

impl Instance {
    pub fn native<T: NativeData>(&self) -> Option<&T> {
        self.native.as_deref()?.as_any().downcast_ref()
    }

    pub fn native_mut<T: NativeData>(&mut self) -> Option<&mut T> {
        self.native.as_deref_mut()?.as_any_mut().downcast_mut()
    }

    pub fn trace(&self, visitor: &mut dyn FnMut(Value)) {
        for (&name, &value) in &self.fields {
            visitor(Value::Object(name));
            visitor(value);
        }
        if let Some(native) = &self.native {
            native.trace(visitor);
        }
    }
}

/// How a closure captures one upvalue when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    /// Capture a local slot of the enclosing frame (otherwise one of the
    /// enclosing closure's upvalues).
    pub is_local: bool,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    /// Calling it creates a generator instead of running the body.
    Generator,
}

/// A compiled function prototype.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    /// Number of stack arguments, receiver included for methods.
    pub arity: usize,
    pub upvalues: Vec<UpvalueDescriptor>,
    pub chunk: Rc<Chunk>,
    pub kind: FunctionKind,
}

/// A function bound to its captured upvalues.
#[derive(Debug)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable: a live stack slot until its frame exits, then a
/// value of its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

/// Accepted argument counts of a native function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    AtMost(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
            Arity::AtMost(n) => argc <= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&argc),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::AtMost(n) => write!(f, "at most {n}"),
            Arity::Between(lo, hi) => write!(f, "{lo} to {hi}"),
        }
    }
}

/// A function implemented by the runtime. `index` selects the entry in the
/// VM's native registry.
#[derive(Debug, Clone)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub index: usize,
}

/// A method paired with the receiver it was looked up on.
#[derive(Debug, Clone, Copy)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Try,
    With,
}

/// An active `try` or `with` scope of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub kind: HandlerKind,
    /// Landing pad (absolute byte offset in the frame's chunk).
    pub target: usize,
    /// Operand stack depth, relative to the frame base, to restore.
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created, body not entered yet.
    Fresh,
    Suspended,
    Running,
    Done,
}

/// Snapshot of a suspended generator frame.
#[derive(Debug, Default)]
pub struct SuspendedFrame {
    pub ip: usize,
    /// The frame's stack window: arguments, locals and temporaries.
    pub slots: Vec<Value>,
    pub handlers: Vec<Handler>,
    /// Whether resuming pushes the sent value (true after `Yield`, false
    /// when `YieldFrom` re-runs its own instruction).
    pub push_on_resume: bool,
}

#[derive(Debug)]
pub struct Generator {
    pub closure: ObjRef,
    pub state: GeneratorState,
    pub frame: SuspendedFrame,
    /// Value returned by the body once it has finished.
    pub result: Value,
}

#[derive(Debug)]
pub enum ObjectKind {
    Str(Str),
    Class(Class),
    Instance(Instance),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    NativeFunction(NativeFunction),
    BoundMethod(BoundMethod),
    Generator(Generator),
}

impl ObjectKind {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectKind::Str(_) => ObjectType::Str,
            ObjectKind::Class(_) => ObjectType::Class,
            ObjectKind::Instance(_) => ObjectType::Instance,
            ObjectKind::Function(_) => ObjectType::Function,
            ObjectKind::Closure(_) => ObjectType::Closure,
            ObjectKind::Upvalue(_) => ObjectType::Upvalue,
            ObjectKind::NativeFunction(_) => ObjectType::NativeFunction,
            ObjectKind::BoundMethod(_) => ObjectType::BoundMethod,
            ObjectKind::Generator(_) => ObjectType::Generator,
        }
    }
}

/// A heap entry: header plus payload.
#[derive(Debug)]
pub struct HeapObject {
    pub header: Header,
    pub kind: ObjectKind,
}

impl HeapObject {
    pub fn new(class: ObjRef, kind: ObjectKind) -> Self {
        Self {
            header: Header::new(class),
            kind,
        }
    }

    /// Visit every outgoing edge, the class edge included.
    pub fn trace(&self, visitor: &mut dyn FnMut(Value)) {
        visitor(Value::Object(self.header.class));
        match &self.kind {
            ObjectKind::Str(_) | ObjectKind::NativeFunction(_) => {}
            ObjectKind::Class(class) => class.trace(visitor),
            ObjectKind::Instance(instance) => instance.trace(visitor),
            ObjectKind::Function(function) => {
                function.chunk.constants().iter().for_each(|&v| visitor(v));
            }
            ObjectKind::Closure(closure) => {
                visitor(Value::Object(closure.function));
                for &upvalue in &closure.upvalues {
                    visitor(Value::Object(upvalue));
                }
            }
            ObjectKind::Upvalue(Upvalue::Closed(value)) => visitor(*value),
            ObjectKind::Upvalue(Upvalue::Open(_)) => {}
            ObjectKind::BoundMethod(bound) => {
                visitor(bound.receiver);
                visitor(bound.method);
            }
            ObjectKind::Generator(generator) => {
                visitor(Value::Object(generator.closure));
                generator.frame.slots.iter().for_each(|&v| visitor(v));
                visitor(generator.result);
            }
        }
    }

    /// Approximate number of bytes owned by this object, used for the
    /// collection threshold.
    pub fn size_hint(&self) -> usize {
        let table = |t: &Table| t.len() * size_of::<(ObjRef, Value)>();
        size_of::<HeapObject>()
            + match &self.kind {
                ObjectKind::Str(s) => s.as_str().len(),
                ObjectKind::Class(class) => table(&class.methods) + class.name.len(),
                ObjectKind::Instance(instance) => {
                    table(&instance.fields)
                        + instance.native.as_ref().map_or(0, |n| {
                            size_of_val(n.as_ref()) + n.extra_bytes()
                        })
                }
                ObjectKind::Function(function) => {
                    function.chunk.code().len()
                        + function.chunk.constants().len() * size_of::<Value>()
                }
                ObjectKind::Closure(closure) => {
                    closure.upvalues.len() * size_of::<ObjRef>()
                }
                ObjectKind::Generator(generator) => {
                    generator.frame.slots.len() * size_of::<Value>()
                }
                _ => 0,
            }
    }
}
