use core::fmt;

/// Stable handle of a heap object: an index into the heap's arena.
///
/// A handle stays valid for as long as the object is reachable. Slots of
/// collected objects are reused, so a handle must never outlive the last
/// root that kept its object alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjRef(u32);

impl ObjRef {
    /// Stand-in class for objects allocated before their class exists.
    /// Bootstrap code patches it right after allocation.
    pub const PLACEHOLDER: ObjRef = ObjRef(u32::MAX);

    #[inline(always)]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A script value.
///
/// Scalars are stored inline. Everything else is an [`ObjRef`] into the
/// heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    None,
    Boolean(bool),
    Integer(i64),
    Floating(f64),
    Object(ObjRef),
}

impl Value {
    /// `None`, `False` and integer zero are falsey; everything else,
    /// including `0.0` and objects, is truthy.
    #[inline(always)]
    pub fn is_falsey(self) -> bool {
        matches!(self, Value::None | Value::Boolean(false) | Value::Integer(0))
    }

    /// Identity: same variant and same payload. Floats compare by bits so a
    /// value is always identical to itself.
    #[inline]
    pub fn is_same(self, other: Value) -> bool {
        match (self, other) {
            (Value::Floating(a), Value::Floating(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }

    /// Scalar equality with int/float promotion. Objects compare by identity;
    /// equality overrides are dispatched by the interpreter.
    pub fn scalar_eq(self, other: Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Floating(b))
            | (Value::Floating(b), Value::Integer(a)) => a as f64 == b,
            _ => self == other,
        }
    }

    #[inline(always)]
    pub fn as_object(self) -> Option<ObjRef> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_integer(self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(n),
            _ => None,
        }
    }

    /// Name of the value's primitive type; objects report their kind
    /// through the heap instead.
    pub fn primitive_type_name(self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Floating(_) => "float",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Floating(x)
    }
}

impl From<ObjRef> for Value {
    fn from(r: ObjRef) -> Self {
        Value::Object(r)
    }
}
