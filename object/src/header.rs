use bitflags::bitflags;

use crate::value::ObjRef;

/// Object kind tag, mirrors the variants of [`ObjectKind`](crate::ObjectKind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Str = 0,
    Class,
    Instance,
    Function,
    Closure,
    Upvalue,
    NativeFunction,
    BoundMethod,
    Generator,
}

bitflags! {
    /// GC / bookkeeping flags stored in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        /// Reached during the current mark phase.
        const MARKED = 1 << 0;
        /// Sweep hook already ran for this object.
        const FINALIZED = 1 << 1;
    }
}

/// Bookkeeping shared by every heap object.
#[derive(Debug, Clone)]
pub struct Header {
    pub flags: HeaderFlags,
    /// The object's class.
    pub class: ObjRef,
    /// Next object in the heap's allocation list.
    pub next: Option<ObjRef>,
}

impl Header {
    pub fn new(class: ObjRef) -> Self {
        Self {
            flags: HeaderFlags::empty(),
            class,
            next: None,
        }
    }

    #[inline(always)]
    pub fn is_marked(&self) -> bool {
        self.flags.contains(HeaderFlags::MARKED)
    }

    #[inline(always)]
    pub fn set_marked(&mut self, marked: bool) {
        self.flags.set(HeaderFlags::MARKED, marked);
    }
}
