//! Builtin classes and their bootstrap.
//!
//! `type` is allocated first with a placeholder class and patched to be
//! its own class; `object` follows and becomes `type`'s superclass. The
//! remaining classes are ordinary allocations after that.

use object::{Class, ClassFlags, ObjRef, ObjectKind, SpecialMethod, Value};

use crate::error::{ErrorKind, RuntimeError};
use crate::natives::{self, NativeClass, NativeMethod};
use crate::vm::Vm;

/// Handles of the classes the runtime needs on hot paths.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub object: ObjRef,
    pub type_class: ObjRef,
    pub none: ObjRef,
    pub bool: ObjRef,
    pub int: ObjRef,
    pub float: ObjRef,
    pub str: ObjRef,
    pub function: ObjRef,
    pub native_function: ObjRef,
    pub method: ObjRef,
    pub generator: ObjRef,
    pub upvalue: ObjRef,
    pub bigint: ObjRef,
    pub range: ObjRef,
    pub range_iterator: ObjRef,
    exceptions: [ObjRef; ErrorKind::COUNT],
}

impl Builtins {
    pub(crate) fn placeholder() -> Self {
        let p = ObjRef::PLACEHOLDER;
        Self {
            object: p,
            type_class: p,
            none: p,
            bool: p,
            int: p,
            float: p,
            str: p,
            function: p,
            native_function: p,
            method: p,
            generator: p,
            upvalue: p,
            bigint: p,
            range: p,
            range_iterator: p,
            exceptions: [p; ErrorKind::COUNT],
        }
    }

    pub fn exception(&self, kind: ErrorKind) -> ObjRef {
        self.exceptions[kind as usize]
    }

    /// The builtin exception kind `class` stands for, if any.
    pub fn exception_kind(&self, class: ObjRef) -> Option<ErrorKind> {
        ErrorKind::ALL
            .into_iter()
            .find(|&kind| self.exceptions[kind as usize] == class)
    }

    pub(crate) fn trace(&self, visitor: &mut dyn FnMut(Value)) {
        let classes = [
            self.object,
            self.type_class,
            self.none,
            self.bool,
            self.int,
            self.float,
            self.str,
            self.function,
            self.native_function,
            self.method,
            self.generator,
            self.upvalue,
            self.bigint,
            self.range,
            self.range_iterator,
        ];
        for class in classes.into_iter().chain(self.exceptions) {
            visitor(Value::Object(class));
        }
    }
}

/// Interned names the interpreter looks up by handle.
#[derive(Debug, Clone)]
pub(crate) struct Names {
    special: [ObjRef; SpecialMethod::COUNT],
    pub arg: ObjRef,
    pub doc: ObjRef,
}

impl Names {
    pub(crate) fn placeholder() -> Self {
        Self {
            special: [ObjRef::PLACEHOLDER; SpecialMethod::COUNT],
            arg: ObjRef::PLACEHOLDER,
            doc: ObjRef::PLACEHOLDER,
        }
    }

    #[inline]
    pub(crate) fn special(&self, method: SpecialMethod) -> ObjRef {
        self.special[method as usize]
    }

    pub(crate) fn trace(&self, visitor: &mut dyn FnMut(Value)) {
        for &name in self.special.iter().chain([&self.arg, &self.doc]) {
            visitor(Value::Object(name));
        }
    }
}

const GENERATOR_METHODS: &[NativeMethod] = &[NativeMethod::new(
    "__iter__",
    object::Arity::Exact(1),
    natives::return_self,
)];

pub(crate) fn bootstrap(vm: &mut Vm) -> Result<(), RuntimeError> {
    let type_class = vm
        .heap
        .allocate(ObjRef::PLACEHOLDER, ObjectKind::Class(Class::new("type")));
    if let Some(object) = vm.heap.get_mut(type_class) {
        object.header.class = type_class;
    }
    vm.builtins.type_class = type_class;

    let object_class =
        vm.alloc(type_class, ObjectKind::Class(Class::new("object")));
    vm.builtins.object = object_class;
    vm.class_mut(type_class)?.superclass = Some(object_class);

    vm.builtins.str = new_class(vm, "str");

    for method in SpecialMethod::ALL {
        let name = vm.intern(method.name());
        vm.names.special[method as usize] = name;
    }
    vm.names.arg = vm.intern("arg");
    vm.names.doc = vm.intern("__doc__");

    vm.builtins.none = new_class(vm, "NoneType");
    vm.builtins.bool = new_class(vm, "bool");
    vm.builtins.int = new_class(vm, "int");
    vm.builtins.float = new_class(vm, "float");
    vm.builtins.function = new_class(vm, "function");
    vm.builtins.native_function = new_class(vm, "native_function");
    vm.builtins.method = new_class(vm, "method");
    vm.builtins.upvalue = new_class(vm, "upvalue");
    vm.builtins.generator = vm.define_native_class(
        NativeClass::new("generator")
            .flags(ClassFlags::NO_INHERIT)
            .methods(GENERATOR_METHODS),
    )?;

    vm.builtins.bigint = natives::bigint::register(vm)?;
    let (range, range_iterator) = natives::range::register(vm)?;
    vm.builtins.range = range;
    vm.builtins.range_iterator = range_iterator;
    natives::exception::register(vm)?;

    let plain = [
        type_class,
        object_class,
        vm.builtins.str,
        vm.builtins.none,
        vm.builtins.bool,
        vm.builtins.int,
        vm.builtins.float,
        vm.builtins.function,
        vm.builtins.native_function,
        vm.builtins.method,
        vm.builtins.upvalue,
    ];
    for class in plain {
        vm.class_mut(class)?.flags |= ClassFlags::BUILTIN;
        vm.finalize_class(class)?;
        vm.define_global_class(class)?;
    }

    log::debug!(
        "bootstrap: {} objects, {} natives",
        vm.heap.live_objects(),
        vm.natives.len()
    );
    Ok(())
}

pub(crate) fn set_exception(vm: &mut Vm, kind: ErrorKind, class: ObjRef) {
    vm.builtins.exceptions[kind as usize] = class;
}

/// Allocate a plain builtin class deriving from `object`. The caller
/// stores the handle in [`Builtins`] before allocating again.
fn new_class(vm: &mut Vm, name: &str) -> ObjRef {
    let mut class = Class::new(name);
    class.superclass = Some(vm.builtins.object);
    vm.alloc(vm.builtins.type_class, ObjectKind::Class(class))
}
