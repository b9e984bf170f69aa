//! Native extension interface and the builtin native classes.

pub mod bigint;
pub mod exception;
pub mod range;

use object::{Arity, ClassFlags, Instance, NativeData, NativeLayout, ObjRef, SweepHook, Value};

use crate::error::RuntimeError;
use crate::vm::Vm;

/// A native method. `args[0]` is the receiver; the declared arity counts
/// it.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

#[derive(Clone, Copy)]
pub struct NativeMethod {
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
}

impl NativeMethod {
    pub const fn new(name: &'static str, arity: Arity, func: NativeFn) -> Self {
        Self { name, arity, func }
    }
}

impl core::fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeMethod")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Registration record of a native class.
pub struct NativeClass {
    pub name: &'static str,
    /// Defaults to `object`.
    pub superclass: Option<ObjRef>,
    pub layout: NativeLayout,
    pub flags: ClassFlags,
    pub methods: &'static [NativeMethod],
}

impl NativeClass {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            superclass: None,
            layout: NativeLayout::default(),
            flags: ClassFlags::empty(),
            methods: &[],
        }
    }

    pub fn superclass(mut self, superclass: ObjRef) -> Self {
        self.superclass = Some(superclass);
        self
    }

    /// Instances carry a `T`, default-initialised at allocation.
    pub fn with_storage<T: NativeData + Default>(mut self) -> Self {
        self.layout.alloc_size = size_of::<T>();
        self.layout.on_init = Some(install::<T>);
        self
    }

    pub fn on_sweep(mut self, hook: SweepHook) -> Self {
        self.layout.on_gc_sweep = Some(hook);
        self
    }

    pub fn flags(mut self, flags: ClassFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn methods(mut self, methods: &'static [NativeMethod]) -> Self {
        self.methods = methods;
        self
    }
}

fn install<T: NativeData + Default>(instance: &mut Instance) {
    instance.native = Some(Box::new(T::default()));
}

/// `__iter__` of self-iterating objects.
pub(crate) fn return_self(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(args.first().copied().unwrap_or(Value::None))
}

// ── argument helpers ────────────────────────────────────────────────

pub(crate) fn receiver(args: &[Value]) -> Result<Value, RuntimeError> {
    args.first()
        .copied()
        .ok_or_else(|| RuntimeError::internal("native method called without receiver"))
}

pub(crate) fn int_arg(vm: &Vm, function: &str, args: &[Value], index: usize) -> Result<i64, RuntimeError> {
    let value = args.get(index).copied().unwrap_or(Value::None);
    value.as_integer().ok_or_else(|| {
        RuntimeError::type_error(format!(
            "{function}() expects int, not '{}'",
            vm.type_name(value)
        ))
    })
}

/// Native storage of `value`, if it is an instance carrying a `T`.
pub(crate) fn storage<T: NativeData>(vm: &Vm, value: Value) -> Option<&T> {
    match vm.heap.kind(value.as_object()?) {
        Some(object::ObjectKind::Instance(instance)) => instance.native::<T>(),
        _ => None,
    }
}

pub(crate) fn storage_mut<T: NativeData>(vm: &mut Vm, value: Value) -> Option<&mut T> {
    vm.as_instance_mut(value)?.native_mut::<T>()
}

/// Allocate an instance of a native class and fill its storage.
pub(crate) fn new_native<T: NativeData>(
    vm: &mut Vm,
    class: ObjRef,
    fill: impl FnOnce(&mut T),
) -> Result<Value, RuntimeError> {
    let r = vm.instantiate(class)?;
    let value = Value::Object(r);
    let data = storage_mut::<T>(vm, value).ok_or_else(|| {
        RuntimeError::internal(format!("{r:?} has no {} storage", core::any::type_name::<T>()))
    })?;
    fill(data);
    Ok(value)
}
