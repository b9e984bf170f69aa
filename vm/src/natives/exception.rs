//! `Exception` and the builtin error classes. Exceptions are plain
//! instances whose message lives in the `arg` field.

use object::{Arity, Value};

use crate::builtins::set_exception;
use crate::error::{ErrorKind, RuntimeError};
use crate::natives::{NativeClass, NativeMethod, receiver};
use crate::vm::Vm;

const METHODS: &[NativeMethod] = &[
    NativeMethod::new("__init__", Arity::Between(1, 2), init),
    NativeMethod::new("__repr__", Arity::Exact(1), repr),
];

pub(crate) fn register(vm: &mut Vm) -> Result<(), RuntimeError> {
    let base = vm.define_native_class(NativeClass::new("Exception").methods(METHODS))?;
    set_exception(vm, ErrorKind::Exception, base);
    for kind in &ErrorKind::ALL[1..] {
        let class = vm.define_native_class(NativeClass::new(kind.name()).superclass(base))?;
        set_exception(vm, *kind, class);
    }
    Ok(())
}

fn init(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let this = receiver(args)?;
    let arg = args.get(1).copied().unwrap_or(Value::None);
    let key = vm.names.arg;
    let instance = vm
        .as_instance_mut(this)
        .ok_or_else(|| RuntimeError::type_error("Exception.__init__ on a non-instance"))?;
    instance.fields.insert(key, arg);
    Ok(Value::None)
}

fn repr(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let this = receiver(args)?;
    let text = vm.exception_text(this);
    Ok(Value::Object(vm.intern(&text)))
}

impl Vm {
    /// Message of an exception instance: its `arg` field, if set.
    pub(crate) fn exception_message(&self, exception: Value) -> String {
        let arg = exception.as_object().and_then(|r| match self.heap.kind(r) {
            Some(object::ObjectKind::Instance(instance)) => {
                instance.fields.get(&self.names.arg).copied()
            }
            _ => None,
        });
        match arg {
            None | Some(Value::None) => String::new(),
            Some(value) => self.concat_form(value),
        }
    }

    /// `Name: message`, or just `Name` without a message.
    pub(crate) fn exception_text(&self, exception: Value) -> String {
        let name = self.type_name(exception);
        let message = self.exception_message(exception);
        if message.is_empty() {
            name
        } else {
            format!("{name}: {message}")
        }
    }
}
