//! Property access and class-building opcodes.

use object::{BoundMethod, Class, ClassFlags, ObjRef, ObjectKind, SpecialMethod, Value};

use crate::error::RuntimeError;
use crate::frame::ReturnAction;
use crate::interpreter::Flow;
use crate::lookup::Attribute;
use crate::vm::Vm;

impl Vm {
    fn no_attribute(&self, receiver: Value, name: ObjRef) -> RuntimeError {
        RuntimeError::AttributeError(format!(
            "'{}' object has no attribute '{}'",
            self.type_name(receiver),
            self.name_str(name)
        ))
    }

    /// Bind `method` to `receiver`. Both must be rooted.
    fn bind(&mut self, receiver: Value, method: Value) -> Value {
        let r = self.alloc(
            self.builtins.method,
            ObjectKind::BoundMethod(BoundMethod { receiver, method }),
        );
        Value::Object(r)
    }

    /// `GetProperty`: `[recv]` -> `[value]`. Functions found on the class
    /// come back bound.
    pub(crate) fn get_property(&mut self, idx: u32) -> Result<Flow, RuntimeError> {
        let name = self.constant_name(idx)?;
        let receiver = self.peek(0)?;
        let value = match self.get_attribute(receiver, name) {
            Some(Attribute::Field(value)) => value,
            Some(Attribute::Method(method)) => self.bind(receiver, method),
            None => return Err(self.no_attribute(receiver, name)),
        };
        self.pop()?;
        Ok(self.push(value))
    }

    /// `SetProperty`: `[recv, value]` -> `[value]`.
    pub(crate) fn set_property(&mut self, idx: u32) -> Result<Flow, RuntimeError> {
        let name = self.constant_name(idx)?;
        let value = self.peek(0)?;
        let receiver = self.peek(1)?;
        let special = SpecialMethod::ALL
            .into_iter()
            .any(|m| self.names.special(m) == name);
        // Some(refresh) once stored; refresh when a special name changed.
        let stored = match receiver.as_object().and_then(|r| self.heap.kind_mut(r)) {
            Some(ObjectKind::Instance(instance)) => {
                instance.fields.insert(name, value);
                Some(false)
            }
            Some(ObjectKind::Class(class)) => {
                class.methods.insert(name, value);
                Some(special)
            }
            _ => None,
        };
        match stored {
            None => return Err(self.no_attribute(receiver, name)),
            Some(true) => {
                if let Some(class) = self.as_class(receiver) {
                    self.refresh_special_methods(class)?;
                }
            }
            Some(false) => {}
        }
        self.stack.truncate(self.stack.len() - 2);
        Ok(self.push(value))
    }

    /// `DelProperty`: remove an instance field.
    pub(crate) fn del_property(&mut self, idx: u32) -> Result<Flow, RuntimeError> {
        let name = self.constant_name(idx)?;
        let receiver = self.peek(0)?;
        let removed = self
            .as_instance_mut(receiver)
            .and_then(|instance| instance.fields.remove(&name));
        if removed.is_none() {
            return Err(self.no_attribute(receiver, name));
        }
        self.pop()?;
        Ok(Flow::Continue)
    }

    /// `GetMethod`: `[recv]` -> `[method, recv]`, or `[None, value]` when
    /// the attribute does not bind.
    pub(crate) fn get_method(&mut self, idx: u32) -> Result<Flow, RuntimeError> {
        let name = self.constant_name(idx)?;
        let receiver = self.peek(0)?;
        let (head, tail) = match self.get_attribute(receiver, name) {
            Some(Attribute::Method(method)) => (method, receiver),
            Some(Attribute::Field(value)) => (Value::None, value),
            None => return Err(self.no_attribute(receiver, name)),
        };
        self.pop()?;
        self.stack.extend([head, tail]);
        Ok(Flow::Continue)
    }

    /// `CallMethod n`: call what `GetMethod` left below the arguments.
    pub(crate) fn call_method(&mut self, argc: usize) -> Result<Flow, RuntimeError> {
        let slot = self
            .stack
            .len()
            .checked_sub(argc + 2)
            .ok_or_else(|| RuntimeError::internal("stack underflow in CallMethod"))?;
        let head = self.stack[slot];
        if head == Value::None {
            self.stack.remove(slot);
            let callee = self.stack[slot];
            return self.call_value(callee, argc, ReturnAction::Push);
        }
        self.invoke(head, slot + 1, argc + 1, slot, ReturnAction::Push, None)
    }

    /// `GetSuper`: `[recv, super]` -> `[super.name bound to recv]`.
    pub(crate) fn get_super(&mut self, idx: u32) -> Result<Flow, RuntimeError> {
        let name = self.constant_name(idx)?;
        let superclass = self.peek(0)?;
        let receiver = self.peek(1)?;
        let class = self.as_class(superclass).ok_or_else(|| {
            RuntimeError::type_error(format!(
                "super() argument must be a class, not '{}'",
                self.type_name(superclass)
            ))
        })?;
        let Some(method) = self.find_method(class, name) else {
            return Err(RuntimeError::AttributeError(format!(
                "'super' object has no attribute '{}'",
                self.name_str(name)
            )));
        };
        let value = if self.is_function(method) {
            self.bind(receiver, method)
        } else {
            method
        };
        self.stack.truncate(self.stack.len() - 2);
        Ok(self.push(value))
    }

    /// `InvokeGetter`, `InvokeSetter`, `InvokeDelete` and `InvokeContains`:
    /// call `method` on the object `argc - 1` slots below the top, with
    /// the values above it as arguments. Deletion drops the result.
    pub(crate) fn invoke_item(
        &mut self,
        method: SpecialMethod,
        argc: usize,
    ) -> Result<Flow, RuntimeError> {
        let base = self
            .stack
            .len()
            .checked_sub(argc)
            .ok_or_else(|| RuntimeError::internal("stack underflow in item access"))?;
        let receiver = self.stack[base];
        let Some(callee) = self.special_of(receiver, method) else {
            let name = self.type_name(receiver);
            return Err(RuntimeError::type_error(match method {
                SpecialMethod::GetItem => format!("'{name}' object is not subscriptable"),
                SpecialMethod::SetItem => {
                    format!("'{name}' object does not support item assignment")
                }
                SpecialMethod::DelItem => {
                    format!("'{name}' object does not support item deletion")
                }
                _ => format!("'{name}' object can not be tested for membership"),
            }));
        };
        let action = if method == SpecialMethod::DelItem {
            ReturnAction::Discard
        } else {
            ReturnAction::Push
        };
        self.invoke(callee, base, argc, base, action, None)
    }

    /// `Docstring`: `[cls, doc]` -> `[cls]`, stored as `cls.__doc__`.
    pub(crate) fn docstring(&mut self) -> Result<Flow, RuntimeError> {
        let doc = self.peek(0)?;
        let class = self
            .as_class(self.peek(1)?)
            .ok_or_else(|| RuntimeError::internal("Docstring on a non-class"))?;
        let key = self.names.doc;
        self.class_mut(class)?.methods.insert(key, doc);
        self.pop()?;
        Ok(Flow::Continue)
    }

    /// `Class`: push a new class deriving from `object`.
    pub(crate) fn make_class(&mut self, idx: u32) -> Result<Flow, RuntimeError> {
        let name = self.constant_name(idx)?;
        let mut class = Class::new(self.name_str(name));
        class.superclass = Some(self.builtins.object);
        let r = self.alloc(self.builtins.type_class, ObjectKind::Class(class));
        Ok(self.push(Value::Object(r)))
    }

    /// `ClassProperty`: `[cls, value]` -> `[cls]`.
    pub(crate) fn class_property(&mut self, idx: u32) -> Result<Flow, RuntimeError> {
        let name = self.constant_name(idx)?;
        let value = self.peek(0)?;
        let class = self
            .as_class(self.peek(1)?)
            .ok_or_else(|| RuntimeError::internal("ClassProperty on a non-class"))?;
        self.class_mut(class)?.methods.insert(name, value);
        self.pop()?;
        Ok(Flow::Continue)
    }

    /// `Inherit`: `[sub, super]` -> `[sub]`. The subclass takes over the
    /// superclass's native layout.
    pub(crate) fn inherit(&mut self) -> Result<Flow, RuntimeError> {
        let superclass = self.peek(0)?;
        let class = self
            .as_class(self.peek(1)?)
            .ok_or_else(|| RuntimeError::internal("Inherit on a non-class"))?;
        let Some(base) = self.as_class(superclass) else {
            return Err(RuntimeError::type_error(format!(
                "Superclass must be a class, not '{}'",
                self.type_name(superclass)
            )));
        };
        let (layout, flags, base_name) = {
            let b = self.class(base)?;
            (b.layout, b.flags, b.name.clone())
        };
        if flags.contains(ClassFlags::NO_INHERIT) {
            return Err(RuntimeError::type_error(format!(
                "'{base_name}' can not be subclassed"
            )));
        }
        if self.is_subclass(base, class) {
            return Err(RuntimeError::type_error(format!(
                "inheriting from '{base_name}' would create a cycle"
            )));
        }
        let c = self.class_mut(class)?;
        c.superclass = Some(base);
        c.layout = layout;
        self.pop()?;
        Ok(Flow::Continue)
    }
}
