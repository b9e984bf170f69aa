use object::{ClassFlags, ObjRef, ObjectKind, SpecialMethod, Value};

use crate::vm::Vm;

/// Result of an attribute lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Attribute {
    /// Instance field or class attribute, used as is.
    Field(Value),
    /// Function found on the receiver's class; binds to the receiver.
    Method(Value),
}

impl Vm {
    /// Walk `class` and its superclasses for `name`. First match wins.
    pub(crate) fn find_method(&self, class: ObjRef, name: ObjRef) -> Option<Value> {
        let mut cursor = Some(class);
        while let Some(c) = cursor {
            let Some(ObjectKind::Class(class)) = self.heap.kind(c) else {
                return None;
            };
            if let Some(&value) = class.methods.get(&name) {
                return Some(value);
            }
            cursor = class.superclass;
        }
        None
    }

    /// Special method of `class`, from the cache once the class is
    /// finalized.
    pub(crate) fn special_method(&self, class: ObjRef, method: SpecialMethod) -> Option<Value> {
        match self.heap.kind(class) {
            Some(ObjectKind::Class(c)) if c.flags.contains(ClassFlags::FINALIZED) => {
                c.special(method)
            }
            Some(ObjectKind::Class(_)) => {
                self.find_method(class, self.names.special(method))
            }
            _ => None,
        }
    }

    /// Special method of the class of `value`.
    pub(crate) fn special_of(&self, value: Value, method: SpecialMethod) -> Option<Value> {
        self.special_method(self.class_of(value), method)
    }

    /// Whether `value` binds to a receiver when found on a class.
    pub(crate) fn is_function(&self, value: Value) -> bool {
        value.as_object().is_some_and(|r| {
            matches!(
                self.heap.kind(r),
                Some(ObjectKind::Closure(_) | ObjectKind::NativeFunction(_))
            )
        })
    }

    /// Look `name` up on `receiver`: instance fields first, then the class
    /// chain. On a class receiver the chain is searched for a plain class
    /// attribute.
    pub(crate) fn get_attribute(&self, receiver: Value, name: ObjRef) -> Option<Attribute> {
        if let Some(r) = receiver.as_object() {
            match self.heap.kind(r) {
                Some(ObjectKind::Instance(instance)) => {
                    if let Some(&value) = instance.fields.get(&name) {
                        return Some(Attribute::Field(value));
                    }
                }
                Some(ObjectKind::Class(_)) => {
                    if let Some(value) = self.find_method(r, name) {
                        return Some(Attribute::Field(value));
                    }
                }
                _ => {}
            }
        }
        let value = self.find_method(self.class_of(receiver), name)?;
        if self.is_function(value) {
            Some(Attribute::Method(value))
        } else {
            Some(Attribute::Field(value))
        }
    }
}
