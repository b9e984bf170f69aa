//! Closure creation and captured variables.
//!
//! Open upvalues point at live stack slots and are kept in
//! `open_upvalues` sorted by slot, so that two closures capturing the
//! same local share one upvalue. Closing copies the slot's value into
//! the upvalue when the slot goes away.

use object::{Closure, ObjRef, ObjectKind, Upvalue, Value};

use crate::error::RuntimeError;
use crate::interpreter::Flow;
use crate::vm::Vm;

impl Vm {
    /// `Closure idx`: wrap the function constant, capturing upvalues
    /// from the frame whose locals start at `base`.
    pub(crate) fn make_closure(&mut self, idx: u32, base: usize) -> Result<Flow, RuntimeError> {
        let function = self
            .function_constant(idx)
            .ok_or_else(|| RuntimeError::internal(format!("constant #{idx} is not a function")))?;
        let descriptors = match self.kind(function)? {
            ObjectKind::Function(f) => f.upvalues.clone(),
            _ => return Err(RuntimeError::internal("function expected")),
        };
        let enclosing = self.frame()?.closure;

        let mut upvalues = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let index = descriptor.index as usize;
            let upvalue = if descriptor.is_local {
                self.capture_upvalue(base + index)?
            } else {
                match self.kind(enclosing)? {
                    ObjectKind::Closure(c) => c.upvalues.get(index).copied().ok_or_else(|| {
                        RuntimeError::internal(format!("upvalue {index} out of range"))
                    })?,
                    _ => return Err(RuntimeError::internal("closure expected")),
                }
            };
            upvalues.push(upvalue);
        }
        let closure = self.alloc(
            self.builtins.function,
            ObjectKind::Closure(Closure { function, upvalues }),
        );
        Ok(self.push(Value::Object(closure)))
    }

    fn function_constant(&self, idx: u32) -> Option<ObjRef> {
        let r = self.frame().ok()?.chunk.constant(idx)?.as_object()?;
        matches!(self.heap.kind(r), Some(ObjectKind::Function(_))).then_some(r)
    }

    /// The open upvalue for `slot`, created on first capture.
    fn capture_upvalue(&mut self, slot: usize) -> Result<ObjRef, RuntimeError> {
        if slot >= self.stack.len() {
            return Err(RuntimeError::internal(format!("capture of dead slot {slot}")));
        }
        let mut insert_at = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate() {
            if let Some(ObjectKind::Upvalue(Upvalue::Open(open))) = self.heap.kind(upvalue) {
                if *open == slot {
                    return Ok(upvalue);
                }
                if *open > slot {
                    insert_at = i;
                    break;
                }
            }
        }
        let upvalue = self.alloc(self.builtins.upvalue, ObjectKind::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(insert_at, upvalue);
        Ok(upvalue)
    }

    /// Close every open upvalue at or above stack index `from`.
    pub(crate) fn close_upvalues(&mut self, from: usize) {
        while let Some(&upvalue) = self.open_upvalues.last() {
            let slot = match self.heap.kind(upvalue) {
                Some(ObjectKind::Upvalue(Upvalue::Open(slot))) => *slot,
                _ => {
                    self.open_upvalues.pop();
                    continue;
                }
            };
            if slot < from {
                break;
            }
            let value = self.stack.get(slot).copied().unwrap_or(Value::None);
            if let Some(ObjectKind::Upvalue(u)) = self.heap.kind_mut(upvalue) {
                *u = Upvalue::Closed(value);
            }
            self.open_upvalues.pop();
        }
    }

    fn upvalue(&self, index: u32) -> Result<ObjRef, RuntimeError> {
        let closure = self.frame()?.closure;
        match self.kind(closure)? {
            ObjectKind::Closure(c) => c.upvalues.get(index as usize).copied().ok_or_else(|| {
                RuntimeError::internal(format!("upvalue {index} out of range"))
            }),
            _ => Err(RuntimeError::internal("closure expected")),
        }
    }

    pub(crate) fn get_upvalue(&self, index: u32) -> Result<Value, RuntimeError> {
        match self.kind(self.upvalue(index)?)? {
            ObjectKind::Upvalue(Upvalue::Open(slot)) => self
                .stack
                .get(*slot)
                .copied()
                .ok_or_else(|| RuntimeError::internal("open upvalue past stack top")),
            ObjectKind::Upvalue(Upvalue::Closed(value)) => Ok(*value),
            _ => Err(RuntimeError::internal("upvalue expected")),
        }
    }

    pub(crate) fn set_upvalue(&mut self, index: u32, value: Value) -> Result<(), RuntimeError> {
        let upvalue = self.upvalue(index)?;
        match self.kind_mut(upvalue)? {
            ObjectKind::Upvalue(Upvalue::Open(slot)) => {
                let slot = *slot;
                let target = self
                    .stack
                    .get_mut(slot)
                    .ok_or_else(|| RuntimeError::internal("open upvalue past stack top"))?;
                *target = value;
            }
            ObjectKind::Upvalue(Upvalue::Closed(closed)) => *closed = value,
            _ => return Err(RuntimeError::internal("upvalue expected")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use object::Value;

    use crate::vm::{Vm, VmSettings};

    #[test]
    fn captures_are_shared_and_sorted() {
        let mut vm = Vm::new(VmSettings::default()).unwrap();
        vm.stack.extend([Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let high = vm.capture_upvalue(2).unwrap();
        let low = vm.capture_upvalue(0).unwrap();
        assert_eq!(vm.capture_upvalue(2).unwrap(), high);
        assert_eq!(vm.open_upvalues, vec![low, high]);

        vm.stack[2] = Value::Integer(30);
        vm.close_upvalues(1);
        assert_eq!(vm.open_upvalues, vec![low]);
        match vm.heap.kind(high) {
            Some(object::ObjectKind::Upvalue(object::Upvalue::Closed(v))) => {
                assert_eq!(*v, Value::Integer(30));
            }
            other => panic!("expected a closed upvalue, got {other:?}"),
        }
        vm.close_upvalues(0);
        assert!(vm.open_upvalues.is_empty());
    }
}
