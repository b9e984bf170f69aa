use core::any::Any;

use object::{Arity, ClassFlags, NativeData, ObjRef, Value};

use crate::error::RuntimeError;
use crate::natives::{
    NativeClass, NativeMethod, int_arg, new_native, receiver, return_self, storage, storage_mut,
};
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Range {
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeIterator {
    pub i: i64,
    pub max: i64,
    pub step: i64,
}

impl NativeData for Range {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl NativeData for RangeIterator {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Range {
    pub fn repr(&self) -> String {
        if self.step == 1 {
            format!("range({},{})", self.min, self.max)
        } else {
            format!("range({},{},{})", self.min, self.max, self.step)
        }
    }
}

impl RangeIterator {
    /// Current value and advance, or `None` once past `max`.
    pub fn advance(&mut self) -> Option<i64> {
        let exhausted = if self.step > 0 {
            self.i >= self.max
        } else {
            self.i <= self.max
        };
        if exhausted {
            return None;
        }
        let current = self.i;
        // Stepping past the integer range ends the iteration.
        self.i = current.checked_add(self.step).unwrap_or(self.max);
        Some(current)
    }
}

const RANGE_METHODS: &[NativeMethod] = &[
    NativeMethod::new("__init__", Arity::Between(2, 4), range_init),
    NativeMethod::new("__repr__", Arity::Exact(1), range_repr),
    NativeMethod::new("__iter__", Arity::Exact(1), range_iter),
];

const ITERATOR_METHODS: &[NativeMethod] = &[
    NativeMethod::new("__init__", Arity::Exact(4), iterator_init),
    NativeMethod::new("__call__", Arity::Exact(1), iterator_call),
    NativeMethod::new("__iter__", Arity::Exact(1), return_self),
];

/// Returns the `range` and `rangeiterator` classes.
pub(crate) fn register(vm: &mut Vm) -> Result<(ObjRef, ObjRef), RuntimeError> {
    let range = vm.define_native_class(
        NativeClass::new("range")
            .with_storage::<Range>()
            .flags(ClassFlags::NO_INHERIT)
            .methods(RANGE_METHODS),
    )?;
    let iterator = vm.define_native_class(
        NativeClass::new("rangeiterator")
            .with_storage::<RangeIterator>()
            .flags(ClassFlags::NO_INHERIT)
            .methods(ITERATOR_METHODS),
    )?;
    Ok((range, iterator))
}

fn range_init(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let this = receiver(args)?;
    let range = match args.len() {
        2 => Range {
            min: 0,
            max: int_arg(vm, "range", args, 1)?,
            step: 1,
        },
        _ => {
            let min = int_arg(vm, "range", args, 1)?;
            let max = int_arg(vm, "range", args, 2)?;
            let step = if args.len() == 4 {
                int_arg(vm, "range", args, 3)?
            } else {
                1
            };
            if step == 0 {
                return Err(RuntimeError::ValueError(
                    "range() arg 3 must not be zero".into(),
                ));
            }
            Range { min, max, step }
        }
    };
    let slot = storage_mut::<Range>(vm, this)
        .ok_or_else(|| RuntimeError::type_error("range.__init__ on a non-range"))?;
    *slot = range;
    Ok(Value::None)
}

fn this_range(vm: &Vm, args: &[Value]) -> Result<Range, RuntimeError> {
    storage::<Range>(vm, receiver(args)?)
        .copied()
        .ok_or_else(|| RuntimeError::type_error("expected range"))
}

fn range_repr(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = this_range(vm, args)?.repr();
    Ok(Value::Object(vm.intern(&text)))
}

fn range_iter(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let range = this_range(vm, args)?;
    let class = vm.builtins.range_iterator;
    new_native::<RangeIterator>(vm, class, |it| {
        *it = RangeIterator {
            i: range.min,
            max: range.max,
            step: range.step,
        }
    })
}

fn iterator_init(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let this = receiver(args)?;
    let state = RangeIterator {
        i: int_arg(vm, "rangeiterator", args, 1)?,
        max: int_arg(vm, "rangeiterator", args, 2)?,
        step: int_arg(vm, "rangeiterator", args, 3)?,
    };
    let slot = storage_mut::<RangeIterator>(vm, this)
        .ok_or_else(|| RuntimeError::type_error("expected rangeiterator"))?;
    *slot = state;
    Ok(Value::None)
}

/// Next value, or the iterator itself once exhausted.
fn iterator_call(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let this = receiver(args)?;
    let it = storage_mut::<RangeIterator>(vm, this)
        .ok_or_else(|| RuntimeError::type_error("expected rangeiterator"))?;
    Ok(it.advance().map_or(this, Value::Integer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterator_counts_up_and_down() {
        let mut up = RangeIterator { i: 0, max: 3, step: 1 };
        let items: Vec<i64> = core::iter::from_fn(|| up.advance()).collect();
        assert_eq!(items, vec![0, 1, 2]);

        let mut down = RangeIterator { i: 5, max: 0, step: -2 };
        let items: Vec<i64> = core::iter::from_fn(|| down.advance()).collect();
        assert_eq!(items, vec![5, 3, 1]);

        let mut empty = RangeIterator { i: 3, max: 3, step: 1 };
        assert_eq!(empty.advance(), None);
    }

    #[test]
    fn overflowing_step_exhausts() {
        let mut up = RangeIterator { i: 0, max: i64::MAX, step: i64::MAX - 1 };
        let items: Vec<i64> = core::iter::from_fn(|| up.advance()).take(4).collect();
        assert_eq!(items, vec![0, i64::MAX - 1]);

        let mut down = RangeIterator { i: 0, max: i64::MIN, step: i64::MIN + 1 };
        let items: Vec<i64> = core::iter::from_fn(|| down.advance()).take(4).collect();
        assert_eq!(items, vec![0, i64::MIN + 1]);
    }

    #[test]
    fn repr_omits_unit_step() {
        assert_eq!(Range { min: 0, max: 5, step: 1 }.repr(), "range(0,5)");
        assert_eq!(Range { min: 1, max: 9, step: 2 }.repr(), "range(1,9,2)");
    }
}
