//! `bigint`: sign and little-endian base-2^24 magnitude.
//!
//! Only same-sign addition and non-flipping subtraction are supported.
//! Everything else reports NotImplementedError.

use core::any::Any;
use core::fmt::Write as _;

use object::{Arity, Instance, NativeData, ObjRef, Value};

use crate::error::RuntimeError;
use crate::natives::{NativeClass, NativeMethod, new_native, receiver, storage, storage_mut};
use crate::vm::Vm;

const DIGIT_BITS: u32 = 24;
const DIGIT_MASK: u32 = (1 << DIGIT_BITS) - 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BigInt {
    /// -1, 0 or +1.
    sign: i8,
    /// `None` until initialised and after the sweep hook released it.
    digits: Option<Vec<u32>>,
}

impl NativeData for BigInt {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn extra_bytes(&self) -> usize {
        self.digits().len() * size_of::<u32>()
    }
}

impl BigInt {
    pub fn from_i64(value: i64) -> Self {
        let mut magnitude = value.unsigned_abs();
        let mut digits = Vec::with_capacity(3);
        while magnitude != 0 {
            digits.push((magnitude & DIGIT_MASK as u64) as u32);
            magnitude >>= DIGIT_BITS;
        }
        Self {
            sign: value.signum() as i8,
            digits: Some(digits),
        }
    }

    pub fn sign(&self) -> i8 {
        self.sign
    }

    pub fn digits(&self) -> &[u32] {
        self.digits.as_deref().unwrap_or(&[])
    }

    pub fn negated(&self) -> Self {
        Self {
            sign: -self.sign,
            digits: Some(self.digits().to_vec()),
        }
    }

    pub fn checked_add(&self, other: &BigInt) -> Result<BigInt, RuntimeError> {
        if other.sign == 0 {
            return Ok(self.clone());
        }
        if self.sign == 0 {
            return Ok(other.clone());
        }
        if self.sign != other.sign {
            return Err(RuntimeError::NotImplemented("todo subtraction".into()));
        }
        let (a, b) = (self.digits(), other.digits());
        let len = a.len().max(b.len());
        let mut out = Vec::with_capacity(len + 1);
        let mut carry = 0;
        for i in 0..len {
            let sum = carry + a.get(i).copied().unwrap_or(0) + b.get(i).copied().unwrap_or(0);
            carry = sum >> DIGIT_BITS;
            out.push(sum & DIGIT_MASK);
        }
        if carry != 0 {
            out.push(carry);
        }
        Ok(Self::normalized(self.sign, out))
    }

    pub fn checked_sub(&self, other: &BigInt) -> Result<BigInt, RuntimeError> {
        if other.sign == 0 {
            return Ok(self.clone());
        }
        if self.sign == 0 {
            return Ok(other.negated());
        }
        if self.sign != other.sign {
            return self.checked_add(&other.negated());
        }
        let (a, b) = (self.digits(), other.digits());
        if a.len() < b.len() {
            return Err(RuntimeError::NotImplemented(
                "Sign flip because right side is definitely bigger".into(),
            ));
        }
        let mut out = a.to_vec();
        let mut borrow = 0i64;
        for (i, digit) in out.iter_mut().enumerate() {
            let r = borrow + *digit as i64 - b.get(i).copied().unwrap_or(0) as i64;
            *digit = (r & DIGIT_MASK as i64) as u32;
            borrow = r >> DIGIT_BITS;
        }
        if borrow != 0 {
            return Err(RuntimeError::NotImplemented(format!(
                "Sign flip: {}",
                borrow as u32
            )));
        }
        Ok(Self::normalized(self.sign, out))
    }

    /// Trim leading zero digits; an empty magnitude is zero.
    fn normalized(sign: i8, mut digits: Vec<u32>) -> Self {
        while digits.last() == Some(&0) {
            digits.pop();
        }
        let sign = if digits.is_empty() { 0 } else { sign };
        Self {
            sign,
            digits: Some(digits),
        }
    }

    /// `<bigint +0x1000000>`
    pub fn repr(&self) -> String {
        let sign = match self.sign {
            1 => '+',
            -1 => '-',
            _ => ' ',
        };
        let mut out = format!("<bigint {sign}0x");
        let digits = self.digits();
        for (i, digit) in digits.iter().enumerate().rev() {
            if i + 1 == digits.len() {
                let _ = write!(out, "{digit:x}");
            } else {
                let _ = write!(out, "{digit:06x}");
            }
        }
        out.push('>');
        out
    }

    pub fn to_i128(&self) -> i128 {
        let magnitude = self
            .digits()
            .iter()
            .rev()
            .fold(0i128, |acc, &d| (acc << DIGIT_BITS) | d as i128);
        magnitude * self.sign as i128
    }
}

fn sweep(instance: &mut Instance) {
    if let Some(bigint) = instance.native_mut::<BigInt>() {
        bigint.digits.take();
    }
}

const METHODS: &[NativeMethod] = &[
    NativeMethod::new("__init__", Arity::Between(1, 2), init),
    NativeMethod::new("__add__", Arity::Exact(2), add),
    NativeMethod::new("__sub__", Arity::Exact(2), sub),
    NativeMethod::new("negate", Arity::Exact(1), negate),
    NativeMethod::new("copy", Arity::Exact(1), copy),
    NativeMethod::new("__repr__", Arity::Exact(1), repr),
];

pub(crate) fn register(vm: &mut Vm) -> Result<ObjRef, RuntimeError> {
    vm.define_native_class(
        NativeClass::new("bigint")
            .with_storage::<BigInt>()
            .on_sweep(sweep)
            .methods(METHODS),
    )
}

fn this(vm: &Vm, args: &[Value]) -> Result<BigInt, RuntimeError> {
    let value = receiver(args)?;
    storage::<BigInt>(vm, value).cloned().ok_or_else(|| {
        RuntimeError::type_error(format!("expected bigint, not '{}'", vm.type_name(value)))
    })
}

fn operand(vm: &Vm, args: &[Value]) -> Result<BigInt, RuntimeError> {
    let value = args.get(1).copied().unwrap_or(Value::None);
    storage::<BigInt>(vm, value)
        .cloned()
        .ok_or_else(|| RuntimeError::NotImplemented("not implemented".into()))
}

fn result(vm: &mut Vm, args: &[Value], value: BigInt) -> Result<Value, RuntimeError> {
    let class = vm.class_of(receiver(args)?);
    new_native::<BigInt>(vm, class, |slot| *slot = value)
}

fn init(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let this = receiver(args)?;
    let value = match args.get(1) {
        None => BigInt {
            sign: 0,
            digits: Some(Vec::new()),
        },
        Some(&Value::Integer(n)) => BigInt::from_i64(n),
        Some(&other) => {
            return Err(RuntimeError::type_error(format!(
                "bigint() argument must be int, not '{}'",
                vm.type_name(other)
            )));
        }
    };
    let slot = storage_mut::<BigInt>(vm, this)
        .ok_or_else(|| RuntimeError::type_error("bigint.__init__ on a non-bigint"))?;
    *slot = value;
    Ok(Value::None)
}

fn add(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let sum = this(vm, args)?.checked_add(&operand(vm, args)?)?;
    result(vm, args, sum)
}

fn sub(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let difference = this(vm, args)?.checked_sub(&operand(vm, args)?)?;
    result(vm, args, difference)
}

fn negate(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let negated = this(vm, args)?.negated();
    result(vm, args, negated)
}

fn copy(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let copied = this(vm, args)?;
    result(vm, args, copied)
}

fn repr(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let text = this(vm, args)?.repr();
    Ok(Value::Object(vm.intern(&text)))
}
