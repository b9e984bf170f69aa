//! Arithmetic, bitwise and comparison operators.

use object::{ObjectKind, SpecialMethod, Value};

use crate::error::RuntimeError;
use crate::frame::ReturnAction;
use crate::interpreter::Flow;
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }

    /// Operator overload consulted for instance operands.
    fn special(self) -> Option<SpecialMethod> {
        match self {
            BinaryOp::Add => Some(SpecialMethod::Add),
            BinaryOp::Sub => Some(SpecialMethod::Sub),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BitOp {
    Or,
    Xor,
    And,
    Shl,
    Shr,
}

impl BitOp {
    fn symbol(self) -> &'static str {
        match self {
            BitOp::Or => "|",
            BitOp::Xor => "^",
            BitOp::And => "&",
            BitOp::Shl => "<<",
            BitOp::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparison {
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
}

impl Comparison {
    fn apply<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            Comparison::Greater => a > b,
            Comparison::Less => a < b,
            Comparison::GreaterEqual => a >= b,
            Comparison::LessEqual => a <= b,
        }
    }
}

/// Numeric result of `a op b`, `None` when the operands are not numbers.
pub(crate) fn numeric(op: BinaryOp, a: Value, b: Value) -> Result<Option<Value>, RuntimeError> {
    let value = match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => integer(op, x, y)?,
        (Value::Integer(x), Value::Floating(y)) => floating(op, x as f64, y)?,
        (Value::Floating(x), Value::Integer(y)) => floating(op, x, y as f64)?,
        (Value::Floating(x), Value::Floating(y)) => floating(op, x, y)?,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn integer(op: BinaryOp, x: i64, y: i64) -> Result<Value, RuntimeError> {
    let zero = || RuntimeError::ZeroDivision("integer division or modulo by zero".into());
    Ok(match op {
        BinaryOp::Add => Value::Integer(x.wrapping_add(y)),
        BinaryOp::Sub => Value::Integer(x.wrapping_sub(y)),
        BinaryOp::Mul => Value::Integer(x.wrapping_mul(y)),
        BinaryOp::Div => {
            if y == 0 {
                return Err(RuntimeError::ZeroDivision("division by zero".into()));
            }
            Value::Floating(x as f64 / y as f64)
        }
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(zero());
            }
            let q = x.wrapping_div(y);
            let r = x.wrapping_rem(y);
            Value::Integer(if r != 0 && (r < 0) != (y < 0) { q - 1 } else { q })
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(zero());
            }
            let r = x.wrapping_rem(y);
            Value::Integer(if r != 0 && (r < 0) != (y < 0) { r + y } else { r })
        }
        BinaryOp::Pow if y >= 0 => Value::Integer(wrapping_pow(x, y as u64)),
        BinaryOp::Pow => Value::Floating((x as f64).powf(y as f64)),
    })
}

/// `base ** exp` modulo 2^64, by repeated squaring.
fn wrapping_pow(mut base: i64, mut exp: u64) -> i64 {
    let mut acc: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    acc
}

fn floating(op: BinaryOp, x: f64, y: f64) -> Result<Value, RuntimeError> {
    let zero = || RuntimeError::ZeroDivision("float division by zero".into());
    Ok(Value::Floating(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(zero());
            }
            x / y
        }
        BinaryOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero());
            }
            (x / y).floor()
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(RuntimeError::ZeroDivision("float modulo".into()));
            }
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }
        }
        BinaryOp::Pow => x.powf(y),
    }))
}

/// Integer-only bitwise result, `None` for non-integer operands.
pub(crate) fn bitwise(op: BitOp, a: Value, b: Value) -> Result<Option<Value>, RuntimeError> {
    let (Value::Integer(x), Value::Integer(y)) = (a, b) else {
        return Ok(None);
    };
    let value = match op {
        BitOp::Or => x | y,
        BitOp::Xor => x ^ y,
        BitOp::And => x & y,
        BitOp::Shl | BitOp::Shr if y < 0 => {
            return Err(RuntimeError::ValueError("negative shift count".into()));
        }
        BitOp::Shl if y >= 64 => 0,
        BitOp::Shl => x.wrapping_shl(y as u32),
        BitOp::Shr if y >= 64 => {
            if x < 0 { -1 } else { 0 }
        }
        BitOp::Shr => x >> y,
    };
    Ok(Some(Value::Integer(value)))
}

/// Numeric ordering with int/float promotion; `None` for other types.
pub(crate) fn compare(op: Comparison, a: Value, b: Value) -> Option<bool> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Some(op.apply(x, y)),
        (Value::Integer(x), Value::Floating(y)) => Some(op.apply(x as f64, y)),
        (Value::Floating(x), Value::Integer(y)) => Some(op.apply(x, y as f64)),
        (Value::Floating(x), Value::Floating(y)) => Some(op.apply(x, y)),
        _ => None,
    }
}

impl Vm {
    fn is_instance(&self, value: Value) -> bool {
        value
            .as_object()
            .is_some_and(|r| matches!(self.heap.kind(r), Some(ObjectKind::Instance(_))))
    }

    /// Run the left operand's overload of `method` with both operands,
    /// if it has one.
    fn dispatch_binary(
        &mut self,
        left: Value,
        method: SpecialMethod,
    ) -> Result<Option<Flow>, RuntimeError> {
        if !self.is_instance(left) {
            return Ok(None);
        }
        let Some(overload) = self.special_of(left, method) else {
            return Ok(None);
        };
        let base = self.stack.len() - 2;
        self.invoke(overload, base, 2, base, ReturnAction::Push, None)
            .map(Some)
    }

    pub(crate) fn binary(&mut self, op: BinaryOp) -> Result<Flow, RuntimeError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;

        if op == BinaryOp::Add {
            if let Some(left) = self.as_str(a) {
                let text = format!("{left}{}", self.concat_form(b));
                let r = self.intern(&text);
                self.stack.truncate(self.stack.len() - 2);
                return Ok(self.push(Value::Object(r)));
            }
        }
        if let Some(method) = op.special() {
            if let Some(flow) = self.dispatch_binary(a, method)? {
                return Ok(flow);
            }
        }
        match numeric(op, a, b)? {
            Some(value) => {
                self.stack.truncate(self.stack.len() - 2);
                Ok(self.push(value))
            }
            None => Err(self.incompatible(op.symbol(), a, b)),
        }
    }

    pub(crate) fn bitwise(&mut self, op: BitOp) -> Result<Flow, RuntimeError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        match bitwise(op, a, b)? {
            Some(value) => {
                self.stack.truncate(self.stack.len() - 2);
                Ok(self.push(value))
            }
            None => Err(self.incompatible(op.symbol(), a, b)),
        }
    }

    fn incompatible(&self, symbol: &str, a: Value, b: Value) -> RuntimeError {
        RuntimeError::type_error(format!(
            "Incompatible types for binary operand {symbol}: {} and {}",
            self.type_name(a),
            self.type_name(b)
        ))
    }

    pub(crate) fn compare(&mut self, op: Comparison) -> Result<Flow, RuntimeError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        let Some(result) = compare(op, a, b) else {
            return Err(RuntimeError::type_error(format!(
                "Can not compare types {} and {}",
                self.type_name(a),
                self.type_name(b)
            )));
        };
        self.stack.truncate(self.stack.len() - 2);
        Ok(self.push(Value::Boolean(result)))
    }

    /// `Equal`: `__eq__` of an instance left operand, else scalar
    /// equality.
    pub(crate) fn equal(&mut self) -> Result<Flow, RuntimeError> {
        let b = self.peek(0)?;
        let a = self.peek(1)?;
        if let Some(flow) = self.dispatch_binary(a, SpecialMethod::Eq)? {
            return Ok(flow);
        }
        self.stack.truncate(self.stack.len() - 2);
        Ok(self.push(Value::Boolean(a.scalar_eq(b))))
    }

    pub(crate) fn negate(&mut self) -> Result<Flow, RuntimeError> {
        let value = match self.peek(0)? {
            Value::Integer(n) => Value::Integer(n.wrapping_neg()),
            Value::Floating(x) => Value::Floating(-x),
            _ => {
                return Err(RuntimeError::type_error(
                    "Incompatible operand type for prefix negation.",
                ));
            }
        };
        self.pop()?;
        Ok(self.push(value))
    }

    pub(crate) fn bit_negate(&mut self) -> Result<Flow, RuntimeError> {
        let Value::Integer(n) = self.peek(0)? else {
            return Err(RuntimeError::type_error(
                "Incompatible operand type for bit negation.",
            ));
        };
        self.pop()?;
        Ok(self.push(Value::Integer(!n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(n: i64) -> Value {
        Value::Integer(n)
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        assert_eq!(numeric(BinaryOp::FloorDiv, int(7), int(-2)), Ok(Some(int(-4))));
        assert_eq!(numeric(BinaryOp::Mod, int(7), int(-2)), Ok(Some(int(-1))));
        assert_eq!(numeric(BinaryOp::Mod, int(-7), int(-2)), Ok(Some(int(-1))));
        assert_eq!(numeric(BinaryOp::FloorDiv, int(i64::MIN), int(-1)), Ok(Some(int(i64::MIN))));
        assert_eq!(
            numeric(BinaryOp::Mod, Value::Floating(-1.0), int(3)),
            Ok(Some(Value::Floating(2.0)))
        );
    }

    #[test]
    fn zero_divisors() {
        assert!(matches!(
            numeric(BinaryOp::Div, int(1), int(0)),
            Err(RuntimeError::ZeroDivision(m)) if m == "division by zero"
        ));
        assert!(matches!(
            numeric(BinaryOp::FloorDiv, int(1), int(0)),
            Err(RuntimeError::ZeroDivision(m)) if m == "integer division or modulo by zero"
        ));
        assert!(matches!(
            numeric(BinaryOp::Div, Value::Floating(1.0), Value::Floating(0.0)),
            Err(RuntimeError::ZeroDivision(m)) if m == "float division by zero"
        ));
    }

    #[test]
    fn negative_exponent_gives_float() {
        assert_eq!(numeric(BinaryOp::Pow, int(2), int(-1)), Ok(Some(Value::Floating(0.5))));
        assert_eq!(numeric(BinaryOp::Pow, int(3), int(3)), Ok(Some(int(27))));
    }

    #[test]
    fn huge_exponents_wrap() {
        // Odd numbers have order dividing 2^62 modulo 2^64.
        assert_eq!(numeric(BinaryOp::Pow, int(3), int((1 << 62) + 5)), Ok(Some(int(243))));
        assert_eq!(numeric(BinaryOp::Pow, int(-1), int(u32::MAX as i64 + 2)), Ok(Some(int(-1))));
        assert_eq!(numeric(BinaryOp::Pow, int(2), int(1 << 40)), Ok(Some(int(0))));
        assert_eq!(numeric(BinaryOp::Pow, int(7), int(0)), Ok(Some(int(1))));
    }

    #[test]
    fn non_numbers_are_not_handled() {
        assert_eq!(numeric(BinaryOp::Add, Value::None, int(1)), Ok(None));
        assert_eq!(bitwise(BitOp::And, Value::Floating(1.0), int(1)), Ok(None));
        assert_eq!(compare(Comparison::Less, Value::Boolean(true), int(1)), None);
    }

    #[test]
    fn shifts() {
        assert_eq!(bitwise(BitOp::Shl, int(1), int(70)), Ok(Some(int(0))));
        assert_eq!(bitwise(BitOp::Shr, int(-8), int(100)), Ok(Some(int(-1))));
        assert_eq!(bitwise(BitOp::Shr, int(-8), int(1)), Ok(Some(int(-4))));
        assert_eq!(
            bitwise(BitOp::Shl, int(1), int(-1)),
            Err(RuntimeError::ValueError("negative shift count".into()))
        );
    }

    #[test]
    fn comparisons_promote() {
        assert_eq!(compare(Comparison::GreaterEqual, int(2), Value::Floating(2.0)), Some(true));
        assert_eq!(compare(Comparison::Greater, Value::Floating(f64::NAN), int(0)), Some(false));
    }
}
