use object::{ObjectKind, SpecialMethod, Value};

use crate::error::RuntimeError;
use crate::vm::Vm;

impl Vm {
    /// Display form used by `Print` and top-level results. Runs a native
    /// `__repr__` when the value's class has one; `value` must be rooted.
    pub fn display(&mut self, value: Value) -> Result<String, RuntimeError> {
        if let Some(repr) = self.special_of(value, SpecialMethod::Repr) {
            if let Some(text) = self.native_repr(repr, value)? {
                return Ok(text);
            }
        }
        Ok(self.plain_form(value))
    }

    /// Stringified right operand of a string concatenation.
    pub(crate) fn concat_form(&self, value: Value) -> String {
        match value {
            Value::Object(_) => match self.as_str(value) {
                Some(s) => s.to_string(),
                None => "<Object>".to_string(),
            },
            scalar => self.plain_form(scalar),
        }
    }

    fn native_repr(&mut self, repr: Value, receiver: Value) -> Result<Option<String>, RuntimeError> {
        let Some(r) = repr.as_object() else {
            return Ok(None);
        };
        let index = match self.heap.kind(r) {
            Some(ObjectKind::NativeFunction(native)) => native.index,
            _ => return Ok(None),
        };
        let func = self
            .natives
            .get(index)
            .map(|m| m.func)
            .ok_or_else(|| RuntimeError::internal(format!("no native #{index}")))?;
        let text = func(self, &[receiver])?;
        Ok(self.as_str(text).map(str::to_string))
    }

    /// Display form without running any method.
    pub(crate) fn plain_form(&self, value: Value) -> String {
        let r = match value {
            Value::None => return "None".to_string(),
            Value::Boolean(true) => return "True".to_string(),
            Value::Boolean(false) => return "False".to_string(),
            Value::Integer(n) => return n.to_string(),
            Value::Floating(x) => return format_g(x),
            Value::Object(r) => r,
        };
        match self.heap.kind(r) {
            Some(ObjectKind::Str(s)) => s.as_str().to_string(),
            Some(ObjectKind::Class(class)) => format!("<class '{}'>", class.name),
            Some(ObjectKind::Instance(_)) => format!("<{} object>", self.type_name(value)),
            Some(ObjectKind::Function(function)) => format!("<function {}>", function.name),
            Some(ObjectKind::Closure(closure)) => {
                format!("<function {}>", self.function_name(closure.function))
            }
            Some(ObjectKind::NativeFunction(native)) => {
                format!("<built-in function {}>", native.name)
            }
            Some(ObjectKind::BoundMethod(bound)) => {
                let name = bound
                    .method
                    .as_object()
                    .map_or_else(String::new, |m| self.callable_name(m));
                format!("<bound method {name}>")
            }
            Some(ObjectKind::Generator(generator)) => {
                let function = match self.heap.kind(generator.closure) {
                    Some(ObjectKind::Closure(closure)) => self.function_name(closure.function),
                    _ => String::new(),
                };
                format!("<generator object {function}>")
            }
            Some(ObjectKind::Upvalue(_)) => "<upvalue>".to_string(),
            None => "<freed>".to_string(),
        }
    }

    pub(crate) fn function_name(&self, function: object::ObjRef) -> String {
        match self.heap.kind(function) {
            Some(ObjectKind::Function(function)) => function.name.clone(),
            _ => "?".to_string(),
        }
    }

    pub(crate) fn callable_name(&self, callable: object::ObjRef) -> String {
        match self.heap.kind(callable) {
            Some(ObjectKind::Closure(closure)) => self.function_name(closure.function),
            Some(ObjectKind::NativeFunction(native)) => native.name.to_string(),
            Some(ObjectKind::Class(class)) => class.name.clone(),
            _ => "?".to_string(),
        }
    }
}

/// `%g` rendering: six significant digits, trailing zeros dropped,
/// scientific notation below 1e-4 and from 1e6 on.
pub fn format_g(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{x:.5e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if !(-4..6).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exponent.abs())
    } else {
        let decimals = (5 - exponent).max(0) as usize;
        trim_fraction(&format!("{x:.decimals$}")).to_string()
    }
}

fn trim_fraction(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::format_g;

    #[test]
    fn format_g_matches_c() {
        assert_eq!(format_g(0.1), "0.1");
        assert_eq!(format_g(2.5), "2.5");
        assert_eq!(format_g(100.0), "100");
        assert_eq!(format_g(1.0 / 3.0), "0.333333");
        assert_eq!(format_g(123456.0), "123456");
        assert_eq!(format_g(1234567.0), "1.23457e+06");
        assert_eq!(format_g(0.0001), "0.0001");
        assert_eq!(format_g(0.00001), "1e-05");
        assert_eq!(format_g(-1.5), "-1.5");
        assert_eq!(format_g(0.0), "0");
        assert_eq!(format_g(f64::INFINITY), "inf");
    }
}
