use core::fmt;

use object::Value;

/// Builtin exception classes, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorKind {
    Exception = 0,
    TypeError,
    NameError,
    AttributeError,
    ValueError,
    NotImplementedError,
    ArgumentError,
    ZeroDivisionError,
    RecursionError,
}

impl ErrorKind {
    pub const COUNT: usize = ErrorKind::RecursionError as usize + 1;

    pub const ALL: [ErrorKind; Self::COUNT] = [
        ErrorKind::Exception,
        ErrorKind::TypeError,
        ErrorKind::NameError,
        ErrorKind::AttributeError,
        ErrorKind::ValueError,
        ErrorKind::NotImplementedError,
        ErrorKind::ArgumentError,
        ErrorKind::ZeroDivisionError,
        ErrorKind::RecursionError,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Exception => "Exception",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::NameError => "NameError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::NotImplementedError => "NotImplementedError",
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::RecursionError => "RecursionError",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    TypeError(String),
    NameError(String),
    AttributeError(String),
    ValueError(String),
    NotImplemented(String),
    /// A call received an argument count its callee does not accept.
    Arity(String),
    ZeroDivision(String),
    /// The frame limit was reached.
    StackOverflow,
    /// A script exception in flight. Only seen inside the interpreter
    /// loop, never returned from it.
    Raised(Value),
    /// An uncaught instance of a user-defined exception class.
    Uncaught { class: String, message: String },
    /// Malformed bytecode or a broken interpreter invariant. Not
    /// catchable by script code.
    Internal(String),
}

impl RuntimeError {
    /// Builtin class the error is raised as, `None` for internal errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::TypeError(_) => Some(ErrorKind::TypeError),
            Self::NameError(_) => Some(ErrorKind::NameError),
            Self::AttributeError(_) => Some(ErrorKind::AttributeError),
            Self::ValueError(_) => Some(ErrorKind::ValueError),
            Self::NotImplemented(_) => Some(ErrorKind::NotImplementedError),
            Self::Arity(_) => Some(ErrorKind::ArgumentError),
            Self::ZeroDivision(_) => Some(ErrorKind::ZeroDivisionError),
            Self::StackOverflow => Some(ErrorKind::RecursionError),
            Self::Raised(_) | Self::Uncaught { .. } => Some(ErrorKind::Exception),
            Self::Internal(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::TypeError(m)
            | Self::NameError(m)
            | Self::AttributeError(m)
            | Self::ValueError(m)
            | Self::NotImplemented(m)
            | Self::Arity(m)
            | Self::ZeroDivision(m)
            | Self::Internal(m) => m.clone(),
            Self::StackOverflow => "maximum recursion depth exceeded".to_string(),
            Self::Raised(value) => format!("{value:?}"),
            Self::Uncaught { message, .. } => message.clone(),
        }
    }

    /// Typed error for an uncaught instance of a builtin exception class.
    pub(crate) fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::TypeError => Self::TypeError(message),
            ErrorKind::NameError => Self::NameError(message),
            ErrorKind::AttributeError => Self::AttributeError(message),
            ErrorKind::ValueError => Self::ValueError(message),
            ErrorKind::NotImplementedError => Self::NotImplemented(message),
            ErrorKind::ArgumentError => Self::Arity(message),
            ErrorKind::ZeroDivisionError => Self::ZeroDivision(message),
            ErrorKind::RecursionError => Self::StackOverflow,
            ErrorKind::Exception => Self::Uncaught {
                class: kind.name().to_string(),
                message,
            },
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self {
            Self::Uncaught { class, .. } => class.as_str(),
            Self::Internal(_) => "InternalError",
            other => other.kind().map_or("Exception", ErrorKind::name),
        };
        let message = self.message();
        if message.is_empty() {
            write!(f, "{class}")
        } else {
            write!(f, "{class}: {message}")
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_class() {
        let err = RuntimeError::NameError("Undefined variable 'x'.".into());
        assert_eq!(err.to_string(), "NameError: Undefined variable 'x'.");
        assert_eq!(
            RuntimeError::StackOverflow.to_string(),
            "RecursionError: maximum recursion depth exceeded"
        );
        let uncaught = RuntimeError::Uncaught {
            class: "Oops".into(),
            message: String::new(),
        };
        assert_eq!(uncaught.to_string(), "Oops");
    }

    #[test]
    fn kinds_round_trip() {
        for kind in ErrorKind::ALL {
            let err = RuntimeError::from_kind(kind, "m".into());
            assert_eq!(err.kind(), Some(kind));
        }
        assert_eq!(RuntimeError::internal("bad").kind(), None);
    }
}
