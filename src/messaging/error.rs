use std::fmt::{Display, Formatter};

/// Outcome of a failed vehicle call. Callers can tell a lost request ([FunctionError::Timeout])
///  apart from a local problem such as a missing destination or an encoding failure
///  ([FunctionError::Error]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionError {
    Error,
    Timeout,
}

impl Display for FunctionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionError::Error => write!(f, "ERROR"),
            FunctionError::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

impl std::error::Error for FunctionError {}

pub type CallResult<T> = Result<T, FunctionError>;
