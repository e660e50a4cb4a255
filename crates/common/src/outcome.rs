use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::error::{Error, ErrorDetail};

/// Result envelope returned across the orchestrator boundary.
///
/// Lower-layer errors never escape as `Err`; they are logged and folded into
/// `Failure`. Serialises as `{"result": bool, "response": ...}` where a
/// failure's response is its error message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(ErrorDetail),
}

impl<T> Outcome<T> {
    pub fn failure(err: &Error) -> Self {
        Outcome::Failure(ErrorDetail::from(err))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Error message of a failure
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(detail) => Some(&detail.message),
        }
    }

    pub fn into_result(self) -> std::result::Result<T, ErrorDetail> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(detail) => Err(detail),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(detail) => Outcome::Failure(detail),
        }
    }
}

impl<T> From<crate::Result<T>> for Outcome<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::failure(&err),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Outcome", 2)?;
        match self {
            Outcome::Success(value) => {
                state.serialize_field("result", &true)?;
                state.serialize_field("response", value)?;
            }
            Outcome::Failure(detail) => {
                state.serialize_field("result", &false)?;
                state.serialize_field("response", &detail.message)?;
            }
        }
        state.end()
    }
}
