pub mod dto;
pub mod error;
pub mod outcome;


pub use dto::*;
pub use error::{Error, ErrorDetail, ErrorResponse, Result};
pub use outcome::Outcome;
