pub mod request;
pub mod result;

pub use request::ChatRequest;
pub use result::{ChatResult, FailureKind};
