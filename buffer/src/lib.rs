mod buffer;
mod error;

pub use buffer::{Buffer, DEFAULT_CAPACITY};
pub use error::{ErrorType, ErrorUtils, NetworkError, NetworkResult};
