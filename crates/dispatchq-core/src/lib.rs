mod args;
mod error;
mod task;

pub use args::{decode_args, ArgKind, ArgValue};
pub use error::{DecodeError, Result};
pub use task::{Task, TaskArgument};

/// Decoder tag carried by the synthetic UUID argument.
pub const STRING_TAG: &str = "string";
