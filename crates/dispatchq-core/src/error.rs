use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported argument type tag: {0}")]
    UnsupportedType(String),

    #[error("Value {value} does not match type tag {tag}")]
    TypeMismatch { tag: String, value: serde_json::Value },

    #[error("Expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Argument {index} is {actual}, signature expects {expected}")]
    KindMismatch {
        index: usize,
        expected: String,
        actual: String,
    },
}

pub type Result<T> = std::result::Result<T, DecodeError>;
