use crate::error::{DecodeError, Result};
use crate::task::TaskArgument;
use serde_json::Value;

/// Native invocation argument produced by the value decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    List(Vec<ArgValue>),
}

impl ArgValue {
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgValue::Bool(_) => ArgKind::Bool,
            ArgValue::Int(_) => ArgKind::Int,
            ArgValue::Uint(_) => ArgKind::Uint,
            ArgValue::Float(_) => ArgKind::Float,
            ArgValue::Str(_) => ArgKind::Str,
            ArgValue::List(items) => ArgKind::List(Box::new(
                items.first().map(ArgValue::kind).unwrap_or(ArgKind::Str),
            )),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ArgValue::Uint(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Declared parameter kind in a handler signature.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgKind {
    Bool,
    Int,
    Uint,
    Float,
    Str,
    List(Box<ArgKind>),
}

impl ArgKind {
    /// Parse a decoder tag (`"int64"`, `"[]string"`, ...) into a kind.
    pub fn from_tag(tag: &str) -> Result<Self> {
        if let Some(elem) = tag.strip_prefix("[]") {
            let inner = ArgKind::from_tag(elem)?;
            if matches!(inner, ArgKind::List(_)) {
                return Err(DecodeError::UnsupportedType(tag.to_string()));
            }
            return Ok(ArgKind::List(Box::new(inner)));
        }

        match tag {
            "bool" => Ok(ArgKind::Bool),
            "string" => Ok(ArgKind::Str),
            "int" | "int8" | "int16" | "int32" | "int64" => Ok(ArgKind::Int),
            "uint" | "uint8" | "uint16" | "uint32" | "uint64" => Ok(ArgKind::Uint),
            "float32" | "float64" => Ok(ArgKind::Float),
            _ => Err(DecodeError::UnsupportedType(tag.to_string())),
        }
    }
}

impl std::fmt::Display for ArgKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgKind::Bool => write!(f, "bool"),
            ArgKind::Int => write!(f, "int"),
            ArgKind::Uint => write!(f, "uint"),
            ArgKind::Float => write!(f, "float"),
            ArgKind::Str => write!(f, "string"),
            ArgKind::List(elem) => write!(f, "[]{}", elem),
        }
    }
}

/// Decode a single tagged wire value into a native argument.
fn decode_value(arg: &TaskArgument) -> Result<ArgValue> {
    let kind = ArgKind::from_tag(&arg.arg_type)?;
    decode_as(&kind, &arg.arg_type, &arg.value)
}

fn decode_as(kind: &ArgKind, tag: &str, value: &Value) -> Result<ArgValue> {
    let mismatch = || DecodeError::TypeMismatch {
        tag: tag.to_string(),
        value: value.clone(),
    };

    match kind {
        ArgKind::Bool => value.as_bool().map(ArgValue::Bool).ok_or_else(mismatch),
        ArgKind::Str => value
            .as_str()
            .map(|s| ArgValue::Str(s.to_string()))
            .ok_or_else(mismatch),
        ArgKind::Int => value.as_i64().map(ArgValue::Int).ok_or_else(mismatch),
        ArgKind::Uint => value.as_u64().map(ArgValue::Uint).ok_or_else(mismatch),
        ArgKind::Float => value.as_f64().map(ArgValue::Float).ok_or_else(mismatch),
        ArgKind::List(elem) => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let decoded = items
                .iter()
                .map(|item| decode_as(elem, tag, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(ArgValue::List(decoded))
        }
    }
}

/// Decode a full argument list against a declared signature.
///
/// Fails on the first arity or kind violation; no partial result is
/// returned, so a caller never invokes a handler with a prefix of its
/// arguments.
pub fn decode_args(args: &[TaskArgument], signature: &[ArgKind]) -> Result<Vec<ArgValue>> {
    if args.len() != signature.len() {
        return Err(DecodeError::ArityMismatch {
            expected: signature.len(),
            actual: args.len(),
        });
    }

    let mut decoded = Vec::with_capacity(args.len());
    for (index, (arg, expected)) in args.iter().zip(signature).enumerate() {
        let tag_kind = ArgKind::from_tag(&arg.arg_type)?;
        if &tag_kind != expected {
            return Err(DecodeError::KindMismatch {
                index,
                expected: expected.to_string(),
                actual: tag_kind.to_string(),
            });
        }
        decoded.push(decode_value(arg)?);
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_tags() {
        assert_eq!(ArgKind::from_tag("int32").unwrap(), ArgKind::Int);
        assert_eq!(ArgKind::from_tag("uint8").unwrap(), ArgKind::Uint);
        assert_eq!(ArgKind::from_tag("float64").unwrap(), ArgKind::Float);
        assert_eq!(
            ArgKind::from_tag("[]string").unwrap(),
            ArgKind::List(Box::new(ArgKind::Str))
        );
        assert!(ArgKind::from_tag("complex128").is_err());
        assert!(ArgKind::from_tag("[][]int").is_err());
    }

    #[test]
    fn test_decode_matching_signature() {
        let args = vec![
            TaskArgument::new("string", json!("a")),
            TaskArgument::new("int64", json!(-7)),
            TaskArgument::new("[]uint", json!([1, 2, 3])),
        ];
        let signature = vec![
            ArgKind::Str,
            ArgKind::Int,
            ArgKind::List(Box::new(ArgKind::Uint)),
        ];

        let decoded = decode_args(&args, &signature).unwrap();
        assert_eq!(decoded[0], ArgValue::Str("a".to_string()));
        assert_eq!(decoded[1], ArgValue::Int(-7));
        assert_eq!(
            decoded[2],
            ArgValue::List(vec![ArgValue::Uint(1), ArgValue::Uint(2), ArgValue::Uint(3)])
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let args = vec![TaskArgument::new("string", json!("a"))];
        let err = decode_args(&args, &[]).unwrap_err();
        assert!(matches!(err, DecodeError::ArityMismatch { expected: 0, actual: 1 }));
    }

    #[test]
    fn test_kind_mismatch_reports_position() {
        let args = vec![
            TaskArgument::new("string", json!("a")),
            TaskArgument::new("bool", json!(true)),
        ];
        let err = decode_args(&args, &[ArgKind::Str, ArgKind::Int]).unwrap_err();
        assert!(matches!(err, DecodeError::KindMismatch { index: 1, .. }));
    }

    #[test]
    fn test_value_tag_disagreement() {
        let args = vec![TaskArgument::new("int", json!("not a number"))];
        let err = decode_args(&args, &[ArgKind::Int]).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { .. }));
    }
}
