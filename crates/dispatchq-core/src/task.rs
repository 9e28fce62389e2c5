use serde::{Deserialize, Serialize};

/// One task submission as it travels over the broker.
///
/// Field names on the wire are fixed by the publishing side:
/// `{"Name": ..., "UUID": ..., "Args": [{"Type": ..., "Value": ...}]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Dispatch key, resolved against the worker's task table.
    #[serde(rename = "Name")]
    pub name: String,

    /// Correlation id, unique per submitted instance.
    #[serde(rename = "UUID")]
    pub uuid: String,

    /// Positional arguments in declared order.
    #[serde(rename = "Args", default)]
    pub args: Vec<TaskArgument>,
}

/// A single typed argument: a decoder tag plus its raw JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskArgument {
    #[serde(rename = "Type")]
    pub arg_type: String,

    #[serde(rename = "Value")]
    pub value: serde_json::Value,
}

impl TaskArgument {
    pub fn new(arg_type: impl Into<String>, value: serde_json::Value) -> Self {
        TaskArgument {
            arg_type: arg_type.into(),
            value,
        }
    }
}

impl Task {
    /// Parse a broker message body into a task envelope.
    pub fn from_slice(body: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
