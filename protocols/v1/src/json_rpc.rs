//! https://www.jsonrpc.org/specification#response_object
use serde::{
    de::Deserializer,
    ser::{SerializeStruct, SerializeTuple, Serializer},
    Deserialize, Serialize,
};
use serde_json::Value;
use std::{fmt, fmt::Display};

/// Error codes used by Stratum V1 servers in the `error` member of a response.
pub mod error_codes {
    pub const OTHER: i32 = 20;
    pub const JOB_NOT_FOUND: i32 = 21;
    pub const DUPLICATE_SHARE: i32 = 22;
    pub const LOW_DIFFICULTY: i32 = 23;
    pub const UNAUTHORIZED: i32 = 24;
    pub const NOT_SUBSCRIBED: i32 = 25;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL: i32 = -32603;
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum Message {
    StandardRequest(StandardRequest),
    Notification(Notification),
    Response(Response),
}

impl Message {
    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    /// The method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::StandardRequest(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::StandardRequest(sr) => write!(f, "{sr}"),
            Message::Notification(n) => write!(f, "{n}"),
            Message::Response(r) => write!(f, "{r}"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct StandardRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl fmt::Display for StandardRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ id: {}, method: {}, params: {} }}",
            self.id, self.method, self.params
        )
    }
}

/// A request that expects no answer. On the wire it always carries `"id": null`, which some
/// miner firmware insists on.
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Serialize for Notification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Notification", 3)?;
        state.serialize_field("id", &Option::<u64>::None)?;
        state.serialize_field("method", &self.method)?;
        state.serialize_field("params", &self.params)?;
        state.end()
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ method: \"{}\", params: {} }}", self.method, self.params)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub result: Value,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Response {
            id,
            error: None,
            result,
        }
    }

    pub fn error(id: u64, error: JsonRpcError) -> Self {
        Response {
            id,
            error: Some(error),
            result: Value::Null,
        }
    }

    /// Interprets the response of an authorize or submit call. Anything that is not a plain
    /// `true` with no error counts as a rejection.
    pub fn is_accepted(&self) -> bool {
        self.error.is_none() && self.result.as_bool().unwrap_or(false)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.error {
            write!(
                f,
                "{{ id: {}, error: {}, result: {} }}",
                self.id, err, self.result
            )
        } else {
            write!(f, "{{ id: {}, result: {} }}", self.id, self.result)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JsonRpcError {
    pub code: i32, // json do not specify precision which one should be used?
    pub message: String,
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        JsonRpcError {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, \"{}\"]", self.code, self.message)
    }
}

impl Serialize for JsonRpcError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.code)?;
        tuple.serialize_element(&self.message)?;
        tuple.serialize_element(&self.data)?;
        tuple.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawJsonRpcError {
    List(Vec<Value>),
    Object {
        code: i64,
        message: String,
        #[serde(default)]
        data: Option<Value>,
    },
    Text(String),
}

impl<'de> Deserialize<'de> for JsonRpcError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let error = match RawJsonRpcError::deserialize(deserializer)? {
            RawJsonRpcError::List(items) => {
                let mut items = items.into_iter();
                let code = items.next().and_then(|c| c.as_i64()).unwrap_or(0);
                let message = match items.next() {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let data = items.next().filter(|d| !d.is_null());
                JsonRpcError {
                    code: code as i32,
                    message,
                    data,
                }
            }
            RawJsonRpcError::Object {
                code,
                message,
                data,
            } => JsonRpcError {
                code: code as i32,
                message,
                data,
            },
            RawJsonRpcError::Text(message) => JsonRpcError {
                code: 0,
                message,
                data: None,
            },
        };
        Ok(error)
    }
}

impl From<Response> for Message {
    fn from(res: Response) -> Self {
        Message::Response(res)
    }
}

impl From<StandardRequest> for Message {
    fn from(sr: StandardRequest) -> Self {
        Message::StandardRequest(sr)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}
