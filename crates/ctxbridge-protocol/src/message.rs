use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::value::{Object, Value};

/// Transport-defined context echoed back by the provider.
pub type Meta = BTreeMap<String, Value>;

/// Envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Remote invocation request, and its reply.
    Apply,
    /// Provider-side invocation of a forwarded callback.
    Callback,
    /// Liveness probe.
    Ping,
    /// Liveness answer.
    Pong,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Apply => "apply",
            MessageType::Callback => "callback",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "apply" => Some(MessageType::Apply),
            "callback" => Some(MessageType::Callback),
            "ping" => Some(MessageType::Ping),
            "pong" => Some(MessageType::Pong),
            _ => None,
        }
    }

    /// Liveness envelopes are the only ones allowed an empty path.
    pub fn is_heartbeat(self) -> bool {
        matches!(self, MessageType::Ping | MessageType::Pong)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the side that emitted an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    Provider,
    Injector,
}

impl MessageSender {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageSender::Provider => "provider",
            MessageSender::Injector => "injector",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "provider" => Some(MessageSender::Provider),
            "injector" => Some(MessageSender::Injector),
            _ => None,
        }
    }

    /// The role on the other end of the channel.
    pub fn peer(self) -> Self {
        match self {
            MessageSender::Provider => MessageSender::Injector,
            MessageSender::Injector => MessageSender::Provider,
        }
    }
}

impl fmt::Display for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope exchanged between provider and injector.
///
/// Field names on the wire: `type`, `id`, `path`, `sender`, `callbackIds`,
/// `args`, `data`, `error`, `meta`, `namespace`, `timeStamp`. Optional
/// fields are omitted when `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub id: String,
    pub path: Vec<String>,
    pub sender: MessageSender,
    pub callback_ids: Option<Vec<String>>,
    pub args: Option<Vec<Value>>,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub meta: Meta,
    pub namespace: String,
    /// Milliseconds since the Unix epoch.
    pub time_stamp: u64,
}

impl Message {
    /// Create an envelope stamped with the current time and empty meta.
    pub fn new(
        message_type: MessageType,
        sender: MessageSender,
        id: impl Into<String>,
        path: Vec<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            message_type,
            id: id.into(),
            path,
            sender,
            callback_ids: None,
            args: None,
            data: None,
            error: None,
            meta: Meta::new(),
            namespace: namespace.into(),
            time_stamp: now_millis(),
        }
    }

    /// Create a reply carrying the request's `id`, `path`, `meta` and
    /// `namespace`.
    pub fn reply_to(request: &Message, message_type: MessageType, sender: MessageSender) -> Self {
        let mut reply = Self::new(
            message_type,
            sender,
            request.id.clone(),
            request.path.clone(),
            request.namespace.clone(),
        );
        reply.meta = request.meta.clone();
        reply
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_callback_ids(mut self, callback_ids: Vec<String>) -> Self {
        self.callback_ids = Some(callback_ids);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Dotted rendering of the path for logs.
    pub fn path_display(&self) -> String {
        self.path.join(".")
    }

    /// Wire form of the envelope.
    pub fn to_value(&self) -> Value {
        let object = Object::new();
        object.insert("type", self.message_type.as_str());
        object.insert("id", self.id.as_str());
        object.insert("path", Value::array(self.path.iter().map(String::as_str)));
        object.insert("sender", self.sender.as_str());
        if let Some(callback_ids) = &self.callback_ids {
            object.insert(
                "callbackIds",
                Value::array(callback_ids.iter().map(String::as_str)),
            );
        }
        if let Some(args) = &self.args {
            object.insert("args", Value::from(args.clone()));
        }
        if let Some(data) = &self.data {
            object.insert("data", data.clone());
        }
        if let Some(error) = &self.error {
            object.insert("error", error.as_str());
        }
        object.insert("meta", Value::from(self.meta.clone()));
        object.insert("namespace", self.namespace.as_str());
        object.insert("timeStamp", self.time_stamp);
        Value::Object(object)
    }

    /// JSON form of the envelope, for transports that serialize.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.to_value().to_json()
    }

    /// Parse and validate a JSON envelope.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        validate_message(Some(&Value::from(json)))
    }
}

impl TryFrom<&Value> for Message {
    type Error = ProtocolError;

    fn try_from(value: &Value) -> Result<Self> {
        validate_message(Some(value))
    }
}

/// Structural validity predicate. Consumers drop anything this rejects.
pub fn check_message(candidate: Option<&Value>) -> bool {
    validate_message(candidate).is_ok()
}

/// Validate a candidate and parse it into a [`Message`].
///
/// Reports the first field that fails.
pub fn validate_message(candidate: Option<&Value>) -> Result<Message> {
    let object = candidate
        .and_then(Value::as_object)
        .ok_or(ProtocolError::NotAMessage)?;

    let message_type = object
        .get("type")
        .and_then(|value| value.as_str().and_then(MessageType::parse))
        .ok_or_else(|| invalid("type", "expected one of apply, callback, ping, pong"))?;

    let id = non_empty_string(object, "id")?;

    let path = object
        .get("path")
        .as_ref()
        .and_then(string_list)
        .ok_or_else(|| invalid("path", "expected an array of strings"))?;
    if path.is_empty() && !message_type.is_heartbeat() {
        return Err(invalid("path", "must not be empty for apply or callback"));
    }

    let sender = object
        .get("sender")
        .and_then(|value| value.as_str().and_then(MessageSender::parse))
        .ok_or_else(|| invalid("sender", "expected provider or injector"))?;

    let callback_ids = match object.get("callbackIds") {
        None => None,
        Some(value) => Some(
            string_list(&value).ok_or_else(|| invalid("callbackIds", "expected an array of strings"))?,
        ),
    };

    let args = match object.get("args") {
        None => None,
        Some(Value::Array(array)) => Some(array.to_vec()),
        Some(_) => return Err(invalid("args", "expected an array")),
    };

    let error = match object.get("error") {
        None => None,
        Some(Value::String(error)) => Some(error),
        Some(_) => return Err(invalid("error", "expected a string")),
    };

    let meta = match object.get("meta") {
        Some(Value::Object(meta)) => meta.to_map(),
        _ => return Err(invalid("meta", "expected an object")),
    };

    let namespace = non_empty_string(object, "namespace")?;

    let time_stamp = match object.get("timeStamp") {
        Some(Value::Number(number)) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|millis| millis.max(0.0) as u64))
            .unwrap_or_default(),
        _ => return Err(invalid("timeStamp", "expected a number")),
    };

    Ok(Message {
        message_type,
        id,
        path,
        sender,
        callback_ids,
        args,
        data: object.get("data"),
        error,
        meta,
        namespace,
        time_stamp,
    })
}

fn invalid(field: &'static str, reason: &'static str) -> ProtocolError {
    ProtocolError::InvalidField { field, reason }
}

fn non_empty_string(object: &Object, field: &'static str) -> Result<String> {
    match object.get(field) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value),
        _ => Err(invalid(field, "expected a non-empty string")),
    }
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .to_vec()
        .into_iter()
        .map(|item| match item {
            Value::String(item) => Some(item),
            _ => None,
        })
        .collect()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
