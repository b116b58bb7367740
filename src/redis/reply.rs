//! Immutable reply tree handed to command callbacks

use super::resp::RespValue;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyType {
    Nil,
    Integer,
    Status,
    String,
    Array,
}

/// A decoded Redis reply. Byte payloads keep embedded NULs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reply {
    #[default]
    Nil,
    Integer(i64),
    Status(Bytes),
    String(Bytes),
    Array(Vec<Arc<Reply>>),
}

impl Reply {
    /// Build the reply tree from a parsed frame. Error frames are not
    /// replies; nested ones decode as Nil.
    pub fn from_resp(value: &RespValue) -> Reply {
        match value {
            RespValue::SimpleString(s) => Reply::Status(s.clone()),
            RespValue::Error(_) => Reply::Nil,
            RespValue::Integer(n) => Reply::Integer(*n),
            RespValue::BulkString(Some(b)) => Reply::String(b.clone()),
            RespValue::BulkString(None) | RespValue::Array(None) => Reply::Nil,
            RespValue::Array(Some(elements)) => Reply::Array(
                elements
                    .iter()
                    .map(|e| Arc::new(Reply::from_resp(e)))
                    .collect(),
            ),
        }
    }

    pub fn reply_type(&self) -> ReplyType {
        match self {
            Reply::Nil => ReplyType::Nil,
            Reply::Integer(_) => ReplyType::Integer,
            Reply::Status(_) => ReplyType::Status,
            Reply::String(_) => ReplyType::String,
            Reply::Array(_) => ReplyType::Array,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// 0 unless this is an integer reply
    pub fn as_integer(&self) -> i64 {
        match self {
            Reply::Integer(n) => *n,
            _ => 0,
        }
    }

    /// Status or string payload, empty for other variants
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Reply::Status(b) | Reply::String(b) => b,
            _ => &[],
        }
    }

    pub fn as_array(&self) -> &[Arc<Reply>] {
        match self {
            Reply::Array(items) => items,
            _ => &[],
        }
    }

    /// Lossy text view of the payload
    pub fn as_str_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}
