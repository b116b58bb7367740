/// Redis RESP (Redis Serialization Protocol) parsing and generation
///
/// The parser keeps per-connection state: partial reads never lose data and
/// bytes already parsed are not looked at again.
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// RESP data types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(Bytes),
    /// Error (-ERR message\r\n)
    Error(Bytes),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n), None is the NULL bulk string
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...), None is the NULL array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Payload of a simple or bulk string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::SimpleString(b) | RespValue::BulkString(Some(b)) => Some(b),
            _ => None,
        }
    }
}

/// Incremental RESP parser for one connection
///
/// Complete elements are consumed from the input as soon as they arrive and
/// arrays under construction are kept on a stack, so a large reply split
/// over many reads is scanned once.
#[derive(Debug, Default)]
pub struct RespParser {
    stack: Vec<PartialArray>,
    /// Input length below which the next element cannot be complete
    needed: usize,
}

#[derive(Debug)]
struct PartialArray {
    expected: usize,
    items: Vec<RespValue>,
}

/// RESP encoder for writing Redis protocol messages
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),
    #[error("Arrays nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Deepest array nesting accepted in a reply
pub const MAX_NESTING: usize = 32;

enum Element {
    Value(RespValue),
    ArrayStart(usize),
}

impl RespParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the next complete value. Input belonging to a value that is not
    /// complete yet is either left in `buf` or kept in the parser.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        loop {
            if buf.len() < self.needed {
                return Ok(None);
            }
            let element = match Self::parse_element(buf)? {
                Ok(element) => element,
                Err(needed) => {
                    self.needed = needed;
                    return Ok(None);
                }
            };
            self.needed = 0;

            let mut value = match element {
                Element::ArrayStart(expected) => {
                    if self.stack.len() >= MAX_NESTING {
                        return Err(RespParseError::TooDeep(MAX_NESTING));
                    }
                    self.stack.push(PartialArray {
                        expected,
                        items: Vec::with_capacity(expected.min(1024)),
                    });
                    continue;
                }
                Element::Value(value) => value,
            };

            // Fold the value into the enclosing arrays, closing the full ones
            loop {
                let Some(mut top) = self.stack.pop() else {
                    return Ok(Some(value));
                };
                top.items.push(value);
                if top.items.len() < top.expected {
                    self.stack.push(top);
                    break;
                }
                value = RespValue::Array(Some(top.items));
            }
        }
    }

    /// Parse every complete value in the buffer
    pub fn parse_all(&mut self, buf: &mut BytesMut) -> Result<Vec<RespValue>, RespParseError> {
        let mut values = Vec::new();
        while let Some(value) = self.parse(buf)? {
            values.push(value);
        }
        Ok(values)
    }

    /// Consume one scalar or array header from the front of `buf`. `Err(n)`
    /// means nothing was consumed and at least `n` bytes are needed.
    fn parse_element(buf: &mut BytesMut) -> Result<Result<Element, usize>, RespParseError> {
        let Some(&first) = buf.first() else {
            return Ok(Err(1));
        };
        let Some((line_end, next)) = Self::find_line(buf, 1) else {
            return Ok(Err(buf.len() + 1));
        };

        let element = match first {
            b'+' => Element::Value(RespValue::SimpleString(Bytes::copy_from_slice(
                &buf[1..line_end],
            ))),
            b'-' => Element::Value(RespValue::Error(Bytes::copy_from_slice(&buf[1..line_end]))),
            b':' => Element::Value(RespValue::Integer(Self::parse_int(&buf[1..line_end])?)),
            b'$' => {
                let size = Self::parse_int(&buf[1..line_end])?;
                if size == -1 {
                    Element::Value(RespValue::BulkString(None))
                } else if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid bulk string size".to_string(),
                    ));
                } else {
                    let end = next + size as usize;
                    if buf.len() < end + 2 {
                        return Ok(Err(end + 2));
                    }
                    if &buf[end..end + 2] != b"\r\n" {
                        return Err(RespParseError::InvalidFormat(
                            "Missing \\r\\n after bulk string".to_string(),
                        ));
                    }
                    buf.advance(next);
                    let content = buf.split_to(end - next).freeze();
                    buf.advance(2);
                    return Ok(Ok(Element::Value(RespValue::BulkString(Some(content)))));
                }
            }
            b'*' => {
                let size = Self::parse_int(&buf[1..line_end])?;
                match size {
                    -1 => Element::Value(RespValue::Array(None)),
                    0 => Element::Value(RespValue::Array(Some(Vec::new()))),
                    n if n < 0 => {
                        return Err(RespParseError::InvalidFormat(
                            "Invalid array size".to_string(),
                        ))
                    }
                    n => Element::ArrayStart(n as usize),
                }
            }
            _ => {
                return Err(RespParseError::InvalidFormat(format!(
                    "Unknown RESP type: {}",
                    first as char
                )))
            }
        };
        buf.advance(next);
        Ok(Ok(element))
    }

    fn parse_int(line: &[u8]) -> Result<i64, RespParseError> {
        btoi::btoi::<i64>(line)
            .map_err(|_| RespParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
    }

    /// Find the line starting at `start`, returning where it ends and the
    /// position after its \r\n
    fn find_line(data: &[u8], start: usize) -> Option<(usize, usize)> {
        if start > data.len() {
            return None;
        }
        data[start..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|offset| (start + offset, start + offset + 2))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s);
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s);
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => Self::put_bulk(buf, data),
            RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        }
    }

    /// Encode a command argv as a multi-bulk request
    pub fn encode_argv<T: AsRef<[u8]>>(argv: &[T]) -> Bytes {
        let capacity: usize = argv.iter().map(|a| a.as_ref().len() + 16).sum::<usize>() + 16;
        let mut buf = BytesMut::with_capacity(capacity);
        buf.put_u8(b'*');
        buf.extend_from_slice(argv.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        for arg in argv {
            Self::put_bulk(&mut buf, arg.as_ref());
        }
        buf.freeze()
    }

    fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u8(b'$');
        buf.extend_from_slice(data.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.extend_from_slice(data);
        buf.put_slice(b"\r\n");
    }
}
