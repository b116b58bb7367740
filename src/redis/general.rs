//! Error translation and capability probing shared by both dispatchers

use super::reply::Reply;
use super::system::ContextError;
use crate::error::DispatcherError;
use crate::utils::log_error_once;
use std::collections::BTreeSet;
use std::io;

/// Redis module commands the backend must provide
pub const REQUIRED_MODULE_COMMANDS: [&str; 7] = [
    "msetpub", "setie", "setiepub", "setnxpub", "delpub", "delie", "deliepub",
];

const LOADING_TEXT: &[u8] = b"LOADING Redis is loading the dataset in memory";

/// Translate a connection-level failure
pub fn map_context_error(error: &ContextError) -> DispatcherError {
    match error {
        ContextError::Io { kind, message } => {
            if *kind == io::ErrorKind::ConnectionReset {
                DispatcherError::ConnectionLost
            } else {
                log_error_once(&format!("redis I/O error: {:?} {}", kind, message));
                DispatcherError::IoError
            }
        }
        ContextError::Eof => DispatcherError::ConnectionLost,
        ContextError::Protocol(_) => DispatcherError::ProtocolError,
        ContextError::OutOfMemory => DispatcherError::OutOfMemory,
        ContextError::ClusterNotConnected => DispatcherError::NotConnected,
        ContextError::ClusterConnectionLost => DispatcherError::ConnectionLost,
        ContextError::Other(message) => {
            log_error_once(&format!("redis context error: {}", message));
            DispatcherError::UnknownError
        }
    }
}

/// Translate the text of an error reply
pub fn map_reply_error(text: &[u8]) -> DispatcherError {
    if text == LOADING_TEXT {
        DispatcherError::DatasetLoading
    } else if text.starts_with(b"CLUSTERDOWN") {
        DispatcherError::NotConnected
    } else if text.starts_with(b"ERR Protocol error") {
        DispatcherError::ProtocolError
    } else if text.starts_with(b"READONLY") {
        DispatcherError::WritingToSlave
    } else {
        log_error_once(&format!(
            "redis reply error: {}",
            String::from_utf8_lossy(text)
        ));
        DispatcherError::UnknownError
    }
}

/// Lowercased command names from a `COMMAND` reply
pub fn parse_command_list_reply(reply: &Reply) -> BTreeSet<String> {
    reply
        .as_array()
        .iter()
        .filter_map(|entry| entry.as_array().first())
        .filter(|name| !name.as_bytes().is_empty())
        .map(|name| name.as_str_lossy().to_lowercase())
        .collect()
}

/// Required module commands absent from `commands`
pub fn missing_module_commands(commands: &BTreeSet<String>) -> Vec<&'static str> {
    REQUIRED_MODULE_COMMANDS
        .iter()
        .copied()
        .filter(|required| !commands.contains(*required))
        .collect()
}

/// Abort message for a backend lacking module commands
pub fn missing_commands_message(missing: &[&str]) -> String {
    format!(
        "SDL Redis modules are not loaded, missing commands: {}",
        missing.join(", ")
    )
}

/// Render a host list in Redis Cluster seed syntax (`h1:p1,h2:p2`)
pub fn format_to_cluster_syntax<T: std::fmt::Display>(hosts: &[T]) -> String {
    hosts
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
pub(crate) fn command_list_reply(names: &[&str]) -> Reply {
    use bytes::Bytes;
    use std::sync::Arc;

    Reply::Array(
        names
            .iter()
            .map(|name| {
                Arc::new(Reply::Array(vec![
                    Arc::new(Reply::String(Bytes::copy_from_slice(name.as_bytes()))),
                    Arc::new(Reply::Integer(-1)),
                ]))
            })
            .collect(),
    )
}
