//! Utility functions and helpers

use lazy_static::lazy_static;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::error;

lazy_static! {
    static ref LOGGED_ONCE: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// Number of hash slots in a Redis cluster
pub const CLUSTER_SLOTS: u16 = 16384;

/// Log an error message the first time it is seen in this process
pub fn log_error_once(message: &str) {
    let first = match LOGGED_ONCE.lock() {
        Ok(mut logged) => logged.insert(message.to_string()),
        Err(poisoned) => poisoned.into_inner().insert(message.to_string()),
    };
    if first {
        error!("{}", message);
    }
}

/// Terminate on a broken internal invariant.
///
/// Release builds are compiled with `panic = "abort"` and the engine turns a
/// panic inside any of its callbacks into a process abort, so this never
/// unwinds into the caller's event loop.
#[track_caller]
pub fn abort(message: &str) -> ! {
    error!("shareddatalayer abort: {}", message);
    panic!("shareddatalayer abort: {}", message)
}

/// Calculate CRC16 checksum (used for Redis slot calculation)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Calculate the IEEE CRC32 checksum (used to spread namespaces over SDL cluster addresses)
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for byte in data {
        crc ^= *byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Extract hash tag from Redis key for consistent hashing
pub fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// Hash slot owning the given key
pub fn hash_slot(key: &[u8]) -> u16 {
    crc16(extract_hash_tag(key)) % CLUSTER_SLOTS
}

/// Format duration for human-readable output
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.subsec_millis();
    let secs = duration.as_secs();
    if secs == 0 && millis > 0 {
        format!("{}ms", millis)
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
