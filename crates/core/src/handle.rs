use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default length of a generated handle.
pub const DEFAULT_HANDLE_LENGTH: usize = 16;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque identifier of one submitted task: either a caller-chosen name or a
/// generated string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for TaskHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TaskHandle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Generates fixed-length handles: a base-36 millisecond timestamp followed by
/// base-36 random padding taken from a v4 UUID.
///
/// Handles generated in later milliseconds sort after earlier ones. Collisions
/// are unlikely but possible; the scheduler rejects them as duplicates.
#[derive(Debug, Clone)]
pub struct HandleGenerator {
    length: usize,
}

impl HandleGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn generate(&self) -> TaskHandle {
        self.generate_at(Utc::now())
    }

    pub fn generate_at(&self, now: DateTime<Utc>) -> TaskHandle {
        let millis = now.timestamp_millis().max(0) as u128;
        let mut handle = to_base36(millis);
        handle.truncate(self.length);

        let padding_len = self.length - handle.len();
        let random = format!(
            "{:0>width$}",
            to_base36(Uuid::new_v4().as_u128()),
            width = padding_len
        );
        handle.push_str(&random[random.len() - padding_len..]);
        TaskHandle(handle)
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_HANDLE_LENGTH)
    }
}

fn to_base36(mut n: u128) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    digits.iter().rev().collect()
}
