use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram numeric user id, used directly as the internal user identifier.
///
/// There is exactly one channel in this system, so there is no value in a
/// separate internal identity layer on top of Telegram's own id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl UserId {
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Session identifier. Negative while the session only exists in the cache
/// and has not yet been assigned a row id by the store; positive once synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub i64);

impl SessionId {
    pub fn get(&self) -> i64 {
        self.0
    }

    pub fn is_temporary(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SessionId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Monotonically-decreasing generator of temporary session ids, reset each
/// process start. Never collides with a real (positive) store id.
#[derive(Debug, Default)]
pub struct TempIdCounter(std::sync::atomic::AtomicI64);

impl TempIdCounter {
    pub fn new() -> Self {
        Self(std::sync::atomic::AtomicI64::new(-1))
    }

    pub fn next(&self) -> SessionId {
        use std::sync::atomic::Ordering;
        SessionId(self.0.fetch_sub(1, Ordering::SeqCst))
    }
}

/// Memory row source: did the user state this directly, or did the model
/// choose to remember it on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    User,
    Ai,
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySource::User => write!(f, "user"),
            MemorySource::Ai => write!(f, "ai"),
        }
    }
}

impl std::str::FromStr for MemorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MemorySource::User),
            "ai" => Ok(MemorySource::Ai),
            other => Err(format!("unknown memory source: {other}")),
        }
    }
}

/// Conversation turn role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_id_counter_is_strictly_decreasing_and_negative() {
        let c = TempIdCounter::new();
        let a = c.next();
        let b = c.next();
        assert!(a.is_temporary());
        assert!(b.is_temporary());
        assert!(b.get() < a.get());
    }

    #[test]
    fn role_roundtrips_through_string() {
        for r in [Role::User, Role::Assistant] {
            let s = r.to_string();
            assert_eq!(s.parse::<Role>().unwrap(), r);
        }
    }
}
