//! Identifier and timestamp generation, kept apart from the pure fusion logic
//! so that outputs can be compared byte-for-byte in tests.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait IdentityProvider: Send + Sync {
    fn next_id(&self) -> String;
    fn now(&self) -> DateTime<Utc>;
}

impl<T: IdentityProvider + ?Sized> IdentityProvider for &T {
    fn next_id(&self) -> String {
        (**self).next_id()
    }

    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Random v4 UUIDs and wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Counter-based ids (`{prefix}-000001`, ...) and a frozen clock.
#[derive(Debug)]
pub struct SequentialIdentity {
    prefix: String,
    counter: AtomicU64,
    at: DateTime<Utc>,
}

impl SequentialIdentity {
    pub fn new(prefix: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
            at,
        }
    }

    /// Starts at the Unix epoch.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::new(prefix, DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl IdentityProvider for SequentialIdentity {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n:06}", self.prefix)
    }

    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}
