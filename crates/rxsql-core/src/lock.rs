//! Lock modes and lock options for entity loads.

use serde::{Deserialize, Serialize};

/// How a loaded row should be locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockMode {
    /// No lock; the identity map may satisfy the load.
    #[default]
    None,
    /// Read lock; the row is read from the store but not locked.
    Read,
    /// Version check at flush time.
    Optimistic,
    /// Shared row lock (`FOR SHARE`).
    PessimisticRead,
    /// Exclusive row lock (`FOR UPDATE`).
    PessimisticWrite,
    /// Exclusive row lock plus version increment.
    PessimisticForceIncrement,
}

impl LockMode {
    /// Whether this mode takes a row lock in the store.
    pub const fn is_pessimistic(self) -> bool {
        matches!(
            self,
            LockMode::PessimisticRead
                | LockMode::PessimisticWrite
                | LockMode::PessimisticForceIncrement
        )
    }

    /// Whether a load in this mode must bypass the identity map.
    pub const fn requires_store(self) -> bool {
        !matches!(self, LockMode::None)
    }
}

/// Lock options attached to a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockOptions {
    /// Lock mode to acquire.
    pub mode: LockMode,
    /// Lock wait timeout in milliseconds. `Some(0)` means do not wait.
    pub timeout_ms: Option<u64>,
    /// Skip rows that are already locked.
    pub skip_locked: bool,
}

impl LockOptions {
    /// Create options for the given mode.
    #[must_use]
    pub fn new(mode: LockMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Set the lock wait timeout (builder pattern).
    #[must_use]
    pub fn timeout_ms(mut self, millis: u64) -> Self {
        self.timeout_ms = Some(millis);
        self
    }

    /// Fail immediately if the row is locked (builder pattern).
    #[must_use]
    pub fn nowait(mut self) -> Self {
        self.timeout_ms = Some(0);
        self
    }

    /// Set the `skip_locked` option (builder pattern).
    #[must_use]
    pub fn skip_locked(mut self, value: bool) -> Self {
        self.skip_locked = value;
        self
    }

    /// SQL suffix appended to a by-id `SELECT`, if the mode locks rows.
    pub fn lock_clause(&self) -> Option<String> {
        let mut clause = match self.mode {
            LockMode::PessimisticRead => "FOR SHARE".to_string(),
            LockMode::PessimisticWrite | LockMode::PessimisticForceIncrement => {
                "FOR UPDATE".to_string()
            }
            _ => return None,
        };
        if self.skip_locked {
            clause.push_str(" SKIP LOCKED");
        } else if self.timeout_ms == Some(0) {
            clause.push_str(" NOWAIT");
        }
        Some(clause)
    }
}

impl From<LockMode> for LockOptions {
    fn from(mode: LockMode) -> Self {
        Self::new(mode)
    }
}
