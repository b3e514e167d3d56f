//! Terminal shutdown state shared by backends that own external resources.
//!
//! A backend starts [`State::Active`]. Shutdown moves it to
//! [`State::Closing`] while resources are released and then to
//! [`State::Closed`]. Both later states reject every public operation with
//! the backend's lifecycle error; there is no way back to `Active`.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Active,
    Closing,
    Closed,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Active,
            1 => State::Closing,
            _ => State::Closed,
        }
    }
}

/// Which lifecycle error a guard reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Relational backends: `Error::Destroyed`.
    Destroy,
    /// Key-value backends: `Error::Disconnected`.
    Disconnect,
}

/// Atomic lifecycle guard checked at the start of every public operation.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    kind: ShutdownKind,
}

impl Lifecycle {
    pub fn new(kind: ShutdownKind) -> Self {
        Lifecycle {
            state: AtomicU8::new(State::Active as u8),
            kind,
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == State::Active
    }

    /// Fail with the lifecycle error unless the backend is active.
    ///
    /// # Errors
    /// Returns `Error::Destroyed` or `Error::Disconnected` after shutdown began
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    /// Move from `Active` to `Closing`. Only one caller can win.
    ///
    /// # Errors
    /// Returns the lifecycle error if shutdown already began
    pub fn begin_shutdown(&self) -> Result<()> {
        self.state
            .compare_exchange(
                State::Active as u8,
                State::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|_| self.error())
    }

    /// Mark shutdown complete.
    pub fn finish_shutdown(&self) {
        self.state.store(State::Closed as u8, Ordering::Release);
    }

    fn error(&self) -> Error {
        match self.kind {
            ShutdownKind::Destroy => Error::Destroyed,
            ShutdownKind::Disconnect => Error::Disconnected,
        }
    }
}
