//! Fault injection for remote storage operations.
//!
//! Each remote operation checks its injector at one fault point before doing
//! any I/O. Production code uses [`NoFaults`]; tests arm an [`ArmedFaults`]
//! to force a failure from a chosen call site.

use std::collections::HashSet;
use std::fmt;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Call sites where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `put`
    Receive,
    Enumerate,
    Stat,
    Get,
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultPoint::Receive => write!(f, "remote_receive"),
            FaultPoint::Enumerate => write!(f, "remote_enumerate"),
            FaultPoint::Stat => write!(f, "remote_stat"),
            FaultPoint::Get => write!(f, "remote_get"),
        }
    }
}

/// Strategy consulted at every fault point.
pub trait FaultInjector: Send + Sync {
    /// Return an error to abort the operation at `point`.
    fn check(&self, point: FaultPoint) -> Result<()>;
}

/// Injector that never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn check(&self, _point: FaultPoint) -> Result<()> {
        Ok(())
    }
}

/// Injector that fails every call at the armed points.
#[derive(Debug, Default)]
pub struct ArmedFaults {
    armed: Mutex<HashSet<FaultPoint>>,
}

impl ArmedFaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, point: FaultPoint) {
        self.armed.lock().insert(point);
    }

    pub fn disarm(&self, point: FaultPoint) {
        self.armed.lock().remove(&point);
    }

    pub fn is_armed(&self, point: FaultPoint) -> bool {
        self.armed.lock().contains(&point)
    }
}

impl FaultInjector for ArmedFaults {
    fn check(&self, point: FaultPoint) -> Result<()> {
        if self.is_armed(point) {
            return Err(Error::Injected(point));
        }
        Ok(())
    }
}
