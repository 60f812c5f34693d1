/* Copyright © 2018 Gianmarco Garrisi

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>. */

//! Error types shared by the whole simulation kernel.

use thiserror::Error;

/// Errors raised by the simulation kernel.
///
/// `InvalidArgument` and `IllegalState` indicate modeling bugs and are never
/// recovered inside the kernel: they bubble out of [`Simulation::run`] and
/// abort the replication. `ProcessTerminated` is the resumption error
/// delivered into a process that is being terminated; it travels up the
/// process routine through `?` and is absorbed by the executive. User code
/// must let it propagate.
///
/// [`Simulation::run`]: crate::Simulation::run
#[derive(Debug, Error)]
pub enum SimError {
    /// A caller passed a value the operation cannot accept, e.g. a negative
    /// or non-finite delay, or a zero seize amount.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted from a state that does not permit it,
    /// e.g. clearing a blockage that was never started, or completing a
    /// process that still owns an active blockage.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Delivered into a suspended process when it is terminated. Internal
    /// to the kernel; do not catch.
    #[error("process terminated")]
    ProcessTerminated,
}

/// Result alias used across the crate.
pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    pub(crate) fn invalid(msg: impl Into<String>) -> SimError {
        SimError::InvalidArgument(msg.into())
    }

    pub(crate) fn illegal(msg: impl Into<String>) -> SimError {
        SimError::IllegalState(msg.into())
    }

    /// True for the termination error, which the executive absorbs rather
    /// than surfacing.
    pub fn is_termination(&self) -> bool {
        matches!(self, SimError::ProcessTerminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_diagnostic() {
        let e = SimError::illegal("entity 3: Active -> Created");
        assert_eq!(e.to_string(), "illegal state: entity 3: Active -> Created");
        let e = SimError::invalid("delay must be finite, got inf");
        assert!(e.to_string().starts_with("invalid argument"));
    }

    #[test]
    fn termination_is_flagged() {
        assert!(SimError::ProcessTerminated.is_termination());
        assert!(!SimError::invalid("x").is_termination());
    }
}
