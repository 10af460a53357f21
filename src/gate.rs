//! Confirmation Gate
//!
//! A dangerous command is parked here until the operator confirms it, and confirmation
//! is refused until a fixed delay has passed since the command was armed.
//!
//! ```text
//! Idle --arm--> Pending --confirm (delay elapsed)--> Idle (command released)
//!                  |  \--confirm (too early)--> Pending (TooEarly)
//!                  |--cancel--> Idle
//!                  \--arm--> Pending (previous command superseded)
//! ```
//!
//! Every time-dependent operation has an `_at` variant taking the current instant.

use std::time::{Duration, Instant};

use crate::command::RawCommand;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{ConsoleError, Result};

/// Minimum time between arming and confirming
pub const REQUIRED_DELAY: Duration = Duration::from_secs(3);

/// A dangerous command awaiting confirmation
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    /// Command to run once confirmed
    pub command: RawCommand,

    /// Connection the command was submitted against
    pub descriptor: ConnectionDescriptor,

    created_at: Instant,
    required_delay: Duration,
}

impl PendingConfirmation {
    /// When the command was armed
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Delay that must elapse before confirmation
    #[must_use]
    pub const fn required_delay(&self) -> Duration {
        self.required_delay
    }

    /// Time left before confirmation is allowed, zero once allowed
    #[must_use]
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.required_delay.saturating_sub(now.saturating_duration_since(self.created_at))
    }
}

/// Single-slot, time-gated confirmation state
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    pending: Option<PendingConfirmation>,
}

impl ConfirmationGate {
    /// Gate with nothing pending
    #[must_use]
    pub const fn new() -> Self {
        Self { pending: None }
    }

    /// Park a command; returns the command it superseded, if any
    pub fn arm(
        &mut self,
        command: RawCommand,
        descriptor: ConnectionDescriptor,
    ) -> Option<RawCommand> {
        self.arm_at(command, descriptor, Instant::now())
    }

    /// [`Self::arm`] as of `now`
    pub fn arm_at(
        &mut self,
        command: RawCommand,
        descriptor: ConnectionDescriptor,
        now: Instant,
    ) -> Option<RawCommand> {
        let previous = self.pending.replace(PendingConfirmation {
            command,
            descriptor,
            created_at: now,
            required_delay: REQUIRED_DELAY,
        });
        previous.map(|p| p.command)
    }

    /// True while a command waits
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The waiting command, if any
    #[must_use]
    pub const fn pending(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    /// Whether `confirm` would succeed now
    #[must_use]
    pub fn can_confirm(&self) -> bool {
        self.can_confirm_at(Instant::now())
    }

    /// [`Self::can_confirm`] as of `now`
    #[must_use]
    pub fn can_confirm_at(&self, now: Instant) -> bool {
        self.pending.as_ref().is_some_and(|p| p.remaining_at(now).is_zero())
    }

    /// Release the pending command if its delay has elapsed
    ///
    /// # Errors
    /// - `NoPendingConfirmation` when nothing is armed
    /// - `TooEarly` before the delay elapsed; the command stays pending
    pub fn confirm(&mut self) -> Result<PendingConfirmation> {
        self.confirm_at(Instant::now())
    }

    /// [`Self::confirm`] as of `now`
    pub fn confirm_at(&mut self, now: Instant) -> Result<PendingConfirmation> {
        let pending = self.pending.as_ref().ok_or(ConsoleError::NoPendingConfirmation)?;

        let remaining = pending.remaining_at(now);
        if !remaining.is_zero() {
            // Round up so a caller never sees 0ms alongside a refusal
            let remaining_ms = u64::try_from(remaining.as_micros().div_ceil(1000)).unwrap_or(u64::MAX);
            return Err(ConsoleError::TooEarly { remaining_ms });
        }

        self.pending.take().ok_or(ConsoleError::NoPendingConfirmation)
    }

    /// Discard the pending command, returning it
    pub fn cancel(&mut self) -> Option<RawCommand> {
        self.pending.take().map(|p| p.command)
    }
}
