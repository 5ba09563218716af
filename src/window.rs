//! Flow-control window accounting (RFC 7540 Section 6.9).
//!
//! A [`Window`] tracks two budgets. The *local* side is what we advertised to
//! the peer and the peer spends by sending DATA; the *peer* side is what the
//! peer advertised to us and we spend by sending DATA. All operations are
//! plain arithmetic with explicit overflow checks and never block; callers
//! that share a window across tasks put it behind a lock.

use thiserror::Error;

/// Largest legal window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i32 = i32::MAX;

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65_535;

/// Default divisor for the replenish threshold (`initial / 2 + 1`).
pub const DEFAULT_THRESHOLD_DIVISOR: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window overflow: {current} + {increment} exceeds 2^31-1")]
    Overflow { current: i32, increment: i64 },
    #[error("peer sent {consumed} bytes with only {available} advertised")]
    Exhausted { available: i32, consumed: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    initial: i32,
    current: i32,
    threshold: i32,
    peer_initial: i32,
    peer_current: i32,
    peer_threshold: i32,
    divisor: i32,
}

impl Default for Window {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

fn threshold_of(initial: i32, divisor: i32) -> i32 {
    initial / divisor.max(1) + 1
}

impl Window {
    pub fn new(initial: i32, peer_initial: i32) -> Self {
        Self::with_divisor(initial, peer_initial, DEFAULT_THRESHOLD_DIVISOR)
    }

    /// Build a window whose replenish threshold is `initial / divisor + 1`.
    pub fn with_divisor(initial: i32, peer_initial: i32, divisor: i32) -> Self {
        Self {
            initial,
            current: initial,
            threshold: threshold_of(initial, divisor),
            peer_initial,
            peer_current: peer_initial,
            peer_threshold: threshold_of(peer_initial, divisor),
            divisor,
        }
    }

    pub fn initial(&self) -> i32 {
        self.initial
    }

    pub fn current(&self) -> i32 {
        self.current
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn peer_initial(&self) -> i32 {
        self.peer_initial
    }

    pub fn peer_current(&self) -> i32 {
        self.peer_current
    }

    pub fn peer_threshold(&self) -> i32 {
        self.peer_threshold
    }

    /// Account for `n` bytes received from the peer.
    ///
    /// Returns the WINDOW_UPDATE increment that brings the window back to
    /// `initial` once it has dropped below the threshold, or 0 when no update
    /// is due. The caller sends the update and then applies it with
    /// [`Window::apply_local_increment`].
    pub fn consume_local(&mut self, n: u32) -> Result<u32, WindowError> {
        let next = i64::from(self.current) - i64::from(n);
        if next < 0 {
            let available = self.current;
            self.current = next.max(i64::from(i32::MIN)) as i32;
            return Err(WindowError::Exhausted {
                available,
                consumed: n,
            });
        }
        self.current = next as i32;
        if self.current < self.threshold {
            Ok((self.initial - self.current) as u32)
        } else {
            Ok(0)
        }
    }

    /// Apply a WINDOW_UPDATE we sent to the peer.
    pub fn apply_local_increment(&mut self, n: u32) -> Result<(), WindowError> {
        self.current = checked_add(self.current, n)?;
        Ok(())
    }

    /// Apply a WINDOW_UPDATE received from the peer.
    pub fn apply_peer_increment(&mut self, n: u32) -> Result<(), WindowError> {
        self.peer_current = checked_add(self.peer_current, n)?;
        Ok(())
    }

    /// How much of `want` the peer currently has room for.
    pub fn consumable_peer_budget(&self, want: u32) -> u32 {
        let room = self.peer_current.max(0) as u32;
        want.min(room)
    }

    /// Account for `n` bytes sent to the peer.
    pub fn consume_peer(&mut self, n: u32) {
        debug_assert!(n <= self.consumable_peer_budget(n), "sent past peer window");
        self.peer_current = (i64::from(self.peer_current) - i64::from(n))
            .max(i64::from(i32::MIN)) as i32;
    }

    /// Rebase the peer side onto a renegotiated SETTINGS_INITIAL_WINDOW_SIZE,
    /// keeping the bytes already in flight.
    pub fn rebase_initial(&mut self, new_initial: u32) -> Result<(), WindowError> {
        if new_initial > MAX_WINDOW_SIZE as u32 {
            return Err(WindowError::Overflow {
                current: self.peer_initial,
                increment: i64::from(new_initial) - i64::from(self.peer_initial),
            });
        }
        let in_flight = i64::from(self.peer_initial) - i64::from(self.peer_current);
        let next = i64::from(new_initial) - in_flight;
        if next > i64::from(MAX_WINDOW_SIZE) {
            return Err(WindowError::Overflow {
                current: self.peer_current,
                increment: next - i64::from(self.peer_current),
            });
        }
        self.peer_initial = new_initial as i32;
        self.peer_current = next.max(i64::from(i32::MIN)) as i32;
        self.peer_threshold = threshold_of(self.peer_initial, self.divisor);
        Ok(())
    }

    /// Move the local side to a new initial size once the peer has
    /// acknowledged it. Bytes the peer already sent stay counted, so the
    /// window can go negative when the size shrinks.
    pub fn rebase_local(&mut self, new_initial: i32) {
        let new_initial = new_initial.clamp(0, MAX_WINDOW_SIZE);
        let received = i64::from(self.initial) - i64::from(self.current);
        self.current = (i64::from(new_initial) - received)
            .clamp(i64::from(i32::MIN), i64::from(MAX_WINDOW_SIZE)) as i32;
        self.initial = new_initial;
        self.threshold = threshold_of(new_initial, self.divisor);
    }
}

fn checked_add(current: i32, n: u32) -> Result<i32, WindowError> {
    let next = i64::from(current) + i64::from(n);
    if next > i64::from(MAX_WINDOW_SIZE) {
        return Err(WindowError::Overflow {
            current,
            increment: i64::from(n),
        });
    }
    Ok(next as i32)
}
