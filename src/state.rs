//! Stream states (RFC 7540 Section 5.1).
//!
//! ```text
//!                          +--------+
//!                  send PP |        | recv PP
//!                 ,--------|  idle  |--------.
//!                /         |        |         \
//!               v          +--------+          v
//!        +----------+          |           +----------+
//!        |          |          | send H /  |          |
//! ,------| reserved |          | recv H    | reserved |------.
//! |      | (local)  |          |           | (remote) |      |
//! |      +----------+          v           +----------+      |
//! |          |             +--------+             |          |
//! |          |     recv ES |        | send ES     |          |
//! |   send H |     ,-------|  open  |-------.     | recv H   |
//! |          |    /        |        |        \    |          |
//! |          v   v         +--------+         v   v          |
//! |      +----------+          |           +----------+      |
//! |      |   half   |          |           |   half   |      |
//! |      |  closed  |          | send R /  |  closed  |      |
//! |      | (remote) |          | recv R    | (local)  |      |
//! |      +----------+          |           +----------+      |
//! |           |                |                 |           |
//! |           | send ES /      |       recv ES / |           |
//! |           | send R /       v        send R / |           |
//! |           | recv R     +--------+   recv R   |           |
//! | send R /  `----------->|        |<-----------'  send R / |
//! | recv R                 | closed |               recv R   |
//! `----------------------->|        |<----------------------'
//!                          +--------+
//! ```
//!
//! The machine is the literal rule list [`TRANSITIONS`], scanned first match
//! wins. A combination no rule matches is a PROTOCOL_ERROR.

use std::fmt;

use crate::error::ErrorCode;
use crate::h2_codec::{flags, FrameType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    pub const ALL: [StreamState; 7] = [
        StreamState::Idle,
        StreamState::ReservedLocal,
        StreamState::ReservedRemote,
        StreamState::Open,
        StreamState::HalfClosedLocal,
        StreamState::HalfClosedRemote,
        StreamState::Closed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::ReservedLocal => "RESERVED_LOCAL",
            Self::ReservedRemote => "RESERVED_REMOTE",
            Self::Open => "OPEN",
            Self::HalfClosedLocal => "HALF_CLOSED_LOCAL",
            Self::HalfClosedRemote => "HALF_CLOSED_REMOTE",
            Self::Closed => "CLOSED",
        }
    }

    /// Whether the peer may still send DATA in this state.
    pub fn can_recv_data(self) -> bool {
        matches!(self, Self::Open | Self::HalfClosedLocal)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which endpoint emitted the frame being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Recv,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Send => "SEND",
            Self::Recv => "RECV",
        })
    }
}

/// A frame the table rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid {frame_type} frame ({direction}) in {state} state")]
pub struct TransitionError {
    pub state: StreamState,
    pub frame_type: FrameType,
    pub direction: Direction,
    pub code: ErrorCode,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Types(&'static [FrameType]),
    /// DATA or HEADERS carrying END_STREAM.
    EndStream,
    Any,
}

#[derive(Debug, Clone, Copy)]
enum Dir {
    Send,
    Recv,
    Either,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    To(StreamState),
    Stay,
    /// IDLE + HEADERS: OPEN, then half-closed on our side (SEND) or theirs
    /// (RECV) when END_STREAM is set.
    Open,
    /// IDLE + PUSH_PROMISE: RESERVED_LOCAL (SEND) or RESERVED_REMOTE (RECV).
    Reserve,
    /// OPEN + END_STREAM: HALF_CLOSED_LOCAL (SEND) or HALF_CLOSED_REMOTE (RECV).
    HalfClose,
    Reject(ErrorCode),
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    from: StreamState,
    on: Trigger,
    dir: Dir,
    outcome: Outcome,
}

const fn rule(from: StreamState, on: Trigger, dir: Dir, outcome: Outcome) -> Rule {
    Rule {
        from,
        on,
        dir,
        outcome,
    }
}

use FrameType as F;
use StreamState as S;

const HEADERS: &[FrameType] = &[F::Headers];
const PUSH_PROMISE: &[FrameType] = &[F::PushPromise];
const PRIORITY: &[FrameType] = &[F::Priority];
const RST_STREAM: &[FrameType] = &[F::RstStream];
const WINDOW_UPDATE_OR_PRIORITY: &[FrameType] = &[F::WindowUpdate, F::Priority];
const TOLERATED_AFTER_CLOSE: &[FrameType] = &[F::WindowUpdate, F::Priority, F::RstStream];

/// Frames that belong to the connection and never move a stream.
const CONNECTION_SCOPED: &[FrameType] = &[F::Settings, F::GoAway];

const TRANSITIONS: &[Rule] = &[
    rule(S::Idle, Trigger::Types(HEADERS), Dir::Either, Outcome::Open),
    rule(S::Idle, Trigger::Types(PUSH_PROMISE), Dir::Either, Outcome::Reserve),
    rule(S::Idle, Trigger::Types(PRIORITY), Dir::Either, Outcome::Stay),
    rule(S::ReservedLocal, Trigger::Types(HEADERS), Dir::Send, Outcome::To(S::HalfClosedRemote)),
    rule(S::ReservedLocal, Trigger::Types(RST_STREAM), Dir::Either, Outcome::To(S::Closed)),
    rule(S::ReservedRemote, Trigger::Types(HEADERS), Dir::Recv, Outcome::To(S::HalfClosedLocal)),
    rule(S::ReservedRemote, Trigger::Types(RST_STREAM), Dir::Either, Outcome::To(S::Closed)),
    rule(S::Open, Trigger::EndStream, Dir::Either, Outcome::HalfClose),
    rule(S::Open, Trigger::Types(RST_STREAM), Dir::Either, Outcome::To(S::Closed)),
    rule(S::Open, Trigger::Any, Dir::Either, Outcome::Stay),
    rule(S::HalfClosedLocal, Trigger::Types(WINDOW_UPDATE_OR_PRIORITY), Dir::Send, Outcome::Stay),
    rule(S::HalfClosedLocal, Trigger::Types(RST_STREAM), Dir::Either, Outcome::To(S::Closed)),
    rule(S::HalfClosedLocal, Trigger::EndStream, Dir::Recv, Outcome::To(S::Closed)),
    rule(S::HalfClosedLocal, Trigger::Any, Dir::Recv, Outcome::Stay),
    rule(S::HalfClosedRemote, Trigger::Types(WINDOW_UPDATE_OR_PRIORITY), Dir::Recv, Outcome::Stay),
    rule(S::HalfClosedRemote, Trigger::Types(RST_STREAM), Dir::Either, Outcome::To(S::Closed)),
    rule(S::HalfClosedRemote, Trigger::Any, Dir::Recv, Outcome::Reject(ErrorCode::StreamClosed)),
    rule(S::HalfClosedRemote, Trigger::EndStream, Dir::Send, Outcome::To(S::Closed)),
    rule(S::HalfClosedRemote, Trigger::Any, Dir::Send, Outcome::Stay),
    rule(S::Closed, Trigger::Types(PRIORITY), Dir::Send, Outcome::Stay),
    rule(S::Closed, Trigger::Types(TOLERATED_AFTER_CLOSE), Dir::Recv, Outcome::Stay),
    rule(S::Closed, Trigger::Any, Dir::Recv, Outcome::Reject(ErrorCode::StreamClosed)),
];

/// END_STREAM is the 0x1 flag on DATA or HEADERS; elsewhere that bit is ACK
/// or undefined.
pub fn ends_stream(frame_type: FrameType, frame_flags: u8) -> bool {
    matches!(frame_type, F::Data | F::Headers) && frame_flags & flags::END_STREAM != 0
}

impl Rule {
    fn matches(&self, state: StreamState, frame_type: FrameType, end_stream: bool, direction: Direction) -> bool {
        if self.from != state {
            return false;
        }
        let dir_ok = match self.dir {
            Dir::Either => true,
            Dir::Send => direction == Direction::Send,
            Dir::Recv => direction == Direction::Recv,
        };
        dir_ok
            && match self.on {
                Trigger::Types(types) => types.contains(&frame_type),
                Trigger::EndStream => end_stream,
                Trigger::Any => true,
            }
    }
}

/// Apply one frame to `state`, returning the state after it.
pub fn transition(
    state: StreamState,
    frame_type: FrameType,
    frame_flags: u8,
    direction: Direction,
) -> Result<StreamState, TransitionError> {
    if CONNECTION_SCOPED.contains(&frame_type) {
        return Ok(state);
    }

    let end_stream = ends_stream(frame_type, frame_flags);
    let reject = |code| TransitionError {
        state,
        frame_type,
        direction,
        code,
    };

    let rule = TRANSITIONS
        .iter()
        .find(|r| r.matches(state, frame_type, end_stream, direction))
        .ok_or_else(|| reject(ErrorCode::ProtocolError))?;

    let next = match rule.outcome {
        Outcome::To(next) => next,
        Outcome::Stay => state,
        Outcome::Open if end_stream => match direction {
            Direction::Send => S::HalfClosedLocal,
            Direction::Recv => S::HalfClosedRemote,
        },
        Outcome::Open => S::Open,
        Outcome::Reserve => match direction {
            Direction::Send => S::ReservedLocal,
            Direction::Recv => S::ReservedRemote,
        },
        Outcome::HalfClose => match direction {
            Direction::Send => S::HalfClosedLocal,
            Direction::Recv => S::HalfClosedRemote,
        },
        Outcome::Reject(code) => return Err(reject(code)),
    };
    Ok(next)
}
