//! Connection configuration.

use std::time::Duration;

use crate::error::H2Error;
use crate::settings::{SettingId, SettingsMap};
use crate::window::{DEFAULT_THRESHOLD_DIVISOR, MAX_WINDOW_SIZE};

/// Knobs for one server connection. `Config::default()` advertises no
/// explicit settings, so the protocol defaults apply on both sides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Settings sent in our initial SETTINGS frame.
    pub settings: SettingsMap,
    /// Replenish threshold is `initial / divisor + 1`.
    pub window_threshold_divisor: i32,
    /// How long a closed stream stays in the table before removal.
    pub closed_stream_grace: Duration,
    /// Frame batches the outbound queue holds before senders wait.
    pub outbound_queue_capacity: usize,
    /// Inbound events buffered per stream before the reader waits.
    pub stream_queue_capacity: usize,
    /// Answer stream-scoped errors with GOAWAY instead of RST_STREAM.
    pub escalate_stream_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings: SettingsMap::new(),
            window_threshold_divisor: DEFAULT_THRESHOLD_DIVISOR,
            closed_stream_grace: Duration::from_secs(1),
            outbound_queue_capacity: 64,
            stream_queue_capacity: 16,
            escalate_stream_errors: true,
        }
    }
}

impl Config {
    pub fn with_setting(mut self, id: SettingId, value: u32) -> Self {
        self.settings.set(id, value);
        self
    }

    pub fn with_window_threshold_divisor(mut self, divisor: i32) -> Self {
        self.window_threshold_divisor = divisor.max(1);
        self
    }

    pub fn with_closed_stream_grace(mut self, grace: Duration) -> Self {
        self.closed_stream_grace = grace;
        self
    }

    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_stream_queue_capacity(mut self, capacity: usize) -> Self {
        self.stream_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_escalate_stream_errors(mut self, escalate: bool) -> Self {
        self.escalate_stream_errors = escalate;
        self
    }

    /// Check the local settings against the ranges the peer will enforce.
    /// A value that fails here is never advertised.
    pub fn validate(&self) -> Result<(), H2Error> {
        self.settings.validate().map_err(|e| {
            H2Error::InvalidConfig(e.reason().map(str::to_owned).unwrap_or_else(|| e.to_string()))
        })
    }

    /// The window we advertise for new streams.
    pub(crate) fn local_initial_window(&self) -> i32 {
        i32::try_from(self.settings.get(SettingId::InitialWindowSize)).unwrap_or(MAX_WINDOW_SIZE)
    }

    /// Largest frame we accept from the peer.
    pub(crate) fn local_max_frame_size(&self) -> u32 {
        self.settings.get(SettingId::MaxFrameSize)
    }
}
