//! HTTP/2 SETTINGS parameters (RFC 7540 Section 6.5).
//!
//! A [`SettingsMap`] holds only the values that were explicitly set; reads
//! fall back to the protocol default for the identifier. Merging overwrites
//! field by field and never removes an entry.

use std::collections::BTreeMap;

use crate::error::{ErrorCode, H2Error};
use crate::window::MAX_WINDOW_SIZE;

/// Smallest legal SETTINGS_MAX_FRAME_SIZE, also its default.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
/// Largest legal SETTINGS_MAX_FRAME_SIZE (2^24 - 1).
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;

/// The recognized SETTINGS identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum SettingId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl SettingId {
    pub const ALL: [SettingId; 6] = [
        SettingId::HeaderTableSize,
        SettingId::EnablePush,
        SettingId::MaxConcurrentStreams,
        SettingId::InitialWindowSize,
        SettingId::MaxFrameSize,
        SettingId::MaxHeaderListSize,
    ];

    /// Unknown identifiers map to `None` and must be ignored.
    pub fn from_u16(v: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|id| *id as u16 == v)
    }

    /// The value in force when the peer never sent this identifier.
    /// "Unlimited" settings use `u32::MAX`.
    pub fn default_value(self) -> u32 {
        match self {
            Self::HeaderTableSize => 4096,
            Self::EnablePush => 1,
            Self::MaxConcurrentStreams => u32::MAX,
            Self::InitialWindowSize => 65_535,
            Self::MaxFrameSize => DEFAULT_MAX_FRAME_SIZE,
            Self::MaxHeaderListSize => u32::MAX,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsMap {
    values: BTreeMap<SettingId, u32>,
}

impl SettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with every recognized identifier set to its default.
    pub fn defaults() -> Self {
        let values = SettingId::ALL
            .into_iter()
            .map(|id| (id, id.default_value()))
            .collect();
        Self { values }
    }

    /// Build from wire pairs, skipping unknown identifiers.
    pub fn from_pairs(pairs: &[(u16, u32)]) -> Self {
        let mut map = Self::new();
        for (id, value) in pairs {
            if let Some(id) = SettingId::from_u16(*id) {
                map.set(id, *value);
            }
        }
        map
    }

    pub fn with(mut self, id: SettingId, value: u32) -> Self {
        self.set(id, value);
        self
    }

    pub fn set(&mut self, id: SettingId, value: u32) {
        self.values.insert(id, value);
    }

    /// The explicitly set value, if any.
    pub fn explicit(&self, id: SettingId) -> Option<u32> {
        self.values.get(&id).copied()
    }

    /// The effective value: explicit or default.
    pub fn get(&self, id: SettingId) -> u32 {
        self.explicit(id).unwrap_or_else(|| id.default_value())
    }

    /// Field-wise overwrite with the entries of `other`.
    pub fn merge(&mut self, other: &SettingsMap) {
        for (id, value) in &other.values {
            self.values.insert(*id, *value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SettingId, u32)> + '_ {
        self.values.iter().map(|(id, value)| (*id, *value))
    }

    /// The wire pairs for a SETTINGS frame, in identifier order.
    pub fn to_pairs(&self) -> Vec<(u16, u32)> {
        self.iter().map(|(id, value)| (id as u16, value)).collect()
    }

    /// Check every explicit value against the ranges RFC 7540 Section 6.5.2
    /// allows. Nothing is modified.
    pub fn validate(&self) -> Result<(), H2Error> {
        if let Some(v) = self.explicit(SettingId::EnablePush) {
            if v > 1 {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!("SETTINGS_ENABLE_PUSH must be 0 or 1, got {v}"),
                ));
            }
        }
        if let Some(v) = self.explicit(SettingId::InitialWindowSize) {
            if v > MAX_WINDOW_SIZE as u32 {
                return Err(H2Error::connection(
                    ErrorCode::FlowControlError,
                    format!("SETTINGS_INITIAL_WINDOW_SIZE {v} exceeds 2^31-1"),
                ));
            }
        }
        if let Some(v) = self.explicit(SettingId::MaxFrameSize) {
            if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&v) {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!("SETTINGS_MAX_FRAME_SIZE {v} out of range"),
                ));
            }
        }
        Ok(())
    }
}

/// What the peer has told us.
#[derive(Debug, Clone, Default)]
pub struct PeerSettings {
    /// Exactly the entries carried by the most recent non-ACK SETTINGS frame.
    pub current: SettingsMap,
    /// Every entry the peer ever sent, later frames overwriting earlier ones.
    pub effective: SettingsMap,
}

impl PeerSettings {
    /// Record a validated SETTINGS frame.
    pub fn record(&mut self, sent: SettingsMap) {
        self.effective.merge(&sent);
        self.current = sent;
    }
}
