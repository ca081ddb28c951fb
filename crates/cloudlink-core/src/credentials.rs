//! Persisted credentials and their slot layout.
//!
//! The persistent region is a single 512-byte block. The first 60 bytes hold
//! three fixed 20-byte slots, each a zero-terminated string:
//!
//! | Offset | Length | Content |
//! |---|---|---|
//! | 0–19 | 20 | network name |
//! | 20–39 | 20 | network secret |
//! | 40–59 | 20 | device identifier |
//! | 60–511 | 452 | reserved, always zero |

use std::fmt;

/// Size of the reserved persistent block.
pub const REGION_SIZE: usize = 512;

/// Size of one credential slot, terminator included.
pub const SLOT_LEN: usize = 20;

/// Longest field that fits in a slot.
pub const MAX_FIELD_LEN: usize = SLOT_LEN - 1;

/// Bytes of the region actually used by the three slots.
pub const USED_LEN: usize = SLOT_LEN * 3;

/// One of the three fixed slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    NetworkName,
    NetworkSecret,
    DeviceId,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::NetworkName, Slot::NetworkSecret, Slot::DeviceId];

    /// Byte offset of the slot within the region.
    pub const fn offset(self) -> usize {
        match self {
            Slot::NetworkName => 0,
            Slot::NetworkSecret => SLOT_LEN,
            Slot::DeviceId => SLOT_LEN * 2,
        }
    }
}

/// Network name, network secret and device identifier.
///
/// Components other than the credential store only ever hold copies.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub network_name: String,
    pub network_secret: String,
    pub device_id: String,
}

impl Credentials {
    pub fn new(
        network_name: impl Into<String>,
        network_secret: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            network_name: network_name.into(),
            network_secret: network_secret.into(),
            device_id: device_id.into(),
        }
    }

    /// True when there is a network to join in station mode.
    pub fn has_network(&self) -> bool {
        !self.network_name.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.network_name.is_empty() && self.network_secret.is_empty() && self.device_id.is_empty()
    }

    pub fn field(&self, slot: Slot) -> &str {
        match slot {
            Slot::NetworkName => &self.network_name,
            Slot::NetworkSecret => &self.network_secret,
            Slot::DeviceId => &self.device_id,
        }
    }

    fn field_mut(&mut self, slot: Slot) -> &mut String {
        match slot {
            Slot::NetworkName => &mut self.network_name,
            Slot::NetworkSecret => &mut self.network_secret,
            Slot::DeviceId => &mut self.device_id,
        }
    }

    /// Copy with every field cut to what a slot can hold.
    pub fn truncated(&self) -> Self {
        Self {
            network_name: truncate_field(&self.network_name).to_string(),
            network_secret: truncate_field(&self.network_secret).to_string(),
            device_id: truncate_field(&self.device_id).to_string(),
        }
    }

    /// Write the three slots into the start of `region`.
    ///
    /// Bytes after each terminator are left untouched; callers zero the
    /// region first.
    pub fn encode_into(&self, region: &mut [u8]) {
        for slot in Slot::ALL {
            let value = truncate_field(self.field(slot)).as_bytes();
            let start = slot.offset();
            region[start..start + value.len()].copy_from_slice(value);
            region[start + value.len()] = 0;
        }
    }

    /// Decode the three slots from the first [`USED_LEN`] bytes.
    ///
    /// Each field ends at its first zero byte or at the slot boundary.
    pub fn decode(region: &[u8]) -> Self {
        let mut credentials = Credentials::default();
        for slot in Slot::ALL {
            let start = slot.offset();
            let raw = &region[start..start + SLOT_LEN];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(SLOT_LEN);
            *credentials.field_mut(slot) = String::from_utf8_lossy(&raw[..end]).into_owned();
        }
        credentials
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("network_name", &self.network_name)
            .field(
                "network_secret",
                &if self.network_secret.is_empty() { "" } else { "<redacted>" },
            )
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Longest prefix of `value` that fits in a slot without splitting a character.
pub fn truncate_field(value: &str) -> &str {
    if value.len() <= MAX_FIELD_LEN {
        return value;
    }
    let mut end = MAX_FIELD_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
