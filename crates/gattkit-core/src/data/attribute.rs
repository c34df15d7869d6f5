//! Attribute addressing and payload helpers
//!
//! A [`ServiceCharacteristic`] names exactly one remote attribute. Catalogs of
//! well-known attributes live outside this crate; transactions only hold a copy
//! of the identifier they were asked to operate on.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declared type of an attribute's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GattValueType {
    /// UTF-8 text
    String,
    /// Little-endian unsigned integer
    Integer,
    /// Single byte
    Byte,
    /// Opaque bytes
    #[default]
    Bytes,
}

/// Immutable (service, characteristic) pair plus display metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceCharacteristic {
    /// Service the characteristic belongs to
    pub service: Uuid,
    /// The characteristic itself
    pub characteristic: Uuid,
    /// Human-readable name for logs
    pub display_name: String,
    /// Declared value type
    pub value_type: GattValueType,
}

impl ServiceCharacteristic {
    /// Create a new attribute identifier
    pub fn new(
        service: Uuid,
        characteristic: Uuid,
        display_name: impl Into<String>,
        value_type: GattValueType,
    ) -> Self {
        Self {
            service,
            characteristic,
            display_name: display_name.into(),
            value_type,
        }
    }

    /// Create an identifier from the 16-bit assigned numbers of the base UUID
    pub fn from_short(
        service: u16,
        characteristic: u16,
        display_name: impl Into<String>,
        value_type: GattValueType,
    ) -> Self {
        Self::new(
            short_uuid(service),
            short_uuid(characteristic),
            display_name,
            value_type,
        )
    }
}

impl fmt::Display for ServiceCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.characteristic)
    }
}

/// Expand a 16-bit assigned number onto the Bluetooth base UUID
pub fn short_uuid(short: u16) -> Uuid {
    Uuid::from_fields(
        u32::from(short),
        0x0000,
        0x1000,
        &[0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb],
    )
}

/// A settled read result paired with the attribute's declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattValue {
    value_type: GattValueType,
    data: Option<Vec<u8>>,
}

impl GattValue {
    /// Wrap a payload for the given attribute
    pub fn new(attribute: &ServiceCharacteristic, data: Option<Vec<u8>>) -> Self {
        Self {
            value_type: attribute.value_type,
            data,
        }
    }

    /// Raw bytes, if any were read
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Declared type of the value
    pub fn value_type(&self) -> GattValueType {
        self.value_type
    }

    /// Whether a payload is present
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Payload decoded as UTF-8 text (lossy)
    pub fn as_string(&self) -> Option<String> {
        self.data
            .as_ref()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string())
    }

    /// Payload decoded as a little-endian unsigned integer of up to 8 bytes
    pub fn as_integer(&self) -> Option<u64> {
        let bytes = self.data.as_ref()?;
        if bytes.is_empty() || bytes.len() > 8 {
            return None;
        }
        Some(
            bytes
                .iter()
                .rev()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
        )
    }

    /// First byte of the payload
    pub fn as_byte(&self) -> Option<u8> {
        self.data.as_ref().and_then(|bytes| bytes.first().copied())
    }
}

impl fmt::Display for GattValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type {
            GattValueType::String => match self.as_string() {
                Some(s) => f.write_str(&s),
                None => f.write_str("<empty>"),
            },
            GattValueType::Integer => match self.as_integer() {
                Some(v) => write!(f, "{}", v),
                None => f.write_str("<empty>"),
            },
            GattValueType::Byte => match self.as_byte() {
                Some(v) => write!(f, "0x{:02x}", v),
                None => f.write_str("<empty>"),
            },
            GattValueType::Bytes => match &self.data {
                Some(bytes) => write!(f, "{:02x?}", bytes),
                None => f.write_str("<empty>"),
            },
        }
    }
}
