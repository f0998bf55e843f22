//! Snapshot format-version byte.
//!
//! The first byte of every snapshot header selects the layout. Two legacy
//! constants exist; everything else must have the extended bit set, with the
//! low bits acting as independent feature flags. The layout questions the
//! parser asks are answered once, up front, by [`Capabilities`].

use bitflags::bitflags;
use serde::Serialize;

/// Format 1.0: no class loader info, no metaspace, no reference tree.
pub const FILE_FORMAT_1_0: u8 = 0x31;
/// Format 1.1: class loader info, metaspace, reference tree.
pub const FILE_FORMAT_1_1: u8 = 0x3d;

bitflags! {
    /// Raw bits of an extended format byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExtendedFlags: u8 {
        const EXTENDED = 0b1000_0000;
        const REFERENCE_TREE = 0b0000_0001;
        const SAFEPOINT_TIME = 0b0000_0010;
    }
}

bitflags! {
    /// What a given snapshot layout carries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct Capabilities: u8 {
        const LOADER_INFO = 1 << 0;
        const METASPACE = 1 << 1;
        const REFERENCE_DATA = 1 << 2;
        const SAFEPOINT_TIME = 1 << 3;
    }
}

/// A validated format byte together with its capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FormatVersion {
    raw: u8,
    capabilities: Capabilities,
}

impl FormatVersion {
    /// Validates a format byte; `None` for anything the agent never writes.
    pub fn from_byte(raw: u8) -> Option<Self> {
        let capabilities = match raw {
            FILE_FORMAT_1_0 => Capabilities::empty(),
            FILE_FORMAT_1_1 => {
                Capabilities::LOADER_INFO | Capabilities::METASPACE | Capabilities::REFERENCE_DATA
            }
            _ => {
                let flags = ExtendedFlags::from_bits_retain(raw);
                if !flags.contains(ExtendedFlags::EXTENDED) {
                    return None;
                }
                let mut caps = Capabilities::LOADER_INFO | Capabilities::METASPACE;
                caps.set(
                    Capabilities::REFERENCE_DATA,
                    flags.contains(ExtendedFlags::REFERENCE_TREE),
                );
                caps.set(
                    Capabilities::SAFEPOINT_TIME,
                    flags.contains(ExtendedFlags::SAFEPOINT_TIME),
                );
                caps
            }
        };
        Some(Self { raw, capabilities })
    }

    pub fn raw(self) -> u8 {
        self.raw
    }

    pub fn capabilities(self) -> Capabilities {
        self.capabilities
    }

    pub fn is_extended(self) -> bool {
        ExtendedFlags::from_bits_retain(self.raw).contains(ExtendedFlags::EXTENDED)
    }

    pub fn has_loader_info(self) -> bool {
        self.capabilities.contains(Capabilities::LOADER_INFO)
    }

    pub fn has_metaspace(self) -> bool {
        self.capabilities.contains(Capabilities::METASPACE)
    }

    pub fn has_reference_data(self) -> bool {
        self.capabilities.contains(Capabilities::REFERENCE_DATA)
    }

    pub fn has_safepoint_time(self) -> bool {
        self.capabilities.contains(Capabilities::SAFEPOINT_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_formats() {
        let v10 = FormatVersion::from_byte(FILE_FORMAT_1_0).unwrap();
        assert!(!v10.has_loader_info());
        assert!(!v10.has_metaspace());
        assert!(!v10.has_reference_data());
        assert!(!v10.is_extended());

        let v11 = FormatVersion::from_byte(FILE_FORMAT_1_1).unwrap();
        assert!(v11.has_loader_info());
        assert!(v11.has_metaspace());
        assert!(v11.has_reference_data());
        assert!(!v11.has_safepoint_time());
    }

    #[test]
    fn test_extended_flags_are_independent() {
        let plain = FormatVersion::from_byte(0x80).unwrap();
        assert!(plain.has_metaspace());
        assert!(!plain.has_reference_data());
        assert!(!plain.has_safepoint_time());

        let reftree = FormatVersion::from_byte(0x81).unwrap();
        assert!(reftree.has_reference_data());
        assert!(!reftree.has_safepoint_time());

        let safepoint = FormatVersion::from_byte(0x82).unwrap();
        assert!(!safepoint.has_reference_data());
        assert!(safepoint.has_safepoint_time());

        let both = FormatVersion::from_byte(0x83).unwrap();
        assert!(both.has_reference_data() && both.has_safepoint_time());
        assert_eq!(both.raw(), 0x83);
    }

    #[test]
    fn test_unknown_bytes_rejected() {
        assert!(FormatVersion::from_byte(0x00).is_none());
        assert!(FormatVersion::from_byte(b'L').is_none());
        assert!(FormatVersion::from_byte(0x7f).is_none());
    }
}
