// tcp-kernel: The 24-byte tool capability descriptor
// Immutable after creation; any edit requires a new authenticator

use crate::variant::Variant;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical descriptor length on the wire.
pub const DESCRIPTOR_LEN: usize = 24;

/// Byte range covered by the authenticator (everything before it).
pub const SIGNED_REGION: std::ops::Range<usize> = 0..18;

/// Byte range covered by the CRC (everything before the CRC itself).
pub const CRC_REGION: std::ops::Range<usize> = 0..22;

/// Capability flag bitset (u16, big-endian on the wire).
///
/// Bits 8..15 are reserved. Strict decode preserves them and lets the
/// policy engine defer; lenient decode ignores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CapabilityFlags(pub u16);

impl CapabilityFlags {
    pub const FILE_OPS: u16 = 0x0001;
    pub const NETWORK: u16 = 0x0002;
    pub const DESTRUCTIVE: u16 = 0x0004;
    pub const SYSTEM: u16 = 0x0008;
    pub const SUDO: u16 = 0x0010;
    pub const PROCESS: u16 = 0x0020;
    pub const CRYPTO: u16 = 0x0040;
    pub const KERNEL: u16 = 0x0080;

    /// All currently assigned bits.
    pub const KNOWN_MASK: u16 = 0x00ff;
    /// Reserved bits, must be zero for strict-mode acceptance.
    pub const RESERVED_MASK: u16 = !Self::KNOWN_MASK;

    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline(always)]
    pub fn contains(self, mask: u16) -> bool {
        self.0 & mask != 0
    }

    #[inline(always)]
    pub fn has_reserved(self) -> bool {
        self.0 & Self::RESERVED_MASK != 0
    }

    /// Partition the flag bitset into one of 16 equivalence classes used to
    /// index the compiled policy table: filesystem, network, privilege
    /// (SUDO|KERNEL), and mutation (DESTRUCTIVE|SYSTEM|PROCESS|CRYPTO)
    /// concerns each contribute one bit. Branch-free.
    #[inline(always)]
    pub fn class(self) -> usize {
        let f = self.0;
        let fs = (f & Self::FILE_OPS != 0) as usize;
        let net = (f & Self::NETWORK != 0) as usize;
        let privilege = (f & (Self::SUDO | Self::KERNEL) != 0) as usize;
        let mutation =
            (f & (Self::DESTRUCTIVE | Self::SYSTEM | Self::PROCESS | Self::CRYPTO) != 0) as usize;
        fs | (net << 1) | (privilege << 2) | (mutation << 3)
    }
}

impl std::ops::BitOr<u16> for CapabilityFlags {
    type Output = Self;
    fn bitor(self, rhs: u16) -> Self {
        Self(self.0 | rhs)
    }
}

/// Ordinal risk severity supplied by the descriptor source.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl RiskLevel {
    pub const MAX: u8 = RiskLevel::Critical as u8;

    #[inline(always)]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RiskLevel::Safe),
            1 => Some(RiskLevel::Low),
            2 => Some(RiskLevel::Medium),
            3 => Some(RiskLevel::High),
            4 => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

/// Expected resource bounds for the described command: three u16 fields,
/// big-endian, packed into bytes 12..18.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerfEnvelope {
    pub max_latency_us: u16,
    pub max_memory_kib: u16,
    pub max_io_ops: u16,
}

impl PerfEnvelope {
    pub fn to_bytes(self) -> [u8; 6] {
        let mut b = [0u8; 6];
        b[0..2].copy_from_slice(&self.max_latency_us.to_be_bytes());
        b[2..4].copy_from_slice(&self.max_memory_kib.to_be_bytes());
        b[4..6].copy_from_slice(&self.max_io_ops.to_be_bytes());
        b
    }

    pub fn from_bytes(b: &[u8; 6]) -> Self {
        Self {
            max_latency_us: u16::from_be_bytes([b[0], b[1]]),
            max_memory_kib: u16::from_be_bytes([b[2], b[3]]),
            max_io_ops: u16::from_be_bytes([b[4], b[5]]),
        }
    }
}

/// Parsed form of the 24-byte capability descriptor.
///
/// The version byte is folded into [`Variant`]; the wire magic is
/// reconstructed from it on encode. Field semantics follow the fixed
/// layout: command hash at 5..9, flags at 9..11, risk at 11, performance
/// envelope at 12..18, authenticator at 18..22, CRC at 22..24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub variant: Variant,
    pub command_hash: [u8; 4],
    pub flags: CapabilityFlags,
    pub risk: RiskLevel,
    pub perf: PerfEnvelope,
    pub authenticator: [u8; 4],
}

impl Descriptor {
    /// Fingerprint: BLAKE3 over the full canonical 24 bytes. Votes and
    /// audit records reference descriptors by this value.
    pub fn fingerprint(&self) -> [u8; 32] {
        let bytes = crate::codec::encode(self);
        *blake3::hash(&bytes).as_bytes()
    }

    /// The authenticator-covered prefix (bytes 0..18) of the canonical
    /// encoding. Integrity verification binds exactly this region, so any
    /// change to it invalidates the authenticator.
    pub fn signed_region(&self) -> [u8; 18] {
        let bytes = crate::codec::encode(self);
        let mut region = [0u8; 18];
        region.copy_from_slice(&bytes[SIGNED_REGION]);
        region
    }
}

/// Truncated command hash: first 4 bytes of SHA-256 over the canonical
/// command string. Descriptor sources call this when authoring.
pub fn command_hash(command: &str) -> [u8; 4] {
    let digest = Sha256::digest(command.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[0..4]);
    out
}

/// Builder for descriptors, used by authoring tools and tests.
pub struct DescriptorBuilder {
    descriptor: Descriptor,
}

impl DescriptorBuilder {
    pub fn new(variant: Variant) -> Self {
        Self {
            descriptor: Descriptor {
                variant,
                command_hash: [0; 4],
                flags: CapabilityFlags::empty(),
                risk: RiskLevel::Safe,
                perf: PerfEnvelope::default(),
                authenticator: [0; 4],
            },
        }
    }

    pub fn command(mut self, command: &str) -> Self {
        self.descriptor.command_hash = command_hash(command);
        self
    }

    pub fn command_hash_raw(mut self, hash: [u8; 4]) -> Self {
        self.descriptor.command_hash = hash;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.descriptor.flags = CapabilityFlags(flags);
        self
    }

    pub fn risk(mut self, risk: RiskLevel) -> Self {
        self.descriptor.risk = risk;
        self
    }

    pub fn perf(mut self, perf: PerfEnvelope) -> Self {
        self.descriptor.perf = perf;
        self
    }

    pub fn authenticator(mut self, authenticator: [u8; 4]) -> Self {
        self.descriptor.authenticator = authenticator;
        self
    }

    pub fn build(self) -> Descriptor {
        self.descriptor
    }
}
