// tcp-kernel: Format variant dispatch on magic + version
// Classical and post-quantum descriptors coexist during the migration window

use crate::codec::ParseError;
use serde::{Deserialize, Serialize};

/// First three magic bytes shared by every variant.
pub const MAGIC_PREFIX: [u8; 3] = *b"TCP";

/// Wire format variant. A descriptor's variant never changes after
/// issuance; the (magic, version) pair selects the integrity-layer
/// implementation.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// `TCP\x02`, version 2: truncated classical authenticator in-band
    V2Classical = 2,
    /// `TCP\x03`, version 3: selector into an external lattice-proof store
    V3PostQuantum = 3,
}

impl Variant {
    #[inline(always)]
    pub fn version(self) -> u8 {
        self as u8
    }

    pub fn magic(self) -> [u8; 4] {
        [
            MAGIC_PREFIX[0],
            MAGIC_PREFIX[1],
            MAGIC_PREFIX[2],
            self.version(),
        ]
    }

    pub fn from_version(v: u8) -> Option<Self> {
        match v {
            2 => Some(Variant::V2Classical),
            3 => Some(Variant::V3PostQuantum),
            _ => None,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::V2Classical => write!(f, "v2-classical"),
            Variant::V3PostQuantum => write!(f, "v3-post-quantum"),
        }
    }
}

/// Select the variant for a raw descriptor from its magic and version
/// bytes, before full decoding. Magics other than `TCP\x02`/`TCP\x03` are
/// reserved and rejected here.
pub fn dispatch(bytes: &[u8]) -> Result<Variant, ParseError> {
    if bytes.len() != crate::descriptor::DESCRIPTOR_LEN {
        return Err(ParseError::BadMagic);
    }
    if bytes[0..3] != MAGIC_PREFIX {
        return Err(ParseError::BadMagic);
    }
    let variant = Variant::from_version(bytes[3]).ok_or(ParseError::BadMagic)?;
    if bytes[4] != variant.version() {
        return Err(ParseError::UnsupportedVersion);
    }
    Ok(variant)
}
