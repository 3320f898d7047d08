// tcp-kernel: Fixed-offset descriptor codec with CRC-16 structural check
// Every decode path touches every field and computes the CRC before any
// verdict; the failure class is selected from accumulated condition masks,
// not by early exit, so timing does not leak which field failed.

use crate::ct;
use crate::descriptor::{
    CapabilityFlags, Descriptor, PerfEnvelope, RiskLevel, CRC_REGION, DESCRIPTOR_LEN,
};
use crate::variant::{Variant, MAGIC_PREFIX};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal parse failures. Reported as `Deny` votes with reason tags by
/// the validator; never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ParseError {
    #[error("bad magic or wrong descriptor length")]
    BadMagic,
    #[error("unsupported descriptor version")]
    UnsupportedVersion,
    #[error("CRC-16 mismatch")]
    CrcMismatch,
    #[error("capability flags conflict with risk level")]
    FlagRiskConflict,
    #[error("field value out of range")]
    OutOfRangeField,
}

impl ParseError {
    pub fn reason(self) -> crate::decision::ReasonCode {
        use crate::decision::ReasonCode;
        match self {
            ParseError::BadMagic => ReasonCode::BadMagic,
            ParseError::UnsupportedVersion => ReasonCode::UnsupportedVersion,
            ParseError::CrcMismatch => ReasonCode::CrcMismatch,
            ParseError::FlagRiskConflict => ReasonCode::FlagRiskConflict,
            ParseError::OutOfRangeField => ReasonCode::OutOfRangeField,
        }
    }
}

/// Reserved-bit handling, fixed per deployment.
///
/// Strict preserves reserved capability bits so the policy engine can
/// defer on them; lenient masks them off at the parse boundary and the
/// rest of the pipeline never sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodeMode {
    #[default]
    Strict,
    Lenient,
}

// Internal failure-class codes, ordered by selection priority.
const OK: u8 = 0;
const F_BAD_MAGIC: u8 = 1;
const F_BAD_VERSION: u8 = 2;
const F_BAD_CRC: u8 = 3;
const F_OUT_OF_RANGE: u8 = 4;
const F_CONFLICT: u8 = 5;

/// CRC-16/CCITT-FALSE: init 0xFFFF, polynomial 0x1021, no reflection.
/// Branchless bit loop; the conditional XOR is a widened-mask select.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            let mask = ct::mask_u16(crc & 0x8000 != 0);
            crc = (crc << 1) ^ (0x1021 & mask);
        }
    }
    crc
}

/// Serialise a descriptor into its canonical 24-byte wire form.
///
/// Total for any well-formed [`Descriptor`]: the field types make
/// out-of-range values unrepresentable, and the CRC is recomputed here so
/// an encoded descriptor always carries a valid checksum.
pub fn encode(d: &Descriptor) -> [u8; DESCRIPTOR_LEN] {
    let mut bytes = [0u8; DESCRIPTOR_LEN];
    bytes[0..4].copy_from_slice(&d.variant.magic());
    bytes[4] = d.variant.version();
    bytes[5..9].copy_from_slice(&d.command_hash);
    bytes[9..11].copy_from_slice(&d.flags.0.to_be_bytes());
    bytes[11] = d.risk.as_u8();
    bytes[12..18].copy_from_slice(&d.perf.to_bytes());
    bytes[18..22].copy_from_slice(&d.authenticator);
    let crc = crc16(&bytes[CRC_REGION]);
    bytes[22..24].copy_from_slice(&crc.to_be_bytes());
    bytes
}

/// Decode with the deployment-default strict reserved-bit handling.
pub fn decode(bytes: &[u8]) -> Result<Descriptor, ParseError> {
    decode_with_mode(bytes, DecodeMode::Strict)
}

/// Parse a 24-byte descriptor.
///
/// Order of evaluation is fixed: all fields are read, the CRC is computed
/// over bytes 0..22, and every cross-field invariant is evaluated as a
/// mask before the single failure class is selected by priority
/// (magic > version > CRC > range > conflict). Inputs of the wrong length
/// are a terminal `BadMagic`-class error with no partial parse.
pub fn decode_with_mode(bytes: &[u8], mode: DecodeMode) -> Result<Descriptor, ParseError> {
    if bytes.len() != DESCRIPTOR_LEN {
        return Err(ParseError::BadMagic);
    }

    // Unconditional field reads, fixed offsets.
    let magic_prefix_ok = ct::ct_eq(&bytes[0..3], &MAGIC_PREFIX);
    let magic_version = bytes[3];
    let version = bytes[4];
    let mut command_hash = [0u8; 4];
    command_hash.copy_from_slice(&bytes[5..9]);
    let raw_flags = u16::from_be_bytes([bytes[9], bytes[10]]);
    let raw_risk = bytes[11];
    let mut perf_bytes = [0u8; 6];
    perf_bytes.copy_from_slice(&bytes[12..18]);
    let mut authenticator = [0u8; 4];
    authenticator.copy_from_slice(&bytes[18..22]);
    let stored_crc = u16::from_be_bytes([bytes[22], bytes[23]]);

    // Structural checks, all evaluated.
    let computed_crc = crc16(&bytes[CRC_REGION]);
    let crc_ok = ct::ct_eq_u16(stored_crc, computed_crc);
    let version_known = (magic_version == 2) | (magic_version == 3);
    let version_agrees = version == magic_version;
    let risk_in_range = raw_risk <= RiskLevel::MAX;

    // Cross-field invariants on the clamped risk so the same arithmetic
    // runs whether or not the range check already failed.
    let risk_clamped = ct::ct_select_u8(risk_in_range, raw_risk, RiskLevel::MAX);
    let flags = CapabilityFlags(raw_flags);
    let destructive_ok =
        !flags.contains(CapabilityFlags::DESTRUCTIVE) | (risk_clamped >= RiskLevel::High.as_u8());
    let sudo_ok =
        !flags.contains(CapabilityFlags::SUDO) | (risk_clamped >= RiskLevel::High.as_u8());
    let kernel_ok =
        !flags.contains(CapabilityFlags::KERNEL) | (risk_clamped == RiskLevel::Critical.as_u8());
    let safe_ok = (risk_clamped != RiskLevel::Safe.as_u8())
        | (raw_flags & CapabilityFlags::KNOWN_MASK & !CapabilityFlags::FILE_OPS == 0);
    let invariants_ok = destructive_ok & sudo_ok & kernel_ok & safe_ok;

    // Single failure class, selected lowest-priority first so the highest
    // priority lands last.
    let mut code = OK;
    code = ct::ct_select_u8(!invariants_ok, F_CONFLICT, code);
    code = ct::ct_select_u8(!risk_in_range, F_OUT_OF_RANGE, code);
    code = ct::ct_select_u8(!crc_ok, F_BAD_CRC, code);
    code = ct::ct_select_u8(version_known & !version_agrees, F_BAD_VERSION, code);
    code = ct::ct_select_u8(!(magic_prefix_ok & version_known), F_BAD_MAGIC, code);

    // Descriptor is assembled unconditionally; only returned when clean.
    let effective_flags = match mode {
        DecodeMode::Strict => raw_flags,
        DecodeMode::Lenient => raw_flags & CapabilityFlags::KNOWN_MASK,
    };
    let descriptor = Descriptor {
        variant: Variant::from_version(magic_version).unwrap_or(Variant::V2Classical),
        command_hash,
        flags: CapabilityFlags(effective_flags),
        risk: RiskLevel::from_u8(risk_clamped).unwrap_or(RiskLevel::Critical),
        perf: PerfEnvelope::from_bytes(&perf_bytes),
        authenticator,
    };

    match code {
        OK => Ok(descriptor),
        F_BAD_MAGIC => Err(ParseError::BadMagic),
        F_BAD_VERSION => Err(ParseError::UnsupportedVersion),
        F_BAD_CRC => Err(ParseError::CrcMismatch),
        F_OUT_OF_RANGE => Err(ParseError::OutOfRangeField),
        _ => Err(ParseError::FlagRiskConflict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;

    fn safe_ls() -> Descriptor {
        DescriptorBuilder::new(Variant::V2Classical)
            .command("ls")
            .flags(0)
            .risk(RiskLevel::Safe)
            .perf(PerfEnvelope {
                max_latency_us: 100,
                max_memory_kib: 0,
                max_io_ops: 0,
            })
            .authenticator([0x00, 0x0a, 0x00, 0x01])
            .build()
    }

    fn critical_dd() -> Descriptor {
        DescriptorBuilder::new(Variant::V2Classical)
            .command("dd")
            .flags(
                CapabilityFlags::FILE_OPS | CapabilityFlags::DESTRUCTIVE | CapabilityFlags::SYSTEM,
            )
            .risk(RiskLevel::Critical)
            .build()
    }

    #[test]
    fn test_crc16_known_vector() {
        // CRC-16/CCITT-FALSE check value
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_round_trip() {
        for d in [safe_ls(), critical_dd()] {
            let bytes = encode(&d);
            let parsed = decode(&bytes).expect("round trip");
            assert_eq!(parsed, d);
        }
    }

    #[test]
    fn test_round_trip_v3() {
        let d = DescriptorBuilder::new(Variant::V3PostQuantum)
            .command("cargo build")
            .flags(CapabilityFlags::FILE_OPS | CapabilityFlags::PROCESS)
            .risk(RiskLevel::Low)
            .authenticator([0xde, 0xad, 0xbe, 0xef])
            .build();
        let bytes = encode(&d);
        assert_eq!(&bytes[0..4], b"TCP\x03");
        assert_eq!(decode(&bytes).expect("round trip"), d);
    }

    #[test]
    fn test_wrong_length_is_terminal() {
        assert_eq!(decode(&[0u8; 23]), Err(ParseError::BadMagic));
        assert_eq!(decode(&[0u8; 25]), Err(ParseError::BadMagic));
        assert_eq!(decode(&[]), Err(ParseError::BadMagic));
    }

    #[test]
    fn test_every_single_bit_flip_in_crc_region_detected() {
        let bytes = encode(&safe_ls());
        for byte_idx in 0..22 {
            for bit in 0..8 {
                let mut flipped = bytes;
                flipped[byte_idx] ^= 1 << bit;
                let result = decode(&flipped);
                assert!(
                    result.is_err(),
                    "flip of byte {byte_idx} bit {bit} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_crc_flip_in_magic_reports_magic_not_crc() {
        // Priority: a corrupted magic outranks the CRC mismatch it causes
        let mut bytes = encode(&safe_ls());
        bytes[0] ^= 0xff;
        assert_eq!(decode(&bytes), Err(ParseError::BadMagic));
    }

    #[test]
    fn test_crc_mismatch_reported_for_payload_tamper() {
        let mut bytes = encode(&safe_ls());
        bytes[10] ^= 0x08; // bit 3 of byte 10
        assert_eq!(decode(&bytes), Err(ParseError::CrcMismatch));
    }

    #[test]
    fn test_magic_version_disagreement() {
        let mut bytes = encode(&safe_ls());
        bytes[4] = 3;
        let crc = crc16(&bytes[0..22]);
        bytes[22..24].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ParseError::UnsupportedVersion));
    }

    #[test]
    fn test_out_of_range_risk() {
        let mut bytes = encode(&safe_ls());
        bytes[11] = 9;
        let crc = crc16(&bytes[0..22]);
        bytes[22..24].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ParseError::OutOfRangeField));
    }

    #[test]
    fn test_flag_risk_conflicts() {
        // DESTRUCTIVE at MEDIUM
        let mut bytes = encode(&safe_ls());
        bytes[9..11]
            .copy_from_slice(&(CapabilityFlags::FILE_OPS | CapabilityFlags::DESTRUCTIVE).to_be_bytes());
        bytes[11] = RiskLevel::Medium.as_u8();
        let crc = crc16(&bytes[0..22]);
        bytes[22..24].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ParseError::FlagRiskConflict));

        // KERNEL below CRITICAL
        let mut bytes = encode(&safe_ls());
        bytes[9..11].copy_from_slice(&CapabilityFlags::KERNEL.to_be_bytes());
        bytes[11] = RiskLevel::High.as_u8();
        let crc = crc16(&bytes[0..22]);
        bytes[22..24].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ParseError::FlagRiskConflict));

        // SAFE with NETWORK
        let mut bytes = encode(&safe_ls());
        bytes[9..11].copy_from_slice(&CapabilityFlags::NETWORK.to_be_bytes());
        let crc = crc16(&bytes[0..22]);
        bytes[22..24].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(decode(&bytes), Err(ParseError::FlagRiskConflict));
    }

    #[test]
    fn test_sudo_at_high_is_valid() {
        let d = DescriptorBuilder::new(Variant::V2Classical)
            .command("sudo apt upgrade")
            .flags(CapabilityFlags::SUDO | CapabilityFlags::SYSTEM)
            .risk(RiskLevel::High)
            .build();
        assert!(decode(&encode(&d)).is_ok());
    }

    #[test]
    fn test_reserved_bits_strict_vs_lenient() {
        let mut bytes = encode(&safe_ls());
        bytes[9..11].copy_from_slice(&0x0100u16.to_be_bytes()); // reserved bit 8
        bytes[11] = RiskLevel::Low.as_u8(); // SAFE restricts flags; LOW does not
        let crc = crc16(&bytes[0..22]);
        bytes[22..24].copy_from_slice(&crc.to_be_bytes());

        let strict = decode_with_mode(&bytes, DecodeMode::Strict).expect("strict decode");
        assert!(strict.flags.has_reserved());

        let lenient = decode_with_mode(&bytes, DecodeMode::Lenient).expect("lenient decode");
        assert!(!lenient.flags.has_reserved());
        assert_eq!(lenient.flags.0, 0);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let d = critical_dd();
        assert_eq!(encode(&d), encode(&d));
    }
}
