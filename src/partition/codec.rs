//! Byte-order aware 16-bit entry codec

use crate::core::error::{Error, Result};
use crate::core::types::{ByteOrder, EntryKind, ENTRY_BYTE_WIDTH};

/// Decode one entry from its two bytes
#[inline]
pub fn decode_entry(bytes: [u8; ENTRY_BYTE_WIDTH], order: ByteOrder, kind: EntryKind) -> i32 {
    let raw = match order {
        ByteOrder::Big => u16::from_be_bytes(bytes),
        ByteOrder::Little => u16::from_le_bytes(bytes),
    };
    match kind {
        EntryKind::Signed => raw as i16 as i32,
        EntryKind::Unsigned => raw as i32,
    }
}

/// Encode one entry; fails if `value` does not fit `kind`
#[inline]
pub fn encode_entry(value: i32, order: ByteOrder, kind: EntryKind) -> Result<[u8; ENTRY_BYTE_WIDTH]> {
    if value < kind.min_value() || value > kind.max_value() {
        return Err(Error::decode(format!("{} does not fit a {}", value, kind)));
    }
    let raw = value as u16;
    Ok(match order {
        ByteOrder::Big => raw.to_be_bytes(),
        ByteOrder::Little => raw.to_le_bytes(),
    })
}

/// Check that `bytes` splits into whole entries
pub fn check_aligned(bytes: &[u8]) -> Result<()> {
    if bytes.len() % ENTRY_BYTE_WIDTH != 0 {
        return Err(Error::decode(format!(
            "{} staged bytes are not a multiple of the {}-byte entry width",
            bytes.len(),
            ENTRY_BYTE_WIDTH
        )));
    }
    Ok(())
}

/// Decode a run of entries
pub fn decode_entries(bytes: &[u8], order: ByteOrder, kind: EntryKind) -> Result<Vec<i32>> {
    check_aligned(bytes)?;
    Ok(bytes
        .chunks_exact(ENTRY_BYTE_WIDTH)
        .map(|pair| decode_entry([pair[0], pair[1]], order, kind))
        .collect())
}

/// Encode a run of entries
pub fn encode_entries(values: &[i32], order: ByteOrder, kind: EntryKind) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(values.len() * ENTRY_BYTE_WIDTH);
    for &value in values {
        out.extend_from_slice(&encode_entry(value, order, kind)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_byte_orders_disagree() {
        let bytes = [0x01, 0x02];
        assert_eq!(decode_entry(bytes, ByteOrder::Big, EntryKind::Unsigned), 0x0102);
        assert_eq!(decode_entry(bytes, ByteOrder::Little, EntryKind::Unsigned), 0x0201);
    }

    #[test]
    fn test_signedness() {
        let bytes = [0xff, 0xfe];
        assert_eq!(decode_entry(bytes, ByteOrder::Big, EntryKind::Signed), -2);
        assert_eq!(decode_entry(bytes, ByteOrder::Big, EntryKind::Unsigned), 0xfffe);
        assert_eq!(decode_entry([0xff, 0x7f], ByteOrder::Little, EntryKind::Signed), i16::MAX as i32);
    }

    #[test]
    fn test_encode_out_of_range() {
        assert!(encode_entry(-1, ByteOrder::Little, EntryKind::Unsigned).is_err());
        assert!(encode_entry(40_000, ByteOrder::Little, EntryKind::Signed).is_err());
        assert_eq!(encode_entry(65_535, ByteOrder::Big, EntryKind::Unsigned).unwrap(), [0xff, 0xff]);
    }

    #[test]
    fn test_misaligned_bytes() {
        let result = decode_entries(&[1, 2, 3], ByteOrder::Little, EntryKind::Signed);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    fn order() -> impl Strategy<Value = ByteOrder> {
        prop_oneof![Just(ByteOrder::Big), Just(ByteOrder::Little)]
    }

    fn kind() -> impl Strategy<Value = EntryKind> {
        prop_oneof![Just(EntryKind::Signed), Just(EntryKind::Unsigned)]
    }

    proptest! {
        #[test]
        fn prop_decode_then_encode_is_identity(
            pairs in proptest::collection::vec(any::<[u8; 2]>(), 0..64),
            order in order(),
            kind in kind(),
        ) {
            let bytes: Vec<u8> = pairs.concat();
            let values = decode_entries(&bytes, order, kind).unwrap();
            prop_assert_eq!(encode_entries(&values, order, kind).unwrap(), bytes);
        }
    }
}
