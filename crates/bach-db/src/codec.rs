//! Value codec strategies
//!
//! A table accessor picks one strategy when it is instantiated:
//! - [`FixedLayoutCodec`]: fixed-size binary records, size-checked on decode
//! - [`SelfDescribingCodec`]: any serde type, encoded with bincode

use crate::error::{DbError, DbResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A record with a fixed, self-contained binary representation
///
/// `read_from` always receives exactly [`FixedLayout::SIZE`] bytes.
pub trait FixedLayout: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Append exactly `SIZE` bytes to `out`
    fn write_to(&self, out: &mut Vec<u8>);

    /// Rebuild from exactly `SIZE` bytes
    fn read_from(bytes: &[u8]) -> Self;

    /// Encode into a fresh buffer
    fn to_fixed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out);
        debug_assert_eq!(out.len(), Self::SIZE, "FixedLayout::write_to wrote the wrong size");
        out
    }

    /// Decode, rejecting buffers whose length is not `SIZE`
    fn from_fixed_bytes(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() != Self::SIZE {
            return Err(DbError::SizeMismatch {
                expected: Self::SIZE,
                got: bytes.len(),
            });
        }
        Ok(Self::read_from(bytes))
    }
}

macro_rules! impl_fixed_layout_int {
    ($($t:ty),*) => {
        $(
            impl FixedLayout for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn write_to(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_from(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    buf.copy_from_slice(bytes);
                    <$t>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_fixed_layout_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl<const N: usize> FixedLayout for [u8; N] {
    const SIZE: usize = N;

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }

    fn read_from(bytes: &[u8]) -> Self {
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        buf
    }
}

/// Strategy turning values into stored bytes and back
pub trait ValueCodec<V> {
    /// Encode a value
    fn encode(value: &V) -> DbResult<Vec<u8>>;

    /// Decode stored bytes
    fn decode(bytes: &[u8]) -> DbResult<V>;
}

/// Byte-for-byte fixed-layout records
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLayoutCodec;

impl<V: FixedLayout> ValueCodec<V> for FixedLayoutCodec {
    fn encode(value: &V) -> DbResult<Vec<u8>> {
        Ok(value.to_fixed_bytes())
    }

    fn decode(bytes: &[u8]) -> DbResult<V> {
        V::from_fixed_bytes(bytes)
    }
}

/// Serde objects stored as bincode blobs
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfDescribingCodec;

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for SelfDescribingCodec {
    fn encode(value: &V) -> DbResult<Vec<u8>> {
        bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> DbResult<V> {
        bincode::deserialize(bytes).map_err(|e| DbError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    /// Block index record used as a fixed-layout value
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct BlockIndexEntry {
        height: u64,
        timestamp: u64,
        hash: [u8; 32],
    }

    impl FixedLayout for BlockIndexEntry {
        const SIZE: usize = 8 + 8 + 32;

        fn write_to(&self, out: &mut Vec<u8>) {
            self.height.write_to(out);
            self.timestamp.write_to(out);
            self.hash.write_to(out);
        }

        fn read_from(bytes: &[u8]) -> Self {
            Self {
                height: u64::read_from(&bytes[0..8]),
                timestamp: u64::read_from(&bytes[8..16]),
                hash: <[u8; 32]>::read_from(&bytes[16..48]),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Receipt {
        tx_hash: Vec<u8>,
        gas_used: u64,
        logs: Vec<String>,
        status: Option<bool>,
    }

    #[test]
    fn test_fixed_layout_record() {
        let entry = BlockIndexEntry {
            height: 42,
            timestamp: 1_700_000_000,
            hash: [0xab; 32],
        };
        let bytes = <FixedLayoutCodec as ValueCodec<BlockIndexEntry>>::encode(&entry).unwrap();
        assert_eq!(bytes.len(), BlockIndexEntry::SIZE);
        assert_eq!(&bytes[0..8], &42u64.to_le_bytes());

        let decoded: BlockIndexEntry = FixedLayoutCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_fixed_layout_size_mismatch() {
        let result: DbResult<u64> = FixedLayoutCodec::decode(&[1, 2, 3]);
        assert!(matches!(
            result,
            Err(DbError::SizeMismatch { expected: 8, got: 3 })
        ));

        let result: DbResult<BlockIndexEntry> = FixedLayoutCodec::decode(&[0u8; 49]);
        assert!(matches!(
            result,
            Err(DbError::SizeMismatch { expected: 48, got: 49 })
        ));

        let result: DbResult<u32> = FixedLayoutCodec::decode(&[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_int_layout_is_little_endian() {
        assert_eq!(0x0102u16.to_fixed_bytes(), vec![0x02, 0x01]);
        assert_eq!(i32::from_fixed_bytes(&(-5i32).to_le_bytes()).unwrap(), -5);
    }

    #[test]
    fn test_self_describing_receipt() {
        let receipt = Receipt {
            tx_hash: vec![0x11; 32],
            gas_used: 21_000,
            logs: vec!["Transfer".into()],
            status: Some(true),
        };
        let bytes = <SelfDescribingCodec as ValueCodec<Receipt>>::encode(&receipt).unwrap();
        let decoded: Receipt = SelfDescribingCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, receipt);
    }

    #[test]
    fn test_self_describing_rejects_garbage() {
        let result: DbResult<Receipt> = SelfDescribingCodec::decode(&[0xff, 0xff]);
        assert!(matches!(result, Err(DbError::Deserialization(_))));
    }

    proptest! {
        #[test]
        fn prop_fixed_layout_round_trip(height in any::<u64>(), timestamp in any::<u64>(), hash in any::<[u8; 32]>()) {
            let entry = BlockIndexEntry { height, timestamp, hash };
            let bytes = <FixedLayoutCodec as ValueCodec<BlockIndexEntry>>::encode(&entry).unwrap();
            let decoded: BlockIndexEntry = FixedLayoutCodec::decode(&bytes).unwrap();
            prop_assert_eq!(decoded, entry);
        }

        #[test]
        fn prop_fixed_layout_rejects_wrong_length(len in 0usize..64) {
            prop_assume!(len != 8);
            let result: DbResult<u64> = FixedLayoutCodec::decode(&vec![0u8; len]);
            let is_mismatch = matches!(result, Err(DbError::SizeMismatch { .. }));
            prop_assert!(is_mismatch);
        }

        #[test]
        fn prop_self_describing_round_trip(tx_hash in proptest::collection::vec(any::<u8>(), 0..64), gas_used in any::<u64>(), logs in proptest::collection::vec(".{0,16}", 0..4), status in any::<Option<bool>>()) {
            let receipt = Receipt { tx_hash, gas_used, logs, status };
            let bytes = <SelfDescribingCodec as ValueCodec<Receipt>>::encode(&receipt).unwrap();
            let decoded: Receipt = SelfDescribingCodec::decode(&bytes).unwrap();
            prop_assert_eq!(decoded, receipt);
        }
    }
}
