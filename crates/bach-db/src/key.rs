//! Table key encoding

use crate::codec::FixedLayout;
use crate::error::{DbError, DbResult};
use std::borrow::Cow;

/// A type usable as a table key
///
/// Fixed-layout keys are stored byte-for-byte; strings and byte vectors are
/// stored as their raw bytes.
pub trait TableKey: Sized {
    /// Stored key bytes
    fn to_key_bytes(&self) -> Cow<'_, [u8]>;

    /// Rebuild a key from stored bytes
    fn from_key_bytes(bytes: &[u8]) -> DbResult<Self>;
}

impl<T: FixedLayout> TableKey for T {
    fn to_key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.to_fixed_bytes())
    }

    fn from_key_bytes(bytes: &[u8]) -> DbResult<Self> {
        T::from_fixed_bytes(bytes)
    }
}

impl TableKey for String {
    fn to_key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }

    fn from_key_bytes(bytes: &[u8]) -> DbResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| DbError::InvalidFormat(e.to_string()))
    }
}

impl TableKey for Vec<u8> {
    fn to_key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_slice())
    }

    fn from_key_bytes(bytes: &[u8]) -> DbResult<Self> {
        Ok(bytes.to_vec())
    }
}
