//! External data representation for the remote-procedure records.
//!
//! Every item is big-endian and padded to four bytes. Variable arrays carry
//! a `u32` element count, strings a `u32` byte count followed by the bytes
//! and zero padding.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on decoded array lengths.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XdrError {
    /// The buffer ended inside an item.
    #[error("record truncated: {needed} bytes needed, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// An array announced more elements than allowed.
    #[error("array of {0} elements exceeds the limit")]
    TooLong(usize),

    /// A string held invalid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidString,
}

/// A value with a fixed XDR layout.
pub trait Xdr: Sized {
    /// Append the encoding of `self` to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Consume one value from the front of `buf`.
    fn decode(buf: &mut Bytes) -> Result<Self, XdrError>;
}

fn ensure(buf: &Bytes, needed: usize) -> Result<(), XdrError> {
    if buf.remaining() < needed {
        return Err(XdrError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn decode_len(buf: &mut Bytes) -> Result<usize, XdrError> {
    let len = u32::decode(buf)? as usize;
    if len > MAX_ARRAY_LEN {
        return Err(XdrError::TooLong(len));
    }
    Ok(len)
}

impl Xdr for () {
    fn encode(&self, _buf: &mut BytesMut) {}

    fn decode(_buf: &mut Bytes) -> Result<Self, XdrError> {
        Ok(())
    }
}

impl Xdr for i32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(*self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, XdrError> {
        ensure(buf, 4)?;
        Ok(buf.get_i32())
    }
}

impl Xdr for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(*self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, XdrError> {
        ensure(buf, 4)?;
        Ok(buf.get_u32())
    }
}

impl Xdr for f64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_f64(*self);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, XdrError> {
        ensure(buf, 8)?;
        Ok(buf.get_f64())
    }
}

impl Xdr for String {
    fn encode(&self, buf: &mut BytesMut) {
        let bytes = self.as_bytes();
        buf.put_u32(bytes.len() as u32);
        buf.put_slice(bytes);
        buf.put_bytes(0, padding(bytes.len()));
    }

    fn decode(buf: &mut Bytes) -> Result<Self, XdrError> {
        let len = decode_len(buf)?;
        let padded = len + padding(len);
        ensure(buf, padded)?;
        let raw = buf.split_to(len);
        buf.advance(padded - len);
        String::from_utf8(raw.to_vec()).map_err(|_| XdrError::InvalidString)
    }
}

impl<T: Xdr> Xdr for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.len() as u32);
        for item in self {
            item.encode(buf);
        }
    }

    fn decode(buf: &mut Bytes) -> Result<Self, XdrError> {
        let len = decode_len(buf)?;
        // Every element takes at least four bytes.
        let mut items = Vec::with_capacity(len.min(buf.remaining() / 4));
        for _ in 0..len {
            items.push(T::decode(buf)?);
        }
        Ok(items)
    }
}

/// Encode `value` into a fresh buffer.
pub fn to_bytes<T: Xdr>(value: &T) -> Bytes {
    let mut buf = BytesMut::new();
    value.encode(&mut buf);
    buf.freeze()
}

/// Decode one value, ignoring trailing bytes.
pub fn from_bytes<T: Xdr>(mut bytes: Bytes) -> Result<T, XdrError> {
    T::decode(&mut bytes)
}

/// Declare a record struct whose XDR layout is its fields in order.
macro_rules! xdr_record {
    ($(
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty ),* $(,)?
        }
    )*) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty ),*
        }

        impl $crate::rpc::xdr::Xdr for $name {
            #[allow(unused_variables)]
            fn encode(&self, buf: &mut ::bytes::BytesMut) {
                $( $crate::rpc::xdr::Xdr::encode(&self.$field, buf); )*
            }

            #[allow(unused_variables)]
            fn decode(
                buf: &mut ::bytes::Bytes,
            ) -> ::std::result::Result<Self, $crate::rpc::xdr::XdrError> {
                Ok(Self {
                    $( $field: $crate::rpc::xdr::Xdr::decode(buf)?, )*
                })
            }
        }
    )*};
}

pub(crate) use xdr_record;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_is_padded_to_word() {
        let bytes = to_bytes(&"ME-4680".to_string());
        assert_eq!(bytes.len(), 4 + 8);
        assert_eq!(&bytes[..4], &[0, 0, 0, 7]);
        assert_eq!(bytes[11], 0);
        assert_eq!(from_bytes::<String>(bytes).unwrap(), "ME-4680");
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        let bytes = Bytes::from_static(&[0, 0, 0, 3, 0, 0, 0, 1]);
        let err = from_bytes::<Vec<i32>>(bytes).unwrap_err();
        assert!(matches!(err, XdrError::Truncated { needed: 4, .. }));
    }

    #[test]
    fn test_oversized_array_is_rejected() {
        let bytes = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(
            from_bytes::<Vec<i32>>(bytes).unwrap_err(),
            XdrError::TooLong(u32::MAX as usize)
        );
    }

    #[test]
    fn test_double_is_big_endian() {
        let bytes = to_bytes(&1.0f64);
        assert_eq!(&bytes[..], &[0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
    }
}
