//! Little-endian wire primitives for the snapshot format.
//!
//! Every multi-byte field is encoded field-by-field with `to_le_bytes` /
//! `from_le_bytes`, never by dumping struct memory, so snapshots are portable
//! across host byte orders. Strings are length-prefixed (`u64` length + raw
//! UTF-8 bytes, no terminator). Metadata values carry an explicit leading tag
//! byte.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::model::{Config, MetadataValue};

/// Upper bound on a decoded string length. Metadata keys and values are small
/// attributes; anything past this is a corrupted length prefix.
pub const MAX_STRING_LEN: u64 = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid metadata value tag {0} (expected 0, 1 or 2)")]
    InvalidTag(u8),

    #[error("string of {0} bytes exceeds the {MAX_STRING_LEN}-byte limit")]
    StringTooLong(u64),

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

macro_rules! impl_scalar_codec {
    ($write_fn:ident, $read_fn:ident, $ty:ty) => {
        #[inline]
        pub fn $write_fn<W: Write + ?Sized>(w: &mut W, value: $ty) -> io::Result<()> {
            w.write_all(&value.to_le_bytes())
        }

        #[inline]
        pub fn $read_fn<R: Read + ?Sized>(r: &mut R) -> io::Result<$ty> {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            r.read_exact(&mut buf)?;
            Ok(<$ty>::from_le_bytes(buf))
        }
    };
}

impl_scalar_codec!(write_u32, read_u32, u32);
impl_scalar_codec!(write_u64, read_u64, u64);
impl_scalar_codec!(write_i64, read_i64, i64);
impl_scalar_codec!(write_f32, read_f32, f32);
impl_scalar_codec!(write_f64, read_f64, f64);

#[inline]
pub fn write_u8<W: Write + ?Sized>(w: &mut W, value: u8) -> io::Result<()> {
    w.write_all(&[value])
}

#[inline]
pub fn read_u8<R: Read + ?Sized>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_string<W: Write + ?Sized>(w: &mut W, s: &str) -> io::Result<()> {
    write_u64(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

pub fn read_string<R: Read + ?Sized>(r: &mut R) -> Result<String, CodecError> {
    let len = read_u64(r)?;
    if len > MAX_STRING_LEN {
        return Err(CodecError::StringTooLong(len));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    Ok(String::from_utf8(bytes)?)
}

/// Tag byte followed by the payload: `i64`, `f64` or a length-prefixed string.
pub fn write_value<W: Write + ?Sized>(w: &mut W, value: &MetadataValue) -> io::Result<()> {
    write_u8(w, value.tag())?;
    match value {
        MetadataValue::Int(v) => write_i64(w, *v),
        MetadataValue::Float(v) => write_f64(w, *v),
        MetadataValue::Str(v) => write_string(w, v),
    }
}

pub fn read_value<R: Read + ?Sized>(r: &mut R) -> Result<MetadataValue, CodecError> {
    match read_u8(r)? {
        0 => Ok(MetadataValue::Int(read_i64(r)?)),
        1 => Ok(MetadataValue::Float(read_f64(r)?)),
        2 => Ok(MetadataValue::Str(read_string(r)?)),
        tag => Err(CodecError::InvalidTag(tag)),
    }
}

pub fn write_config<W: Write + ?Sized>(w: &mut W, config: &Config) -> io::Result<()> {
    write_u32(w, config.vector_dim)?;
    write_u64(w, config.max_elements)
}

pub fn read_config<R: Read + ?Sized>(r: &mut R) -> io::Result<Config> {
    let vector_dim = read_u32(r)?;
    let max_elements = read_u64(r)?;
    Ok(Config {
        vector_dim,
        max_elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_value(value: MetadataValue) -> MetadataValue {
        let mut buf = Vec::new();
        write_value(&mut buf, &value).unwrap();
        read_value(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn scalars_are_little_endian() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0x0403_0201).unwrap();
        write_u64(&mut buf, 1).unwrap();
        assert_eq!(&buf[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[4..], &[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn string_roundtrip_and_prefix() {
        let mut buf = Vec::new();
        write_string(&mut buf, "héllo").unwrap();
        assert_eq!(u64::from_le_bytes(buf[..8].try_into().unwrap()), 6);
        assert_eq!(read_string(&mut buf.as_slice()).unwrap(), "héllo");

        let mut empty = Vec::new();
        write_string(&mut empty, "").unwrap();
        assert_eq!(empty.len(), 8);
        assert_eq!(read_string(&mut empty.as_slice()).unwrap(), "");
    }

    #[test]
    fn value_roundtrip_all_variants() {
        assert_eq!(
            roundtrip_value(MetadataValue::Int(-42)),
            MetadataValue::Int(-42)
        );
        assert_eq!(
            roundtrip_value(MetadataValue::Float(2.5)),
            MetadataValue::Float(2.5)
        );
        assert_eq!(
            roundtrip_value(MetadataValue::from("tag")),
            MetadataValue::from("tag")
        );
    }

    #[test]
    fn value_rejects_unknown_tag() {
        let buf = [9u8, 0, 0, 0, 0, 0, 0, 0, 0];
        let err = read_value(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidTag(9)));
    }

    #[test]
    fn string_rejects_corrupted_length() {
        let mut buf = Vec::new();
        write_u64(&mut buf, u64::MAX).unwrap();
        let err = read_string(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::StringTooLong(_)));
    }

    #[test]
    fn config_roundtrip() {
        let cfg = Config::with_max_elements(384, 10_000);
        let mut buf = Vec::new();
        write_config(&mut buf, &cfg).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(read_config(&mut buf.as_slice()).unwrap(), cfg);
    }

    #[test]
    fn truncated_input_is_an_io_error() {
        let buf = [2u8, 5, 0, 0, 0, 0, 0, 0, 0, b'a'];
        let err = read_value(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, CodecError::Io(_)));
    }
}
