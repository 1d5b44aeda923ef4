//! Optional BAM tags (`TAG TYPE VALUE` triplets after the quality string).

use super::record::FieldReader;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Tag values keyed by their two-character name
pub type Tags = BTreeMap<String, TagValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Char(char),
    Int(i64),
    Float(f32),
    String(String),
    Hex(String),
    Array(TagArray),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagArray {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float(Vec<f32>),
}

impl TagValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(s) | TagValue::Hex(s) => Some(s),
            _ => None,
        }
    }
}

pub(super) fn parse_tags(fields: &mut FieldReader<'_>) -> Result<Tags> {
    let mut tags = Tags::new();
    while fields.remaining() > 0 {
        let key = fields.bytes(2)?;
        let key = String::from_utf8_lossy(key).into_owned();
        let ty = fields.u8()?;
        let value = parse_value(fields, ty)?;
        tags.insert(key, value);
    }
    Ok(tags)
}

fn parse_value(fields: &mut FieldReader<'_>, ty: u8) -> Result<TagValue> {
    Ok(match ty {
        b'A' => TagValue::Char(fields.u8()? as char),
        b'c' => TagValue::Int(i64::from(fields.u8()? as i8)),
        b'C' => TagValue::Int(i64::from(fields.u8()?)),
        b's' => TagValue::Int(i64::from(fields.u16()? as i16)),
        b'S' => TagValue::Int(i64::from(fields.u16()?)),
        b'i' => TagValue::Int(i64::from(fields.i32()?)),
        b'I' => TagValue::Int(i64::from(fields.u32()?)),
        b'f' => TagValue::Float(fields.f32()?),
        b'Z' => TagValue::String(fields.c_string()?),
        b'H' => TagValue::Hex(fields.c_string()?),
        b'B' => TagValue::Array(parse_array(fields)?),
        other => {
            return Err(Error::format(
                fields.position() as u64,
                format!("unknown tag type {:?}", other as char),
            ));
        }
    })
}

fn parse_array(fields: &mut FieldReader<'_>) -> Result<TagArray> {
    let subtype = fields.u8()?;
    let count = fields.u32()? as usize;

    let width = match subtype {
        b'c' | b'C' => 1,
        b's' | b'S' => 2,
        b'i' | b'I' | b'f' => 4,
        other => {
            return Err(Error::format(
                fields.position() as u64,
                format!("unknown array subtype {:?}", other as char),
            ));
        }
    };
    fields.require(count.saturating_mul(width))?;

    Ok(match subtype {
        b'c' => TagArray::Int8((0..count).map(|_| fields.u8().map(|v| v as i8)).collect::<Result<_>>()?),
        b'C' => TagArray::UInt8(fields.bytes(count)?.to_vec()),
        b's' => TagArray::Int16((0..count).map(|_| fields.u16().map(|v| v as i16)).collect::<Result<_>>()?),
        b'S' => TagArray::UInt16((0..count).map(|_| fields.u16()).collect::<Result<_>>()?),
        b'i' => TagArray::Int32((0..count).map(|_| fields.i32()).collect::<Result<_>>()?),
        b'I' => TagArray::UInt32((0..count).map(|_| fields.u32()).collect::<Result<_>>()?),
        _ => TagArray::Float((0..count).map(|_| fields.f32()).collect::<Result<_>>()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Result<Tags> {
        let mut fields = FieldReader::new(bytes, 0);
        parse_tags(&mut fields)
    }

    #[test]
    fn test_scalar_tags() {
        let mut data = Vec::new();
        data.extend_from_slice(b"NMC\x03");
        data.extend_from_slice(b"ASs");
        data.extend_from_slice(&(-12i16).to_le_bytes());
        data.extend_from_slice(b"RGZgroup1\0");
        data.extend_from_slice(b"XAAq");
        data.extend_from_slice(b"XFf");
        data.extend_from_slice(&1.5f32.to_le_bytes());

        let tags = parse(&data).unwrap();
        assert_eq!(tags["NM"], TagValue::Int(3));
        assert_eq!(tags["AS"], TagValue::Int(-12));
        assert_eq!(tags["RG"].as_str(), Some("group1"));
        assert_eq!(tags["XA"], TagValue::Char('q'));
        assert_eq!(tags["XF"], TagValue::Float(1.5));
    }

    #[test]
    fn test_array_tag() {
        let mut data = Vec::new();
        data.extend_from_slice(b"MLBS");
        data.extend_from_slice(&3u32.to_le_bytes());
        for v in [1u16, 2, 65535] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let tags = parse(&data).unwrap();
        assert_eq!(tags["ML"], TagValue::Array(TagArray::UInt16(vec![1, 2, 65535])));
    }

    #[test]
    fn test_truncated_array_is_truncated_record() {
        let mut data = Vec::new();
        data.extend_from_slice(b"MLBi");
        data.extend_from_slice(&10u32.to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        assert_eq!(parse(&data).unwrap_err().kind(), "TruncatedRecordError");
    }

    #[test]
    fn test_unknown_type_is_format_error() {
        assert_eq!(parse(b"XXq\x01").unwrap_err().kind(), "FormatError");
    }
}
