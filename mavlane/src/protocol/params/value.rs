use std::fmt::{Display, Formatter};

use crate::consts::PARAM_EXT_VALUE_LEN;

/// Type of a parameter value.
///
/// Numbering follows `MAV_PARAM_TYPE` / `MAV_PARAM_EXT_TYPE`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// `u8`
    U8,
    /// `i8`
    I8,
    /// `u16`
    U16,
    /// `i16`
    I16,
    /// `u32`
    U32,
    /// `i32`
    I32,
    /// `u64`
    U64,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// Free-form string, extended protocol only.
    Custom,
}

impl ParamType {
    /// Converts a wire type number.
    pub fn from_mav(value: u8) -> Option<Self> {
        Some(match value {
            1 => ParamType::U8,
            2 => ParamType::I8,
            3 => ParamType::U16,
            4 => ParamType::I16,
            5 => ParamType::U32,
            6 => ParamType::I32,
            7 => ParamType::U64,
            8 => ParamType::I64,
            9 => ParamType::F32,
            10 => ParamType::F64,
            11 => ParamType::Custom,
            _ => return None,
        })
    }

    /// Wire type number.
    pub fn to_mav(self) -> u8 {
        match self {
            ParamType::U8 => 1,
            ParamType::I8 => 2,
            ParamType::U16 => 3,
            ParamType::I16 => 4,
            ParamType::U32 => 5,
            ParamType::I32 => 6,
            ParamType::U64 => 7,
            ParamType::I64 => 8,
            ParamType::F32 => 9,
            ParamType::F64 => 10,
            ParamType::Custom => 11,
        }
    }

    /// Returns `true` if the standard protocol can carry values of this type.
    pub fn is_standard(self) -> bool {
        !matches!(
            self,
            ParamType::U64 | ParamType::I64 | ParamType::F64 | ParamType::Custom
        )
    }
}

/// Value of a parameter.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    /// `u8`
    U8(u8),
    /// `i8`
    I8(i8),
    /// `u16`
    U16(u16),
    /// `i16`
    I16(i16),
    /// `u32`
    U32(u32),
    /// `i32`
    I32(i32),
    /// `u64`
    U64(u64),
    /// `i64`
    I64(i64),
    /// `f32`
    F32(f32),
    /// `f64`
    F64(f64),
    /// Free-form string, at most 128 bytes.
    Custom(String),
}

impl ParamValue {
    /// Type of this value.
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::U8(_) => ParamType::U8,
            ParamValue::I8(_) => ParamType::I8,
            ParamValue::U16(_) => ParamType::U16,
            ParamValue::I16(_) => ParamType::I16,
            ParamValue::U32(_) => ParamType::U32,
            ParamValue::I32(_) => ParamType::I32,
            ParamValue::U64(_) => ParamType::U64,
            ParamValue::I64(_) => ParamType::I64,
            ParamValue::F32(_) => ParamType::F32,
            ParamValue::F64(_) => ParamType::F64,
            ParamValue::Custom(_) => ParamType::Custom,
        }
    }

    /// Encodes the value into the `f32` field of the standard protocol.
    ///
    /// Integers are placed bytewise, so the float is only a carrier. Returns `None` for types
    /// wider than four bytes.
    pub fn to_standard(&self) -> Option<f32> {
        let mut bytes = [0u8; 4];
        match self {
            ParamValue::F32(value) => return Some(*value),
            ParamValue::U8(value) => bytes[..1].copy_from_slice(&value.to_le_bytes()),
            ParamValue::I8(value) => bytes[..1].copy_from_slice(&value.to_le_bytes()),
            ParamValue::U16(value) => bytes[..2].copy_from_slice(&value.to_le_bytes()),
            ParamValue::I16(value) => bytes[..2].copy_from_slice(&value.to_le_bytes()),
            ParamValue::U32(value) => bytes.copy_from_slice(&value.to_le_bytes()),
            ParamValue::I32(value) => bytes.copy_from_slice(&value.to_le_bytes()),
            _ => return None,
        }
        Some(f32::from_le_bytes(bytes))
    }

    /// Decodes the `f32` field of the standard protocol.
    pub fn from_standard(value: f32, param_type: ParamType) -> Option<Self> {
        let bytes = value.to_le_bytes();
        Some(match param_type {
            ParamType::F32 => ParamValue::F32(value),
            ParamType::U8 => ParamValue::U8(bytes[0]),
            ParamType::I8 => ParamValue::I8(i8::from_le_bytes([bytes[0]])),
            ParamType::U16 => ParamValue::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
            ParamType::I16 => ParamValue::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
            ParamType::U32 => ParamValue::U32(u32::from_le_bytes(bytes)),
            ParamType::I32 => ParamValue::I32(i32::from_le_bytes(bytes)),
            _ => return None,
        })
    }

    /// Encodes the value into the 128-byte field of the extended protocol.
    ///
    /// Returns `None` for strings that don't fit.
    pub fn to_ext(&self) -> Option<[u8; PARAM_EXT_VALUE_LEN]> {
        let mut buf = [0u8; PARAM_EXT_VALUE_LEN];
        let bytes: Vec<u8> = match self {
            ParamValue::U8(value) => value.to_le_bytes().to_vec(),
            ParamValue::I8(value) => value.to_le_bytes().to_vec(),
            ParamValue::U16(value) => value.to_le_bytes().to_vec(),
            ParamValue::I16(value) => value.to_le_bytes().to_vec(),
            ParamValue::U32(value) => value.to_le_bytes().to_vec(),
            ParamValue::I32(value) => value.to_le_bytes().to_vec(),
            ParamValue::U64(value) => value.to_le_bytes().to_vec(),
            ParamValue::I64(value) => value.to_le_bytes().to_vec(),
            ParamValue::F32(value) => value.to_le_bytes().to_vec(),
            ParamValue::F64(value) => value.to_le_bytes().to_vec(),
            ParamValue::Custom(value) => value.as_bytes().to_vec(),
        };
        if bytes.len() > PARAM_EXT_VALUE_LEN {
            return None;
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Some(buf)
    }

    /// Decodes the 128-byte field of the extended protocol.
    pub fn from_ext(buf: &[u8; PARAM_EXT_VALUE_LEN], param_type: ParamType) -> Self {
        let mut b8 = [0u8; 8];
        b8.copy_from_slice(&buf[..8]);
        let [b0, b1, b2, b3, ..] = b8;

        match param_type {
            ParamType::U8 => ParamValue::U8(b0),
            ParamType::I8 => ParamValue::I8(i8::from_le_bytes([b0])),
            ParamType::U16 => ParamValue::U16(u16::from_le_bytes([b0, b1])),
            ParamType::I16 => ParamValue::I16(i16::from_le_bytes([b0, b1])),
            ParamType::U32 => ParamValue::U32(u32::from_le_bytes([b0, b1, b2, b3])),
            ParamType::I32 => ParamValue::I32(i32::from_le_bytes([b0, b1, b2, b3])),
            ParamType::U64 => ParamValue::U64(u64::from_le_bytes(b8)),
            ParamType::I64 => ParamValue::I64(i64::from_le_bytes(b8)),
            ParamType::F32 => ParamValue::F32(f32::from_le_bytes([b0, b1, b2, b3])),
            ParamType::F64 => ParamValue::F64(f64::from_le_bytes(b8)),
            ParamType::Custom => {
                let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
                ParamValue::Custom(String::from_utf8_lossy(&buf[..len]).into_owned())
            }
        }
    }
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::U8(value) => write!(f, "{value}"),
            ParamValue::I8(value) => write!(f, "{value}"),
            ParamValue::U16(value) => write!(f, "{value}"),
            ParamValue::I16(value) => write!(f, "{value}"),
            ParamValue::U32(value) => write!(f, "{value}"),
            ParamValue::I32(value) => write!(f, "{value}"),
            ParamValue::U64(value) => write!(f, "{value}"),
            ParamValue::I64(value) => write!(f, "{value}"),
            ParamValue::F32(value) => write!(f, "{value}"),
            ParamValue::F64(value) => write!(f, "{value}"),
            ParamValue::Custom(value) => f.write_str(value),
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_carried_bytewise() {
        let carrier = ParamValue::I32(-7).to_standard().unwrap();
        assert_eq!(carrier.to_le_bytes(), (-7i32).to_le_bytes());
        assert_eq!(
            ParamValue::from_standard(carrier, ParamType::I32),
            Some(ParamValue::I32(-7))
        );

        let carrier = ParamValue::U8(200).to_standard().unwrap();
        assert_eq!(carrier.to_le_bytes(), [200, 0, 0, 0]);
    }

    #[test]
    fn wide_types_are_not_standard() {
        assert_eq!(ParamValue::I64(1).to_standard(), None);
        assert_eq!(ParamValue::F64(1.0).to_standard(), None);
        assert_eq!(ParamValue::Custom("x".into()).to_standard(), None);
        assert!(!ParamType::U64.is_standard());
        assert!(ParamType::F32.is_standard());
    }

    #[test]
    fn extended_encoding() {
        let buf = ParamValue::F64(2.5).to_ext().unwrap();
        assert_eq!(&buf[..8], &2.5f64.to_le_bytes());
        assert!(buf[8..].iter().all(|b| *b == 0));
        assert_eq!(ParamValue::from_ext(&buf, ParamType::F64), ParamValue::F64(2.5));

        let buf = ParamValue::Custom("WBMODE".into()).to_ext().unwrap();
        assert_eq!(
            ParamValue::from_ext(&buf, ParamType::Custom),
            ParamValue::Custom("WBMODE".into())
        );

        assert_eq!(ParamValue::Custom("x".repeat(129)).to_ext(), None);
    }

    #[test]
    fn wire_type_numbers() {
        for n in 1..=11 {
            assert_eq!(ParamType::from_mav(n).unwrap().to_mav(), n);
        }
        assert_eq!(ParamType::from_mav(0), None);
        assert_eq!(ParamType::from_mav(12), None);
    }
}
