// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data-kind tags for schema types.

/// Integer storage width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bytes(self) -> u32 {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W32 => 4,
            IntWidth::W64 => 8,
        }
    }
}

/// Floating-point storage width.
///
/// `F16` is Havok's `hkHalf`: the upper 16 bits of an IEEE f32, not an
/// IEEE half float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F16,
    F32,
    F64,
}

impl FloatWidth {
    pub fn bytes(self) -> u32 {
        match self {
            FloatWidth::F16 => 2,
            FloatWidth::F32 => 4,
            FloatWidth::F64 => 8,
        }
    }
}

/// The resolved shape of a type's values.
///
/// Node decoding dispatches exclusively on this tag; numeric format comes
/// from the sub-flags carried by the `Int`/`Float`/`Tuple` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Invalid,
    Bool,
    Int { signed: bool, width: IntWidth },
    Float { width: FloatWidth },
    String,
    Pointer,
    Class,
    Array,
    Tuple { count: u32 },
}

impl TypeKind {
    /// Simple leaf kinds eligible for the flattened array representation.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. }
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, TypeKind::Float { .. })
    }
}

/// Decode an `hkHalf` (upper 16 bits of an f32) to f64.
pub fn half_to_f64(bits: u16) -> f64 {
    f64::from(f32::from_bits(u32::from(bits) << 16))
}

/// Encode a float as `hkHalf` (truncate the f32 mantissa to the top half).
pub fn f64_to_half(value: f64) -> u16 {
    ((value as f32).to_bits() >> 16) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(IntWidth::W8.bytes(), 1);
        assert_eq!(IntWidth::W64.bytes(), 8);
        assert_eq!(FloatWidth::F16.bytes(), 2);
        assert_eq!(FloatWidth::F64.bytes(), 8);
    }

    #[test]
    fn test_scalar_kinds() {
        assert!(TypeKind::Bool.is_scalar());
        assert!(TypeKind::Int {
            signed: true,
            width: IntWidth::W32
        }
        .is_scalar());
        assert!(!TypeKind::String.is_scalar());
        assert!(!TypeKind::Pointer.is_scalar());
        assert!(!TypeKind::Class.is_scalar());
    }

    #[test]
    fn test_half_roundtrip() {
        // hkHalf keeps the f32 sign/exponent and top 7 mantissa bits, so
        // small powers of two survive exactly.
        for v in [0.0, 1.0, -2.0, 0.5, 1024.0] {
            let bits = f64_to_half(v);
            assert_eq!(half_to_f64(bits), v);
        }
    }
}
