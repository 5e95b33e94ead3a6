//! Scalar element types and type-converting slice transfer.
//!
//! Every table stores its cells in one of a fixed set of primitive types
//! ([`ScalarType`]). Callers ask for blocks in whatever [`Scalar`] type suits
//! their kernel; the table converts between the two on the way in and out.
//!
//! # Conversion rules
//!
//! - Same type: plain copy, in every layout, so 64-bit integers stay exact.
//! - Otherwise the value pivots through `f64`. Float → integer casts saturate
//!   and map NaN to zero; 64-bit integers beyond 2^53 lose precision.
//! - `bool` reads as `0`/`1` and any non-zero value writes as `true`.
//!
//! The erased slice types ([`ScalarSlice`], [`ScalarSliceMut`]) let the
//! object-safe [`NumericTable`](super::NumericTable) trait move typed data
//! without being generic itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::block::allocate;
use crate::error::TableError;

mod sealed {
    pub trait Sealed {}
}

/// Generates the scalar type tag, the erased slice/vec enums and their
/// dispatch helpers for every supported primitive.
macro_rules! scalar_types {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        /// Primitive type of a stored feature.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum ScalarType {
            $($variant,)*
        }

        impl ScalarType {
            /// All supported scalar types.
            pub const ALL: &'static [ScalarType] = &[$(ScalarType::$variant,)*];

            /// Size of one value in bytes.
            #[inline]
            pub fn size_of(self) -> usize {
                match self {
                    $(ScalarType::$variant => std::mem::size_of::<$ty>(),)*
                }
            }

            /// Read the value of this type stored in native-endian `bytes` into
            /// `dst[index]`, converting when `dst` holds another type.
            ///
            /// `bytes` must hold at least [`size_of`](Self::size_of) bytes.
            #[inline]
            pub fn read_cell(self, bytes: &[u8], dst: &mut ScalarSliceMut<'_>, index: usize) {
                match self {
                    $(ScalarType::$variant => {
                        let width = std::mem::size_of::<<$ty as Scalar>::Pod>();
                        let pod: <$ty as Scalar>::Pod = bytemuck::pod_read_unaligned(&bytes[..width]);
                        let value = <$ty as Scalar>::from_pod(pod);
                        dst.copy_cell(index, ScalarSlice::$variant(std::slice::from_ref(&value)), 0);
                    })*
                }
            }

            /// Write `src[index]` converted to this type into native-endian
            /// `bytes`. Out-of-range indices leave `bytes` untouched.
            #[inline]
            pub fn write_cell(self, bytes: &mut [u8], src: ScalarSlice<'_>, index: usize) {
                if index >= src.len() {
                    return;
                }
                match self {
                    $(ScalarType::$variant => {
                        let mut value = <$ty>::default();
                        ScalarSliceMut::$variant(std::slice::from_mut(&mut value)).copy_cell(0, src, index);
                        let pod = value.to_pod();
                        let raw = bytemuck::bytes_of(&pod);
                        bytes[..raw.len()].copy_from_slice(raw);
                    })*
                }
            }
        }

        /// Borrowed slice of any supported scalar type.
        #[derive(Debug, Clone, Copy)]
        pub enum ScalarSlice<'a> {
            $($variant(&'a [$ty]),)*
        }

        /// Mutable slice of any supported scalar type.
        #[derive(Debug)]
        pub enum ScalarSliceMut<'a> {
            $($variant(&'a mut [$ty]),)*
        }

        /// Owned vector of any supported scalar type.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub enum ScalarVec {
            $($variant(Vec<$ty>),)*
        }

        impl<'a> ScalarSlice<'a> {
            /// Element type of the slice.
            pub fn scalar_type(&self) -> ScalarType {
                match self {
                    $(ScalarSlice::$variant(_) => ScalarType::$variant,)*
                }
            }

            /// Number of elements.
            pub fn len(&self) -> usize {
                match self {
                    $(ScalarSlice::$variant(s) => s.len(),)*
                }
            }

            /// Returns true if the slice has no elements.
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Sub-slice `range` of the erased slice.
            pub fn slice(self, range: std::ops::Range<usize>) -> ScalarSlice<'a> {
                match self {
                    $(ScalarSlice::$variant(s) => ScalarSlice::$variant(&s[range]),)*
                }
            }

            /// Value at `index` converted to `f64`.
            pub fn get_f64(&self, index: usize) -> Option<f64> {
                match self {
                    $(ScalarSlice::$variant(s) => s.get(index).map(|v| v.to_f64()),)*
                }
            }

            /// Convert every element into `dst`.
            ///
            /// Lengths must match.
            pub fn convert_into(&self, dst: ScalarSliceMut<'_>) {
                match self {
                    $(ScalarSlice::$variant(s) => dst.fill_from::<$ty>(s),)*
                }
            }

            /// Copy the elements into an owned vector of the same type.
            pub fn to_scalar_vec(&self) -> ScalarVec {
                match self {
                    $(ScalarSlice::$variant(s) => ScalarVec::$variant(s.to_vec()),)*
                }
            }
        }

        impl<'a> ScalarSliceMut<'a> {
            /// Element type of the slice.
            pub fn scalar_type(&self) -> ScalarType {
                match self {
                    $(ScalarSliceMut::$variant(_) => ScalarType::$variant,)*
                }
            }

            /// Number of elements.
            pub fn len(&self) -> usize {
                match self {
                    $(ScalarSliceMut::$variant(s) => s.len(),)*
                }
            }

            /// Returns true if the slice has no elements.
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Reborrow a sub-slice.
            pub fn slice_mut(&mut self, range: std::ops::Range<usize>) -> ScalarSliceMut<'_> {
                match self {
                    $(ScalarSliceMut::$variant(s) => ScalarSliceMut::$variant(&mut s[range]),)*
                }
            }

            /// Narrow to `range`, keeping the original lifetime.
            pub fn into_range(self, range: std::ops::Range<usize>) -> ScalarSliceMut<'a> {
                match self {
                    $(ScalarSliceMut::$variant(s) => ScalarSliceMut::$variant(&mut s[range]),)*
                }
            }

            /// Store `value` converted to the slice's type at `index`.
            ///
            /// Out-of-range indices are ignored.
            pub fn set_f64(&mut self, index: usize, value: f64) {
                match self {
                    $(ScalarSliceMut::$variant(s) => {
                        if let Some(slot) = s.get_mut(index) {
                            *slot = <$ty as Scalar>::from_f64(value);
                        }
                    })*
                }
            }

            /// Copy `src[src_index]` into `self[index]`.
            ///
            /// Matching element types move the value unchanged; otherwise it
            /// pivots through `f64`. Out-of-range indices are ignored.
            pub fn copy_cell(&mut self, index: usize, src: ScalarSlice<'_>, src_index: usize) {
                match (&mut *self, src) {
                    $((ScalarSliceMut::$variant(d), ScalarSlice::$variant(s)) => {
                        if let (Some(slot), Some(&value)) = (d.get_mut(index), s.get(src_index)) {
                            *slot = value;
                        }
                    })*
                    (d, s) => {
                        if let Some(value) = s.get_f64(src_index) {
                            d.set_f64(index, value);
                        }
                    }
                }
            }

            /// Fill from a typed source slice, converting each element.
            pub fn fill_from<S: Scalar>(self, src: &[S]) {
                match self {
                    $(ScalarSliceMut::$variant(d) => convert_slice(src, d),)*
                }
            }
        }

        impl ScalarVec {
            /// A zero-filled vector of `len` elements of type `scalar_type`.
            pub fn zeros(scalar_type: ScalarType, len: usize) -> Result<Self, TableError> {
                Ok(match scalar_type {
                    $(ScalarType::$variant => ScalarVec::$variant(allocate::<$ty>(len)?),)*
                })
            }

            /// Element type of the vector.
            pub fn scalar_type(&self) -> ScalarType {
                match self {
                    $(ScalarVec::$variant(_) => ScalarType::$variant,)*
                }
            }

            /// Number of elements.
            pub fn len(&self) -> usize {
                match self {
                    $(ScalarVec::$variant(v) => v.len(),)*
                }
            }

            /// Returns true if the vector has no elements.
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// Resize to `len`, padding with zeros.
            pub fn resize(&mut self, len: usize) -> Result<(), TableError> {
                match self {
                    $(ScalarVec::$variant(v) => grow(v, len),)*
                }
            }

            /// Borrow as an erased slice.
            pub fn as_slice(&self) -> ScalarSlice<'_> {
                match self {
                    $(ScalarVec::$variant(v) => ScalarSlice::$variant(v),)*
                }
            }

            /// Borrow as an erased mutable slice.
            pub fn as_mut_slice(&mut self) -> ScalarSliceMut<'_> {
                match self {
                    $(ScalarVec::$variant(v) => ScalarSliceMut::$variant(v),)*
                }
            }
        }
    };
}

scalar_types! {
    I8 => i8,
    I16 => i16,
    I32 => i32,
    I64 => i64,
    U8 => u8,
    U16 => u16,
    U32 => u32,
    U64 => u64,
    F32 => f32,
    F64 => f64,
    Bool => bool,
}

impl ScalarType {
    /// Returns true for `F32`/`F64`.
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    /// Returns true for the signed and unsigned integer types.
    #[inline]
    pub fn is_integer(self) -> bool {
        !self.is_float() && self != ScalarType::Bool
    }

    /// Short lowercase name, e.g. `"f64"`.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::U8 => "u8",
            ScalarType::U16 => "u16",
            ScalarType::U32 => "u32",
            ScalarType::U64 => "u64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::Bool => "bool",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A primitive type that can live in a table or be requested from one.
///
/// Sealed: implemented for exactly the types listed in [`ScalarType`].
pub trait Scalar:
    sealed::Sealed + Copy + Default + PartialEq + Send + Sync + fmt::Debug + 'static
{
    /// Type tag of `Self`.
    const TYPE: ScalarType;

    /// Plain-old-data representation used for byte-level storage.
    type Pod: bytemuck::Pod;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Narrow from `f64` (saturating for integers).
    fn from_f64(value: f64) -> Self;

    /// Byte-level representation.
    fn to_pod(self) -> Self::Pod;

    /// Rebuild from the byte-level representation.
    fn from_pod(pod: Self::Pod) -> Self;

    /// Erase a typed slice.
    fn wrap(values: &[Self]) -> ScalarSlice<'_>;

    /// Erase a typed mutable slice.
    fn wrap_mut(values: &mut [Self]) -> ScalarSliceMut<'_>;

    /// Recover a typed slice if the erased slice holds `Self`.
    fn unwrap(values: ScalarSlice<'_>) -> Option<&[Self]>;

    /// Recover a typed mutable slice if the erased slice holds `Self`.
    fn unwrap_mut(values: ScalarSliceMut<'_>) -> Option<&mut [Self]>;

    /// Wrap an owned vector.
    fn into_scalar_vec(values: Vec<Self>) -> ScalarVec;

    /// Take the typed vector back out of a [`ScalarVec`].
    fn from_scalar_vec(values: ScalarVec) -> Option<Vec<Self>>;
}

macro_rules! impl_numeric_scalar {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Scalar for $ty {
                const TYPE: ScalarType = ScalarType::$variant;
                type Pod = $ty;

                #[inline]
                fn to_f64(self) -> f64 {
                    self as f64
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    value as $ty
                }

                #[inline]
                fn to_pod(self) -> Self::Pod {
                    self
                }

                #[inline]
                fn from_pod(pod: Self::Pod) -> Self {
                    pod
                }

                impl_numeric_scalar!(@erase $variant, $ty);
            }
        )*
    };
    (@erase $variant:ident, $ty:ty) => {
        #[inline]
        fn wrap(values: &[Self]) -> ScalarSlice<'_> {
            ScalarSlice::$variant(values)
        }

        #[inline]
        fn wrap_mut(values: &mut [Self]) -> ScalarSliceMut<'_> {
            ScalarSliceMut::$variant(values)
        }

        #[inline]
        fn unwrap(values: ScalarSlice<'_>) -> Option<&[Self]> {
            match values {
                ScalarSlice::$variant(s) => Some(s),
                _ => None,
            }
        }

        #[inline]
        fn unwrap_mut(values: ScalarSliceMut<'_>) -> Option<&mut [Self]> {
            match values {
                ScalarSliceMut::$variant(s) => Some(s),
                _ => None,
            }
        }

        fn into_scalar_vec(values: Vec<Self>) -> ScalarVec {
            ScalarVec::$variant(values)
        }

        fn from_scalar_vec(values: ScalarVec) -> Option<Vec<Self>> {
            match values {
                ScalarVec::$variant(v) => Some(v),
                _ => None,
            }
        }
    };
}

impl_numeric_scalar! {
    I8 => i8,
    I16 => i16,
    I32 => i32,
    I64 => i64,
    U8 => u8,
    U16 => u16,
    U32 => u32,
    U64 => u64,
    F32 => f32,
    F64 => f64,
}

impl sealed::Sealed for bool {}

impl Scalar for bool {
    const TYPE: ScalarType = ScalarType::Bool;
    type Pod = u8;

    #[inline]
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value != 0.0 && !value.is_nan()
    }

    #[inline]
    fn to_pod(self) -> Self::Pod {
        self as u8
    }

    #[inline]
    fn from_pod(pod: Self::Pod) -> Self {
        pod != 0
    }

    impl_numeric_scalar!(@erase Bool, bool);
}

fn grow<T: Clone + Default>(values: &mut Vec<T>, len: usize) -> Result<(), TableError> {
    if len > values.len() {
        values
            .try_reserve_exact(len - values.len())
            .map_err(|_| TableError::AllocationFailed {
                bytes: len.saturating_mul(std::mem::size_of::<T>()),
            })?;
    }
    values.resize(len, T::default());
    Ok(())
}

/// Convert `src` element-wise into `dst`.
///
/// Takes the copy fast path when both slices hold the same type.
pub fn convert_slice<S: Scalar, D: Scalar>(src: &[S], dst: &mut [D]) {
    debug_assert_eq!(src.len(), dst.len(), "conversion length mismatch");
    if let Some(same) = D::unwrap(S::wrap(src)) {
        dst.copy_from_slice(same);
        return;
    }
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = D::from_f64(s.to_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(ScalarType::I8.size_of(), 1);
        assert_eq!(ScalarType::U16.size_of(), 2);
        assert_eq!(ScalarType::F32.size_of(), 4);
        assert_eq!(ScalarType::I64.size_of(), 8);
        assert_eq!(ScalarType::Bool.size_of(), 1);
    }

    #[test]
    fn classification() {
        assert!(ScalarType::F32.is_float());
        assert!(!ScalarType::F32.is_integer());
        assert!(ScalarType::U8.is_integer());
        assert!(!ScalarType::Bool.is_integer());
        assert!(!ScalarType::Bool.is_float());
    }

    #[test]
    fn convert_same_type_copies() {
        let src = [1.5f64, -2.0, 3.25];
        let mut dst = [0.0f64; 3];
        convert_slice(&src, &mut dst);
        assert_eq!(dst, src);
    }

    #[test]
    fn convert_float_to_int_saturates() {
        let src = [1.9f64, -1.9, 1e10, f64::NAN];
        let mut dst = [0i16; 4];
        convert_slice(&src, &mut dst);
        assert_eq!(dst, [1, -1, i16::MAX, 0]);
    }

    #[test]
    fn convert_bool() {
        let src = [0.0f32, 2.0, -1.0];
        let mut dst = [true; 3];
        convert_slice(&src, &mut dst);
        assert_eq!(dst, [false, true, true]);

        let mut back = [0.0f64; 3];
        convert_slice(&dst, &mut back);
        assert_eq!(back, [0.0, 1.0, 1.0]);
    }

    #[test]
    fn erased_convert_into() {
        let src = [1i32, 2, 3];
        let mut dst = [0.0f32; 3];
        ScalarSlice::I32(&src).convert_into(f32::wrap_mut(&mut dst));
        assert_eq!(dst, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn wrap_unwrap() {
        let values = [1.0f32, 2.0];
        let erased = f32::wrap(&values);
        assert_eq!(erased.scalar_type(), ScalarType::F32);
        assert_eq!(f32::unwrap(erased), Some(&values[..]));
        assert_eq!(f64::unwrap(erased), None);
    }

    #[test]
    fn byte_level_roundtrip() {
        let mut bytes = [0u8; 8];
        ScalarType::I32.write_cell(&mut bytes[2..], f64::wrap(&[-7.0]), 0);
        let mut out = [0.0f64];
        ScalarType::I32.read_cell(&bytes[2..], &mut f64::wrap_mut(&mut out), 0);
        assert_eq!(out, [-7.0]);

        ScalarType::Bool.write_cell(&mut bytes, f64::wrap(&[5.0]), 0);
        assert_eq!(bytes[0], 1);
        ScalarType::Bool.read_cell(&bytes, &mut f64::wrap_mut(&mut out), 0);
        assert_eq!(out, [1.0]);
    }

    #[test]
    fn byte_level_same_type_is_exact() {
        let big = [i64::MAX, (1i64 << 53) + 1];
        let mut bytes = [0u8; 16];
        ScalarType::I64.write_cell(&mut bytes[..8], i64::wrap(&big), 0);
        ScalarType::I64.write_cell(&mut bytes[8..], i64::wrap(&big), 1);
        let mut out = [0i64; 2];
        ScalarType::I64.read_cell(&bytes[..8], &mut i64::wrap_mut(&mut out), 0);
        ScalarType::I64.read_cell(&bytes[8..], &mut i64::wrap_mut(&mut out), 1);
        assert_eq!(out, big);
    }

    #[test]
    fn write_cell_out_of_range_is_ignored() {
        let mut bytes = [9u8; 4];
        ScalarType::U32.write_cell(&mut bytes, u32::wrap(&[1]), 3);
        assert_eq!(bytes, [9; 4]);
    }

    #[test]
    fn copy_cell_exact_and_converting() {
        let src = [u64::MAX, (1u64 << 53) + 1];
        let mut same = [0u64; 2];
        let mut dst = u64::wrap_mut(&mut same);
        dst.copy_cell(0, u64::wrap(&src), 1);
        dst.copy_cell(1, u64::wrap(&src), 0);
        assert_eq!(same, [(1u64 << 53) + 1, u64::MAX]);

        let mut floats = [0.0f32; 1];
        f32::wrap_mut(&mut floats).copy_cell(0, i16::wrap(&[-3]), 0);
        assert_eq!(floats, [-3.0]);
    }

    #[test]
    fn scalar_vec_zeros_and_resize() {
        let mut v = ScalarVec::zeros(ScalarType::U32, 3).unwrap();
        assert_eq!(v.len(), 3);
        v.resize(5).unwrap();
        assert_eq!(v, ScalarVec::U32(vec![0; 5]));
        assert_eq!(u32::from_scalar_vec(v), Some(vec![0; 5]));
    }

    #[test]
    fn scalar_vec_zeros_reports_failure() {
        let err = ScalarVec::zeros(ScalarType::F64, usize::MAX).unwrap_err();
        assert!(matches!(err, TableError::AllocationFailed { .. }));

        let mut v = ScalarVec::zeros(ScalarType::U8, 1).unwrap();
        assert!(matches!(v.resize(usize::MAX), Err(TableError::AllocationFailed { .. })));
        assert_eq!(v.len(), 1);
    }
}
