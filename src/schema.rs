//! Compositional value-layout descriptors.
//!
//! Every schema node knows how to compute the exact byte size of a value
//! it would encode ([`Schema::dynamic_size`]) and how to move it to and
//! from a byte cursor ([`Schema::read`]/[`Schema::write`]). Composition
//! is static: a [`Tuple2`] of an [`Int64Schema`] and a [`StringSchema`]
//! is a distinct Rust type from a [`Tuple3`], following the source's own
//! note that static dispatch via generics is the natural fit here (the
//! alternative, one dynamically-dispatched `Schema` trait object per
//! node, pays a vtable indirection on every field of every record).

use crate::encoding::{
    self, Cursor, SIZE_CHAR, SIZE_INT,
};
use crate::error::{PickleError, Result};
use async_trait::async_trait;

/// A value-layout descriptor. `Value` is the concrete Rust type this
/// node encodes and decodes.
#[async_trait]
pub trait Schema: Send + Sync {
    type Value: Send + Sync;

    /// Whether every value of this type encodes to the same byte size.
    fn is_fixed_size(&self) -> bool;

    /// The exact encoded byte size of `value`.
    fn dynamic_size(&self, value: &Self::Value) -> usize;

    /// Decodes a value, advancing `cursor` by exactly
    /// `dynamic_size(value)` bytes.
    async fn read(&self, cursor: &mut dyn Cursor) -> Result<Self::Value>;

    /// Encodes `value`, advancing `cursor` by exactly
    /// `dynamic_size(value)` bytes.
    async fn write(&self, cursor: &mut dyn Cursor, value: &Self::Value) -> Result<()>;
}

/// A default value for a fixed-size schema, used to compute the
/// per-record stride `S` of a [`crate::table::Table`]'s fixed layout.
pub trait FixedDefault: Schema {
    fn default_value(&self) -> Self::Value;
}

/// `u8`, encoded in [`encoding::SIZE_BYTE`] bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSchema;

#[async_trait]
impl Schema for ByteSchema {
    type Value = u8;

    fn is_fixed_size(&self) -> bool {
        true
    }
    fn dynamic_size(&self, _value: &u8) -> usize {
        encoding::SIZE_BYTE
    }
    async fn read(&self, cursor: &mut dyn Cursor) -> Result<u8> {
        encoding::decode_byte(cursor).await
    }
    async fn write(&self, cursor: &mut dyn Cursor, value: &u8) -> Result<()> {
        encoding::encode_byte(cursor, *value).await
    }
}

impl FixedDefault for ByteSchema {
    fn default_value(&self) -> u8 {
        0
    }
}

/// `i32`, encoded in [`encoding::SIZE_INT`] bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int32Schema;

#[async_trait]
impl Schema for Int32Schema {
    type Value = i32;

    fn is_fixed_size(&self) -> bool {
        true
    }
    fn dynamic_size(&self, _value: &i32) -> usize {
        SIZE_INT
    }
    async fn read(&self, cursor: &mut dyn Cursor) -> Result<i32> {
        encoding::decode_int(cursor).await
    }
    async fn write(&self, cursor: &mut dyn Cursor, value: &i32) -> Result<()> {
        encoding::encode_int(cursor, *value).await
    }
}

impl FixedDefault for Int32Schema {
    fn default_value(&self) -> i32 {
        0
    }
}

/// `i64`, encoded in [`encoding::SIZE_LONG`] bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int64Schema;

#[async_trait]
impl Schema for Int64Schema {
    type Value = i64;

    fn is_fixed_size(&self) -> bool {
        true
    }
    fn dynamic_size(&self, _value: &i64) -> usize {
        encoding::SIZE_LONG
    }
    async fn read(&self, cursor: &mut dyn Cursor) -> Result<i64> {
        encoding::decode_long(cursor).await
    }
    async fn write(&self, cursor: &mut dyn Cursor, value: &i64) -> Result<()> {
        encoding::encode_long(cursor, *value).await
    }
}

impl FixedDefault for Int64Schema {
    fn default_value(&self) -> i64 {
        0
    }
}

/// `String`, ASCII-only, length-prefixed and quoted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSchema;

#[async_trait]
impl Schema for StringSchema {
    type Value = String;

    fn is_fixed_size(&self) -> bool {
        false
    }
    fn dynamic_size(&self, value: &String) -> usize {
        encoding::size_for_string(value.len())
    }
    async fn read(&self, cursor: &mut dyn Cursor) -> Result<String> {
        encoding::decode_string(cursor).await
    }
    async fn write(&self, cursor: &mut dyn Cursor, value: &String) -> Result<()> {
        encoding::encode_string(cursor, value).await
    }
}

impl FixedDefault for StringSchema {
    fn default_value(&self) -> String {
        String::new()
    }
}

const TUPLE_WRAPPER_SIZE: usize = SIZE_CHAR + SIZE_CHAR; // open + close
const SEP_SIZE: usize = SIZE_CHAR;

macro_rules! tuple_schema {
    ($name:ident, $arity:expr, [$($T:ident : $idx:tt),+]) => {
        #[doc = concat!("A tuple of arity ", stringify!($arity), ".")]
        pub struct $name<$($T: Schema),+> {
            fields: ($($T,)+),
        }

        impl<$($T: Schema),+> $name<$($T),+> {
            pub fn new($($T: $T),+) -> Self {
                $name { fields: ($($T,)+) }
            }
        }

        #[async_trait]
        impl<$($T: Schema),+> Schema for $name<$($T),+> {
            type Value = ($($T::Value,)+);

            fn is_fixed_size(&self) -> bool {
                $(self.fields.$idx.is_fixed_size())&&+
            }

            fn dynamic_size(&self, value: &Self::Value) -> usize {
                let mut total = TUPLE_WRAPPER_SIZE + ($arity - 1) * SEP_SIZE;
                $(total += self.fields.$idx.dynamic_size(&value.$idx);)+
                total
            }

            async fn read(&self, cursor: &mut dyn Cursor) -> Result<Self::Value> {
                encoding::expect_tuple_start(cursor).await?;
                let mut first = true;
                $(
                    if !first {
                        encoding::expect_property_sep(cursor).await?;
                    }
                    first = false;
                    #[allow(non_snake_case)]
                    let $T = self.fields.$idx.read(cursor).await?;
                )+
                encoding::expect_tuple_end(cursor).await?;
                Ok(($($T,)+))
            }

            async fn write(&self, cursor: &mut dyn Cursor, value: &Self::Value) -> Result<()> {
                encoding::write_tuple_start(cursor).await?;
                let mut first = true;
                $(
                    if !first {
                        encoding::write_property_sep(cursor).await?;
                    }
                    first = false;
                    self.fields.$idx.write(cursor, &value.$idx).await?;
                )+
                encoding::write_tuple_end(cursor).await
            }
        }

        impl<$($T: Schema + FixedDefault),+> FixedDefault for $name<$($T),+> {
            fn default_value(&self) -> Self::Value {
                ($(self.fields.$idx.default_value(),)+)
            }
        }
    };
}

tuple_schema!(Tuple1, 1, [A: 0]);
tuple_schema!(Tuple2, 2, [A: 0, B: 1]);
tuple_schema!(Tuple3, 3, [A: 0, B: 1, C: 2]);
tuple_schema!(Tuple4, 4, [A: 0, B: 1, C: 2, D: 3]);
tuple_schema!(Tuple5, 5, [A: 0, B: 1, C: 2, D: 3, E: 4]);
tuple_schema!(Tuple6, 6, [A: 0, B: 1, C: 2, D: 3, E: 4, F: 5]);
tuple_schema!(Tuple7, 7, [A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6]);

/// A variable-length array of `S` values, inlined into the record
/// (length-prefixed, bracketed, comma-separated). Always variable size.
pub struct InlineArray<S: Schema> {
    inner: S,
}

impl<S: Schema> InlineArray<S> {
    pub fn new(inner: S) -> Self {
        InlineArray { inner }
    }
}

#[async_trait]
impl<S: Schema> Schema for InlineArray<S> {
    type Value = Vec<S::Value>;

    fn is_fixed_size(&self) -> bool {
        false
    }

    fn dynamic_size(&self, value: &Vec<S::Value>) -> usize {
        let n = value.len();
        let mut total = SIZE_INT + SIZE_CHAR + SIZE_CHAR; // length + '[' + ']'
        total += value.iter().map(|v| self.inner.dynamic_size(v)).sum::<usize>();
        if n > 1 {
            total += (n - 1) * SEP_SIZE;
        }
        total
    }

    async fn read(&self, cursor: &mut dyn Cursor) -> Result<Vec<S::Value>> {
        let len = encoding::decode_int(cursor).await?;
        let len = usize::try_from(len)
            .map_err(|_| PickleError::Decode(format!("negative array length {len}")))?;
        encoding::expect_array_start(cursor).await?;
        let mut values = Vec::with_capacity(len);
        for i in 0..len {
            if i > 0 {
                encoding::expect_property_sep(cursor).await?;
            }
            values.push(self.inner.read(cursor).await?);
        }
        encoding::expect_array_end(cursor).await?;
        Ok(values)
    }

    async fn write(&self, cursor: &mut dyn Cursor, value: &Vec<S::Value>) -> Result<()> {
        let len = i32::try_from(value.len())
            .map_err(|_| PickleError::InvalidArgument("array too long to encode".into()))?;
        encoding::encode_int(cursor, len).await?;
        encoding::write_array_start(cursor).await?;
        for (i, v) in value.iter().enumerate() {
            if i > 0 {
                encoding::write_property_sep(cursor).await?;
            }
            self.inner.write(cursor, v).await?;
        }
        encoding::write_array_end(cursor).await
    }
}

/// A fixed-length array of exactly `N` `S` values, otherwise encoded
/// identically to [`InlineArray`]. `write` fails
/// [`PickleError::InvalidArgument`] if the value's length is not `N`.
///
/// `is_fixed_size` always reports `true`, matching the specification
/// literally; this is only a meaningful invariant for a
/// [`crate::table::Table`] fixed layout when `S` is itself fixed size; a
/// `FixedSizeInlineArray` of a variable-size inner schema (e.g.
/// `String`) has a per-value byte size that still depends on the
/// values, and such a schema should only be used with
/// `Table::variable`.
pub struct FixedSizeInlineArray<S: Schema> {
    inner: S,
    len: usize,
}

impl<S: Schema> FixedSizeInlineArray<S> {
    pub fn new(inner: S, len: usize) -> Self {
        FixedSizeInlineArray { inner, len }
    }
}

#[async_trait]
impl<S: Schema> Schema for FixedSizeInlineArray<S> {
    type Value = Vec<S::Value>;

    fn is_fixed_size(&self) -> bool {
        true
    }

    fn dynamic_size(&self, value: &Vec<S::Value>) -> usize {
        let n = value.len();
        let mut total = SIZE_INT + SIZE_CHAR + SIZE_CHAR;
        total += value.iter().map(|v| self.inner.dynamic_size(v)).sum::<usize>();
        if n > 1 {
            total += (n - 1) * SEP_SIZE;
        }
        total
    }

    async fn read(&self, cursor: &mut dyn Cursor) -> Result<Vec<S::Value>> {
        let len = encoding::decode_int(cursor).await?;
        let len = usize::try_from(len)
            .map_err(|_| PickleError::Decode(format!("negative array length {len}")))?;
        if len != self.len {
            return Err(PickleError::Decode(format!(
                "expected fixed-size array of length {}, found {len}",
                self.len
            )));
        }
        encoding::expect_array_start(cursor).await?;
        let mut values = Vec::with_capacity(len);
        for i in 0..len {
            if i > 0 {
                encoding::expect_property_sep(cursor).await?;
            }
            values.push(self.inner.read(cursor).await?);
        }
        encoding::expect_array_end(cursor).await?;
        Ok(values)
    }

    async fn write(&self, cursor: &mut dyn Cursor, value: &Vec<S::Value>) -> Result<()> {
        if value.len() != self.len {
            return Err(PickleError::InvalidArgument(format!(
                "fixed-size array expects {} elements, got {}",
                self.len,
                value.len()
            )));
        }
        let len = i32::try_from(value.len()).unwrap();
        encoding::encode_int(cursor, len).await?;
        encoding::write_array_start(cursor).await?;
        for (i, v) in value.iter().enumerate() {
            if i > 0 {
                encoding::write_property_sep(cursor).await?;
            }
            self.inner.write(cursor, v).await?;
        }
        encoding::write_array_end(cursor).await
    }
}

/// Meaningful only when `S` is itself fixed size (see the struct's
/// docstring); `default_value` is `len` copies of `inner`'s default.
impl<S: Schema + FixedDefault> FixedDefault for FixedSizeInlineArray<S> {
    fn default_value(&self) -> Vec<S::Value> {
        (0..self.len).map(|_| self.inner.default_value()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::mem_cursor::MemCursor;

    async fn round_trip<S: Schema>(schema: &S, value: &S::Value) -> S::Value
    where
        S::Value: PartialEq + std::fmt::Debug,
    {
        let mut c = MemCursor::default();
        schema.write(&mut c, value).await.unwrap();
        assert_eq!(c.bytes.len(), schema.dynamic_size(value));
        c.pos = 0;
        schema.read(&mut c).await.unwrap()
    }

    #[tokio::test]
    async fn long_schema_round_trips() {
        let schema = Int64Schema;
        for v in [43i64, -12, i64::MIN] {
            assert_eq!(round_trip(&schema, &v).await, v);
        }
    }

    #[tokio::test]
    async fn tuple2_long_string_round_trips() {
        let schema = Tuple2::new(Int64Schema, StringSchema);
        let cases = [
            (-12i64, "Dans le port d'Amsterdam".to_string()),
            (i64::MIN, "Y a des marins qui chantent".to_string()),
        ];
        for (a, b) in cases {
            let got = round_trip(&schema, &(a, b.clone())).await;
            assert_eq!(got, (a, b));
        }
    }

    #[tokio::test]
    async fn tuple_is_fixed_size_iff_all_children_are() {
        let fixed = Tuple2::new(Int32Schema, Int64Schema);
        assert!(fixed.is_fixed_size());
        let variable = Tuple2::new(Int32Schema, StringSchema);
        assert!(!variable.is_fixed_size());
    }

    #[tokio::test]
    async fn tuple7_round_trips() {
        let schema = Tuple7::new(
            ByteSchema,
            Int32Schema,
            Int64Schema,
            ByteSchema,
            Int32Schema,
            Int64Schema,
            StringSchema,
        );
        let value = (1u8, 2i32, 3i64, 4u8, 5i32, 6i64, "seven".to_string());
        assert_eq!(round_trip(&schema, &value).await, value);
    }

    #[tokio::test]
    async fn inline_array_round_trips_and_rejects_wrong_fixed_length() {
        let inner = Int32Schema;
        let array = InlineArray::new(inner);
        let value = vec![1, 2, 3, 4];
        assert_eq!(round_trip(&array, &value).await, value);
        assert!(!array.is_fixed_size());

        let fixed = FixedSizeInlineArray::new(Int32Schema, 4);
        assert_eq!(round_trip(&fixed, &value).await, value);
        assert!(fixed.is_fixed_size());

        let mut c = MemCursor::default();
        let err = fixed.write(&mut c, &vec![1, 2]).await.unwrap_err();
        assert!(matches!(err, PickleError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_array_has_no_separators() {
        let array = InlineArray::new(Int32Schema);
        let value: Vec<i32> = vec![];
        assert_eq!(array.dynamic_size(&value), SIZE_INT + SIZE_CHAR + SIZE_CHAR);
        assert_eq!(round_trip(&array, &value).await, value);
    }
}
