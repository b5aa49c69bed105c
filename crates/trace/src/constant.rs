//! The table of constant values captured while tracing.
//!
//! Entries are keyed by [`ConstantId`], which stands in for the _identity_ of
//! the captured object in the host runtime. Two entries with equal contents are
//! still distinct constants, while a single entry referenced from several
//! places (including from inside other entries via [`ConstantValue::Ref`]) is
//! one constant that happens to be used many times.

use std::{collections::BTreeSet, sync::Arc};

use graft_errors::trace::{Error, Result};

use crate::types::{ScalarType, SourceType};

/// The identity of an entry in the [`ConstantTable`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConstantId(pub u32);

impl std::fmt::Display for ConstantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "const#{}", self.0)
    }
}

/// A captured value together with the static type the host runtime recorded
/// for it.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub ty:    SourceType,
    pub value: ConstantValue,
}

/// The payload of a captured constant.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantValue {
    /// The absent value, used both for `None` and for an empty optional.
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),

    /// A device specifier such as `cpu` or `cuda:0`.
    Device(String),

    Tensor(TensorData),
    List(Vec<ConstantValue>),
    Tuple(Vec<ConstantValue>),

    /// A runtime dictionary with string keys, in the host's insertion order.
    Dict(Vec<(String, ConstantValue)>),

    /// An instance of a user-defined aggregate, with its fields in the order
    /// the host reported them.
    Object(Vec<(String, ConstantValue)>),

    /// A reference to the function with the provided name.
    Function(String),

    /// Another entry of the same table, shared by identity.
    Ref(ConstantId),
}

impl ConstantValue {
    /// Gets the entries referred to by [`ConstantValue::Ref`] anywhere inside
    /// this value, in the order they occur.
    #[must_use]
    pub fn references(&self) -> Vec<ConstantId> {
        let mut refs = Vec::new();
        let mut pending = vec![self];
        while let Some(value) = pending.pop() {
            match value {
                Self::Ref(id) => refs.push(*id),
                Self::List(elems) | Self::Tuple(elems) => pending.extend(elems.iter().rev()),
                Self::Dict(entries) | Self::Object(entries) => {
                    pending.extend(entries.iter().rev().map(|(_, v)| v));
                }
                _ => (),
            }
        }
        refs
    }
}

/// The contents of a captured tensor.
///
/// The element bytes are stored little-endian and densely packed in row-major
/// order. The buffer is reference counted so that the importer can hand it to
/// the IR without copying it.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorData {
    dtype: ScalarType,
    shape: Vec<u64>,
    data:  Arc<[u8]>,
}

impl TensorData {
    /// Constructs a tensor with the provided element type and shape over the
    /// bytes in `data`.
    ///
    /// # Errors
    ///
    /// - [`Error::TensorSizeMismatch`] if `data` does not contain exactly the
    ///   number of bytes that `shape` and `dtype` describe.
    /// - [`Error::TensorTooLarge`] if that number of bytes does not fit in a
    ///   `usize`.
    pub fn new(dtype: ScalarType, shape: Vec<u64>, data: impl Into<Arc<[u8]>>) -> Result<Self> {
        let data = data.into();
        let Some(expected) = Self::byte_size_of(dtype, &shape) else {
            return Err(Error::TensorTooLarge(shape));
        };
        if data.len() != expected {
            Err(Error::TensorSizeMismatch {
                expected,
                actual: data.len(),
            })?;
        }

        Ok(Self { dtype, shape, data })
    }

    /// Constructs a `float32` tensor from `values`.
    ///
    /// # Errors
    ///
    /// - [`Error::TensorSizeMismatch`] if the number of `values` does not match
    ///   the element count of `shape`.
    pub fn from_f32(shape: Vec<u64>, values: &[f32]) -> Result<Self> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ScalarType::Float32, shape, bytes)
    }

    /// Constructs an `int64` tensor from `values`.
    ///
    /// # Errors
    ///
    /// - [`Error::TensorSizeMismatch`] if the number of `values` does not match
    ///   the element count of `shape`.
    pub fn from_i64(shape: Vec<u64>, values: &[i64]) -> Result<Self> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ScalarType::Int64, shape, bytes)
    }

    #[must_use]
    pub fn dtype(&self) -> ScalarType {
        self.dtype
    }

    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Gets a shared handle to the element bytes.
    #[must_use]
    pub fn data(&self) -> Arc<[u8]> {
        self.data.clone()
    }

    /// Gets the number of elements in the tensor.
    #[must_use]
    pub fn element_count(&self) -> u64 {
        // Construction has already checked that the count fits.
        Self::element_count_of(&self.shape).unwrap_or(u64::MAX)
    }

    /// Gets the number of bytes in the tensor's payload.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Gets the number of elements described by `shape`, or [`None`] if it
    /// overflows. Any zero extent makes the tensor empty, wherever it appears.
    fn element_count_of(shape: &[u64]) -> Option<u64> {
        if shape.contains(&0) {
            return Some(0);
        }
        shape.iter().try_fold(1u64, |count, extent| count.checked_mul(*extent))
    }

    fn byte_size_of(dtype: ScalarType, shape: &[u64]) -> Option<usize> {
        let elements = usize::try_from(Self::element_count_of(shape)?).ok()?;
        elements.checked_mul(dtype.byte_width())
    }
}

/// The shared, read-only table of constants captured for a program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstantTable {
    entries: Vec<Constant>,
}

impl ConstantTable {
    /// Creates a new, empty, constant table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new constant with type `ty` and contents `value` to the table,
    /// returning its identity.
    ///
    /// This never deduplicates: inserting an equal value twice produces two
    /// distinct constants.
    pub fn insert(&mut self, ty: SourceType, value: ConstantValue) -> ConstantId {
        let id = ConstantId(u32::try_from(self.entries.len()).unwrap_or(u32::MAX));
        self.entries.push(Constant { ty, value });
        id
    }

    /// Gets the constant with identity `id`, if it exists.
    #[must_use]
    pub fn get(&self, id: ConstantId) -> Option<&Constant> {
        self.entries.get(id.0 as usize)
    }

    /// Gets the number of constants in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Gets every entry in `roots` together with every entry reachable from
    /// them through [`ConstantValue::Ref`]s.
    ///
    /// Identities that are not in the table are kept but not followed.
    #[must_use]
    pub fn closure(&self, roots: impl IntoIterator<Item = ConstantId>) -> BTreeSet<ConstantId> {
        let mut reached = BTreeSet::new();
        let mut pending: Vec<_> = roots.into_iter().collect();
        while let Some(id) = pending.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(constant) = self.get(id) {
                pending.extend(constant.value.references());
            }
        }
        reached
    }

    /// Iterates over the table's entries in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (ConstantId, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(ix, c)| (ConstantId(u32::try_from(ix).unwrap_or(u32::MAX)), c))
    }
}

#[cfg(test)]
mod test {
    use graft_errors::trace::Error;

    use crate::{
        constant::{ConstantId, ConstantTable, ConstantValue, TensorData},
        types::{ScalarType, SourceType},
    };

    #[test]
    fn tensor_payload_must_match_shape() {
        assert_eq!(
            TensorData::new(ScalarType::Float32, vec![2, 2], vec![0u8; 12]),
            Err(Error::TensorSizeMismatch {
                expected: 16,
                actual:   12,
            })
        );
        assert!(TensorData::new(ScalarType::Int8, vec![3], vec![1u8, 2, 3]).is_ok());
    }

    #[test]
    fn oversized_shapes_are_rejected() {
        assert_eq!(
            TensorData::new(ScalarType::Float32, vec![u64::MAX, 2], vec![]),
            Err(Error::TensorTooLarge(vec![u64::MAX, 2]))
        );
        assert_eq!(
            TensorData::new(ScalarType::Int64, vec![u64::MAX / 4], vec![]),
            Err(Error::TensorTooLarge(vec![u64::MAX / 4]))
        );
    }

    #[test]
    fn zero_extents_make_empty_tensors() -> anyhow::Result<()> {
        let empty = TensorData::new(ScalarType::Float32, vec![u64::MAX, 2, 0], vec![])?;
        assert_eq!(empty.element_count(), 0);
        assert_eq!(empty.byte_len(), 0);
        Ok(())
    }

    #[test]
    fn typed_constructors_pack_little_endian() -> anyhow::Result<()> {
        let tensor = TensorData::from_i64(vec![2], &[1, -1])?;
        assert_eq!(tensor.byte_len(), 16);
        assert_eq!(tensor.data()[0], 1);
        assert_eq!(tensor.data()[8], 0xff);
        assert_eq!(tensor.element_count(), 2);

        let scalar = TensorData::from_f32(vec![], &[1.5])?;
        assert_eq!(scalar.element_count(), 1);
        assert_eq!(&scalar.data()[..], &1.5f32.to_le_bytes());

        Ok(())
    }

    #[test]
    fn equal_values_get_distinct_identities() {
        let mut table = ConstantTable::new();
        let a = table.insert(SourceType::Int, ConstantValue::Int(3));
        let b = table.insert(SourceType::Int, ConstantValue::Int(3));

        assert_ne!(a, b);
        assert_eq!(table.get(a), table.get(b));
        assert_eq!(table.len(), 2);
        assert_eq!(table.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn references_are_found_in_nested_values() {
        let value = ConstantValue::Tuple(vec![
            ConstantValue::Ref(ConstantId(4)),
            ConstantValue::List(vec![ConstantValue::Int(1), ConstantValue::Ref(ConstantId(2))]),
            ConstantValue::Object(vec![("w".to_string(), ConstantValue::Ref(ConstantId(7)))]),
        ]);
        assert_eq!(value.references(), vec![ConstantId(4), ConstantId(2), ConstantId(7)]);
        assert!(ConstantValue::Str("x".to_string()).references().is_empty());
    }

    #[test]
    fn closures_follow_references_and_tolerate_cycles() {
        let mut table = ConstantTable::new();
        let leaf = table.insert(SourceType::Int, ConstantValue::Int(1));
        let list = table.insert(
            SourceType::list_of(SourceType::Int),
            ConstantValue::List(vec![ConstantValue::Ref(leaf)]),
        );
        let a = table.insert(SourceType::Int, ConstantValue::Ref(ConstantId(3)));
        let b = table.insert(SourceType::Int, ConstantValue::Ref(a));
        let unrelated = table.insert(SourceType::Int, ConstantValue::Int(2));

        assert_eq!(table.closure([list]).into_iter().collect::<Vec<_>>(), vec![leaf, list]);
        assert_eq!(table.closure([a]).into_iter().collect::<Vec<_>>(), vec![a, b]);
        assert!(!table.closure([list, a]).contains(&unrelated));
    }
}
