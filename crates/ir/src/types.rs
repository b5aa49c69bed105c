//! The type system of the IR.
//!
//! Types are structural, but they are always handled through a [`TypeId`]
//! obtained by interning a [`TypeKind`] in a module's
//! [`crate::intern::TypeTable`]. Two types are IR-equal exactly when their ids
//! are equal, so compound types refer to their components by id as well.
//!
//! There is deliberately no heterogeneous sequence type. Aggregates whose
//! components differ in type must be expressed as a [`TypeKind::Struct`] with
//! named fields.

/// A reference to an interned type in a module's type table.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TypeId(pub(crate) usize);

impl From<usize> for TypeId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<TypeId> for usize {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

/// The element types that an IR tensor can carry.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ElementType {
    I1,
    UI8,
    SI8,
    SI16,
    SI32,
    SI64,
    F16,
    BF16,
    F32,
    F64,
}

impl ElementType {
    /// Gets the number of bytes used by one element of this type in a dense
    /// payload.
    #[must_use]
    pub fn byte_width(self) -> usize {
        match self {
            Self::I1 | Self::UI8 | Self::SI8 => 1,
            Self::SI16 | Self::F16 | Self::BF16 => 2,
            Self::SI32 | Self::F32 => 4,
            Self::SI64 | Self::F64 => 8,
        }
    }

    /// Gets the textual name of the element type.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::I1 => "i1",
            Self::UI8 => "ui8",
            Self::SI8 => "si8",
            Self::SI16 => "si16",
            Self::SI32 => "si32",
            Self::SI64 => "si64",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A single dimension of a ranked tensor type.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Dim {
    Static(u64),

    /// A dimension whose extent is not known statically.
    Dynamic,
}

impl std::fmt::Display for Dim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(extent) => write!(f, "{extent}"),
            Self::Dynamic => write!(f, "?"),
        }
    }
}

/// The structure of an IR type.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum TypeKind {
    Bool,
    Int,
    Float,
    Str,

    /// The type of the absent value.
    None,
    Device,

    /// A value-semantic tensor, where [`None`] for either the element type or
    /// the shape means it is not known.
    Tensor {
        dtype: Option<ElementType>,
        shape: Option<Vec<Dim>>,
    },

    /// A homogeneous list of the provided element type.
    List(TypeId),

    /// A value of the provided type that may instead be absent.
    Optional(TypeId),

    /// A named aggregate with named fields in a fixed order.
    Struct {
        name:   String,
        fields: Vec<(String, TypeId)>,
    },

    /// The signature of a function.
    Function {
        inputs:  Vec<TypeId>,
        results: Vec<TypeId>,
    },
}

impl TypeKind {
    /// Returns `true` if the type is one of the scalar types that can be
    /// materialized by a `torch.constant.*` operation.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::Float | Self::Str | Self::None | Self::Device
        )
    }
}
