//! The host runtime's static type descriptors, as recorded on traced values
//! and constants.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use chumsky::{prelude::end, text::TextParser, Parser};
use graft_errors::trace::{Error, Result};
use itertools::Itertools;

use crate::parse;

/// The element types that a tensor in the host runtime can carry.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ScalarType {
    Bool,
    UInt8,
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    BFloat16,
    Float32,
    Float64,
}

impl ScalarType {
    /// Every element type, in declaration order.
    pub const ALL: [ScalarType; 10] = [
        Self::Bool,
        Self::UInt8,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Float16,
        Self::BFloat16,
        Self::Float32,
        Self::Float64,
    ];

    /// Gets the number of bytes that a single element of this type occupies in
    /// a tensor payload.
    #[must_use]
    pub fn byte_width(self) -> usize {
        match self {
            Self::Bool | Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::Float16 | Self::BFloat16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Gets the name used for this element type in type annotation strings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::UInt8 => "uint8",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float16 => "float16",
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl Display for ScalarType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ScalarType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| Error::UnknownScalarType(s.to_string()))
    }
}

/// A representation of the host runtime's static types.
///
/// These are the types as the _runtime_ sees them, and hence they can express
/// things that the target IR cannot (heterogeneous tuples, dictionaries keyed
/// at runtime, the dynamic `Any` type). Deciding what can be represented is the
/// job of the importer's type mapper, not of this type.
///
/// # Value Semantics
///
/// It is intended that this type is used as having value semantics. Two
/// descriptors are the same type exactly when they compare equal.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SourceType {
    Bool,
    Int,
    Float,
    Str,
    NoneType,
    Device,

    /// The dynamic type, which can hold a value of any other type.
    Any,

    /// A tensor with optionally-known element type and optionally-known shape.
    ///
    /// When the shape is known its length is the rank, and each entry is the
    /// extent of that dimension if it is statically known.
    Tensor {
        dtype: Option<ScalarType>,
        shape: Option<Vec<Option<u64>>>,
    },

    List(Box<SourceType>),

    /// A fixed-length sequence whose elements may have different types.
    Tuple(Vec<SourceType>),

    Optional(Box<SourceType>),

    /// A runtime-keyed dictionary. It carries no information about which keys
    /// are present.
    Dict {
        key:   Box<SourceType>,
        value: Box<SourceType>,
    },

    /// A user-defined aggregate with named fields in declaration order.
    Record {
        name:   String,
        fields: Vec<(String, SourceType)>,
    },

    /// A callable value, independent of whether a body is available.
    Function {
        params:  Vec<SourceType>,
        results: Vec<SourceType>,
    },
}

/// Additional utility constructors for creating the compound types without
/// having to manage boxing manually.
impl SourceType {
    /// Builds a tensor type of unknown rank and element type.
    #[must_use]
    pub fn tensor() -> Self {
        Self::Tensor {
            dtype: None,
            shape: None,
        }
    }

    /// Builds a tensor type with the provided element type and shape, where a
    /// [`None`] extent is a dimension that is not statically known.
    #[must_use]
    pub fn ranked_tensor(dtype: ScalarType, shape: &[Option<u64>]) -> Self {
        Self::Tensor {
            dtype: Some(dtype),
            shape: Some(shape.to_vec()),
        }
    }

    #[must_use]
    pub fn list_of(elem: SourceType) -> Self {
        Self::List(Box::new(elem))
    }

    #[must_use]
    pub fn optional_of(inner: SourceType) -> Self {
        Self::Optional(Box::new(inner))
    }

    #[must_use]
    pub fn dict_of(key: SourceType, value: SourceType) -> Self {
        Self::Dict {
            key:   Box::new(key),
            value: Box::new(value),
        }
    }

    /// Creates a record type called `name` with the provided `fields` in
    /// declaration order.
    #[must_use]
    pub fn record(name: &str, fields: &[(&str, SourceType)]) -> Self {
        Self::Record {
            name:   name.to_string(),
            fields: fields
                .iter()
                .map(|(n, t)| ((*n).to_string(), t.clone()))
                .collect(),
        }
    }

    /// Creates a function type from the provided `params` and `results`.
    #[must_use]
    pub fn function(params: &[SourceType], results: &[SourceType]) -> Self {
        Self::Function {
            params:  params.to_vec(),
            results: results.to_vec(),
        }
    }

    /// Returns `true` if `self` is a type without any component types.
    #[must_use]
    pub fn is_prim(&self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::Float | Self::Str | Self::NoneType | Self::Device | Self::Any
        )
    }
}

/// Renders the type using the same syntax that [`SourceType::from_str`]
/// accepts, so that the two round-trip.
impl Display for SourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Str => write!(f, "str"),
            Self::NoneType => write!(f, "NoneType"),
            Self::Device => write!(f, "Device"),
            Self::Any => write!(f, "Any"),
            Self::Tensor { dtype, shape } => {
                let dtype_str = dtype.map_or("*".to_string(), |d| d.to_string());
                match (dtype, shape) {
                    (None, None) => write!(f, "Tensor"),
                    (Some(_), None) => write!(f, "Tensor<{dtype_str}>"),
                    (_, Some(dims)) => {
                        let dims_str = dims
                            .iter()
                            .map(|d| d.map_or("?".to_string(), |e| e.to_string()))
                            .join(", ");
                        write!(f, "Tensor<{dtype_str}, [{dims_str}]>")
                    }
                }
            }
            Self::List(elem) => write!(f, "List[{elem}]"),
            Self::Tuple(elems) => write!(f, "Tuple[{}]", elems.iter().join(", ")),
            Self::Optional(inner) => write!(f, "Optional[{inner}]"),
            Self::Dict { key, value } => write!(f, "Dict[{key}, {value}]"),
            Self::Record { name, fields } => {
                let fields_str = fields.iter().map(|(n, t)| format!("{n}: {t}")).join(", ");
                write!(f, "{name}{{{fields_str}}}")
            }
            Self::Function { params, results } => {
                let params_str = params.iter().join(", ");
                if results.len() == 1 {
                    write!(f, "Callable[[{params_str}], {}]", results[0])
                } else {
                    write!(f, "Callable[[{params_str}], ({})]", results.iter().join(", "))
                }
            }
        }
    }
}

/// Parses a host runtime type annotation string.
///
/// ```
/// use graft_trace::types::{ScalarType, SourceType};
///
/// let ty: SourceType = "Optional[Tensor<float32, [2, ?]>]".parse().unwrap();
/// assert_eq!(
///     ty,
///     SourceType::optional_of(SourceType::ranked_tensor(ScalarType::Float32, &[Some(2), None]))
/// );
/// ```
impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse::source_type()
            .padded()
            .then_ignore(end())
            .parse(s)
            .map_err(|errors| {
                Error::InvalidTypeString(s.to_string(), errors.iter().map(ToString::to_string).join("; "))
            })
    }
}

impl TryFrom<&str> for SourceType {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::from_str(value)
    }
}

#[cfg(test)]
mod test {
    use crate::types::{ScalarType, SourceType};

    #[test]
    fn scalar_types_know_their_widths() {
        assert_eq!(ScalarType::Bool.byte_width(), 1);
        assert_eq!(ScalarType::BFloat16.byte_width(), 2);
        assert_eq!(ScalarType::Float32.byte_width(), 4);
        assert_eq!(ScalarType::Int64.byte_width(), 8);
    }

    #[test]
    fn scalar_type_names_round_trip() {
        for t in ScalarType::ALL {
            assert_eq!(t.name().parse::<ScalarType>(), Ok(t));
        }
        assert!("float".parse::<ScalarType>().is_err());
    }

    #[test]
    fn display_round_trips_through_parsing() -> anyhow::Result<()> {
        let types = vec![
            SourceType::Int,
            SourceType::tensor(),
            SourceType::Tensor {
                dtype: None,
                shape: Some(vec![Some(3), None]),
            },
            SourceType::ranked_tensor(ScalarType::Float16, &[]),
            SourceType::list_of(SourceType::optional_of(SourceType::Float)),
            SourceType::Tuple(vec![SourceType::Int, SourceType::Str]),
            SourceType::Tuple(vec![]),
            SourceType::dict_of(SourceType::Str, SourceType::tensor()),
            SourceType::record(
                "__torch__.Point",
                &[("x", SourceType::Float), ("y", SourceType::Float)],
            ),
            SourceType::function(&[SourceType::Int], &[SourceType::Bool]),
            SourceType::function(&[], &[SourceType::Int, SourceType::Int]),
            SourceType::function(&[SourceType::Int], &[]),
        ];

        for ty in types {
            let rendered = ty.to_string();
            let parsed: SourceType = rendered.parse()?;
            assert_eq!(parsed, ty, "{rendered} did not round-trip");
        }

        Ok(())
    }

    #[test]
    fn primitive_classification() {
        assert!(SourceType::Device.is_prim());
        assert!(!SourceType::tensor().is_prim());
        assert!(!SourceType::list_of(SourceType::Int).is_prim());
    }
}
