//! The mapping from the host runtime's types to IR types.
//!
//! The mapping is fixed and exact. Every source type either has a single,
//! faithful IR counterpart or is rejected with
//! [`Error::UnsupportedType`] naming it, and nothing is ever coerced into a
//! "close enough" type. In particular:
//!
//! - Scalars map to the IR scalar of the same kind, with no widening or
//!   narrowing.
//! - Tensors keep their rank and extents exactly, with extents that are not
//!   known statically becoming [`Dim::Dynamic`].
//! - Tuples map to lists only when all of their elements have the same type,
//!   as the IR has no heterogeneous sequence type.
//! - Records map to structs field by field, while dictionaries (which carry no
//!   declared fields) and the dynamic `Any` type cannot be represented.
//! - Function types map to signatures whether or not a body exists for them.
//!
//! Since types are interned per module, a mapper must only ever be used with
//! the one module it was created for.

use std::collections::{HashMap, HashSet};

use graft_errors::import::{Error, Result};
use graft_ir::{
    types::{Dim, ElementType, TypeId, TypeKind},
    Module,
};
use graft_trace::types::{ScalarType, SourceType};

/// Maps source types to IR types, caching the results.
#[derive(Clone, Debug, Default)]
pub struct TypeMapper {
    cache: HashMap<SourceType, TypeId>,
}

impl TypeMapper {
    /// Creates a new mapper with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `ty` to the equivalent IR type in `module`.
    ///
    /// Repeated calls with equal source types return the same [`TypeId`].
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedType`] naming the offending (possibly nested)
    ///   source type if `ty` has no representation in the IR.
    pub fn map_type(&mut self, ty: &SourceType, module: &mut Module) -> Result<TypeId> {
        if let Some(id) = self.cache.get(ty) {
            return Ok(*id);
        }

        let kind = match ty {
            SourceType::Bool => TypeKind::Bool,
            SourceType::Int => TypeKind::Int,
            SourceType::Float => TypeKind::Float,
            SourceType::Str => TypeKind::Str,
            SourceType::NoneType => TypeKind::None,
            SourceType::Device => TypeKind::Device,
            SourceType::Any | SourceType::Dict { .. } => Err(unsupported(ty))?,
            SourceType::Tensor { dtype, shape } => TypeKind::Tensor {
                dtype: dtype.map(element_type),
                shape: shape.as_ref().map(|dims| {
                    dims.iter()
                        .map(|d| d.map_or(Dim::Dynamic, Dim::Static))
                        .collect()
                }),
            },
            SourceType::List(elem) => TypeKind::List(self.map_type(elem, module)?),
            SourceType::Tuple(elems) => match elems.split_first() {
                Some((first, rest)) if rest.iter().all(|e| e == first) => {
                    TypeKind::List(self.map_type(first, module)?)
                }
                _ => Err(unsupported(ty))?,
            },
            SourceType::Optional(inner) => TypeKind::Optional(self.map_type(inner, module)?),
            SourceType::Record { name, fields } => {
                let mut seen = HashSet::new();
                if !fields.iter().all(|(n, _)| seen.insert(n.as_str())) {
                    Err(unsupported(ty))?;
                }
                let fields = fields
                    .iter()
                    .map(|(n, t)| Ok((n.clone(), self.map_type(t, module)?)))
                    .collect::<Result<Vec<_>>>()?;
                TypeKind::Struct {
                    name: name.clone(),
                    fields,
                }
            }
            SourceType::Function { params, results } => TypeKind::Function {
                inputs:  self.map_types(params, module)?,
                results: self.map_types(results, module)?,
            },
        };

        let id = module.types.intern(kind);
        self.cache.insert(ty.clone(), id);
        Ok(id)
    }

    /// Maps each of `types` in order.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedType`] for the first of `types` that cannot be
    ///   mapped.
    pub fn map_types(&mut self, types: &[SourceType], module: &mut Module) -> Result<Vec<TypeId>> {
        types.iter().map(|t| self.map_type(t, module)).collect()
    }

    /// Maps the signature of a function taking `params` and returning
    /// `results` to an IR function type.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedType`] if any parameter or result type cannot be
    ///   mapped.
    pub fn map_signature(
        &mut self,
        params: &[SourceType],
        results: &[SourceType],
        module: &mut Module,
    ) -> Result<TypeId> {
        let kind = TypeKind::Function {
            inputs:  self.map_types(params, module)?,
            results: self.map_types(results, module)?,
        };
        Ok(module.types.intern(kind))
    }

    /// Recovers the source type that maps to the IR type `id`.
    ///
    /// Because homogeneous tuples and lists share their IR representation, an
    /// IR list always maps back to a [`SourceType::List`]. Returns [`None`] if
    /// `id` is not a type of `module`.
    #[must_use]
    pub fn source_type_of(id: TypeId, module: &Module) -> Option<SourceType> {
        let ty = match module.types.get(id)? {
            TypeKind::Bool => SourceType::Bool,
            TypeKind::Int => SourceType::Int,
            TypeKind::Float => SourceType::Float,
            TypeKind::Str => SourceType::Str,
            TypeKind::None => SourceType::NoneType,
            TypeKind::Device => SourceType::Device,
            TypeKind::Tensor { dtype, shape } => SourceType::Tensor {
                dtype: dtype.map(scalar_type),
                shape: shape.as_ref().map(|dims| {
                    dims.iter()
                        .map(|d| match d {
                            Dim::Static(extent) => Some(*extent),
                            Dim::Dynamic => None,
                        })
                        .collect()
                }),
            },
            TypeKind::List(elem) => SourceType::list_of(Self::source_type_of(*elem, module)?),
            TypeKind::Optional(inner) => {
                SourceType::optional_of(Self::source_type_of(*inner, module)?)
            }
            TypeKind::Struct { name, fields } => SourceType::Record {
                name:   name.clone(),
                fields: fields
                    .iter()
                    .map(|(n, t)| Some((n.clone(), Self::source_type_of(*t, module)?)))
                    .collect::<Option<Vec<_>>>()?,
            },
            TypeKind::Function { inputs, results } => SourceType::Function {
                params:  inputs
                    .iter()
                    .map(|t| Self::source_type_of(*t, module))
                    .collect::<Option<Vec<_>>>()?,
                results: results
                    .iter()
                    .map(|t| Self::source_type_of(*t, module))
                    .collect::<Option<Vec<_>>>()?,
            },
        };

        Some(ty)
    }
}

fn unsupported(ty: &SourceType) -> Error {
    Error::UnsupportedType(ty.to_string())
}

/// Gets the IR element type for the host element type `scalar`.
#[must_use]
pub fn element_type(scalar: ScalarType) -> ElementType {
    match scalar {
        ScalarType::Bool => ElementType::I1,
        ScalarType::UInt8 => ElementType::UI8,
        ScalarType::Int8 => ElementType::SI8,
        ScalarType::Int16 => ElementType::SI16,
        ScalarType::Int32 => ElementType::SI32,
        ScalarType::Int64 => ElementType::SI64,
        ScalarType::Float16 => ElementType::F16,
        ScalarType::BFloat16 => ElementType::BF16,
        ScalarType::Float32 => ElementType::F32,
        ScalarType::Float64 => ElementType::F64,
    }
}

/// Gets the host element type for the IR element type `element`.
#[must_use]
pub fn scalar_type(element: ElementType) -> ScalarType {
    match element {
        ElementType::I1 => ScalarType::Bool,
        ElementType::UI8 => ScalarType::UInt8,
        ElementType::SI8 => ScalarType::Int8,
        ElementType::SI16 => ScalarType::Int16,
        ElementType::SI32 => ScalarType::Int32,
        ElementType::SI64 => ScalarType::Int64,
        ElementType::F16 => ScalarType::Float16,
        ElementType::BF16 => ScalarType::BFloat16,
        ElementType::F32 => ScalarType::Float32,
        ElementType::F64 => ScalarType::Float64,
    }
}

#[cfg(test)]
mod test {
    use graft_errors::import::Error;
    use graft_ir::{
        types::{Dim, ElementType, TypeKind},
        Module,
    };
    use graft_trace::types::{ScalarType, SourceType};

    use crate::type_mapper::{element_type, scalar_type, TypeMapper};

    #[test]
    fn repeated_mapping_is_ir_equal() -> anyhow::Result<()> {
        let mut module = Module::new("m");
        let mut mapper = TypeMapper::new();
        let ty: SourceType = "List[Optional[Tensor<float32, [2, ?]>]]".parse()?;

        let first = mapper.map_type(&ty, &mut module)?;
        let second = mapper.map_type(&ty, &mut module)?;
        let fresh = TypeMapper::new().map_type(&ty, &mut module)?;

        assert_eq!(first, second);
        assert_eq!(first, fresh);
        Ok(())
    }

    #[test]
    fn tensors_keep_rank_and_extents() -> anyhow::Result<()> {
        let mut module = Module::new("m");
        let mut mapper = TypeMapper::new();
        let ty = SourceType::ranked_tensor(ScalarType::Int64, &[Some(3), None, Some(1)]);
        let id = mapper.map_type(&ty, &mut module)?;

        assert_eq!(
            module.types.get(id),
            Some(&TypeKind::Tensor {
                dtype: Some(ElementType::SI64),
                shape: Some(vec![Dim::Static(3), Dim::Dynamic, Dim::Static(1)]),
            })
        );
        Ok(())
    }

    #[test]
    fn homogeneous_tuples_become_lists() -> anyhow::Result<()> {
        let mut module = Module::new("m");
        let mut mapper = TypeMapper::new();
        let tuple = mapper.map_type(&SourceType::Tuple(vec![SourceType::Int; 3]), &mut module)?;
        let list = mapper.map_type(&SourceType::list_of(SourceType::Int), &mut module)?;

        assert_eq!(tuple, list);
        Ok(())
    }

    #[test]
    fn unrepresentable_types_are_rejected_by_name() {
        let mut module = Module::new("m");
        let mut mapper = TypeMapper::new();

        let heterogeneous = SourceType::Tuple(vec![SourceType::Int, SourceType::Str]);
        assert_eq!(
            mapper.map_type(&heterogeneous, &mut module),
            Err(Error::UnsupportedType("Tuple[int, str]".to_string()))
        );
        assert_eq!(
            mapper.map_type(&SourceType::Tuple(vec![]), &mut module),
            Err(Error::UnsupportedType("Tuple[]".to_string()))
        );
        assert_eq!(
            mapper.map_type(
                &SourceType::dict_of(SourceType::Str, SourceType::Int),
                &mut module
            ),
            Err(Error::UnsupportedType("Dict[str, int]".to_string()))
        );
        assert_eq!(
            mapper.map_type(&SourceType::list_of(SourceType::Any), &mut module),
            Err(Error::UnsupportedType("Any".to_string()))
        );

        let duplicate_fields = SourceType::record("P", &[("x", SourceType::Int), ("x", SourceType::Int)]);
        assert!(mapper.map_type(&duplicate_fields, &mut module).is_err());
    }

    #[test]
    fn records_and_functions_map_structurally() -> anyhow::Result<()> {
        let mut module = Module::new("m");
        let mut mapper = TypeMapper::new();
        let record = SourceType::record(
            "__torch__.Point",
            &[("x", SourceType::Float), ("y", SourceType::Float)],
        );
        let func = SourceType::function(&[record.clone()], &[SourceType::Float]);

        let record_id = mapper.map_type(&record, &mut module)?;
        let func_id = mapper.map_type(&func, &mut module)?;
        let float = module.types.float();

        assert_eq!(
            module.types.get(record_id),
            Some(&TypeKind::Struct {
                name:   "__torch__.Point".to_string(),
                fields: vec![("x".to_string(), float), ("y".to_string(), float)],
            })
        );
        assert_eq!(
            mapper.map_signature(&[record.clone()], &[SourceType::Float], &mut module)?,
            func_id
        );
        Ok(())
    }

    #[test]
    fn inverse_mapping_recovers_source_types() -> anyhow::Result<()> {
        let mut module = Module::new("m");
        let mut mapper = TypeMapper::new();
        let types = [
            "Tensor<bfloat16, [?, 4]>",
            "Optional[List[int]]",
            "a.B{x: str, y: Device}",
            "Callable[[bool, None], (float, Tensor)]",
        ];

        for text in types {
            let ty: SourceType = text.parse()?;
            let id = mapper.map_type(&ty, &mut module)?;
            assert_eq!(TypeMapper::source_type_of(id, &module), Some(ty));
        }
        Ok(())
    }

    #[test]
    fn element_types_round_trip() {
        for scalar in ScalarType::ALL {
            assert_eq!(scalar_type(element_type(scalar)), scalar);
            assert_eq!(element_type(scalar).byte_width(), scalar.byte_width());
        }
    }
}
