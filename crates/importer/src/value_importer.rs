//! The import of captured constant values into IR operations.
//!
//! Every constant that a function uses is materialized by one or more
//! operations that the [`ValueImporter`] collects on the side. The function
//! importer places them at the very start of the function's entry block, which
//! guarantees that they dominate every use, including uses inside nested
//! regions.
//!
//! # Identity
//!
//! Constants are cached by their [`ConstantId`], so importing the same table
//! entry twice yields the same IR value and only one set of operations.
//! Entries that merely look the same are distinct values and are imported
//! separately. The cache is scoped to one function, as IR values do not cross
//! function boundaries. Constants that have to be shared across functions are
//! instead initialized once into a global slot and read from it wherever they
//! are used.
//!
//! # Typing
//!
//! A value is imported against its declared source type, and the two have to
//! agree exactly. Nothing is converted: an `int` value is never accepted where
//! a `float` is declared, and a tensor payload must agree with whatever its
//! declared type says about element type and shape.

use std::collections::{HashMap, HashSet};

use derivative::Derivative;
use graft_errors::import::{Error, Result};
use graft_ir::{
    module::{Attribute, Operation, OperationState, Region, ValueId},
    types::TypeId,
    Module,
};
use graft_trace::{
    constant::{Constant, ConstantId, ConstantTable, ConstantValue, TensorData},
    program::GlobalSlot,
    types::SourceType,
};

use crate::{
    constant::{FIELDS_ATTRIBUTE, SLOT_ATTRIBUTE, VALUE_ATTRIBUTE},
    type_mapper::TypeMapper,
};

/// Imports entries of a program's constant table for use in one function.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ValueImporter<'p> {
    #[derivative(Debug = "ignore")]
    constants: &'p ConstantTable,

    /// The global slot initialized from each constant, which is read instead
    /// of materializing the constant again.
    globals: HashMap<ConstantId, &'p str>,

    /// The payload size at or above which tensors are stored as resources.
    resource_threshold: usize,

    cache:       HashMap<ConstantId, ValueId>,
    in_progress: HashSet<ConstantId>,
    operations:  Vec<Operation>,
}

impl<'p> ValueImporter<'p> {
    /// Creates an importer for entries of `constants`, storing tensor payloads
    /// of at least `resource_threshold` bytes out of line.
    #[must_use]
    pub fn new(constants: &'p ConstantTable, resource_threshold: usize) -> Self {
        Self {
            constants,
            globals: HashMap::new(),
            resource_threshold,
            cache: HashMap::new(),
            in_progress: HashSet::new(),
            operations: Vec::new(),
        }
    }

    /// Makes references to the constants that initialize `globals` read the
    /// corresponding global slot.
    ///
    /// # API Style
    ///
    /// Please note that this API consumes `self` and is hence designed to have
    /// calls chained in the "fluent" API style.
    #[must_use]
    pub fn with_globals(mut self, globals: &'p [GlobalSlot]) -> Self {
        self.globals.extend(globals.iter().map(|g| (g.value, g.name.as_str())));
        self
    }

    /// Gets the IR value already imported for `id`, if any.
    #[must_use]
    pub fn cached(&self, id: ConstantId) -> Option<ValueId> {
        self.cache.get(&id).copied()
    }

    /// Removes and returns the operations materialized so far, in the order in
    /// which they must appear.
    pub fn take_operations(&mut self) -> Vec<Operation> {
        std::mem::take(&mut self.operations)
    }

    /// Imports the constant `id`, returning the IR value that represents it.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedType`] if the declared type of the constant or of
    ///   anything inside it cannot be mapped.
    /// - [`Error::ImportError`] if the value does not match its declared type,
    ///   or refers back to itself.
    /// - [`Error::UnresolvedFunction`] if the value refers to a function that
    ///   has not been declared in `module`.
    /// - [`Error::InternalConsistency`] if `id` is not in the constant table.
    pub fn import_constant(
        &mut self,
        id: ConstantId,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<ValueId> {
        if let Some(value) = self.cached(id) {
            return Ok(value);
        }
        let constant = self.lookup(id)?;

        let value = if let Some(slot) = self.globals.get(&id).copied() {
            self.read_global(slot, &constant.ty, mapper, module)?
        } else {
            if !self.in_progress.insert(id) {
                Err(Error::ImportError(format!("The constant {id} refers to itself")))?;
            }
            let key = format!("const{}", id.0);
            let result = self.import_value(&constant.value, &constant.ty, &key, mapper, module);
            self.in_progress.remove(&id);
            result?
        };

        tracing::trace!(constant = %id, value = %value, "Imported constant");
        self.cache.insert(id, value);
        Ok(value)
    }

    /// Adds the global slot `slot` to `module`, with an initializer region
    /// that materializes the slot's constant.
    ///
    /// The initializer reads every global this importer already knows about,
    /// other than `slot` itself, and shares nothing else with it. Once added,
    /// `slot` is read by all later imports through this importer.
    ///
    /// # Errors
    ///
    /// - Any error of [`Self::import_constant`] for the slot's constant.
    /// - [`Error::InternalConsistency`] if the slot's name is already in use in
    ///   `module`.
    pub fn import_global(
        &mut self,
        slot: &'p GlobalSlot,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<()> {
        let mut initializer = ValueImporter::new(self.constants, self.resource_threshold);
        initializer.globals = self.globals.clone();
        initializer.globals.remove(&slot.value);
        let value = initializer.import_constant(slot.value, mapper, module)?;
        let ty = module.value_type(value).ok_or_else(|| {
            Error::InternalConsistency(format!("The value {value} does not exist"))
        })?;

        let init = module.create_operation(
            OperationState::new("torch.global_slot.init").with_operands(&[value]),
        );
        let mut region = Region::new();
        region.operations = initializer.take_operations();
        region.push(init);

        module
            .add_global(&slot.name, ty, region)
            .map_err(|e| Error::InternalConsistency(e.to_string()))?;
        tracing::debug!(global = %slot.name, "Imported global slot");
        self.globals.insert(slot.value, slot.name.as_str());

        Ok(())
    }

    fn lookup(&self, id: ConstantId) -> Result<&'p Constant> {
        let constants = self.constants;
        constants.get(id).ok_or_else(|| {
            Error::InternalConsistency(format!("The constant {id} is not in the constant table"))
        })
    }

    fn import_value(
        &mut self,
        value: &ConstantValue,
        ty: &SourceType,
        key: &str,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<ValueId> {
        let ir_ty = mapper.map_type(ty, module)?;

        match (value, ty) {
            (ConstantValue::Ref(id), _) => {
                let target = self.lookup(*id)?;
                if target.ty == *ty {
                    self.import_constant(*id, mapper, module)
                } else if matches!(ty, SourceType::Optional(inner) if **inner == target.ty) {
                    let inner = self.import_constant(*id, mapper, module)?;
                    self.wrap_some(inner, ir_ty, module)
                } else {
                    Err(mismatch(value, ty))
                }
            }
            (ConstantValue::None, SourceType::NoneType) => self.emit(
                module,
                OperationState::new("torch.constant.none").with_results(&[ir_ty]),
            ),
            (ConstantValue::None, SourceType::Optional(_)) => self.emit(
                module,
                OperationState::new("torch.optional.none").with_results(&[ir_ty]),
            ),
            (_, SourceType::Optional(inner)) => {
                let inner = self.import_value(value, inner, key, mapper, module)?;
                self.wrap_some(inner, ir_ty, module)
            }
            (ConstantValue::Bool(b), SourceType::Bool) => {
                self.scalar(module, "torch.constant.bool", Attribute::Bool(*b), ir_ty)
            }
            (ConstantValue::Int(i), SourceType::Int) => {
                self.scalar(module, "torch.constant.int", Attribute::Int(*i), ir_ty)
            }
            (ConstantValue::Float(f), SourceType::Float) => {
                self.scalar(module, "torch.constant.float", Attribute::Float(*f), ir_ty)
            }
            (ConstantValue::Str(s), SourceType::Str) => {
                self.scalar(module, "torch.constant.str", Attribute::Str(s.clone()), ir_ty)
            }
            (ConstantValue::Device(d), SourceType::Device) => {
                self.scalar(module, "torch.constant.device", Attribute::Str(d.clone()), ir_ty)
            }
            (ConstantValue::Tensor(data), SourceType::Tensor { .. }) => {
                self.tensor(data, ty, ir_ty, key, module)
            }
            (ConstantValue::List(elems), SourceType::List(elem_ty)) => {
                let operands = elems
                    .iter()
                    .enumerate()
                    .map(|(ix, e)| self.import_value(e, elem_ty, &format!("{key}.{ix}"), mapper, module))
                    .collect::<Result<Vec<_>>>()?;
                self.list(operands, ir_ty, module)
            }
            (ConstantValue::Tuple(elems), SourceType::Tuple(elem_tys)) => {
                if elems.len() != elem_tys.len() {
                    Err(Error::ImportError(format!(
                        "A tuple of {} elements cannot be imported as a value of type `{ty}`",
                        elems.len()
                    )))?;
                }
                let operands = elems
                    .iter()
                    .zip(elem_tys)
                    .enumerate()
                    .map(|(ix, (e, t))| self.import_value(e, t, &format!("{key}.{ix}"), mapper, module))
                    .collect::<Result<Vec<_>>>()?;
                self.list(operands, ir_ty, module)
            }
            (
                ConstantValue::Dict(entries) | ConstantValue::Object(entries),
                SourceType::Record { fields, .. },
            ) => {
                if entries.len() != fields.len() {
                    Err(Error::ImportError(format!(
                        "A value with {} entries cannot be imported as a value of type `{ty}`",
                        entries.len()
                    )))?;
                }

                let mut operands = Vec::with_capacity(fields.len());
                for (name, field_ty) in fields {
                    let Some((_, field)) = entries.iter().find(|(n, _)| n == name) else {
                        return Err(Error::ImportError(format!(
                            "The field `{name}` of `{ty}` has no value"
                        )));
                    };
                    let field_key = format!("{key}.{name}");
                    operands.push(self.import_value(field, field_ty, &field_key, mapper, module)?);
                }

                let names = fields.iter().map(|(n, _)| n.clone()).collect();
                self.emit(
                    module,
                    OperationState::new("torch.prim.StructConstruct")
                        .with_operands(&operands)
                        .with_attribute(FIELDS_ATTRIBUTE, Attribute::Strings(names))
                        .with_results(&[ir_ty]),
                )
            }
            (ConstantValue::Function(name), SourceType::Function { .. }) => {
                let Some(function) = module.function(name) else {
                    return Err(Error::UnresolvedFunction(name.clone()));
                };
                if function.ty != ir_ty {
                    Err(Error::ImportError(format!(
                        "The function `{name}` does not have type `{ty}`"
                    )))?;
                }
                self.emit(
                    module,
                    OperationState::new("func.constant")
                        .with_attribute(VALUE_ATTRIBUTE, Attribute::Symbol(name.clone()))
                        .with_results(&[ir_ty]),
                )
            }
            _ => Err(mismatch(value, ty)),
        }
    }

    fn read_global(
        &mut self,
        slot: &str,
        ty: &SourceType,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<ValueId> {
        let ir_ty = mapper.map_type(ty, module)?;
        self.emit(
            module,
            OperationState::new("torch.global_slot.get")
                .with_attribute(SLOT_ATTRIBUTE, Attribute::Symbol(slot.to_string()))
                .with_results(&[ir_ty]),
        )
    }

    fn scalar(
        &mut self,
        module: &mut Module,
        name: &str,
        attribute: Attribute,
        ty: TypeId,
    ) -> Result<ValueId> {
        self.emit(
            module,
            OperationState::new(name).with_attribute(VALUE_ATTRIBUTE, attribute).with_results(&[ty]),
        )
    }

    fn list(&mut self, elements: Vec<ValueId>, ty: TypeId, module: &mut Module) -> Result<ValueId> {
        self.emit(
            module,
            OperationState::new("torch.prim.ListConstruct")
                .with_operands(&elements)
                .with_results(&[ty]),
        )
    }

    fn wrap_some(&mut self, inner: ValueId, ty: TypeId, module: &mut Module) -> Result<ValueId> {
        self.emit(
            module,
            OperationState::new("torch.optional.some").with_operands(&[inner]).with_results(&[ty]),
        )
    }

    /// Imports a tensor payload, which is shared with the IR rather than
    /// copied.
    fn tensor(
        &mut self,
        data: &TensorData,
        ty: &SourceType,
        ir_ty: TypeId,
        key: &str,
        module: &mut Module,
    ) -> Result<ValueId> {
        let SourceType::Tensor { dtype, shape } = ty else {
            return Err(Error::InternalConsistency(format!(
                "Attempted to import a tensor as a value of type `{ty}`"
            )));
        };

        if dtype.is_some_and(|d| d != data.dtype()) {
            Err(Error::ImportError(format!(
                "A tensor of `{}` elements cannot be imported as a value of type `{ty}`",
                data.dtype()
            )))?;
        }
        if let Some(dims) = shape {
            let agrees = dims.len() == data.shape().len()
                && dims.iter().zip(data.shape()).all(|(dim, actual)| match dim {
                    Some(extent) => extent == actual,
                    None => true,
                });
            if !agrees {
                Err(Error::ImportError(format!(
                    "A tensor of shape {:?} cannot be imported as a value of type `{ty}`",
                    data.shape()
                )))?;
            }
        }

        let expected = usize::try_from(data.element_count())
            .unwrap_or(usize::MAX)
            .saturating_mul(data.dtype().byte_width());
        if data.byte_len() != expected {
            Err(Error::ImportError(format!(
                "A tensor payload holds {} bytes but its shape requires {expected}",
                data.byte_len()
            )))?;
        }

        let payload = data.data();
        let attribute = if payload.len() >= self.resource_threshold {
            Attribute::DenseResource(module.resources.insert(key, payload))
        } else {
            Attribute::Dense(payload)
        };

        self.emit(
            module,
            OperationState::new("torch.tensor.literal")
                .with_attribute(VALUE_ATTRIBUTE, attribute)
                .with_results(&[ir_ty]),
        )
    }

    fn emit(&mut self, module: &mut Module, state: OperationState) -> Result<ValueId> {
        let op = module.create_operation(state);
        let value = op.result().ok_or_else(|| {
            Error::InternalConsistency(format!("`{}` must produce exactly one value", op.name))
        })?;
        tracing::trace!(operation = %op.name, value = %value, "Materialized constant");
        self.operations.push(op);
        Ok(value)
    }
}

fn mismatch(value: &ConstantValue, ty: &SourceType) -> Error {
    Error::ImportError(format!("{} cannot be imported as a value of type `{ty}`", describe(value)))
}

fn describe(value: &ConstantValue) -> &'static str {
    match value {
        ConstantValue::None => "`None`",
        ConstantValue::Bool(_) => "A bool",
        ConstantValue::Int(_) => "An int",
        ConstantValue::Float(_) => "A float",
        ConstantValue::Str(_) => "A string",
        ConstantValue::Device(_) => "A device",
        ConstantValue::Tensor(_) => "A tensor",
        ConstantValue::List(_) => "A list",
        ConstantValue::Tuple(_) => "A tuple",
        ConstantValue::Dict(_) => "A dictionary",
        ConstantValue::Object(_) => "An object",
        ConstantValue::Function(_) => "A function reference",
        ConstantValue::Ref(_) => "A reference to another constant",
    }
}
