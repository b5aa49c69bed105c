//! The in-memory representation of an IR module.
//!
//! A [`Module`] is a named container of [`Function`]s and [`Global`]s. Every
//! function body and global initializer is a single-block [`Region`] holding an
//! ordered list of [`Operation`]s, and operations may in turn own nested
//! regions (as for structured control flow).
//!
//! # Values
//!
//! SSA values are allocated in a module-wide arena, and are referred to by
//! [`ValueId`]. Each value records its type and where it was defined, which is
//! either as an argument of a region or as a result of an operation. Values are
//! only ever created through the module, which guarantees that every
//! [`ValueId`] handed out is valid for that module.
//!
//! # Symbols
//!
//! Functions and globals share a single symbol namespace, kept in a
//! bidirectional map from the symbol name to the slot of the function or
//! global it names.

use std::{collections::BTreeMap, sync::Arc};

use bimap::BiMap;
use graft_errors::ir::{Error, Result};

use crate::{
    diagnostic::Location,
    intern::TypeTable,
    types::{TypeId, TypeKind},
};

/// A reference to an SSA value in a module's value arena.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ValueId(pub(crate) u32);

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The identity of an operation within its module.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct OpId(pub(crate) u32);

/// Where an SSA value was defined.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValueDef {
    /// The `index`th argument of a region.
    BlockArgument { index: usize },

    /// The `index`th result of the operation `op`.
    OpResult { op: OpId, index: usize },
}

/// The information stored about every SSA value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ValueData {
    pub ty:  TypeId,
    pub def: ValueDef,
}

/// A handle to an out-of-line blob in a module's [`ResourceTable`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceHandle {
    pub key: String,
}

/// The attribute values that can be attached to operations.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),

    /// A reference to a function or global by symbol name.
    Symbol(String),

    /// An ordered list of strings, such as the field names of a struct.
    Strings(Vec<String>),

    /// Dense element data stored inline. The buffer is shared with whoever
    /// provided it.
    Dense(Arc<[u8]>),

    /// Dense element data stored out-of-line in the module's resources.
    DenseResource(ResourceHandle),
}

impl Attribute {
    /// Gets a short description of the attribute's kind, for use in messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Strings(_) => "string list",
            Self::Dense(_) => "dense elements",
            Self::DenseResource(_) => "dense resource",
        }
    }
}

/// A single IR operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub id:         OpId,
    pub name:       String,
    pub operands:   Vec<ValueId>,
    pub results:    Vec<ValueId>,
    pub attributes: Vec<(String, Attribute)>,
    pub regions:    Vec<Region>,
    pub location:   Option<Location>,
}

impl Operation {
    /// Gets the attribute called `name`, if the operation has one.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    /// Gets the single result of the operation.
    ///
    /// Returns [`None`] if the operation does not have exactly one result.
    #[must_use]
    pub fn result(&self) -> Option<ValueId> {
        match self.results.as_slice() {
            [r] => Some(*r),
            _ => None,
        }
    }

    /// Counts this operation and every operation nested inside it.
    #[must_use]
    pub fn total_operations(&self) -> usize {
        1 + self.regions.iter().map(Region::total_operations).sum::<usize>()
    }
}

/// A single-block region: the block's arguments followed by its operations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Region {
    pub arguments:  Vec<ValueId>,
    pub operations: Vec<Operation>,
}

impl Region {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `operation` to the end of the region's block.
    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Gets the last operation in the region, which for a well-formed region
    /// is its terminator.
    #[must_use]
    pub fn terminator(&self) -> Option<&Operation> {
        self.operations.last()
    }

    /// Counts every operation in the region, including nested ones.
    #[must_use]
    pub fn total_operations(&self) -> usize {
        self.operations.iter().map(Operation::total_operations).sum()
    }

    /// Visits every operation in the region in pre-order, including those
    /// nested in the regions of other operations.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Operation)) {
        for op in &self.operations {
            f(op);
            for region in &op.regions {
                region.walk(f);
            }
        }
    }
}

/// A function of the module. A function without a body is a declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub symbol: String,

    /// The signature of the function, which is always a
    /// [`TypeKind::Function`].
    pub ty: TypeId,

    pub body: Option<Region>,
}

/// A module-level global slot with the region that computes its initial
/// value.
#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    pub symbol:      String,
    pub ty:          TypeId,
    pub initializer: Region,
}

/// The slot of a function or global in its module.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Symbol {
    Function(usize),
    Global(usize),
}

/// Named blobs of data stored outside of the operations that use them.
///
/// Blobs are shared, never copied, and inserting under an existing key returns
/// a handle to the existing blob.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceTable {
    blobs: BTreeMap<String, Arc<[u8]>>,
}

impl ResourceTable {
    /// Stores `data` under `key` unless a blob with that key already exists,
    /// and returns a handle to the blob stored under `key`.
    pub fn insert(&mut self, key: &str, data: Arc<[u8]>) -> ResourceHandle {
        self.blobs.entry(key.to_string()).or_insert(data);
        ResourceHandle {
            key: key.to_string(),
        }
    }

    /// Gets the blob referred to by `handle`, if it exists.
    #[must_use]
    pub fn get(&self, handle: &ResourceHandle) -> Option<&Arc<[u8]>> {
        self.blobs.get(&handle.key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<[u8]>)> {
        self.blobs.iter()
    }
}

/// Everything needed to create an operation, gathered before it is created.
///
/// # API Style
///
/// Please note that the API for this type consumes `self` and is hence
/// designed to have calls chained in the "fluent" API style.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OperationState {
    pub name:         String,
    pub operands:     Vec<ValueId>,
    pub result_types: Vec<TypeId>,
    pub attributes:   Vec<(String, Attribute)>,
    pub regions:      Vec<Region>,
    pub location:     Option<Location>,
}

impl OperationState {
    /// Starts describing an operation called `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_operands(mut self, operands: &[ValueId]) -> Self {
        self.operands.extend_from_slice(operands);
        self
    }

    #[must_use]
    pub fn with_results(mut self, types: &[TypeId]) -> Self {
        self.result_types.extend_from_slice(types);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: &str, attribute: Attribute) -> Self {
        self.attributes.push((name.to_string(), attribute));
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }
}

/// An IR module.
#[derive(Clone, Debug)]
pub struct Module {
    /// The name of the module.
    pub name: String,

    /// The types used anywhere in the module.
    pub types: TypeTable,

    /// The module's out-of-line data.
    pub resources: ResourceTable,

    values:    Vec<ValueData>,
    next_op:   u32,
    functions: Vec<Function>,
    globals:   Vec<Global>,
    symbols:   BiMap<String, Symbol>,
}

impl Module {
    /// Creates a new, empty, module called `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name:      name.to_string(),
            types:     TypeTable::new(),
            resources: ResourceTable::default(),
            values:    Vec::new(),
            next_op:   0,
            functions: Vec::new(),
            globals:   Vec::new(),
            symbols:   BiMap::new(),
        }
    }

    fn new_value(&mut self, ty: TypeId, def: ValueDef) -> ValueId {
        let id = ValueId(u32::try_from(self.values.len()).unwrap_or(u32::MAX));
        self.values.push(ValueData { ty, def });
        id
    }

    /// Gets the information about `value`, if it belongs to this module.
    #[must_use]
    pub fn value(&self, value: ValueId) -> Option<&ValueData> {
        self.values.get(value.0 as usize)
    }

    /// Gets the type of `value`, if it belongs to this module.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> Option<TypeId> {
        self.value(value).map(|v| v.ty)
    }

    /// Gets the structure of the type of `value`.
    #[must_use]
    pub fn value_kind(&self, value: ValueId) -> Option<&TypeKind> {
        self.value_type(value).and_then(|t| self.types.get(t))
    }

    /// Gets the number of SSA values allocated in this module.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Appends a new argument of type `ty` to `region`, returning the value
    /// that represents it.
    pub fn add_region_argument(&mut self, region: &mut Region, ty: TypeId) -> ValueId {
        let index = region.arguments.len();
        let value = self.new_value(ty, ValueDef::BlockArgument { index });
        region.arguments.push(value);
        value
    }

    /// Creates an operation as described by `state`, allocating its results.
    ///
    /// The operation is not placed anywhere; it is up to the caller to append
    /// it to a region.
    pub fn create_operation(&mut self, state: OperationState) -> Operation {
        let id = OpId(self.next_op);
        self.next_op += 1;
        let results = state
            .result_types
            .iter()
            .enumerate()
            .map(|(index, ty)| self.new_value(*ty, ValueDef::OpResult { op: id, index }))
            .collect();

        Operation {
            id,
            name: state.name,
            operands: state.operands,
            results,
            attributes: state.attributes,
            regions: state.regions,
            location: state.location,
        }
    }

    /// Declares a function called `symbol` with signature `ty` but without a
    /// body.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateSymbol`] if `symbol` already names a function or
    ///   global in this module.
    pub fn declare_function(&mut self, symbol: &str, ty: TypeId) -> Result<()> {
        if self.symbols.contains_left(symbol) {
            Err(Error::DuplicateSymbol(symbol.to_string()))?;
        }

        let slot = Symbol::Function(self.functions.len());
        self.functions.push(Function {
            symbol: symbol.to_string(),
            ty,
            body: None,
        });
        self.symbols.insert(symbol.to_string(), slot);
        Ok(())
    }

    /// Attaches `body` to the previously declared function `symbol`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownSymbol`] if no function called `symbol` has been
    ///   declared.
    /// - [`Error::FunctionAlreadyDefined`] if the function already has a body.
    pub fn define_function(&mut self, symbol: &str, body: Region) -> Result<()> {
        let Some(Symbol::Function(slot)) = self.symbols.get_by_left(symbol).copied() else {
            return Err(Error::UnknownSymbol(symbol.to_string()));
        };
        let function = &mut self.functions[slot];
        if function.body.is_some() {
            Err(Error::FunctionAlreadyDefined(symbol.to_string()))?;
        }

        function.body = Some(body);
        Ok(())
    }

    /// Adds a global called `symbol` of type `ty` whose value is computed by
    /// `initializer`.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateSymbol`] if `symbol` already names a function or
    ///   global in this module.
    pub fn add_global(&mut self, symbol: &str, ty: TypeId, initializer: Region) -> Result<()> {
        if self.symbols.contains_left(symbol) {
            Err(Error::DuplicateSymbol(symbol.to_string()))?;
        }

        let slot = Symbol::Global(self.globals.len());
        self.globals.push(Global {
            symbol: symbol.to_string(),
            ty,
            initializer,
        });
        self.symbols.insert(symbol.to_string(), slot);
        Ok(())
    }

    /// Looks up what `symbol` names in this module.
    #[must_use]
    pub fn lookup_symbol(&self, symbol: &str) -> Option<Symbol> {
        self.symbols.get_by_left(symbol).copied()
    }

    /// Gets the name of the function or global in `slot`.
    #[must_use]
    pub fn symbol_name(&self, slot: Symbol) -> Option<&str> {
        self.symbols.get_by_right(&slot).map(String::as_str)
    }

    /// Gets the function called `symbol`, if it exists.
    #[must_use]
    pub fn function(&self, symbol: &str) -> Option<&Function> {
        match self.lookup_symbol(symbol)? {
            Symbol::Function(slot) => self.functions.get(slot),
            Symbol::Global(_) => None,
        }
    }

    /// Gets the global called `symbol`, if it exists.
    #[must_use]
    pub fn global(&self, symbol: &str) -> Option<&Global> {
        match self.lookup_symbol(symbol)? {
            Symbol::Global(slot) => self.globals.get(slot),
            Symbol::Function(_) => None,
        }
    }

    /// Gets the functions of the module in declaration order.
    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Gets the globals of the module in declaration order.
    #[must_use]
    pub fn globals(&self) -> &[Global] {
        &self.globals
    }

    /// Gets the number of operations in the module, including nested ones and
    /// those in global initializers.
    #[must_use]
    pub fn total_operations(&self) -> usize {
        let in_functions: usize = self
            .functions
            .iter()
            .filter_map(|f| f.body.as_ref())
            .map(Region::total_operations)
            .sum();
        let in_globals: usize = self.globals.iter().map(|g| g.initializer.total_operations()).sum();
        in_functions + in_globals
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use graft_errors::ir::Error;

    use crate::{
        module::{Attribute, Module, OperationState, Region, ResourceTable, Symbol, ValueDef},
        types::TypeKind,
    };

    #[test]
    fn operations_allocate_typed_results() {
        let mut module = Module::new("m");
        let int = module.types.int();
        let op = module.create_operation(
            OperationState::new("torch.constant.int")
                .with_attribute("value", Attribute::Int(3))
                .with_results(&[int]),
        );

        let result = op.result().expect("one result");
        assert_eq!(module.value_type(result), Some(int));
        assert_eq!(
            module.value(result).map(|v| v.def),
            Some(ValueDef::OpResult { op: op.id, index: 0 })
        );
        assert_eq!(op.attribute("value"), Some(&Attribute::Int(3)));
        assert_eq!(op.attribute("missing"), None);
    }

    #[test]
    fn symbols_are_unique_across_functions_and_globals() -> anyhow::Result<()> {
        let mut module = Module::new("m");
        let sig = module.types.intern(TypeKind::Function {
            inputs:  vec![],
            results: vec![],
        });
        let int = module.types.int();

        module.declare_function("forward", sig)?;
        module.add_global("weight", int, Region::new())?;

        assert_eq!(
            module.declare_function("weight", sig),
            Err(Error::DuplicateSymbol("weight".to_string()))
        );
        assert_eq!(
            module.add_global("forward", int, Region::new()),
            Err(Error::DuplicateSymbol("forward".to_string()))
        );
        assert_eq!(module.lookup_symbol("forward"), Some(Symbol::Function(0)));
        assert_eq!(module.symbol_name(Symbol::Global(0)), Some("weight"));
        assert!(module.global("forward").is_none());

        Ok(())
    }

    #[test]
    fn functions_are_defined_once() -> anyhow::Result<()> {
        let mut module = Module::new("m");
        let sig = module.types.intern(TypeKind::Function {
            inputs:  vec![],
            results: vec![],
        });
        module.declare_function("f", sig)?;

        assert!(module.function("f").is_some_and(|f| f.body.is_none()));
        module.define_function("f", Region::new())?;
        assert!(module.function("f").is_some_and(|f| f.body.is_some()));
        assert_eq!(
            module.define_function("f", Region::new()),
            Err(Error::FunctionAlreadyDefined("f".to_string()))
        );
        assert_eq!(
            module.define_function("g", Region::new()),
            Err(Error::UnknownSymbol("g".to_string()))
        );

        Ok(())
    }

    #[test]
    fn region_arguments_are_numbered() {
        let mut module = Module::new("m");
        let int = module.types.int();
        let mut region = Region::new();
        let a = module.add_region_argument(&mut region, int);
        let b = module.add_region_argument(&mut region, int);

        assert_eq!(region.arguments, vec![a, b]);
        assert_eq!(
            module.value(b).map(|v| v.def),
            Some(ValueDef::BlockArgument { index: 1 })
        );
    }

    #[test]
    fn resources_are_shared_and_keyed() {
        let mut table = ResourceTable::default();
        let data: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        let first = table.insert("blob", data.clone());
        let second = table.insert("blob", Arc::from(vec![9u8]));

        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        assert!(Arc::ptr_eq(table.get(&first).expect("stored"), &data));
    }
}
