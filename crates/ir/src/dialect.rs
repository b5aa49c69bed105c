//! The dialects that make up the IR's operation vocabulary.
//!
//! A dialect is a namespace of operations, each described by an
//! [`OpDefinition`] that gives its structural constraints. The verifier uses
//! these definitions to check operations it knows nothing else about.
//!
//! Dialects are used as trait objects through [`DialectOps`] and collected
//! into a [`DialectRegistry`]. The registry is built once per process (see
//! [`crate::registration`]) and shared read-only from then on.

use std::{any::Any, fmt::Debug, sync::Arc};

use downcast_rs::Downcast;
use itertools::Itertools;

/// The number of operands or results that an operation accepts.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    /// Checks whether `count` items satisfy this arity.
    #[must_use]
    pub fn admits(self, count: usize) -> bool {
        match self {
            Self::Exact(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::Any => true,
        }
    }
}

impl std::fmt::Display for Arity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "exactly {n}"),
            Self::AtLeast(n) => write!(f, "at least {n}"),
            Self::Any => write!(f, "any number of"),
        }
    }
}

/// The structural description of one operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct OpDefinition {
    pub name:       &'static str,
    pub operands:   Arity,
    pub results:    Arity,
    pub regions:    usize,
    pub terminator: bool,
}

impl OpDefinition {
    /// Describes an operation without regions that does not terminate its
    /// block.
    #[must_use]
    pub const fn new(name: &'static str, operands: Arity, results: Arity) -> Self {
        Self {
            name,
            operands,
            results,
            regions: 0,
            terminator: false,
        }
    }

    #[must_use]
    pub const fn with_regions(mut self, regions: usize) -> Self {
        self.regions = regions;
        self
    }

    /// Marks the operation as one that must end its block.
    #[must_use]
    pub const fn terminator(mut self) -> Self {
        self.terminator = true;
        self
    }
}

/// The operations that any dialect must provide.
///
/// # Dynamic Dispatch
///
/// Dialects are stored as `dyn DialectOps`, so the trait requires:
///
/// - [`Any`] to allow downcasting to the concrete dialect when needed.
/// - [`Debug`] to provide representations to aid in debugging.
/// - [`Downcast`] for easy conversions _to_ [`Any`] for downcasting.
/// - [`Send`] and [`Sync`] as the registry is shared between threads.
pub trait DialectOps
where
    Self: Any + Debug + Downcast + Send + Sync,
{
    /// The prefix shared by every operation name in the dialect.
    fn namespace(&self) -> &'static str;

    /// Every operation that the dialect defines.
    fn operations(&self) -> &'static [OpDefinition];

    /// Looks up the operation called `name` in this dialect.
    fn lookup(&self, name: &str) -> Option<&'static OpDefinition> {
        self.operations().iter().find(|op| op.name == name)
    }
}

impl dyn DialectOps {
    /// Checks if the dialect is an instance of the concrete dialect `T`.
    #[must_use]
    pub fn is<T: DialectOps>(&self) -> bool {
        self.as_any().is::<T>()
    }

    /// Allows you to view the dynamic dialect `self` as the concrete dialect
    /// `T`, returning a `&T` if possible and `None` otherwise.
    #[must_use]
    pub fn view_as<T: DialectOps>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// The `func` dialect, for functions, calls and returns.
#[derive(Clone, Copy, Debug, Default)]
pub struct FuncDialect;

const FUNC_OPS: &[OpDefinition] = &[
    OpDefinition::new("func.return", Arity::Any, Arity::Exact(0)).terminator(),
    OpDefinition::new("func.constant", Arity::Exact(0), Arity::Exact(1)),
    OpDefinition::new("func.call_indirect", Arity::AtLeast(1), Arity::Any),
];

impl DialectOps for FuncDialect {
    fn namespace(&self) -> &'static str {
        "func"
    }

    fn operations(&self) -> &'static [OpDefinition] {
        FUNC_OPS
    }
}

/// The `torch` dialect, which models the operations of the host runtime with
/// value semantics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TorchDialect;

const fn unary(name: &'static str) -> OpDefinition {
    OpDefinition::new(name, Arity::Exact(1), Arity::Exact(1))
}

const fn binary(name: &'static str) -> OpDefinition {
    OpDefinition::new(name, Arity::Exact(2), Arity::Exact(1))
}

const fn at_least(name: &'static str, operands: usize) -> OpDefinition {
    OpDefinition::new(name, Arity::AtLeast(operands), Arity::Exact(1))
}

const fn results(name: &'static str, operands: usize, results: usize) -> OpDefinition {
    OpDefinition::new(name, Arity::AtLeast(operands), Arity::Exact(results))
}

const fn literal(name: &'static str) -> OpDefinition {
    OpDefinition::new(name, Arity::Exact(0), Arity::Exact(1))
}

const TORCH_OPS: &[OpDefinition] = &[
    // Literals and aggregates.
    literal("torch.constant.bool"),
    literal("torch.constant.int"),
    literal("torch.constant.float"),
    literal("torch.constant.str"),
    literal("torch.constant.none"),
    literal("torch.constant.device"),
    literal("torch.tensor.literal"),
    OpDefinition::new("torch.prim.ListConstruct", Arity::Any, Arity::Exact(1)),
    OpDefinition::new("torch.prim.StructConstruct", Arity::Any, Arity::Exact(1)),
    unary("torch.optional.some"),
    literal("torch.optional.none"),
    // Global slots.
    OpDefinition::new("torch.global_slot.init", Arity::Exact(1), Arity::Exact(0)).terminator(),
    literal("torch.global_slot.get"),
    // Elementwise unary.
    unary("torch.aten.relu"),
    unary("torch.aten.tanh"),
    unary("torch.aten.sigmoid"),
    unary("torch.aten.exp"),
    unary("torch.aten.log"),
    unary("torch.aten.sqrt"),
    unary("torch.aten.rsqrt"),
    unary("torch.aten.neg"),
    unary("torch.aten.abs"),
    unary("torch.aten.floor"),
    unary("torch.aten.ceil"),
    unary("torch.aten.sin"),
    unary("torch.aten.cos"),
    unary("torch.aten.erf"),
    unary("torch.aten.reciprocal"),
    unary("torch.aten.square"),
    unary("torch.aten.silu"),
    unary("torch.aten.hardsigmoid"),
    unary("torch.aten.hardswish"),
    unary("torch.aten.detach"),
    unary("torch.aten.log2"),
    unary("torch.aten.zero"),
    unary("torch.aten._shape_as_tensor"),
    // Elementwise unary with trailing options.
    at_least("torch.aten.gelu", 1),
    at_least("torch.aten.hardtanh", 1),
    at_least("torch.aten.clamp", 1),
    at_least("torch.aten.leaky_relu", 1),
    at_least("torch.aten.dropout", 1),
    at_least("torch.aten.contiguous", 1),
    at_least("torch.aten.clone", 1),
    at_least("torch.aten.to", 2),
    at_least("torch.aten._to_copy", 1),
    binary("torch.aten.type_as"),
    OpDefinition::new("torch.aten.threshold", Arity::Exact(3), Arity::Exact(1)),
    // Elementwise binary, some with a trailing scaling or rounding operand.
    at_least("torch.aten.add", 2),
    at_least("torch.aten.sub", 2),
    binary("torch.aten.mul"),
    at_least("torch.aten.div", 2),
    binary("torch.aten.floor_divide"),
    binary("torch.aten.pow"),
    binary("torch.aten.remainder"),
    binary("torch.aten.maximum"),
    binary("torch.aten.minimum"),
    at_least("torch.aten.rsub", 2),
    OpDefinition::new("torch.aten.lerp", Arity::Exact(3), Arity::Exact(1)),
    at_least("torch.aten.addcmul", 3),
    at_least("torch.aten.addcdiv", 3),
    OpDefinition::new("torch.aten.where", Arity::Exact(3), Arity::Exact(1)),
    OpDefinition::new("torch.aten.masked_fill", Arity::Exact(3), Arity::Exact(1)),
    at_least("torch.aten.fill", 2),
    at_least("torch.aten.copy", 2),
    // Logical and bitwise.
    binary("torch.aten.__and__"),
    binary("torch.aten.bitwise_and"),
    binary("torch.aten.logical_or"),
    // Comparisons.
    binary("torch.aten.eq"),
    binary("torch.aten.ne"),
    binary("torch.aten.lt"),
    binary("torch.aten.le"),
    binary("torch.aten.gt"),
    binary("torch.aten.ge"),
    // Linear algebra and shape manipulation.
    binary("torch.aten.matmul"),
    binary("torch.aten.mm"),
    at_least("torch.aten.linear", 2),
    unary("torch.aten.t"),
    OpDefinition::new("torch.aten.transpose", Arity::Exact(3), Arity::Exact(1)),
    binary("torch.aten.view"),
    binary("torch.aten.reshape"),
    at_least("torch.aten.flatten", 1),
    binary("torch.aten.cat"),
    at_least("torch.aten.softmax", 2),
    at_least("torch.aten.log_softmax", 2),
    at_least("torch.aten._softmax", 2),
    at_least("torch.aten._log_softmax", 2),
    binary("torch.aten.permute"),
    at_least("torch.aten.expand", 2),
    binary("torch.aten.expand_as"),
    binary("torch.aten.broadcast_to"),
    at_least("torch.aten._reshape_alias", 2),
    binary("torch.aten._unsafe_view"),
    binary("torch.aten.unsqueeze"),
    at_least("torch.aten.squeeze", 1),
    binary("torch.aten.flip"),
    at_least("torch.aten.slice", 1),
    OpDefinition::new("torch.aten.select", Arity::Exact(3), Arity::Exact(1)),
    OpDefinition::new("torch.aten.index_select", Arity::Exact(3), Arity::Exact(1)),
    binary("torch.aten.index"),
    at_least("torch.aten.gather", 3),
    at_least("torch.aten.constant_pad_nd", 2),
    at_least("torch.aten.pad", 2),
    at_least("torch.aten.addmm", 3),
    binary("torch.aten.bmm"),
    at_least("torch.aten.embedding", 2),
    // Reductions, some of which also produce indices.
    at_least("torch.aten.sum", 1),
    at_least("torch.aten.mean", 1),
    at_least("torch.aten.var", 1),
    at_least("torch.aten.std", 1),
    at_least("torch.aten.any", 1),
    at_least("torch.aten.all", 1),
    at_least("torch.aten.argmax", 1),
    OpDefinition::new("torch.aten.max", Arity::AtLeast(1), Arity::AtLeast(1)),
    results("torch.aten.topk", 2, 2),
    at_least("torch.aten.linalg_vector_norm", 1),
    at_least("torch.aten.bincount", 1),
    // Neural network layers.
    at_least("torch.aten.conv2d", 2),
    at_least("torch.aten.convolution", 3),
    at_least("torch.aten.max_pool2d", 2),
    results("torch.aten.max_pool2d_with_indices", 2, 2),
    at_least("torch.aten.avg_pool2d", 2),
    binary("torch.aten.adaptive_avg_pool2d"),
    at_least("torch.aten.layer_norm", 2),
    results("torch.aten.native_layer_norm", 2, 3),
    at_least("torch.aten.batch_norm", 5),
    results("torch.aten.native_batch_norm", 5, 3),
    // Tensor creation.
    at_least("torch.aten.zeros", 1),
    at_least("torch.aten.ones", 1),
    at_least("torch.aten.empty", 1),
    at_least("torch.aten.full", 2),
    at_least("torch.aten.zeros_like", 1),
    at_least("torch.aten.ones_like", 1),
    at_least("torch.aten.empty_like", 1),
    at_least("torch.aten.full_like", 2),
    at_least("torch.aten.new_zeros", 2),
    at_least("torch.aten.new_ones", 2),
    at_least("torch.aten.new_empty", 2),
    at_least("torch.aten.arange", 1),
    at_least("torch.aten.tensor", 1),
    // Scalar and container queries.
    at_least("torch.aten.size", 1),
    unary("torch.aten.dim"),
    unary("torch.aten.len"),
    binary("torch.aten.__getitem__"),
    unary("torch.aten.Int"),
    unary("torch.aten.Float"),
    unary("torch.prim.NumToTensor"),
    OpDefinition::new("torch.prim.ListUnpack", Arity::Exact(1), Arity::Any),
    // Structured control flow.
    OpDefinition::new("torch.prim.If", Arity::Exact(1), Arity::Any).with_regions(2),
    OpDefinition::new("torch.prim.If.yield", Arity::Any, Arity::Exact(0)).terminator(),
    OpDefinition::new("torch.prim.Loop", Arity::AtLeast(2), Arity::Any).with_regions(1),
    OpDefinition::new("torch.prim.Loop.condition", Arity::AtLeast(1), Arity::Exact(0))
        .terminator(),
    // Side effects.
    OpDefinition::new("torch.prim.Print", Arity::Any, Arity::Exact(0)),
    OpDefinition::new("torch.prim.RaiseException", Arity::AtLeast(1), Arity::Exact(0)),
];

impl DialectOps for TorchDialect {
    fn namespace(&self) -> &'static str {
        "torch"
    }

    fn operations(&self) -> &'static [OpDefinition] {
        TORCH_OPS
    }
}

/// The set of dialects whose operations may appear in a module.
#[derive(Debug, Default)]
pub struct DialectRegistry {
    dialects: Vec<Arc<dyn DialectOps>>,
}

impl DialectRegistry {
    /// Creates a registry without any dialects.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry containing the `func` and `torch` dialects.
    #[must_use]
    pub fn standard() -> Self {
        Self::new().with_dialect(FuncDialect).with_dialect(TorchDialect)
    }

    /// Adds `dialect` to the registry, replacing any dialect with the same
    /// namespace.
    ///
    /// # API Style
    ///
    /// Please note that the API for the registry consumes `self` and is hence
    /// designed to have calls chained in the "fluent" API style.
    #[must_use]
    pub fn with_dialect(mut self, dialect: impl DialectOps) -> Self {
        self.dialects.retain(|d| d.namespace() != dialect.namespace());
        self.dialects.push(Arc::new(dialect));
        self
    }

    /// Gets the dialect that owns the `namespace`, if it is registered.
    #[must_use]
    pub fn dialect(&self, namespace: &str) -> Option<&Arc<dyn DialectOps>> {
        self.dialects.iter().find(|d| d.namespace() == namespace)
    }

    /// Gets the concrete dialect `T`, if it is registered.
    #[must_use]
    pub fn get<T: DialectOps>(&self) -> Option<&T> {
        self.dialects.iter().find_map(|d| d.view_as::<T>())
    }

    /// Looks up the definition of the operation `name`, using the part of the
    /// name before the first `.` to find the dialect.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&'static OpDefinition> {
        let (namespace, _) = name.split_once('.')?;
        self.dialect(namespace)?.lookup(name)
    }

    /// Gets the namespaces of every registered dialect, in registration order.
    #[must_use]
    pub fn namespaces(&self) -> Vec<&'static str> {
        self.dialects.iter().map(|d| d.namespace()).collect_vec()
    }
}

#[cfg(test)]
mod test {
    use crate::dialect::{Arity, DialectRegistry, FuncDialect, TorchDialect};

    #[test]
    fn arity_admits_counts() {
        assert!(Arity::Exact(2).admits(2));
        assert!(!Arity::Exact(2).admits(3));
        assert!(Arity::AtLeast(1).admits(4));
        assert!(!Arity::AtLeast(1).admits(0));
        assert!(Arity::Any.admits(0));
    }

    #[test]
    fn standard_registry_resolves_operations() {
        let registry = DialectRegistry::standard();

        assert_eq!(registry.namespaces(), vec!["func", "torch"]);
        assert!(registry.lookup("func.return").is_some_and(|d| d.terminator));
        assert_eq!(registry.lookup("torch.prim.If").map(|d| d.regions), Some(2));
        assert!(registry.lookup("torch.aten.bogus").is_none());
        assert!(registry.lookup("llvm.add").is_none());
        assert!(registry.lookup("nonsense").is_none());
    }

    #[test]
    fn dialects_can_be_viewed_concretely() {
        let registry = DialectRegistry::standard();

        assert!(registry.get::<TorchDialect>().is_some());
        assert!(registry.dialect("func").is_some_and(|d| d.is::<FuncDialect>()));
        assert!(DialectRegistry::new().get::<FuncDialect>().is_none());
    }

    #[test]
    fn operation_names_are_unique() {
        let registry = DialectRegistry::standard();
        for namespace in registry.namespaces() {
            let dialect = registry.dialect(namespace).expect("registered");
            let mut names: Vec<_> = dialect.operations().iter().map(|o| o.name).collect();
            let count = names.len();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), count, "duplicate operation in {namespace}");
            assert!(names.iter().all(|n| n.starts_with(&format!("{namespace}."))));
        }
    }
}
