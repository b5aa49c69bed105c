//! The closed set of traced operations that the importer knows how to emit.
//!
//! Node identifiers take the form `namespace::name` with an optional
//! `.overload` suffix, as in `aten::add.Tensor`. The namespace and name select
//! an [`OperationKind`], while the overload is carried through to the emitted
//! operation as an attribute. Any identifier outside this set is rejected.
//!
//! These mappings are left mostly undocumented as the variant names describe
//! them fully.

use std::fmt::{Display, Formatter};

/// Declares the operation kinds together with the identifier each is parsed
/// from and the name of the IR operation it is emitted as.
macro_rules! operation_kinds {
    ($($variant:ident => $identifier:literal as $ir_name:literal,)*) => {
        /// A traced operation that has a known IR equivalent.
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        pub enum OperationKind {
            $($variant,)*
        }

        impl OperationKind {
            /// Every supported operation, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)*];

            /// Gets the identifier, without any overload, that names this
            /// operation in a traced graph.
            #[must_use]
            pub fn identifier(self) -> &'static str {
                match self {
                    $(Self::$variant => $identifier,)*
                }
            }

            /// Gets the name of the IR operation that this operation is
            /// emitted as.
            #[must_use]
            pub fn ir_name(self) -> &'static str {
                match self {
                    $(Self::$variant => $ir_name,)*
                }
            }
        }
    };
}

operation_kinds! {
    // Elementwise unary.
    Relu => "aten::relu" as "torch.aten.relu",
    Tanh => "aten::tanh" as "torch.aten.tanh",
    Sigmoid => "aten::sigmoid" as "torch.aten.sigmoid",
    Exp => "aten::exp" as "torch.aten.exp",
    Log => "aten::log" as "torch.aten.log",
    Sqrt => "aten::sqrt" as "torch.aten.sqrt",
    Rsqrt => "aten::rsqrt" as "torch.aten.rsqrt",
    Neg => "aten::neg" as "torch.aten.neg",
    Abs => "aten::abs" as "torch.aten.abs",
    Floor => "aten::floor" as "torch.aten.floor",
    Ceil => "aten::ceil" as "torch.aten.ceil",
    Sin => "aten::sin" as "torch.aten.sin",
    Cos => "aten::cos" as "torch.aten.cos",
    Erf => "aten::erf" as "torch.aten.erf",
    Reciprocal => "aten::reciprocal" as "torch.aten.reciprocal",
    Square => "aten::square" as "torch.aten.square",
    Silu => "aten::silu" as "torch.aten.silu",
    Hardsigmoid => "aten::hardsigmoid" as "torch.aten.hardsigmoid",
    Hardswish => "aten::hardswish" as "torch.aten.hardswish",
    Detach => "aten::detach" as "torch.aten.detach",
    Log2 => "aten::log2" as "torch.aten.log2",
    Zero => "aten::zero" as "torch.aten.zero",
    ShapeAsTensor => "aten::_shape_as_tensor" as "torch.aten._shape_as_tensor",

    // Elementwise unary with trailing options, and conversions.
    Gelu => "aten::gelu" as "torch.aten.gelu",
    Hardtanh => "aten::hardtanh" as "torch.aten.hardtanh",
    Clamp => "aten::clamp" as "torch.aten.clamp",
    LeakyRelu => "aten::leaky_relu" as "torch.aten.leaky_relu",
    Dropout => "aten::dropout" as "torch.aten.dropout",
    Contiguous => "aten::contiguous" as "torch.aten.contiguous",
    Clone => "aten::clone" as "torch.aten.clone",
    To => "aten::to" as "torch.aten.to",
    ToCopy => "aten::_to_copy" as "torch.aten._to_copy",
    TypeAs => "aten::type_as" as "torch.aten.type_as",
    Threshold => "aten::threshold" as "torch.aten.threshold",

    // Elementwise binary.
    Add => "aten::add" as "torch.aten.add",
    Sub => "aten::sub" as "torch.aten.sub",
    Mul => "aten::mul" as "torch.aten.mul",
    Div => "aten::div" as "torch.aten.div",
    FloorDivide => "aten::floor_divide" as "torch.aten.floor_divide",
    Pow => "aten::pow" as "torch.aten.pow",
    Remainder => "aten::remainder" as "torch.aten.remainder",
    Maximum => "aten::maximum" as "torch.aten.maximum",
    Minimum => "aten::minimum" as "torch.aten.minimum",
    ReverseSub => "aten::rsub" as "torch.aten.rsub",
    Lerp => "aten::lerp" as "torch.aten.lerp",
    AddCMul => "aten::addcmul" as "torch.aten.addcmul",
    AddCDiv => "aten::addcdiv" as "torch.aten.addcdiv",
    Where => "aten::where" as "torch.aten.where",
    MaskedFill => "aten::masked_fill" as "torch.aten.masked_fill",
    Fill => "aten::fill" as "torch.aten.fill",
    CopyFrom => "aten::copy" as "torch.aten.copy",

    // Logical and bitwise.
    And => "aten::__and__" as "torch.aten.__and__",
    BitwiseAnd => "aten::bitwise_and" as "torch.aten.bitwise_and",
    LogicalOr => "aten::logical_or" as "torch.aten.logical_or",

    // Comparisons.
    Equal => "aten::eq" as "torch.aten.eq",
    NotEqual => "aten::ne" as "torch.aten.ne",
    Less => "aten::lt" as "torch.aten.lt",
    LessEqual => "aten::le" as "torch.aten.le",
    Greater => "aten::gt" as "torch.aten.gt",
    GreaterEqual => "aten::ge" as "torch.aten.ge",

    // Linear algebra and shape manipulation.
    Matmul => "aten::matmul" as "torch.aten.matmul",
    Mm => "aten::mm" as "torch.aten.mm",
    Linear => "aten::linear" as "torch.aten.linear",
    MatrixTranspose => "aten::t" as "torch.aten.t",
    Transpose => "aten::transpose" as "torch.aten.transpose",
    View => "aten::view" as "torch.aten.view",
    Reshape => "aten::reshape" as "torch.aten.reshape",
    Flatten => "aten::flatten" as "torch.aten.flatten",
    Cat => "aten::cat" as "torch.aten.cat",
    Softmax => "aten::softmax" as "torch.aten.softmax",
    LogSoftmax => "aten::log_softmax" as "torch.aten.log_softmax",
    RawSoftmax => "aten::_softmax" as "torch.aten._softmax",
    RawLogSoftmax => "aten::_log_softmax" as "torch.aten._log_softmax",
    Permute => "aten::permute" as "torch.aten.permute",
    Expand => "aten::expand" as "torch.aten.expand",
    ExpandAs => "aten::expand_as" as "torch.aten.expand_as",
    BroadcastTo => "aten::broadcast_to" as "torch.aten.broadcast_to",
    ReshapeAlias => "aten::_reshape_alias" as "torch.aten._reshape_alias",
    UnsafeView => "aten::_unsafe_view" as "torch.aten._unsafe_view",
    Unsqueeze => "aten::unsqueeze" as "torch.aten.unsqueeze",
    Squeeze => "aten::squeeze" as "torch.aten.squeeze",
    Flip => "aten::flip" as "torch.aten.flip",
    Slice => "aten::slice" as "torch.aten.slice",
    Select => "aten::select" as "torch.aten.select",
    IndexSelect => "aten::index_select" as "torch.aten.index_select",
    Index => "aten::index" as "torch.aten.index",
    Gather => "aten::gather" as "torch.aten.gather",
    ConstantPadNd => "aten::constant_pad_nd" as "torch.aten.constant_pad_nd",
    Pad => "aten::pad" as "torch.aten.pad",
    AddMm => "aten::addmm" as "torch.aten.addmm",
    Bmm => "aten::bmm" as "torch.aten.bmm",
    Embedding => "aten::embedding" as "torch.aten.embedding",

    // Reductions.
    Sum => "aten::sum" as "torch.aten.sum",
    Mean => "aten::mean" as "torch.aten.mean",
    Var => "aten::var" as "torch.aten.var",
    Std => "aten::std" as "torch.aten.std",
    AnyOf => "aten::any" as "torch.aten.any",
    AllOf => "aten::all" as "torch.aten.all",
    ArgMax => "aten::argmax" as "torch.aten.argmax",
    Max => "aten::max" as "torch.aten.max",
    TopK => "aten::topk" as "torch.aten.topk",
    VectorNorm => "aten::linalg_vector_norm" as "torch.aten.linalg_vector_norm",
    BinCount => "aten::bincount" as "torch.aten.bincount",

    // Neural network layers.
    Conv2d => "aten::conv2d" as "torch.aten.conv2d",
    Convolution => "aten::convolution" as "torch.aten.convolution",
    MaxPool2d => "aten::max_pool2d" as "torch.aten.max_pool2d",
    MaxPool2dWithIndices => "aten::max_pool2d_with_indices" as "torch.aten.max_pool2d_with_indices",
    AvgPool2d => "aten::avg_pool2d" as "torch.aten.avg_pool2d",
    AdaptiveAvgPool2d => "aten::adaptive_avg_pool2d" as "torch.aten.adaptive_avg_pool2d",
    LayerNorm => "aten::layer_norm" as "torch.aten.layer_norm",
    NativeLayerNorm => "aten::native_layer_norm" as "torch.aten.native_layer_norm",
    BatchNorm => "aten::batch_norm" as "torch.aten.batch_norm",
    NativeBatchNorm => "aten::native_batch_norm" as "torch.aten.native_batch_norm",

    // Tensor creation.
    Zeros => "aten::zeros" as "torch.aten.zeros",
    Ones => "aten::ones" as "torch.aten.ones",
    Empty => "aten::empty" as "torch.aten.empty",
    Full => "aten::full" as "torch.aten.full",
    ZerosLike => "aten::zeros_like" as "torch.aten.zeros_like",
    OnesLike => "aten::ones_like" as "torch.aten.ones_like",
    EmptyLike => "aten::empty_like" as "torch.aten.empty_like",
    FullLike => "aten::full_like" as "torch.aten.full_like",
    NewZeros => "aten::new_zeros" as "torch.aten.new_zeros",
    NewOnes => "aten::new_ones" as "torch.aten.new_ones",
    NewEmpty => "aten::new_empty" as "torch.aten.new_empty",
    Arange => "aten::arange" as "torch.aten.arange",
    Tensor => "aten::tensor" as "torch.aten.tensor",

    // Scalar and container queries.
    Size => "aten::size" as "torch.aten.size",
    Dim => "aten::dim" as "torch.aten.dim",
    Len => "aten::len" as "torch.aten.len",
    GetItem => "aten::__getitem__" as "torch.aten.__getitem__",
    Int => "aten::Int" as "torch.aten.Int",
    Float => "aten::Float" as "torch.aten.Float",
    NumToTensor => "prim::NumToTensor" as "torch.prim.NumToTensor",

    // Aggregates. Tuples are only ever homogeneous here, and share the list
    // representation.
    ListConstruct => "prim::ListConstruct" as "torch.prim.ListConstruct",
    TupleConstruct => "prim::TupleConstruct" as "torch.prim.ListConstruct",
    ListUnpack => "prim::ListUnpack" as "torch.prim.ListUnpack",
    TupleUnpack => "prim::TupleUnpack" as "torch.prim.ListUnpack",

    // Control flow and calls.
    If => "prim::If" as "torch.prim.If",
    Loop => "prim::Loop" as "torch.prim.Loop",
    CallFunction => "prim::CallFunction" as "func.call_indirect",

    // Side effects.
    Print => "prim::Print" as "torch.prim.Print",
    RaiseException => "prim::RaiseException" as "torch.prim.RaiseException",
}

/// A node identifier split into the operation it names and its overload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParsedIdentifier<'a> {
    pub kind:     OperationKind,
    pub overload: Option<&'a str>,
}

impl OperationKind {
    /// Parses a node identifier such as `aten::add.Tensor`.
    ///
    /// Returns [`None`] if the identifier does not name a supported operation.
    #[must_use]
    pub fn parse(identifier: &str) -> Option<ParsedIdentifier<'_>> {
        let (namespace, rest) = identifier.split_once("::")?;
        let (base, overload) = match rest.split_once('.') {
            Some((base, overload)) => (base, Some(overload)),
            None => (rest, None),
        };

        let kind = Self::ALL.iter().copied().find(|k| {
            k.identifier()
                .split_once("::")
                .is_some_and(|(ns, name)| ns == namespace && name == base)
        })?;
        Some(ParsedIdentifier {
            kind,
            overload: overload.filter(|o| !o.is_empty()),
        })
    }

    /// Returns `true` if the operation owns nested graphs.
    #[must_use]
    pub fn is_control_flow(self) -> bool {
        matches!(self, Self::If | Self::Loop)
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

#[cfg(test)]
mod test {
    use graft_ir::dialect::DialectRegistry;

    use crate::operation::OperationKind;

    #[test]
    fn parses_identifiers_with_and_without_overloads() {
        let add = OperationKind::parse("aten::add.Tensor").expect("supported");
        assert_eq!(add.kind, OperationKind::Add);
        assert_eq!(add.overload, Some("Tensor"));

        let relu = OperationKind::parse("aten::relu").expect("supported");
        assert_eq!(relu.kind, OperationKind::Relu);
        assert_eq!(relu.overload, None);

        let getitem = OperationKind::parse("aten::__getitem__.t").expect("supported");
        assert_eq!(getitem.kind, OperationKind::GetItem);
        assert_eq!(getitem.overload, Some("t"));
    }

    #[test]
    fn parses_conversion_and_internal_operations() {
        let to = OperationKind::parse("aten::to.dtype").expect("supported");
        assert_eq!(to.kind, OperationKind::To);
        assert_eq!(to.overload, Some("dtype"));

        let softmax = OperationKind::parse("aten::_softmax").expect("supported");
        assert_eq!(softmax.kind, OperationKind::RawSoftmax);
        assert_eq!(softmax.kind.ir_name(), "torch.aten._softmax");

        let and = OperationKind::parse("aten::__and__.Tensor").expect("supported");
        assert_eq!(and.kind, OperationKind::And);
        assert_eq!(and.overload, Some("Tensor"));
    }

    #[test]
    fn identifiers_are_unique() {
        for (ix, kind) in OperationKind::ALL.iter().enumerate() {
            let clash = OperationKind::ALL[ix + 1..]
                .iter()
                .find(|other| other.identifier() == kind.identifier());
            assert!(clash.is_none(), "{kind} is declared twice");
        }
    }

    #[test]
    fn rejects_unknown_identifiers() {
        assert!(OperationKind::parse("aten::frobnicate").is_none());
        assert!(OperationKind::parse("prim::relu").is_none());
        assert!(OperationKind::parse("relu").is_none());
        assert!(OperationKind::parse("").is_none());
    }

    #[test]
    fn every_kind_round_trips_through_its_identifier() {
        for kind in OperationKind::ALL {
            let parsed = OperationKind::parse(kind.identifier()).map(|p| p.kind);
            assert_eq!(parsed, Some(*kind));
        }
    }

    #[test]
    fn every_kind_is_emitted_as_a_registered_operation() {
        let registry = DialectRegistry::standard();
        for kind in OperationKind::ALL {
            assert!(
                registry.lookup(kind.ir_name()).is_some(),
                "{kind} is emitted as the unregistered `{}`",
                kind.ir_name()
            );
        }
    }

    #[test]
    fn only_branches_and_loops_are_control_flow() {
        let control: Vec<_> =
            OperationKind::ALL.iter().filter(|k| k.is_control_flow()).collect();
        assert_eq!(control, vec![&OperationKind::If, &OperationKind::Loop]);
    }
}
