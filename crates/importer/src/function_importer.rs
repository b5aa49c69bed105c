//! The import of a single traced graph as the body of an IR function.
//!
//! A [`FunctionImporter`] moves through the states of [`ImportState`] as it
//! works: it first binds the graph inputs to the arguments of the entry block,
//! then emits one operation per node in the order the nodes were traced, and
//! finally wires the graph outputs into the function's return. The function is
//! only defined in the module once all of that has succeeded, so a failed
//! import never leaves a partial body behind.
//!
//! # Nested Graphs
//!
//! Branches and loops own nested graphs, each of which becomes a region of the
//! emitted control-flow operation. Rather than recursing into them, the
//! importer keeps an explicit stack of frames, one for each graph that is
//! currently being walked. A frame that reaches a control-flow node parks the
//! partially-built operation, and a new frame is pushed for each of its
//! nested graphs in turn. When the last of them completes, the operation is
//! assembled and the parent frame continues.
//!
//! Each nested graph is walked in its own child scope of the
//! [`TranslationMap`], so values defined inside it are invisible once it is
//! done. Only the outputs of the control-flow node itself become visible in
//! the enclosing scope.
//!
//! # Failures
//!
//! Every failure is also emitted as an error diagnostic, located at the node
//! (and, where known, the value) that was being processed when it occurred.

use std::fmt::{Display, Formatter};

use graft_errors::import::{Error, Result};
use graft_ir::{
    diagnostic::{self, Location, NodePath},
    dialect::DialectRegistry,
    module::{Attribute, Operation, OperationState, Region, ValueId},
    types::{TypeId, TypeKind},
    Module,
};
use graft_trace::{
    constant::ConstantTable,
    graph::{Node, Operand, TracedGraph, ValueId as SourceValue},
    types::SourceType,
};

use crate::{
    constant::OVERLOAD_ATTRIBUTE,
    operation::{OperationKind, ParsedIdentifier},
    scope::{ScopeId, TranslationMap},
    type_mapper::TypeMapper,
    value_importer::ValueImporter,
};

/// The progress of a [`FunctionImporter`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ImportState {
    NotStarted,
    ImportingInputs,
    ImportingBody,
    ImportingOutputs,

    /// The function has been defined in the module.
    Done,

    /// The import failed, and nothing was added to the module.
    Failed,
}

impl ImportState {
    /// Returns `true` if the importer can make no further progress.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl Display for ImportState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::ImportingInputs => "importing inputs",
            Self::ImportingBody => "importing body",
            Self::ImportingOutputs => "importing outputs",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// One graph that is in the process of being walked.
#[derive(Debug)]
struct Frame<'g> {
    graph:   &'g TracedGraph,
    next:    usize,
    region:  Region,
    scope:   ScopeId,
    path:    NodePath,
    pending: Option<PendingControl<'g>>,
}

/// A control-flow node whose nested graphs are being walked.
#[derive(Debug)]
struct PendingControl<'g> {
    node:         &'g Node,
    kind:         OperationKind,
    overload:     Option<&'g str>,
    index:        usize,
    parent_path:  NodePath,
    operands:     Vec<ValueId>,
    result_types: Vec<TypeId>,
    regions:      Vec<Region>,
    location:     Location,
}

impl PendingControl<'_> {
    /// Gets the name of the operation that must terminate each of the node's
    /// regions.
    fn terminator(&self) -> &'static str {
        match self.kind {
            OperationKind::Loop => "torch.prim.Loop.condition",
            _ => "torch.prim.If.yield",
        }
    }
}

/// Imports one traced graph as the body of the function `symbol`.
///
/// An importer is used for exactly one import.
#[derive(Debug)]
pub struct FunctionImporter<'p> {
    symbol:   String,
    registry: &'p DialectRegistry,
    values:   ValueImporter<'p>,
    map:      TranslationMap,
    state:    ImportState,
    location: Location,
}

impl<'p> FunctionImporter<'p> {
    /// Creates an importer for the function `symbol`, checking emitted
    /// operations against `registry` and importing constants with `values`.
    #[must_use]
    pub fn new(symbol: &str, registry: &'p DialectRegistry, values: ValueImporter<'p>) -> Self {
        Self {
            symbol: symbol.to_string(),
            registry,
            values,
            map: TranslationMap::new(),
            state: ImportState::NotStarted,
            location: Location::in_function(symbol),
        }
    }

    /// Gets the current state of the import.
    #[must_use]
    pub fn state(&self) -> ImportState {
        self.state
    }

    /// Gets the position in the graph that the importer reached.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Imports `graph` and defines it as the body of the function in
    /// `module`.
    ///
    /// If the function has not yet been declared it is declared with a
    /// signature taken from the imported graph.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedType`] if the type of any value cannot be mapped.
    /// - [`Error::UnsupportedOperation`] if a node has no IR equivalent.
    /// - [`Error::ImportError`] or [`Error::UnresolvedFunction`] if a constant
    ///   cannot be imported.
    /// - [`Error::InternalConsistency`] if the graph is malformed, or if this
    ///   importer has already been used.
    pub fn import(
        &mut self,
        graph: &TracedGraph,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<()> {
        let _span = tracing::debug_span!("import_function", function = %self.symbol).entered();

        if self.state != ImportState::NotStarted {
            Err(Error::InternalConsistency(format!(
                "The importer for `@{}` has already been used",
                self.symbol
            )))?;
        }

        match self.run(graph, mapper, module) {
            Ok(()) => {
                self.state = ImportState::Done;
                tracing::debug!("Function imported");
                Ok(())
            }
            Err(error) => {
                tracing::debug!(state = %self.state, %error, "Function import failed");
                self.state = ImportState::Failed;
                diagnostic::emit_error(error.to_string(), Some(self.location.clone()));
                Err(error)
            }
        }
    }

    fn run(&mut self, graph: &TracedGraph, mapper: &mut TypeMapper, module: &mut Module) -> Result<()> {
        self.state = ImportState::ImportingInputs;
        let mut entry = Region::new();
        for input in &graph.inputs {
            self.location = self.function_location().with_value(&input.id.to_string());
            let ty = mapper.map_type(&input.ty, module)?;
            let argument = module.add_region_argument(&mut entry, ty);
            self.bind(input.id, argument)?;
        }

        self.state = ImportState::ImportingBody;
        let body = self.import_body(graph, entry, mapper, module)?;

        self.state = ImportState::ImportingOutputs;
        self.location = self.function_location();
        let returned = self.resolve_all(&graph.outputs, mapper, module)?;
        let ret = module.create_operation(
            OperationState::new("func.return")
                .with_operands(&returned)
                .with_location(Some(self.function_location())),
        );

        // Constants go first so that they dominate every use.
        let mut operations = self.values.take_operations();
        operations.extend(body.operations);
        operations.push(ret);
        let body = Region {
            arguments: body.arguments,
            operations,
        };

        if module.function(&self.symbol).is_none() {
            let signature = TypeKind::Function {
                inputs:  Self::types_of(&body.arguments, module)?,
                results: Self::types_of(&returned, module)?,
            };
            let ty = module.types.intern(signature);
            module
                .declare_function(&self.symbol, ty)
                .map_err(|e| Error::InternalConsistency(e.to_string()))?;
        }
        module
            .define_function(&self.symbol, body)
            .map_err(|e| Error::InternalConsistency(e.to_string()))?;

        Ok(())
    }

    /// Walks `graph` and everything nested in it, returning the entry region
    /// without its terminator.
    fn import_body(
        &mut self,
        graph: &TracedGraph,
        entry: Region,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<Region> {
        let mut frames = vec![Frame {
            graph,
            next: 0,
            region: entry,
            scope: self.map.root(),
            path: NodePath::new(),
            pending: None,
        }];

        while let Some(top) = frames.len().checked_sub(1) {
            let frame = &mut frames[top];
            let current = frame.graph;
            if let Some(node) = current.nodes.get(frame.next) {
                let index = frame.next;
                frame.next += 1;
                let path = frame.path.clone();
                self.location = self
                    .function_location()
                    .with_path(path.child(index, None))
                    .with_operation(&node.kind);
                tracing::trace!(
                    node = %self.location.path,
                    kind = %node.kind,
                    depth = self.map.depth(),
                    "Importing node"
                );

                let parsed = self.parse(node)?;
                if parsed.kind.is_control_flow() {
                    let pending = self.begin_control(node, parsed, index, path, mapper, module)?;
                    let child = self.enter_block(&pending, mapper, module)?;
                    frames[top].pending = Some(pending);
                    frames.push(child);
                } else {
                    let op = self.plain(node, parsed, mapper, module)?;
                    frames[top].region.push(op);
                }
                continue;
            }

            // The graph of the top frame is complete.
            let Some(finished) = frames.pop() else {
                break;
            };
            let Some(parent) = frames.last_mut() else {
                return Ok(finished.region);
            };
            let mut pending = parent.pending.take().ok_or_else(|| {
                Error::InternalConsistency(
                    "A nested graph completed without an enclosing control-flow node".to_string(),
                )
            })?;

            let region = self.finish_block(finished, &pending, mapper, module)?;
            pending.regions.push(region);
            if pending.regions.len() < pending.node.blocks.len() {
                let child = self.enter_block(&pending, mapper, module)?;
                parent.pending = Some(pending);
                frames.push(child);
            } else {
                let op = self.finish_control(pending, module)?;
                parent.region.push(op);
            }
        }

        Err(Error::InternalConsistency(
            "The graph walk ended without completing the function".to_string(),
        ))
    }

    fn parse<'g>(&self, node: &'g Node) -> Result<ParsedIdentifier<'g>> {
        OperationKind::parse(&node.kind).ok_or_else(|| Error::UnsupportedOperation {
            identifier: node.kind.clone(),
            location:   self.location.to_string(),
        })
    }

    /// Emits the operation for a node without nested graphs.
    fn plain(
        &mut self,
        node: &Node,
        parsed: ParsedIdentifier<'_>,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<Operation> {
        if !node.blocks.is_empty() {
            Err(Error::InternalConsistency(format!(
                "`{}` cannot own nested graphs",
                node.kind
            )))?;
        }
        self.check_arity(node, parsed.kind)?;

        let operands = self.resolve_all(&node.inputs, mapper, module)?;
        let result_types = self.output_types(node, mapper, module)?;
        let mut state = OperationState::new(parsed.kind.ir_name())
            .with_operands(&operands)
            .with_results(&result_types)
            .with_location(Some(self.location.clone()));
        if let Some(overload) = parsed.overload {
            state = state.with_attribute(OVERLOAD_ATTRIBUTE, Attribute::Str(overload.to_string()));
        }

        let op = module.create_operation(state);
        self.bind_outputs(node, &op)?;
        Ok(op)
    }

    /// Checks the structure of a control-flow node and resolves its operands,
    /// ready for its nested graphs to be walked.
    fn begin_control<'g>(
        &mut self,
        node: &'g Node,
        parsed: ParsedIdentifier<'g>,
        index: usize,
        parent_path: NodePath,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<PendingControl<'g>> {
        self.check_arity(node, parsed.kind)?;
        let malformed = |what: &str| Error::InternalConsistency(format!("`{}` {what}", node.kind));

        match parsed.kind {
            OperationKind::If => {
                if node.blocks.len() != 2 {
                    Err(malformed("must have exactly two nested graphs"))?;
                }
                if node.blocks.iter().any(|b| !b.inputs.is_empty()) {
                    Err(malformed("must have branches without inputs"))?;
                }
                if node.blocks.iter().any(|b| b.outputs.len() != node.outputs.len()) {
                    Err(malformed("must have branches that produce one value per output"))?;
                }
            }
            OperationKind::Loop => {
                let carried = node.inputs.len().saturating_sub(2);
                if node.blocks.len() != 1 {
                    Err(malformed("must have exactly one nested graph"))?;
                }
                if node.outputs.len() != carried {
                    Err(malformed("must produce one value per carried value"))?;
                }
                if node.blocks.iter().any(|b| b.inputs.len() != carried + 1) {
                    Err(malformed("must have a body taking the iteration and the carried values"))?;
                }
                if node.blocks.iter().any(|b| b.outputs.len() != carried + 1) {
                    Err(malformed("must have a body yielding the condition and the carried values"))?;
                }
            }
            _ => Err(malformed("is not a control-flow operation"))?,
        }

        let operands = self.resolve_all(&node.inputs, mapper, module)?;
        let result_types = self.output_types(node, mapper, module)?;

        Ok(PendingControl {
            node,
            kind: parsed.kind,
            overload: parsed.overload,
            index,
            parent_path,
            operands,
            result_types,
            regions: Vec::new(),
            location: self.location.clone(),
        })
    }

    /// Opens a scope for the next nested graph of `pending`, binding the
    /// graph's inputs to the arguments of a fresh region.
    fn enter_block<'g>(
        &mut self,
        pending: &PendingControl<'g>,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<Frame<'g>> {
        let index = pending.regions.len();
        let Some(graph) = pending.node.blocks.get(index) else {
            return Err(Error::InternalConsistency(format!(
                "`{}` has no nested graph {index}",
                pending.node.kind
            )));
        };

        let scope = self.map.enter();
        let mut region = Region::new();
        for input in &graph.inputs {
            self.location = pending.location.clone().with_value(&input.id.to_string());
            let ty = mapper.map_type(&input.ty, module)?;
            let argument = module.add_region_argument(&mut region, ty);
            self.bind(input.id, argument)?;
        }

        Ok(Frame {
            graph,
            next: 0,
            region,
            scope,
            path: pending.parent_path.child(pending.index, Some(index)),
            pending: None,
        })
    }

    /// Terminates the region of a completed nested graph with its outputs and
    /// closes its scope.
    fn finish_block(
        &mut self,
        frame: Frame<'_>,
        pending: &PendingControl<'_>,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<Region> {
        self.location = pending.location.clone();
        let outputs = self.resolve_all(&frame.graph.outputs, mapper, module)?;
        let terminator = module.create_operation(
            OperationState::new(pending.terminator())
                .with_operands(&outputs)
                .with_location(Some(pending.location.clone())),
        );

        let mut region = frame.region;
        region.push(terminator);
        self.map.exit(frame.scope)?;
        Ok(region)
    }

    /// Assembles a control-flow operation once all of its regions are built,
    /// making its outputs visible in the enclosing scope.
    fn finish_control(&mut self, pending: PendingControl<'_>, module: &mut Module) -> Result<Operation> {
        self.location = pending.location.clone();
        let mut state = OperationState::new(pending.kind.ir_name())
            .with_operands(&pending.operands)
            .with_results(&pending.result_types)
            .with_location(Some(pending.location));
        if let Some(overload) = pending.overload {
            state = state.with_attribute(OVERLOAD_ATTRIBUTE, Attribute::Str(overload.to_string()));
        }
        for region in pending.regions {
            state = state.with_region(region);
        }

        let op = module.create_operation(state);
        self.bind_outputs(pending.node, &op)?;
        Ok(op)
    }

    /// Checks the node's operand and result counts against the definition of
    /// the operation it is emitted as.
    fn check_arity(&self, node: &Node, kind: OperationKind) -> Result<()> {
        let Some(definition) = self.registry.lookup(kind.ir_name()) else {
            return Err(Error::InternalConsistency(format!(
                "The operation `{}` is not registered",
                kind.ir_name()
            )));
        };
        if !definition.operands.admits(node.inputs.len()) {
            Err(Error::InternalConsistency(format!(
                "`{}` takes {} operand(s) but was given {}",
                node.kind,
                definition.operands,
                node.inputs.len()
            )))?;
        }
        if !definition.results.admits(node.outputs.len()) {
            Err(Error::InternalConsistency(format!(
                "`{}` produces {} result(s) but declares {}",
                node.kind,
                definition.results,
                node.outputs.len()
            )))?;
        }
        Ok(())
    }

    fn output_types(
        &mut self,
        node: &Node,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<Vec<TypeId>> {
        node.outputs
            .iter()
            .map(|o| {
                mapper.map_type(&o.ty, module).map_err(|e| {
                    self.location = self.location.clone().with_value(&o.id.to_string());
                    e
                })
            })
            .collect()
    }

    fn resolve_all(
        &mut self,
        operands: &[Operand],
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<Vec<ValueId>> {
        operands.iter().map(|o| self.resolve(*o, mapper, module)).collect()
    }

    /// Finds the IR value for `operand`, importing it if it is a constant.
    fn resolve(
        &mut self,
        operand: Operand,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> Result<ValueId> {
        match operand {
            Operand::Value(id) => self.map.lookup(&id).copied().ok_or_else(|| {
                self.location = self.location.clone().with_value(&id.to_string());
                Error::InternalConsistency(format!("The value {id} is used where it is not defined"))
            }),
            Operand::Constant(id) => self.values.import_constant(id, mapper, module).map_err(|e| {
                self.location = self.location.clone().with_value(&id.to_string());
                e
            }),
        }
    }

    fn bind_outputs(&mut self, node: &Node, op: &Operation) -> Result<()> {
        for (info, result) in node.outputs.iter().zip(&op.results) {
            self.bind(info.id, *result)?;
        }
        Ok(())
    }

    /// Binds `source` to `value`, which must be its only definition that is
    /// visible, as traced values are unique within a function.
    fn bind(&mut self, source: SourceValue, value: ValueId) -> Result<()> {
        if self.map.lookup(&source).is_some() {
            Err(Error::InternalConsistency(format!("The value {source} is defined more than once")))?;
        }
        self.map.insert(source, value);
        Ok(())
    }

    fn function_location(&self) -> Location {
        Location::in_function(&self.symbol)
    }

    fn types_of(values: &[ValueId], module: &Module) -> Result<Vec<TypeId>> {
        values
            .iter()
            .map(|v| {
                module.value_type(*v).ok_or_else(|| {
                    Error::InternalConsistency(format!("The value {v} does not exist"))
                })
            })
            .collect()
    }
}

/// Gets the source types of the parameters and results of a function with
/// body `graph`, looking the types of constant outputs up in `constants`.
///
/// # Errors
///
/// - [`Error::InternalConsistency`] if an output is neither defined in
///   `graph` nor in `constants`.
pub fn signature_types(
    graph: &TracedGraph,
    constants: &ConstantTable,
) -> Result<(Vec<SourceType>, Vec<SourceType>)> {
    let results = graph
        .outputs
        .iter()
        .map(|output| {
            let ty = match output {
                Operand::Value(id) => graph.value_info(*id).map(|i| i.ty.clone()),
                Operand::Constant(id) => constants.get(*id).map(|c| c.ty.clone()),
            };
            ty.ok_or_else(|| {
                Error::InternalConsistency(format!("The graph output {output} is not defined"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((graph.input_types(), results))
}

#[cfg(test)]
mod test {
    use graft_errors::import::Error;
    use graft_ir::{
        diagnostic::{pop_handler, push_handler, Diagnostic, Severity},
        dialect::DialectRegistry,
        module::{Attribute, Region},
        Module,
    };
    use graft_trace::{
        constant::{ConstantTable, ConstantValue},
        graph::{GraphBuilder, Operand, TracedGraph, ValueIds},
        types::SourceType,
    };

    use crate::{
        function_importer::{signature_types, FunctionImporter, ImportState},
        type_mapper::TypeMapper,
        value_importer::ValueImporter,
    };

    struct Outcome {
        result:      graft_errors::import::Result<()>,
        state:       ImportState,
        module:      Module,
        diagnostics: Vec<Diagnostic>,
    }

    fn import(graph: &TracedGraph, constants: &ConstantTable) -> Outcome {
        let registry = DialectRegistry::standard();
        let mut module = Module::new("m");
        let values = ValueImporter::new(constants, 256);
        let mut importer = FunctionImporter::new("f", &registry, values);

        let handler = push_handler(None);
        let result = importer.import(graph, &mut TypeMapper::new(), &mut module);
        let diagnostics = pop_handler(handler);

        Outcome {
            result,
            state: importer.state(),
            module,
            diagnostics,
        }
    }

    fn body(module: &Module) -> &Region {
        module.function("f").and_then(|f| f.body.as_ref()).expect("function is defined")
    }

    fn names(region: &Region) -> Vec<&str> {
        region.operations.iter().map(|o| o.name.as_str()).collect()
    }

    #[test]
    fn imports_straight_line_graphs() -> anyhow::Result<()> {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let x = graph.input(SourceType::tensor());
        let y = graph.node("aten::relu", &[x.into()], &[SourceType::tensor()]);
        let z = graph.node("aten::add.Tensor", &[x.into(), y[0].into()], &[SourceType::tensor()]);
        graph.output(z[0]);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        outcome.result?;
        assert_eq!(outcome.state, ImportState::Done);
        assert!(outcome.diagnostics.is_empty());

        let body = body(&outcome.module);
        assert_eq!(body.arguments.len(), 1);
        assert_eq!(names(body), vec!["torch.aten.relu", "torch.aten.add", "func.return"]);
        assert_eq!(body.operations[0].operands, body.arguments);
        assert_eq!(
            body.operations[1].attribute("overload"),
            Some(&Attribute::Str("Tensor".to_string()))
        );
        assert_eq!(body.operations[2].operands, body.operations[1].results);
        Ok(())
    }

    #[test]
    fn constants_are_hoisted_and_shared() -> anyhow::Result<()> {
        let mut constants = ConstantTable::new();
        let two = constants.insert(SourceType::Int, ConstantValue::Int(2));
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let x = graph.input(SourceType::Int);
        let a = graph.node("aten::mul.int", &[x.into(), two.into()], &[SourceType::Int]);
        let b = graph.node("aten::mul.int", &[a[0].into(), two.into()], &[SourceType::Int]);
        graph.output(b[0]);
        let outcome = import(&graph.finish(), &constants);

        outcome.result?;
        let body = body(&outcome.module);
        assert_eq!(
            names(body),
            vec!["torch.constant.int", "torch.aten.mul", "torch.aten.mul", "func.return"]
        );
        let constant = body.operations[0].results[0];
        assert_eq!(body.operations[1].operands[1], constant);
        assert_eq!(body.operations[2].operands[1], constant);
        Ok(())
    }

    #[test]
    fn unsupported_operations_fail_without_defining_the_function() {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let x = graph.input(SourceType::tensor());
        graph.node("aten::relu", &[x.into()], &[SourceType::tensor()]);
        let y = graph.node("aten::frobnicate", &[x.into()], &[SourceType::tensor()]);
        graph.output(y[0]);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        let Err(Error::UnsupportedOperation {
            identifier,
            location,
        }) = outcome.result
        else {
            panic!("expected an unsupported operation");
        };
        assert_eq!(identifier, "aten::frobnicate");
        assert!(location.contains("node 1"));
        assert_eq!(outcome.state, ImportState::Failed);
        assert!(outcome.module.function("f").is_none());

        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].severity, Severity::Error);
        let at = outcome.diagnostics[0].location.as_ref().expect("located");
        assert_eq!(at.function.as_deref(), Some("f"));
        assert_eq!(at.path.to_string(), "1");
        assert_eq!(at.operation.as_deref(), Some("aten::frobnicate"));
    }

    #[test]
    fn branches_become_two_region_operations() -> anyhow::Result<()> {
        let mut constants = ConstantTable::new();
        let one = constants.insert(SourceType::Int, ConstantValue::Int(1));
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let cond = graph.input(SourceType::Bool);
        let x = graph.input(SourceType::Int);

        let mut then_block = GraphBuilder::new(&ids);
        let sum = then_block.node("aten::add.int", &[x.into(), one.into()], &[SourceType::Int]);
        then_block.output(sum[0]);
        let mut else_block = GraphBuilder::new(&ids);
        else_block.output(x);

        let result = graph.node_with_blocks(
            "prim::If",
            &[cond.into()],
            &[SourceType::Int],
            vec![then_block.finish(), else_block.finish()],
        );
        graph.output(result[0]);
        let outcome = import(&graph.finish(), &constants);

        outcome.result?;
        let body = body(&outcome.module);
        assert_eq!(names(body), vec!["torch.constant.int", "torch.prim.If", "func.return"]);

        let branch = &body.operations[1];
        assert_eq!(branch.regions.len(), 2);
        assert_eq!(names(&branch.regions[0]), vec!["torch.aten.add", "torch.prim.If.yield"]);
        assert_eq!(names(&branch.regions[1]), vec!["torch.prim.If.yield"]);
        assert_eq!(branch.regions[1].operations[0].operands, vec![body.arguments[1]]);
        assert_eq!(body.operations[2].operands, branch.results);
        Ok(())
    }

    #[test]
    fn loops_thread_carried_values() -> anyhow::Result<()> {
        let mut constants = ConstantTable::new();
        let trips = constants.insert(SourceType::Int, ConstantValue::Int(10));
        let yes = constants.insert(SourceType::Bool, ConstantValue::Bool(true));
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let x = graph.input(SourceType::tensor());

        let mut body_graph = GraphBuilder::new(&ids);
        body_graph.input(SourceType::Int);
        let carried = body_graph.input(SourceType::tensor());
        let next = body_graph.node("aten::relu", &[carried.into()], &[SourceType::tensor()]);
        body_graph.output(yes);
        body_graph.output(next[0]);

        let result = graph.node_with_blocks(
            "prim::Loop",
            &[trips.into(), yes.into(), x.into()],
            &[SourceType::tensor()],
            vec![body_graph.finish()],
        );
        graph.output(result[0]);
        let outcome = import(&graph.finish(), &constants);

        outcome.result?;
        let body = body(&outcome.module);
        let looped = body.operations.iter().find(|o| o.name == "torch.prim.Loop").expect("loop");
        assert_eq!(looped.operands.len(), 3);
        assert_eq!(looped.results.len(), 1);
        assert_eq!(looped.regions.len(), 1);

        let region = &looped.regions[0];
        assert_eq!(region.arguments.len(), 2);
        let condition = region.terminator().expect("terminated");
        assert_eq!(condition.name, "torch.prim.Loop.condition");
        assert_eq!(condition.operands.len(), 2);
        assert_eq!(condition.operands[1], region.operations[0].results[0]);
        Ok(())
    }

    #[test]
    fn nested_failures_report_their_path() {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let cond = graph.input(SourceType::Bool);
        let x = graph.input(SourceType::tensor());

        let mut then_block = GraphBuilder::new(&ids);
        then_block.output(x);
        let mut else_block = GraphBuilder::new(&ids);
        let y = else_block.node("aten::relu", &[x.into()], &[SourceType::tensor()]);
        let z = else_block.node("aten::unknown", &[y[0].into()], &[SourceType::tensor()]);
        else_block.output(z[0]);

        graph.node("aten::relu", &[x.into()], &[SourceType::tensor()]);
        let result = graph.node_with_blocks(
            "prim::If",
            &[cond.into()],
            &[SourceType::tensor()],
            vec![then_block.finish(), else_block.finish()],
        );
        graph.output(result[0]);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        assert!(matches!(outcome.result, Err(Error::UnsupportedOperation { .. })));
        let at = outcome.diagnostics[0].location.as_ref().expect("located");
        assert_eq!(at.path.to_string(), "1[1]/1");
    }

    #[test]
    fn values_of_nested_graphs_do_not_escape() {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let cond = graph.input(SourceType::Bool);
        let x = graph.input(SourceType::tensor());

        let mut then_block = GraphBuilder::new(&ids);
        let inner = then_block.node("aten::relu", &[x.into()], &[SourceType::tensor()]);
        then_block.output(inner[0]);
        let mut else_block = GraphBuilder::new(&ids);
        else_block.output(x);

        graph.node_with_blocks(
            "prim::If",
            &[cond.into()],
            &[SourceType::tensor()],
            vec![then_block.finish(), else_block.finish()],
        );
        graph.output(inner[0]);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        assert!(matches!(outcome.result, Err(Error::InternalConsistency(_))));
        assert_eq!(outcome.state, ImportState::Failed);
    }

    #[test]
    fn malformed_control_flow_is_rejected() {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let cond = graph.input(SourceType::Bool);
        let mut only = GraphBuilder::new(&ids);
        only.output(cond);
        let result =
            graph.node_with_blocks("prim::If", &[cond.into()], &[SourceType::Bool], vec![only.finish()]);
        graph.output(result[0]);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        assert!(
            matches!(outcome.result, Err(Error::InternalConsistency(msg)) if msg.contains("two nested graphs"))
        );
    }

    #[test]
    fn arity_violations_are_rejected() {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let x = graph.input(SourceType::tensor());
        let y = graph.node("aten::relu", &[x.into(), x.into()], &[SourceType::tensor()]);
        graph.output(y[0]);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        assert!(matches!(outcome.result, Err(Error::InternalConsistency(msg)) if msg.contains("operand")));
    }

    #[test]
    fn deeply_nested_graphs_are_walked_without_recursion() -> anyhow::Result<()> {
        let ids = ValueIds::new();
        let cond = ids.fresh();
        let depth = 64;

        // Build from the innermost branch outward.
        let mut current: Option<TracedGraph> = None;
        for _ in 0..depth {
            let mut builder = GraphBuilder::new(&ids);
            match current.take() {
                None => builder.output(cond),
                Some(inner) => {
                    let mut other = GraphBuilder::new(&ids);
                    other.output(cond);
                    let out = builder.node_with_blocks(
                        "prim::If",
                        &[Operand::Value(cond)],
                        &[SourceType::Bool],
                        vec![inner, other.finish()],
                    );
                    builder.output(out[0]);
                }
            }
            current = Some(builder.finish());
        }
        let mut graph = current.expect("built");
        graph.inputs.insert(0, graft_trace::graph::ValueInfo {
            id:         cond,
            ty:         SourceType::Bool,
            debug_name: None,
        });
        let outcome = import(&graph, &ConstantTable::new());

        outcome.result?;
        assert_eq!(body(&outcome.module).total_operations(), 1 + 3 * (depth - 1));
        Ok(())
    }

    #[test]
    fn importers_are_single_use() -> anyhow::Result<()> {
        let registry = DialectRegistry::standard();
        let constants = ConstantTable::new();
        let mut module = Module::new("m");
        let mut mapper = TypeMapper::new();
        let mut importer =
            FunctionImporter::new("f", &registry, ValueImporter::new(&constants, 256));
        let graph = TracedGraph::default();

        importer.import(&graph, &mut mapper, &mut module)?;
        let handler = push_handler(None);
        let again = importer.import(&graph, &mut mapper, &mut module);
        let _ = pop_handler(handler);

        assert!(matches!(again, Err(Error::InternalConsistency(_))));
        Ok(())
    }

    #[test]
    fn signatures_include_constant_outputs() -> anyhow::Result<()> {
        let mut constants = ConstantTable::new();
        let name = constants.insert(SourceType::Str, ConstantValue::Str("hi".to_string()));
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let x = graph.input(SourceType::Float);
        graph.output(x);
        graph.output(name);

        let (params, results) = signature_types(&graph.finish(), &constants)?;
        assert_eq!(params, vec![SourceType::Float]);
        assert_eq!(results, vec![SourceType::Float, SourceType::Str]);
        Ok(())
    }

    #[test]
    fn tuples_are_built_and_unpacked_as_lists() -> anyhow::Result<()> {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let a = graph.input(SourceType::Int);
        let b = graph.input(SourceType::Int);
        let pair_ty = SourceType::Tuple(vec![SourceType::Int, SourceType::Int]);
        let pair = graph.node("prim::TupleConstruct", &[a.into(), b.into()], &[pair_ty]);
        let unpacked =
            graph.node("prim::TupleUnpack", &[pair[0].into()], &[SourceType::Int, SourceType::Int]);
        let list = graph.node(
            "prim::ListConstruct",
            &[unpacked[1].into(), unpacked[0].into()],
            &[SourceType::list_of(SourceType::Int)],
        );
        let items =
            graph.node("prim::ListUnpack", &[list[0].into()], &[SourceType::Int, SourceType::Int]);
        graph.output(items[0]);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        outcome.result?;
        let body = body(&outcome.module);
        assert_eq!(
            names(body),
            vec![
                "torch.prim.ListConstruct",
                "torch.prim.ListUnpack",
                "torch.prim.ListConstruct",
                "torch.prim.ListUnpack",
                "func.return"
            ]
        );
        let ops = &body.operations;
        assert_eq!(ops[0].operands, body.arguments);
        assert_eq!(ops[1].results.len(), 2);
        assert_eq!(ops[2].operands, vec![ops[1].results[1], ops[1].results[0]]);
        assert_eq!(ops[4].operands, vec![ops[3].results[0]]);
        Ok(())
    }

    #[test]
    fn effects_without_results_are_kept() -> anyhow::Result<()> {
        let mut constants = ConstantTable::new();
        let message = constants.insert(SourceType::Str, ConstantValue::Str("bad input".to_string()));
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let x = graph.input(SourceType::tensor());
        let printed = graph.node("prim::Print", &[x.into()], &[]);
        let raised = graph.node("prim::RaiseException", &[message.into()], &[]);
        graph.output(x);
        let outcome = import(&graph.finish(), &constants);

        outcome.result?;
        assert!(printed.is_empty());
        assert!(raised.is_empty());
        let body = body(&outcome.module);
        assert_eq!(
            names(body),
            vec!["torch.constant.str", "torch.prim.Print", "torch.prim.RaiseException", "func.return"]
        );
        assert!(body.operations[1].results.is_empty());
        assert_eq!(body.operations[1].operands, body.arguments);
        assert!(body.operations[2].results.is_empty());
        assert_eq!(body.operations[2].operands, body.operations[0].results);
        Ok(())
    }

    #[test]
    fn unsupported_input_types_fail_while_importing_inputs() {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        graph.input(SourceType::Int);
        let anything = graph.input(SourceType::Any);
        graph.output(anything);
        let outcome = import(&graph.finish(), &ConstantTable::new());

        assert_eq!(outcome.result, Err(Error::UnsupportedType("Any".to_string())));
        assert_eq!(outcome.state, ImportState::Failed);
        assert!(outcome.module.function("f").is_none());

        assert_eq!(outcome.diagnostics.len(), 1);
        let at = outcome.diagnostics[0].location.as_ref().expect("located");
        assert_eq!(at.function.as_deref(), Some("f"));
        assert_eq!(at.value.as_deref(), Some(anything.to_string().as_str()));
        assert!(at.path.is_empty());
    }

    #[test]
    fn nested_graphs_cannot_redefine_outer_values() {
        let ids = ValueIds::new();
        let mut graph = GraphBuilder::new(&ids);
        let cond = graph.input(SourceType::Bool);
        let x = graph.input(SourceType::tensor());

        let mut then_block = GraphBuilder::new(&ids);
        let inner = then_block.node("aten::relu", &[x.into()], &[SourceType::tensor()]);
        then_block.output(inner[0]);
        let mut else_block = GraphBuilder::new(&ids);
        else_block.output(x);

        let result = graph.node_with_blocks(
            "prim::If",
            &[cond.into()],
            &[SourceType::tensor()],
            vec![then_block.finish(), else_block.finish()],
        );
        graph.output(result[0]);
        let mut graph = graph.finish();
        graph.nodes[0].blocks[0].nodes[0].outputs[0].id = x;
        let outcome = import(&graph, &ConstantTable::new());

        assert!(
            matches!(outcome.result, Err(Error::InternalConsistency(msg)) if msg.contains("more than once"))
        );
        let at = outcome.diagnostics[0].location.as_ref().expect("located");
        assert_eq!(at.path.to_string(), "0[0]/0");
    }
}
