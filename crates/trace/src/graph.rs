//! Traced computation graphs.
//!
//! A [`TracedGraph`] is the recording of one function body: its inputs, the
//! nodes that executed in order, and the operands it returned. Control-flow
//! nodes own the graphs of their branch and loop bodies in
//! [`Node::blocks`].
//!
//! # Value Identity
//!
//! Every value defined anywhere in a function, including inside nested
//! blocks, carries a [`ValueId`] that is unique within that function. The
//! [`ValueIds`] allocator is shared by all the [`GraphBuilder`]s that build the
//! graphs of a single function to maintain this.

use std::{cell::Cell, collections::BTreeSet};

use crate::{constant::ConstantId, types::SourceType};

/// The function-unique identity of a value defined in a traced graph.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ValueId(pub u32);

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The definition of a value, as either a graph input or a node output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValueInfo {
    pub id:         ValueId,
    pub ty:         SourceType,
    pub debug_name: Option<String>,
}

/// A use of a value by a node or as a graph output.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operand {
    /// A value defined by a graph input or an earlier node.
    Value(ValueId),

    /// An entry in the program's constant table.
    Constant(ConstantId),
}

impl From<ValueId> for Operand {
    fn from(value: ValueId) -> Self {
        Self::Value(value)
    }
}

impl From<ConstantId> for Operand {
    fn from(value: ConstantId) -> Self {
        Self::Constant(value)
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Constant(c) => write!(f, "{c}"),
        }
    }
}

/// A single executed operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    /// The qualified operation identifier, such as `aten::add.Tensor` or
    /// `prim::If`.
    pub kind: String,

    pub inputs:  Vec<Operand>,
    pub outputs: Vec<ValueInfo>,

    /// The nested graphs owned by a control-flow node, in the order the
    /// operation defines them.
    pub blocks: Vec<TracedGraph>,
}

/// An ordered, acyclic sequence of nodes with designated inputs and outputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TracedGraph {
    pub inputs:  Vec<ValueInfo>,
    pub nodes:   Vec<Node>,
    pub outputs: Vec<Operand>,
}

impl TracedGraph {
    /// Gets the source types of the graph's inputs, in order.
    #[must_use]
    pub fn input_types(&self) -> Vec<SourceType> {
        self.inputs.iter().map(|i| i.ty.clone()).collect()
    }

    /// Looks up the definition of `id` among the graph inputs and node outputs
    /// of this graph and all graphs nested in it.
    #[must_use]
    pub fn value_info(&self, id: ValueId) -> Option<&ValueInfo> {
        self.inputs.iter().find(|i| i.id == id).or_else(|| {
            self.nodes.iter().find_map(|node| {
                node.outputs
                    .iter()
                    .find(|o| o.id == id)
                    .or_else(|| node.blocks.iter().find_map(|b| b.value_info(id)))
            })
        })
    }

    /// Gets every constant used as an operand or output of this graph or of
    /// any graph nested in it.
    #[must_use]
    pub fn constants(&self) -> BTreeSet<ConstantId> {
        let mut used = BTreeSet::new();
        let mut pending = vec![self];
        while let Some(graph) = pending.pop() {
            let operands = graph.nodes.iter().flat_map(|n| &n.inputs).chain(&graph.outputs);
            used.extend(operands.filter_map(|operand| match operand {
                Operand::Constant(id) => Some(*id),
                Operand::Value(_) => None,
            }));
            pending.extend(graph.nodes.iter().flat_map(|n| &n.blocks));
        }
        used
    }
}

/// An allocator for function-unique value identities.
#[derive(Debug, Default)]
pub struct ValueIds {
    next: Cell<u32>,
}

impl ValueIds {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a value identity that has not been returned by this allocator
    /// before.
    pub fn fresh(&self) -> ValueId {
        let id = self.next.get();
        self.next.set(id + 1);
        ValueId(id)
    }
}

/// A utility for constructing traced graphs.
///
/// Builders for nested blocks must share the [`ValueIds`] of the graph they
/// are nested in, so that identities stay unique across the function.
#[derive(Debug)]
pub struct GraphBuilder<'a> {
    ids:   &'a ValueIds,
    graph: TracedGraph,
}

impl<'a> GraphBuilder<'a> {
    /// Creates a builder for an empty graph that allocates its values from
    /// `ids`.
    #[must_use]
    pub fn new(ids: &'a ValueIds) -> Self {
        Self {
            ids,
            graph: TracedGraph::default(),
        }
    }

    /// Adds a graph input of type `ty`.
    pub fn input(&mut self, ty: SourceType) -> ValueId {
        let id = self.ids.fresh();
        self.graph.inputs.push(ValueInfo {
            id,
            ty,
            debug_name: None,
        });
        id
    }

    /// Adds a graph input of type `ty` that is known to the host as `name`.
    pub fn named_input(&mut self, name: &str, ty: SourceType) -> ValueId {
        let id = self.input(ty);
        if let Some(info) = self.graph.inputs.last_mut() {
            info.debug_name = Some(name.to_string());
        }
        id
    }

    /// Appends a node of the provided `kind`, returning the identities of its
    /// freshly-defined outputs.
    pub fn node(&mut self, kind: &str, inputs: &[Operand], outputs: &[SourceType]) -> Vec<ValueId> {
        self.node_with_blocks(kind, inputs, outputs, Vec::new())
    }

    /// Appends a control-flow node that owns `blocks`, returning the identities
    /// of its freshly-defined outputs.
    pub fn node_with_blocks(
        &mut self,
        kind: &str,
        inputs: &[Operand],
        outputs: &[SourceType],
        blocks: Vec<TracedGraph>,
    ) -> Vec<ValueId> {
        let outputs: Vec<ValueInfo> = outputs
            .iter()
            .map(|ty| ValueInfo {
                id:         self.ids.fresh(),
                ty:         ty.clone(),
                debug_name: None,
            })
            .collect();
        let ids = outputs.iter().map(|o| o.id).collect();
        self.graph.nodes.push(Node {
            kind: kind.to_string(),
            inputs: inputs.to_vec(),
            outputs,
            blocks,
        });
        ids
    }

    /// Designates `operand` as the next output of the graph.
    pub fn output(&mut self, operand: impl Into<Operand>) {
        self.graph.outputs.push(operand.into());
    }

    /// Finishes building, returning the graph.
    #[must_use]
    pub fn finish(self) -> TracedGraph {
        self.graph
    }
}

#[cfg(test)]
mod test {
    use crate::{
        constant::ConstantId,
        graph::{GraphBuilder, Operand, ValueIds},
        types::SourceType,
    };

    #[test]
    fn identities_are_unique_across_nested_graphs() {
        let ids = ValueIds::new();
        let mut outer = GraphBuilder::new(&ids);
        let cond = outer.input(SourceType::Bool);

        let mut then_block = GraphBuilder::new(&ids);
        let one = then_block.node("prim::Constant", &[], &[SourceType::Int]);
        then_block.output(one[0]);
        let then_block = then_block.finish();

        let mut else_block = GraphBuilder::new(&ids);
        else_block.output(ConstantId(0));
        let else_block = else_block.finish();

        let result = outer.node_with_blocks(
            "prim::If",
            &[cond.into()],
            &[SourceType::Int],
            vec![then_block, else_block],
        );
        outer.output(result[0]);
        let graph = outer.finish();

        assert_ne!(one[0], result[0]);
        assert_ne!(cond, one[0]);
        assert_eq!(graph.outputs, vec![Operand::Value(result[0])]);
        assert_eq!(graph.nodes[0].blocks.len(), 2);
        assert_eq!(graph.value_info(one[0]).map(|i| &i.ty), Some(&SourceType::Int));
        assert!(graph.value_info(crate::graph::ValueId(99)).is_none());
        assert_eq!(graph.constants().into_iter().collect::<Vec<_>>(), vec![ConstantId(0)]);
    }

    #[test]
    fn constants_are_collected_from_every_use() {
        let ids = ValueIds::new();
        let mut outer = GraphBuilder::new(&ids);
        let x = outer.input(SourceType::Int);
        let sum = outer.node("aten::add.int", &[x.into(), ConstantId(3).into()], &[SourceType::Int]);

        let mut body = GraphBuilder::new(&ids);
        body.input(SourceType::Int);
        body.output(ConstantId(1));
        outer.node_with_blocks(
            "prim::Loop",
            &[ConstantId(5).into(), ConstantId(1).into()],
            &[],
            vec![body.finish()],
        );
        outer.output(sum[0]);
        outer.output(ConstantId(8));

        let used: Vec<_> = outer.finish().constants().into_iter().collect();
        assert_eq!(used, vec![ConstantId(1), ConstantId(3), ConstantId(5), ConstantId(8)]);
    }

    #[test]
    fn named_inputs_keep_their_names() {
        let ids = ValueIds::new();
        let mut builder = GraphBuilder::new(&ids);
        let x = builder.named_input("x", SourceType::tensor());
        let graph = builder.finish();

        assert_eq!(graph.inputs[0].id, x);
        assert_eq!(graph.inputs[0].debug_name.as_deref(), Some("x"));
        assert_eq!(graph.input_types(), vec![SourceType::tensor()]);
    }
}
