//! The top-level traced program handed over by the marshaling layer.

use crate::{
    constant::{ConstantId, ConstantTable},
    graph::TracedGraph,
};

/// A traced program: the functions to import, the module-level global slots,
/// and the constants they share.
///
/// The importer treats this as read-only for the whole of an import.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    /// The name of the program, which is used for the produced module unless
    /// the caller overrides it.
    pub name: Option<String>,

    pub functions: Vec<TracedFunction>,
    pub globals:   Vec<GlobalSlot>,
    pub constants: ConstantTable,
}

/// A named function of the program together with its traced body.
#[derive(Clone, Debug, PartialEq)]
pub struct TracedFunction {
    pub name:  String,
    pub graph: TracedGraph,
}

/// A named, module-level slot (such as a model parameter) initialized from a
/// constant.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalSlot {
    pub name:  String,
    pub value: ConstantId,
}

impl Program {
    /// Creates an empty program called `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Adds a function called `name` with body `graph` to the program.
    ///
    /// # API Style
    ///
    /// Please note that this API consumes `self` and is hence designed to have
    /// calls chained in the "fluent" API style.
    #[must_use]
    pub fn with_function(mut self, name: &str, graph: TracedGraph) -> Self {
        self.functions.push(TracedFunction {
            name: name.to_string(),
            graph,
        });
        self
    }

    /// Adds a global slot called `name` initialized from the constant `value`.
    ///
    /// # API Style
    ///
    /// Please note that this API consumes `self` and is hence designed to have
    /// calls chained in the "fluent" API style.
    #[must_use]
    pub fn with_global(mut self, name: &str, value: ConstantId) -> Self {
        self.globals.push(GlobalSlot {
            name: name.to_string(),
            value,
        });
        self
    }

    /// Gets the function called `name`, if it exists.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&TracedFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod test {
    use crate::{
        constant::ConstantValue,
        graph::{GraphBuilder, ValueIds},
        types::SourceType,
        Program,
    };

    #[test]
    fn functions_are_found_by_name() {
        let ids = ValueIds::new();
        let mut builder = GraphBuilder::new(&ids);
        let x = builder.input(SourceType::Int);
        builder.output(x);

        let mut program = Program::new("identity").with_function("forward", builder.finish());
        let weight = program.constants.insert(SourceType::Float, ConstantValue::Float(0.5));
        let program = program.with_global("weight", weight);

        assert_eq!(program.name.as_deref(), Some("identity"));
        assert!(program.function("forward").is_some());
        assert!(program.function("backward").is_none());
        assert_eq!(program.globals[0].value, weight);
    }
}
