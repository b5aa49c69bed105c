//! The entry point of the importer, which turns a whole traced program into a
//! verified IR module.
//!
//! A build proceeds in a fixed order:
//!
//! 1. The IR dialects are registered, which happens only once per process no
//!    matter how many builds run.
//! 2. Every function of the program is declared with its mapped signature, so
//!    that functions can refer to each other regardless of their order.
//! 3. Constants used by more than one function are promoted to global slots
//!    of their own, so that each is materialized exactly once in the module.
//! 4. The program's global slots and the promoted ones are imported with
//!    their initializers, each after the globals its constant refers to.
//! 5. Each function body is imported in its own diagnostic capture scope,
//!    reading every constant that has a global slot from that slot.
//! 6. The finished module is verified, and the parameter types of each
//!    function are checked against the graph it was built from.
//!
//! Any failure aborts the whole build. The caller then receives the error and
//! every diagnostic captured up to that point, but never a partially-built
//! module.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt::{Display, Formatter},
};

use derivative::Derivative;
use graft_errors::{build, import};
use graft_ir::{
    diagnostic::{self, Diagnostic, EchoSink, Location},
    dialect::DialectRegistry,
    registration,
    types::TypeKind,
    verify::verify,
    Module,
};
use graft_trace::{
    constant::{ConstantId, ConstantTable},
    program::GlobalSlot,
    Program,
};

use crate::{
    constant::{DEFAULT_MODULE_NAME, DEFAULT_RESOURCE_THRESHOLD},
    diagnostics::CaptureScope,
    function_importer::{signature_types, FunctionImporter},
    type_mapper::TypeMapper,
    value_importer::ValueImporter,
};

/// The configuration for a [`ModuleBuilder`].
///
/// # API Style
///
/// Please note that the API for this type consumes `self` and is hence
/// designed to have calls chained in the "fluent" API style.
#[derive(Clone, Derivative)]
#[derivative(Debug, Default)]
pub struct ImportConfig {
    /// The name for the produced module, overriding the program's own name.
    pub module_name: Option<String>,

    /// A sink to which every captured diagnostic is also written, one per
    /// line, as it is emitted.
    #[derivative(Debug = "ignore")]
    pub echo: Option<EchoSink>,

    /// The size in bytes at or above which tensor payloads are stored as
    /// module resources rather than inline.
    #[derivative(Default(value = "DEFAULT_RESOURCE_THRESHOLD"))]
    pub resource_threshold: usize,
}

impl ImportConfig {
    #[must_use]
    pub fn with_module_name(mut self, name: &str) -> Self {
        self.module_name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_echo(mut self, sink: EchoSink) -> Self {
        self.echo = Some(sink);
        self
    }

    #[must_use]
    pub fn with_resource_threshold(mut self, bytes: usize) -> Self {
        self.resource_threshold = bytes;
        self
    }
}

/// The result of a successful build.
#[derive(Debug)]
pub struct BuildOutput {
    /// The verified module.
    pub module: Module,

    /// Every diagnostic captured during the build in the order they were
    /// emitted. These contain no errors, but may contain warnings and notes.
    pub diagnostics: Vec<Diagnostic>,
}

/// The result of a failed build.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildFailure {
    pub error: build::Error,

    /// Every diagnostic captured before the build was aborted, in the order
    /// they were emitted.
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildFailure {
    fn new(error: impl Into<build::Error>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            error: error.into(),
            diagnostics,
        }
    }
}

impl Display for BuildFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n  {diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Builds IR modules from traced programs.
#[derive(Clone, Debug, Default)]
pub struct ModuleBuilder {
    config: ImportConfig,
}

impl ModuleBuilder {
    /// Creates a builder that uses the provided `config` for every build.
    #[must_use]
    pub fn new(config: ImportConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Translates `program` into a new, verified, IR module.
    ///
    /// # Errors
    ///
    /// - [`BuildFailure`] holding a [`build::Error::Import`] if any part of the
    ///   program cannot be translated.
    /// - [`BuildFailure`] holding a [`build::Error::InternalConsistency`] if
    ///   the translated module fails verification.
    pub fn build(&self, program: &Program) -> Result<BuildOutput, BuildFailure> {
        let name = self.module_name(program);
        let _span = tracing::debug_span!("build", module = %name).entered();

        let registry = registration::global().init_once(DialectRegistry::standard);
        let mut module = Module::new(&name);
        let mut mapper = TypeMapper::new();
        let mut diagnostics = Vec::new();

        let scope = self.capture();
        let declared = self.declare(program, &mut mapper, &mut module);
        let promoted = Self::shared_constants(program, &module);
        let declared = declared
            .and_then(|()| self.import_globals(program, &promoted, &mut mapper, &mut module));
        diagnostics.extend(scope.end());
        if let Err(error) = declared {
            return Err(BuildFailure::new(error, diagnostics));
        }

        for function in &program.functions {
            let scope = self.capture();
            let values = ValueImporter::new(&program.constants, self.config.resource_threshold)
                .with_globals(&program.globals)
                .with_globals(&promoted);
            let mut importer = FunctionImporter::new(&function.name, &registry, values);
            let imported = importer.import(&function.graph, &mut mapper, &mut module);
            diagnostics.extend(scope.end());
            if let Err(error) = imported {
                return Err(BuildFailure::new(error, diagnostics));
            }
        }

        let scope = self.capture();
        let checked = verify(&module, &registry)
            .map_err(|e| build::Error::InternalConsistency(e.to_string()))
            .and_then(|()| Self::check_signatures(program, &mut mapper, &mut module));
        diagnostics.extend(scope.end());
        if let Err(error) = checked {
            return Err(BuildFailure::new(error, diagnostics));
        }

        tracing::debug!(
            functions = module.functions().len(),
            globals = module.globals().len(),
            operations = module.total_operations(),
            "Module built"
        );
        Ok(BuildOutput {
            module,
            diagnostics,
        })
    }

    fn module_name(&self, program: &Program) -> String {
        self.config
            .module_name
            .clone()
            .or_else(|| program.name.clone())
            .unwrap_or_else(|| DEFAULT_MODULE_NAME.to_string())
    }

    fn capture(&self) -> CaptureScope {
        CaptureScope::begin_with(self.config.echo.clone())
    }

    /// Declares every function of `program`.
    fn declare(
        &self,
        program: &Program,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> import::Result<()> {
        for function in &program.functions {
            let declared = signature_types(&function.graph, &program.constants)
                .and_then(|(params, results)| mapper.map_signature(&params, &results, module))
                .and_then(|ty| {
                    module
                        .declare_function(&function.name, ty)
                        .map_err(|e| import::Error::InternalConsistency(e.to_string()))
                });
            if let Err(error) = declared {
                diagnostic::emit_error(error.to_string(), Some(Location::in_function(&function.name)));
                return Err(error);
            }
        }

        Ok(())
    }

    /// Creates a global slot for every constant that more than one function
    /// of `program` uses, directly or through references, and that no global
    /// of `program` is initialized from already.
    ///
    /// Each slot is named after its constant, avoiding any symbol that is
    /// taken in `module` or by the globals of `program`.
    fn shared_constants(program: &Program, module: &Module) -> Vec<GlobalSlot> {
        let mut users: BTreeMap<ConstantId, usize> = BTreeMap::new();
        for function in &program.functions {
            for id in program.constants.closure(function.graph.constants()) {
                *users.entry(id).or_default() += 1;
            }
        }

        let initialized: HashSet<_> = program.globals.iter().map(|g| g.value).collect();
        let mut taken: HashSet<String> = program.globals.iter().map(|g| g.name.clone()).collect();
        let mut slots = Vec::new();
        for (id, count) in users {
            // Missing constants are reported where a function uses them.
            if count < 2 || initialized.contains(&id) || program.constants.get(id).is_none() {
                continue;
            }

            let base = format!("const{}", id.0);
            let mut name = base.clone();
            let mut suffix = 0usize;
            while taken.contains(&name) || module.lookup_symbol(&name).is_some() {
                suffix += 1;
                name = format!("{base}_{suffix}");
            }
            taken.insert(name.clone());

            tracing::debug!(constant = %id, users = count, global = %name, "Promoted shared constant");
            slots.push(GlobalSlot { name, value: id });
        }
        slots
    }

    /// Imports the globals of `program` and the `promoted` ones, with each
    /// initializer reading the globals imported before it.
    fn import_globals<'p>(
        &self,
        program: &'p Program,
        promoted: &'p [GlobalSlot],
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> import::Result<()> {
        let slots: Vec<_> = program.globals.iter().chain(promoted).collect();
        let mut values = ValueImporter::new(&program.constants, self.config.resource_threshold);
        for slot in initialization_order(&slots, &program.constants) {
            if let Err(error) = values.import_global(slot, mapper, module) {
                diagnostic::emit_error(error.to_string(), Some(Location::in_global(&slot.name)));
                return Err(error);
            }
        }

        Ok(())
    }

    /// Checks that the parameter types of every function map back to source
    /// types that describe the graph inputs it was built from.
    fn check_signatures(
        program: &Program,
        mapper: &mut TypeMapper,
        module: &mut Module,
    ) -> build::Result<()> {
        let mut mismatches = 0usize;
        for function in &program.functions {
            let inputs = match module.function(&function.name).and_then(|f| module.types.get(f.ty)) {
                Some(TypeKind::Function { inputs, .. }) => inputs.clone(),
                _ => Vec::new(),
            };
            if inputs.len() != function.graph.inputs.len() {
                mismatches += 1;
                diagnostic::emit_error(
                    format!(
                        "The function takes {} parameter(s) but its graph has {} input(s)",
                        inputs.len(),
                        function.graph.inputs.len()
                    ),
                    Some(Location::in_function(&function.name)),
                );
                continue;
            }

            for (param, input) in inputs.iter().zip(&function.graph.inputs) {
                let recovered = TypeMapper::source_type_of(*param, module);
                let round_trips = recovered
                    .and_then(|ty| mapper.map_type(&ty, module).ok())
                    .is_some_and(|ty| ty == *param);
                let describes_input = mapper.map_type(&input.ty, module).is_ok_and(|ty| ty == *param);
                if !round_trips || !describes_input {
                    mismatches += 1;
                    diagnostic::emit_error(
                        format!(
                            "The parameter of type {} does not describe the input of type `{}`",
                            module.types.render(*param),
                            input.ty
                        ),
                        Some(
                            Location::in_function(&function.name).with_value(&input.id.to_string()),
                        ),
                    );
                }
            }
        }

        if mismatches > 0 {
            Err(build::Error::InternalConsistency(format!(
                "{mismatches} function signature(s) disagree with the traced program"
            )))?;
        }
        Ok(())
    }
}

/// Orders `slots` so that every slot comes after the slots initialized from
/// constants its own constant refers to.
///
/// Slots that do not depend on each other keep their relative order. Cycles
/// are broken arbitrarily, and are rejected when the constants are imported.
fn initialization_order<'s>(
    slots: &[&'s GlobalSlot],
    constants: &ConstantTable,
) -> Vec<&'s GlobalSlot> {
    let mut by_constant: HashMap<ConstantId, Vec<&'s GlobalSlot>> = HashMap::new();
    for slot in slots {
        by_constant.entry(slot.value).or_default().push(*slot);
    }

    let mut order = Vec::with_capacity(slots.len());
    let mut visited = HashSet::new();
    for root in slots {
        // Each entry is a constant and whether its references have been queued.
        let mut pending = vec![(root.value, false)];
        while let Some((id, expanded)) = pending.pop() {
            if expanded {
                order.extend(by_constant.remove(&id).unwrap_or_default());
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            pending.push((id, true));
            if let Some(constant) = constants.get(id) {
                pending.extend(constant.value.references().into_iter().rev().map(|r| (r, false)));
            }
        }
    }
    order
}
