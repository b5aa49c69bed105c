//! Structural verification of IR modules.
//!
//! The verifier checks that a module is well formed with respect to the
//! registered dialects and the typing rules of the operations it knows about.
//! Every problem is reported as an error diagnostic through
//! [`crate::diagnostic`], and verification fails if any was found. The checks
//! are:
//!
//! - Every operation is registered, and has the operand, result and region
//!   counts its definition requires.
//! - Every region ends with the terminator appropriate to its owner, and
//!   terminators appear nowhere else.
//! - Function bodies take arguments matching their signature and return values
//!   matching it, and global initializers produce a value of the global's
//!   type.
//! - Every operand is defined before its use, either earlier in the same
//!   region or in an enclosing one.
//! - Constants carry attributes matching their result types, and aggregates,
//!   optionals, calls and structured control flow are typed consistently.
//! - Symbol references resolve to a function or global of the right type.
//!
//! Globals that are never read produce a warning, but do not fail
//! verification.

use std::collections::HashSet;

use graft_errors::ir::{Error, Result};
use itertools::Itertools;

use crate::{
    diagnostic::{self, Location},
    dialect::DialectRegistry,
    module::{Attribute, Module, Operation, Region, ValueId},
    types::{Dim, TypeId, TypeKind},
};

/// Verifies `module` against the dialects in `registry`.
///
/// # Errors
///
/// - [`Error::VerificationFailed`] with the number of problems found, if any
///   were found. Each problem has been emitted as an error diagnostic.
pub fn verify(module: &Module, registry: &DialectRegistry) -> Result<()> {
    let _span = tracing::debug_span!("verify", module = %module.name).entered();
    let mut verifier = Verifier {
        module,
        registry,
        symbol: "",
        in_global: false,
        visible: Vec::new(),
        errors: 0,
        global_reads: HashSet::new(),
    };

    for function in module.functions() {
        verifier.function(&function.symbol, function.ty, function.body.as_ref());
    }
    for global in module.globals() {
        verifier.global(&global.symbol, global.ty, &global.initializer);
    }
    for global in module.globals() {
        if !verifier.global_reads.contains(global.symbol.as_str()) {
            diagnostic::emit_warning(
                format!("The global `@{}` is never read", global.symbol),
                Some(Location::in_global(&global.symbol)),
            );
        }
    }

    tracing::debug!(errors = verifier.errors, "Verification complete");
    if verifier.errors > 0 {
        Err(Error::VerificationFailed(verifier.errors))?;
    }

    Ok(())
}

/// What owns a region, which determines how it must terminate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum RegionOwner {
    Function,
    Global,
    IfBranch,
    LoopBody,
}

impl RegionOwner {
    fn terminator(self) -> &'static str {
        match self {
            Self::Function => "func.return",
            Self::Global => "torch.global_slot.init",
            Self::IfBranch => "torch.prim.If.yield",
            Self::LoopBody => "torch.prim.Loop.condition",
        }
    }
}

struct Verifier<'a> {
    module:       &'a Module,
    registry:     &'a DialectRegistry,
    symbol:       &'a str,
    in_global:    bool,
    visible:      Vec<HashSet<ValueId>>,
    errors:       usize,
    global_reads: HashSet<&'a str>,
}

impl<'a> Verifier<'a> {
    fn error(&mut self, op: Option<&Operation>, message: String) {
        self.errors += 1;
        let owner = if self.in_global {
            Location::in_global(self.symbol)
        } else {
            Location::in_function(self.symbol)
        };
        let location = match op {
            Some(op) => op.location.clone().unwrap_or_else(|| owner.with_operation(&op.name)),
            None => owner,
        };
        diagnostic::emit_error(message, Some(location));
    }

    fn render(&self, ty: TypeId) -> String {
        self.module.types.render(ty)
    }

    fn kind(&self, ty: TypeId) -> Option<&'a TypeKind> {
        self.module.types.get(ty)
    }

    fn types_of(&self, values: &[ValueId]) -> Vec<Option<TypeId>> {
        values.iter().map(|v| self.module.value_type(*v)).collect()
    }

    fn function(&mut self, symbol: &'a str, ty: TypeId, body: Option<&'a Region>) {
        self.symbol = symbol;
        self.in_global = false;
        let Some(TypeKind::Function { inputs, results }) = self.kind(ty) else {
            self.error(None, format!("The type of `@{symbol}` is not a function type"));
            return;
        };
        let Some(body) = body else {
            return;
        };

        let arg_types = self.types_of(&body.arguments);
        if arg_types.len() != inputs.len()
            || arg_types.iter().zip(inputs).any(|(a, i)| *a != Some(*i))
        {
            self.error(
                None,
                format!(
                    "The body of `@{symbol}` takes {} argument(s) that do not match its signature {}",
                    arg_types.len(),
                    self.render(ty)
                ),
            );
        }

        self.region(body, RegionOwner::Function);
        self.terminator_operands(body, RegionOwner::Function, results);
    }

    fn global(&mut self, symbol: &'a str, ty: TypeId, initializer: &'a Region) {
        self.symbol = symbol;
        self.in_global = true;
        if !initializer.arguments.is_empty() {
            self.error(None, format!("The initializer of `@{symbol}` must not take arguments"));
        }
        self.region(initializer, RegionOwner::Global);
        self.terminator_operands(initializer, RegionOwner::Global, &[ty]);
    }

    /// Checks that the terminator of `region`, if it is there, yields values
    /// of exactly the `expected` types.
    fn terminator_operands(&mut self, region: &'a Region, owner: RegionOwner, expected: &[TypeId]) {
        let Some(terminator) = region.terminator().filter(|t| t.name == owner.terminator()) else {
            return;
        };
        let actual = self.types_of(&terminator.operands);
        if actual.len() != expected.len() || actual.iter().zip(expected).any(|(a, e)| *a != Some(*e)) {
            let expected_str = expected.iter().map(|t| self.render(*t)).join(", ");
            self.error(
                Some(terminator),
                format!("`{}` must yield values of type(s) ({expected_str})", terminator.name),
            );
        }
    }

    fn region(&mut self, region: &'a Region, owner: RegionOwner) {
        let expected = owner.terminator();
        match region.terminator() {
            None => self.error(None, format!("A region is empty but must end with `{expected}`")),
            Some(last) if last.name != expected => {
                self.error(Some(last), format!("The region must end with `{expected}`"));
            }
            Some(_) => (),
        }

        self.visible.push(region.arguments.iter().copied().collect());

        let count = region.operations.len();
        for (ix, op) in region.operations.iter().enumerate() {
            let is_terminator = self.registry.lookup(&op.name).is_some_and(|d| d.terminator);
            if is_terminator && ix + 1 != count {
                self.error(Some(op), format!("The terminator `{}` must end its region", op.name));
            }
            self.operation(op);
        }

        self.visible.pop();
    }

    fn is_visible(&self, value: ValueId) -> bool {
        self.visible.iter().any(|scope| scope.contains(&value))
    }

    fn operation(&mut self, op: &'a Operation) {
        for operand in &op.operands {
            if self.module.value(*operand).is_none() {
                self.error(Some(op), format!("The operand {operand} does not exist"));
            } else if !self.is_visible(*operand) {
                self.error(Some(op), format!("The operand {operand} does not dominate its use"));
            }
        }

        let Some(definition) = self.registry.lookup(&op.name) else {
            self.error(Some(op), format!("The operation `{}` is not registered", op.name));
            self.define_results(op);
            return;
        };

        let mut structurally_valid = true;
        if !definition.operands.admits(op.operands.len()) {
            structurally_valid = false;
            self.error(
                Some(op),
                format!(
                    "`{}` expects {} operand(s) but has {}",
                    op.name,
                    definition.operands,
                    op.operands.len()
                ),
            );
        }
        if !definition.results.admits(op.results.len()) {
            structurally_valid = false;
            self.error(
                Some(op),
                format!(
                    "`{}` expects {} result(s) but has {}",
                    op.name,
                    definition.results,
                    op.results.len()
                ),
            );
        }
        if definition.regions != op.regions.len() {
            structurally_valid = false;
            self.error(
                Some(op),
                format!(
                    "`{}` expects {} region(s) but has {}",
                    op.name,
                    definition.regions,
                    op.regions.len()
                ),
            );
        }

        if structurally_valid {
            self.typing(op);
        }

        match op.name.as_str() {
            "torch.prim.If" => {
                for region in &op.regions {
                    self.region(region, RegionOwner::IfBranch);
                }
            }
            "torch.prim.Loop" => {
                for region in &op.regions {
                    self.region(region, RegionOwner::LoopBody);
                }
            }
            _ => (),
        }

        self.define_results(op);
    }

    fn define_results(&mut self, op: &Operation) {
        if let Some(scope) = self.visible.last_mut() {
            scope.extend(op.results.iter().copied());
        }
    }

    fn attribute_is(op: &Operation, name: &str, check: impl Fn(&Attribute) -> bool) -> bool {
        op.attribute(name).is_some_and(check)
    }

    fn result_kind(&self, op: &Operation) -> Option<&'a TypeKind> {
        op.results.first().and_then(|r| self.module.value_type(*r)).and_then(|t| self.kind(t))
    }

    /// Checks the typing rules of the operations that have any.
    #[allow(clippy::too_many_lines)] // One arm per operation family
    fn typing(&mut self, op: &'a Operation) {
        let result_kind = self.result_kind(op);
        let result_ty = op.results.first().and_then(|r| self.module.value_type(*r));
        let operand_types = self.types_of(&op.operands);

        let constant_check = |kind: &TypeKind, attr: fn(&Attribute) -> bool| {
            result_kind == Some(kind) && Self::attribute_is(op, "value", attr)
        };

        match op.name.as_str() {
            "torch.constant.bool" => {
                if !constant_check(&TypeKind::Bool, |a| matches!(a, Attribute::Bool(_))) {
                    self.error(Some(op), "Expected a bool `value` and a bool result".to_string());
                }
            }
            "torch.constant.int" => {
                if !constant_check(&TypeKind::Int, |a| matches!(a, Attribute::Int(_))) {
                    self.error(Some(op), "Expected an int `value` and an int result".to_string());
                }
            }
            "torch.constant.float" => {
                if !constant_check(&TypeKind::Float, |a| matches!(a, Attribute::Float(_))) {
                    self.error(Some(op), "Expected a float `value` and a float result".to_string());
                }
            }
            "torch.constant.str" => {
                if !constant_check(&TypeKind::Str, |a| matches!(a, Attribute::Str(_))) {
                    self.error(Some(op), "Expected a string `value` and a str result".to_string());
                }
            }
            "torch.constant.device" => {
                if !constant_check(&TypeKind::Device, |a| matches!(a, Attribute::Str(_))) {
                    self.error(
                        Some(op),
                        "Expected a string `value` and a Device result".to_string(),
                    );
                }
            }
            "torch.constant.none" => {
                if result_kind != Some(&TypeKind::None) {
                    self.error(Some(op), "Expected a none result".to_string());
                }
            }
            "torch.tensor.literal" => self.tensor_literal(op, result_kind),
            "torch.prim.ListConstruct" => match result_kind {
                Some(TypeKind::List(elem)) => {
                    if operand_types.iter().any(|t| *t != Some(*elem)) {
                        self.error(
                            Some(op),
                            format!("Every element must have type {}", self.render(*elem)),
                        );
                    }
                }
                _ => self.error(Some(op), "Expected a list result".to_string()),
            },
            "torch.prim.ListUnpack" => match operand_types[0].and_then(|t| self.kind(t)) {
                Some(TypeKind::List(elem)) => {
                    if self.types_of(&op.results).iter().any(|t| *t != Some(*elem)) {
                        self.error(
                            Some(op),
                            format!("Every result must have type {}", self.render(*elem)),
                        );
                    }
                }
                _ => self.error(Some(op), "Expected a list operand".to_string()),
            },
            "torch.prim.StructConstruct" => match result_kind {
                Some(TypeKind::Struct { fields, .. }) => {
                    let names: Vec<String> = fields.iter().map(|(n, _)| n.clone()).collect();
                    let types_match = operand_types.len() == fields.len()
                        && operand_types.iter().zip(fields).all(|(o, (_, f))| *o == Some(*f));
                    let names_match = op.attribute("fields") == Some(&Attribute::Strings(names));
                    if !types_match || !names_match {
                        self.error(
                            Some(op),
                            "The operands and `fields` must match the struct's fields".to_string(),
                        );
                    }
                }
                _ => self.error(Some(op), "Expected a struct result".to_string()),
            },
            "torch.optional.some" => match result_kind {
                Some(TypeKind::Optional(inner)) if operand_types[0] == Some(*inner) => (),
                _ => self.error(
                    Some(op),
                    "Expected an optional result wrapping the operand's type".to_string(),
                ),
            },
            "torch.optional.none" => {
                if !matches!(result_kind, Some(TypeKind::Optional(_))) {
                    self.error(Some(op), "Expected an optional result".to_string());
                }
            }
            "func.constant" => {
                let target = match op.attribute("value") {
                    Some(Attribute::Symbol(s)) => self.module.function(s),
                    _ => None,
                };
                match target {
                    Some(f) if Some(f.ty) == result_ty => (),
                    Some(_) => self.error(
                        Some(op),
                        "The result type must be the referenced function's type".to_string(),
                    ),
                    None => self.error(
                        Some(op),
                        "The `value` must be a symbol naming a function".to_string(),
                    ),
                }
            }
            "func.call_indirect" => match operand_types[0].and_then(|t| self.kind(t)) {
                Some(TypeKind::Function { inputs, results }) => {
                    let args = &operand_types[1..];
                    let args_match = args.len() == inputs.len()
                        && args.iter().zip(inputs).all(|(a, i)| *a == Some(*i));
                    let result_types = self.types_of(&op.results);
                    let results_match = result_types.len() == results.len()
                        && result_types.iter().zip(results).all(|(a, r)| *a == Some(*r));
                    if !args_match || !results_match {
                        self.error(
                            Some(op),
                            "The call does not match the callee's signature".to_string(),
                        );
                    }
                }
                _ => self.error(Some(op), "The callee must have a function type".to_string()),
            },
            "torch.global_slot.get" => {
                let target = match op.attribute("slot") {
                    Some(Attribute::Symbol(s)) => self.module.global(s),
                    _ => None,
                };
                match target {
                    Some(g) => {
                        self.global_reads.insert(g.symbol.as_str());
                        if Some(g.ty) != result_ty {
                            self.error(
                                Some(op),
                                "The result type must be the global's type".to_string(),
                            );
                        }
                    }
                    None => self.error(
                        Some(op),
                        "The `slot` must be a symbol naming a global".to_string(),
                    ),
                }
            }
            "torch.prim.If" => self.if_op(op, &operand_types),
            "torch.prim.Loop" => self.loop_op(op, &operand_types),
            _ => (),
        }
    }

    fn tensor_literal(&mut self, op: &Operation, result_kind: Option<&TypeKind>) {
        let Some(TypeKind::Tensor { dtype, shape }) = result_kind else {
            self.error(Some(op), "A tensor literal must have a tensor result".to_string());
            return;
        };

        let actual = match op.attribute("value") {
            Some(Attribute::Dense(data)) => Some(data.len()),
            Some(Attribute::DenseResource(handle)) => {
                self.module.resources.get(handle).map(|data| data.len())
            }
            _ => None,
        };
        let Some(actual) = actual else {
            self.error(
                Some(op),
                "The `value` must be dense elements or an existing resource".to_string(),
            );
            return;
        };

        // The payload size can only be checked against a fully static type.
        let (Some(dtype), Some(shape)) = (dtype, shape) else {
            return;
        };
        let mut elements: u64 = 1;
        for dim in shape {
            match dim {
                Dim::Static(extent) => elements = elements.saturating_mul(*extent),
                Dim::Dynamic => return,
            }
        }
        let expected = usize::try_from(elements)
            .unwrap_or(usize::MAX)
            .saturating_mul(dtype.byte_width());
        if actual != expected {
            self.error(
                Some(op),
                format!("The literal holds {actual} bytes but its type requires {expected}"),
            );
        }
    }

    fn if_op(&mut self, op: &'a Operation, operand_types: &[Option<TypeId>]) {
        if operand_types[0].and_then(|t| self.kind(t)) != Some(&TypeKind::Bool) {
            self.error(Some(op), "The condition must be a bool".to_string());
        }

        let result_types: Vec<TypeId> = self.types_of(&op.results).into_iter().flatten().collect();
        for region in &op.regions {
            if !region.arguments.is_empty() {
                self.error(Some(op), "The branches must not take arguments".to_string());
            }
            self.terminator_operands(region, RegionOwner::IfBranch, &result_types);
        }
    }

    fn loop_op(&mut self, op: &'a Operation, operand_types: &[Option<TypeId>]) {
        let int = self.module.types.find(&TypeKind::Int);
        let boolean = self.module.types.find(&TypeKind::Bool);
        if operand_types[0].is_none() || operand_types[0] != int {
            self.error(Some(op), "The maximum trip count must be an int".to_string());
        }
        if operand_types[1].is_none() || operand_types[1] != boolean {
            self.error(Some(op), "The initial condition must be a bool".to_string());
        }

        let carried: Vec<Option<TypeId>> = operand_types[2..].to_vec();
        if self.types_of(&op.results) != carried {
            self.error(
                Some(op),
                "The results must have the types of the carried values".to_string(),
            );
        }

        let Some(body) = op.regions.first() else {
            return;
        };
        let mut expected_args = vec![int];
        expected_args.extend(carried.iter().copied());
        if self.types_of(&body.arguments) != expected_args {
            self.error(
                Some(op),
                "The body must take the iteration count and the carried values".to_string(),
            );
        }

        let mut expected_yield: Vec<TypeId> = boolean.into_iter().collect();
        expected_yield.extend(carried.into_iter().flatten());
        self.terminator_operands(body, RegionOwner::LoopBody, &expected_yield);
    }
}
