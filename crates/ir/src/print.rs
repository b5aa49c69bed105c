//! A textual rendering of IR modules.
//!
//! The output follows the shape of MLIR's generic operation syntax so that it
//! is familiar, but it is only meant for humans reading test output and
//! debugging logs. Nothing parses it back.

use std::fmt::{Display, Formatter, Result};

use itertools::Itertools;

use crate::{
    module::{Attribute, Module, Operation, Region, ValueId},
    types::TypeKind,
};

const INDENT: &str = "  ";

impl Display for Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Symbol(s) => write!(f, "@{s}"),
            Self::Strings(strings) => {
                write!(f, "[{}]", strings.iter().map(|s| format!("{s:?}")).join(", "))
            }
            Self::Dense(data) => {
                let hex: String = data.iter().map(|b| format!("{b:02X}")).collect();
                write!(f, "dense<\"0x{hex}\">")
            }
            Self::DenseResource(handle) => write!(f, "dense_resource<{}>", handle.key),
        }
    }
}

struct Printer<'a> {
    module: &'a Module,
}

impl Printer<'_> {
    fn values(values: &[ValueId]) -> String {
        values.iter().map(ToString::to_string).join(", ")
    }

    fn types(&self, values: &[ValueId]) -> String {
        values
            .iter()
            .map(|v| {
                self.module
                    .value_type(*v)
                    .map_or("<<unknown>>".to_string(), |t| self.module.types.render(t))
            })
            .join(", ")
    }

    fn region(&self, f: &mut Formatter<'_>, region: &Region, depth: usize) -> Result {
        for op in &region.operations {
            self.operation(f, op, depth)?;
        }
        Ok(())
    }

    fn operation(&self, f: &mut Formatter<'_>, op: &Operation, depth: usize) -> Result {
        let pad = INDENT.repeat(depth);
        write!(f, "{pad}")?;
        if !op.results.is_empty() {
            write!(f, "{} = ", Self::values(&op.results))?;
        }
        write!(f, "\"{}\"({})", op.name, Self::values(&op.operands))?;

        if !op.regions.is_empty() {
            write!(f, " (")?;
            for (ix, region) in op.regions.iter().enumerate() {
                if ix > 0 {
                    write!(f, ", ")?;
                }
                writeln!(f, "{{")?;
                if !region.arguments.is_empty() {
                    let args = region
                        .arguments
                        .iter()
                        .map(|a| format!("{a}: {}", self.types(&[*a])))
                        .join(", ");
                    writeln!(f, "{pad}^bb0({args}):")?;
                }
                self.region(f, region, depth + 1)?;
                write!(f, "{pad}}}")?;
            }
            write!(f, ")")?;
        }

        if !op.attributes.is_empty() {
            let attrs = op.attributes.iter().map(|(n, a)| format!("{n} = {a}")).join(", ");
            write!(f, " {{{attrs}}}")?;
        }

        writeln!(
            f,
            " : ({}) -> ({})",
            self.types(&op.operands),
            self.types(&op.results)
        )
    }
}

impl Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let printer = Printer { module: self };
        writeln!(f, "module @{} {{", self.name)?;

        for global in self.globals() {
            writeln!(
                f,
                "{INDENT}torch.global_slot @{} : {} {{",
                global.symbol,
                self.types.render(global.ty)
            )?;
            printer.region(f, &global.initializer, 2)?;
            writeln!(f, "{INDENT}}}")?;
        }

        for function in self.functions() {
            let (inputs, results) = match self.types.get(function.ty) {
                Some(TypeKind::Function { inputs, results }) => (inputs.clone(), results.clone()),
                _ => (Vec::new(), Vec::new()),
            };
            let results_str = results.iter().map(|t| self.types.render(*t)).join(", ");

            match &function.body {
                None => {
                    let params = inputs.iter().map(|t| self.types.render(*t)).join(", ");
                    writeln!(
                        f,
                        "{INDENT}func.func private @{}({params}) -> ({results_str})",
                        function.symbol
                    )?;
                }
                Some(body) => {
                    let params = body
                        .arguments
                        .iter()
                        .map(|a| format!("{a}: {}", printer.types(&[*a])))
                        .join(", ");
                    writeln!(
                        f,
                        "{INDENT}func.func @{}({params}) -> ({results_str}) {{",
                        function.symbol
                    )?;
                    printer.region(f, body, 2)?;
                    writeln!(f, "{INDENT}}}")?;
                }
            }
        }

        write!(f, "}}")?;

        if !self.resources.is_empty() {
            writeln!(f)?;
            writeln!(f, "{{-# dialect_resources: {{")?;
            for (key, data) in self.resources.iter() {
                writeln!(f, "{INDENT}{key}: <{} bytes>", data.len())?;
            }
            write!(f, "}} #-}}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::{
        module::{Attribute, Module, OperationState, Region},
        types::TypeKind,
    };

    #[test]
    fn renders_attributes() {
        assert_eq!(Attribute::Float(1.0).to_string(), "1.0");
        assert_eq!(Attribute::Str("a\"b".to_string()).to_string(), "\"a\\\"b\"");
        assert_eq!(
            Attribute::Strings(vec!["x".to_string(), "y".to_string()]).to_string(),
            "[\"x\", \"y\"]"
        );
        assert_eq!(
            Attribute::Dense(Arc::from(vec![0x0au8, 0xff])).to_string(),
            "dense<\"0x0AFF\">"
        );
    }

    #[test]
    fn renders_a_module() -> anyhow::Result<()> {
        let mut module = Module::new("demo");
        let int = module.types.int();
        let sig = module.types.intern(TypeKind::Function {
            inputs:  vec![int],
            results: vec![int],
        });

        let mut body = Region::new();
        let x = module.add_region_argument(&mut body, int);
        let add = module.create_operation(
            OperationState::new("torch.aten.add")
                .with_operands(&[x, x])
                .with_results(&[int]),
        );
        let ret = module.create_operation(OperationState::new("func.return").with_operands(&add.results));
        body.push(add);
        body.push(ret);
        module.declare_function("double", sig)?;
        module.define_function("double", body)?;
        module.declare_function("external", sig)?;

        let expected = "\
module @demo {
  func.func @double(%0: !torch.int) -> (!torch.int) {
    %1 = \"torch.aten.add\"(%0, %0) : (!torch.int, !torch.int) -> (!torch.int)
    \"func.return\"(%1) : (!torch.int) -> ()
  }
  func.func private @external(!torch.int) -> (!torch.int)
}";
        assert_eq!(module.to_string(), expected);
        Ok(())
    }
}
