//! A self-contained spreadsheet formula engine: lexing, parsing, evaluation
//! against a caller-supplied grid, a large built-in function library, and
//! precise dependency capture for downstream recalculation schedulers.
//!
//! The public surface is [`parse`], [`evaluate`], [`parse_address`], and
//! [`Registry::register`] (via a caller-owned [`Registry`]);
//! [`extract_references`] is a convenience addition for callers that want a
//! formula's references without running it.

pub mod ast;
pub mod coerce;
pub mod context;
pub mod datetime;
pub mod error;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod reference;
pub mod registry;
pub mod span;
pub mod value;

pub use ast::AstNode;
pub use context::{DataSource, EvalContext, MemoryGrid};
pub use error::{ErrorKind, FormulaError, FormulaResult};
pub use eval::{evaluate, is_reference_aware, Dependency, EvalOutcome, Evaluator};
pub use reference::{parse_address, CellAddress};
pub use registry::Registry;
pub use value::{Array2D, LambdaValue, Value};

/// Parses formula text into a syntax tree. Accepts either a bare expression
/// or one prefixed with `=`.
pub fn parse(formula_text: &str) -> FormulaResult<AstNode> {
    parser::parse(formula_text)
}

/// Walks `formula_text`'s tokens and returns every cell or range reference
/// it contains, without evaluating anything. Useful for a
/// dependency-auditing caller that wants to know what a formula touches
/// without supplying a data source. Returns references in the order they
/// appear in the parsed tree.
pub fn extract_references(formula_text: &str) -> FormulaResult<Vec<Reference>> {
    let tree = parse(formula_text)?;
    let mut out = Vec::new();
    collect_references(&tree, &mut out);
    Ok(out)
}

/// A single cell or range reference found by [`extract_references`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Cell(CellAddress),
    Range(CellAddress, CellAddress),
}

fn collect_references(node: &AstNode, out: &mut Vec<Reference>) {
    use ast::AstNodeKind::*;
    match &node.inner {
        CellRef(addr) => out.push(Reference::Cell(addr.clone())),
        RangeRef(start, end) => out.push(Reference::Range(start.clone(), end.clone())),
        FunctionCall { args, .. } => args.iter().for_each(|a| collect_references(a, out)),
        Invoke { callee, args } => {
            collect_references(callee, out);
            args.iter().for_each(|a| collect_references(a, out));
        }
        BinaryOp { left, right, .. } => {
            collect_references(left, out);
            collect_references(right, out);
        }
        UnaryOp { operand, .. } => collect_references(operand, out),
        ArrayLiteral(rows) => rows.iter().flatten().for_each(|n| collect_references(n, out)),
        NumberLiteral(_) | StringLiteral(_) | BooleanLiteral(_) | ErrorLiteral(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_evaluate_end_to_end() {
        let grid = MemoryGrid::new("Sheet1");
        let tree = parse("SUM(1,2,3)").unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(&grid, "Sheet1");
        let outcome = evaluate(&tree, &ctx, &registry);
        assert_eq!(outcome.value, Value::Number(6.0));
    }

    #[test]
    fn extract_references_finds_cells_and_ranges() {
        let refs = extract_references("SUM(A1:A3)+B2").unwrap();
        assert_eq!(
            refs,
            vec![
                Reference::Range(parse_address("A1").unwrap(), parse_address("A3").unwrap()),
                Reference::Cell(parse_address("B2").unwrap()),
            ]
        );
    }

    #[test]
    fn caller_can_register_custom_function() {
        let mut registry = Registry::with_builtins();
        registry.register("DOUBLE", 1, 1, |args, _eval| {
            coerce::to_number(&args[0]).map(|n| Value::Number(n * 2.0))
        });
        let grid = MemoryGrid::new("Sheet1");
        let tree = parse("DOUBLE(21)").unwrap();
        let ctx = EvalContext::new(&grid, "Sheet1");
        let outcome = evaluate(&tree, &ctx, &registry);
        assert_eq!(outcome.value, Value::Number(42.0));
    }
}
