//! The evaluator. A post-order walk that never raises a Rust-level error
//! to its caller: every failure becomes a [`Value::Error`] in the
//! returned tree, so errors behave as ordinary values rather than
//! exceptions. Synchronous and scalar: binary operators coerce their
//! operands to a scalar number/string rather than broadcasting over
//! arrays.

use std::collections::{HashMap, HashSet};

use crate::ast::{AstNode, AstNodeKind, BinaryOperator, UnaryOperator};
use crate::coerce::{compare_values, to_number, to_string};
use crate::context::EvalContext;
use crate::error::{FormulaError, FormulaResult};
use crate::reference::{column_to_letters, parse_address, CellAddress};
use crate::registry::Registry;
use crate::value::{Array2D, LambdaValue, Value};

/// A `(sheet, row, column)` triple the evaluator visited while producing a
/// value. No deduplication is performed; a recalculation scheduler can
/// afford to over-approximate dependencies but not under-approximate them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub sheet_id: String,
    pub row: u32,
    pub column: u32,
}

/// The result of a top-level `evaluate` call.
pub struct EvalOutcome {
    pub value: Value,
    pub dependencies: Vec<Dependency>,
}

/// One level of name bindings introduced by `LET` or a `LAMBDA` call.
/// `omitted` tracks which lambda parameters weren't supplied a positional
/// argument, for `ISOMITTED`.
#[derive(Default)]
struct ScopeFrame {
    vars: HashMap<String, Value>,
    omitted: HashSet<String>,
}

/// Evaluates `tree` against `context` using `registry`'s function library.
/// Never panics or returns a Rust-level `Result`: malformed runtime
/// conditions surface as a [`Value::Error`] inside the returned value.
pub fn evaluate(tree: &AstNode, context: &EvalContext, registry: &Registry) -> EvalOutcome {
    let mut evaluator = Evaluator { ctx: context, registry, dependencies: Vec::new(), scopes: Vec::new() };
    let value = evaluator.eval_node(tree);
    EvalOutcome { value, dependencies: evaluator.dependencies }
}

/// Functions special-cased before ordinary registry dispatch because they
/// need the *unevaluated* argument node rather than its value. `ADDRESS`
/// and `INDIRECT` look similar but turn out not to need the raw node —
/// they only need evaluator access (for `INDIRECT`'s dependency-recording
/// read) — so they are implemented as ordinary registry entries instead.
const REFERENCE_AWARE: &[&str] = &["ROW", "COLUMN", "ROWS", "COLUMNS", "OFFSET"];

pub struct Evaluator<'a> {
    ctx: &'a EvalContext<'a>,
    registry: &'a Registry,
    dependencies: Vec<Dependency>,
    scopes: Vec<ScopeFrame>,
}

impl<'a> Evaluator<'a> {
    pub fn data(&self) -> &'a dyn crate::context::DataSource {
        self.ctx.data
    }

    pub fn current_cell(&self) -> Option<&CellAddress> {
        self.ctx.current_cell.as_ref()
    }

    pub fn sheet_id(&self) -> &str {
        &self.ctx.sheet_id
    }

    fn lookup_scope(&self, name_upper: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|frame| frame.vars.get(name_upper))
    }

    pub fn read_cell(&mut self, addr: &CellAddress) -> Value {
        let sheet = self.ctx.sheet_for(addr);
        self.dependencies.push(Dependency { sheet_id: sheet, row: addr.row, column: addr.column });
        self.ctx.data.get_cell_value(addr)
    }

    pub fn read_range(&mut self, start: &CellAddress, end: &CellAddress) -> Array2D {
        let (r0, r1) = (start.row.min(end.row), start.row.max(end.row));
        let (c0, c1) = (start.column.min(end.column), start.column.max(end.column));
        let sheet = self.ctx.sheet_for(start);
        for row in r0..=r1 {
            for col in c0..=c1 {
                self.dependencies.push(Dependency { sheet_id: sheet.clone(), row, column: col });
            }
        }
        Array2D::from_rows_unchecked(self.ctx.data.get_range_values(start, end))
    }

    /// Parses `text` as a cell or range address and reads it, recording a
    /// dependency exactly as a literal reference would. Backs `INDIRECT`.
    pub fn read_indirect(&mut self, text: &str) -> Value {
        if let Some(colon) = text.find(':') {
            let (a, b) = (&text[..colon], &text[colon + 1..]);
            match (parse_address(a), parse_address(b)) {
                (Ok(start), Ok(end)) => Value::Array2D(self.read_range(&start, &end)),
                _ => Value::Error(FormulaError::reference()),
            }
        } else {
            match parse_address(text) {
                Ok(addr) => self.read_cell(&addr),
                Err(e) => Value::Error(e),
            }
        }
    }

    /// Invokes a lambda with already-evaluated positional arguments: the
    /// body is the *unevaluated* tree captured at construction, and each
    /// call binds parameter names in a fresh scope.
    pub fn invoke_lambda(&mut self, lambda: &LambdaValue, args: &[Value]) -> Value {
        if args.len() > lambda.params.len() {
            return Value::Error(FormulaError::value());
        }
        let mut frame = ScopeFrame::default();
        for (i, name) in lambda.params.iter().enumerate() {
            match args.get(i) {
                Some(v) => {
                    frame.vars.insert(name.clone(), v.clone());
                }
                None => {
                    frame.vars.insert(name.clone(), Value::Null);
                    frame.omitted.insert(name.clone());
                }
            }
        }
        self.scopes.push(frame);
        let body = AstNode { span: lambda.body.span, inner: lambda.body.inner.clone() };
        let result = self.eval_node(&body);
        self.scopes.pop();
        result
    }

    /// Extracts a bare identifier name from a node shaped like one (a
    /// relative, unqualified column-only reference, e.g. `x` lexes the
    /// same way `LAMBDA`/`LET` parameter names do). Identifiers shaped
    /// like a standard `A1` reference (letters *and* digits) cannot be
    /// used as parameter/binding names -- the same restriction real
    /// spreadsheet LAMBDA implementations impose, for the same reason.
    fn resolve_identifier_name(node: &AstNode) -> Option<String> {
        match &node.inner {
            AstNodeKind::CellRef(addr)
                if addr.is_column_only && addr.sheet_name.is_none() && !addr.column_is_absolute =>
            {
                Some(column_to_letters(addr.column))
            }
            _ => None,
        }
    }

    fn eval_to_number(&mut self, node: &AstNode) -> Result<f64, Value> {
        let v = self.eval_node(node);
        if let Value::Error(e) = &v {
            return Err(Value::Error(e.clone()));
        }
        to_number(&v).map_err(Value::Error)
    }

    pub fn eval_node(&mut self, node: &AstNode) -> Value {
        match &node.inner {
            AstNodeKind::NumberLiteral(n) => Value::Number(*n),
            AstNodeKind::StringLiteral(s) => Value::String(s.clone()),
            AstNodeKind::BooleanLiteral(b) => Value::Boolean(*b),
            AstNodeKind::ErrorLiteral(kind) => Value::Error(FormulaError::from(kind.clone())),
            AstNodeKind::CellRef(addr) => {
                if addr.is_column_only && addr.sheet_name.is_none() && !addr.column_is_absolute {
                    if let Some(v) = self.lookup_scope(&column_to_letters(addr.column)) {
                        return v.clone();
                    }
                }
                self.read_cell(addr)
            }
            AstNodeKind::RangeRef(start, end) => Value::Array2D(self.read_range(start, end)),
            AstNodeKind::ArrayLiteral(rows) => {
                let evaluated = rows
                    .iter()
                    .map(|row| row.iter().map(|n| self.eval_node(n)).collect())
                    .collect();
                Value::Array2D(Array2D::from_rows_unchecked(evaluated))
            }
            AstNodeKind::UnaryOp { op, operand } => {
                let v = self.eval_node(operand);
                if let Value::Error(e) = &v {
                    return Value::Error(e.clone());
                }
                eval_unary(*op, &v).unwrap_or_else(Value::Error)
            }
            AstNodeKind::BinaryOp { op, left, right } => {
                let l = self.eval_node(left);
                let r = self.eval_node(right);
                // Evaluate left then right; if either is an error,
                // propagate that error unchanged (left takes precedence
                // when both err).
                if let Value::Error(e) = &l {
                    return Value::Error(e.clone());
                }
                if let Value::Error(e) = &r {
                    return Value::Error(e.clone());
                }
                eval_binary(*op, &l, &r).unwrap_or_else(Value::Error)
            }
            AstNodeKind::FunctionCall { name_upper, args } => self.eval_function_call(name_upper, args),
            AstNodeKind::Invoke { callee, args } => {
                let callee_val = self.eval_node(callee);
                if let Value::Error(e) = &callee_val {
                    return Value::Error(e.clone());
                }
                let Value::Lambda(lambda) = callee_val else {
                    return Value::Error(FormulaError::value());
                };
                let arg_vals: Vec<Value> = args.iter().map(|n| self.eval_node(n)).collect();
                self.invoke_lambda(&lambda, &arg_vals)
            }
        }
    }

    fn eval_function_call(&mut self, name_upper: &str, arg_nodes: &[AstNode]) -> Value {
        match name_upper {
            "ROW" => self.fn_row(arg_nodes),
            "COLUMN" => self.fn_column(arg_nodes),
            "ROWS" => self.fn_rows(arg_nodes),
            "COLUMNS" => self.fn_columns(arg_nodes),
            "OFFSET" => self.fn_offset(arg_nodes),
            "LAMBDA" => self.fn_lambda(arg_nodes),
            "LET" => self.fn_let(arg_nodes),
            "ISOMITTED" => self.fn_isomitted(arg_nodes),
            _ => {
                // Registered built-ins (and caller extensions) take
                // priority; a scope-bound `Lambda` is consulted only when
                // the name is otherwise unbound.
                if self.registry.contains(name_upper) {
                    let args: Vec<Value> = arg_nodes.iter().map(|n| self.eval_node(n)).collect();
                    let registry = self.registry;
                    registry.call(name_upper, args, self).unwrap_or_else(Value::Error)
                } else if let Some(Value::Lambda(lambda)) = self.lookup_scope(name_upper).cloned() {
                    let args: Vec<Value> = arg_nodes.iter().map(|n| self.eval_node(n)).collect();
                    self.invoke_lambda(&lambda, &args)
                } else {
                    Value::Error(FormulaError::name())
                }
            }
        }
    }

    fn fn_row(&mut self, arg_nodes: &[AstNode]) -> Value {
        match arg_nodes.len() {
            0 => match self.ctx.current_cell {
                Some(ref addr) => Value::Number((addr.row + 1) as f64),
                None => Value::Error(FormulaError::reference()),
            },
            1 => match &arg_nodes[0].inner {
                AstNodeKind::CellRef(addr) => Value::Number((addr.row + 1) as f64),
                AstNodeKind::RangeRef(start, _) => Value::Number((start.row + 1) as f64),
                _ => Value::Error(FormulaError::value()),
            },
            _ => Value::Error(FormulaError::value()),
        }
    }

    fn fn_column(&mut self, arg_nodes: &[AstNode]) -> Value {
        match arg_nodes.len() {
            0 => match self.ctx.current_cell {
                Some(ref addr) => Value::Number((addr.column + 1) as f64),
                None => Value::Error(FormulaError::reference()),
            },
            1 => match &arg_nodes[0].inner {
                AstNodeKind::CellRef(addr) => Value::Number((addr.column + 1) as f64),
                AstNodeKind::RangeRef(start, _) => Value::Number((start.column + 1) as f64),
                _ => Value::Error(FormulaError::value()),
            },
            _ => Value::Error(FormulaError::value()),
        }
    }

    fn fn_rows(&mut self, arg_nodes: &[AstNode]) -> Value {
        if arg_nodes.len() != 1 {
            return Value::Error(FormulaError::value());
        }
        match &arg_nodes[0].inner {
            AstNodeKind::CellRef(_) => Value::Number(1.0),
            AstNodeKind::RangeRef(a, b) => {
                Value::Number((b.row as i64 - a.row as i64).unsigned_abs() as f64 + 1.0)
            }
            _ => match self.eval_node(&arg_nodes[0]) {
                Value::Array2D(arr) => Value::Number(arr.height() as f64),
                Value::Error(e) => Value::Error(e),
                _ => Value::Number(1.0),
            },
        }
    }

    fn fn_columns(&mut self, arg_nodes: &[AstNode]) -> Value {
        if arg_nodes.len() != 1 {
            return Value::Error(FormulaError::value());
        }
        match &arg_nodes[0].inner {
            AstNodeKind::CellRef(_) => Value::Number(1.0),
            AstNodeKind::RangeRef(a, b) => {
                Value::Number((b.column as i64 - a.column as i64).unsigned_abs() as f64 + 1.0)
            }
            _ => match self.eval_node(&arg_nodes[0]) {
                Value::Array2D(arr) => Value::Number(arr.width() as f64),
                Value::Error(e) => Value::Error(e),
                _ => Value::Number(1.0),
            },
        }
    }

    fn fn_offset(&mut self, arg_nodes: &[AstNode]) -> Value {
        if arg_nodes.len() < 3 || arg_nodes.len() > 5 {
            return Value::Error(FormulaError::value());
        }
        let base = match &arg_nodes[0].inner {
            AstNodeKind::CellRef(addr) => addr.clone(),
            AstNodeKind::RangeRef(start, _) => start.clone(),
            _ => return Value::Error(FormulaError::reference()),
        };
        let row_offset = match self.eval_to_number(&arg_nodes[1]) {
            Ok(n) => n as i64,
            Err(v) => return v,
        };
        let col_offset = match self.eval_to_number(&arg_nodes[2]) {
            Ok(n) => n as i64,
            Err(v) => return v,
        };
        let height = if arg_nodes.len() > 3 {
            match self.eval_to_number(&arg_nodes[3]) {
                Ok(n) => n as i64,
                Err(v) => return v,
            }
        } else {
            1
        };
        let width = if arg_nodes.len() > 4 {
            match self.eval_to_number(&arg_nodes[4]) {
                Ok(n) => n as i64,
                Err(v) => return v,
            }
        } else {
            1
        };
        let new_row = base.row as i64 + row_offset;
        let new_col = base.column as i64 + col_offset;
        if new_row < 0 || new_col < 0 || height < 1 || width < 1 {
            return Value::Error(FormulaError::reference());
        }
        let start_addr = CellAddress {
            column: new_col as u32,
            row: new_row as u32,
            sheet_name: base.sheet_name.clone(),
            ..Default::default()
        };
        if height == 1 && width == 1 {
            self.read_cell(&start_addr)
        } else {
            let end_addr = CellAddress {
                column: (new_col + width - 1) as u32,
                row: (new_row + height - 1) as u32,
                sheet_name: base.sheet_name.clone(),
                ..Default::default()
            };
            Value::Array2D(self.read_range(&start_addr, &end_addr))
        }
    }

    fn fn_lambda(&mut self, arg_nodes: &[AstNode]) -> Value {
        if arg_nodes.is_empty() {
            return Value::Error(FormulaError::value());
        }
        let (param_nodes, body) = arg_nodes.split_at(arg_nodes.len() - 1);
        let mut params = Vec::with_capacity(param_nodes.len());
        for p in param_nodes {
            match Self::resolve_identifier_name(p) {
                Some(name) => params.push(name),
                None => return Value::Error(FormulaError::value()),
            }
        }
        Value::Lambda(LambdaValue::new(params, body[0].clone()))
    }

    fn fn_let(&mut self, arg_nodes: &[AstNode]) -> Value {
        if arg_nodes.len() < 3 || arg_nodes.len() % 2 == 0 {
            return Value::Error(FormulaError::value());
        }
        let pair_count = (arg_nodes.len() - 1) / 2;
        self.scopes.push(ScopeFrame::default());
        for i in 0..pair_count {
            let Some(name) = Self::resolve_identifier_name(&arg_nodes[i * 2]) else {
                self.scopes.pop();
                return Value::Error(FormulaError::value());
            };
            let value = self.eval_node(&arg_nodes[i * 2 + 1]);
            self.scopes.last_mut().expect("just pushed").vars.insert(name, value);
        }
        let result = self.eval_node(&arg_nodes[arg_nodes.len() - 1]);
        self.scopes.pop();
        result
    }

    fn fn_isomitted(&mut self, arg_nodes: &[AstNode]) -> Value {
        if arg_nodes.len() != 1 {
            return Value::Error(FormulaError::value());
        }
        let Some(name) = Self::resolve_identifier_name(&arg_nodes[0]) else {
            return Value::Error(FormulaError::value());
        };
        let omitted = self.scopes.last().map(|f| f.omitted.contains(&name)).unwrap_or(false);
        Value::Boolean(omitted)
    }
}

fn eval_binary(op: BinaryOperator, l: &Value, r: &Value) -> FormulaResult<Value> {
    use std::cmp::Ordering;
    Ok(match op {
        BinaryOperator::Add => Value::Number(to_number(l)? + to_number(r)?),
        BinaryOperator::Sub => Value::Number(to_number(l)? - to_number(r)?),
        BinaryOperator::Mul => Value::Number(to_number(l)? * to_number(r)?),
        BinaryOperator::Div => {
            let (a, b) = (to_number(l)?, to_number(r)?);
            if b == 0.0 {
                return Err(FormulaError::div_zero());
            }
            Value::Number(a / b)
        }
        BinaryOperator::Pow => Value::Number(to_number(l)?.powf(to_number(r)?)),
        BinaryOperator::Concat => Value::String(format!("{}{}", to_string(l)?, to_string(r)?)),
        BinaryOperator::Eq => Value::Boolean(compare_values(l, r)? == Ordering::Equal),
        BinaryOperator::Ne => Value::Boolean(compare_values(l, r)? != Ordering::Equal),
        BinaryOperator::Lt => Value::Boolean(compare_values(l, r)? == Ordering::Less),
        BinaryOperator::Gt => Value::Boolean(compare_values(l, r)? == Ordering::Greater),
        BinaryOperator::Le => Value::Boolean(compare_values(l, r)? != Ordering::Greater),
        BinaryOperator::Ge => Value::Boolean(compare_values(l, r)? != Ordering::Less),
    })
}

fn eval_unary(op: UnaryOperator, operand: &Value) -> FormulaResult<Value> {
    let n = to_number(operand)?;
    Ok(Value::Number(match op {
        UnaryOperator::Neg => -n,
        UnaryOperator::Pos => n,
    }))
}

/// Whether `name_upper` is handled by the evaluator's special-form
/// dispatch rather than the ordinary registry (exposed for
/// `extract_references`/docs tooling).
pub fn is_reference_aware(name_upper: &str) -> bool {
    REFERENCE_AWARE.contains(&name_upper) || matches!(name_upper, "LAMBDA" | "LET" | "ISOMITTED")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryGrid;
    use crate::parser::parse;

    fn eval_str(src: &str, grid: &MemoryGrid) -> Value {
        let tree = parse(src).unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(grid, "Sheet1");
        evaluate(&tree, &ctx, &registry).value
    }

    #[test]
    fn sum_literal_has_no_dependencies() {
        let grid = MemoryGrid::new("Sheet1");
        let tree = parse("SUM(1,2,3)").unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(&grid, "Sheet1");
        let outcome = evaluate(&tree, &ctx, &registry);
        assert_eq!(outcome.value, Value::Number(6.0));
        assert!(outcome.dependencies.is_empty());
    }

    #[test]
    fn sum_range_records_dependencies_in_order() {
        let mut grid = MemoryGrid::new("Sheet1");
        grid.set(parse_address("A1").unwrap(), Value::Number(10.0));
        grid.set(parse_address("A2").unwrap(), Value::Number(20.0));
        grid.set(parse_address("A3").unwrap(), Value::Number(30.0));
        let tree = parse("SUM(A1:A3)").unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(&grid, "Sheet1");
        let outcome = evaluate(&tree, &ctx, &registry);
        assert_eq!(outcome.value, Value::Number(60.0));
        assert_eq!(
            outcome.dependencies,
            vec![
                Dependency { sheet_id: "Sheet1".into(), row: 0, column: 0 },
                Dependency { sheet_id: "Sheet1".into(), row: 1, column: 0 },
                Dependency { sheet_id: "Sheet1".into(), row: 2, column: 0 },
            ]
        );
    }

    #[test]
    fn division_by_zero() {
        let grid = MemoryGrid::new("Sheet1");
        assert_eq!(eval_str("1/0", &grid), Value::Error(FormulaError::div_zero()));
    }

    #[test]
    fn unknown_function_name_error() {
        let grid = MemoryGrid::new("Sheet1");
        assert_eq!(eval_str("UNKNOWNFN(1)", &grid), Value::Error(FormulaError::name()));
    }

    #[test]
    fn mod_takes_divisor_sign() {
        let grid = MemoryGrid::new("Sheet1");
        assert_eq!(eval_str("MOD(-7,3)", &grid), Value::Number(2.0));
    }

    #[test]
    fn lambda_immediate_invocation() {
        let grid = MemoryGrid::new("Sheet1");
        assert_eq!(eval_str("LAMBDA(x,y,x+y)(2,3)", &grid), Value::Number(5.0));
    }

    #[test]
    fn reduce_with_lambda() {
        let grid = MemoryGrid::new("Sheet1");
        assert_eq!(eval_str("REDUCE(0,{1;2;3},LAMBDA(a,v,a+v))", &grid), Value::Number(6.0));
    }

    #[test]
    fn error_propagates_left_precedence() {
        let mut grid = MemoryGrid::new("Sheet1");
        grid.set(parse_address("A1").unwrap(), Value::Error(FormulaError::num()));
        grid.set(parse_address("B1").unwrap(), Value::Error(FormulaError::name()));
        // left (#NUM!) wins over right (#NAME?)
        assert_eq!(eval_str("A1+B1", &grid), Value::Error(FormulaError::num()));
    }

    use proptest::prelude::*;

    const BINARY_OPS: [BinaryOperator; 12] = [
        BinaryOperator::Add,
        BinaryOperator::Sub,
        BinaryOperator::Mul,
        BinaryOperator::Div,
        BinaryOperator::Pow,
        BinaryOperator::Concat,
        BinaryOperator::Eq,
        BinaryOperator::Ne,
        BinaryOperator::Lt,
        BinaryOperator::Gt,
        BinaryOperator::Le,
        BinaryOperator::Ge,
    ];

    proptest! {
        #[test]
        fn every_operator_propagates_an_error_operand(n in -1000.0..1000.0_f64) {
            let err = Value::Error(FormulaError::value());
            let x = Value::Number(n);
            for op in BINARY_OPS {
                prop_assert_eq!(eval_binary(op, &err, &x), Err(FormulaError::value()));
                prop_assert_eq!(eval_binary(op, &x, &err), Err(FormulaError::value()));
            }
            prop_assert_eq!(eval_unary(UnaryOperator::Neg, &err), Err(FormulaError::value()));
        }
    }
}
