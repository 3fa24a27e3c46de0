//! End-to-end tests driving the public API the way an embedding application
//! would: parse formula text, evaluate it against a grid, and read back the
//! result and the dependency list.

use pretty_assertions::assert_eq;

use formula_engine::{
    evaluate, parse, reference::parse_address, Dependency, ErrorKind, EvalContext, MemoryGrid,
    Registry, Value,
};

fn eval(grid: &MemoryGrid, formula: &str) -> Value {
    let tree = parse(formula).unwrap();
    let registry = Registry::with_builtins();
    let ctx = EvalContext::new(grid, "Sheet1");
    evaluate(&tree, &ctx, &registry).value
}

#[test]
fn sum_of_literals_has_no_dependencies() {
    let grid = MemoryGrid::new("Sheet1");
    let tree = parse("SUM(1,2,3)").unwrap();
    let registry = Registry::with_builtins();
    let ctx = EvalContext::new(&grid, "Sheet1");
    let outcome = evaluate(&tree, &ctx, &registry);
    assert_eq!(outcome.value, Value::Number(6.0));
    assert!(outcome.dependencies.is_empty());
}

#[test]
fn sum_of_a_range_records_each_cell_as_a_dependency() {
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
fn if_branches_on_a_comparison() {
    let grid = MemoryGrid::new("Sheet1");
    assert_eq!(eval(&grid, r#"IF(5>3,"Yes","No")"#), Value::String("Yes".into()));
    assert_eq!(eval(&grid, r#"IF(1>10,"Yes","No")"#), Value::String("No".into()));
}

#[test]
fn division_by_zero_is_a_div_zero_error() {
    let grid = MemoryGrid::new("Sheet1");
    match eval(&grid, "1/0") {
        Value::Error(e) => assert_eq!(e.kind, ErrorKind::DivZero),
        other => panic!("expected an error, got {other:?}"),
    }
}

#[test]
fn calling_an_unregistered_function_is_a_name_error() {
    let grid = MemoryGrid::new("Sheet1");
    match eval(&grid, "UNKNOWNFN(1)") {
        Value::Error(e) => assert_eq!(e.kind, ErrorKind::Name),
        other => panic!("expected an error, got {other:?}"),
    }
}

#[test]
fn text_functions_compose() {
    let grid = MemoryGrid::new("Sheet1");
    assert_eq!(eval(&grid, r#"CONCATENATE("Hello"," ","World")"#), Value::String("Hello World".into()));
    assert_eq!(eval(&grid, r#"LEN("Hello")"#), Value::Number(5.0));
    assert_eq!(eval(&grid, r#"UPPER("hello")"#), Value::String("HELLO".into()));
}

#[test]
fn addition_reads_two_cells() {
    let mut grid = MemoryGrid::new("Sheet1");
    grid.set(parse_address("A1").unwrap(), Value::Number(10.0));
    grid.set(parse_address("B1").unwrap(), Value::Number(20.0));
    assert_eq!(eval(&grid, "A1+B1"), Value::Number(30.0));
}

#[test]
fn mod_result_takes_the_divisor_sign() {
    let grid = MemoryGrid::new("Sheet1");
    assert_eq!(eval(&grid, "MOD(-7,3)"), Value::Number(2.0));
}

#[test]
fn lambda_and_reduce_work_together() {
    let grid = MemoryGrid::new("Sheet1");
    assert_eq!(eval(&grid, "LAMBDA(x,y,x+y)(2,3)"), Value::Number(5.0));
    assert_eq!(eval(&grid, "REDUCE(0,{1;2;3},LAMBDA(a,v,a+v))"), Value::Number(6.0));
}

#[test]
fn vlookup_approximate_match_finds_the_greatest_key_not_exceeding_the_target() {
    let grid = MemoryGrid::new("Sheet1");
    assert_eq!(
        eval(&grid, r#"VLOOKUP(2.5,{1,"a";2,"b";3,"c"},2,TRUE)"#),
        Value::String("b".into())
    );
}

#[test]
fn a_custom_registered_function_is_reachable_from_formula_text() {
    let mut registry = Registry::with_builtins();
    registry.register("DOUBLE", 1, 1, |args, _eval| {
        formula_engine::coerce::to_number(&args[0]).map(|n| Value::Number(n * 2.0))
    });
    let grid = MemoryGrid::new("Sheet1");
    let tree = parse("DOUBLE(21)").unwrap();
    let ctx = EvalContext::new(&grid, "Sheet1");
    let outcome = evaluate(&tree, &ctx, &registry);
    assert_eq!(outcome.value, Value::Number(42.0));
}
