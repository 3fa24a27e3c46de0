//! Parses and evaluates a formula against a small in-memory grid, printing
//! the result and the dependencies it touched.
//!
//! Run with: `cargo run --bin eval_formula -- "=SUM(A1:A3)+B2"`

use std::env;

use formula_engine::{evaluate, parse, parse_address, EvalContext, MemoryGrid, Registry, Value};

fn main() {
    let formula = env::args().nth(1).unwrap_or_else(|| "=SUM(A1:A3)+B2".to_string());

    let mut grid = MemoryGrid::new("Sheet1");
    grid.set(parse_address("A1").unwrap(), Value::Number(10.0));
    grid.set(parse_address("A2").unwrap(), Value::Number(20.0));
    grid.set(parse_address("A3").unwrap(), Value::Number(30.0));
    grid.set(parse_address("B2").unwrap(), Value::Number(5.0));

    let tree = match parse(&formula) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("parse error: {e}");
            std::process::exit(1);
        }
    };

    let registry = Registry::with_builtins();
    let ctx = EvalContext::new(&grid, "Sheet1");
    let outcome = evaluate(&tree, &ctx, &registry);

    println!("formula:      {formula}");
    println!("reprinted:    ={tree}");
    println!("value:        {:?}", outcome.value);
    println!("dependencies: {:?}", outcome.dependencies);
}
