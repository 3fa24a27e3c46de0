//! Logical functions and error predicates. `IF`/`IFS`/`SWITCH` are ordinary
//! registered functions here, not special forms: their arguments reach this
//! module already evaluated (only `ROW`/`COLUMN`/`ROWS`/`COLUMNS`/`OFFSET`/
//! `LAMBDA`/`LET`/`ISOMITTED` need raw, unevaluated argument nodes), so
//! short-circuiting the untaken branch isn't possible here — a deliberate
//! simplification recorded in `DESIGN.md`.

use std::collections::HashMap;

use crate::coerce::{to_bool, values_equal};
use crate::error::{ErrorKind, FormulaError, FormulaResult};
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::Value;

use super::{def, def_trap};

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "IF", 2, 3, "Returns the second argument if the first is truthy, else the third (or FALSE).", |args, _| {
        if to_bool(&args[0])? {
            Ok(args[1].clone())
        } else if args.len() > 2 {
            Ok(args[2].clone())
        } else {
            Ok(Value::Boolean(false))
        }
    });

    def!(map, "IFS", 2, UNBOUNDED, "Returns the value paired with the first truthy condition.", |args, _| {
        if args.len() % 2 != 0 {
            return Err(FormulaError::value());
        }
        for pair in args.chunks(2) {
            if to_bool(&pair[0])? {
                return Ok(pair[1].clone());
            }
        }
        Err(FormulaError::not_available())
    });

    def!(map, "SWITCH", 3, UNBOUNDED, "Compares an expression against a list of value/result pairs, with an optional trailing default.", |args, _| {
        let subject = &args[0];
        let rest = &args[1..];
        let mut pairs = rest.chunks_exact(2);
        for pair in pairs.by_ref() {
            if values_equal(subject, &pair[0]) {
                return Ok(pair[1].clone());
            }
        }
        match pairs.remainder() {
            [default] => Ok(default.clone()),
            _ => Err(FormulaError::not_available()),
        }
    });

    def!(map, "CHOOSE", 2, UNBOUNDED, "Returns the nth subsequent argument (1-based).", |args, _| {
        let index = crate::coerce::to_number(&args[0])? as i64;
        let choices = &args[1..];
        let i = super::util::check_one_based(index, choices.len())?;
        Ok(choices[i].clone())
    });

    def!(map, "AND", 1, UNBOUNDED, "True if every flattened argument is truthy.", |args, _| {
        for v in crate::coerce::flatten_values(args) {
            if !to_bool(v)? {
                return Ok(Value::Boolean(false));
            }
        }
        Ok(Value::Boolean(true))
    });

    def!(map, "OR", 1, UNBOUNDED, "True if any flattened argument is truthy.", |args, _| {
        for v in crate::coerce::flatten_values(args) {
            if to_bool(v)? {
                return Ok(Value::Boolean(true));
            }
        }
        Ok(Value::Boolean(false))
    });

    def!(map, "XOR", 1, UNBOUNDED, "True if an odd number of flattened arguments are truthy.", |args, _| {
        let mut count = 0;
        for v in crate::coerce::flatten_values(args) {
            if to_bool(v)? {
                count += 1;
            }
        }
        Ok(Value::Boolean(count % 2 == 1))
    });

    def!(map, "NOT", 1, 1, "Logical negation.", |args, _| Ok(Value::Boolean(!to_bool(&args[0])?)));

    def!(map, "TRUE", 0, 0, "", |_args, _| Ok(Value::Boolean(true)));
    def!(map, "FALSE", 0, 0, "", |_args, _| Ok(Value::Boolean(false)));

    def!(map, "NA", 0, 0, "Returns `#N/A`.", |_args, _| Err(FormulaError::not_available()));

    def!(map, "ISBLANK", 1, 1, "", |args, _| Ok(Value::Boolean(matches!(args[0], Value::Null))));
    def!(map, "ISNUMBER", 1, 1, "", |args, _| Ok(Value::Boolean(matches!(args[0], Value::Number(_)))));
    def!(map, "ISTEXT", 1, 1, "", |args, _| Ok(Value::Boolean(matches!(args[0], Value::String(_)))));
    def!(map, "ISNONTEXT", 1, 1, "", |args, _| Ok(Value::Boolean(!matches!(args[0], Value::String(_)))));
    def!(map, "ISLOGICAL", 1, 1, "", |args, _| Ok(Value::Boolean(matches!(args[0], Value::Boolean(_)))));

    def!(map, "ISEVEN", 1, 1, "", |args, _| {
        let n = crate::coerce::to_number(&args[0])? as i64;
        Ok(Value::Boolean(n % 2 == 0))
    });
    def!(map, "ISODD", 1, 1, "", |args, _| {
        let n = crate::coerce::to_number(&args[0])? as i64;
        Ok(Value::Boolean(n % 2 != 0))
    });

    def_trap!(map, "ISERROR", 1, 1, "True for any error value, `#N/A` included.", |args, _| {
        Ok(Value::Boolean(args[0].is_error()))
    });

    def_trap!(map, "ISNA", 1, 1, "True only for `#N/A`.", |args, _| {
        Ok(Value::Boolean(matches!(args[0].as_error(), Some(e) if e.kind == ErrorKind::NotAvailable)))
    });

    def_trap!(map, "IFERROR", 2, 2, "Returns the first argument, or the second if the first is an error.", |args, _| {
        if args[0].is_error() {
            Ok(args[1].clone())
        } else {
            Ok(args[0].clone())
        }
    });

    def_trap!(map, "IFNA", 2, 2, "Returns the first argument, or the second if the first is `#N/A`.", |args, _| {
        match args[0].as_error() {
            Some(e) if e.kind == ErrorKind::NotAvailable => Ok(args[1].clone()),
            _ => Ok(args[0].clone()),
        }
    });

    def!(map, "IFBLANK", 2, 2, "Returns the first argument, or the second if the first is blank.", |args, _| {
        if matches!(args[0], Value::Null) {
            Ok(args[1].clone())
        } else {
            Ok(args[0].clone())
        }
    });

    def_trap!(map, "ERROR.TYPE", 1, 1, "The numeric code for an error value, or `#N/A` if the argument isn't an error.", |args, _| {
        match args[0].as_error() {
            Some(e) => Ok(Value::Number(e.kind.error_type_number())),
            None => Err(FormulaError::not_available()),
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::context::{EvalContext, MemoryGrid};
    use crate::eval::evaluate;
    use crate::parser::parse;
    use crate::registry::Registry;
    use crate::value::Value;

    fn eval_str(src: &str) -> Value {
        let grid = MemoryGrid::new("Sheet1");
        let tree = parse(src).unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(&grid, "Sheet1");
        evaluate(&tree, &ctx, &registry).value
    }

    #[test]
    fn if_returns_false_with_no_else_branch() {
        assert_eq!(eval_str("IF(1>2,\"yes\")"), Value::Boolean(false));
    }

    #[test]
    fn ifs_takes_the_first_truthy_condition() {
        assert_eq!(eval_str("IFS(FALSE,1,TRUE,2,TRUE,3)"), Value::Number(2.0));
    }

    #[test]
    fn switch_falls_back_to_trailing_default() {
        assert_eq!(eval_str(r#"SWITCH(5,1,"one",2,"two","other")"#), Value::String("other".into()));
    }

    #[test]
    fn choose_picks_the_nth_choice() {
        assert_eq!(eval_str(r#"CHOOSE(2,"a","b","c")"#), Value::String("b".into()));
    }

    #[test]
    fn and_or_xor_short_summary() {
        assert_eq!(eval_str("AND(TRUE,TRUE,1)"), Value::Boolean(true));
        assert_eq!(eval_str("OR(FALSE,FALSE,0)"), Value::Boolean(false));
        assert_eq!(eval_str("XOR(TRUE,TRUE,TRUE)"), Value::Boolean(true));
    }

    #[test]
    fn iserror_is_true_for_na_but_isna_is_stricter() {
        assert_eq!(eval_str("ISERROR(1/0)"), Value::Boolean(true));
        assert_eq!(eval_str("ISNA(1/0)"), Value::Boolean(false));
        assert_eq!(eval_str("ISNA(NA())"), Value::Boolean(true));
    }

    #[test]
    fn iferror_passes_through_non_errors() {
        assert_eq!(eval_str("IFERROR(5,99)"), Value::Number(5.0));
        assert_eq!(eval_str("IFERROR(1/0,99)"), Value::Number(99.0));
    }

    #[test]
    fn error_type_reports_the_closed_vocabulary_position() {
        assert_eq!(eval_str("ERROR.TYPE(1/0)"), Value::Number(2.0));
        assert_eq!(eval_str("ERROR.TYPE(NA())"), Value::Number(7.0));
    }
}
