//! Text functions: each operates on coerced scalars rather than
//! broadcasting over arrays.

use std::collections::HashMap;

use crate::coerce::{flatten_values, to_number, to_string};
use crate::error::{FormulaError, FormulaResult};
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::Value;

use super::def;
use super::util::{arg_i64, arg_string};

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "CONCATENATE", 1, UNBOUNDED, "Joins its arguments as text, without flattening arrays.", |args, _| {
        let mut out = String::new();
        for a in args {
            out.push_str(&to_string(a)?);
        }
        Ok(Value::String(out))
    });

    def!(map, "CONCAT", 1, UNBOUNDED, "Joins its arguments as text, flattening arrays first.", |args, _| {
        let mut out = String::new();
        for v in flatten_values(args) {
            out.push_str(&to_string(v)?);
        }
        Ok(Value::String(out))
    });

    def!(map, "TEXTJOIN", 2, UNBOUNDED, "Joins flattened text arguments with a delimiter.", |args, _| {
        let delim = to_string(&args[0])?;
        let ignore_empty = crate::coerce::to_bool(&args[1])?;
        let mut pieces = Vec::new();
        for v in flatten_values(&args[2..]) {
            let s = to_string(v)?;
            if ignore_empty && s.is_empty() {
                continue;
            }
            pieces.push(s);
        }
        Ok(Value::String(pieces.join(&delim)))
    });

    def!(map, "LEN", 1, 1, "Character count.", |args, _| {
        Ok(Value::Number(arg_string(args, 0)?.chars().count() as f64))
    });

    def!(map, "LOWER", 1, 1, "", |args, _| Ok(Value::String(arg_string(args, 0)?.to_lowercase())));
    def!(map, "UPPER", 1, 1, "", |args, _| Ok(Value::String(arg_string(args, 0)?.to_uppercase())));

    def!(map, "PROPER", 1, 1, "Capitalizes the first letter of each run of letters.", |args, _| {
        Ok(Value::String(proper_case(&arg_string(args, 0)?)))
    });

    def!(map, "TRIM", 1, 1, "Collapses internal whitespace runs to a single space and strips the ends.", |args, _| {
        Ok(Value::String(arg_string(args, 0)?.split_whitespace().collect::<Vec<_>>().join(" ")))
    });

    def!(map, "CLEAN", 1, 1, "Strips control characters (codepoints < 32) and DEL.", |args, _| {
        Ok(Value::String(arg_string(args, 0)?.chars().filter(|c| !c.is_control()).collect()))
    });

    def!(map, "LEFT", 1, 2, "The leftmost n characters.", |args, _| {
        let s = arg_string(args, 0)?;
        let n = if args.len() > 1 { arg_i64(args, 1)? } else { 1 };
        if n < 0 {
            return Err(FormulaError::value());
        }
        Ok(Value::String(s.chars().take(n as usize).collect()))
    });

    def!(map, "RIGHT", 1, 2, "The rightmost n characters.", |args, _| {
        let s = arg_string(args, 0)?;
        let n = if args.len() > 1 { arg_i64(args, 1)? } else { 1 };
        if n < 0 {
            return Err(FormulaError::value());
        }
        let chars: Vec<char> = s.chars().collect();
        let start = chars.len().saturating_sub(n as usize);
        Ok(Value::String(chars[start..].iter().collect()))
    });

    def!(map, "MID", 3, 3, "A substring starting at a 1-based position.", |args, _| {
        let s = arg_string(args, 0)?;
        let start = arg_i64(args, 1)?;
        let len = arg_i64(args, 2)?;
        if start < 1 || len < 0 {
            return Err(FormulaError::value());
        }
        let chars: Vec<char> = s.chars().collect();
        let begin = (start as usize - 1).min(chars.len());
        let end = (begin + len as usize).min(chars.len());
        Ok(Value::String(chars[begin..end].iter().collect()))
    });

    def!(map, "FIND", 2, 3, "Case-sensitive 1-based substring search.", |args, _| {
        let needle = arg_string(args, 0)?;
        let haystack = arg_string(args, 1)?;
        let start = if args.len() > 2 { arg_i64(args, 2)? } else { 1 };
        find_in(&haystack, &needle, start, true)
    });

    def!(map, "SEARCH", 2, 3, "Case-insensitive 1-based substring search.", |args, _| {
        let needle = arg_string(args, 0)?;
        let haystack = arg_string(args, 1)?;
        let start = if args.len() > 2 { arg_i64(args, 2)? } else { 1 };
        find_in(&haystack, &needle, start, false)
    });

    def!(map, "REPLACE", 4, 4, "Replaces a substring at a 1-based position/length with new text.", |args, _| {
        let old = arg_string(args, 0)?;
        let start = arg_i64(args, 1)?;
        let len = arg_i64(args, 2)?;
        let new = arg_string(args, 3)?;
        if start < 1 || len < 0 {
            return Err(FormulaError::value());
        }
        let chars: Vec<char> = old.chars().collect();
        let begin = (start as usize - 1).min(chars.len());
        let end = (begin + len as usize).min(chars.len());
        let mut out: String = chars[..begin].iter().collect();
        out.push_str(&new);
        out.extend(&chars[end..]);
        Ok(Value::String(out))
    });

    def!(map, "SUBSTITUTE", 3, 4, "Replaces occurrences of `old` with `new`, optionally only the nth.", |args, _| {
        let text = arg_string(args, 0)?;
        let old = arg_string(args, 1)?;
        let new = arg_string(args, 2)?;
        if old.is_empty() {
            return Ok(Value::String(text));
        }
        if args.len() > 3 {
            let nth = arg_i64(args, 3)?;
            if nth < 1 {
                return Err(FormulaError::value());
            }
            Ok(Value::String(substitute_nth(&text, &old, &new, nth as usize)))
        } else {
            Ok(Value::String(text.replace(&old, &new)))
        }
    });

    def!(map, "REPT", 2, 2, "Repeats text n times.", |args, _| {
        let s = arg_string(args, 0)?;
        let n = arg_i64(args, 1)?;
        if n < 0 {
            return Err(FormulaError::value());
        }
        Ok(Value::String(s.repeat(n as usize)))
    });

    def!(map, "TEXT", 2, 2, "Formats a number per a format string.", |args, _| {
        let n = to_number(&args[0])?;
        let fmt = arg_string(args, 1)?;
        Ok(Value::String(format_number_as(n, &fmt)))
    });

    def!(map, "VALUE", 1, 1, "Parses text as a number, stripping `%`/`,`/`$`.", |args, _| {
        let s = arg_string(args, 0)?;
        Ok(Value::Number(parse_value(&s)?))
    });

    def!(map, "CHAR", 1, 1, "The character for a UTF-16 code unit.", |args, _| {
        let code = arg_i64(args, 0)?;
        let c = char::from_u32(code as u32).ok_or_else(FormulaError::value)?;
        Ok(Value::String(c.to_string()))
    });

    def!(map, "CODE", 1, 1, "The UTF-16 code unit of the first character.", |args, _| {
        let s = arg_string(args, 0)?;
        let c = s.chars().next().ok_or_else(FormulaError::value)?;
        Ok(Value::Number(c as u32 as f64))
    });

    def!(map, "EXACT", 2, 2, "Case-sensitive equality.", |args, _| {
        Ok(Value::Boolean(arg_string(args, 0)? == arg_string(args, 1)?))
    });

    def!(map, "T", 1, 1, "Returns text as-is, everything else as an empty string.", |args, _| {
        Ok(Value::String(match &args[0] {
            Value::String(s) => s.clone(),
            _ => String::new(),
        }))
    });

    def!(map, "N", 1, 1, "Returns a number as-is, booleans as 0/1, everything else 0.", |args, _| {
        Ok(Value::Number(match &args[0] {
            Value::Number(n) => *n,
            Value::Boolean(b) => if *b { 1.0 } else { 0.0 },
            _ => 0.0,
        }))
    });
}

fn proper_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut start_of_run = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if start_of_run {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            start_of_run = false;
        } else {
            out.push(c);
            start_of_run = true;
        }
    }
    out
}

fn find_in(haystack: &str, needle: &str, start: i64, case_sensitive: bool) -> FormulaResult<Value> {
    if start < 1 {
        return Err(FormulaError::value());
    }
    let chars: Vec<char> = haystack.chars().collect();
    let from = (start as usize - 1).min(chars.len());
    let hay_tail: String = chars[from..].iter().collect();
    let (hay, pat) = if case_sensitive {
        (hay_tail, needle.to_string())
    } else {
        (hay_tail.to_lowercase(), needle.to_lowercase())
    };
    match hay.find(&pat) {
        Some(byte_idx) => {
            let char_idx = hay[..byte_idx].chars().count();
            Ok(Value::Number((from + char_idx + 1) as f64))
        }
        None => Err(FormulaError::value()),
    }
}

fn substitute_nth(text: &str, old: &str, new: &str, nth: usize) -> String {
    let mut result = String::new();
    let mut rest = text;
    let mut count = 0;
    while let Some(idx) = rest.find(old) {
        count += 1;
        result.push_str(&rest[..idx]);
        if count == nth {
            result.push_str(new);
        } else {
            result.push_str(old);
        }
        rest = &rest[idx + old.len()..];
    }
    result.push_str(rest);
    result
}

fn parse_value(s: &str) -> FormulaResult<f64> {
    let mut t = s.trim().to_string();
    let mut percent = false;
    if let Some(stripped) = t.strip_suffix('%') {
        percent = true;
        t = stripped.to_string();
    }
    t = t.replace(',', "");
    t = t.trim_start_matches('$').to_string();
    let n: f64 = t.trim().parse().map_err(|_| FormulaError::value())?;
    Ok(if percent { n / 100.0 } else { n })
}

/// A deliberately small subset of Excel's number-format mini-language:
/// `%` (percent, multiplies by 100), `$`/thousands-comma grouping, and
/// `0`/`#` decimal-place placeholders with `000`-style leading-zero width.
fn format_number_as(n: f64, fmt: &str) -> String {
    let percent = fmt.contains('%');
    let value = if percent { n * 100.0 } else { n };
    let grouped = fmt.contains(',');
    let currency = fmt.contains('$');
    let decimals = fmt.split('.').nth(1).map(|frac| frac.chars().filter(|c| *c == '0' || *c == '#').count()).unwrap_or(0);
    let int_width = fmt.split('.').next().unwrap_or("").chars().filter(|c| *c == '0').count();

    let mut body = format!("{:.*}", decimals, value.abs());
    if int_width > 0 {
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i.to_string(), Some(f.to_string())),
            None => (body.clone(), None),
        };
        let padded = format!("{:0>width$}", int_part, width = int_width);
        body = match frac_part {
            Some(f) => format!("{padded}.{f}"),
            None => padded,
        };
    }
    if grouped {
        body = group_thousands(&body);
    }
    let mut out = String::new();
    if value < 0.0 {
        out.push('-');
    }
    if currency {
        out.push('$');
    }
    out.push_str(&body);
    if percent {
        out.push('%');
    }
    out
}

fn group_thousands(s: &str) -> String {
    let (int_part, rest) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let bytes: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    for (i, c) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }
    match rest {
        Some(f) => format!("{grouped}.{f}"),
        None => grouped,
    }
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
    fn concatenate_and_len_and_upper() {
        assert_eq!(eval_str(r#"CONCATENATE("Hello"," ","World")"#), Value::String("Hello World".into()));
        assert_eq!(eval_str(r#"LEN("Hello")"#), Value::Number(5.0));
        assert_eq!(eval_str(r#"UPPER("hello")"#), Value::String("HELLO".into()));
    }

    #[test]
    fn proper_treats_apostrophes_as_run_separators() {
        assert_eq!(eval_str(r#"PROPER("mcdonald's farm")"#), Value::String("Mcdonald'S Farm".into()));
    }

    #[test]
    fn trim_collapses_internal_whitespace() {
        assert_eq!(eval_str(r#"TRIM("  a   b  ")"#), Value::String("a b".into()));
    }

    #[test]
    fn left_right_mid_by_character_position() {
        assert_eq!(eval_str(r#"LEFT("Hello",3)"#), Value::String("Hel".into()));
        assert_eq!(eval_str(r#"RIGHT("Hello",3)"#), Value::String("llo".into()));
        assert_eq!(eval_str(r#"MID("Hello",2,3)"#), Value::String("ell".into()));
    }

    #[test]
    fn find_is_case_sensitive_search_is_not() {
        assert_eq!(eval_str(r#"FIND("World","Hello World")"#), Value::Number(7.0));
        assert_eq!(eval_str(r#"SEARCH("world","Hello World")"#), Value::Number(7.0));
    }

    #[test]
    fn substitute_replaces_a_single_occurrence_by_position() {
        assert_eq!(eval_str(r#"SUBSTITUTE("a-b-c","-","+",2)"#), Value::String("a-b+c".into()));
    }

    #[test]
    fn text_formats_with_thousands_grouping_and_decimals() {
        assert_eq!(eval_str(r#"TEXT(1234.5,"#,##0.00")"#), Value::String("1,234.50".into()));
    }

    #[test]
    fn value_strips_currency_and_percent_markers() {
        assert_eq!(eval_str(r#"VALUE("$1,200")"#), Value::Number(1200.0));
        assert_eq!(eval_str(r#"VALUE("50%")"#), Value::Number(0.5));
    }
}
