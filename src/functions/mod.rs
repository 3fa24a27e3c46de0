//! The built-in function library, split into per-domain submodules each
//! exposing a `register` function that inserts its entries into the shared
//! table built once behind `lazy_static!`.

mod array;
mod financial;
mod lambda;
mod logical;
mod lookup;
mod math;
mod statistical;
mod temporal;
mod text;
mod util;

use std::collections::HashMap;
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::registry::FunctionSpec;

/// Registers an ordinary function: an erroring argument auto-propagates
/// before `$body` ever runs.
macro_rules! def {
    ($map:expr, $name:literal, $min:expr, $max:expr, $doc:literal, $body:expr) => {
        $map.insert(
            $name.to_string(),
            FunctionSpec {
                name: $name.to_string(),
                min_args: $min,
                max_args: $max,
                doc: $doc,
                traps_errors: false,
                body: Arc::new($body),
            },
        );
    };
}

/// Registers an error-trap function: `$body` receives raw, possibly-`Error`
/// arguments (`IFERROR`/`IFNA`/`ISERROR`/`ISNA`, plus `ERROR.TYPE` which
/// needs the same exemption to read the error's kind).
macro_rules! def_trap {
    ($map:expr, $name:literal, $min:expr, $max:expr, $doc:literal, $body:expr) => {
        $map.insert(
            $name.to_string(),
            FunctionSpec {
                name: $name.to_string(),
                min_args: $min,
                max_args: $max,
                doc: $doc,
                traps_errors: true,
                body: Arc::new($body),
            },
        );
    };
}

pub(crate) use def;
pub(crate) use def_trap;

lazy_static! {
    static ref BUILTINS: HashMap<String, FunctionSpec> = {
        let mut map = HashMap::new();
        math::register(&mut map);
        text::register(&mut map);
        logical::register(&mut map);
        temporal::register(&mut map);
        statistical::register(&mut map);
        lookup::register(&mut map);
        financial::register(&mut map);
        array::register(&mut map);
        lambda::register(&mut map);
        map
    };
}

/// The full built-in function table. Cloned into every fresh
/// [`crate::registry::Registry::with_builtins`] so callers can freely
/// extend or override their own copy.
pub(crate) fn builtins() -> &'static HashMap<String, FunctionSpec> {
    &BUILTINS
}
