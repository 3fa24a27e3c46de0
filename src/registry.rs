//! The function registry: a name-keyed map of built-ins plus caller
//! extensions, each entry carrying a `min_args`/`max_args` arity pair and a
//! plain synchronous `Fn` body (the engine is single-threaded and
//! synchronous end to end, so there's no async boundary to cross here).

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{ErrorKind, FormulaError, FormulaResult};
use crate::eval::Evaluator;
use crate::value::Value;

/// The body of a registered function. Receives the already-evaluated,
/// error-checked argument list and a handle to the evaluator for the rare
/// functions that need to invoke a [`LambdaValue`] (`MAP`, `REDUCE`, ...) or
/// touch the data source directly (`INDIRECT`, `RAND`, `TODAY`).
pub type FunctionBody = Arc<dyn Fn(&[Value], &mut Evaluator) -> FormulaResult<Value> + Send + Sync>;

/// Unbounded upper arity bound, for variadic functions.
pub const UNBOUNDED: usize = usize::MAX;

#[derive(Clone)]
pub struct FunctionSpec {
    pub name: String,
    pub min_args: usize,
    pub max_args: usize,
    /// Short human-readable description. A public extension point with no
    /// description would be a worse API, so every entry carries one even
    /// though callers can register a function without supplying their own.
    pub doc: &'static str,
    /// Explicit error traps: `IFERROR`, `IFNA`, `ISERROR`, `ISNA`, and
    /// `ERROR.TYPE` (the last needs the raw error to extract its kind, the
    /// same reason the first four are exempted). Every other function
    /// auto-propagates an erroring argument before its body ever runs.
    pub traps_errors: bool,
    pub body: FunctionBody,
}

/// Name-keyed lookup of built-ins plus caller-registered extensions.
/// Constructed via [`Registry::with_builtins`]; duplicate names overwrite.
#[derive(Clone)]
pub struct Registry {
    functions: HashMap<String, FunctionSpec>,
}

impl Registry {
    /// An empty registry with no built-ins at all.
    pub fn empty() -> Self {
        Self { functions: HashMap::new() }
    }

    /// The default registry: every built-in function the engine ships with.
    pub fn with_builtins() -> Self {
        Self { functions: crate::functions::builtins().clone() }
    }

    /// Registers a function, overwriting any existing entry with the same
    /// name. `name` is stored upper-cased.
    pub fn register(
        &mut self,
        name: impl AsRef<str>,
        min_args: usize,
        max_args: usize,
        body: impl Fn(&[Value], &mut Evaluator) -> FormulaResult<Value> + Send + Sync + 'static,
    ) {
        let name_upper = name.as_ref().to_ascii_uppercase();
        self.functions.insert(
            name_upper.clone(),
            FunctionSpec {
                name: name_upper,
                min_args,
                max_args,
                doc: "",
                traps_errors: false,
                body: Arc::new(body),
            },
        );
    }

    pub(crate) fn insert_spec(&mut self, spec: FunctionSpec) {
        self.functions.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name_upper: &str) -> Option<&FunctionSpec> {
        self.functions.get(name_upper)
    }

    pub fn contains(&self, name_upper: &str) -> bool {
        self.functions.contains_key(name_upper)
    }

    /// Dispatches a call by name: looks it up, enforces arity, propagates
    /// any erroring argument unless the entry traps errors, then invokes
    /// the body, converting a native panic into `#ERROR!`.
    pub fn call(&self, name_upper: &str, args: Vec<Value>, eval: &mut Evaluator) -> FormulaResult<Value> {
        let spec = self.get(name_upper).ok_or_else(FormulaError::name)?;
        if args.len() < spec.min_args || args.len() > spec.max_args {
            return Err(FormulaError::value());
        }
        if !spec.traps_errors {
            if let Some(e) = args.iter().find_map(|v| v.as_error().cloned()) {
                return Err(e);
            }
        }
        let body = spec.body.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| body(&args, eval))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "native function panic".to_string());
                Err(FormulaError::from(ErrorKind::generic(msg)))
            }
        }
    }
}
