//! Macro model and table

use indexmap::IndexMap;
use quill_diagnostics::Location;
use quill_vfs::PathInfo;

/// Host-supplied expansion function.
///
/// Callback macros ignore their body and inject whatever the host
/// computes from the invocation site and arguments; the result is
/// spliced without a rescan.
pub type MacroCallback = fn(&Macro, &Location, &PathInfo, &[String]) -> String;

/// A preprocessor macro.
///
/// `is_callable` distinguishes function-like macros, whose invocation
/// requires a parenthesized argument list matching `params` in arity,
/// from object macros that substitute bare.
#[derive(Debug, Clone)]
pub struct Macro {
    name: String,
    params: Vec<String>,
    body: String,
    is_callable: bool,
    callback: Option<MacroCallback>,
    site: Location,
}

impl Macro {
    /// Object macro: `NAME` substitutes `body`.
    pub fn object(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            body: body.into(),
            is_callable: false,
            callback: None,
            site: Location::default(),
        }
    }

    /// Function-like macro: `NAME(a, b)` substitutes `body` with the
    /// parameters replaced.
    pub fn callable(
        name: impl Into<String>,
        params: Vec<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            body: body.into(),
            is_callable: true,
            callback: None,
            site: Location::default(),
        }
    }

    /// Object macro whose expansion is computed by the host.
    pub fn with_callback(name: impl Into<String>, callback: MacroCallback) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            body: String::new(),
            is_callable: false,
            callback: Some(callback),
            site: Location::default(),
        }
    }

    /// Function-like macro whose expansion is computed by the host.
    pub fn callable_with_callback(
        name: impl Into<String>,
        params: Vec<String>,
        callback: MacroCallback,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            body: String::new(),
            is_callable: true,
            callback: Some(callback),
            site: Location::default(),
        }
    }

    /// Record the definition site.
    pub fn defined_at(mut self, site: Location) -> Self {
        self.site = site;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_callable(&self) -> bool {
        self.is_callable
    }

    pub fn callback(&self) -> Option<MacroCallback> {
        self.callback
    }

    pub fn site(&self) -> &Location {
        &self.site
    }
}

/// Name-keyed macro store.
///
/// Names compare case-sensitively. At most one live macro per name;
/// `define` replaces and reports whether a previous definition existed.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    macros: IndexMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a macro, returning the definition it replaced, if any.
    pub fn define(&mut self, macro_def: Macro) -> Option<Macro> {
        self.macros.insert(macro_def.name.clone(), macro_def)
    }

    /// Remove a macro; silent when the name is unknown.
    pub fn undefine(&mut self, name: &str) -> Option<Macro> {
        self.macros.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}
