//! Variable scopes and global namespaces
//!
//! Variable lookup is case-insensitive in the scripting language, so
//! containers key on the lowercased name while keeping the name as first
//! written for display.

use std::fmt;

use indexmap::IndexMap;

use crate::value::Value;

/// A named variable slot.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Name as first written, for display and traces
    pub name: String,
    pub value: Value,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A variable container; frame locals and namespaces both use it.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: IndexMap<String, Variable>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(&name.to_lowercase()).map(|v| &v.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(&name.to_lowercase())
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.variables
            .insert(name.to_lowercase(), Variable::new(name, value));
    }

    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        self.variables.shift_remove(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }
}

/// Which global namespace a frame addresses with public names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamespaceKind {
    #[default]
    Mission,
    Ui,
    Parsing,
    Profile,
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NamespaceKind::Mission => "missionNamespace",
            NamespaceKind::Ui => "uiNamespace",
            NamespaceKind::Parsing => "parsingNamespace",
            NamespaceKind::Profile => "profileNamespace",
        };
        f.write_str(name)
    }
}

/// The four global namespaces of one runtime.
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    mission: Scope,
    ui: Scope,
    parsing: Scope,
    profile: Scope,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: NamespaceKind) -> &Scope {
        match kind {
            NamespaceKind::Mission => &self.mission,
            NamespaceKind::Ui => &self.ui,
            NamespaceKind::Parsing => &self.parsing,
            NamespaceKind::Profile => &self.profile,
        }
    }

    pub fn get_mut(&mut self, kind: NamespaceKind) -> &mut Scope {
        match kind {
            NamespaceKind::Mission => &mut self.mission,
            NamespaceKind::Ui => &mut self.ui,
            NamespaceKind::Parsing => &mut self.parsing,
            NamespaceKind::Profile => &mut self.profile,
        }
    }
}
