//! Message taxonomy
//!
//! A closed set of diagnostic kinds, each carrying its source location
//! and typed payload. The original engine modeled these as a class
//! hierarchy; here they are a single tagged sum with one `render`
//! implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::location::Location;

/// Diagnostic severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    Trace,
    Verbose,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Verbose => "VERBOSE",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured diagnostic message.
///
/// Kinds are grouped the way the emitting components are: preprocessor,
/// file I/O, linting, runtime. Adding a kind is a deliberate API change;
/// nothing in the core emits ad-hoc strings outside `InfoMessage` and
/// `GenericError`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // === Preprocessor ===
    ArgCountMismatch {
        location: Location,
        macro_name: String,
        expected: usize,
        got: usize,
    },
    UnexpectedDataAfterInclude {
        location: Location,
    },
    RecursiveInclude {
        location: Location,
        include_tree: String,
    },
    IncludeFailed {
        location: Location,
        target: String,
    },
    MacroDefinedTwice {
        location: Location,
        macro_name: String,
    },
    MacroNotFound {
        location: Location,
        macro_name: String,
    },
    UnexpectedElse {
        location: Location,
    },
    UnexpectedEndif {
        location: Location,
    },
    MissingEndif {
        location: Location,
    },
    UnknownDirective {
        location: Location,
        directive: String,
    },

    // === File I/O ===
    FileNotFound {
        location: Location,
        path: String,
    },

    // === Linting ===
    UnassignedVariable {
        location: Location,
        variable: String,
    },

    // === Runtime ===
    Stacktrace {
        location: Location,
        trace: String,
    },
    MaximumInstructionCountReached {
        location: Location,
        count: u64,
    },
    ArrayRecursion {
        location: Location,
    },
    InfoMessage {
        location: Location,
        text: String,
    },
    SuspensionInUnscheduledEnvironment {
        location: Location,
    },
    ScriptHandleAlreadyTerminated {
        location: Location,
    },
    ScriptHandleAlreadyFinished {
        location: Location,
    },
    ScopeNameAlreadySet {
        location: Location,
        name: String,
    },
    ScriptNameAlreadySet {
        location: Location,
        name: String,
    },
    MagicVariableTypeMismatch {
        location: Location,
        variable: String,
        expected: String,
        got: String,
    },
    NumberOutOfRange {
        location: Location,
    },
    ExpectedArraySizeMismatch {
        location: Location,
        expected: usize,
        got: usize,
    },
    GenericError {
        location: Location,
        text: String,
    },
}

impl Message {
    /// Default severity of this kind, before strict-mode elevation.
    pub fn severity(&self) -> Severity {
        use Message::*;
        match self {
            ArgCountMismatch { .. }
            | UnexpectedDataAfterInclude { .. }
            | RecursiveInclude { .. }
            | IncludeFailed { .. }
            | MacroNotFound { .. }
            | UnexpectedElse { .. }
            | UnexpectedEndif { .. }
            | MissingEndif { .. }
            | UnknownDirective { .. }
            | FileNotFound { .. } => Severity::Error,

            // Redefinition replaces and carries on
            MacroDefinedTwice { .. } => Severity::Warning,

            UnassignedVariable { .. } => Severity::Warning,

            Stacktrace { .. }
            | MaximumInstructionCountReached { .. }
            | ArrayRecursion { .. }
            | SuspensionInUnscheduledEnvironment { .. }
            | GenericError { .. } => Severity::Error,

            InfoMessage { .. } => Severity::Info,

            ScriptHandleAlreadyTerminated { .. }
            | ScriptHandleAlreadyFinished { .. }
            | ScopeNameAlreadySet { .. }
            | ScriptNameAlreadySet { .. }
            | MagicVariableTypeMismatch { .. }
            | NumberOutOfRange { .. }
            | ExpectedArraySizeMismatch { .. } => Severity::Warning,
        }
    }

    /// The source location this message points at.
    pub fn location(&self) -> &Location {
        use Message::*;
        match self {
            ArgCountMismatch { location, .. }
            | UnexpectedDataAfterInclude { location }
            | RecursiveInclude { location, .. }
            | IncludeFailed { location, .. }
            | MacroDefinedTwice { location, .. }
            | MacroNotFound { location, .. }
            | UnexpectedElse { location }
            | UnexpectedEndif { location }
            | MissingEndif { location }
            | UnknownDirective { location, .. }
            | FileNotFound { location, .. }
            | UnassignedVariable { location, .. }
            | Stacktrace { location, .. }
            | MaximumInstructionCountReached { location, .. }
            | ArrayRecursion { location }
            | InfoMessage { location, .. }
            | SuspensionInUnscheduledEnvironment { location }
            | ScriptHandleAlreadyTerminated { location }
            | ScriptHandleAlreadyFinished { location }
            | ScopeNameAlreadySet { location, .. }
            | ScriptNameAlreadySet { location, .. }
            | MagicVariableTypeMismatch { location, .. }
            | NumberOutOfRange { location }
            | ExpectedArraySizeMismatch { location, .. }
            | GenericError { location, .. } => location,
        }
    }

    /// Kind-specific body text, without the location prefix.
    pub fn body(&self) -> String {
        use Message::*;
        match self {
            ArgCountMismatch {
                macro_name,
                expected,
                got,
                ..
            } => format!(
                "Argument count mismatch for macro '{macro_name}': expected {expected}, got {got}."
            ),
            UnexpectedDataAfterInclude { .. } => {
                "Unexpected data after include path.".to_string()
            }
            RecursiveInclude { include_tree, .. } => {
                format!("Recursive include detected. Include tree: {include_tree}")
            }
            IncludeFailed { target, .. } => format!("Failed to include '{target}'."),
            MacroDefinedTwice { macro_name, .. } => {
                format!("Macro '{macro_name}' defined twice.")
            }
            MacroNotFound { macro_name, .. } => format!("Macro '{macro_name}' not found."),
            UnexpectedElse { .. } => {
                "Unexpected ELSE. Not inside of an IFDEF or IFNDEF enclosure.".to_string()
            }
            UnexpectedEndif { .. } => {
                "Unexpected ENDIF. Not inside of an IFDEF or IFNDEF enclosure.".to_string()
            }
            MissingEndif { .. } => {
                "Missing ENDIF. Still inside of an IFDEF or IFNDEF enclosure at end of file."
                    .to_string()
            }
            UnknownDirective { directive, .. } => {
                format!("Unknown preprocessor directive '{directive}'.")
            }
            FileNotFound { path, .. } => format!("File '{path}' not found."),
            UnassignedVariable { variable, .. } => {
                format!("Variable '{variable}' not assigned.")
            }
            Stacktrace { trace, .. } => format!("Stacktrace: {trace}"),
            MaximumInstructionCountReached { count, .. } => {
                format!("Maximum instruction count of {count} reached.")
            }
            ArrayRecursion { .. } => "Array recursion detected.".to_string(),
            InfoMessage { text, .. } => text.clone(),
            SuspensionInUnscheduledEnvironment { .. } => {
                "Cannot suspend in an unscheduled environment.".to_string()
            }
            ScriptHandleAlreadyTerminated { .. } => {
                "Script handle already terminated.".to_string()
            }
            ScriptHandleAlreadyFinished { .. } => {
                "Script handle already finished.".to_string()
            }
            ScopeNameAlreadySet { name, .. } => {
                format!("Scope name already set to '{name}'.")
            }
            ScriptNameAlreadySet { name, .. } => {
                format!("Script name already set to '{name}'.")
            }
            MagicVariableTypeMismatch {
                variable,
                expected,
                got,
                ..
            } => format!(
                "Magic variable '{variable}' expected type {expected}, got {got}."
            ),
            NumberOutOfRange { .. } => "Number out of range, returning NaN.".to_string(),
            ExpectedArraySizeMismatch { expected, got, .. } => {
                format!("Expected array of size {expected}, got {got}.")
            }
            GenericError { text, .. } => text.clone(),
        }
    }

    /// Full single-line rendering: location prefix plus body.
    pub fn render(&self) -> String {
        let mut out = self.location().prefix();
        out.push_str(&self.body());
        out
    }
}
