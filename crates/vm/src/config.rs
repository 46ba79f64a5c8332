//! Runtime configuration

use serde::{Deserialize, Serialize};

/// Named options the host can set before running scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instructions one context may execute per scheduler pass
    pub max_instructions_per_tick: u64,
    /// Lifetime instruction ceiling per context; 0 disables
    pub max_total_instructions: u64,
    /// Elevate certain lint warnings to errors
    pub strict_mode: bool,
    /// Compare virtual path segments case-sensitively
    pub case_sensitive_paths: bool,
    /// Resolve `#include` relative to the including file first
    pub enable_classic_includes: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            max_instructions_per_tick: 150,
            max_total_instructions: 0,
            strict_mode: false,
            case_sensitive_paths: false,
            enable_classic_includes: true,
        }
    }
}
