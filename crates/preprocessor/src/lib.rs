//! Quill Preprocessor
//!
//! Turns a byte source plus a starting `PathInfo` into a flat,
//! macro-expanded string for the parser. Handles `#include` through the
//! virtual filesystem, `#define`/`#undef` with object, function-like and
//! host-callback macros, `#ifdef`-family conditionals, and `#line`
//! markers so downstream diagnostics keep pointing at original files.

pub mod macros;
pub mod processor;

pub use macros::{Macro, MacroCallback, MacroTable};
pub use processor::{PreprocessResult, Preprocessor};
