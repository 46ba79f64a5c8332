//! Quill Diagnostics
//!
//! Structured, location-tagged messages with a fixed taxonomy, plus the
//! logger trait the runtime fans them out through. Every message renders
//! to a single line with the `[L<line>[C<col>|<path>]` prefix that
//! existing log tooling parses.

pub mod location;
pub mod logger;
pub mod message;

pub use location::Location;
pub use logger::{Logger, MemoryLogger, Reporter, StdoutLogger, WriterLogger};
pub use message::{Message, Severity};
