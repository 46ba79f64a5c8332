//! Preprocessing engine
//!
//! Directive handling is line-oriented; runs of plain lines are expanded
//! as one block so function-like macro arguments can span lines. All
//! diagnostics continue processing where possible; the caller gets the
//! flat output plus a soft-error flag.

use quill_diagnostics::{Location, Message, Reporter, Severity};
use quill_vfs::{FileIo, PathInfo};
use tracing::{debug, trace};

use crate::macros::{Macro, MacroTable};

/// Outcome of a preprocessing run.
#[derive(Debug, Clone)]
pub struct PreprocessResult {
    /// Flat, macro-expanded text with `#line` markers at include
    /// boundaries
    pub output: String,
    /// True when error-severity diagnostics were emitted along the way
    pub soft_errors: bool,
}

/// The preprocessor front door.
///
/// Host-registered macros (`push_back`) are seeded into every run;
/// everything else is per-run state, so one `Preprocessor` can serve
/// many files.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    registered: Vec<Macro>,
    classic_includes: bool,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            registered: Vec::new(),
            classic_includes: true,
        }
    }

    /// Register a macro available to every preprocessing run.
    pub fn push_back(&mut self, macro_def: Macro) {
        self.registered.push(macro_def);
    }

    /// Whether `#include` resolves relative to the including file before
    /// falling back to the mount root.
    pub fn set_classic_includes(&mut self, enabled: bool) {
        self.classic_includes = enabled;
    }

    /// Preprocess in-memory content attributed to `path`.
    ///
    /// Always produces output; parse problems surface as diagnostics
    /// plus the `soft_errors` flag.
    pub fn preprocess(
        &self,
        file_io: &FileIo,
        reporter: &mut Reporter,
        content: &str,
        path: &PathInfo,
    ) -> Option<PreprocessResult> {
        let mut macros = MacroTable::new();
        for macro_def in &self.registered {
            macros.define(macro_def.clone());
        }
        let mut session = Session {
            file_io,
            reporter,
            classic_includes: self.classic_includes,
            macros,
            include_stack: vec![path.clone()],
            conditionals: Vec::new(),
            output: String::new(),
            soft_errors: false,
        };
        session.process_content(content, path);
        Some(PreprocessResult {
            output: session.output,
            soft_errors: session.soft_errors,
        })
    }

    /// Resolve `virtual_path`, read it and preprocess it.
    ///
    /// Returns `None` when the root file cannot be resolved or read;
    /// that is the one fatal condition at this level.
    pub fn preprocess_file(
        &self,
        file_io: &FileIo,
        reporter: &mut Reporter,
        virtual_path: &str,
    ) -> Option<PreprocessResult> {
        let Some(info) = file_io.get_info_virtual(virtual_path, &PathInfo::default()) else {
            reporter.report(Message::FileNotFound {
                location: Location::file_only(virtual_path),
                path: virtual_path.to_string(),
            });
            return None;
        };
        let content = match file_io.read_file(&info) {
            Ok(content) => content,
            Err(_) => {
                reporter.report(Message::FileNotFound {
                    location: Location::file_only(virtual_path),
                    path: info.physical.clone(),
                });
                return None;
            }
        };
        self.preprocess(file_io, reporter, &content, &info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionalKind {
    Ifdef,
    Ifndef,
}

#[derive(Debug)]
struct ConditionalFrame {
    kind: ConditionalKind,
    taken: bool,
    in_else: bool,
}

impl ConditionalFrame {
    fn branch_active(&self) -> bool {
        self.taken != self.in_else
    }
}

struct Session<'a> {
    file_io: &'a FileIo,
    reporter: &'a mut Reporter,
    classic_includes: bool,
    macros: MacroTable,
    include_stack: Vec<PathInfo>,
    conditionals: Vec<ConditionalFrame>,
    output: String,
    soft_errors: bool,
}

/// Leading directive word of a line, if the line is a directive.
fn directive_name(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix('#')?;
    Some(
        rest.trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect(),
    )
}

impl Session<'_> {
    fn emit(&mut self, message: Message) {
        if message.severity() >= Severity::Error {
            self.soft_errors = true;
        }
        self.reporter.report(message);
    }

    fn active(&self) -> bool {
        self.conditionals.iter().all(ConditionalFrame::branch_active)
    }

    fn process_content(&mut self, content: &str, path: &PathInfo) {
        let depth_at_entry = self.conditionals.len();
        let had_trailing_newline = content.ends_with('\n');
        let mut lines: Vec<&str> = content.split('\n').collect();
        if had_trailing_newline {
            lines.pop();
        }

        let mut index = 0;
        while index < lines.len() {
            if directive_name(lines[index]).is_some() {
                let line_no = index + 1;
                // Splice backslash continuations into one logical line
                let mut text = lines[index].to_string();
                while text.trim_end().ends_with('\\') && index + 1 < lines.len() {
                    let spliced = text.trim_end();
                    text = spliced[..spliced.len() - 1].to_string();
                    index += 1;
                    text.push_str(lines[index]);
                }
                self.handle_directive(&text, line_no, index + 2, path);
                index += 1;
            } else {
                let start = index;
                while index < lines.len() && directive_name(lines[index]).is_none() {
                    index += 1;
                }
                if self.active() {
                    let block = lines[start..index].join("\n");
                    let expanded =
                        self.expand_block(&block, path, start + 1, 1, &mut Vec::new());
                    self.output.push_str(&expanded);
                    if index < lines.len() || had_trailing_newline {
                        self.output.push('\n');
                    }
                }
            }
        }

        if self.conditionals.len() > depth_at_entry {
            trace!(open = ?self.conditionals, "conditionals open at end of file");
            self.emit(Message::MissingEndif {
                location: Location::new(&path.virtual_path, lines.len(), 1),
            });
            self.conditionals.truncate(depth_at_entry);
        }
    }

    fn handle_directive(&mut self, text: &str, line_no: usize, restore_line: usize, path: &PathInfo) {
        let trimmed = text.trim_start();
        let hash_col = text.len() - trimmed.len() + 1;
        let location = Location::new(&path.virtual_path, line_no, hash_col);
        let rest = trimmed[1..].trim_start();
        let word: String = rest.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
        let args = &rest[word.len()..];

        match word.as_str() {
            "include" => {
                if self.active() {
                    self.directive_include(args.trim(), location, restore_line, path);
                }
            }
            "define" => {
                if self.active() {
                    self.directive_define(args, location);
                }
            }
            "undef" => {
                if self.active() {
                    let name = identifier_prefix(args.trim_start());
                    self.macros.undefine(&name);
                }
            }
            "ifdef" | "ifndef" => {
                let kind = if word == "ifdef" {
                    ConditionalKind::Ifdef
                } else {
                    ConditionalKind::Ifndef
                };
                let name = identifier_prefix(args.trim_start());
                let defined = self.macros.is_defined(&name);
                let taken = match kind {
                    ConditionalKind::Ifdef => defined,
                    ConditionalKind::Ifndef => !defined,
                };
                self.conditionals.push(ConditionalFrame {
                    kind,
                    taken,
                    in_else: false,
                });
            }
            "else" => match self.conditionals.last_mut() {
                Some(frame) if !frame.in_else => frame.in_else = true,
                _ => self.emit(Message::UnexpectedElse { location }),
            },
            "endif" => {
                if self.conditionals.pop().is_none() {
                    self.emit(Message::UnexpectedEndif { location });
                }
            }
            // Marker lines from an earlier preprocessing pass stay put
            "line" => {
                if self.active() {
                    self.output.push_str(text);
                    self.output.push('\n');
                }
            }
            _ => {
                if self.active() {
                    self.emit(Message::UnknownDirective {
                        location,
                        directive: format!("#{word}"),
                    });
                }
            }
        }
    }

    fn directive_define(&mut self, args: &str, location: Location) {
        let rest = args.trim_start();
        let name = identifier_prefix(rest);
        if name.is_empty() {
            self.emit(Message::GenericError {
                location,
                text: "Malformed #define: missing macro name.".to_string(),
            });
            return;
        }
        let after = &rest[name.len()..];

        let macro_def = if let Some(param_text) = after.strip_prefix('(') {
            let Some(close) = param_text.find(')') else {
                self.emit(Message::GenericError {
                    location,
                    text: format!("Unterminated parameter list in #define {name}."),
                });
                return;
            };
            let params: Vec<String> = if param_text[..close].trim().is_empty() {
                Vec::new()
            } else {
                param_text[..close]
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .collect()
            };
            let body = param_text[close + 1..].trim();
            Macro::callable(&name, params, body).defined_at(location.clone())
        } else {
            Macro::object(&name, after.trim()).defined_at(location.clone())
        };

        trace!(macro_name = %name, "macro defined");
        if self.macros.define(macro_def).is_some() {
            self.emit(Message::MacroDefinedTwice {
                location,
                macro_name: name,
            });
        }
    }

    fn directive_include(
        &mut self,
        args: &str,
        location: Location,
        restore_line: usize,
        path: &PathInfo,
    ) {
        let Some((target, remainder)) = parse_include_target(args) else {
            self.emit(Message::IncludeFailed {
                location,
                target: args.to_string(),
            });
            return;
        };
        if !remainder.trim().is_empty() {
            self.emit(Message::UnexpectedDataAfterInclude {
                location: location.clone(),
            });
        }

        let resolved = if self.classic_includes {
            self.file_io
                .get_info_virtual(&target, path)
                .or_else(|| self.file_io.get_info_virtual(&target, &PathInfo::default()))
        } else {
            self.file_io.get_info_virtual(&target, &PathInfo::default())
        };
        let Some(info) = resolved else {
            self.emit(Message::IncludeFailed { location, target });
            return;
        };

        if self
            .include_stack
            .iter()
            .any(|entry| entry.physical == info.physical)
        {
            let mut tree: Vec<&str> = self
                .include_stack
                .iter()
                .map(|entry| entry.virtual_path.as_str())
                .collect();
            tree.push(&info.virtual_path);
            self.emit(Message::RecursiveInclude {
                location,
                include_tree: tree.join(" -> "),
            });
            return;
        }

        let content = match self.file_io.read_file(&info) {
            Ok(content) => content,
            Err(_) => {
                self.emit(Message::IncludeFailed { location, target });
                return;
            }
        };

        debug!(include = %info.virtual_path, from = %path.virtual_path, "splicing include");
        self.output
            .push_str(&format!("#line 1 \"{}\"\n", info.virtual_path));
        self.include_stack.push(info.clone());
        self.process_content(&content, &info);
        self.include_stack.pop();
        if !self.output.ends_with('\n') {
            self.output.push('\n');
        }
        self.output
            .push_str(&format!("#line {} \"{}\"\n", restore_line, path.virtual_path));
    }

    /// Expand all macro invocations in `block`, copying everything else
    /// verbatim. `suppressed` carries the macros already being expanded
    /// on this occurrence chain; they read as plain identifiers.
    fn expand_block(
        &mut self,
        block: &str,
        path: &PathInfo,
        line: usize,
        col: usize,
        suppressed: &mut Vec<String>,
    ) -> String {
        let mut scanner = Scanner::new(block, line, col);
        let mut out = String::new();

        while let Some(c) = scanner.peek() {
            if c == '"' || c == '\'' {
                out.push_str(&take_string_literal(&mut scanner));
            } else if c.is_ascii_digit() {
                out.push_str(&take_number_like(&mut scanner));
            } else if c.is_ascii_alphabetic() || c == '_' {
                let (word_line, word_col) = scanner.position();
                let word = take_identifier(&mut scanner);
                let known = self.macros.get(&word).cloned();
                match known {
                    Some(mac) if !suppressed.contains(&word) => {
                        self.expand_invocation(
                            &mac, &word, word_line, word_col, &mut scanner, path, suppressed,
                            &mut out,
                        );
                    }
                    _ => out.push_str(&word),
                }
            } else {
                out.push(c);
                scanner.bump();
            }
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_invocation(
        &mut self,
        mac: &Macro,
        word: &str,
        word_line: usize,
        word_col: usize,
        scanner: &mut Scanner,
        path: &PathInfo,
        suppressed: &mut Vec<String>,
        out: &mut String,
    ) {
        let location = Location::new(&path.virtual_path, word_line, word_col);

        let args = if mac.is_callable() {
            let saved = scanner.save();
            while scanner.peek().is_some_and(|c| c.is_whitespace()) {
                scanner.bump();
            }
            if scanner.peek() != Some('(') {
                scanner.restore(saved);
                out.push_str(word);
                return;
            }
            match parse_arguments(scanner) {
                Some(raw) => {
                    let mut args: Vec<String> =
                        raw.iter().map(|a| a.trim().to_string()).collect();
                    if args.len() == 1 && args[0].is_empty() && mac.params().is_empty() {
                        args.clear();
                    }
                    if args.len() != mac.params().len() {
                        self.emit(Message::ArgCountMismatch {
                            location,
                            macro_name: word.to_string(),
                            expected: mac.params().len(),
                            got: args.len(),
                        });
                        // Leave the invocation as written
                        out.push_str(word);
                        out.push_str(&scanner.slice_from(saved));
                        return;
                    }
                    args
                }
                None => {
                    scanner.restore(saved);
                    out.push_str(word);
                    return;
                }
            }
        } else {
            Vec::new()
        };

        // Arguments expand first, in the surrounding suppression scope
        let expanded_args: Vec<String> = args
            .iter()
            .map(|arg| self.expand_block(arg, path, word_line, word_col, suppressed))
            .collect();

        trace!(macro_name = %word, args = expanded_args.len(), "expanding macro");
        if let Some(callback) = mac.callback() {
            // Host-computed expansion, no rescan
            out.push_str(&callback(mac, &location, path, &expanded_args));
            return;
        }

        let substituted = substitute(mac.body(), mac.params(), &expanded_args);
        suppressed.push(word.to_string());
        let expanded = self.expand_block(&substituted, path, word_line, word_col, suppressed);
        suppressed.pop();
        out.push_str(&expanded);
    }
}

/// Extract the quoted include target; returns the target and whatever
/// trails the closing delimiter.
fn parse_include_target(args: &str) -> Option<(String, &str)> {
    let open = args.chars().next()?;
    let close = match open {
        '"' => '"',
        '<' => '>',
        _ => return None,
    };
    let close_at = args[1..].find(close)? + 1;
    Some((args[1..close_at].to_string(), &args[close_at + 1..]))
}

fn identifier_prefix(text: &str) -> String {
    text.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Replace whole-identifier parameter occurrences in a macro body.
/// String literals stay opaque.
fn substitute(body: &str, params: &[String], args: &[String]) -> String {
    let mut scanner = Scanner::new(body, 1, 1);
    let mut out = String::new();
    while let Some(c) = scanner.peek() {
        if c == '"' || c == '\'' {
            out.push_str(&take_string_literal(&mut scanner));
        } else if c.is_ascii_digit() {
            out.push_str(&take_number_like(&mut scanner));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let word = take_identifier(&mut scanner);
            match params.iter().position(|p| *p == word) {
                Some(index) => out.push_str(&args[index]),
                None => out.push_str(&word),
            }
        } else {
            out.push(c);
            scanner.bump();
        }
    }
    out
}

/// Comma-split a balanced argument list, starting at the opening paren.
/// Returns `None` when the list never closes.
fn parse_arguments(scanner: &mut Scanner) -> Option<Vec<String>> {
    scanner.bump(); // the '('
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 1usize;
    while let Some(c) = scanner.peek() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
                scanner.bump();
            }
            ')' => {
                depth -= 1;
                scanner.bump();
                if depth == 0 {
                    args.push(current);
                    return Some(args);
                }
                current.push(c);
            }
            ',' if depth == 1 => {
                scanner.bump();
                args.push(std::mem::take(&mut current));
            }
            '"' | '\'' => current.push_str(&take_string_literal(scanner)),
            _ => {
                current.push(c);
                scanner.bump();
            }
        }
    }
    None
}

fn take_identifier(scanner: &mut Scanner) -> String {
    let mut word = String::new();
    while let Some(c) = scanner.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            scanner.bump();
        } else {
            break;
        }
    }
    word
}

/// A run starting with a digit never begins an identifier; consume the
/// whole alphanumeric run so `42X` does not expand `X`.
fn take_number_like(scanner: &mut Scanner) -> String {
    let mut out = String::new();
    while let Some(c) = scanner.peek() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            out.push(c);
            scanner.bump();
        } else {
            break;
        }
    }
    out
}

/// Copy a quoted literal verbatim; a doubled quote continues it.
fn take_string_literal(scanner: &mut Scanner) -> String {
    let Some(quote) = scanner.bump() else {
        return String::new();
    };
    let mut out = String::from(quote);
    while let Some(c) = scanner.bump() {
        out.push(c);
        if c == quote {
            if scanner.peek() == Some(quote) {
                out.push(quote);
                scanner.bump();
            } else {
                break;
            }
        }
    }
    out
}

/// Character cursor with line/column bookkeeping.
#[derive(Debug)]
struct Scanner {
    chars: Vec<char>,
    idx: usize,
    line: usize,
    col: usize,
}

impl Scanner {
    fn new(text: &str, line: usize, col: usize) -> Self {
        Self {
            chars: text.chars().collect(),
            idx: 0,
            line,
            col,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.idx += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn position(&self) -> (usize, usize) {
        (self.line, self.col)
    }

    fn save(&self) -> (usize, usize, usize) {
        (self.idx, self.line, self.col)
    }

    fn restore(&mut self, saved: (usize, usize, usize)) {
        (self.idx, self.line, self.col) = saved;
    }

    /// Text consumed since a saved position.
    fn slice_from(&self, saved: (usize, usize, usize)) -> String {
        self.chars[saved.0..self.idx].iter().collect()
    }
}
