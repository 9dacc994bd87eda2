//! Stack trace rewriting
//!
//! Traces captured inside a script context point at the code the engine
//! actually evaluated: includes prepended to the user source, plus the
//! prelude functions that drive the call. Rewriting keeps only frames that
//! map back to the user's own text and reports them in its coordinates.
//!
//! Parsing of the engine's textual trace format lives in
//! [`parse_quickjs_trace`]; translation is a separate [`FrameTranslator`]
//! so another engine can supply frames in its own way.

use std::fmt::Write as _;

use crate::capability::INTERNAL_PREFIX;

/// One frame of a captured stack trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: Option<String>,
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

/// Maps an engine frame back to user-source coordinates
///
/// Returning `None` drops the frame.
pub trait FrameTranslator {
    fn translate(&self, frame: &StackFrame) -> Option<StackFrame>;
}

/// Translator for code evaluated as `includes` followed by the user source
#[derive(Debug, Clone, Default)]
pub struct SourceOffsetTranslator {
    source_file: Option<String>,
    include_lines: u32,
    wrapper_lines: u32,
    preamble_lines: u32,
}

impl SourceOffsetTranslator {
    /// Translator for frames located in `source_file`
    ///
    /// Frames from any other file are dropped. `None` accepts any file,
    /// which is only useful when the engine does not report file names.
    pub fn new(source_file: Option<String>) -> Self {
        Self {
            source_file,
            ..Self::default()
        }
    }

    /// Lines occupied by prepended includes and their separators
    pub fn include_lines(mut self, lines: u32) -> Self {
        self.include_lines = lines;
        self
    }

    /// Lines the loader wraps around the combined source
    pub fn wrapper_lines(mut self, lines: u32) -> Self {
        self.wrapper_lines = lines;
        self
    }

    /// Lines the compiler itself adds ahead of the first source line
    pub fn preamble_lines(mut self, lines: u32) -> Self {
        self.preamble_lines = lines;
        self
    }

    pub fn line_offset(&self) -> u32 {
        self.include_lines + self.wrapper_lines + self.preamble_lines
    }
}

impl FrameTranslator for SourceOffsetTranslator {
    fn translate(&self, frame: &StackFrame) -> Option<StackFrame> {
        if let Some(file) = &self.source_file {
            if &frame.file != file {
                return None;
            }
        }
        if frame
            .function
            .as_deref()
            .is_some_and(|name| name.starts_with(INTERNAL_PREFIX))
        {
            return None;
        }

        let line = frame.line.checked_sub(self.line_offset())?;
        if line < 1 {
            return None;
        }

        Some(StackFrame {
            line,
            ..frame.clone()
        })
    }
}

/// Number of lines `includes` occupy once joined ahead of the source
///
/// Includes are joined with `\n` and separated from the source by one more
/// `\n`, so each include contributes its own newlines plus one.
pub fn include_line_count<S: AsRef<str>>(includes: &[S]) -> u32 {
    includes
        .iter()
        .map(|include| include.as_ref().matches('\n').count() as u32 + 1)
        .sum()
}

/// Parse a QuickJS `Error.prototype.stack` string
///
/// Recognised frame lines are `at name (file:line[:col])` and
/// `at file:line[:col]`. Native frames and lines in any other shape are
/// skipped.
pub fn parse_quickjs_trace(stack: &str) -> Vec<StackFrame> {
    stack.lines().filter_map(parse_frame).collect()
}

fn parse_frame(line: &str) -> Option<StackFrame> {
    let rest = line.trim().strip_prefix("at ")?;

    let (function, location) = match rest.strip_suffix(')') {
        Some(inner) => {
            let open = inner.rfind(" (")?;
            let name = inner[..open].trim();
            let function = (!name.is_empty() && !name.starts_with('<')).then(|| name.to_string());
            (function, &inner[open + 2..])
        }
        None => (None, rest),
    };

    if location == "native" {
        return None;
    }

    let (file, line, column) = split_location(location)?;
    Some(StackFrame {
        function,
        file: file.to_string(),
        line,
        column,
    })
}

fn split_location(location: &str) -> Option<(&str, u32, Option<u32>)> {
    let (head, last) = location.rsplit_once(':')?;
    let last: u32 = last.parse().ok()?;

    // `file:line:col` when the segment before the last one is numeric too
    if let Some((file, line)) = head.rsplit_once(':') {
        if let Ok(line) = line.parse::<u32>() {
            if !file.is_empty() {
                return Some((file, line, Some(last)));
            }
        }
    }

    if head.is_empty() {
        return None;
    }
    Some((head, last, None))
}

/// Render a rewritten trace for the user
///
/// The first line is `header` (usually `Name: message`); each surviving
/// frame follows as `    at <function> (<label>:<line>:<column>)`.
pub fn rewrite_stack(
    header: &str,
    stack: &str,
    translator: &dyn FrameTranslator,
    label: &str,
) -> String {
    let mut out = header.to_string();
    for frame in parse_quickjs_trace(stack)
        .iter()
        .filter_map(|frame| translator.translate(frame))
    {
        let function = frame.function.as_deref().unwrap_or("<anonymous>");
        let _ = match frame.column {
            Some(column) => write!(
                out,
                "\n    at {function} ({label}:{}:{column})",
                frame.line
            ),
            None => write!(out, "\n    at {function} ({label}:{})", frame.line),
        };
    }
    out
}
