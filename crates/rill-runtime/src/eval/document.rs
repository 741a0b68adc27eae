//! Definition documents and source locations.

use std::fmt;
use std::sync::Arc;

/// A definition document (flow or source file) that fields were read from.
///
/// When the raw text is known, code fields can be located in it so that
/// errors point at a line of the document rather than a line of the code.
#[derive(Debug, Clone)]
pub struct Document {
    name: Arc<str>,
    text: Option<Arc<str>>,
    start_line: usize,
}

impl Document {
    /// Creates a document known only by name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            text: None,
            start_line: 1,
        }
    }

    /// Attaches the raw document text.
    pub fn with_text(mut self, text: impl Into<Arc<str>>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Restricts [`locate`](Self::locate) to lines from `line` (1-based) on.
    ///
    /// Steps of one flow share a document, so each step searches from its
    /// own list item instead of matching an identical block of an earlier
    /// step.
    pub fn starting_at(mut self, line: usize) -> Self {
        self.start_line = line.max(1);
        self
    }

    /// First line searched by [`locate`](Self::locate).
    pub fn start_line(&self) -> usize {
        self.start_line
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw document text, if known.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Returns the origin of a code field.
    pub fn origin(&self, key: &str, code: &str) -> Origin {
        Origin {
            document: self.name.clone(),
            key: key.to_owned(),
            first_line: self.locate(key, code),
        }
    }

    /// Finds the 1-based document line holding the first line of `code`
    /// under `key`, at or after the start line.
    ///
    /// Handles both block scalars (`key: |` followed by indented lines) and
    /// inline values. Returns `None` when the text is unknown or the code
    /// cannot be found.
    pub fn locate(&self, key: &str, code: &str) -> Option<usize> {
        let text = self.text.as_deref()?;
        let (skipped, first) = code
            .lines()
            .enumerate()
            .find(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| (index, line.trim()))?;

        let lines: Vec<&str> = text.lines().collect();
        let prefix = format!("{key}:");
        for (index, line) in lines.iter().enumerate().skip(self.start_line - 1) {
            let trimmed = line.trim_start().trim_start_matches("- ").trim_start();
            let Some(rest) = trimmed.strip_prefix(&prefix) else {
                continue;
            };

            let rest = rest.trim();
            if !rest.is_empty() && !rest.starts_with('|') && !rest.starts_with('>') {
                if rest.trim_matches(|c| c == '"' || c == '\'').trim() == first {
                    return Some(index + 1);
                }
                continue;
            }

            let next = lines
                .iter()
                .enumerate()
                .skip(index + 1)
                .find(|(_, line)| !line.trim().is_empty());
            if let Some((found, line)) = next
                && line.trim() == first
                && found >= skipped
            {
                return Some(found + 1 - skipped);
            }
        }
        None
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Where a code field was defined.
#[derive(Debug, Clone)]
pub struct Origin {
    document: Arc<str>,
    key: String,
    first_line: Option<usize>,
}

impl Origin {
    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Document line of the first line of code, if known.
    pub fn first_line(&self) -> Option<usize> {
        self.first_line
    }

    /// Maps a 1-based line of code to a line of the document.
    pub fn document_line(&self, code_line: usize) -> Option<usize> {
        self.first_line.map(|first| first + code_line.saturating_sub(1))
    }

    /// Formats an error message located in the defining document.
    ///
    /// `Syntax error in parser_expression (line 2 of code, line 14 in
    /// flows/main.yaml): ...`
    pub fn describe(&self, prefix: &str, code_line: Option<usize>, detail: impl fmt::Display) -> String {
        let location = match (code_line, code_line.and_then(|line| self.document_line(line))) {
            (Some(code), Some(line)) => {
                format!("line {code} of code, line {line} in {}", self.document)
            }
            (Some(code), None) => format!("line {code} of code in {}", self.document),
            (None, _) => match self.first_line {
                Some(line) => format!("line {line} in {}", self.document),
                None => self.document.to_string(),
            },
        };
        format!("{prefix} in {} ({location}): {detail}", self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOW: &str = "\
steps:
  - op: set_variable
    name: total
    value_expression: |
      fn evaluate(context) {
        40 + 2
      }
  - op: print
    message_expression: \"fn evaluate(context) { 1 }\"
";

    #[test]
    fn test_locate_block_scalar() {
        let doc = Document::new("flows/main.yaml").with_text(FLOW);
        let code = "fn evaluate(context) {\n  40 + 2\n}\n";
        assert_eq!(doc.locate("value_expression", code), Some(5));
    }

    #[test]
    fn test_locate_repeated_key_from_step_start() {
        let text = "\
steps:
  - op: set_variable
    name: a
    value_expression: |
      fn evaluate(context) {
        1
      }
  - op: set_variable
    name: b
    value_expression: |
      fn evaluate(context) {
        2 +
      }
";
        let second = "fn evaluate(context) {\n  2 +\n}\n";
        let doc = Document::new("flows/main.yaml").with_text(text);
        assert_eq!(doc.locate("value_expression", second), Some(5));

        let doc = doc.starting_at(8);
        assert_eq!(doc.start_line(), 8);
        assert_eq!(doc.locate("value_expression", second), Some(11));
        assert_eq!(doc.origin("value_expression", second).document_line(2), Some(12));
    }

    #[test]
    fn test_locate_inline() {
        let doc = Document::new("flows/main.yaml").with_text(FLOW);
        assert_eq!(doc.locate("message_expression", "fn evaluate(context) { 1 }"), Some(9));
    }

    #[test]
    fn test_describe_maps_lines() {
        let doc = Document::new("flows/main.yaml").with_text(FLOW);
        let origin = doc.origin("value_expression", "fn evaluate(context) {\n  40 + 2\n}\n");
        assert_eq!(
            origin.describe("Runtime error", Some(2), "boom"),
            "Runtime error in value_expression (line 2 of code, line 6 in flows/main.yaml): boom"
        );
    }

    #[test]
    fn test_describe_without_text() {
        let origin = Document::new("inline").origin("parser_expression", "x");
        assert_eq!(
            origin.describe("Syntax error", Some(1), "bad"),
            "Syntax error in parser_expression (line 1 of code in inline): bad"
        );
        assert_eq!(
            origin.describe("Function not found", None, "missing"),
            "Function not found in parser_expression (inline): missing"
        );
    }
}
