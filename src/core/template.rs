//! Typst template rendering.
//!
//! Templates are Handlebars documents whose `{{ text }}` expression receives
//! the user's text. The text is inserted verbatim by default, so any Typst
//! markup in it is typeset as markup. [`Template::with_markup_escaping`]
//! switches to literal typesetting through [`escape_markup`].
//!
//! Besides `text`, templates may reference `request_id` and `received_at`.
//! A literal `{{` in Typst source must be written as `\{{`.

use std::fmt;
use std::path::Path;

use handlebars::{no_escape, Handlebars};
use serde_json::json;
use uuid::Uuid;

use crate::domain::{ConversionRequest, RenderedDocument};
use crate::error::TemplateError;

/// Placeholder that receives the user's text
pub const SLOT: &str = "{{ text }}";

const TEMPLATE_NAME: &str = "document";

const BUILTIN: &str = include_str!("../../templates/document.typ");

/// Stand-in text used to check that a template actually places `text`
const SLOT_MARKER: &str = "pagesmithslotmarker";

/// Characters with markup meaning anywhere in a line
const INLINE_SPECIAL: &[char] = &[
    '\\', '#', '$', '*', '_', '`', '<', '>', '@', '[', ']', '~', '/',
];

/// Characters that start a heading or list item at the beginning of a line
const LINE_START_SPECIAL: &[char] = &['=', '-', '+'];

/// Compiled document template
#[derive(Clone)]
pub struct Template {
    registry: Handlebars<'static>,
    escape_markup: bool,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("escape_markup", &self.escape_markup)
            .finish_non_exhaustive()
    }
}

impl Template {
    /// The template compiled into the binary
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::parse(BUILTIN)
    }

    /// Load and compile a template file
    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let source = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    /// Compile `source`, rejecting templates that never place the text.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, source)
            .map_err(|e| TemplateError::Parse(Box::new(e)))?;

        let template = Self {
            registry,
            escape_markup: false,
        };
        let sample = template.render_text(SLOT_MARKER, Uuid::nil(), "1970-01-01T00:00:00Z")?;
        if !sample.contains(SLOT_MARKER) {
            return Err(TemplateError::MissingSlot);
        }
        Ok(template)
    }

    /// Typeset the input literally instead of as Typst markup
    pub fn with_markup_escaping(mut self, enabled: bool) -> Self {
        if enabled {
            self.registry.register_escape_fn(escape_markup);
        } else {
            self.registry.register_escape_fn(no_escape);
        }
        self.escape_markup = enabled;
        self
    }

    pub fn escapes_markup(&self) -> bool {
        self.escape_markup
    }

    /// Place the request's text into the template
    pub fn render(&self, request: &ConversionRequest) -> Result<RenderedDocument, TemplateError> {
        let received_at = request.received_at.to_rfc3339();
        self.render_text(&request.raw_text, request.id, &received_at)
            .map(RenderedDocument::new)
    }

    fn render_text(
        &self,
        text: &str,
        request_id: Uuid,
        received_at: &str,
    ) -> Result<String, TemplateError> {
        let data = json!({
            "text": text,
            "request_id": request_id.to_string(),
            "received_at": received_at,
        });
        self.registry
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| TemplateError::Render(Box::new(e)))
    }
}

/// Line terminators recognised by the Typst lexer
fn is_line_break(ch: char) -> bool {
    matches!(
        ch,
        '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Escape `text` so Typst typesets it literally.
///
/// Line breaks and paragraph breaks are kept as typed.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);

    for segment in text.split_inclusive(is_line_break) {
        let (line, terminator) = match segment.char_indices().last() {
            Some((i, ch)) if is_line_break(ch) => segment.split_at(i),
            _ => (segment, ""),
        };
        escape_line(line, &mut out);
        out.push_str(terminator);
    }

    out
}

fn escape_line(line: &str, out: &mut String) {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, body) = line.split_at(indent_len);
    out.push_str(indent);

    // Ordered-list marker such as "12. "
    let digits = body.chars().take_while(char::is_ascii_digit).count();
    let numbered_list = digits > 0 && body[digits..].starts_with('.');

    for (j, ch) in body.char_indices() {
        if ch.is_control() && ch != '\t' {
            out.push_str(&format!("\\u{{{:x}}}", ch as u32));
            continue;
        }
        let at_line_start = j == 0 && LINE_START_SPECIAL.contains(&ch);
        let list_dot = numbered_list && j == digits;
        if INLINE_SPECIAL.contains(&ch) || at_line_start || list_dot {
            out.push('\\');
        }
        out.push(ch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_with(template: &Template, text: &str) -> String {
        template
            .render(&ConversionRequest::new(text))
            .unwrap()
            .source_text()
            .to_string()
    }

    fn render(text: &str) -> String {
        render_with(&Template::parse("before\n{{ text }}\nafter").unwrap(), text)
    }

    #[test]
    fn test_builtin_template_parses() {
        let template = Template::builtin().unwrap();
        let doc = render_with(&template, "Hello");
        assert!(doc.contains("Hello"));
        assert!(!doc.contains(SLOT));
        assert!(doc.contains("#set page("));
    }

    #[test]
    fn test_plain_text_inserted_verbatim_at_slot() {
        let text = "I begin this story with a neutral statement.\nBasically this is a very silly test.";
        assert_eq!(render(text), format!("before\n{}\nafter", text));
    }

    #[test]
    fn test_markup_is_inserted_verbatim_by_default() {
        let template = Template::parse("{{ text }}").unwrap();
        assert!(!template.escapes_markup());
        assert!(render_with(&template, "*Hello* #x").contains("*Hello* #x"));
        assert_eq!(render("= Heading\n<b>&amp;</b>"), "before\n= Heading\n<b>&amp;</b>\nafter");
    }

    #[test]
    fn test_escaping_is_opt_in() {
        let template = Template::parse("{{ text }}")
            .unwrap()
            .with_markup_escaping(true);
        assert_eq!(render_with(&template, "*Hello* #x"), "\\*Hello\\* \\#x");

        let template = template.with_markup_escaping(false);
        assert_eq!(render_with(&template, "*Hello* #x"), "*Hello* #x");
    }

    #[test]
    fn test_request_metadata_available() {
        let template = Template::parse("// {{ request_id }}\n{{ text }}").unwrap();
        let request = ConversionRequest::new("Hi");
        let doc = template.render(&request).unwrap();
        assert_eq!(doc.source_text(), format!("// {}\nHi", request.id));
    }

    #[test]
    fn test_user_text_is_not_rendered_again() {
        assert_eq!(render("{{ text }}"), "before\n{{ text }}\nafter");
    }

    #[test]
    fn test_missing_slot_rejected() {
        assert!(matches!(
            Template::parse("no slot here"),
            Err(TemplateError::MissingSlot)
        ));
    }

    #[test]
    fn test_unknown_variable_rejected() {
        assert!(matches!(
            Template::parse("{{ title }}\n{{ text }}"),
            Err(TemplateError::Render(_))
        ));
    }

    #[test]
    fn test_malformed_template_rejected() {
        assert!(matches!(
            Template::parse("{{ text"),
            Err(TemplateError::Parse(_))
        ));
    }

    #[test]
    fn test_unreadable_template_file() {
        let err = Template::from_file(Path::new("/no/such/template.typ")).unwrap_err();
        assert!(matches!(err, TemplateError::Read { .. }));
    }

    #[test]
    fn test_markup_characters_are_escaped() {
        assert_eq!(escape_markup("#set page(width: 1cm)"), "\\#set page(width: 1cm)");
        assert_eq!(escape_markup("*bold* and _emph_"), "\\*bold\\* and \\_emph\\_");
        assert_eq!(escape_markup("$x^2$"), "\\$x^2\\$");
        assert_eq!(escape_markup("a\\b"), "a\\\\b");
        assert_eq!(escape_markup("<label> @ref [x]"), "\\<label\\> \\@ref \\[x\\]");
        assert_eq!(escape_markup("// not a comment"), "\\/\\/ not a comment");
        assert_eq!(escape_markup("`raw`"), "\\`raw\\`");
    }

    #[test]
    fn test_line_start_markers_are_escaped() {
        assert_eq!(escape_markup("= Heading"), "\\= Heading");
        assert_eq!(escape_markup("  - item"), "  \\- item");
        assert_eq!(escape_markup("+ item"), "\\+ item");
        assert_eq!(escape_markup("12. item"), "12\\. item");
        // Only at line start
        assert_eq!(escape_markup("a = b - c + 1. 2"), "a = b - c + 1. 2");
    }

    #[test]
    fn test_newlines_preserved() {
        assert_eq!(escape_markup("one\n\n= two"), "one\n\n\\= two");
        assert_eq!(escape_markup("one\r\n- two"), "one\r\n\\- two");
    }

    #[test]
    fn test_every_typst_line_break_starts_a_line() {
        assert_eq!(escape_markup("intro\r= x"), "intro\r\\= x");
        assert_eq!(escape_markup("intro\u{2028}- x"), "intro\u{2028}\\- x");
        assert_eq!(escape_markup("intro\u{2029}+ x"), "intro\u{2029}\\+ x");
        assert_eq!(escape_markup("intro\u{85}1. x"), "intro\u{85}1\\. x");
        assert_eq!(escape_markup("intro\u{0B}= x\u{0C}- y"), "intro\u{0B}\\= x\u{0C}\\- y");
    }

    #[test]
    fn test_control_characters_use_unicode_escape() {
        assert_eq!(escape_markup("bell\u{7}"), "bell\\u{7}");
        assert_eq!(escape_markup("a\tb"), "a\tb");
    }

    #[test]
    fn test_unicode_passes_through() {
        assert_eq!(escape_markup("Привіт, світе — ✓"), "Привіт, світе — ✓");
    }
}
