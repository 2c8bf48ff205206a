//! Named-placeholder substitution (`"students/{slug}"`).
//!
//! Supports `{name}` placeholders and `{{` / `}}` escapes. Unknown names and
//! unbalanced braces are reported as errors so callers can surface them as
//! configuration problems.

use thiserror::Error;

/// Why a template could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{name}}}")]
    UnknownKey { name: String },

    #[error("unbalanced brace at offset {offset}")]
    Unbalanced { offset: usize },
}

/// Render `template`, replacing each `{name}` with its value from `values`.
pub fn format_template(
    template: &str,
    values: &[(&str, &str)],
) -> std::result::Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    if c == '{' {
                        return Err(TemplateError::Unbalanced { offset });
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(TemplateError::Unbalanced { offset });
                }
                let key = name.trim();
                let value = values
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| TemplateError::UnknownKey {
                        name: key.to_string(),
                    })?;
                out.push_str(value);
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                } else {
                    return Err(TemplateError::Unbalanced { offset });
                }
            }
            other => out.push(other),
        }
    }

    Ok(out)
}
