//! Front-matter splitting and document reassembly.
//!
//! A lectic document is an optional YAML front matter delimited by `---`
//! lines (the closing delimiter may also be `...`), followed by a Markdown
//! body. Splitting is purely textual so the body round-trips byte-for-byte.

use anyhow::{Context, Result};

/// A lectic document split into its raw header text and body.
#[derive(Debug, Clone)]
pub struct Document {
    /// Raw YAML between the front-matter fences, without the fences.
    pub header: Option<String>,
    /// Everything after the closing fence (or the whole text when no
    /// front matter is present).
    pub body: String,
}

impl Document {
    /// Splits `text` into front matter and body.
    ///
    /// Front matter requires `---` as the very first line. A document whose
    /// first line is not `---` has no header and is all body.
    pub fn parse(text: &str) -> Self {
        let mut lines = text.split_inclusive('\n');
        match lines.next() {
            Some(first) if first.trim_end() == "---" => {}
            _ => {
                return Self {
                    header: None,
                    body: text.to_string(),
                };
            }
        }

        let mut offset = text.find('\n').map(|i| i + 1).unwrap_or(text.len());
        for line in lines {
            let trimmed = line.trim_end();
            if trimmed == "---" || trimmed == "..." {
                let header = text[text.find('\n').map(|i| i + 1).unwrap_or(0)..offset].to_string();
                let body = text[offset + line.len()..].to_string();
                return Self {
                    header: Some(header),
                    body,
                };
            }
            offset += line.len();
        }

        // Unterminated front matter: treat the whole text as body so the
        // user sees a header-validation error rather than silent loss.
        Self {
            header: None,
            body: text.to_string(),
        }
    }

    /// Parses the raw header text as a YAML mapping.
    ///
    /// Returns an empty mapping when the document has no front matter.
    pub fn header_value(&self) -> Result<serde_yaml::Value> {
        match &self.header {
            None => Ok(serde_yaml::Value::Mapping(Default::default())),
            Some(raw) => {
                let value: serde_yaml::Value = serde_yaml::from_str(raw)
                    .context("Failed to parse the document's YAML header")?;
                match value {
                    serde_yaml::Value::Null => Ok(serde_yaml::Value::Mapping(Default::default())),
                    v => Ok(v),
                }
            }
        }
    }

    /// Reassembles the document text from its parts.
    pub fn serialize(&self) -> String {
        match &self.header {
            None => self.body.clone(),
            Some(h) => format!("---\n{}---\n{}", h, self.body),
        }
    }
}

/// Renders an assistant block bracketed by `:::Name` / `:::` fences.
pub fn assistant_block(name: &str, content: &str) -> String {
    format!(":::{}\n\n{}\n\n:::\n", name, content.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_front_matter() {
        let doc = Document::parse("---\ninterlocutor:\n  name: Bot\n---\nHello\n");
        assert_eq!(doc.header.as_deref(), Some("interlocutor:\n  name: Bot\n"));
        assert_eq!(doc.body, "Hello\n");
    }

    #[test]
    fn accepts_dots_as_closing_fence() {
        let doc = Document::parse("---\na: 1\n...\nbody");
        assert_eq!(doc.header.as_deref(), Some("a: 1\n"));
        assert_eq!(doc.body, "body");
    }

    #[test]
    fn no_front_matter_is_all_body() {
        let doc = Document::parse("Hello\n---\nnot a header\n");
        assert!(doc.header.is_none());
        assert_eq!(doc.body, "Hello\n---\nnot a header\n");
    }

    #[test]
    fn unterminated_front_matter_is_body() {
        let doc = Document::parse("---\na: 1\nno closing fence\n");
        assert!(doc.header.is_none());
    }

    #[test]
    fn serialize_round_trips() {
        let text = "---\na: 1\n---\nbody text\n\n::: Bot\n\nhi\n\n:::\n";
        let doc = Document::parse(text);
        assert_eq!(doc.serialize(), text);
    }

    #[test]
    fn header_value_of_empty_header_is_mapping() {
        let doc = Document::parse("no header");
        assert!(doc.header_value().unwrap().is_mapping());
    }
}
