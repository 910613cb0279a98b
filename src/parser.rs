//! Markdown body parsing.
//!
//! Two layers, both span-based so any node can reproduce its raw source
//! slice verbatim:
//!
//!   * [`parse_body`] splits a document body at `::: Name` container fences
//!     into alternating user spans and named assistant blocks.
//!   * [`scan_inline`] walks a flat text region and picks out Markdown
//!     links and `:name[inner]{k=v}` inline directives.
//!
//! Both layers treat ```` ``` ````- and `~~~`-fenced code as opaque: fence
//! lines and directives inside code are plain text.

use anyhow::{bail, Result};

/// A half-open byte range into the source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// The raw source slice this span covers.
    pub fn slice<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }
}

/// Top-level body structure: user text interleaved with assistant blocks.
#[derive(Debug, Clone)]
pub enum BodyNode {
    /// A run of user text (may contain links and directives).
    User(Span),
    /// A `::: Name` ... `:::` container.
    Block(BlockNode),
}

/// One assistant container block.
#[derive(Debug, Clone)]
pub struct BlockNode {
    /// Interlocutor name from the opening fence.
    pub name: String,
    /// Content between the fences, excluding the fence lines.
    pub content: Span,
    /// The whole block including both fence lines.
    pub span: Span,
}

/// An element found by the inline scanner.
#[derive(Debug, Clone)]
pub enum InlineNode {
    /// Plain text between the interesting elements.
    Text(Span),
    /// A Markdown link `[text](uri "title")`.
    Link(LinkNode),
    /// An inline directive `:name[inner]{k=v}`.
    Directive(DirectiveNode),
}

#[derive(Debug, Clone)]
pub struct LinkNode {
    /// The bracketed link text.
    pub text: Span,
    /// The target URI, with any `"title"` suffix stripped.
    pub uri: String,
    /// Optional quoted title.
    pub title: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct DirectiveNode {
    pub name: String,
    /// Raw substring between the outermost brackets. Nested brackets and
    /// verbatim YAML survive untouched.
    pub inner: Span,
    /// Parsed `{k=v ...}` attributes, empty when absent.
    pub attrs: Vec<(String, String)>,
    pub span: Span,
}

impl InlineNode {
    pub fn span(&self) -> Span {
        match self {
            InlineNode::Text(s) => *s,
            InlineNode::Link(l) => l.span,
            InlineNode::Directive(d) => d.span,
        }
    }
}

/// Returns the byte ranges of fenced code regions (fence lines included).
///
/// A fence opened with N backticks (or tildes) closes at the next line
/// starting with at least N of the same character. An unclosed fence runs
/// to the end of input.
fn fenced_regions(src: &str) -> Vec<Span> {
    let mut regions = Vec::new();
    let mut open: Option<(char, usize, usize)> = None; // (char, len, start)
    let mut offset = 0;

    for line in src.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        let fence_char = trimmed.chars().next();
        if indent <= 3 && matches!(fence_char, Some('`') | Some('~')) {
            let c = fence_char.unwrap();
            let run = trimmed.chars().take_while(|&x| x == c).count();
            if run >= 3 {
                match open {
                    None => open = Some((c, run, offset)),
                    Some((oc, olen, start)) if oc == c && run >= olen => {
                        regions.push(Span::new(start, offset + line.len()));
                        open = None;
                    }
                    Some(_) => {}
                }
            }
        }
        offset += line.len();
    }

    if let Some((_, _, start)) = open {
        regions.push(Span::new(start, src.len()));
    }
    regions
}

fn in_regions(regions: &[Span], pos: usize) -> bool {
    regions.iter().any(|r| pos >= r.start && pos < r.end)
}

/// Splits a body into user spans and assistant blocks.
///
/// The opening fence is a line starting with `:::` followed by optional
/// whitespace and a name; the closing fence is a line that is exactly `:::`.
/// A bare `:::` line outside any block is left as user text. Fences inside
/// code blocks are not fences.
pub fn parse_body(src: &str) -> Result<Vec<BodyNode>> {
    let fences = fenced_regions(src);
    let mut nodes = Vec::new();

    let mut user_start = 0;
    let mut block: Option<(String, usize, usize)> = None; // (name, block_start, content_start)
    let mut offset = 0;

    for line in src.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed.starts_with(":::") && !in_regions(&fences, offset) {
            let rest = trimmed[3..].trim();
            match &block {
                None => {
                    if !rest.is_empty() && is_speaker_name(rest) {
                        // Opening fence: everything before it is user text.
                        if offset > user_start {
                            nodes.push(BodyNode::User(Span::new(user_start, offset)));
                        }
                        block = Some((rest.to_string(), offset, offset + line.len()));
                    }
                    // Bare `:::` or malformed name outside a block: user text.
                }
                Some((name, block_start, content_start)) => {
                    if rest.is_empty() {
                        nodes.push(BodyNode::Block(BlockNode {
                            name: name.clone(),
                            content: Span::new(*content_start, offset),
                            span: Span::new(*block_start, offset + line.len()),
                        }));
                        block = None;
                        user_start = offset + line.len();
                    } else {
                        bail!(
                            "Found '::: {}' inside the open block for '{}'. \
                             Close the current block with ':::' first.",
                            rest,
                            name
                        );
                    }
                }
            }
        }
        offset += line.len();
    }

    if let Some((name, _, _)) = block {
        bail!(
            "The block for '{}' is never closed. Add a ':::' line to end it.",
            name
        );
    }
    if src.len() > user_start {
        nodes.push(BodyNode::User(Span::new(user_start, src.len())));
    }
    Ok(nodes)
}

/// Whether `s` is a valid directive (or macro) name:
/// `[A-Za-z_][A-Za-z0-9_-]*`.
pub fn is_directive_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Whether `s` is a plausible interlocutor name for a block fence.
///
/// Speaker names are looser than directive names: spaces are allowed so
/// that `::: Socratic Tutor` opens a block for "Socratic Tutor".
pub fn is_speaker_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ')
}

/// Scans a flat text region for links and inline directives.
///
/// Returns nodes in order, with `Text` spans covering every gap, so
/// concatenating the raw slices of all nodes reproduces the input.
pub fn scan_inline(src: &str) -> Vec<InlineNode> {
    let fences = fenced_regions(src);
    let bytes = src.as_bytes();
    let mut nodes = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if in_regions(&fences, i) {
            i += 1;
            continue;
        }
        match bytes[i] {
            b':' => {
                if let Some(d) = try_directive(src, i) {
                    if i > text_start {
                        nodes.push(InlineNode::Text(Span::new(text_start, i)));
                    }
                    i = d.span.end;
                    text_start = i;
                    nodes.push(InlineNode::Directive(d));
                    continue;
                }
                i += 1;
            }
            b'[' => {
                if let Some(l) = try_link(src, i) {
                    if i > text_start {
                        nodes.push(InlineNode::Text(Span::new(text_start, i)));
                    }
                    i = l.span.end;
                    text_start = i;
                    nodes.push(InlineNode::Link(l));
                    continue;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    if src.len() > text_start {
        nodes.push(InlineNode::Text(Span::new(text_start, src.len())));
    }
    nodes
}

/// Finds the matching close bracket for the open bracket at `open`,
/// tracking nesting depth.
fn matching_bracket(bytes: &[u8], open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        if bytes[i] == open_ch {
            depth += 1;
        } else if bytes[i] == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Tries to parse `:name[inner]{k=v}` starting at the colon at `at`.
fn try_directive(src: &str, at: usize) -> Option<DirectiveNode> {
    let bytes = src.as_bytes();
    // `::` opens a fence, not a directive.
    if at + 1 >= bytes.len() || bytes[at + 1] == b':' {
        return None;
    }
    let name_start = at + 1;
    let mut i = name_start;
    if !(bytes[i].is_ascii_alphabetic() || bytes[i] == b'_') {
        return None;
    }
    i += 1;
    while i < bytes.len()
        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'-')
    {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'[' {
        return None;
    }
    let name = src[name_start..i].to_string();
    let close = matching_bracket(bytes, i, b'[', b']')?;
    let inner = Span::new(i + 1, close);

    let mut end = close + 1;
    let mut attrs = Vec::new();
    if end < bytes.len() && bytes[end] == b'{' {
        if let Some(attr_close) = matching_bracket(bytes, end, b'{', b'}') {
            attrs = parse_attrs(&src[end + 1..attr_close]);
            end = attr_close + 1;
        }
    }

    Some(DirectiveNode {
        name,
        inner,
        attrs,
        span: Span::new(at, end),
    })
}

/// Parses `k=v k2="quoted v"` attribute text.
fn parse_attrs(src: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = src.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];
        let value;
        if let Some(stripped) = rest.strip_prefix('"') {
            let Some(q) = stripped.find('"') else { break };
            value = stripped[..q].to_string();
            rest = stripped[q + 1..].trim_start();
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            value = rest[..end].to_string();
            rest = rest[end..].trim_start();
        }
        if !key.is_empty() {
            attrs.push((key, value));
        }
    }
    attrs
}

/// Tries to parse a Markdown link `[text](uri "title")` starting at `at`.
fn try_link(src: &str, at: usize) -> Option<LinkNode> {
    let bytes = src.as_bytes();
    let close = matching_bracket(bytes, at, b'[', b']')?;
    if close + 1 >= bytes.len() || bytes[close + 1] != b'(' {
        return None;
    }
    let paren_close = matching_bracket(bytes, close + 1, b'(', b')')?;
    let target = src[close + 2..paren_close].trim();

    let (uri, title) = match target.split_once(" \"") {
        Some((u, t)) => (
            u.trim().to_string(),
            Some(t.trim_end_matches('"').to_string()),
        ),
        None => (target.to_string(), None),
    };
    if uri.contains(char::is_whitespace) || uri.is_empty() {
        return None;
    }

    Some(LinkNode {
        text: Span::new(at + 1, close),
        uri,
        title,
        span: Span::new(at, paren_close + 1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(nodes: &[BodyNode]) -> Vec<&str> {
        nodes
            .iter()
            .filter_map(|n| match n {
                BodyNode::Block(b) => Some(b.name.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn splits_user_and_blocks() {
        let src = "Hello\n\n::: Bot\n\nHi there\n\n:::\n\nAnd you?\n";
        let nodes = parse_body(src).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(names(&nodes), vec!["Bot"]);
        match &nodes[0] {
            BodyNode::User(s) => assert_eq!(s.slice(src), "Hello\n\n"),
            _ => panic!("expected user span"),
        }
        match &nodes[1] {
            BodyNode::Block(b) => assert_eq!(b.content.slice(src).trim(), "Hi there"),
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn fenced_code_hides_block_fences() {
        let src = "```\n::: NotABlock\n:::\n```\nreal text\n";
        let nodes = parse_body(src).unwrap();
        assert!(names(&nodes).is_empty());
    }

    #[test]
    fn fence_inside_block_content_does_not_close() {
        let src = "::: Bot\n\n```\n:::\n```\n\n:::\n";
        let nodes = parse_body(src).unwrap();
        assert_eq!(names(&nodes), vec!["Bot"]);
        match &nodes[0] {
            BodyNode::Block(b) => assert!(b.content.slice(src).contains("```")),
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn unclosed_block_is_an_error() {
        assert!(parse_body("::: Bot\nno close\n").is_err());
    }

    #[test]
    fn bare_fence_outside_block_is_text() {
        let src = ":::\nhello\n";
        let nodes = parse_body(src).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(matches!(nodes[0], BodyNode::User(_)));
    }

    #[test]
    fn raw_slices_reconstruct_input() {
        let src = "a [link](http://x.y) and :cmd[echo hi] text";
        let rebuilt: String = scan_inline(src)
            .iter()
            .map(|n| n.span().slice(src))
            .collect();
        assert_eq!(rebuilt, src);
    }

    #[test]
    fn directive_inner_is_raw() {
        let src = ":merge_yaml[{interlocutor: {name: \"A[B]\"}}]";
        let nodes = scan_inline(src);
        let d = match &nodes[0] {
            InlineNode::Directive(d) => d,
            _ => panic!("expected directive"),
        };
        assert_eq!(d.name, "merge_yaml");
        assert_eq!(d.inner.slice(src), "{interlocutor: {name: \"A[B]\"}}");
    }

    #[test]
    fn directive_attrs_parse() {
        let src = ":attach[notes]{mimetype=text/plain title=\"my notes\"}";
        let nodes = scan_inline(src);
        let d = match &nodes[0] {
            InlineNode::Directive(d) => d,
            _ => panic!("expected directive"),
        };
        assert_eq!(d.attrs.len(), 2);
        assert_eq!(d.attrs[1], ("title".into(), "my notes".into()));
    }

    #[test]
    fn double_colon_is_not_a_directive() {
        let src = "look at ::this[thing]";
        let nodes = scan_inline(src);
        assert!(nodes
            .iter()
            .all(|n| matches!(n, InlineNode::Text(_))));
    }

    #[test]
    fn link_with_title() {
        let src = "see [the docs](https://example.com/d.pdf \"API docs\")";
        let nodes = scan_inline(src);
        let l = nodes
            .iter()
            .find_map(|n| match n {
                InlineNode::Link(l) => Some(l),
                _ => None,
            })
            .unwrap();
        assert_eq!(l.uri, "https://example.com/d.pdf");
        assert_eq!(l.title.as_deref(), Some("API docs"));
        assert_eq!(l.text.slice(src), "the docs");
    }

    #[test]
    fn code_fence_hides_directives() {
        let src = "```\n:cmd[rm -rf /]\n```\n";
        let nodes = scan_inline(src);
        assert!(nodes
            .iter()
            .all(|n| matches!(n, InlineNode::Text(_))));
    }

    #[test]
    fn directive_without_bracket_is_text() {
        let src = "a ratio of 3:4 in the image";
        let nodes = scan_inline(src);
        assert!(nodes.iter().all(|n| matches!(n, InlineNode::Text(_))));
    }
}
