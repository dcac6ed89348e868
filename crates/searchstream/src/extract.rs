//! Main-content extraction from raw HTML
//!
//! A single forward scan over the markup. Boilerplate subtrees (scripts,
//! navigation, tables, forms, ...) are dropped, link targets and images
//! vanish because only text nodes are kept, and when the page marks its
//! main content with `<article>` or `<main>` only that region is returned.

use std::iter::Peekable;
use std::str::Chars;

/// Subtrees whose text never reaches the output
const SKIP_TAGS: &[&str] = &[
    "noscript", "iframe", "svg", "template", "head", "title", "table", "nav", "aside", "form",
    "header", "footer", "figure", "button", "select",
];

/// Elements whose body is raw text up to the matching end tag
const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

/// Elements marking the main content region
const MAIN_TAGS: &[&str] = &["article", "main"];

/// Elements that end a line of text
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "ul", "ol", "section",
    "article", "main", "blockquote", "pre", "dd", "dt",
];

/// Turns raw page markup into readable text
pub trait ContentExtractor: Send + Sync {
    /// Best-effort main content, or `None` when nothing readable is found
    fn extract(&self, html: &str) -> Option<String>;
}

/// Default extractor backed by [`extract_main_text`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadableTextExtractor;

impl ReadableTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ContentExtractor for ReadableTextExtractor {
    fn extract(&self, html: &str) -> Option<String> {
        extract_main_text(html)
    }
}

/// Extract readable main text from HTML
///
/// Returns `None` if the page has no text outside the discarded elements.
pub fn extract_main_text(html: &str) -> Option<String> {
    let mut all = String::new();
    let mut main = String::new();
    let mut skip_stack: Vec<String> = Vec::new();
    let mut main_depth: usize = 0;
    // Set right after <body>; a <form> opened first wraps the whole page
    let mut body_start = false;

    let mut chars = html.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '<' && starts_markup(chars.peek().copied()) {
            let Some(tag) = read_tag(&mut chars) else {
                continue;
            };

            let tag_lower = tag.to_lowercase();
            let is_closing = tag_lower.starts_with('/');
            let tag_name = tag_name(&tag_lower);
            let self_closing = tag.ends_with('/');

            if RAW_TEXT_TAGS.contains(&tag_name) {
                if !is_closing && !self_closing {
                    skip_raw_text(&mut chars, tag_name);
                }
                continue;
            }

            // An unclosed <head> must not swallow the document
            if tag_name == "body" && !is_closing {
                skip_stack.clear();
                body_start = true;
                continue;
            }

            let wraps_body = body_start && tag_name == "form";
            if !is_closing {
                body_start = false;
            }

            if SKIP_TAGS.contains(&tag_name) && !wraps_body {
                if is_closing {
                    if let Some(pos) = skip_stack.iter().rposition(|t| t == tag_name) {
                        skip_stack.truncate(pos);
                    }
                } else if !self_closing {
                    skip_stack.push(tag_name.to_string());
                }
                continue;
            }

            if !skip_stack.is_empty() {
                continue;
            }

            if MAIN_TAGS.contains(&tag_name) && !self_closing {
                if is_closing {
                    main_depth = main_depth.saturating_sub(1);
                } else {
                    main_depth += 1;
                }
            }

            if is_heading_or_paragraph(tag_name) || tag_name == "br" {
                push_both(&mut all, &mut main, main_depth > 0, '\n');
            } else if BLOCK_TAGS.contains(&tag_name) {
                line_break(&mut all, &mut main, main_depth > 0);
            }
        } else if skip_stack.is_empty() {
            if !c.is_whitespace() {
                body_start = false;
            }
            let decoded = if c == '&' {
                decode_entity(&mut chars)
            } else {
                c
            };
            all.push(decoded);
            if main_depth > 0 {
                main.push(decoded);
            }
        }
    }

    let main = clean_whitespace(&main);
    let text = if main.is_empty() {
        clean_whitespace(&all)
    } else {
        main
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn push_both(all: &mut String, main: &mut String, into_main: bool, c: char) {
    all.push(c);
    if into_main {
        main.push(c);
    }
}

/// End the current line unless it is already ended
fn line_break(all: &mut String, main: &mut String, into_main: bool) {
    if !all.is_empty() && !all.ends_with('\n') {
        all.push('\n');
    }
    if into_main && !main.is_empty() && !main.ends_with('\n') {
        main.push('\n');
    }
}

fn is_heading_or_paragraph(tag_name: &str) -> bool {
    matches!(tag_name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p")
}

/// `<` only opens markup when followed by a name, `/` or `!`
fn starts_markup(next: Option<char>) -> bool {
    matches!(next, Some(n) if n.is_ascii_alphabetic() || n == '/' || n == '!')
}

/// Read a tag body up to `>`; comments and doctypes yield `None`
fn read_tag(chars: &mut Peekable<Chars>) -> Option<String> {
    let mut tag = String::new();
    for next in chars.by_ref() {
        if next == '>' && !(tag.starts_with("!--") && !tag.ends_with("--")) {
            break;
        }
        tag.push(next);
    }

    if tag.starts_with('!') {
        None
    } else {
        Some(tag)
    }
}

/// Consume a raw-text body through its end tag, ignoring any markup inside
fn skip_raw_text(chars: &mut Peekable<Chars>, tag_name: &str) {
    let end_tag = format!("</{}", tag_name);
    let mut window = String::new();

    for next in chars.by_ref() {
        window.push(next.to_ascii_lowercase());
        if window.ends_with(&end_tag) {
            break;
        }
        if window.len() > 64 {
            window.remove(0);
        }
    }

    for next in chars.by_ref() {
        if next == '>' {
            break;
        }
    }
}

fn tag_name(tag_lower: &str) -> &str {
    tag_lower
        .trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("")
}

/// Decode an HTML entity; the leading `&` is already consumed
///
/// Unknown or unterminated entities leave the input untouched and
/// return the literal `&`.
fn decode_entity(chars: &mut Peekable<Chars>) -> char {
    let mut lookahead = chars.clone();
    let mut entity = String::new();
    let mut terminated = false;

    for next in lookahead.by_ref() {
        if next == ';' {
            terminated = true;
            break;
        }
        if next.is_whitespace() || next == '&' || entity.len() > 10 {
            break;
        }
        entity.push(next);
    }

    if !terminated {
        return '&';
    }

    let decoded = match entity.as_str() {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        "mdash" => Some('—'),
        "ndash" => Some('–'),
        "hellip" => Some('…'),
        "copy" => Some('©'),
        "reg" => Some('®'),
        _ => entity.strip_prefix('#').and_then(|num| {
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
        }),
    };

    match decoded {
        Some(ch) => {
            *chars = lookahead;
            ch
        }
        None => '&',
    }
}

/// Collapse whitespace runs, trim lines, keep at most one blank line
pub fn clean_whitespace(s: &str) -> String {
    let mut result = String::new();
    let mut last_was_space = false;
    let mut newline_count = 0;

    for c in s.chars() {
        if c == '\n' {
            if result.ends_with(' ') {
                result.pop();
            }
            newline_count += 1;
            last_was_space = true;
            if newline_count <= 2 {
                result.push(c);
            }
        } else if c.is_whitespace() {
            if !last_was_space {
                result.push(' ');
                last_was_space = true;
            }
        } else {
            newline_count = 0;
            last_was_space = false;
            result.push(c);
        }
    }

    result.trim().to_string()
}
