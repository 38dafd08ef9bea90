//! Citation embedding and link formatting
//!
//! Generated text may reference search results with `[citation:N]`
//! placeholders (0-based). Each placeholder is replaced by a markdown link to
//! the N-th source. Unknown indices are left untouched and reported.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::proxy::route::ProviderId;

/// Placeholder emitted by the model for the N-th search result
static CITATION_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[citation:(\d+)\]").expect("valid placeholder pattern"));

/// Bare https URL, stopping at whitespace, quotes, brackets and JSON escapes
static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https://[^\s"'<>()\[\]{}\\]+"#).expect("valid url pattern"));

/// Punctuation that ends a sentence rather than a URL
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?'];

/// One search result usable as a citation target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSource {
    pub title: String,
    pub url: String,
}

impl SearchSource {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }

    /// Markdown link for this source
    pub fn markdown(&self) -> String {
        let title = self.title.trim();
        if title.is_empty() {
            return format!("[{}]({})", self.url, self.url);
        }
        let title = title.replace('[', "\\[").replace(']', "\\]");
        format!("[{}]({})", title, self.url)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let url = value
            .get("url")
            .or_else(|| value.get("link"))
            .or_else(|| value.get("uri"))
            .and_then(Value::as_str)?;
        let title = value.get("title").and_then(Value::as_str).unwrap_or_default();
        Some(Self::new(title, url))
    }
}

/// Result of placeholder substitution over one piece of text
#[derive(Debug, PartialEq, Eq)]
pub struct Substitution<'a> {
    pub text: Cow<'a, str>,
    pub replaced: usize,
    /// Indices that had no matching source, one entry per occurrence
    pub missing: Vec<usize>,
}

/// Replace every `[citation:N]` that has a source at index N
///
/// Out-of-range placeholders stay verbatim and log one warning each.
pub fn substitute_placeholders<'a>(text: &'a str, sources: &[SearchSource]) -> Substitution<'a> {
    substitute_with(text, sources, SearchSource::markdown)
}

/// Like [`substitute_placeholders`] for text that is still JSON-encoded
///
/// Event-stream chunks carry generated text inside JSON strings, so each
/// link is escaped as a JSON string fragment before it is spliced in.
pub fn substitute_encoded_placeholders<'a>(
    text: &'a str,
    sources: &[SearchSource],
) -> Substitution<'a> {
    substitute_with(text, sources, |source| json_fragment(&source.markdown()))
}

/// Contents of `text` encoded as a JSON string, without the quotes
fn json_fragment(text: &str) -> String {
    match serde_json::to_string(text) {
        Ok(encoded) => encoded[1..encoded.len() - 1].to_string(),
        Err(_) => text.to_string(),
    }
}

fn substitute_with<'a>(
    text: &'a str,
    sources: &[SearchSource],
    render: impl Fn(&SearchSource) -> String,
) -> Substitution<'a> {
    let mut replaced = 0;
    let mut missing = Vec::new();

    let rewritten = CITATION_PLACEHOLDER.replace_all(text, |caps: &Captures| {
        let index = caps[1].parse::<usize>().unwrap_or(usize::MAX);
        match sources.get(index) {
            Some(source) => {
                replaced += 1;
                render(source)
            }
            None => {
                warn!(
                    index = index,
                    available = sources.len(),
                    "Citation placeholder has no matching search result"
                );
                missing.push(index);
                caps[0].to_string()
            }
        }
    });

    Substitution {
        text: if replaced == 0 {
            Cow::Borrowed(text)
        } else {
            rewritten
        },
        replaced,
        missing,
    }
}

/// Wrap complete bare `https://` URLs in markdown links
///
/// A URL that runs to the very end of `text` may continue in the next chunk
/// and is left alone, as is a URL already used as a markdown link target.
pub fn link_bare_urls(text: &str) -> Cow<'_, str> {
    let mut out: Option<String> = None;
    let mut last = 0;

    for m in BARE_URL.find_iter(text) {
        if m.end() == text.len() {
            continue;
        }
        let preceded_by_bracket = text[..m.start()]
            .chars()
            .next_back()
            .map(|c| c == '(' || c == '[')
            .unwrap_or(false);
        if preceded_by_bracket {
            continue;
        }

        let url = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if url.len() <= "https://".len() {
            continue;
        }

        let buf = out.get_or_insert_with(|| String::with_capacity(text.len() + 64));
        buf.push_str(&text[last..m.start()]);
        buf.push('[');
        buf.push_str(url);
        buf.push_str("](");
        buf.push_str(url);
        buf.push(')');
        last = m.start() + url.len();
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&text[last..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(text),
    }
}

/// Search results the caller attached to the request body
pub fn sources_from_request(body: &Value) -> Vec<SearchSource> {
    body.get("search_results")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(SearchSource::from_value).collect())
        .unwrap_or_default()
}

/// Machine-readable search results carried by an upstream response
pub fn sources_from_response(provider: ProviderId, body: &Value) -> Vec<SearchSource> {
    match provider {
        ProviderId::Gemini => body
            .pointer("/candidates/0/groundingMetadata/groundingChunks")
            .and_then(Value::as_array)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|c| c.get("web"))
                    .filter_map(SearchSource::from_value)
                    .collect()
            })
            .unwrap_or_default(),
        ProviderId::OpenAi => body
            .pointer("/choices/0/message/annotations")
            .and_then(Value::as_array)
            .map(|annotations| {
                annotations
                    .iter()
                    .filter_map(|a| a.get("url_citation"))
                    .filter_map(SearchSource::from_value)
                    .collect()
            })
            .unwrap_or_default(),
        ProviderId::Search => Vec::new(),
    }
}

/// Apply placeholder substitution to every generated text field
///
/// Returns the number of placeholders replaced.
pub fn embed_citations(provider: ProviderId, body: &mut Value, sources: &[SearchSource]) -> usize {
    let mut replaced = 0;
    let mut rewrite = |slot: &mut Value| {
        if let Some(text) = slot.as_str() {
            let sub = substitute_placeholders(text, sources);
            if sub.replaced > 0 {
                replaced += sub.replaced;
                *slot = Value::String(sub.text.into_owned());
            }
        }
    };

    match provider {
        ProviderId::OpenAi => {
            if let Some(choices) = body.get_mut("choices").and_then(Value::as_array_mut) {
                for choice in choices {
                    if let Some(content) = choice.pointer_mut("/message/content") {
                        rewrite(content);
                    }
                }
            }
        }
        ProviderId::Gemini => {
            if let Some(candidates) = body.get_mut("candidates").and_then(Value::as_array_mut) {
                for candidate in candidates {
                    if let Some(parts) = candidate
                        .pointer_mut("/content/parts")
                        .and_then(Value::as_array_mut)
                    {
                        for part in parts {
                            if let Some(text) = part.get_mut("text") {
                                rewrite(text);
                            }
                        }
                    }
                }
            }
        }
        ProviderId::Search => {}
    }

    replaced
}
