//! Mentions extracted from post text

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[@%&][A-Za-z0-9+/]{43}=\.(?:sha256|ed25519)").expect("valid regex")
});

static NAMED_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\]]+)\]\(([@%&][A-Za-z0-9+/]{43}=\.(?:sha256|ed25519))\)")
        .expect("valid regex")
});

static HASHTAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)#([\w-]+)").expect("valid regex"));

/// Mention objects for every feed, message, blob and hashtag in `text`
///
/// Each link appears once, in order of first appearance. Markdown link
/// text (`[alice](@...)`) becomes the mention's `name`; a leading `@` in
/// that name is dropped.
pub fn extract_mentions(text: &str) -> Vec<Value> {
    let names: HashMap<&str, &str> = NAMED_REFERENCE
        .captures_iter(text)
        .filter_map(|caps| Some((caps.get(2)?.as_str(), caps.get(1)?.as_str())))
        .collect();

    let mut found: Vec<(usize, Value)> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    for link in REFERENCE.find_iter(text) {
        let raw = link.as_str();
        if seen.iter().any(|s| s == raw) {
            continue;
        }
        seen.push(raw.to_string());

        let mention = match names.get(raw) {
            Some(name) if !raw.starts_with('%') => {
                json!({ "link": raw, "name": name.trim_start_matches('@') })
            }
            _ => json!({ "link": raw }),
        };
        found.push((link.start(), mention));
    }

    for caps in HASHTAG.captures_iter(text) {
        let Some(tag) = caps.get(1) else { continue };
        let link = format!("#{}", tag.as_str());
        if seen.contains(&link) {
            continue;
        }
        seen.push(link.clone());
        found.push((tag.start(), json!({ "link": link })));
    }

    found.sort_by_key(|(position, _)| *position);
    found.into_iter().map(|(_, mention)| mention).collect()
}
