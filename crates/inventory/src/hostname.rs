//! Hostname pattern expansion.
//!
//! Patterns know two placeholders: `{id}` (the component's xname, verbatim)
//! and `{0*Nd}` (the NID as a zero-padded decimal of width N). Example
//! patterns:
//!   - `nid{04d}` with NID=1 => `nid0001`
//!   - `dev-s{02d}` with NID=5 => `dev-s05`
//!   - `{id}` with xname `x3000c0s0b1` => `x3000c0s0b1`

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn width_pattern() -> &'static Regex {
    static WIDTH: OnceLock<Regex> = OnceLock::new();
    WIDTH.get_or_init(|| Regex::new(r"\{0*(\d+)d\}").expect("width placeholder regex"))
}

/// Diagnose a pattern without failing it.
///
/// Expansion deliberately passes unknown text through, so typos like
/// `{4}` or an unclosed brace silently survive into hostnames. This
/// returns warnings for config-time logging instead.
pub fn pattern_warnings(pattern: &str) -> Vec<String> {
    let mut warns = Vec::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            warns.push(format!("pattern '{pattern}' has an unclosed '{{'"));
            break;
        };
        let inner = &after[..close];
        let known = inner == "id"
            || width_pattern().is_match(&format!("{{{inner}}}"));
        if !known {
            warns.push(format!(
                "pattern '{pattern}' placeholder '{{{inner}}}' is not recognized"
            ));
        }
        rest = &after[close + 1..];
    }
    warns
}

/// Expand a hostname pattern against a NID and component ID.
///
/// Width never truncates: a NID needing more digits gets them all, and a
/// negative NID's sign counts toward the width. Patterns without
/// placeholders pass through unchanged.
pub fn expand(pattern: &str, nid: i64, id: &str) -> String {
    let out = pattern.replace("{id}", id);
    width_pattern()
        .replace_all(&out, |caps: &Captures<'_>| {
            let width: usize = caps[1].parse().unwrap_or(0);
            format!("{nid:0width$}")
        })
        .into_owned()
}
