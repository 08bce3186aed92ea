//! ✨ Pattern matching — deciding which keys in a bucket we actually care about.
//!
//! A pattern is either a literal key (`logs/app.txt`) or a glob (`logs/**/*.gz`).
//! Globs match the full key path with doublestar semantics: `*` stays inside one
//! segment, `**` crosses segments, `?` is one character, `[a-z]` is a class,
//! `[^a]`/`[!a]` is a negated class, `{log,gz}` is an alternation and `\*` is a
//! literal star. Literals compare basenames, so `app.txt` finds `any/dir/app.txt`.
//!
//! 🧠 Knowledge graph:
//! - `dir_prefix()` narrows the listing request: everything before the first
//!   wildcard segment is sent to S3 as the prefix, the rest is matched locally.
//! - `glob::Pattern` only speaks `*`, `?`, `**` and `[!..]`, so alternations are
//!   expanded into one pattern each and escapes are rewritten as one-char classes first.
//! - A malformed glob never raises. It simply matches nothing.

use glob::{MatchOptions, Pattern};

const SEPARATOR: char = '/';

// 🎯 `*` must not eat a `/`, otherwise `*.log` would swallow `deep/dir/x.log`
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// 🔍 True iff the string contains any glob special character: `*`, `?`, `[` or `\`.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '\\'])
}

/// 📂 The literal directory prefix of a pattern, used to narrow the listing.
///
/// - `dir1/dir2/*.txt` → `dir1/dir2`
/// - `dir/sub/*/file.txt` → `dir/sub` (the first wildcard segment wins)
/// - `*.txt` → `` (nothing literal to narrow with)
/// - `file.txt` → `file.txt` (no wildcard: the whole thing is the prefix)
pub fn dir_prefix(pattern: &str) -> String {
    let segments: Vec<&str> = pattern.split(SEPARATOR).collect();

    match segments
        .iter()
        .position(|segment| segment.contains(['*', '?', '[']))
    {
        Some(first_wildcard) => segments[..first_wildcard].join("/"),
        None => pattern.to_string(),
    }
}

/// 🎯 Does `key` satisfy `pattern`?
pub fn matches(pattern: &str, key: &str) -> bool {
    if is_glob(pattern) {
        // 💀 a broken pattern matches nothing — no drama, no panic
        return expand_braces(pattern).iter().any(|alternative| {
            translate(alternative)
                .and_then(|translated| Pattern::new(&translated).ok())
                .is_some_and(|compiled| compiled.matches_with(key, MATCH_OPTIONS))
        });
    }
    basename(pattern) == basename(key)
}

/// 🔄 `a/{b,c{d,e}}/*` → `a/b/*`, `a/cd/*`, `a/ce/*`. Escapes and classes pass through untouched.
fn expand_braces(pattern: &str) -> Vec<String> {
    let the_chars: Vec<char> = pattern.chars().collect();
    let Some((open, close)) = first_brace_group(&the_chars) else {
        return vec![pattern.to_string()];
    };

    let the_head: String = the_chars[..open].iter().collect();
    let the_tail: String = the_chars[close + 1..].iter().collect();
    split_alternatives(&the_chars[open + 1..close])
        .into_iter()
        .flat_map(|alternative| expand_braces(&format!("{the_head}{alternative}{the_tail}")))
        .collect()
}

/// The outermost `{`..`}` pair that opens first. An unmatched `{` is just a character.
fn first_brace_group(chars: &[char]) -> Option<(usize, usize)> {
    let mut the_open = None;
    let mut the_depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => {
                if let Some(end) = class_end(chars, i) {
                    i = end;
                }
            }
            '{' => {
                if the_depth == 0 {
                    the_open = Some(i);
                }
                the_depth += 1;
            }
            '}' if the_depth > 0 => {
                the_depth -= 1;
                if the_depth == 0 {
                    return the_open.map(|open| (open, i));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split the inside of a brace group on its own commas, not on nested ones.
fn split_alternatives(chars: &[char]) -> Vec<String> {
    let mut the_alternatives = Vec::new();
    let mut the_current = String::new();
    let mut the_depth = 0usize;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                the_current.push(c);
                if let Some(&escaped) = chars.get(i + 1) {
                    the_current.push(escaped);
                    i += 1;
                }
            }
            '[' => match class_end(chars, i) {
                Some(end) => {
                    the_current.extend(&chars[i..=end]);
                    i = end;
                }
                None => the_current.push(c),
            },
            '{' => {
                the_depth += 1;
                the_current.push(c);
            }
            '}' => {
                the_depth = the_depth.saturating_sub(1);
                the_current.push(c);
            }
            ',' if the_depth == 0 => the_alternatives.push(std::mem::take(&mut the_current)),
            _ => the_current.push(c),
        }
        i += 1;
    }
    the_alternatives.push(the_current);
    the_alternatives
}

/// Index of the `]` closing the class opened at `start`. A `]` right after `[`, `[!` or
/// `[^` belongs to the class.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if matches!(chars.get(i), Some('!') | Some('^')) {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            ']' => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// 🔧 Rewrite into `glob::Pattern` dialect: `\x` → literal `x`, `[^..]` → `[!..]`.
/// A trailing lone `\` is a broken pattern.
fn translate(pattern: &str) -> Option<String> {
    let the_chars: Vec<char> = pattern.chars().collect();
    let mut the_out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < the_chars.len() {
        match the_chars[i] {
            '\\' => {
                let the_escaped = *the_chars.get(i + 1)?;
                push_literal(&mut the_out, the_escaped);
                i += 1;
            }
            '[' => match class_end(&the_chars, i) {
                Some(end) => {
                    the_out.push('[');
                    let mut j = i + 1;
                    if matches!(the_chars[j], '!' | '^') {
                        the_out.push('!');
                        j += 1;
                    }
                    while j < end {
                        if the_chars[j] == '\\' && j + 1 < end {
                            j += 1;
                        }
                        the_out.push(the_chars[j]);
                        j += 1;
                    }
                    the_out.push(']');
                    i = end;
                }
                // -- 💀 unterminated class, let the glob parser refuse it
                None => the_out.push('['),
            },
            c => the_out.push(c),
        }
        i += 1;
    }
    Some(the_out)
}

fn push_literal(out: &mut String, c: char) {
    if matches!(c, '*' | '?' | '[' | ']') {
        out.push('[');
        out.push(c);
        out.push(']');
    } else {
        out.push(c);
    }
}

/// The last path segment. Trailing separators are ignored.
fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() {
        // -- 🐛 "/" or "" — there's no name here, only vibes
        return if path.is_empty() { "" } else { "/" };
    }
    trimmed.rsplit(SEPARATOR).next().unwrap_or(trimmed)
}
