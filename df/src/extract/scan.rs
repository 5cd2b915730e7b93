//! Fence stripping and balanced-region scanning

use std::sync::LazyLock;

use regex::Regex;

static FENCE_OPEN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?mi)^[ \t]*```[a-z0-9_+-]*[ \t]*$\n?").ok());

static FENCE_CLOSE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?m)[ \t]*```[ \t]*$").ok());

/// Remove fenced-code-block marker lines, keep their content
pub fn strip_fences(text: &str) -> String {
    let mut out = text.to_string();
    for re in [&*FENCE_OPEN, &*FENCE_CLOSE].into_iter().flatten() {
        out = re.replace_all(&out, "").into_owned();
    }
    out.trim().to_string()
}

/// What scanning from one opener found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Byte range of a balanced region, end exclusive
    Balanced(usize, usize),
    /// The region starting here never closed
    Unclosed(usize),
    /// No usable opener
    Missing,
}

fn closer_for(open: u8) -> u8 {
    if open == b'{' { b'}' } else { b']' }
}

enum Walk {
    Closed(usize),
    Unclosed,
    Mismatch,
}

/// Walk from `start` (an opener) until the matching closer
///
/// Tracks both bracket kinds on one stack and ignores brackets inside string literals.
fn walk(bytes: &[u8], start: usize) -> Walk {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(closer_for(b)),
            b'}' | b']' => match stack.pop() {
                Some(expected) if expected == b => {
                    if stack.is_empty() {
                        return Walk::Closed(i + 1);
                    }
                }
                _ => return Walk::Mismatch,
            },
            _ => {}
        }
    }
    Walk::Unclosed
}

/// Find the first balanced region opened by `open` (`{` or `[`)
///
/// Openers whose region is malformed are skipped. An opener whose region runs off the end of
/// the text stops the search: the text is truncated and inner regions would be misleading.
pub fn find_region(text: &str, open: u8) -> Region {
    let bytes = text.as_bytes();
    let mut pos = 0;
    while let Some(offset) = bytes[pos..].iter().position(|&b| b == open) {
        let start = pos + offset;
        match walk(bytes, start) {
            Walk::Closed(end) => return Region::Balanced(start, end),
            Walk::Unclosed => return Region::Unclosed(start),
            Walk::Mismatch => pos = start + 1,
        }
    }
    Region::Missing
}
