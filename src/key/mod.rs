//! Key and glob addressing.
//!
//! A path is a `/`-separated list of non-empty segments made of
//! `[A-Za-z0-9_-]`. A trailing `*` segment turns it into a glob that denotes
//! the collection of keys one segment below its prefix.


use crate::Clock;
use crate::Result;
use crate::StorageError;

pub const GLOB: &str = "*";
pub const SEPARATOR: char = '/';

pub fn validate(path: &str) -> Result<()> {
    if is_valid(path) {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(path.to_string()).into())
    }
}

pub fn is_valid(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let segments: Vec<&str> = path.split(SEPARATOR).collect();
    let last = segments.len() - 1;
    segments.iter().enumerate().all(|(i, segment)| {
        if *segment == GLOB {
            return i == last;
        }
        !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    })
}

/// True iff the last segment is literally `*`.
pub fn is_glob(path: &str) -> bool {
    path.rsplit(SEPARATOR).next() == Some(GLOB)
}

/// Literal prefix of a glob: `a/b/*` gives `a/b/`, `*` gives the empty string.
pub fn glob_prefix(pattern: &str) -> &str {
    pattern.strip_suffix(GLOB).unwrap_or(pattern)
}

/// Non-glob patterns match by equality. A glob matches every key sharing its
/// prefix with exactly one more segment.
pub fn matches(
    pattern: &str,
    key: &str,
) -> bool {
    if !is_glob(pattern) {
        return pattern == key;
    }
    match key.strip_prefix(glob_prefix(pattern)) {
        Some(rest) => !rest.is_empty() && !rest.contains(SEPARATOR) && rest != GLOB,
        None => false,
    }
}

/// Builds a concrete key under `pattern` from a fresh clock value.
///
/// Returns the key and the timestamp used, so callers can reuse it as the
/// object's creation time.
pub fn build(
    pattern: &str,
    clock: &Clock,
) -> (String, u64) {
    let ts = clock.now();
    (format!("{}{}", glob_prefix(pattern), Clock::format(ts)), ts)
}

pub fn last_index(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}

/// The glob whose listing contains `path`, `None` when `path` is itself a glob.
pub fn parent_glob(path: &str) -> Option<String> {
    if is_glob(path) {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(pos) => Some(format!("{}{}", &path[..=pos], GLOB)),
        None => Some(GLOB.to_string()),
    }
}
