//! URL helpers for rule matching
//!
//! These work directly on string slices; no URL parsing library is involved,
//! since navigation URLs are matched as plain text.

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    // Find ':'
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    // Check for "://"
    if bytes.len() > colon_pos + 2 && bytes[colon_pos + 1] == b'/' && bytes[colon_pos + 2] == b'/' {
        return Some(colon_pos + 3);
    }

    // Data URLs use ":" not "://"
    if colon_pos >= 4 && bytes[..colon_pos].eq_ignore_ascii_case(b"data") {
        return Some(colon_pos + 1);
    }

    None
}

/// Split a URL into lowercased alphanumeric tokens, skipping the scheme.
pub fn tokenize_words(url: &str) -> impl Iterator<Item = String> + '_ {
    let start = get_scheme_end(url).unwrap_or(0);
    url[start..]
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

/// Check whether `word` appears in `url` as a whole token.
///
/// Matching is case-insensitive. A word that is not a single alphanumeric
/// token (e.g. `"foo-bar"`) can never equal a token, so it falls back to
/// case-insensitive substring containment.
pub fn contains_word(url: &str, word: &str) -> bool {
    let needle = word.to_lowercase();
    if needle.bytes().all(|b| b.is_ascii_alphanumeric()) {
        tokenize_words(url).any(|token| token == needle)
    } else {
        url.to_lowercase().contains(&needle)
    }
}

/// Check whether `url` is exactly `page`, ignoring any query or fragment.
///
/// Both must be absolute; a path alone never matches a navigated URL.
pub fn is_same_page(url: &str, page: &str) -> bool {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    !page.is_empty() && url[..end] == *page
}
