//! Percent-encoding per RFC 3986 fragment type.
//!
//! Path segments and query values reserve different character sets, so each
//! fragment type carries its own [`AsciiSet`]. Literals and expanded values
//! are encoded with the set matching where they will land in the URI.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Where a template fragment lands in the request URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentType {
    /// Part of the URI path. `pchar` plus `/` stay unencoded.
    PathSegment,
    /// Part of the query string. Delimiters (`&`, `=`, `+`, `;`) are encoded.
    Query,
}

/// Characters escaped inside a path segment: everything outside unreserved,
/// sub-delims, `:`, `@` and `/`.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b':')
    .remove(b'@')
    .remove(b'/');

/// Characters escaped in a query name or value. The query delimiters `&`,
/// `=`, `+` and the collection delimiter `;` must always be escaped here.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'!')
    .remove(b'$')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b':')
    .remove(b'@')
    .remove(b'/')
    .remove(b'?');

/// Percent-encode `value` for the given fragment type. Valid `%XX` triplets
/// already present are passed through, so re-encoding a resolved chunk is a
/// no-op.
#[must_use]
pub fn encode(value: &str, fragment: FragmentType) -> String {
    let set = match fragment {
        FragmentType::PathSegment => PATH_SEGMENT,
        FragmentType::Query => QUERY,
    };

    let bytes = value.as_bytes();
    let mut encoded = String::with_capacity(value.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%'
            && idx + 2 < bytes.len()
            && bytes[idx + 1].is_ascii_hexdigit()
            && bytes[idx + 2].is_ascii_hexdigit()
        {
            encoded.push_str(&value[idx..idx + 3]);
            idx += 3;
            continue;
        }
        let char_end = idx
            + value[idx..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
        encoded.push_str(&utf8_percent_encode(&value[idx..char_end], set).to_string());
        idx = char_end;
    }
    encoded
}

/// Percent-decode `value`, replacing invalid sequences lossily.
#[must_use]
pub fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// True if the string starts with an URI scheme (`http://`, `https://`, ...).
#[must_use]
pub fn is_absolute(uri: &str) -> bool {
    let Some(colon) = uri.find("://") else {
        return false;
    };
    !uri[..colon].is_empty()
        && uri[..colon]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segment_keeps_reserved_subset() {
        assert_eq!(encode("a b", FragmentType::PathSegment), "a%20b");
        assert_eq!(encode("a/b", FragmentType::PathSegment), "a/b");
        assert_eq!(encode("a:b@c", FragmentType::PathSegment), "a:b@c");
        assert_eq!(encode("a=b;c", FragmentType::PathSegment), "a=b;c");
    }

    #[test]
    fn query_escapes_delimiters() {
        assert_eq!(encode("a&b", FragmentType::Query), "a%26b");
        assert_eq!(encode("a=b", FragmentType::Query), "a%3Db");
        assert_eq!(encode("a+b", FragmentType::Query), "a%2Bb");
        assert_eq!(encode("a;b", FragmentType::Query), "a%3Bb");
        assert_eq!(encode("a/b?c", FragmentType::Query), "a/b?c");
    }

    #[test]
    fn decode_round_trips() {
        let original = "weird value/&=;?";
        let encoded = encode(original, FragmentType::Query);
        assert_eq!(decode(&encoded), original);
    }

    #[test]
    fn existing_triplets_pass_through() {
        assert_eq!(encode("a%26b", FragmentType::Query), "a%26b");
        assert_eq!(encode("100%", FragmentType::Query), "100%25");
        assert_eq!(encode("%7Bx%7D", FragmentType::PathSegment), "%7Bx%7D");
    }

    #[test]
    fn absolute_detection() {
        assert!(is_absolute("https://api.github.com"));
        assert!(is_absolute("http://localhost:8080/base"));
        assert!(!is_absolute("/repos/{owner}"));
        assert!(!is_absolute("repos"));
        assert!(!is_absolute("://nope"));
    }
}
