//! Wildcard key filters.
//!
//! Patterns use the Redis `KEYS`/`SCAN MATCH` subset: `*` matches any run of
//! characters (including none) and `?` matches exactly one. A backslash
//! escapes the next character. Every other character matches itself.

/// Check whether `key` matches the wildcard `pattern`.
///
/// A backslash makes the following character literal, so `\*` matches a
/// single `*`.
///
/// # Examples
///
/// ```
/// use warden_cache::pattern::wildcard_match;
///
/// assert!(wildcard_match("tokens_*", "tokens_abc"));
/// assert!(wildcard_match("tokens_?bc", "tokens_abc"));
/// assert!(!wildcard_match("tokens_*", "sessions_abc"));
/// assert!(!wildcard_match("a\\*", "abc"));
/// ```
pub fn wildcard_match(pattern: &str, key: &str) -> bool {
    let pattern = tokenize(pattern);
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0usize, 0usize);
    // Position of the last `*` seen and the key index it was tried against.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        let step = match pattern.get(p) {
            Some(Token::One) => true,
            Some(Token::Literal(c)) => *c == key[k],
            _ => false,
        };

        if step {
            p += 1;
            k += 1;
        } else if pattern.get(p) == Some(&Token::Any) {
            backtrack = Some((p, k));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            k = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|t| *t == Token::Any)
}

/// Build a pattern that matches every key starting with `prefix`.
///
/// Wildcard characters inside `prefix` are escaped and match literally.
pub fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if GLOB_SPECIAL.contains(&c) {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Characters with a meaning in Redis `MATCH` patterns.
const GLOB_SPECIAL: [char; 5] = ['*', '?', '[', ']', '\\'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => Token::Any,
            '?' => Token::One,
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            other => Token::Literal(other),
        });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(wildcard_match("abc", "abc"));
        assert!(!wildcard_match("abc", "abcd"));
        assert!(!wildcard_match("abcd", "abc"));
    }

    #[test]
    fn test_star_matches_empty_and_runs() {
        assert!(wildcard_match("bl_csrf_tokens_*", "bl_csrf_tokens_"));
        assert!(wildcard_match("bl_csrf_tokens_*", "bl_csrf_tokens_session-1"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_question_mark() {
        assert!(wildcard_match("user:?", "user:1"));
        assert!(!wildcard_match("user:?", "user:12"));
    }

    #[test]
    fn test_backtracking() {
        assert!(wildcard_match("*ab", "aab"));
        assert!(wildcard_match("a*a*a", "aaaaa"));
        assert!(!wildcard_match("a*ab", "aab_"));
    }

    #[test]
    fn test_prefix_pattern() {
        let pattern = prefix_pattern("bl_csrf_tokens_");
        assert!(wildcard_match(&pattern, "bl_csrf_tokens_xyz"));
        assert!(!wildcard_match(&pattern, "other_xyz"));
    }

    #[test]
    fn test_escaped_characters_match_literally() {
        assert!(wildcard_match("a\\*c", "a*c"));
        assert!(!wildcard_match("a\\*c", "abc"));
        assert!(wildcard_match("a\\?", "a?"));
        assert!(!wildcard_match("a\\?", "ab"));
        assert!(wildcard_match("a\\\\b", "a\\b"));
    }

    #[test]
    fn test_prefix_pattern_escapes_wildcards() {
        let pattern = prefix_pattern("tok*_");
        assert_eq!(pattern, "tok\\*_*");
        assert!(wildcard_match(&pattern, "tok*_s1"));
        assert!(!wildcard_match(&pattern, "token_s1"));

        let pattern = prefix_pattern("t?[x]\\");
        assert!(wildcard_match(&pattern, "t?[x]\\s1"));
        assert!(!wildcard_match(&pattern, "ta[x]\\s1"));
        assert!(!wildcard_match(&pattern, "t?x\\s1"));
    }
}
