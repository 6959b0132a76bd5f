//! Regex source patterns and `$n` target placeholders

use regex::{Regex, RegexBuilder};

/// Rewrite a stored source pattern into the form matched against request URLs.
///
/// `*` and `.*` both mean "anything", and a leading `^` is anchored to the
/// path root so `^blog/(.*)` and `^/blog/(.*)` behave the same.
pub fn translate_pattern(pattern: &str) -> String {
    let mut translated = pattern.trim().replace(".*", "*").replace('*', ".*");
    translated = translated.replace("/^", "^").replace("\\'", "'");

    if let Some(rest) = translated.strip_prefix('^') {
        if !rest.starts_with('/') {
            translated = format!("^/{}", rest);
        }
    }

    translated
}

pub fn compile_source(pattern: &str, ignore_case: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&translate_pattern(pattern))
        .case_insensitive(ignore_case)
        .build()
}

/// All capture groups of the first match, group 0 included.
/// Groups that did not participate are empty strings.
pub fn capture(regex: &Regex, haystack: &str) -> Option<Vec<String>> {
    let caps = regex.captures(haystack)?;
    let groups: Vec<String> = caps
        .iter()
        .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
        .collect();

    if groups.is_empty() {
        return None;
    }
    Some(groups)
}

/// Result of replacing `$n` placeholders in a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub url: String,
    /// Placeholders with no capture behind them, left in the URL as-is
    pub unresolved: Vec<String>,
}

/// Replace `$1`, `$2`, ... with the captured groups.
///
/// Placeholder numbers are read greedily, so `$10` never turns into the first
/// capture followed by `0`.
pub fn substitute(target: &str, captures: &[String]) -> Substitution {
    let mut url = String::with_capacity(target.len());
    let mut unresolved = Vec::new();
    let mut chars = target.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c != '$' {
            url.push(c);
            continue;
        }

        let mut end = start + 1;
        while let Some(&(i, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = i + d.len_utf8();
            chars.next();
        }

        let digits = &target[start + 1..end];
        if digits.is_empty() {
            url.push('$');
            continue;
        }

        match digits.parse::<usize>() {
            Ok(n) if n >= 1 && n < captures.len() => url.push_str(&captures[n]),
            _ => {
                let placeholder = &target[start..end];
                url.push_str(placeholder);
                unresolved.push(placeholder.to_string());
            }
        }
    }

    Substitution { url, unresolved }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_pattern() {
        assert_eq!(translate_pattern("^/blog/(.*)$"), "^/blog/(.*)$");
        assert_eq!(translate_pattern("^blog/(.*)"), "^/blog/(.*)");
        assert_eq!(translate_pattern("/news/*"), "/news/.*");
        assert_eq!(translate_pattern("/^old"), "^/old");
    }

    #[test]
    fn test_capture() {
        let re = compile_source("^/blog/(.*)$", false).unwrap();
        let caps = capture(&re, "/blog/hello-world").unwrap();
        assert_eq!(caps, vec!["/blog/hello-world", "hello-world"]);
        assert!(capture(&re, "/news/hello").is_none());
    }

    #[test]
    fn test_capture_ignore_case() {
        let re = compile_source("^/Blog/(.*)$", true).unwrap();
        assert!(capture(&re, "/blog/x").is_some());

        let re = compile_source("^/Blog/(.*)$", false).unwrap();
        assert!(capture(&re, "/blog/x").is_none());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(compile_source("^/blog/(unclosed", false).is_err());
    }

    #[test]
    fn test_substitute() {
        let caps: Vec<String> = vec!["/a/b".into(), "a".into(), "b".into()];
        let sub = substitute("/x/$2/$1", &caps);
        assert_eq!(sub.url, "/x/b/a");
        assert!(sub.unresolved.is_empty());
    }

    #[test]
    fn test_substitute_two_digit_placeholder() {
        let mut caps: Vec<String> = (0..=10).map(|i| format!("c{}", i)).collect();
        caps[1] = "one".into();
        let sub = substitute("/$10/$1", &caps);
        assert_eq!(sub.url, "/c10/one");
    }

    #[test]
    fn test_substitute_missing_capture_stays_literal() {
        let caps: Vec<String> = vec!["/a".into(), "a".into()];
        let sub = substitute("/x/$1/$3?price=$", &caps);
        assert_eq!(sub.url, "/x/a/$3?price=$");
        assert_eq!(sub.unresolved, vec!["$3".to_string()]);
    }
}
