//! Cookie header splitting and `Set-Cookie` attribute emission.
//!
//! The splitter is an explicit little state machine over the `Cookie:`
//! header value: `;`-separated `name=value` tokens with arbitrary
//! whitespace around names, separators and values. Tokens without an `=`
//! are dropped, matching lenient browser behavior.

/// Attributes appended to a `Set-Cookie` header.
#[derive(Debug, Clone)]
pub struct CookieOptions {
    /// `Max-Age` in seconds.
    pub max_age: Option<u64>,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: bool,
    /// Emits `SameSite=Strict`.
    pub same_site_strict: bool,
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            max_age: Some(86_400),
            domain: None,
            path: None,
            secure: true,
            same_site_strict: true,
            http_only: true,
        }
    }
}

impl CookieOptions {
    /// Formats the attribute tail, starting with `; `.
    pub(crate) fn format(&self, out: &mut String) {
        if let Some(max_age) = self.max_age {
            out.push_str("; Max-Age=");
            out.push_str(&max_age.to_string());
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.same_site_strict {
            out.push_str("; SameSite=Strict");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    InName,
    EqSeen,
    InValue,
    SepSeen,
}

/// Splits a `Cookie:` header value into ordered `(name, value)` pairs.
pub fn parse_cookie_pairs(value: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut state = State::Start;
    let mut name = String::new();
    let mut token = String::new();

    let mut flush = |name: &mut String, token: &mut String, pairs: &mut Vec<(String, String)>| {
        let cookie_name = std::mem::take(name);
        let cookie_value = std::mem::take(token);
        if !cookie_name.is_empty() {
            pairs.push((
                cookie_name.trim_end().to_string(),
                cookie_value.trim_end().to_string(),
            ));
        }
    };

    for ch in value.chars() {
        state = match (state, ch) {
            (State::Start | State::SepSeen, c) if c.is_whitespace() => state,
            (State::Start | State::SepSeen, ';') => State::SepSeen,
            (State::Start | State::SepSeen, '=') => {
                // nameless token, skip to the next separator
                State::EqSeen
            }
            (State::Start | State::SepSeen, c) => {
                name.push(c);
                State::InName
            }
            (State::InName, '=') => State::EqSeen,
            (State::InName, ';') => {
                // valueless token is dropped
                name.clear();
                State::SepSeen
            }
            (State::InName, c) => {
                name.push(c);
                State::InName
            }
            (State::EqSeen, c) if c.is_whitespace() => State::EqSeen,
            (State::EqSeen, ';') => {
                flush(&mut name, &mut token, &mut pairs);
                State::SepSeen
            }
            (State::EqSeen, c) => {
                token.push(c);
                State::InValue
            }
            (State::InValue, ';') => {
                flush(&mut name, &mut token, &mut pairs);
                State::SepSeen
            }
            (State::InValue, c) => {
                token.push(c);
                State::InValue
            }
        };
    }

    if state == State::EqSeen || state == State::InValue {
        flush(&mut name, &mut token, &mut pairs);
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect()
    }

    #[test]
    fn plain_pairs() {
        assert_eq!(parse_cookie_pairs("a=1; b=2"), owned(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn varied_whitespace() {
        assert_eq!(
            parse_cookie_pairs("a=1; b=2 ;c=3"),
            owned(&[("a", "1"), ("b", "2"), ("c", "3")])
        );
        assert_eq!(
            parse_cookie_pairs("  a = 1 ;b=  2;  c=3  "),
            owned(&[("a", "1"), ("b", "2"), ("c", "3")])
        );
    }

    #[test]
    fn empty_value_is_kept() {
        assert_eq!(parse_cookie_pairs("a=; b=2"), owned(&[("a", ""), ("b", "2")]));
    }

    #[test]
    fn degenerate_tokens_are_dropped() {
        assert_eq!(parse_cookie_pairs("noequals; b=2"), owned(&[("b", "2")]));
        assert_eq!(parse_cookie_pairs("=orphan; b=2"), owned(&[("b", "2")]));
        assert_eq!(parse_cookie_pairs(""), owned(&[]));
        assert_eq!(parse_cookie_pairs(";;;"), owned(&[]));
    }

    #[test]
    fn attribute_tail() {
        let mut out = String::new();
        CookieOptions::default().format(&mut out);
        assert_eq!(out, "; Max-Age=86400; Secure; SameSite=Strict; HttpOnly");

        let mut out = String::new();
        CookieOptions {
            max_age: Some(60),
            domain: Some("example.com".into()),
            path: Some("/app".into()),
            secure: false,
            same_site_strict: false,
            http_only: false,
        }
        .format(&mut out);
        assert_eq!(out, "; Max-Age=60; Domain=example.com; Path=/app");
    }
}
