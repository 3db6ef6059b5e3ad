//! Byte-level scanning shared by the request and response parsers.

use crate::cookie::parse_cookie_pairs;
use crate::ensure;
use crate::error::ParseError;

pub(crate) const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Finds the header/body separator starting at `from`. Callers resume from
/// `scanned - 3` so a separator split across two reads is still caught.
pub(crate) fn find_separator(slice: &[u8], from: usize) -> Option<usize> {
    if slice.len() < SEPARATOR.len() {
        return None;
    }
    (from..=slice.len() - SEPARATOR.len()).find(|&i| &slice[i..i + SEPARATOR.len()] == SEPARATOR)
}

/// Finds the first CRLF in `slice[..limit]`.
pub(crate) fn find_crlf(slice: &[u8], limit: usize) -> Option<usize> {
    if limit < 2 {
        return None;
    }
    (0..=limit - 2).find(|&i| slice[i] == b'\r' && slice[i + 1] == b'\n')
}

/// Everything a parsed header block yields besides the start line.
#[derive(Debug, Default)]
pub(crate) struct ParsedHeaders {
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body_length: Option<usize>,
}

/// Parses the header lines in `slice[from..end + 2]`, where `end` is the
/// position of the header/body separator. Each line splits at the first
/// `:`; leading whitespace of the value is skipped. An empty header name is
/// a violation, an empty value is not.
pub(crate) fn parse_header_lines(
    slice: &[u8],
    from: usize,
    end: usize,
    collect_cookies: bool,
) -> Result<ParsedHeaders, ParseError> {
    let mut parsed = ParsedHeaders::default();
    let mut pos = from;

    while pos < end + 2 {
        let line_end = (pos..end + 1)
            .find(|&i| slice[i] == b'\r' && slice[i + 1] == b'\n')
            .unwrap_or(end);
        let line = &slice[pos..line_end];
        pos = line_end + 2;

        if line.is_empty() {
            continue;
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or_else(|| ParseError::invalid_header("missing ':' separator"))?;
        if colon == 0 {
            return Err(ParseError::invalid_header("empty header name"));
        }

        let name = String::from_utf8_lossy(&line[..colon]).into_owned();
        let mut value_start = colon + 1;
        while value_start < line.len() && (line[value_start] == b' ' || line[value_start] == b'\t') {
            value_start += 1;
        }
        let value = String::from_utf8_lossy(&line[value_start..]).into_owned();

        if name.eq_ignore_ascii_case("content-length") {
            parsed.body_length = Some(parse_decimal(&value)?);
        } else if collect_cookies && name.eq_ignore_ascii_case("cookie") {
            parsed.cookies.extend(parse_cookie_pairs(&value));
        }

        parsed.headers.push((name, value));
    }

    Ok(parsed)
}

/// Strict ASCII decimal; anything else is a violation.
pub(crate) fn parse_decimal(value: &str) -> Result<usize, ParseError> {
    ensure!(
        !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
        ParseError::invalid_content_length(format!("not a decimal number: {value:?}"))
    );
    value
        .parse::<usize>()
        .map_err(|_| ParseError::invalid_content_length(format!("out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_across_resume_window() {
        let bytes = b"abc\r\n\r\nrest";
        assert_eq!(find_separator(bytes, 0), Some(3));
        // resuming from inside the separator still finds it
        assert_eq!(find_separator(bytes, 3), Some(3));
        assert_eq!(find_separator(b"abc\r\n\r", 0), None);
    }

    #[test]
    fn header_lines_basic() {
        let block = b"Host: x\r\nAccept:\r\n\r\n";
        let parsed = parse_header_lines(block, 0, block.len() - 4, false).unwrap();
        assert_eq!(parsed.headers.len(), 2);
        assert_eq!(parsed.headers[0], ("Host".to_string(), "x".to_string()));
        // empty value is accepted
        assert_eq!(parsed.headers[1], ("Accept".to_string(), String::new()));
    }

    #[test]
    fn empty_header_name_is_rejected() {
        let block = b": naked\r\n\r\n";
        assert!(parse_header_lines(block, 0, block.len() - 4, false).is_err());
    }

    #[test]
    fn decimal_strictness() {
        assert_eq!(parse_decimal("42").unwrap(), 42);
        assert!(parse_decimal("4 2").is_err());
        assert!(parse_decimal("-1").is_err());
        assert!(parse_decimal("").is_err());
        assert!(parse_decimal("0x10").is_err());
    }
}
