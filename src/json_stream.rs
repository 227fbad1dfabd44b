//! Minimal pull-style JSON reader (spec §4.C).
//!
//! No crate in reach of this workspace offers a SAX/pull JSON parser, and
//! pulling in a full DOM parser would force buffering a response that can
//! run to hundreds of megabytes of samples. This reader exposes just enough
//! primitives — string, number, object/array boundaries, skip-value — for a
//! caller that already knows the shape it's walking (`data.result[*].metric`
//! and `data.result[*].values`) to drive its own traversal and ignore
//! everything else without ever materializing it.

use std::io::{self, Read};

#[derive(Debug)]
pub enum JsonError {
    Io(io::Error),
    Unexpected { expected: &'static str, found: String },
    UnterminatedString,
    InvalidEscape(char),
    InvalidNumber(String),
    Eof,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonError::Io(e) => write!(f, "io error: {e}"),
            JsonError::Unexpected { expected, found } => {
                write!(f, "expected {expected}, found {found:?}")
            }
            JsonError::UnterminatedString => write!(f, "unterminated string"),
            JsonError::InvalidEscape(c) => write!(f, "invalid escape \\{c}"),
            JsonError::InvalidNumber(s) => write!(f, "invalid number literal {s:?}"),
            JsonError::Eof => write!(f, "unexpected end of input"),
        }
    }
}

impl std::error::Error for JsonError {}

impl From<io::Error> for JsonError {
    fn from(e: io::Error) -> Self {
        JsonError::Io(e)
    }
}

/// A byte-at-a-time pull reader with one byte of lookahead.
pub struct JsonReader<R: Read> {
    inner: R,
    peeked: Option<u8>,
}

impl<R: Read> JsonReader<R> {
    pub fn new(inner: R) -> Self {
        JsonReader { inner, peeked: None }
    }

    fn read_byte(&mut self) -> Result<Option<u8>, JsonError> {
        if let Some(b) = self.peeked.take() {
            return Ok(Some(b));
        }
        let mut buf = [0u8; 1];
        match self.inner.read(&mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf[0])),
        }
    }

    fn peek_byte(&mut self) -> Result<Option<u8>, JsonError> {
        if self.peeked.is_none() {
            self.peeked = self.read_byte()?;
        }
        Ok(self.peeked)
    }

    fn skip_ws(&mut self) -> Result<(), JsonError> {
        while let Some(b) = self.peek_byte()? {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.read_byte()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Skips whitespace and, if present, a single `,` or `:` separator.
    pub fn skip_ws_and_punct(&mut self) -> Result<(), JsonError> {
        self.skip_ws()?;
        if matches!(self.peek_byte()?, Some(b',') | Some(b':')) {
            self.read_byte()?;
            self.skip_ws()?;
        }
        Ok(())
    }

    /// Peeks the next non-whitespace byte without consuming it.
    pub fn peek_non_ws(&mut self) -> Result<Option<u8>, JsonError> {
        self.skip_ws()?;
        self.peek_byte()
    }

    /// Consumes an expected single-byte token (`{`, `}`, `[`, `]`).
    pub fn expect_byte(&mut self, expected: u8) -> Result<(), JsonError> {
        self.skip_ws()?;
        match self.read_byte()? {
            Some(b) if b == expected => Ok(()),
            Some(b) => Err(JsonError::Unexpected {
                expected: "delimiter",
                found: (b as char).to_string(),
            }),
            None => Err(JsonError::Eof),
        }
    }

    /// Parses a JSON string, assuming the cursor sits on the opening quote.
    pub fn parse_string(&mut self) -> Result<String, JsonError> {
        self.skip_ws()?;
        match self.read_byte()? {
            Some(b'"') => {}
            Some(b) => {
                return Err(JsonError::Unexpected {
                    expected: "string",
                    found: (b as char).to_string(),
                })
            }
            None => return Err(JsonError::Eof),
        }
        let mut out = String::new();
        loop {
            let b = self.read_byte()?.ok_or(JsonError::UnterminatedString)?;
            match b {
                b'"' => return Ok(out),
                b'\\' => {
                    let esc = self.read_byte()?.ok_or(JsonError::UnterminatedString)?;
                    match esc {
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        b'/' => out.push('/'),
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        b'b' => out.push('\u{0008}'),
                        b'f' => out.push('\u{000C}'),
                        b'u' => {
                            let mut hex = [0u8; 4];
                            for h in hex.iter_mut() {
                                *h = self.read_byte()?.ok_or(JsonError::UnterminatedString)?;
                            }
                            let code = u32::from_str_radix(std::str::from_utf8(&hex).unwrap_or(""), 16)
                                .map_err(|_| JsonError::InvalidEscape('u'))?;
                            if let Some(c) = char::from_u32(code) {
                                out.push(c);
                            }
                        }
                        other => return Err(JsonError::InvalidEscape(other as char)),
                    }
                }
                _ => {
                    // Bytes are passed through as-is (UTF-8 multi-byte sequences
                    // survive unscathed since only ASCII is treated specially above).
                    out.push(b as char);
                }
            }
        }
    }

    /// Parses a JSON number, returning its raw source text unmodified.
    pub fn parse_number(&mut self) -> Result<String, JsonError> {
        self.skip_ws()?;
        let mut out = String::new();
        loop {
            match self.peek_byte()? {
                Some(b) if b == b'-' || b == b'+' || b == b'.' || b == b'e' || b == b'E' || b.is_ascii_digit() => {
                    out.push(self.read_byte()?.unwrap() as char);
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(JsonError::InvalidNumber(out));
        }
        Ok(out)
    }

    /// Skips one complete value (string, number, bool, null, object, array).
    pub fn skip_value(&mut self) -> Result<(), JsonError> {
        match self.peek_non_ws()?.ok_or(JsonError::Eof)? {
            b'"' => {
                self.parse_string()?;
            }
            b'{' => {
                self.expect_byte(b'{')?;
                if self.peek_non_ws()? == Some(b'}') {
                    self.expect_byte(b'}')?;
                    return Ok(());
                }
                loop {
                    self.skip_ws_and_punct()?;
                    self.parse_string()?; // key
                    self.skip_ws_and_punct()?;
                    self.skip_value()?;
                    self.skip_ws()?;
                    match self.peek_byte()? {
                        Some(b',') => {
                            self.read_byte()?;
                        }
                        Some(b'}') => {
                            self.read_byte()?;
                            break;
                        }
                        _ => return Err(JsonError::Unexpected { expected: "`,` or `}`", found: String::new() }),
                    }
                }
            }
            b'[' => {
                self.expect_byte(b'[')?;
                if self.peek_non_ws()? == Some(b']') {
                    self.expect_byte(b']')?;
                    return Ok(());
                }
                loop {
                    self.skip_ws()?;
                    self.skip_value()?;
                    self.skip_ws()?;
                    match self.peek_byte()? {
                        Some(b',') => {
                            self.read_byte()?;
                        }
                        Some(b']') => {
                            self.read_byte()?;
                            break;
                        }
                        _ => return Err(JsonError::Unexpected { expected: "`,` or `]`", found: String::new() }),
                    }
                }
            }
            b't' | b'f' | b'n' => {
                self.parse_keyword()?;
            }
            _ => {
                self.parse_number()?;
            }
        }
        Ok(())
    }

    fn parse_keyword(&mut self) -> Result<(), JsonError> {
        for expected in [b"true".as_slice(), b"false".as_slice(), b"null".as_slice()] {
            if self.peek_byte()? == Some(expected[0]) {
                for &want in expected {
                    match self.read_byte()? {
                        Some(b) if b == want => {}
                        _ => return Err(JsonError::Unexpected { expected: "keyword", found: String::new() }),
                    }
                }
                return Ok(());
            }
        }
        Err(JsonError::Unexpected { expected: "keyword", found: String::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(s: &str) -> JsonReader<Cursor<&[u8]>> {
        JsonReader::new(Cursor::new(s.as_bytes()))
    }

    #[test]
    fn parses_escaped_string() {
        let mut r = reader(r#""a\tb\nc""#);
        assert_eq!(r.parse_string().unwrap(), "a\tb\nc");
    }

    #[test]
    fn parses_number_preserving_raw_text() {
        let mut r = reader("1700000000.123");
        assert_eq!(r.parse_number().unwrap(), "1700000000.123");
    }

    #[test]
    fn skip_value_handles_nested_object() {
        let mut r = reader(r#"{"a":[1,2,{"b":"c"}]} "tail""#);
        r.skip_value().unwrap();
        assert_eq!(r.parse_string().unwrap(), "tail");
    }

    #[test]
    fn skip_value_handles_empty_containers() {
        let mut r = reader(r#"[{},[],{"x":{}}]"#);
        r.skip_value().unwrap();
    }
}
