//! A small hand-written recursive-descent JSON parser enforcing the
//! canonical-form invariants that `serde_json::Value` does not: rejected
//! duplicate object keys, rejected floating-point numbers, and rejected
//! trailing data after the top-level value.
//!
//! A general-purpose deserializer cannot be trusted with these
//! invariants — `serde_json`'s map visitor silently overwrites duplicate
//! keys rather than erroring — so untrusted request bytes are read
//! through this parser instead, the same posture this workspace already
//! takes for other untrusted-JSON guardrails.

use crate::value::CanonicalValue;
use requiem_error::{ErrorCode, RequiemError};

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

/// Parse `bytes` as strict canonical-form JSON.
///
/// Rejects: invalid UTF-8, duplicate object keys, floating-point numbers,
/// unknown escape sequences, and any trailing non-whitespace data after
/// the top-level value.
///
/// # Errors
///
/// Returns [`ErrorCode::JsonParseError`] or [`ErrorCode::JsonDuplicateKey`].
pub fn parse_strict(bytes: &[u8]) -> Result<CanonicalValue, RequiemError> {
    std::str::from_utf8(bytes).map_err(|e| {
        RequiemError::new(ErrorCode::JsonParseError, format!("invalid UTF-8: {e}"))
    })?;
    let mut p = Parser { bytes, pos: 0 };
    p.skip_ws();
    let value = p.parse_value()?;
    p.skip_ws();
    if p.pos != p.bytes.len() {
        return Err(RequiemError::new(
            ErrorCode::JsonParseError,
            format!("trailing data at byte offset {}", p.pos),
        ));
    }
    Ok(value)
}

impl<'a> Parser<'a> {
    fn err(&self, msg: impl Into<String>) -> RequiemError {
        RequiemError::new(
            ErrorCode::JsonParseError,
            format!("{} (at byte offset {})", msg.into(), self.pos),
        )
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), RequiemError> {
        if self.bump() == Some(b) {
            Ok(())
        } else {
            Err(self.err(format!("expected {:?}", b as char)))
        }
    }

    fn expect_literal(&mut self, lit: &str) -> Result<(), RequiemError> {
        for expected in lit.bytes() {
            if self.bump() != Some(expected) {
                return Err(self.err(format!("expected literal {lit:?}")));
            }
        }
        Ok(())
    }

    fn parse_value(&mut self) -> Result<CanonicalValue, RequiemError> {
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.parse_object(),
            Some(b'[') => self.parse_array(),
            Some(b'"') => self.parse_string().map(CanonicalValue::String),
            Some(b't') => self.expect_literal("true").map(|()| CanonicalValue::Bool(true)),
            Some(b'f') => self.expect_literal("false").map(|()| CanonicalValue::Bool(false)),
            Some(b'n') => self.expect_literal("null").map(|()| CanonicalValue::Null),
            Some(b) if b == b'-' || b.is_ascii_digit() => self.parse_number(),
            Some(_) => Err(self.err("unexpected character")),
            None => Err(self.err("unexpected end of input")),
        }
    }

    fn parse_object(&mut self) -> Result<CanonicalValue, RequiemError> {
        self.expect(b'{')?;
        let mut entries: Vec<(String, CanonicalValue)> = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(CanonicalValue::Object(entries));
        }
        loop {
            self.skip_ws();
            if self.peek() != Some(b'"') {
                return Err(self.err("expected string key"));
            }
            let key = self.parse_string()?;
            self.skip_ws();
            self.expect(b':')?;
            let value = self.parse_value()?;
            if entries.iter().any(|(k, _)| k == &key) {
                return Err(RequiemError::new(
                    ErrorCode::JsonDuplicateKey,
                    format!("duplicate object key: {key:?}"),
                ));
            }
            entries.push((key, value));
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b'}') => break,
                _ => return Err(self.err("expected ',' or '}'")),
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(CanonicalValue::Object(entries))
    }

    fn parse_array(&mut self) -> Result<CanonicalValue, RequiemError> {
        self.expect(b'[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(CanonicalValue::Array(items));
        }
        loop {
            let value = self.parse_value()?;
            items.push(value);
            self.skip_ws();
            match self.bump() {
                Some(b',') => continue,
                Some(b']') => break,
                _ => return Err(self.err("expected ',' or ']'")),
            }
        }
        Ok(CanonicalValue::Array(items))
    }

    fn parse_string(&mut self) -> Result<String, RequiemError> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'/') => out.push('/'),
                    Some(b'b') => out.push('\u{0008}'),
                    Some(b'f') => out.push('\u{000C}'),
                    Some(b'n') => out.push('\n'),
                    Some(b'r') => out.push('\r'),
                    Some(b't') => out.push('\t'),
                    Some(b'u') => {
                        let cp = self.parse_hex4()?;
                        if (0xD800..=0xDBFF).contains(&cp) {
                            if self.bump() != Some(b'\\') || self.bump() != Some(b'u') {
                                return Err(self.err("expected low surrogate"));
                            }
                            let low = self.parse_hex4()?;
                            if !(0xDC00..=0xDFFF).contains(&low) {
                                return Err(self.err("invalid low surrogate"));
                            }
                            let c = 0x10000
                                + (u32::from(cp) - 0xD800) * 0x400
                                + (u32::from(low) - 0xDC00);
                            out.push(char::from_u32(c).ok_or_else(|| self.err("invalid codepoint"))?);
                        } else {
                            out.push(
                                char::from_u32(u32::from(cp))
                                    .ok_or_else(|| self.err("invalid codepoint"))?,
                            );
                        }
                    }
                    _ => return Err(self.err("invalid escape sequence")),
                },
                Some(b) if b < 0x20 => return Err(self.err("unescaped control character")),
                Some(b) if b < 0x80 => out.push(b as char),
                Some(b) => {
                    // Multi-byte UTF-8 sequence; re-decode from the original slice.
                    let start = self.pos - 1;
                    let width = utf8_width(b).ok_or_else(|| self.err("invalid UTF-8 lead byte"))?;
                    let end = start + width;
                    if end > self.bytes.len() {
                        return Err(self.err("truncated UTF-8 sequence"));
                    }
                    let s = std::str::from_utf8(&self.bytes[start..end])
                        .map_err(|_| self.err("invalid UTF-8 sequence"))?;
                    out.push_str(s);
                    self.pos = end;
                }
            }
        }
        Ok(out)
    }

    fn parse_hex4(&mut self) -> Result<u16, RequiemError> {
        let mut v: u16 = 0;
        for _ in 0..4 {
            let b = self.bump().ok_or_else(|| self.err("truncated \\u escape"))?;
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| self.err("invalid hex digit in \\u escape"))?;
            v = v * 16 + digit as u16;
        }
        Ok(v)
    }

    fn parse_number(&mut self) -> Result<CanonicalValue, RequiemError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        let mut saw_digit = false;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
            saw_digit = true;
        }
        if !saw_digit {
            return Err(self.err("invalid number"));
        }
        if matches!(self.peek(), Some(b'.') | Some(b'e') | Some(b'E')) {
            return Err(self.err("floating-point numbers are forbidden in canonical form"));
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
        if text.starts_with('-') {
            text.parse::<i64>()
                .map(CanonicalValue::Int)
                .map_err(|_| self.err("integer out of i64 range"))
        } else {
            text.parse::<u64>()
                .map(CanonicalValue::UInt)
                .map_err(|_| self.err("integer out of u64 range"))
        }
    }
}

fn utf8_width(lead: u8) -> Option<usize> {
    if lead & 0xE0 == 0xC0 {
        Some(2)
    } else if lead & 0xF0 == 0xE0 {
        Some(3)
    } else if lead & 0xF8 == 0xF0 {
        Some(4)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_object() {
        let v = parse_strict(br#"{"b": 2, "a": 1}"#).unwrap();
        match v {
            CanonicalValue::Object(entries) => {
                assert_eq!(entries[0].0, "a");
                assert_eq!(entries[1].0, "b");
            }
            _ => panic!(),
        }
    }

    #[test]
    fn rejects_duplicate_keys() {
        let err = parse_strict(br#"{"command":"a","command":"b"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonDuplicateKey);
    }

    #[test]
    fn rejects_trailing_data() {
        let err = parse_strict(br#"{"a":1} garbage"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonParseError);
    }

    #[test]
    fn rejects_floats() {
        let err = parse_strict(br#"{"a":1.5}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonParseError);
    }

    #[test]
    fn rejects_exponent_notation() {
        let err = parse_strict(br#"{"a":1e5}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonParseError);
    }

    #[test]
    fn parses_negative_and_large_unsigned() {
        let v = parse_strict(format!(r#"{{"a":-5,"b":{}}}"#, u64::MAX).as_bytes()).unwrap();
        assert_eq!(v.get("a"), Some(&CanonicalValue::Int(-5)));
        assert_eq!(v.get("b"), Some(&CanonicalValue::UInt(u64::MAX)));
    }

    #[test]
    fn parses_unicode_escape() {
        let v = parse_strict(br#"{"a":"café"}"#).unwrap();
        assert_eq!(v.get("a"), Some(&CanonicalValue::String("café".to_string())));
    }

    #[test]
    fn parses_surrogate_pair_escape() {
        let v = parse_strict(br#"{"a":"😀"}"#).unwrap();
        assert_eq!(v.get("a"), Some(&CanonicalValue::String("😀".to_string())));
    }

    #[test]
    fn rejects_unescaped_control_char() {
        let bytes = b"{\"a\":\"x\x01y\"}";
        let err = parse_strict(bytes).unwrap_err();
        assert_eq!(err.code, ErrorCode::JsonParseError);
    }

    #[test]
    fn parses_nested_arrays_and_objects() {
        let v = parse_strict(br#"{"a":[1,2,{"z":0,"y":1}]}"#).unwrap();
        let arr = v.get("a").unwrap();
        match arr {
            CanonicalValue::Array(items) => assert_eq!(items.len(), 3),
            _ => panic!(),
        }
    }
}
