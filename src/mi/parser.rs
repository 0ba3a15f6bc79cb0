//! Parser for the GDB/MI output grammar.
//!
//! One line in, one [`MiRecord`] out. The grammar (from the GDB manual):
//!
//! ```text
//! out-of-band-record → async-record | stream-record
//! result-record      → [token] "^" result-class ("," result)*
//! async-record       → [token] ("*" | "+" | "=") async-class ("," result)*
//! stream-record      → ("~" | "@" | "&") c-string
//! result             → variable "=" value
//! value              → c-string | "{" … "}" | "[" … "]"
//! ```
//!
//! List items may themselves be named results (`stack=[frame={…},frame={…}]`);
//! the item names are uniform and carry no information, so only values are kept.

use super::types::{MiRecord, MiValue, ResultClass};
use std::collections::HashMap;

#[derive(Debug, PartialEq)]
pub struct MiParseError {
    pub line: String,
    pub reason: String,
}

impl std::fmt::Display for MiParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparseable MI line {:?}: {}", self.line, self.reason)
    }
}

pub fn parse_line(line: &str) -> Result<MiRecord, MiParseError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if line == "(gdb)" || line == "(gdb) " {
        return Ok(MiRecord::Prompt);
    }

    let mut cursor = Cursor::new(line);
    let token = cursor.take_token();

    let err = |cursor: &Cursor, reason: &str| MiParseError {
        line: line.to_string(),
        reason: format!("{} at byte {}", reason, cursor.pos),
    };

    match cursor.peek() {
        Some('^') => {
            cursor.bump();
            let class_str = cursor.take_ident();
            let class = ResultClass::parse(&class_str)
                .ok_or_else(|| err(&cursor, "unknown result class"))?;
            let results = cursor
                .take_results()
                .map_err(|reason| err(&cursor, &reason))?;
            Ok(MiRecord::Result {
                token,
                class,
                results,
            })
        }
        Some(marker @ ('*' | '+' | '=')) => {
            cursor.bump();
            let class = cursor.take_ident();
            if class.is_empty() {
                return Err(err(&cursor, "missing async class"));
            }
            let results = cursor
                .take_results()
                .map_err(|reason| err(&cursor, &reason))?;
            Ok(match marker {
                '*' => MiRecord::ExecAsync {
                    token,
                    class,
                    results,
                },
                '+' => MiRecord::StatusAsync {
                    token,
                    class,
                    results,
                },
                _ => MiRecord::NotifyAsync {
                    token,
                    class,
                    results,
                },
            })
        }
        Some(marker @ ('~' | '@' | '&')) => {
            cursor.bump();
            let text = cursor
                .take_c_string()
                .map_err(|reason| err(&cursor, &reason))?;
            Ok(match marker {
                '~' => MiRecord::Console(text),
                '@' => MiRecord::Target(text),
                _ => MiRecord::Log(text),
            })
        }
        _ => Err(err(&cursor, "unrecognized record marker")),
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            bytes: line.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.bytes.get(self.pos).map(|&b| b as char)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn take_token(&mut self) -> Option<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    fn take_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            self.bump();
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    /// `("," result)*` — the tail of a result or async record.
    fn take_results(&mut self) -> Result<MiValue, String> {
        let mut map = HashMap::new();
        while self.eat(',') {
            let (name, value) = self.take_result()?;
            map.insert(name, value);
        }
        if self.pos != self.bytes.len() {
            return Err("trailing garbage".to_string());
        }
        Ok(MiValue::Tuple(map))
    }

    fn take_result(&mut self) -> Result<(String, MiValue), String> {
        let name = self.take_ident();
        if name.is_empty() {
            return Err("expected variable name".to_string());
        }
        if !self.eat('=') {
            return Err("expected '='".to_string());
        }
        let value = self.take_value()?;
        Ok((name, value))
    }

    fn take_value(&mut self) -> Result<MiValue, String> {
        match self.peek() {
            Some('"') => Ok(MiValue::Const(self.take_c_string()?)),
            Some('{') => {
                self.bump();
                let mut map = HashMap::new();
                if self.eat('}') {
                    return Ok(MiValue::Tuple(map));
                }
                loop {
                    let (name, value) = self.take_result()?;
                    map.insert(name, value);
                    if self.eat('}') {
                        break;
                    }
                    if !self.eat(',') {
                        return Err("expected ',' or '}' in tuple".to_string());
                    }
                }
                Ok(MiValue::Tuple(map))
            }
            Some('[') => {
                self.bump();
                let mut items = Vec::new();
                if self.eat(']') {
                    return Ok(MiValue::List(items));
                }
                loop {
                    // Items are either bare values or named results; names in a
                    // list are uniform filler, so keep only the value.
                    let item = if matches!(self.peek(), Some('"' | '{' | '[')) {
                        self.take_value()?
                    } else {
                        self.take_result()?.1
                    };
                    items.push(item);
                    if self.eat(']') {
                        break;
                    }
                    if !self.eat(',') {
                        return Err("expected ',' or ']' in list".to_string());
                    }
                }
                Ok(MiValue::List(items))
            }
            _ => Err("expected value".to_string()),
        }
    }

    fn take_c_string(&mut self) -> Result<String, String> {
        if !self.eat('"') {
            return Err("expected '\"'".to_string());
        }
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err("unterminated c-string".to_string()),
                Some('"') => {
                    self.bump();
                    return Ok(out);
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('r') => out.push('\r'),
                        Some('"') => out.push('"'),
                        Some('\\') => out.push('\\'),
                        Some(other) => {
                            // Unknown escape: keep it verbatim.
                            out.push('\\');
                            out.push(other);
                        }
                        None => return Err("dangling escape".to_string()),
                    }
                    self.bump();
                }
                Some(_) => {
                    // Multi-byte UTF-8 is copied through byte by byte.
                    let start = self.pos;
                    while self
                        .bytes
                        .get(self.pos)
                        .is_some_and(|&b| b != b'"' && b != b'\\')
                    {
                        self.pos += 1;
                    }
                    out.push_str(&String::from_utf8_lossy(&self.bytes[start..self.pos]));
                }
            }
        }
    }
}
