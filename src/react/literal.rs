//! 受限字面量解析器
//!
//! 只接受整数、浮点数、字符串、布尔、None、列表、元组与字典，直接产出 serde_json::Value；
//! 不识别任何表达式、名称或函数调用，保证 Agent 文本不可能被执行。
//! 同时兼容 JSON 写法（true / false / null），元组按数组返回。

use serde_json::{Map, Number, Value};

use crate::react::ParseError;

/// 错误片段的最大展示字符数
const FRAGMENT_CHARS: usize = 40;
/// 列表/元组/字典的最大嵌套层数
const MAX_DEPTH: usize = 64;

/// 解析完整的单个字面量（前后空白忽略，多余内容视为错误）
pub fn parse_literal(src: &str) -> Result<Value, ParseError> {
    let mut p = LiteralParser::new(src);
    p.skip_ws();
    let value = p.parse_value()?;
    p.skip_ws();
    if !p.at_end() {
        return Err(p.error("unexpected trailing input"));
    }
    Ok(value)
}

/// 解析调用括号内的参数列表：`1, 'a', key=[1, 2]`
pub fn parse_call_arguments(src: &str) -> Result<(Vec<Value>, Map<String, Value>), ParseError> {
    let mut p = LiteralParser::new(src);
    let mut args = Vec::new();
    let mut kwargs = Map::new();

    loop {
        p.skip_ws();
        if p.at_end() {
            break;
        }

        match p.try_keyword()? {
            Some(name) => {
                let value = p.parse_value()?;
                if kwargs.contains_key(&name) {
                    return Err(p.error(&format!("keyword argument repeated: {name}")));
                }
                kwargs.insert(name, value);
            }
            None => {
                let value = p.parse_value()?;
                if !kwargs.is_empty() {
                    return Err(p.error("positional argument follows keyword argument"));
                }
                args.push(value);
            }
        }

        p.skip_ws();
        if p.at_end() {
            break;
        }
        p.expect(',')?;
    }

    Ok((args, kwargs))
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl LiteralParser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let fragment: String = self
            .chars
            .iter()
            .skip(self.pos.min(self.chars.len()))
            .take(FRAGMENT_CHARS)
            .collect();
        let fragment = if fragment.is_empty() {
            "<end of input>".to_string()
        } else {
            fragment
        };
        ParseError::new(message, fragment)
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(&format!("expected '{expected}'"))),
        }
    }

    /// `name=` 形式的关键字参数；不是关键字时回退位置并返回 None
    fn try_keyword(&mut self) -> Result<Option<String>, ParseError> {
        let start = self.pos;
        let Some(ident) = self.identifier() else {
            return Ok(None);
        };
        self.skip_ws();
        if self.peek() == Some('=') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            self.skip_ws();
            return Ok(Some(ident));
        }
        self.pos = start;
        Ok(None)
    }

    fn identifier(&mut self) -> Option<String> {
        let first = self.peek()?;
        if !(first.is_alphabetic() || first == '_') {
            return None;
        }
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        Some(self.chars[start..self.pos].iter().collect())
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("expected a literal")),
            Some('[') => self.nested(Self::parse_list),
            Some('(') => self.nested(Self::parse_tuple),
            Some('{') => self.nested(Self::parse_dict),
            Some('"') | Some('\'') => self.parse_strings(false),
            Some('r') | Some('R') if matches!(self.peek_at(1), Some('"') | Some('\'')) => {
                self.pos += 1;
                self.parse_strings(true)
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let start = self.pos;
                let ident = self.identifier().unwrap_or_default();
                match ident.as_str() {
                    "True" | "true" => Ok(Value::Bool(true)),
                    "False" | "false" => Ok(Value::Bool(false)),
                    "None" | "null" => Ok(Value::Null),
                    _ => {
                        self.pos = start;
                        Err(self.error("only literals are allowed"))
                    }
                }
            }
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    /// 容器递归入口；超过 MAX_DEPTH 时报错而不是耗尽栈
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Value, ParseError>,
    ) -> Result<Value, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let out = parse(self);
        self.depth -= 1;
        out
    }

    fn parse_sequence(&mut self, close: char) -> Result<Vec<Value>, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(c) if c == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => return Err(self.error(&format!("expected ',' or '{close}'"))),
            }
        }
    }

    fn parse_list(&mut self) -> Result<Value, ParseError> {
        self.expect('[')?;
        Ok(Value::Array(self.parse_sequence(']')?))
    }

    /// `()` 为空元组，`(x,)` 为单元素元组，`(x)` 只是带括号的 x
    fn parse_tuple(&mut self) -> Result<Value, ParseError> {
        self.expect('(')?;
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(Value::Array(Vec::new()));
        }
        let first = self.parse_value()?;
        self.skip_ws();
        match self.peek() {
            Some(')') => {
                self.pos += 1;
                Ok(first)
            }
            Some(',') => {
                self.pos += 1;
                let mut items = vec![first];
                items.extend(self.parse_sequence(')')?);
                Ok(Value::Array(items))
            }
            _ => Err(self.error("expected ',' or ')'")),
        }
    }

    fn parse_dict(&mut self) -> Result<Value, ParseError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key_pos = self.pos;
            let key = self.parse_value()?;
            let key = match key {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(true) => "True".to_string(),
                Value::Bool(false) => "False".to_string(),
                Value::Null => "None".to_string(),
                Value::Array(_) | Value::Object(_) => {
                    self.pos = key_pos;
                    return Err(self.error("unhashable dict key"));
                }
            };
            self.skip_ws();
            if self.peek() != Some(':') {
                return Err(self.error("expected ':' (set literals are not supported)"));
            }
            self.pos += 1;
            let value = self.parse_value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        let mut text = String::new();
        if let Some(sign @ ('-' | '+')) = self.peek() {
            self.pos += 1;
            if sign == '-' {
                text.push('-');
            }
            self.skip_ws();
        }

        let mut is_float = false;
        let mut digits = 0;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {
                    text.push(c);
                    digits += 1;
                }
                '_' if digits > 0 => {}
                '.' if !is_float => {
                    is_float = true;
                    text.push('.');
                }
                'e' | 'E' if digits > 0 => {
                    is_float = true;
                    text.push('e');
                    if let Some(sign @ ('-' | '+')) = self.peek_at(1) {
                        text.push(sign);
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }

        if digits == 0 {
            self.pos = start;
            return Err(self.error("invalid number"));
        }

        if is_float {
            let parsed: f64 = text.parse().map_err(|_| self.error("invalid float"))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| self.error("float out of range"))
        } else {
            match text.parse::<i64>() {
                Ok(n) => Ok(Value::Number(n.into())),
                Err(_) => {
                    self.pos = start;
                    Err(self.error("integer out of range"))
                }
            }
        }
    }

    /// 相邻字符串字面量按 Python 规则拼接：`'a' "b"` == `"ab"`
    fn parse_strings(&mut self, raw: bool) -> Result<Value, ParseError> {
        let mut out = self.parse_string(raw)?;
        loop {
            let save = self.pos;
            self.skip_ws();
            match self.peek() {
                Some('"') | Some('\'') => out.push_str(&self.parse_string(false)?),
                _ => {
                    self.pos = save;
                    return Ok(Value::String(out));
                }
            }
        }
    }

    fn parse_string(&mut self, raw: bool) -> Result<String, ParseError> {
        let start = self.pos;
        let quote = match self.bump() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error("expected a string")),
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                self.pos = start;
                return Err(self.error("unterminated string"));
            };
            if c == quote {
                if !triple {
                    return Ok(out);
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.pos += 2;
                    return Ok(out);
                }
                out.push(c);
                continue;
            }
            if c == '\n' && !triple {
                self.pos = start;
                return Err(self.error("unterminated string"));
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let Some(esc) = self.bump() else {
                self.pos = start;
                return Err(self.error("unterminated string"));
            };
            if raw {
                out.push('\\');
                out.push(esc);
                continue;
            }
            match esc {
                '\n' => {}
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                'a' => out.push('\u{07}'),
                'b' => out.push('\u{08}'),
                'f' => out.push('\u{0C}'),
                'v' => out.push('\u{0B}'),
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                'U' => out.push(self.hex_escape(8)?),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, ParseError> {
        let digits: String = self.chars.iter().skip(self.pos).take(len).collect();
        if digits.chars().count() != len {
            return Err(self.error("truncated escape sequence"));
        }
        let code = u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape sequence"))?;
        self.pos += len;
        Ok(code)
    }
}
