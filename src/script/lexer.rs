//! Tokenizer for workflow scripts.
//!
//! Indentation is significant: the lexer turns leading whitespace into
//! `Indent`/`Dedent` tokens and ends every logical line with `Newline`.
//! Newlines inside brackets are ignored.

use super::parser::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Keyword(&'static str),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Punct(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub col: u32,
}

const KEYWORDS: &[&str] = &[
    "and", "as", "break", "class", "continue", "def", "elif", "else", "except", "False", "for",
    "from", "if", "import", "in", "is", "None", "not", "or", "pass", "raise", "return", "True",
    "try", "while",
];

// Longest first so that `**` wins over `*`.
const PUNCTS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "->", "(", ")", "[", "]", "{",
    "}", ",", ":", ".", "=", "<", ">", "+", "-", "*", "/", "%", "@", ";",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.line, self.col)
    }

    fn push(&mut self, tok: Tok, line: u32, col: u32) {
        self.tokens.push(Token { tok, line, col });
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    continue;
                }
            }

            let Some(c) = self.peek() else { break };
            let (line, col) = (self.line, self.col);

            match c {
                '\n' => {
                    self.bump();
                    if self.depth == 0 {
                        self.push(Tok::Newline, line, col);
                        self.at_line_start = true;
                    }
                }
                ' ' | '\t' | '\r' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                '"' | '\'' => {
                    let s = self.string(c)?;
                    self.push(Tok::Str(s), line, col);
                }
                'b' | 'B' if matches!(self.peek_at(1), Some('"') | Some('\'')) => {
                    self.bump();
                    let quote = self.peek().unwrap_or('"');
                    let s = self.string(quote)?;
                    let bytes = string_to_bytes(&s).ok_or_else(|| {
                        ParseError::new("bytes literal must contain only ASCII", line, col)
                    })?;
                    self.push(Tok::Bytes(bytes), line, col);
                }
                'r' | 'R' if matches!(self.peek_at(1), Some('"') | Some('\'')) => {
                    self.bump();
                    let quote = self.peek().unwrap_or('"');
                    let s = self.raw_string(quote)?;
                    self.push(Tok::Str(s), line, col);
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) =>
                {
                    let tok = self.number()?;
                    self.push(tok, line, col);
                }
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.identifier();
                    let tok = match KEYWORDS.iter().find(|k| **k == word) {
                        Some(k) => Tok::Keyword(*k),
                        None => Tok::Name(word),
                    };
                    self.push(tok, line, col);
                }
                _ => {
                    let punct = self.punct()?;
                    match punct {
                        "(" | "[" | "{" => self.depth += 1,
                        ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                        _ => {}
                    }
                    self.push(Tok::Punct(punct), line, col);
                }
            }
        }

        let (line, col) = (self.line, self.col);
        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Dedent)
        ) {
            self.push(Tok::Newline, line, col);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, line, col);
        }
        self.push(Tok::Eof, line, col);
        Ok(self.tokens)
    }

    /// Measure leading whitespace and emit indent/dedent tokens. Returns
    /// false when the line was blank or a comment and has been consumed.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => {
                self.at_line_start = false;
                return Ok(true);
            }
            Some('\n') => {
                self.bump();
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.bump();
                }
                return Ok(false);
            }
            _ => {}
        }

        self.at_line_start = false;
        let current = self.indents.last().copied().unwrap_or(0);
        let (line, col) = (self.line, self.col);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, line, col);
        } else if width < current {
            while self.indents.last().is_some_and(|w| *w > width) {
                self.indents.pop();
                self.push(Tok::Dedent, line, col);
            }
            if self.indents.last().copied() != Some(width) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn identifier(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn number(&mut self) -> Result<Tok, ParseError> {
        let (line, col) = (self.line, self.col);
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                } else if c != '_' {
                    break;
                }
                self.bump();
            }
            return i64::from_str_radix(&digits, 16)
                .map(Tok::Int)
                .map_err(|_| ParseError::new("invalid hex literal", line, col));
        }

        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' if !is_float && self.peek_at(1) != Some('.') => {
                    is_float = true;
                    text.push(c);
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    self.bump();
                    if let Some(sign @ ('+' | '-')) = self.peek() {
                        text.push(sign);
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }

        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| ParseError::new(format!("invalid number '{text}'"), line, col))
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| ParseError::new(format!("integer literal '{text}' too large"), line, col))
        }
    }

    fn triple_quoted(&self, quote: char) -> bool {
        self.peek() == Some(quote) && self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote)
    }

    fn string(&mut self, quote: char) -> Result<String, ParseError> {
        let (line, col) = (self.line, self.col);
        let triple = self.triple_quoted(quote);
        let delim = if triple { 3 } else { 1 };
        for _ in 0..delim {
            self.bump();
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ParseError::new("unterminated string literal", line, col));
            };
            if c == quote && (!triple || self.triple_quoted(quote)) {
                for _ in 0..delim {
                    self.bump();
                }
                return Ok(out);
            }
            if c == '\n' && !triple {
                return Err(ParseError::new("unterminated string literal", line, col));
            }
            self.bump();
            if c != '\\' {
                out.push(c);
                continue;
            }
            let Some(esc) = self.bump() else {
                return Err(ParseError::new("unterminated string literal", line, col));
            };
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                '\n' => {}
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn raw_string(&mut self, quote: char) -> Result<String, ParseError> {
        let (line, col) = (self.line, self.col);
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(out),
                Some('\n') | None => {
                    return Err(ParseError::new("unterminated string literal", line, col))
                }
                Some('\\') if self.peek() == Some(quote) => {
                    out.push('\\');
                    out.push(quote);
                    self.bump();
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, ParseError> {
        let mut digits = String::new();
        for _ in 0..len {
            match self.bump() {
                Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                _ => return Err(self.error("truncated escape sequence")),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("invalid escape sequence"))
    }

    fn punct(&mut self) -> Result<&'static str, ParseError> {
        for p in PUNCTS {
            let matches = p
                .chars()
                .enumerate()
                .all(|(i, pc)| self.peek_at(i) == Some(pc));
            if matches {
                for _ in 0..p.chars().count() {
                    self.bump();
                }
                return Ok(*p);
            }
        }
        let c = self.peek().unwrap_or('\0');
        Err(self.error(format!("unexpected character '{c}'")))
    }
}

/// Bytes literals only admit code points below 256 (after escapes).
fn string_to_bytes(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn emits_indent_and_dedent() {
        let toks = kinds("def f():\n    return 1\nx = 2\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.last(), Some(&Tok::Eof));
    }

    #[test]
    fn ignores_newlines_inside_brackets() {
        let toks = kinds("f(1,\n  2)\n");
        let newlines = toks.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let toks = kinds("x = 1\n\n   # note\ny = 2\n");
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn lexes_literals() {
        let toks = kinds(r#"a = b"hi" + "x\ty" + 1.5e2 + 0x10"#);
        assert!(toks.contains(&Tok::Bytes(b"hi".to_vec())));
        assert!(toks.contains(&Tok::Str("x\ty".into())));
        assert!(toks.contains(&Tok::Float(150.0)));
        assert!(toks.contains(&Tok::Int(16)));
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let toks = kinds("s = \"\"\"a\nb\"\"\"\n");
        assert!(toks.contains(&Tok::Str("a\nb".into())));
    }

    #[test]
    fn rejects_inconsistent_dedent() {
        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert!(err.message.contains("unindent"));
    }
}
