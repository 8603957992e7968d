//! Lazy tokenizer shared by the statement and matching-rule parsers.
//!
//! Tokens carry byte offsets into the source so callers can slice verbatim
//! text (the `where` clause, a rule clause) instead of re-joining tokens.

use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Bare word: keywords, names, OCIDs, resource types.
    Word(String),
    /// Quoted name with quotes removed. Domain-qualified names such as
    /// `'Default'/'Admins'` are joined into one token (`Default/Admins`).
    Quoted(String),
    Comma,
    OpenBrace,
    CloseBrace,
    Equals,
    NotEquals,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

impl Token {
    /// Whether the token is the given keyword, ignoring case.
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// Word or quoted text, if the token carries any.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word(s) | TokenKind::Quoted(s) => Some(s),
            _ => None,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Word(w) => format!("'{w}'"),
            TokenKind::Quoted(q) => format!("'{q}'"),
            TokenKind::Comma => "','".to_string(),
            TokenKind::OpenBrace => "'{'".to_string(),
            TokenKind::CloseBrace => "'}'".to_string(),
            TokenKind::Equals => "'='".to_string(),
            TokenKind::NotEquals => "'!='".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn is_word_char(&self, c: char) -> bool {
        if c.is_whitespace() || matches!(c, ',' | '{' | '}' | '\'' | '"' | '=') {
            return false;
        }
        // `!` only ends a word when it starts `!=`.
        !(c == '!' && self.input[self.pos + 1..].starts_with('='))
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();
        let start = self.pos;

        let Some(ch) = self.peek_char() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                start,
                end: start,
            });
        };

        let single = |kind: TokenKind, pos: &mut usize| {
            *pos += 1;
            Token {
                kind,
                start,
                end: *pos,
            }
        };

        match ch {
            ',' => return Ok(single(TokenKind::Comma, &mut self.pos)),
            '{' => return Ok(single(TokenKind::OpenBrace, &mut self.pos)),
            '}' => return Ok(single(TokenKind::CloseBrace, &mut self.pos)),
            '=' => return Ok(single(TokenKind::Equals, &mut self.pos)),
            '!' if self.input[self.pos + 1..].starts_with('=') => {
                self.pos += 2;
                return Ok(Token {
                    kind: TokenKind::NotEquals,
                    start,
                    end: self.pos,
                });
            }
            '\'' | '"' => return self.quoted(),
            _ => {}
        }

        let word = self.word();
        Ok(Token {
            kind: TokenKind::Word(word.to_string()),
            start,
            end: self.pos,
        })
    }

    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if self.is_word_char(c) {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        &self.input[start..self.pos]
    }

    /// Read one quoted segment starting at the current quote character.
    fn quoted_segment(&mut self) -> Result<&'a str, ParseError> {
        let open = self.pos;
        let quote = self.input[open..].chars().next().unwrap_or('\'');
        let body_start = open + 1;
        match self.input[body_start..].find(quote) {
            Some(len) => {
                self.pos = body_start + len + 1;
                Ok(&self.input[body_start..body_start + len])
            }
            None => Err(ParseError::UnterminatedQuote { offset: open }),
        }
    }

    fn quoted(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let mut text = self.quoted_segment()?.to_string();

        // 'Domain'/'Name' or 'Domain'/Name
        while self.input[self.pos..].starts_with('/') {
            self.pos += 1;
            text.push('/');
            match self.peek_char() {
                Some('\'' | '"') => text.push_str(self.quoted_segment()?),
                _ => text.push_str(self.word()),
            }
        }

        Ok(Token {
            kind: TokenKind::Quoted(text),
            start,
            end: self.pos,
        })
    }
}
