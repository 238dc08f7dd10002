use thiserror::Error;

use crate::token::Token;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Expected {expected}, got {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unterminated string literal at position {position}")]
    UnterminatedString { position: usize },
    #[error("Invalid integer literal '{literal}' at position {position}")]
    InvalidIntegerLiteral { literal: String, position: usize },
    #[error("Unexpected character '{character}' at position {position}")]
    UnexpectedCharacter { character: char, position: usize },
    #[error("Tabs are not supported for indentation at position {position}")]
    TabIndentation { position: usize },
}

pub type LexResult<T> = Result<T, LexError>;

/// Punctuation characters that always form a single-character token.
fn is_symbol(c: char) -> bool {
    matches!(c, '('..='/' | ':')
}

/// Characters that may start a one- or two-character comparison operator.
fn is_compare_symbol(c: char) -> bool {
    matches!(c, '=' | '<' | '>' | '!')
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Currently open indentation depth, in units of two spaces.
    indent_level: usize,
    /// Synthetic Indent (> 0) or Dedent (< 0) tokens still owed.
    pending: i64,
    current: Token,
    started: bool,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer and eagerly produces the first token.
    pub fn new(input: &'a str) -> LexResult<Self> {
        let mut lexer = Self {
            input,
            pos: 0,
            indent_level: 0,
            pending: 0,
            current: Token::Eof,
            started: false,
        };
        lexer.next_token()?;
        Ok(lexer)
    }

    pub fn current_token(&self) -> &Token {
        &self.current
    }

    /// Advances the stream and returns the new current token.
    pub fn next_token(&mut self) -> LexResult<Token> {
        let token = self.scan_token()?;
        self.current = token.clone();
        self.started = true;
        Ok(token)
    }

    /// Fails with `UnexpectedToken` unless the current token equals `expected`.
    pub fn expect(&self, expected: &Token) -> LexResult<()> {
        if self.current == *expected {
            Ok(())
        } else {
            Err(LexError::UnexpectedToken {
                expected: expected.to_string(),
                found: self.current.to_string(),
            })
        }
    }

    pub fn expect_next(&mut self, expected: &Token) -> LexResult<()> {
        self.next_token()?;
        self.expect(expected)
    }

    /// Returns the payload of the current `Id` token, or fails.
    pub fn expect_id(&self) -> LexResult<&str> {
        match &self.current {
            Token::Id(name) => Ok(name),
            other => Err(LexError::UnexpectedToken {
                expected: "Id".to_string(),
                found: other.to_string(),
            }),
        }
    }

    pub fn expect_next_id(&mut self) -> LexResult<String> {
        self.next_token()?;
        self.expect_id().map(str::to_string)
    }

    fn scan_token(&mut self) -> LexResult<Token> {
        loop {
            // Owed block tokens take priority over everything in the input.
            if self.pending > 0 {
                self.pending -= 1;
                self.indent_level += 1;
                return Ok(Token::Indent);
            }
            if self.pending < 0 {
                self.pending += 1;
                self.indent_level -= 1;
                return Ok(Token::Dedent);
            }

            let Some(c) = self.peek_char() else {
                return Ok(self.eof_token());
            };

            match c {
                '#' => {
                    // Comment runs to end of line; the newline itself is kept.
                    self.consume_while(|c| c != '\n');
                }
                '"' | '\'' => return self.read_string(c),
                c if c.is_ascii_digit() => return self.read_number(),
                c if c.is_alphabetic() || c == '_' => return Ok(self.read_identifier()),
                c if is_compare_symbol(c) => return Ok(self.read_compare_operator(c)),
                c if is_symbol(c) => {
                    self.consume_char();
                    return Ok(Token::Char(c));
                }
                '\n' => {
                    self.consume_char();
                    if matches!(self.current, Token::Newline) || !self.started {
                        // Blank lines and leading newlines produce nothing.
                        continue;
                    }
                    self.consume_while(|c| c == '\n');
                    if self.peek_char() != Some(' ') && self.indent_level > 0 {
                        // Next line starts at column zero: close every open block.
                        self.pending = -(self.indent_level as i64);
                    }
                    return Ok(Token::Newline);
                }
                ' ' => {
                    if matches!(self.current, Token::Newline) {
                        let new_indent = self.count_indentation();
                        self.pending = new_indent as i64 - self.indent_level as i64;
                    } else {
                        // Mid-line whitespace is insignificant.
                        self.consume_while(|c| c == ' ');
                    }
                }
                '\t' if matches!(self.current, Token::Newline) => {
                    return Err(LexError::TabIndentation { position: self.pos });
                }
                _ => {
                    return Err(LexError::UnexpectedCharacter {
                        character: c,
                        position: self.pos,
                    });
                }
            }
        }
    }

    fn eof_token(&mut self) -> Token {
        if matches!(self.current, Token::Eof) && self.started {
            return Token::Eof;
        }
        // All open blocks close before the stream ends.
        if self.indent_level > 0 {
            self.indent_level -= 1;
            return Token::Dedent;
        }
        if self.started && !matches!(self.current, Token::Newline | Token::Dedent | Token::Eof) {
            return Token::Newline;
        }
        Token::Eof
    }

    /// Measures the indentation of the line that starts at the current position.
    ///
    /// Indentation is counted in units of two spaces, remainder ignored. A line
    /// holding nothing but spaces opens no block.
    fn count_indentation(&mut self) -> usize {
        let spaces = self.consume_while(|c| c == ' ');
        if self.peek_char() == Some('\n') {
            return 0;
        }
        spaces / 2
    }

    fn read_string(&mut self, quote: char) -> LexResult<Token> {
        let start = self.pos;
        self.consume_char(); // opening quote
        let mut value = String::new();
        loop {
            let Some(c) = self.consume_char() else {
                return Err(LexError::UnterminatedString { position: start });
            };
            if c == quote {
                break;
            }
            if c == '\\' {
                let Some(escaped) = self.consume_char() else {
                    return Err(LexError::UnterminatedString { position: start });
                };
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\'' => value.push('\''),
                    '"' => value.push('"'),
                    '\\' => value.push('\\'),
                    // Unrecognized escapes are dropped.
                    _ => {}
                }
            } else {
                value.push(c);
            }
        }
        Ok(Token::String(value))
    }

    fn read_number(&mut self) -> LexResult<Token> {
        let start = self.pos;
        self.consume_while(|c| c.is_ascii_digit());
        let literal = &self.input[start..self.pos];
        let value = literal
            .parse::<i64>()
            .map_err(|_| LexError::InvalidIntegerLiteral {
                literal: literal.to_string(),
                position: start,
            })?;
        Ok(Token::Number(value))
    }

    fn read_identifier(&mut self) -> Token {
        let start = self.pos;
        self.consume_while(|c| {
            !c.is_whitespace() && c != '#' && !is_symbol(c) && !is_compare_symbol(c)
        });
        let literal = &self.input[start..self.pos];
        match literal {
            "class" => Token::Class,
            "return" => Token::Return,
            "if" => Token::If,
            "else" => Token::Else,
            "def" => Token::Def,
            "print" => Token::Print,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "None" => Token::None,
            "True" => Token::True,
            "False" => Token::False,
            _ => Token::Id(literal.to_string()),
        }
    }

    fn read_compare_operator(&mut self, first: char) -> Token {
        self.consume_char();
        if self.peek_char() == Some('=') {
            self.consume_char();
            match first {
                '=' => Token::Eq,
                '!' => Token::NotEq,
                '<' => Token::LessOrEq,
                _ => Token::GreaterOrEq,
            }
        } else {
            Token::Char(first)
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn consume_while<P>(&mut self, keep_predicate: P) -> usize
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !keep_predicate(c) {
                break;
            }
            self.consume_char();
        }
        self.pos - start
    }
}

/// Tokenizes the whole input, including the final `Eof`.
pub fn tokenize(input: &str) -> LexResult<Vec<Token>> {
    let mut lexer = Lexer::new(input)?;
    let mut tokens = vec![lexer.current_token().clone()];
    while !matches!(tokens.last(), Some(Token::Eof)) {
        tokens.push(lexer.next_token()?);
    }
    Ok(tokens)
}
