use log::debug;

use crate::error::{syntax_error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Identifier(String),

    // Keywords, matched case-insensitively.
    If,
    Else,
    While,
    For,
    Function,
    Return,
    Var,
    Const,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    And,
    Or,
    Not,
    True,
    False,
    Null,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,

    Equal,
    PlusEqual,
    MinusEqual,

    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    Arrow,

    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftSquare,
    RightSquare,
    Comma,
    Dot,
    Colon,
    Semicolon,

    // Statements have no mandatory terminator, so newlines are real tokens
    // the parser uses as statement boundaries.
    NewLine,
    Eof,
}

impl TokenKind {
    /// Canonical source text for a token, used by the minifier and the REPL
    /// syntax highlighter.
    pub fn text(&self) -> String {
        match self {
            TokenKind::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            TokenKind::String(s) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('"', "\\\"")
                    .replace('\n', "\\n")
                    .replace('\t', "\\t")
                    .replace('\r', "\\r");
                format!("\"{}\"", escaped)
            }
            TokenKind::Identifier(name) => name.clone(),
            TokenKind::If => "if".to_string(),
            TokenKind::Else => "else".to_string(),
            TokenKind::While => "while".to_string(),
            TokenKind::For => "for".to_string(),
            TokenKind::Function => "function".to_string(),
            TokenKind::Return => "return".to_string(),
            TokenKind::Var => "var".to_string(),
            TokenKind::Const => "const".to_string(),
            TokenKind::Break => "break".to_string(),
            TokenKind::Continue => "continue".to_string(),
            TokenKind::Switch => "switch".to_string(),
            TokenKind::Case => "case".to_string(),
            TokenKind::Default => "default".to_string(),
            TokenKind::And => "and".to_string(),
            TokenKind::Or => "or".to_string(),
            TokenKind::Not => "not".to_string(),
            TokenKind::True => "true".to_string(),
            TokenKind::False => "false".to_string(),
            TokenKind::Null => "null".to_string(),
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Star => "*".to_string(),
            TokenKind::Slash => "/".to_string(),
            TokenKind::Percent => "%".to_string(),
            TokenKind::Caret => "^".to_string(),
            TokenKind::Equal => "=".to_string(),
            TokenKind::PlusEqual => "+=".to_string(),
            TokenKind::MinusEqual => "-=".to_string(),
            TokenKind::EqualEqual => "==".to_string(),
            TokenKind::BangEqual => "!=".to_string(),
            TokenKind::Less => "<".to_string(),
            TokenKind::LessEqual => "<=".to_string(),
            TokenKind::Greater => ">".to_string(),
            TokenKind::GreaterEqual => ">=".to_string(),
            TokenKind::Arrow => "->".to_string(),
            TokenKind::LeftParen => "(".to_string(),
            TokenKind::RightParen => ")".to_string(),
            TokenKind::LeftBrace => "{".to_string(),
            TokenKind::RightBrace => "}".to_string(),
            TokenKind::LeftSquare => "[".to_string(),
            TokenKind::RightSquare => "]".to_string(),
            TokenKind::Comma => ",".to_string(),
            TokenKind::Dot => ".".to_string(),
            TokenKind::Colon => ":".to_string(),
            TokenKind::Semicolon => ";".to_string(),
            TokenKind::NewLine => "\n".to_string(),
            TokenKind::Eof => "".to_string(),
        }
    }

    /// True for tokens whose rendering must not be glued to an adjacent
    /// word-like token.
    pub fn is_wordy(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_)
                | TokenKind::Identifier(_)
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Function
                | TokenKind::Return
                | TokenKind::Var
                | TokenKind::Const
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Switch
                | TokenKind::Case
                | TokenKind::Default
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Not
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

impl Token {
    pub fn new(kind: TokenKind, line: u32, column: u32) -> Self {
        Token { kind, line, column }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.run();
    if let Err(err) = &tokens {
        debug!("{}", err);
    }
    tokens
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn run(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        tokens.push(Token::new(TokenKind::Eof, self.line, self.column));
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Returns the next token, or `None` once the input is exhausted.
    fn next_token(&mut self) -> Result<Option<Token>> {
        // Skip whitespace and comments; newlines are significant.
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r') => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }

        let (line, column) = (self.line, self.column);
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        // Two-character operators need one character of lookahead.
        if let Some(next) = self.peek_at(1) {
            let kind = match (c, next) {
                ('=', '=') => Some(TokenKind::EqualEqual),
                ('!', '=') => Some(TokenKind::BangEqual),
                ('<', '=') => Some(TokenKind::LessEqual),
                ('>', '=') => Some(TokenKind::GreaterEqual),
                ('-', '>') => Some(TokenKind::Arrow),
                ('+', '=') => Some(TokenKind::PlusEqual),
                ('-', '=') => Some(TokenKind::MinusEqual),
                _ => None,
            };
            if let Some(kind) = kind {
                self.advance();
                self.advance();
                return Ok(Some(Token::new(kind, line, column)));
            }
        }

        let kind = match c {
            '\n' => Some(TokenKind::NewLine),
            '(' => Some(TokenKind::LeftParen),
            ')' => Some(TokenKind::RightParen),
            '{' => Some(TokenKind::LeftBrace),
            '}' => Some(TokenKind::RightBrace),
            '[' => Some(TokenKind::LeftSquare),
            ']' => Some(TokenKind::RightSquare),
            ',' => Some(TokenKind::Comma),
            '.' => Some(TokenKind::Dot),
            ':' => Some(TokenKind::Colon),
            ';' => Some(TokenKind::Semicolon),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '%' => Some(TokenKind::Percent),
            '^' => Some(TokenKind::Caret),
            '=' => Some(TokenKind::Equal),
            '<' => Some(TokenKind::Less),
            '>' => Some(TokenKind::Greater),
            _ => None,
        };

        if let Some(kind) = kind {
            self.advance();
            return Ok(Some(Token::new(kind, line, column)));
        }

        if c == '"' || c == '\'' {
            return self.string(c).map(Some);
        }

        if c.is_ascii_digit() {
            return self.number().map(Some);
        }

        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(Some(self.identifier()));
        }

        syntax_error(format!("unexpected character '{}'", c), line, column)
    }

    fn string(&mut self, quote: char) -> Result<Token> {
        let (line, column) = (self.line, self.column);
        self.advance(); // opening quote

        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return syntax_error("unterminated string literal", line, column);
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek() {
                        None => {
                            return syntax_error("unterminated string literal", line, column);
                        }
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        // Unknown escapes keep the character itself.
                        Some(other) => other,
                    };
                    value.push(escaped);
                    self.advance();
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }

        Ok(Token::new(TokenKind::String(value), line, column))
    }

    fn number(&mut self) -> Result<Token> {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();

        while let Some(c) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            text.push(c);
            self.advance();
        }

        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                text.push(c);
                self.advance();
            }
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self
                .peek_at(1 + sign_offset)
                .is_some_and(|c| c.is_ascii_digit())
            {
                text.push('e');
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.advance();
                }
                while let Some(c) = self.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    text.push(c);
                    self.advance();
                }
            }
        }

        match text.parse::<f64>() {
            Ok(n) => Ok(Token::new(TokenKind::Number(n), line, column)),
            Err(_) => syntax_error(format!("invalid number literal '{}'", text), line, column),
        }
    }

    fn identifier(&mut self) -> Token {
        let (line, column) = (self.line, self.column);
        let mut name = String::new();

        while let Some(c) = self.peek() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            self.advance();
        }

        let kind = match name.to_ascii_lowercase().as_str() {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "var" => TokenKind::Var,
            "const" => TokenKind::Const,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier(name),
        };

        Token::new(kind, line, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn kinds(source: &str) -> Result<Vec<TokenKind>> {
        Ok(tokenize(source)?.into_iter().map(|t| t.kind).collect())
    }

    #[test]
    fn test_empty_and_whitespace_input() -> Result<()> {
        assert_eq!(kinds("")?, vec![TokenKind::Eof]);
        assert_eq!(kinds("   \t  \r ")?, vec![TokenKind::Eof]);
        Ok(())
    }

    #[test]
    fn test_newlines_are_tokens() -> Result<()> {
        assert_eq!(
            kinds("1\n2")?,
            vec![
                TokenKind::Number(1.0),
                TokenKind::NewLine,
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ]
        );
        Ok(())
    }

    #[test_case("42", 42.0)]
    #[test_case("3.14", 3.14)]
    #[test_case("1.5e10", 1.5e10)]
    #[test_case("2e-3", 2e-3)]
    #[test_case("7E+2", 700.0)]
    fn test_number_forms(source: &str, expected: f64) {
        let tokens = tokenize(source).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Number(expected));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_number_then_member_access() -> Result<()> {
        // The dot only belongs to the number when a digit follows.
        assert_eq!(
            kinds("1.x")?,
            vec![
                TokenKind::Number(1.0),
                TokenKind::Dot,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Eof,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_string_escapes() -> Result<()> {
        assert_eq!(
            kinds(r#""a\nb\t\\\"q\"""#)?,
            vec![
                TokenKind::String("a\nb\t\\\"q\"".to_string()),
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds(r#"'it\'s'"#)?,
            vec![TokenKind::String("it's".to_string()), TokenKind::Eof]
        );
        Ok(())
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("\"abc").unwrap_err();
        assert_eq!(err.kind(), "SyntaxError");
        assert_eq!(err.position(), Some((1, 1)));

        assert!(tokenize("'abc\ndef'").is_err());
    }

    #[test]
    fn test_two_char_operators() -> Result<()> {
        assert_eq!(
            kinds("== != <= >= -> += -=")?,
            vec![
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::Arrow,
                TokenKind::PlusEqual,
                TokenKind::MinusEqual,
                TokenKind::Eof,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_keywords_case_insensitive() -> Result<()> {
        assert_eq!(
            kinds("IF Else wHiLe FUNCTION")?,
            vec![
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::Function,
                TokenKind::Eof,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_comments_discarded() -> Result<()> {
        assert_eq!(
            kinds("1 // the rest is ignored == !=\n2")?,
            vec![
                TokenKind::Number(1.0),
                TokenKind::NewLine,
                TokenKind::Number(2.0),
                TokenKind::Eof,
            ]
        );
        Ok(())
    }

    #[test]
    fn test_line_column_tracking() -> Result<()> {
        let tokens = tokenize("var x = 1\n  x += 2")?;
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1)); // var
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5)); // x
        assert_eq!((tokens[2].line, tokens[2].column), (1, 7)); // =
        assert_eq!((tokens[3].line, tokens[3].column), (1, 9)); // 1
        assert_eq!((tokens[4].line, tokens[4].column), (1, 10)); // newline
        assert_eq!((tokens[5].line, tokens[5].column), (2, 3)); // x
        assert_eq!((tokens[6].line, tokens[6].column), (2, 5)); // +=
        Ok(())
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("var x = @").unwrap_err();
        assert_eq!(err.kind(), "SyntaxError");
        assert_eq!(err.position(), Some((1, 9)));

        // A lone '!' is only valid as part of '!='.
        assert!(tokenize("!true").is_err());
    }
}
