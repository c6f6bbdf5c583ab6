use nu_ansi_term::{Color, Style};
use reedline::{
    Highlighter, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    StyledText, ValidationResult, Validator,
};
use std::borrow::Cow;

use crate::tokenizer::{tokenize, TokenKind};

#[derive(Clone)]
pub struct REPLPrompt;

impl Prompt for REPLPrompt {
    fn render_prompt_left(&self) -> Cow<str> {
        Cow::Borrowed("plscript")
    }

    fn render_prompt_right(&self) -> Cow<str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _edit_mode: PromptEditMode) -> Cow<str> {
        Cow::Borrowed("❯ ")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<str> {
        Cow::Borrowed("  ... ")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!(
            "({}reverse-search: {}) ",
            prefix, history_search.term
        ))
    }
}

pub struct REPLValidator;

impl Validator for REPLValidator {
    fn validate(&self, line: &str) -> ValidationResult {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            return ValidationResult::Complete;
        }

        let mut delimiters = Vec::new();
        let mut in_string: Option<char> = None;
        let mut escaped = false;

        for c in line.chars() {
            if let Some(quote) = in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_string = None;
                }
                continue;
            }

            match c {
                '"' | '\'' => in_string = Some(c),
                '{' | '(' | '[' => delimiters.push(c),
                '}' => {
                    if delimiters.pop() != Some('{') {
                        return ValidationResult::Complete;
                    }
                }
                ')' => {
                    if delimiters.pop() != Some('(') {
                        return ValidationResult::Complete;
                    }
                }
                ']' => {
                    if delimiters.pop() != Some('[') {
                        return ValidationResult::Complete;
                    }
                }
                _ => {}
            }
        }

        if delimiters.is_empty() {
            ValidationResult::Complete
        } else {
            ValidationResult::Incomplete
        }
    }
}

pub static KEYWORD_COLOR: Color = Color::LightBlue;
pub static LITERAL_COLOR: Color = Color::Yellow;
pub static DEFAULT_COLOR: Color = Color::White;
pub static OPERATOR_COLOR: Color = Color::DarkGray;

pub struct SyntaxHighlighter;

impl Highlighter for SyntaxHighlighter {
    /// Slices the buffer by token line/column so spellings that differ from
    /// the canonical rendering (single-quoted strings, `1.50`, `WHILE`) keep
    /// their color. Whitespace and comments between tokens stay unstyled.
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled_text = StyledText::new();

        let tokens = match tokenize(line) {
            Ok(t) => t,
            Err(_) => {
                styled_text.push((Style::new().fg(DEFAULT_COLOR), line.to_string()));
                return styled_text;
            }
        };

        let chars: Vec<char> = line.chars().collect();

        // Char index of each source line's start, for mapping token
        // positions onto the buffer.
        let mut line_starts = vec![0];
        for (i, c) in chars.iter().enumerate() {
            if *c == '\n' {
                line_starts.push(i + 1);
            }
        }
        let offset_of = |line_no: u32, column: u32| {
            (line_starts[line_no as usize - 1] + column as usize - 1).min(chars.len())
        };

        let mut rendered = 0;
        for (i, token) in tokens.iter().enumerate() {
            if matches!(token.kind, TokenKind::Eof) {
                break;
            }
            if matches!(token.kind, TokenKind::NewLine) {
                continue;
            }

            let start = offset_of(token.line, token.column);
            let next = &tokens[i + 1];
            let span_end = offset_of(next.line, next.column);

            // Unstyled gap before the token (whitespace, earlier newlines).
            if start > rendered {
                let gap: String = chars[rendered..start].iter().collect();
                styled_text.push((Style::new().fg(DEFAULT_COLOR), gap));
            }

            // The span runs to the next token and may trail whitespace or a
            // comment that is not part of the lexeme.
            let lexeme_end = match &token.kind {
                TokenKind::String(_) => {
                    let quote = chars[start];
                    let mut j = start + 1;
                    while j < span_end {
                        match chars[j] {
                            c if c == quote => {
                                j += 1;
                                break;
                            }
                            '\\' => j += 2,
                            _ => j += 1,
                        }
                    }
                    j.min(span_end)
                }
                _ => {
                    let mut j = span_end;
                    for k in start..span_end.saturating_sub(1) {
                        if chars[k] == '/' && chars[k + 1] == '/' {
                            j = k;
                            break;
                        }
                    }
                    while j > start && chars[j - 1].is_whitespace() {
                        j -= 1;
                    }
                    j
                }
            };

            let color = match &token.kind {
                TokenKind::If
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
                | TokenKind::Null => KEYWORD_COLOR,
                TokenKind::String(_) | TokenKind::Number(_) => LITERAL_COLOR,
                TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::Caret
                | TokenKind::Equal
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::EqualEqual
                | TokenKind::BangEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual
                | TokenKind::Arrow
                | TokenKind::LeftParen
                | TokenKind::RightParen
                | TokenKind::LeftBrace
                | TokenKind::RightBrace
                | TokenKind::LeftSquare
                | TokenKind::RightSquare
                | TokenKind::Comma
                | TokenKind::Dot
                | TokenKind::Colon
                | TokenKind::Semicolon => OPERATOR_COLOR,
                _ => DEFAULT_COLOR,
            };

            let lexeme: String = chars[start..lexeme_end].iter().collect();
            styled_text.push((Style::new().fg(color), lexeme));
            rendered = lexeme_end;
        }

        if rendered < chars.len() {
            let rest: String = chars[rendered..].iter().collect();
            styled_text.push((Style::new().fg(DEFAULT_COLOR), rest));
        }

        styled_text
    }
}
