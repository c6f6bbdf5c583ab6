//! The orchestration layer: composes tokenizer, parser, and interpreter,
//! and is the only entry point hosts call into. Failures from any stage
//! surface through the unified error taxonomy in [`crate::error`].

use crate::ast::Program;
use crate::error::{Error, Result};
use crate::parser::parse;
use crate::runtime::{ContextState, Interpreter, Limits, Value};
use crate::tokenizer::{tokenize, Token, TokenKind};
use log::debug;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    pub source_map: bool,
    pub minify: bool,
    pub include_runtime_wrapper: bool,
}

/// One statement's position in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMapping {
    pub statement: usize,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug)]
pub struct Artifact {
    pub program: Program,
    /// Comment- and whitespace-stripped rendering, when requested.
    pub rendered: Option<String>,
    pub source_map: Option<Vec<SourceMapping>>,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub artifact: Option<Artifact>,
    pub errors: Vec<Error>,
    pub warnings: Vec<String>,
}

/// Validates source without executing it. Stops at the first error, per
/// the normal (non-recovery) parse path.
pub fn compile(source: &str, options: &CompileOptions) -> CompileOutput {
    let tokens = match tokenize(source) {
        Ok(tokens) => tokens,
        Err(err) => {
            return CompileOutput {
                artifact: None,
                errors: vec![err],
                warnings: Vec::new(),
            }
        }
    };

    let program = match parse(&tokens) {
        Ok(program) => program,
        Err(err) => {
            return CompileOutput {
                artifact: None,
                errors: vec![err],
                warnings: Vec::new(),
            }
        }
    };

    let mut warnings = Vec::new();
    if program.body.is_empty() {
        warnings.push("source contains no statements".to_string());
    }

    let rendered = if options.minify || options.include_runtime_wrapper {
        let mut text = render_minified(&tokens);
        if options.include_runtime_wrapper {
            text = format!("(function() {{\n{}\n}})()", text);
        }
        Some(text)
    } else {
        None
    };

    let source_map = options.source_map.then(|| {
        program
            .body
            .iter()
            .enumerate()
            .map(|(statement, stmt)| SourceMapping {
                statement,
                line: stmt.pos.line,
                column: stmt.pos.column,
            })
            .collect()
    });

    CompileOutput {
        artifact: Some(Artifact {
            program,
            rendered,
            source_map,
        }),
        errors: Vec::new(),
        warnings,
    }
}

/// Re-renders a token stream with comments and indentation stripped and
/// consecutive blank lines collapsed.
fn render_minified(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev_wordy = false;
    let mut prev_newline = true; // swallow leading newlines

    for token in tokens {
        match &token.kind {
            TokenKind::Eof => break,
            TokenKind::NewLine => {
                if !prev_newline {
                    out.push('\n');
                    prev_newline = true;
                    prev_wordy = false;
                }
            }
            kind => {
                if prev_wordy && kind.is_wordy() {
                    out.push(' ');
                }
                out.push_str(&kind.text());
                prev_wordy = kind.is_wordy();
                prev_newline = false;
            }
        }
    }

    out.trim_end().to_string()
}

/// Host-facing configuration for one execution context.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub timeout_ms: u64,
    pub memory_limit_bytes: usize,
    pub max_output_len: usize,
    pub preset_globals: Vec<(String, Value)>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        let limits = Limits::default();
        ExecConfig {
            timeout_ms: limits.timeout.as_millis() as u64,
            memory_limit_bytes: limits.memory_limit_bytes,
            max_output_len: limits.max_output_len,
            preset_globals: Vec::new(),
        }
    }
}

impl ExecConfig {
    fn limits(&self) -> Limits {
        Limits {
            timeout: Duration::from_millis(self.timeout_ms),
            memory_limit_bytes: self.memory_limit_bytes,
            max_output_len: self.max_output_len,
            ..Limits::default()
        }
    }
}

/// Outcome of one execution: whatever the program printed before finishing
/// or failing, the value of its last expression, and the failure if any.
/// Partial output is never rolled back.
#[derive(Debug)]
pub struct Execution {
    pub output: String,
    pub value: Option<Value>,
    pub error: Option<Error>,
}

impl Execution {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// One isolated execution context. Independently constructed executors
/// share nothing.
pub struct Executor {
    interpreter: Interpreter,
}

impl Executor {
    pub fn new(config: ExecConfig) -> Self {
        let interpreter = Interpreter::new(config.limits());
        for (name, value) in config.preset_globals {
            interpreter.set_global(name, value);
        }
        Executor { interpreter }
    }

    /// Runs source against this context's persistent global scope.
    /// Never panics; stage failures come back classified in `error`.
    pub fn execute(&mut self, source: &str) -> Execution {
        let result = tokenize(source)
            .and_then(|tokens| parse(&tokens))
            .and_then(|program| self.interpreter.run(&program));

        let output = self.interpreter.take_output();
        match result {
            Ok(value) => Execution {
                output,
                value,
                error: None,
            },
            Err(error) => {
                debug!("execution failed: {}", error);
                Execution {
                    output,
                    value: None,
                    error: Some(error),
                }
            }
        }
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.interpreter.set_global(name, value);
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.interpreter.get_global(name)
    }

    pub fn state(&self) -> ContextState {
        self.interpreter.state()
    }

    /// Resets to a builtins-only global scope, keeping the context usable.
    pub fn reset(&mut self) {
        self.interpreter.reset();
    }

    /// Releases the context's environment and buffers. Idempotent; later
    /// `execute` calls fail with a `RuntimeError`.
    pub fn cleanup(&mut self) {
        self.interpreter.cleanup();
    }
}

/// One-shot execution in a fresh context.
pub fn execute(source: &str, config: ExecConfig) -> Execution {
    Executor::new(config).execute(source)
}

#[derive(Debug)]
pub struct EvalResult {
    pub output: String,
    pub value: Option<Value>,
    pub errors: Vec<Error>,
}

/// A REPL session: one persistent global scope plus an append-only input
/// history. A failing line never ends the session.
pub struct Session {
    executor: Executor,
    history: Vec<String>,
}

impl Session {
    pub fn new() -> Self {
        Session::with_config(ExecConfig::default())
    }

    pub fn with_config(config: ExecConfig) -> Self {
        Session {
            executor: Executor::new(config),
            history: Vec::new(),
        }
    }

    /// Evaluates one input against the persistent scope. The input is
    /// recorded in history whether or not it succeeds, and errors are
    /// returned rather than propagated.
    pub fn evaluate(&mut self, input: &str) -> EvalResult {
        self.history.push(input.to_string());
        let execution = self.executor.execute(input);
        EvalResult {
            output: execution.output,
            value: execution.value,
            errors: execution.error.into_iter().collect(),
        }
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.executor.set_variable(name, value);
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.executor.get_variable(name)
    }

    /// Resets bindings to builtins only. History is untouched.
    pub fn clear_context(&mut self) {
        self.executor.reset();
    }

    /// Empties the input log. Bindings are untouched.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_reports_syntax_errors() {
        let output = compile("var = 1", &CompileOptions::default());
        assert!(output.artifact.is_none());
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].kind(), "SyntaxError");

        let output = compile("\"unterminated", &CompileOptions::default());
        assert_eq!(output.errors[0].kind(), "SyntaxError");
    }

    #[test]
    fn test_compile_never_executes() {
        let output = compile("boom()", &CompileOptions::default());
        assert!(output.errors.is_empty(), "undefined calls are a runtime concern");
        assert!(output.artifact.is_some());
    }

    #[test]
    fn test_compile_warns_on_empty_source() {
        let output = compile("  \n // nothing here\n", &CompileOptions::default());
        assert!(output.errors.is_empty());
        assert_eq!(output.warnings.len(), 1);
    }

    #[test]
    fn test_minified_rendering() {
        let options = CompileOptions {
            minify: true,
            ..CompileOptions::default()
        };
        let output = compile("var  x  =  1  // answer\n\n\nprint( x )", &options);
        let artifact = output.artifact.unwrap();
        assert_eq!(artifact.rendered.as_deref(), Some("var x=1\nprint(x)"));
    }

    #[test]
    fn test_runtime_wrapper() {
        let options = CompileOptions {
            include_runtime_wrapper: true,
            ..CompileOptions::default()
        };
        let output = compile("print(1)", &options);
        let rendered = output.artifact.unwrap().rendered.unwrap();
        assert!(rendered.starts_with("(function() {"));
        assert!(rendered.ends_with("})()"));
    }

    #[test]
    fn test_source_map_positions() {
        let options = CompileOptions {
            source_map: true,
            ..CompileOptions::default()
        };
        let output = compile("var x = 1\n  print(x)", &options);
        let map = output.artifact.unwrap().source_map.unwrap();
        assert_eq!(
            map,
            vec![
                SourceMapping {
                    statement: 0,
                    line: 1,
                    column: 1
                },
                SourceMapping {
                    statement: 1,
                    line: 2,
                    column: 3
                },
            ]
        );
    }

    #[test]
    fn test_execute_classifies_stage_failures() {
        let result = execute("var = ", ExecConfig::default());
        assert_eq!(result.error.as_ref().unwrap().kind(), "SyntaxError");

        let result = execute("missing", ExecConfig::default());
        assert_eq!(result.error.as_ref().unwrap().kind(), "RuntimeError");

        let result = execute("eval(\"1\")", ExecConfig::default());
        assert_eq!(result.error.as_ref().unwrap().kind(), "SecurityError");

        let result = execute(
            "while (true) {}",
            ExecConfig {
                timeout_ms: 50,
                ..ExecConfig::default()
            },
        );
        assert_eq!(result.error.as_ref().unwrap().kind(), "TimeoutError");
    }

    #[test]
    fn test_execute_returns_partial_output_on_failure() {
        let result = execute("println(\"kept\")\nboom()", ExecConfig::default());
        assert_eq!(result.output, "kept\n");
        assert!(result.error.is_some());
    }

    #[test]
    fn test_preset_globals() {
        let config = ExecConfig {
            preset_globals: vec![("limit".to_string(), Value::Number(3.0))],
            ..ExecConfig::default()
        };
        let result = execute("limit * 2", config);
        assert!(result.is_ok());
        assert_eq!(result.value, Some(Value::Number(6.0)));
    }

    #[test]
    fn test_executors_are_isolated() {
        let mut a = Executor::new(ExecConfig::default());
        let mut b = Executor::new(ExecConfig::default());
        a.execute("var x = 10");
        b.execute("var x = 20");
        assert_eq!(a.get_variable("x"), Some(Value::Number(10.0)));
        assert_eq!(b.get_variable("x"), Some(Value::Number(20.0)));

        a.cleanup();
        a.cleanup(); // idempotent
        assert_eq!(a.state(), ContextState::Cleaned);
        assert!(a.execute("1").error.is_some());
        assert_eq!(b.get_variable("x"), Some(Value::Number(20.0)));
    }

    #[test]
    fn test_session_persists_bindings_across_lines() {
        let mut session = Session::new();
        assert!(session.evaluate("var x = 2").errors.is_empty());
        let result = session.evaluate("x * x");
        assert!(result.errors.is_empty());
        assert_eq!(result.value, Some(Value::Number(4.0)));
    }

    #[test]
    fn test_session_survives_failing_lines() {
        let mut session = Session::new();
        session.evaluate("var x = 1");
        let result = session.evaluate("x +");
        assert_eq!(result.errors.len(), 1);
        // The session is still usable and the failed input is in history.
        let result = session.evaluate("x + 1");
        assert_eq!(result.value, Some(Value::Number(2.0)));
        assert_eq!(session.history(), &["var x = 1", "x +", "x + 1"]);
    }

    #[test]
    fn test_session_variable_access() {
        let mut session = Session::new();
        session.set_variable("seed", Value::Number(7.0));
        let result = session.evaluate("seed + 1");
        assert_eq!(result.value, Some(Value::Number(8.0)));
        assert_eq!(session.get_variable("seed"), Some(Value::Number(7.0)));
    }

    #[test]
    fn test_clear_context_and_history_are_independent() {
        let mut session = Session::new();
        session.evaluate("var x = 1");
        session.clear_context();
        // Bindings are gone, history is not.
        assert!(session.get_variable("x").is_none());
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.evaluate("x").errors.len(), 1);

        // Builtins came back after the reset.
        assert!(session.evaluate("len([1])").errors.is_empty());

        session.evaluate("var y = 2");
        session.clear_history();
        assert!(session.history().is_empty());
        assert_eq!(session.get_variable("y"), Some(Value::Number(2.0)));
    }
}
