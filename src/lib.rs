pub mod ast;
pub mod cli;
pub mod compiler;
pub mod environment;
pub mod error;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod tokenizer;
