// rill-parser - Lexer and parser for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Lexer and parser for Rill source code.
//!
//! Rill is a small newline-significant scripting language. This crate covers
//! the front half of its pipeline: source text to tokens ([`lexer`]) and
//! tokens to a span-annotated tree ([`parser`], [`ast`]). Compilation and
//! execution live in the `rill-vm` crate.
//!
//! ```
//! use rill_parser::Parser;
//!
//! let mut parser = Parser::from_source("func add($a, $b) { return $a + $b }");
//! let program = parser.parse_program();
//! assert!(parser.errors().is_empty());
//! assert_eq!(program.statements.len(), 1);
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::Program;
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Position, Span, Token, TokenKind};
