// rill-embed - Embedding API for Rill
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! # rill-embed
//!
//! A high-level embedding API for the Rill scripting language.
//!
//! Rill lets a host application sandbox small, readable business-rule
//! scripts: load a source unit, bind native functions and data as globals,
//! call script functions, and bound execution with an instruction limit.
//!
//! ## Quick Start
//!
//! ```
//! use rill_embed::{Engine, to_value};
//!
//! let mut engine = Engine::new();
//! engine
//!     .load_source("rules", "func discount($total) { if ($total > 100) { return 10 } return 0 }")
//!     .unwrap();
//! let off = engine.call("discount", &[to_value(250.0_f64)]).unwrap();
//! assert_eq!(off.to_string(), "10");
//! ```
//!
//! ## Limits and tracing
//!
//! ```
//! use rill_embed::Engine;
//!
//! let mut engine = Engine::new();
//! engine.load_source("inline", "func spin() { while (true) {} }").unwrap();
//! engine.set_instruction_limit(1000);
//! assert!(engine.call("spin", &[]).is_err());
//! ```

mod convert;
mod engine;
mod error;

pub use convert::{
    FromRill, IntoRill, MarshalOptions, from_value, to_value, to_value_options,
    to_value_read_only,
};
pub use engine::Engine;
pub use error::{EmbedError, Result};

// Re-export core types for convenience
pub use rill_vm::{FrameTrace, RuntimeError, TraceEvent, TraceHook, Value};
