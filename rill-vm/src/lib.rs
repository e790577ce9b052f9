// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Bytecode compiler and stack-based virtual machine for Rill.
//!
//! This crate is the back half of the pipeline: it lowers the tree produced
//! by `rill-parser` into per-function prototypes with byte-encoded chunks,
//! and executes them on a frame-based interpreter with closures, iterator
//! values and an injected builtin-opcode registry.
//!
//! ```
//! use std::rc::Rc;
//! use rill_parser::Parser;
//! use rill_vm::{BuiltinRegistry, Value, Vm, compile};
//!
//! let mut parser = Parser::from_source("func add($a, $b) { return $a + $b }");
//! let program = parser.parse_program();
//! assert!(parser.errors().is_empty());
//!
//! let builtins = Rc::new(BuiltinRegistry::standard());
//! let module = compile(&program, "inline", &builtins).unwrap();
//! let mut vm = Vm::new(builtins);
//! vm.load_module(&module);
//! let result = vm.call("add", &[Value::Number(2.0), Value::Number(3.0)]).unwrap();
//! assert_eq!(result, Value::Number(5.0));
//! ```

pub mod builtins;
pub mod chunk;
mod clone;
pub mod compiler;
pub mod disasm;
pub mod error;
pub mod opcode;
pub mod value;
pub mod vm;

pub use builtins::{BuiltinHandler, BuiltinRegistry, BuiltinSpec};
pub use chunk::{Chunk, Constant, LineEntry, Module, Prototype, UpvalueDesc};
pub use compiler::{CompileError, compile};
pub use error::{FrameTrace, RuntimeError, TraceEvent, TraceHook};
pub use opcode::Op;
pub use value::{ArrayRef, Function, NativeFn, ObjectRef, Value, ValueIter};
pub use vm::{DEFAULT_MAX_FRAMES, Vm};
