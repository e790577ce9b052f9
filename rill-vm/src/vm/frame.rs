// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Call frames.

use std::rc::Rc;

use crate::value::{Function, Value};

/// The activation record for one compiled function call.
#[derive(Debug)]
pub struct Frame {
    /// The function being executed.
    pub func: Rc<Function>,
    /// Instruction pointer into the prototype's chunk.
    pub ip: usize,
    /// Local slots, sized to the prototype's max-locals. Arguments are
    /// copied in at call time; the rest start null.
    pub locals: Vec<Value>,
    /// Operand-stack height at frame entry; the stack is truncated back to
    /// this on return.
    pub base: usize,
    /// Offset of the last dispatched instruction, for diagnostics.
    pub last_op: usize,
}

impl Frame {
    /// Create a frame for a function at the given stack base.
    pub fn new(func: Rc<Function>, base: usize) -> Self {
        let locals = vec![Value::Null; func.max_locals()];
        Frame {
            func,
            ip: 0,
            locals,
            base,
            last_op: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn test_frame() -> Self {
        Frame::new(
            Rc::new(Function::from_native("test", "test", Rc::new(|_| Ok(Value::Null)))),
            0,
        )
    }
}
