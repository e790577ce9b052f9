// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The stack-based bytecode interpreter.
//!
//! One invocation runs on one host thread; concurrent invocations on the
//! same interpreter must be serialised externally. The interpreter is
//! re-entrant through nested script calls on its own frame stack, but a
//! native callee must not call back into the interpreter that invoked it.
//!
//! Execution state is reset at the start of every invocation, and unwound
//! again on failure, so after any complete invocation the operand stack is
//! empty and no open upvalue cells remain.

pub mod frame;
pub mod upvalue;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::builtins::BuiltinRegistry;
use crate::chunk::{Constant, Module, Prototype};
use crate::error::{FrameTrace, RuntimeError, TraceEvent, TraceHook};
use crate::opcode::{Op, is_builtin_opcode};
use crate::value::{self, Function, Value};

pub use frame::Frame;
pub use upvalue::Upvalue;

/// Default maximum call-frame depth.
pub const DEFAULT_MAX_FRAMES: usize = 256;

/// A bytecode interpreter instance: globals, operand stack, call frames and
/// resource accounting.
pub struct Vm {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) globals: HashMap<String, Value>,
    pub(crate) open_upvalues: Vec<Rc<Upvalue>>,
    pub(crate) max_frames: usize,
    pub(crate) builtins: Rc<BuiltinRegistry>,
    pub(crate) trace_hook: Option<TraceHook>,
    /// Instruction budget per invocation; 0 means unlimited.
    pub(crate) inst_limit: u64,
    pub(crate) inst_count: u64,
}

impl Vm {
    /// Create an interpreter using the given builtin registry.
    pub fn new(builtins: Rc<BuiltinRegistry>) -> Self {
        Vm {
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            max_frames: DEFAULT_MAX_FRAMES,
            builtins,
            trace_hook: None,
            inst_limit: 0,
            inst_count: 0,
        }
    }

    /// The registry this interpreter dispatches builtin opcodes through.
    pub fn builtins(&self) -> &Rc<BuiltinRegistry> {
        &self.builtins
    }

    /// Register every function of a compiled module as a callable global.
    pub fn load_module(&mut self, module: &Module) {
        for (name, proto) in &module.functions {
            self.globals.insert(
                name.clone(),
                Value::function(Function::from_proto(Rc::clone(proto))),
            );
        }
    }

    /// Bind a value into the global environment.
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Read a global by name.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Whether a callable global function exists under `name`.
    pub fn has_function(&self, name: &str) -> bool {
        matches!(self.globals.get(name), Some(Value::Function(f)) if f.is_callable())
    }

    /// Cap the number of instructions per invocation; 0 means unlimited.
    pub fn set_instruction_limit(&mut self, limit: u64) {
        self.inst_limit = limit;
    }

    /// Attach or clear the trace hook invoked before every dispatch.
    pub fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
        self.trace_hook = hook;
    }

    /// Invoke a global function by name.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let value = match self.globals.get(name) {
            Some(value) => value.clone(),
            None => return Err(RuntimeError::bare(format!("global {name} not found"))),
        };
        match value {
            Value::Function(func) => self.run(func, args),
            _ => Err(RuntimeError::bare("not a function")),
        }
    }

    /// Execute a function value with the given arguments on a fresh stack.
    ///
    /// Extra arguments are silently dropped; missing parameters stay null.
    pub fn run(&mut self, func: Rc<Function>, args: &[Value]) -> Result<Value, RuntimeError> {
        self.reset();

        if let Some(native) = func.native.clone() {
            return (*native)(args).map_err(|message| RuntimeError {
                cause: Some(message.clone()),
                ..RuntimeError::bare(message)
            });
        }
        if func.proto.is_none() {
            return Err(RuntimeError::bare("invalid function"));
        }

        if let Err(message) = self.push_frame(func) {
            return Err(RuntimeError::bare(message));
        }
        let frame = self.frames.last_mut().expect("frame just pushed");
        for (i, arg) in args.iter().enumerate() {
            if i >= frame.locals.len() {
                break;
            }
            frame.locals[i] = arg.clone();
        }

        let result = self.dispatch_loop();
        if result.is_err() {
            self.unwind();
        }
        result
    }

    /// Clear transient execution state.
    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.inst_count = 0;
    }

    /// Pop all remaining frames after a failure, closing their upvalues, so
    /// no open cells or stack slots survive the invocation.
    fn unwind(&mut self) {
        while !self.frames.is_empty() {
            let fi = self.frames.len() - 1;
            self.close_upvalues(fi);
            self.frames.pop();
        }
        self.stack.clear();
        self.open_upvalues.clear();
    }

    fn dispatch_loop(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let Some(fi) = self.frames.len().checked_sub(1) else {
                return Ok(Value::Null);
            };
            let proto = match &self.frames[fi].func.proto {
                Some(proto) => Rc::clone(proto),
                None => return Err(self.runtime_error("function missing prototype")),
            };

            let ip = self.frames[fi].ip;
            self.frames[fi].last_op = ip;
            // Running off the end behaves as NULL; RETURN.
            if ip >= proto.chunk.code.len() {
                if let Some(result) = self.finish_frame(Value::Null) {
                    return Ok(result);
                }
                continue;
            }

            let op_byte = proto.chunk.code[ip];
            self.frames[fi].ip = ip + 1;
            self.inst_count += 1;

            if let Some(hook) = self.trace_hook.clone() {
                let event = self.trace_event(fi, &proto, op_byte, ip);
                (*hook)(&event);
            }
            if self.inst_limit > 0 && self.inst_count > self.inst_limit {
                return Err(self.runtime_error("instruction limit exceeded"));
            }

            if is_builtin_opcode(op_byte) {
                let registry = Rc::clone(&self.builtins);
                let Some(spec) = registry.by_opcode(op_byte) else {
                    return Err(self.runtime_error(format!("unknown opcode {op_byte}")));
                };
                if self.stack.len() < spec.arity {
                    return Err(self.runtime_error(format!(
                        "builtin {} expects {} args, stack has {}",
                        spec.name,
                        spec.arity,
                        self.stack.len()
                    )));
                }
                if let Err(message) = (spec.handler)(self) {
                    return Err(self.runtime_error(message));
                }
                continue;
            }

            let Some(op) = Op::from_byte(op_byte) else {
                return Err(self.runtime_error(format!("unknown opcode {op_byte}")));
            };

            match op {
                Op::Nop | Op::Debug => {}

                Op::Const => {
                    let index = self.read_u16(&proto);
                    let Some(constant) = proto.chunk.consts.get(index) else {
                        return Err(self.runtime_error("constant index out of range"));
                    };
                    let value = const_to_value(constant);
                    self.push(value);
                }
                Op::Null => self.push(Value::Null),
                Op::True => self.push(Value::Bool(true)),
                Op::False => self.push(Value::Bool(false)),
                Op::Pop => {
                    self.pop();
                }

                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Eq
                | Op::NotEq
                | Op::Less
                | Op::LessEq
                | Op::Greater
                | Op::GreaterEq => {
                    let b = self.pop();
                    let a = self.pop();
                    match binary_op(op, a, b) {
                        Ok(value) => self.push(value),
                        Err(message) => return Err(self.runtime_error(message)),
                    }
                }
                Op::Neg => {
                    let v = self.pop();
                    match v {
                        Value::Number(n) => self.push(Value::Number(-n)),
                        _ => return Err(self.runtime_error("operand must be number")),
                    }
                }
                Op::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(!v.truthy()));
                }
                Op::And => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.truthy() && b.truthy()));
                }
                Op::Or => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.truthy() || b.truthy()));
                }

                Op::GetLocal => {
                    let slot = self.read_u8(&proto) as usize;
                    if slot >= self.frames[fi].locals.len() {
                        return Err(self.runtime_error("local slot out of range"));
                    }
                    let value = self.frames[fi].locals[slot].clone();
                    self.push(value);
                }
                Op::SetLocal => {
                    let slot = self.read_u8(&proto) as usize;
                    if slot >= self.frames[fi].locals.len() {
                        return Err(self.runtime_error("local slot out of range"));
                    }
                    let value = self.pop();
                    self.frames[fi].locals[slot] = value;
                }
                Op::GetUpvalue => {
                    let index = self.read_u8(&proto) as usize;
                    let func = Rc::clone(&self.frames[fi].func);
                    let cell = func.upvalues.borrow().get(index).cloned();
                    let Some(cell) = cell else {
                        return Err(self.runtime_error("upvalue slot out of range"));
                    };
                    let value = cell.get(&self.frames);
                    self.push(value);
                }
                Op::SetUpvalue => {
                    let index = self.read_u8(&proto) as usize;
                    let func = Rc::clone(&self.frames[fi].func);
                    let cell = func.upvalues.borrow().get(index).cloned();
                    let Some(cell) = cell else {
                        return Err(self.runtime_error("upvalue slot out of range"));
                    };
                    let value = self.pop();
                    cell.set(&mut self.frames, value);
                }

                Op::GetGlobal => {
                    let name = self.read_const_str(&proto, "global name")?;
                    let value = self.globals.get(&name).cloned();
                    match value {
                        Some(value) => self.push(value),
                        None => {
                            return Err(self.runtime_error(format!("global {name} not found")));
                        }
                    }
                }
                Op::SetGlobal | Op::DefineGlobal => {
                    let name = self.read_const_str(&proto, "global name")?;
                    let value = self.pop();
                    self.globals.insert(name, value);
                }

                Op::Array => {
                    let count = self.read_u16(&proto);
                    if self.stack.len() < count {
                        return Err(self.runtime_error("stack underflow building array"));
                    }
                    let elements = self.stack.split_off(self.stack.len() - count);
                    self.push(Value::array(elements));
                }
                Op::Object => {
                    let count = self.read_u16(&proto);
                    if self.stack.len() < count * 2 {
                        return Err(self.runtime_error("stack underflow building object"));
                    }
                    let flat = self.stack.split_off(self.stack.len() - count * 2);
                    let mut fields = indexmap::IndexMap::with_capacity(count);
                    for pair in flat.chunks(2) {
                        let key = match value::key_string(&pair[0]) {
                            Ok(key) => key,
                            Err(message) => return Err(self.runtime_error(message)),
                        };
                        fields.insert(key, pair[1].clone());
                    }
                    self.push(Value::object(fields));
                }
                Op::Range => {
                    let end = self.pop();
                    let start = self.pop();
                    let start = match value::expect_index(&start, None) {
                        Ok(i) => i,
                        Err(message) => return Err(self.runtime_error(message)),
                    };
                    let end = match value::expect_index(&end, None) {
                        Ok(i) => i,
                        Err(message) => return Err(self.runtime_error(message)),
                    };
                    self.push(Value::array(value::build_range(start, end)));
                }

                Op::IndexGet => {
                    let index = self.pop();
                    let target = self.pop();
                    match value::index_get(&target, &index) {
                        Ok(value) => self.push(value),
                        Err(message) => return Err(self.runtime_error(message)),
                    }
                }
                Op::IndexSet => {
                    let value = self.pop();
                    let index = self.pop();
                    let target = self.pop();
                    if let Err(message) = value::index_set(&target, &index, value) {
                        return Err(self.runtime_error(message));
                    }
                }
                Op::GetProp => {
                    let name = self.read_const_str(&proto, "property name")?;
                    let target = self.pop();
                    let Value::Object(object) = target else {
                        return Err(self.runtime_error("property access on non-object"));
                    };
                    let value = object.fields.borrow().get(&name).cloned();
                    match value {
                        Some(value) => self.push(value),
                        None => {
                            return Err(self.runtime_error(format!("missing property {name}")));
                        }
                    }
                }
                Op::SetProp => {
                    let name = self.read_const_str(&proto, "property name")?;
                    let value = self.pop();
                    let target = self.pop();
                    let Value::Object(object) = target else {
                        return Err(self.runtime_error("property set on non-object"));
                    };
                    if object.is_read_only() {
                        return Err(self.runtime_error("cannot modify read-only value"));
                    }
                    object.fields.borrow_mut().insert(name, value);
                }

                Op::Jump => {
                    let target = self.read_u16(&proto);
                    self.frames[fi].ip = target;
                }
                Op::JumpIfFalse => {
                    let target = self.read_u16(&proto);
                    if !self.peek().truthy() {
                        self.frames[fi].ip = target;
                    }
                }
                Op::JumpIfTrue => {
                    let target = self.read_u16(&proto);
                    if self.peek().truthy() {
                        self.frames[fi].ip = target;
                    }
                }

                Op::Call => {
                    let argc = self.read_u8(&proto) as usize;
                    if self.stack.len() < argc + 1 {
                        return Err(self.runtime_error("stack underflow on call"));
                    }
                    let args = self.stack.split_off(self.stack.len() - argc);
                    let callee = self.pop();
                    let Value::Function(func) = callee else {
                        return Err(self.runtime_error("not a function"));
                    };
                    if let Some(native) = func.native.clone() {
                        match (*native)(&args) {
                            Ok(value) => self.push(value),
                            Err(message) => {
                                let mut err = self.runtime_error(message.clone());
                                err.cause = Some(message);
                                return Err(err);
                            }
                        }
                    } else if func.proto.is_some() {
                        if let Err(message) = self.push_frame(func) {
                            return Err(self.runtime_error(message));
                        }
                        let frame = self.frames.last_mut().expect("frame just pushed");
                        for (i, arg) in args.into_iter().enumerate() {
                            if i >= frame.locals.len() {
                                break;
                            }
                            frame.locals[i] = arg;
                        }
                    } else {
                        return Err(self.runtime_error("not a function"));
                    }
                }
                Op::Return => {
                    let base = self.frames[fi].base;
                    let ret = if self.stack.len() > base {
                        self.pop()
                    } else {
                        Value::Null
                    };
                    if let Some(result) = self.finish_frame(ret) {
                        return Ok(result);
                    }
                }
                Op::Closure => {
                    let index = self.read_u16(&proto);
                    let upcount = self.read_u8(&proto) as usize;
                    let inner = match proto.chunk.consts.get(index) {
                        Some(Constant::Proto(inner)) => Rc::clone(inner),
                        _ => {
                            return Err(
                                self.runtime_error("closure constant is not prototype")
                            );
                        }
                    };
                    let enclosing = Rc::clone(&self.frames[fi].func);
                    let mut cells = Vec::with_capacity(upcount);
                    for _ in 0..upcount {
                        let is_local = self.read_u8(&proto);
                        let slot = self.read_u8(&proto) as usize;
                        if is_local == 1 {
                            if slot >= self.frames[fi].locals.len() {
                                return Err(
                                    self.runtime_error("upvalue local slot out of range")
                                );
                            }
                            cells.push(self.capture_upvalue(fi, slot));
                        } else {
                            let cell = enclosing.upvalues.borrow().get(slot).cloned();
                            match cell {
                                Some(cell) => cells.push(cell),
                                None => {
                                    return Err(
                                        self.runtime_error("upvalue index out of range")
                                    );
                                }
                            }
                        }
                    }
                    let closure = Function {
                        proto: Some(Rc::clone(&inner)),
                        upvalues: RefCell::new(cells),
                        native: None,
                        name: inner.name.clone(),
                        source: inner.source.clone(),
                    };
                    self.push(Value::function(closure));
                }

                Op::IterPrep => {
                    let v = self.pop();
                    match value::to_iterator(v) {
                        Ok(iter) => self.push(iter),
                        Err(message) => return Err(self.runtime_error(message)),
                    }
                }
                Op::IterNext => {
                    let target = self.read_u16(&proto);
                    let Value::Iterator(iter) = self.peek() else {
                        return Err(self.runtime_error("not an iterator"));
                    };
                    let next = iter.borrow_mut().next();
                    match next {
                        Some((key, value)) => {
                            self.push(Value::string(key));
                            self.push(value);
                        }
                        None => self.frames[fi].ip = target,
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Frames and upvalues
    // ------------------------------------------------------------------

    fn push_frame(&mut self, func: Rc<Function>) -> Result<(), String> {
        if self.frames.len() >= self.max_frames {
            return Err("call stack overflow".to_string());
        }
        let base = self.stack.len();
        self.frames.push(Frame::new(func, base));
        Ok(())
    }

    /// Close the departing frame's upvalues, pop it and truncate the stack.
    /// Returns the final result when this was the outermost frame.
    fn finish_frame(&mut self, ret: Value) -> Option<Value> {
        let fi = self.frames.len() - 1;
        self.close_upvalues(fi);
        let frame = self.frames.pop().expect("active frame");
        self.stack.truncate(frame.base);
        if self.frames.is_empty() {
            Some(ret)
        } else {
            self.stack.push(ret);
            None
        }
    }

    /// Find or create the shared open cell for a live local slot, so every
    /// closure capturing the slot sees the same cell.
    fn capture_upvalue(&mut self, frame: usize, slot: usize) -> Rc<Upvalue> {
        for cell in &self.open_upvalues {
            if cell.is_open_at(frame, slot) {
                return Rc::clone(cell);
            }
        }
        let cell = Rc::new(Upvalue::open(frame, slot));
        self.open_upvalues.push(Rc::clone(&cell));
        cell
    }

    /// Close every open cell aliasing a slot of the given frame.
    fn close_upvalues(&mut self, frame: usize) {
        let cells = std::mem::take(&mut self.open_upvalues);
        for cell in cells {
            if cell.is_open_in_frame(frame) {
                let value = cell.get(&self.frames);
                cell.close(value);
            } else {
                self.open_upvalues.push(cell);
            }
        }
    }

    // ------------------------------------------------------------------
    // Stack access (public for builtin handlers and host glue)
    // ------------------------------------------------------------------

    /// Push a value onto the operand stack.
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pop the top of the operand stack, or null when empty.
    pub fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Null)
    }

    /// Read the top of the operand stack without popping.
    pub fn peek(&self) -> Value {
        self.stack.last().cloned().unwrap_or(Value::Null)
    }

    // ------------------------------------------------------------------
    // Operand decoding
    // ------------------------------------------------------------------

    fn read_u8(&mut self, proto: &Prototype) -> u8 {
        let fi = self.frames.len() - 1;
        let ip = self.frames[fi].ip;
        self.frames[fi].ip = ip + 1;
        proto.chunk.code[ip]
    }

    fn read_u16(&mut self, proto: &Prototype) -> usize {
        let fi = self.frames.len() - 1;
        let ip = self.frames[fi].ip;
        self.frames[fi].ip = ip + 2;
        proto.chunk.read_u16(ip) as usize
    }

    fn read_const_str(
        &mut self,
        proto: &Prototype,
        what: &str,
    ) -> Result<String, RuntimeError> {
        let index = self.read_u16(proto);
        match proto.chunk.consts.get(index) {
            Some(Constant::Str(s)) => Ok(s.clone()),
            _ => Err(self.runtime_error(format!("{what} constant is not string"))),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Build a runtime error carrying the current frame and the whole stack
    /// trace, innermost first.
    pub fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let frame = self
            .frames
            .last()
            .map(|f| self.frame_trace(f))
            .unwrap_or_default();
        let stack = self
            .frames
            .iter()
            .rev()
            .map(|f| self.frame_trace(f))
            .collect();
        RuntimeError {
            message: message.into(),
            frame,
            stack,
            cause: None,
        }
    }

    fn frame_trace(&self, frame: &Frame) -> FrameTrace {
        let line = frame
            .func
            .proto
            .as_ref()
            .map(|proto| proto.chunk.line_for_offset(frame.last_op))
            .unwrap_or(0);
        FrameTrace {
            function: frame.func.name.clone(),
            source: frame.func.source.clone(),
            line,
            ip: frame.last_op,
        }
    }

    fn trace_event(&self, fi: usize, proto: &Prototype, op: u8, ip: usize) -> TraceEvent {
        let frame = &self.frames[fi];
        TraceEvent {
            op,
            function: frame.func.name.clone(),
            source: frame.func.source.clone(),
            line: proto.chunk.line_for_offset(ip),
            ip,
        }
    }
}

/// Materialise a chunk constant as a runtime value. Prototype constants
/// become function values with fresh upvalue tables.
fn const_to_value(constant: &Constant) -> Value {
    match constant {
        Constant::Null => Value::Null,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Number(n) => Value::Number(*n),
        Constant::Str(s) => Value::string(s.as_str()),
        Constant::Proto(proto) => Value::function(Function::from_proto(Rc::clone(proto))),
    }
}

fn binary_op(op: Op, a: Value, b: Value) -> Result<Value, String> {
    match op {
        Op::Eq => return Ok(Value::Bool(a == b)),
        Op::NotEq => return Ok(Value::Bool(a != b)),
        _ => {}
    }
    let (Value::Number(x), Value::Number(y)) = (&a, &b) else {
        return Err("operands must be numbers".to_string());
    };
    let (x, y) = (*x, *y);
    Ok(match op {
        Op::Add => Value::Number(x + y),
        Op::Sub => Value::Number(x - y),
        Op::Mul => Value::Number(x * y),
        Op::Div => Value::Number(x / y),
        Op::Less => Value::Bool(x < y),
        Op::LessEq => Value::Bool(x <= y),
        Op::Greater => Value::Bool(x > y),
        Op::GreaterEq => Value::Bool(x >= y),
        _ => return Err("unsupported operator".to_string()),
    })
}
