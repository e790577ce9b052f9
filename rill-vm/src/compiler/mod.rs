// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Single-pass compiler from the parsed tree to a module of prototypes.
//!
//! Each top-level function declaration becomes a named module entry. Nested
//! declarations and function expressions compile to prototypes stored in the
//! enclosing chunk's constant pool and are instantiated at runtime by
//! `CLOSURE`. Closure capture uses the standard two-level descriptor scheme:
//! a capture is either a slot in the directly enclosing frame or an index
//! into the enclosing function's own upvalue table, so capture bubbles
//! outward one function at a time.
//!
//! Compilation fails the whole module on the first structural problem;
//! everything the parser accepted but the language cannot express (a bare
//! expression at top level, an assignment to a call, ...) is reported here.

mod scope;

use std::fmt;
use std::rc::Rc;

use rill_parser::ast::{
    AssignOp, BinaryOp, BlockStmt, Expr, FuncDecl, Param, Program, Stmt, UnaryOp,
};

use crate::builtins::BuiltinRegistry;
use crate::chunk::{Chunk, Constant, Module, Prototype, UpvalueDesc};
use crate::opcode::Op;
use scope::Scope;

/// A structural error that fails module compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    UnsupportedTopLevel { line: u32 },
    DuplicateFunction { name: String },
    TooManyParams { function: String },
    TooManyLocals { function: String },
    TooManyUpvalues { function: String },
    TooManyConstants { function: String },
    TooManyArguments { line: u32 },
    CollectionTooLarge { line: u32 },
    FunctionTooLarge { function: String },
    InvalidNumber { literal: String },
    BuiltinArity { name: String, expected: usize, got: usize },
    InvalidAssignTarget { line: u32 },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnsupportedTopLevel { line } => write!(
                f,
                "line {line}: top-level statements other than func are not supported"
            ),
            CompileError::DuplicateFunction { name } => {
                write!(f, "duplicate function {name}")
            }
            CompileError::TooManyParams { function } => {
                write!(f, "too many parameters in {function}")
            }
            CompileError::TooManyLocals { function } => {
                write!(f, "too many locals in {function}")
            }
            CompileError::TooManyUpvalues { function } => {
                write!(f, "too many captured variables in {function}")
            }
            CompileError::TooManyConstants { function } => {
                write!(f, "too many constants in {function}")
            }
            CompileError::TooManyArguments { line } => {
                write!(f, "line {line}: too many call arguments")
            }
            CompileError::CollectionTooLarge { line } => {
                write!(f, "line {line}: collection literal too large")
            }
            CompileError::FunctionTooLarge { function } => {
                write!(f, "function {function} too large")
            }
            CompileError::InvalidNumber { literal } => {
                write!(f, "invalid number {literal:?}")
            }
            CompileError::BuiltinArity {
                name,
                expected,
                got,
            } => write!(f, "builtin {name} expects {expected} args, got {got}"),
            CompileError::InvalidAssignTarget { line } => {
                write!(f, "line {line}: invalid assignment target")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Compile a program tree into a module of prototypes.
pub fn compile(
    program: &Program,
    source: &str,
    builtins: &BuiltinRegistry,
) -> Result<Module, CompileError> {
    let mut module = Module::new();
    let mut compiler = Compiler {
        source,
        builtins,
        funcs: Vec::new(),
    };

    for stmt in &program.statements {
        match stmt {
            Stmt::FuncDecl(decl) => {
                if module.functions.contains_key(&decl.name) {
                    return Err(CompileError::DuplicateFunction {
                        name: decl.name.clone(),
                    });
                }
                let proto = compiler.compile_function(decl)?;
                module.functions.insert(decl.name.clone(), Rc::new(proto));
            }
            other => {
                return Err(CompileError::UnsupportedTopLevel {
                    line: other.span().start.line,
                });
            }
        }
    }

    Ok(module)
}

/// Per-function compilation state; one entry per nesting level.
struct FuncState {
    name: String,
    chunk: Chunk,
    scope: Scope,
    num_params: usize,
    /// Source line in force for the next emitted instruction.
    line: u32,
    last_op: Option<u8>,
}

struct Compiler<'a> {
    source: &'a str,
    builtins: &'a BuiltinRegistry,
    funcs: Vec<FuncState>,
}

impl<'a> Compiler<'a> {
    fn compile_function(&mut self, decl: &FuncDecl) -> Result<Prototype, CompileError> {
        self.push_func(&decl.name);
        self.declare_params(&decl.params)?;
        self.compile_block(&decl.body)?;
        Ok(self.finish_func())
    }

    /// Compile a nested function into the current constant pool, returning
    /// the prototype's index and its capture descriptors.
    fn compile_prototype(
        &mut self,
        name: &str,
        params: &[Param],
        body: &BlockStmt,
    ) -> Result<(u16, Vec<UpvalueDesc>), CompileError> {
        self.push_func(name);
        self.declare_params(params)?;
        self.compile_block(body)?;
        let proto = self.finish_func();
        let upvalues = proto.upvalues.clone();
        if upvalues.len() > u8::MAX as usize {
            return Err(CompileError::TooManyUpvalues {
                function: name.to_string(),
            });
        }
        let index = self.add_const(Constant::Proto(Rc::new(proto)))?;
        Ok((index, upvalues))
    }

    fn push_func(&mut self, name: &str) {
        self.funcs.push(FuncState {
            name: name.to_string(),
            chunk: Chunk::new(),
            scope: Scope::new(),
            num_params: 0,
            line: 0,
            last_op: None,
        });
    }

    /// Seal the current function: guarantee a final return, pop its state
    /// and build the prototype.
    fn finish_func(&mut self) -> Prototype {
        if self.cur().last_op != Some(Op::Return as u8) {
            self.emit(Op::Null);
            self.emit(Op::Return);
        }
        let state = self.funcs.pop().expect("no active function");
        let max_locals = state.scope.max_locals();
        Prototype {
            name: state.name,
            source: self.source.to_string(),
            num_params: state.num_params,
            chunk: state.chunk,
            upvalues: state.scope.upvalues,
            max_locals,
        }
    }

    fn declare_params(&mut self, params: &[Param]) -> Result<(), CompileError> {
        if params.len() > u8::MAX as usize {
            return Err(CompileError::TooManyParams {
                function: self.cur().name.clone(),
            });
        }
        for param in params {
            self.add_local(&param.name)?;
        }
        self.cur().num_params = params.len();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn compile_block(&mut self, block: &BlockStmt) -> Result<(), CompileError> {
        for stmt in &block.statements {
            self.set_line(stmt.span().start.line);
            match stmt {
                Stmt::Expr { expr, .. } => {
                    self.compile_expr(expr)?;
                    // Assignments consume their own result.
                    if !matches!(expr, Expr::Assign { .. }) {
                        self.emit(Op::Pop);
                    }
                }
                Stmt::Return { value, .. } => {
                    match value {
                        Some(value) => self.compile_expr(value)?,
                        None => self.emit(Op::Null),
                    }
                    self.emit(Op::Return);
                }
                Stmt::If(stmt) => self.compile_if(stmt)?,
                Stmt::While {
                    condition, body, ..
                } => self.compile_while(condition, body)?,
                Stmt::ForIn(stmt) => self.compile_for_in(stmt)?,
                Stmt::FuncDecl(decl) => {
                    self.compile_closure(&decl.name, &decl.params, &decl.body)?;
                    let slot = self.ensure_local(&decl.name)?;
                    self.emit(Op::SetLocal);
                    self.push_u8(slot);
                }
                Stmt::Block(inner) => self.compile_block(inner)?,
            }
        }
        Ok(())
    }

    fn compile_if(&mut self, stmt: &rill_parser::ast::IfStmt) -> Result<(), CompileError> {
        let mut end_jumps = Vec::new();

        self.compile_expr(&stmt.condition)?;
        let mut jump_false = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        self.compile_block(&stmt.consequent)?;
        end_jumps.push(self.emit_jump(Op::Jump));
        self.patch_jump(jump_false)?;
        self.emit(Op::Pop);

        for clause in &stmt.else_ifs {
            self.compile_expr(&clause.condition)?;
            jump_false = self.emit_jump(Op::JumpIfFalse);
            self.emit(Op::Pop);
            self.compile_block(&clause.consequent)?;
            end_jumps.push(self.emit_jump(Op::Jump));
            self.patch_jump(jump_false)?;
            self.emit(Op::Pop);
        }

        if let Some(alternative) = &stmt.alternative {
            self.compile_block(alternative)?;
        }
        for jump in end_jumps {
            self.patch_jump(jump)?;
        }
        Ok(())
    }

    fn compile_while(&mut self, condition: &Expr, body: &BlockStmt) -> Result<(), CompileError> {
        let loop_start = self.cur().chunk.current_offset();
        self.compile_expr(condition)?;
        let exit = self.emit_jump(Op::JumpIfFalse);
        self.emit(Op::Pop);
        self.compile_block(body)?;
        self.emit_jump_back(loop_start)?;
        self.patch_jump(exit)?;
        self.emit(Op::Pop);
        Ok(())
    }

    fn compile_for_in(&mut self, stmt: &rill_parser::ast::ForStmt) -> Result<(), CompileError> {
        self.compile_expr(&stmt.iterable)?;
        self.emit(Op::IterPrep);

        let loop_start = self.cur().chunk.current_offset();
        // On exhaustion ITER_NEXT jumps out; on success it pushes key then
        // value above the iterator.
        let exit = self.emit_jump(Op::IterNext);

        if stmt.binding.key.is_empty() {
            let value_slot = self.ensure_local(&stmt.binding.value)?;
            self.emit(Op::SetLocal);
            self.push_u8(value_slot);
            self.emit(Op::Pop); // discard the key
        } else {
            let key_slot = self.ensure_local(&stmt.binding.key)?;
            let value_slot = self.ensure_local(&stmt.binding.value)?;
            self.emit(Op::SetLocal);
            self.push_u8(value_slot);
            self.emit(Op::SetLocal);
            self.push_u8(key_slot);
        }

        self.compile_block(&stmt.body)?;
        self.emit_jump_back(loop_start)?;
        self.patch_jump(exit)?;
        self.emit(Op::Pop); // the iterator
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.set_line(expr.span().start.line);
        match expr {
            Expr::Number { literal, .. } => {
                let number: f64 =
                    literal
                        .parse()
                        .map_err(|_| CompileError::InvalidNumber {
                            literal: literal.clone(),
                        })?;
                self.emit_const(Constant::Number(number))?;
            }
            Expr::Str { value, .. } => {
                self.emit_const(Constant::Str(value.clone()))?;
            }
            Expr::Bool { value, .. } => {
                self.emit(if *value { Op::True } else { Op::False });
            }
            Expr::Null { .. } => self.emit(Op::Null),
            Expr::Array { elements, span } => {
                if elements.len() > u16::MAX as usize {
                    return Err(CompileError::CollectionTooLarge {
                        line: span.start.line,
                    });
                }
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(Op::Array);
                self.push_u16(elements.len() as u16);
            }
            Expr::RangeLit { start, end, .. } => {
                self.compile_expr(start)?;
                self.compile_expr(end)?;
                self.emit(Op::Range);
            }
            Expr::Object { fields, span } => {
                if fields.len() > u16::MAX as usize {
                    return Err(CompileError::CollectionTooLarge {
                        line: span.start.line,
                    });
                }
                for field in fields {
                    self.emit_const(Constant::Str(field.key.as_str().to_string()))?;
                    self.compile_expr(&field.value)?;
                }
                self.emit(Op::Object);
                self.push_u16(fields.len() as u16);
            }
            Expr::Ident { name, .. } => {
                let index = self.add_const(Constant::Str(name.clone()))?;
                self.emit(Op::GetGlobal);
                self.push_u16(index);
            }
            Expr::Variable { name, .. } => {
                if let Some(slot) = self.cur().scope.resolve_local(name) {
                    self.emit(Op::GetLocal);
                    self.push_u8(slot);
                } else if let Some(upvalue) = self.resolve_upvalue(self.top(), name)? {
                    self.emit(Op::GetUpvalue);
                    self.push_u8(upvalue);
                } else {
                    let index = self.add_const(Constant::Str(name.clone()))?;
                    self.emit(Op::GetGlobal);
                    self.push_u16(index);
                }
            }
            Expr::Unary { op, operand, .. } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Neg => self.emit(Op::Neg),
                    UnaryOp::Not => self.emit(Op::Not),
                    // Unary plus is a no-op.
                    UnaryOp::Plus => {}
                }
            }
            Expr::Binary {
                left, op, right, ..
            } => {
                if matches!(op, BinaryOp::And | BinaryOp::Or) {
                    return self.compile_logical(*op, left, right);
                }
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(match op {
                    BinaryOp::Add => Op::Add,
                    BinaryOp::Sub => Op::Sub,
                    BinaryOp::Mul => Op::Mul,
                    BinaryOp::Div => Op::Div,
                    BinaryOp::Eq => Op::Eq,
                    BinaryOp::NotEq => Op::NotEq,
                    BinaryOp::Less => Op::Less,
                    BinaryOp::LessEq => Op::LessEq,
                    BinaryOp::Greater => Op::Greater,
                    BinaryOp::GreaterEq => Op::GreaterEq,
                    BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
                });
            }
            Expr::Assign {
                target, value, op, ..
            } => self.compile_assign(target, value, *op, expr.span().start.line)?,
            Expr::Call { callee, args, span } => {
                if let Expr::Ident { name, .. } = callee.as_ref() {
                    let builtins = self.builtins;
                    if let Some(spec) = builtins.by_name(name) {
                        if args.len() != spec.arity {
                            return Err(CompileError::BuiltinArity {
                                name: spec.name.clone(),
                                expected: spec.arity,
                                got: args.len(),
                            });
                        }
                        let opcode = spec.opcode;
                        for arg in args {
                            self.compile_expr(arg)?;
                        }
                        self.emit_raw(opcode);
                        return Ok(());
                    }
                }
                if args.len() > u8::MAX as usize {
                    return Err(CompileError::TooManyArguments {
                        line: span.start.line,
                    });
                }
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(Op::Call);
                self.push_u8(args.len() as u8);
            }
            Expr::Member {
                target, property, ..
            } => {
                self.compile_expr(target)?;
                let index = self.add_const(Constant::Str(property.clone()))?;
                self.emit(Op::GetProp);
                self.push_u16(index);
            }
            Expr::Index { target, index, .. } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit(Op::IndexGet);
            }
            Expr::Func(func) => {
                self.compile_closure("", &func.params, &func.body)?;
            }
        }
        Ok(())
    }

    /// Short-circuit lowering: the left value stays on the stack as the
    /// result when the jump is taken; otherwise it is popped and the right
    /// operand becomes the result.
    fn compile_logical(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        let end = self.emit_jump(if op == BinaryOp::And {
            Op::JumpIfFalse
        } else {
            Op::JumpIfTrue
        });
        self.emit(Op::Pop);
        self.compile_expr(right)?;
        self.patch_jump(end)?;
        Ok(())
    }

    fn compile_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        op: AssignOp,
        line: u32,
    ) -> Result<(), CompileError> {
        match target {
            Expr::Variable { name, .. } => {
                if op == AssignOp::Define && self.cur().scope.resolve_local(name).is_none() {
                    self.add_local(name)?;
                }
                self.compile_expr(value)?;
                if let Some(slot) = self.cur().scope.resolve_local(name) {
                    self.emit(Op::SetLocal);
                    self.push_u8(slot);
                } else if let Some(upvalue) = self.resolve_upvalue(self.top(), name)? {
                    self.emit(Op::SetUpvalue);
                    self.push_u8(upvalue);
                } else {
                    let index = self.add_const(Constant::Str(name.clone()))?;
                    self.emit(if op == AssignOp::Define {
                        Op::DefineGlobal
                    } else {
                        Op::SetGlobal
                    });
                    self.push_u16(index);
                }
            }
            Expr::Member {
                target: object,
                property,
                ..
            } => {
                self.compile_expr(object)?;
                let index = self.add_const(Constant::Str(property.clone()))?;
                self.compile_expr(value)?;
                self.emit(Op::SetProp);
                self.push_u16(index);
            }
            Expr::Index {
                target: object,
                index,
                ..
            } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit(Op::IndexSet);
            }
            _ => return Err(CompileError::InvalidAssignTarget { line }),
        }
        Ok(())
    }

    /// Compile a nested function body and emit the CLOSURE instruction with
    /// its capture descriptors.
    fn compile_closure(
        &mut self,
        name: &str,
        params: &[Param],
        body: &BlockStmt,
    ) -> Result<(), CompileError> {
        let (index, upvalues) = self.compile_prototype(name, params, body)?;
        self.emit(Op::Closure);
        self.push_u16(index);
        self.push_u8(upvalues.len() as u8);
        for upvalue in upvalues {
            self.push_u8(upvalue.is_local as u8);
            self.push_u8(upvalue.index);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Name resolution
    // ------------------------------------------------------------------

    /// Walk outward looking for `name`, threading capture descriptors
    /// through every intermediate function. Returns the upvalue index in the
    /// function at `func_index`, or `None` when the name is not a local
    /// anywhere up the chain (a global, then).
    fn resolve_upvalue(
        &mut self,
        func_index: usize,
        name: &str,
    ) -> Result<Option<u8>, CompileError> {
        if func_index == 0 {
            return Ok(None);
        }
        let parent = func_index - 1;
        if let Some(slot) = self.funcs[parent].scope.resolve_local(name) {
            let desc = UpvalueDesc {
                is_local: true,
                index: slot,
            };
            return self.push_upvalue(func_index, desc).map(Some);
        }
        if let Some(parent_index) = self.resolve_upvalue(parent, name)? {
            let desc = UpvalueDesc {
                is_local: false,
                index: parent_index,
            };
            return self.push_upvalue(func_index, desc).map(Some);
        }
        Ok(None)
    }

    fn push_upvalue(&mut self, func_index: usize, desc: UpvalueDesc) -> Result<u8, CompileError> {
        self.funcs[func_index]
            .scope
            .add_upvalue(desc)
            .ok_or_else(|| CompileError::TooManyUpvalues {
                function: self.funcs[func_index].name.clone(),
            })
    }

    fn ensure_local(&mut self, name: &str) -> Result<u8, CompileError> {
        if let Some(slot) = self.cur().scope.resolve_local(name) {
            return Ok(slot);
        }
        self.add_local(name)
    }

    fn add_local(&mut self, name: &str) -> Result<u8, CompileError> {
        let function = self.cur().name.clone();
        self.cur()
            .scope
            .add_local(name)
            .ok_or(CompileError::TooManyLocals { function })
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    fn cur(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("no active function")
    }

    fn top(&self) -> usize {
        self.funcs.len() - 1
    }

    fn set_line(&mut self, line: u32) {
        if line > 0 {
            self.cur().line = line;
        }
    }

    fn emit(&mut self, op: Op) {
        let line = self.cur().line;
        self.cur().chunk.emit_op(op, line);
        self.cur().last_op = Some(op as u8);
    }

    fn emit_raw(&mut self, byte: u8) {
        let line = self.cur().line;
        self.cur().chunk.emit_raw(byte, line);
        self.cur().last_op = Some(byte);
    }

    fn push_u8(&mut self, value: u8) {
        self.cur().chunk.push_u8(value);
    }

    fn push_u16(&mut self, value: u16) {
        self.cur().chunk.push_u16(value);
    }

    fn emit_jump(&mut self, op: Op) -> usize {
        let line = self.cur().line;
        let operand = self.cur().chunk.emit_jump(op, line);
        self.cur().last_op = Some(op as u8);
        operand
    }

    fn patch_jump(&mut self, operand: usize) -> Result<(), CompileError> {
        if self.cur().chunk.current_offset() > u16::MAX as usize {
            return Err(CompileError::FunctionTooLarge {
                function: self.cur().name.clone(),
            });
        }
        self.cur().chunk.patch_jump(operand);
        Ok(())
    }

    /// Emit an unconditional jump back to a known offset (loop headers).
    fn emit_jump_back(&mut self, target: usize) -> Result<(), CompileError> {
        if target > u16::MAX as usize {
            return Err(CompileError::FunctionTooLarge {
                function: self.cur().name.clone(),
            });
        }
        self.emit(Op::Jump);
        self.push_u16(target as u16);
        Ok(())
    }

    fn emit_const(&mut self, constant: Constant) -> Result<(), CompileError> {
        let index = self.add_const(constant)?;
        self.emit(Op::Const);
        self.push_u16(index);
        Ok(())
    }

    fn add_const(&mut self, constant: Constant) -> Result<u16, CompileError> {
        let function = self.cur().name.clone();
        self.cur()
            .chunk
            .add_const(constant)
            .ok_or(CompileError::TooManyConstants { function })
    }
}
