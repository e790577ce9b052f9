// rill-embed - Engine implementation
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The Engine struct - main entry point for embedding Rill.

use std::path::Path;
use std::rc::Rc;

use rill_parser::Parser;
use rill_vm::{
    BuiltinRegistry, Module, NativeFn, TraceHook, Value, Vm, compile, disasm,
    value::Function,
};
use tracing::debug;

use crate::error::{EmbedError, Result};
use crate::convert::IntoRill;

/// The Rill scripting engine.
///
/// `Engine` owns one interpreter and its builtin registry. It loads source
/// units, binds host values and functions as globals, and invokes script
/// functions with deterministic resource limits.
///
/// # Thread Safety
///
/// **`Engine` is NOT thread-safe.** Values use `Rc` and `RefCell`
/// internally, and the interpreter must not run two calls at once. To use an
/// engine from async or multi-threaded code, confine it to one owning task
/// and serialise calls through it; [`Engine::duplicate`] produces fully
/// independent copies for other workers.
///
/// # Example
///
/// ```
/// use rill_embed::{Engine, to_value};
///
/// let mut engine = Engine::new();
/// engine
///     .load_source("inline", "func add($a, $b) { return $a + $b }")
///     .unwrap();
/// let result = engine
///     .call("add", &[to_value(2.0_f64), to_value(3.0_f64)])
///     .unwrap();
/// assert_eq!(result.to_string(), "5");
/// ```
pub struct Engine {
    vm: Vm,
    modules: Vec<Module>,
    error_results_as_errors: bool,
}

impl Engine {
    /// Create an engine with the standard builtins registered.
    pub fn new() -> Self {
        Engine {
            vm: Vm::new(Rc::new(BuiltinRegistry::standard())),
            modules: Vec::new(),
            error_results_as_errors: false,
        }
    }

    /// Create an engine with a caller-assembled builtin registry.
    pub fn with_builtins(builtins: BuiltinRegistry) -> Self {
        Engine {
            vm: Vm::new(Rc::new(builtins)),
            modules: Vec::new(),
            error_results_as_errors: false,
        }
    }

    /// Parse and compile a source unit, binding its functions as globals.
    ///
    /// The label is attached to prototypes and appears in diagnostics; it
    /// has no filesystem meaning.
    pub fn load_source(&mut self, label: &str, text: &str) -> Result<()> {
        let mut parser = Parser::from_source(text);
        let program = parser.parse_program();
        if !parser.errors().is_empty() {
            return Err(EmbedError::Parse(parser.into_errors()));
        }
        let module = compile(&program, label, self.vm.builtins())?;
        debug!(
            label,
            functions = module.functions.len(),
            "loaded source unit"
        );
        self.vm.load_module(&module);
        self.modules.push(module);
        Ok(())
    }

    /// Load a script from disk, using its path as the source label.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EmbedError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.load_source(&path.display().to_string(), &text)
    }

    /// Bind a value into a global slot.
    pub fn define_global(&mut self, name: &str, value: impl IntoRill) {
        self.vm.define_global(name, value.into_rill());
    }

    /// Read a global by name.
    #[must_use]
    pub fn global(&self, name: &str) -> Option<Value> {
        self.vm.global(name)
    }

    /// Whether a callable global function exists under `name`.
    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.vm.has_function(name)
    }

    /// Register a host function as a global.
    ///
    /// The closure receives the call arguments and returns a value or an
    /// error message; errors surface to scripts as runtime errors with the
    /// calling frame's context attached.
    ///
    /// # Example
    ///
    /// ```
    /// use rill_embed::{Engine, to_value};
    /// use rill_vm::Value;
    ///
    /// let mut engine = Engine::new();
    /// engine.register_native("double", |args| match args.first() {
    ///     Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
    ///     _ => Err("double expects a number".to_string()),
    /// });
    /// engine
    ///     .load_source("inline", "func f() { return double(21) }")
    ///     .unwrap();
    /// assert_eq!(engine.call("f", &[]).unwrap(), Value::Number(42.0));
    /// ```
    pub fn register_native(
        &mut self,
        name: &str,
        f: impl Fn(&[Value]) -> std::result::Result<Value, String> + 'static,
    ) {
        let native: NativeFn = Rc::new(f);
        self.vm.define_global(
            name,
            Value::function(Function::from_native(name, "host", native)),
        );
    }

    /// Locate a global function and run it.
    ///
    /// When [`Engine::set_error_results_as_errors`] is enabled, a call that
    /// completes normally with an error value is reported as
    /// [`EmbedError::ErrorResult`] instead of a plain value.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        debug!(name, argc = args.len(), "calling script function");
        let result = self.vm.call(name, args)?;
        if self.error_results_as_errors {
            if let Value::Error(message) = &result {
                return Err(EmbedError::ErrorResult(message.to_string()));
            }
        }
        Ok(result)
    }

    /// Deep-clone this engine: an independent global table with the sharing
    /// graph preserved, shared prototypes, and the same limits and hooks.
    #[must_use]
    pub fn duplicate(&self) -> Engine {
        Engine {
            vm: self.vm.duplicate(),
            modules: self.modules.clone(),
            error_results_as_errors: self.error_results_as_errors,
        }
    }

    /// Cap the number of instructions one call may execute; 0 means
    /// unlimited.
    pub fn set_instruction_limit(&mut self, limit: u64) {
        self.vm.set_instruction_limit(limit);
    }

    /// Attach or clear a hook observing every instruction dispatch.
    pub fn set_trace_hook(&mut self, hook: Option<TraceHook>) {
        self.vm.set_trace_hook(hook);
    }

    /// Opt in or out of surfacing returned error values as host errors.
    pub fn set_error_results_as_errors(&mut self, enable: bool) {
        self.error_results_as_errors = enable;
    }

    /// A textual bytecode listing of every loaded module.
    #[must_use]
    pub fn disassembly(&self) -> String {
        self.modules
            .iter()
            .map(|module| disasm::disassemble_module(module, self.vm.builtins()))
            .collect()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}
