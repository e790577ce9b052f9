// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! The builtin opcode registry.
//!
//! Builtins occupy the reserved opcode range `0x80..=0x9F`. The registry is
//! an explicit structure handed to both the compiler (which detects builtin
//! calls by name and checks arity) and the interpreter (which dispatches the
//! reserved range through it). It is populated once at construction and
//! read-only afterwards; there is no process-wide hidden state.

use std::collections::HashMap;

use crate::opcode::is_builtin_opcode;
use crate::value::{self, Value};
use crate::vm::Vm;

/// Handler for one builtin opcode. It may pop its declared number of
/// arguments from the stack and pushes at most one result. A returned error
/// message is surfaced as a runtime error with source context attached.
pub type BuiltinHandler = fn(&mut Vm) -> Result<(), String>;

/// Registration record for one builtin.
#[derive(Clone)]
pub struct BuiltinSpec {
    pub name: String,
    pub opcode: u8,
    pub arity: usize,
    pub handler: BuiltinHandler,
}

impl std::fmt::Debug for BuiltinSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinSpec")
            .field("name", &self.name)
            .field("opcode", &self.opcode)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Builtin lookup tables by script-visible name and by opcode.
#[derive(Debug, Default)]
pub struct BuiltinRegistry {
    by_name: HashMap<String, BuiltinSpec>,
    by_opcode: HashMap<u8, BuiltinSpec>,
}

impl BuiltinRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the standard builtins installed.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("typeof", 0x80, 1, builtin_typeof);
        registry.register("error", 0x81, 1, builtin_error);
        registry.register("indexExist", 0x82, 2, builtin_index_exist);
        registry.register("indexRead", 0x83, 3, builtin_index_read);
        registry.register("valueExist", 0x84, 2, builtin_value_exist);
        registry.register("readonly", 0x85, 1, builtin_readonly);
        registry
    }

    /// Install a builtin. Registration is one-shot per name and per opcode;
    /// a duplicate or an opcode outside the reserved range is a programming
    /// error and panics.
    pub fn register(&mut self, name: &str, opcode: u8, arity: usize, handler: BuiltinHandler) {
        assert!(
            is_builtin_opcode(opcode),
            "builtin opcode 0x{opcode:02X} outside reserved range"
        );
        assert!(
            !self.by_name.contains_key(name),
            "builtin {name} already registered"
        );
        assert!(
            !self.by_opcode.contains_key(&opcode),
            "builtin opcode 0x{opcode:02X} already registered"
        );
        let spec = BuiltinSpec {
            name: name.to_string(),
            opcode,
            arity,
            handler,
        };
        self.by_name.insert(name.to_string(), spec.clone());
        self.by_opcode.insert(opcode, spec);
    }

    /// Find a builtin by its script-visible name.
    pub fn by_name(&self, name: &str) -> Option<&BuiltinSpec> {
        self.by_name.get(name)
    }

    /// Find a builtin by opcode.
    pub fn by_opcode(&self, opcode: u8) -> Option<&BuiltinSpec> {
        self.by_opcode.get(&opcode)
    }
}

fn builtin_typeof(vm: &mut Vm) -> Result<(), String> {
    let v = vm.pop();
    vm.push(Value::string(v.type_name()));
    Ok(())
}

fn builtin_error(vm: &mut Vm) -> Result<(), String> {
    let v = vm.pop();
    match v {
        Value::Str(s) => {
            vm.push(Value::Error(s));
            Ok(())
        }
        _ => Err("error expects string".to_string()),
    }
}

fn builtin_index_exist(vm: &mut Vm) -> Result<(), String> {
    let index = vm.pop();
    let target = vm.pop();
    vm.push(Value::Bool(value::index_exists(&target, &index)));
    Ok(())
}

/// `indexRead(target, index, default)`: like `INDEX_GET`, but a failed
/// lookup yields the default instead of raising.
fn builtin_index_read(vm: &mut Vm) -> Result<(), String> {
    let default = vm.pop();
    let index = vm.pop();
    let target = vm.pop();
    match value::index_get(&target, &index) {
        Ok(v) => vm.push(v),
        Err(_) => vm.push(default),
    }
    Ok(())
}

fn builtin_value_exist(vm: &mut Vm) -> Result<(), String> {
    let needle = vm.pop();
    let target = vm.pop();
    vm.push(Value::Bool(value::value_exists(&target, &needle)));
    Ok(())
}

fn builtin_readonly(vm: &mut Vm) -> Result<(), String> {
    let v = vm.pop();
    vm.push(Value::Bool(v.is_read_only()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_assignments() {
        let registry = BuiltinRegistry::standard();
        for (name, opcode, arity) in [
            ("typeof", 0x80, 1),
            ("error", 0x81, 1),
            ("indexExist", 0x82, 2),
            ("indexRead", 0x83, 3),
            ("valueExist", 0x84, 2),
            ("readonly", 0x85, 1),
        ] {
            let spec = registry.by_name(name).expect(name);
            assert_eq!(spec.opcode, opcode, "{name}");
            assert_eq!(spec.arity, arity, "{name}");
            assert_eq!(registry.by_opcode(opcode).unwrap().name, name);
        }
        assert!(registry.by_name("nope").is_none());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_name_panics() {
        let mut registry = BuiltinRegistry::standard();
        registry.register("typeof", 0x90, 1, builtin_typeof);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_opcode_panics() {
        let mut registry = BuiltinRegistry::standard();
        registry.register("typeof2", 0x80, 1, builtin_typeof);
    }

    #[test]
    #[should_panic(expected = "outside reserved range")]
    fn test_opcode_outside_range_panics() {
        let mut registry = BuiltinRegistry::new();
        registry.register("bad", 0x40, 1, builtin_typeof);
    }
}
