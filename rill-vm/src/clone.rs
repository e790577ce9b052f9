// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Interpreter duplication.
//!
//! A duplicate gets an independent global table with deep-cloned arrays,
//! objects, functions and iterators. The sharing graph is preserved: each
//! container is cloned once, keyed by identity, so two globals aliasing one
//! array alias one (new) array in the duplicate. Prototypes are immutable
//! after compilation and are shared, as are native handlers and the builtin
//! registry. Closed upvalue values are cloned; duplication only runs between
//! invocations, when no open cells can exist, so a stale open cell closes
//! over null.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::{ArrayRef, Function, ObjectRef, Value, ValueIter};
use crate::vm::upvalue::Upvalue;
use crate::vm::Vm;

impl Vm {
    /// Deep-clone this interpreter's configuration and globals into a new,
    /// idle instance. Execution state is not carried over.
    pub fn duplicate(&self) -> Vm {
        let mut dup = Vm::new(Rc::clone(&self.builtins));
        dup.max_frames = self.max_frames;
        dup.inst_limit = self.inst_limit;
        dup.trace_hook = self.trace_hook.clone();

        let mut memo = CloneMemo::default();
        for (name, value) in &self.globals {
            dup.globals.insert(name.clone(), memo.clone_value(value));
        }
        dup
    }
}

/// Identity-keyed memo so the clone preserves aliasing and terminates on
/// reference cycles.
#[derive(Default)]
struct CloneMemo {
    arrays: HashMap<*const ArrayRef, Rc<ArrayRef>>,
    objects: HashMap<*const ObjectRef, Rc<ObjectRef>>,
    functions: HashMap<*const Function, Rc<Function>>,
    upvalues: HashMap<*const Upvalue, Rc<Upvalue>>,
    iterators: HashMap<*const RefCell<ValueIter>, Rc<RefCell<ValueIter>>>,
}

impl CloneMemo {
    fn clone_value(&mut self, value: &Value) -> Value {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::Str(_) | Value::Error(_) => {
                value.clone()
            }
            Value::Array(array) => Value::Array(self.clone_array(array)),
            Value::Object(object) => Value::Object(self.clone_object(object)),
            Value::Function(func) => Value::Function(self.clone_function(func)),
            Value::Iterator(iter) => Value::Iterator(self.clone_iterator(iter)),
        }
    }

    fn clone_array(&mut self, array: &Rc<ArrayRef>) -> Rc<ArrayRef> {
        let key = Rc::as_ptr(array);
        if let Some(existing) = self.arrays.get(&key) {
            return Rc::clone(existing);
        }
        let clone = Rc::new(ArrayRef::new(Vec::new()));
        clone.set_read_only(array.is_read_only());
        self.arrays.insert(key, Rc::clone(&clone));
        let elements: Vec<Value> = array
            .elements
            .borrow()
            .iter()
            .map(|element| self.clone_value(element))
            .collect();
        *clone.elements.borrow_mut() = elements;
        clone
    }

    fn clone_object(&mut self, object: &Rc<ObjectRef>) -> Rc<ObjectRef> {
        let key = Rc::as_ptr(object);
        if let Some(existing) = self.objects.get(&key) {
            return Rc::clone(existing);
        }
        let clone = Rc::new(ObjectRef::new(IndexMap::new()));
        clone.set_read_only(object.is_read_only());
        self.objects.insert(key, Rc::clone(&clone));
        let fields: IndexMap<String, Value> = object
            .fields
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), self.clone_value(value)))
            .collect();
        *clone.fields.borrow_mut() = fields;
        clone
    }

    fn clone_function(&mut self, func: &Rc<Function>) -> Rc<Function> {
        let key = Rc::as_ptr(func);
        if let Some(existing) = self.functions.get(&key) {
            return Rc::clone(existing);
        }
        let clone = Rc::new(Function {
            proto: func.proto.clone(),
            upvalues: RefCell::new(Vec::new()),
            native: func.native.clone(),
            name: func.name.clone(),
            source: func.source.clone(),
        });
        // Memoise before walking upvalues: a closure can be reachable from
        // its own captured cells.
        self.functions.insert(key, Rc::clone(&clone));
        let cells: Vec<Rc<Upvalue>> = func
            .upvalues
            .borrow()
            .iter()
            .map(|cell| self.clone_upvalue(cell))
            .collect();
        *clone.upvalues.borrow_mut() = cells;
        clone
    }

    fn clone_upvalue(&mut self, cell: &Rc<Upvalue>) -> Rc<Upvalue> {
        let key = Rc::as_ptr(cell);
        if let Some(existing) = self.upvalues.get(&key) {
            return Rc::clone(existing);
        }
        let clone = Rc::new(Upvalue::closed(Value::Null));
        self.upvalues.insert(key, Rc::clone(&clone));
        let value = self.clone_value(&cell.closed_value());
        clone.set(&mut [], value);
        clone
    }

    fn clone_iterator(&mut self, iter: &Rc<RefCell<ValueIter>>) -> Rc<RefCell<ValueIter>> {
        let key = Rc::as_ptr(iter);
        if let Some(existing) = self.iterators.get(&key) {
            return Rc::clone(existing);
        }
        let clone = match &*iter.borrow() {
            ValueIter::Array { array, index } => ValueIter::Array {
                array: self.clone_array(array),
                index: *index,
            },
            ValueIter::Object {
                object,
                keys,
                index,
            } => ValueIter::Object {
                object: self.clone_object(object),
                keys: keys.clone(),
                index: *index,
            },
        };
        let clone = Rc::new(RefCell::new(clone));
        self.iterators.insert(key, Rc::clone(&clone));
        clone
    }
}
