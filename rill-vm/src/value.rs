// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Runtime values.
//!
//! Values are a tagged union over the dynamic kinds of the language. Arrays
//! and objects are shared by reference (`Rc`) with interior mutability, so
//! any execution holding one observes mutations made through another alias.
//! Objects preserve insertion order. Containers carry a read-only flag set by
//! host marshaling and enforced by the interpreter's mutating opcodes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::chunk::Prototype;
use crate::vm::upvalue::Upvalue;

/// A host-provided callable bound into the VM as a function value.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, String>>;

/// A dynamically typed runtime value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<ArrayRef>),
    Object(Rc<ObjectRef>),
    Function(Rc<Function>),
    /// An error value: ordinary data until the host opts into surfacing it.
    Error(Rc<str>),
    Iterator(Rc<RefCell<ValueIter>>),
}

/// Shared storage for an array value.
#[derive(Debug, Default)]
pub struct ArrayRef {
    pub elements: RefCell<Vec<Value>>,
    read_only: Cell<bool>,
}

impl ArrayRef {
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            elements: RefCell::new(elements),
            read_only: Cell::new(false),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.get()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }

    pub fn len(&self) -> usize {
        self.elements.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.borrow().is_empty()
    }
}

/// Shared storage for an object value. Field order is insertion order.
#[derive(Debug, Default)]
pub struct ObjectRef {
    pub fields: RefCell<IndexMap<String, Value>>,
    read_only: Cell<bool>,
}

impl ObjectRef {
    pub fn new(fields: IndexMap<String, Value>) -> Self {
        Self {
            fields: RefCell::new(fields),
            read_only: Cell::new(false),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.get()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }

    pub fn len(&self) -> usize {
        self.fields.borrow().len()
    }
}

/// A runtime function: a compiled prototype with captured upvalues, a native
/// handler, or (for values still being constructed) neither.
pub struct Function {
    pub proto: Option<Rc<Prototype>>,
    /// Captured upvalue cells; length matches the prototype's descriptors.
    pub upvalues: RefCell<Vec<Rc<Upvalue>>>,
    pub native: Option<NativeFn>,
    pub name: String,
    pub source: String,
}

impl Function {
    /// Materialise a prototype as a function value with a fresh upvalue
    /// table. Entries start closed over null until `CLOSURE` fills them.
    pub fn from_proto(proto: Rc<Prototype>) -> Self {
        let upvalues = (0..proto.upvalues.len())
            .map(|_| Rc::new(Upvalue::closed(Value::Null)))
            .collect();
        Function {
            name: proto.name.clone(),
            source: proto.source.clone(),
            proto: Some(proto),
            upvalues: RefCell::new(upvalues),
            native: None,
        }
    }

    /// Wrap a host callable as a function value.
    pub fn from_native(name: impl Into<String>, source: impl Into<String>, f: NativeFn) -> Self {
        Function {
            proto: None,
            upvalues: RefCell::new(Vec::new()),
            native: Some(f),
            name: name.into(),
            source: source.into(),
        }
    }

    /// A value is callable if either the prototype or native handler is set.
    pub fn is_callable(&self) -> bool {
        self.proto.is_some() || self.native.is_some()
    }

    /// Local slot count for a frame running this function.
    pub fn max_locals(&self) -> usize {
        match &self.proto {
            Some(proto) if proto.max_locals > 0 => proto.max_locals,
            Some(proto) => proto.num_params,
            None => 0,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("compiled", &self.proto.is_some())
            .field("native", &self.native.is_some())
            .field("upvalues", &self.upvalues.borrow().len())
            .finish()
    }
}

/// A one-shot, finite iterator value.
///
/// Array iterators read through the live array; object iterators walk a key
/// snapshot taken at creation, so mutations during iteration do not change
/// the visited keys.
#[derive(Debug)]
pub enum ValueIter {
    Array {
        array: Rc<ArrayRef>,
        index: usize,
    },
    Object {
        object: Rc<ObjectRef>,
        keys: Vec<String>,
        index: usize,
    },
}

impl ValueIter {
    pub fn over_array(array: Rc<ArrayRef>) -> Self {
        ValueIter::Array { array, index: 0 }
    }

    pub fn over_object(object: Rc<ObjectRef>) -> Self {
        let keys = object.fields.borrow().keys().cloned().collect();
        ValueIter::Object {
            object,
            keys,
            index: 0,
        }
    }

    /// Advance, returning the next key/value pair. Array keys are the
    /// stringified index.
    pub fn next(&mut self) -> Option<(String, Value)> {
        match self {
            ValueIter::Array { array, index } => {
                let elements = array.elements.borrow();
                if *index >= elements.len() {
                    return None;
                }
                let pair = ((*index).to_string(), elements[*index].clone());
                *index += 1;
                Some(pair)
            }
            ValueIter::Object {
                object,
                keys,
                index,
            } => {
                if *index >= keys.len() {
                    return None;
                }
                let key = keys[*index].clone();
                *index += 1;
                // A key removed since the snapshot reads as null.
                let value = object
                    .fields
                    .borrow()
                    .get(&key)
                    .cloned()
                    .unwrap_or(Value::Null);
                Some((key, value))
            }
        }
    }
}

impl Value {
    pub fn number(n: f64) -> Self {
        Value::Number(n)
    }

    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(ArrayRef::new(elements)))
    }

    pub fn object(fields: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(ObjectRef::new(fields)))
    }

    pub fn error(message: impl Into<Rc<str>>) -> Self {
        Value::Error(message.into())
    }

    pub fn function(f: Function) -> Self {
        Value::Function(Rc::new(f))
    }

    /// Null and false are falsy; every other value is truthy, including 0,
    /// the empty string and empty containers.
    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    /// The dynamic type name, as reported by the `typeof` builtin.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Error(_) => "error",
            Value::Iterator(_) => "iterator",
        }
    }

    /// Whether this is an array or object flagged read-only.
    pub fn is_read_only(&self) -> bool {
        match self {
            Value::Array(array) => array.is_read_only(),
            Value::Object(object) => object.is_read_only(),
            _ => false,
        }
    }

    /// Recursively flag this value's containers read-only. Used by host
    /// marshaling; expects an acyclic (freshly marshaled) tree.
    pub fn mark_read_only(&self) {
        match self {
            Value::Array(array) => {
                array.set_read_only(true);
                for element in array.elements.borrow().iter() {
                    element.mark_read_only();
                }
            }
            Value::Object(object) => {
                object.set_read_only(true);
                for value in object.fields.borrow().values() {
                    value.mark_read_only();
                }
            }
            _ => {}
        }
    }
}

/// Equality: same-kind only. Null, booleans, numbers, strings and errors
/// compare by content; arrays, objects, functions and iterators compare by
/// identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Array(array) => write!(f, "Array({:?})", array.elements.borrow()),
            Value::Object(object) => {
                write!(f, "Object{{")?;
                for (i, (key, value)) in object.fields.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key:?}: {value:?}")?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "{func:?}"),
            Value::Error(message) => write!(f, "Error({message:?})"),
            Value::Iterator(_) => write!(f, "Iterator"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Array(array) => {
                write!(f, "[")?;
                for (i, element) in array.elements.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Value::Object(object) => {
                write!(f, "{{")?;
                for (i, (key, value)) in object.fields.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => {
                if func.name.is_empty() {
                    write!(f, "<function>")
                } else {
                    write!(f, "<function {}>", func.name)
                }
            }
            Value::Error(message) => write!(f, "error({message})"),
            Value::Iterator(_) => write!(f, "<iterator>"),
        }
    }
}

/// Read `target[index]`. Arrays require an in-range integer index (no
/// negative indexing); objects require a string key, with numeric keys
/// stringified. Missing keys are an error.
pub fn index_get(target: &Value, index: &Value) -> Result<Value, String> {
    match target {
        Value::Array(array) => {
            let elements = array.elements.borrow();
            let i = expect_index(index, Some(elements.len()))?;
            Ok(elements[i as usize].clone())
        }
        Value::Object(object) => {
            let key = key_string(index)?;
            object
                .fields
                .borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| "missing key".to_string())
        }
        _ => Err("not indexable".to_string()),
    }
}

/// Write `target[index] = value`. Out-of-bounds array indices are rejected;
/// read-only containers raise.
pub fn index_set(target: &Value, index: &Value, value: Value) -> Result<(), String> {
    match target {
        Value::Array(array) => {
            if array.is_read_only() {
                return Err("cannot modify read-only value".to_string());
            }
            let mut elements = array.elements.borrow_mut();
            let i = expect_index(index, Some(elements.len()))?;
            elements[i as usize] = value;
            Ok(())
        }
        Value::Object(object) => {
            if object.is_read_only() {
                return Err("cannot modify read-only value".to_string());
            }
            let key = key_string(index)?;
            object.fields.borrow_mut().insert(key, value);
            Ok(())
        }
        _ => Err("not indexable".to_string()),
    }
}

/// Whether `target` has the given index/key.
pub fn index_exists(target: &Value, index: &Value) -> bool {
    match target {
        Value::Array(array) => expect_index(index, Some(array.len())).is_ok(),
        Value::Object(object) => match key_string(index) {
            Ok(key) => object.fields.borrow().contains_key(&key),
            Err(_) => false,
        },
        _ => false,
    }
}

/// Whether the array contains a value equal to `needle`.
pub fn value_exists(target: &Value, needle: &Value) -> bool {
    match target {
        Value::Array(array) => array.elements.borrow().iter().any(|v| v == needle),
        _ => false,
    }
}

/// Coerce a value to an iterator. Arrays, objects and iterators pass
/// through; everything else is not iterable.
pub fn to_iterator(value: Value) -> Result<Value, String> {
    match value {
        Value::Array(array) => Ok(Value::Iterator(Rc::new(RefCell::new(
            ValueIter::over_array(array),
        )))),
        Value::Object(object) => Ok(Value::Iterator(Rc::new(RefCell::new(
            ValueIter::over_object(object),
        )))),
        iter @ Value::Iterator(_) => Ok(iter),
        _ => Err("not iterable".to_string()),
    }
}

/// Build the inclusive range with step +1 or -1.
pub fn build_range(start: i64, end: i64) -> Vec<Value> {
    let step = if end < start { -1 } else { 1 };
    let mut out = Vec::with_capacity(start.abs_diff(end) as usize + 1);
    let mut i = start;
    loop {
        out.push(Value::Number(i as f64));
        if i == end {
            break;
        }
        i += step;
    }
    out
}

/// Validate an integer-valued numeric index, bounds-checked when a length is
/// given.
pub fn expect_index(index: &Value, len: Option<usize>) -> Result<i64, String> {
    let n = match index {
        Value::Number(n) => *n,
        _ => return Err("index must be number".to_string()),
    };
    let i = n as i64;
    if i as f64 != n {
        return Err("index must be integer".to_string());
    }
    if let Some(len) = len {
        if i < 0 || i as usize >= len {
            return Err("index out of bounds".to_string());
        }
    }
    Ok(i)
}

/// Coerce an index value to an object key string. Numbers are stringified;
/// other kinds are rejected.
pub fn key_string(index: &Value) -> Result<String, String> {
    match index {
        Value::Str(s) => Ok(s.to_string()),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() {
                Ok(format!("{}", *n as i64))
            } else {
                Ok(format!("{n}"))
            }
        }
        _ => Err("key must be string or number".to_string()),
    }
}
