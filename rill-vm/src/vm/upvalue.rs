// rill-vm - Bytecode compiler and virtual machine for the Rill scripting language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Upvalue cells: captured variables with an open/closed lifecycle.
//!
//! An open cell aliases a live local slot — identified by frame index and
//! slot, resolved through the interpreter's frame stack on every access — so
//! closures capturing the same variable observe each other's writes. When
//! the owning frame returns, the interpreter closes the cell: it takes a
//! copy of the current value and stores it inline. A cell closes at most
//! once and never reopens.

use std::cell::RefCell;

use crate::value::Value;
use crate::vm::frame::Frame;

#[derive(Debug)]
enum State {
    /// Aliases `frames[frame].locals[slot]`.
    Open { frame: usize, slot: usize },
    /// Owns the captured value.
    Closed(Value),
}

/// A shared captured-variable cell.
#[derive(Debug)]
pub struct Upvalue {
    state: RefCell<State>,
}

impl Upvalue {
    /// A cell aliasing a live local slot.
    pub fn open(frame: usize, slot: usize) -> Self {
        Upvalue {
            state: RefCell::new(State::Open { frame, slot }),
        }
    }

    /// A cell that already owns its value.
    pub fn closed(value: Value) -> Self {
        Upvalue {
            state: RefCell::new(State::Closed(value)),
        }
    }

    /// Whether the cell aliases the given live slot.
    pub fn is_open_at(&self, frame: usize, slot: usize) -> bool {
        matches!(
            &*self.state.borrow(),
            State::Open { frame: f, slot: s } if *f == frame && *s == slot
        )
    }

    /// Whether the cell aliases any slot of the given frame.
    pub fn is_open_in_frame(&self, frame: usize) -> bool {
        matches!(&*self.state.borrow(), State::Open { frame: f, .. } if *f == frame)
    }

    pub fn is_open(&self) -> bool {
        matches!(&*self.state.borrow(), State::Open { .. })
    }

    /// Read through the cell.
    pub fn get(&self, frames: &[Frame]) -> Value {
        match &*self.state.borrow() {
            State::Open { frame, slot } => frames
                .get(*frame)
                .and_then(|f| f.locals.get(*slot))
                .cloned()
                .unwrap_or(Value::Null),
            State::Closed(value) => value.clone(),
        }
    }

    /// Write through the cell.
    pub fn set(&self, frames: &mut [Frame], value: Value) {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            State::Open { frame, slot } => {
                if let Some(local) = frames.get_mut(*frame).and_then(|f| f.locals.get_mut(*slot)) {
                    *local = value;
                }
            }
            State::Closed(stored) => *stored = value,
        }
    }

    /// Transition open→closed, capturing the given value. No-op when
    /// already closed.
    pub fn close(&self, value: Value) {
        let mut state = self.state.borrow_mut();
        if matches!(&*state, State::Open { .. }) {
            *state = State::Closed(value);
        }
    }

    /// The value of a closed cell (null while still open). Used by
    /// interpreter duplication, which only runs when no frames are live.
    pub fn closed_value(&self) -> Value {
        match &*self.state.borrow() {
            State::Open { .. } => Value::Null,
            State::Closed(value) => value.clone(),
        }
    }
}
