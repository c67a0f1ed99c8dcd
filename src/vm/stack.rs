use std::rc::Rc;

use super::RuntimeError;
use crate::object::{Closure, Object};

/// The value stack shared by every frame. Registers of a frame are the slots
/// `[base, base + reg_count)`; calls and returns move the top in whole frames.
pub struct ValueStack {
    slots: Vec<Object>,
    capacity: usize,
}

impl ValueStack {
    pub fn new(capacity: usize) -> Self {
        ValueStack { slots: Vec::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, obj: Object) -> Result<(), RuntimeError> {
        if self.slots.len() >= self.capacity {
            return Err(RuntimeError::StackOverflow { capacity: self.capacity });
        }
        self.slots.push(obj);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<Object> {
        self.slots.pop()
    }

    /// Pop the top `n` values, returned bottom-first.
    ///
    /// ```text
    ///      [before]          [after]
    ///   | closure  |      | closure  |
    ///   | arg 1    |  SP->+----------+
    ///   |   ...    |
    ///   | arg N    |      returns [arg 1, ..., arg N]
    /// SP+----------+
    /// ```
    pub fn pop_n(&mut self, n: usize) -> Vec<Object> {
        let at = self.slots.len().saturating_sub(n);
        self.slots.split_off(at)
    }

    pub fn get(&self, index: usize) -> Result<&Object, RuntimeError> {
        self.slots.get(index).ok_or_else(|| {
            RuntimeError::Internal(format!("stack index {} out of range (size {})", index, self.slots.len()))
        })
    }

    pub fn set(&mut self, index: usize, obj: Object) -> Result<(), RuntimeError> {
        let len = self.slots.len();
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = obj;
                Ok(())
            }
            None => Err(RuntimeError::Internal(format!("stack index {} out of range (size {})", index, len))),
        }
    }

    pub fn top(&self) -> Option<&Object> {
        self.slots.last()
    }

    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    /// Extend the stack to `len` slots, filling with undefined.
    pub fn grow_to(&mut self, len: usize) -> Result<(), RuntimeError> {
        if len > self.capacity {
            return Err(RuntimeError::StackOverflow { capacity: self.capacity });
        }
        if len > self.slots.len() {
            self.slots.resize(len, Object::Undefined);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.slots.iter()
    }
}

/// One active call. `base == func_sp + 1` always.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub closure: Rc<Closure>,
    /// First register of the frame.
    pub base: usize,
    /// Slot holding the closure; the result is spliced back here on return.
    pub func_sp: usize,
}

impl CallInfo {
    pub fn new(closure: Rc<Closure>, func_sp: usize) -> Self {
        CallInfo { closure, base: func_sp + 1, func_sp }
    }
}

pub struct CallInfoStack {
    frames: Vec<CallInfo>,
    capacity: usize,
}

impl CallInfoStack {
    pub fn new(capacity: usize) -> Self {
        CallInfoStack { frames: Vec::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, ci: CallInfo) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.capacity {
            return Err(RuntimeError::CallDepthExceeded { capacity: self.capacity });
        }
        self.frames.push(ci);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<CallInfo> {
        self.frames.pop()
    }

    pub fn last(&self) -> Option<&CallInfo> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
    }
}
