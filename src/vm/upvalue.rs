use std::cell::RefCell;
use std::rc::Rc;

use super::stack::ValueStack;
use super::RuntimeError;
use crate::object::Object;

#[derive(Debug)]
enum Cell {
    /// Still lives in the stack slot at this absolute index.
    Open(usize),
    /// The defining frame has returned; the value was copied out.
    Closed(Object),
}

/// A captured variable. Clones share one cell, so every closure capturing the
/// same slot sees the same writes.
#[derive(Debug, Clone)]
pub struct UpValue(Rc<RefCell<Cell>>);

impl UpValue {
    fn open(index: usize) -> Self {
        UpValue(Rc::new(RefCell::new(Cell::Open(index))))
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.0.borrow(), Cell::Open(_))
    }

    pub fn same_cell(&self, other: &UpValue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn get(&self, stack: &ValueStack) -> Result<Object, RuntimeError> {
        match &*self.0.borrow() {
            Cell::Open(index) => stack.get(*index).cloned(),
            Cell::Closed(value) => Ok(value.clone()),
        }
    }

    pub fn set(&self, stack: &mut ValueStack, value: Object) -> Result<(), RuntimeError> {
        let mut cell = self.0.borrow_mut();
        match &mut *cell {
            Cell::Open(index) => stack.set(*index, value),
            Cell::Closed(slot) => {
                *slot = value;
                Ok(())
            }
        }
    }

    fn close(&self, stack: &ValueStack) {
        let mut cell = self.0.borrow_mut();
        if let Cell::Open(index) = *cell {
            let value = stack.get(index).cloned().unwrap_or(Object::Undefined);
            *cell = Cell::Closed(value);
        }
    }
}

/// Open upvalues, kept sorted by ascending stack index.
#[derive(Debug, Default)]
pub struct OpenUpValues {
    open: Vec<(usize, UpValue)>,
}

impl OpenUpValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Return the upvalue for `index`, creating it on first capture.
    pub fn find_or_create(&mut self, index: usize) -> UpValue {
        match self.open.binary_search_by_key(&index, |(i, _)| *i) {
            Ok(pos) => self.open[pos].1.clone(),
            Err(pos) => {
                let uv = UpValue::open(index);
                self.open.insert(pos, (index, uv.clone()));
                uv
            }
        }
    }

    /// Close every upvalue at or above `base`, copying its slot out of the stack.
    pub fn close_frame(&mut self, base: usize, stack: &ValueStack) {
        let split = self.open.partition_point(|(i, _)| *i < base);
        for (_, uv) in self.open.drain(split..) {
            uv.close(stack);
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.open.iter().map(|(i, _)| *i)
    }
}
