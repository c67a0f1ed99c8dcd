use std::fmt;
use std::rc::Rc;

use super::{Object, Symbol};
use crate::state::Interpreter;
use crate::vm::upvalue::UpValue;
use crate::vm::{Instruction, RuntimeError};

/// Host callback behind a native procedure. Receives the arguments already
/// popped off the value stack, in call order.
pub type NativeFn = Rc<dyn Fn(&mut Interpreter, Vec<Object>) -> Result<Object, RuntimeError>>;

/// How call-site arguments bind to a prototype's formals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ArgMode {
    /// `(lambda (a b) ...)`: argument count must match exactly.
    Fixed,
    /// `(lambda args ...)`: the lone formal receives every argument as a list.
    Vararg,
    /// `(lambda (a . rest) ...)`: trailing arguments are collected into the last formal.
    Rest,
}

/// Where a closure finds one of its captured variables when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum UpvalueDesc {
    /// Register of the enclosing function's frame.
    Local(usize),
    /// Index into the enclosing closure's own upvalues.
    Enclosing(usize),
}

/// One compiled function body.
#[derive(Debug, Clone)]
pub struct ClosureProto {
    pub name: Option<Symbol>,
    pub code: Vec<Instruction>,
    pub constants: Vec<Object>,
    pub protos: Vec<Rc<ClosureProto>>,
    pub params: Vec<Symbol>,
    pub mode: ArgMode,
    pub upvalues: Vec<UpvalueDesc>,
    /// Frame size: every register the body touches lies below this.
    pub reg_count: usize,
}

impl ClosureProto {
    pub fn new() -> Self {
        ClosureProto {
            name: None,
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            params: Vec::new(),
            mode: ArgMode::Fixed,
            upvalues: Vec::new(),
            reg_count: 0,
        }
    }
}

impl Default for ClosureProto {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NativeClosure {
    pub name: Symbol,
    pub min_args: usize,
    /// `None` means unbounded.
    pub max_args: Option<usize>,
    pub func: NativeFn,
}

pub struct SchemeClosure {
    pub proto: Rc<ClosureProto>,
    pub upvalues: Vec<UpValue>,
}

pub enum Closure {
    Native(NativeClosure),
    Scheme(SchemeClosure),
}

impl Closure {
    pub fn native(name: &str, min_args: usize, max_args: Option<usize>, func: NativeFn) -> Self {
        Closure::Native(NativeClosure { name: Symbol::new(name), min_args, max_args, func })
    }

    pub fn scheme(proto: Rc<ClosureProto>, upvalues: Vec<UpValue>) -> Self {
        Closure::Scheme(SchemeClosure { proto, upvalues })
    }

    pub fn name(&self) -> Option<&Symbol> {
        match self {
            Closure::Native(n) => Some(&n.name),
            Closure::Scheme(s) => s.proto.name.as_ref(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Closure::Native(_))
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closure::Native(n) => f
                .debug_struct("Native")
                .field("name", &n.name)
                .field("min_args", &n.min_args)
                .field("max_args", &n.max_args)
                .finish_non_exhaustive(),
            Closure::Scheme(s) => f
                .debug_struct("Scheme")
                .field("name", &s.proto.name)
                .field("upvalues", &s.upvalues.len())
                .finish(),
        }
    }
}
