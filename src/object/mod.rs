use std::borrow::Borrow;
use std::fmt;
use std::rc::Rc;

pub mod closure;
pub use closure::{ArgMode, Closure, ClosureProto, NativeClosure, NativeFn, SchemeClosure, UpvalueDesc};

/// Interned symbol name. Two symbols are the same symbol when their names match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

/// A cons cell. Lists are chains of pairs ending in `Object::Nil`.
#[derive(Debug, Clone)]
pub struct Pair {
    pub car: Object,
    pub cdr: Object,
}

fn detach(obj: &mut Object, pending: &mut Vec<Rc<Pair>>) {
    if matches!(obj, Object::Pair(_)) {
        if let Object::Pair(rc) = std::mem::replace(obj, Object::Nil) {
            pending.push(rc);
        }
    }
}

// Deep lists would otherwise drop recursively, one host frame per cell.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach(&mut self.car, &mut pending);
        detach(&mut self.cdr, &mut pending);
        while let Some(rc) = pending.pop() {
            if let Ok(mut pair) = Rc::try_unwrap(rc) {
                detach(&mut pair.car, &mut pending);
                detach(&mut pair.cdr, &mut pending);
            }
        }
    }
}

/// A language-level error raised by a procedure. The message gains the name of
/// every native procedure it unwinds through (`car: expected a pair, got 1`).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ProcedureError {
    pub message: String,
}

impl ProcedureError {
    pub fn new(message: impl Into<String>) -> Self {
        ProcedureError { message: message.into() }
    }

    pub fn prefix(&mut self, name: &str) {
        self.message = format!("{}: {}", name, self.message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Number,
    String,
    Symbol,
    Pair,
    Boolean,
    Nil,
    Undefined,
    Closure,
    Error,
}

impl ObjectType {
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Number => "number",
            ObjectType::String => "string",
            ObjectType::Symbol => "symbol",
            ObjectType::Pair => "pair",
            ObjectType::Boolean => "boolean",
            ObjectType::Nil => "nil",
            ObjectType::Undefined => "undefined",
            ObjectType::Closure => "closure",
            ObjectType::Error => "error",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub enum Object {
    Number(f64),
    String(Rc<str>),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    Boolean(bool),
    Nil,
    Undefined,
    Closure(Rc<Closure>),
    Error(Rc<ProcedureError>),
}

/// Returned by [`Object::to_vec`] when a `cdr` chain ends in something other than nil.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("not a proper list: {0}")]
pub struct NotAList(pub String);

impl Object {
    pub fn string(s: &str) -> Self {
        Object::String(Rc::from(s))
    }

    pub fn symbol(name: &str) -> Self {
        Object::Symbol(Symbol::new(name))
    }

    pub fn cons(car: Object, cdr: Object) -> Self {
        Object::Pair(Rc::new(Pair { car, cdr }))
    }

    /// Build a proper list from `items`, preserving order.
    pub fn list(items: impl IntoIterator<Item = Object, IntoIter: DoubleEndedIterator>) -> Self {
        Self::list_with_tail(items, Object::Nil)
    }

    pub fn list_with_tail(
        items: impl IntoIterator<Item = Object, IntoIter: DoubleEndedIterator>,
        tail: Object,
    ) -> Self {
        items.into_iter().rev().fold(tail, |cdr, car| Object::cons(car, cdr))
    }

    pub fn type_tag(&self) -> ObjectType {
        match self {
            Object::Number(_) => ObjectType::Number,
            Object::String(_) => ObjectType::String,
            Object::Symbol(_) => ObjectType::Symbol,
            Object::Pair(_) => ObjectType::Pair,
            Object::Boolean(_) => ObjectType::Boolean,
            Object::Nil => ObjectType::Nil,
            Object::Undefined => ObjectType::Undefined,
            Object::Closure(_) => ObjectType::Closure,
            Object::Error(_) => ObjectType::Error,
        }
    }

    /// Everything except `#f` counts as true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Object::Boolean(false))
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Object::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match self {
            Object::Pair(p) => Some(p),
            _ => None,
        }
    }

    /// Flatten a list into its elements. Nil flattens to an empty vector.
    pub fn to_vec(&self) -> Result<Vec<Object>, NotAList> {
        let mut items = Vec::new();
        let mut cur = self;
        loop {
            match cur {
                Object::Nil => return Ok(items),
                Object::Pair(p) => {
                    items.push(p.car.clone());
                    cur = &p.cdr;
                }
                _ => return Err(NotAList(self.to_string())),
            }
        }
    }

    /// Identity for heap objects, value for immediates (`eq?`).
    pub fn is_eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Pair(a), Object::Pair(b)) => Rc::ptr_eq(a, b),
            (Object::String(a), Object::String(b)) => Rc::ptr_eq(a, b),
            (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
            (Object::Error(a), Object::Error(b)) => Rc::ptr_eq(a, b),
            (Object::Number(a), Object::Number(b)) => a == b,
            _ => self == other,
        }
    }
}

/// Structural equality (`equal?`). Closures and errors compare by identity.
impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Number(a), Object::Number(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Symbol(a), Object::Symbol(b)) => a == b,
            (Object::Pair(a), Object::Pair(b)) => {
                let (mut a, mut b) = (a, b);
                loop {
                    if Rc::ptr_eq(a, b) {
                        return true;
                    }
                    if a.car != b.car {
                        return false;
                    }
                    match (&a.cdr, &b.cdr) {
                        (Object::Pair(x), Object::Pair(y)) => (a, b) = (x, y),
                        (x, y) => return x == y,
                    }
                }
            }
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Nil, Object::Nil) => true,
            (Object::Undefined, Object::Undefined) => true,
            (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
            (Object::Error(a), Object::Error(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<f64> for Object {
    fn from(n: f64) -> Self {
        Object::Number(n)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Object::Boolean(b)
    }
}

fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        f.write_str("+nan.0")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "+inf.0" } else { "-inf.0" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Number(n) => fmt_number(*n, f),
            Object::String(s) => f.write_str(s),
            Object::Symbol(s) => write!(f, "{}", s),
            Object::Boolean(true) => f.write_str("#t"),
            Object::Boolean(false) => f.write_str("#f"),
            Object::Nil => f.write_str("()"),
            Object::Undefined => f.write_str("#<undefined>"),
            Object::Closure(cl) => match cl.name() {
                Some(name) => write!(f, "#<procedure {}>", name),
                None => f.write_str("#<procedure>"),
            },
            Object::Error(e) => write!(f, "#<error {}>", e.message),
            Object::Pair(p) => {
                write!(f, "({}", p.car)?;
                let mut rest = &p.cdr;
                loop {
                    match rest {
                        Object::Nil => break,
                        Object::Pair(next) => {
                            write!(f, " {}", next.car)?;
                            rest = &next.cdr;
                        }
                        tail => {
                            write!(f, " . {}", tail)?;
                            break;
                        }
                    }
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn nums(ns: &[f64]) -> Object {
        Object::list(ns.iter().map(|n| Object::Number(*n)).collect::<Vec<_>>())
    }

    #[test]
    fn render_numbers() {
        assert_eq!(Object::Number(1.0).to_string(), "1");
        assert_eq!(Object::Number(-42.0).to_string(), "-42");
        assert_eq!(Object::Number(2.5).to_string(), "2.5");
        assert_eq!(Object::Number(f64::INFINITY).to_string(), "+inf.0");
        assert_eq!(Object::Number(f64::NAN).to_string(), "+nan.0");
    }

    #[test]
    fn render_lists() {
        assert_eq!(nums(&[1.0, 2.0, 3.0]).to_string(), "(1 2 3)");
        assert_eq!(Object::cons(Object::Number(1.0), Object::Number(2.0)).to_string(), "(1 . 2)");
        let nested = Object::list(vec![nums(&[1.0]), Object::symbol("a"), Object::Nil]);
        assert_eq!(nested.to_string(), "((1) a ())");
    }

    #[test]
    fn render_atoms() {
        assert_eq!(Object::Boolean(true).to_string(), "#t");
        assert_eq!(Object::Boolean(false).to_string(), "#f");
        assert_eq!(Object::Nil.to_string(), "()");
        assert_eq!(Object::Undefined.to_string(), "#<undefined>");
        assert_eq!(Object::string("hi").to_string(), "hi");
        let err = Object::Error(Rc::new(ProcedureError::new("boom")));
        assert_eq!(err.to_string(), "#<error boom>");
    }

    #[test]
    fn type_tags() {
        assert_eq!(Object::Number(0.0).type_tag().name(), "number");
        assert_eq!(Object::Nil.type_tag(), ObjectType::Nil);
        assert_eq!(nums(&[1.0]).type_tag(), ObjectType::Pair);
        assert_eq!(Object::symbol("x").type_tag().to_string(), "symbol");
    }

    #[test]
    fn flatten_proper_list() {
        let items = nums(&[1.0, 2.0]).to_vec().unwrap();
        assert_eq!(items, vec![Object::Number(1.0), Object::Number(2.0)]);
        assert!(Object::Nil.to_vec().unwrap().is_empty());
    }

    #[test]
    fn flatten_dotted_list_fails() {
        let dotted = Object::list_with_tail(vec![Object::Number(1.0)], Object::Number(2.0));
        assert!(dotted.to_vec().is_err());
        assert!(Object::Number(3.0).to_vec().is_err());
    }

    #[test]
    fn truthiness() {
        assert!(Object::Number(0.0).is_truthy());
        assert!(Object::Nil.is_truthy());
        assert!(!Object::Boolean(false).is_truthy());
    }

    #[test]
    fn equality_structural_vs_identity() {
        assert_eq!(nums(&[1.0, 2.0]), nums(&[1.0, 2.0]));
        assert!(!nums(&[1.0]).is_eq(&nums(&[1.0])));
        let s = Object::symbol("a");
        assert!(s.is_eq(&Object::symbol("a")));
    }

    #[test]
    fn long_lists_drop_and_compare_without_deep_recursion() {
        let long = || Object::list((0..500_000).map(|n| Object::Number(n as f64)).collect::<Vec<_>>());
        assert_eq!(long(), long());
        drop(long());
    }

    #[test]
    fn procedure_error_prefix() {
        let mut e = ProcedureError::new("expected a pair");
        e.prefix("car");
        assert_eq!(e.to_string(), "car: expected a pair");
    }
}
