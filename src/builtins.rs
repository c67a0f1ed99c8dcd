//! Native procedures installed into every interpreter's globals.
//!
//! The two-operand helpers (`add`, `car`, ...) are shared with the VM's
//! primitive instructions so `(+ a b)` behaves the same whether it runs as an
//! `ADD` or as a call to the global `+`.

use std::rc::Rc;

use crate::object::{Closure, NativeFn, Object, ProcedureError};
use crate::state::Interpreter;
use crate::vm::{RuntimeError, VmResult};

type PrimResult = Result<Object, ProcedureError>;

fn expect_number(v: &Object) -> Result<f64, ProcedureError> {
    match v {
        Object::Number(n) => Ok(*n),
        other => Err(ProcedureError::new(format!("expected a number, got {} ({})", other, other.type_tag()))),
    }
}

pub(crate) fn add(x: &Object, y: &Object) -> PrimResult {
    Ok(Object::Number(expect_number(x)? + expect_number(y)?))
}

pub(crate) fn sub(x: &Object, y: &Object) -> PrimResult {
    Ok(Object::Number(expect_number(x)? - expect_number(y)?))
}

pub(crate) fn mul(x: &Object, y: &Object) -> PrimResult {
    Ok(Object::Number(expect_number(x)? * expect_number(y)?))
}

pub(crate) fn div(x: &Object, y: &Object) -> PrimResult {
    let (x, y) = (expect_number(x)?, expect_number(y)?);
    if y == 0.0 {
        return Err(ProcedureError::new("division by zero"));
    }
    Ok(Object::Number(x / y))
}

pub(crate) fn compare(x: &Object, y: &Object, holds: fn(f64, f64) -> bool) -> PrimResult {
    Ok(Object::Boolean(holds(expect_number(x)?, expect_number(y)?)))
}

pub(crate) fn car(x: &Object) -> PrimResult {
    x.as_pair()
        .map(|p| p.car.clone())
        .ok_or_else(|| ProcedureError::new(format!("expected a pair, got {}", x)))
}

pub(crate) fn cdr(x: &Object) -> PrimResult {
    x.as_pair()
        .map(|p| p.cdr.clone())
        .ok_or_else(|| ProcedureError::new(format!("expected a pair, got {}", x)))
}

// ── variadic arithmetic ─────────────────────────────────────────────

fn fold_numbers(args: &[Object], init: f64, op: fn(&Object, &Object) -> PrimResult) -> VmResult<Object> {
    let mut acc = Object::Number(init);
    for arg in args {
        acc = op(&acc, arg)?;
    }
    Ok(acc)
}

fn native_add(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    fold_numbers(&args, 0.0, add)
}

fn native_mul(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    fold_numbers(&args, 1.0, mul)
}

/// `(- x)` negates, `(- x y ...)` subtracts left to right.
fn native_sub(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    match args.as_slice() {
        [x] => Ok(sub(&Object::Number(0.0), x)?),
        [first, rest @ ..] => {
            let total = fold_numbers(rest, 0.0, add)?;
            Ok(sub(first, &total)?)
        }
        [] => Err(ProcedureError::new("expected at least one argument").into()),
    }
}

fn native_div(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    match args.as_slice() {
        [x] => Ok(div(&Object::Number(1.0), x)?),
        [first, rest @ ..] => {
            let mut acc = first.clone();
            for arg in rest {
                acc = div(&acc, arg)?;
            }
            Ok(acc)
        }
        [] => Err(ProcedureError::new("expected at least one argument").into()),
    }
}

/// Chained comparison: `(< a b c)` holds when every adjacent pair does.
fn chain(args: &[Object], holds: fn(f64, f64) -> bool) -> VmResult<Object> {
    for arg in args {
        expect_number(arg)?;
    }
    for w in args.windows(2) {
        if compare(&w[0], &w[1], holds)? == Object::Boolean(false) {
            return Ok(Object::Boolean(false));
        }
    }
    Ok(Object::Boolean(true))
}

fn native_num_eq(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    chain(&args, |a, b| a == b)
}

fn native_lt(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    chain(&args, |a, b| a < b)
}

fn native_gt(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    chain(&args, |a, b| a > b)
}

fn native_le(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    chain(&args, |a, b| a <= b)
}

fn native_ge(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    chain(&args, |a, b| a >= b)
}

// ── pairs and lists ─────────────────────────────────────────────────

fn native_car(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    Ok(car(&args[0])?)
}

fn native_cdr(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    Ok(cdr(&args[0])?)
}

fn native_cons(_: &mut Interpreter, mut args: Vec<Object>) -> VmResult<Object> {
    let cdr = args.pop().unwrap_or(Object::Nil);
    let car = args.pop().unwrap_or(Object::Nil);
    Ok(Object::cons(car, cdr))
}

fn native_list(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    Ok(Object::list(args))
}

fn native_length(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    let items = args[0].to_vec().map_err(|e| ProcedureError::new(e.to_string()))?;
    Ok(Object::Number(items.len() as f64))
}

// ── predicates ──────────────────────────────────────────────────────

fn is_tagged(args: &[Object], test: fn(&Object) -> bool) -> VmResult<Object> {
    Ok(Object::Boolean(test(&args[0])))
}

fn native_null(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| matches!(v, Object::Nil))
}

fn native_pair(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| matches!(v, Object::Pair(_)))
}

fn native_number(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| matches!(v, Object::Number(_)))
}

fn native_symbol(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| matches!(v, Object::Symbol(_)))
}

fn native_string(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| matches!(v, Object::String(_)))
}

fn native_boolean(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| matches!(v, Object::Boolean(_)))
}

fn native_procedure(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| matches!(v, Object::Closure(_)))
}

fn native_not(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    is_tagged(&args, |v| !v.is_truthy())
}

fn native_eq(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    Ok(Object::Boolean(args[0].is_eq(&args[1])))
}

fn native_equal(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    Ok(Object::Boolean(args[0] == args[1]))
}

// ── control and output ──────────────────────────────────────────────

/// `(apply proc a b ... lst)`: the last argument is spread as trailing arguments.
fn native_apply(interp: &mut Interpreter, mut args: Vec<Object>) -> VmResult<Object> {
    let tail = args.pop().unwrap_or(Object::Nil);
    let mut call_args = args.split_off(1);
    let proc = args.pop().unwrap_or(Object::Nil);
    call_args.extend(tail.to_vec().map_err(|e| ProcedureError::new(e.to_string()))?);
    interp.apply(proc, call_args)
}

fn write_out(interp: &mut Interpreter, text: &str) -> VmResult<()> {
    interp
        .output()
        .write_all(text.as_bytes())
        .map_err(|e| RuntimeError::from(ProcedureError::new(e.to_string())))
}

fn native_display(interp: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    write_out(interp, &args[0].to_string())?;
    Ok(Object::Undefined)
}

fn native_newline(interp: &mut Interpreter, _: Vec<Object>) -> VmResult<Object> {
    write_out(interp, "\n")?;
    Ok(Object::Undefined)
}

fn native_error(_: &mut Interpreter, args: Vec<Object>) -> VmResult<Object> {
    let message = args.iter().map(Object::to_string).collect::<Vec<_>>().join(" ");
    Ok(Object::Error(Rc::new(ProcedureError::new(message))))
}

type Native = fn(&mut Interpreter, Vec<Object>) -> VmResult<Object>;

/// (name, min args, max args, function)
const NATIVES: &[(&str, usize, Option<usize>, Native)] = &[
    ("+", 0, None, native_add),
    ("-", 1, None, native_sub),
    ("*", 0, None, native_mul),
    ("/", 1, None, native_div),
    ("=", 1, None, native_num_eq),
    ("<", 1, None, native_lt),
    (">", 1, None, native_gt),
    ("<=", 1, None, native_le),
    (">=", 1, None, native_ge),
    ("car", 1, Some(1), native_car),
    ("cdr", 1, Some(1), native_cdr),
    ("cons", 2, Some(2), native_cons),
    ("list", 0, None, native_list),
    ("length", 1, Some(1), native_length),
    ("null?", 1, Some(1), native_null),
    ("pair?", 1, Some(1), native_pair),
    ("number?", 1, Some(1), native_number),
    ("symbol?", 1, Some(1), native_symbol),
    ("string?", 1, Some(1), native_string),
    ("boolean?", 1, Some(1), native_boolean),
    ("procedure?", 1, Some(1), native_procedure),
    ("not", 1, Some(1), native_not),
    ("eq?", 2, Some(2), native_eq),
    ("equal?", 2, Some(2), native_equal),
    ("apply", 2, None, native_apply),
    ("display", 1, Some(1), native_display),
    ("newline", 0, Some(0), native_newline),
    ("error", 0, None, native_error),
];

/// Install the base procedures. Startup bindings never count as rebinding a
/// primitive.
pub(crate) fn open_base(interp: &mut Interpreter) {
    for &(name, min_args, max_args, f) in NATIVES {
        let func: NativeFn = Rc::new(f);
        let closure = Closure::native(name, min_args, max_args, func);
        interp.globals.insert(name.into(), Object::Closure(Rc::new(closure)));
    }
}
