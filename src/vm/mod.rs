use std::rc::Rc;

use crate::builtins;
use crate::compiler::disasm;
use crate::object::{Closure, ClosureProto, Object, ProcedureError, Symbol, UpvalueDesc};
use crate::state::Interpreter;

pub mod opcode;
pub mod stack;
pub mod upvalue;

pub use opcode::Instruction;
use opcode::*;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Procedure(#[from] ProcedureError),
    #[error("{name}: too few arguments (at least: {min} got: {got})")]
    TooFewArguments { name: String, min: usize, got: usize },
    #[error("{name}: too many arguments (at most: {max} got: {got})")]
    TooManyArguments { name: String, max: usize, got: usize },
    #[error("{name}: invalid number of arguments (expected: {expected} got: {got})")]
    ArityMismatch { name: String, expected: usize, got: usize },
    #[error("unbound variable: {name}")]
    UnboundVariable { name: String },
    #[error("not a procedure: {value}")]
    NotCallable { value: String },
    #[error("value stack overflow (capacity: {capacity})")]
    StackOverflow { capacity: usize },
    #[error("maximum call depth exceeded (capacity: {capacity})")]
    CallDepthExceeded { capacity: usize },
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u8 },
    #[error("internal error: {0}")]
    Internal(String),
}

pub type VmResult<T> = Result<T, RuntimeError>;

fn constant(proto: &ClosureProto, index: usize) -> VmResult<&Object> {
    proto.constants.get(index).ok_or_else(|| {
        RuntimeError::Internal(format!("constant index {} out of range", index))
    })
}

fn global_name(proto: &ClosureProto, index: usize) -> VmResult<&Symbol> {
    match constant(proto, index)? {
        Object::Symbol(sym) => Ok(sym),
        other => Err(RuntimeError::Internal(format!("global name must be a symbol, got {}", other))),
    }
}

fn jump(pc: usize, offset: i32) -> VmResult<usize> {
    pc.checked_add_signed(offset as isize)
        .ok_or_else(|| RuntimeError::Internal(format!("jump from {} by {} leaves the function", pc, offset)))
}

impl Interpreter {
    #[inline(always)]
    fn reg(&self, base: usize, r: usize) -> VmResult<Object> {
        self.stack.get(base + r).cloned()
    }

    #[inline(always)]
    fn set_reg(&mut self, base: usize, r: usize, value: Object) -> VmResult<()> {
        self.stack.set(base + r, value)
    }

    /// Run the innermost frame until its RETURN. Yields the absolute stack
    /// index of the returned value; the caller performs `postcall`.
    pub(crate) fn execute(&mut self) -> VmResult<usize> {
        let ci = self
            .frames
            .last()
            .cloned()
            .ok_or_else(|| RuntimeError::Internal("execute without an active frame".into()))?;
        let Closure::Scheme(cl) = &*ci.closure else {
            return Err(RuntimeError::Internal("execute on a native frame".into()));
        };
        let proto = Rc::clone(&cl.proto);
        let base = ci.base;
        let mut pc = 0usize;
        let trace = self.config.debug_tracing || tracing::enabled!(tracing::Level::TRACE);

        loop {
            let inst = *proto.code.get(pc).ok_or_else(|| {
                RuntimeError::Internal(format!("pc {} ran past the end of the function", pc))
            })?;
            if trace {
                tracing::trace!(
                    depth = self.frames.len(),
                    base,
                    pc,
                    "{}",
                    disasm::format_instruction(&proto, inst)
                );
            }
            pc += 1;
            let a = arg_a(inst);

            match opcode(inst) {
                OP_MOVE => {
                    let v = self.reg(base, arg_b(inst))?;
                    self.set_reg(base, a, v)?;
                }
                OP_LOADK => {
                    let k = constant(&proto, arg_bx(inst))?.clone();
                    self.set_reg(base, a, k)?;
                }
                OP_GETGLOBAL => {
                    let name = global_name(&proto, arg_bx(inst))?;
                    let v = self
                        .globals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::UnboundVariable { name: name.to_string() })?;
                    self.set_reg(base, a, v)?;
                }
                OP_SETGLOBAL => {
                    let name = global_name(&proto, arg_bx(inst))?.clone();
                    let v = self.reg(base, a)?;
                    self.bind_global(name, v);
                }
                OP_GETUPVAL => {
                    let uv = cl.upvalues.get(arg_b(inst)).ok_or_else(|| {
                        RuntimeError::Internal(format!("upvalue index {} out of range", arg_b(inst)))
                    })?;
                    let v = uv.get(&self.stack)?;
                    self.set_reg(base, a, v)?;
                }
                OP_SETUPVAL => {
                    let uv = cl.upvalues.get(arg_b(inst)).ok_or_else(|| {
                        RuntimeError::Internal(format!("upvalue index {} out of range", arg_b(inst)))
                    })?;
                    let v = self.reg(base, a)?;
                    uv.set(&mut self.stack, v)?;
                }
                OP_CLOSURE => {
                    let child = proto.protos.get(arg_bx(inst)).ok_or_else(|| {
                        RuntimeError::Internal(format!("prototype index {} out of range", arg_bx(inst)))
                    })?;
                    let mut upvalues = Vec::with_capacity(child.upvalues.len());
                    for desc in &child.upvalues {
                        let uv = match *desc {
                            UpvalueDesc::Local(r) => self.open_upvalues.find_or_create(base + r),
                            UpvalueDesc::Enclosing(i) => cl.upvalues.get(i).cloned().ok_or_else(|| {
                                RuntimeError::Internal(format!("enclosing upvalue {} out of range", i))
                            })?,
                        };
                        upvalues.push(uv);
                    }
                    let closure = Closure::scheme(Rc::clone(child), upvalues);
                    self.set_reg(base, a, Object::Closure(Rc::new(closure)))?;
                }
                OP_CALL => {
                    let func = base + a;
                    let nargs = arg_b(inst);
                    self.stack.truncate(func + nargs + 1);
                    self.call_at(func)?;
                    // the callee collapsed onto `func`; restore this frame's window
                    self.stack.grow_to(base + proto.reg_count)?;
                }
                OP_RETURN => return Ok(base + a),
                OP_TEST => {
                    let want = arg_c(inst) != 0;
                    if self.reg(base, a)?.is_truthy() != want {
                        pc += 1;
                    }
                }
                OP_JMP => {
                    pc = jump(pc, arg_sbx(inst))?;
                }
                op @ (OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_NUMEQ | OP_LT | OP_GT | OP_LE
                | OP_GE | OP_CONS) => {
                    let lhs = self.reg(base, arg_b(inst))?;
                    let rhs = self.reg(base, arg_c(inst))?;
                    let v = self.primitive(op, vec![lhs, rhs])?;
                    self.set_reg(base, a, v)?;
                }
                op @ (OP_CAR | OP_CDR) => {
                    let arg = self.reg(base, arg_b(inst))?;
                    let v = self.primitive(op, vec![arg])?;
                    self.set_reg(base, a, v)?;
                }
                op => return Err(RuntimeError::UnknownOpcode { op }),
            }
        }
    }

    /// Evaluate a lowered primitive. If the program rebound the primitive's
    /// global name, call whatever the name holds now instead.
    fn primitive(&mut self, op: u8, args: Vec<Object>) -> VmResult<Object> {
        let name = primitive_name(op).ok_or(RuntimeError::UnknownOpcode { op })?;
        if self.rebound_primitives.contains(name) {
            let proc = self
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::UnboundVariable { name: name.to_string() })?;
            return self.apply(proc, args);
        }
        let result = match (op, args.as_slice()) {
            (OP_ADD, [x, y]) => builtins::add(x, y),
            (OP_SUB, [x, y]) => builtins::sub(x, y),
            (OP_MUL, [x, y]) => builtins::mul(x, y),
            (OP_DIV, [x, y]) => builtins::div(x, y),
            (OP_NUMEQ, [x, y]) => builtins::compare(x, y, |p, q| p == q),
            (OP_LT, [x, y]) => builtins::compare(x, y, |p, q| p < q),
            (OP_GT, [x, y]) => builtins::compare(x, y, |p, q| p > q),
            (OP_LE, [x, y]) => builtins::compare(x, y, |p, q| p <= q),
            (OP_GE, [x, y]) => builtins::compare(x, y, |p, q| p >= q),
            (OP_CONS, [x, y]) => Ok(Object::cons(x.clone(), y.clone())),
            (OP_CAR, [x]) => builtins::car(x),
            (OP_CDR, [x]) => builtins::cdr(x),
            _ => return Err(RuntimeError::Internal(format!("bad operands for {}", name))),
        };
        result.map_err(|mut e| {
            e.prefix(name);
            RuntimeError::Procedure(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::object::ArgMode;

    fn proto_with(code: Vec<Instruction>, constants: Vec<Object>, reg_count: usize) -> Rc<ClosureProto> {
        Rc::new(ClosureProto { code, constants, reg_count, mode: ArgMode::Fixed, ..ClosureProto::new() })
    }

    fn run_proto(interp: &mut Interpreter, proto: Rc<ClosureProto>) -> VmResult<Object> {
        interp.stack.push(Object::Closure(Rc::new(Closure::scheme(proto, Vec::new()))))?;
        interp.call(0)?;
        Ok(interp.stack.pop().unwrap_or(Object::Undefined))
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut out) = self.0.lock() {
                out.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `src` on an interpreter without `debug_tracing`, under a subscriber
    /// capped at `level`, and return what was logged.
    fn logged_at(level: tracing::Level, src: &str) -> String {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            Interpreter::new(Config::default()).exec_string(src).unwrap();
        });
        let bytes = out.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[test]
    fn trace_level_subscriber_sees_every_instruction() {
        let log = logged_at(tracing::Level::TRACE, "(+ 40 2)");
        assert!(log.contains("LOADK"), "{log}");
        assert!(log.contains("ADD"), "{log}");
        let log = logged_at(tracing::Level::INFO, "(+ 40 2)");
        assert!(!log.contains("LOADK"), "{log}");
    }

    #[test]
    fn hand_assembled_add() {
        let mut interp = Interpreter::new(Config::default());
        let code = vec![
            encode_abx(OP_LOADK, 0, 0),
            encode_abx(OP_LOADK, 1, 1),
            encode_abc(OP_ADD, 2, 0, 1),
            encode_abc(OP_RETURN, 2, 0, 0),
        ];
        let proto = proto_with(code, vec![Object::Number(40.0), Object::Number(2.0)], 3);
        assert_eq!(run_proto(&mut interp, proto).unwrap(), Object::Number(42.0));
        assert!(interp.stack.is_empty());
    }

    #[test]
    fn test_skips_jump_when_truthy() {
        let mut interp = Interpreter::new(Config::default());
        // r0 = #t; if r0 then r1 = 1 else r1 = 2
        let code = vec![
            encode_abx(OP_LOADK, 0, 0),
            encode_abc(OP_TEST, 0, 0, 0),
            encode_asbx(OP_JMP, 0, 2),
            encode_abx(OP_LOADK, 1, 1),
            encode_asbx(OP_JMP, 0, 1),
            encode_abx(OP_LOADK, 1, 2),
            encode_abc(OP_RETURN, 1, 0, 0),
        ];
        let consts = vec![Object::Boolean(true), Object::Number(1.0), Object::Number(2.0)];
        let proto = proto_with(code.clone(), consts, 2);
        assert_eq!(run_proto(&mut interp, proto).unwrap(), Object::Number(1.0));

        let consts = vec![Object::Boolean(false), Object::Number(1.0), Object::Number(2.0)];
        let proto = proto_with(code, consts, 2);
        assert_eq!(run_proto(&mut interp, proto).unwrap(), Object::Number(2.0));
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let mut interp = Interpreter::new(Config::default());
        let proto = proto_with(vec![encode_abc(99, 0, 0, 0)], Vec::new(), 1);
        assert_eq!(run_proto(&mut interp, proto).unwrap_err(), RuntimeError::UnknownOpcode { op: 99 });
        assert!(interp.stack.is_empty());
        assert!(interp.frames.is_empty());
    }

    #[test]
    fn falling_off_the_end_is_internal() {
        let mut interp = Interpreter::new(Config::default());
        let proto = proto_with(Vec::new(), Vec::new(), 0);
        assert!(matches!(run_proto(&mut interp, proto), Err(RuntimeError::Internal(_))));
    }

    #[test]
    fn primitive_errors_carry_the_name() {
        let mut interp = Interpreter::new(Config::default());
        let code = vec![
            encode_abx(OP_LOADK, 0, 0),
            encode_abc(OP_CAR, 1, 0, 0),
            encode_abc(OP_RETURN, 1, 0, 0),
        ];
        let proto = proto_with(code, vec![Object::Number(1.0)], 2);
        let err = run_proto(&mut interp, proto).unwrap_err();
        assert!(err.to_string().starts_with("car: "), "{}", err);
    }
}
