use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::rc::Rc;

use crate::compiler;
use crate::config::Config;
use crate::object::{ArgMode, Closure, NativeFn, Object, Symbol};
use crate::recursion::ensure_sufficient_stack;
use crate::vm::opcode::is_primitive;
use crate::vm::stack::{CallInfo, CallInfoStack, ValueStack};
use crate::vm::upvalue::OpenUpValues;
use crate::vm::{RuntimeError, VmResult};
use crate::{builtins, Error};

/// What `precall` left behind.
enum CallKind {
    /// The native already ran; its result sits in the callee slot.
    Native,
    /// A new frame is pushed and the VM loop must drive it.
    Scheme,
}

/// One interpreter instance: value stack, frames, open upvalues and globals.
/// Instances share nothing, so several can live side by side.
pub struct Interpreter {
    pub(crate) stack: ValueStack,
    pub(crate) frames: CallInfoStack,
    pub(crate) globals: HashMap<Symbol, Object>,
    pub(crate) open_upvalues: OpenUpValues,
    /// Primitive names whose global binding was replaced after startup.
    pub(crate) rebound_primitives: HashSet<Symbol>,
    pub(crate) config: Config,
    output: Box<dyn Write>,
}

impl Interpreter {
    pub fn new(config: Config) -> Self {
        let config = config.normalized();
        let mut interp = Interpreter {
            stack: ValueStack::new(config.stack_capacity),
            frames: CallInfoStack::new(config.call_info_capacity),
            globals: HashMap::new(),
            open_upvalues: OpenUpValues::new(),
            rebound_primitives: HashSet::new(),
            config,
            output: Box::new(io::stdout()),
        };
        builtins::open_base(&mut interp);
        tracing::debug!(
            stack_capacity = config.stack_capacity,
            call_info_capacity = config.call_info_capacity,
            globals = interp.globals.len(),
            "interpreter ready"
        );
        interp
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read and compile `source` into a zero-argument closure without running it.
    pub fn compile(&self, source: &str) -> Result<Rc<Closure>, Error> {
        let forms = crate::read(source)?;
        let closure = compiler::compile(&forms)?;
        if let Closure::Scheme(cl) = &*closure {
            tracing::debug!(
                forms = forms.len(),
                instructions = cl.proto.code.len(),
                constants = cl.proto.constants.len(),
                "compiled"
            );
        }
        Ok(closure)
    }

    /// Compile and run `source`. The value of the last form stays on top of the
    /// value stack and is returned.
    pub fn exec_string(&mut self, source: &str) -> Result<Object, Error> {
        let closure = self.compile(source)?;
        if self.frames.is_empty() {
            self.stack.truncate(0);
        }
        self.stack.push(Object::Closure(closure))?;
        self.call(0)?;
        Ok(self.stack.top().cloned().unwrap_or(Object::Undefined))
    }

    /// Call the procedure sitting below the top `nargs` stack values. On return
    /// the result replaces the procedure and the arguments are gone.
    ///
    /// On error the frames pushed by this call are discarded, upvalues pointing
    /// into them are closed and the stack is cut back to below the procedure.
    pub(crate) fn call(&mut self, nargs: usize) -> VmResult<()> {
        let func = self.stack.len().checked_sub(nargs + 1).ok_or_else(|| {
            RuntimeError::Internal(format!("call with {} arguments on a stack of {}", nargs, self.stack.len()))
        })?;
        let depth = self.frames.len();
        self.call_at(func).inspect_err(|err| {
            tracing::debug!(%err, depth, "unwinding");
            self.unwind(depth, func);
        })
    }

    /// Call a procedure value from host code.
    pub fn apply(&mut self, proc: Object, args: Vec<Object>) -> VmResult<Object> {
        let func = self.stack.len();
        let nargs = args.len();
        let pushed = std::iter::once(proc).chain(args).try_for_each(|v| self.stack.push(v));
        if let Err(e) = pushed {
            self.stack.truncate(func);
            return Err(e);
        }
        self.call(nargs)?;
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::Internal("call left no result".into()))
    }

    fn unwind(&mut self, depth: usize, func: usize) {
        self.open_upvalues.close_frame(func, &self.stack);
        self.frames.truncate(depth);
        self.stack.truncate(func);
    }

    pub(crate) fn call_at(&mut self, func: usize) -> VmResult<()> {
        match self.precall(func)? {
            CallKind::Native => Ok(()),
            CallKind::Scheme => {
                let ret = ensure_sufficient_stack(|| self.execute())?;
                self.postcall(ret)
            }
        }
    }

    fn precall(&mut self, func: usize) -> VmResult<CallKind> {
        let closure = match self.stack.get(func)? {
            Object::Closure(cl) => Rc::clone(cl),
            other => return Err(RuntimeError::NotCallable { value: other.to_string() }),
        };
        let nargs = self.stack.len() - func - 1;
        let name = || closure.name().map_or_else(|| "#<procedure>".to_string(), Symbol::to_string);
        if self.config.debug_tracing {
            tracing::debug!(callee = %name(), nargs, func, depth = self.frames.len(), "call");
        }

        match &*closure {
            Closure::Native(native) => {
                if nargs < native.min_args {
                    return Err(RuntimeError::TooFewArguments { name: name(), min: native.min_args, got: nargs });
                }
                match native.max_args {
                    Some(max) if nargs > max => {
                        return Err(RuntimeError::TooManyArguments { name: name(), max, got: nargs });
                    }
                    _ => {}
                }
                self.frames.push(CallInfo::new(Rc::clone(&closure), func))?;
                let args = self.stack.pop_n(nargs);
                let raised = |mut e: crate::object::ProcedureError| {
                    e.prefix(native.name.name());
                    RuntimeError::Procedure(e)
                };
                let result = match (native.func)(self, args) {
                    Ok(Object::Error(e)) => return Err(raised((*e).clone())),
                    Ok(v) => v,
                    Err(RuntimeError::Procedure(e)) => return Err(raised(e)),
                    Err(e) => return Err(e),
                };
                self.stack.push(result)?;
                self.postcall(self.stack.len() - 1)?;
                Ok(CallKind::Native)
            }
            Closure::Scheme(cl) => {
                let proto = &cl.proto;
                let nparams = proto.params.len();
                match proto.mode {
                    ArgMode::Fixed => {
                        if nargs != nparams {
                            return Err(RuntimeError::ArityMismatch { name: name(), expected: nparams, got: nargs });
                        }
                    }
                    ArgMode::Vararg => {
                        let args = self.stack.pop_n(nargs);
                        self.stack.push(Object::list(args))?;
                    }
                    ArgMode::Rest => {
                        if nargs + 1 < nparams {
                            return Err(RuntimeError::TooFewArguments { name: name(), min: nparams - 1, got: nargs });
                        }
                        let rest = self.stack.pop_n(nargs + 1 - nparams);
                        self.stack.push(Object::list(rest))?;
                    }
                }
                self.frames.push(CallInfo::new(Rc::clone(&closure), func))?;
                self.stack.grow_to(func + 1 + proto.reg_count)?;
                Ok(CallKind::Scheme)
            }
        }
    }

    /// Pop the current frame and splice the value at `ret` into its callee slot.
    fn postcall(&mut self, ret: usize) -> VmResult<()> {
        let ci = self
            .frames
            .pop()
            .ok_or_else(|| RuntimeError::Internal("return without an active frame".into()))?;
        if !ci.closure.is_native() {
            self.open_upvalues.close_frame(ci.base, &self.stack);
        }
        let result = self.stack.get(ret)?.clone();
        if self.config.debug_tracing {
            tracing::debug!(result = %result, depth = self.frames.len(), "return");
        }
        self.stack.set(ci.func_sp, result)?;
        self.stack.truncate(ci.func_sp + 1);
        Ok(())
    }

    pub fn get_global(&self, name: &str) -> Option<&Object> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: &str, value: Object) {
        self.bind_global(Symbol::new(name), value);
    }

    pub(crate) fn bind_global(&mut self, name: Symbol, value: Object) {
        if is_primitive(name.name()) && !self.rebound_primitives.contains(&name) {
            tracing::debug!(%name, "primitive rebound");
            self.rebound_primitives.insert(name.clone());
        }
        self.globals.insert(name, value);
    }

    /// Install a host procedure as a global. `max_args: None` accepts any
    /// number of arguments at or above `min_args`.
    pub fn register_native<F>(&mut self, name: &str, min_args: usize, max_args: Option<usize>, f: F) -> VmResult<()>
    where
        F: Fn(&mut Interpreter, Vec<Object>) -> VmResult<Object> + 'static,
    {
        if max_args.is_some_and(|max| max < min_args) {
            return Err(RuntimeError::Internal(format!(
                "{}: maximum arity {:?} below minimum {}",
                name, max_args, min_args
            )));
        }
        let func: NativeFn = Rc::new(f);
        let closure = Closure::native(name, min_args, max_args, func);
        self.set_global(name, Object::Closure(Rc::new(closure)));
        Ok(())
    }

    /// Redirect `display` and `newline`.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub(crate) fn output(&mut self) -> &mut dyn Write {
        self.output.as_mut()
    }

    /// Top of the value stack: the last result after `exec_string`.
    pub fn top(&self) -> Option<&Object> {
        self.stack.top()
    }

    /// Number of active calls.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eval(src: &str) -> Object {
        Interpreter::default().exec_string(src).unwrap()
    }

    #[test]
    fn result_stays_on_top() {
        let mut interp = Interpreter::default();
        let v = interp.exec_string("(+ 1 2)").unwrap();
        assert_eq!(v, Object::Number(3.0));
        assert_eq!(interp.top(), Some(&Object::Number(3.0)));
        assert_eq!(interp.depth(), 0);
    }

    #[test]
    fn globals_from_host() {
        let mut interp = Interpreter::default();
        interp.set_global("x", Object::Number(41.0));
        assert_eq!(interp.exec_string("(+ x 1)").unwrap(), Object::Number(42.0));
        interp.exec_string("(define y 'sym)").unwrap();
        assert_eq!(interp.get_global("y"), Some(&Object::symbol("sym")));
    }

    #[test]
    fn native_registration_and_arity() {
        let mut interp = Interpreter::default();
        interp
            .register_native("twice", 1, Some(1), |_, args| match &args[0] {
                Object::Number(n) => Ok(Object::Number(n * 2.0)),
                other => Err(RuntimeError::NotCallable { value: other.to_string() }),
            })
            .unwrap();
        assert_eq!(interp.exec_string("(twice 21)").unwrap(), Object::Number(42.0));

        let err = interp.exec_string("(twice)").unwrap_err();
        assert_eq!(err.to_string(), "twice: too few arguments (at least: 1 got: 0)");
        let err = interp.exec_string("(twice 1 2)").unwrap_err();
        assert_eq!(err.to_string(), "twice: too many arguments (at most: 1 got: 2)");
    }

    #[test]
    fn register_rejects_inverted_arity() {
        let mut interp = Interpreter::default();
        assert!(interp.register_native("bad", 2, Some(1), |_, _| Ok(Object::Nil)).is_err());
        assert!(interp.get_global("bad").is_none());
    }

    #[test]
    fn apply_from_host() {
        let mut interp = Interpreter::default();
        let add = interp.exec_string("(lambda (a b) (- a b))").unwrap();
        let v = interp.apply(add, vec![Object::Number(10.0), Object::Number(4.0)]).unwrap();
        assert_eq!(v, Object::Number(6.0));
        assert_eq!(interp.depth(), 0);
    }

    #[test]
    fn state_is_clean_after_error() {
        let mut interp = Interpreter::default();
        let before = interp.stack.len();
        assert!(interp.exec_string("(define (f x) (car x)) (f 1)").is_err());
        assert_eq!(interp.depth(), 0);
        assert!(interp.open_upvalues.is_empty());
        assert!(interp.stack.len() <= before);
        assert_eq!(interp.exec_string("(f '(7 8))").unwrap(), Object::Number(7.0));
    }

    #[test]
    fn rebinding_a_primitive_is_honoured() {
        let v = eval("(define (+ a b) (* a b)) (+ 3 4)");
        assert_eq!(v, Object::Number(12.0));

        let mut interp = Interpreter::default();
        interp.exec_string("(define (add a b) (+ a b))").unwrap();
        interp
            .register_native("+", 0, None, |_, _| Ok(Object::string("patched")))
            .unwrap();
        assert_eq!(interp.exec_string("(add 1 2)").unwrap(), Object::string("patched"));
    }

    #[test]
    fn instances_are_independent() {
        let mut a = Interpreter::default();
        let mut b = Interpreter::default();
        a.exec_string("(define x 1)").unwrap();
        assert!(b.exec_string("x").is_err());
        assert!(b.get_global("x").is_none());
    }

    #[test]
    fn output_sink_is_swappable() {
        use std::cell::RefCell;

        struct Shared(Rc<RefCell<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let buf = Rc::new(RefCell::new(Vec::new()));
        let mut interp = Interpreter::default();
        interp.set_output(Box::new(Shared(Rc::clone(&buf))));
        interp.exec_string("(display \"hi\") (newline) (display '(1 2))").unwrap();
        assert_eq!(String::from_utf8(buf.borrow().clone()).unwrap(), "hi\n(1 2)");
    }
}
