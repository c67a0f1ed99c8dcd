use std::rc::Rc;

use crate::object::{ArgMode, Closure, ClosureProto, Object, Symbol, UpvalueDesc};
use crate::recursion::ensure_sufficient_stack;
use crate::vm::opcode::*;
use crate::vm::Instruction;

pub mod disasm;

/// Register operands are 16 bits wide.
pub const MAX_REGISTERS: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("{form}: {message}")]
    Syntax { form: String, message: String },
    #[error("internal compiler error: {0}")]
    Internal(String),
    #[error("function needs more than {max} registers")]
    TooManyRegisters { max: usize },
}

impl CompileError {
    fn syntax(form: &str, message: impl Into<String>) -> Self {
        CompileError::Syntax { form: form.to_string(), message: message.into() }
    }
}

type CompileResult<T> = Result<T, CompileError>;

enum VarKind {
    Local(usize),
    UpValue(usize),
    Global,
}

/// Compile-time state of one function being built. Nested functions point at
/// their enclosing one by index into `Compiler::funcs`.
struct FuncState {
    parent: Option<usize>,
    proto: ClosureProto,
    locals: Vec<(Symbol, usize)>,
    /// Parallel to `proto.upvalues`.
    upvalue_names: Vec<Symbol>,
    next_reg: usize,
}

impl FuncState {
    fn new(parent: Option<usize>) -> Self {
        FuncState { parent, proto: ClosureProto::new(), locals: Vec::new(), upvalue_names: Vec::new(), next_reg: 0 }
    }

    fn resolve_local(&self, sym: &Symbol) -> Option<usize> {
        self.locals.iter().rev().find(|(n, _)| n == sym).map(|(_, r)| *r)
    }

    fn is_local_reg(&self, reg: usize) -> bool {
        self.locals.iter().any(|(_, r)| *r == reg)
    }

    /// Registers are never recycled within a function.
    fn alloc_reg(&mut self) -> CompileResult<usize> {
        let r = self.next_reg;
        self.reserve_through(r)?;
        Ok(r)
    }

    fn reserve_through(&mut self, reg: usize) -> CompileResult<()> {
        if reg >= MAX_REGISTERS {
            return Err(CompileError::TooManyRegisters { max: MAX_REGISTERS });
        }
        self.next_reg = self.next_reg.max(reg + 1);
        Ok(())
    }

    fn add_const(&mut self, val: Object) -> CompileResult<u32> {
        let found = self.proto.constants.iter().position(|c| match (c, &val) {
            (Object::Number(a), Object::Number(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        });
        let idx = match found {
            Some(i) => i,
            None => {
                self.proto.constants.push(val);
                self.proto.constants.len() - 1
            }
        };
        u32::try_from(idx).map_err(|_| CompileError::Internal("constant pool overflow".into()))
    }

    fn emit(&mut self, inst: Instruction) -> usize {
        let idx = self.proto.code.len();
        self.proto.code.push(inst);
        idx
    }

    // Register operands are below MAX_REGISTERS, so the casts never truncate.
    fn emit_abc(&mut self, op: u8, a: usize, b: usize, c: usize) -> usize {
        self.emit(encode_abc(op, a as u16, b as u16, c as u16))
    }

    fn emit_abx(&mut self, op: u8, a: usize, bx: u32) -> usize {
        self.emit(encode_abx(op, a as u16, bx))
    }

    fn emit_jmp_placeholder(&mut self) -> usize {
        self.emit(encode_asbx(OP_JMP, 0, 0))
    }

    /// Point the jump at `jump_pos` to the next instruction to be emitted.
    fn patch_jump(&mut self, jump_pos: usize) -> CompileResult<()> {
        let offset = i32::try_from(self.proto.code.len() - jump_pos - 1)
            .map_err(|_| CompileError::Internal("jump offset overflow".into()))?;
        self.proto.code[jump_pos] = encode_asbx(OP_JMP, 0, offset);
        Ok(())
    }
}

struct Compiler {
    funcs: Vec<FuncState>,
    cur: usize,
}

/// Compile a program into a zero-argument closure whose body evaluates every
/// form in order and returns the value of the last. An empty program returns
/// undefined.
pub fn compile(forms: &[Object]) -> Result<Rc<Closure>, CompileError> {
    let mut c = Compiler { funcs: vec![FuncState::new(None)], cur: 0 };
    let last = match forms {
        [] => c.load_const(Object::Undefined)?,
        forms => c.body(forms)?,
    };
    let mut root = c.funcs.pop().ok_or_else(|| CompileError::Internal("lost the top-level function".into()))?;
    root.emit_abc(OP_RETURN, last, 0, 0);
    root.proto.reg_count = root.next_reg;
    Ok(Rc::new(Closure::scheme(Rc::new(root.proto), Vec::new())))
}

/// Turn a formals list into parameter symbols and a binding mode.
fn parse_formals(form: &Object, formals: &Object) -> CompileResult<(Vec<Symbol>, ArgMode)> {
    let mut params = Vec::new();
    let mut cur = formals;
    let mode = loop {
        match cur {
            Object::Nil => break ArgMode::Fixed,
            Object::Symbol(s) if params.is_empty() => {
                params.push(s.clone());
                break ArgMode::Vararg;
            }
            Object::Symbol(s) => {
                params.push(s.clone());
                break ArgMode::Rest;
            }
            Object::Pair(p) => match &p.car {
                Object::Symbol(s) => {
                    params.push(s.clone());
                    cur = &p.cdr;
                }
                other => {
                    return Err(CompileError::syntax(
                        "lambda",
                        format!("parameter must be a symbol, got {} in {}", other, form),
                    ));
                }
            },
            other => {
                return Err(CompileError::syntax("lambda", format!("invalid parameter list {} in {}", other, form)));
            }
        }
    };
    for (i, p) in params.iter().enumerate() {
        if params[..i].contains(p) {
            return Err(CompileError::syntax("lambda", format!("duplicate parameter {} in {}", p, form)));
        }
    }
    Ok((params, mode))
}

impl Compiler {
    fn fs(&mut self) -> &mut FuncState {
        &mut self.funcs[self.cur]
    }

    // ── variable resolution ────────────────────────────────────────

    /// Innermost binding wins: a local of the current function, then a local of
    /// some enclosing function (captured as an upvalue), else a global.
    fn resolve(&mut self, sym: &Symbol) -> CompileResult<VarKind> {
        if let Some(r) = self.funcs[self.cur].resolve_local(sym) {
            return Ok(VarKind::Local(r));
        }
        Ok(match self.resolve_upvalue(self.cur, sym)? {
            Some(i) => VarKind::UpValue(i),
            None => VarKind::Global,
        })
    }

    /// Find or add `sym` in the upvalue list of function `fs`, threading the
    /// capture through every function between it and the defining one.
    fn resolve_upvalue(&mut self, fs: usize, sym: &Symbol) -> CompileResult<Option<usize>> {
        if let Some(i) = self.funcs[fs].upvalue_names.iter().position(|n| n == sym) {
            return Ok(Some(i));
        }
        let Some(parent) = self.funcs[fs].parent else {
            return Ok(None);
        };
        let desc = match self.funcs[parent].resolve_local(sym) {
            Some(r) => UpvalueDesc::Local(r),
            None => match self.resolve_upvalue(parent, sym)? {
                Some(i) => UpvalueDesc::Enclosing(i),
                None => return Ok(None),
            },
        };
        let func = &mut self.funcs[fs];
        if func.upvalue_names.len() >= MAX_REGISTERS {
            return Err(CompileError::Internal("too many captured variables".into()));
        }
        func.upvalue_names.push(sym.clone());
        func.proto.upvalues.push(desc);
        Ok(Some(func.upvalue_names.len() - 1))
    }

    fn is_bound_lexically(&self, sym: &Symbol) -> bool {
        let mut fs = Some(self.cur);
        while let Some(i) = fs {
            if self.funcs[i].resolve_local(sym).is_some() {
                return true;
            }
            fs = self.funcs[i].parent;
        }
        false
    }

    // ── expressions ────────────────────────────────────────────────

    /// Compile `obj`, returning the register that holds its value.
    fn expr(&mut self, obj: &Object) -> CompileResult<usize> {
        ensure_sufficient_stack(|| match obj {
            Object::Number(_) | Object::String(_) | Object::Boolean(_) => self.load_const(obj.clone()),
            Object::Symbol(sym) => self.symbol(sym),
            Object::Pair(_) => self.combination(obj),
            Object::Nil => Err(CompileError::syntax("()", "empty combination; quote it for the empty list")),
            other => Err(CompileError::Internal(format!("cannot compile a value of type {}", other.type_tag()))),
        })
    }

    fn body(&mut self, exprs: &[Object]) -> CompileResult<usize> {
        let mut last = None;
        for e in exprs {
            last = Some(self.expr(e)?);
        }
        last.ok_or_else(|| CompileError::Internal("empty body".into()))
    }

    fn load_const(&mut self, val: Object) -> CompileResult<usize> {
        let fs = self.fs();
        let k = fs.add_const(val)?;
        let r = fs.alloc_reg()?;
        fs.emit_abx(OP_LOADK, r, k);
        Ok(r)
    }

    fn symbol(&mut self, sym: &Symbol) -> CompileResult<usize> {
        match self.resolve(sym)? {
            VarKind::Local(r) => Ok(r),
            VarKind::UpValue(i) => {
                let fs = self.fs();
                let r = fs.alloc_reg()?;
                fs.emit_abc(OP_GETUPVAL, r, i, 0);
                Ok(r)
            }
            VarKind::Global => {
                let fs = self.fs();
                let k = fs.add_const(Object::Symbol(sym.clone()))?;
                let r = fs.alloc_reg()?;
                fs.emit_abx(OP_GETGLOBAL, r, k);
                Ok(r)
            }
        }
    }

    fn combination(&mut self, form: &Object) -> CompileResult<usize> {
        let items = form
            .to_vec()
            .map_err(|_| CompileError::syntax("combination", format!("improper list {}", form)))?;
        let Some((head, args)) = items.split_first() else {
            return Err(CompileError::Internal("empty pair".into()));
        };

        match head {
            Object::Symbol(sym) if !self.is_bound_lexically(sym) => match sym.name() {
                "define" => return self.define(form, args),
                "lambda" => return self.lambda_form(form, args, None),
                "begin" => return self.begin(form, args),
                "if" => return self.if_form(form, args),
                "set!" => return self.set(form, args),
                "quote" => return self.quote(form, args),
                name => {
                    if let Some(op) = primitive_op(name, args.len()) {
                        return self.primitive(op, args);
                    }
                }
            },
            _ => {}
        }

        match head {
            Object::Symbol(_) | Object::Pair(_) => self.call(head, args),
            other => Err(CompileError::syntax("combination", format!("{} is not a procedure in {}", other, form))),
        }
    }

    // ── special forms ──────────────────────────────────────────────

    fn define(&mut self, form: &Object, args: &[Object]) -> CompileResult<usize> {
        let (name, r) = match args {
            [Object::Symbol(name), value] => {
                let r = match self.as_lambda(value) {
                    Some(items) => self.lambda_form(value, &items[1..], Some(name.clone()))?,
                    None => self.expr(value)?,
                };
                (name, r)
            }
            [Object::Pair(sig), body @ ..] if !body.is_empty() => {
                let Object::Symbol(name) = &sig.car else {
                    return Err(CompileError::syntax(
                        "define",
                        format!("procedure name must be a symbol, got {} in {}", sig.car, form),
                    ));
                };
                (name, self.lambda(form, &sig.cdr, body, Some(name.clone()))?)
            }
            _ => {
                return Err(CompileError::syntax(
                    "define",
                    format!("expected (define name value) or (define (name . formals) body...), got {}", form),
                ));
            }
        };
        let fs = self.fs();
        let k = fs.add_const(Object::Symbol(name.clone()))?;
        fs.emit_abx(OP_SETGLOBAL, r, k);
        Ok(r)
    }

    /// The items of `value` when it is an unshadowed `(lambda ...)` form.
    fn as_lambda(&self, value: &Object) -> Option<Vec<Object>> {
        let items = value.to_vec().ok()?;
        match items.first() {
            Some(Object::Symbol(s)) if s.name() == "lambda" && !self.is_bound_lexically(s) => Some(items),
            _ => None,
        }
    }

    fn lambda_form(&mut self, form: &Object, args: &[Object], name: Option<Symbol>) -> CompileResult<usize> {
        match args {
            [formals, body @ ..] if !body.is_empty() => self.lambda(form, formals, body, name),
            _ => Err(CompileError::syntax("lambda", format!("expected (lambda formals body...), got {}", form))),
        }
    }

    fn lambda(&mut self, form: &Object, formals: &Object, body: &[Object], name: Option<Symbol>) -> CompileResult<usize> {
        let (params, mode) = parse_formals(form, formals)?;
        if params.len() > MAX_REGISTERS {
            return Err(CompileError::TooManyRegisters { max: MAX_REGISTERS });
        }

        let parent = self.cur;
        let mut child = FuncState::new(Some(parent));
        child.locals = params.iter().cloned().zip(0..).collect();
        child.next_reg = params.len();
        child.proto.name = name;
        child.proto.params = params;
        child.proto.mode = mode;

        self.funcs.push(child);
        self.cur = self.funcs.len() - 1;
        let result = self.body(body);
        let child = self.funcs.pop();
        self.cur = parent;

        let result = result?;
        let mut child = child.ok_or_else(|| CompileError::Internal("lost a nested function".into()))?;
        child.emit_abc(OP_RETURN, result, 0, 0);
        child.proto.reg_count = child.next_reg;

        let fs = self.fs();
        let idx = u32::try_from(fs.proto.protos.len())
            .map_err(|_| CompileError::Internal("too many nested functions".into()))?;
        fs.proto.protos.push(Rc::new(child.proto));
        let r = fs.alloc_reg()?;
        fs.emit_abx(OP_CLOSURE, r, idx);
        Ok(r)
    }

    fn begin(&mut self, form: &Object, args: &[Object]) -> CompileResult<usize> {
        if args.is_empty() {
            return Err(CompileError::syntax("begin", format!("expected at least one expression in {}", form)));
        }
        self.body(args)
    }

    /// ```text
    ///     TEST  test 0      ; truthy: skip the jump
    ///     JMP   else
    ///     ...then...
    ///     MOVE  dst then
    ///     JMP   end
    /// else:
    ///     ...else...        ; or LOADK dst undefined
    ///     MOVE  dst else
    /// end:
    /// ```
    fn if_form(&mut self, form: &Object, args: &[Object]) -> CompileResult<usize> {
        let (test, then, otherwise) = match args {
            [test, then] => (test, then, None),
            [test, then, otherwise] => (test, then, Some(otherwise)),
            _ => return Err(CompileError::syntax("if", format!("expected (if test then [else]), got {}", form))),
        };
        let t = self.expr(test)?;
        let dst = self.fs().alloc_reg()?;
        self.fs().emit_abc(OP_TEST, t, 0, 0);
        let jmp_else = self.fs().emit_jmp_placeholder();

        let r = self.expr(then)?;
        self.fs().emit_abc(OP_MOVE, dst, r, 0);
        let jmp_end = self.fs().emit_jmp_placeholder();

        self.fs().patch_jump(jmp_else)?;
        match otherwise {
            Some(e) => {
                let r = self.expr(e)?;
                self.fs().emit_abc(OP_MOVE, dst, r, 0);
            }
            None => {
                let fs = self.fs();
                let k = fs.add_const(Object::Undefined)?;
                fs.emit_abx(OP_LOADK, dst, k);
            }
        }
        self.fs().patch_jump(jmp_end)?;
        Ok(dst)
    }

    /// Assigning an unbound name creates a global.
    fn set(&mut self, form: &Object, args: &[Object]) -> CompileResult<usize> {
        let [Object::Symbol(name), value] = args else {
            return Err(CompileError::syntax("set!", format!("expected (set! name value), got {}", form)));
        };
        let target = self.resolve(name)?;
        let v = self.expr(value)?;
        let fs = self.fs();
        match target {
            VarKind::Local(r) => {
                if r != v {
                    fs.emit_abc(OP_MOVE, r, v, 0);
                }
                Ok(r)
            }
            VarKind::UpValue(i) => {
                fs.emit_abc(OP_SETUPVAL, v, i, 0);
                Ok(v)
            }
            VarKind::Global => {
                let k = fs.add_const(Object::Symbol(name.clone()))?;
                fs.emit_abx(OP_SETGLOBAL, v, k);
                Ok(v)
            }
        }
    }

    fn quote(&mut self, form: &Object, args: &[Object]) -> CompileResult<usize> {
        match args {
            [datum] => self.load_const(datum.clone()),
            _ => Err(CompileError::syntax("quote", format!("expected exactly one datum in {}", form))),
        }
    }

    // ── applications ───────────────────────────────────────────────

    /// Operands are evaluated left to right. A local read before a later
    /// operand is snapshotted, since that operand may `set!` it.
    fn primitive(&mut self, op: u8, args: &[Object]) -> CompileResult<usize> {
        let mut operands = [0usize; 2];
        for (i, (slot, arg)) in operands.iter_mut().zip(args).enumerate() {
            let mut r = self.expr(arg)?;
            let fs = self.fs();
            if i + 1 < args.len() && fs.is_local_reg(r) {
                let copy = fs.alloc_reg()?;
                fs.emit_abc(OP_MOVE, copy, r, 0);
                r = copy;
            }
            *slot = r;
        }
        let fs = self.fs();
        let dst = fs.alloc_reg()?;
        fs.emit_abc(op, dst, operands[0], operands[1]);
        Ok(dst)
    }

    /// The callee goes in a fresh register `f` with the arguments in
    /// `f+1 .. f+nargs`; the result comes back in `f`.
    fn call(&mut self, head: &Object, args: &[Object]) -> CompileResult<usize> {
        let mut func = self.expr(head)?;
        let fs = self.fs();
        if func + 1 != fs.next_reg || fs.is_local_reg(func) {
            let r = fs.alloc_reg()?;
            fs.emit_abc(OP_MOVE, r, func, 0);
            func = r;
        }
        for (i, arg) in args.iter().enumerate() {
            let target = func + 1 + i;
            let r = self.expr(arg)?;
            if r != target {
                let fs = self.fs();
                fs.reserve_through(target)?;
                fs.emit_abc(OP_MOVE, target, r, 0);
            }
        }
        let fs = self.fs();
        fs.reserve_through(func + args.len())?;
        fs.emit_abc(OP_CALL, func, args.len(), 1);
        Ok(func)
    }
}
