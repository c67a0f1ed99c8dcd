//! Human- and machine-readable listings of compiled prototypes.

use std::fmt;

use serde::Serialize;

use crate::object::{ArgMode, ClosureProto, Object, UpvalueDesc};
use crate::vm::opcode::*;
use crate::vm::Instruction;

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub mode: ArgMode,
    pub registers: usize,
    pub upvalues: Vec<UpvalueDesc>,
    pub constants: Vec<String>,
    pub code: Vec<String>,
    pub children: Vec<Listing>,
}

pub fn listing(proto: &ClosureProto) -> Listing {
    Listing {
        name: proto.name.as_ref().map(|n| n.to_string()),
        params: proto.params.iter().map(|p| p.to_string()).collect(),
        mode: proto.mode,
        registers: proto.reg_count,
        upvalues: proto.upvalues.clone(),
        constants: proto.constants.iter().map(render_constant).collect(),
        code: proto.code.iter().map(|inst| format_instruction(proto, *inst)).collect(),
        children: proto.protos.iter().map(|p| listing(p)).collect(),
    }
}

fn render_constant(k: &Object) -> String {
    match k {
        Object::String(s) => format!("{:?}", &**s),
        other => other.to_string(),
    }
}

/// One instruction with decoded operands and, where it helps, the constant it
/// refers to.
pub fn format_instruction(proto: &ClosureProto, inst: Instruction) -> String {
    let op = opcode(inst);
    let name = op_name(op);
    let a = arg_a(inst);
    let konst = |i: usize| proto.constants.get(i).map(render_constant).unwrap_or_else(|| "?".to_string());
    match op {
        OP_LOADK | OP_GETGLOBAL | OP_SETGLOBAL => {
            let bx = arg_bx(inst);
            format!("{:<10} r{} k{} ; {}", name, a, bx, konst(bx))
        }
        OP_CLOSURE => format!("{:<10} r{} p{}", name, a, arg_bx(inst)),
        OP_JMP => format!("{:<10} {:+}", name, arg_sbx(inst)),
        OP_MOVE | OP_CAR | OP_CDR => format!("{:<10} r{} r{}", name, a, arg_b(inst)),
        OP_GETUPVAL | OP_SETUPVAL => format!("{:<10} r{} u{}", name, a, arg_b(inst)),
        OP_CALL => format!("{:<10} r{} {}", name, a, arg_b(inst)),
        OP_RETURN => format!("{:<10} r{}", name, a),
        OP_TEST => format!("{:<10} r{} {}", name, a, arg_c(inst)),
        _ if is_abx(op) => format!("{:<10} {} {}", name, a, arg_bx(inst)),
        _ => format!("{:<10} r{} r{} r{}", name, a, arg_b(inst), arg_c(inst)),
    }
}

impl Listing {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let name = self.name.as_deref().unwrap_or("<anonymous>");
        writeln!(
            f,
            "{}function {} ({}) {:?}, {} registers, {} upvalues",
            pad,
            name,
            self.params.join(" "),
            self.mode,
            self.registers,
            self.upvalues.len()
        )?;
        for (i, k) in self.constants.iter().enumerate() {
            writeln!(f, "{}  k{:<4} {}", pad, i, k)?;
        }
        for (i, line) in self.code.iter().enumerate() {
            writeln!(f, "{}  {:04} {}", pad, i, line)?;
        }
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Closure;

    fn listing_of(src: &str) -> Listing {
        let closure = crate::compiler::compile(&crate::read(src).unwrap()).unwrap();
        match &*closure {
            Closure::Scheme(cl) => listing(&cl.proto),
            Closure::Native(_) => unreachable!(),
        }
    }

    #[test]
    fn instructions_show_constants() {
        let l = listing_of("(define x \"hi\")");
        assert_eq!(l.code[0], "LOADK      r0 k0 ; \"hi\"");
        assert_eq!(l.code[1], "SETGLOBAL  r0 k1 ; x");
        assert_eq!(l.code[2], "RETURN     r0");
    }

    #[test]
    fn nested_functions_become_children() {
        let l = listing_of("(define (f a) (lambda (b) (+ a b)))");
        assert_eq!(l.children.len(), 1);
        let f = &l.children[0];
        assert_eq!(f.name.as_deref(), Some("f"));
        assert_eq!(f.children[0].upvalues, vec![UpvalueDesc::Local(0)]);
        assert!(l.to_string().contains("    0000 GETUPVAL   r1 u0"));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_value(listing_of("(if #t 1 2)")).unwrap();
        assert_eq!(json["mode"], "Fixed");
        assert_eq!(json["code"][2], "JMP        +3");
        assert!(json["children"].as_array().unwrap().is_empty());
    }
}
