// ── Register-based opcodes (64-bit packed instructions) ─────────────
//
// ABC mode:  [OP:16 | A:16 | B:16 | C:16]
// ABx mode:  [OP:16 | A:16 | Bx:32]  (Bx unsigned, or signed for jumps)
//
// Every register operand is relative to the running frame's base.

pub type Instruction = u64;

// ABC mode
pub(crate) const OP_MOVE: u8 = 0; // R[A] = R[B]
pub(crate) const OP_GETUPVAL: u8 = 1; // R[A] = U[B]
pub(crate) const OP_SETUPVAL: u8 = 2; // U[B] = R[A]
pub(crate) const OP_CALL: u8 = 3; // R[A] = R[A](R[A+1] .. R[A+B]); C results (always 1)
pub(crate) const OP_RETURN: u8 = 4; // return R[A]
pub(crate) const OP_TEST: u8 = 5; // if truthy(R[A]) != C then skip next

// ABC mode: primitives behind the native procedures of the same name
pub(crate) const OP_ADD: u8 = 6;
pub(crate) const OP_SUB: u8 = 7;
pub(crate) const OP_MUL: u8 = 8;
pub(crate) const OP_DIV: u8 = 9;
pub(crate) const OP_NUMEQ: u8 = 10;
pub(crate) const OP_LT: u8 = 11;
pub(crate) const OP_GT: u8 = 12;
pub(crate) const OP_LE: u8 = 13;
pub(crate) const OP_GE: u8 = 14;
pub(crate) const OP_CONS: u8 = 15;
pub(crate) const OP_CAR: u8 = 16; // R[A] = car R[B]
pub(crate) const OP_CDR: u8 = 17; // R[A] = cdr R[B]

// ABx mode
pub(crate) const OP_LOADK: u8 = 20; // R[A] = K[Bx]
pub(crate) const OP_GETGLOBAL: u8 = 21; // R[A] = G[K[Bx]]
pub(crate) const OP_SETGLOBAL: u8 = 22; // G[K[Bx]] = R[A]
pub(crate) const OP_CLOSURE: u8 = 23; // R[A] = closure(P[Bx])
pub(crate) const OP_JMP: u8 = 24; // pc += sBx

/// Procedures the compiler may lower to a single instruction: (name, opcode, arity).
pub(crate) const PRIMITIVES: &[(&str, u8, usize)] = &[
    ("+", OP_ADD, 2),
    ("-", OP_SUB, 2),
    ("*", OP_MUL, 2),
    ("/", OP_DIV, 2),
    ("=", OP_NUMEQ, 2),
    ("<", OP_LT, 2),
    (">", OP_GT, 2),
    ("<=", OP_LE, 2),
    (">=", OP_GE, 2),
    ("cons", OP_CONS, 2),
    ("car", OP_CAR, 1),
    ("cdr", OP_CDR, 1),
];

pub(crate) fn primitive_op(name: &str, nargs: usize) -> Option<u8> {
    PRIMITIVES
        .iter()
        .find(|(n, _, arity)| *n == name && *arity == nargs)
        .map(|(_, op, _)| *op)
}

pub(crate) fn primitive_name(op: u8) -> Option<&'static str> {
    PRIMITIVES.iter().find(|(_, o, _)| *o == op).map(|(n, _, _)| *n)
}

pub(crate) fn is_primitive(name: &str) -> bool {
    PRIMITIVES.iter().any(|(n, _, _)| *n == name)
}

pub(crate) fn op_name(op: u8) -> &'static str {
    match op {
        OP_MOVE => "MOVE",
        OP_GETUPVAL => "GETUPVAL",
        OP_SETUPVAL => "SETUPVAL",
        OP_CALL => "CALL",
        OP_RETURN => "RETURN",
        OP_TEST => "TEST",
        OP_ADD => "ADD",
        OP_SUB => "SUB",
        OP_MUL => "MUL",
        OP_DIV => "DIV",
        OP_NUMEQ => "NUMEQ",
        OP_LT => "LT",
        OP_GT => "GT",
        OP_LE => "LE",
        OP_GE => "GE",
        OP_CONS => "CONS",
        OP_CAR => "CAR",
        OP_CDR => "CDR",
        OP_LOADK => "LOADK",
        OP_GETGLOBAL => "GETGLOBAL",
        OP_SETGLOBAL => "SETGLOBAL",
        OP_CLOSURE => "CLOSURE",
        OP_JMP => "JMP",
        _ => "???",
    }
}

pub(crate) fn is_abx(op: u8) -> bool {
    op >= OP_LOADK
}

// ── Instruction encoding ────────────────────────────────────────────

#[inline(always)]
pub(crate) fn encode_abc(op: u8, a: u16, b: u16, c: u16) -> Instruction {
    (op as u64) << 48 | (a as u64) << 32 | (b as u64) << 16 | c as u64
}

#[inline(always)]
pub(crate) fn encode_abx(op: u8, a: u16, bx: u32) -> Instruction {
    (op as u64) << 48 | (a as u64) << 32 | bx as u64
}

#[inline(always)]
pub(crate) fn encode_asbx(op: u8, a: u16, sbx: i32) -> Instruction {
    encode_abx(op, a, sbx as u32)
}

#[inline(always)]
pub(crate) fn opcode(inst: Instruction) -> u8 {
    (inst >> 48) as u8
}

#[inline(always)]
pub(crate) fn arg_a(inst: Instruction) -> usize {
    ((inst >> 32) & 0xFFFF) as usize
}

#[inline(always)]
pub(crate) fn arg_b(inst: Instruction) -> usize {
    ((inst >> 16) & 0xFFFF) as usize
}

#[inline(always)]
pub(crate) fn arg_c(inst: Instruction) -> usize {
    (inst & 0xFFFF) as usize
}

#[inline(always)]
pub(crate) fn arg_bx(inst: Instruction) -> usize {
    (inst & 0xFFFF_FFFF) as usize
}

#[inline(always)]
pub(crate) fn arg_sbx(inst: Instruction) -> i32 {
    (inst & 0xFFFF_FFFF) as u32 as i32
}
