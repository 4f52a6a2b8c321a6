// code.rs - Instruction slots and code arenas

use std::fmt::Write;

use crate::builtins::Builtin;

// ============================================================================
// INSTRUCTION SLOTS
// ============================================================================

/// Handler tags. `Number`, `JumpIf` and `Jump` carry one immediate operand
/// in the slot that follows them; `EvalCode` carries a code reference and
/// only exists before inlining.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Push the `f64` in the next slot.
    Number,

    /// Pop one value; branch by the offset in the next slot when it is 0.0.
    JumpIf,

    /// Unconditional branch by the offset in the next slot.
    Jump,

    /// Pure branch anchor emitted by `then`.
    Nop,

    /// Record the final stack depths and stop.
    Halt,

    /// Call the user word named in the next slot. Replaced by the inliner;
    /// reaching the executor with one of these is a fatal internal error.
    EvalCode,

    /// Execute a registry built-in. No immediate.
    Builtin(Builtin),
}

/// One slot of a code arena: either a handler, or the immediate operand of
/// the handler in the previous slot.
///
/// Jump offsets are relative to the opcode slot itself: the branch target
/// of a `JumpIf` at index `i` with `Pc(off)` at `i + 1` is `i + off`.
#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Op(Op),
    Number(f64),
    Pc(usize),
    CodeRef(String),
}

/// A compiled word body: a flat, growable sequence of instruction slots.
pub type Code = Vec<Inst>;

// ============================================================================
// DISASSEMBLER
// ============================================================================

/// Render a code arena one instruction per line, for debug logging.
pub fn dump(code: &[Inst]) -> String {
    let mut out = String::new();
    let mut i = 0;

    while i < code.len() {
        let _ = write!(out, "{:08}    ", i);

        match &code[i] {
            Inst::Op(Op::Number) => {
                match code.get(i + 1) {
                    Some(Inst::Number(n)) => {
                        let _ = writeln!(out, "number {}", n);
                    }
                    _ => {
                        let _ = writeln!(out, "number <missing immediate>");
                    }
                }
                i += 2;
            }
            Inst::Op(Op::JumpIf) => {
                match code.get(i + 1) {
                    Some(Inst::Pc(off)) => {
                        let _ = writeln!(out, "if [next +{}, abs {}]", off, i + off);
                    }
                    _ => {
                        let _ = writeln!(out, "if <missing immediate>");
                    }
                }
                i += 2;
            }
            Inst::Op(Op::Jump) => {
                match code.get(i + 1) {
                    Some(Inst::Pc(off)) => {
                        let _ = writeln!(out, "jump to +{}, abs {}", off, i + off);
                    }
                    _ => {
                        let _ = writeln!(out, "jump <missing immediate>");
                    }
                }
                i += 2;
            }
            Inst::Op(Op::Nop) => {
                let _ = writeln!(out, "nop");
                i += 1;
            }
            Inst::Op(Op::Halt) => {
                let _ = writeln!(out, "halt");
                i += 1;
            }
            Inst::Op(Op::EvalCode) => {
                match code.get(i + 1) {
                    Some(Inst::CodeRef(name)) => {
                        let _ = writeln!(out, "call word '{}'", name);
                    }
                    _ => {
                        let _ = writeln!(out, "call word <missing reference>");
                    }
                }
                i += 2;
            }
            Inst::Op(Op::Builtin(b)) => {
                let _ = writeln!(out, "call builtin '{}'", b.name());
                i += 1;
            }
            Inst::Number(_) | Inst::Pc(_) | Inst::CodeRef(_) => {
                let _ = writeln!(out, "*** stray immediate ***");
                i += 1;
            }
        }
    }

    out
}
