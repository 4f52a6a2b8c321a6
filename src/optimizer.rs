// optimizer.rs - Call inlining and peephole rewriting over the main arena

use std::collections::HashMap;

use crate::builtins::Builtin;
use crate::code::{Code, Inst, Op};
use crate::compiler::{CompileError, Word};

/// Deepest chain of user-word calls the inliner will expand. Recursive
/// definitions exhaust this and are rejected at compile time.
pub const INLINE_DEPTH_LIMIT: u32 = 100;

// ============================================================================
// JUMP RELOCATION
// ============================================================================

/// Copy the opcode at `orig[i]` (plus its immediate, if any) into `out`,
/// maintaining the forward-branch discipline shared by the inliner and the
/// peephole pass: `jump_if` and `jump` record the output index of their
/// placeholder, `jump` patches the pending `jump_if` to the start of the
/// else branch, and `nop` patches whichever placeholder is pending to point
/// at itself. Returns the index of the next input slot.
fn relocate(
    orig: &Code,
    i: usize,
    out: &mut Code,
    jumps: &mut Vec<usize>,
) -> Result<usize, CompileError> {
    let op = match &orig[i] {
        Inst::Op(op) => *op,
        _ => return Err(CompileError::Internal),
    };

    out.push(Inst::Op(op));
    let at = out.len() - 1;

    match op {
        Op::Number => {
            out.push(imm_at(orig, i + 1)?);
            Ok(i + 2)
        }
        Op::JumpIf => {
            jumps.push(out.len());
            out.push(imm_at(orig, i + 1)?);
            Ok(i + 2)
        }
        Op::Jump => {
            patch_pending(out, jumps, at + 2)?;
            jumps.push(out.len());
            out.push(imm_at(orig, i + 1)?);
            Ok(i + 2)
        }
        Op::Nop => {
            patch_pending(out, jumps, at)?;
            Ok(i + 1)
        }
        Op::Halt | Op::Builtin(_) => Ok(i + 1),
        Op::EvalCode => Err(CompileError::Internal),
    }
}

fn imm_at(code: &Code, i: usize) -> Result<Inst, CompileError> {
    code.get(i).cloned().ok_or(CompileError::Internal)
}

fn patch_pending(
    out: &mut Code,
    jumps: &mut Vec<usize>,
    target: usize,
) -> Result<(), CompileError> {
    let at = jumps.pop().ok_or(CompileError::Internal)?;
    let opcode = at - 1;
    out[at] = Inst::Pc(target - opcode);
    Ok(())
}

// ============================================================================
// INLINER
// ============================================================================

/// Build a fresh main arena with every `eval_code` call replaced by the
/// target word's body, recursively, re-patching jump offsets as the
/// instructions move.
pub fn inline_calls(
    words: &HashMap<String, Word>,
    main: &Code,
) -> Result<Code, CompileError> {
    let mut out = Code::new();
    inline_code(words, main, &mut out, INLINE_DEPTH_LIMIT)?;
    Ok(out)
}

/// Every user word must also inline within the depth limit, whether or not
/// the main body reaches it, so a recursive definition is an error on its
/// own.
pub fn check_word_recursion(words: &HashMap<String, Word>) -> Result<(), CompileError> {
    for word in words.values() {
        if let Word::User(body) = word {
            let mut scratch = Code::new();
            inline_code(words, body, &mut scratch, INLINE_DEPTH_LIMIT)?;
        }
    }
    Ok(())
}

fn inline_code(
    words: &HashMap<String, Word>,
    orig: &Code,
    out: &mut Code,
    depth: u32,
) -> Result<(), CompileError> {
    if depth == 0 {
        return Err(CompileError::InlineRecursionLimit);
    }

    let mut jumps: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < orig.len() {
        if matches!(&orig[i], Inst::Op(Op::EvalCode)) {
            let Some(Inst::CodeRef(name)) = orig.get(i + 1) else {
                return Err(CompileError::Internal);
            };
            let Some(Word::User(body)) = words.get(name) else {
                return Err(CompileError::Internal);
            };
            inline_code(words, body, out, depth - 1)?;
            i += 2;
        } else {
            i = relocate(orig, i, out, &mut jumps)?;
        }
    }

    Ok(())
}

// ============================================================================
// PEEPHOLE
// ============================================================================

/// One peephole pass: rebuild the arena, fusing adjacent instructions and
/// re-patching jump offsets as slots disappear. Fusions only ever touch the
/// contiguous tail of the output, so they cannot delete a branch target.
/// Returns whether anything changed; callers run a second pass when the
/// first one reports changes, and never more.
pub fn peephole(code: &mut Code) -> Result<bool, CompileError> {
    let orig = std::mem::take(code);
    let mut modified = false;
    let mut jumps: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < orig.len() {
        if let Inst::Op(Op::Builtin(b)) = &orig[i] {
            let b = *b;
            if code.len() > 1 && peephole_1(code, b) {
                modified = true;
                i += 1;
                continue;
            }
            if code.len() > 2 && peephole_n(code, b) {
                modified = true;
                i += 1;
                continue;
            }
        }

        i = relocate(&orig, i, code, &mut jumps)?;
    }

    Ok(modified)
}

/// Pair fusions: replace the last emitted opcode with a fused word when it
/// combines with the incoming one.
fn peephole_1(out: &mut Code, b: Builtin) -> bool {
    let last = out.len() - 1;
    let prev = match &out[last] {
        Inst::Op(Op::Builtin(prev)) => *prev,
        _ => return false,
    };

    let fused = match (prev, b) {
        (Builtin::Mul, Builtin::Add) => Builtin::Fma,
        (Builtin::Pi, Builtin::Mul) => Builtin::MultPi,
        (Builtin::Dup, Builtin::Dup) => Builtin::DupDup,
        (Builtin::MinusRot, Builtin::Swap) => Builtin::MinusRotSwap,
        (Builtin::Ge, Builtin::Swap) => Builtin::GeSwap,
        (Builtin::MultPi, Builtin::Div2) => Builtin::MultHalfPi,
        _ => return false,
    };

    out[last] = Inst::Op(Op::Builtin(fused));
    true
}

/// Multi-slot rewrites over a `number` tail: constant folding for the four
/// arithmetic words, strength reductions for operand 2.0, and folding a
/// pending doubling back into a constant.
fn peephole_n(out: &mut Code, b: Builtin) -> bool {
    let len = out.len();

    match b {
        Builtin::Add => fold_constants(out, |lhs, rhs| lhs + rhs),
        Builtin::Sub => fold_constants(out, |lhs, rhs| lhs - rhs),
        Builtin::Mul => {
            if number_op_at(out, len - 2) && number_at(out, len - 1) == Some(2.0) {
                out[len - 2] = Inst::Op(Op::Builtin(Builtin::Mult2));
                out.truncate(len - 1);
                return true;
            }
            fold_constants(out, |lhs, rhs| lhs * rhs)
        }
        Builtin::Div => {
            if number_op_at(out, len - 2) && number_at(out, len - 1) == Some(2.0) {
                out[len - 2] = Inst::Op(Op::Builtin(Builtin::Div2));
                out.truncate(len - 1);
                return true;
            }
            fold_constants(out, |lhs, rhs| {
                if rhs == 0.0 {
                    f64::INFINITY
                } else {
                    lhs / rhs
                }
            })
        }
        Builtin::StarStar => {
            if number_op_at(out, len - 2) && number_at(out, len - 1) == Some(2.0) {
                out[len - 2] = Inst::Op(Op::Builtin(Builtin::Pow2));
                out.truncate(len - 1);
                return true;
            }
            false
        }
        Builtin::Mult2 => {
            if number_op_at(out, len - 2) {
                if let Some(Inst::Number(n)) = out.get_mut(len - 1) {
                    *n *= 2.0;
                    return true;
                }
            }
            false
        }
        _ => false,
    }
}

/// Collapse `number L, number R` at the output tail into one constant when
/// the incoming word is foldable. The left constant's slot survives in
/// place, so a branch target landing on it stays valid.
fn fold_constants(out: &mut Code, fold: impl Fn(f64, f64) -> f64) -> bool {
    let len = out.len();
    if len < 4 || !number_op_at(out, len - 2) || !number_op_at(out, len - 4) {
        return false;
    }
    let (Some(lhs), Some(rhs)) = (number_at(out, len - 3), number_at(out, len - 1)) else {
        return false;
    };

    out[len - 3] = Inst::Number(fold(lhs, rhs));
    out.truncate(len - 2);
    true
}

fn number_op_at(out: &Code, i: usize) -> bool {
    matches!(out.get(i), Some(Inst::Op(Op::Number)))
}

fn number_at(out: &Code, i: usize) -> Option<f64> {
    match out.get(i) {
        Some(Inst::Number(n)) => Some(*n),
        _ => None,
    }
}
