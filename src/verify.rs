// verify.rs - Static stack-effect verification

use log::error;

use crate::builtins::{D_STACK_SIZE, R_STACK_SIZE};
use crate::code::{Inst, Op};
use crate::compiler::CompileError;

/// Symbolically execute the final arena using each word's declared arity,
/// rejecting programs that would under- or overflow either stack.
///
/// Branches are deliberately not forked: the simulated depth runs straight
/// through `jump_if` and `jump`, matching the reference behavior. Programs
/// whose branches diverge in depth can therefore pass here; the executor
/// still bounds-checks at run time.
pub fn check_stack_effects(code: &[Inst]) -> Result<(), CompileError> {
    let mut d_depth: i32 = 0;
    let mut r_depth: i32 = 0;

    let mut i = 0;
    while i < code.len() {
        let op = match &code[i] {
            Inst::Op(op) => *op,
            _ => return Err(CompileError::Internal),
        };

        match op {
            Op::Number => {
                d_depth += 1;
                i += 2;
            }
            Op::JumpIf => {
                if d_depth < 1 {
                    return Err(CompileError::DStackUnderflow {
                        word: "if",
                        needs: 1,
                    });
                }
                d_depth -= 1;
                i += 2;
            }
            Op::Jump => i += 2,
            Op::Nop | Op::Halt => i += 1,
            Op::EvalCode => {
                error!("eval_code instruction survived inlining");
                return Err(CompileError::Internal);
            }
            Op::Builtin(b) => {
                let fx = b.effect();
                if d_depth < i32::from(fx.d_pops) {
                    return Err(CompileError::DStackUnderflow {
                        word: b.name(),
                        needs: fx.d_pops,
                    });
                }
                if r_depth < i32::from(fx.r_pops) {
                    return Err(CompileError::RStackUnderflow {
                        word: b.name(),
                        needs: fx.r_pops,
                    });
                }
                d_depth += i32::from(fx.d_pushes) - i32::from(fx.d_pops);
                r_depth += i32::from(fx.r_pushes) - i32::from(fx.r_pops);
                i += 1;
            }
        }

        if d_depth >= D_STACK_SIZE as i32 {
            return Err(CompileError::DStackOverflow);
        }
        if r_depth >= R_STACK_SIZE as i32 {
            return Err(CompileError::RStackOverflow);
        }
    }

    if d_depth < 0 {
        return Err(CompileError::DStackNegative);
    }
    if r_depth < 0 {
        return Err(CompileError::RStackNegative);
    }

    Ok(())
}
