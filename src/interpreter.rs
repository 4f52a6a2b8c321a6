// interpreter.rs - Dispatch loop over the compiled arena

use log::error;

use crate::builtins::{Machine, RuntimeError};
use crate::code::{Inst, Op};
use crate::compiler::ForthCtx;

/// Number of scratch memory slots addressable by `@` and `!`. Addresses
/// wrap modulo this count.
pub const MEMORY_SLOTS: usize = 16;

/// Per-run inputs and outputs. `x`, `y`, `t`, `dt` and `memory` are read
/// (and `memory` written) by the variable words; `halt` records the final
/// stack depths so the caller can read the residue back through
/// [`ForthCtx::d_stack_pop`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Vars {
    pub x: f64,
    pub y: f64,
    pub t: f64,
    pub dt: f64,
    pub memory: [f64; MEMORY_SLOTS],
    pub final_d_stack_len: usize,
    pub final_r_stack_len: usize,
}

impl ForthCtx {
    /// Execute the compiled program against `vars`. Both stacks start
    /// empty; `halt` stores the final depths into `vars`. May be called any
    /// number of times after a successful [`ForthCtx::parse`].
    ///
    /// The verifier proves straight-line programs safe, but it does not
    /// fork depth tracking across branches, so the stacks stay
    /// bounds-checked here: a branch-unbalanced program surfaces as a
    /// stack error instead of undefined behavior.
    pub fn run(&mut self, vars: &mut Vars) -> Result<(), RuntimeError> {
        if !self.compiled {
            return Err(RuntimeError::NotCompiled);
        }

        let code = &self.main;
        let mut machine = Machine {
            d_stack: &mut self.d_stack,
            r_stack: &mut self.r_stack,
            d_len: 0,
            r_len: 0,
            vars,
        };

        let mut ip = 0;
        loop {
            let op = match code.get(ip) {
                Some(Inst::Op(op)) => *op,
                _ => {
                    error!("instruction pointer fell off the arena at {}", ip);
                    return Err(RuntimeError::MalformedCode(ip));
                }
            };

            match op {
                Op::Number => {
                    let Some(Inst::Number(n)) = code.get(ip + 1) else {
                        return Err(RuntimeError::MalformedCode(ip));
                    };
                    machine.push_d(*n)?;
                    ip += 2;
                }
                Op::JumpIf => {
                    let Some(Inst::Pc(off)) = code.get(ip + 1) else {
                        return Err(RuntimeError::MalformedCode(ip));
                    };
                    if machine.pop_d()? == 0.0 {
                        ip += *off;
                    } else {
                        ip += 2;
                    }
                }
                Op::Jump => {
                    let Some(Inst::Pc(off)) = code.get(ip + 1) else {
                        return Err(RuntimeError::MalformedCode(ip));
                    };
                    ip += *off;
                }
                Op::Nop => ip += 1,
                Op::Halt => {
                    machine.vars.final_d_stack_len = machine.d_len;
                    machine.vars.final_r_stack_len = machine.r_len;
                    return Ok(());
                }
                Op::EvalCode => {
                    error!("eval_code instruction executed after inlining");
                    return Err(RuntimeError::EvalCodeReached);
                }
                Op::Builtin(b) => {
                    machine.run_builtin(b)?;
                    ip += 1;
                }
            }
        }
    }

    /// Number of values the last run left on the data stack.
    pub fn d_stack_len(&self, vars: &Vars) -> usize {
        vars.final_d_stack_len
    }

    /// Pop one value off the recorded residue, top of stack first.
    pub fn d_stack_pop(&self, vars: &mut Vars) -> Option<f64> {
        let len = vars.final_d_stack_len.checked_sub(1)?;
        vars.final_d_stack_len = len;
        self.d_stack.get(len).copied()
    }
}
