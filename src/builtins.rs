// builtins.rs - Built-in word registry and the execution machine

use std::f64::consts::{FRAC_PI_2, PI};

use thiserror::Error;

use crate::interpreter::{Vars, MEMORY_SLOTS};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Capacity of the data stack.
pub const D_STACK_SIZE: usize = 32;

/// Capacity of the return stack.
pub const R_STACK_SIZE: usize = 32;

// ============================================================================
// STACK EFFECTS
// ============================================================================

/// Declared arity of a built-in: how many doubles it pushes and pops from
/// each stack. The verifier simulates these; the executor must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub d_pushes: u8,
    pub d_pops: u8,
    pub r_pushes: u8,
    pub r_pops: u8,
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("D stack underflow")]
    StackUnderflow,
    #[error("D stack overflow")]
    StackOverflow,
    #[error("R stack underflow")]
    ReturnStackUnderflow,
    #[error("R stack overflow")]
    ReturnStackOverflow,
    #[error("eval_code instruction executed after inlining")]
    EvalCodeReached,
    #[error("malformed instruction stream at slot {0}")]
    MalformedCode(usize),
    #[error("program not compiled")]
    NotCompiled,
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Macro defining every executable built-in in a single place: name, stack
/// effect `(d_pushes, d_pops, r_pushes, r_pops)`, and the machine method
/// that implements it. Generates the `Builtin` enum, name lookup, the
/// effect table, and the executor dispatcher.
///
/// The `fused` group is synthesized by the peephole optimizer; those words
/// are absent from `from_name` and `all`, so the tokenizer can never emit
/// them and they never enter the dictionary.
macro_rules! define_builtins {
    (
        words {
            $( $variant:ident => $name:literal :
                ($dpush:literal, $dpop:literal, $rpush:literal, $rpop:literal)
                => $method:ident ),* $(,)?
        }
        fused {
            $( $fvariant:ident => $fname:literal :
                ($fdpush:literal, $fdpop:literal, $frpush:literal, $frpop:literal)
                => $fmethod:ident ),* $(,)?
        }
    ) => {
        /// Every executable built-in word.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Builtin {
            $( $variant, )*
            $( $fvariant, )*
        }

        impl Builtin {
            /// Name used in diagnostics and the disassembler.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Builtin::$variant => $name, )*
                    $( Builtin::$fvariant => $fname, )*
                }
            }

            /// Look up a source-visible built-in by name. Fused words are
            /// not reachable from here.
            pub fn from_name(name: &str) -> Option<Builtin> {
                match name {
                    $( $name => Some(Builtin::$variant), )*
                    _ => None,
                }
            }

            /// All source-visible built-ins, for dictionary registration.
            pub fn all() -> &'static [Builtin] {
                &[ $( Builtin::$variant, )* ]
            }

            /// Declared stack arity.
            pub fn effect(&self) -> StackEffect {
                match self {
                    $( Builtin::$variant => StackEffect {
                        d_pushes: $dpush,
                        d_pops: $dpop,
                        r_pushes: $rpush,
                        r_pops: $rpop,
                    }, )*
                    $( Builtin::$fvariant => StackEffect {
                        d_pushes: $fdpush,
                        d_pops: $fdpop,
                        r_pushes: $frpush,
                        r_pops: $frpop,
                    }, )*
                }
            }
        }

        impl Machine<'_> {
            /// Dispatch one built-in.
            pub fn run_builtin(&mut self, b: Builtin) -> Result<(), RuntimeError> {
                match b {
                    $( Builtin::$variant => self.$method(), )*
                    $( Builtin::$fvariant => self.$fmethod(), )*
                }
            }
        }
    };
}

define_builtins! {
    words {
        // Per-run variables
        X => "x": (1, 0, 0, 0) => op_x,
        Y => "y": (1, 0, 0, 0) => op_y,
        T => "t": (1, 0, 0, 0) => op_t,
        Dt => "dt": (1, 0, 0, 0) => op_dt,

        // Host-capability stubs
        Mx => "mx": (1, 0, 0, 0) => op_mx,
        My => "my": (1, 0, 0, 0) => op_my,
        Button => "button": (1, 1, 0, 0) => op_button,
        Buttons => "buttons": (1, 0, 0, 0) => op_buttons,
        Audio => "audio": (0, 1, 0, 0) => op_audio,
        Sample => "sample": (3, 2, 0, 0) => op_sample,
        BwSample => "bwsample": (1, 2, 0, 0) => op_bwsample,

        // Return stack
        Push => "push": (0, 1, 1, 0) => op_to_r,
        Pop => "pop": (1, 0, 0, 1) => op_from_r,
        ToR => ">r": (0, 1, 1, 0) => op_to_r,
        FromR => "r>": (1, 0, 0, 1) => op_from_r,
        RFetch => "r@": (1, 0, 1, 1) => op_r_fetch,

        // Memory
        Fetch => "@": (1, 1, 0, 0) => op_fetch,
        Store => "!": (0, 2, 0, 0) => op_store,

        // Stack manipulation
        Dup => "dup": (2, 1, 0, 0) => op_dup,
        Over => "over": (3, 2, 0, 0) => op_over,
        TwoDup => "2dup": (4, 2, 0, 0) => op_two_dup,
        Drop => "drop": (0, 1, 0, 0) => op_drop,
        Swap => "swap": (2, 2, 0, 0) => op_swap,
        Rot => "rot": (3, 3, 0, 0) => op_rot,
        MinusRot => "-rot": (3, 3, 0, 0) => op_minus_rot,

        // Complex pairs
        ZAdd => "z+": (2, 4, 0, 0) => op_z_add,
        ZMul => "z*": (2, 4, 0, 0) => op_z_mul,

        // Comparison
        Eq => "=": (1, 2, 0, 0) => op_eq,
        Ne => "<>": (1, 2, 0, 0) => op_ne,
        Gt => ">": (1, 2, 0, 0) => op_gt,
        Lt => "<": (1, 2, 0, 0) => op_lt,
        Ge => ">=": (1, 2, 0, 0) => op_ge,
        Le => "<=": (1, 2, 0, 0) => op_le,

        // Arithmetic
        Add => "+": (1, 2, 0, 0) => op_add,
        Sub => "-": (1, 2, 0, 0) => op_sub,
        Mul => "*": (1, 2, 0, 0) => op_mul,
        Div => "/": (1, 2, 0, 0) => op_div,
        Mod => "mod": (1, 2, 0, 0) => op_mod,
        Pow => "pow": (1, 2, 0, 0) => op_pow,
        StarStar => "**": (1, 2, 0, 0) => op_pow,
        Negate => "negate": (1, 1, 0, 0) => op_negate,

        // Math
        Sin => "sin": (1, 1, 0, 0) => op_sin,
        Cos => "cos": (1, 1, 0, 0) => op_cos,
        Tan => "tan": (1, 1, 0, 0) => op_tan,
        Log => "log": (1, 1, 0, 0) => op_log,
        Exp => "exp": (1, 1, 0, 0) => op_exp,
        Sqrt => "sqrt": (1, 1, 0, 0) => op_sqrt,
        Floor => "floor": (1, 1, 0, 0) => op_floor,
        Ceil => "ceil": (1, 1, 0, 0) => op_ceil,
        Abs => "abs": (1, 1, 0, 0) => op_abs,
        Atan2 => "atan2": (1, 2, 0, 0) => op_atan2,
        Min => "min": (1, 2, 0, 0) => op_min,
        Max => "max": (1, 2, 0, 0) => op_max,
        Pi => "pi": (1, 0, 0, 0) => op_pi,
        Random => "random": (1, 0, 0, 0) => op_random,

        // Logic
        And => "and": (1, 2, 0, 0) => op_and,
        Or => "or": (1, 2, 0, 0) => op_or,
        Not => "not": (1, 1, 0, 0) => op_not,
    }
    fused {
        Fma => "fma": (1, 3, 0, 0) => op_fma,
        MultPi => "multpi": (1, 1, 0, 0) => op_mult_pi,
        MultHalfPi => "multhalfpi": (1, 1, 0, 0) => op_mult_half_pi,
        Mult2 => "mult2": (1, 1, 0, 0) => op_mult2,
        Div2 => "div2": (1, 1, 0, 0) => op_div2,
        Pow2 => "pow2": (1, 1, 0, 0) => op_pow2,
        DupDup => "dupdup": (4, 1, 0, 0) => op_dup_dup,
        MinusRotSwap => "-rotswap": (3, 3, 0, 0) => op_minus_rot_swap,
        GeSwap => ">=swap": (2, 3, 0, 0) => op_ge_swap,
    }
}

// ============================================================================
// EXECUTION MACHINE
// ============================================================================

/// Execution state threaded through the dispatch loop. The two operand
/// stacks live in the context and are addressed by depth; `halt` copies the
/// final depths into `vars`.
pub struct Machine<'a> {
    pub d_stack: &'a mut [f64; D_STACK_SIZE],
    pub r_stack: &'a mut [f64; R_STACK_SIZE],
    pub d_len: usize,
    pub r_len: usize,
    pub vars: &'a mut Vars,
}

impl Machine<'_> {
    pub fn push_d(&mut self, v: f64) -> Result<(), RuntimeError> {
        if self.d_len == D_STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.d_stack[self.d_len] = v;
        self.d_len += 1;
        Ok(())
    }

    pub fn pop_d(&mut self) -> Result<f64, RuntimeError> {
        if self.d_len == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        self.d_len -= 1;
        Ok(self.d_stack[self.d_len])
    }

    fn push_r(&mut self, v: f64) -> Result<(), RuntimeError> {
        if self.r_len == R_STACK_SIZE {
            return Err(RuntimeError::ReturnStackOverflow);
        }
        self.r_stack[self.r_len] = v;
        self.r_len += 1;
        Ok(())
    }

    fn pop_r(&mut self) -> Result<f64, RuntimeError> {
        if self.r_len == 0 {
            return Err(RuntimeError::ReturnStackUnderflow);
        }
        self.r_len -= 1;
        Ok(self.r_stack[self.r_len])
    }

    fn top_d(&mut self) -> Result<&mut f64, RuntimeError> {
        if self.d_len == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        Ok(&mut self.d_stack[self.d_len - 1])
    }

    // ========================================================================
    // VARIABLES AND STUBS
    // ========================================================================

    fn op_x(&mut self) -> Result<(), RuntimeError> {
        self.push_d(self.vars.x)
    }

    fn op_y(&mut self) -> Result<(), RuntimeError> {
        self.push_d(self.vars.y)
    }

    fn op_t(&mut self) -> Result<(), RuntimeError> {
        self.push_d(self.vars.t)
    }

    fn op_dt(&mut self) -> Result<(), RuntimeError> {
        self.push_d(self.vars.dt)
    }

    fn op_mx(&mut self) -> Result<(), RuntimeError> {
        // stub
        self.push_d(0.0)
    }

    fn op_my(&mut self) -> Result<(), RuntimeError> {
        // stub
        self.push_d(0.0)
    }

    fn op_button(&mut self) -> Result<(), RuntimeError> {
        // stub
        self.pop_d()?;
        self.push_d(0.0)
    }

    fn op_buttons(&mut self) -> Result<(), RuntimeError> {
        // stub
        self.push_d(0.0)
    }

    fn op_audio(&mut self) -> Result<(), RuntimeError> {
        // stub
        self.pop_d()?;
        Ok(())
    }

    fn op_sample(&mut self) -> Result<(), RuntimeError> {
        // stub
        self.pop_d()?;
        self.pop_d()?;
        self.push_d(0.0)?;
        self.push_d(0.0)?;
        self.push_d(0.0)
    }

    fn op_bwsample(&mut self) -> Result<(), RuntimeError> {
        // stub
        self.pop_d()?;
        self.pop_d()?;
        self.push_d(0.0)
    }

    // ========================================================================
    // RETURN STACK
    // ========================================================================

    fn op_to_r(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_r(v)
    }

    fn op_from_r(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_r()?;
        self.push_d(v)
    }

    fn op_r_fetch(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_r()?;
        self.push_r(v)?;
        self.push_d(v)
    }

    // ========================================================================
    // MEMORY
    // ========================================================================

    fn op_fetch(&mut self) -> Result<(), RuntimeError> {
        let slot = self.pop_d()? as u32 as usize;
        self.push_d(self.vars.memory[slot % MEMORY_SLOTS])
    }

    fn op_store(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let slot = self.pop_d()? as u32 as usize;
        self.vars.memory[slot % MEMORY_SLOTS] = v;
        Ok(())
    }

    // ========================================================================
    // STACK MANIPULATION
    // ========================================================================

    fn op_dup(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v)?;
        self.push_d(v)
    }

    fn op_over(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(v2)?;
        self.push_d(v1)?;
        self.push_d(v2)
    }

    fn op_two_dup(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(v2)?;
        self.push_d(v1)?;
        self.push_d(v2)?;
        self.push_d(v1)
    }

    fn op_drop(&mut self) -> Result<(), RuntimeError> {
        self.pop_d()?;
        Ok(())
    }

    fn op_swap(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(v1)?;
        self.push_d(v2)
    }

    fn op_rot(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        let v3 = self.pop_d()?;
        self.push_d(v2)?;
        self.push_d(v1)?;
        self.push_d(v3)
    }

    fn op_minus_rot(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        let v3 = self.pop_d()?;
        self.push_d(v1)?;
        self.push_d(v3)?;
        self.push_d(v2)
    }

    // ========================================================================
    // COMPLEX PAIRS
    // ========================================================================

    fn op_z_add(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        let v3 = self.pop_d()?;
        let v4 = self.pop_d()?;
        self.push_d(v2 + v4)?;
        self.push_d(v1 + v3)
    }

    fn op_z_mul(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        let v3 = self.pop_d()?;
        let v4 = self.pop_d()?;
        self.push_d(v4 * v2 - v3 * v1)?;
        self.push_d(v4 * v1 + v3 * v2)
    }

    // ========================================================================
    // COMPARISON
    // ========================================================================

    fn op_eq(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(if v1 == v2 { 1.0 } else { 0.0 })
    }

    fn op_ne(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(if v1 != v2 { 1.0 } else { 0.0 })
    }

    fn op_gt(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(if v1 > v2 { 1.0 } else { 0.0 })
    }

    fn op_lt(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(if v1 < v2 { 1.0 } else { 0.0 })
    }

    fn op_ge(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(if v1 >= v2 { 1.0 } else { 0.0 })
    }

    fn op_le(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(if v1 <= v2 { 1.0 } else { 0.0 })
    }

    // ========================================================================
    // ARITHMETIC
    // ========================================================================

    fn op_add(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(v1 + v2)
    }

    fn op_sub(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let u = self.pop_d()?;
        self.push_d(u - v)
    }

    fn op_mul(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(v1 * v2)
    }

    fn op_div(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let u = self.pop_d()?;
        if v == 0.0 {
            self.push_d(f64::INFINITY)
        } else {
            self.push_d(u / v)
        }
    }

    fn op_mod(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let u = self.pop_d()?;
        self.push_d(u % v)
    }

    fn op_pow(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let u = self.pop_d()?;
        self.push_d(u.abs().powf(v))
    }

    fn op_negate(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(-v)
    }

    // ========================================================================
    // MATH
    // ========================================================================

    fn op_sin(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.sin())
    }

    fn op_cos(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.cos())
    }

    fn op_tan(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.tan())
    }

    fn op_log(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.abs().ln())
    }

    fn op_exp(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.exp())
    }

    fn op_sqrt(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.abs().sqrt())
    }

    fn op_floor(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.floor())
    }

    fn op_ceil(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.ceil())
    }

    fn op_abs(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v.abs())
    }

    fn op_atan2(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let u = self.pop_d()?;
        self.push_d(u.atan2(v))
    }

    fn op_min(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(v1.min(v2))
    }

    fn op_max(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        self.push_d(v1.max(v2))
    }

    fn op_pi(&mut self) -> Result<(), RuntimeError> {
        self.push_d(PI)
    }

    fn op_random(&mut self) -> Result<(), RuntimeError> {
        self.push_d(rand::random::<f64>())
    }

    // ========================================================================
    // LOGIC
    // ========================================================================

    fn op_and(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let u = self.pop_d()?;
        self.push_d(if u != 0.0 && v != 0.0 { 1.0 } else { 0.0 })
    }

    fn op_or(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        let u = self.pop_d()?;
        self.push_d(if u != 0.0 || v != 0.0 { 1.0 } else { 0.0 })
    }

    fn op_not(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(if v != 0.0 { 0.0 } else { 1.0 })
    }

    // ========================================================================
    // FUSED WORDS (optimizer-only)
    // ========================================================================

    fn op_fma(&mut self) -> Result<(), RuntimeError> {
        let m1 = self.pop_d()?;
        let m2 = self.pop_d()?;
        let a = self.pop_d()?;
        self.push_d(m1.mul_add(m2, a))
    }

    fn op_mult_pi(&mut self) -> Result<(), RuntimeError> {
        *self.top_d()? *= PI;
        Ok(())
    }

    fn op_mult_half_pi(&mut self) -> Result<(), RuntimeError> {
        *self.top_d()? *= FRAC_PI_2;
        Ok(())
    }

    fn op_mult2(&mut self) -> Result<(), RuntimeError> {
        *self.top_d()? *= 2.0;
        Ok(())
    }

    fn op_div2(&mut self) -> Result<(), RuntimeError> {
        *self.top_d()? /= 2.0;
        Ok(())
    }

    fn op_pow2(&mut self) -> Result<(), RuntimeError> {
        let top = self.top_d()?;
        let v = *top;
        *top = v * v;
        Ok(())
    }

    fn op_dup_dup(&mut self) -> Result<(), RuntimeError> {
        let v = self.pop_d()?;
        self.push_d(v)?;
        self.push_d(v)?;
        self.push_d(v)?;
        self.push_d(v)
    }

    fn op_minus_rot_swap(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        let v3 = self.pop_d()?;
        self.push_d(v1)?;
        self.push_d(v2)?;
        self.push_d(v3)
    }

    fn op_ge_swap(&mut self) -> Result<(), RuntimeError> {
        let v1 = self.pop_d()?;
        let v2 = self.pop_d()?;
        let v3 = self.pop_d()?;
        self.push_d(if v1 >= v2 { 1.0 } else { 0.0 })?;
        self.push_d(v3)
    }
}
