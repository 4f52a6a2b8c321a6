//! An embeddable compiler and interpreter for the Forth Salon pixel-shader
//! dialect. Source programs are compiled in a single pass to a flat
//! instruction stream, user-word calls are inlined, the stream is peephole
//! optimized and statically checked for stack safety, and the result is
//! executed against per-pixel inputs.

pub mod builtins;
pub mod code;
pub mod compiler;
pub mod interpreter;
pub mod optimizer;
pub mod verify;

pub use builtins::RuntimeError;
pub use compiler::{CompileError, ForthCtx};
pub use interpreter::{Vars, MEMORY_SLOTS};
