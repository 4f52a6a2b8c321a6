// compiler.rs - Single-pass compiler for the Forth Salon dialect

use std::collections::HashMap;

use log::{debug, error};
use thiserror::Error;

use crate::builtins::{Builtin, D_STACK_SIZE, R_STACK_SIZE};
use crate::code::{self, Code, Inst, Op};
use crate::optimizer;
use crate::verify;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Longest accepted token, in bytes.
pub const MAX_WORD_LEN: usize = 64;

/// Deepest pending `if`/`else` nesting at compile time.
pub const MAX_JUMP_DEPTH: usize = 63;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("unprintable character in program")]
    UnprintableChar,
    #[error("word too long: {0} characters, expecting at most 64")]
    WordTooLong(usize),
    #[error("undefined word: \"{0}\"")]
    UndefinedWord(String),
    #[error("can't redefine number {0}")]
    RedefineNumber(f64),
    #[error("can't redefine built-in word \"{0}\"")]
    RedefineBuiltin(String),
    #[error("can't redefine word \"{0}\"")]
    RedefineWord(String),
    #[error("already defining word")]
    AlreadyDefining,
    #[error("ending word without defining one")]
    SemicolonOutsideDefinition,
    #[error("word definition not finished")]
    DefinitionNotFinished,
    #[error("unmatched if/then/else")]
    UnmatchedConditional,
    #[error("too many nested 'if' words")]
    IfTooDeep,
    #[error("else is too deep")]
    ElseTooDeep,
    #[error("'{0}' before 'if'")]
    BranchBeforeIf(&'static str),
    #[error("unterminated comment")]
    UnterminatedComment,
    #[error("recursion limit reached while inlining")]
    InlineRecursionLimit,
    #[error("word `{word}' requires {needs} item(s) in the D stack")]
    DStackUnderflow { word: &'static str, needs: u8 },
    #[error("word `{word}' requires {needs} item(s) in the R stack")]
    RStackUnderflow { word: &'static str, needs: u8 },
    #[error("program would cause a stack overflow in the D stack")]
    DStackOverflow,
    #[error("program would cause a stack overflow in the R stack")]
    RStackOverflow,
    #[error("program would underflow the D stack")]
    DStackNegative,
    #[error("program would underflow the R stack")]
    RStackNegative,
    #[error("program already parsed")]
    AlreadyParsed,
    #[error("corrupted instruction stream")]
    Internal,
}

// ============================================================================
// DICTIONARY
// ============================================================================

/// Dictionary entry: either a registry built-in, or a user word owning its
/// compiled body.
#[derive(Debug, Clone, PartialEq)]
pub enum Word {
    Builtin(Builtin),
    User(Code),
}

/// Words that execute at compile time, consuming source text and mutating
/// compiler state. Disjoint from the executable registry; name collisions
/// against this table are still redefinition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompilerWord {
    Colon,
    Semicolon,
    If,
    Else,
    Then,
    LineComment,
    ParenComment,
}

impl CompilerWord {
    fn from_name(name: &str) -> Option<CompilerWord> {
        match name {
            ":" => Some(CompilerWord::Colon),
            ";" => Some(CompilerWord::Semicolon),
            "if" => Some(CompilerWord::If),
            "else" => Some(CompilerWord::Else),
            "then" => Some(CompilerWord::Then),
            "\\" => Some(CompilerWord::LineComment),
            "(" => Some(CompilerWord::ParenComment),
            _ => None,
        }
    }
}

/// Which arena the compiler is currently emitting into.
#[derive(Debug)]
enum Defining {
    /// Top level: the implicit main body is open.
    Main,
    /// `:` was seen; the next token names a new word.
    AwaitingName,
    /// Inside `: name ... ;`. The body is held here and installed into the
    /// dictionary by `;`; a placeholder entry already reserves the name so
    /// the word can be referenced (and so redefinition fails).
    Word { name: String, code: Code },
}

// ============================================================================
// CONTEXT
// ============================================================================

/// A compilation and execution context: the dictionary, the implicit main
/// word, compile-time state, and the two operand stacks.
pub struct ForthCtx {
    pub(crate) words: HashMap<String, Word>,
    pub(crate) main: Code,
    defining: Defining,
    jump_stack: Vec<usize>,
    parsed: bool,
    pub(crate) compiled: bool,
    pub(crate) d_stack: [f64; D_STACK_SIZE],
    pub(crate) r_stack: [f64; R_STACK_SIZE],
}

impl ForthCtx {
    pub fn new() -> Self {
        let mut words = HashMap::new();
        for &b in Builtin::all() {
            words.insert(b.name().to_string(), Word::Builtin(b));
        }

        ForthCtx {
            words,
            main: Code::new(),
            defining: Defining::Main,
            jump_stack: Vec::new(),
            parsed: false,
            compiled: false,
            d_stack: [0.0; D_STACK_SIZE],
            r_stack: [0.0; R_STACK_SIZE],
        }
    }

    /// Read-only view of the final main arena.
    pub fn main_code(&self) -> &[Inst] {
        &self.main
    }

    /// Compile `source` into this context: tokenize, emit, inline user-word
    /// calls, run the peephole passes, and statically check stack effects.
    /// May be called once per context; a successfully parsed program can be
    /// executed any number of times.
    pub fn parse(&mut self, source: &str) -> Result<(), CompileError> {
        match self.parse_inner(source) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("forth: {}", e);
                Err(e)
            }
        }
    }

    fn parse_inner(&mut self, source: &str) -> Result<(), CompileError> {
        if self.parsed {
            return Err(CompileError::AlreadyParsed);
        }
        self.parsed = true;

        let bytes = source.as_bytes();
        let mut pos = 0;

        while pos < bytes.len() {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }

            let start = pos;
            while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
                if !bytes[pos].is_ascii_graphic() {
                    return Err(CompileError::UnprintableChar);
                }
                pos += 1;
            }

            if start == pos {
                break;
            }

            pos = self.compile_token(&source[start..pos], source, pos)?;
        }

        if !matches!(self.defining, Defining::Main) {
            return Err(CompileError::DefinitionNotFinished);
        }
        if !self.jump_stack.is_empty() {
            return Err(CompileError::UnmatchedConditional);
        }

        self.emit(Inst::Op(Op::Halt));

        self.main = optimizer::inline_calls(&self.words, &self.main)?;
        optimizer::check_word_recursion(&self.words)?;

        if optimizer::peephole(&mut self.main)? {
            optimizer::peephole(&mut self.main)?;
        }

        debug!("compiled program:\n{}", code::dump(&self.main));

        verify::check_stack_effects(&self.main)?;

        self.compiled = true;
        Ok(())
    }

    // ========================================================================
    // TOKEN DISPATCH
    // ========================================================================

    /// Compile one whitespace-delimited token. Compiler words may consume
    /// further source text; the returned position is where scanning resumes.
    fn compile_token(
        &mut self,
        token: &str,
        source: &str,
        pos: usize,
    ) -> Result<usize, CompileError> {
        if token.len() > MAX_WORD_LEN {
            return Err(CompileError::WordTooLong(token.len()));
        }

        if let Ok(number) = token.parse::<f64>() {
            if matches!(self.defining, Defining::AwaitingName) {
                return Err(CompileError::RedefineNumber(number));
            }
            self.emit(Inst::Op(Op::Number));
            self.emit(Inst::Number(number));
            return Ok(pos);
        }

        if matches!(self.defining, Defining::AwaitingName) {
            self.begin_definition(token)?;
            return Ok(pos);
        }

        if let Some(cw) = CompilerWord::from_name(token) {
            return self.compile_word(cw, source, pos);
        }

        match self.words.get(token) {
            Some(Word::Builtin(b)) => {
                let b = *b;
                self.emit(Inst::Op(Op::Builtin(b)));
            }
            Some(Word::User(_)) => {
                self.emit(Inst::Op(Op::EvalCode));
                self.emit(Inst::CodeRef(token.to_string()));
            }
            None => return Err(CompileError::UndefinedWord(token.to_string())),
        }

        Ok(pos)
    }

    /// The token after `:` names a new user word. Any existing name, user,
    /// built-in or compile-time, is a redefinition error.
    fn begin_definition(&mut self, token: &str) -> Result<(), CompileError> {
        if CompilerWord::from_name(token).is_some() {
            return Err(CompileError::RedefineBuiltin(token.to_string()));
        }
        match self.words.get(token) {
            Some(Word::Builtin(_)) => {
                return Err(CompileError::RedefineBuiltin(token.to_string()))
            }
            Some(Word::User(_)) => return Err(CompileError::RedefineWord(token.to_string())),
            None => {}
        }

        self.words.insert(token.to_string(), Word::User(Code::new()));
        self.defining = Defining::Word {
            name: token.to_string(),
            code: Code::new(),
        };
        Ok(())
    }

    // ========================================================================
    // COMPILER WORDS
    // ========================================================================

    fn compile_word(
        &mut self,
        word: CompilerWord,
        source: &str,
        pos: usize,
    ) -> Result<usize, CompileError> {
        match word {
            CompilerWord::LineComment => match source[pos..].find('\n') {
                Some(n) => Ok(pos + n + 1),
                None => Err(CompileError::UnterminatedComment),
            },
            CompilerWord::ParenComment => match source[pos..].find(')') {
                Some(n) => Ok(pos + n + 1),
                None => Err(CompileError::UnterminatedComment),
            },
            CompilerWord::Colon => {
                if !matches!(self.defining, Defining::Main) {
                    return Err(CompileError::AlreadyDefining);
                }
                self.defining = Defining::AwaitingName;
                Ok(pos)
            }
            CompilerWord::Semicolon => {
                if !self.jump_stack.is_empty() {
                    return Err(CompileError::UnmatchedConditional);
                }
                match std::mem::replace(&mut self.defining, Defining::Main) {
                    Defining::Word { name, code } => {
                        self.words.insert(name, Word::User(code));
                        Ok(pos)
                    }
                    _ => Err(CompileError::SemicolonOutsideDefinition),
                }
            }
            CompilerWord::If => {
                if self.jump_stack.len() >= MAX_JUMP_DEPTH {
                    return Err(CompileError::IfTooDeep);
                }
                self.emit(Inst::Op(Op::JumpIf));
                let placeholder = self.emit(Inst::Pc(0));
                self.jump_stack.push(placeholder);
                Ok(pos)
            }
            CompilerWord::Else => self.compile_else_then(false, pos),
            CompilerWord::Then => self.compile_else_then(true, pos),
        }
    }

    /// `then` emits a `nop` anchor and patches the pending placeholder to
    /// point at it. `else` emits a `jump` with a fresh placeholder and
    /// patches the pending one to the slot just past it, where the else
    /// branch begins.
    fn compile_else_then(&mut self, is_then: bool, pos: usize) -> Result<usize, CompileError> {
        let Some(pending) = self.jump_stack.pop() else {
            return Err(CompileError::BranchBeforeIf(if is_then {
                "then"
            } else {
                "else"
            }));
        };

        let target = if is_then {
            self.emit(Inst::Op(Op::Nop))
        } else {
            let jump = self.emit(Inst::Op(Op::Jump));
            if self.jump_stack.len() >= MAX_JUMP_DEPTH {
                return Err(CompileError::ElseTooDeep);
            }
            let placeholder = self.emit(Inst::Pc(0));
            self.jump_stack.push(placeholder);
            jump + 2
        };

        self.patch(pending, target)?;
        Ok(pos)
    }

    // ========================================================================
    // EMISSION
    // ========================================================================

    /// Append one slot to the arena currently being defined and return its
    /// index.
    fn emit(&mut self, inst: Inst) -> usize {
        let code = match &mut self.defining {
            Defining::Word { code, .. } => code,
            _ => &mut self.main,
        };
        code.push(inst);
        code.len() - 1
    }

    /// Overwrite the placeholder at `at` with the offset of `target`
    /// relative to the placeholder's opcode slot.
    fn patch(&mut self, at: usize, target: usize) -> Result<(), CompileError> {
        let code = match &mut self.defining {
            Defining::Word { code, .. } => code,
            _ => &mut self.main,
        };
        let opcode = at - 1;
        let slot = code.get_mut(at).ok_or(CompileError::UnmatchedConditional)?;
        *slot = Inst::Pc(target - opcode);
        Ok(())
    }
}

impl Default for ForthCtx {
    fn default() -> Self {
        Self::new()
    }
}
