use pixelforth::builtins::Builtin;
use pixelforth::code::{Inst, Op};
use pixelforth::compiler::{CompileError, ForthCtx};

fn parse_ok(source: &str) -> ForthCtx {
    let mut ctx = ForthCtx::new();
    ctx.parse(source).unwrap();
    ctx
}

fn parse_err(source: &str) -> CompileError {
    let mut ctx = ForthCtx::new();
    ctx.parse(source).unwrap_err()
}

#[test]
fn test_empty_program() {
    let ctx = parse_ok("");
    assert_eq!(ctx.main_code(), &[Inst::Op(Op::Halt)]);
}

#[test]
fn test_whitespace_only_program() {
    let ctx = parse_ok("  \t \n  ");
    assert_eq!(ctx.main_code(), &[Inst::Op(Op::Halt)]);
}

#[test]
fn test_number_literal() {
    let ctx = parse_ok("2.5");
    assert_eq!(
        ctx.main_code(),
        &[
            Inst::Op(Op::Number),
            Inst::Number(2.5),
            Inst::Op(Op::Halt),
        ]
    );
}

#[test]
fn test_negative_and_exponent_literals() {
    parse_ok("-1.5");
    parse_ok("1e3");
    parse_ok("-0.25");
}

#[test]
fn test_word_definition() {
    parse_ok(": sq dup * ; 5 sq");
}

#[test]
fn test_definition_before_use_is_required() {
    assert_eq!(
        parse_err("sq 5"),
        CompileError::UndefinedWord("sq".to_string())
    );
}

#[test]
fn test_undefined_word_inside_definition() {
    assert_eq!(
        parse_err(": foo bar ;"),
        CompileError::UndefinedWord("bar".to_string())
    );
}

#[test]
fn test_unfinished_definition() {
    assert_eq!(parse_err(": sq dup *"), CompileError::DefinitionNotFinished);
}

#[test]
fn test_bare_colon() {
    assert_eq!(parse_err(":"), CompileError::DefinitionNotFinished);
}

#[test]
fn test_colon_inside_definition() {
    assert_eq!(parse_err(": foo : bar ;"), CompileError::AlreadyDefining);
}

#[test]
fn test_redefine_builtin() {
    assert_eq!(
        parse_err(": dup 1 ;"),
        CompileError::RedefineBuiltin("dup".to_string())
    );
}

#[test]
fn test_redefine_compiler_word() {
    assert_eq!(
        parse_err(": if 1 ;"),
        CompileError::RedefineBuiltin("if".to_string())
    );
}

#[test]
fn test_redefine_user_word() {
    assert_eq!(
        parse_err(": foo 1 ; : foo 2 ;"),
        CompileError::RedefineWord("foo".to_string())
    );
}

#[test]
fn test_number_as_definition_name() {
    assert_eq!(parse_err(": 5 1 ;"), CompileError::RedefineNumber(5.0));
}

#[test]
fn test_semicolon_at_top_level() {
    assert_eq!(parse_err(";"), CompileError::SemicolonOutsideDefinition);
}

#[test]
fn test_then_without_if() {
    assert_eq!(parse_err("then"), CompileError::BranchBeforeIf("then"));
}

#[test]
fn test_else_without_if() {
    assert_eq!(parse_err("else"), CompileError::BranchBeforeIf("else"));
}

#[test]
fn test_dangling_if() {
    assert_eq!(parse_err("1 if 2"), CompileError::UnmatchedConditional);
}

#[test]
fn test_semicolon_with_open_conditional() {
    assert_eq!(
        parse_err(": foo 1 if 2 ;"),
        CompileError::UnmatchedConditional
    );
}

#[test]
fn test_nested_conditionals() {
    parse_ok("x if 1 if 2 else 3 then else 4 then");
}

#[test]
fn test_if_nesting_limit() {
    let open = "1 if ".repeat(63);
    let close = "then ".repeat(63);
    parse_ok(&format!("{}{}", open, close));

    let too_deep = "1 if ".repeat(64);
    assert_eq!(parse_err(&too_deep), CompileError::IfTooDeep);
}

#[test]
fn test_token_length_limit() {
    // 64 bytes is accepted as a token (an unknown word, here).
    let long = "a".repeat(64);
    assert_eq!(parse_err(&long), CompileError::UndefinedWord(long.clone()));

    let too_long = "a".repeat(65);
    assert_eq!(parse_err(&too_long), CompileError::WordTooLong(65));
}

#[test]
fn test_unprintable_byte() {
    assert_eq!(parse_err("\u{1}"), CompileError::UnprintableChar);
    assert_eq!(parse_err("1 2 \u{7f} +"), CompileError::UnprintableChar);
}

#[test]
fn test_non_ascii_byte() {
    assert_eq!(parse_err("é"), CompileError::UnprintableChar);
}

#[test]
fn test_line_comment() {
    let ctx = parse_ok("1 \\ ignored words + * nonsense\n2");
    assert_eq!(ctx.main_code().len(), 5);
}

#[test]
fn test_line_comment_without_newline() {
    assert_eq!(parse_err("1 \\ trailing"), CompileError::UnterminatedComment);
}

#[test]
fn test_paren_comment() {
    parse_ok("1 ( a comment ) 2");
}

#[test]
fn test_paren_comment_unterminated() {
    assert_eq!(
        parse_err("1 ( never closed"),
        CompileError::UnterminatedComment
    );
}

#[test]
fn test_comment_may_contain_unprintable_bytes() {
    parse_ok("1 ( bytes é \u{7f} here ) 2");
    parse_ok("1 \\ é and \u{7f}\n2");
}

#[test]
fn test_parse_is_once_per_context() {
    let mut ctx = ForthCtx::new();
    ctx.parse("1 2 +").unwrap();
    assert_eq!(ctx.parse("3 4 +").unwrap_err(), CompileError::AlreadyParsed);
}

#[test]
fn test_failed_parse_poisons_context() {
    let mut ctx = ForthCtx::new();
    ctx.parse("undefined-word").unwrap_err();
    assert_eq!(ctx.parse("1 2 +").unwrap_err(), CompileError::AlreadyParsed);
}

#[test]
fn test_word_referencing_earlier_word() {
    parse_ok(": double 2 * ; : quad double double ; 3 quad");
}

#[test]
fn test_fused_words_are_not_reachable_from_source() {
    assert_eq!(Builtin::from_name("+"), Some(Builtin::Add));
    assert_eq!(Builtin::from_name("dup"), Some(Builtin::Dup));
    assert!(Builtin::from_name("fma").is_none());
    assert!(Builtin::from_name("mult2").is_none());
    assert!(Builtin::from_name("multhalfpi").is_none());

    assert_eq!(
        parse_err("1 2 3 fma"),
        CompileError::UndefinedWord("fma".to_string())
    );
    assert_eq!(
        parse_err(": foo mult2 ;"),
        CompileError::UndefinedWord("mult2".to_string())
    );
}
