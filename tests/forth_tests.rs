use std::collections::HashSet;

use pixelforth::code::{Inst, Op};
use pixelforth::compiler::ForthCtx;
use pixelforth::interpreter::Vars;

const DEMO: &str = ": nice 60 5 4 + + ; : juanita 400 10 5 5 + + + ; \
                    x if nice else juanita then 2 * 4 / 2 *";

/// A small corpus of well-formed programs exercising every pipeline stage.
const PROGRAMS: &[&str] = &[
    "",
    "1 2 +",
    "3 4 * 2 +",
    ": sq dup * ; 5 sq",
    "x if 10 else 20 then",
    "x if 1 if 2 else 3 then else 4 then",
    "1 0 /",
    "pi 2 *",
    "x pi * 2 /",
    "t x y * +",
    "x y t dt + + +",
    "1 2 3 -rot swap",
    ": pick x if 10 else 20 then ; pick pick +",
    DEMO,
];

fn compile(source: &str) -> Vec<Inst> {
    let mut ctx = ForthCtx::new();
    ctx.parse(source).unwrap();
    ctx.main_code().to_vec()
}

fn run_xy(source: &str, x: f64, y: f64) -> Vec<f64> {
    let mut ctx = ForthCtx::new();
    ctx.parse(source).unwrap();

    let mut vars = Vars {
        x,
        y,
        ..Vars::default()
    };
    ctx.run(&mut vars).unwrap();

    let mut values = Vec::new();
    while let Some(v) = ctx.d_stack_pop(&mut vars) {
        values.push(v);
    }
    values
}

fn parse_fails(source: &str) -> bool {
    let mut ctx = ForthCtx::new();
    ctx.parse(source).is_err()
}

// ============================================================================
// END-TO-END SCENARIOS
// ============================================================================

#[test]
fn scenario_addition() {
    assert_eq!(run_xy("1 2 +", 0.0, 0.0), vec![3.0]);
}

#[test]
fn scenario_constant_folding() {
    assert_eq!(run_xy("3 4 * 2 +", 0.0, 0.0), vec![14.0]);
}

#[test]
fn scenario_user_word() {
    assert_eq!(run_xy(": sq dup * ; 5 sq", 0.0, 0.0), vec![25.0]);
}

#[test]
fn scenario_branch_false() {
    assert_eq!(run_xy("x if 10 else 20 then", 0.0, 0.0), vec![20.0]);
}

#[test]
fn scenario_branch_true() {
    assert_eq!(run_xy("x if 10 else 20 then", 1.0, 0.0), vec![10.0]);
}

#[test]
fn scenario_demo_program() {
    assert_eq!(run_xy(DEMO, 0.0, 0.0), vec![420.0]);
    assert_eq!(run_xy(DEMO, 1.0, 0.0), vec![69.0]);
}

#[test]
fn scenario_division_by_zero() {
    assert_eq!(run_xy("1 0 /", 0.0, 0.0), vec![f64::INFINITY]);
}

#[test]
fn scenario_two_pi() {
    let values = run_xy("pi 2 *", 0.0, 0.0);
    assert_eq!(values.len(), 1);
    assert!((values[0] - 2.0 * std::f64::consts::PI).abs() < 1e-12);
}

// ============================================================================
// NEGATIVE PROGRAMS
// ============================================================================

#[test]
fn rejects_malformed_programs() {
    let bad = [
        ":",
        "then",
        "else",
        ";",
        ": foo foo ;",
        "+",
        "1 if 2",
        ": foo 1 if 2 ;",
    ];
    for source in bad {
        assert!(parse_fails(source), "accepted: {:?}", source);
    }

    assert!(parse_fails(&"a".repeat(65)));
    assert!(parse_fails("\u{1}"));
    assert!(parse_fails("é"));
}

// ============================================================================
// ARENA INVARIANTS
// ============================================================================

/// Indices of the opcode slots of `code`, skipping immediates.
fn opcode_slots(code: &[Inst]) -> HashSet<usize> {
    let mut slots = HashSet::new();
    let mut i = 0;
    while i < code.len() {
        slots.insert(i);
        i += match &code[i] {
            Inst::Op(Op::Number) | Inst::Op(Op::JumpIf) | Inst::Op(Op::Jump) => 2,
            Inst::Op(_) => 1,
            other => panic!("stray immediate {:?} at slot {}", other, i),
        };
    }
    slots
}

#[test]
fn invariant_single_trailing_halt() {
    for source in PROGRAMS {
        let code = compile(source);
        let halts = code
            .iter()
            .filter(|i| matches!(i, Inst::Op(Op::Halt)))
            .count();
        assert_eq!(halts, 1, "halt count in {:?}", source);
        assert_eq!(
            code.last(),
            Some(&Inst::Op(Op::Halt)),
            "last slot in {:?}",
            source
        );
    }
}

#[test]
fn invariant_jump_targets_are_opcode_slots() {
    for source in PROGRAMS {
        let code = compile(source);
        let slots = opcode_slots(&code);

        let mut i = 0;
        while i < code.len() {
            match &code[i] {
                Inst::Op(Op::JumpIf) | Inst::Op(Op::Jump) => {
                    let Some(Inst::Pc(off)) = code.get(i + 1) else {
                        panic!("missing pc immediate at {} in {:?}", i, source);
                    };
                    let target = i + off;
                    assert!(target < code.len(), "target oob in {:?}", source);
                    assert!(
                        slots.contains(&target),
                        "target {} is not an opcode slot in {:?}",
                        target,
                        source
                    );
                    i += 2;
                }
                Inst::Op(Op::Number) => i += 2,
                _ => i += 1,
            }
        }
    }
}

#[test]
fn invariant_no_eval_code_after_inlining() {
    for source in PROGRAMS {
        let code = compile(source);
        assert!(
            !code
                .iter()
                .any(|i| matches!(i, Inst::Op(Op::EvalCode) | Inst::CodeRef(_))),
            "call survived inlining in {:?}",
            source
        );
    }
}

#[test]
fn invariant_verified_straight_line_programs_run_clean() {
    for source in PROGRAMS {
        let mut ctx = ForthCtx::new();
        ctx.parse(source).unwrap();
        let mut vars = Vars::default();
        ctx.run(&mut vars).unwrap();

        assert!(ctx.d_stack_len(&vars) <= 32);
    }
}

#[test]
fn invariant_definition_order_is_irrelevant() {
    let forward = ": a 2 ; : b 3 ; a b +";
    let backward = ": b 3 ; : a 2 ; a b +";
    assert_eq!(run_xy(forward, 0.0, 0.0), run_xy(backward, 0.0, 0.0));
    assert_eq!(run_xy(forward, 0.0, 0.0), vec![5.0]);
}

#[test]
fn invariant_disassembler_is_total() {
    for source in PROGRAMS {
        let code = compile(source);
        let listing = pixelforth::code::dump(&code);
        assert!(!listing.is_empty(), "empty listing for {:?}", source);
        assert!(!listing.contains("***"), "inconsistency in {:?}", source);
        assert!(!listing.contains("<missing"), "truncated in {:?}", source);
    }
}
