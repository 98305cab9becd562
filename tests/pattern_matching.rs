//! Pattern matching scenarios against snippet programs.

mod common;

use armatch::{MatchResult, PatternError, Program, Reg, Value};
use common::{addr_of, get, program};

#[test]
fn blx_glob_binds_opcode_and_label() {
    let program = program("0x2000: blxeq r0");
    let pattern = program.create_pattern("test: blx*:opcode r0").unwrap();

    let mut mr = MatchResult::new();
    let found = program.find_all(&pattern, &mut mr, None).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(addr_of(&program, found[0]), 0x2000);

    let multi = mr.subs(mr.root(), 0).expect("find_all multi scope");
    let items = mr.items(multi);
    assert_eq!(items.len(), 1);
    assert_eq!(
        mr.get(items[0], "opcode").unwrap(),
        Some(Value::Str("blxeq".into()))
    );
    assert_eq!(
        mr.get(items[0], "test").unwrap(),
        Some(Value::Address(0x2000))
    );
}

#[test]
fn find_single_commits_into_caller_result() {
    let program = program(
        "
        0x2000: blxeq r0
        0x2008: blxne r1
        ",
    );
    let pattern = program.create_pattern("test: blx*:opcode r1").unwrap();

    let mut mr = MatchResult::new();
    let cursor = program.find_single(&pattern, &mut mr).unwrap();
    assert_eq!(addr_of(&program, cursor), 0x2008);
    assert_eq!(get(&mr, "test"), Value::Address(0x2008));
    assert_eq!(get(&mr, "opcode"), Value::Str("blxne".into()));
}

#[test]
fn too_many_matches_is_detected_despite_conflicting_captures() {
    let program = program(
        "
        0x2000: blxeq r0
        0x2008: blxne r0
        ",
    );
    let pattern = program.create_pattern("test: blx*:opcode r0").unwrap();

    let mut mr = MatchResult::new();
    let err = program.find_single(&pattern, &mut mr).unwrap_err();
    assert_eq!(err, PatternError::TooManyMatches);
    // The failed search leaves no bindings behind.
    assert_eq!(mr.to_obj(), MatchResult::new().to_obj());

    let found = program.find_all(&pattern, &mut mr, None).unwrap();
    assert_eq!(found.len(), 2);
}

#[test]
fn capture_collision_semantics() {
    let mut program = Program::new();
    program.add_code_block("0x1000: bl 0x2000", None).unwrap();
    program.add_code_block("0x3000: bl 0x3000", None).unwrap();
    program.add_code_block("0x4000: bl 0x4000", None).unwrap();
    let pattern = program.create_pattern("test: bl @:test").unwrap();

    let mut mr = MatchResult::new();
    // The label binds the address, then the operand wildcard binds the
    // branch target to the same name: 0x1000 vs 0x2000 collide.
    let err = program
        .match_at(&pattern, program.create_cursor(0x1000).unwrap(), &mut mr)
        .unwrap_err();
    assert!(matches!(err, PatternError::CaptureCollision { .. }));

    // A self-branch agrees with itself.
    program
        .match_at(&pattern, program.create_cursor(0x3000).unwrap(), &mut mr)
        .unwrap();
    assert_eq!(get(&mr, "test"), Value::Address(0x3000));

    // Matches the pattern, but 'test' is already bound to 0x3000.
    let err = program
        .match_at(&pattern, program.create_cursor(0x4000).unwrap(), &mut mr)
        .unwrap_err();
    assert!(matches!(err, PatternError::CaptureCollision { .. }));
}

#[test]
fn anchored_block_matches_around_the_cursor() {
    let program = program(
        "
        0x2000: mov  r0, r2
        0x2004: mov  r1, r0
        0x2008: bleq 0x2004
        ",
    );
    let pattern = program
        .create_pattern(
            "
              mov  r0, r2
            > mov  r1, r0
              bleq @
            ",
        )
        .unwrap();

    let mut mr = MatchResult::new();
    program
        .match_at(&pattern, program.create_cursor(0x2004).unwrap(), &mut mr)
        .unwrap();

    // Anchoring at the first instruction forces the reverse line onto the
    // pre-init sentinel.
    let err = program
        .match_at(&pattern, program.create_cursor(0x2000).unwrap(), &mut mr)
        .unwrap_err();
    assert!(matches!(err, PatternError::InvalidAccess(_)));
}

#[test]
fn skip_generator_matches_forward_and_reverse() {
    let program = program(
        "
        0x2000: mov r0, r1
                mov r0, r2
                ldr r4, [r0]
                bl  0x8000
        ",
    );
    let pattern = program
        .create_pattern(
            "
            mov r0, @
            !skip_instructions(2)
            bl  @:target
            ",
        )
        .unwrap();

    let mut mr = MatchResult::new();
    program
        .match_at(&pattern, program.create_cursor(0x2000).unwrap(), &mut mr)
        .unwrap();
    assert_eq!(get(&mr, "target"), Value::Address(0x8000));
}

#[test]
fn skip_generator_reverses_before_the_anchor() {
    let program = program(
        "
        0x2000: mov r0, r1
                mov r0, r2
                ldr r4, [r0]
        0x200C: bl  0x1000
        ",
    );
    let pattern = program
        .create_pattern(
            "
            mov r0, @:reg
            !skip_instructions(2)
          > bl  0x1000
            ",
        )
        .unwrap();

    // From the first instruction the reverse walk runs off the block.
    let mut mr = MatchResult::new();
    let err = program
        .match_at(&pattern, program.create_cursor(0x2000).unwrap(), &mut mr)
        .unwrap_err();
    assert_eq!(err, PatternError::NoMoreInstructions);

    let mut mr = MatchResult::new();
    program
        .match_at(&pattern, program.create_cursor(0x200C).unwrap(), &mut mr)
        .unwrap();
    assert_eq!(get(&mr, "reg"), Value::Reg(Reg::parse("r1").unwrap()));
}

#[test]
fn skip_lines_with_bounds() {
    let program = program(
        "
        0x1000: mov r5, r0
                blxeq r1
                mov r0, r4
                bleq  0x1000
        ",
    );
    let cursor = program.create_cursor(0x1000).unwrap();

    let unbounded = program.create_pattern("mov r5, r0\n...\nbleq @:t").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&unbounded, cursor, &mut mr).unwrap();
    assert_eq!(get(&mr, "t"), Value::Address(0x1000));

    let exact = program.create_pattern("mov r5, r0\n...{2}\nbleq @").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&exact, cursor, &mut mr).unwrap();

    let too_short = program.create_pattern("mov r5, r0\n...{,1}\nbleq @").unwrap();
    let mut mr = MatchResult::new();
    let err = program.match_at(&too_short, cursor, &mut mr).unwrap_err();
    assert_eq!(err, PatternError::NoMatches);

    let min_too_deep = program.create_pattern("mov r5, r0\n...{3,}\nbleq @").unwrap();
    let mut mr = MatchResult::new();
    assert!(program.match_at(&min_too_deep, cursor, &mut mr).is_err());
}

#[test]
fn multi_wildcard_backtracks_in_reg_lists() {
    let program = program("0x1000: push {r0, r1}");
    let cursor = program.create_cursor(0x1000).unwrap();

    let all = program.create_pattern("push {*:regs}").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&all, cursor, &mut mr).unwrap();
    match get(&mr, "regs") {
        Value::RegList(regs) => {
            assert_eq!(regs.to_string(), "r0, r1");
        }
        other => panic!("unexpected capture {:?}", other),
    }

    let head = program.create_pattern("push {*:head, r1}").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&head, cursor, &mut mr).unwrap();
    match get(&mr, "head") {
        Value::RegList(regs) => {
            assert_eq!(regs.regs(), &[Reg::parse("r0").unwrap()]);
        }
        other => panic!("unexpected capture {:?}", other),
    }
}

#[test]
fn multi_wildcard_over_operands() {
    let program = program("0x1000: adc r4, r9");
    let cursor = program.create_cursor(0x1000).unwrap();

    let pattern = program.create_pattern("adc *:ops").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&pattern, cursor, &mut mr).unwrap();
    match get(&mr, "ops") {
        Value::OperandList(ops) => assert_eq!(ops.len(), 2),
        other => panic!("unexpected capture {:?}", other),
    }

    // An empty run also satisfies `*` when the rest of the chain consumes
    // everything.
    let pattern = program.create_pattern("adc *:empty, r4, r9").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&pattern, cursor, &mut mr).unwrap();
    assert_eq!(get(&mr, "empty"), Value::OperandList(vec![]));
}

#[test]
fn optional_wildcard_binds_null_sentinel() {
    let program = program("0x1000: mov r0, r1");
    let cursor = program.create_cursor(0x1000).unwrap();

    let absent = program.create_pattern("mov r0, r1, ?:opt").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&absent, cursor, &mut mr).unwrap();
    assert_eq!(get(&mr, "opt"), Value::None);

    let present = program.create_pattern("mov @, ?:opt").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&present, cursor, &mut mr).unwrap();
    assert_eq!(get(&mr, "opt"), Value::Reg(Reg::parse("r1").unwrap()));
}

#[test]
fn reg_range_patterns_with_wildcard_end() {
    let program = program("0x1000: push {r0, r1, r2, r5}");
    let cursor = program.create_cursor(0x1000).unwrap();

    let exact = program.create_pattern("push {r0-r2, r5}").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&exact, cursor, &mut mr).unwrap();

    let wild_end = program.create_pattern("push {r0-@:end, r5}").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&wild_end, cursor, &mut mr).unwrap();
    assert_eq!(get(&mr, "end"), Value::Reg(Reg::parse("r2").unwrap()));

    let wrong = program.create_pattern("push {r0-r3, r5}").unwrap();
    let mut mr = MatchResult::new();
    assert!(program.match_at(&wrong, cursor, &mut mr).is_err());
}

#[test]
fn shifted_register_patterns() {
    let program = program("0x1000: mov r0, r1, lsl#2");
    let cursor = program.create_cursor(0x1000).unwrap();

    let exact = program.create_pattern("mov r0, r1, lsl#2").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&exact, cursor, &mut mr).unwrap();

    let wild = program.create_pattern("mov r0, @:rm, @:sop#@:sval").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&wild, cursor, &mut mr).unwrap();
    assert_eq!(get(&mr, "rm"), Value::Reg(Reg::parse("r1").unwrap()));
    assert_eq!(get(&mr, "sop"), Value::Str("lsl".into()));
    assert_eq!(get(&mr, "sval"), Value::Int(2));

    let wrong_amount = program.create_pattern("mov r0, r1, lsl#3").unwrap();
    let mut mr = MatchResult::new();
    assert!(matches!(
        program.match_at(&wrong_amount, cursor, &mut mr),
        Err(PatternError::PatternValueMismatch { .. })
    ));
}

#[test]
fn memory_access_patterns() {
    let program = program(
        "
        0x1000: ldr r4, [r0, #4]
                str r1, [r2, #8]!
                ldr r3, [r5], #12
        ",
    );

    let pattern = program
        .create_pattern("ldr @:dst, [@:base, #@:off]")
        .unwrap();
    let mut mr = MatchResult::new();
    program
        .match_at(&pattern, program.create_cursor(0x1000).unwrap(), &mut mr)
        .unwrap();
    assert_eq!(get(&mr, "dst"), Value::Reg(Reg::parse("r4").unwrap()));
    assert_eq!(get(&mr, "base"), Value::Reg(Reg::parse("r0").unwrap()));
    assert_eq!(get(&mr, "off"), Value::Int(4));

    // Addressing modes must line up.
    let pre = program.create_pattern("str r1, [r2, #8]").unwrap();
    let mut mr = MatchResult::new();
    let second = program.create_cursor(0x1000).unwrap().next(&program).unwrap();
    assert!(matches!(
        program.match_at(&pre, second, &mut mr),
        Err(PatternError::PatternTypeMismatch { .. })
    ));

    let pre_ok = program.create_pattern("str r1, [r2, #8]!").unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&pre_ok, second, &mut mr).unwrap();

    let post = program.create_pattern("ldr @, [@:b], #@:off").unwrap();
    let third = second.next(&program).unwrap();
    let mut mr = MatchResult::new();
    program.match_at(&post, third, &mut mr).unwrap();
    assert_eq!(get(&mr, "b"), Value::Reg(Reg::parse("r5").unwrap()));
    assert_eq!(get(&mr, "off"), Value::Int(12));
}

#[test]
fn address_wildcard_lines_bind_without_consuming() {
    let program = program("0x2000: mov r1, r0");
    let pattern = program.create_pattern("@:loc: mov r1, r0").unwrap();

    let mut mr = MatchResult::new();
    program
        .match_at(&pattern, program.create_cursor(0x2000).unwrap(), &mut mr)
        .unwrap();
    assert_eq!(get(&mr, "loc"), Value::Address(0x2000));

    let literal = program.create_pattern("0x2000: mov r1, r0").unwrap();
    let mut mr = MatchResult::new();
    program
        .match_at(&literal, program.create_cursor(0x2000).unwrap(), &mut mr)
        .unwrap();

    let wrong = program.create_pattern("0x3000: mov r1, r0").unwrap();
    let mut mr = MatchResult::new();
    assert!(matches!(
        program.match_at(&wrong, program.create_cursor(0x2000).unwrap(), &mut mr),
        Err(PatternError::PatternValueMismatch { .. })
    ));
}

#[test]
fn find_first_and_find_last() {
    let program = program(
        "
        0x2000: bl 0x8000
        0x2004: bl 0x9000
        ",
    );
    let pattern = program.create_pattern("bl @:target").unwrap();

    let mut mr = MatchResult::new();
    let first = program.find_first(&pattern, &mut mr).unwrap();
    assert_eq!(addr_of(&program, first), 0x2000);
    assert_eq!(get(&mr, "target"), Value::Address(0x8000));

    let mut mr = MatchResult::new();
    let last = program.find_last(&pattern, &mut mr).unwrap();
    assert_eq!(addr_of(&program, last), 0x2004);
    assert_eq!(get(&mr, "target"), Value::Address(0x9000));

    let mut mr = MatchResult::new();
    let none = program.create_pattern("blx @").unwrap();
    assert_eq!(
        program.find_first(&none, &mut mr).unwrap_err(),
        PatternError::NoMatches
    );
}

#[test]
fn wildcard_opcode_matches_anything() {
    let program = program(
        "
        0x2000: blxeq r0
        0x2004: mov   r0, r1
        ",
    );
    let pattern = program.create_pattern("*:op r0, r1").unwrap();
    let mut mr = MatchResult::new();
    let cursor = program.find_single(&pattern, &mut mr).unwrap();
    assert_eq!(addr_of(&program, cursor), 0x2004);
    assert_eq!(get(&mr, "op"), Value::Str("mov".into()));

    // Globs are case-insensitive in both directions.
    let upper = program.create_pattern("BLX?? r0").unwrap();
    let mut mr = MatchResult::new();
    program
        .match_at(&upper, program.create_cursor(0x2000).unwrap(), &mut mr)
        .unwrap();
}

#[test]
fn not_all_operands_matched_is_reported() {
    let program = program("0x1000: mov r0, r1");
    let cursor = program.create_cursor(0x1000).unwrap();

    let short = program.create_pattern("mov r0").unwrap();
    let mut mr = MatchResult::new();
    assert!(matches!(
        program.match_at(&short, cursor, &mut mr),
        Err(PatternError::NotAllOperandsMatched { .. })
    ));

    let long = program.create_pattern("mov r0, r1, r2").unwrap();
    let mut mr = MatchResult::new();
    assert!(matches!(
        program.match_at(&long, cursor, &mut mr),
        Err(PatternError::OperandsExhausted { .. })
    ));
}
