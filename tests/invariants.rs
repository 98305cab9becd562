//! Engine-wide properties: rollback idempotence, commit equivalence,
//! serialization round trips.

mod common;

use armatch::{MatchResult, Value};
use common::program;

/// A failed match leaves the match result exactly as it found it, for every
/// entry point.
#[test]
fn failed_matches_leave_no_trace() {
    let program = program(
        "
        0x2000: mov r5, r0
                blxeq r1
                bleq  0x1000
        ",
    );
    let mut mr = MatchResult::new();
    mr.set(mr.root(), "pre", Value::Int(1)).unwrap();
    let before = mr.to_obj();

    let patterns = [
        // Plain mismatch after a successful capture line.
        "mov @:reg, r0\nmov r9, r9",
        // Mismatch inside a skip search.
        "mov @:reg, r0\n...\nldm r0, {r1}",
        // Mismatch after an embedded cursor move.
        "mov @:reg, r0\n% cursor = cursor.next()\nadd r0, r1, r2",
        // Failure inside a generator.
        "mov @:reg, r0\n!skip_instructions(9)",
    ];
    for source in patterns {
        let pattern = program.create_pattern(source).unwrap();
        let cursor = program.create_cursor(0x2000).unwrap();
        assert!(program.match_at(&pattern, cursor, &mut mr).is_err());
        assert_eq!(mr.to_obj(), before, "dirty result after '{}'", source);

        assert!(program.find_single(&pattern, &mut mr).is_err());
        assert_eq!(mr.to_obj(), before, "dirty result after find_single");
    }
}

/// A successful match commits the same tree a plain sequence of `set`
/// calls would produce.
#[test]
fn successful_match_equals_plain_sets() {
    let program = program("0x2000: blxeq r0");
    let pattern = program.create_pattern("test: blx*:opcode r0").unwrap();
    let mut matched = MatchResult::new();
    program
        .match_at(&pattern, program.create_cursor(0x2000).unwrap(), &mut matched)
        .unwrap();

    let mut plain = MatchResult::new();
    let root = plain.root();
    plain.set(root, "test", Value::Address(0x2000)).unwrap();
    plain.set(root, "opcode", Value::Str("blxeq".into())).unwrap();

    assert_eq!(matched.to_obj(), plain.to_obj());
}

#[test]
fn to_json_is_stable_over_to_obj() {
    let program = program(
        "
        0x2000: blxeq r0
        0x2008: blxne r0
        ",
    );
    let pattern = program.create_pattern("at: blx*:op r0").unwrap();
    let mut mr = MatchResult::new();
    program.find_all(&pattern, &mut mr, Some("hits")).unwrap();

    let obj = mr.to_obj();
    // to_json is to_obj rendered; parsing it back yields the same tree.
    let parsed: serde_json::Value = serde_json::from_str(&mr.to_json()).unwrap();
    assert_eq!(obj, parsed);

    let hits = &obj["sub_multi_matches"]["hits"];
    assert_eq!(hits.as_array().unwrap().len(), 2);
    assert_eq!(hits[0]["at"], serde_json::json!(0x2000));
    assert_eq!(hits[0]["op"], serde_json::json!("blxeq"));
    assert_eq!(hits[1]["at"], serde_json::json!(0x2008));
}

#[test]
fn find_all_commits_one_scope_per_match() {
    let program = program(
        "
        0x2000: bl 0x8000
        0x2004: mov r0, r1
        0x2008: bl 0x9000
        ",
    );
    let pattern = program.create_pattern("bl @:target").unwrap();
    let mut mr = MatchResult::new();
    let found = program.find_all(&pattern, &mut mr, None).unwrap();
    assert_eq!(found.len(), 2);

    let multi = mr.subs(mr.root(), 0).unwrap();
    let items = mr.items(multi);
    assert_eq!(items.len(), 2);
    assert_eq!(
        mr.get(items[0], "target").unwrap(),
        Some(Value::Address(0x8000))
    );
    assert_eq!(
        mr.get(items[1], "target").unwrap(),
        Some(Value::Address(0x9000))
    );
    // Sibling scopes are isolated: nothing leaked into the root.
    assert_eq!(mr.get(mr.root(), "target").unwrap(), None);
}
