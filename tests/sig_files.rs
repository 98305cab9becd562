//! Signature-file runner: dependency resolution, result files.

mod common;

use std::fs;
use std::path::PathBuf;

use armatch::sig::{run_signature_files, SignatureRunner};
use armatch::{Program, Value};
use common::program;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("armatch_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn test_program() -> Program {
    program(
        "
        0x1000: mov r5, r0
        0x1004: blxeq r1
        0x1008: bleq  0x2000
        0x100C: adc   r4, r9
        ",
    )
}

#[test]
fn signatures_run_in_dependency_order() {
    let program = test_program();
    let mut runner = SignatureRunner::new(&program);

    // The importer comes first in the file; the runner must resolve its
    // exporter before running it.
    let range = runner.add_signatures(
        armatch::sig::Signature::load_documents(
            "
---
name: uses_target
imports: [target]
exports: [site]
method: find_single
pattern: |
  site: bleq @:target
---
name: provides_target
exports: [target]
method: find_first
pattern: |
  bleq @:target
",
        )
        .unwrap(),
    );
    runner.run_all();

    assert_eq!(runner.exported_value("target"), Some(&Value::Address(0x2000)));
    assert_eq!(runner.exported_value("site"), Some(&Value::Address(0x1008)));

    let report = runner.format_results(range);
    assert!(report.contains("name: uses_target"));
    assert!(report.matches("result: pass").count() == 2);
    assert!(report.contains("target: 8192"));
    assert!(report.contains("site: 4104"));
}

#[test]
fn unsatisfied_imports_mark_signatures_not_run() {
    let program = test_program();
    let mut runner = SignatureRunner::new(&program);
    let range = runner.add_signatures(
        armatch::sig::Signature::load_documents(
            "
---
name: needs_missing
imports: [nowhere]
exports: [x]
pattern: |
  mov @:x, r0
---
name: fails_to_match
exports: [y]
pattern: |
  ldm r0, {r1-r3}
",
        )
        .unwrap(),
    );
    runner.run_all();

    let report = runner.format_results(range);
    assert!(report.contains("result: not run"));
    assert!(report.contains("unsatisfied import 'nowhere'"));
    assert!(report.contains("result: failure"));
}

#[test]
fn run_signature_files_writes_match_results() {
    let dir = temp_dir("sig_run");
    fs::write(
        dir.join("calls.sig"),
        "---\n\
         name: call_site\n\
         exports: [target]\n\
         pattern: |\n\
         \x20 bleq @:target\n",
    )
    .unwrap();

    let program = test_program();
    let written = run_signature_files(&program, &dir, None).unwrap();
    assert_eq!(written.len(), 1);
    assert!(written[0].to_string_lossy().ends_with("calls.sig.match"));

    let content = fs::read_to_string(&written[0]).unwrap();
    assert!(content.contains("name: call_site"));
    assert!(content.contains("result: pass"));
    assert!(content.contains("target: 8192"));

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn reports_round_trip_as_yaml_even_with_awkward_names() {
    use serde::Deserialize;

    let program = test_program();
    let mut runner = SignatureRunner::new(&program);
    let range = runner.add_signatures(
        armatch::sig::Signature::load_documents(
            "
---
name: 'call: site #1'
exports: [target]
pattern: |
  bleq @:target
---
name: broken
exports: [missing]
pattern: |
  ldm r0, {r1-r3}
",
        )
        .unwrap(),
    );
    runner.run_all();
    let report = runner.format_results(range);

    // The report must parse back as YAML documents, colons and all.
    let docs: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(&report)
        .map(|doc| serde_yaml::Value::deserialize(doc).unwrap())
        .collect();
    assert_eq!(docs.len(), 2);

    assert_eq!(docs[0]["name"].as_str(), Some("call: site #1"));
    assert_eq!(docs[0]["result"].as_str(), Some("pass"));
    assert_eq!(docs[0]["matches"]["target"].as_u64(), Some(0x2000));

    assert_eq!(docs[1]["name"].as_str(), Some("broken"));
    assert_eq!(docs[1]["result"].as_str(), Some("failure"));
    assert!(docs[1]["errors"].as_sequence().is_some());
    assert!(docs[1].get("matches").is_none());
}

#[test]
fn conflicting_exports_fail_the_later_signature() {
    let program = program(
        "
        0x1000: bl 0x8000
        0x1004: bl 0x9000
        ",
    );
    let mut runner = SignatureRunner::new(&program);
    let range = runner.add_signatures(
        armatch::sig::Signature::load_documents(
            "
---
name: first
exports: [target]
method: find_first
pattern: |
  bl @:target
---
name: last
exports: [target]
method: find_last
pattern: |
  bl @:target
",
        )
        .unwrap(),
    );
    runner.run_all();

    let report = runner.format_results(range);
    assert!(report.contains("result: pass"));
    assert!(report.contains("disagrees with an earlier signature"));
}
