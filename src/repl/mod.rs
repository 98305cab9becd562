//! Interactive pattern tester.
//!
//! Reads multi-line patterns (terminated by an empty line) and scans the
//! loaded program, printing the matching addresses and the capture tree.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::engine::match_result::MatchResult;
use crate::engine::program::Program;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".armatch_history"))
}

pub fn run(program: &Program) {
    println!("armatch pattern tester v{}", VERSION);
    println!("Enter a pattern, end with an empty line. Type 'exit' to quit.\n");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("failed to start line editor: {}", e);
            return;
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    loop {
        let mut pattern_lines: Vec<String> = Vec::new();
        loop {
            let prompt = if pattern_lines.is_empty() { "pat> " } else { "...> " };
            match editor.readline(prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if pattern_lines.is_empty() && (trimmed == "exit" || trimmed == "quit") {
                        save_history(&mut editor, &history);
                        return;
                    }
                    if trimmed.is_empty() {
                        break;
                    }
                    let _ = editor.add_history_entry(&line);
                    pattern_lines.push(line);
                }
                Err(ReadlineError::Interrupted) => {
                    pattern_lines.clear();
                    break;
                }
                Err(ReadlineError::Eof) => {
                    save_history(&mut editor, &history);
                    return;
                }
                Err(e) => {
                    eprintln!("input error: {}", e);
                    save_history(&mut editor, &history);
                    return;
                }
            }
        }
        if pattern_lines.is_empty() {
            continue;
        }

        let source = pattern_lines.join("\n");
        let pattern = match program.create_pattern(&source) {
            Ok(pattern) => pattern,
            Err(e) => {
                eprintln!("error: {}", e);
                continue;
            }
        };

        let mut mr = MatchResult::new();
        match program.find_all(&pattern, &mut mr, None) {
            Ok(matches) if matches.is_empty() => println!("no matches"),
            Ok(matches) => {
                for cursor in &matches {
                    match cursor.address(program) {
                        Some(a) => println!("match at 0x{:X}", a),
                        None => println!("match at unaddressed cursor"),
                    }
                }
                println!(
                    "{}",
                    serde_json::to_string_pretty(&mr.to_obj()).unwrap_or_default()
                );
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
}

fn save_history(editor: &mut DefaultEditor, history: &Option<std::path::PathBuf>) {
    if let Some(path) = history {
        let _ = editor.save_history(path);
    }
}
