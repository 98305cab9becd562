//! Signature files: YAML documents pairing a pattern with the captures it
//! imports and exports, resolved in dependency order against a program.
//!
//! A signature file holds one YAML document per signature. Signatures can
//! import captures exported by other signatures (in any file of the run);
//! the runner resolves exporters first, marks signatures whose dependencies
//! failed as `not run`, and writes a `.match` result file mirroring each
//! signature file.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::errors::PatternError;
use crate::engine::match_result::MatchResult;
use crate::engine::program::Program;
use crate::engine::value::Value;

pub const SIGNATURE_EXT: &str = "sig";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    FindAll,
    FindFirst,
    #[default]
    FindSingle,
    FindLast,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signature {
    #[serde(default)]
    pub name: Option<String>,
    /// Captures that must already be bound by previously matched signatures.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Captures this signature must bind.
    pub exports: Vec<String>,
    #[serde(default)]
    pub method: Method,
    pub pattern: String,
}

#[derive(Debug)]
pub enum SigError {
    Io(PathBuf, String),
    Yaml(PathBuf, String),
    NoSignatures(PathBuf),
}

impl fmt::Display for SigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigError::Io(path, e) => write!(f, "{}: {}", path.display(), e),
            SigError::Yaml(path, e) => write!(f, "{}: bad signature file: {}", path.display(), e),
            SigError::NoSignatures(path) => {
                write!(f, "no signature files found under {}", path.display())
            }
        }
    }
}

impl std::error::Error for SigError {}

impl Signature {
    /// Parses a multi-document YAML string, one signature per document.
    pub fn load_documents(text: &str) -> Result<Vec<Signature>, String> {
        let mut signatures = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let sig = Signature::deserialize(document).map_err(|e| e.to_string())?;
            signatures.push(sig);
        }
        Ok(signatures)
    }
}

pub fn load_signature_file(path: &Path) -> Result<Vec<Signature>, SigError> {
    let text =
        fs::read_to_string(path).map_err(|e| SigError::Io(path.to_path_buf(), e.to_string()))?;
    Signature::load_documents(&text).map_err(|e| SigError::Yaml(path.to_path_buf(), e))
}

/// All `.sig` files under `path` (or `path` itself when it is a file).
pub fn find_signature_files(path: &Path) -> Result<Vec<PathBuf>, SigError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut found = Vec::new();
    collect_sig_files(path, &mut found)?;
    found.sort();
    if found.is_empty() {
        return Err(SigError::NoSignatures(path.to_path_buf()));
    }
    Ok(found)
}

fn collect_sig_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SigError> {
    let entries =
        fs::read_dir(dir).map_err(|e| SigError::Io(dir.to_path_buf(), e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| SigError::Io(dir.to_path_buf(), e.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_sig_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(SIGNATURE_EXT) {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigState {
    Pending,
    Passed,
    Failed,
    NotRun,
}

/// Matching context shared by every signature in a run: states, exported
/// capture values and accumulated per-signature errors.
pub struct SignatureRunner<'p> {
    program: &'p Program,
    signatures: Vec<Signature>,
    states: Vec<SigState>,
    errors: Vec<Vec<String>>,
    exporter_map: HashMap<String, Vec<usize>>,
    match_values: HashMap<String, Value>,
}

impl<'p> SignatureRunner<'p> {
    pub fn new(program: &'p Program) -> Self {
        SignatureRunner {
            program,
            signatures: Vec::new(),
            states: Vec::new(),
            errors: Vec::new(),
            exporter_map: HashMap::new(),
            match_values: HashMap::new(),
        }
    }

    /// Adds signatures to the run; returns the index range they occupy.
    pub fn add_signatures(&mut self, signatures: Vec<Signature>) -> std::ops::Range<usize> {
        let start = self.signatures.len();
        for sig in signatures {
            let ix = self.signatures.len();
            for export in &sig.exports {
                self.exporter_map.entry(export.clone()).or_default().push(ix);
            }
            self.signatures.push(sig);
            self.states.push(SigState::Pending);
            self.errors.push(Vec::new());
        }
        start..self.signatures.len()
    }

    pub fn exported_value(&self, name: &str) -> Option<&Value> {
        self.match_values.get(name)
    }

    /// Resolves and runs every pending signature.
    pub fn run_all(&mut self) {
        for ix in 0..self.signatures.len() {
            let mut active = HashSet::new();
            self.resolve(ix, &mut active);
        }
    }

    /// Makes sure `ix` has run, resolving import providers first. Returns
    /// whether the signature passed.
    fn resolve(&mut self, ix: usize, active: &mut HashSet<usize>) -> bool {
        match self.states[ix] {
            SigState::Passed => return true,
            SigState::Failed | SigState::NotRun => return false,
            SigState::Pending => {}
        }
        if !active.insert(ix) {
            self.states[ix] = SigState::NotRun;
            self.errors[ix].push("recursive signature dependency".to_string());
            return false;
        }

        let imports = self.signatures[ix].imports.clone();
        for import in &imports {
            if self.match_values.contains_key(import) {
                continue;
            }
            let exporters = self.exporter_map.get(import).cloned().unwrap_or_default();
            let satisfied = exporters
                .into_iter()
                .filter(|&e| e != ix)
                .any(|e| self.resolve(e, active));
            if !satisfied {
                self.states[ix] = SigState::NotRun;
                self.errors[ix].push(format!("unsatisfied import '{}'", import));
                active.remove(&ix);
                return false;
            }
        }
        active.remove(&ix);
        self.perform_match(ix)
    }

    fn perform_match(&mut self, ix: usize) -> bool {
        let sig = self.signatures[ix].clone();
        debug!(name = sig.name.as_deref().unwrap_or("<unnamed>"), "running signature");

        let mut mr = MatchResult::new();
        let root = mr.root();
        for import in &sig.imports {
            let value = self.match_values[import].clone();
            if mr.set(root, import, value).is_err() {
                self.fail(ix, format!("conflicting import '{}'", import));
                return false;
            }
        }

        let pattern = match self.program.create_pattern(&sig.pattern) {
            Ok(p) => p,
            Err(e) => {
                self.fail(ix, e.to_string());
                return false;
            }
        };

        let outcome = match sig.method {
            Method::FindAll => self.program.find_all(&pattern, &mut mr, None).map(|_| ()),
            Method::FindFirst => self.program.find_first(&pattern, &mut mr).map(|_| ()),
            Method::FindSingle => self.program.find_single(&pattern, &mut mr).map(|_| ()),
            Method::FindLast => self.program.find_last(&pattern, &mut mr).map(|_| ()),
        };
        if let Err(e) = outcome {
            self.fail(ix, e.to_string());
            return false;
        }

        let mut passed = true;
        for export in &sig.exports {
            let value = match mr.get(root, export) {
                Ok(Some(v)) => v,
                Ok(None) | Err(PatternError::UndefinedVar(_)) => {
                    self.errors[ix].push(format!("export '{}' was not bound", export));
                    passed = false;
                    continue;
                }
                Err(e) => {
                    self.errors[ix].push(e.to_string());
                    passed = false;
                    continue;
                }
            };
            match self.match_values.get(export) {
                Some(existing) if *existing != value => {
                    self.errors[ix].push(format!(
                        "export '{}' disagrees with an earlier signature",
                        export
                    ));
                    passed = false;
                }
                _ => {
                    self.match_values.insert(export.clone(), value);
                }
            }
        }

        self.states[ix] = if passed { SigState::Passed } else { SigState::Failed };
        passed
    }

    fn fail(&mut self, ix: usize, error: String) {
        self.errors[ix].push(error);
        self.states[ix] = SigState::Failed;
    }

    /// Renders the result document for one signature, parallel to the
    /// signature-file format.
    pub fn format_result(&self, ix: usize) -> String {
        let sig = &self.signatures[ix];
        let result = match self.states[ix] {
            SigState::Passed => "pass",
            SigState::Failed => "failure",
            SigState::Pending | SigState::NotRun => "not run",
        };

        let mut matches = serde_yaml::Mapping::new();
        if self.states[ix] == SigState::Passed {
            for export in &sig.exports {
                if let Some(value) = self.match_values.get(export) {
                    matches.insert(
                        serde_yaml::Value::String(export.clone()),
                        yaml_value(value),
                    );
                }
            }
        }

        let doc = SignatureResult {
            name: sig.name.clone(),
            result,
            errors: self.errors[ix].clone(),
            matches,
        };
        let body = serde_yaml::to_string(&doc).unwrap_or_default();
        format!("---\n{}...\n", body)
    }

    pub fn format_results(&self, range: std::ops::Range<usize>) -> String {
        range.map(|ix| self.format_result(ix)).collect::<Vec<_>>().join("\n")
    }
}

/// One result document, mirroring the signature-file layout.
#[derive(Debug, Serialize)]
struct SignatureResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    result: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
    #[serde(skip_serializing_if = "serde_yaml::Mapping::is_empty")]
    matches: serde_yaml::Mapping,
}

/// Addresses serialize as integers; values with no YAML scalar form fall
/// back to their JSON rendering as a string.
fn yaml_value(value: &Value) -> serde_yaml::Value {
    match value {
        Value::Address(a) => serde_yaml::Value::Number((*a).into()),
        Value::Int(v) => serde_yaml::Value::Number((*v).into()),
        Value::Bool(b) => serde_yaml::Value::Bool(*b),
        Value::Str(s) => serde_yaml::Value::String(s.clone()),
        other => serde_yaml::Value::String(other.to_json().to_string()),
    }
}

/// Loads every signature file under `sigs_path`, runs them against the
/// program, and writes a `<file>.match` result next to each (or under
/// `out_dir` when given). Returns the written result paths.
pub fn run_signature_files(
    program: &Program,
    sigs_path: &Path,
    out_dir: Option<&Path>,
) -> Result<Vec<PathBuf>, SigError> {
    let files = find_signature_files(sigs_path)?;
    let mut runner = SignatureRunner::new(program);
    let mut groups = Vec::new();
    for file in &files {
        let signatures = load_signature_file(file)?;
        let range = runner.add_signatures(signatures);
        groups.push((file.clone(), range));
    }

    runner.run_all();

    let mut written = Vec::new();
    for (file, range) in groups {
        let output = match out_dir {
            Some(dir) => {
                let name = file.file_name().expect("signature files have names");
                dir.join(name).with_extension(format!("{}.match", SIGNATURE_EXT))
            }
            None => file.with_extension(format!("{}.match", SIGNATURE_EXT)),
        };
        let content = runner.format_results(range);
        fs::write(&output, content)
            .map_err(|e| SigError::Io(output.clone(), e.to_string()))?;
        info!(path = %output.display(), "wrote signature results");
        written.push(output);
    }
    Ok(written)
}
