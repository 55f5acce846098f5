//! FileCheck-style validation of generated listings.
//!
//! A `.rg` file carries its own expectations as comment directives:
//!
//! ```text
//! ; RUN: --no-jump-tables
//! ; CHECK-LABEL: routine main
//! ; CHECK: brfalse done
//! ; CHECK-NEXT: ldc.i8 1
//! ; CHECK-NOT: leave
//! ```
//!
//! Every routine in the file is compiled and its rendered listing appended
//! to the output the directives are matched against. Failing routines
//! contribute an `error: ...` line instead.

use bumpalo::Bump;
use log::debug;
use thiserror::Error;

use super::{parse_routines, ParseError};
use crate::config::CodegenOptions;
use crate::core::{CompilationSession, HelperRegistry};
use crate::driver::compile_routine;

/// One directive extracted from a test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// Substring expected on some later line.
    Check(String),
    /// Like [`CheckDirective::Check`], used to anchor a routine.
    CheckLabel(String),
    /// Substring expected on the line right after the previous match.
    CheckNext(String),
    /// Substring that must not appear before the next positive match.
    CheckNot(String),
    /// The line after the previous match is empty.
    CheckEmpty,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unknown RUN option '{0}'")]
    UnknownOption(String),

    #[error("CHECK: pattern '{0}' not found")]
    NotFound(String),

    #[error("CHECK-NEXT: expected '{expected}' but got '{found}'")]
    NextMismatch { expected: String, found: String },

    #[error("CHECK-NOT: '{pattern}' found at output line {line}")]
    Forbidden { pattern: String, line: usize },

    #[error("CHECK-EMPTY: expected an empty line but got '{0}'")]
    NotEmpty(String),
}

/// A routine text file together with its directives.
#[derive(Debug)]
pub struct FileTest {
    pub options: CodegenOptions,
    pub directives: Vec<CheckDirective>,
    pub source: String,
}

impl FileTest {
    pub fn parse(content: &str) -> Result<Self, CheckError> {
        let mut options = CodegenOptions::default();
        let mut directives = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();
            let Some(comment) = trimmed.strip_prefix(';') else { continue };
            let comment = comment.trim_start();

            if let Some(args) = comment.strip_prefix("RUN:") {
                let mut args = args.split_whitespace();
                while let Some(arg) = args.next() {
                    match arg {
                        "--no-jump-tables" => options.emit_jump_tables = false,
                        "--jump-table-min-cases" => {
                            options.jump_table_min_cases = args
                                .next()
                                .and_then(|v| v.parse().ok())
                                .ok_or_else(|| CheckError::UnknownOption(arg.to_string()))?;
                        }
                        "%s" => {}
                        other => return Err(CheckError::UnknownOption(other.to_string())),
                    }
                }
            } else if let Some(p) = comment.strip_prefix("CHECK-LABEL:") {
                directives.push(CheckDirective::CheckLabel(p.trim().to_string()));
            } else if let Some(p) = comment.strip_prefix("CHECK-NEXT:") {
                directives.push(CheckDirective::CheckNext(p.trim().to_string()));
            } else if let Some(p) = comment.strip_prefix("CHECK-NOT:") {
                directives.push(CheckDirective::CheckNot(p.trim().to_string()));
            } else if comment.starts_with("CHECK-EMPTY") {
                directives.push(CheckDirective::CheckEmpty);
            } else if let Some(p) = comment.strip_prefix("CHECK:") {
                directives.push(CheckDirective::Check(p.trim().to_string()));
            }
        }

        Ok(Self { options, directives, source: content.to_string() })
    }

    /// Compile every routine and render the listings.
    pub fn output(&self, registry: &HelperRegistry) -> Result<String, CheckError> {
        let graphs = parse_routines(&self.source)?;
        let mut arena = Bump::new();
        let mut out = String::new();
        for graph in &graphs {
            {
                let session = CompilationSession::new(&arena);
                match compile_routine(graph, registry, &self.options, &session) {
                    Ok(listing) => out.push_str(&listing.render(graph)),
                    Err(err) => {
                        out.push_str(&format!("error: {}\n", err));
                    }
                }
            }
            arena.reset();
        }
        Ok(out)
    }

    pub fn run(&self, registry: &HelperRegistry) -> Result<(), CheckError> {
        let output = self.output(registry)?;
        debug!("check output:\n{}", output);
        validate(&output, &self.directives)
    }
}

/// Match `directives` against `output` in order.
pub fn validate(output: &str, directives: &[CheckDirective]) -> Result<(), CheckError> {
    let lines: Vec<&str> = output.lines().collect();
    let mut next = 0;
    let mut forbidden: Vec<&str> = Vec::new();

    let check_forbidden = |forbidden: &mut Vec<&str>, from: usize, to: usize| {
        for (offset, line) in lines[from..to].iter().enumerate() {
            if let Some(pattern) = forbidden.iter().find(|p| line.contains(**p)) {
                return Err(CheckError::Forbidden { pattern: pattern.to_string(), line: from + offset + 1 });
            }
        }
        forbidden.clear();
        Ok(())
    };

    for directive in directives {
        match directive {
            CheckDirective::CheckNot(pattern) => forbidden.push(pattern),
            CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                let found = lines[next..]
                    .iter()
                    .position(|line| line.contains(pattern.as_str()))
                    .ok_or_else(|| CheckError::NotFound(pattern.clone()))?;
                check_forbidden(&mut forbidden, next, next + found)?;
                next += found + 1;
            }
            CheckDirective::CheckNext(pattern) => {
                let line = lines.get(next).copied().unwrap_or("");
                if !line.contains(pattern.as_str()) {
                    return Err(CheckError::NextMismatch { expected: pattern.clone(), found: line.to_string() });
                }
                check_forbidden(&mut forbidden, next, next)?;
                next += 1;
            }
            CheckDirective::CheckEmpty => {
                if let Some(line) = lines.get(next) {
                    if !line.trim().is_empty() {
                        return Err(CheckError::NotEmpty(line.to_string()));
                    }
                    next += 1;
                }
            }
        }
    }
    check_forbidden(&mut forbidden, next, lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        let content = "; RUN: --no-jump-tables %s\n\
                       ; CHECK-LABEL: routine f\n\
                       ; CHECK-NEXT: entry:\n\
                       ; CHECK-NOT: leave\n\
                       routine f() {\n\
                       entry:\n\
                       }\n";
        let test = FileTest::parse(content).unwrap();
        assert!(!test.options.emit_jump_tables);
        assert_eq!(test.directives.len(), 3);
        assert_eq!(test.directives[2], CheckDirective::CheckNot("leave".to_string()));
    }

    #[test]
    fn test_unknown_option() {
        let err = FileTest::parse("; RUN: --fast\n").unwrap_err();
        assert_eq!(err, CheckError::UnknownOption("--fast".to_string()));
    }

    #[test]
    fn test_check_matching() {
        let output = "routine f\nentry:\n  ret\n";
        let directives = vec![
            CheckDirective::CheckLabel("routine f".to_string()),
            CheckDirective::CheckNext("entry:".to_string()),
            CheckDirective::CheckNot("leave".to_string()),
            CheckDirective::Check("ret".to_string()),
        ];
        validate(output, &directives).unwrap();
    }

    #[test]
    fn test_check_not_between_matches() {
        let output = "a\nleave L0\nb\n";
        let directives = vec![
            CheckDirective::Check("a".to_string()),
            CheckDirective::CheckNot("leave".to_string()),
            CheckDirective::Check("b".to_string()),
        ];
        assert_eq!(
            validate(output, &directives),
            Err(CheckError::Forbidden { pattern: "leave".to_string(), line: 2 })
        );
    }

    #[test]
    fn test_check_next_failure() {
        let output = "Line 1\nLine 2\nLine 3\n";
        let directives = vec![
            CheckDirective::Check("Line 1".to_string()),
            CheckDirective::CheckNext("Line 3".to_string()),
        ];
        let err = validate(output, &directives).unwrap_err();
        assert!(err.to_string().contains("CHECK-NEXT"));
    }

    #[test]
    fn test_run_compiles_routines() {
        let content = "; CHECK-LABEL: routine f\n\
                       ; CHECK: entry:\n\
                       ; CHECK-NEXT: ldc.i8 1\n\
                       ; CHECK: ret\n\
                       routine f() {\n\
                       entry:\n\
                       \x20 return 1\n\
                       }\n";
        let test = FileTest::parse(content).unwrap();
        test.run(&HelperRegistry::new()).unwrap();
    }
}
