//! External C preprocessor invocation and line-marker tracking.

use std::process::Command;

use crate::error::CompilationError;

/// Run `cpp` over the source file and capture the preprocessed text.
pub fn preprocess(filename: &str, cpp_args: &[String]) -> Result<String, CompilationError> {
    let output = Command::new("cpp")
        .args(cpp_args)
        .arg(filename)
        .output()
        .map_err(|err| {
            CompilationError::new(format!("failed to run the C preprocessor: {}", err))
        })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompilationError::new(format!(
            "the C preprocessor failed:\n{}",
            stderr.trim_end()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Maps line numbers of the preprocessed text back to the original file
/// names and lines recorded in `# N "file"` markers.
pub struct LineMap {
    entries: Vec<(String, usize)>,
    fallback: String,
}

impl LineMap {
    /// Identity map for sources that skip preprocessing.
    pub fn identity(filename: &str) -> LineMap {
        LineMap {
            entries: Vec::new(),
            fallback: filename.to_string(),
        }
    }

    pub fn from_preprocessed(text: &str, filename: &str) -> LineMap {
        let mut entries = Vec::new();
        let mut current_file = filename.to_string();
        let mut current_line = 1usize;
        for line in text.lines() {
            entries.push((current_file.clone(), current_line));
            match parse_line_marker(line) {
                Some((line_no, file)) => {
                    current_line = line_no;
                    if let Some(file) = file {
                        current_file = file;
                    }
                }
                None => current_line += 1,
            }
        }
        LineMap {
            entries,
            fallback: filename.to_string(),
        }
    }

    /// Resolve a 1-based line of the parsed text to `(file, line)`.
    pub fn resolve(&self, line: usize) -> (&str, usize) {
        match self.entries.get(line.wrapping_sub(1)) {
            Some((file, original)) => (file, *original),
            None => (&self.fallback, line),
        }
    }

    pub fn format_coord(&self, line: usize, column: usize) -> String {
        let (file, original) = self.resolve(line);
        format!("{}:{}:{}", file, original, column)
    }
}

// `# 123 "file.c" 1 2` or `#line 123 "file.c"`.
fn parse_line_marker(line: &str) -> Option<(usize, Option<String>)> {
    let rest = line.strip_prefix('#')?;
    let rest = rest.trim_start_matches("line");
    let mut tokens = rest.split_whitespace();
    let line_no: usize = tokens.next()?.parse().ok()?;
    let file = tokens
        .next()
        .filter(|t| t.starts_with('"'))
        .map(|t| t.trim_matches('"').to_string());
    Some((line_no, file))
}
