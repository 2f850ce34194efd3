//! Define lists and a small conditional-compilation pass over GLSL.
//!
//! Every stage is expanded here before it is scanned, hashed for the binary
//! cache or handed to the driver, so all three see the same text. Only what a
//! define list can affect is handled: object-like `#define`/`#undef`, the
//! `#if` family, and identifier substitution. Anything else (`#version`,
//! `#extension`, `#pragma`, function-like macros) passes through untouched.
//!
//! Lines removed by the pass are replaced with empty lines so driver
//! diagnostics keep pointing at the right line of the original source.

use rustc_hash::FxHashMap;
use tracing::warn;

/// Nesting limit for macro expansion.
const MAX_EXPANSION_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    #[error("line {line}: #{directive} without a matching #if")]
    Unbalanced { line: usize, directive: &'static str },
    #[error("line {line}: #else after #else")]
    DuplicateElse { line: usize },
    #[error("#if on line {line} is never closed")]
    Unterminated { line: usize },
    #[error("line {line}: cannot evaluate `{condition}`")]
    UnsupportedCondition { line: usize, condition: String },
}

/// An ordered list of `NAME=VALUE` macro definitions.
///
/// Parsed from strings such as `"SHADOWS;QUALITY=2,USE_FOG"`: entries are
/// separated by `;` or `,`, and a bare name is defined as `1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defines(Vec<(String, String)>);

impl Defines {
    pub fn parse(list: &str) -> Self {
        let entries = list
            .split([';', ','])
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((name, value)) => (name.trim().to_owned(), value.trim().to_owned()),
                None => (entry.to_owned(), "1".to_owned()),
            })
            .filter(|(name, _)| !name.is_empty())
            .collect();
        Self(entries)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted `NAME=VALUE` entries joined by `;`; equal for equivalent lists.
    pub fn normalized(&self) -> String {
        let mut macros: FxHashMap<&str, &str> = FxHashMap::default();
        for (name, value) in self.iter() {
            macros.insert(name, value);
        }
        let mut entries: Vec<String> = macros
            .into_iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        entries.sort();
        entries.join(";")
    }
}

struct Branch {
    /// Lines in this branch are emitted.
    active: bool,
    /// Some branch of this conditional has already been taken.
    taken: bool,
    else_passed: bool,
    parent_active: bool,
    line: usize,
}

/// Expand `source` under `defines`.
pub fn preprocess(source: &str, defines: &Defines) -> Result<String, PreprocessError> {
    let mut macros: FxHashMap<String, String> = defines
        .iter()
        .map(|(n, v)| (n.to_owned(), v.to_owned()))
        .collect();
    let stripped = strip_comments(source);
    let mut output = String::with_capacity(stripped.len());
    let mut stack: Vec<Branch> = Vec::new();

    for (index, line) in stripped.lines().enumerate() {
        let line_number = index + 1;
        let active = stack.last().map_or(true, |b| b.active);

        let Some(directive_line) = line.trim_start().strip_prefix('#') else {
            if active {
                output.push_str(&substitute(line, &macros, 0));
            }
            output.push('\n');
            continue;
        };

        let directive_line = directive_line.trim_start();
        let directive_len = directive_line
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(directive_line.len());
        let (directive, argument) = directive_line.split_at(directive_len);
        let argument = argument.trim();

        match directive {
            "ifdef" | "ifndef" => {
                let defined = macros.contains_key(first_word(argument));
                let taken = active && (defined == (directive == "ifdef"));
                stack.push(Branch {
                    active: taken,
                    taken,
                    else_passed: false,
                    parent_active: active,
                    line: line_number,
                });
            }
            "if" => {
                let taken = active && evaluate(argument, &macros, line_number)?;
                stack.push(Branch {
                    active: taken,
                    taken,
                    else_passed: false,
                    parent_active: active,
                    line: line_number,
                });
            }
            "elif" => {
                let branch = stack.last_mut().ok_or(PreprocessError::Unbalanced {
                    line: line_number,
                    directive: "elif",
                })?;
                if branch.taken || !branch.parent_active {
                    branch.active = false;
                } else {
                    branch.active = evaluate(argument, &macros, line_number)?;
                    branch.taken = branch.active;
                }
            }
            "else" => {
                let branch = stack.last_mut().ok_or(PreprocessError::Unbalanced {
                    line: line_number,
                    directive: "else",
                })?;
                if branch.else_passed {
                    return Err(PreprocessError::DuplicateElse { line: line_number });
                }
                branch.else_passed = true;
                branch.active = branch.parent_active && !branch.taken;
                branch.taken = true;
            }
            "endif" => {
                stack.pop().ok_or(PreprocessError::Unbalanced {
                    line: line_number,
                    directive: "endif",
                })?;
            }
            "define" if active => {
                let name_len = argument
                    .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .unwrap_or(argument.len());
                let (name, value) = argument.split_at(name_len);
                if value.starts_with('(') {
                    // Function-like; left for the driver's own preprocessor.
                    output.push_str(line);
                } else if !name.is_empty() {
                    macros.insert(name.to_owned(), value.trim().to_owned());
                }
            }
            "undef" if active => {
                macros.remove(first_word(argument));
            }
            _ if active => output.push_str(line),
            _ => {}
        }
        output.push('\n');
    }

    match stack.last() {
        Some(open) => Err(PreprocessError::Unterminated { line: open.line }),
        None => Ok(output),
    }
}

/// Collapse whitespace and drop blank lines.
///
/// Sources that differ only in layout normalize to the same string.
pub fn normalize(source: &str) -> String {
    source
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove `//` and `/* */` comments, keeping line breaks.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

fn first_word(text: &str) -> &str {
    text.split_whitespace().next().unwrap_or_default()
}

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn substitute(text: &str, macros: &FxHashMap<String, String>, depth: usize) -> String {
    if macros.is_empty() {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(is_ident_char) {
        out.push_str(&rest[..start]);
        let token = &rest[start..];
        let len = token.find(|c: char| !is_ident_char(c)).unwrap_or(token.len());
        let (word, tail) = token.split_at(len);
        let is_identifier = word.starts_with(|c: char| !c.is_ascii_digit());
        match macros.get(word) {
            Some(value) if is_identifier && depth < MAX_EXPANSION_DEPTH => {
                out.push_str(&substitute(value, macros, depth + 1));
            }
            Some(_) if is_identifier => {
                warn!(name = word, "macro expansion too deep, leaving unexpanded");
                out.push_str(word);
            }
            _ => out.push_str(word),
        }
        rest = tail;
    }
    out.push_str(rest);
    out
}

/// Evaluate an `#if`/`#elif` condition.
///
/// Terms are `defined(X)`, `defined X`, integer literals and macro names
/// (undefined names are `0`), optionally negated with `!` and chained with
/// `&&`/`||` evaluated left to right.
fn evaluate(condition: &str, macros: &FxHashMap<String, String>, line: usize) -> Result<bool, PreprocessError> {
    let unsupported = || PreprocessError::UnsupportedCondition {
        line,
        condition: condition.to_owned(),
    };

    let mut result: Option<bool> = None;
    let mut pending_or = false;
    let mut rest = condition.trim();
    loop {
        let (term, next, op) = match (rest.find("&&"), rest.find("||")) {
            (Some(a), Some(o)) if a < o => (&rest[..a], &rest[a + 2..], Some(false)),
            (_, Some(o)) => (&rest[..o], &rest[o + 2..], Some(true)),
            (Some(a), None) => (&rest[..a], &rest[a + 2..], Some(false)),
            (None, None) => (rest, "", None),
        };
        let value = evaluate_term(term.trim(), macros).ok_or_else(unsupported)?;
        result = Some(match result {
            None => value,
            Some(acc) if pending_or => acc || value,
            Some(acc) => acc && value,
        });
        match op {
            Some(or) => {
                pending_or = or;
                rest = next.trim();
            }
            None => break,
        }
    }
    result.ok_or_else(unsupported)
}

fn evaluate_term(term: &str, macros: &FxHashMap<String, String>) -> Option<bool> {
    if let Some(inner) = term.strip_prefix('!') {
        return evaluate_term(inner.trim(), macros).map(|v| !v);
    }
    if let Some(inner) = term.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return evaluate_term(inner.trim(), macros);
    }
    if let Some(name) = term.strip_prefix("defined") {
        let name = name.trim().trim_start_matches('(').trim_end_matches(')').trim();
        return (!name.is_empty()).then(|| macros.contains_key(name));
    }
    if let Ok(value) = term.parse::<i64>() {
        return Some(value != 0);
    }
    if !term.is_empty() && term.chars().all(is_ident_char) {
        return match macros.get(term) {
            Some(value) => value.trim().parse::<i64>().ok().map(|v| v != 0),
            None => Some(false),
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn run(source: &str, defines: &str) -> String {
        normalize(&preprocess(source, &Defines::parse(defines)).unwrap())
    }

    #[test]
    fn define_lists_accept_both_separators() {
        let defines = Defines::parse("SHADOWS; QUALITY=2,,FOG ");
        assert_eq!(defines.get("SHADOWS"), Some("1"));
        assert_eq!(defines.get("QUALITY"), Some("2"));
        assert_eq!(defines.get("FOG"), Some("1"));
        assert_eq!(defines.normalized(), "FOG=1;QUALITY=2;SHADOWS=1");
        assert_eq!(
            Defines::parse("FOG,QUALITY=2;SHADOWS").normalized(),
            defines.normalized()
        );
    }

    #[test]
    fn conditionals_follow_defines() {
        let source = "#version 330\n\
                      #ifdef SHADOWS\n\
                      float shadow = 1.0;\n\
                      #else\n\
                      float shadow = 0.0;\n\
                      #endif\n\
                      #if QUALITY && !defined(LOW)\n\
                      int taps = QUALITY;\n\
                      #elif 1\n\
                      int taps = 1;\n\
                      #endif\n";
        assert_eq!(
            run(source, "SHADOWS;QUALITY=4"),
            "#version 330\nfloat shadow = 1.0;\nint taps = 4;"
        );
        assert_eq!(run(source, ""), "#version 330\nfloat shadow = 0.0;\nint taps = 1;");
    }

    #[test]
    fn substitution_respects_identifier_boundaries() {
        let source = "#define N 4\n#define SIZE (N * 2)\nfloat values[SIZE];\nint N2 = N;\n";
        assert_eq!(run(source, ""), "float values[(4 * 2)];\nint N2 = 4;");
    }

    #[test]
    fn undef_and_comments_are_removed() {
        let source = "#define A 1\n/* A\n */ int x = A; // A\n#undef A\nint y = A;\n";
        let expanded = preprocess(source, &Defines::default()).unwrap();
        assert_eq!(expanded.lines().count(), 5);
        assert_eq!(normalize(&expanded), "int x = 1;\nint y = A;");
    }

    #[test]
    fn unbalanced_directives_are_errors() {
        let defines = Defines::default();
        assert_eq!(
            preprocess("#endif\n", &defines),
            Err(PreprocessError::Unbalanced { line: 1, directive: "endif" })
        );
        assert_eq!(
            preprocess("\n#ifdef A\nint x;\n", &defines),
            Err(PreprocessError::Unterminated { line: 2 })
        );
        assert_eq!(
            preprocess("#if 1\n#else\n#else\n#endif\n", &defines),
            Err(PreprocessError::DuplicateElse { line: 3 })
        );
    }

    #[test]
    fn inactive_branches_skip_evaluation() {
        let source = "#if 0\n#if A + B > 2\nint x;\n#endif\n#endif\nint y;\n";
        assert_eq!(run(source, ""), "int y;");
        assert!(matches!(
            preprocess("#if A + B > 2\n#endif\n", &Defines::default()),
            Err(PreprocessError::UnsupportedCondition { line: 1, .. })
        ));
    }
}
