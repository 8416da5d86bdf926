//! Wire syntax: recognizer patterns, command formatting, and variable scanning.

use std::sync::LazyLock;

use horn_clause::Clause;
use regex::bytes::Regex;

/// The engine's ready marker.
pub const PROMPT_PATTERN: &str = "[?][-][ ]";

/// An engine-reported error line.
pub const ERROR_PATTERN: &str = "ERROR.*";

/// An answer the engine printed and is now waiting on: a binding or a bare
/// `true` followed by a single space at the very end of the output.
pub const PENDING_PATTERN: &str = r"(?:\w+ = .*?|true) $";

/// Request the next solution.
pub const CONTINUE: &str = ";";

/// Stop backtracking and return to the prompt.
pub const STOP: &str = ".";

/// Terminate the engine.
pub const HALT: &str = "halt(0).";

/// Sent once at startup: print answers quoted and without depth elision.
pub const ANSWER_OPTIONS: &str =
    "set_prolog_flag(answer_write_options, [quoted(true), max_depth(0), spacing(next_argument)]).";

pub(crate) static PROMPT: LazyLock<Regex> = LazyLock::new(|| Regex::new(PROMPT_PATTERN).unwrap());
pub(crate) static ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(ERROR_PATTERN).unwrap());
pub(crate) static PENDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PENDING_PATTERN).unwrap());

/// Append the clause terminator when the text lacks one.
pub fn terminate(text: &str) -> String {
    let text = text.trim();
    if text.ends_with('.') {
        text.to_string()
    } else {
        format!("{}.", text)
    }
}

/// Strip one trailing clause terminator, if present.
pub fn strip_terminator(text: &str) -> &str {
    let text = text.trim();
    text.strip_suffix('.').unwrap_or(text).trim_end()
}

/// `assert((<clause>)).`
pub fn assert_command(clause: &Clause) -> String {
    format!("assert(({})).", clause.without_terminator().trim_end())
}

/// `['<path>'].`
pub fn consult_command(path: &str) -> String {
    format!("['{}'].", path.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `bagof(<Vars>, <Goal>, <Result>).`
///
/// A single variable is collected bare; several are collected as a list so
/// each solution comes back as one tuple.
pub fn aggregate_command(variables: &[String], goal: &str, result: &str) -> String {
    let template = match variables {
        [single] => single.clone(),
        many => format!("[{}]", many.join(",")),
    };
    format!("bagof({}, {}, {}).", template, strip_terminator(goal), result)
}

/// A result variable name for the aggregate form that does not clash with any
/// variable of the goal.
pub fn aggregate_result_variable(variables: &[String]) -> String {
    let mut name = String::from("L");
    while variables.contains(&name) {
        name.push('_');
    }
    name
}

/// Named free variables of a goal, in order of first appearance.
///
/// Quoted text is skipped, and `_`-prefixed variables are anonymous so they
/// are never reported.
pub fn free_variables(goal: &str) -> Vec<String> {
    let chars: Vec<char> = goal.chars().collect();
    let mut variables: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' || c == '`' {
            i = skip_quoted(&chars, i);
            continue;
        }

        let starts_word = i == 0 || !is_word_char(chars[i - 1]);
        if starts_word && (c.is_ascii_uppercase() || c == '_') {
            let start = i;
            while i < chars.len() && is_word_char(chars[i]) {
                i += 1;
            }
            if c != '_' {
                let name: String = chars[start..i].iter().collect();
                if !variables.contains(&name) {
                    variables.push(name);
                }
            }
            continue;
        }

        i += 1;
    }

    variables
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Index just past the quoted run starting at `start`.
fn skip_quoted(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => {
                // Doubled quote is an escaped quote.
                if chars.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    chars.len()
}
