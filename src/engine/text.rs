//! Light-weight scanning of goal and program text.
//!
//! Parsing proper is the engine's job. These helpers only need to find clause
//! boundaries and the names written for top-level goal arguments, so they
//! track quotes, comments and bracket depth and nothing more.

use crate::syntax::ops::is_symbol_char;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Code,
    Quoted,
    Comment,
}

/// Classify every character of `text`
fn classify(text: &str) -> Vec<(char, Class)> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '%' => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push((chars[i], Class::Comment));
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = i;
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                let end = (i + 2).min(chars.len());
                out.extend(chars[start..end].iter().map(|&c| (c, Class::Comment)));
                i = end;
                continue;
            }
            '\'' if is_char_code_prefix(&chars, i) => {
                // 0'c character code
                out.push((c, Class::Quoted));
                i += 1;
                let width = match chars.get(i) {
                    Some('\\') => 2,
                    Some('\'') if chars.get(i + 1) == Some(&'\'') => 2,
                    Some(_) => 1,
                    None => 0,
                };
                for _ in 0..width {
                    let Some(&q) = chars.get(i) else { break };
                    out.push((q, Class::Quoted));
                    i += 1;
                }
                continue;
            }
            '\'' | '"' | '`' => {
                out.push((c, Class::Quoted));
                i += 1;
                while i < chars.len() {
                    let q = chars[i];
                    out.push((q, Class::Quoted));
                    i += 1;
                    if q == '\\' && i < chars.len() {
                        out.push((chars[i], Class::Quoted));
                        i += 1;
                    } else if q == c {
                        // A doubled quote stands for itself
                        if chars.get(i) == Some(&c) {
                            out.push((c, Class::Quoted));
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
                continue;
            }
            _ => out.push((c, Class::Code)),
        }
        i += 1;
    }
    out
}

fn is_char_code_prefix(chars: &[char], quote: usize) -> bool {
    quote >= 1
        && chars[quote - 1] == '0'
        && (quote < 2 || !(chars[quote - 2].is_alphanumeric() || chars[quote - 2] == '_'))
}

/// Split program text into clause texts, without their terminating `.`.
///
/// A clause ends at a `.` followed by layout, `%` or the end of input, unless
/// the `.` is part of a symbol atom such as `=..`. Comments are blanked out.
pub(crate) fn split_clauses(text: &str) -> Vec<String> {
    let classified = classify(text);
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut previous: Option<(char, Class)> = None;

    for (i, &(c, class)) in classified.iter().enumerate() {
        let at_end = class == Class::Code
            && c == '.'
            && !matches!(previous, Some((p, Class::Code)) if is_symbol_char(p))
            && classified
                .get(i + 1)
                .map_or(true, |&(next, _)| next.is_whitespace() || next == '%');
        if at_end {
            push_clause(&mut clauses, &mut current);
            previous = None;
            continue;
        }
        match class {
            Class::Comment => current.push(if c == '\n' { '\n' } else { ' ' }),
            _ => current.push(c),
        }
        if !c.is_whitespace() && class != Class::Comment {
            previous = Some((c, class));
        }
    }
    push_clause(&mut clauses, &mut current);
    clauses
}

fn push_clause(clauses: &mut Vec<String>, current: &mut String) {
    let clause = current.trim();
    if !clause.is_empty() {
        clauses.push(clause.to_string());
    }
    current.clear();
}

/// Whether `name` is written as a named variable (`X`, `_Acc`), not `_`
pub(crate) fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_uppercase() => {}
        Some('_') if name.len() > 1 => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_atom_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_lowercase() => chars.all(|c| c.is_alphanumeric() || c == '_'),
        Some('\'') => name.len() >= 2 && name.ends_with('\''),
        _ => false,
    }
}

/// Named variables written as top-level arguments of `Name(Arg, ...)` goal
/// text (optionally `Module:Name(...)`), with their argument index.
///
/// Variables nested inside arguments are not reported, and goals written
/// with operators report none. A repeated name keeps its first index.
pub(crate) fn goal_variables(text: &str) -> Vec<(String, usize)> {
    let classified = classify(text.trim());
    let mut significant: Vec<(char, Class)> = classified
        .into_iter()
        .filter(|(_, class)| *class != Class::Comment)
        .collect();
    while matches!(significant.last(), Some((c, Class::Code)) if c.is_whitespace() || *c == '.') {
        significant.pop();
    }

    let Some(open) = significant.iter().position(|&(c, class)| c == '(' && class == Class::Code) else {
        return Vec::new();
    };
    let head: String = significant[..open].iter().map(|(c, _)| c).collect();
    let name = match head.split_once(':') {
        Some((module, name)) if is_atom_name(module.trim()) => name,
        Some(_) => return Vec::new(),
        None => head.as_str(),
    };
    if !is_atom_name(name) || matches!(significant.last(), Some((c, _)) if *c != ')') {
        return Vec::new();
    }

    let mut args = vec![String::new()];
    let mut depth = 0usize;
    for (i, &(c, class)) in significant.iter().enumerate().skip(open + 1) {
        if class == Class::Code {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' if depth == 0 => {
                    // The call's closing parenthesis must end the goal
                    if i + 1 != significant.len() {
                        return Vec::new();
                    }
                    break;
                }
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    args.push(String::new());
                    continue;
                }
                _ => {}
            }
        }
        if let Some(arg) = args.last_mut() {
            arg.push(c);
        }
    }

    let mut variables: Vec<(String, usize)> = Vec::new();
    for (index, arg) in args.iter().enumerate() {
        let arg = arg.trim();
        if is_variable_name(arg) && !variables.iter().any(|(n, _)| n == arg) {
            variables.push((arg.to_string(), index));
        }
    }
    variables
}
