//! Canonical writer for [`OwnedTerm`].

use super::ops::{self, is_symbol_char};
use super::{OwnedTerm, LIST_FUNCTOR, NIL};

/// How a compound is laid out once its arguments are rendered
enum Layout<'t> {
    List { items: usize, tail: bool },
    Curly,
    Infix { name: &'t str, priority: u16 },
    Prefix { name: &'t str, priority: u16, operand_is_op: bool },
    Canonical { name: &'t str, arity: usize },
}

enum Task<'t> {
    Visit(&'t OwnedTerm, u16),
    Finish(Layout<'t>, u16),
}

// Post-order walk: arguments are rendered onto `done` before their parent
pub(super) fn write_term(out: &mut String, term: &OwnedTerm, max: u16) {
    let mut tasks = vec![Task::Visit(term, max)];
    let mut done: Vec<String> = Vec::new();
    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit(term, max) => visit(term, max, &mut tasks, &mut done),
            Task::Finish(layout, max) => {
                let text = finish(layout, max, &mut done);
                done.push(text);
            }
        }
    }
    for text in done {
        out.push_str(&text);
    }
}

fn visit<'t>(term: &'t OwnedTerm, max: u16, tasks: &mut Vec<Task<'t>>, done: &mut Vec<String>) {
    let (name, args) = match term {
        OwnedTerm::Variable(n) => return done.push(format!("_G{}", n)),
        OwnedTerm::Atom(name) => return done.push(quote_atom(name)),
        OwnedTerm::Integer(i) => return done.push(i.to_string()),
        OwnedTerm::Float(f) => return done.push(format_float(*f)),
        OwnedTerm::String(s) => {
            let mut text = String::new();
            write_string(&mut text, s);
            return done.push(text);
        }
        OwnedTerm::Compound { name, args } => (name.as_str(), args.as_slice()),
    };

    if name == LIST_FUNCTOR && args.len() == 2 {
        let mut items = vec![&args[0]];
        let mut cursor = &args[1];
        while let OwnedTerm::Compound { name, args } = cursor {
            if name != LIST_FUNCTOR || args.len() != 2 {
                break;
            }
            items.push(&args[0]);
            cursor = &args[1];
        }
        let tail = !cursor.is_nil();
        tasks.push(Task::Finish(Layout::List { items: items.len(), tail }, max));
        if tail {
            tasks.push(Task::Visit(cursor, 999));
        }
        tasks.extend(items.into_iter().rev().map(|item| Task::Visit(item, 999)));
        return;
    }

    if name == "{}" && args.len() == 1 {
        tasks.push(Task::Finish(Layout::Curly, max));
        tasks.push(Task::Visit(&args[0], 1200));
        return;
    }

    if args.len() == 2 {
        if let Some(op) = ops::infix(name) {
            tasks.push(Task::Finish(Layout::Infix { name, priority: op.priority }, max));
            tasks.push(Task::Visit(&args[1], op.right_max()));
            tasks.push(Task::Visit(&args[0], op.left_max()));
            return;
        }
    }

    if args.len() == 1 {
        let numeric_sign = matches!(name, "-" | "+")
            && matches!(args[0], OwnedTerm::Integer(_) | OwnedTerm::Float(_));
        if let (Some(op), false) = (ops::prefix(name), numeric_sign) {
            let operand_is_op = matches!(&args[0], OwnedTerm::Atom(a) if ops::infix(a).is_some() || ops::prefix(a).is_some());
            tasks.push(Task::Finish(Layout::Prefix { name, priority: op.priority, operand_is_op }, max));
            tasks.push(Task::Visit(&args[0], op.right_max()));
            return;
        }
    }

    tasks.push(Task::Finish(Layout::Canonical { name, arity: args.len() }, max));
    tasks.extend(args.iter().rev().map(|arg| Task::Visit(arg, 999)));
}

fn finish(layout: Layout<'_>, max: u16, done: &mut Vec<String>) -> String {
    let take = |done: &mut Vec<String>, n: usize| done.split_off(done.len().saturating_sub(n));
    let mut out = String::new();
    match layout {
        Layout::List { items, tail } => {
            let parts = take(done, items + usize::from(tail));
            out.push('[');
            for (i, part) in parts.iter().enumerate() {
                if i == items {
                    out.push('|');
                } else if i > 0 {
                    out.push(',');
                }
                out.push_str(part);
            }
            out.push(']');
        }
        Layout::Curly => {
            out.push('{');
            out.push_str(&take(done, 1).concat());
            out.push('}');
        }
        Layout::Infix { name, priority } => {
            let mut parts = take(done, 2).into_iter();
            let left = parts.next().unwrap_or_default();
            let right = parts.next().unwrap_or_default();
            let open = priority > max;
            if open {
                out.push('(');
            }
            out.push_str(&left);
            if name == "," {
                out.push(',');
            } else if is_alphanumeric_op(name) {
                out.push(' ');
                out.push_str(name);
                out.push(' ');
            } else {
                if left.ends_with(is_symbol_char) {
                    out.push(' ');
                }
                out.push_str(name);
                if right.starts_with(is_symbol_char) {
                    out.push(' ');
                }
            }
            out.push_str(&right);
            if open {
                out.push(')');
            }
        }
        Layout::Prefix { name, priority, operand_is_op } => {
            let operand = take(done, 1).concat();
            let open = priority > max;
            if open {
                out.push('(');
            }
            out.push_str(name);
            if is_alphanumeric_op(name) || operand.starts_with(is_symbol_char) || operand_is_op {
                out.push(' ');
            }
            out.push_str(&operand);
            if open {
                out.push(')');
            }
        }
        Layout::Canonical { name, arity } => {
            out.push_str(&quote_atom(name));
            out.push('(');
            out.push_str(&take(done, arity).join(","));
            out.push(')');
        }
    }
    out
}

fn write_string(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn is_alphanumeric_op(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_alphabetic())
}

/// Quote an atom if it cannot be read back unquoted
pub fn quote_atom(name: &str) -> String {
    if !needs_quotes(name) {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len() + 2);
    out.push('\'');
    for c in name.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn needs_quotes(name: &str) -> bool {
    if matches!(name, NIL | "!" | ";" | "{}") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_lowercase() => !chars.all(|c| c.is_alphanumeric() || c == '_'),
        Some(c) if is_symbol_char(c) => !chars.all(is_symbol_char),
        Some(_) => true,
    }
}

/// Format a float so that it reads back as a float
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "1.5NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "1.0Inf" } else { "-1.0Inf" }.to_string();
    }
    let text = format!("{:?}", value);
    if text.contains('.') {
        return text;
    }
    match text.find('e') {
        Some(pos) => format!("{}.0{}", &text[..pos], &text[pos..]),
        None => format!("{}.0", text),
    }
}
