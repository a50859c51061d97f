//! Term reader: tokenizer plus an operator-precedence parser over the
//! standard operator table.

use crate::syntax::ops;
use crate::syntax::{OwnedTerm, NIL};

/// A term read from text, with the names of its named variables
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReadTerm {
    pub term: OwnedTerm,
    pub variables: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntaxError {
    pub message: String,
    pub position: usize,
}

impl SyntaxError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }

    /// `error(syntax_error(Message), string(Text, Position))`
    pub fn to_term(&self, text: &str) -> OwnedTerm {
        OwnedTerm::compound(
            "error",
            vec![
                OwnedTerm::compound("syntax_error", vec![OwnedTerm::atom(self.message.clone())]),
                OwnedTerm::compound(
                    "string",
                    vec![OwnedTerm::string(text), OwnedTerm::Integer(self.position as i64)],
                ),
            ],
        )
    }
}

/// Read a single term; a terminating `.` is optional
pub(crate) fn read_term(text: &str) -> Result<ReadTerm, SyntaxError> {
    let mut parser = Parser::new(text)?;
    if parser.at_eof() {
        return Err(SyntaxError::new("end_of_file", text.len()));
    }
    let term = parser.read_clause(true)?;
    if !parser.at_eof() {
        return Err(SyntaxError::new("end_of_clause_expected", parser.position()));
    }
    Ok(term)
}

/// Read every `.`-terminated clause in `text`
pub(crate) fn read_program(text: &str) -> Result<Vec<ReadTerm>, SyntaxError> {
    let mut parser = Parser::new(text)?;
    let mut clauses = Vec::new();
    while !parser.at_eof() {
        clauses.push(parser.read_clause(false)?);
    }
    Ok(clauses)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Atom(String),
    /// A quoted atom never acts as an operator
    QuotedAtom(String),
    Var(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(&'static str),
    End,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    /// Whitespace or a comment precedes the token
    layout_before: bool,
    pos: usize,
}

fn tokenize(text: &str) -> Result<Vec<Token>, SyntaxError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let offset = |i: usize| chars.get(i).map_or(text.len(), |&(p, _)| p);

    let mut tokens = Vec::new();
    let mut i = 0;
    let mut layout = false;

    while let Some(c) = at(i) {
        let start = offset(i);

        if c.is_whitespace() {
            layout = true;
            i += 1;
            continue;
        }
        if c == '%' {
            while at(i).is_some_and(|c| c != '\n') {
                i += 1;
            }
            layout = true;
            continue;
        }
        if c == '/' && at(i + 1) == Some('*') {
            i += 2;
            while at(i).is_some() && !(at(i) == Some('*') && at(i + 1) == Some('/')) {
                i += 1;
            }
            if at(i).is_none() {
                return Err(SyntaxError::new("unterminated_block_comment", start));
            }
            i += 2;
            layout = true;
            continue;
        }

        let tok = if c.is_ascii_digit() {
            let (tok, next) = read_number(&chars, i, start)?;
            i = next;
            tok
        } else if c == '_' || c.is_uppercase() {
            let begin = i;
            while at(i).is_some_and(|c| c.is_alphanumeric() || c == '_') {
                i += 1;
            }
            Tok::Var(chars[begin..i].iter().map(|&(_, c)| c).collect())
        } else if c.is_alphabetic() {
            let begin = i;
            while at(i).is_some_and(|c| c.is_alphanumeric() || c == '_') {
                i += 1;
            }
            Tok::Atom(chars[begin..i].iter().map(|&(_, c)| c).collect())
        } else if c == '\'' || c == '"' {
            let (body, next) = read_quoted(&chars, i, start)?;
            i = next;
            if c == '\'' {
                Tok::QuotedAtom(body)
            } else {
                Tok::Str(body)
            }
        } else if let Some(p) = punct(c) {
            i += 1;
            Tok::Punct(p)
        } else if c == '!' || c == ';' {
            i += 1;
            Tok::Atom(c.to_string())
        } else if ops::is_symbol_char(c) {
            let begin = i;
            while at(i).is_some_and(ops::is_symbol_char) {
                i += 1;
            }
            let symbol: String = chars[begin..i].iter().map(|&(_, c)| c).collect();
            let ends_clause = symbol == "." && at(i).map_or(true, |c| c.is_whitespace() || c == '%');
            if ends_clause {
                Tok::End
            } else {
                Tok::Atom(symbol)
            }
        } else {
            return Err(SyntaxError::new("illegal_character", start));
        };

        tokens.push(Token {
            tok,
            layout_before: layout,
            pos: start,
        });
        layout = false;
    }
    Ok(tokens)
}

fn punct(c: char) -> Option<&'static str> {
    Some(match c {
        '(' => "(",
        ')' => ")",
        '[' => "[",
        ']' => "]",
        '{' => "{",
        '}' => "}",
        ',' => ",",
        '|' => "|",
        _ => return None,
    })
}

fn read_number(chars: &[(usize, char)], mut i: usize, start: usize) -> Result<(Tok, usize), SyntaxError> {
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);

    // 0'c character code
    if at(i) == Some('0') && at(i + 1) == Some('\'') {
        if let Some(c) = at(i + 2) {
            return Ok((Tok::Int(c as i64), i + 3));
        }
    }

    let begin = i;
    while at(i).is_some_and(|c| c.is_ascii_digit() || c == '_') {
        i += 1;
    }
    let mut is_float = false;
    if at(i) == Some('.') && at(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        is_float = true;
        i += 1;
        while at(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
    }
    if matches!(at(i), Some('e') | Some('E')) {
        let sign = usize::from(matches!(at(i + 1), Some('+') | Some('-')));
        if at(i + 1 + sign).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            i += 1 + sign;
            while at(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
        }
    }

    let literal: String = chars[begin..i]
        .iter()
        .map(|&(_, c)| c)
        .filter(|&c| c != '_')
        .collect();
    let tok = if is_float {
        literal
            .parse::<f64>()
            .map(Tok::Float)
            .map_err(|_| SyntaxError::new("illegal_number", start))?
    } else {
        literal
            .parse::<i64>()
            .map(Tok::Int)
            .map_err(|_| SyntaxError::new("illegal_number", start))?
    };
    Ok((tok, i))
}

fn read_quoted(chars: &[(usize, char)], mut i: usize, start: usize) -> Result<(String, usize), SyntaxError> {
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let quote = chars[i].1;
    i += 1;
    let mut body = String::new();
    loop {
        match at(i) {
            None => return Err(SyntaxError::new("unterminated_quoted", start)),
            Some(c) if c == quote => {
                if at(i + 1) == Some(quote) {
                    body.push(quote);
                    i += 2;
                } else {
                    return Ok((body, i + 1));
                }
            }
            Some('\\') => {
                let escaped = match at(i + 1) {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('\\') => '\\',
                    Some('\'') => '\'',
                    Some('"') => '"',
                    Some('`') => '`',
                    Some('\n') => {
                        i += 2;
                        continue;
                    }
                    _ => return Err(SyntaxError::new("undefined_char_escape", offset_of(chars, i))),
                };
                body.push(escaped);
                i += 2;
            }
            Some(c) => {
                body.push(c);
                i += 1;
            }
        }
    }
}

fn offset_of(chars: &[(usize, char)], i: usize) -> usize {
    chars.get(i).map_or(0, |&(p, _)| p)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end_offset: usize,
    variables: Vec<(String, usize)>,
    next_var: usize,
}

impl Parser {
    fn new(text: &str) -> Result<Self, SyntaxError> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
            end_offset: text.len(),
            variables: Vec::new(),
            next_var: 0,
        })
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end_offset, |t| t.pos)
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.tok.clone());
        self.pos += 1;
        tok
    }

    fn expect(&mut self, punct: &'static str) -> Result<(), SyntaxError> {
        match self.peek() {
            Some(Tok::Punct(p)) if *p == punct => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(SyntaxError::new(format!("expected `{}`", punct), self.position())),
        }
    }

    fn read_clause(&mut self, end_optional: bool) -> Result<ReadTerm, SyntaxError> {
        self.variables.clear();
        self.next_var = 0;
        let (term, _) = self.parse(1200)?;
        match self.peek() {
            Some(Tok::End) => {
                self.pos += 1;
            }
            None if end_optional => {}
            _ => return Err(SyntaxError::new("operator_expected", self.position())),
        }
        Ok(ReadTerm {
            term,
            variables: std::mem::take(&mut self.variables),
        })
    }

    fn variable(&mut self, name: String) -> OwnedTerm {
        if name == "_" {
            self.next_var += 1;
            return OwnedTerm::Variable(self.next_var - 1);
        }
        if let Some((_, index)) = self.variables.iter().find(|(n, _)| *n == name) {
            return OwnedTerm::Variable(*index);
        }
        let index = self.next_var;
        self.next_var += 1;
        self.variables.push((name, index));
        OwnedTerm::Variable(index)
    }

    fn parse(&mut self, max: u16) -> Result<(OwnedTerm, u16), SyntaxError> {
        let (left, priority) = self.parse_primary(max)?;
        self.parse_infix(left, priority, max)
    }

    fn parse_infix(&mut self, mut left: OwnedTerm, mut left_priority: u16, max: u16) -> Result<(OwnedTerm, u16), SyntaxError> {
        loop {
            let name = match self.peek() {
                Some(Tok::Atom(name)) => name.clone(),
                Some(Tok::Punct(",")) => ",".to_string(),
                Some(Tok::Punct("|")) => ";".to_string(),
                _ => break,
            };
            let Some(op) = ops::infix(&name) else { break };
            if op.priority > max || left_priority > op.left_max() {
                break;
            }
            self.pos += 1;
            let (right, _) = self.parse(op.right_max())?;
            left = OwnedTerm::compound(name, vec![left, right]);
            left_priority = op.priority;
        }
        Ok((left, left_priority))
    }

    /// True when the next token can begin an operand
    fn starts_term(&self) -> bool {
        match self.peek() {
            Some(Tok::Atom(name)) => ops::infix(name).is_none() || ops::prefix(name).is_some(),
            Some(Tok::Punct(p)) => matches!(*p, "(" | "[" | "{"),
            Some(Tok::End) | None => false,
            Some(_) => true,
        }
    }

    fn parse_primary(&mut self, max: u16) -> Result<(OwnedTerm, u16), SyntaxError> {
        let position = self.position();
        let Some(tok) = self.advance() else {
            return Err(SyntaxError::new("unexpected_end_of_file", position));
        };
        match tok {
            Tok::Int(i) => Ok((OwnedTerm::Integer(i), 0)),
            Tok::Float(f) => Ok((OwnedTerm::Float(f), 0)),
            Tok::Str(s) => Ok((OwnedTerm::String(s), 0)),
            Tok::Var(name) => Ok((self.variable(name), 0)),
            Tok::Punct("(") => {
                let (term, _) = self.parse(1200)?;
                self.expect(")")?;
                Ok((term, 0))
            }
            Tok::Punct("[") => {
                if matches!(self.peek(), Some(Tok::Punct("]"))) {
                    self.pos += 1;
                    return self.atom_or_compound(NIL.to_string());
                }
                let mut items = vec![self.parse(999)?.0];
                let mut tail = OwnedTerm::nil();
                loop {
                    match self.advance() {
                        Some(Tok::Punct(",")) => items.push(self.parse(999)?.0),
                        Some(Tok::Punct("|")) => {
                            tail = self.parse(999)?.0;
                            self.expect("]")?;
                            break;
                        }
                        Some(Tok::Punct("]")) => break,
                        _ => return Err(SyntaxError::new("expected `,` `|` or `]`", position)),
                    }
                }
                Ok((OwnedTerm::partial_list(items, tail), 0))
            }
            Tok::Punct("{") => {
                if matches!(self.peek(), Some(Tok::Punct("}"))) {
                    self.pos += 1;
                    return self.atom_or_compound("{}".to_string());
                }
                let (term, _) = self.parse(1200)?;
                self.expect("}")?;
                Ok((OwnedTerm::compound("{}", vec![term]), 0))
            }
            Tok::QuotedAtom(name) => self.atom_or_compound(name),
            Tok::Atom(name) => self.atom_or_operator(name, max),
            Tok::Punct(p) => Err(SyntaxError::new(format!("unexpected `{}`", p), position)),
            Tok::End => Err(SyntaxError::new("unexpected_end_of_clause", position)),
        }
    }

    fn functional_open(&self) -> bool {
        matches!(self.peek_at(0), Some(Token { tok: Tok::Punct("("), layout_before: false, .. }))
    }

    fn atom_or_compound(&mut self, name: String) -> Result<(OwnedTerm, u16), SyntaxError> {
        if !self.functional_open() {
            return Ok((OwnedTerm::Atom(name), 0));
        }
        self.pos += 1;
        let mut args = vec![self.parse(999)?.0];
        loop {
            match self.advance() {
                Some(Tok::Punct(",")) => args.push(self.parse(999)?.0),
                Some(Tok::Punct(")")) => break,
                _ => return Err(SyntaxError::new("expected `,` or `)`", self.position())),
            }
        }
        Ok((OwnedTerm::Compound { name, args }, 0))
    }

    fn atom_or_operator(&mut self, name: String, max: u16) -> Result<(OwnedTerm, u16), SyntaxError> {
        if self.functional_open() {
            return self.atom_or_compound(name);
        }

        // negative numeric literal
        if name == "-" {
            if let Some(Token { tok, layout_before: false, .. }) = self.peek_at(0) {
                let negated = match tok {
                    Tok::Int(i) => Some(OwnedTerm::Integer(-i)),
                    Tok::Float(f) => Some(OwnedTerm::Float(-f)),
                    _ => None,
                };
                if let Some(number) = negated {
                    self.pos += 1;
                    return Ok((number, 0));
                }
            }
        }

        if let Some(op) = ops::prefix(&name) {
            if self.starts_term() {
                let (priority, arg_max) = if op.priority > max {
                    (999, 999.min(op.right_max()))
                } else {
                    (op.priority, op.right_max())
                };
                let (arg, _) = self.parse(arg_max)?;
                return Ok((OwnedTerm::compound(name, vec![arg]), priority));
            }
        }

        let priority = match (ops::infix(&name), ops::prefix(&name)) {
            (None, None) => 0,
            _ if max >= 1201 => 1201,
            _ => 0,
        };
        Ok((OwnedTerm::Atom(name), priority))
    }
}

/// Split `head :- body` into its parts; facts get the body `true`
pub(crate) fn clause_parts(term: &OwnedTerm) -> (&OwnedTerm, Option<&OwnedTerm>) {
    match term {
        OwnedTerm::Compound { name, args } if name == ":-" && args.len() == 2 => (&args[0], Some(&args[1])),
        other => (other, None),
    }
}
