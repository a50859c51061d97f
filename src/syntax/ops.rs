//! Standard operator table shared by the reader and the writer.

/// Operator associativity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Xfx,
    Xfy,
    Yfx,
    Fy,
    Fx,
}

/// A single operator definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpDef {
    pub priority: u16,
    pub kind: OpType,
}

impl OpDef {
    const fn new(priority: u16, kind: OpType) -> Self {
        Self { priority, kind }
    }

    /// Maximum priority of the left argument of an infix operator
    pub fn left_max(&self) -> u16 {
        match self.kind {
            OpType::Yfx => self.priority,
            _ => self.priority - 1,
        }
    }

    /// Maximum priority of the right (or only) argument
    pub fn right_max(&self) -> u16 {
        match self.kind {
            OpType::Xfy | OpType::Fy => self.priority,
            _ => self.priority - 1,
        }
    }
}

/// Infix operator definition for `name`
pub fn infix(name: &str) -> Option<OpDef> {
    use OpType::*;
    let def = match name {
        ":-" | "-->" => OpDef::new(1200, Xfx),
        ";" | "|" => OpDef::new(1100, Xfy),
        "->" | "*->" => OpDef::new(1050, Xfy),
        "," => OpDef::new(1000, Xfy),
        "=" | "\\=" | "==" | "\\==" | "@<" | "@>" | "@=<" | "@>=" | "=.." | "is" | "=:="
        | "=\\=" | "<" | ">" | "=<" | ">=" => OpDef::new(700, Xfx),
        ":" => OpDef::new(200, Xfy),
        "+" | "-" | "/\\" | "\\/" | "xor" => OpDef::new(500, Yfx),
        "*" | "/" | "//" | "mod" | "rem" | "<<" | ">>" | "div" => OpDef::new(400, Yfx),
        "**" => OpDef::new(200, Xfx),
        "^" => OpDef::new(200, Xfy),
        _ => return None,
    };
    Some(def)
}

/// Prefix operator definition for `name`
pub fn prefix(name: &str) -> Option<OpDef> {
    use OpType::*;
    let def = match name {
        ":-" | "?-" => OpDef::new(1200, Fx),
        "dynamic" => OpDef::new(1150, Fx),
        "\\+" => OpDef::new(900, Fy),
        "-" | "+" | "\\" => OpDef::new(200, Fy),
        _ => return None,
    };
    Some(def)
}

/// Characters that glue together into symbolic atoms such as `:-` or `=..`
pub fn is_symbol_char(c: char) -> bool {
    matches!(
        c,
        '+' | '-' | '*' | '/' | '\\' | '^' | '<' | '>' | '=' | '~' | ':' | '.' | '?' | '@' | '#'
            | '&' | '$'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_priorities() {
        let plus = infix("+").unwrap();
        assert_eq!(plus.left_max(), 500);
        assert_eq!(plus.right_max(), 499);

        let comma = infix(",").unwrap();
        assert_eq!(comma.left_max(), 999);
        assert_eq!(comma.right_max(), 1000);

        let neg = prefix("-").unwrap();
        assert_eq!(neg.right_max(), 200);
    }

    #[test]
    fn test_unknown_operator() {
        assert!(infix("foo").is_none());
        assert!(prefix("is").is_none());
    }
}
