//! ISO error terms raised by the memory backend.

use crate::syntax::OwnedTerm;

fn error(formal: OwnedTerm, context: OwnedTerm) -> OwnedTerm {
    OwnedTerm::compound("error", vec![formal, context])
}

fn unknown_context() -> OwnedTerm {
    OwnedTerm::Variable(0)
}

/// `Name/Arity`
pub(crate) fn indicator(name: &str, arity: usize) -> OwnedTerm {
    OwnedTerm::compound("/", vec![OwnedTerm::atom(name), OwnedTerm::Integer(arity as i64)])
}

pub(crate) fn instantiation_error() -> OwnedTerm {
    error(OwnedTerm::atom("instantiation_error"), unknown_context())
}

pub(crate) fn type_error(expected: &str, culprit: OwnedTerm) -> OwnedTerm {
    error(
        OwnedTerm::compound("type_error", vec![OwnedTerm::atom(expected), culprit]),
        unknown_context(),
    )
}

pub(crate) fn domain_error(domain: &str, culprit: OwnedTerm) -> OwnedTerm {
    error(
        OwnedTerm::compound("domain_error", vec![OwnedTerm::atom(domain), culprit]),
        unknown_context(),
    )
}

pub(crate) fn evaluation_error(what: &str) -> OwnedTerm {
    error(
        OwnedTerm::compound("evaluation_error", vec![OwnedTerm::atom(what)]),
        unknown_context(),
    )
}

pub(crate) fn permission_error(action: &str, kind: &str, culprit: OwnedTerm) -> OwnedTerm {
    error(
        OwnedTerm::compound(
            "permission_error",
            vec![OwnedTerm::atom(action), OwnedTerm::atom(kind), culprit],
        ),
        unknown_context(),
    )
}

/// `error(existence_error(procedure, Name/Arity), Name/Arity)`
pub(crate) fn unknown_procedure(name: &str, arity: usize) -> OwnedTerm {
    error(
        OwnedTerm::compound(
            "existence_error",
            vec![OwnedTerm::atom("procedure"), indicator(name, arity)],
        ),
        indicator(name, arity),
    )
}

pub(crate) fn system_error(message: &str) -> OwnedTerm {
    error(
        OwnedTerm::compound("system_error", vec![OwnedTerm::atom(message)]),
        unknown_context(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_shapes() {
        assert_eq!(
            unknown_procedure("foo", 0).to_string(),
            "error(existence_error(procedure,foo/0),foo/0)"
        );
        assert_eq!(
            type_error("integer", OwnedTerm::atom("a")).to_string(),
            "error(type_error(integer,a),_G0)"
        );
        assert_eq!(instantiation_error().to_string(), "error(instantiation_error,_G0)");
    }
}
