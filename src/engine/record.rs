//! Recorded terms and solution snapshots
//!
//! Ordinary handles die with their frame or query. A [`RecordedTerm`] is a
//! copy held by the engine's record store instead, so it can be recalled
//! after the query that produced it is gone.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;

use super::runtime::Runtime;
use super::term::Term;
use crate::error::BridgeResult;
use crate::prolog::RawRecord;
use crate::syntax::OwnedTerm;

/// A term copied into the engine's record store; erased on drop
pub struct RecordedTerm {
    rt: Runtime,
    raw: RawRecord,
}

impl RecordedTerm {
    pub(crate) fn new(rt: &Runtime, raw: RawRecord) -> Self {
        Self { rt: rt.clone(), raw }
    }

    /// A fresh copy as a handle in the current scope
    pub fn recall(&self) -> BridgeResult<Term> {
        let t = self.rt.new_variable()?;
        self.rt.backend().recorded(self.raw, t.raw());
        Ok(t)
    }

    pub fn to_owned_term(&self) -> BridgeResult<OwnedTerm> {
        self.rt.inner().check_live()?;
        let be = self.rt.backend();
        let frame = be.open_frame();
        let t = be.new_term_refs(1);
        be.recorded(self.raw, t);
        let term = self.rt.inner().read_owned(t);
        be.close_frame(frame);
        Ok(term)
    }
}

impl Drop for RecordedTerm {
    fn drop(&mut self) {
        if self.rt.is_live() {
            self.rt.backend().erase(self.raw);
        }
    }
}

impl fmt::Debug for RecordedTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_owned_term() {
            Ok(term) => write!(f, "RecordedTerm({})", term),
            Err(_) => f.write_str("RecordedTerm(<erased>)"),
        }
    }
}

/// One solution of an eagerly collected query: variable name to snapshot
#[derive(Debug, Default)]
pub struct Solution {
    bindings: Vec<(String, RecordedTerm)>,
}

impl Solution {
    pub(crate) fn new(bindings: Vec<(String, RecordedTerm)>) -> Self {
        Self { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&RecordedTerm> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecordedTerm)> {
        self.bindings.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn to_owned_map(&self) -> BridgeResult<BTreeMap<String, OwnedTerm>> {
        self.bindings
            .iter()
            .map(|(name, t)| Ok((name.clone(), t.to_owned_term()?)))
            .collect()
    }

    /// Bindings as a JSON object
    pub fn to_json(&self) -> BridgeResult<JsonValue> {
        let mut object = serde_json::Map::new();
        for (name, t) in &self.bindings {
            object.insert(name.clone(), t.to_owned_term()?.to_json());
        }
        Ok(JsonValue::Object(object))
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use crate::engine::runtime::testing;
    use crate::error::BridgeError;
    use crate::syntax::OwnedTerm;

    #[test]
    fn test_record_survives_frame() {
        let rt = testing::runtime();
        let frame = rt.open_frame().unwrap();
        let t = rt.parse("pair(X, [1, 2])").unwrap();
        let recorded = t.record().unwrap();
        frame.close().unwrap();

        assert!(!t.is_valid());
        let copy = recorded.recall().unwrap();
        assert_eq!(copy.name_arity().unwrap(), ("pair".to_string(), 2));
        assert!(copy.get(1).unwrap().is_variable().unwrap());
        assert_eq!(
            recorded.to_owned_term().unwrap(),
            OwnedTerm::compound(
                "pair",
                vec![
                    OwnedTerm::Variable(0),
                    OwnedTerm::list(vec![OwnedTerm::Integer(1), OwnedTerm::Integer(2)]),
                ],
            )
        );
    }

    #[test]
    fn test_recorded_after_shutdown() {
        let rt = testing::runtime();
        let recorded = rt.atom("a").unwrap().record().unwrap();
        rt.shutdown().unwrap();
        assert!(matches!(recorded.recall(), Err(BridgeError::ResourceMisuse(_))));
    }
}
