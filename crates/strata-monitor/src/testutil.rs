//! Shared test doubles.

use bstr::{BStr, BString};

use crate::oracle::{Oracle, QueryOutcome};

/// Oracle fed from a script of outcomes; counts queries.
pub(crate) struct ScriptedOracle {
    outcomes: Vec<QueryOutcome>,
    pub queries: usize,
    pub fallback: BString,
}

impl ScriptedOracle {
    pub(crate) fn new(outcomes: Vec<QueryOutcome>) -> Self {
        Self {
            outcomes,
            queries: 0,
            fallback: BString::from("fallback-token"),
        }
    }
}

impl Oracle for ScriptedOracle {
    fn query(&mut self, _token: Option<&BStr>) -> QueryOutcome {
        self.queries += 1;
        if self.outcomes.is_empty() {
            QueryOutcome::Failed
        } else {
            self.outcomes.remove(0)
        }
    }

    fn fallback_token(&self) -> BString {
        self.fallback.clone()
    }
}
