use crate::result::AttackResult;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts of captured response header values, e.g. which backend served
/// each response behind a balancer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeaderTally {
    /// header name -> header value -> responses carrying that value
    pub counts: BTreeMap<String, BTreeMap<String, u64>>,
    /// header name -> responses where the header was absent
    pub missing: BTreeMap<String, u64>,
}

impl HeaderTally {
    pub fn new(results: &[AttackResult], names: &[String]) -> Self {
        let names: Vec<String> = names.iter().map(|n| n.to_ascii_lowercase()).collect();
        let mut tally = HeaderTally::default();

        for result in results {
            for name in &names {
                match result.headers.get(name) {
                    Some(value) => {
                        *tally
                            .counts
                            .entry(name.clone())
                            .or_default()
                            .entry(value.clone())
                            .or_insert(0) += 1;
                    }
                    None => *tally.missing.entry(name.clone()).or_insert(0) += 1,
                }
            }
        }

        tally
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty() && self.missing.is_empty()
    }
}
