//! Regular-expression rule matcher.
//!
//! Expressions are matched against the lowercased fully-qualified name,
//! trailing dot included, e.g. `(^|\.)evil\.test\.$`.

use hickory_proto::rr::Name;
use regex::Regex;

use super::{NameDb, NameMatch};
use crate::error::Result;

pub struct RegexDb {
    rules: Vec<Regex>,
}

impl RegexDb {
    pub fn parse(rules: &[String]) -> Result<RegexDb> {
        let rules = rules
            .iter()
            .map(|r| Regex::new(r).map_err(crate::ResolveError::from))
            .collect::<Result<Vec<_>>>()?;
        Ok(RegexDb { rules })
    }
}

impl NameDb for RegexDb {
    fn match_name(&self, name: &Name) -> Option<NameMatch> {
        let mut fqdn = name.to_lowercase().to_string();
        if !fqdn.ends_with('.') {
            fqdn.push('.');
        }
        self.rules
            .iter()
            .find(|r| r.is_match(&fqdn))
            .map(|r| NameMatch::rule(r.as_str().to_string()))
    }

    fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn matches_fqdn_with_trailing_dot() {
        let db = RegexDb::parse(&[r"(^|\.)evil\.test\.$".to_string()]).unwrap();
        assert!(db.match_name(&Name::from_str("x.evil.test.").unwrap()).is_some());
        assert!(db.match_name(&Name::from_str("evil.test.").unwrap()).is_some());
        assert!(db.match_name(&Name::from_str("notevil.test.").unwrap()).is_none());
    }

    #[test]
    fn invalid_expressions_fail_at_load() {
        assert!(RegexDb::parse(&["([".to_string()]).is_err());
    }
}
