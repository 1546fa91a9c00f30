//! Domain rule matcher.
//!
//! Three rule forms:
//! - `domain.com` matches exactly that name
//! - `.domain.com` matches the name and every subdomain
//! - `*.domain.com` matches every strict subdomain, not the apex
//!
//! When several rules could match, the most general one (the shortest
//! suffix) wins and supplies the reported rule string. Wildcards anywhere
//! but as a single leading label are rejected at load time.

use std::collections::HashSet;

use hickory_proto::rr::Name;

use super::{NameDb, NameMatch};
use crate::error::Result;
use crate::ResolveError;

#[derive(Default)]
pub struct DomainDb {
    exact: HashSet<String>,
    suffix: HashSet<String>,
    wildcard: HashSet<String>,
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl DomainDb {
    pub fn parse(rules: &[String]) -> Result<DomainDb> {
        let mut db = DomainDb::default();
        for rule in rules {
            if let Some(rest) = rule.strip_prefix("*.") {
                if rest.contains('*') {
                    return Err(ResolveError::config(format!(
                        "wildcard is only allowed as the leading label: {:?}",
                        rule
                    )));
                }
                db.wildcard.insert(normalize(rest));
            } else if rule.contains('*') {
                return Err(ResolveError::config(format!(
                    "wildcard is only allowed as the leading label: {:?}",
                    rule
                )));
            } else if let Some(rest) = rule.strip_prefix('.') {
                db.suffix.insert(normalize(rest));
            } else {
                db.exact.insert(normalize(rule));
            }
        }
        Ok(db)
    }
}

impl NameDb for DomainDb {
    fn match_name(&self, name: &Name) -> Option<NameMatch> {
        let name = normalize(&name.to_string());
        if name.is_empty() {
            return None;
        }
        let labels: Vec<&str> = name.split('.').collect();
        // Walk suffixes from the most general (rightmost label) to the
        // full name so general rules win over specific ones.
        for start in (0..labels.len()).rev() {
            let candidate = labels[start..].join(".");
            if self.suffix.contains(&candidate) {
                return Some(NameMatch::rule(format!(".{}", candidate)));
            }
            if start > 0 && self.wildcard.contains(&candidate) {
                return Some(NameMatch::rule(format!("*.{}", candidate)));
            }
            if start == 0 && self.exact.contains(&candidate) {
                return Some(NameMatch::rule(candidate));
            }
        }
        None
    }

    fn rule_count(&self) -> usize {
        self.exact.len() + self.suffix.len() + self.wildcard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn db(rules: &[&str]) -> DomainDb {
        DomainDb::parse(&rules.iter().map(|r| r.to_string()).collect::<Vec<_>>()).unwrap()
    }

    fn hit(db: &DomainDb, name: &str) -> Option<String> {
        db.match_name(&Name::from_str(name).unwrap()).map(|m| m.rule)
    }

    #[test]
    fn exact_rules_do_not_match_subdomains() {
        let db = db(&["domain.com"]);
        assert_eq!(hit(&db, "domain.com."), Some("domain.com".to_string()));
        assert_eq!(hit(&db, "www.domain.com."), None);
    }

    #[test]
    fn suffix_rules_match_apex_and_subdomains() {
        let db = db(&[".domain.com"]);
        assert!(hit(&db, "domain.com.").is_some());
        assert!(hit(&db, "deep.www.domain.com.").is_some());
        assert!(hit(&db, "otherdomain.com.").is_none());
    }

    #[test]
    fn wildcard_rules_skip_the_apex() {
        let db = db(&["*.domain.com"]);
        assert!(hit(&db, "domain.com.").is_none());
        assert!(hit(&db, "www.domain.com.").is_some());
    }

    #[test]
    fn most_general_rule_wins() {
        let db = db(&[".com", "x.domain.com"]);
        assert_eq!(hit(&db, "x.domain.com."), Some(".com".to_string()));
    }

    #[test]
    fn misplaced_wildcards_are_rejected() {
        assert!(DomainDb::parse(&["a.*.domain.com".to_string()]).is_err());
        assert!(DomainDb::parse(&["*x.domain.com".to_string()]).is_err());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let db = db(&[".Domain.COM"]);
        assert!(hit(&db, "WWW.DOMAIN.com.").is_some());
    }
}
