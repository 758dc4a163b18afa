use std::collections::{BTreeMap, BTreeSet};

use crate::api::v1::l2c::L2c;

pub const RULE_JAVA_DISALLOW_WEBLOGIC: &str = "tmaxsoft-java:DisallowWeblogicDependency";
pub const RULE_XML_DISALLOW_TOMCAT: &str = "xml:TomcatDependXMLCheck";
pub const RULE_XML_DISALLOW_WEBLOGIC: &str = "xml:WeblogicDependXMLCheck";
pub const RULE_JAVA_DB_MIGRATION: &str = "mycompany-java:DBMigrationInvestigation";

/// Rule keys to activate, bucketed by language.
pub type DesiredRules = BTreeMap<String, BTreeSet<String>>;

/// (language, rule) pairs checked for a source to target application server move.
fn was_rules(from: &str, to: &str) -> &'static [(&'static str, &'static str)] {
    match (from, to) {
        ("weblogic", "jeus") => &[
            ("java", RULE_JAVA_DISALLOW_WEBLOGIC),
            ("xml", RULE_XML_DISALLOW_TOMCAT),
            ("xml", RULE_XML_DISALLOW_WEBLOGIC),
        ],
        _ => &[],
    }
}

fn db_rules(from: &str, to: &str) -> &'static [(&'static str, &'static str)] {
    match (from, to) {
        ("oracle", "tibero") => &[("java", RULE_JAVA_DB_MIGRATION)],
        _ => &[],
    }
}

pub fn desired_rules(l2c: &L2c) -> DesiredRules {
    let was = &l2c.spec.was;
    let mut pairs = was_rules(&was.from.type_, &was.to.type_).to_vec();
    if let Some(db) = &l2c.spec.db {
        pairs.extend_from_slice(db_rules(&db.from.type_, &db.to.type_));
    }

    let mut rules = DesiredRules::new();
    for (language, rule) in pairs {
        rules
            .entry(language.to_string())
            .or_default()
            .insert(rule.to_string());
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::fixtures;

    #[test]
    fn weblogic_to_jeus_checks_java_and_xml() {
        let rules = desired_rules(&fixtures::l2c());
        assert_eq!(rules.len(), 2);
        assert_eq!(rules["java"].len(), 1);
        assert!(rules["xml"].contains(RULE_XML_DISALLOW_WEBLOGIC));
        assert!(rules["xml"].contains(RULE_XML_DISALLOW_TOMCAT));
    }

    #[test]
    fn oracle_to_tibero_adds_db_investigation() {
        let rules = desired_rules(&fixtures::with_db(fixtures::l2c(), "a", "b"));
        assert!(rules["java"].contains(RULE_JAVA_DB_MIGRATION));
        assert!(rules["java"].contains(RULE_JAVA_DISALLOW_WEBLOGIC));
    }

    #[test]
    fn unknown_pairs_have_no_rules() {
        let mut l2c = fixtures::l2c();
        l2c.spec.was.from.type_ = "tomcat".into();
        assert!(desired_rules(&l2c).is_empty());
    }
}
