//! Label selectors: `key=value`, `key==value` and `key!=value`, comma separated.

use crate::error::{Error, Result};
use regex::Regex;
use serde_yaml::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

impl Requirement {
    fn matches(&self, labels: Option<&serde_yaml::Mapping>) -> bool {
        let actual = labels
            .and_then(|l| l.get(self.key.as_str()))
            .and_then(label_value);
        match self.operator {
            Operator::Equals => actual.as_deref() == Some(self.value.as_str()),
            Operator::NotEquals => actual.as_deref() != Some(self.value.as_str()),
        }
    }
}

fn label_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn key_regex() -> &'static Regex {
    static KEY: OnceLock<Regex> = OnceLock::new();
    KEY.get_or_init(|| {
        Regex::new(r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$")
            .expect("static regex")
    })
}

fn value_regex() -> &'static Regex {
    static VALUE: OnceLock<Regex> = OnceLock::new();
    VALUE.get_or_init(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").expect("static regex"))
}

/// A conjunction of label requirements; empty matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(selector: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidSelector {
            selector: selector.to_string(),
            reason,
        };
        let mut requirements = Vec::new();
        if selector.trim().is_empty() {
            return Ok(Self { requirements });
        }
        for term in selector.split(',') {
            let term = term.trim();
            let (key, operator, value) = if let Some((k, v)) = term.split_once("!=") {
                (k, Operator::NotEquals, v)
            } else if let Some((k, v)) = term.split_once("==") {
                (k, Operator::Equals, v)
            } else if let Some((k, v)) = term.split_once('=') {
                (k, Operator::Equals, v)
            } else {
                return Err(invalid(format!(
                    "requirement {:?} must use '=', '==' or '!='",
                    term
                )));
            };
            let (key, value) = (key.trim(), value.trim());
            if !key_regex().is_match(key) {
                return Err(invalid(format!("invalid label key {:?}", key)));
            }
            if !value_regex().is_match(value) || value.len() > 63 {
                return Err(invalid(format!("invalid label value {:?}", value)));
            }
            requirements.push(Requirement {
                key: key.to_string(),
                operator,
                value: value.to_string(),
            });
        }
        Ok(Self { requirements })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Tests a document's `metadata.labels`
    pub fn matches(&self, document: &Value) -> bool {
        if self.requirements.is_empty() {
            return true;
        }
        let labels = document
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(Value::as_mapping);
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self
            .requirements
            .iter()
            .map(|r| {
                let op = match r.operator {
                    Operator::Equals => "=",
                    Operator::NotEquals => "!=",
                };
                format!("{}{}{}", r.key, op, r.value)
            })
            .collect();
        f.write_str(&terms.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_operators() {
        let selector = Selector::parse("app=web, tier==frontend,env!=prod").unwrap();
        let ops: Vec<Operator> = selector.requirements().iter().map(|r| r.operator).collect();
        assert_eq!(ops, vec![Operator::Equals, Operator::Equals, Operator::NotEquals]);
        assert_eq!(selector.to_string(), "app=web,tier=frontend,env!=prod");
        assert!(Selector::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_set_based_and_bad_keys() {
        assert!(Selector::parse("env in (prod)").is_err());
        assert!(Selector::parse("=value").is_err());
        assert!(Selector::parse("app=bad value").is_err());
    }

    #[test]
    fn test_matching() {
        let web = doc("metadata:\n  labels:\n    app: web\n    replicas: 3\n");
        let bare = doc("kind: ConfigMap\n");
        let selector = Selector::parse("app=web").unwrap();
        assert!(selector.matches(&web));
        assert!(!selector.matches(&bare));

        let not_db = Selector::parse("app!=db").unwrap();
        assert!(not_db.matches(&web));
        assert!(not_db.matches(&bare));

        assert!(Selector::parse("replicas=3").unwrap().matches(&web));
        assert!(Selector::everything().matches(&bare));
    }
}
