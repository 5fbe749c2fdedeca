//! Policy tuple shapes and pattern matching.
//!
//! # Purpose
//! Defines the two relations the core stores (grants and assignments), the
//! wildcard patterns used to query them, and the `object#action` permission key.
//!
//! # Key invariants
//! - Grants and assignments are distinct types; a grant is never read as an
//!   assignment or the other way around.
//! - A `None` pattern field matches any value.
use serde::{Deserialize, Serialize};

/// Separator between object and action in a permission key.
const KEY_SEPARATOR: char = '#';

/// "role may perform action on object within domain."
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantTuple {
    pub role: String,
    pub domain: String,
    pub object: String,
    pub action: String,
}

/// "user holds role within domain."
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignmentTuple {
    pub user: String,
    pub role: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Tuple {
    Grant(GrantTuple),
    Assignment(AssignmentTuple),
}

impl GrantTuple {
    pub fn new(
        role: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    /// Casbin `p` rule: `[sub, dom, obj, act]`.
    pub(crate) fn to_rule(&self) -> Vec<String> {
        vec![
            self.role.clone(),
            self.domain.clone(),
            self.object.clone(),
            self.action.clone(),
        ]
    }

    pub(crate) fn from_rule(rule: &[String]) -> Option<Self> {
        match rule {
            [role, domain, object, action, ..] => {
                Some(Self::new(role, domain, object, action))
            }
            _ => None,
        }
    }

    pub fn permission_key(&self) -> String {
        permission_key(&self.object, &self.action)
    }
}

impl AssignmentTuple {
    pub fn new(
        user: impl Into<String>,
        role: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
            domain: domain.into(),
        }
    }

    /// Casbin `g` rule: `[user, role, dom]`.
    pub(crate) fn to_rule(&self) -> Vec<String> {
        vec![self.user.clone(), self.role.clone(), self.domain.clone()]
    }

    pub(crate) fn from_rule(rule: &[String]) -> Option<Self> {
        match rule {
            [user, role, domain, ..] => Some(Self::new(user, role, domain)),
            _ => None,
        }
    }
}

impl From<GrantTuple> for Tuple {
    fn from(value: GrantTuple) -> Self {
        Tuple::Grant(value)
    }
}

impl From<AssignmentTuple> for Tuple {
    fn from(value: AssignmentTuple) -> Self {
        Tuple::Assignment(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantPattern {
    pub role: Option<String>,
    pub domain: Option<String>,
    pub object: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentPattern {
    pub user: Option<String>,
    pub role: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TuplePattern {
    Grant(GrantPattern),
    Assignment(AssignmentPattern),
}

impl TuplePattern {
    pub fn all_grants() -> Self {
        TuplePattern::Grant(GrantPattern::default())
    }

    pub fn all_assignments() -> Self {
        TuplePattern::Assignment(AssignmentPattern::default())
    }

    /// Reference match semantics for pattern queries.
    pub fn matches(&self, tuple: &Tuple) -> bool {
        match (self, tuple) {
            (TuplePattern::Grant(pattern), Tuple::Grant(grant)) => {
                field_matches(&pattern.role, &grant.role)
                    && field_matches(&pattern.domain, &grant.domain)
                    && field_matches(&pattern.object, &grant.object)
                    && field_matches(&pattern.action, &grant.action)
            }
            (TuplePattern::Assignment(pattern), Tuple::Assignment(assignment)) => {
                field_matches(&pattern.user, &assignment.user)
                    && field_matches(&pattern.role, &assignment.role)
                    && field_matches(&pattern.domain, &assignment.domain)
            }
            _ => false,
        }
    }
}

fn field_matches(pattern: &Option<String>, value: &str) -> bool {
    match pattern {
        Some(expected) => expected == value,
        None => true,
    }
}

/// Build the `object#action` key used for permission membership checks.
pub fn permission_key(object: &str, action: &str) -> String {
    format!("{object}{KEY_SEPARATOR}{action}")
}

/// Split a permission key back into `(object, action)`.
///
/// Splits on the last separator so objects may themselves contain `#`.
pub fn split_permission_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once(KEY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_pattern_wildcards_match_any_field() {
        let grant: Tuple = GrantTuple::new("admin", "ns1", "token", "write").into();
        let by_role = TuplePattern::Grant(GrantPattern {
            role: Some("admin".to_string()),
            ..GrantPattern::default()
        });
        let other_role = TuplePattern::Grant(GrantPattern {
            role: Some("viewer".to_string()),
            ..GrantPattern::default()
        });
        assert!(TuplePattern::all_grants().matches(&grant));
        assert!(by_role.matches(&grant));
        assert!(!other_role.matches(&grant));
    }

    #[test]
    fn patterns_never_cross_relations() {
        let assignment: Tuple = AssignmentTuple::new("alice", "admin", "ns1").into();
        assert!(!TuplePattern::all_grants().matches(&assignment));
        assert!(TuplePattern::all_assignments().matches(&assignment));
    }

    #[test]
    fn permission_key_splits_on_last_separator() {
        let key = permission_key("doc#1", "read");
        assert_eq!(key, "doc#1#read");
        assert_eq!(split_permission_key(&key), Some(("doc#1", "read")));
        assert_eq!(split_permission_key("no-separator"), None);
    }

    #[test]
    fn casbin_rules_map_back_to_tuples() {
        let grant = GrantTuple::new("admin", "ns1", "token", "write");
        assert_eq!(GrantTuple::from_rule(&grant.to_rule()), Some(grant));
        let assignment = AssignmentTuple::new("alice", "admin", "ns1");
        assert_eq!(
            AssignmentTuple::from_rule(&assignment.to_rule()),
            Some(assignment)
        );
        assert_eq!(AssignmentTuple::from_rule(&["alice".to_string()]), None);
    }
}
