//! Group definitions and the rule predicate tree.

use std::collections::VecDeque;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::notifications::{Notification, NotificationError, Priority};

/// A notification attribute a rule can inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "key", rename_all = "snake_case")]
pub enum RuleField {
    Type,
    Priority,
    Title,
    Message,
    UserId,
    Read,
    /// Top-level string value of the JSON payload.
    Data(String),
    Annotation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    /// Regular expression match.
    Matches,
    OneOf,
    /// Priority comparison; only meaningful on `RuleField::Priority`.
    AtLeast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    One(String),
    Many(Vec<String>),
}

impl RuleValue {
    fn values(&self) -> Vec<&str> {
        match self {
            RuleValue::One(v) => vec![v.as_str()],
            RuleValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }

    fn first(&self) -> Option<&str> {
        self.values().into_iter().next()
    }
}

/// Predicate tree evaluated against a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    Field {
        field: RuleField,
        operator: RuleOperator,
        value: RuleValue,
    },
    All {
        conditions: Vec<RuleCondition>,
    },
    Any {
        conditions: Vec<RuleCondition>,
    },
    Not {
        condition: Box<RuleCondition>,
    },
}

impl RuleCondition {
    pub fn field(field: RuleField, operator: RuleOperator, value: impl Into<String>) -> Self {
        RuleCondition::Field {
            field,
            operator,
            value: RuleValue::One(value.into()),
        }
    }

    pub fn type_is(notification_type: crate::notifications::NotificationType) -> Self {
        Self::field(
            RuleField::Type,
            RuleOperator::Equals,
            notification_type.as_str(),
        )
    }

    /// Reject rules that can never be evaluated.
    pub fn validate(&self) -> Result<(), NotificationError> {
        match self {
            RuleCondition::Field {
                field,
                operator,
                value,
            } => {
                if *operator == RuleOperator::Matches {
                    for pattern in value.values() {
                        Regex::new(pattern).map_err(|e| {
                            NotificationError::Validation(format!(
                                "invalid rule pattern {:?}: {}",
                                pattern, e
                            ))
                        })?;
                    }
                }
                if *operator == RuleOperator::AtLeast {
                    if *field != RuleField::Priority {
                        return Err(NotificationError::Validation(
                            "at_least only applies to priority".into(),
                        ));
                    }
                    if value.first().and_then(Priority::from_str).is_none() {
                        return Err(NotificationError::Validation(format!(
                            "at_least needs a priority, got {:?}",
                            value
                        )));
                    }
                }
                Ok(())
            }
            RuleCondition::All { conditions } | RuleCondition::Any { conditions } => {
                conditions.iter().try_for_each(RuleCondition::validate)
            }
            RuleCondition::Not { condition } => condition.validate(),
        }
    }

    pub fn evaluate(&self, notification: &Notification) -> bool {
        match self {
            RuleCondition::Field {
                field,
                operator,
                value,
            } => evaluate_field(field, *operator, value, notification),
            RuleCondition::All { conditions } => conditions.iter().all(|c| c.evaluate(notification)),
            RuleCondition::Any { conditions } => conditions.iter().any(|c| c.evaluate(notification)),
            RuleCondition::Not { condition } => !condition.evaluate(notification),
        }
    }
}

fn field_value(field: &RuleField, n: &Notification) -> Option<String> {
    match field {
        RuleField::Type => Some(n.notification_type.as_str().to_string()),
        RuleField::Priority => Some(n.priority.as_str().to_string()),
        RuleField::Title => Some(n.title.clone()),
        RuleField::Message => Some(n.message.clone()),
        RuleField::UserId => n.user_id.clone(),
        RuleField::Read => Some(n.read.to_string()),
        RuleField::Data(key) => n.data.as_ref().and_then(|d| d.get(key)).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        RuleField::Annotation(key) => n.annotations.get(key).cloned(),
    }
}

fn evaluate_field(
    field: &RuleField,
    operator: RuleOperator,
    value: &RuleValue,
    n: &Notification,
) -> bool {
    let Some(actual) = field_value(field, n) else {
        // absent fields only satisfy negative comparisons
        return operator == RuleOperator::NotEquals;
    };
    match operator {
        RuleOperator::Equals => value.first() == Some(actual.as_str()),
        RuleOperator::NotEquals => value.first() != Some(actual.as_str()),
        RuleOperator::Contains => value
            .first()
            .map(|v| actual.to_lowercase().contains(&v.to_lowercase()))
            .unwrap_or(false),
        RuleOperator::StartsWith => value
            .first()
            .map(|v| actual.starts_with(v))
            .unwrap_or(false),
        RuleOperator::Matches => value
            .first()
            .and_then(|p| Regex::new(p).ok())
            .map(|re| re.is_match(&actual))
            .unwrap_or(false),
        RuleOperator::OneOf => value.values().contains(&actual.as_str()),
        RuleOperator::AtLeast => match value.first().and_then(Priority::from_str) {
            Some(min) => n.priority >= min,
            None => false,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub notification_id: String,
    pub added_at: i64,
}

/// Input for `GroupManager::create_group`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rules: Option<RuleCondition>,
    pub max_size: usize,
    /// Members older than this are dropped on sweep.
    #[serde(default)]
    pub expiry_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub rules: Option<RuleCondition>,
    pub max_size: usize,
    pub expiry_ms: Option<i64>,
    pub members: VecDeque<GroupMember>,
}

impl Group {
    pub fn matches(&self, notification: &Notification) -> bool {
        self.rules
            .as_ref()
            .map(|r| r.evaluate(notification))
            .unwrap_or(false)
    }

    /// Append a member, evicting the oldest ones beyond `max_size`. Returns evicted ids.
    pub fn push_member(&mut self, notification_id: &str, now: i64) -> Vec<String> {
        if self
            .members
            .iter()
            .any(|m| m.notification_id == notification_id)
        {
            return Vec::new();
        }
        self.members.push_back(GroupMember {
            notification_id: notification_id.to_string(),
            added_at: now,
        });
        let mut evicted = Vec::new();
        while self.members.len() > self.max_size {
            if let Some(oldest) = self.members.pop_front() {
                evicted.push(oldest.notification_id);
            }
        }
        evicted
    }
}
