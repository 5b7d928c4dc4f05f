//! Rule-based notification grouping.

mod manager;
mod models;

pub use manager::{GroupAssignment, GroupManager};
pub use models::{
    Group, GroupDefinition, GroupMember, RuleCondition, RuleField, RuleOperator, RuleValue,
};
