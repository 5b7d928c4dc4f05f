//! Named notification templates with `{{name}}` placeholders.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::notifications::{
    Notification, NotificationError, NotificationResult, NotificationType, Priority,
};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_\.]+)\s*\}\}").expect("placeholder regex is valid");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub name: String,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: Priority,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub group: Option<String>,
}

impl NotificationTemplate {
    /// Placeholder names used by title and message, in order of first appearance.
    pub fn variables(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for text in [&self.title, &self.message] {
            for capture in PLACEHOLDER.captures_iter(text) {
                let name = capture[1].to_string();
                if !seen.contains(&name) {
                    seen.push(name);
                }
            }
        }
        seen
    }

    pub fn render(&self, vars: &BTreeMap<String, String>) -> NotificationResult<Notification> {
        let title = render_text(&self.name, &self.title, vars)?;
        let message = render_text(&self.name, &self.message, vars)?;
        let mut notification =
            Notification::new(self.notification_type, self.priority, title, message);
        notification.group = self.group.clone();
        Ok(notification)
    }
}

fn render_text(
    template: &str,
    text: &str,
    vars: &BTreeMap<String, String>,
) -> NotificationResult<String> {
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER.replace_all(text, |caps: &regex::Captures| {
        match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing.push(caps[1].to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        return Err(NotificationError::Validation(format!(
            "template {} is missing variables: {}",
            template,
            missing.join(", ")
        )));
    }
    Ok(rendered.into_owned())
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, NotificationTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in marketplace templates.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for template in default_templates() {
            registry.register(template);
        }
        registry
    }

    /// Add or replace a template.
    pub fn register(&self, template: NotificationTemplate) {
        self.templates
            .write()
            .unwrap()
            .insert(template.name.clone(), template);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.templates.write().unwrap().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<NotificationTemplate> {
        self.templates.read().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn render(
        &self,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> NotificationResult<Notification> {
        let template = self
            .get(name)
            .ok_or_else(|| NotificationError::Validation(format!("unknown template {}", name)))?;
        template.render(vars)
    }
}

fn default_templates() -> Vec<NotificationTemplate> {
    vec![
        NotificationTemplate {
            name: "nft_listed".into(),
            notification_type: NotificationType::NftListed,
            priority: Priority::Medium,
            title: "{{collection}} listed".into(),
            message: "{{item}} was listed for {{price}}".into(),
            group: Some("nft".into()),
        },
        NotificationTemplate {
            name: "nft_sold".into(),
            notification_type: NotificationType::NftSold,
            priority: Priority::High,
            title: "{{item}} sold".into(),
            message: "{{item}} sold for {{price}} to {{buyer}}".into(),
            group: Some("nft".into()),
        },
        NotificationTemplate {
            name: "price_alert".into(),
            notification_type: NotificationType::PriceAlert,
            priority: Priority::High,
            title: "{{symbol}} price alert".into(),
            message: "{{symbol}} crossed {{threshold}}".into(),
            group: None,
        },
        NotificationTemplate {
            name: "security_login".into(),
            notification_type: NotificationType::Security,
            priority: Priority::Urgent,
            title: "New sign-in".into(),
            message: "New sign-in from {{device}}".into(),
            group: None,
        },
    ]
}
