//! Flat XML: `<notifications><notification><id>…</id>…</notification></notifications>`.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::notifications::Notification;

lazy_static! {
    static ref NOTIFICATION_ELEMENT: Regex =
        Regex::new(r"(?s)<notification>(.*?)</notification>").expect("valid regex");
    static ref FIELD_ELEMENT: Regex =
        Regex::new(r"(?s)<([a-zA-Z_]+)>(.*?)</([a-zA-Z_]+)>").expect("valid regex");
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn element(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!("    <{name}>{}</{name}>\n", escape(value)));
}

pub fn write(notifications: &[Notification]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<notifications>\n");
    for n in notifications {
        out.push_str("  <notification>\n");
        element(&mut out, "id", &n.id);
        element(&mut out, "type", n.notification_type.as_str());
        element(&mut out, "priority", n.priority.as_str());
        element(&mut out, "title", &n.title);
        element(&mut out, "message", &n.message);
        element(&mut out, "timestamp", &n.timestamp.to_string());
        element(&mut out, "read", &n.read.to_string());
        if let Some(group) = &n.group {
            element(&mut out, "group", group);
        }
        if let Some(data) = &n.data {
            element(&mut out, "data", &data.to_string());
        }
        out.push_str("  </notification>\n");
    }
    out.push_str("</notifications>\n");
    out
}

pub fn read(input: &str) -> Result<Vec<Result<Value, String>>, String> {
    if !input.contains("<notifications") {
        return Err("missing <notifications> root".to_string());
    }
    Ok(NOTIFICATION_ELEMENT
        .captures_iter(input)
        .map(|record| {
            let mut fields = Map::new();
            for field in FIELD_ELEMENT.captures_iter(&record[1]) {
                let (name, value, closing) = (&field[1], unescape(&field[2]), &field[3]);
                if name != closing {
                    return Err(format!("mismatched tags <{}> and </{}>", name, closing));
                }
                let typed = match name {
                    "timestamp" => value
                        .trim()
                        .parse::<i64>()
                        .map(Value::from)
                        .map_err(|_| format!("invalid timestamp {:?}", value))?,
                    "read" => value
                        .trim()
                        .parse::<bool>()
                        .map(Value::from)
                        .map_err(|_| format!("invalid read flag {:?}", value))?,
                    "data" => serde_json::from_str(&value)
                        .map_err(|err| format!("invalid data element: {}", err))?,
                    _ => Value::from(value),
                };
                fields.insert(name.to_string(), typed);
            }
            Ok(Value::Object(fields))
        })
        .collect())
}
