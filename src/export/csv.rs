//! RFC 4180 CSV with a fixed column set.

use serde_json::{Map, Value};

use crate::notifications::Notification;

pub const CSV_HEADER: [&str; 9] = [
    "id",
    "type",
    "priority",
    "title",
    "message",
    "timestamp",
    "read",
    "group",
    "data",
];

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn write(notifications: &[Notification]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");
    for n in notifications {
        let data = n.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
        let row = [
            n.id.clone(),
            n.notification_type.as_str().to_string(),
            n.priority.as_str().to_string(),
            n.title.clone(),
            n.message.clone(),
            n.timestamp.to_string(),
            n.read.to_string(),
            n.group.clone().unwrap_or_default(),
            data,
        ];
        let quoted: Vec<String> = row.iter().map(|f| quote(f)).collect();
        out.push_str(&quoted.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Split CSV text into rows of fields. Quoted fields may hold separators,
/// doubled quotes and line breaks.
pub fn parse_rows(input: &str) -> Result<Vec<Vec<String>>, String> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

/// One JSON object per data row, keyed by header. Empty optional columns are omitted.
pub fn read(input: &str) -> Result<Vec<Result<Value, String>>, String> {
    let mut rows = parse_rows(input)?.into_iter();
    let header = rows.next().ok_or_else(|| "missing header row".to_string())?;
    for required in ["id", "type", "priority", "title", "message", "timestamp"] {
        if !header.iter().any(|h| h == required) {
            return Err(format!("header lacks column {}", required));
        }
    }

    Ok(rows
        .filter(|row| !(row.len() == 1 && row[0].is_empty()))
        .map(|row| {
            if row.len() != header.len() {
                return Err(format!(
                    "expected {} fields, found {}",
                    header.len(),
                    row.len()
                ));
            }
            let mut record = Map::new();
            for (name, value) in header.iter().zip(row) {
                let typed = match name.as_str() {
                    "timestamp" => match value.parse::<i64>() {
                        Ok(ts) => Value::from(ts),
                        Err(_) => return Err(format!("invalid timestamp {:?}", value)),
                    },
                    "read" if value.is_empty() => continue,
                    "read" => match value.parse::<bool>() {
                        Ok(read) => Value::from(read),
                        Err(_) => return Err(format!("invalid read flag {:?}", value)),
                    },
                    "group" | "data" if value.is_empty() => continue,
                    "data" => serde_json::from_str(&value)
                        .map_err(|err| format!("invalid data column: {}", err))?,
                    _ => Value::from(value),
                };
                record.insert(name.clone(), typed);
            }
            Ok(Value::Object(record))
        })
        .collect())
}
