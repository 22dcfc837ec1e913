//! Shared `--json` output shape: `{ok, error?, data?, next_cursor?}`

use serde_json::{json, Value};

pub fn print_ok(data: Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({"ok": true, "data": data}))
            .unwrap_or_else(|_| "{\"ok\":true}".to_string())
    );
}

pub fn print_ok_page(data: Value, next_cursor: Option<&str>) {
    let mut body = json!({"ok": true, "data": data});
    if let Some(cursor) = next_cursor {
        body["next_cursor"] = Value::from(cursor);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&body).unwrap_or_else(|_| "{\"ok\":true}".to_string())
    );
}

pub fn print_err(error: &anyhow::Error) {
    println!("{}", json!({"ok": false, "error": format!("{error:#}")}));
}
