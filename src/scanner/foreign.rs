//! Read-only view of the co-resident package manager's storage.
//!
//! Only installed integrations matter: their domains are "externally
//! managed" and attributed to the foreign manager during reconciliation.
//! Both the flat layout and the `{"data": {...}}` wrapped layout are
//! accepted, and per-repository fields may live at the top level or under a
//! nested `data` object depending on the storage format version.

use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;

use crate::runtime::Runtime;

/// Field of a repository entry, looked up at the top level first.
fn field<'a>(entry: &'a Value, key: &str) -> Option<&'a Value> {
    entry
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| entry.get("data").and_then(|d| d.get(key)))
        .filter(|v| !v.is_null())
}

/// Non-empty string field, top level first. An empty value falls through to `data`.
fn first_str<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    [entry.get(key), entry.get("data").and_then(|d| d.get(key))]
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Null) | None => false,
    }
}

/// Domains of one repository entry, or why it was skipped.
fn entry_domains(entry: &Value) -> Result<Vec<String>, &'static str> {
    if !entry.is_object() {
        return Err("not an object");
    }
    let category = first_str(entry, "category");
    if category != Some("integration") {
        return Err("not an integration");
    }
    if !is_truthy(field(entry, "installed")) {
        return Err("not installed");
    }

    if let Some(domain) = first_str(entry, "domain") {
        return Ok(vec![domain.to_lowercase()]);
    }

    let domains = [entry.get("domains"), entry.get("data").and_then(|d| d.get("domains"))]
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .find(|list| !list.is_empty())
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .filter(|d| !d.is_empty())
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default();
    Ok(domains)
}

/// Extracts the lowercase domains of installed integrations from a parsed document.
pub fn parse_foreign_domains(raw: &Value) -> BTreeSet<String> {
    let data = raw.get("data").filter(|d| d.is_object()).unwrap_or(raw);

    let entries: Vec<&Value> = match data.get("repositories") {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(Value::Object(map)) => map.values().collect(),
        _ => Vec::new(),
    };

    let mut domains = BTreeSet::new();
    for entry in entries {
        match entry_domains(entry) {
            Ok(found) => domains.extend(found),
            Err(reason) => debug!("Skipping foreign repository entry: {}", reason),
        }
    }
    domains
}

/// Reads the foreign manager's storage file. Absent or unreadable storage is an empty set.
#[tracing::instrument(skip(runtime))]
pub fn load_foreign_domains<R: Runtime>(runtime: &R, path: &Path) -> BTreeSet<String> {
    if !runtime.exists(path) {
        return BTreeSet::new();
    }

    let raw = runtime
        .read_to_string(path)
        .map_err(|e| format!("{:#}", e))
        .and_then(|content| {
            serde_json::from_str::<Value>(&content).map_err(|e| e.to_string())
        });

    match raw {
        Ok(raw) => parse_foreign_domains(&raw),
        Err(e) => {
            warn!("Failed to read foreign manager storage {:?}: {}", path, e);
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use serde_json::json;
    use tempfile::tempdir;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flat_layout() {
        let raw = json!({
            "repositories": [
                {"category": "integration", "installed": true, "domain": "Alpha"},
                {"category": "plugin", "installed": true, "domain": "card"},
                {"category": "integration", "installed": false, "domain": "beta"}
            ]
        });
        assert_eq!(parse_foreign_domains(&raw), set(&["alpha"]));
    }

    #[test]
    fn test_wrapped_layout_with_nested_fields() {
        let raw = json!({
            "version": 1,
            "data": {
                "repositories": [
                    {"data": {"category": "integration", "installed": true, "domain": "gamma"}},
                    {"category": "integration", "data": {"installed": true, "domains": ["Delta", "", 5, "epsilon"]}}
                ]
            }
        });
        assert_eq!(parse_foreign_domains(&raw), set(&["gamma", "delta", "epsilon"]));
    }

    #[test]
    fn test_top_level_installed_takes_precedence() {
        let raw = json!({
            "repositories": [
                {"category": "integration", "installed": false, "domain": "zeta", "data": {"installed": true}}
            ]
        });
        assert!(parse_foreign_domains(&raw).is_empty());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let raw = json!({
            "repositories": [
                "garbage",
                42,
                {"category": "integration", "installed": true, "domain": "ok"}
            ]
        });
        assert_eq!(parse_foreign_domains(&raw), set(&["ok"]));
    }

    #[test]
    fn test_repositories_keyed_by_id() {
        let raw = json!({
            "data": {
                "repositories": {
                    "123": {"category": "integration", "installed": true, "domain": "keyed"}
                }
            }
        });
        assert_eq!(parse_foreign_domains(&raw), set(&["keyed"]));
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hacs");
        assert!(load_foreign_domains(&RealRuntime, &path).is_empty());

        std::fs::write(&path, "{{{").unwrap();
        assert!(load_foreign_domains(&RealRuntime, &path).is_empty());

        std::fs::write(
            &path,
            r#"{"data": {"repositories": [{"category": "integration", "installed": true, "domain": "x"}]}}"#,
        )
        .unwrap();
        assert_eq!(load_foreign_domains(&RealRuntime, &path), set(&["x"]));
    }
}
