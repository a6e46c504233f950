//! Manual enum overrides.
//!
//! Humans know what `STATUS = 9` means; the database usually does not. The
//! override file maps table -> column -> ordered `{code, meaning}` list:
//!
//! ```yaml
//! ORDERS:
//!   STATUS:
//!     - { code: 0, meaning: Draft }
//!     - { code: "1", meaning: Pending }
//! ```
//!
//! The same shape is accepted as TOML (`[ORDERS]` / `STATUS = [...]`),
//! selected by file extension. Codes may be integers or strings and are kept
//! as strings; list order becomes enum order.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::models::{normalize_ident, EnumSet, EnumSource, EnumValue};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Code {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Code {
    fn into_string(self) -> String {
        match self {
            Code::Int(i) => i.to_string(),
            Code::Float(f) => f.to_string(),
            Code::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Entry {
    code: Code,
    meaning: String,
}

type OverrideFile = BTreeMap<String, BTreeMap<String, Vec<Entry>>>;

/// Load an override file; `.yaml`/`.yml` and `.toml` are supported.
pub fn load_overrides(path: &Path) -> Result<Vec<EnumSet>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read overrides file: {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("yaml") | Some("yml") => parse_yaml(&content),
        Some("toml") => parse_toml(&content),
        _ => bail!(
            "Unsupported overrides file '{}': use .yaml, .yml or .toml",
            path.display()
        ),
    }
    .with_context(|| format!("Failed to parse overrides file: {}", path.display()))
}

pub fn parse_yaml(content: &str) -> Result<Vec<EnumSet>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: OverrideFile = serde_yaml::from_str(content)?;
    Ok(into_sets(file))
}

pub fn parse_toml(content: &str) -> Result<Vec<EnumSet>> {
    let file: OverrideFile = toml::from_str(content)?;
    Ok(into_sets(file))
}

fn into_sets(file: OverrideFile) -> Vec<EnumSet> {
    let mut sets: BTreeMap<(String, String), EnumSet> = BTreeMap::new();
    for (table, columns) in file {
        let table = normalize_ident(&table);
        for (column, entries) in columns {
            let column = normalize_ident(&column);
            let set = sets
                .entry((table.clone(), column.clone()))
                .or_insert_with(|| EnumSet {
                    table_name: table.clone(),
                    column_name: column.clone(),
                    source: EnumSource::Manual,
                    values: Vec::new(),
                });
            let mut seen: BTreeSet<String> = set.values.iter().map(|v| v.code.clone()).collect();
            for entry in entries {
                let code = entry.code.into_string();
                if !seen.insert(code.clone()) {
                    tracing::warn!(
                        table = %table,
                        column = %column,
                        code = %code,
                        "duplicate override code, keeping the first"
                    );
                    continue;
                }
                set.values.push(EnumValue {
                    code,
                    meaning: entry.meaning.trim().to_string(),
                });
            }
        }
    }
    sets.into_values().filter(|s| !s.values.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_mixed_codes_keep_order() {
        let sets = parse_yaml(
            r#"
orders:
  status:
    - { code: 0, meaning: Draft }
    - { code: "1", meaning: Pending }
    - { code: 2, meaning: Approved }
    - { code: 9, meaning: Cancelled }
"#,
        )
        .unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].table_name, "ORDERS");
        assert_eq!(sets[0].column_name, "STATUS");
        assert_eq!(sets[0].source, EnumSource::Manual);
        let pairs: Vec<(&str, &str)> = sets[0]
            .values
            .iter()
            .map(|v| (v.code.as_str(), v.meaning.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("0", "Draft"), ("1", "Pending"), ("2", "Approved"), ("9", "Cancelled")]
        );
    }

    #[test]
    fn test_toml_overrides() {
        let sets = parse_toml(
            r#"
[CUSTOMERS]
TIER = [
  { code = "G", meaning = "Gold" },
  { code = "S", meaning = "Silver" },
]
"#,
        )
        .unwrap();
        assert_eq!(sets[0].column_name, "TIER");
        assert_eq!(sets[0].values[1].meaning, "Silver");
    }

    #[test]
    fn test_duplicate_codes_keep_first() {
        let sets = parse_yaml(
            "T:\n  C:\n    - { code: 1, meaning: A }\n    - { code: '1', meaning: B }\n",
        )
        .unwrap();
        assert_eq!(sets[0].values.len(), 1);
        assert_eq!(sets[0].values[0].meaning, "A");
    }

    #[test]
    fn test_empty_yaml_is_no_overrides() {
        assert!(parse_yaml("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        assert!(parse_yaml("ORDERS: [1, 2]").is_err());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("overrides.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(load_overrides(&path).is_err());
    }
}
