use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn shx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("shx");
    path
}

const SCHEMA_DUMP: &str = r#"{
  "tables": [
    {
      "name": "customers",
      "owner": "SALES",
      "comment": "People and companies that place orders",
      "primary_key": ["id"],
      "columns": [
        { "name": "id", "data_type": "NUMBER", "nullable": false },
        { "name": "email", "data_type": "VARCHAR2(200)", "comment": "Login address" },
        { "name": "tier", "data_type": "CHAR(1)" }
      ]
    },
    {
      "name": "orders",
      "owner": "SALES",
      "comment": "Customer orders",
      "primary_key": ["id"],
      "row_count": 1200,
      "columns": [
        { "name": "id", "data_type": "NUMBER", "nullable": false },
        { "name": "customer_id", "data_type": "NUMBER", "nullable": false },
        { "name": "status", "data_type": "NUMBER(1)", "comment": "Workflow state" },
        { "name": "created_at", "data_type": "DATE" }
      ]
    },
    {
      "name": "order_items",
      "owner": "SALES",
      "comment": "Line items of an order",
      "primary_key": ["id"],
      "columns": [
        { "name": "id", "data_type": "NUMBER", "nullable": false },
        { "name": "order_id", "data_type": "NUMBER", "nullable": false },
        { "name": "quantity", "data_type": "NUMBER" }
      ]
    },
    {
      "name": "audit_log",
      "comment": "Unrelated audit trail",
      "primary_key": ["id"],
      "columns": [
        { "name": "id", "data_type": "NUMBER", "nullable": false },
        { "name": "contact_email", "data_type": "VARCHAR2(200)" }
      ]
    }
  ],
  "foreign_keys": [
    { "source_table": "order_items", "source_columns": ["order_id"], "target_table": "orders", "target_columns": ["id"], "constraint_name": "fk_items_order" },
    { "source_table": "orders", "source_columns": ["customer_id"], "target_table": "customers", "target_columns": ["id"], "constraint_name": "fk_orders_customer" }
  ],
  "check_constraints": [
    { "table_name": "orders", "condition": "status IN (0, 1, 2, 9)" }
  ],
  "enums": [
    { "table_name": "customers", "column_name": "tier", "values": [ { "code": "G", "meaning": "Gold Member" }, { "code": "S", "meaning": "Silver" } ] }
  ]
}"#;

const SMALL_DUMP: &str = r#"{
  "tables": [
    { "name": "invoices", "primary_key": ["id"], "columns": [ { "name": "id", "data_type": "NUMBER" } ] }
  ]
}"#;

const OVERRIDES: &str = r#"
ORDERS:
  STATUS:
    - { code: 0, meaning: Draft }
    - { code: 1, meaning: Pending }
    - { code: 2, meaning: Approved }
    - { code: 9, meaning: Cancelled }
CUSTOMERS:
  TIER:
    - { code: G, meaning: Gold }
"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    fs::write(root.join("schema.json"), SCHEMA_DUMP).unwrap();
    fs::write(root.join("small.json"), SMALL_DUMP).unwrap();
    fs::write(config_dir.join("enums.yaml"), OVERRIDES).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/shx.sqlite"

[retrieval]
default_limit = 5

[embedding]
provider = "hash"
dims = 256

[server]
bind = "127.0.0.1:7342"
"#,
        root.display()
    );

    let config_path = config_dir.join("shx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn root_of(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().to_path_buf()
}

fn run_shx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = shx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run shx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Init and ingest the full dump with overrides.
fn ingest_full(config_path: &Path) -> String {
    let root = root_of(config_path);
    let source = format!("json:{}", root.join("schema.json").display());
    let overrides = root.join("config").join("enums.yaml");
    run_shx(config_path, &["init"]);
    let (stdout, stderr, success) = run_shx(
        config_path,
        &[
            "ingest",
            "--source",
            &source,
            "--overrides",
            overrides.to_str().unwrap(),
        ],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

fn parse_json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("not JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_creates_snapshot() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_shx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(root_of(&config_path).join("data/shx.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_shx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_shx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_json_source() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = ingest_full(&config_path);
    assert!(stdout.contains("tables: 4"), "{}", stdout);
    assert!(stdout.contains("columns: 12"), "{}", stdout);
    assert!(stdout.contains("foreign keys: 2"), "{}", stdout);
    assert!(stdout.contains("enum columns: 2"), "{}", stdout);
    // 4 table chunks + 12 column chunks.
    assert!(stdout.contains("chunks embedded: 16"), "{}", stdout);
    assert!(stdout.ends_with("ok\n"), "{}", stdout);
}

#[test]
fn test_ingest_reports_enum_conflict() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = ingest_full(&config_path);
    // CUSTOMERS.TIER 'G' is "Gold Member" in the dump and "Gold" in the
    // overrides; ORDERS.STATUS CHECK codes carry no meanings to conflict with.
    assert!(stdout.contains("conflicts: 1"), "{}", stdout);
    assert!(stdout.contains("CUSTOMERS.TIER code G"), "{}", stdout);
}

#[test]
fn test_ingest_twice_embeds_nothing_new() {
    let (_tmp, config_path) = setup_test_env();

    ingest_full(&config_path);
    let stdout = ingest_full(&config_path);
    assert!(stdout.contains("chunks embedded: 0"), "{}", stdout);
    assert!(stdout.contains("chunks unchanged: 16"), "{}", stdout);
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    let source = format!("json:{}", root_of(&config_path).join("schema.json").display());

    run_shx(&config_path, &["init"]);
    let (stdout, _, success) = run_shx(&config_path, &["ingest", "--source", &source, "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("chunks to embed: 16"), "{}", stdout);

    let (_, stderr, success) = run_shx(&config_path, &["table", "ORDERS"]);
    assert!(!success);
    assert!(stderr.contains("not_found"), "{}", stderr);
}

#[test]
fn test_ingest_unknown_source_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_shx(&config_path, &["init"]);
    let (_, stderr, success) = run_shx(&config_path, &["ingest", "--source", "mysql://nowhere"]);
    assert!(!success);
    assert!(stderr.contains("unrecognized source"), "{}", stderr);
}

#[test]
fn test_ingest_missing_dump_fails_without_writing() {
    let (_tmp, config_path) = setup_test_env();

    ingest_full(&config_path);
    let (_, _, success) = run_shx(&config_path, &["ingest", "--source", "json:/nonexistent/dump.json", "--clear"]);
    assert!(!success);

    // The failed clear run must not have dropped anything.
    let (stdout, _, success) = run_shx(&config_path, &["table", "ORDERS"]);
    assert!(success);
    assert_eq!(parse_json(&stdout)["table_name"], "ORDERS");
}

#[test]
fn test_incremental_keeps_tables_and_clear_drops_them() {
    let (_tmp, config_path) = setup_test_env();
    let small = format!("json:{}", root_of(&config_path).join("small.json").display());

    ingest_full(&config_path);

    let (_, _, success) = run_shx(&config_path, &["ingest", "--source", &small]);
    assert!(success);
    let (_, _, orders_kept) = run_shx(&config_path, &["table", "ORDERS"]);
    assert!(orders_kept, "incremental ingest must not delete ORDERS");
    let (_, _, invoices_added) = run_shx(&config_path, &["table", "INVOICES"]);
    assert!(invoices_added);

    let (_, _, success) = run_shx(&config_path, &["ingest", "--source", &small, "--clear"]);
    assert!(success);
    let (_, _, orders_kept) = run_shx(&config_path, &["table", "ORDERS"]);
    assert!(!orders_kept, "clear ingest must drop ORDERS");
}

#[test]
fn test_enum_values_follow_override_order() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, stderr, success) = run_shx(&config_path, &["enums", "orders", "status"]);
    assert!(success, "{}", stderr);
    let result = parse_json(&stdout);
    let pairs: Vec<(String, String)> = result["values"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| {
            (
                v["code"].as_str().unwrap().to_string(),
                v["meaning"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("0".to_string(), "Draft".to_string()),
            ("1".to_string(), "Pending".to_string()),
            ("2".to_string(), "Approved".to_string()),
            ("9".to_string(), "Cancelled".to_string()),
        ]
    );
    assert_eq!(result["source"], "merged");
}

#[test]
fn test_override_wins_and_extracted_codes_survive() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, _, success) = run_shx(&config_path, &["enums", "CUSTOMERS", "TIER"]);
    assert!(success);
    let result = parse_json(&stdout);
    assert_eq!(result["values"][0]["code"], "G");
    assert_eq!(result["values"][0]["meaning"], "Gold");
    assert_eq!(result["values"][1]["code"], "S");
    assert_eq!(result["values"][1]["meaning"], "Silver");
}

#[test]
fn test_find_join_path_scenario() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, _, success) = run_shx(&config_path, &["path", "ORDER_ITEMS", "CUSTOMERS"]);
    assert!(success);
    let result = parse_json(&stdout);
    assert_eq!(result["found"], true);
    assert_eq!(result["hops"], 2);
    assert_eq!(
        result["path"],
        serde_json::json!(["ORDER_ITEMS", "ORDERS", "CUSTOMERS"])
    );

    let (stdout, _, success) = run_shx(
        &config_path,
        &["path", "CUSTOMERS", "ORDER_ITEMS", "--max-hops", "1"],
    );
    assert!(success, "no path is an answer, not a failure");
    assert_eq!(parse_json(&stdout)["found"], false);
}

#[test]
fn test_find_join_path_same_table_is_empty() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, _, success) = run_shx(&config_path, &["path", "orders", "ORDERS"]);
    assert!(success);
    let result = parse_json(&stdout);
    assert_eq!(result["hops"], 0);
    assert_eq!(result["path"], serde_json::json!(["ORDERS"]));
}

#[test]
fn test_find_join_path_unknown_table() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (_, stderr, success) = run_shx(&config_path, &["path", "ORDERS", "SHIPMENTS"]);
    assert!(!success);
    assert!(stderr.contains("unknown_table"), "{}", stderr);
}

#[test]
fn test_join_pattern() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, _, success) = run_shx(&config_path, &["join", "orders", "order_items"]);
    assert!(success);
    let result = parse_json(&stdout);
    assert_eq!(result["found"], true);
    assert_eq!(
        result["relationships"][0]["join_condition"],
        "ORDER_ITEMS.ORDER_ID = ORDERS.ID"
    );

    let (stdout, _, success) = run_shx(&config_path, &["join", "customers", "audit_log"]);
    assert!(success);
    assert_eq!(parse_json(&stdout)["found"], false);
}

#[test]
fn test_columns_exact_match_first() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, _, success) = run_shx(&config_path, &["columns", "email"]);
    assert!(success);
    let result = parse_json(&stdout);
    assert_eq!(result["results"][0]["table_name"], "CUSTOMERS");
    assert_eq!(result["results"][0]["column_name"], "EMAIL");
    assert_eq!(result["results"][0]["match_type"], "exact");
    assert_eq!(result["results"][1]["column_name"], "CONTACT_EMAIL");
    assert_eq!(result["results"][1]["match_type"], "substring");
}

#[test]
fn test_columns_type_filter() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, _, success) = run_shx(&config_path, &["columns", "created", "--type", "date"]);
    assert!(success);
    let result = parse_json(&stdout);
    for hit in result["results"].as_array().unwrap() {
        assert!(hit["data_type"].as_str().unwrap().contains("DATE"));
    }
    assert_eq!(result["results"][0]["column_name"], "CREATED_AT");
}

#[test]
fn test_search_schema() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, stderr, success) = run_shx(&config_path, &["search", "customer orders"]);
    assert!(success, "{}", stderr);
    let result = parse_json(&stdout);
    assert!(result["result_count"].as_u64().unwrap() <= 5);
    let tables: Vec<&str> = result["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["table_name"].as_str().unwrap())
        .collect();
    assert!(tables.contains(&"ORDERS"), "{:?}", tables);
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (first, _, _) = run_shx(&config_path, &["search", "line items quantity"]);
    let (second, _, _) = run_shx(&config_path, &["search", "line items quantity"]);
    assert_eq!(first, second);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (_, stderr, success) = run_shx(&config_path, &["search", "   "]);
    assert!(!success);
    assert!(stderr.contains("bad_request"), "{}", stderr);
}

#[test]
fn test_unknown_table_suggests_names() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (_, stderr, success) = run_shx(&config_path, &["table", "ORDER"]);
    assert!(!success);
    assert!(stderr.contains("not_found"), "{}", stderr);
    assert!(stderr.contains("ORDER_ITEMS"), "{}", stderr);
}

#[test]
fn test_stats_after_ingest() {
    let (_tmp, config_path) = setup_test_env();
    ingest_full(&config_path);

    let (stdout, _, success) = run_shx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Tables:        4"), "{}", stdout);
    assert!(stdout.contains("Embedded:      16 / 16"), "{}", stdout);
    assert!(stdout.contains("hash"), "{}", stdout);
}

#[test]
fn test_query_before_ingest_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_shx(&config_path, &["table", "ORDERS"]);
    assert!(!success);
    assert!(stderr.contains("Snapshot not found"), "{}", stderr);
}
