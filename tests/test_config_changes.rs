//! Configuration reads and writes: `/setconfig` replies, typed round-trips and the table layout.

mod common;

use common::{gateway_for, harness, texts, ScriptedTransport};
use whitelist_config_bot::domain::schema::{ConfigValue, KEY_COLUMN};
use whitelist_config_bot::storage::{MemoryStore, StoredValue};
use whitelist_config_bot::SchemaRegistry;

#[tokio::test]
async fn setconfig_reports_successes_and_failures_separately() {
    let mut h = harness(&[]);
    h.gateway.lock().await.insert_user("5").await.unwrap();

    let mut transport = ScriptedTransport::new();
    let set = transport.command("5", "bob", "/setconfig max_qty=7 bogus=1 loop_count=notanumber");
    let only_good = transport.command("5", "bob", "/setconfig   zip_output=True");
    let nothing = transport.command("5", "bob", "/setconfig");

    h.dispatcher.run(&mut transport, std::future::pending()).await;

    assert_eq!(
        texts(&set.await.unwrap()),
        vec![
            "Successfully set configuration:\n\nmax_qty set to 7\n".to_string(),
            concat!(
                "Failed to set:\n\n",
                "- bogus=1 (Error: bogus does not match any available config settings in database.)\n",
                "- loop_count=notanumber (Error: 'notanumber' is not a valid integer value)\n",
            )
            .to_string(),
        ]
    );
    assert_eq!(
        texts(&only_good.await.unwrap()),
        vec!["Successfully set configuration:\n\nzip_output set to true\n"]
    );
    assert!(nothing.await.unwrap().is_empty());

    let record = h.gateway.lock().await.read_config("5").await.unwrap();
    assert_eq!(record.get("max_qty"), Some(&ConfigValue::Integer(7)));
    assert_eq!(record.get("loop_count"), Some(&ConfigValue::Integer(10_000)));
    assert_eq!(record.get("zip_output"), Some(&ConfigValue::Boolean(true)));
}

#[tokio::test]
async fn every_semantic_type_round_trips() {
    let store = MemoryStore::with_table(&SchemaRegistry::standard());
    let mut gateway = gateway_for(&store);
    gateway.insert_user("5").await.unwrap();

    let writes = [
        ("contract_type", ConfigValue::Text("future".into())),
        ("loop_count", ConfigValue::Integer(-3)),
        ("strike_percentage", ConfigValue::Float(0.125)),
        ("zip_output", ConfigValue::Boolean(true)),
    ];
    for (field, value) in writes.iter().cloned() {
        let refreshed = gateway.write_field("5", field, value.clone()).await.unwrap();
        assert_eq!(refreshed.get(field), Some(&value));
    }

    let record = gateway.read_config("5").await.unwrap();
    for (field, value) in &writes {
        assert_eq!(record.get(field), Some(value));
    }

    // Booleans are stored as single bits.
    assert_eq!(store.stored_value("5", "zip_output"), Some(StoredValue::Bit(1)));
    gateway
        .write_field("5", "zip_output", ConfigValue::Boolean(false))
        .await
        .unwrap();
    assert_eq!(store.stored_value("5", "zip_output"), Some(StoredValue::Bit(0)));
}

#[tokio::test]
async fn writes_to_missing_users_fail() {
    let store = MemoryStore::with_table(&SchemaRegistry::standard());
    let mut gateway = gateway_for(&store);

    let err = gateway
        .write_field("404", "max_qty", ConfigValue::Integer(1))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "User (404) not found in database.");
    assert_eq!(store.row_writes(), 0);
}

#[tokio::test]
async fn described_columns_match_the_registry() {
    let registry = SchemaRegistry::standard();
    let store = MemoryStore::with_table(&registry);
    let mut gateway = gateway_for(&store);

    let columns = gateway.describe_columns().await.unwrap();
    assert_eq!(columns[0].name, KEY_COLUMN);
    let names: Vec<&str> = columns[1..].iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, registry.names());
    gateway.verify_schema().await.unwrap();
}

#[tokio::test]
async fn missing_table_is_created_on_request() {
    let store = MemoryStore::new();
    let mut gateway = gateway_for(&store);

    assert!(gateway.verify_schema().await.is_err());
    assert!(gateway.create_table_if_missing().await.unwrap());
    gateway.verify_schema().await.unwrap();
    gateway.insert_user("5").await.unwrap();
}
