use std::sync::Arc;

use whitelist_config_bot::domain::access::AdministratorSet;
use whitelist_config_bot::domain::schema::{SchemaRegistry, KEY_COLUMN};
use whitelist_config_bot::infra::config::{Settings, StoreBackend};
use whitelist_config_bot::PersistenceGateway;

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight -- [--create-table-if-missing] [--add-missing-columns]\n\
         \n\
         Requires env vars:\n\
           DATABASE_URL (unless STORE_BACKEND=memory), DOCUMENTATION_LINK, DEVELOPER_CONTACT\n\
         Optional:\n\
           USERS_TABLE, ADMINISTRATORS_FILE, DB_CONNECT_ATTEMPTS, DB_CONNECT_DELAY_SECS\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }
    if let Some(unknown) = args
        .iter()
        .find(|a| *a != "--create-table-if-missing" && *a != "--add-missing-columns")
    {
        eprintln!("Unknown argument: {}", unknown);
        usage_and_exit();
    }
    let create_table = args.iter().any(|a| a == "--create-table-if-missing");
    let add_columns = args.iter().any(|a| a == "--add-missing-columns");

    let settings = Settings::from_env()?;
    let schema = Arc::new(SchemaRegistry::standard());

    println!("> Preflight:");
    match &settings.store {
        StoreBackend::Postgres { .. } => println!("  STORE_BACKEND=postgres"),
        StoreBackend::Memory => println!("  STORE_BACKEND=memory (nothing persists)"),
    }
    println!("  USERS_TABLE={}", settings.users_table);

    let admins = AdministratorSet::load(&settings.administrators_file)?;
    println!(
        "  Administrators: {} (from {})",
        admins.len(),
        settings.administrators_file.display()
    );
    if admins.is_empty() {
        eprintln!("  Warning: no administrators configured; alerts will reach nobody.");
    }

    let connector = settings.connector(&schema)?;
    let mut gateway = PersistenceGateway::new(connector, schema.clone(), settings.retry.clone());
    gateway.connect().await?;
    println!("  Store connection OK.");

    if create_table {
        if gateway.create_table_if_missing().await? {
            println!("  Created table '{}'.", settings.users_table);
        } else {
            println!("  Table '{}' already exists.", settings.users_table);
        }
    }

    let columns = gateway.describe_columns().await?;
    if columns.is_empty() {
        anyhow::bail!(
            "table '{}' does not exist (re-run with --create-table-if-missing)",
            settings.users_table
        );
    }
    println!("  Live columns:");
    for column in &columns {
        println!("    {} {}", column.name, column.declared_type);
    }

    if add_columns {
        let added = gateway.add_missing_columns().await?;
        if added.is_empty() {
            println!("  No columns missing.");
        }
        for name in added {
            println!("  Added column '{}'.", name);
        }
    }

    match gateway.verify_schema().await {
        Ok(()) => {
            println!(
                "  Schema OK: {} + {} configuration fields.",
                KEY_COLUMN,
                schema.fields().len()
            );
        }
        Err(e) => {
            eprintln!("  Schema mismatch: {}", e);
            if !add_columns {
                eprintln!("  (re-run with --add-missing-columns if declared fields were appended)");
            }
            std::process::exit(1);
        }
    }

    let whitelisted = gateway.list_whitelisted_ids().await?;
    println!("  Whitelisted users: {}", whitelisted.len());
    println!("> Preflight OK.");
    Ok(())
}
