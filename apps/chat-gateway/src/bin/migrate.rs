//! Applies pending chat schema migrations.
//!
//! Usage:
//!   cargo run -p chat-gateway --bin chat-migrate
//!   cargo run -p chat-gateway --bin chat-migrate -- --test
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy). `--test`
//! targets the `<name>_test` database next to the configured one.

use std::error::Error;
use std::path::Path;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL env var is required")?;
    let target = if std::env::args().any(|arg| arg == "--test") {
        test_database_url(&database_url)
    } else {
        database_url
    };

    println!("Connecting to database...");
    let mut conn = PgConnection::establish(&target)?;

    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    if applied.is_empty() {
        println!("Schema is up to date.");
        return Ok(());
    }
    for version in &applied {
        println!("  applied {version}");
    }
    println!("{} migration(s) applied.", applied.len());
    Ok(())
}

/// Swap the database name in a connection URL for its `_test` twin,
/// keeping any query string.
fn test_database_url(database_url: &str) -> String {
    let (base, query) = match database_url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (database_url, None),
    };
    let Some((host, db_name)) = base.rsplit_once('/') else {
        return database_url.to_string();
    };
    if db_name.is_empty() || db_name.ends_with("_test") {
        return database_url.to_string();
    }

    match query {
        Some(query) => format!("{host}/{db_name}_test?{query}"),
        None => format!("{host}/{db_name}_test"),
    }
}
