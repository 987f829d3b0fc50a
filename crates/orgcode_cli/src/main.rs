//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `orgcode_core` linkage and database bootstrap.
//! - Print every org tree in the configured database as JSON.

use orgcode_core::db::open_db;
use orgcode_core::{OrgService, SqliteOrgRepository, TimeOrderedIdSource};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DB_FILE_NAME: &str = "orgcode.sqlite3";

fn main() -> ExitCode {
    println!("orgcode_core version={}", orgcode_core::core_version());

    let db_path = resolve_db_path();
    match print_trees(&db_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("orgcode failed db_path={}: {err}", db_path.display());
            ExitCode::FAILURE
        }
    }
}

fn print_trees(db_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_db(db_path)?;
    let repo = SqliteOrgRepository::try_new(&conn)?;
    let service = OrgService::new(repo, TimeOrderedIdSource::new());
    let trees = service.get_all_trees()?;
    println!("{}", serde_json::to_string_pretty(&trees)?);
    Ok(())
}

fn resolve_db_path() -> PathBuf {
    if let Ok(raw) = std::env::var("ORGCODE_DB_PATH") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    std::env::temp_dir().join(DB_FILE_NAME)
}
