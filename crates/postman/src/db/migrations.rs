//! Schema versioning.
//!
//! Each step in [`STEPS`] is applied once, inside its own transaction, and
//! recorded in `_migrations`.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "messages",
        sql: include_str!("sql/001_create_messages.sql"),
    },
    Step {
        version: 2,
        name: "templates",
        sql: include_str!("sql/002_create_templates.sql"),
    },
    Step {
        version: 3,
        name: "media",
        sql: include_str!("sql/003_create_media.sql"),
    },
    Step {
        version: 4,
        name: "message_attachments",
        sql: include_str!("sql/004_create_message_attachments.sql"),
    },
];

pub fn latest_version() -> u32 {
    STEPS.last().map_or(0, |s| s.version)
}

pub fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row("SELECT IFNULL(MAX(version), 0) FROM _migrations", [], |r| r.get(0))?)
}

/// Brings the schema up to [`latest_version`]. Returns how many steps ran.
pub fn migrate(conn: &mut Connection) -> Result<usize, DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )?;

    let found = current_version(conn)?;
    let supported = latest_version();
    if found > supported {
        return Err(DatabaseError::SchemaTooNew { found, supported });
    }

    let mut applied = 0;
    for step in STEPS.iter().filter(|s| s.version > found) {
        log::info!("Applying schema step {} ({})", step.version, step.name);

        let tx = conn.transaction()?;
        tx.execute_batch(step.sql).map_err(|source| DatabaseError::Migration {
            version: step.version,
            name: step.name,
            source,
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )?;
        tx.commit()?;
        applied += 1;
    }

    Ok(applied)
}
