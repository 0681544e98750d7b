//! Message repository: CRUD operations for the `messages` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw message row from the database. Timestamps are Unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRow {
    pub id: i64,
    pub code: String,
    pub subject: String,
    pub content_text: Option<String>,
    pub content_html: Option<String>,
    pub address: Option<String>,
    pub try_message_id: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
    pub scheduled_at: Option<i64>,
    pub executed_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub deleted_at: Option<i64>,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            subject: row.get("subject")?,
            content_text: row.get("content_text")?,
            content_html: row.get("content_html")?,
            address: row.get("address")?,
            try_message_id: row.get("try_message_id")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            scheduled_at: row.get("scheduled_at")?,
            executed_at: row.get("executed_at")?,
            sent_at: row.get("sent_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

/// Query filter parameters for message listing.
#[derive(Debug, Default, Clone)]
pub struct MessageFilter {
    pub id: Option<i64>,
    pub code: Option<String>,
    /// Restricts to one retry chain: the root and every retry pointing at it.
    pub try_message_id: Option<i64>,
    pub only_not_sent: bool,
    /// Space separated tokens, each matched against id, subject, bodies and address.
    pub search: Option<String>,
    pub include_deleted: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Outcome of [`insert_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryInsert {
    /// The retry was stored under this id.
    Inserted(i64),
    /// The chain already holds this many live attempts; nothing was stored.
    LimitReached(u64),
}

const INSERT_SQL: &str = "INSERT INTO messages (code, subject, content_text, content_html, address,
     try_message_id, error, created_at, scheduled_at, executed_at, sent_at, deleted_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

fn insert_on(conn: &rusqlite::Connection, msg: &MessageRow) -> Result<i64, DatabaseError> {
    conn.execute(
        INSERT_SQL,
        params![
            msg.code,
            msg.subject,
            msg.content_text,
            msg.content_html,
            msg.address,
            msg.try_message_id,
            msg.error,
            msg.created_at,
            msg.scheduled_at,
            msg.executed_at,
            msg.sent_at,
            msg.deleted_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn count_chain_on(conn: &rusqlite::Connection, root_id: i64) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM messages
         WHERE (id = ?1 OR try_message_id = ?1) AND deleted_at IS NULL",
        params![root_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

/// Inserts a new message row and returns its id. The row's `id` is ignored.
pub fn insert(db: &Database, msg: &MessageRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| insert_on(conn, msg))
}

/// Updates a message that has not been sent yet.
///
/// `code` and `created_at` are never overwritten. Returns `false` when the
/// row does not exist or already carries `sent_at`.
pub fn update(db: &Database, msg: &MessageRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE messages SET subject=?2, content_text=?3, content_html=?4, address=?5,
             try_message_id=?6, error=?7, scheduled_at=?8, executed_at=?9, sent_at=?10
             WHERE id=?1 AND sent_at IS NULL",
            params![
                msg.id,
                msg.subject,
                msg.content_text,
                msg.content_html,
                msg.address,
                msg.try_message_id,
                msg.error,
                msg.scheduled_at,
                msg.executed_at,
                msg.sent_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Finds a message by id, including soft-deleted ones.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<MessageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM messages WHERE id = ?1",
                params![id],
                MessageRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds a message by its public code, including soft-deleted ones.
pub fn find_by_code(db: &Database, code: &str) -> Result<Option<MessageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM messages WHERE code = ?1",
                params![code],
                MessageRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

fn escape_like(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len() + 2);
    escaped.push('%');
    for c in token.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Queries messages with filters, returning (rows, total_count).
pub fn query(
    db: &Database,
    filter: &MessageFilter,
) -> Result<(Vec<MessageRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(id) = filter.id {
            conditions.push(format!("id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(id));
        }
        if let Some(ref code) = filter.code {
            conditions.push(format!("code = ?{}", param_values.len() + 1));
            param_values.push(Box::new(code.clone()));
        }
        if let Some(root) = filter.try_message_id {
            let n = param_values.len() + 1;
            conditions.push(format!("(id = ?{n} OR try_message_id = ?{n})"));
            param_values.push(Box::new(root));
        }
        if filter.only_not_sent {
            conditions.push("sent_at IS NULL".to_string());
        }
        if !filter.include_deleted {
            conditions.push("deleted_at IS NULL".to_string());
        }
        if let Some(ref search) = filter.search {
            let mut alternatives = Vec::new();
            for token in search.split(' ').filter(|t| !t.is_empty()) {
                let n = param_values.len() + 1;
                alternatives.push(format!(
                    "CAST(id AS TEXT) LIKE ?{n} ESCAPE '\\' OR subject LIKE ?{n} ESCAPE '\\' \
                     OR content_text LIKE ?{n} ESCAPE '\\' OR content_html LIKE ?{n} ESCAPE '\\' \
                     OR address LIKE ?{n} ESCAPE '\\'"
                ));
                param_values.push(Box::new(escape_like(token)));
            }
            if !alternatives.is_empty() {
                conditions.push(format!("({})", alternatives.join(" OR ")));
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM messages {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Out of range values saturate instead of wrapping negative.
        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset.unwrap_or(0)).unwrap_or(i64::MAX);
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM messages {} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<MessageRow> = stmt
            .query_map(params_ref.as_slice(), MessageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts the live attempts of a retry chain, the root included.
pub fn count_chain(db: &Database, root_id: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| count_chain_on(conn, root_id))
}

/// Stores a retry attempt for the chain rooted at `root_id`.
///
/// The chain count and the insert run in one transaction. When
/// `copy_attachments_from` is set, that message's attachment rows are
/// duplicated onto the new attempt in the same transaction.
pub fn insert_retry(
    db: &Database,
    root_id: i64,
    max_tries: u32,
    msg: &MessageRow,
    copy_attachments_from: Option<i64>,
) -> Result<RetryInsert, DatabaseError> {
    db.with_transaction(|tx| {
        let count = count_chain_on(tx, root_id)?;
        if count >= u64::from(max_tries) {
            return Ok(RetryInsert::LimitReached(count));
        }

        let id = insert_on(tx, msg)?;
        if let Some(source) = copy_attachments_from {
            tx.execute(
                "INSERT INTO message_attachments (message_id, media_id, embed)
                 SELECT ?1, media_id, embed FROM message_attachments
                 WHERE message_id = ?2 ORDER BY id",
                params![id, source],
            )?;
        }

        Ok(RetryInsert::Inserted(id))
    })
}

/// Marks a message as deleted. Returns `false` if it was already deleted or missing.
pub fn soft_delete(db: &Database, id: i64, deleted_at: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE messages SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, deleted_at],
        )?;
        Ok(changed == 1)
    })
}

/// Clears the deletion mark of a message.
pub fn restore(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE messages SET deleted_at = NULL WHERE id = ?1 AND deleted_at IS NOT NULL",
            params![id],
        )?;
        Ok(changed == 1)
    })
}

/// Returns `(id, scheduled_at)` of every live message that was neither sent
/// nor failed, oldest first.
pub fn find_pending(db: &Database) -> Result<Vec<(i64, Option<i64>)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, scheduled_at FROM messages
             WHERE sent_at IS NULL AND error IS NULL AND deleted_at IS NULL
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
