//! Template repository: lookup of message templates by code.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw template row from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRow {
    pub id: i64,
    pub code: String,
    pub subject: String,
    pub content_text: Option<String>,
    pub content_html: Option<String>,
    pub styles: Option<String>,
    pub use_layout: bool,
    pub address: Option<String>,
    pub deleted_at: Option<i64>,
}

impl Default for TemplateRow {
    fn default() -> Self {
        Self {
            id: 0,
            code: String::new(),
            subject: String::new(),
            content_text: None,
            content_html: None,
            styles: None,
            use_layout: true,
            address: None,
            deleted_at: None,
        }
    }
}

impl TemplateRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            subject: row.get("subject")?,
            content_text: row.get("content_text")?,
            content_html: row.get("content_html")?,
            styles: row.get("styles")?,
            use_layout: row.get("use_layout")?,
            address: row.get("address")?,
            deleted_at: row.get("deleted_at")?,
        })
    }
}

/// Inserts a new template row and returns its id.
pub fn insert(db: &Database, template: &TemplateRow) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO templates (code, subject, content_text, content_html, styles,
             use_layout, address, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                template.code,
                template.subject,
                template.content_text,
                template.content_html,
                template.styles,
                template.use_layout,
                template.address,
                template.deleted_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a live (not deleted) template by code.
pub fn find_by_code(db: &Database, code: &str) -> Result<Option<TemplateRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM templates WHERE code = ?1 AND deleted_at IS NULL",
                params![code],
                TemplateRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}
