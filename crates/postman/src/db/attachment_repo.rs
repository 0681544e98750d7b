//! Attachment repository: stored media and their links to messages.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A stored media object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRow {
    pub id: i64,
    pub origin_name: String,
    pub path: String,
    pub mime_type: Option<String>,
    pub created_at: i64,
}

impl MediaRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            origin_name: row.get("origin_name")?,
            path: row.get("path")?,
            mime_type: row.get("mime_type")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A message attachment together with the media it points at, if that still exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRow {
    pub id: i64,
    pub message_id: i64,
    pub media_id: Option<i64>,
    pub embed: Option<String>,
    pub media: Option<MediaRow>,
}

impl AttachmentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let media_id: Option<i64> = row.get("media_id")?;
        let media = match row.get::<_, Option<i64>>("m_id")? {
            Some(id) => Some(MediaRow {
                id,
                origin_name: row.get("origin_name")?,
                path: row.get("path")?,
                mime_type: row.get("mime_type")?,
                created_at: row.get("m_created_at")?,
            }),
            None => None,
        };
        Ok(Self {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            media_id,
            embed: row.get("embed")?,
            media,
        })
    }
}

/// Stores a media object and returns its id.
pub fn insert_media(
    db: &Database,
    origin_name: &str,
    path: &str,
    mime_type: Option<&str>,
    created_at: i64,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO media (origin_name, path, mime_type, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![origin_name, path, mime_type, created_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a media object by id.
pub fn find_media(db: &Database, id: i64) -> Result<Option<MediaRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM media WHERE id = ?1",
                params![id],
                MediaRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Links a media object to a message. `embed = None` makes it a regular attachment.
pub fn attach(
    db: &Database,
    message_id: i64,
    media_id: i64,
    embed: Option<&str>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO message_attachments (message_id, media_id, embed) VALUES (?1, ?2, ?3)",
            params![message_id, media_id, embed],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists a message's attachments in insertion order, joined with their media.
pub fn list_for_message(db: &Database, message_id: i64) -> Result<Vec<AttachmentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT a.id, a.message_id, a.media_id, a.embed,
                    m.id AS m_id, m.origin_name, m.path, m.mime_type, m.created_at AS m_created_at
             FROM message_attachments a
             LEFT JOIN media m ON m.id = a.media_id
             WHERE a.message_id = ?1
             ORDER BY a.id",
        )?;
        let rows = stmt
            .query_map(params![message_id], AttachmentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
