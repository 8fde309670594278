//! Membership repository: CRUD for the `memberships` table.
//!
//! One row per connection. Writing a row for a connection that already has
//! one moves it to the new group and refreshes `joined_at`.

use groupcast_core::MembershipRow;
use rusqlite::{Connection, params};

use crate::errors::Result;

/// Membership repository, stateless; every method takes `&Connection`.
pub struct MembershipRepo;

impl MembershipRepo {
    /// Insert or replace the row for `connection_id`.
    pub fn upsert(conn: &Connection, connection_id: &str, group_id: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO memberships (connection_id, group_id, joined_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(connection_id) DO UPDATE SET
                 group_id = excluded.group_id,
                 joined_at = excluded.joined_at",
            params![connection_id, group_id, now],
        )?;
        Ok(())
    }

    /// Delete the row for `connection_id`. Returns whether a row existed.
    pub fn delete(conn: &Connection, connection_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM memberships WHERE connection_id = ?1",
            params![connection_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete every row. Returns the number removed.
    pub fn delete_all(conn: &Connection) -> Result<usize> {
        let removed = conn.execute("DELETE FROM memberships", [])?;
        Ok(removed)
    }

    /// Every row in the table.
    pub fn scan_all(conn: &Connection) -> Result<Vec<MembershipRow>> {
        let mut stmt = conn.prepare("SELECT connection_id, group_id FROM memberships")?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Connection ids in `group_id`, served by `idx_memberships_group`.
    pub fn members_of(conn: &Connection, group_id: &str) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT connection_id FROM memberships WHERE group_id = ?1")?;
        let ids = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    #[cfg(test)]
    fn group_of(conn: &Connection, connection_id: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;

        let group = conn
            .query_row(
                "SELECT group_id FROM memberships WHERE connection_id = ?1",
                params![connection_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(group)
    }

    /// Total number of rows.
    pub fn count(conn: &Connection) -> Result<i64> {
        let n = conn.query_row("SELECT COUNT(*) FROM memberships", [], |row| row.get(0))?;
        Ok(n)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MembershipRow> {
        Ok(MembershipRow {
            connection_id: row.get(0)?,
            group_id: row.get(1)?,
        })
    }
}
