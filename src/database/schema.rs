use anyhow::Result;
use rusqlite::Connection;

pub fn create_tables(conn: &Connection) -> Result<()> {
    // Insertion order (id) is the order of the activity sequence.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            url TEXT NOT NULL DEFAULT '',
            app_name TEXT NOT NULL DEFAULT '',
            action_name TEXT NOT NULL DEFAULT '',
            misc_notes TEXT NOT NULL DEFAULT '',
            action_type TEXT,
            risk_score REAL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_timestamp ON activities(timestamp)",
        [],
    )?;

    Ok(())
}
