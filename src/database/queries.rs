use anyhow::Result;
use rusqlite::{params, Connection};

use crate::models::ActivityRecord;

pub fn insert_activity(conn: &Connection, record: &ActivityRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO activities
         (timestamp, url, app_name, action_name, misc_notes, action_type, risk_score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            record.timestamp,
            &record.url,
            &record.app_name,
            &record.action_name,
            &record.misc_notes,
            record.action_type.map(|t| t.as_str()),
            record.risk_score,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Every record in append order.
pub fn get_activities(conn: &Connection) -> Result<Vec<ActivityRecord>> {
    let mut stmt = conn.prepare(
        "SELECT timestamp, url, app_name, action_name, misc_notes, action_type, risk_score
         FROM activities
         ORDER BY id ASC",
    )?;

    let activities = stmt
        .query_map([], |row| {
            let action_type: Option<String> = row.get(5)?;
            Ok(ActivityRecord {
                timestamp: row.get(0)?,
                url: row.get(1)?,
                app_name: row.get(2)?,
                action_name: row.get(3)?,
                misc_notes: row.get(4)?,
                action_type: action_type.and_then(|s| s.parse().ok()),
                risk_score: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(activities)
}

pub fn count_activities(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?)
}

/// Oldest and newest record timestamps, `None` when the store is empty.
pub fn activity_bounds(conn: &Connection) -> Result<(Option<i64>, Option<i64>)> {
    Ok(conn.query_row(
        "SELECT MIN(timestamp), MAX(timestamp) FROM activities",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}
