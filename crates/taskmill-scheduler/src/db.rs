use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `tasks` table (idempotent) and an index covering the due-task
/// queue query (`state = ? AND next_execution <= ?`).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id              INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            title           TEXT    NOT NULL,
            type            TEXT    NOT NULL,
            state           INTEGER NOT NULL DEFAULT 1,
            execution_rules TEXT    NOT NULL,   -- JSON-encoded ExecutionRules
            cron_rules      TEXT    NOT NULL,   -- JSON-encoded CronRules (derived)
            ordering        INTEGER NOT NULL DEFAULT 0,
            priority        INTEGER NOT NULL DEFAULT 0,
            note            TEXT,
            params          TEXT    NOT NULL DEFAULT '{}',
            last_exit_code  INTEGER NOT NULL DEFAULT 0,
            last_execution  TEXT,               -- RFC 3339 UTC or NULL
            next_execution  TEXT,               -- RFC 3339 UTC or NULL
            times_executed  INTEGER NOT NULL DEFAULT 0,
            times_failed    INTEGER NOT NULL DEFAULT 0,
            locked          TEXT,               -- RFC 3339 UTC, NULL = unlocked
            created_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_tasks_queue
            ON tasks (state, next_execution);
        ",
    )?;
    Ok(())
}
