use rusqlite::Connection;

use crate::error::Result;

/// Initialise the conversations and turns tables.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            user_id         TEXT NOT NULL,
            title           TEXT,
            total_tokens    INTEGER NOT NULL DEFAULT 0,
            summary_context TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            last_message_at TEXT NOT NULL,
            deleted_at      TEXT,
            archived_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, last_message_at DESC)
            WHERE deleted_at IS NULL AND archived_at IS NULL;

        CREATE TABLE IF NOT EXISTS turns (
            id                     TEXT PRIMARY KEY,
            user_id                TEXT,
            session_id             TEXT,
            conversation_id        TEXT,
            user_message           TEXT NOT NULL,
            assistant_response     TEXT,
            message_length         INTEGER NOT NULL,
            response_length        INTEGER,
            input_tokens           INTEGER,
            output_tokens          INTEGER,
            tokens_used            INTEGER,
            actual_cost_millicents INTEGER,
            tools_used             TEXT,
            success                INTEGER NOT NULL,
            error_message          TEXT,
            duration_ms            INTEGER NOT NULL,
            created_at             TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_turns_conversation
            ON turns(conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_turns_user
            ON turns(user_id, created_at DESC);",
    )?;
    Ok(())
}
