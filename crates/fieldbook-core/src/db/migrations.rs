//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;
    if version >= CURRENT_VERSION {
        return Ok(());
    }

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    tracing::debug!(from = version, to = CURRENT_VERSION, "Applied schema migrations");
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|v| v != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: fields, images, blobs, outbox
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS fields (
            service_id TEXT NOT NULL,
            category TEXT NOT NULL,
            template_id INTEGER NOT NULL,
            visual_id TEXT,
            temp_visual_id TEXT,
            is_selected INTEGER NOT NULL DEFAULT 0,
            answer TEXT NOT NULL DEFAULT '',
            other_value TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL,
            template_name TEXT NOT NULL,
            template_text TEXT NOT NULL DEFAULT '',
            dropdown_options TEXT NOT NULL DEFAULT '[]',
            photo_count INTEGER NOT NULL DEFAULT 0,
            is_hidden INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (service_id, category, template_id)
        );
        CREATE INDEX IF NOT EXISTS idx_fields_visual ON fields(visual_id);
        CREATE INDEX IF NOT EXISTS idx_fields_temp ON fields(temp_visual_id);

        CREATE TABLE IF NOT EXISTS blobs (
            blob_id TEXT PRIMARY KEY,
            bytes BLOB NOT NULL,
            size_bytes INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS images (
            image_id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            service_id TEXT NOT NULL,
            local_blob_id TEXT REFERENCES blobs(blob_id),
            remote_key TEXT,
            attach_id TEXT,
            caption TEXT NOT NULL DEFAULT '',
            drawings BLOB,
            status TEXT NOT NULL DEFAULT 'local',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_images_entity ON images(entity_id);
        CREATE INDEX IF NOT EXISTS idx_images_service ON images(service_id);

        CREATE TABLE IF NOT EXISTS outbox (
            request_id TEXT PRIMARY KEY,
            op TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            temp_id TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_temp ON outbox(temp_id);

        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;
    Ok(())
}

/// Migration to version 2: identity map and per-entity outbox ordering
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS identity_map (
            temp_id TEXT PRIMARY KEY,
            real_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_identity_real ON identity_map(real_id);

        ALTER TABLE outbox ADD COLUMN depends_on_temp_id TEXT;

        INSERT INTO schema_version (version) VALUES (2);
        COMMIT;",
    )?;
    Ok(())
}

/// Migration to version 3: local blob pruning gate
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        ALTER TABLE images ADD COLUMN remote_loaded_in_ui INTEGER NOT NULL DEFAULT 0;

        INSERT INTO schema_version (version) VALUES (3);
        COMMIT;",
    )?;
    Ok(())
}
