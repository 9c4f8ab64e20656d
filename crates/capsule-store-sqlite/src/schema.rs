//! SQL schema for the Capsule SQLite backend.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Schemaless documents, one row each, grouped by collection.
-- Likes carry no (capsuleId, userId) uniqueness constraint.
CREATE TABLE IF NOT EXISTS documents (
    collection   TEXT NOT NULL,
    document_id  TEXT NOT NULL,
    data         TEXT NOT NULL,   -- JSON object of attributes
    created_at   TEXT NOT NULL,   -- ISO 8601 UTC; server-assigned
    PRIMARY KEY (collection, document_id)
);

CREATE TABLE IF NOT EXISTS files (
    file_id      TEXT PRIMARY KEY,
    bucket_id    TEXT NOT NULL,
    name         TEXT NOT NULL,
    mime_type    TEXT NOT NULL,
    size         INTEGER NOT NULL,
    content      BLOB NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    user_id        TEXT PRIMARY KEY,
    email          TEXT NOT NULL UNIQUE,
    name           TEXT NOT NULL DEFAULT '',
    password_hash  TEXT NOT NULL,   -- argon2 PHC string
    created_at     TEXT NOT NULL
);

-- Only a SHA-256 digest of each session secret is kept.
CREATE TABLE IF NOT EXISTS sessions (
    session_id   TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL REFERENCES users(user_id),
    secret_hash  TEXT NOT NULL UNIQUE,
    expires_at   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS documents_collection_idx ON documents(collection);
CREATE INDEX IF NOT EXISTS files_bucket_idx         ON files(bucket_id);

PRAGMA user_version = 1;
";
