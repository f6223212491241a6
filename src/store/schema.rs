//! Table definitions, applied idempotently at startup.

pub(super) const STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id           TEXT PRIMARY KEY,
        phone        TEXT NOT NULL,
        name         TEXT,
        tag          TEXT,
        status       TEXT NOT NULL DEFAULT 'pending_verification',
        session_ref  TEXT,
        created_at   TEXT NOT NULL,
        updated_at   TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS campaigns (
        id                TEXT PRIMARY KEY,
        account_id        TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        name              TEXT NOT NULL,
        interval_seconds  INTEGER NOT NULL DEFAULT 86400,
        max_steps         INTEGER NOT NULL DEFAULT 3,
        active            BOOLEAN NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS campaign_steps (
        id                TEXT PRIMARY KEY,
        campaign_id       TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        step_number       INTEGER NOT NULL,
        message           TEXT NOT NULL,
        interval_seconds  INTEGER,
        UNIQUE (campaign_id, step_number)
    )",
    "CREATE TABLE IF NOT EXISTS contacts (
        id                TEXT PRIMARY KEY,
        account_id        TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        campaign_id       TEXT REFERENCES campaigns(id) ON DELETE SET NULL,
        telegram_user_id  INTEGER NOT NULL,
        access_hash       INTEGER,
        name              TEXT,
        tag               TEXT,
        replied           BOOLEAN NOT NULL DEFAULT 0,
        current_step      INTEGER NOT NULL DEFAULT 1,
        last_message_at   TEXT,
        UNIQUE (account_id, telegram_user_id)
    )",
    "CREATE TABLE IF NOT EXISTS messages_sent (
        id           TEXT PRIMARY KEY,
        account_id   TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        contact_id   TEXT NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
        step_number  INTEGER NOT NULL,
        sent_at      TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_contacts_campaign ON contacts (campaign_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_sent_contact ON messages_sent (contact_id)",
];
