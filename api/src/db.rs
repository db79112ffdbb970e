use pollnation_shared::{PostKind, User};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{types::Type, Connection, Row};

use crate::error::AppResult;
use crate::DbPool;

pub const MEMORY: &str = ":memory:";

/// Opens a pool on `database_url`; `:memory:` yields a single-connection pool
/// so every checkout sees the same database.
pub fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let init = |conn: &mut Connection| {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
    };

    let pool = if database_url == MEMORY {
        let manager = SqliteConnectionManager::memory().with_init(init);
        r2d2::Pool::builder().max_size(1).build(manager)?
    } else {
        let manager = SqliteConnectionManager::file(database_url).with_init(init);
        let pool = r2d2::Pool::builder().max_size(8).build(manager)?;
        pool.get()?.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        pool
    };

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            username            TEXT UNIQUE NOT NULL,
            email               TEXT UNIQUE NOT NULL,
            password_hash       TEXT NOT NULL,
            profile_picture_url TEXT NOT NULL DEFAULT '',
            bio                 TEXT NOT NULL DEFAULT '',
            is_admin            INTEGER NOT NULL DEFAULT 0,
            is_banned           INTEGER NOT NULL DEFAULT 0,
            report_count        INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            kind        TEXT NOT NULL CHECK (kind IN ('poll', 'quiz')),
            owner_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            question    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_posts_owner ON posts(owner_id);

        CREATE TABLE IF NOT EXISTS post_options (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL,
            text        TEXT NOT NULL,
            is_correct  INTEGER NOT NULL DEFAULT 0,
            explanation TEXT,
            vote_count  INTEGER NOT NULL DEFAULT 0 CHECK (vote_count >= 0)
        );
        CREATE INDEX IF NOT EXISTS idx_options_post ON post_options(post_id);

        CREATE TABLE IF NOT EXISTS votes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            post_id     INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            option_id   INTEGER NOT NULL REFERENCES post_options(id) ON DELETE CASCADE,
            is_correct  INTEGER,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, post_id)
        );
        CREATE INDEX IF NOT EXISTS idx_votes_post ON votes(post_id);

        CREATE TABLE IF NOT EXISTS comments (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id           INTEGER NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
            user_id           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content           TEXT NOT NULL,
            parent_comment_id INTEGER REFERENCES comments(id) ON DELETE SET NULL,
            created_at        TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id);

        CREATE TABLE IF NOT EXISTS reports (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            reporter_id      INTEGER REFERENCES users(id) ON DELETE SET NULL,
            reported_user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            reason           TEXT NOT NULL,
            created_at       TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    tracing::info!("database migrations complete");
    Ok(())
}

/// Runs blocking database work on the blocking pool with one pooled connection.
pub async fn interact<F, T>(pool: &DbPool, f: F) -> AppResult<T>
where
    F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        f(&mut conn)
    })
    .await?
}

/// Reads the `id, username, profile_picture_url` triple starting at column `at`.
pub fn author(row: &Row<'_>, at: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(at)?,
        username: row.get(at + 1)?,
        profile_picture_url: row.get(at + 2)?,
    })
}

pub fn post_kind(row: &Row<'_>, at: usize) -> rusqlite::Result<PostKind> {
    let raw: String = row.get(at)?;
    PostKind::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            at,
            Type::Text,
            format!("unknown post kind {raw:?}").into(),
        )
    })
}

#[cfg(test)]
pub(crate) fn test_pool() -> DbPool {
    let pool = create_pool(MEMORY).unwrap();
    run_migrations(&pool).unwrap();
    pool
}
