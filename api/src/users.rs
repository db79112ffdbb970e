use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pollnation_shared::{Account, Profile, UpdateProfile, User};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::extractors::{Payload, Principal};
use crate::{db, AppState};

/// Names that collide with static routes.
pub const RESERVED_USERNAMES: &[&str] = &["me", "reports", "admin"];

const MAX_BIO_LEN: usize = 500;

pub const ACCOUNT_COLUMNS: &str = "id, username, email, profile_picture_url, bio,
     is_admin, is_banned, report_count, created_at";

pub fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        profile_picture_url: row.get(3)?,
        bio: row.get(4)?,
        is_admin: row.get(5)?,
        is_banned: row.get(6)?,
        report_count: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub fn account_by_id(conn: &Connection, id: i64) -> AppResult<Account> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("User not found"))
}

pub fn user_id_by_username(conn: &Connection, username: &str) -> AppResult<i64> {
    conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        [username],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("User not found"))
}

pub fn profile(conn: &Connection, username: &str) -> AppResult<Profile> {
    conn.query_row(
        "SELECT u.id, u.username, u.profile_picture_url, u.bio, u.created_at,
                (SELECT COUNT(*) FROM posts WHERE owner_id = u.id)
         FROM users u WHERE u.username = ?1",
        [username],
        |row| {
            Ok(Profile {
                user: User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    profile_picture_url: row.get(2)?,
                },
                bio: row.get(3)?,
                created_at: row.get(4)?,
                post_count: row.get(5)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("User not found"))
}

pub fn update_profile(conn: &Connection, user_id: i64, changes: &UpdateProfile) -> AppResult<Account> {
    if let Some(bio) = &changes.bio {
        let bio = ammonia::clean(bio.trim());
        if bio.chars().count() > MAX_BIO_LEN {
            return Err(AppError::validation(format!(
                "Bio must be at most {MAX_BIO_LEN} characters"
            )));
        }
        conn.execute(
            "UPDATE users SET bio = ?2 WHERE id = ?1",
            rusqlite::params![user_id, bio],
        )?;
    }

    if let Some(url) = &changes.profile_picture_url {
        let url = url.trim();
        if !(url.is_empty() || url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::validation("Profile picture must be an http(s) URL"));
        }
        conn.execute(
            "UPDATE users SET profile_picture_url = ?2 WHERE id = ?1",
            rusqlite::params![user_id, url],
        )?;
    }

    account_by_id(conn, user_id)
}

/// Removes an account together with its posts, votes and comments.
/// Counters of options the user voted on are decremented first so they keep
/// matching the remaining vote rows; reports survive with a null reference.
pub fn delete_account(conn: &mut Connection, user_id: i64) -> AppResult<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE post_options SET vote_count = vote_count - 1
         WHERE id IN (SELECT option_id FROM votes WHERE user_id = ?1)",
        [user_id],
    )?;
    let affected = tx.execute("DELETE FROM users WHERE id = ?1", [user_id])?;
    if affected == 0 {
        return Err(AppError::not_found("User not found"));
    }
    tx.commit()?;
    Ok(())
}

// ── Handlers ──

/// GET /api/users/:username
pub async fn show(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> AppResult<Json<Profile>> {
    let profile = db::interact(&state.db, move |conn| profile(conn, &username)).await?;
    Ok(Json(profile))
}

/// PUT /api/auth/me
pub async fn update_me(
    State(state): State<AppState>,
    principal: Principal,
    Payload(changes): Payload<UpdateProfile>,
) -> AppResult<Json<Account>> {
    let account =
        db::interact(&state.db, move |conn| update_profile(conn, principal.id, &changes)).await?;
    Ok(Json(account))
}

/// DELETE /api/auth/me
pub async fn delete_me(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<StatusCode> {
    db::interact(&state.db, move |conn| delete_account(conn, principal.id)).await?;
    tracing::info!(user_id = principal.id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}
