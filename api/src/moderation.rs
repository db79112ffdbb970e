use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pollnation_shared::{Account, CreateReport, Report, User};
use rusqlite::{Connection, OptionalExtension};

use crate::error::{AppError, AppResult};
use crate::extractors::{Admin, Payload, Principal};
use crate::users::{account_by_id, account_from_row, ACCOUNT_COLUMNS};
use crate::{db, AppState};

const MAX_REASON_LEN: usize = 1000;

const REPORT_SELECT: &str = "SELECT r.id, r.reason, r.created_at,
            a.id, a.username, a.profile_picture_url,
            b.id, b.username, b.profile_picture_url
     FROM reports r
     LEFT JOIN users a ON a.id = r.reporter_id
     LEFT JOIN users b ON b.id = r.reported_user_id";

fn report_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    let maybe_user = |at: usize| -> rusqlite::Result<Option<User>> {
        let id: Option<i64> = row.get(at)?;
        match id {
            Some(_) => db::author(row, at).map(Some),
            None => Ok(None),
        }
    };
    Ok(Report {
        id: row.get(0)?,
        reason: row.get(1)?,
        created_at: row.get(2)?,
        reporter: maybe_user(3)?,
        reported_user: maybe_user(6)?,
    })
}

/// Files a report and bumps the reported user's counter in one transaction.
pub fn submit_report(
    conn: &mut Connection,
    reporter_id: i64,
    payload: &CreateReport,
) -> AppResult<Report> {
    if payload.reported_user_id == reporter_id {
        return Err(AppError::validation("You cannot report yourself"));
    }
    let reason = ammonia::clean(payload.reason.trim());
    if reason.trim().is_empty() {
        return Err(AppError::validation("A reason is required"));
    }
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(AppError::validation(format!(
            "Reason must be at most {MAX_REASON_LEN} characters"
        )));
    }

    let tx = conn.transaction()?;
    let bumped = tx.execute(
        "UPDATE users SET report_count = report_count + 1 WHERE id = ?1",
        [payload.reported_user_id],
    )?;
    if bumped == 0 {
        return Err(AppError::not_found("User not found"));
    }
    tx.execute(
        "INSERT INTO reports (reporter_id, reported_user_id, reason) VALUES (?1, ?2, ?3)",
        rusqlite::params![reporter_id, payload.reported_user_id, reason],
    )?;
    let id = tx.last_insert_rowid();
    let report = tx.query_row(
        &format!("{REPORT_SELECT} WHERE r.id = ?1"),
        [id],
        report_from_row,
    )?;
    tx.commit()?;
    Ok(report)
}

pub fn list_reports(conn: &Connection) -> AppResult<Vec<Report>> {
    let mut stmt = conn.prepare(&format!("{REPORT_SELECT} ORDER BY r.created_at DESC, r.id DESC"))?;
    let reports = stmt
        .query_map([], report_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(reports)
}

pub fn list_accounts(conn: &Connection) -> AppResult<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM users ORDER BY report_count DESC, id"
    ))?;
    let accounts = stmt
        .query_map([], account_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// Flips a boolean account flag; admins cannot flip their own.
fn toggle_flag(conn: &Connection, admin_id: i64, user_id: i64, column: &str) -> AppResult<Account> {
    if admin_id == user_id {
        return Err(AppError::validation("You cannot change this on your own account"));
    }
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE id = ?1", [user_id], |row| row.get(0))
        .optional()?;
    if exists.is_none() {
        return Err(AppError::not_found("User not found"));
    }
    conn.execute(
        &format!("UPDATE users SET {column} = NOT {column} WHERE id = ?1"),
        [user_id],
    )?;
    account_by_id(conn, user_id)
}

pub fn toggle_ban(conn: &Connection, admin_id: i64, user_id: i64) -> AppResult<Account> {
    toggle_flag(conn, admin_id, user_id, "is_banned")
}

pub fn toggle_admin(conn: &Connection, admin_id: i64, user_id: i64) -> AppResult<Account> {
    toggle_flag(conn, admin_id, user_id, "is_admin")
}

// ── Handlers ──

/// POST /api/users/reports
pub async fn report(
    State(state): State<AppState>,
    principal: Principal,
    Payload(payload): Payload<CreateReport>,
) -> AppResult<(StatusCode, Json<Report>)> {
    let report =
        db::interact(&state.db, move |conn| submit_report(conn, principal.id, &payload)).await?;
    tracing::info!(report_id = report.id, reporter_id = principal.id, "user reported");
    Ok((StatusCode::CREATED, Json(report)))
}

/// GET /api/admin/reports
pub async fn reports(State(state): State<AppState>, _admin: Admin) -> AppResult<Json<Vec<Report>>> {
    let reports = db::interact(&state.db, |conn| list_reports(conn)).await?;
    Ok(Json(reports))
}

/// GET /api/admin/users
pub async fn accounts(
    State(state): State<AppState>,
    _admin: Admin,
) -> AppResult<Json<Vec<Account>>> {
    let accounts = db::interact(&state.db, |conn| list_accounts(conn)).await?;
    Ok(Json(accounts))
}

/// PATCH /api/admin/users/:id/ban
pub async fn ban(
    State(state): State<AppState>,
    Admin(admin): Admin,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Account>> {
    let account = db::interact(&state.db, move |conn| toggle_ban(conn, admin.id, user_id)).await?;
    tracing::info!(user_id, banned = account.is_banned, admin_id = admin.id, "ban toggled");
    Ok(Json(account))
}

/// PATCH /api/admin/users/:id/admin
pub async fn promote(
    State(state): State<AppState>,
    Admin(admin): Admin,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Account>> {
    let account =
        db::interact(&state.db, move |conn| toggle_admin(conn, admin.id, user_id)).await?;
    tracing::info!(user_id, admin = account.is_admin, admin_id = admin.id, "admin toggled");
    Ok(Json(account))
}
