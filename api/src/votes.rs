use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pollnation_shared::{CastVote, MyVote, OptionTally, PostKind, VoteOutcome, VoteReceipt, VoteStatus};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::error::{is_unique_violation, AppError, AppResult};
use crate::extractors::{MaybePrincipal, Payload, Principal};
use crate::{db, posts, AppState};

struct ChosenOption {
    correct: bool,
    explanation: Option<String>,
}

/// Resolves `option_id` against `post_id`: unknown option is `NotFound`,
/// an option of another post is a validation error.
fn chosen_option(conn: &Connection, post_id: i64, option_id: i64) -> AppResult<ChosenOption> {
    let (owner_post, correct, explanation): (i64, bool, Option<String>) = conn
        .query_row(
            "SELECT post_id, is_correct, explanation FROM post_options WHERE id = ?1",
            [option_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| AppError::not_found("Option not found"))?;

    if owner_post != post_id {
        return Err(AppError::validation("Option does not belong to this post"));
    }
    Ok(ChosenOption {
        correct,
        explanation,
    })
}

fn bump(conn: &Connection, option_id: i64, delta: i64) -> AppResult<()> {
    conn.execute(
        "UPDATE post_options SET vote_count = vote_count + ?2 WHERE id = ?1",
        rusqlite::params![option_id, delta],
    )?;
    Ok(())
}

fn insert_vote(
    conn: &Connection,
    user_id: i64,
    post_id: i64,
    option_id: i64,
    is_correct: Option<bool>,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO votes (user_id, post_id, option_id, is_correct) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user_id, post_id, option_id, is_correct],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("A vote for this post already exists")
        } else {
            e.into()
        }
    })?;
    Ok(())
}

fn tallies(conn: &Connection, post_id: i64) -> AppResult<Vec<OptionTally>> {
    let mut stmt = conn.prepare(
        "SELECT id, vote_count FROM post_options WHERE post_id = ?1 ORDER BY position",
    )?;
    let rows = stmt
        .query_map([post_id], |row| {
            Ok(OptionTally {
                option_id: row.get(0)?,
                vote_count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn current_vote(conn: &Connection, user_id: i64, post_id: i64) -> AppResult<Option<(i64, i64)>> {
    Ok(conn
        .query_row(
            "SELECT id, option_id FROM votes WHERE user_id = ?1 AND post_id = ?2",
            [user_id, post_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

/// Poll state machine: no vote → created, same option → retracted,
/// other option → changed. Runs inside the caller's transaction.
fn reconcile_poll(
    conn: &Connection,
    voter_id: i64,
    post_id: i64,
    option_id: i64,
) -> AppResult<(VoteOutcome, Option<i64>)> {
    match current_vote(conn, voter_id, post_id)? {
        None => {
            insert_vote(conn, voter_id, post_id, option_id, None)?;
            bump(conn, option_id, 1)?;
            Ok((VoteOutcome::Created, Some(option_id)))
        }
        Some((vote_id, previous)) if previous == option_id => {
            conn.execute("DELETE FROM votes WHERE id = ?1", [vote_id])?;
            bump(conn, previous, -1)?;
            Ok((VoteOutcome::Retracted, None))
        }
        Some((vote_id, previous)) => {
            bump(conn, previous, -1)?;
            bump(conn, option_id, 1)?;
            conn.execute(
                "UPDATE votes SET option_id = ?2 WHERE id = ?1",
                [vote_id, option_id],
            )?;
            Ok((VoteOutcome::Changed, Some(option_id)))
        }
    }
}

/// Quiz answers are final: the first one is recorded with its correctness,
/// any later attempt is a conflict.
fn answer_in_tx(
    conn: &Connection,
    user_id: i64,
    post_id: i64,
    option_id: i64,
    chosen: &ChosenOption,
) -> AppResult<()> {
    if current_vote(conn, user_id, post_id)?.is_some() {
        return Err(AppError::conflict("You have already answered this quiz"));
    }
    insert_vote(conn, user_id, post_id, option_id, Some(chosen.correct))?;
    bump(conn, option_id, 1)
}

/// Applies a (re)vote. Quiz posts are routed to the answer-once flow.
///
/// The read-decide-write sequence runs under `BEGIN IMMEDIATE`, so concurrent
/// reconciles on the same database serialize and the vote row and counters
/// always move together.
pub fn reconcile_vote(
    conn: &mut Connection,
    voter_id: i64,
    post_id: i64,
    option_id: i64,
) -> AppResult<VoteReceipt> {
    vote_in_tx(conn, voter_id, post_id, option_id, None)
}

/// Answer-once entry point for quizzes; polls are rejected.
pub fn answer_quiz(
    conn: &mut Connection,
    user_id: i64,
    quiz_id: i64,
    option_id: i64,
) -> AppResult<VoteReceipt> {
    vote_in_tx(conn, user_id, quiz_id, option_id, Some(PostKind::Quiz))
}

/// Shared body of both entry points. When `expected` is set, the post kind
/// is checked inside the same transaction that records the vote.
fn vote_in_tx(
    conn: &mut Connection,
    voter_id: i64,
    post_id: i64,
    option_id: i64,
    expected: Option<PostKind>,
) -> AppResult<VoteReceipt> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let (kind, _) = posts::lookup(&tx, post_id)?;
    if let Some(want) = expected.filter(|&want| want != kind) {
        return Err(AppError::validation(format!("Post is not a {}", want.as_str())));
    }
    let chosen = chosen_option(&tx, post_id, option_id)?;

    let receipt = match kind {
        PostKind::Poll => {
            let (outcome, user_vote) = reconcile_poll(&tx, voter_id, post_id, option_id)?;
            VoteReceipt {
                outcome,
                post_id,
                user_vote,
                is_correct: None,
                explanation: None,
                tallies: tallies(&tx, post_id)?,
            }
        }
        PostKind::Quiz => {
            answer_in_tx(&tx, voter_id, post_id, option_id, &chosen)?;
            VoteReceipt {
                outcome: VoteOutcome::Answered,
                post_id,
                user_vote: Some(option_id),
                is_correct: Some(chosen.correct),
                explanation: chosen.explanation,
                tallies: tallies(&tx, post_id)?,
            }
        }
    };

    tx.commit()?;
    Ok(receipt)
}

pub fn vote_status(conn: &Connection, post_id: i64, viewer: Option<i64>) -> AppResult<VoteStatus> {
    posts::lookup(conn, post_id)?;
    let user_vote = match viewer {
        Some(uid) => current_vote(conn, uid, post_id)?.map(|(_, option)| option),
        None => None,
    };
    Ok(VoteStatus {
        post_id,
        user_vote,
        tallies: tallies(conn, post_id)?,
    })
}

/// The caller's votes and quiz answers, newest first; none at all is `NotFound`.
pub fn my_votes(conn: &Connection, user_id: i64) -> AppResult<Vec<MyVote>> {
    let mut stmt = conn.prepare(
        "SELECT v.id, v.post_id, p.kind, p.question, v.option_id, o.text,
                v.is_correct, v.created_at
         FROM votes v
         JOIN posts p ON p.id = v.post_id
         JOIN post_options o ON o.id = v.option_id
         WHERE v.user_id = ?1
         ORDER BY v.created_at DESC, v.id DESC",
    )?;
    let votes = stmt
        .query_map([user_id], |row| {
            Ok(MyVote {
                id: row.get(0)?,
                post_id: row.get(1)?,
                kind: db::post_kind(row, 2)?,
                question: row.get(3)?,
                option_id: row.get(4)?,
                option_text: row.get(5)?,
                is_correct: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if votes.is_empty() {
        return Err(AppError::not_found("No votes found"));
    }
    Ok(votes)
}

// ── Handlers ──

/// POST /api/vote — 201 when a vote or answer is recorded, 200 on change/retract
pub async fn cast(
    State(state): State<AppState>,
    principal: Principal,
    Payload(payload): Payload<CastVote>,
) -> AppResult<(StatusCode, Json<VoteReceipt>)> {
    let receipt = db::interact(&state.db, move |conn| {
        reconcile_vote(conn, principal.id, payload.post_id, payload.option_id)
    })
    .await?;

    tracing::info!(
        user_id = principal.id,
        post_id = receipt.post_id,
        outcome = ?receipt.outcome,
        "vote reconciled"
    );

    let status = match receipt.outcome {
        VoteOutcome::Created | VoteOutcome::Answered => StatusCode::CREATED,
        VoteOutcome::Changed | VoteOutcome::Retracted => StatusCode::OK,
    };
    Ok((status, Json(receipt)))
}

/// POST /api/vote/quiz
pub async fn answer(
    State(state): State<AppState>,
    principal: Principal,
    Payload(payload): Payload<CastVote>,
) -> AppResult<(StatusCode, Json<VoteReceipt>)> {
    let receipt = db::interact(&state.db, move |conn| {
        answer_quiz(conn, principal.id, payload.post_id, payload.option_id)
    })
    .await?;
    tracing::info!(user_id = principal.id, quiz_id = receipt.post_id, "quiz answered");
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/vote/mine
pub async fn mine(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<Vec<MyVote>>> {
    let votes = db::interact(&state.db, move |conn| my_votes(conn, principal.id)).await?;
    Ok(Json(votes))
}

/// GET /api/vote/post/:post_id
pub async fn status(
    State(state): State<AppState>,
    viewer: MaybePrincipal,
    Path(post_id): Path<i64>,
) -> AppResult<Json<VoteStatus>> {
    let viewer = viewer.id();
    let status = db::interact(&state.db, move |conn| vote_status(conn, post_id, viewer)).await?;
    Ok(Json(status))
}
