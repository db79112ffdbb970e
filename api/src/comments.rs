use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pollnation_shared::{Comment, CreateComment, EditComment};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{AppError, AppResult};
use crate::extractors::{Payload, Principal};
use crate::{db, posts, AppState};

const MAX_COMMENT_LEN: usize = 2000;

pub const COMMENT_SELECT: &str =
    "SELECT c.id, c.post_id, c.content, c.parent_comment_id, c.created_at, c.updated_at,
            u.id, u.username, u.profile_picture_url
     FROM comments c JOIN users u ON u.id = c.user_id";

pub fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        content: row.get(2)?,
        parent_comment_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        user: db::author(row, 6)?,
    })
}

fn clean_content(raw: &str) -> AppResult<String> {
    let content = ammonia::clean(raw.trim());
    if content.trim().is_empty() {
        return Err(AppError::validation("Comment cannot be empty"));
    }
    if content.chars().count() > MAX_COMMENT_LEN {
        return Err(AppError::validation(format!(
            "Comment must be at most {MAX_COMMENT_LEN} characters"
        )));
    }
    Ok(content)
}

fn comment_by_id(conn: &Connection, id: i64) -> AppResult<Comment> {
    conn.query_row(&format!("{COMMENT_SELECT} WHERE c.id = ?1"), [id], comment_from_row)
        .optional()?
        .ok_or_else(|| AppError::not_found("Comment not found"))
}

/// Author or admin may touch a comment; anyone else gets `Forbidden`.
fn authorize(conn: &Connection, id: i64, requester: &Principal) -> AppResult<()> {
    let author: i64 = conn
        .query_row("SELECT user_id FROM comments WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or_else(|| AppError::not_found("Comment not found"))?;
    if author != requester.id && !requester.is_admin {
        return Err(AppError::forbidden("You can only change your own comments"));
    }
    Ok(())
}

pub fn add_comment(conn: &Connection, user_id: i64, payload: &CreateComment) -> AppResult<Comment> {
    let content = clean_content(&payload.content)?;
    posts::lookup(conn, payload.post_id)?;

    if let Some(parent_id) = payload.parent_comment_id {
        let parent_post: Option<i64> = conn
            .query_row(
                "SELECT post_id FROM comments WHERE id = ?1",
                [parent_id],
                |row| row.get(0),
            )
            .optional()?;
        match parent_post {
            None => return Err(AppError::not_found("Parent comment not found")),
            Some(p) if p != payload.post_id => {
                return Err(AppError::validation(
                    "Parent comment belongs to a different post",
                ))
            }
            Some(_) => {}
        }
    }

    conn.execute(
        "INSERT INTO comments (post_id, user_id, content, parent_comment_id)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![payload.post_id, user_id, content, payload.parent_comment_id],
    )?;

    comment_by_id(conn, conn.last_insert_rowid())
}

/// Comments on a post, newest first.
pub fn list_comments(conn: &Connection, post_id: i64) -> AppResult<Vec<Comment>> {
    posts::lookup(conn, post_id)?;

    let mut stmt = conn.prepare(&format!(
        "{COMMENT_SELECT} WHERE c.post_id = ?1 ORDER BY c.created_at DESC, c.id DESC"
    ))?;
    let comments = stmt
        .query_map([post_id], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

pub fn edit_comment(
    conn: &Connection,
    id: i64,
    requester: &Principal,
    payload: &EditComment,
) -> AppResult<Comment> {
    let content = clean_content(&payload.content)?;
    authorize(conn, id, requester)?;
    conn.execute(
        "UPDATE comments SET content = ?2, updated_at = datetime('now') WHERE id = ?1",
        rusqlite::params![id, content],
    )?;
    comment_by_id(conn, id)
}

pub fn delete_comment(conn: &Connection, id: i64, requester: &Principal) -> AppResult<()> {
    authorize(conn, id, requester)?;
    conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
    Ok(())
}

// ── Handlers ──

/// GET /api/comments/post/:post_id
pub async fn index(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> AppResult<Json<Vec<Comment>>> {
    let comments = db::interact(&state.db, move |conn| list_comments(conn, post_id)).await?;
    Ok(Json(comments))
}

/// POST /api/comments
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    Payload(payload): Payload<CreateComment>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    let comment =
        db::interact(&state.db, move |conn| add_comment(conn, principal.id, &payload)).await?;
    tracing::info!(comment_id = comment.id, post_id = comment.post_id, "comment added");
    Ok((StatusCode::CREATED, Json(comment)))
}

/// PUT /api/comments/:id
pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Payload(payload): Payload<EditComment>,
) -> AppResult<Json<Comment>> {
    let comment =
        db::interact(&state.db, move |conn| edit_comment(conn, id, &principal, &payload)).await?;
    Ok(Json(comment))
}

/// DELETE /api/comments/:id
pub async fn destroy(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    db::interact(&state.db, move |conn| delete_comment(conn, id, &principal)).await?;
    tracing::info!(comment_id = id, user_id = principal.id, "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posts::tests::cats_or_dogs;
    use crate::users::tests::seed_user;

    fn comment_on(post_id: i64, content: &str) -> CreateComment {
        CreateComment {
            post_id,
            content: content.into(),
            parent_comment_id: None,
        }
    }

    fn user(id: i64) -> Principal {
        Principal { id, is_admin: false }
    }

    #[test]
    fn comments_list_newest_first() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let post = posts::create_post(&mut conn, alice, &cats_or_dogs()).unwrap();

        let first = add_comment(&conn, alice, &comment_on(post.id, "first")).unwrap();
        let second = add_comment(&conn, alice, &comment_on(post.id, "second")).unwrap();

        let listed = list_comments(&conn, post.id).unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.id).collect();
        assert_eq!(ids, [second.id, first.id]);
        assert_eq!(listed[0].user.username, "alice");
    }

    #[test]
    fn add_comment_validates_post_and_content() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let post = posts::create_post(&mut conn, alice, &cats_or_dogs()).unwrap();

        assert!(matches!(
            add_comment(&conn, alice, &comment_on(post.id, "   ")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            add_comment(&conn, alice, &comment_on(999, "hello")),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(list_comments(&conn, 999), Err(AppError::NotFound(_))));
    }

    #[test]
    fn reply_must_target_same_post() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let a = posts::create_post(&mut conn, alice, &cats_or_dogs()).unwrap();
        let b = posts::create_post(&mut conn, alice, &cats_or_dogs()).unwrap();
        let parent = add_comment(&conn, alice, &comment_on(a.id, "parent")).unwrap();

        let reply = add_comment(
            &conn,
            alice,
            &CreateComment {
                parent_comment_id: Some(parent.id),
                ..comment_on(a.id, "reply")
            },
        )
        .unwrap();
        assert_eq!(reply.parent_comment_id, Some(parent.id));

        let err = add_comment(
            &conn,
            alice,
            &CreateComment {
                parent_comment_id: Some(parent.id),
                ..comment_on(b.id, "stray")
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn only_author_or_admin_may_edit_or_delete() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let bob = seed_user(&conn, "bob");
        let post = posts::create_post(&mut conn, alice, &cats_or_dogs()).unwrap();
        let comment = add_comment(&conn, alice, &comment_on(post.id, "mine")).unwrap();

        let edit = EditComment {
            content: "defaced".into(),
        };
        assert!(matches!(
            edit_comment(&conn, comment.id, &user(bob), &edit),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            delete_comment(&conn, comment.id, &user(bob)),
            Err(AppError::Forbidden(_))
        ));

        let edited = edit_comment(
            &conn,
            comment.id,
            &user(alice),
            &EditComment {
                content: "still mine".into(),
            },
        )
        .unwrap();
        assert_eq!(edited.content, "still mine");
        assert!(edited.updated_at.is_some());

        let admin = Principal {
            id: bob,
            is_admin: true,
        };
        delete_comment(&conn, comment.id, &admin).unwrap();
        assert!(list_comments(&conn, post.id).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_post_removes_its_comments() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let post = posts::create_post(&mut conn, alice, &cats_or_dogs()).unwrap();
        add_comment(&conn, alice, &comment_on(post.id, "soon gone")).unwrap();

        posts::delete_post(&conn, post.id, alice).unwrap();

        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM comments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn markup_is_sanitized() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let post = posts::create_post(&mut conn, alice, &cats_or_dogs()).unwrap();
        let c = add_comment(
            &conn,
            alice,
            &comment_on(post.id, "hi<script>alert(1)</script>"),
        )
        .unwrap();
        assert_eq!(c.content, "hi");
    }
}
