use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pollnation_shared::{Comment, CreatePost, NewOption, PostKind, PostOption, PostView, UpdatePost};
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::comments::{comment_from_row, COMMENT_SELECT};
use crate::error::{AppError, AppResult};
use crate::extractors::{MaybePrincipal, Payload, Principal};
use crate::{db, users, AppState};

const MAX_QUESTION_LEN: usize = 300;
const MAX_OPTIONS: usize = 10;

// ── Validation ──
//
// Questions, option texts and explanations are plain text: they are stored
// trimmed but otherwise verbatim, and clients render them as text.

fn clean_question(raw: &str) -> AppResult<String> {
    let question = raw.trim().to_string();
    if question.is_empty() {
        return Err(AppError::validation("Question is required"));
    }
    if question.chars().count() > MAX_QUESTION_LEN {
        return Err(AppError::validation(format!(
            "Question must be at most {MAX_QUESTION_LEN} characters"
        )));
    }
    Ok(question)
}

fn clean_options(kind: PostKind, raw: &[NewOption]) -> AppResult<Vec<NewOption>> {
    if raw.len() < 2 || raw.len() > MAX_OPTIONS {
        return Err(AppError::validation(format!(
            "A post needs between 2 and {MAX_OPTIONS} options"
        )));
    }

    let mut seen = HashSet::new();
    let mut options = Vec::with_capacity(raw.len());
    for opt in raw {
        let text = opt.text.trim().to_string();
        if text.is_empty() {
            return Err(AppError::validation("Option text is required"));
        }
        if !seen.insert(text.to_lowercase()) {
            return Err(AppError::validation("Options must be distinct"));
        }

        let option = match kind {
            PostKind::Poll => NewOption::plain(text),
            PostKind::Quiz => NewOption {
                text,
                correct: opt.correct,
                explanation: opt
                    .explanation
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string),
            },
        };
        options.push(option);
    }

    if kind == PostKind::Quiz && !options.iter().any(|o| o.correct) {
        return Err(AppError::validation("A quiz needs at least one correct option"));
    }

    Ok(options)
}

// ── Store ──

fn insert_options(conn: &Connection, post_id: i64, options: &[NewOption]) -> AppResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO post_options (post_id, position, text, is_correct, explanation)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, opt) in options.iter().enumerate() {
        stmt.execute(rusqlite::params![
            post_id,
            position as i64,
            opt.text,
            opt.correct,
            opt.explanation
        ])?;
    }
    Ok(())
}

/// Kind and owner of a post, or `NotFound`.
pub fn lookup(conn: &Connection, post_id: i64) -> AppResult<(PostKind, i64)> {
    conn.query_row(
        "SELECT kind, owner_id FROM posts WHERE id = ?1",
        [post_id],
        |row| Ok((db::post_kind(row, 0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Post not found"))
}

enum Scope {
    Feed,
    Owner(i64),
    Single(i64),
}

impl Scope {
    fn clause(&self) -> &'static str {
        match self {
            Scope::Feed => "",
            Scope::Owner(_) => "WHERE p.owner_id = ?1",
            Scope::Single(_) => "WHERE p.id = ?1",
        }
    }

    fn params(&self) -> Vec<i64> {
        match *self {
            Scope::Feed => vec![],
            Scope::Owner(id) | Scope::Single(id) => vec![id],
        }
    }
}

struct OptionRow {
    id: i64,
    text: String,
    correct: bool,
    explanation: Option<String>,
    vote_count: i64,
}

/// Assembles views with one query each for posts, options and comments.
fn load_views(conn: &Connection, scope: Scope, viewer: Option<i64>) -> AppResult<Vec<PostView>> {
    let clause = scope.clause();
    let params = scope.params();

    let mut stmt = conn.prepare(&format!(
        "SELECT p.id, p.kind, p.question, p.created_at,
                u.id, u.username, u.profile_picture_url
         FROM posts p JOIN users u ON u.id = p.owner_id
         {clause}
         ORDER BY p.created_at DESC, p.id DESC"
    ))?;
    let mut views = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(PostView {
                id: row.get(0)?,
                kind: db::post_kind(row, 1)?,
                question: row.get(2)?,
                created_at: row.get(3)?,
                owner: db::author(row, 4)?,
                options: Vec::new(),
                total_votes: 0,
                comment_count: 0,
                comments: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    if views.is_empty() {
        return Ok(views);
    }

    let mut options: HashMap<i64, Vec<OptionRow>> = HashMap::new();
    let mut stmt = conn.prepare(&format!(
        "SELECT o.post_id, o.id, o.text, o.is_correct, o.explanation, o.vote_count
         FROM post_options o JOIN posts p ON p.id = o.post_id
         {clause}
         ORDER BY o.post_id, o.position"
    ))?;
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            OptionRow {
                id: row.get(1)?,
                text: row.get(2)?,
                correct: row.get(3)?,
                explanation: row.get(4)?,
                vote_count: row.get(5)?,
            },
        ))
    })?;
    for row in rows {
        let (post_id, option) = row?;
        options.entry(post_id).or_default().push(option);
    }

    let mut comments: HashMap<i64, Vec<Comment>> = HashMap::new();
    let mut stmt = conn.prepare(&format!(
        "{COMMENT_SELECT}
         JOIN posts p ON p.id = c.post_id
         {clause}
         ORDER BY c.created_at DESC, c.id DESC"
    ))?;
    let rows = stmt.query_map(params_from_iter(params.iter()), comment_from_row)?;
    for row in rows {
        let comment = row?;
        comments.entry(comment.post_id).or_default().push(comment);
    }

    let answered: HashSet<i64> = match viewer {
        Some(uid) => {
            let mut stmt = conn.prepare("SELECT post_id FROM votes WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([uid], |row| row.get(0))?
                .collect::<Result<HashSet<i64>, _>>()?;
            ids
        }
        None => HashSet::new(),
    };

    for view in &mut views {
        let reveal = view.kind == PostKind::Quiz
            && viewer.is_some_and(|uid| uid == view.owner.id || answered.contains(&view.id));

        view.options = options
            .remove(&view.id)
            .unwrap_or_default()
            .into_iter()
            .map(|o| PostOption {
                id: o.id,
                text: o.text,
                vote_count: o.vote_count,
                correct: reveal.then_some(o.correct),
                explanation: if reveal { o.explanation } else { None },
            })
            .collect();
        view.total_votes = view.options.iter().map(|o| o.vote_count).sum();
        view.comments = comments.remove(&view.id).unwrap_or_default();
        view.comment_count = view.comments.len() as i64;
    }

    Ok(views)
}

pub fn list_feed(conn: &Connection, viewer: Option<i64>) -> AppResult<Vec<PostView>> {
    load_views(conn, Scope::Feed, viewer)
}

pub fn list_by_owner(
    conn: &Connection,
    username: &str,
    viewer: Option<i64>,
) -> AppResult<Vec<PostView>> {
    let owner_id = users::user_id_by_username(conn, username)?;
    load_views(conn, Scope::Owner(owner_id), viewer)
}

pub fn get_by_id(conn: &Connection, post_id: i64, viewer: Option<i64>) -> AppResult<PostView> {
    load_views(conn, Scope::Single(post_id), viewer)?
        .pop()
        .ok_or_else(|| AppError::not_found("Post not found"))
}

pub fn create_post(conn: &mut Connection, owner_id: i64, payload: &CreatePost) -> AppResult<PostView> {
    let question = clean_question(&payload.question)?;
    let options = clean_options(payload.kind, &payload.options)?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO posts (kind, owner_id, question) VALUES (?1, ?2, ?3)",
        rusqlite::params![payload.kind.as_str(), owner_id, question],
    )?;
    let post_id = tx.last_insert_rowid();
    insert_options(&tx, post_id, &options)?;
    tx.commit()?;

    get_by_id(conn, post_id, Some(owner_id))
}

/// Owner-only edit. The question can always change; options can only be
/// replaced while nobody has voted.
pub fn update_post(
    conn: &mut Connection,
    post_id: i64,
    editor_id: i64,
    changes: &UpdatePost,
) -> AppResult<PostView> {
    let tx = conn.transaction()?;
    let (kind, owner_id) = lookup(&tx, post_id)?;
    if owner_id != editor_id {
        return Err(AppError::forbidden("Only the owner can edit this post"));
    }

    if let Some(question) = &changes.question {
        let question = clean_question(question)?;
        tx.execute(
            "UPDATE posts SET question = ?2 WHERE id = ?1",
            rusqlite::params![post_id, question],
        )?;
    }

    if let Some(raw) = &changes.options {
        let options = clean_options(kind, raw)?;
        let votes: i64 = tx.query_row(
            "SELECT COUNT(*) FROM votes WHERE post_id = ?1",
            [post_id],
            |row| row.get(0),
        )?;
        if votes > 0 {
            return Err(AppError::conflict(
                "Options cannot be replaced once votes have been cast",
            ));
        }
        tx.execute("DELETE FROM post_options WHERE post_id = ?1", [post_id])?;
        insert_options(&tx, post_id, &options)?;
    }

    tx.commit()?;
    get_by_id(conn, post_id, Some(editor_id))
}

/// Owner-only delete; options, votes and comments go with the post.
pub fn delete_post(conn: &Connection, post_id: i64, requester_id: i64) -> AppResult<()> {
    let (_, owner_id) = lookup(conn, post_id)?;
    if owner_id != requester_id {
        return Err(AppError::forbidden("Only the owner can delete this post"));
    }
    conn.execute("DELETE FROM posts WHERE id = ?1", [post_id])?;
    Ok(())
}

// ── Handlers ──

/// GET /api/poll-and-quiz
pub async fn index(
    State(state): State<AppState>,
    viewer: MaybePrincipal,
) -> AppResult<Json<Vec<PostView>>> {
    let viewer = viewer.id();
    let feed = db::interact(&state.db, move |conn| list_feed(conn, viewer)).await?;
    Ok(Json(feed))
}

/// GET /api/poll-and-quiz/user/:username
pub async fn by_owner(
    State(state): State<AppState>,
    viewer: MaybePrincipal,
    Path(username): Path<String>,
) -> AppResult<Json<Vec<PostView>>> {
    let viewer = viewer.id();
    let posts = db::interact(&state.db, move |conn| list_by_owner(conn, &username, viewer)).await?;
    Ok(Json(posts))
}

/// GET /api/poll-and-quiz/:id
pub async fn show(
    State(state): State<AppState>,
    viewer: MaybePrincipal,
    Path(id): Path<i64>,
) -> AppResult<Json<PostView>> {
    let viewer = viewer.id();
    let post = db::interact(&state.db, move |conn| get_by_id(conn, id, viewer)).await?;
    Ok(Json(post))
}

/// POST /api/poll-and-quiz
pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    Payload(payload): Payload<CreatePost>,
) -> AppResult<(StatusCode, Json<PostView>)> {
    let post =
        db::interact(&state.db, move |conn| create_post(conn, principal.id, &payload)).await?;
    tracing::info!(post_id = post.id, owner_id = principal.id, kind = ?post.kind, "post created");
    Ok((StatusCode::CREATED, Json(post)))
}

/// PUT /api/poll-and-quiz/:id
pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
    Payload(changes): Payload<UpdatePost>,
) -> AppResult<Json<PostView>> {
    let post =
        db::interact(&state.db, move |conn| update_post(conn, id, principal.id, &changes)).await?;
    tracing::info!(post_id = id, "post updated");
    Ok(Json(post))
}

/// DELETE /api/poll-and-quiz/:id
pub async fn destroy(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    db::interact(&state.db, move |conn| delete_post(conn, id, principal.id)).await?;
    tracing::info!(post_id = id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::users::tests::seed_user;

    pub(crate) fn cats_or_dogs() -> CreatePost {
        CreatePost {
            kind: PostKind::Poll,
            question: "Cats or dogs?".into(),
            options: vec![NewOption::plain("Cats"), NewOption::plain("Dogs")],
        }
    }

    pub(crate) fn capital_quiz() -> CreatePost {
        CreatePost {
            kind: PostKind::Quiz,
            question: "Capital of France?".into(),
            options: vec![
                NewOption {
                    text: "Paris".into(),
                    correct: true,
                    explanation: Some("Paris has been the capital since 987".into()),
                },
                NewOption::plain("Lyon"),
                NewOption::plain("Marseille"),
            ],
        }
    }

    #[test]
    fn text_is_stored_verbatim() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let owner = seed_user(&conn, "alice");

        let post = create_post(
            &mut conn,
            owner,
            &CreatePost {
                kind: PostKind::Poll,
                question: "  Cats & Dogs <3?  ".into(),
                options: vec![NewOption::plain("Cats & co"), NewOption::plain("Dogs & co")],
            },
        )
        .unwrap();
        assert_eq!(post.question, "Cats & Dogs <3?");
        assert_eq!(post.options[0].text, "Cats & co");

        let ampersands = "&".repeat(MAX_QUESTION_LEN);
        assert_eq!(clean_question(&ampersands).unwrap(), ampersands);
        assert!(clean_question(&"&".repeat(MAX_QUESTION_LEN + 1)).is_err());
    }

    #[test]
    fn create_preserves_option_order() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let owner = seed_user(&conn, "alice");

        let post = create_post(&mut conn, owner, &cats_or_dogs()).unwrap();
        assert_eq!(post.kind, PostKind::Poll);
        assert_eq!(post.owner.username, "alice");
        let texts: Vec<_> = post.options.iter().map(|o| o.text.as_str()).collect();
        assert_eq!(texts, ["Cats", "Dogs"]);
        assert!(post.options.iter().all(|o| o.vote_count == 0 && o.correct.is_none()));
    }

    #[test]
    fn create_rejects_invalid_posts() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let owner = seed_user(&conn, "alice");

        let mut blank = cats_or_dogs();
        blank.question = "   ".into();
        let mut single = cats_or_dogs();
        single.options.truncate(1);
        let mut dupes = cats_or_dogs();
        dupes.options[1] = NewOption::plain("cats");
        let mut no_answer = capital_quiz();
        no_answer.options[0].correct = false;

        for bad in [blank, single, dupes, no_answer] {
            let err = create_post(&mut conn, owner, &bad).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{bad:?}");
        }
        assert!(list_feed(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn feed_unions_polls_and_quizzes_newest_first() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let owner = seed_user(&conn, "alice");

        let poll = create_post(&mut conn, owner, &cats_or_dogs()).unwrap();
        let quiz = create_post(&mut conn, owner, &capital_quiz()).unwrap();
        let poll2 = create_post(&mut conn, owner, &cats_or_dogs()).unwrap();

        let feed = list_feed(&conn, None).unwrap();
        assert_eq!(feed.len(), 3);
        let ids: Vec<_> = feed.iter().map(|p| p.id).collect();
        assert_eq!(ids, [poll2.id, quiz.id, poll.id]);
        assert_eq!(feed.iter().filter(|p| p.kind == PostKind::Quiz).count(), 1);
        assert_eq!(feed[1].options.len(), 3);
    }

    #[test]
    fn quiz_answer_key_is_shown_to_owner_only() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let owner = seed_user(&conn, "alice");
        let stranger = seed_user(&conn, "bob");
        let quiz = create_post(&mut conn, owner, &capital_quiz()).unwrap();

        let as_owner = get_by_id(&conn, quiz.id, Some(owner)).unwrap();
        assert_eq!(as_owner.options[0].correct, Some(true));
        assert!(as_owner.options[0].explanation.is_some());

        for viewer in [None, Some(stranger)] {
            let view = get_by_id(&conn, quiz.id, viewer).unwrap();
            assert!(view.options.iter().all(|o| o.correct.is_none() && o.explanation.is_none()));
        }
    }

    #[test]
    fn list_by_owner_filters_and_checks_user() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let bob = seed_user(&conn, "bob");
        create_post(&mut conn, alice, &cats_or_dogs()).unwrap();
        create_post(&mut conn, bob, &capital_quiz()).unwrap();

        let posts = list_by_owner(&conn, "bob", None).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].owner.id, bob);
        assert!(list_by_owner(&conn, "carol", None).is_err());
    }

    #[test]
    fn non_owner_cannot_edit_or_delete() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let carol = seed_user(&conn, "carol");
        let poll = create_post(&mut conn, alice, &cats_or_dogs()).unwrap();

        let changes = UpdatePost {
            question: Some("Hijacked?".into()),
            options: None,
        };
        let err = update_post(&mut conn, poll.id, carol, &changes).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert!(matches!(
            delete_post(&conn, poll.id, carol).unwrap_err(),
            AppError::Forbidden(_)
        ));

        let unchanged = get_by_id(&conn, poll.id, None).unwrap();
        assert_eq!(unchanged.question, "Cats or dogs?");
    }

    #[test]
    fn options_are_frozen_once_voted() {
        let pool = db::test_pool();
        let mut conn = pool.get().unwrap();
        let alice = seed_user(&conn, "alice");
        let bob = seed_user(&conn, "bob");
        let poll = create_post(&mut conn, alice, &cats_or_dogs()).unwrap();

        let replace = UpdatePost {
            question: None,
            options: Some(vec![NewOption::plain("Birds"), NewOption::plain("Fish")]),
        };
        let edited = update_post(&mut conn, poll.id, alice, &replace).unwrap();
        assert_eq!(edited.options[0].text, "Birds");

        crate::votes::reconcile_vote(&mut conn, bob, poll.id, edited.options[0].id).unwrap();
        let err = update_post(&mut conn, poll.id, alice, &replace).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let renamed = update_post(
            &mut conn,
            poll.id,
            alice,
            &UpdatePost {
                question: Some("Birds or fish?".into()),
                options: None,
            },
        )
        .unwrap();
        assert_eq!(renamed.question, "Birds or fish?");
        assert_eq!(renamed.total_votes, 1);
    }

    #[test]
    fn missing_post_is_not_found() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        assert!(matches!(get_by_id(&conn, 42, None), Err(AppError::NotFound(_))));
        assert!(matches!(delete_post(&conn, 42, 1), Err(AppError::NotFound(_))));
    }
}
