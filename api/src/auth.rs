use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use pollnation_shared::{Account, AuthResponse, Login, Signup};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{is_unique_violation, AppError, AppResult};
use crate::extractors::{Payload, Principal};
use crate::{db, users, AppState};

const MIN_PASSWORD_LEN: usize = 8;

// ── JWT Claims ──

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,   // user id
    pub adm: bool,  // admin flag at issue time; requests re-read the stored flag
    pub exp: usize, // expiry (unix timestamp)
}

impl Claims {
    pub fn new(user_id: i64, is_admin: bool, ttl_days: u64) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            sub: user_id,
            adm: is_admin,
            exp: (now + ttl_days * 24 * 60 * 60) as usize,
        }
    }
}

pub fn issue_token(account: &Account, secret: &str, ttl_days: u64) -> AppResult<String> {
    let claims = Claims::new(account.id, account.is_admin, ttl_days);
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token encoding failed: {e}")))
}

pub fn decode_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}

/// Bearer header first, then the session cookie.
pub fn session_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token);
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value)
}

fn session_cookie(state: &AppState, token: &str) -> String {
    let max_age = state.session_days * 24 * 60 * 60;
    format!(
        "{}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}",
        state.cookie_name
    )
}

// ── Accounts ──

fn validate_signup(payload: &Signup) -> AppResult<(String, String)> {
    let username = payload.username.trim().to_string();
    let email = payload.email.trim().to_lowercase();

    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !(3..=32).contains(&username.len()) || !valid_chars {
        return Err(AppError::validation(
            "Username must be 3-32 letters, digits, '_' or '-'",
        ));
    }
    if users::RESERVED_USERNAMES.contains(&username.to_lowercase().as_str()) {
        return Err(AppError::validation("That username is reserved"));
    }

    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed || email.len() > 254 {
        return Err(AppError::validation("A valid email is required"));
    }

    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    Ok((username, email))
}

/// Creates an account. The very first account becomes an admin.
pub fn register(conn: &Connection, payload: &Signup, bcrypt_cost: u32) -> AppResult<Account> {
    let (username, email) = validate_signup(payload)?;

    let taken: Option<String> = conn
        .query_row(
            "SELECT CASE WHEN username = ?1 THEN 'username' ELSE 'email' END
             FROM users WHERE username = ?1 OR email = ?2 LIMIT 1",
            rusqlite::params![username, email],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(field) = taken {
        return Err(AppError::conflict(format!("That {field} is already taken")));
    }

    let hash = bcrypt::hash(&payload.password, bcrypt_cost)
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))?;

    conn.execute(
        "INSERT INTO users (username, email, password_hash, is_admin)
         VALUES (?1, ?2, ?3, NOT EXISTS (SELECT 1 FROM users))",
        rusqlite::params![username, email, hash],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("That username or email is already taken")
        } else {
            e.into()
        }
    })?;

    users::account_by_id(conn, conn.last_insert_rowid())
}

/// Checks credentials; `login` may be a username or an email.
pub fn authenticate(conn: &Connection, login: &str, password: &str) -> AppResult<Account> {
    let login = login.trim();
    let found: Option<(i64, String, bool)> = conn
        .query_row(
            "SELECT id, password_hash, is_banned FROM users
             WHERE username = ?1 OR email = lower(?1)",
            [login],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let Some((id, hash, banned)) = found else {
        return Err(AppError::Unauthorized);
    };

    let ok = bcrypt::verify(password, &hash)
        .map_err(|e| AppError::Internal(format!("password check failed: {e}")))?;
    if !ok {
        return Err(AppError::Unauthorized);
    }
    if banned {
        return Err(AppError::forbidden("This account has been banned"));
    }

    users::account_by_id(conn, id)
}

// ── Handlers ──

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Payload(payload): Payload<Signup>,
) -> AppResult<impl IntoResponse> {
    let cost = state.bcrypt_cost;
    let account = db::interact(&state.db, move |conn| register(conn, &payload, cost)).await?;
    tracing::info!(user_id = account.id, admin = account.is_admin, "account created");

    let token = issue_token(&account, &state.jwt_secret, state.session_days)?;
    let cookie = session_cookie(&state, &token);
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            token,
            user: account,
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Payload(payload): Payload<Login>,
) -> AppResult<impl IntoResponse> {
    let account = db::interact(&state.db, move |conn| {
        authenticate(conn, &payload.login, &payload.password)
    })
    .await?;
    tracing::info!(user_id = account.id, "login");

    let token = issue_token(&account, &state.jwt_secret, state.session_days)?;
    let cookie = session_cookie(&state, &token);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse {
            token,
            user: account,
        }),
    ))
}

/// POST /api/auth/logout — clears the session cookie
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
        state.cookie_name
    );
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)])
}

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, principal: Principal) -> AppResult<Json<Account>> {
    let account =
        db::interact(&state.db, move |conn| users::account_by_id(conn, principal.id)).await?;
    Ok(Json(account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const TEST_COST: u32 = 4;

    fn signup(username: &str, email: &str) -> Signup {
        Signup {
            username: username.into(),
            email: email.into(),
            password: "correct horse".into(),
        }
    }

    #[test]
    fn first_account_is_admin_later_ones_are_not() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        let first = register(&conn, &signup("alice", "alice@example.com"), TEST_COST).unwrap();
        let second = register(&conn, &signup("bob", "bob@example.com"), TEST_COST).unwrap();
        assert!(first.is_admin);
        assert!(!second.is_admin);
    }

    #[test]
    fn duplicate_username_or_email_conflicts() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        register(&conn, &signup("alice", "alice@example.com"), TEST_COST).unwrap();

        let err = register(&conn, &signup("alice", "other@example.com"), TEST_COST).unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("username")));

        let err = register(&conn, &signup("alicia", "ALICE@example.com"), TEST_COST).unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("email")));
    }

    #[test]
    fn signup_rejects_bad_input() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        for bad in [
            signup("a", "a@example.com"),
            signup("has space", "s@example.com"),
            signup("reports", "r@example.com"),
            signup("carol", "not-an-email"),
            Signup {
                password: "short".into(),
                ..signup("dave", "dave@example.com")
            },
        ] {
            let err = register(&conn, &bad, TEST_COST).unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "{bad:?}");
        }
    }

    #[test]
    fn authenticate_accepts_username_or_email() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        let account = register(&conn, &signup("alice", "alice@example.com"), TEST_COST).unwrap();

        assert_eq!(authenticate(&conn, "alice", "correct horse").unwrap().id, account.id);
        assert_eq!(
            authenticate(&conn, "Alice@Example.com", "correct horse").unwrap().id,
            account.id
        );
        assert!(matches!(
            authenticate(&conn, "alice", "wrong password").unwrap_err(),
            AppError::Unauthorized
        ));
        assert!(matches!(
            authenticate(&conn, "nobody", "correct horse").unwrap_err(),
            AppError::Unauthorized
        ));
    }

    #[test]
    fn banned_account_cannot_log_in() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        let account = register(&conn, &signup("alice", "alice@example.com"), TEST_COST).unwrap();
        conn.execute("UPDATE users SET is_banned = 1 WHERE id = ?1", [account.id])
            .unwrap();
        assert!(matches!(
            authenticate(&conn, "alice", "correct horse").unwrap_err(),
            AppError::Forbidden(_)
        ));
    }

    #[test]
    fn token_round_trip_carries_admin_flag() {
        let pool = db::test_pool();
        let conn = pool.get().unwrap();
        let account = register(&conn, &signup("alice", "alice@example.com"), TEST_COST).unwrap();
        let token = issue_token(&account, "secret", 1).unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, account.id);
        assert!(claims.adm);
        assert!(decode_token(&token, "other-secret").is_err());
    }

    #[test]
    fn session_token_prefers_bearer_then_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; token=from-cookie"),
        );
        assert_eq!(session_token(&headers, "token"), Some("from-cookie"));
        assert_eq!(session_token(&headers, "session"), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(session_token(&headers, "token"), Some("from-header"));
    }
}
