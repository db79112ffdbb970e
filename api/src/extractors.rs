use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::Json;
use rusqlite::OptionalExtension;
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::{auth, db, AppState};

/// The authenticated caller, taken from the session token and checked
/// against the stored account on every request.
/// Rejects with 401 when no valid token is present or the account is gone,
/// and with 403 when the account is banned.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub id: i64,
    pub is_admin: bool,
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            auth::session_token(&parts.headers, &state.cookie_name).ok_or(AppError::Unauthorized)?;
        let claims = auth::decode_token(token, &state.jwt_secret)?;
        let user_id = claims.sub;

        let flags = db::interact(&state.db, move |conn| {
            Ok(conn
                .query_row(
                    "SELECT is_admin, is_banned FROM users WHERE id = ?1",
                    [user_id],
                    |row| Ok((row.get::<_, bool>(0)?, row.get::<_, bool>(1)?)),
                )
                .optional()?)
        })
        .await?;

        match flags {
            None => Err(AppError::Unauthorized),
            Some((_, true)) => Err(AppError::forbidden("This account has been banned")),
            Some((is_admin, false)) => Ok(Principal {
                id: user_id,
                is_admin,
            }),
        }
    }
}

/// Optional caller: anonymous (or carrying a stale token) yields `None`.
pub struct MaybePrincipal(pub Option<Principal>);

impl FromRequestParts<AppState> for MaybePrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybePrincipal(
            Principal::from_request_parts(parts, state).await.ok(),
        ))
    }
}

impl MaybePrincipal {
    pub fn id(&self) -> Option<i64> {
        self.0.map(|p| p.id)
    }
}

/// An authenticated caller holding the admin flag; 403 otherwise.
pub struct Admin(pub Principal);

impl FromRequestParts<AppState> for Admin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if !principal.is_admin {
            return Err(AppError::forbidden("Admin privileges required"));
        }
        Ok(Admin(principal))
    }
}

/// JSON body whose rejections (bad syntax, missing or unknown fields) become
/// a 400 with the standard error body.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        Ok(Payload(value))
    }
}
