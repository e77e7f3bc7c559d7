use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::errors::{AppError, ErrorCode};
use crate::types::auth::{AuthUser, Claims, UserRole};

/// JWT verification secret, injected as a request extension at router
/// construction. Keeps the secret in the service config instead of
/// process-global state.
#[derive(Clone)]
pub struct JwtSecret(Arc<str>);

impl JwtSecret {
    pub fn new(secret: &str) -> Self {
        Self(Arc::from(secret))
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let secret = parts
            .extensions
            .get::<JwtSecret>()
            .cloned()
            .ok_or_else(|| AppError::internal("JWT secret not configured"))?;

        let token = extract_bearer_token(&parts.headers)?;
        let claims = validate_jwt(&token, &secret)?;

        if claims.is_expired() {
            return Err(AppError::new(ErrorCode::TokenExpired, "token has expired"));
        }

        Ok(AuthUser::from(claims))
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::new(ErrorCode::Unauthorized, "missing authorization header"))?
        .to_str()
        .map_err(|_| AppError::new(ErrorCode::Unauthorized, "invalid authorization header"))?;

    if !auth_header.starts_with("Bearer ") {
        return Err(AppError::new(ErrorCode::Unauthorized, "authorization header must use Bearer scheme"));
    }

    Ok(auth_header[7..].to_string())
}

fn validate_jwt(token: &str, secret: &JwtSecret) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::new(ErrorCode::TokenExpired, "token has expired")
        }
        _ => AppError::new(ErrorCode::TokenInvalid, format!("invalid token: {e}")),
    })?;

    Ok(token_data.claims)
}

/// Require Admin role
#[derive(Debug)]
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != UserRole::Admin {
            return Err(AppError::new(ErrorCode::Forbidden, "admin access required"));
        }
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    fn token(secret: &str, role: UserRole) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            role,
            iat: now,
            exp: now + 3600,
            jti: Uuid::now_v7(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn parts(secret: Option<&str>, bearer: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/notifications");
        if let Some(token) = bearer {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        if let Some(secret) = secret {
            parts.extensions.insert(JwtSecret::new(secret));
        }
        parts
    }

    #[tokio::test]
    async fn valid_token_with_injected_secret_is_accepted() {
        let token = token("config-secret", UserRole::User);
        let mut parts = parts(Some("config-secret"), Some(&token));

        let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.role, UserRole::User);
    }

    #[tokio::test]
    async fn token_signed_with_another_secret_is_rejected() {
        let token = token("other-secret", UserRole::User);
        let mut parts = parts(Some("config-secret"), Some(&token));

        let err = AuthUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Known { code: ErrorCode::TokenInvalid, .. }
        ));
    }

    #[tokio::test]
    async fn missing_secret_extension_is_an_internal_error() {
        let token = token("config-secret", UserRole::User);
        let mut parts = parts(None, Some(&token));

        let err = AuthUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Known { code: ErrorCode::InternalError, .. }
        ));
    }

    #[tokio::test]
    async fn non_admin_token_is_forbidden_for_admin_routes() {
        let token = token("config-secret", UserRole::User);
        let mut parts = parts(Some("config-secret"), Some(&token));

        let err = AdminUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Known { code: ErrorCode::Forbidden, .. }
        ));
    }

    #[tokio::test]
    async fn missing_authorization_header_is_unauthorized() {
        let mut parts = parts(Some("config-secret"), None);

        let err = AuthUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Known { code: ErrorCode::Unauthorized, .. }
        ));
    }
}
