use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use nada_core::{AppError, Group, User};

use crate::error::ApiResult;

pub const USER_EMAIL_HEADER: &str = "x-nada-user-email";
pub const USER_NAME_HEADER: &str = "x-nada-user-name";
pub const USER_GROUPS_HEADER: &str = "x-nada-user-groups";

/// Resolves the principal forwarded by the authenticating proxy.
pub async fn require_auth(mut request: Request, next: Next) -> ApiResult<Response> {
    let user = user_from_headers(request.headers())?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn user_from_headers(headers: &HeaderMap) -> Result<User, AppError> {
    let email = header_value(headers, USER_EMAIL_HEADER)?
        .filter(|email| email.contains('@'))
        .ok_or_else(|| AppError::Unauthorized("authentication required".to_owned()))?;
    let name = header_value(headers, USER_NAME_HEADER)?.unwrap_or_else(|| email.clone());
    let groups = header_value(headers, USER_GROUPS_HEADER)?
        .map(|value| parse_groups(value.as_str()))
        .unwrap_or_default();

    Ok(User::new(name, email, groups))
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<Option<String>, AppError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|error| AppError::InvalidRequest(format!("invalid header '{name}': {error}")))?
        .trim();

    Ok((!value.is_empty()).then(|| value.to_owned()))
}

/// Parses a comma separated list of group emails.
fn parse_groups(value: &str) -> Vec<Group> {
    value
        .split(',')
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(|email| {
            let email = email.to_lowercase();
            let name = email
                .split_once('@')
                .map_or(email.as_str(), |(local, _)| local)
                .to_owned();
            Group { name, email }
        })
        .collect()
}
