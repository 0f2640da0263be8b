use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::{error::AppError, state::AppState};

/// Reject requests whose Host header is not in TRUSTED_HOSTS.
/// A "*" entry disables the check (useful behind a trusted proxy).
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state
        .config
        .trusted_hosts
        .iter()
        .any(|host| host.trim() == "*")
    {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(strip_port)
        .unwrap_or_default();

    let allowed = state
        .config
        .trusted_hosts
        .iter()
        .any(|trusted| trusted.trim().eq_ignore_ascii_case(host));

    if !allowed {
        tracing::warn!(host, "Rejected request from untrusted host");
        return Err(AppError::BadRequest("Invalid host header.".to_string()));
    }

    Ok(next.run(request).await)
}

fn strip_port(host: &str) -> &str {
    host.rsplit_once(':')
        .map(|(name, port)| {
            if port.chars().all(|character| character.is_ascii_digit()) {
                name
            } else {
                host
            }
        })
        .unwrap_or(host)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::strip_port;

    #[test]
    fn strips_numeric_port_only() {
        assert_eq!(strip_port("localhost:8000"), "localhost");
        assert_eq!(strip_port("api.smartkollect.co.za"), "api.smartkollect.co.za");
        assert_eq!(strip_port("127.0.0.1:80"), "127.0.0.1");
    }
}
