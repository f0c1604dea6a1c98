mod login;
mod logout;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login::login))
        .route("/logout", get(logout::logout))
}

/// Where to send the browser afterwards. Only same-site paths are followed;
/// anything else lands on `/`.
pub(crate) fn return_to(return_url: Option<&str>) -> &str {
    match return_url {
        Some(url) if url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\") => url,
        _ => "/",
    }
}

#[cfg(test)]
mod tests {
    use super::return_to;

    #[test]
    fn return_url_stays_on_site() {
        assert_eq!(return_to(Some("/chat")), "/chat");
        assert_eq!(return_to(Some("/notifications?x=1")), "/notifications?x=1");
        assert_eq!(return_to(None), "/");
        assert_eq!(return_to(Some("")), "/");
        assert_eq!(return_to(Some("https://evil.example/")), "/");
        assert_eq!(return_to(Some("//evil.example/")), "/");
        assert_eq!(return_to(Some("/\\evil.example/")), "/");
        assert_eq!(return_to(Some("chat")), "/");
    }
}
