//! 路径规范化：在路由前折叠路径里的 `//` 连写。

use axum::extract::Request;
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;

/// 把路径里所有 `//` 连写折叠成单个 `/`
pub fn collapse_slashes(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        normalized.push(c);
    }
    normalized
}

pub async fn normalize_path_middleware(mut request: Request, next: Next) -> Response {
    let uri = request.uri();
    let path = uri.path();

    if path.contains("//") {
        let normalized = collapse_slashes(path);
        let path_and_query = match uri.query() {
            Some(query) => format!("{}?{}", normalized, query),
            None => normalized,
        };
        if let Ok(new_uri) = Uri::try_from(path_and_query) {
            *request.uri_mut() = new_uri;
        }
    }

    next.run(request).await
}
