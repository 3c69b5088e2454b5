//! URL helpers for building backend endpoints.

/// Strip trailing slashes so endpoints can be appended safely.
///
/// ```
/// use branchat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:8000/"), "http://localhost:8000");
/// assert_eq!(normalize_base_url("http://localhost:8000///"), "http://localhost:8000");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and an endpoint path with exactly one slash.
///
/// ```
/// use branchat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:8000/", "/api/v1/chats"),
///     "http://localhost:8000/api/v1/chats"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

/// Versioned endpoint under the backend's `/api` prefix, e.g.
/// `{base}/api/v1/messages/generate`.
pub fn versioned_endpoint(base_url: &str, api_version: &str, path: &str) -> String {
    let version = api_version.trim_matches('/');
    let path = path.trim_start_matches('/');
    construct_api_url(base_url, &format!("api/{version}/{path}"))
}
