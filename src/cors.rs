//! Origin-echoing CORS middleware
//!
//! Allowed origins receive their own `Origin` value back rather than a literal
//! `*`, which keeps credentialed browser requests working. Preflights are
//! answered here and never reach the routes.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::{CorsOrigins, WILDCARD_ORIGIN};

pub const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, Authorization";

pub async fn cors_middleware(
    State(allowed): State<CorsOrigins>,
    request: Request,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(WILDCARD_ORIGIN));

    let granted = allowed
        .allows(origin.as_bytes())
        .then(|| cors_headers(origin.clone()));

    let mut response = if request.method() == Method::OPTIONS {
        let mut preflight = Response::new(Body::empty());
        *preflight.status_mut() = StatusCode::NO_CONTENT;
        preflight
    } else {
        next.run(request).await
    };

    if let Some(headers) = granted {
        response.headers_mut().extend(headers);
    }

    response
}

fn cors_headers(origin: HeaderValue) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers
}

#[cfg(test)]
mod tests {
    use axum::{middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    fn app(origins: CorsOrigins) -> Router {
        Router::new()
            .route("/", get(|| async { "reached" }))
            .layer(middleware::from_fn_with_state(origins, cors_middleware))
    }

    async fn send(app: Router, method: Method, origin: Option<&str>) -> Response {
        let mut builder = axum::http::Request::builder().uri("/").method(method);
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        app.oneshot(builder.body(Body::empty()).expect("request build"))
            .await
            .expect("request execution")
    }

    #[tokio::test]
    async fn echoes_allowed_origin() {
        let response = send(
            app(CorsOrigins::from("https://example.com")),
            Method::GET,
            Some("https://example.com"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://example.com"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOW_METHODS);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], ALLOW_HEADERS);
    }

    #[tokio::test]
    async fn wildcard_echoes_request_origin() {
        let response = send(
            app(CorsOrigins::default()),
            Method::GET,
            Some("https://client.test"),
        )
        .await;

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://client.test"
        );
    }

    #[tokio::test]
    async fn wildcard_echoes_non_ascii_origin() {
        let origin = HeaderValue::from_bytes(b"https://caf\xc3\xa9.test").expect("opaque origin");
        let request = axum::http::Request::builder()
            .uri("/")
            .header(header::ORIGIN, origin.clone())
            .body(Body::empty())
            .expect("request build");

        let response = app(CorsOrigins::default())
            .oneshot(request)
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN].as_bytes(),
            origin.as_bytes()
        );
    }

    #[tokio::test]
    async fn missing_origin_is_treated_as_wildcard() {
        let response = send(app(CorsOrigins::default()), Method::GET, None).await;
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn disallowed_origin_gets_no_headers_but_still_reaches_route() {
        let response = send(
            app(CorsOrigins::from("https://example.com")),
            Method::GET,
            Some("https://evil.test"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(body, "reached");
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_no_content() {
        let response = send(
            app(CorsOrigins::from("https://example.com")),
            Method::OPTIONS,
            Some("https://example.com"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://example.com"
        );
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn preflight_from_disallowed_origin_is_still_answered() {
        let response = send(
            app(CorsOrigins::from("https://example.com")),
            Method::OPTIONS,
            Some("https://evil.test"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
