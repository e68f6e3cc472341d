use std::time::Instant;

use axum::{
    extract::{OriginalUri, Request},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Emits the request summary when dropped, so the line is written even if the
/// downstream future panics or is cancelled before producing a response.
struct RequestSummary {
    method: Method,
    url: String,
    started_at: Instant,
    status: Option<StatusCode>,
}

impl Drop for RequestSummary {
    fn drop(&mut self) {
        let elapsed_ms = self.started_at.elapsed().as_millis();

        match self.status {
            Some(status) => info!(
                method = %self.method,
                url = %self.url,
                status = status.as_u16(),
                duration_ms = elapsed_ms,
                "request summary"
            ),
            None => warn!(
                method = %self.method,
                url = %self.url,
                duration_ms = elapsed_ms,
                "request ended without a response"
            ),
        }
    }
}

pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let mut summary = RequestSummary {
        method: request.method().clone(),
        url: full_url(&request),
        started_at: Instant::now(),
        status: None,
    };

    let response = next.run(request).await;
    summary.status = Some(response.status());

    response
}

/// Rebuilds an absolute URL from the `Host` header when the request line only
/// carried a path. Nested routers see a stripped URI, so the one recorded
/// before any nesting wins.
pub fn full_url(request: &Request) -> String {
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or_else(|| request.uri());
    if uri.authority().is_some() {
        return uri.to_string();
    }

    let Some(host) = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    else {
        return uri.to_string();
    };

    let scheme = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");

    format!("{scheme}://{host}{uri}")
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc};

    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use parking_lot::Mutex;
    use tower::ServiceExt;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(logs: &CapturedLogs) -> tracing::subscriber::DefaultGuard {
        let subscriber = fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_target(false)
            .compact()
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn logged_app() -> Router {
        Router::new()
            .route("/ok", get(|| async { "fine" }))
            .route("/stuck", get(|| std::future::pending::<&'static str>()))
            .layer(from_fn(request_logging_middleware))
    }

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).expect("request build")
    }

    #[test]
    fn full_url_uses_host_header() {
        let request = request("/mcp?debug=1", &[("host", "edge.test")]);
        assert_eq!(full_url(&request), "http://edge.test/mcp?debug=1");
    }

    #[test]
    fn full_url_honours_forwarded_proto() {
        let request = request(
            "/health",
            &[("host", "edge.test"), ("x-forwarded-proto", "https")],
        );
        assert_eq!(full_url(&request), "https://edge.test/health");
    }

    #[test]
    fn full_url_keeps_absolute_uri() {
        let request = request("http://origin.test:8080/health", &[("host", "ignored")]);
        assert_eq!(full_url(&request), "http://origin.test:8080/health");
    }

    #[test]
    fn full_url_without_host_is_path_only() {
        let request = request("/health", &[]);
        assert_eq!(full_url(&request), "/health");
    }

    #[tokio::test]
    async fn completed_request_logs_summary() {
        let logs = CapturedLogs::default();
        let _guard = capture(&logs);

        let response = logged_app()
            .oneshot(request("/ok", &[("host", "edge.test")]))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);

        let output = logs.contents();
        assert!(output.contains("request summary"), "{output}");
        assert!(output.contains("method=GET"), "{output}");
        assert!(output.contains("url=http://edge.test/ok"), "{output}");
        assert!(output.contains("status=200"), "{output}");
    }

    #[tokio::test]
    async fn dropped_request_still_logs() {
        let logs = CapturedLogs::default();
        let _guard = capture(&logs);

        let call = logged_app().oneshot(request("/stuck", &[("host", "edge.test")]));
        tokio::select! {
            biased;
            _ = call => panic!("pending handler produced a response"),
            _ = std::future::ready(()) => {}
        }

        let output = logs.contents();
        assert!(output.contains("request ended without a response"), "{output}");
        assert!(output.contains("method=GET"), "{output}");
        assert!(output.contains("url=http://edge.test/stuck"), "{output}");
        assert!(!output.contains("request summary"), "{output}");
    }

    #[tokio::test]
    async fn nested_request_logs_unstripped_url() {
        let logs = CapturedLogs::default();
        let _guard = capture(&logs);

        let response = Router::new()
            .nest("/fn", logged_app())
            .oneshot(request("/fn/ok", &[("host", "edge.test")]))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);

        let output = logs.contents();
        assert!(output.contains("url=http://edge.test/fn/ok"), "{output}");
    }
}
