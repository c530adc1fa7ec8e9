use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Username of the principal a request guard resolved, if any.
#[derive(Debug, Clone)]
pub struct RequestPrincipal(pub String);

/// Fairing to log one line per HTTP request with timing
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let start_time = request.local_cache(Instant::now);
        let duration = start_time.elapsed();

        let principal = request
            .local_cache(|| None::<RequestPrincipal>)
            .as_ref()
            .map(|principal| principal.0.as_str())
            .unwrap_or("-");

        // Never log headers or bodies; they carry credentials.
        log::info!(
            "{} {} -> {} [{}] ({:.2}ms)",
            request.method(),
            request.uri().path(),
            response.status().code,
            principal,
            duration.as_secs_f64() * 1000.0
        );
    }
}
