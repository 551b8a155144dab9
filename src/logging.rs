use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use log::{error, info, warn};
use rocket::{
    fairing::{Fairing, Info, Kind},
    http::{Header, StatusClass},
    request::{FromRequest, Outcome},
    Data, Orbit, Request, Response, Rocket,
};

/// Header carrying a request's ID. Accepted from clients and proxies, and
/// always set on the response.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Longest client-supplied ID we will repeat into logs and responses.
const MAX_UPSTREAM_ID_LEN: usize = 64;

/// Identifies a request in the logs: our own sequence number, plus the ID the
/// caller sent if it was usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId {
    seq: usize,
    upstream: Option<String>,
}

impl RequestId {
    /// Atomically take the next sequence number. This wraps around back to
    /// zero if you somehow exceed a usize.
    fn next_seq() -> usize {
        static REQUEST_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// Assign an ID to a request that carried `upstream` in its header.
    /// Anything that could garble a log line is dropped.
    fn assign(upstream: Option<&str>) -> Self {
        let upstream = upstream
            .map(str::trim)
            .filter(|id| {
                !id.is_empty()
                    && id.len() <= MAX_UPSTREAM_ID_LEN
                    && id.chars().all(|c| c.is_ascii_graphic())
            })
            .map(str::to_string);
        Self {
            seq: Self::next_seq(),
            upstream,
        }
    }

    /// Cached per request, so every caller sees the same ID.
    fn of<'r>(req: &'r Request<'_>) -> &'r Self {
        req.local_cache(|| Self::assign(req.headers().get_one(REQUEST_ID_HEADER)))
    }

    /// The value to echo back: the caller's own ID if they sent one.
    pub fn header_value(&self) -> String {
        match self.upstream {
            Some(ref upstream) => upstream.clone(),
            None => self.seq.to_string(),
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.upstream {
            Some(ref upstream) => write!(f, "{}[{upstream}]", self.seq),
            None => write!(f, "{}", self.seq),
        }
    }
}

/// Allow the ID to be accessed via request guard.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for &'r RequestId {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(RequestId::of(req))
    }
}

/// When the request arrived.
struct Arrival(Instant);

/// A rocket fairing that logs every request and response with its ID and
/// latency, and tags each response with the ID.
#[derive(Debug, Copy, Clone)]
pub struct LoggerFairing;

#[rocket::async_trait]
impl Fairing for LoggerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Logger",
            kind: Kind::Liftoff | Kind::Request | Kind::Response | Kind::Shutdown,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let protocol = if rocket.config().tls_enabled() {
            "https"
        } else {
            "http"
        };
        let ip = &rocket.config().address;
        let port = &rocket.config().port;
        info!("Ballot server listening on {protocol}://{ip}:{port}");
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        req.local_cache(|| Arrival(Instant::now()));
        let id = RequestId::of(req);
        info!("->req{id} {} {}", req.method(), req.uri());
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let id = RequestId::of(req);
        let elapsed = req.local_cache(|| Arrival(Instant::now())).0.elapsed();
        let code = res.status();
        // Name the matched route if there is one; failed guards and 404s have none.
        let route = match req.route() {
            Some(r) => match r.name {
                Some(ref name) => format!("{name} ({})", r.uri),
                None => r.uri.to_string(),
            },
            None => "no route".to_string(),
        };

        let log_msg = format!("<-rsp{id} {code} {route} in {}ms", elapsed.as_millis());
        match code.class() {
            StatusClass::ServerError => error!("{log_msg}"),
            StatusClass::ClientError => warn!("{log_msg}"),
            _ => info!("{log_msg}"),
        }

        res.set_header(Header::new(REQUEST_ID_HEADER, id.header_value()));
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        warn!("Shutdown requested; in-flight votes finish before the server stops");
    }
}

#[cfg(test)]
mod tests {
    use rocket::local::blocking::Client;

    use super::*;

    #[test]
    fn upstream_ids_are_sanitised() {
        let plain = RequestId::assign(None);
        assert_eq!(plain.header_value(), plain.seq.to_string());

        let traced = RequestId::assign(Some(" abc-123 "));
        assert_eq!(traced.header_value(), "abc-123");
        assert_eq!(traced.to_string(), format!("{}[abc-123]", traced.seq));
        assert!(traced.seq > plain.seq);

        let long = "x".repeat(MAX_UPSTREAM_ID_LEN + 1);
        for garbled in ["", "two words", "line\nbreak", long.as_str()] {
            assert_eq!(RequestId::assign(Some(garbled)).upstream, None);
        }
    }

    #[test]
    fn responses_carry_the_id() {
        let client = Client::untracked(rocket::build().attach(LoggerFairing)).unwrap();

        let response = client
            .get("/nowhere")
            .header(Header::new(REQUEST_ID_HEADER, "trace-7"))
            .dispatch();
        assert_eq!(response.headers().get_one(REQUEST_ID_HEADER), Some("trace-7"));

        let response = client.get("/nowhere").dispatch();
        let assigned = response.headers().get_one(REQUEST_ID_HEADER).unwrap();
        assert!(assigned.parse::<usize>().is_ok());
    }
}
