use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use regex::Regex;

use crate::auth::SESSION_COOKIE;
use crate::config::GateConfig;
use crate::AppState;

/// Per-client request counter behind the rate limit.
///
/// Injected rather than global so multi-instance deployments can swap in a
/// shared backend; the in-process fixed-window impl below covers a single
/// instance.
pub trait RateCounter: Send + Sync {
    /// Record a hit for the key and return the hit count within the
    /// current window.
    fn hit(&self, key: &str) -> u32;
}

/// Fixed-window counter: each client address gets an independent window
/// that resets `window` after its first hit.
pub struct FixedWindowCounter {
    window: Duration,
    entries: Mutex<CounterState>,
}

struct CounterState {
    counts: HashMap<String, (Instant, u32)>,
    last_prune: Instant,
}

impl FixedWindowCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(CounterState {
                counts: HashMap::new(),
                last_prune: Instant::now(),
            }),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().counts.len()
    }
}

impl RateCounter for FixedWindowCounter {
    fn hit(&self, key: &str) -> u32 {
        let now = Instant::now();
        let mut state = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        // Drop expired windows once per window interval to bound memory.
        if now.duration_since(state.last_prune) >= self.window {
            let window = self.window;
            state
                .counts
                .retain(|_, (start, _)| now.duration_since(*start) < window);
            state.last_prune = now;
        }

        let entry = state.counts.entry(key.to_string()).or_insert((now, 0));
        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1
    }
}

/// Client address resolved by the gate, stored as a request extension so
/// downstream logging and security events carry it.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

/// Why the gate rejected a request.
#[derive(Debug, PartialEq)]
enum GateRejection {
    HostilePath,
    RateLimited,
    DangerousParam,
    MissingSession,
}

impl GateRejection {
    fn status(&self) -> StatusCode {
        match self {
            GateRejection::HostilePath | GateRejection::DangerousParam => StatusCode::BAD_REQUEST,
            GateRejection::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GateRejection::MissingSession => StatusCode::UNAUTHORIZED,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            GateRejection::HostilePath => "Request path rejected",
            GateRejection::DangerousParam => "Request parameters rejected",
            GateRejection::RateLimited => "Too many requests",
            GateRejection::MissingSession => "Authentication required",
        }
    }
}

/// Perimeter filter applied before routing: hostile-path denylist, per-client
/// rate ceiling, query-parameter scan, and session-cookie presence on
/// protected routes. Only presence is checked here; full verification runs
/// in the handlers.
pub struct RequestGate {
    max_requests: u32,
    counter: Arc<dyn RateCounter>,
    hostile_paths: Vec<Regex>,
}

impl RequestGate {
    pub fn new(config: &GateConfig, counter: Arc<dyn RateCounter>) -> Self {
        let hostile_paths = [
            r"\.\./",
            r"/etc/",
            r"/proc/",
            r"/sys/",
            r"\.env",
            r"(?i)<script",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("hostile path pattern"))
        .collect();

        Self {
            max_requests: config.max_requests,
            counter,
            hostile_paths,
        }
    }

    fn check(
        &self,
        path: &str,
        query: Option<&str>,
        client: &str,
        has_session_cookie: bool,
    ) -> Result<(), GateRejection> {
        if self.is_hostile_path(path) {
            return Err(GateRejection::HostilePath);
        }

        if self.counter.hit(client) > self.max_requests {
            return Err(GateRejection::RateLimited);
        }

        if let Some(query) = query {
            if has_dangerous_params(query) {
                return Err(GateRejection::DangerousParam);
            }
        }

        if is_protected_path(path) && !has_session_cookie {
            return Err(GateRejection::MissingSession);
        }

        Ok(())
    }

    fn is_hostile_path(&self, path: &str) -> bool {
        self.hostile_paths.iter().any(|re| re.is_match(path))
    }
}

/// Dangerous substrings rejected in query-parameter values: shell
/// metacharacters and commands, traversal, SQL-injection fragments.
const DANGEROUS_FRAGMENTS: &[&str] = &[
    "../",
    "<script",
    "$(",
    "`",
    ";",
    "&&",
    "|",
    "rm -",
    "wget ",
    "curl ",
    "' or ",
    "union select",
    "drop table",
    "insert into",
];

fn has_dangerous_params(query: &str) -> bool {
    // A raw "&&" never survives pair splitting, so catch it before decoding.
    if query.contains("&&") {
        return true;
    }
    // Values are scanned after percent-decoding; encoding a fragment must not
    // get it past the scan.
    url::form_urlencoded::parse(query.as_bytes()).any(|(_, value)| {
        // Media/data URLs legitimately contain characters the scan rejects.
        if value.starts_with("data:") {
            return false;
        }
        let lower = value.to_ascii_lowercase();
        DANGEROUS_FRAGMENTS
            .iter()
            .any(|fragment| lower.contains(fragment))
    })
}

/// Protected routes require a session cookie up front. The identity/login
/// endpoints cannot (the cookie does not exist yet) and admin routes do
/// their own full verification in-handler.
fn is_protected_path(path: &str) -> bool {
    path.starts_with("/api/")
        && !path.starts_with("/api/lti")
        && !path.starts_with("/api/admin")
}

fn client_addr(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn has_session_cookie(request: &Request) -> bool {
    request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(|cookies| {
            cookies
                .split(';')
                .any(|c| c.trim_start().starts_with(&format!("{}=", SESSION_COOKIE)))
        })
        .unwrap_or(false)
}

/// Middleware entry point, applied ahead of all routes.
pub async fn request_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(String::from);
    let client = client_addr(&request);
    let cookie_present = has_session_cookie(&request);
    request.extensions_mut().insert(ClientAddr(client.clone()));

    match state
        .gate
        .check(&path, query.as_deref(), &client, cookie_present)
    {
        Ok(()) => next.run(request).await,
        Err(rejection) => {
            tracing::warn!(
                target: "security",
                client = %client,
                path = %path,
                rejection = ?rejection,
                "Request rejected at the gate"
            );
            (rejection.status(), rejection.message()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn gate_with_limit(max_requests: u32) -> RequestGate {
        RequestGate::new(
            &GateConfig {
                max_requests,
                window_secs: 60,
            },
            Arc::new(FixedWindowCounter::new(Duration::from_secs(60))),
        )
    }

    fn gate() -> RequestGate {
        gate_with_limit(100)
    }

    #[rstest]
    #[case("/api/../etc/passwd")]
    #[case("/etc/passwd")]
    #[case("/proc/self/environ")]
    #[case("/sys/kernel")]
    #[case("/app/.env")]
    #[case("/search/<script>alert(1)</script>")]
    fn test_hostile_paths_rejected(#[case] path: &str) {
        assert_eq!(
            gate().check(path, None, "1.2.3.4", true),
            Err(GateRejection::HostilePath)
        );
    }

    #[rstest]
    #[case("/api/chatflows")]
    #[case("/health")]
    #[case("/api/lti/login")]
    fn test_normal_paths_pass(#[case] path: &str) {
        assert!(gate().check(path, None, "1.2.3.4", true).is_ok());
    }

    #[rstest]
    #[case("q=../../secret")]
    #[case("q=<script>x</script>")]
    #[case("cmd=a;b")]
    #[case("cmd=a&&b")]
    #[case("cmd=$(whoami)")]
    #[case("cmd=`id`")]
    #[case("cmd=rm -rf")]
    #[case("u=wget http://x")]
    #[case("name=' OR '1'='1")]
    #[case("name=%27%20OR%20%271%27%3D%271")]
    #[case("q=1 UNION SELECT password")]
    #[case("q=1+UNION+SELECT+password")]
    #[case("q=DROP TABLE users")]
    fn test_dangerous_params_rejected(#[case] query: &str) {
        assert_eq!(
            gate().check("/health", Some(query), "1.2.3.4", true),
            Err(GateRejection::DangerousParam)
        );
    }

    #[rstest]
    #[case("q=hello+world")]
    #[case("page=2&per_page=50")]
    #[case("img=data:image/png;base64,iVBORw0KGgo")]
    fn test_benign_params_pass(#[case] query: &str) {
        assert!(gate().check("/health", Some(query), "1.2.3.4", true).is_ok());
    }

    #[test]
    fn test_protected_path_classification() {
        assert!(is_protected_path("/api/chatflows"));
        assert!(is_protected_path("/api/chatflows/wf-9/predict"));
        assert!(!is_protected_path("/api/lti/login"));
        assert!(!is_protected_path("/api/lti/callback"));
        assert!(!is_protected_path("/api/admin/grants"));
        assert!(!is_protected_path("/health"));
    }

    #[test]
    fn test_protected_route_requires_cookie_presence() {
        assert_eq!(
            gate().check("/api/chatflows", None, "1.2.3.4", false),
            Err(GateRejection::MissingSession)
        );
        assert!(gate().check("/api/chatflows", None, "1.2.3.4", true).is_ok());
        assert!(gate().check("/api/lti/login", None, "1.2.3.4", false).is_ok());
    }

    #[test]
    fn test_rate_limit_boundary() {
        let gate = gate_with_limit(100);
        for _ in 0..100 {
            assert!(gate.check("/health", None, "1.2.3.4", true).is_ok());
        }
        // The 101st request within the window trips the ceiling.
        assert_eq!(
            gate.check("/health", None, "1.2.3.4", true),
            Err(GateRejection::RateLimited)
        );
    }

    #[test]
    fn test_rate_limit_is_per_client() {
        let gate = gate_with_limit(2);
        assert!(gate.check("/health", None, "1.1.1.1", true).is_ok());
        assert!(gate.check("/health", None, "1.1.1.1", true).is_ok());
        assert_eq!(
            gate.check("/health", None, "1.1.1.1", true),
            Err(GateRejection::RateLimited)
        );
        // A different client has its own window.
        assert!(gate.check("/health", None, "2.2.2.2", true).is_ok());
    }

    #[test]
    fn test_fixed_window_resets_after_elapse() {
        let counter = FixedWindowCounter::new(Duration::from_millis(40));
        assert_eq!(counter.hit("c"), 1);
        assert_eq!(counter.hit("c"), 2);
        std::thread::sleep(Duration::from_millis(60));
        // New window: count starts over.
        assert_eq!(counter.hit("c"), 1);
    }

    #[test]
    fn test_fixed_window_prunes_expired_entries() {
        let counter = FixedWindowCounter::new(Duration::from_millis(40));
        counter.hit("a");
        counter.hit("b");
        counter.hit("c");
        assert_eq!(counter.len(), 3);
        std::thread::sleep(Duration::from_millis(60));
        counter.hit("d");
        assert_eq!(counter.len(), 1);
    }
}
