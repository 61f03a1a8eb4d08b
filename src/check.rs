//! Checking a username against the sites of a registry.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};
use ureq::Agent;

use crate::report::Report;
use crate::site::{Detection, Registry, SiteDefinition};
use crate::username::{UsageError, validate_username};

/// Per-request timeout used by [`Client::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of worker threads, and so of concurrent HTTP requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 20;

// Some sites serve an empty or blocking page to unknown agents.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.12; rv:55.0) Gecko/20100101 Firefox/55.0";

const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Whether a username exists on a site.
///
/// The set is closed: every result is exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[must_use]
pub enum Classification {
    /// The site has an account with this username.
    Taken,
    /// The site has no account with this username.
    Available,
    /// The site could not be classified; see [`CheckResult::failure`].
    Unknown,
}

impl Classification {
    /// Lowercase label used in every rendering.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Taken => "taken",
            Self::Available => "available",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a site ended up [`Classification::Unknown`].
///
/// Failures are per site and never abort a run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Failure {
    /// The site's `regexCheck` rejects the username; no request was made.
    #[error("illegal username format for this site")]
    IllegalUsername,
    /// The request did not complete within the timeout.
    #[error("timeout: {0}")]
    Timeout(String),
    /// DNS lookup or connection failed.
    #[error("error connecting: {0}")]
    Connection(String),
    /// The proxy refused or failed the connection.
    #[error("proxy error: {0}")]
    Proxy(String),
    /// Any other HTTP-level failure.
    #[error("HTTP error: {0}")]
    Http(String),
    /// The response arrived but its body could not be read.
    #[error("error reading response: {0}")]
    Body(String),
    /// The run was cancelled or hit its deadline before this site finished.
    #[error("cancelled before the site was checked")]
    Cancelled,
    /// A worker stopped without reporting this site.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Failure {
    fn from_ureq(error: &ureq::Error) -> Self {
        let detail = error.to_string();
        match error {
            ureq::Error::Timeout(_) => Self::Timeout(detail),
            ureq::Error::Io(e) if e.kind() == io::ErrorKind::TimedOut => Self::Timeout(detail),
            ureq::Error::HostNotFound | ureq::Error::ConnectionFailed | ureq::Error::Io(_) => {
                Self::Connection(detail)
            }
            ureq::Error::ConnectProxyFailed(_) | ureq::Error::InvalidProxyUrl => {
                Self::Proxy(detail)
            }
            _ => Self::Http(detail),
        }
    }

    fn from_body_read(error: &ureq::Error) -> Self {
        match Self::from_ureq(error) {
            timeout @ Self::Timeout(_) => timeout,
            _ => Self::Body(error.to_string()),
        }
    }
}

/// The outcome of checking one username on one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Name of the site in the registry.
    pub site: String,
    /// Profile URL for the username.
    pub url: String,
    /// Home page of the site.
    pub url_main: String,
    /// Taken, available or unknown.
    pub classification: Classification,
    /// Status of the response, if one arrived.
    pub http_status: Option<u16>,
    /// Request duration in milliseconds, if a request was made.
    pub elapsed_ms: Option<u64>,
    /// Present exactly when `classification` is `Unknown`.
    pub failure: Option<Failure>,
}

impl CheckResult {
    fn unknown(site: &SiteDefinition, username: &str, failure: Failure) -> Self {
        Self {
            site: site.name.clone(),
            url: site.user_url(username),
            url_main: site.url_main.clone(),
            classification: Classification::Unknown,
            http_status: None,
            elapsed_ms: None,
            failure: Some(failure),
        }
    }
}

/// An HTTP client configured for probing profile pages.
///
/// Non-2xx responses are returned as responses, not errors, since a 404 is
/// usually the answer we are looking for.
///
/// ```no_run
/// use std::time::Duration;
/// use socialname::check::Client;
///
/// let client = Client::builder()
///     .timeout(Duration::from_secs(5))
///     .proxy("socks5://127.0.0.1:1080")
///     .build()
///     .expect("valid proxy");
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    agent: Agent,
}

impl Client {
    /// A client with [`DEFAULT_TIMEOUT`] and no explicit proxy.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(DEFAULT_TIMEOUT, None)
    }

    /// Start configuring a client.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
        }
    }

    fn from_parts(timeout: Duration, proxy: Option<ureq::Proxy>) -> Self {
        let mut config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .user_agent(BROWSER_USER_AGENT);
        if let Some(proxy) = proxy {
            config = config.proxy(Some(proxy));
        }
        Self {
            agent: Agent::new_with_config(config.build()),
        }
    }

    pub(crate) fn agent(&self) -> &Agent {
        &self.agent
    }

    fn probe(&self, site: &SiteDefinition, url: &str) -> Result<Probe, ProbeError> {
        let request = match &site.detection {
            Detection::StatusCode { head_only: true } => self.agent.head(url),
            _ => self.agent.get(url),
        };
        let request = site
            .headers
            .iter()
            .fold(request, |request, (name, value)| {
                request.header(name.as_str(), value.as_str())
            });

        let mut response = match &site.detection {
            Detection::ResponseUrl { .. } => request.config().max_redirects(0).build().call(),
            _ => request.call(),
        }
        .map_err(ProbeError::Request)?;

        let status = response.status().as_u16();
        let body = match &site.detection {
            // Pages are not always UTF-8; error messages are matched on the
            // lossy decoding.
            Detection::Message { .. } => {
                let bytes = response.body_mut().read_to_vec().map_err(ProbeError::Body)?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            _ => None,
        };
        Ok(Probe { status, body })
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Client`].
#[derive(Debug, Clone)]
#[must_use]
pub struct ClientBuilder {
    timeout: Duration,
    proxy: Option<String>,
}

impl ClientBuilder {
    /// Per-request timeout covering connect, send and receive.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Route every request through this proxy, e.g. `socks5://127.0.0.1:1080`.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns the HTTP library's error if the proxy URL is invalid.
    pub fn build(self) -> Result<Client, ureq::Error> {
        let proxy = self.proxy.as_deref().map(ureq::Proxy::new).transpose()?;
        Ok(Client::from_parts(self.timeout, proxy))
    }
}

struct Probe {
    status: u16,
    body: Option<String>,
}

enum ProbeError {
    Request(ureq::Error),
    Body(ureq::Error),
}

impl ProbeError {
    fn into_failure(self) -> Failure {
        match self {
            Self::Request(error) => Failure::from_ureq(&error),
            Self::Body(error) => Failure::from_body_read(&error),
        }
    }
}

/// Classify a response according to a site's detection rule.
///
/// `body` is only consulted for [`Detection::Message`].
///
/// ```
/// use socialname::check::{classify, Classification};
/// use socialname::site::Detection;
///
/// let rule = Detection::StatusCode { head_only: false };
/// assert_eq!(classify(&rule, 200, None), Classification::Taken);
/// assert_eq!(classify(&rule, 404, None), Classification::Available);
/// ```
pub fn classify(detection: &Detection, status: u16, body: Option<&str>) -> Classification {
    match detection {
        Detection::StatusCode { .. } | Detection::ResponseUrl { .. } => {
            if (200..300).contains(&status) {
                Classification::Taken
            } else {
                Classification::Available
            }
        }
        Detection::Message { error_messages } => {
            let body = body.unwrap_or_default();
            if error_messages.iter().any(|message| body.contains(message.as_str())) {
                Classification::Available
            } else {
                Classification::Taken
            }
        }
    }
}

/// Check `username` on a single site.
///
/// Makes at most one request, bounded by the client's timeout. Network
/// failures are reported as [`Classification::Unknown`] with a
/// [`Failure`], never as an error.
pub fn check(client: &Client, site: &SiteDefinition, username: &str) -> CheckResult {
    if !site.accepts(username) {
        debug!(site = %site.name, username, "username is illegal on this site");
        return CheckResult::unknown(site, username, Failure::IllegalUsername);
    }

    let probe_url = site.probe_url(username);
    let started = Instant::now();
    let outcome = client.probe(site, &probe_url);
    let elapsed_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

    let (classification, http_status, failure) = match outcome {
        Ok(probe) => (
            classify(&site.detection, probe.status, probe.body.as_deref()),
            Some(probe.status),
            None,
        ),
        // A redirect we refused to follow is the "missing user" answer.
        Err(ProbeError::Request(ureq::Error::TooManyRedirects))
            if matches!(site.detection, Detection::ResponseUrl { .. }) =>
        {
            (Classification::Available, None, None)
        }
        Err(error) => {
            let failure = error.into_failure();
            debug!(site = %site.name, url = %probe_url, %failure, "site check failed");
            (Classification::Unknown, None, Some(failure))
        }
    };

    trace!(site = %site.name, %classification, ?http_status, "site checked");
    CheckResult {
        site: site.name.clone(),
        url: site.user_url(username),
        url_main: site.url_main.clone(),
        classification,
        http_status,
        elapsed_ms,
        failure,
    }
}

/// Cooperative cancellation for a [`Checker`] run.
///
/// Cancelling stops workers from starting new sites and makes the run return
/// immediately; requests already in flight are abandoned.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Checks a username against every site of a registry with a bounded pool
/// of worker threads.
///
/// ```no_run
/// use socialname::check::{Checker, Client};
/// use socialname::site::Registry;
///
/// let registry = Registry::bundled()?;
/// let report = Checker::new(Client::new()).workers(8).run(&registry, "octocat")?;
/// for result in &report.results {
///     println!("{}\t{}", result.site, result.classification);
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct Checker {
    client: Client,
    workers: usize,
    deadline: Option<Duration>,
    cancel: CancelToken,
}

impl Checker {
    /// A checker with [`MAX_CONCURRENT_REQUESTS`] workers and no deadline.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            workers: MAX_CONCURRENT_REQUESTS,
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    /// Number of worker threads; at least one is always used.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Overall time allowed for one run. Sites not finished by then are
    /// reported as cancelled.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Token that cancels every current and future run of this checker.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Check `username` on every site of `registry`.
    ///
    /// # Errors
    ///
    /// Returns a [`UsageError`] if the username is invalid. Per-site
    /// failures are part of the report.
    pub fn run(&self, registry: &Registry, username: &str) -> Result<Report, UsageError> {
        self.run_with(registry, username, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_result` for each site as it
    /// completes, in completion order.
    ///
    /// # Errors
    ///
    /// Returns a [`UsageError`] if the username is invalid.
    pub fn run_with<F>(
        &self,
        registry: &Registry,
        username: &str,
        mut on_result: F,
    ) -> Result<Report, UsageError>
    where
        F: FnMut(&CheckResult),
    {
        validate_username(username)?;

        let sites = registry.shared();
        let total = sites.len();
        let workers = self.workers.min(total);
        let stop = CancelToken::new();
        let next = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::unbounded::<(usize, CheckResult)>();

        debug!(username, sites = total, workers, "checking username");

        // Workers are detached so that a deadline or cancellation can return
        // without waiting for requests in flight.
        for id in 0..workers {
            let sites = Arc::clone(&sites);
            let next = Arc::clone(&next);
            let tx = tx.clone();
            let client = self.client.clone();
            let stop = stop.clone();
            let cancel = self.cancel.clone();
            let username = username.to_owned();

            let spawned = thread::Builder::new()
                .name(format!("socialname-worker-{id}"))
                .spawn(move || {
                    while !stop.is_cancelled() && !cancel.is_cancelled() {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(site) = sites.get(index) else {
                            break;
                        };
                        let result = check(&client, site, &username);
                        if tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            if let Err(error) = spawned {
                warn!(%error, "failed to spawn worker thread");
            }
        }
        drop(tx);

        let deadline = self.deadline.map(|d| Instant::now() + d);
        let mut slots: Vec<Option<CheckResult>> = vec![None; total];
        let mut received = 0;
        let mut cancelled = false;

        while received < total {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let wait = match deadline {
                Some(at) => match at.checked_duration_since(Instant::now()) {
                    Some(left) if !left.is_zero() => left.min(CANCEL_POLL),
                    _ => {
                        debug!(username, received, total, "deadline reached");
                        cancelled = true;
                        break;
                    }
                },
                None => CANCEL_POLL,
            };
            match rx.recv_timeout(wait) {
                Ok((index, result)) => {
                    on_result(&result);
                    if slots[index].replace(result).is_none() {
                        received += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        stop.cancel();

        let results: Vec<CheckResult> = slots
            .into_iter()
            .zip(sites.iter())
            .map(|(slot, site)| {
                slot.unwrap_or_else(|| {
                    let failure = if cancelled {
                        Failure::Cancelled
                    } else {
                        Failure::Internal("worker stopped before checking the site".into())
                    };
                    CheckResult::unknown(site, username, failure)
                })
            })
            .collect();

        Ok(Report::aggregate(username, results))
    }
}
