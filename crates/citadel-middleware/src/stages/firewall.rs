//! Request firewall stage.
//!
//! Matches the request URL, body and headers against a set of blocked
//! patterns. Patterns are regular expressions compiled once, matched
//! case-insensitively, and checked in order; the first hit blocks the
//! request with a 403 naming where it was found.
//!
//! The URL is checked twice: as received, and with percent-encoding
//! decoded, so `%3Cscript%3E` is caught the same way as `<script>`. The
//! body is only checked for methods that carry one (`POST`, `PUT`,
//! `PATCH`), decoded with invalid UTF-8 dropped, and read from the buffered
//! request without being modified. Headers are matched as one line.

use http::{HeaderMap, Method};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::GatewayContext;
use crate::error::Rejection;
use crate::middleware::{BoxFuture, Stage, StageOutcome};
use crate::types::{method_carries_body, BufferedRequest};

/// Patterns blocked when no list is configured.
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "onerror=",
    "SELECT.*FROM",
    "DROP.*TABLE",
    "UNION.*SELECT",
];

/// Firewall configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// Whether the firewall inspects requests at all.
    pub enabled: bool,
    /// Regular expressions matched case-insensitively.
    pub blocked_patterns: Vec<String>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_patterns: DEFAULT_BLOCKED_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
        }
    }
}

/// Ordered, immutable set of compiled patterns.
#[derive(Debug, Clone, Default)]
pub struct BlockedPatternSet {
    patterns: Vec<Regex>,
}

impl BlockedPatternSet {
    /// Compile `patterns` case-insensitively.
    ///
    /// Fails on the first pattern that is not a valid regular expression.
    pub fn compile<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Source of the first pattern matching `haystack`.
    pub fn first_match(&self, haystack: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(haystack))
            .map(Regex::as_str)
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Part of the request a pattern matched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Full URL, raw or decoded.
    Url,
    /// Request body.
    Body,
    /// Serialized header set.
    Headers,
}

impl Location {
    /// Lower-case name used in rejection reasons.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Body => "body",
            Self::Headers => "headers",
        }
    }
}

/// Firewall decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No pattern matched.
    Allow,
    /// A pattern matched at the given location.
    Block(Location),
}

/// Pattern-based request filter.
///
/// # Example
///
/// ```
/// use citadel_middleware::stages::firewall::{FirewallConfig, Location, RequestFirewall, Verdict};
/// use http::{HeaderMap, Method};
///
/// let firewall = RequestFirewall::new(&FirewallConfig::default()).unwrap();
/// let verdict = firewall.inspect(
///     "http://gw/data/items?q=1%20UNION%20SELECT%20password",
///     &Method::GET,
///     &HeaderMap::new(),
///     b"",
/// );
/// assert_eq!(verdict, Verdict::Block(Location::Url));
/// ```
#[derive(Debug, Clone)]
pub struct RequestFirewall {
    enabled: bool,
    patterns: BlockedPatternSet,
}

impl RequestFirewall {
    /// Build a firewall from configuration.
    pub fn new(config: &FirewallConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            enabled: config.enabled,
            patterns: BlockedPatternSet::compile(&config.blocked_patterns)?,
        })
    }

    /// A firewall that allows everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            patterns: BlockedPatternSet::default(),
        }
    }

    /// Whether inspection is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The compiled pattern set.
    pub fn patterns(&self) -> &BlockedPatternSet {
        &self.patterns
    }

    /// Inspect the parts of a request.
    pub fn inspect(&self, url: &str, method: &Method, headers: &HeaderMap, body: &[u8]) -> Verdict {
        self.scan(url, headers, method_carries_body(method).then_some(body))
    }

    /// Inspect a buffered request.
    pub fn inspect_request(&self, request: &BufferedRequest) -> Verdict {
        self.scan(
            &request.full_url(),
            request.headers(),
            request.carries_body().then(|| request.body().as_ref()),
        )
    }

    fn scan(&self, url: &str, headers: &HeaderMap, body: Option<&[u8]>) -> Verdict {
        if !self.enabled {
            return Verdict::Allow;
        }

        if self.patterns.first_match(url).is_some()
            || self.patterns.first_match(&decode_url(url)).is_some()
        {
            return Verdict::Block(Location::Url);
        }

        if let Some(body) = body.filter(|b| !b.is_empty()) {
            if self.patterns.first_match(&decode_body(body)).is_some() {
                return Verdict::Block(Location::Body);
            }
        }

        if self.patterns.first_match(&serialize_headers(headers)).is_some() {
            return Verdict::Block(Location::Headers);
        }

        Verdict::Allow
    }
}

/// Decode a body as UTF-8, dropping invalid sequences.
///
/// `<scr\xffipt>` decodes to `<script>`, not `<scr\u{fffd}ipt>`.
fn decode_body(body: &[u8]) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                return out;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(skip) => rest = &after[skip..],
                    None => return out,
                }
            }
        }
    }
}

/// Percent-decode a URL, keeping its `k=v&k=v` shape.
fn decode_url(url: &str) -> String {
    url::form_urlencoded::parse(url.as_bytes())
        .map(|(k, v)| {
            if v.is_empty() {
                k.into_owned()
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Render the header set on a single line, `name: value, name: value`.
fn serialize_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {}", String::from_utf8_lossy(value.as_bytes())))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Stage for RequestFirewall {
    fn name(&self) -> &'static str {
        "request-firewall"
    }

    fn check<'a>(
        &'a self,
        ctx: &'a mut GatewayContext,
        request: &'a BufferedRequest,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            match self.inspect_request(request) {
                Verdict::Allow => StageOutcome::Continue,
                Verdict::Block(location) => {
                    warn!(
                        client = ctx.client_id(),
                        location = location.as_str(),
                        "request blocked by firewall"
                    );
                    StageOutcome::Reject(Rejection::firewall_blocked(location.as_str()))
                }
            }
        })
    }
}
