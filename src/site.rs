//! The site registry: which sites to check and how to read their answers.
//!
//! Site data is a JSON object mapping site names to definitions. A bundled
//! copy ships inside the binary; a local `.json` file or an `http(s)` URL can
//! replace it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde::de::{Deserializer, MapAccess, Visitor};
use thiserror::Error;
use tracing::{debug, warn};

use crate::check::Client;

/// Token in URL templates that is replaced by the candidate username.
pub const USERNAME_PLACEHOLDER: &str = "{}";

/// Site data compiled into the binary.
pub const BUNDLED_SITES: &str = include_str!("../resources/data.json");

/// How a site's response tells us whether a username exists.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Detection {
    /// A 2xx status means the username is taken.
    StatusCode {
        /// Send HEAD instead of GET; the body is never needed.
        head_only: bool,
    },
    /// The page for a missing user contains one of these messages.
    Message {
        /// Any one of them marks the username as available.
        error_messages: Vec<String>,
    },
    /// Missing users are redirected; redirects are not followed.
    ResponseUrl {
        /// Where the site sends requests for missing users.
        error_url: String,
    },
}

impl Detection {
    /// The `logic` name used in site data files.
    #[must_use]
    pub fn logic(&self) -> &'static str {
        match self {
            Self::StatusCode { .. } => "status_code",
            Self::Message { .. } => "message",
            Self::ResponseUrl { .. } => "response_url",
        }
    }
}

/// One site of the registry.
#[derive(Debug, Clone)]
pub struct SiteDefinition {
    /// Unique name of the site.
    pub name: String,
    /// Home page.
    pub url_main: String,
    /// Profile URL template containing [`USERNAME_PLACEHOLDER`].
    pub url_user: String,
    /// URL template requested instead of `url_user`, usually an API endpoint.
    pub url_probe: Option<String>,
    /// Usernames not matching this pattern are illegal on the site.
    pub regex_check: Option<Regex>,
    /// A username known to exist on the site.
    pub username_claimed: String,
    /// A username known not to exist on the site.
    pub username_unclaimed: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Classification rule.
    pub detection: Detection,
}

impl SiteDefinition {
    /// The profile URL for `username`.
    #[must_use]
    pub fn user_url(&self, username: &str) -> String {
        self.url_user.replace(USERNAME_PLACEHOLDER, username)
    }

    /// The URL actually requested for `username`, percent-encoded so that
    /// non-ASCII usernames can be sent.
    #[must_use]
    pub fn probe_url(&self, username: &str) -> String {
        let template = self.url_probe.as_deref().unwrap_or(&self.url_user);
        let raw = template.replace(USERNAME_PLACEHOLDER, username);
        url::Url::parse(&raw).map_or(raw, String::from)
    }

    /// Whether `username` is allowed by the site's `regexCheck`.
    #[must_use]
    pub fn accepts(&self, username: &str) -> bool {
        self.regex_check
            .as_ref()
            .is_none_or(|regex| regex.is_match(username))
    }

    fn from_value(name: &str, value: serde_json::Value) -> Result<Self, SiteDefect> {
        if name.trim().is_empty() {
            return Err(SiteDefect::EmptyName);
        }

        let raw: RawSite = serde_json::from_value(value).map_err(SiteDefect::Malformed)?;

        check_url("urlMain", &raw.url_main)?;
        check_template("urlUser", &raw.url_user)?;
        if let Some(probe) = &raw.url_probe {
            check_template("urlProbe", probe)?;
        }

        let regex_check = raw
            .regex_check
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(SiteDefect::InvalidRegex)?;

        let options = raw.options;
        let detection = match raw.logic.as_str() {
            "status_code" => Detection::StatusCode {
                head_only: options.request_head_only,
            },
            "message" => {
                let error_messages: Vec<String> = options
                    .error_message
                    .map(ErrorMessage::into_vec)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|m| !m.is_empty())
                    .collect();
                if error_messages.is_empty() {
                    return Err(SiteDefect::MissingDetectionRule {
                        logic: "message",
                        field: "errorMessage",
                    });
                }
                Detection::Message { error_messages }
            }
            "response_url" => match options.error_url {
                Some(error_url) if !error_url.is_empty() => {
                    check_url("errorUrl", &error_url)?;
                    Detection::ResponseUrl { error_url }
                }
                _ => {
                    return Err(SiteDefect::MissingDetectionRule {
                        logic: "response_url",
                        field: "errorUrl",
                    });
                }
            },
            other => return Err(SiteDefect::UnknownLogic(other.to_owned())),
        };

        Ok(Self {
            name: name.to_owned(),
            url_main: raw.url_main,
            url_user: raw.url_user,
            url_probe: raw.url_probe,
            regex_check,
            username_claimed: raw.username_claimed,
            username_unclaimed: raw.username_unclaimed,
            headers: options.headers.into_iter().collect(),
            detection,
        })
    }
}

impl fmt::Display for SiteDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url_main)
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), SiteDefect> {
    let parsed = url::Url::parse(value).map_err(|source| SiteDefect::InvalidUrl { field, source })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SiteDefect::UnsupportedScheme {
            field,
            scheme: parsed.scheme().to_owned(),
        });
    }
    Ok(())
}

fn check_template(field: &'static str, template: &str) -> Result<(), SiteDefect> {
    if !template.contains(USERNAME_PLACEHOLDER) {
        return Err(SiteDefect::MissingPlaceholder { field });
    }
    check_url(field, &template.replace(USERNAME_PLACEHOLDER, "username"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSite {
    logic: String,
    url_main: String,
    url_user: String,
    url_probe: Option<String>,
    regex_check: Option<String>,
    username_claimed: String,
    username_unclaimed: String,
    #[serde(default)]
    options: RawOptions,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptions {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    error_message: Option<ErrorMessage>,
    error_url: Option<String>,
    #[serde(default)]
    request_head_only: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(message) => vec![message],
            Self::Many(messages) => messages,
        }
    }
}

/// Top-level entries in file order, duplicates included.
struct OrderedEntries(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping site names to site definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                    entries.push(entry);
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// What is wrong with a single site definition.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SiteDefect {
    /// The site name is blank.
    #[error("site name cannot be empty")]
    EmptyName,
    /// A required field is missing or has the wrong type.
    #[error("{0}")]
    Malformed(#[source] serde_json::Error),
    /// A URL template lacks the `{}` placeholder.
    #[error("`{field}` must contain the `{{}}` username placeholder")]
    MissingPlaceholder {
        /// Field holding the template.
        field: &'static str,
    },
    /// A URL does not parse.
    #[error("`{field}` is not a valid URL: {source}")]
    InvalidUrl {
        /// Field holding the URL.
        field: &'static str,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// A URL is not http or https.
    #[error("`{field}` uses unsupported scheme `{scheme}`")]
    UnsupportedScheme {
        /// Field holding the URL.
        field: &'static str,
        /// The scheme found.
        scheme: String,
    },
    /// `regexCheck` does not compile.
    #[error("`regexCheck` is not a valid regular expression: {0}")]
    InvalidRegex(#[source] regex::Error),
    /// `logic` names no known detection rule.
    #[error("unknown logic `{0}` (expected status_code, message or response_url)")]
    UnknownLogic(String),
    /// The detection rule lacks the option it depends on.
    #[error("logic `{logic}` requires `options.{field}`")]
    MissingDetectionRule {
        /// The logic in use.
        logic: &'static str,
        /// The missing option.
        field: &'static str,
    },
}

/// A site definition rejected while loading.
#[derive(Debug, Error)]
#[error("{site}: {defect}")]
pub struct InvalidSite {
    /// Name of the rejected site.
    pub site: String,
    /// Why it was rejected.
    #[source]
    pub defect: SiteDefect,
}

/// Errors loading the site registry. These are fatal at startup.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The source does not name a `.json` resource.
    #[error("incorrect JSON file extension for site data `{0}`")]
    NotJson(String),
    /// A local file could not be read.
    #[error("reading site data `{}`: {source}", .path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A remote file could not be fetched.
    #[error("fetching site data `{url}`: {source}")]
    Fetch {
        /// URL that failed.
        url: String,
        /// Underlying HTTP error.
        #[source]
        source: Box<ureq::Error>,
    },
    /// A remote file answered with something other than 200.
    #[error("bad response while fetching site data `{url}`: HTTP {status}")]
    BadStatus {
        /// URL that failed.
        url: String,
        /// Status received.
        status: u16,
    },
    /// The data is not a JSON object.
    #[error("parsing site data `{location}`: {source}")]
    Parse {
        /// File, URL, or `<bundled>`.
        location: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
    /// One or more site definitions are malformed.
    #[error("site data is not valid: {}", join_invalid(.0))]
    InvalidSites(Vec<InvalidSite>),
    /// Nothing is left to check.
    #[error("no sites to check")]
    NoSites,
}

fn join_invalid(invalid: &[InvalidSite]) -> String {
    invalid
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Where site data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SiteSource {
    /// The copy compiled into the binary.
    #[default]
    Bundled,
    /// A local JSON file.
    File(PathBuf),
    /// A JSON file served over http or https.
    Url(String),
}

impl SiteSource {
    /// Treat `http://` and `https://` locations as URLs, anything else as a path.
    #[must_use]
    pub fn parse(location: &str) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(location.to_owned())
        } else {
            Self::File(PathBuf::from(location))
        }
    }

    fn check_extension(&self) -> Result<(), ConfigError> {
        let is_json = match self {
            Self::Bundled => true,
            Self::File(path) => path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json")),
            Self::Url(url) => url::Url::parse(url)
                .map(|u| u.path().to_ascii_lowercase().ends_with(".json"))
                .unwrap_or(false),
        };
        if is_json {
            Ok(())
        } else {
            Err(ConfigError::NotJson(self.to_string()))
        }
    }
}

impl fmt::Display for SiteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled => f.write_str("<bundled>"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// The loaded, validated set of sites, in file order.
///
/// Cloning is cheap: the definitions are shared.
#[derive(Debug, Clone)]
pub struct Registry {
    sites: Arc<[SiteDefinition]>,
}

impl Registry {
    /// Load and validate site data from `source`.
    ///
    /// `client` is only used for [`SiteSource::Url`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the data cannot be read or parsed, if any
    /// definition is malformed, or if it contains no sites.
    pub fn load(source: &SiteSource, client: &Client) -> Result<Self, ConfigError> {
        source.check_extension()?;

        let registry = match source {
            SiteSource::Bundled => Self::bundled()?,
            SiteSource::File(path) => Self::from_file(path)?,
            SiteSource::Url(url) => Self::from_url(client, url)?,
        };

        if registry.is_empty() {
            return Err(ConfigError::NoSites);
        }
        debug!(source = %source, sites = registry.len(), "loaded site registry");
        Ok(registry)
    }

    /// The registry compiled into the binary.
    ///
    /// # Errors
    ///
    /// Only fails if the bundled data itself is broken.
    pub fn bundled() -> Result<Self, ConfigError> {
        Self::parse(BUNDLED_SITES, "<bundled>")
    }

    /// Parse site data from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::InvalidSites`].
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Self::parse(json, "<inline>")
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&json, &path.display().to_string())
    }

    fn from_url(client: &Client, url: &str) -> Result<Self, ConfigError> {
        let fetch_error = |e: ureq::Error| ConfigError::Fetch {
            url: url.to_owned(),
            source: Box::new(e),
        };

        let mut response = client.agent().get(url).call().map_err(fetch_error)?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ConfigError::BadStatus {
                url: url.to_owned(),
                status,
            });
        }
        let json = response.body_mut().read_to_string().map_err(fetch_error)?;
        Self::parse(&json, url)
    }

    fn parse(json: &str, location: &str) -> Result<Self, ConfigError> {
        let OrderedEntries(entries) =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse {
                location: location.to_owned(),
                source,
            })?;

        let mut seen = HashSet::with_capacity(entries.len());
        let mut sites = Vec::with_capacity(entries.len());
        let mut invalid = Vec::new();

        for (name, value) in entries {
            if !seen.insert(name.clone()) {
                warn!(site = %name, "ignoring duplicate site definition");
                continue;
            }
            match SiteDefinition::from_value(&name, value) {
                Ok(site) => sites.push(site),
                Err(defect) => invalid.push(InvalidSite { site: name, defect }),
            }
        }

        if !invalid.is_empty() {
            return Err(ConfigError::InvalidSites(invalid));
        }

        Ok(Self {
            sites: sites.into(),
        })
    }

    /// Keep only the named sites (case-insensitive), in registry order.
    ///
    /// Names that match no site are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoSites`] if none of the names match.
    pub fn filter<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, ConfigError> {
        let mut keep = vec![false; self.sites.len()];
        for wanted in names {
            let wanted = wanted.as_ref();
            match self
                .sites
                .iter()
                .position(|site| site.name.eq_ignore_ascii_case(wanted))
            {
                Some(index) => keep[index] = true,
                None => warn!(site = wanted, "desired site not found"),
            }
        }

        let sites: Arc<[SiteDefinition]> = self
            .sites
            .iter()
            .zip(keep)
            .filter_map(|(site, keep)| keep.then(|| site.clone()))
            .collect();

        if sites.is_empty() {
            return Err(ConfigError::NoSites);
        }
        Ok(Self { sites })
    }

    /// Look a site up by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SiteDefinition> {
        self.sites.iter().find(|site| site.name == name)
    }

    /// Sites in registry order.
    pub fn iter(&self) -> std::slice::Iter<'_, SiteDefinition> {
        self.sites.iter()
    }

    /// Number of sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Whether the registry has no sites.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub(crate) fn shared(&self) -> Arc<[SiteDefinition]> {
        Arc::clone(&self.sites)
    }

    /// Markdown list of supported sites, sorted by name.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut sites: Vec<&SiteDefinition> = self.sites.iter().collect();
        sites.sort_by_key(|site| site.name.to_lowercase());

        let mut out = format!(
            "## List Of Supported Sites ({} Sites In Total!)\n",
            sites.len()
        );
        for (index, site) in sites.iter().enumerate() {
            out.push_str(&format!("{}. [{}]({})\n", index + 1, site.name, site.url_main));
        }
        out
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a SiteDefinition;
    type IntoIter = std::slice::Iter<'a, SiteDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
