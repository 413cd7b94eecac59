//! Command-line and environment configuration.

use crate::fetcher::DEFAULT_ENDPOINT;
use crate::pattern::{MatchPattern, PatternError, DEFAULT_PAGE_PATTERN};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Validated runtime configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    endpoint: Url,
    cache_path: PathBuf,
    refresh_interval: Duration,
    page_pattern: MatchPattern,
    request_timeout: Duration,
}

impl Settings {
    /// Constructs settings from already validated parts.
    pub fn new(
        endpoint: Url,
        cache_path: PathBuf,
        refresh_interval: Duration,
        page_pattern: MatchPattern,
        request_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            cache_path,
            refresh_interval,
            page_pattern,
            request_timeout,
        }
    }

    /// URL serving the list.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// JSON file backing the cache.
    pub fn cache_path(&self) -> &PathBuf {
        &self.cache_path
    }

    /// Period of the scheduled refresh.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Pages the agent attaches to.
    pub fn page_pattern(&self) -> &MatchPattern {
        &self.page_pattern
    }

    /// HTTP timeout for one list download.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
            cache_path: PathBuf::from("data/podlabel-cache.json"),
            refresh_interval: Duration::from_secs(3 * SECONDS_PER_DAY),
            page_pattern: MatchPattern::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Command-line interface for the `podlabel` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "podlabel",
    version,
    about = "Fetch the pod user list and label matching profiles in HTML pages"
)]
pub struct Cli {
    /// URL of the newline-delimited profile list
    #[arg(long, global = true, env = "PODLABEL_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// JSON file holding the cached list
    #[arg(
        long,
        global = true,
        env = "PODLABEL_CACHE",
        default_value = "data/podlabel-cache.json"
    )]
    pub cache: PathBuf,

    /// Days between scheduled refreshes
    #[arg(long, global = true, env = "PODLABEL_INTERVAL_DAYS", default_value_t = 3)]
    pub interval_days: u64,

    /// Pages the labeler attaches to
    #[arg(long, global = true, env = "PODLABEL_PAGE_PATTERN", default_value = DEFAULT_PAGE_PATTERN)]
    pub page_pattern: String,

    /// Seconds before a list download is abandoned
    #[arg(long, global = true, env = "PODLABEL_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Action to perform
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of the `podlabel` binary.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Download the list now and store it in the cache
    Refresh,
    /// Show the trigger panel: last update time and cached entry count
    Status,
    /// Report whether each URL matches a cached entry
    Check {
        /// Profile URLs to test
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Label an HTML page and print the result
    Annotate {
        /// Address the page was loaded from
        #[arg(long)]
        url: String,
        /// HTML file to read, `-` or nothing for stdin
        input: Option<String>,
    },
    /// Run the background service with its refresh schedule
    Serve {
        /// Seconds to run before shutting down (runs until Ctrl-C when absent)
        #[arg(long, env = "PODLABEL_DURATION_SECS")]
        duration_secs: Option<u64>,
    },
}

impl Cli {
    /// Converts the parsed flags into validated [`Settings`].
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let endpoint = Url::parse(&self.endpoint).map_err(|source| ConfigError::Endpoint {
            value: self.endpoint.clone(),
            source,
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ConfigError::EndpointScheme(endpoint.scheme().to_string()));
        }
        if self.interval_days == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let page_pattern = MatchPattern::parse(&self.page_pattern).map_err(ConfigError::Pattern)?;

        Ok(Settings::new(
            endpoint,
            self.cache.clone(),
            Duration::from_secs(self.interval_days.saturating_mul(SECONDS_PER_DAY)),
            page_pattern,
            Duration::from_secs(self.timeout_secs),
        ))
    }
}

/// Rejected configuration values.
#[derive(Debug)]
pub enum ConfigError {
    /// The endpoint is not a URL.
    Endpoint {
        /// Value as given.
        value: String,
        /// Parser failure.
        source: url::ParseError,
    },
    /// The endpoint uses a scheme other than http(s).
    EndpointScheme(String),
    /// The refresh interval is zero days.
    ZeroInterval,
    /// The request timeout is zero seconds.
    ZeroTimeout,
    /// The page pattern is malformed.
    Pattern(PatternError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint { value, source } => write!(f, "invalid endpoint `{value}`: {source}"),
            Self::EndpointScheme(scheme) => {
                write!(f, "endpoint must use http or https, not `{scheme}`")
            }
            Self::ZeroInterval => f.write_str("refresh interval must be at least one day"),
            Self::ZeroTimeout => f.write_str("request timeout must be at least one second"),
            Self::Pattern(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Endpoint { source, .. } => Some(source),
            Self::Pattern(err) => Some(err),
            _ => None,
        }
    }
}
