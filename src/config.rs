//! Proxy configuration.
//!
//! There is no configuration file and there are no flags: the binary runs with
//! [`ProxyConfig::default`]. Embedders and tests build a [`ProxyConfig`] in
//! code and hand its pieces to the server and handler constructors.

use std::fmt;

use thiserror::Error;
use url::{ParseError, Url};

/// Address the proxy listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Base URL every request is forwarded to.
pub const DEFAULT_UPSTREAM: &str = "http://httpbin.org";

/// Errors produced while parsing an upstream base URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("upstream URL {url:?} is malformed: {source}")]
    Malformed {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("unsupported upstream scheme in {url:?}: only http:// is supported")]
    UnsupportedScheme { url: String },

    #[error("upstream URL {url:?} has no host")]
    MissingHost { url: String },

    #[error("upstream URL {url:?} has an invalid port")]
    InvalidPort { url: String },

    #[error("upstream URL {url:?} must not contain a path, query or fragment")]
    UnexpectedPath { url: String },

    #[error("upstream URL {url:?} must not carry credentials")]
    UnexpectedCredentials { url: String },
}

/// The single fixed backend all requests are forwarded to.
///
/// # Examples
///
/// ```
/// use rcproxy::config::Upstream;
///
/// let upstream = Upstream::parse("http://127.0.0.1:9000").unwrap();
/// assert_eq!(upstream.host(), "127.0.0.1");
/// assert_eq!(upstream.port(), 9000);
/// assert_eq!(upstream.authority(), "127.0.0.1:9000");
///
/// let default_port = Upstream::parse("http://httpbin.org/").unwrap();
/// assert_eq!(default_port.authority(), "httpbin.org");
/// assert_eq!(default_port.socket_addr(), "httpbin.org:80");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    host: String,
    port: u16,
}

impl Upstream {
    const DEFAULT_PORT: u16 = 80;

    /// Parses an `http://host[:port][/]` base URL.
    ///
    /// IPv6 literals must be bracketed (`http://[::1]:8080`). Host names are
    /// normalized by [`Url::parse`] (lowercased, IDNA-encoded).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first problem found.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let err_url = || url.to_owned();

        let parsed = Url::parse(url).map_err(|source| match source {
            ParseError::RelativeUrlWithoutBase => ConfigError::UnsupportedScheme { url: err_url() },
            ParseError::EmptyHost => ConfigError::MissingHost { url: err_url() },
            ParseError::InvalidPort => ConfigError::InvalidPort { url: err_url() },
            source => ConfigError::Malformed {
                url: err_url(),
                source,
            },
        })?;

        if parsed.scheme() != "http" {
            return Err(ConfigError::UnsupportedScheme { url: err_url() });
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(ConfigError::UnexpectedCredentials { url: err_url() });
        }
        if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(ConfigError::UnexpectedPath { url: err_url() });
        }

        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::MissingHost { url: err_url() })?;
        let port = parsed
            .port_or_known_default()
            .filter(|port| *port != 0)
            .ok_or_else(|| ConfigError::InvalidPort { url: err_url() })?;

        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }

    /// Host name or address (IPv6 literals keep their brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Value for the outbound `Host` header; the port is omitted when it is
    /// the scheme default.
    pub fn authority(&self) -> String {
        if self.port == Self::DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}", self.authority())
    }
}

/// Everything needed to start the proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind the listening socket to.
    pub listen_addr: String,
    /// Backend every request is forwarded to.
    pub upstream: Upstream,
    /// Number of independently locked cache partitions.
    pub cache_shards: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            upstream: Upstream {
                host: "httpbin.org".to_owned(),
                port: Upstream::DEFAULT_PORT,
            },
            cache_shards: 1,
        }
    }
}
