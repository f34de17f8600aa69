//! # rcproxy
//!
//! A caching HTTP/1.1 reverse proxy built on Tokio.
//!
//! Every request is forwarded to one fixed upstream. Response bodies are
//! remembered in memory, keyed by request path and query, and later requests
//! for the same key are answered without contacting the upstream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rcproxy::{CacheStore, HttpClient, ProxyHandler, Request, Server, Upstream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let upstream = Upstream::parse("http://127.0.0.1:9000")?;
//!     let cache = Arc::new(CacheStore::new());
//!     let proxy = Arc::new(ProxyHandler::new(upstream, HttpClient::new(), cache));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .run(move |req: Request| {
//!             let proxy = Arc::clone(&proxy);
//!             async move { proxy.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod http;
pub mod proxy;
pub mod server;

pub use cache::CacheStore;
pub use config::{ProxyConfig, Upstream};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{HttpClient, ProxyError, ProxyHandler};
pub use server::{Server, ServerError};
