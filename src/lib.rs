//! # Hopsocks - SOCKS5 through chained SSH tunnels
//!
//! Hopsocks opens an ordered chain of SSH hops from the local host, each one
//! reached through the previous, and exposes a SOCKS5 endpoint on
//! `127.0.0.1` whose CONNECT requests leave the network from the last hop.
//!
//! ## Features
//!
//! - **Nested Tunnels**: hop i is reached through a loopback forwarder riding on hop i-1
//! - **Ordered Lifecycle**: hops open strictly in order and close strictly in reverse
//! - **Remote DNS**: domain names are resolved by the last hop, never locally
//! - **Named Sessions**: proxies are opened and closed by alias
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hopsocks::chain::HopSpec;
//! use hopsocks::registry::{ProxyOptions, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = SessionRegistry::with_ssh(ProxyOptions::default());
//!     let hops = vec![
//!         HopSpec::with_password("bastion.example.com", 22, "ops", "secret"),
//!         HopSpec::with_password("10.0.0.5", 22, "deploy", "secret"),
//!     ];
//!
//!     let opened = registry.open_proxy("lab", 1080, hops).await?;
//!     println!("SOCKS5 on 127.0.0.1:{}", opened.listen_port);
//!
//!     registry.close_proxy("lab").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> 127.0.0.1:port -> hop 0 -> ... -> hop N-1 -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod chain;
pub mod config;
pub mod error;
pub mod helper;
pub mod registry;
pub mod socks;
pub mod ssh;

// Re-export commonly used items
pub use chain::{ChainOptions, ChainState, Credential, HopSpec, TunnelChain};
pub use error::{ChainError, ChannelError, ErrorCategory, ProxyError, Socks5Error, TeardownError};
pub use registry::{ProxyClosed, ProxyOpened, ProxyOptions, SessionRegistry};
pub use ssh::{HostKeyPolicy, SshConnector};

/// Version of the Hopsocks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
