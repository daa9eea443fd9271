//! Alias-keyed table of open proxy sessions
//!
//! The map is only locked to look up, reserve, insert or remove an alias.
//! Chain establishment, server shutdown and teardown all run outside the
//! lock. An alias is reserved while it is being opened so a concurrent open
//! of the same alias fails instead of racing.

mod session;

pub use session::{ProxyClosed, ProxyInfo, ProxyOpened, ProxyOptions, ProxySession, ProxyStatus};

use crate::chain::{HopConnector, HopSpec, TunnelChain};
use crate::error::ProxyError;
use crate::helper::bind_loopback_listener;
use crate::socks::Socks5Server;
use crate::ssh::SshConnector;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug)]
enum SessionSlot {
    /// Reserved by an open in progress
    Opening,
    Open(ProxySession),
}

type SessionMap = HashMap<String, SessionSlot>;

/// Registry of proxy sessions
#[derive(Debug)]
pub struct SessionRegistry {
    connector: Arc<dyn HopConnector>,
    options: ProxyOptions,
    sessions: Mutex<SessionMap>,
}

impl SessionRegistry {
    /// Create a registry opening hops through `connector`
    pub fn new(connector: Arc<dyn HopConnector>, options: ProxyOptions) -> Self {
        SessionRegistry {
            connector,
            options,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry using SSH for every hop
    pub fn with_ssh(options: ProxyOptions) -> Self {
        let connector = Arc::new(SshConnector::new(options.chain.host_key_policy));
        Self::new(connector, options)
    }

    /// Options applied to every session
    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    fn lock_sessions(&self) -> MutexGuard<'_, SessionMap> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a proxy on `127.0.0.1:listen_port` routed through `hops`
    ///
    /// The port is bound before any hop is contacted, so a busy port fails
    /// fast. Whatever this call created is released again on failure.
    pub async fn open_proxy(
        &self,
        alias: &str,
        listen_port: u16,
        hops: Vec<HopSpec>,
    ) -> Result<ProxyOpened, ProxyError> {
        if listen_port == 0 {
            return Err(ProxyError::InvalidPort(listen_port));
        }

        let reservation = Reservation::reserve(&self.sessions, alias)?;

        match self.start_session(alias, listen_port, hops).await {
            Ok(session) => {
                let opened = session.opened();
                reservation.commit(session);
                info!(
                    "Proxy '{}' started on 127.0.0.1:{} through {} hop(s)",
                    opened.alias, opened.listen_port, opened.hop_count
                );
                Ok(opened)
            }
            Err(e) => {
                warn!("Failed to open proxy '{}': {}", alias, e);
                Err(e)
            }
        }
    }

    async fn start_session(
        &self,
        alias: &str,
        listen_port: u16,
        hops: Vec<HopSpec>,
    ) -> Result<ProxySession, ProxyError> {
        let listener = bind_loopback_listener(listen_port).map_err(|source| {
            ProxyError::PortInUse {
                port: listen_port,
                source,
            }
        })?;

        let chain = Arc::new(
            TunnelChain::establish(hops, self.connector.clone(), self.options.chain.clone())
                .await?,
        );

        let server = match Socks5Server::start(listener, chain.clone(), self.options.server_options())
        {
            Ok(server) => server,
            Err(source) => {
                if let Err(errors) = chain.teardown().await {
                    for err in errors {
                        warn!("Rollback of proxy '{}': {}", alias, err);
                    }
                }
                return Err(ProxyError::PortInUse {
                    port: listen_port,
                    source,
                });
            }
        };

        Ok(ProxySession::new(
            alias.to_string(),
            listen_port,
            chain,
            server,
        ))
    }

    /// Close the proxy registered as `alias`
    ///
    /// Teardown failures are reported in the result, never raised.
    pub async fn close_proxy(&self, alias: &str) -> Result<ProxyClosed, ProxyError> {
        let session = {
            let mut sessions = self.lock_sessions();
            match sessions.remove(alias) {
                None => return Err(ProxyError::UnknownAlias(alias.to_string())),
                Some(SessionSlot::Opening) => {
                    sessions.insert(alias.to_string(), SessionSlot::Opening);
                    return Err(ProxyError::AliasPending(alias.to_string()));
                }
                Some(SessionSlot::Open(session)) => session,
            }
        };

        debug!("Closing proxy '{}'", alias);
        Ok(session.close().await)
    }

    /// Close every open proxy, best effort
    pub async fn close_all(&self) -> Vec<ProxyClosed> {
        let aliases: Vec<String> = {
            let sessions = self.lock_sessions();
            let mut aliases: Vec<String> = sessions
                .iter()
                .filter(|(_, slot)| matches!(slot, SessionSlot::Open(_)))
                .map(|(alias, _)| alias.clone())
                .collect();
            aliases.sort();
            aliases
        };

        let mut closed = Vec::with_capacity(aliases.len());
        for alias in aliases {
            match self.close_proxy(&alias).await {
                Ok(result) => closed.push(result),
                Err(e) => debug!("Skipping proxy '{}': {}", alias, e),
            }
        }
        closed
    }

    /// Snapshot of every open proxy, sorted by alias
    pub fn list(&self) -> Vec<ProxyInfo> {
        let sessions = self.lock_sessions();
        let mut infos: Vec<ProxyInfo> = sessions
            .values()
            .filter_map(|slot| match slot {
                SessionSlot::Open(session) => Some(session.info()),
                SessionSlot::Opening => None,
            })
            .collect();
        infos.sort_by(|a, b| a.alias.cmp(&b.alias));
        infos
    }

    /// Snapshot of one open proxy
    pub fn get(&self, alias: &str) -> Option<ProxyInfo> {
        match self.lock_sessions().get(alias) {
            Some(SessionSlot::Open(session)) => Some(session.info()),
            _ => None,
        }
    }

    /// Whether `alias` is registered, open or still opening
    pub fn contains(&self, alias: &str) -> bool {
        self.lock_sessions().contains_key(alias)
    }

    /// Number of open proxies
    pub fn len(&self) -> usize {
        self.lock_sessions()
            .values()
            .filter(|slot| matches!(slot, SessionSlot::Open(_)))
            .count()
    }

    /// Whether no proxy is open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections currently relaying through `alias`
    pub fn active_relays(&self, alias: &str) -> Option<usize> {
        self.get(alias).map(|info| info.active_relays)
    }
}

/// Placeholder for an alias being opened
///
/// Dropping it without [`Reservation::commit`] frees the alias again, which
/// also covers a cancelled `open_proxy` future.
struct Reservation<'a> {
    sessions: &'a Mutex<SessionMap>,
    alias: String,
    committed: bool,
}

impl<'a> Reservation<'a> {
    fn reserve(sessions: &'a Mutex<SessionMap>, alias: &str) -> Result<Self, ProxyError> {
        let mut map = sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(alias) {
            return Err(ProxyError::DuplicateAlias(alias.to_string()));
        }
        map.insert(alias.to_string(), SessionSlot::Opening);
        Ok(Reservation {
            sessions,
            alias: alias.to_string(),
            committed: false,
        })
    }

    fn commit(mut self, session: ProxySession) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.alias.clone(), SessionSlot::Open(session));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.alias);
        }
    }
}
