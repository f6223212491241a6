//! Per-account connection cache.
//!
//! Holds at most one live [`MessagingChannel`] per source account for the
//! lifetime of the process, shared by the delivery loop and reply
//! detection. Creation is serialised per account: concurrent callers for
//! the same account wait on that account's slot while the first one
//! connects, and then all receive the same connection. Callers for other
//! accounts are not blocked.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use super::RateLimiter;
use super::channel::{
    ChannelConnector, ChannelError, IncomingEvent, MessagingChannel, Recipient, ResolvedUser,
    UserInfo,
};
use crate::store::SourceAccount;

/// A cached connection plus the send pacing for its account.
#[derive(Debug)]
pub struct AccountConnection {
    account_id: String,
    channel: Arc<dyn MessagingChannel>,
    limiter: RateLimiter,
}

impl AccountConnection {
    fn new(account_id: String, channel: Arc<dyn MessagingChannel>, min_interval: Duration) -> Self {
        Self {
            account_id,
            channel,
            limiter: RateLimiter::new(min_interval),
        }
    }

    /// Account this connection belongs to.
    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Sends one message, waiting for the account's pacing first.
    ///
    /// Sends on one account are serialised by the limiter. While a flood
    /// wait is in force the send is refused with [`ChannelError::FloodWait`]
    /// instead of sleeping it out.
    pub async fn send(&self, recipient: Recipient, text: &str) -> Result<(), ChannelError> {
        if self.limiter.is_penalized().await {
            let remaining = self.limiter.time_until_allowed().await.as_secs().max(1);
            return Err(ChannelError::FloodWait(
                u32::try_from(remaining).unwrap_or(u32::MAX),
            ));
        }

        let waited = self.limiter.wait_and_acquire().await;
        if !waited.is_zero() {
            debug!(account_id = %self.account_id, "Waited {:?} for rate limit", waited);
        }

        let result = self.channel.send_message(recipient, text).await;
        if let Err(ChannelError::FloodWait(seconds)) = &result {
            self.limiter.penalize(*seconds).await;
        }
        result
    }

    /// Resolves a contact identifier through this account.
    pub async fn resolve_identifier(&self, identifier: &str) -> Result<ResolvedUser, ChannelError> {
        self.channel.resolve_identifier(identifier).await
    }

    /// Looks up a profile, falling back to a placeholder on failure.
    pub async fn user_info_or_placeholder(&self, recipient: Recipient) -> UserInfo {
        match self.channel.user_info(recipient).await {
            Ok(info) => info,
            Err(e) => {
                debug!(user_id = recipient.user_id, "Profile lookup failed: {}", e);
                UserInfo::unknown(recipient.user_id)
            }
        }
    }
}

type Slot = Arc<Mutex<Option<Arc<AccountConnection>>>>;

/// Registry of live connections, one per account id.
pub struct ConnectionRegistry {
    connector: Arc<dyn ChannelConnector>,
    min_send_interval: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    watched: Mutex<HashSet<String>>,
    incoming: mpsc::Sender<IncomingEvent>,
}

impl ConnectionRegistry {
    /// Creates an empty registry. Incoming messages from every watched
    /// account are forwarded to `incoming`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        min_send_interval: Duration,
        incoming: mpsc::Sender<IncomingEvent>,
    ) -> Self {
        Self {
            connector,
            min_send_interval,
            slots: Mutex::new(HashMap::new()),
            watched: Mutex::new(HashSet::new()),
            incoming,
        }
    }

    async fn slot(&self, account_id: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(account_id.to_owned()).or_default())
    }

    /// Returns the account's connection, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns the connector's error (typically [`ChannelError::Auth`]);
    /// nothing is cached in that case and the next call tries again.
    pub async fn get_or_create(
        &self,
        account: &SourceAccount,
    ) -> Result<Arc<AccountConnection>, ChannelError> {
        let slot = self.slot(&account.id).await;
        let mut entry = slot.lock().await;

        if let Some(connection) = entry.as_ref() {
            return Ok(Arc::clone(connection));
        }

        info!(account_id = %account.id, "Opening connection for account");
        let channel = self.connector.connect(account).await?;
        let connection = Arc::new(AccountConnection::new(
            account.id.clone(),
            channel,
            self.min_send_interval,
        ));
        *entry = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Installs reply detection for the account, at most once per process.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel refuses the watcher; the account is
    /// not marked and the next call tries again.
    pub async fn ensure_reply_watch(
        &self,
        connection: &AccountConnection,
    ) -> Result<(), ChannelError> {
        let mut watched = self.watched.lock().await;
        if watched.contains(connection.account_id()) {
            return Ok(());
        }

        connection
            .channel
            .watch_incoming(connection.account_id(), self.incoming.clone())?;
        watched.insert(connection.account_id().to_owned());
        Ok(())
    }

    /// Drops and disconnects the account's connection, if any.
    ///
    /// Used when the stored credential stops working; the next
    /// [`get_or_create`](Self::get_or_create) reconnects from scratch.
    pub async fn evict(&self, account_id: &str) {
        // The slot stays in the map; holding its lock keeps a concurrent
        // get_or_create from connecting until the old connection is gone.
        let slot = self.slot(account_id).await;
        let mut entry = slot.lock().await;
        self.watched.lock().await.remove(account_id);

        if let Some(connection) = entry.take() {
            warn!(account_id, "Evicting connection");
            connection.channel.disconnect();
        }
    }

    /// Number of live connections.
    pub async fn live_connections(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        let mut live = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                live += 1;
            }
        }
        live
    }

    /// Disconnects every cached connection.
    pub async fn shutdown(&self) {
        let slots: Vec<(String, Slot)> = self.slots.lock().await.drain().collect();
        self.watched.lock().await.clear();

        for (account_id, slot) in slots {
            if let Some(connection) = slot.lock().await.take() {
                debug!(account_id = %account_id, "Closing connection");
                connection.channel.disconnect();
            }
        }
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("min_send_interval", &self.min_send_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::testing::{FakeConnector, account};

    fn registry(
        connector: &Arc<FakeConnector>,
    ) -> (ConnectionRegistry, mpsc::Receiver<IncomingEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let connector: Arc<dyn ChannelConnector> = connector.clone();
        (ConnectionRegistry::new(connector, Duration::ZERO, tx), rx)
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_connects_once() {
        let connector = Arc::new(FakeConnector::with_delay(Duration::from_millis(20)));
        let (registry, _rx) = registry(&connector);
        let registry = Arc::new(registry);
        let acc = account("acc-1");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            let acc = acc.clone();
            handles.push(tokio::spawn(async move {
                registry.get_or_create(&acc).await.unwrap()
            }));
        }

        let mut connections = Vec::new();
        for handle in handles {
            connections.push(handle.await.unwrap());
        }

        assert_eq!(connector.connects(), 1);
        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
        assert_eq!(registry.live_connections().await, 1);
    }

    #[tokio::test]
    async fn test_accounts_get_separate_connections() {
        let connector = Arc::new(FakeConnector::default());
        let (registry, _rx) = registry(&connector);

        let a = registry.get_or_create(&account("a")).await.unwrap();
        let b = registry.get_or_create(&account("b")).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_cached() {
        let connector = Arc::new(FakeConnector::default());
        connector.reject_account("bad");
        let (registry, _rx) = registry(&connector);

        let err = registry.get_or_create(&account("bad")).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(registry.live_connections().await, 0);

        connector.accept_account("bad");
        assert!(registry.get_or_create(&account("bad")).await.is_ok());
    }

    #[tokio::test]
    async fn test_reply_watch_installed_once() {
        let connector = Arc::new(FakeConnector::default());
        let (registry, mut rx) = registry(&connector);
        let connection = registry.get_or_create(&account("acc")).await.unwrap();

        registry.ensure_reply_watch(&connection).await.unwrap();
        registry.ensure_reply_watch(&connection).await.unwrap();

        let channel = connector.channel("acc").unwrap();
        assert_eq!(channel.watch_installs(), 1);

        channel.receive_from(99).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.account_id, "acc");
        assert_eq!(event.sender_id, 99);
    }

    #[tokio::test]
    async fn test_evict_forces_reconnect() {
        let connector = Arc::new(FakeConnector::default());
        let (registry, _rx) = registry(&connector);

        registry.get_or_create(&account("acc")).await.unwrap();
        registry.evict("acc").await;
        assert!(connector.channel("acc").unwrap().is_disconnected());

        registry.get_or_create(&account("acc")).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_evict_during_connect_leaves_one_connection() {
        let connector = Arc::new(FakeConnector::with_delay(Duration::from_millis(50)));
        let (registry, _rx) = registry(&connector);
        let registry = Arc::new(registry);

        let connecting = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create(&account("acc")).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.evict("acc").await;
        let first = connecting.await.unwrap();

        // Evict waited for the connect and closed it; the next caller reconnects.
        assert!(connector.channel("acc").unwrap().is_disconnected());
        assert_eq!(registry.live_connections().await, 0);
        let second = registry.get_or_create(&account("acc")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(registry.live_connections().await, 1);
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_flood_wait_penalizes_limiter() {
        let connector = Arc::new(FakeConnector::default());
        let (registry, _rx) = registry(&connector);
        let connection = registry.get_or_create(&account("acc")).await.unwrap();
        connector.channel("acc").unwrap().flood_user(5, 30);

        let recipient = Recipient {
            user_id: 5,
            access_hash: None,
        };
        let err = connection.send(recipient, "hi").await.unwrap_err();

        assert!(matches!(err, ChannelError::FloodWait(30)));
        assert!(!connection.limiter.is_allowed().await);
    }

    #[tokio::test]
    async fn test_send_during_flood_wait_fails_fast() {
        let connector = Arc::new(FakeConnector::default());
        let (registry, _rx) = registry(&connector);
        let connection = registry.get_or_create(&account("acc")).await.unwrap();
        let channel = connector.channel("acc").unwrap();
        channel.flood_user(5, 3600);

        let flooded = Recipient {
            user_id: 5,
            access_hash: None,
        };
        let other = Recipient {
            user_id: 6,
            access_hash: None,
        };
        connection.send(flooded, "hi").await.unwrap_err();

        let result =
            tokio::time::timeout(Duration::from_secs(1), connection.send(other, "hi")).await;
        let err = result.expect("send slept through the flood wait").unwrap_err();
        assert!(matches!(err, ChannelError::FloodWait(secs) if secs > 3500));
        assert!(channel.sent().is_empty());
    }
}
