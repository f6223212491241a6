//! In-process fakes for the messaging channel, used by tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use super::channel::{
    ChannelConnector, ChannelError, IncomingEvent, MessagingChannel, Recipient, ResolvedUser,
    UserInfo,
};
use crate::store::{AccountStatus, SourceAccount};

/// Builds an active account that is not backed by any store.
pub fn account(id: &str) -> SourceAccount {
    SourceAccount {
        id: id.to_owned(),
        phone: "+15550000000".to_owned(),
        name: Some(id.to_owned()),
        tag: None,
        status: AccountStatus::Active,
        session_ref: Some(format!("{id}.session")),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Channel that records sends instead of talking to Telegram.
#[derive(Debug, Default)]
pub struct FakeChannel {
    sent: Mutex<Vec<(i64, String)>>,
    failing: Mutex<HashSet<i64>>,
    flooded: Mutex<HashMap<i64, u32>>,
    auth_revoked: AtomicBool,
    users: Mutex<HashMap<String, ResolvedUser>>,
    sink: Mutex<Option<(String, mpsc::Sender<IncomingEvent>)>>,
    watch_installs: AtomicUsize,
    disconnected: AtomicBool,
}

impl FakeChannel {
    /// Messages delivered so far, as `(user_id, text)`.
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Makes every send to `user_id` fail.
    pub fn fail_user(&self, user_id: i64) {
        self.failing.lock().unwrap().insert(user_id);
    }

    /// Makes sends to `user_id` fail with a flood wait.
    pub fn flood_user(&self, user_id: i64, seconds: u32) {
        self.flooded.lock().unwrap().insert(user_id, seconds);
    }

    /// Makes every send fail with an authorization error.
    pub fn revoke_auth(&self) {
        self.auth_revoked.store(true, Ordering::SeqCst);
    }

    /// Registers a user that `resolve_identifier` can find.
    pub fn add_user(&self, identifier: &str, user: ResolvedUser) {
        self.users
            .lock()
            .unwrap()
            .insert(identifier.to_owned(), user);
    }

    pub fn watch_installs(&self) -> usize {
        self.watch_installs.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Simulates an incoming direct message from `sender_id`.
    pub async fn receive_from(&self, sender_id: i64) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some((account_id, tx)) = sink {
            tx.send(IncomingEvent {
                account_id,
                sender_id,
            })
            .await
            .unwrap();
        }
    }
}

#[async_trait]
impl MessagingChannel for FakeChannel {
    async fn send_message(&self, recipient: Recipient, text: &str) -> Result<(), ChannelError> {
        if self.auth_revoked.load(Ordering::SeqCst) {
            return Err(ChannelError::Auth("AUTH_KEY_UNREGISTERED".to_owned()));
        }
        if let Some(seconds) = self.flooded.lock().unwrap().get(&recipient.user_id) {
            return Err(ChannelError::FloodWait(*seconds));
        }
        if self.failing.lock().unwrap().contains(&recipient.user_id) {
            return Err(ChannelError::Send("PEER_ID_INVALID".to_owned()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.user_id, text.to_owned()));
        Ok(())
    }

    async fn resolve_identifier(&self, identifier: &str) -> Result<ResolvedUser, ChannelError> {
        self.users
            .lock()
            .unwrap()
            .get(identifier)
            .cloned()
            .ok_or_else(|| ChannelError::NotFound(identifier.to_owned()))
    }

    async fn user_info(&self, recipient: Recipient) -> Result<UserInfo, ChannelError> {
        let users = self.users.lock().unwrap();
        let user = users
            .values()
            .find(|u| u.user_id == recipient.user_id)
            .ok_or_else(|| ChannelError::NotFound(recipient.user_id.to_string()))?;
        Ok(UserInfo {
            id: user.user_id,
            first_name: user.display_name.clone(),
            full_name: user
                .display_name
                .clone()
                .unwrap_or_else(|| format!("User {}", user.user_id)),
            ..UserInfo::default()
        })
    }

    fn watch_incoming(
        &self,
        account_id: &str,
        sink: mpsc::Sender<IncomingEvent>,
    ) -> Result<(), ChannelError> {
        self.watch_installs.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some((account_id.to_owned(), sink));
        Ok(())
    }

    fn disconnect(&self) {
        self.sink.lock().unwrap().take();
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out [`FakeChannel`]s, one per account id.
#[derive(Debug, Default)]
pub struct FakeConnector {
    connects: AtomicUsize,
    delay: Duration,
    rejected: Mutex<HashSet<String>>,
    channels: Mutex<HashMap<String, Arc<FakeChannel>>>,
}

impl FakeConnector {
    /// Connector whose connects take `delay` to complete.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Makes connects for `account_id` fail as unauthorized.
    pub fn reject_account(&self, account_id: &str) {
        self.rejected.lock().unwrap().insert(account_id.to_owned());
    }

    pub fn accept_account(&self, account_id: &str) {
        self.rejected.lock().unwrap().remove(account_id);
    }

    /// Channel of an account, if it was ever prepared or connected.
    pub fn channel(&self, account_id: &str) -> Option<Arc<FakeChannel>> {
        self.channels.lock().unwrap().get(account_id).cloned()
    }

    /// Channel the next connect for `account_id` will return.
    pub fn prepare(&self, account_id: &str) -> Arc<FakeChannel> {
        Arc::clone(
            self.channels
                .lock()
                .unwrap()
                .entry(account_id.to_owned())
                .or_default(),
        )
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn connect(
        &self,
        account: &SourceAccount,
    ) -> Result<Arc<dyn MessagingChannel>, ChannelError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.rejected.lock().unwrap().contains(&account.id) {
            return Err(ChannelError::Auth(format!(
                "session for {} is not authorized",
                account.id
            )));
        }

        let channel = self.prepare(&account.id);
        channel.disconnected.store(false, Ordering::SeqCst);
        Ok(channel as Arc<dyn MessagingChannel>)
    }
}
