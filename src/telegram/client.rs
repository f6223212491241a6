//! Telegram client wrapper backed by grammers.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken, UpdatesConfiguration};
use grammers_client::update::Update;
use grammers_client::{sender, Client, InvocationError, SenderPool, SignInError};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{
    ChannelConnector, ChannelError, IncomingEvent, MessagingChannel, Recipient, ResolvedUser,
    UserInfo,
};
use crate::config::TelegramConfig;
use crate::store::SourceAccount;

/// RPC error names meaning the stored session is no longer usable.
const AUTH_ERRORS: &[&str] = &[
    "AUTH_KEY_UNREGISTERED",
    "AUTH_KEY_INVALID",
    "SESSION_REVOKED",
    "SESSION_EXPIRED",
    "USER_DEACTIVATED",
];

/// RPC error names meaning the target user does not exist.
const NOT_FOUND_ERRORS: &[&str] = &[
    "USERNAME_NOT_OCCUPIED",
    "USERNAME_INVALID",
    "PHONE_NOT_OCCUPIED",
    "USER_ID_INVALID",
    "PEER_ID_INVALID",
];

impl From<InvocationError> for ChannelError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        // Check for flood wait errors
        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        if AUTH_ERRORS.iter().any(|name| err_str.contains(name)) {
            return Self::Auth(err_str);
        }
        if NOT_FOUND_ERRORS.iter().any(|name| err_str.contains(name)) {
            return Self::NotFound(err_str);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let lowered = err_msg.to_lowercase();

    for pattern in ["flood_wait_", "flood wait "] {
        if let Some(idx) = lowered.find(pattern) {
            let num_str: String = lowered[idx + pattern.len()..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// How a contact identifier should be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Identifier {
    Username(String),
    Phone(String),
    UserId(i64),
}

impl Identifier {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(username) = raw.strip_prefix('@') {
            return (!username.is_empty()).then(|| Self::Username(username.to_owned()));
        }
        if let Some(digits) = raw.strip_prefix('+') {
            let digits: String = digits.chars().filter(char::is_ascii_digit).collect();
            return (!digits.is_empty()).then_some(Self::Phone(digits));
        }
        if let Ok(id) = raw.parse::<i64>() {
            return Some(Self::UserId(id));
        }
        let username = raw
            .trim_start_matches("https://t.me/")
            .trim_start_matches("t.me/");
        Some(Self::Username(username.to_owned()))
    }
}

/// Destination for incoming messages, set once reply watching is installed.
type IncomingSink = Arc<Mutex<Option<(String, mpsc::Sender<IncomingEvent>)>>>;

/// High-level Telegram client wrapper for one source account.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Where the update listener forwards incoming messages.
    incoming: IncomingSink,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,

    /// Background task draining the update stream.
    _updates_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram using the session stored at `session_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if connection fails.
    pub async fn connect(
        config: &TelegramConfig,
        session_path: &Path,
    ) -> Result<Self, ChannelError> {
        info!("Connecting to Telegram...");

        if let Some(dir) = session_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| ChannelError::Session(e.to_string()))?;
        }

        let session = Arc::new(
            SqliteSession::open(session_path)
                .await
                .map_err(|e| ChannelError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let incoming: IncomingSink = Arc::new(Mutex::new(None));
        let mut stream = client
            .stream_updates(
                updates,
                UpdatesConfiguration {
                    catch_up: false,
                    ..Default::default()
                },
            )
            .await;

        let sink = Arc::clone(&incoming);
        let updates_task = tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Ok(Update::NewMessage(message)) if !message.outgoing() => {
                        let Some(sender_id) = message.sender_id().map(|peer| peer.bare_id())
                        else {
                            continue;
                        };
                        forward_incoming(&sink, sender_id).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Update stream closed: {}", e);
                        break;
                    }
                }
            }
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            client,
            handle: handle.thin,
            incoming,
            _pool_task: pool_task,
            _updates_task: updates_task,
        })
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, ChannelError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))
    }

    /// Requests a login code to be sent to the phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn request_login_code(
        &self,
        phone: &str,
        api_hash: &str,
    ) -> Result<LoginToken, ChannelError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        self.client
            .request_login_code(phone, api_hash)
            .await
            .map_err(|e| ChannelError::SignInFailed(e.to_string()))
    }

    /// Signs in with the login code.
    ///
    /// # Errors
    ///
    /// Returns an error if sign in fails.
    pub async fn sign_in(&self, token: &LoginToken, code: &str) -> Result<(), ChannelError> {
        info!("Signing in with login code...");

        match self.client.sign_in(token, code).await {
            Ok(_user) => {
                info!("Successfully signed in!");
                Ok(())
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required, hint: {:?}", password_token.hint());
                Err(ChannelError::PasswordRequired(password_token))
            }
            Err(SignInError::InvalidCode) => {
                Err(ChannelError::SignInFailed("Invalid code".to_owned()))
            }
            Err(e) => Err(ChannelError::SignInFailed(e.to_string())),
        }
    }

    /// Checks the 2FA password.
    ///
    /// # Errors
    ///
    /// Returns an error if the password is invalid.
    pub async fn check_password(
        &self,
        password_token: PasswordToken,
        password: &str,
    ) -> Result<(), ChannelError> {
        info!("Checking 2FA password...");

        match self.client.check_password(password_token, password).await {
            Ok(_user) => {
                info!("Successfully authenticated with 2FA!");
                Ok(())
            }
            Err(SignInError::InvalidPassword(token)) => Err(ChannelError::InvalidPassword(token)),
            Err(e) => Err(ChannelError::SignInFailed(e.to_string())),
        }
    }

    async fn resolve_username(&self, username: &str) -> Result<ResolvedUser, ChannelError> {
        let request = tl::functions::contacts::ResolveUsername {
            username: username.to_owned(),
            referer: None,
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) =
            self.client.invoke(&request).await?;
        first_user(resolved.users).ok_or_else(|| ChannelError::NotFound(format!("@{username}")))
    }

    async fn resolve_phone(&self, phone: &str) -> Result<ResolvedUser, ChannelError> {
        let request = tl::functions::contacts::ResolvePhone {
            phone: phone.to_owned(),
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) =
            self.client.invoke(&request).await?;
        first_user(resolved.users).ok_or_else(|| ChannelError::NotFound(format!("+{phone}")))
    }

    async fn fetch_user(&self, recipient: Recipient) -> Result<tl::types::User, ChannelError> {
        let request = tl::functions::users::GetUsers {
            id: vec![input_user(recipient)],
        };

        let users = self.client.invoke(&request).await?;
        users
            .into_iter()
            .find_map(|user| match user {
                tl::enums::User::User(user) => Some(user),
                tl::enums::User::Empty(_) => None,
            })
            .ok_or_else(|| ChannelError::NotFound(recipient.user_id.to_string()))
    }
}

#[async_trait]
impl MessagingChannel for TelegramBot {
    async fn send_message(&self, recipient: Recipient, text: &str) -> Result<(), ChannelError> {
        debug!(
            user_id = recipient.user_id,
            "Sending: \"{}\"",
            truncate_for_log(text, 30)
        );

        let request = tl::functions::messages::SendMessage {
            no_webpage: false,
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer: input_peer(recipient),
            reply_to: None,
            message: text.to_owned(),
            random_id: random_message_id(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            schedule_repeat_period: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
        };

        match self.client.invoke(&request).await {
            Ok(_updates) => Ok(()),
            Err(e) => match ChannelError::from(e) {
                ChannelError::Invocation(msg) => Err(ChannelError::Send(msg)),
                other => Err(other),
            },
        }
    }

    async fn resolve_identifier(&self, identifier: &str) -> Result<ResolvedUser, ChannelError> {
        let parsed = Identifier::parse(identifier)
            .ok_or_else(|| ChannelError::NotFound(identifier.to_owned()))?;

        debug!("Resolving identifier {:?}", parsed);

        let result = match parsed {
            Identifier::Username(username) => self.resolve_username(&username).await,
            Identifier::Phone(phone) => self.resolve_phone(&phone).await,
            Identifier::UserId(user_id) => {
                let recipient = Recipient {
                    user_id,
                    access_hash: None,
                };
                self.fetch_user(recipient).await.map(|user| resolved_from(&user))
            }
        };

        result.map_err(|e| match e {
            ChannelError::Invocation(msg) => {
                ChannelError::NotFound(format!("Could not find user '{identifier}': {msg}"))
            }
            other => other,
        })
    }

    async fn user_info(&self, recipient: Recipient) -> Result<UserInfo, ChannelError> {
        let user = self.fetch_user(recipient).await?;
        let full_name = UserInfo::compose_full_name(
            user.id,
            user.first_name.as_deref(),
            user.last_name.as_deref(),
            user.username.as_deref(),
        );

        Ok(UserInfo {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            username: user.username,
            phone: user.phone,
            is_bot: user.bot,
            is_verified: user.verified,
            full_name,
        })
    }

    fn watch_incoming(
        &self,
        account_id: &str,
        sink: mpsc::Sender<IncomingEvent>,
    ) -> Result<(), ChannelError> {
        let mut slot = self.incoming.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ChannelError::Connection(
                "incoming messages are already being watched".to_owned(),
            ));
        }
        *slot = Some((account_id.to_owned(), sink));
        info!(account_id, "Watching incoming messages");
        Ok(())
    }

    fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        // Release the reply sender so the watcher can finish draining.
        self.incoming
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.handle.quit();
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot").finish_non_exhaustive()
    }
}

async fn forward_incoming(sink: &IncomingSink, sender_id: i64) {
    let target = sink
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    // Nothing is watching yet; the message cannot be a reply we care about.
    let Some((account_id, tx)) = target else {
        return;
    };

    if tx
        .send(IncomingEvent {
            account_id,
            sender_id,
        })
        .await
        .is_err()
    {
        debug!("Reply watcher gone, dropping incoming message");
    }
}

/// Opens grammers connections from per-account session files.
#[derive(Debug, Clone)]
pub struct GrammersConnector {
    config: TelegramConfig,
}

impl GrammersConnector {
    #[must_use]
    pub const fn new(config: TelegramConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChannelConnector for GrammersConnector {
    async fn connect(
        &self,
        account: &SourceAccount,
    ) -> Result<Arc<dyn MessagingChannel>, ChannelError> {
        let session_ref = account
            .session_ref
            .as_deref()
            .ok_or_else(|| ChannelError::Auth(format!("account {} has no session", account.id)))?;

        let path = self.config.resolve_session(session_ref);
        if !path.exists() {
            return Err(ChannelError::Auth(format!(
                "session file {} is missing",
                path.display()
            )));
        }

        let bot = TelegramBot::connect(&self.config, &path).await?;
        if !bot.is_authorized().await? {
            bot.disconnect();
            return Err(ChannelError::Auth(format!(
                "session for account {} is not authorized",
                account.id
            )));
        }

        Ok(Arc::new(bot))
    }
}

fn input_user(recipient: Recipient) -> tl::enums::InputUser {
    tl::enums::InputUser::User(tl::types::InputUser {
        user_id: recipient.user_id,
        access_hash: recipient.access_hash.unwrap_or(0),
    })
}

fn input_peer(recipient: Recipient) -> tl::enums::InputPeer {
    tl::enums::InputPeer::User(tl::types::InputPeerUser {
        user_id: recipient.user_id,
        access_hash: recipient.access_hash.unwrap_or(0),
    })
}

fn first_user(users: Vec<tl::enums::User>) -> Option<ResolvedUser> {
    users.into_iter().find_map(|user| match user {
        tl::enums::User::User(user) => Some(resolved_from(&user)),
        tl::enums::User::Empty(_) => None,
    })
}

fn resolved_from(user: &tl::types::User) -> ResolvedUser {
    ResolvedUser {
        user_id: user.id,
        access_hash: user.access_hash,
        display_name: Some(UserInfo::compose_full_name(
            user.id,
            user.first_name.as_deref(),
            user.last_name.as_deref(),
            user.username.as_deref(),
        )),
    }
}

fn random_message_id() -> i64 {
    let (high, _) = uuid::Uuid::new_v4().as_u64_pair();
    i64::from_ne_bytes(high.to_ne_bytes())
}

/// Masks a phone number for logging (shows last 4 digits).
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

/// Truncates a string for logging purposes.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("Hello", 10), "Hello");
        assert_eq!(truncate_for_log("Hello, World!", 5), "Hello...");
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
        assert_eq!(extract_flood_wait_seconds("İİİ FLOOD_WAIT_42"), Some(42));
        assert_eq!(extract_flood_wait_seconds("ẞ flood wait ẞ"), None);
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(
            Identifier::parse("@alice"),
            Some(Identifier::Username("alice".to_owned()))
        );
        assert_eq!(
            Identifier::parse(" +55 (11) 99999-0000 "),
            Some(Identifier::Phone("5511999990000".to_owned()))
        );
        assert_eq!(Identifier::parse("123456"), Some(Identifier::UserId(123_456)));
        assert_eq!(
            Identifier::parse("https://t.me/bob"),
            Some(Identifier::Username("bob".to_owned()))
        );
        assert_eq!(Identifier::parse("@"), None);
        assert_eq!(Identifier::parse("   "), None);
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(random_message_id(), random_message_id());
    }
}
