//! Handshake orchestration.
//!
//! The use-case layer between the chat command surface and the store: it
//! creates connections, assembles the browser-facing link (token + challenge
//! embedded), and processes the browser callback by validating payload,
//! record state, expiry, token, wallet address, and signature, in that
//! order with each step failing closed, before finalizing the record and
//! linking the wallet.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::auth::{
    ChallengeBinding, ExpectedBinding, TokenCodec, render_challenge, signature,
};
use crate::clock::Clock;
use crate::config::{BrowserConfig, HandshakeConfig};
use crate::error::HandshakeError;
use crate::store::{
    ConnectionRecord, ConnectionStatus, HandshakeStore, LinkedWallet, NewConnection,
};

/// Result of starting (or re-surfacing) a handshake.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectionRequest {
    pub connection_id: Uuid,
    pub browser_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Payload the browser context posts back after the wallet signs.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackPayload {
    pub connection_id: String,
    pub wallet_address: String,
    #[serde(default)]
    pub wallet_type: Option<String>,
    /// Some wallet extensions echo the public key separately; informational.
    #[serde(default)]
    pub public_key: Option<String>,
    pub user_id: i64,
    pub chat_id: i64,
    pub token: String,
    pub signature: String,
}

/// What the chat layer shows for "/status".
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatusView {
    Pending {
        connection_id: Uuid,
        expires_in_secs: u64,
    },
    Connected {
        wallet: LinkedWallet,
    },
    Disconnected,
}

/// Orchestrates the create → browser → callback handshake.
pub struct HandshakeService {
    store: Arc<dyn HandshakeStore>,
    tokens: TokenCodec,
    config: HandshakeConfig,
    browser: BrowserConfig,
    clock: Arc<dyn Clock>,
}

impl HandshakeService {
    pub fn new(
        store: Arc<dyn HandshakeStore>,
        config: HandshakeConfig,
        browser: BrowserConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            tokens: TokenCodec::new(&config.token_secret),
            config,
            browser,
            clock,
        }
    }

    /// Start a handshake for a chat user, or re-surface the one already in
    /// flight.
    ///
    /// An unexpired pending connection for the same user is reused: the
    /// caller gets the existing connection id with a freshly assembled
    /// browser link (same expiry) instead of a duplicate record.
    pub async fn create_connection_request(
        &self,
        user_id: i64,
        chat_id: i64,
    ) -> Result<ConnectionRequest, HandshakeError> {
        validate_chat_ids(user_id, chat_id)?;

        if let Some(existing) = self.store.get_pending_by_user(user_id).await? {
            tracing::debug!(
                "Reusing pending connection {} for user {}",
                existing.connection_id,
                user_id
            );
            return Ok(ConnectionRequest {
                connection_id: existing.connection_id,
                browser_url: self.browser_link(&existing),
                expires_at: existing.expires_at,
            });
        }

        let now = self.clock.now();
        let timeout = chrono::Duration::from_std(self.config.connect_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let expires_at = whole_seconds(now + timeout);
        let record = self
            .store
            .create_pending(NewConnection {
                connection_id: Uuid::new_v4(),
                user_id,
                chat_id,
                expires_at,
            })
            .await?;
        tracing::info!(
            "Created connection {} for user {} (expires {})",
            record.connection_id,
            user_id,
            expires_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        Ok(ConnectionRequest {
            connection_id: record.connection_id,
            browser_url: self.browser_link(&record),
            expires_at,
        })
    }

    /// Process the signed callback from the browser context.
    ///
    /// On success the connection is finalized exactly once and the proven
    /// wallet is linked to the user. Any failure returns a tagged
    /// [`HandshakeError`]; nothing panics across this boundary.
    pub async fn handle_callback(
        &self,
        payload: CallbackPayload,
    ) -> Result<LinkedWallet, HandshakeError> {
        let connection_id = validate_callback_payload(&payload)?;
        let now = self.clock.now();

        let record = self.store.get(connection_id).await?;
        if record.is_none() && self.config.strict_callback {
            return Err(HandshakeError::ConnectionNotFound);
        }

        if let Some(record) = &record
            && (record.user_id != payload.user_id || record.chat_id != payload.chat_id)
        {
            tracing::debug!(
                "Callback for connection {} claims user {}/chat {}, record binds {}/{}",
                connection_id,
                payload.user_id,
                payload.chat_id,
                record.user_id,
                record.chat_id
            );
            return Err(HandshakeError::PayloadMismatch);
        }

        // Lifecycle checks come before token verification: an overdue or
        // already-finished record reports its own state rather than masking
        // it behind the token expiring at the same instant.
        if let Some(record) = &record {
            match record.status {
                ConnectionStatus::Pending if now >= record.expires_at => {
                    return Err(HandshakeError::ConnectionExpired);
                }
                ConnectionStatus::Pending => {}
                ConnectionStatus::Completed => return Err(HandshakeError::ConnectionAlreadyUsed),
                ConnectionStatus::Expired => return Err(HandshakeError::ConnectionExpired),
                ConnectionStatus::Cancelled => return Err(HandshakeError::ConnectionNotFound),
            }
        }

        // With the record gone (swept or never created) the claimed ids are
        // the only binding left to verify the token against. That still
        // rejects forged tokens with a meaningful error instead of an
        // ambiguous not-found; `strict_callback` above disables the
        // leniency entirely.
        let expected = match &record {
            Some(record) => ExpectedBinding {
                connection_id,
                user_id: record.user_id,
                chat_id: record.chat_id,
            },
            None => ExpectedBinding {
                connection_id,
                user_id: payload.user_id,
                chat_id: payload.chat_id,
            },
        };
        let Some(claims) = self.tokens.verify(&payload.token, &expected, now) else {
            tracing::debug!("Token verification failed for connection {}", connection_id);
            return Err(HandshakeError::TokenInvalid);
        };

        if signature::parse_wallet_address(&payload.wallet_address).is_none() {
            return Err(HandshakeError::InvalidWalletAddress);
        }

        // Recompute the challenge exactly as it was issued: from the
        // record's expiry when the record survives, else from the token's.
        let challenge_expiry = match &record {
            Some(record) => record.expires_at,
            None => DateTime::from_timestamp(claims.exp, 0)
                .ok_or(HandshakeError::TokenInvalid)?,
        };
        let challenge = render_challenge(&ChallengeBinding {
            connection_id,
            user_id: expected.user_id,
            chat_id: expected.chat_id,
            expires_at: challenge_expiry,
        });
        if !signature::verify_wallet_signature(
            &payload.wallet_address,
            &payload.signature,
            &challenge,
        ) {
            tracing::debug!(
                "Signature verification failed for connection {} (wallet {})",
                connection_id,
                payload.wallet_address
            );
            return Err(HandshakeError::SignatureInvalid);
        }

        let Some(completed) = self
            .store
            .complete(connection_id, &payload.wallet_address)
            .await?
        else {
            // All checks passed but the atomic transition lost: either a
            // concurrent callback won, or the sweep got there first.
            return Err(match &record {
                Some(_) => HandshakeError::ConnectionAlreadyUsed,
                None => HandshakeError::ConnectionNotFound,
            });
        };

        let wallet = self
            .store
            .link_wallet(
                completed.user_id,
                &payload.wallet_address,
                payload.wallet_type.as_deref(),
            )
            .await?;
        tracing::info!(
            "Connection {} completed; wallet {} linked to user {}",
            connection_id,
            wallet.wallet_address,
            wallet.user_id
        );
        Ok(wallet)
    }

    /// The chat-facing connection status for a user.
    pub async fn check_connection_status(
        &self,
        user_id: i64,
    ) -> Result<ConnectionStatusView, HandshakeError> {
        if user_id <= 0 {
            return Err(HandshakeError::InvalidInput {
                field: "user_id",
                message: "must be a positive integer".to_string(),
            });
        }

        if let Some(pending) = self.store.get_pending_by_user(user_id).await? {
            let remaining = (pending.expires_at - self.clock.now()).num_seconds().max(0);
            return Ok(ConnectionStatusView::Pending {
                connection_id: pending.connection_id,
                expires_in_secs: remaining as u64,
            });
        }

        let wallets = self.store.list_wallets(user_id).await?;
        let wallet = wallets
            .iter()
            .find(|w| w.is_active)
            .or_else(|| wallets.last())
            .cloned();
        Ok(match wallet {
            Some(wallet) => ConnectionStatusView::Connected { wallet },
            None => ConnectionStatusView::Disconnected,
        })
    }

    /// Fetch a connection record by its external id, any state.
    pub async fn get_connection(
        &self,
        connection_id: &str,
    ) -> Result<Option<ConnectionRecord>, HandshakeError> {
        let connection_id = parse_connection_id(connection_id)?;
        Ok(self.store.get(connection_id).await?)
    }

    /// Explicitly cancel a pending handshake.
    pub async fn cancel_connection(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionRecord, HandshakeError> {
        let connection_id = parse_connection_id(connection_id)?;
        self.store
            .cancel(connection_id)
            .await?
            .ok_or(HandshakeError::ConnectionNotFound)
    }

    /// Assemble the browser link carrying everything the wallet page needs.
    fn browser_link(&self, record: &ConnectionRecord) -> String {
        let challenge = render_challenge(&ChallengeBinding {
            connection_id: record.connection_id,
            user_id: record.user_id,
            chat_id: record.chat_id,
            expires_at: record.expires_at,
        });
        let token = self.tokens.issue(
            record.connection_id,
            record.user_id,
            record.chat_id,
            record.expires_at,
        );

        let mut url = self.browser.connect_url.clone();
        url.query_pairs_mut()
            .append_pair("connectionId", &record.connection_id.to_string())
            .append_pair("userId", &record.user_id.to_string())
            .append_pair("chatId", &record.chat_id.to_string())
            .append_pair("callback", self.browser.callback_url.as_str())
            .append_pair(
                "expiresAt",
                &record.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .append_pair("returnTo", self.browser.return_url.as_str())
            .append_pair("challenge", &URL_SAFE_NO_PAD.encode(challenge))
            .append_pair("connToken", &token);
        url.to_string()
    }
}

fn validate_chat_ids(user_id: i64, chat_id: i64) -> Result<(), HandshakeError> {
    if user_id <= 0 {
        return Err(HandshakeError::InvalidInput {
            field: "user_id",
            message: "must be a positive integer".to_string(),
        });
    }
    if chat_id <= 0 {
        return Err(HandshakeError::InvalidInput {
            field: "chat_id",
            message: "must be a positive integer".to_string(),
        });
    }
    Ok(())
}

fn parse_connection_id(raw: &str) -> Result<Uuid, HandshakeError> {
    Uuid::parse_str(raw.trim()).map_err(|_| HandshakeError::InvalidInput {
        field: "connection_id",
        message: "must be a valid UUID".to_string(),
    })
}

fn validate_callback_payload(payload: &CallbackPayload) -> Result<Uuid, HandshakeError> {
    let connection_id = parse_connection_id(&payload.connection_id)?;
    validate_chat_ids(payload.user_id, payload.chat_id)?;
    for (field, value) in [
        ("wallet_address", &payload.wallet_address),
        ("token", &payload.token),
        ("signature", &payload.signature),
    ] {
        if value.trim().is_empty() {
            return Err(HandshakeError::InvalidInput {
                field,
                message: "must not be empty".to_string(),
            });
        }
    }
    Ok(connection_id)
}

/// Truncate to whole seconds so the expiry renders identically in the
/// challenge, the token, and the stored record.
fn whole_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use secrecy::SecretString;

    use crate::clock::ManualClock;
    use crate::store::{ConnectionStore, MemoryStore, WalletStore};

    struct Harness {
        service: HandshakeService,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        signing_key: SigningKey,
        wallet_address: String,
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn harness_with(tweak: impl FnOnce(&mut HandshakeConfig)) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryStore::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            Duration::from_secs(21_600),
        ));
        let mut config = HandshakeConfig {
            token_secret: SecretString::from("handshake-test-secret"),
            connect_timeout: Duration::from_secs(300),
            strict_callback: false,
        };
        tweak(&mut config);
        let browser = BrowserConfig {
            connect_url: Url::parse("https://connect.example/link").expect("url"),
            callback_url: Url::parse("https://api.example/wallet/callback").expect("url"),
            return_url: Url::parse("https://t.me/example_bot").expect("url"),
        };
        let signing_key = SigningKey::generate(&mut OsRng);
        let wallet_address = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
        Harness {
            service: HandshakeService::new(
                Arc::clone(&store) as Arc<dyn HandshakeStore>,
                config,
                browser,
                Arc::clone(&clock) as Arc<dyn Clock>,
            ),
            clock,
            store,
            signing_key,
            wallet_address,
        }
    }

    fn link_param(url: &str, key: &str) -> String {
        let parsed = Url::parse(url).expect("browser url parses");
        parsed
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_else(|| panic!("missing query parameter {key}"))
    }

    /// Sign the exact challenge embedded in the browser link, the way the
    /// wallet extension would.
    fn signed_payload(h: &Harness, request: &ConnectionRequest) -> CallbackPayload {
        let challenge_b64 = link_param(&request.browser_url, "challenge");
        let challenge =
            String::from_utf8(URL_SAFE_NO_PAD.decode(challenge_b64).expect("challenge decodes"))
                .expect("challenge is utf-8");
        let signature = h.signing_key.sign(challenge.as_bytes()).to_bytes();
        CallbackPayload {
            connection_id: request.connection_id.to_string(),
            wallet_address: h.wallet_address.clone(),
            wallet_type: Some("phantom".to_string()),
            public_key: Some(h.wallet_address.clone()),
            user_id: 42,
            chat_id: 99,
            token: link_param(&request.browser_url, "connToken"),
            signature: BASE64_STANDARD.encode(signature),
        }
    }

    #[tokio::test]
    async fn browser_link_carries_all_handshake_parameters() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");

        assert_eq!(
            link_param(&request.browser_url, "connectionId"),
            request.connection_id.to_string()
        );
        assert_eq!(link_param(&request.browser_url, "userId"), "42");
        assert_eq!(link_param(&request.browser_url, "chatId"), "99");
        assert_eq!(
            link_param(&request.browser_url, "callback"),
            "https://api.example/wallet/callback"
        );
        assert_eq!(
            link_param(&request.browser_url, "returnTo"),
            "https://t.me/example_bot"
        );
        assert_eq!(
            link_param(&request.browser_url, "expiresAt"),
            request
                .expires_at
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        assert!(!link_param(&request.browser_url, "connToken").is_empty());

        let challenge = String::from_utf8(
            URL_SAFE_NO_PAD
                .decode(link_param(&request.browser_url, "challenge"))
                .expect("decodes"),
        )
        .expect("utf-8");
        assert!(challenge.contains(&request.connection_id.to_string()));
        assert!(challenge.contains("Sign this message to verify wallet ownership."));
    }

    #[tokio::test]
    async fn rejects_non_positive_ids() {
        let h = harness();
        assert!(matches!(
            h.service.create_connection_request(0, 99).await,
            Err(HandshakeError::InvalidInput { field: "user_id", .. })
        ));
        assert!(matches!(
            h.service.create_connection_request(42, -1).await,
            Err(HandshakeError::InvalidInput { field: "chat_id", .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_create_reuses_the_pending_connection() {
        let h = harness();
        let first = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let second = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");

        assert_eq!(first.connection_id, second.connection_id);
        assert_eq!(first.expires_at, second.expires_at);

        // Once expired, a new handshake gets a fresh id.
        h.clock.advance(chrono::Duration::seconds(301));
        let third = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        assert_ne!(first.connection_id, third.connection_id);
    }

    #[tokio::test]
    async fn full_handshake_completes_and_links_the_wallet() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let payload = signed_payload(&h, &request);

        let wallet = h.service.handle_callback(payload).await.expect("callback");
        assert_eq!(wallet.wallet_address, h.wallet_address);
        assert!(wallet.is_active);
        assert_eq!(wallet.wallet_type.as_deref(), Some("phantom"));

        let record = h
            .store
            .get(request.connection_id)
            .await
            .expect("get")
            .expect("record kept");
        assert_eq!(record.status, ConnectionStatus::Completed);
        assert_eq!(record.wallet_address.as_deref(), Some(h.wallet_address.as_str()));

        match h
            .service
            .check_connection_status(42)
            .await
            .expect("status")
        {
            ConnectionStatusView::Connected { wallet } => {
                assert_eq!(wallet.wallet_address, h.wallet_address);
            }
            other => panic!("expected connected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_callback_reports_already_used() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let payload = signed_payload(&h, &request);

        h.service
            .handle_callback(payload.clone())
            .await
            .expect("first callback succeeds");
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::ConnectionAlreadyUsed)
        ));
    }

    #[tokio::test]
    async fn callback_after_expiry_reports_expired() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let payload = signed_payload(&h, &request);

        h.clock.advance(chrono::Duration::seconds(301));
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::ConnectionExpired)
        ));
    }

    #[tokio::test]
    async fn token_for_a_different_chat_is_rejected() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let mut payload = signed_payload(&h, &request);

        // Token issued under a different chat binding.
        let foreign_codec = TokenCodec::new(&SecretString::from("handshake-test-secret"));
        payload.token =
            foreign_codec.issue(request.connection_id, 42, 100, request.expires_at);

        // The claimed ids still match the record, so the mismatch surfaces
        // as a token failure, not a payload mismatch.
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn claimed_ids_diverging_from_the_record_mismatch() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let mut payload = signed_payload(&h, &request);
        payload.user_id = 43;

        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::PayloadMismatch)
        ));
    }

    #[tokio::test]
    async fn bad_signature_and_bad_wallet_fail_closed() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");

        let mut payload = signed_payload(&h, &request);
        payload.signature = BASE64_STANDARD.encode([0u8; 64]);
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::SignatureInvalid)
        ));

        let mut payload = signed_payload(&h, &request);
        payload.wallet_address = "not-a-pubkey".to_string();
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::InvalidWalletAddress)
        ));
    }

    #[tokio::test]
    async fn missing_record_is_lenient_by_default_and_strict_on_request() {
        // Lenient: with no record to consult, token verification still runs
        // against the claimed ids, so a forged token and a genuinely gone
        // connection report different failures.
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let payload = signed_payload(&h, &request);

        let ghost_id = Uuid::new_v4();
        let mut ghost = payload.clone();
        ghost.connection_id = ghost_id.to_string();
        ghost.token = TokenCodec::new(&SecretString::from("handshake-test-secret")).issue(
            ghost_id,
            42,
            99,
            request.expires_at,
        );
        // Sign the challenge as it will be recomputed from the token's
        // embedded expiry.
        let ghost_challenge = render_challenge(&ChallengeBinding {
            connection_id: ghost_id,
            user_id: 42,
            chat_id: 99,
            expires_at: request.expires_at,
        });
        ghost.signature =
            BASE64_STANDARD.encode(h.signing_key.sign(ghost_challenge.as_bytes()).to_bytes());
        assert!(matches!(
            h.service.handle_callback(ghost.clone()).await,
            Err(HandshakeError::ConnectionNotFound)
        ));

        let mut ghost_bad_token = ghost.clone();
        ghost_bad_token.token = "forged.token".to_string();
        assert!(matches!(
            h.service.handle_callback(ghost_bad_token).await,
            Err(HandshakeError::TokenInvalid)
        ));

        // Strict mode short-circuits before any token verification.
        let strict = harness_with(|config| config.strict_callback = true);
        let request = strict
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let mut ghost = signed_payload(&strict, &request);
        let ghost_id = Uuid::new_v4();
        ghost.connection_id = ghost_id.to_string();
        ghost.token = "forged.token".to_string();
        assert!(matches!(
            strict.service.handle_callback(ghost).await,
            Err(HandshakeError::ConnectionNotFound)
        ));
    }

    #[tokio::test]
    async fn relinking_a_wallet_does_not_duplicate_it() {
        let h = harness();

        // First handshake.
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        h.service
            .handle_callback(signed_payload(&h, &request))
            .await
            .expect("first link");

        // Second handshake with the same wallet.
        h.clock.advance(chrono::Duration::seconds(301));
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let wallet = h
            .service
            .handle_callback(signed_payload(&h, &request))
            .await
            .expect("relink");
        assert!(wallet.is_active);

        let wallets = h.store.list_wallets(42).await.expect("list");
        assert_eq!(wallets.len(), 1);
    }

    #[tokio::test]
    async fn status_reports_pending_with_remaining_seconds() {
        let h = harness();
        assert_eq!(
            h.service.check_connection_status(42).await.expect("status"),
            ConnectionStatusView::Disconnected
        );

        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        h.clock.advance(chrono::Duration::seconds(100));
        match h
            .service
            .check_connection_status(42)
            .await
            .expect("status")
        {
            ConnectionStatusView::Pending {
                connection_id,
                expires_in_secs,
            } => {
                assert_eq!(connection_id, request.connection_id);
                assert!(expires_in_secs <= 200, "remaining {expires_in_secs}");
            }
            other => panic!("expected pending, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_transitions_pending_and_only_pending() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");

        let cancelled = h
            .service
            .cancel_connection(&request.connection_id.to_string())
            .await
            .expect("cancel");
        assert_eq!(cancelled.status, ConnectionStatus::Cancelled);

        assert!(matches!(
            h.service
                .cancel_connection(&request.connection_id.to_string())
                .await,
            Err(HandshakeError::ConnectionNotFound)
        ));
    }

    #[tokio::test]
    async fn malformed_callback_payloads_are_invalid_input() {
        let h = harness();
        let request = h
            .service
            .create_connection_request(42, 99)
            .await
            .expect("create");
        let good = signed_payload(&h, &request);

        let mut payload = good.clone();
        payload.connection_id = "not-a-uuid".to_string();
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::InvalidInput { field: "connection_id", .. })
        ));

        let mut payload = good.clone();
        payload.signature = String::new();
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::InvalidInput { field: "signature", .. })
        ));

        let mut payload = good;
        payload.user_id = 0;
        assert!(matches!(
            h.service.handle_callback(payload).await,
            Err(HandshakeError::InvalidInput { field: "user_id", .. })
        ));
    }
}
