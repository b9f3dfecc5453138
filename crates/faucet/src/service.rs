//! Faucet service core logic

use crate::config::FaucetSettings;
use crate::error::{FaucetError, FaucetResult};
use crate::ledger::TokenLedger;
use crate::metrics::FaucetMetrics;
use crate::quota::{IdentityKey, QuotaLedger};
use crate::transfer::{parse_address, TransferOrchestrator};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Process-wide throughput limiter
type RateLimiterImpl = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Amount as sent by the caller: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestedAmount {
    Whole(u64),
    Text(String),
    /// Anything else the caller sent; always rejected.
    Other(serde_json::Value),
}

impl RequestedAmount {
    /// Requested whole tokens; must be a positive integer.
    pub fn tokens(&self) -> FaucetResult<u64> {
        let tokens = match self {
            RequestedAmount::Whole(tokens) => Some(*tokens),
            RequestedAmount::Text(text) => text.trim().parse::<u64>().ok(),
            RequestedAmount::Other(_) => None,
        };
        tokens.filter(|t| *t > 0).ok_or_else(|| {
            FaucetError::Validation("amount must be a positive whole number".to_string())
        })
    }
}

/// Result of a confirmed dispense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseReceipt {
    pub signature: Signature,
    pub recipient: Pubkey,
    pub amount_tokens: u64,
}

/// Faucet status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetStatus {
    pub funding_wallet: String,
    pub mint: String,
    pub funding_token_account: String,
    /// Funding token account balance in base units
    pub balance: u64,
    pub tokens_per_request: u64,
    pub max_requests_per_window: u32,
    pub quota_window_secs: u64,
    pub tracked_identities: usize,
}

/// Dispense coordinator: quota admission around a single transfer attempt.
pub struct FaucetService {
    settings: FaucetSettings,
    quota: QuotaLedger,
    orchestrator: TransferOrchestrator,
    rate_limiter: Option<RateLimiterImpl>,
    metrics: FaucetMetrics,
}

impl FaucetService {
    /// Create new faucet service
    pub fn new(
        settings: FaucetSettings,
        quota: QuotaLedger,
        ledger: Arc<dyn TokenLedger>,
    ) -> FaucetResult<Self> {
        let orchestrator =
            TransferOrchestrator::new(ledger, settings.mint, settings.funding_keypair.clone());

        let rate_limiter = settings
            .global_requests_per_minute
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));

        let metrics = FaucetMetrics::new()
            .map_err(|e| FaucetError::Internal(format!("Failed to register metrics: {}", e)))?;

        info!(
            funding_wallet = %orchestrator.funding_wallet(),
            mint = %settings.mint,
            "Faucet service initialized"
        );

        Ok(Self {
            settings,
            quota,
            orchestrator,
            rate_limiter,
            metrics,
        })
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    /// Dispense the configured amount to `wallet_address` on behalf of `origin`.
    ///
    /// Quota is consumed only when the transfer is confirmed; rejected and
    /// failed attempts leave the identity's allowance untouched.
    pub async fn dispense(
        &self,
        wallet_address: &str,
        amount: Option<&RequestedAmount>,
        origin: &str,
    ) -> FaucetResult<DispenseReceipt> {
        let result = self.try_dispense(wallet_address, amount, origin).await;

        if let Err(err) = &result {
            self.metrics.record_failure(err);
            if err.is_unexpected() {
                error!(wallet = wallet_address, origin, error = %err, "Dispense failed unexpectedly");
            } else {
                info!(wallet = wallet_address, origin, kind = err.kind().as_str(), error = %err, "Dispense rejected");
            }
        }
        self.metrics
            .set_tracked_identities(self.quota.tracked_identities());

        result
    }

    async fn try_dispense(
        &self,
        wallet_address: &str,
        amount: Option<&RequestedAmount>,
        origin: &str,
    ) -> FaucetResult<DispenseReceipt> {
        // 1. Validate input before touching the quota or the network
        let recipient = self.orchestrator.parse_recipient(wallet_address)?;
        let requested = amount
            .ok_or_else(|| FaucetError::Validation("amount is required".to_string()))?
            .tokens()?;
        let amount_tokens = self.settings.tokens_per_request;
        if requested != amount_tokens {
            debug!(requested, dispensed = amount_tokens, "Ignoring caller amount");
        }

        // 2. Per-identity quota
        let key = IdentityKey::new(recipient.to_string(), origin);
        let reservation = self
            .quota
            .try_reserve(&key, self.settings.max_requests_per_window)
            .ok_or_else(|| self.quota_exhausted())?;

        // 3. Process-wide throughput; only admitted identities spend a token
        if let Some(limiter) = &self.rate_limiter {
            if limiter.check().is_err() {
                drop(reservation);
                return Err(FaucetError::RateLimitExceeded(
                    "Faucet is busy. Please try again in a minute.".to_string(),
                ));
            }
        }

        // 4. Transfer; the reservation is released if this fails
        let started = Instant::now();
        let outcome = self
            .orchestrator
            .execute(&recipient.to_string(), amount_tokens)
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(signature) => {
                reservation.commit();
                self.metrics.record_success(elapsed);
                info!(identity = %key, tx = %signature, amount_tokens, "Dispensed tokens");
                Ok(DispenseReceipt {
                    signature,
                    recipient,
                    amount_tokens,
                })
            }
            Err(err) => {
                drop(reservation);
                self.metrics.observe_attempt(elapsed);
                Err(err)
            }
        }
    }

    /// Requests left for this wallet/origin pair in the current window.
    pub fn remaining_requests(&self, wallet_address: &str, origin: &str) -> u32 {
        let wallet = parse_address(wallet_address)
            .map(|pubkey| pubkey.to_string())
            .unwrap_or_else(|_| wallet_address.trim().to_string());
        self.quota
            .remaining(&IdentityKey::new(wallet, origin), self.settings.max_requests_per_window)
    }

    /// Get faucet status
    pub async fn status(&self) -> FaucetResult<FaucetStatus> {
        let (funding_token_account, balance) = self.orchestrator.funding_balance().await?;

        Ok(FaucetStatus {
            funding_wallet: self.orchestrator.funding_wallet().to_string(),
            mint: self.orchestrator.mint().to_string(),
            funding_token_account: funding_token_account.to_string(),
            balance,
            tokens_per_request: self.settings.tokens_per_request,
            max_requests_per_window: self.settings.max_requests_per_window,
            quota_window_secs: self.quota.window().as_secs(),
            tracked_identities: self.quota.tracked_identities(),
        })
    }

    /// Drop expired quota records
    pub fn sweep_expired_quota(&self) -> usize {
        let removed = self.quota.sweep_expired();
        self.metrics
            .set_tracked_identities(self.quota.tracked_identities());
        debug!(removed, "Swept expired quota records");
        removed
    }

    fn quota_exhausted(&self) -> FaucetError {
        FaucetError::quota_exhausted(self.settings.max_requests_per_window, self.quota.window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_amount_parsing() {
        assert_eq!(RequestedAmount::Whole(200).tokens().unwrap(), 200);
        assert_eq!(RequestedAmount::Text(" 15 ".into()).tokens().unwrap(), 15);
        assert!(RequestedAmount::Whole(0).tokens().is_err());
        assert!(RequestedAmount::Text("-3".into()).tokens().is_err());
        assert!(RequestedAmount::Text("1.5".into()).tokens().is_err());
        assert!(RequestedAmount::Text("lots".into()).tokens().is_err());
    }

    #[test]
    fn test_requested_amount_deserializes_from_number_or_string() {
        let number: RequestedAmount = serde_json::from_str("200").unwrap();
        assert_eq!(number, RequestedAmount::Whole(200));
        let text: RequestedAmount = serde_json::from_str("\"200\"").unwrap();
        assert_eq!(text, RequestedAmount::Text("200".into()));

        for raw in ["1.5", "-5", "true", "[200]"] {
            let other: RequestedAmount = serde_json::from_str(raw).unwrap();
            assert!(matches!(other, RequestedAmount::Other(_)), "{}", raw);
            assert!(other.tokens().is_err());
        }
    }
}
