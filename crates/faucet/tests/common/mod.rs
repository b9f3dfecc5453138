//! Shared fixtures: an in-memory token ledger and service builders.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use drip_faucet::{
    FaucetService, FaucetSettings, LedgerError, ManualClock, QuotaLedger, TokenLedger,
};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::Transaction,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Token ledger that never touches the network and counts every call.
pub struct StubLedger {
    pub signature: Signature,
    pub balance: u64,
    resolve_error: Option<String>,
    submit_error: Option<String>,
    delay: Duration,
    resolve_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    submitted: Mutex<Vec<Transaction>>,
}

impl StubLedger {
    /// Every transfer confirms.
    pub fn confirming() -> Self {
        Self {
            signature: Signature::new_unique(),
            balance: 1_000_000_000,
            resolve_error: None,
            submit_error: None,
            delay: Duration::ZERO,
            resolve_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_submission(message: &str) -> Self {
        Self {
            submit_error: Some(message.to_string()),
            ..Self::confirming()
        }
    }

    pub fn failing_resolution(message: &str) -> Self {
        Self {
            resolve_error: Some(message.to_string()),
            ..Self::confirming()
        }
    }

    /// Hold every submission for `delay` before confirming.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.resolve_calls() + self.submit_calls()
    }

    pub fn submitted(&self) -> Vec<Transaction> {
        self.submitted.lock().unwrap().clone()
    }

    /// Token account the stub hands out for `owner`.
    pub fn token_account(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
        spl_associated_token_account::get_associated_token_address(owner, mint)
    }
}

#[async_trait]
impl TokenLedger for StubLedger {
    async fn resolve_or_create_token_account(
        &self,
        _payer: &Keypair,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<Pubkey, LedgerError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        match &self.resolve_error {
            Some(message) => Err(LedgerError::Unavailable(message.clone())),
            None => Ok(Self::token_account(owner, mint)),
        }
    }

    async fn submit_and_confirm(
        &self,
        transaction: Transaction,
        _signers: &[&Keypair],
    ) -> Result<Signature, LedgerError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.submitted.lock().unwrap().push(transaction);
        match &self.submit_error {
            Some(message) => Err(LedgerError::Unavailable(message.clone())),
            None => Ok(self.signature),
        }
    }

    async fn token_balance(&self, _account: &Pubkey) -> Result<u64, LedgerError> {
        Ok(self.balance)
    }
}

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Harness {
    pub service: Arc<FaucetService>,
    pub ledger: Arc<StubLedger>,
    pub clock: Arc<ManualClock>,
    pub funding_wallet: Pubkey,
    pub mint: Pubkey,
}

/// Service with the given per-window quota and 200 tokens per request.
pub fn harness(ledger: StubLedger, max_requests_per_window: u32) -> Harness {
    harness_with(ledger, |settings| {
        settings.max_requests_per_window = max_requests_per_window;
    })
}

pub fn harness_with<F>(ledger: StubLedger, customize: F) -> Harness
where
    F: FnOnce(&mut FaucetSettings),
{
    drip_common::utils::logging::init_test_logging();

    let mint = Pubkey::new_unique();
    let mut settings = FaucetSettings::new(mint, Keypair::new());
    settings.tokens_per_request = 200;
    customize(&mut settings);

    let funding_wallet = settings.funding_wallet();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let quota = QuotaLedger::with_clock(settings.quota_window, clock.clone());
    let ledger = Arc::new(ledger);
    let service = FaucetService::new(settings, quota, ledger.clone()).expect("service");

    Harness {
        service: Arc::new(service),
        ledger,
        clock,
        funding_wallet,
        mint,
    }
}

pub fn wallet() -> String {
    Pubkey::new_unique().to_string()
}
