//! Transfer orchestration: resolve accounts, build the SPL transfer, submit once.

use crate::error::{FaucetError, FaucetResult};
use crate::ledger::TokenLedger;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decimals of the dispensed mint.
pub const TOKEN_DECIMALS: u8 = 6;

/// Parse a recipient wallet address.
pub fn parse_address(address: &str) -> FaucetResult<Pubkey> {
    let address = address.trim();
    if address.is_empty() {
        return Err(FaucetError::Validation("walletAddress is required".to_string()));
    }
    Pubkey::from_str(address)
        .map_err(|_| FaucetError::Validation(format!("Invalid wallet address: {}", address)))
}

/// Whole tokens to base units.
pub fn to_base_units(tokens: u64) -> FaucetResult<u64> {
    10u64
        .checked_pow(u32::from(TOKEN_DECIMALS))
        .and_then(|scale| tokens.checked_mul(scale))
        .ok_or_else(|| FaucetError::Internal(format!("Token amount {} overflows base units", tokens)))
}

/// Moves tokens from the funding account to a recipient. One attempt per
/// call; retrying is left to the caller.
pub struct TransferOrchestrator {
    ledger: Arc<dyn TokenLedger>,
    mint: Pubkey,
    funding_keypair: Arc<Keypair>,
}

impl TransferOrchestrator {
    pub fn new(ledger: Arc<dyn TokenLedger>, mint: Pubkey, funding_keypair: Arc<Keypair>) -> Self {
        Self {
            ledger,
            mint,
            funding_keypair,
        }
    }

    pub fn funding_wallet(&self) -> Pubkey {
        self.funding_keypair.pubkey()
    }

    pub fn mint(&self) -> Pubkey {
        self.mint
    }

    /// Parse and check a recipient: it must be a valid address other than
    /// the funding wallet.
    pub fn parse_recipient(&self, address: &str) -> FaucetResult<Pubkey> {
        let recipient = parse_address(address)?;
        if recipient == self.funding_wallet() {
            return Err(FaucetError::Validation(
                "Cannot send to the faucet funding address".to_string(),
            ));
        }
        Ok(recipient)
    }

    /// Transfer `amount_tokens` whole tokens to `recipient`.
    pub async fn execute(&self, recipient: &str, amount_tokens: u64) -> FaucetResult<Signature> {
        let recipient = self.parse_recipient(recipient)?;
        let amount = to_base_units(amount_tokens)?;
        let funding_wallet = self.funding_wallet();

        let source = self.resolve(&funding_wallet).await?;
        let destination = self.resolve(&recipient).await?;
        debug!(%source, %destination, "Resolved token accounts");

        let instruction = spl_token::instruction::transfer(
            &spl_token::id(),
            &source,
            &destination,
            &funding_wallet,
            &[],
            amount,
        )
        .map_err(|e| FaucetError::Submission(format!("Failed to build transfer: {}", e)))?;

        let transaction = Transaction::new_with_payer(&[instruction], Some(&funding_wallet));

        let signature = self
            .ledger
            .submit_and_confirm(transaction, &[self.funding_keypair.as_ref()])
            .await
            .map_err(|e| {
                warn!(%recipient, error = %e, "Transfer submission failed");
                FaucetError::Submission(e.to_string())
            })?;

        info!(%recipient, amount_tokens, tx = %signature, "Transfer confirmed");
        Ok(signature)
    }

    /// Funding account's token account and its balance in base units.
    pub async fn funding_balance(&self) -> FaucetResult<(Pubkey, u64)> {
        let account = self.resolve(&self.funding_wallet()).await?;
        let balance = self
            .ledger
            .token_balance(&account)
            .await
            .map_err(|e| FaucetError::AccountResolution(e.to_string()))?;
        Ok((account, balance))
    }

    async fn resolve(&self, owner: &Pubkey) -> FaucetResult<Pubkey> {
        self.ledger
            .resolve_or_create_token_account(&self.funding_keypair, &self.mint, owner)
            .await
            .map_err(|e| {
                warn!(%owner, error = %e, "Token account resolution failed");
                FaucetError::AccountResolution(e.to_string())
            })
    }
}
