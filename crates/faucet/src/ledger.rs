//! Token ledger capability: account resolution and transaction submission.

use async_trait::async_trait;
use solana_client::{client_error::ClientError, nonblocking::rpc_client::RpcClient};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::{Signer, SignerError},
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use spl_token::solana_program::program_pack::Pack;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0}")]
    Rpc(#[from] Box<ClientError>),

    #[error("failed to sign transaction: {0}")]
    Signing(#[from] SignerError),

    #[error("token account {account} does not hold mint {mint} for owner {owner}")]
    AccountMismatch {
        account: Pubkey,
        mint: Pubkey,
        owner: Pubkey,
    },

    #[error("{0}")]
    Unavailable(String),
}

impl From<ClientError> for LedgerError {
    fn from(err: ClientError) -> Self {
        LedgerError::Rpc(Box::new(err))
    }
}

/// Operations the faucet needs from the chain.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Token account holding `mint` for `owner`, created and paid for by
    /// `payer` when it does not exist yet.
    async fn resolve_or_create_token_account(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<Pubkey, LedgerError>;

    /// Sign with a recent blockhash, submit, and wait for confirmation.
    async fn submit_and_confirm(
        &self,
        transaction: Transaction,
        signers: &[&Keypair],
    ) -> Result<Signature, LedgerError>;

    /// Balance of a token account in base units.
    async fn token_balance(&self, account: &Pubkey) -> Result<u64, LedgerError>;
}

/// [`TokenLedger`] backed by a Solana JSON-RPC endpoint.
pub struct SolanaTokenLedger {
    rpc: RpcClient,
}

impl SolanaTokenLedger {
    pub fn new(rpc_url: String, commitment: CommitmentConfig) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url, commitment),
        }
    }
}

#[async_trait]
impl TokenLedger for SolanaTokenLedger {
    async fn resolve_or_create_token_account(
        &self,
        payer: &Keypair,
        mint: &Pubkey,
        owner: &Pubkey,
    ) -> Result<Pubkey, LedgerError> {
        let address = get_associated_token_address(owner, mint);

        let existing = self
            .rpc
            .get_account_with_commitment(&address, self.rpc.commitment())
            .await?
            .value;

        if let Some(account) = existing {
            let state = spl_token::state::Account::unpack(&account.data)
                .map_err(|e| LedgerError::Unavailable(format!("invalid token account {}: {}", address, e)))?;
            if state.mint != *mint || state.owner != *owner {
                return Err(LedgerError::AccountMismatch {
                    account: address,
                    mint: *mint,
                    owner: *owner,
                });
            }
            debug!(%address, %owner, "Token account exists");
            return Ok(address);
        }

        let instruction =
            create_associated_token_account_idempotent(&payer.pubkey(), owner, mint, &spl_token::id());
        let blockhash = self.rpc.get_latest_blockhash().await?;
        let transaction =
            Transaction::new_signed_with_payer(&[instruction], Some(&payer.pubkey()), &[payer], blockhash);
        let signature = self.rpc.send_and_confirm_transaction(&transaction).await?;

        info!(%address, %owner, tx = %signature, "Created token account");
        Ok(address)
    }

    async fn submit_and_confirm(
        &self,
        mut transaction: Transaction,
        signers: &[&Keypair],
    ) -> Result<Signature, LedgerError> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        transaction.try_sign(&signers.to_vec(), blockhash)?;
        Ok(self.rpc.send_and_confirm_transaction(&transaction).await?)
    }

    async fn token_balance(&self, account: &Pubkey) -> Result<u64, LedgerError> {
        let balance = self.rpc.get_token_account_balance(account).await?;
        balance
            .amount
            .parse()
            .map_err(|_| LedgerError::Unavailable(format!("unparsable token balance: {}", balance.amount)))
    }
}
