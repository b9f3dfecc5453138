//! SPL test-token faucet
//!
//! Dispenses a fixed amount of one token mint from a custodial funding
//! account, subject to a per wallet/origin quota:
//! - Quota ledger with atomic admission and commit-on-confirmation
//! - Single-attempt transfer orchestration over a pluggable token ledger
//! - HTTP API and Prometheus metrics

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod quota;
pub mod service;
pub mod transfer;

pub use config::{ConfigError, FaucetConfig, FaucetSettings};
pub use error::{ErrorKind, FaucetError, FaucetResult};
pub use ledger::{LedgerError, SolanaTokenLedger, TokenLedger};
pub use metrics::FaucetMetrics;
pub use quota::{Clock, IdentityKey, ManualClock, QuotaLedger, QuotaRecord, Reservation, SystemClock};
pub use service::{DispenseReceipt, FaucetService, FaucetStatus, RequestedAmount};
pub use transfer::{TransferOrchestrator, TOKEN_DECIMALS};
