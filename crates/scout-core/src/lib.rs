//! ============================================================================
//! SCOUT-CORE: MacroScout Helper Console
//! ============================================================================
//! This crate handles all backend logic for the helper console:
//! - Minting usage tokens and redeeming licensed content via FairFetch
//! - Direct-then-relay routing for blocked backend calls
//! - The relay server itself
//! - Local storage of settings and recent receipts via redb
//! ============================================================================

pub mod config;
pub mod db;
pub mod fallback;
pub mod flow;
pub mod licensing;
pub mod relay;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use config::{ConsoleConfig, SettingsOverrides};
pub use db::{ConsoleDb, RunRecord, Settings};
pub use flow::{AccessFlowOrchestrator, ConnectionStatus, RunInput, RunReport};
pub use licensing::{build_licensed_url, mask_api_key, view_label};
pub use relay::{RelayServer, RelayService};
pub use transport::{HttpTransport, ReqwestTransport};
