// MoltGuard library surface
// The gateway binary uses everything below; hosts embedding the engine
// directly reach for the detector, vault, sanitizer/restorer, and tool guard.

pub mod canary;
pub mod config;
pub mod detector;
pub mod error;
pub mod proxy;
pub mod restorer;
pub mod sanitizer;
pub mod toolguard;
pub mod types;
pub mod vault;

pub use canary::CanaryGuard;
pub use config::GatewayConfig;
pub use detector::{EntityDetector, PersonEntityRecognizer, RuleBasedPersonRecognizer};
pub use error::{GatewayError, Result};
pub use restorer::Restorer;
pub use sanitizer::{LocalSession, SanitizeOutcome, SanitizeSession, Sanitizer, VaultSession};
pub use toolguard::{AuthShield, ToolCallGuard};
pub use types::{Category, EntityMatch, VaultEntry};
pub use vault::{MappingTable, TokenVault};
