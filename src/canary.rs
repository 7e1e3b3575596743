// Canary guard
// Last-line pattern check on the serialized outbound payload. If anything
// SSN- or EIN-shaped survived sanitization, the request must not leave the
// machine. Defense in depth, not the primary mechanism.

use crate::error::{GatewayError, Result};
use regex::Regex;

pub struct CanaryGuard {
    ssn_shape: Regex,
    ein_shape: Regex,
}

impl CanaryGuard {
    pub fn new() -> Self {
        CanaryGuard {
            ssn_shape: Regex::new(r"\b\d{3}[-\s]\d{2}[-\s]\d{4}\b").unwrap(),
            ein_shape: Regex::new(r"\b\d{2}-\d{7}\b").unwrap(),
        }
    }

    /// Err when residual PII shapes remain. The error and the log line carry
    /// counts only, never the matched text.
    pub fn assert_no_leaked_pii(&self, payload: &str) -> Result<()> {
        let ssn_like = self.ssn_shape.find_iter(payload).count();
        let ein_like = self.ein_shape.find_iter(payload).count();
        if ssn_like == 0 && ein_like == 0 {
            return Ok(());
        }
        tracing::error!(ssn_like, ein_like, "canary tripped on outbound payload");
        Err(GatewayError::CanaryTripped { ssn_like, ein_like })
    }
}

impl Default for CanaryGuard {
    fn default() -> Self {
        Self::new()
    }
}
