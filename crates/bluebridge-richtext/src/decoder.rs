use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::attributed::AttributedString;
use crate::error::DecodeError;
use crate::pool::ContextPool;

/// Turns native rich-text archives into [`AttributedString`]s.
///
/// Safe to share between threads: every decode leases its own context.
pub struct Decoder {
    pool: ContextPool,
}

impl Decoder {
    pub fn new(pool: ContextPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    /// Decode one archived body.
    ///
    /// The native facility answers with either a JSON object or a
    /// diagnostic; anything not opening with `{` is returned verbatim as
    /// [`DecodeError::Delegate`]. A failure affects only this call.
    pub fn decode(&self, blob: &[u8]) -> Result<AttributedString, DecodeError> {
        let encoded = STANDARD.encode(blob);

        let output = {
            let mut context = self.pool.acquire()?;
            context.decode_attributed_string(&encoded)
        };

        if !output.starts_with('{') {
            debug!(len = blob.len(), diagnostic = %output, "Native decoder rejected archive");
            return Err(DecodeError::Delegate(output));
        }

        Ok(serde_json::from_str(&output)?)
    }
}
