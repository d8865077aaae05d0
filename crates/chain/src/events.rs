//! Log decoding against `sol!` event schemas.

use alloy::primitives::{Address, Log};
use alloy::sol_types::SolEvent;
use tracing::debug;

/// Decode every log emitted by `emitter` that matches event `E`.
///
/// Logs from other contracts or with a different topic are skipped. A log
/// with the right topic that fails to decode is skipped as well; the
/// resulting order is the order of the input logs.
pub fn decode_logs<E: SolEvent>(logs: &[Log], emitter: Address) -> Vec<E> {
    logs.iter()
        .filter(|log| log.address == emitter)
        .filter(|log| log.topics().first() == Some(&E::SIGNATURE_HASH))
        .filter_map(|log| match E::decode_log(log, true) {
            Ok(decoded) => Some(decoded.data),
            Err(e) => {
                debug!(event = E::SIGNATURE, error = %e, "Skipping undecodable log");
                None
            }
        })
        .collect()
}
