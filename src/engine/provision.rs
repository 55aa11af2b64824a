//! Log handle provisioning.

use crate::channel::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::store::LogStore;
use crate::types::LogHandle;
use tracing::{debug, info};

use super::Gate;

/// Make sure the configured log exists and return a handle to it.
///
/// Waits for the store connection first. On failure the gate is resolved
/// with the error so queued publishers hear about it; on success the gate is
/// left pending for the engine, which resolves it once a stream is live.
pub(crate) fn ensure(store: &dyn LogStore, config: &ChannelConfig, gate: &Gate) -> Result<LogHandle> {
    let outcome = store
        .await_connection()
        .and_then(|()| store.create_or_open(&config.name, &config.capped))
        .map_err(ChannelError::Provision);

    match outcome {
        Ok(handle) => {
            info!(log = %config.name, ?handle, "log provisioned");
            Ok(handle)
        }
        Err(error) => {
            debug!(log = %config.name, %error, "provisioning failed");
            gate.resolve(Err(error.clone()));
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use crate::types::CappedOptions;

    #[test]
    fn test_ensure_creates_log() {
        let store = MemoryStore::new();
        let gate = Gate::new();

        let handle = ensure(&store, &ChannelConfig::new("events"), &gate).unwrap();
        assert_eq!(handle.name(), "events");
        assert!(store.contains("events"));
        assert!(!gate.is_resolved());
    }

    #[test]
    fn test_ensure_failure_resolves_gate() {
        let store = MemoryStore::new();
        store
            .create_or_open("events", &CappedOptions::default())
            .unwrap();

        let config = ChannelConfig::new("events").with_capped(CappedOptions {
            strict: true,
            ..Default::default()
        });
        let gate = Gate::new();

        let result = ensure(&store, &config, &gate);
        assert!(matches!(
            result,
            Err(ChannelError::Provision(StoreError::LogExists(_)))
        ));
        assert!(matches!(gate.peek(), Some(Err(ChannelError::Provision(_)))));
    }
}
