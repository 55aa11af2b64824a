//! Publish worker.
//!
//! Appends run on a dedicated thread per channel so `publish` never waits on
//! store I/O. Jobs are appended in the order they were queued; the readiness
//! gate hands them over in registration order.

use crate::channel::PublishCallback;
use crate::error::{ChannelError, Result, StoreError};
use crate::types::{LogHandle, RecordInput, WriteConcern};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

use super::Shared;

/// One append waiting for the worker.
pub(crate) struct PublishJob {
    pub(crate) handle: LogHandle,
    pub(crate) input: RecordInput,
    pub(crate) callback: Option<PublishCallback>,
}

impl PublishJob {
    /// Report `error` without appending.
    pub(crate) fn reject(self, error: ChannelError) {
        match self.callback {
            Some(callback) => callback(Err(error)),
            None => debug!(%error, "dropping unconfirmed publish"),
        }
    }
}

/// Start the publish worker draining `queue`.
///
/// The worker exits once the channel drops its sender on close.
pub(crate) fn spawn(shared: &Arc<Shared>, queue: Receiver<PublishJob>) -> Result<()> {
    let worker = Publisher {
        shared: Arc::clone(shared),
        queue,
    };
    thread::Builder::new()
        .name(format!("tailcast-{}-publish", shared.config.name))
        .spawn(move || worker.run())
        .map(|_| ())
        .map_err(|e| ChannelError::Spawn(e.to_string()))
}

struct Publisher {
    shared: Arc<Shared>,
    queue: Receiver<PublishJob>,
}

impl Publisher {
    fn run(self) {
        for job in self.queue.iter() {
            self.append(job);
        }
        debug!(log = %self.shared.config.name, "publisher stopped");
    }

    fn append(&self, job: PublishJob) {
        if self.shared.is_closed() {
            job.reject(ChannelError::Closed);
            return;
        }

        let PublishJob {
            handle,
            input,
            callback,
        } = job;
        let concern = if callback.is_some() {
            WriteConcern::Acknowledged
        } else {
            WriteConcern::Unacknowledged
        };

        let result = self
            .shared
            .store
            .append(&handle, input, concern)
            .map_err(ChannelError::Publish);

        match (result, callback) {
            (Ok(Some(record)), Some(callback)) => {
                trace!(position = %record.position, "publish confirmed");
                callback(Ok(record))
            }
            (Ok(None), Some(callback)) => callback(Err(ChannelError::Publish(
                StoreError::Transport("write was not acknowledged".to_string()),
            ))),
            (Err(error), Some(callback)) => callback(Err(error)),
            (Err(error), None) => self.shared.emit_error(error),
            (Ok(_), None) => {}
        }
    }
}
