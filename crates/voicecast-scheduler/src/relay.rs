//! Outbound half of the event channel to the relay process.
//!
//! Sends are best effort and never block the scheduler: a request that cannot
//! be queued right now is reported back and dropped.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use voicecast_proto::protocol::RelayRequest;

use crate::error::RelayRequestFailed;

pub trait EventChannel: Send + Sync {
    fn send(&self, request: RelayRequest) -> Result<(), RelayRequestFailed>;
}

impl EventChannel for mpsc::Sender<RelayRequest> {
    fn send(&self, request: RelayRequest) -> Result<(), RelayRequestFailed> {
        self.try_send(request).map_err(|e| match e {
            TrySendError::Full(request) => RelayRequestFailed {
                request,
                reason: "relay queue full".to_string(),
            },
            TrySendError::Closed(request) => RelayRequestFailed {
                request,
                reason: "relay link closed".to_string(),
            },
        })
    }
}

impl EventChannel for mpsc::UnboundedSender<RelayRequest> {
    fn send(&self, request: RelayRequest) -> Result<(), RelayRequestFailed> {
        mpsc::UnboundedSender::send(self, request).map_err(|e| RelayRequestFailed {
            request: e.0,
            reason: "relay link closed".to_string(),
        })
    }
}
