// IR medium emulated over a zenoh key
//
// Every node publishes its frames as JSON `IrFrame` samples on one key and
// subscribes to the same key. Frames published by this node are dropped on receipt.

use tracing::warn;
use zenoh::Session;
use zenoh::Wait;
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

use super::medium::Medium;
use super::{LinkError, Result};
use crate::messages::IrFrame;

pub struct ZenohMedium {
    node: u8,
    publisher: Publisher<'static>,
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
}

fn zenoh_err(e: zenoh::Error) -> LinkError {
    LinkError::Zenoh(e.to_string())
}

impl ZenohMedium {
    /// Declare the publisher and subscriber for `key` on an open session
    pub async fn declare(session: &Session, key: &str, node: u8) -> Result<Self> {
        let publisher = session
            .declare_publisher(key.to_string())
            .await
            .map_err(zenoh_err)?;
        let subscriber = session
            .declare_subscriber(key.to_string())
            .await
            .map_err(zenoh_err)?;
        Ok(Self {
            node,
            publisher,
            subscriber,
        })
    }

    pub fn node(&self) -> u8 {
        self.node
    }
}

/// Decode one sample, `None` for our own frames and malformed payloads
fn decode(node: u8, payload: &[u8]) -> Option<u64> {
    match serde_json::from_slice::<IrFrame>(payload) {
        Ok(ir) if ir.from == node => None,
        Ok(ir) => Some(ir.frame),
        Err(e) => {
            warn!("Failed to parse IR frame: {}", e);
            None
        }
    }
}

impl Medium for ZenohMedium {
    fn transmit(&mut self, frame: u64) -> Result<()> {
        let json = serde_json::to_string(&IrFrame {
            from: self.node,
            frame,
        })?;
        self.publisher.put(json).wait().map_err(zenoh_err)?;
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<u64>> {
        while let Ok(Some(sample)) = self.subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Some(frame) = decode(self.node, &payload) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }
}
