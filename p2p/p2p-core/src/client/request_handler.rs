use std::{
    future::{ready, Ready},
    task::{Context, Poll},
};

use tower::Service;

use cinder_wire::{ProtocolRequest, ProtocolResponse};

/// A [`ProtocolRequestHandler`](crate::ProtocolRequestHandler) for nodes that serve nothing.
///
/// Every request is refused, the connection task then leaves it unanswered.
#[derive(Debug, Copy, Clone, Default)]
pub struct DummyRequestHandler;

impl Service<ProtocolRequest> for DummyRequestHandler {
    type Response = ProtocolResponse;
    type Error = tower::BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ProtocolRequest) -> Self::Future {
        ready(Err(format!("this node does not serve {} requests", req.kind()).into()))
    }
}
