//! The services every connection uses to answer the peer.
use std::{
    sync::Arc,
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use tower::Service;

use cinder_blockchain::{serve_request, BlockChain};
use cinder_helper::asynch::rayon_spawn_async;
use cinder_p2p_core::CoreSyncDataRequest;
use cinder_types::HeadInfo;
use cinder_wire::{ProtocolRequest, ProtocolResponse};

/// Answers peers' requests from the local chain.
#[derive(Clone)]
pub struct ChainRequestHandler {
    pub(crate) chain: Arc<BlockChain>,
}

impl ChainRequestHandler {
    pub const fn new(chain: Arc<BlockChain>) -> Self {
        Self { chain }
    }
}

impl Service<ProtocolRequest> for ChainRequestHandler {
    type Response = ProtocolResponse;
    type Error = tower::BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ProtocolRequest) -> Self::Future {
        if req.is_empty() {
            return async move { Err(format!("empty {} request", req.kind()).into()) }.boxed();
        }

        let chain = Arc::clone(&self.chain);

        // Proofs and big header ranges hit the store many times.
        rayon_spawn_async(move || serve_request(&chain, &req))
            .map(|res| res.map_err(Into::into))
            .boxed()
    }
}

/// Returns the local head, sent to peers in the handshake.
#[derive(Clone)]
pub struct ChainHeadSvc(pub Arc<BlockChain>);

impl Service<CoreSyncDataRequest> for ChainHeadSvc {
    type Response = HeadInfo;
    type Error = tower::BoxError;
    type Future = futures::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: CoreSyncDataRequest) -> Self::Future {
        futures::future::ready(self.0.head_info().map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use cinder_test_utils::chain::{test_genesis, ChainBuilder};
    use cinder_types::HashOrNumber;

    use super::*;

    #[tokio::test]
    async fn serves_headers_from_the_chain() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(10);
        let chain = builder.build().await;

        let res = ChainRequestHandler::new(chain)
            .oneshot(ProtocolRequest::GetBlockHeaders {
                origin: HashOrNumber::Number(3),
                amount: 4,
                skip: 0,
                reverse: false,
            })
            .await
            .unwrap();

        assert_eq!(res, ProtocolResponse::BlockHeaders(builder.headers(3, 6)));
    }

    #[tokio::test]
    async fn empty_requests_are_refused() {
        let chain = ChainBuilder::new(test_genesis()).build().await;

        let res = ChainRequestHandler::new(chain)
            .oneshot(ProtocolRequest::GetBlockBodies(vec![]))
            .await;

        assert!(res.is_err());
    }

    #[tokio::test]
    async fn head_svc_returns_the_head() {
        let mut builder = ChainBuilder::new(test_genesis());
        builder.extend(3);
        let chain = builder.build().await;

        let head = ChainHeadSvc(Arc::clone(&chain))
            .oneshot(CoreSyncDataRequest)
            .await
            .unwrap();

        assert_eq!(head, chain.head_info().unwrap());
        assert_eq!(head.number, 3);
    }
}
