//! Service trait definitions for the network layer

use async_trait::async_trait;
use bytes::Bytes;
use meridian_topology::NodeId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::NetworkResult;
use crate::message::{NetworkMessage, ServiceMessage};

/// Context provided to service handlers
#[derive(Clone, Debug)]
pub struct ServiceContext {
    /// The node that sent the request
    pub sender: NodeId,
    /// Correlation ID of the request
    pub correlation_id: uuid::Uuid,
}

/// Trait for request-response services
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// The request type this service handles
    type Request: ServiceMessage;

    /// Handle a request and return a response
    async fn handle(
        &self,
        request: Self::Request,
        ctx: ServiceContext,
    ) -> NetworkResult<<Self::Request as ServiceMessage>::Response>;
}

/// Type-erased service handler for internal use
pub(crate) trait ServiceHandler: Send + Sync {
    fn handle(
        &self,
        payload: Bytes,
        ctx: ServiceContext,
    ) -> Pin<Box<dyn Future<Output = NetworkResult<Bytes>> + Send>>;
}

struct TypedServiceHandler<S: Service> {
    service: Arc<S>,
}

impl<S: Service> ServiceHandler for TypedServiceHandler<S> {
    fn handle(
        &self,
        payload: Bytes,
        ctx: ServiceContext,
    ) -> Pin<Box<dyn Future<Output = NetworkResult<Bytes>> + Send>> {
        let service = self.service.clone();

        Box::pin(async move {
            let request = S::Request::decode(&payload)?;
            let response = service.handle(request, ctx).await?;
            response.encode()
        })
    }
}

pub(crate) fn create_service_handler<S: Service>(service: S) -> Arc<dyn ServiceHandler> {
    Arc::new(TypedServiceHandler {
        service: Arc::new(service),
    })
}
