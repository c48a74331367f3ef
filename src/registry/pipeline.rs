//! Behavior pipeline
//!
//! An ordered sequence of behaviors decorating a handler invocation,
//! evaluated inside-out: the first-registered behavior is outermost, the
//! last-registered sits closest to the handler. Behaviors attach scratch
//! data to [`MessageContext`] but never mutate the message payload.
//!
//! Built on `tower`'s `Service`/type-erased `BoxCloneService`, the same
//! combinator the wider ecosystem uses for exactly this "ordered decorator
//! stack around a request" shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tower::util::BoxCloneService;
use tower::{service_fn, Service, ServiceExt};
use tracing::{info_span, Instrument};

use crate::error::ConduitError;
use crate::message::{Message, MessageContext};

/// A pipeline stage's boxed, clonable service: takes a message and its
/// context, returns the response payload and the (possibly mutated) context.
pub type PipelineService =
    BoxCloneService<(Message, MessageContext), (Vec<u8>, MessageContext), ConduitError>;

/// How a registered behavior wraps the rest of the chain
pub trait BehaviorLayer: Send + Sync {
    /// Behavior name, used in tracing spans and configuration lookups
    fn name(&self) -> &str;

    /// Wraps `inner` with this behavior's pre/post logic
    fn wrap(&self, inner: PipelineService) -> PipelineService;
}

/// Builds the dispatcher-facing [`PipelineService`] out of a handler plus
/// an ordered set of behaviors
#[derive(Default)]
pub struct BehaviorPipeline {
    layers: Vec<Arc<dyn BehaviorLayer>>,
}

impl BehaviorPipeline {
    /// Builds an empty pipeline
    #[must_use]
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a behavior; later calls sit closer to the handler
    #[must_use]
    pub fn with_layer(mut self, layer: Arc<dyn BehaviorLayer>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Wraps `handler` in every configured behavior, first-registered outermost
    #[must_use]
    pub fn build(&self, handler: PipelineService) -> PipelineService {
        self.layers
            .iter()
            .rev()
            .fold(handler, |svc, layer| layer.wrap(svc))
    }
}

/// Boxes a plain async handler function into a [`PipelineService`]
pub fn handler_service<F, Fut>(handler: F) -> PipelineService
where
    F: Fn(Message, MessageContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(Vec<u8>, MessageContext), ConduitError>> + Send + 'static,
{
    BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
        handler(msg, ctx)
    }))
}

/// Rejects messages failing a validation predicate before they reach the handler
pub struct ValidationBehavior {
    predicate: Arc<dyn Fn(&Message) -> Result<(), String> + Send + Sync>,
}

impl ValidationBehavior {
    /// Builds a validation behavior from a predicate returning `Err(reason)` on rejection
    pub fn new(predicate: impl Fn(&Message) -> Result<(), String> + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl BehaviorLayer for ValidationBehavior {
    fn name(&self) -> &str {
        "validation"
    }

    fn wrap(&self, inner: PipelineService) -> PipelineService {
        let predicate = Arc::clone(&self.predicate);
        BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
            let predicate = Arc::clone(&predicate);
            let mut inner = inner.clone();
            async move {
                if let Err(reason) = predicate(&msg) {
                    return Err(ConduitError::Validation(reason));
                }
                inner.ready().await?.call((msg, ctx)).await
            }
        }))
    }
}

/// Emits a tracing span around the handler invocation
pub struct LoggingBehavior;

impl BehaviorLayer for LoggingBehavior {
    fn name(&self) -> &str {
        "logging"
    }

    fn wrap(&self, inner: PipelineService) -> PipelineService {
        BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
            let mut inner = inner.clone();
            let type_tag = msg.type_tag.to_string();
            let message_id = msg.id.to_string();
            async move { inner.ready().await?.call((msg, ctx)).await }
                .instrument(info_span!("dispatch", type_tag = %type_tag, message_id = %message_id))
        }))
    }
}

/// Aborts the handler invocation if it does not complete within `timeout`
pub struct TimeoutBehavior {
    timeout: Duration,
}

impl TimeoutBehavior {
    /// Builds a timeout behavior with the given duration
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl BehaviorLayer for TimeoutBehavior {
    fn name(&self) -> &str {
        "timeout"
    }

    fn wrap(&self, inner: PipelineService) -> PipelineService {
        let timeout = self.timeout;
        BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
            let mut inner = inner.clone();
            async move {
                match tokio::time::timeout(timeout, async { inner.ready().await?.call((msg, ctx)).await })
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ConduitError::Timeout(format!("exceeded {timeout:?}"))),
                }
            }
        }))
    }
}

/// Records per-type-tag invocation counts and latency
#[derive(Default, Clone)]
pub struct MetricsBehavior {
    invocations: Arc<DashMap<String, u64>>,
}

impl MetricsBehavior {
    /// Builds an empty metrics behavior
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total invocations recorded for `type_tag`
    #[must_use]
    pub fn count_for(&self, type_tag: &str) -> u64 {
        self.invocations.get(type_tag).map(|v| *v).unwrap_or(0)
    }
}

impl BehaviorLayer for MetricsBehavior {
    fn name(&self) -> &str {
        "metrics"
    }

    fn wrap(&self, inner: PipelineService) -> PipelineService {
        let invocations = Arc::clone(&self.invocations);
        BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
            let mut inner = inner.clone();
            let invocations = Arc::clone(&invocations);
            let type_tag = msg.type_tag.to_string();
            async move {
                let start = Instant::now();
                let result = inner.ready().await?.call((msg, ctx)).await;
                *invocations.entry(type_tag).or_insert(0) += 1;
                let _elapsed = start.elapsed();
                result
            }
        }))
    }
}

/// Ensures `correlation_id` is present before the handler runs, generating
/// one if the producer omitted it, per the ingress auto-generation invariant
pub struct CorrelationPropagationBehavior;

impl BehaviorLayer for CorrelationPropagationBehavior {
    fn name(&self) -> &str {
        "correlation-id-propagation"
    }

    fn wrap(&self, inner: PipelineService) -> PipelineService {
        BoxCloneService::new(service_fn(move |(mut msg, ctx): (Message, MessageContext)| {
            let mut inner = inner.clone();
            async move {
                if msg.correlation_id.is_none() {
                    msg.correlation_id = Some(crate::ids::CorrelationId::generate());
                }
                inner.ready().await?.call((msg, ctx)).await
            }
        }))
    }
}

/// Caches successful responses by message id for `ttl`, short-circuiting
/// repeated delivery of the same message (e.g. broker-redelivered commands).
/// Evicts the oldest entry once `max_size` is reached rather than growing
/// unbounded.
pub struct CachingBehavior {
    ttl: Duration,
    max_size: usize,
    cache: Arc<DashMap<crate::ids::MessageId, (Instant, Vec<u8>)>>,
}

impl CachingBehavior {
    /// Builds a caching behavior with the given time-to-live and entry cap
    #[must_use]
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size,
            cache: Arc::new(DashMap::new()),
        }
    }

    fn evict_oldest(cache: &DashMap<crate::ids::MessageId, (Instant, Vec<u8>)>) {
        if let Some(oldest) = cache
            .iter()
            .min_by_key(|entry| entry.value().0)
            .map(|entry| *entry.key())
        {
            cache.remove(&oldest);
        }
    }
}

impl BehaviorLayer for CachingBehavior {
    fn name(&self) -> &str {
        "caching"
    }

    fn wrap(&self, inner: PipelineService) -> PipelineService {
        let ttl = self.ttl;
        let max_size = self.max_size;
        let cache = Arc::clone(&self.cache);
        BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
            let mut inner = inner.clone();
            let cache = Arc::clone(&cache);
            async move {
                if let Some(entry) = cache.get(&msg.id) {
                    let (cached_at, payload) = entry.value();
                    if cached_at.elapsed() < ttl {
                        return Ok((payload.clone(), ctx));
                    }
                }
                let id = msg.id;
                let result = inner.ready().await?.call((msg, ctx)).await;
                if let Ok((payload, _)) = &result {
                    if cache.len() >= max_size && !cache.contains_key(&id) {
                        Self::evict_oldest(&cache);
                    }
                    cache.insert(id, (Instant::now(), payload.clone()));
                }
                result
            }
        }))
    }
}

/// Snapshot of headers carried through for authorization decisions
pub type AuthorizationHeaders = HashMap<String, serde_json::Value>;

/// Rejects messages whose headers do not satisfy an authorization predicate
pub struct AuthorizationBehavior {
    predicate: Arc<dyn Fn(&AuthorizationHeaders) -> bool + Send + Sync>,
}

impl AuthorizationBehavior {
    /// Builds an authorization behavior from a predicate over message headers
    pub fn new(predicate: impl Fn(&AuthorizationHeaders) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }
}

impl BehaviorLayer for AuthorizationBehavior {
    fn name(&self) -> &str {
        "authorization"
    }

    fn wrap(&self, inner: PipelineService) -> PipelineService {
        let predicate = Arc::clone(&self.predicate);
        BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
            let predicate = Arc::clone(&predicate);
            let mut inner = inner.clone();
            async move {
                if !predicate(&msg.headers) {
                    return Err(ConduitError::Validation("unauthorized".into()));
                }
                inner.ready().await?.call((msg, ctx)).await
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TypeTag;

    fn message() -> Message {
        Message::new(TypeTag::try_new("conduit.test.ping").unwrap(), vec![])
    }

    fn echo_handler() -> PipelineService {
        handler_service(|msg: Message, ctx: MessageContext| async move { Ok((msg.payload, ctx)) })
    }

    #[tokio::test]
    async fn validation_rejects_before_handler_runs() {
        let pipeline = BehaviorPipeline::new().with_layer(Arc::new(ValidationBehavior::new(
            |_msg| Err("always rejected".to_string()),
        )));
        let mut service = pipeline.build(echo_handler());
        let result = service.ready().await.unwrap().call((message(), MessageContext::default())).await;
        assert!(matches!(result, Err(ConduitError::Validation(_))));
    }

    #[tokio::test]
    async fn caching_behavior_evicts_oldest_once_full() {
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counted = Arc::clone(&calls);
        let handler = handler_service(move |msg: Message, ctx: MessageContext| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok((msg.payload, ctx))
            }
        });
        let pipeline = BehaviorPipeline::new()
            .with_layer(Arc::new(CachingBehavior::new(Duration::from_secs(60), 2)));
        let mut service = pipeline.build(handler);

        let first = Message::new(TypeTag::try_new("conduit.test.one").unwrap(), vec![1]);
        let second = Message::new(TypeTag::try_new("conduit.test.two").unwrap(), vec![2]);
        let third = Message::new(TypeTag::try_new("conduit.test.three").unwrap(), vec![3]);

        service.ready().await.unwrap().call((first.clone(), MessageContext::default())).await.unwrap();
        service.ready().await.unwrap().call((second.clone(), MessageContext::default())).await.unwrap();
        service.ready().await.unwrap().call((third, MessageContext::default())).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 3);

        // second was inserted after first and is still within the cap, so
        // this call is served from cache
        service.ready().await.unwrap().call((second, MessageContext::default())).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 3);

        // first was evicted to make room for third, so this call is a miss
        service.ready().await.unwrap().call((first, MessageContext::default())).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn caching_behavior_serves_repeated_message_from_cache() {
        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counted = Arc::clone(&calls);
        let handler = handler_service(move |msg: Message, ctx: MessageContext| {
            let counted = Arc::clone(&counted);
            async move {
                counted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok((msg.payload, ctx))
            }
        });
        let pipeline = BehaviorPipeline::new()
            .with_layer(Arc::new(CachingBehavior::new(Duration::from_secs(60), 10)));
        let mut service = pipeline.build(handler);
        let message = Message::new(TypeTag::try_new("conduit.test.repeat").unwrap(), vec![9]);

        service.ready().await.unwrap().call((message.clone(), MessageContext::default())).await.unwrap();
        service.ready().await.unwrap().call((message, MessageContext::default())).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn timeout_behavior_fails_slow_handler() {
        let slow = handler_service(|msg: Message, ctx: MessageContext| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok((msg.payload, ctx))
        });
        let pipeline = BehaviorPipeline::new().with_layer(Arc::new(TimeoutBehavior::new(Duration::from_millis(5))));
        let mut service = pipeline.build(slow);
        let result = service.ready().await.unwrap().call((message(), MessageContext::default())).await;
        assert!(matches!(result, Err(ConduitError::Timeout(_))));
    }

    #[tokio::test]
    async fn correlation_id_generated_when_absent() {
        let pipeline = BehaviorPipeline::new().with_layer(Arc::new(CorrelationPropagationBehavior));
        let mut service = pipeline.build(handler_service(|msg: Message, ctx: MessageContext| async move {
            assert!(msg.correlation_id.is_some());
            Ok((vec![], ctx))
        }));
        let mut msg = message();
        msg.correlation_id = None;
        service.ready().await.unwrap().call((msg, MessageContext::default())).await.unwrap();
    }

    #[tokio::test]
    async fn pipeline_outer_layer_wraps_inner() {
        let order: Arc<std::sync::Mutex<Vec<&'static str>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct RecordingBehavior {
            label: &'static str,
            order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        }
        impl BehaviorLayer for RecordingBehavior {
            fn name(&self) -> &str {
                self.label
            }
            fn wrap(&self, inner: PipelineService) -> PipelineService {
                let label = self.label;
                let order = Arc::clone(&self.order);
                BoxCloneService::new(service_fn(move |(msg, ctx): (Message, MessageContext)| {
                    let mut inner = inner.clone();
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(label);
                        inner.ready().await?.call((msg, ctx)).await
                    }
                }))
            }
        }

        let pipeline = BehaviorPipeline::new()
            .with_layer(Arc::new(RecordingBehavior {
                label: "outer",
                order: Arc::clone(&order),
            }))
            .with_layer(Arc::new(RecordingBehavior {
                label: "inner",
                order: Arc::clone(&order),
            }));
        let mut service = pipeline.build(echo_handler());
        service.ready().await.unwrap().call((message(), MessageContext::default())).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["outer", "inner"]);
    }
}
