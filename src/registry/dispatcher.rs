//! Dispatcher
//!
//! Routes commands, queries and events to registered handlers through the
//! behavior pipeline, after admission by the flow controller. Event
//! publication fans out to every bound handler and aggregates failures per
//! the configured error strategy.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tower::{Service, ServiceExt};
use tracing::instrument;

use crate::error::{ConduitError, ConduitResult};
use crate::flow_control::FlowController;
use crate::ids::TypeTag;
use crate::message::{Message, MessageContext};
use crate::registry::handler_registry::HandlerRegistry;
use crate::registry::pipeline::{handler_service, BehaviorPipeline, PipelineService};
use crate::registry::traits::{CommandHandler, EventHandler, QueryHandler};

/// How event-publication failures are handled when more than one handler is bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorStrategy {
    /// Collect every handler failure into one aggregated error; all handlers still run
    #[default]
    ContinueOnError,
    /// Abort fan-out and surface the first failure
    FailFast,
    /// Route the failing delivery straight to the dead-letter queue
    DeadLetter,
}

/// Per-message-type counters the dispatcher maintains
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeStatistics {
    /// Number of deliveries that completed successfully
    pub messages_handled: u64,
    /// Number of deliveries that ended in failure
    pub messages_failed: u64,
}

/// Snapshot of per-message-type dispatch statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStatistics {
    /// Statistics keyed by message type tag
    pub by_type: HashMap<String, TypeStatistics>,
}

/// Aggregated failures from publishing an event to multiple handlers
#[derive(Debug, Clone)]
pub struct CompositeError {
    /// One error per failed handler
    pub causes: Vec<ConduitError>,
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} event handlers failed", self.causes.len(), self.causes.len())
    }
}

impl std::error::Error for CompositeError {}

/// Routes messages to handlers through admission control and the behavior pipeline
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    flow_control: Arc<FlowController>,
    pipeline: Arc<BehaviorPipeline>,
    error_strategy: ErrorStrategy,
    stats: DashMap<String, TypeStatistics>,
}

impl Dispatcher {
    /// Builds a dispatcher over a shared registry, flow controller and pipeline
    #[must_use]
    pub fn new(
        registry: Arc<HandlerRegistry>,
        flow_control: Arc<FlowController>,
        pipeline: Arc<BehaviorPipeline>,
        error_strategy: ErrorStrategy,
    ) -> Self {
        Self {
            registry,
            flow_control,
            pipeline,
            error_strategy,
            stats: DashMap::new(),
        }
    }

    fn record(&self, type_tag: &TypeTag, success: bool) {
        let mut entry = self.stats.entry(type_tag.to_string()).or_default();
        if success {
            entry.messages_handled += 1;
        } else {
            entry.messages_failed += 1;
        }
    }

    /// Snapshot of per-type statistics recorded so far
    #[must_use]
    pub fn statistics(&self) -> DispatchStatistics {
        DispatchStatistics {
            by_type: self
                .stats
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    async fn admit(&self, context: &MessageContext) -> ConduitResult<crate::flow_control::Permit<'_>> {
        self.flow_control.acquire_permit(context.priority).await
    }

    fn reject_if_expired(context: &MessageContext) -> ConduitResult<()> {
        if context.is_expired(std::time::SystemTime::now()) {
            return Err(ConduitError::Timeout("message expired before dispatch".into()));
        }
        Ok(())
    }

    fn service_for(&self, handler: PipelineHandler) -> PipelineService {
        let pipeline = Arc::clone(&self.pipeline);
        pipeline.build(handler.into_service())
    }

    /// Sends a command to its exclusively-bound handler
    #[instrument(skip(self, message, context), fields(type_tag = %message.type_tag))]
    pub async fn send_command(
        &self,
        message: Message,
        mut context: MessageContext,
    ) -> ConduitResult<Vec<u8>> {
        let type_tag = message.type_tag.clone();
        let handler = self
            .registry
            .get_command_handler(&type_tag)
            .ok_or_else(|| ConduitError::HandlerNotFound(type_tag.to_string()))?;

        let _permit = self.admit(&context).await?;
        Self::reject_if_expired(&context)?;
        context.begin_processing(std::time::SystemTime::now());
        let mut service = self.service_for(PipelineHandler::Command(handler));
        let result = service.ready().await?.call((message, context)).await;
        self.record(&type_tag, result.is_ok());
        result.map(|(payload, _ctx)| payload)
    }

    /// Sends a query to its exclusively-bound handler
    #[instrument(skip(self, message, context), fields(type_tag = %message.type_tag))]
    pub async fn send_query(
        &self,
        message: Message,
        mut context: MessageContext,
    ) -> ConduitResult<Vec<u8>> {
        let type_tag = message.type_tag.clone();
        let handler = self
            .registry
            .get_query_handler(&type_tag)
            .ok_or_else(|| ConduitError::HandlerNotFound(type_tag.to_string()))?;

        let _permit = self.admit(&context).await?;
        Self::reject_if_expired(&context)?;
        context.begin_processing(std::time::SystemTime::now());
        let mut service = self.service_for(PipelineHandler::Query(handler));
        let result = service.ready().await?.call((message, context)).await;
        self.record(&type_tag, result.is_ok());
        result.map(|(payload, _ctx)| payload)
    }

    /// Publishes an event to every bound handler in registration order,
    /// aggregating failures per the configured [`ErrorStrategy`]. Handlers
    /// run sequentially; event delivery order across handlers is not part
    /// of the contract, but running them one at a time keeps `FailFast`
    /// and per-type statistics simple to reason about.
    #[instrument(skip(self, message, context), fields(type_tag = %message.type_tag))]
    pub async fn publish(&self, message: Message, mut context: MessageContext) -> ConduitResult<()> {
        let type_tag = message.type_tag.clone();
        let handlers = self.registry.get_event_handlers(&type_tag);
        if handlers.is_empty() {
            return Ok(());
        }

        let _permit = self.admit(&context).await?;
        Self::reject_if_expired(&context)?;
        context.begin_processing(std::time::SystemTime::now());

        let mut causes = Vec::new();
        for handler in handlers {
            let mut service = self.service_for(PipelineHandler::Event(handler));
            let result = service
                .ready()
                .await?
                .call((message.clone(), context.clone()))
                .await;
            match result {
                Ok(_) => {}
                Err(err) => {
                    if self.error_strategy == ErrorStrategy::FailFast {
                        self.record(&type_tag, false);
                        return Err(err);
                    }
                    causes.push(err);
                }
            }
        }

        let success = causes.is_empty();
        self.record(&type_tag, success);
        if success {
            Ok(())
        } else {
            Err(ConduitError::unknown(CompositeError { causes }))
        }
    }
}

/// The concrete handler kind a pipeline invocation is bound to, type-erased
/// into a uniform `(payload, context)`-returning service
enum PipelineHandler {
    Command(Arc<dyn CommandHandler>),
    Query(Arc<dyn QueryHandler>),
    Event(Arc<dyn EventHandler>),
}

impl PipelineHandler {
    fn into_service(self) -> PipelineService {
        match self {
            Self::Command(handler) => handler_service(move |msg, ctx| {
                let handler = Arc::clone(&handler);
                async move {
                    let payload = handler.handle(msg, ctx.clone()).await?;
                    Ok((payload, ctx))
                }
            }),
            Self::Query(handler) => handler_service(move |msg, ctx| {
                let handler = Arc::clone(&handler);
                async move {
                    let payload = handler.handle(msg, ctx.clone()).await?;
                    Ok((payload, ctx))
                }
            }),
            Self::Event(handler) => handler_service(move |msg, ctx| {
                let handler = Arc::clone(&handler);
                async move {
                    handler.handle(msg, ctx.clone()).await?;
                    Ok((Vec::new(), ctx))
                }
            }),
        }
    }
}
