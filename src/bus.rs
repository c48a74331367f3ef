//! `ConduitBus`: the top-level orchestrator
//!
//! Wires the handler registry, flow controller, behavior pipeline and
//! dispatcher together with the resilience engine (retry, circuit breaker,
//! error aggregation, health monitoring), the dead-letter queue, the
//! request/response correlator, transport bindings and component lifecycle
//! management. Owns every background task it spawns and tears them down on
//! `shutdown`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::component::{LifecycleConfig, LifecycleEvent, LifecycleManager};
use crate::config::ConduitConfig;
use crate::correlator::{Correlator, DeadLetterQueue};
use crate::error::{ConduitError, ConduitResult};
use crate::flow_control::FlowController;
use crate::ids::{ComponentId, CorrelationId, TypeTag};
use crate::message::{Message, MessageContext};
use crate::observability::BusMetrics;
use crate::registry::traits::{CommandHandler, EventHandler, QueryHandler};
use crate::registry::{
    BehaviorPipeline, CachingBehavior, CorrelationPropagationBehavior, Dispatcher, HandlerRegistry,
    LoggingBehavior, MetricsBehavior, TimeoutBehavior, ValidationBehavior,
};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::error_aggregator::{AggregatorThresholds, ErrorAggregator, RetentionPolicy};
use crate::resilience::health_monitor::{AggregatorHealthSource, HealthMonitor, HealthSnapshot};
use crate::resilience::retry::{RetryConfig, RetryPolicy, Strategy};
use crate::time::{SharedClock, SystemClock};
use crate::transport::{Destination, Transport, TransportMessage};

/// Named transport binding plus the subscription cleanup that shutdown needs
struct TransportBinding {
    transport: Arc<dyn Transport>,
}

/// Owns every subsystem and exposes the operations a producer or component
/// author needs: registration, dispatch, transport I/O and lifecycle.
pub struct ConduitBus {
    config: ConduitConfig,
    clock: SharedClock,
    registry: Arc<HandlerRegistry>,
    flow_control: Arc<FlowController>,
    dispatcher: Arc<Dispatcher>,
    retry: Arc<RetryPolicy>,
    circuit_breaker: Arc<CircuitBreaker>,
    error_aggregator: Arc<ErrorAggregator>,
    health_monitor: Arc<HealthMonitor<AggregatorHealthSource>>,
    dlq: Arc<DeadLetterQueue>,
    correlator: Arc<Correlator>,
    lifecycle: Arc<LifecycleManager>,
    transports: DashMap<String, TransportBinding>,
    background_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ConduitBus {
    /// Assembles the behavior pipeline from `pipeline` config, first-registered
    /// outermost: tracing spans the whole dispatch, metrics counts every
    /// attempt including cache hits, validation rejects before any work
    /// happens, correlation ids are stamped before caching keys on them, and
    /// the timeout wraps only the handler invocation itself. An `is_enabled:
    /// false` config yields an empty pipeline — a pure pass-through.
    fn build_pipeline(config: &crate::config::PipelineConfig) -> BehaviorPipeline {
        let mut pipeline = BehaviorPipeline::new();
        if !config.is_enabled {
            return pipeline;
        }
        if config.tracing_enabled {
            pipeline = pipeline.with_layer(Arc::new(LoggingBehavior));
        }
        if config.metrics_enabled {
            pipeline = pipeline.with_layer(Arc::new(MetricsBehavior::new()));
        }
        if config.validation_enabled {
            pipeline = pipeline.with_layer(Arc::new(ValidationBehavior::new(|_msg| Ok(()))));
        }
        pipeline = pipeline.with_layer(Arc::new(CorrelationPropagationBehavior));
        if config.cache_enabled {
            pipeline = pipeline.with_layer(Arc::new(CachingBehavior::new(
                config.default_cache_duration,
                config.max_cache_size,
            )));
        }
        pipeline = pipeline.with_layer(Arc::new(TimeoutBehavior::new(config.timeout)));
        pipeline
    }

    /// Builds a bus from `config`, wiring every subsystem but not yet
    /// connecting transports or spawning background tasks; returns the
    /// bus alongside the lifecycle manager's event stream
    #[must_use]
    pub fn new(config: ConduitConfig) -> (Arc<Self>, mpsc::Receiver<LifecycleEvent>) {
        let clock: SharedClock = Arc::new(SystemClock);
        let registry = Arc::new(HandlerRegistry::new());
        let flow_control = Arc::new(FlowController::new(config.flow_control));
        let pipeline = Arc::new(Self::build_pipeline(&config.pipeline));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&flow_control),
            pipeline,
            config.pipeline.error_strategy,
        ));
        let retry_config = RetryConfig {
            strategy: if config.pipeline.max_retries == 0 {
                Strategy::None
            } else {
                Strategy::ExponentialBackoff
            },
            max_retries: config.pipeline.max_retries,
            initial_delay: config.pipeline.retry_delay,
            ..RetryConfig::default()
        };
        let retry = Arc::new(RetryPolicy::new(retry_config, Arc::clone(&clock)));
        let circuit_breaker = Arc::new(CircuitBreaker::new(
            config.pipeline.circuit_breaker,
            Arc::clone(&clock),
        ));
        let error_aggregator = Arc::new(ErrorAggregator::new(
            AggregatorThresholds::default(),
            RetentionPolicy::default(),
            Arc::clone(&clock),
        ));
        let health_source = AggregatorHealthSource::new(
            Arc::clone(&error_aggregator),
            config.health_monitor.analysis_time_window,
        );
        let health_monitor = Arc::new(HealthMonitor::new(health_source, config.health_monitor.thresholds));
        let dlq = Arc::new(DeadLetterQueue::new(config.dlq, Arc::clone(&clock)));
        let correlator = Arc::new(Correlator::new());
        let (lifecycle, events) = LifecycleManager::new(LifecycleConfig::default());

        let bus = Arc::new(Self {
            config,
            clock,
            registry,
            flow_control,
            dispatcher,
            retry,
            circuit_breaker,
            error_aggregator,
            health_monitor,
            dlq,
            correlator,
            lifecycle: Arc::new(lifecycle),
            transports: DashMap::new(),
            background_tasks: std::sync::Mutex::new(Vec::new()),
        });
        (bus, events)
    }

    /// Binds a named transport, which must already be connected
    pub fn add_transport(&self, name: impl Into<String>, transport: Arc<dyn Transport>) -> ConduitResult<()> {
        if !transport.is_connected() {
            return Err(ConduitError::NotConnected);
        }
        self.transports.insert(name.into(), TransportBinding { transport });
        Ok(())
    }

    /// Spawns the health probe loop and the DLQ/error-aggregator retention
    /// sweepers; the returned handles are also retained for [`Self::shutdown`]
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let mut handles = Vec::new();

        handles.push(
            Arc::clone(&self.health_monitor).spawn_probe_loop(self.config.health_monitor.health_check_interval),
        );

        let dlq = Arc::clone(&self.dlq);
        let aggregator = Arc::clone(&self.error_aggregator);
        let sweep_interval = self.config.health_monitor.health_check_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                dlq.sweep();
                aggregator.sweep();
            }
        }));

        handles.push(self.lifecycle.spawn_health_loop());

        *self.background_tasks.lock().unwrap() = handles;
    }

    /// Binds a command handler for `type_tag`
    pub fn register_command_handler(&self, type_tag: TypeTag, handler: Arc<dyn CommandHandler>) -> ConduitResult<()> {
        self.registry.register_command_handler(type_tag, handler)
    }

    /// Binds a query handler for `type_tag`
    pub fn register_query_handler(&self, type_tag: TypeTag, handler: Arc<dyn QueryHandler>) -> ConduitResult<()> {
        self.registry.register_query_handler(type_tag, handler)
    }

    /// Binds an event handler for `type_tag`
    pub fn register_event_handler(&self, type_tag: TypeTag, handler: Arc<dyn EventHandler>) {
        self.registry.register_event_handler(type_tag, handler);
    }

    /// Tracks a component under lifecycle management
    pub fn track_component(&self, component: crate::component::Component) -> Arc<crate::component::Component> {
        self.lifecycle.track(component)
    }

    /// Resolves a dependency order over `manifests` and runs every
    /// component through `initialize` then `start`, leaves first
    pub async fn start_components(&self, manifests: &[crate::component::ComponentManifest]) -> ConduitResult<()> {
        let plan = crate::component::resolve(manifests, false)?;
        for warning in &plan.warnings {
            warn!(?warning, "component resolution warning");
        }
        for id in plan.start_order {
            self.lifecycle.initialize(id).await?;
            self.lifecycle.start(id).await?;
        }
        Ok(())
    }

    fn record_failure(
        &self,
        error: &ConduitError,
        correlation_id: Option<CorrelationId>,
        component: Option<ComponentId>,
        operation: &str,
    ) {
        let mut context = crate::error::ErrorContext::classify(error).with_operation(operation);
        if let Some(id) = correlation_id {
            context = context.with_correlation_id(id);
        }
        if let Some(id) = component {
            context = context.with_component(id);
        }
        self.error_aggregator.record_error(context);
    }

    /// Stamps `context.expires_at` from `pipeline.default_timeout` when the
    /// caller did not set a per-message deadline of its own
    fn stamp_deadline(&self, context: &mut MessageContext) {
        if context.expires_at.is_none() {
            context.expires_at = Some(self.clock.now() + self.config.pipeline.default_timeout);
        }
    }

    /// Sends a command through admission, resilience and the behavior
    /// pipeline to its exclusively-bound handler; routes to the dead-letter
    /// queue on final failure if `pipeline.dead_letter_enabled`
    #[instrument(skip(self, message, context), fields(type_tag = %message.type_tag))]
    pub async fn send_command(&self, message: Message, mut context: MessageContext) -> ConduitResult<Vec<u8>> {
        self.stamp_deadline(&mut context);
        let dispatcher = Arc::clone(&self.dispatcher);
        let retried = message.clone();
        let result = self
            .circuit_breaker
            .execute(|| async {
                self.retry
                    .execute(|| {
                        let dispatcher = Arc::clone(&dispatcher);
                        let message = retried.clone();
                        let context = context.clone();
                        async move { dispatcher.send_command(message, context).await }
                    })
                    .await
            })
            .await;

        if let Err(err) = &result {
            self.record_failure(err, message.correlation_id, None, "send_command");
            if self.config.pipeline.dead_letter_enabled {
                self.dlq.add(message, err);
            }
        }
        result
    }

    /// Sends a query through admission and the behavior pipeline to its
    /// exclusively-bound handler; queries are not retried against side
    /// effects beyond what the retry policy already treats as idempotent
    #[instrument(skip(self, message, context), fields(type_tag = %message.type_tag))]
    pub async fn send_query(&self, message: Message, mut context: MessageContext) -> ConduitResult<Vec<u8>> {
        self.stamp_deadline(&mut context);
        let correlation_id = message.correlation_id;
        let result = self.dispatcher.send_query(message, context).await;
        if let Err(err) = &result {
            self.record_failure(err, correlation_id, None, "send_query");
        }
        result
    }

    /// Publishes an event to every bound handler
    #[instrument(skip(self, message, context), fields(type_tag = %message.type_tag))]
    pub async fn publish(&self, message: Message, mut context: MessageContext) -> ConduitResult<()> {
        self.stamp_deadline(&mut context);
        let result = self.dispatcher.publish(message.clone(), context).await;
        if let Err(err) = &result {
            self.record_failure(err, message.correlation_id, None, "publish");
            if self.config.pipeline.dead_letter_enabled {
                self.dlq.add(message, err);
            }
        }
        result
    }

    /// Sends a raw transport message through the named binding
    pub async fn send_via_transport(
        &self,
        transport_name: &str,
        message: TransportMessage,
        destination: Option<Destination>,
    ) -> ConduitResult<()> {
        let binding = self
            .transports
            .get(transport_name)
            .ok_or_else(|| ConduitError::Configuration(format!("no transport bound as {transport_name}")))?;
        binding.transport.send_core(message, destination).await
    }

    /// Sends `message` through `transport_name` with its `reply_to` and
    /// `correlation_id` set, then awaits the matching reply or times out
    pub async fn request_reply(
        &self,
        transport_name: &str,
        mut message: TransportMessage,
        destination: Option<Destination>,
        reply_to: Destination,
        timeout: Duration,
    ) -> ConduitResult<Message> {
        let correlation_id = message.correlation_id.unwrap_or_else(CorrelationId::generate);
        message.correlation_id = Some(correlation_id);
        message.reply_to = Some(reply_to);
        self.send_via_transport(transport_name, message, destination).await?;
        self.correlator.await_response(correlation_id, timeout).await
    }

    /// Called by a transport subscription handler for every inbound
    /// message: resolves a pending request/response waiter, or signals the
    /// caller should proceed to normal dispatch by returning `false`
    #[must_use]
    pub fn try_resolve_reply(&self, message: Message) -> bool {
        self.correlator.try_resolve(message)
    }

    /// Snapshots every entry currently quarantined in the dead-letter queue
    #[must_use]
    pub fn dead_letters(&self) -> Vec<crate::correlator::DeadLetterEntry> {
        self.dlq.snapshot()
    }

    /// Looks up a single dead-lettered entry by id
    #[must_use]
    pub fn dead_letter(&self, id: crate::ids::DeadLetterEntryId) -> Option<crate::correlator::DeadLetterEntry> {
        self.dlq.get(id)
    }

    /// Dead-lettered entries belonging to `correlation_id`
    #[must_use]
    pub fn dead_letters_by_correlation_id(
        &self,
        correlation_id: CorrelationId,
    ) -> Vec<crate::correlator::DeadLetterEntry> {
        self.dlq.get_by_correlation_id(correlation_id)
    }

    /// Dead-lettered entries whose message carries `message_type`
    #[must_use]
    pub fn dead_letters_by_message_type(&self, message_type: &str) -> Vec<crate::correlator::DeadLetterEntry> {
        self.dlq.get_by_message_type(message_type)
    }

    /// Dead-lettered entries whose quarantining error was classified as `category`
    #[must_use]
    pub fn dead_letters_by_error_type(&self, category: crate::error::Category) -> Vec<crate::correlator::DeadLetterEntry> {
        self.dlq.get_by_error_type(category)
    }

    /// Re-injects a dead-lettered message back through the dispatcher
    pub async fn reprocess_dead_letter(&self, id: crate::ids::DeadLetterEntryId) -> ConduitResult<()> {
        let dispatcher = Arc::clone(&self.dispatcher);
        self.dlq
            .reprocess(id, |message| async move {
                dispatcher.publish(message, MessageContext::default()).await
            })
            .await
    }

    /// Snapshot of the bus's current health
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        self.health_monitor.check_health()
    }

    /// Aggregated metrics across every subsystem
    pub async fn metrics(&self) -> BusMetrics {
        BusMetrics {
            dispatch: self.dispatcher.statistics(),
            flow_control: self.flow_control.stats().await,
            dlq: self.dlq.stats(),
            health: self.health_monitor.check_health(),
        }
    }

    /// Disconnects every transport and aborts background tasks
    pub async fn shutdown(&self) {
        info!("shutting down conduit bus");
        for handle in self.background_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        for entry in self.transports.iter() {
            if let Err(err) = entry.value().transport.disconnect_core().await {
                warn!(transport = %entry.key(), error = %err, "error disconnecting transport during shutdown");
            }
        }
    }
}
