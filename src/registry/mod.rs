//! Handler registry, dispatcher and behavior pipeline
//!
//! See [`handler_registry`] for the registration contract, [`pipeline`] for
//! the behavior decorator chain, and [`dispatcher`] for the operation that
//! ties admission, the pipeline and the registry together.

pub mod dispatcher;
pub mod handler_registry;
pub mod pipeline;
pub mod traits;

pub use dispatcher::{CompositeError, DispatchStatistics, Dispatcher, ErrorStrategy, TypeStatistics};
pub use handler_registry::HandlerRegistry;
pub use pipeline::{
    AuthorizationBehavior, BehaviorLayer, BehaviorPipeline, CachingBehavior,
    CorrelationPropagationBehavior, LoggingBehavior, MetricsBehavior, PipelineService,
    TimeoutBehavior, ValidationBehavior,
};
pub use traits::{CommandHandler, EventHandler, QueryHandler};
