pub mod event_handlers;
pub mod handler_registry;
pub mod message_bus;
pub mod notifier;
pub mod pipeline_service;
pub mod retry;
pub mod stage_handlers;

pub use handler_registry::{
    CommandHandler, CommandOutput, EventHandler, HandlerContext, HandlerPriority,
    HandlerRegistry, HandlerRegistryBuilder, Reaction,
};
pub use message_bus::{MessageBus, RunOptions};
pub use notifier::{EventStream, NotifierHub, SessionChannel};
pub use pipeline_service::PipelineService;
pub use retry::RetryPolicy;
pub use stage_handlers::default_registry;
