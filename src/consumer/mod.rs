// ABOUTME: Consumer side of the pipeline - pulls sync events off the queue and applies them
// ABOUTME: MessageConsumer runs the loop, ConsumerLifecycle owns its thread and shutdown

pub mod identity;
pub mod lifecycle;
pub mod message_consumer;

pub use identity::{
    resolve_operator, ConfiguredOperators, IdentityResolver, OperatorAccount, OperatorIdentity,
};
pub use lifecycle::{ConsumerLifecycle, ShutdownOutcome};
pub use message_consumer::{
    ApplyContext, ApplyFailure, ConsumerSettings, ConsumerState, ConsumerStats, EventHandler,
    MessageConsumer, MessageSource, PollingQueue, StateCell, StopToken,
};
