//! Fanout Fabric - topic/queue pub-sub over SNS and SQS
//!
//! Producers publish to a channel's topic; every subscriber owns a queue that
//! is subscribed to that topic and grants it `SendMessage`. Topology is
//! reconciled on demand before each publish, so no resource needs to be
//! provisioned ahead of time.
//!
//! ```text
//! publish(msg, "orders") ──> topic "orders" ──┬──> queue "billing"  ──> consume
//!                                              └──> queue "shipping" ──> consume
//! ```

pub mod backend;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod fabric;
pub mod policy;
pub mod publisher;
pub mod topology;
pub mod utils;

pub use backend::{
    BackendError, BackendResult, InMemoryBackend, NotificationService, QueueService,
};
#[cfg(feature = "sns-sqs")]
pub use backend::{SnsNotificationService, SqsQueueService};
pub use config::{AccountScope, Config, ConsumeConfig, DecodeFailurePolicy};
pub use consumer::{
    clamp_batch_size, shutdown_all, spawn_consumer, ConsumeLoop, ConsumerHandler,
    ConsumerTaskHandle, HandlerError, HandlerRegistry,
};
pub use envelope::{decode_body, Consumable, Envelope};
pub use error::{FabricError, Result};
pub use fabric::Fabric;
pub use policy::PolicyDocument;
pub use publisher::Publisher;
pub use topology::{Subscriber, TopologyReconciler, TopologyReport};
