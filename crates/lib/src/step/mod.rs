//! Step graph model: the value types collaborators use to describe work.

pub mod registry;
pub mod types;

pub use registry::{Producer, ProducerContext, StepId, StepRegistry};
pub use types::{Action, Assertion, Command, Deferred, EnvFn, Expression, Step};
