pub mod job;
pub mod queue;
pub mod worker;

pub use job::*;
pub use queue::*;
pub use worker::*;

use snakeq::{DatabaseQueue, SnakeClient};
use std::sync::Arc;

/// Engine over whichever backend the database URL selected.
pub type Client = SnakeClient<Arc<dyn DatabaseQueue>>;
