pub mod engine;
pub mod states;

pub use engine::{LifecycleEngine, QuoteLifecycle, StandardLifecycle};
pub use states::{LifecycleAction, TransitionOutcome};
