pub mod executor;
pub mod lifecycle;

pub use executor::{EntryOutcome, EntryStyle, Executor, ProtectionReport};
pub use lifecycle::LifecycleState;
