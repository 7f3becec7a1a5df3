mod coordinator;
mod dispatcher;
mod queue;

pub use coordinator::{ExemptPaths, RefreshCoordinator, RefreshResult, RefreshState};
pub use dispatcher::RetryDispatcher;
pub use queue::{Continuation, Parked, Settlement, WaitGroup, WaitQueue};
