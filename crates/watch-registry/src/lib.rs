pub mod queue;
pub mod registry;
#[cfg(test)]
mod tests;

pub use queue::TradeQueue;
pub use registry::{
    tp1_close_pct_from_checklist, ConfirmOutcome, WatchError, WatchRegistry,
    MIN_WATCHABLE_CHECKLIST,
};
