use async_trait::async_trait;

/// Callbacks the messenger surface exposes to the user. Implemented by
/// the coordinator; every method returns the reply text (or an error
/// message, which is also just sent back to the chat).
#[async_trait]
pub trait DeskHooks: Send + Sync {
    /// Re-run the last cached bundle for a symbol (or the most recent pair)
    async fn rescan(&self, symbol: Option<String>) -> Result<String, String>;

    /// Formatted performance stats
    async fn stats(&self, symbol: Option<String>, days: i64) -> Result<String, String>;

    /// Upcoming high-impact news for the tracked pairs
    async fn upcoming_news(&self) -> Result<String, String>;

    /// Today's P&L against the drawdown limit
    async fn drawdown(&self) -> Result<String, String>;

    /// Force-close all open records; returns the confirmation text
    async fn reset_open_trades(&self) -> Result<String, String>;

    /// Active watches, pending trades and last scan times
    async fn status(&self) -> Result<String, String>;

    /// Weekly performance report text
    async fn weekly_report(&self) -> Result<String, String>;

    /// Macro context snapshot for a symbol
    async fn context(&self, symbol: Option<String>) -> Result<String, String>;

    /// Execute button on a manual setup card
    async fn execute_setup(&self, symbol: &str, index: usize) -> Result<String, String>;

    /// Skip button on a manual setup card
    async fn skip_setup(&self, symbol: &str, index: usize) -> Result<String, String>;

    /// Force Execute override after a rejected confirmation
    async fn force_execute(&self, symbol: &str, trade_id: &str) -> Result<String, String>;

    /// Dismiss button: drop the watch without queueing anything
    async fn dismiss_watch(&self, symbol: &str, trade_id: &str) -> Result<String, String>;
}
