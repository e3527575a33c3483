/// Turning chat submissions into tracked downloads
pub mod dispatcher;
/// Periodic completion checks
pub mod poller;
/// Bot runtime wiring and update routing
pub mod runner;
/// Single-use callback tokens for category buttons
pub mod tokens;
/// Downloads awaiting completion
pub mod tracker;
/// Chat transport abstraction and its Telegram implementation
pub mod transport;
/// Log throttling for chats outside the allow-list
pub mod unauthorized_cache;
/// User-facing message texts
pub mod views;

pub use runner::run_bot;
pub use unauthorized_cache::UnauthorizedCache;
