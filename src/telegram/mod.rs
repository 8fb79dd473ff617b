//! Telegram bot integration: dispatcher wiring and the notifier boundary

pub mod bot;
pub mod handlers;
pub mod messages;
pub mod notifier;

// Re-exports for convenience
pub use bot::{create_bot, setup_bot_commands, Command};
pub use handlers::{schema, HandlerDeps};
pub use notifier::{FileKind, MessageHandle, Notifier, NotifyError, TelegramNotifier};
