//! Alert composition and delivery.

pub mod composer;
pub mod notifier;

pub use composer::{no_data_message, AlertComposer, ComposerConfig};
pub use notifier::{Notifier, StdoutNotifier, TelegramConfig, TelegramNotifier};
