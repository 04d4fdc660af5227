//! Inbound Telegram updates and the webhook dispatch path.

pub mod dispatcher;
pub mod processor;
pub mod update;

pub use dispatcher::{Dispatcher, Outcome};
pub use processor::{ReferralProcessor, UpdateProcessor};
pub use update::Update;
