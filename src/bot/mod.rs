pub mod commands;
pub mod context;
pub mod engine;
pub mod handlers;
pub mod machine;
pub mod messages;
pub mod messenger;
pub mod session;
pub mod state;

pub type HandlerResult = anyhow::Result<()>;

pub use commands::Command;
pub use context::AppContext;
pub use context::ConfigSources;
pub use handlers::build_schema;
pub use messenger::TelegramMessenger;
