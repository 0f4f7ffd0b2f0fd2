pub mod bootstrap;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod inspector;
pub mod protocol;
pub mod session;
pub mod statement;

pub use cli::{prompt, run};
pub use command::{Command, CommandError};
pub use config::Config;
pub use session::{Session, SessionError};
pub use statement::Statement;
