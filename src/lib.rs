pub mod citations;
pub mod config;
pub mod error;
pub mod gemini;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod ranking;
pub mod retry;
pub mod search;
pub mod server;

pub use config::AppConfig;
pub use pipeline::AnswerService;
pub use server::run_server;
