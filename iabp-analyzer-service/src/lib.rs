pub mod checklist;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod image_prep;
pub mod models;
pub mod prompts;
pub mod service;

pub use client::{AnalysisClient, AnthropicClient, Extraction};
pub use config::AppConfig;
pub use service::{AppState, build_router, create_app};
pub use models::*;
