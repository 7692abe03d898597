pub mod agent;
pub mod config;
pub mod fakes;
pub mod github;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod publish;
pub mod stages;

pub use config::TestgenConfig;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use provider::RepositoryProvider;
