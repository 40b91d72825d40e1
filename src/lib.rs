//! Activity Agent - samples windowed processes and ships them to a collector.
//!
//! On every tick the agent enumerates the processes that own a visible
//! window, turns each into an [`ActivityRecord`], splits the snapshot into
//! fixed-size batches and POSTs them to the collection server under a bearer
//! token obtained at start-up.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CollectionLoop                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌───────────┐   ┌────────────────┐          │
//! │  │  Sampler  │──▶│   chunk   │──▶│ DeliveryClient │──▶ server│
//! │  └───────────┘   └───────────┘   └────────────────┘          │
//! │                                          │                    │
//! │                                          ▼                    │
//! │                                  ┌────────────────┐          │
//! │                                  │ SessionManager │          │
//! │                                  └────────────────┘          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use activity_agent::{AgentConfig, CollectionLoop, Credentials};
//!
//! # async fn run() -> Result<(), activity_agent::AgentError> {
//! let mut agent = CollectionLoop::new(AgentConfig::default())?;
//! agent.start(20, 60, Credentials::new("alice", "secret")).await?;
//!
//! // Events can be received from agent.events()
//! agent.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
pub mod collection;
pub mod config;
pub mod delivery;
pub mod error;
pub mod sampler;
pub mod session;
pub mod stats;

// Re-export key types at crate root for convenience
pub use batch::chunk;
pub use client::{ApiClient, ApiError, ConnectionStatus};
pub use collection::{CollectionLoop, CollectionResult, Collector, CollectorEvent, LoopState, TickFailure};
pub use config::AgentConfig;
pub use delivery::DeliveryClient;
pub use error::AgentError;
pub use sampler::{ActivityRecord, ProcessInfo, ProcessSource, Sampler, SystemProcessSource};
pub use session::{Credentials, Session, SessionManager, SessionState};
pub use stats::{DeliveryStats, SharedStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
