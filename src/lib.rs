//! # casekit
//!
//! A conversational pipeline over legal case files.
//!
//! casekit turns one user message into a grounded assistant answer: it
//! ranks the case material lexically (TF-IDF plus legal-reference and
//! entity matching), assembles an immutable context snapshot, gates
//! expensive generation behind a metered quota, suspends high-risk
//! requests for human approval, and extracts citations and a
//! confidence score from the generated text. When the external model
//! is unreachable the pipeline degrades to a deterministic local
//! answer assembled straight from the case file.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌───────────────┐
//! │ Retrieval │──▶│  Context   │──▶│ Orchestrator   │
//! │ TF-IDF+§  │   │  Snapshot  │   │ stage pipeline │
//! └───────────┘   └────────────┘   └──────┬────────┘
//!                                         │
//!              ┌──────────┬───────────────┼──────────────┐
//!              ▼          ▼               ▼              ▼
//!         ┌────────┐ ┌─────────┐   ┌───────────┐  ┌───────────┐
//!         │ Quota  │ │Approval │   │ LLM / loc │  │ Citations │
//!         │  gate  │ │ suspend │   │ fallback  │  │+confidence│
//!         └────────┘ └─────────┘   └───────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with documented defaults |
//! | [`error`] | Typed pipeline errors |
//! | [`models`] | Core data types |
//! | [`text`] | Tokenization, TF-IDF, legal-reference parsing |
//! | [`retrieval`] | Lexical relevance ranking |
//! | [`context`] | Context snapshot assembly |
//! | [`quota`] | Credit check, reservation, and commit |
//! | [`llm`] | Generation backend and local fallback |
//! | [`orchestrator`] | Per-message stage pipeline and approvals |
//! | [`citations`] | Citation extraction and confidence scoring |
//! | [`store`] | Storage abstraction |
//! | [`collab`] | External collaborator interfaces |

pub mod citations;
pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod quota;
pub mod retrieval;
pub mod store;
pub mod text;

pub use config::{load_config, Config};
pub use error::PipelineError;
pub use orchestrator::{MessageRequest, Orchestrator};
pub use store::{InMemoryStore, Store};
