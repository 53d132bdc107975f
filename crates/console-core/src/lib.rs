//! Client-side orchestration for the HSM operator console: slot/key
//! aggregation, the sign and verify workflows, and the login handshake.
//! All cryptography happens in the remote HSM service; front-ends interact
//! exclusively with this crate.

pub mod aggregator;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod workflow;

pub use aggregator::{SlotKeyAggregator, SlotKeyMap, SlotKeys};
pub use api::{
    ApiClient, ClientSettings, HsmApi, LoginRequest, LoginResponse, MutualTlsMaterial, StoreFile,
};
pub use auth::{AuthSession, LoginError, LoginField, LoginForm, LoginSuccess};
pub use config::ConsoleConfig;
pub use error::{ConsoleError, ConsoleResult};
pub use models::{Key, SignRequest, SignatureAlgorithm, Slot, VerifyRequest, NO_LABEL};
pub use session::{Route, Session};
pub use workflow::{
    CompletedOperation, CryptoWorkflow, KeyFetch, KeyFetchTicket, OperationOutcome,
    PendingOperation, WorkflowMode, WorkflowState,
};
