pub mod capability;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod http;
pub mod id_types;
pub mod logging;
pub mod media;
pub mod member_session;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod relay;
pub mod relay_manager;
pub mod room;
pub mod room_manager;
pub mod signal_ws;

pub use error::SfuError;
pub use orchestrator::Orchestrator;
