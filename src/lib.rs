pub mod assemble;
pub mod config;
pub mod domain;
pub mod enums;
pub mod encrypt;
pub mod error;
pub mod footprint;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod transfer;
