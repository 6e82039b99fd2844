/*
 * Copyright (c) 2025 pgElephant. All rights reserved.
 *
 * rsctl - replica-set membership and primary-election controller
 * Built with Rust for superior performance and reliability
 *
 * @file lib.rs
 * @brief rsctl library entry point
 */

pub mod error;
pub mod config;
pub mod logger;
pub mod model;
pub mod statebox;
pub mod membertable;
pub mod transport;
pub mod election;
pub mod replset;
pub mod heartbeat;
pub mod manager;
pub mod configloader;

// Re-export main types for external use
pub use error::{ErrorSeverity, ReplSetError, Result};
pub use config::Config;
pub use logger::{init_logger, init_tracing_logger, LogLevel, ReplSetLogger};
pub use model::{
    HeartbeatInfo, HostPort, Member, MemberConfig, MemberState, OpTime, ReplSetConfig,
};
pub use statebox::{Snapshot, StateBox};
pub use membertable::MemberTable;
pub use transport::{
    ElectVote, ElectionTransport, FreshnessVote, HeartbeatRequest, HeartbeatResponse,
    HeartbeatTransport, TransportError,
};
pub use election::{i_am_potentially_hot, ElectOutcome, Election, ElectionError};
pub use replset::{DiagnosticsSnapshot, MemberDiagnostics, ReplSet, StartupStatus};
pub use heartbeat::HeartbeatWorker;
pub use manager::{ConfigInstaller, Manager, ManagerEvent};
pub use configloader::{
    CandidateResult, CandidateSource, ConfigLoader, LoaderInstaller, LocalRecordSource, SeedList,
};
