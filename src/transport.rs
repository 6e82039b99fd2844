/*!
 * External RPC contracts. The real network responders for both
 * heartbeat and election RPCs are out of scope for this crate — only
 * the caller-side contract lives here, as traits the manager and
 * heartbeat workers are generic over. `fake` provides in-memory
 * implementations used by the test suite in place of a real network.
 */

use crate::model::{HostPort, MemberState, OpTime, ReplSetConfig};
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub set_name: String,
    pub from_id: u32,
    pub cfg_version: i64,
}

#[derive(Debug, Clone)]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub state: MemberState,
    pub op_time: OpTime,
    pub hbmsg: String,
    pub cfg_version: i64,
    /// Present when the responder's `cfg_version` is higher than the
    /// requester's — lets the requester trigger `msgReceivedNewConfig`.
    pub config: Option<ReplSetConfig>,
    pub errmsg: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportError;

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error")
    }
}

impl std::error::Error for TransportError {}

/// Caller-side contract for the heartbeat RPC.
#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    async fn send_heartbeat(
        &self,
        target: &HostPort,
        req: HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError>;
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessVote {
    pub veto: bool,
    pub reason: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct ElectVote {
    pub vote: i32,
}

/// Caller-side contract for the two-phase election RPC.
#[async_trait]
pub trait ElectionTransport: Send + Sync {
    async fn freshness(
        &self,
        target: &HostPort,
        candidate_id: u32,
        op_time: OpTime,
        cfg_version: i64,
    ) -> Result<FreshnessVote, TransportError>;

    async fn elect(
        &self,
        target: &HostPort,
        candidate_id: u32,
        cfg_version: i64,
        round: u64,
    ) -> Result<ElectVote, TransportError>;
}

/// In-memory fakes for the test suite. Not a production transport.
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeHeartbeatTransport {
        pub responses: Mutex<HashMap<String, HeartbeatResponse>>,
    }

    impl FakeHeartbeatTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_response(&self, host: &HostPort, resp: HeartbeatResponse) {
            self.responses.lock().insert(host.to_string(), resp);
        }

        pub fn set_unreachable(&self, host: &HostPort) {
            self.responses.lock().remove(&host.to_string());
        }
    }

    #[async_trait]
    impl HeartbeatTransport for FakeHeartbeatTransport {
        async fn send_heartbeat(
            &self,
            target: &HostPort,
            _req: HeartbeatRequest,
        ) -> Result<HeartbeatResponse, TransportError> {
            self.responses
                .lock()
                .get(&target.to_string())
                .cloned()
                .ok_or(TransportError)
        }
    }

    impl Clone for HeartbeatResponse {
        fn clone(&self) -> Self {
            HeartbeatResponse {
                ok: self.ok,
                state: self.state,
                op_time: self.op_time,
                hbmsg: self.hbmsg.clone(),
                cfg_version: self.cfg_version,
                config: self.config.clone(),
                errmsg: self.errmsg.clone(),
            }
        }
    }

    /// Always votes yes for every candidate — a quiescent cluster.
    pub struct AlwaysGrantElectionTransport;

    #[async_trait]
    impl ElectionTransport for AlwaysGrantElectionTransport {
        async fn freshness(
            &self,
            _target: &HostPort,
            _candidate_id: u32,
            _op_time: OpTime,
            _cfg_version: i64,
        ) -> Result<FreshnessVote, TransportError> {
            Ok(FreshnessVote {
                veto: false,
                reason: None,
            })
        }

        async fn elect(
            &self,
            _target: &HostPort,
            _candidate_id: u32,
            _cfg_version: i64,
            _round: u64,
        ) -> Result<ElectVote, TransportError> {
            Ok(ElectVote { vote: 1 })
        }
    }

    /// Every peer refuses — used to exercise the retry/fatal paths.
    pub struct AlwaysVetoElectionTransport;

    #[async_trait]
    impl ElectionTransport for AlwaysVetoElectionTransport {
        async fn freshness(
            &self,
            _target: &HostPort,
            _candidate_id: u32,
            _op_time: OpTime,
            _cfg_version: i64,
        ) -> Result<FreshnessVote, TransportError> {
            Ok(FreshnessVote {
                veto: true,
                reason: Some("fresher secondary exists"),
            })
        }

        async fn elect(
            &self,
            _target: &HostPort,
            _candidate_id: u32,
            _cfg_version: i64,
            _round: u64,
        ) -> Result<ElectVote, TransportError> {
            Ok(ElectVote { vote: -1 })
        }
    }
}
