/*!
 * Core data model: member state, member configuration, heartbeat info,
 * op-time, and the versioned replica set configuration document.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::SystemTime;

/// The state a node believes itself (or a peer) to be in. A closed sum
/// type with boolean predicates, not an inheritance hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberState {
    Startup,
    Primary,
    Secondary,
    Recovering,
    Fatal,
    Startup2,
    Arbiter,
    Down,
}

impl MemberState {
    pub fn primary(&self) -> bool {
        matches!(self, MemberState::Primary)
    }

    pub fn secondary(&self) -> bool {
        matches!(self, MemberState::Secondary)
    }

    pub fn startup2(&self) -> bool {
        matches!(self, MemberState::Startup2)
    }

    pub fn fatal(&self) -> bool {
        matches!(self, MemberState::Fatal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Startup => "STARTUP",
            MemberState::Primary => "PRIMARY",
            MemberState::Secondary => "SECONDARY",
            MemberState::Recovering => "RECOVERING",
            MemberState::Fatal => "FATAL",
            MemberState::Startup2 => "STARTUP2",
            MemberState::Arbiter => "ARBITER",
            MemberState::Down => "DOWN",
        }
    }
}

/// Monotonic write-sequence position: (secs, inc) pair, lexicographically
/// ordered. Null is `(0, 0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpTime {
    pub secs: u32,
    pub inc: u32,
}

impl OpTime {
    pub const NULL: OpTime = OpTime { secs: 0, inc: 0 };

    pub fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    pub fn is_null(&self) -> bool {
        *self == OpTime::NULL
    }
}

/// Host and port pair identifying a member on the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().ok()
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable per-epoch record describing one member.
///
/// Invariant: ids within one configuration are unique; exactly one member
/// satisfies `isSelf(host)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: u32,
    pub host: HostPort,
    #[serde(default = "default_votes")]
    pub votes: u32,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub arbiter_only: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_votes() -> u32 {
    1
}

fn default_priority() -> f64 {
    1.0
}

impl MemberConfig {
    pub fn is_self(&self, self_host: &HostPort) -> bool {
        &self.host == self_host
    }
}

/// Mutable per-member liveness record. Written only by the member's
/// owning heartbeat worker, read by the manager and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub id: u32,
    pub health: f64,
    pub up_since: Option<SystemTime>,
    pub last_heartbeat: Option<SystemTime>,
    pub last_heartbeat_msg: String,
    pub op_time: OpTime,
    pub hbstate: MemberState,
    pub config_version: i64,
}

impl HeartbeatInfo {
    pub fn unknown(id: u32) -> Self {
        Self {
            id,
            health: 0.0,
            up_since: None,
            last_heartbeat: None,
            last_heartbeat_msg: String::new(),
            op_time: OpTime::NULL,
            hbstate: MemberState::Down,
            config_version: -1,
        }
    }

    pub fn up(&self) -> bool {
        self.health > 0.0
    }

    /// Records a successful probe. Sets `up_since` only if we were
    /// previously down (continuous-connectivity timer starts fresh).
    pub fn record_success(
        &mut self,
        now: SystemTime,
        state: MemberState,
        op_time: OpTime,
        config_version: i64,
        msg: impl Into<String>,
    ) {
        if !self.up() {
            self.up_since = Some(now);
        }
        self.health = 1.0;
        self.last_heartbeat = Some(now);
        self.hbstate = state;
        self.op_time = op_time;
        self.config_version = config_version;
        self.last_heartbeat_msg = msg.into();
    }

    /// Records a failed probe. Clears `up_since` per spec: on consecutive
    /// failures the worker holds `upSince = none` and `health = 0`.
    pub fn record_failure(&mut self, now: SystemTime, msg: impl Into<String>) {
        self.health = 0.0;
        self.up_since = None;
        self.last_heartbeat = Some(now);
        self.last_heartbeat_msg = msg.into();
    }
}

/// Pairing of `MemberConfig` with its `HeartbeatInfo`. The member table
/// owns peer Members; the self Member is owned by the enclosing ReplSet.
#[derive(Debug, Clone)]
pub struct Member {
    pub config: MemberConfig,
    pub hbinfo: HeartbeatInfo,
}

impl Member {
    pub fn new(config: MemberConfig) -> Self {
        let hbinfo = HeartbeatInfo::unknown(config.id);
        Self { config, hbinfo }
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn state(&self) -> MemberState {
        self.hbinfo.hbstate
    }

    /// Non-arbiter, priority > 0, reachable for connections. Does not by
    /// itself gate election eligibility (see `iAmPotentiallyHot`, which
    /// also checks current state).
    pub fn potentially_hot(&self) -> bool {
        !self.config.arbiter_only && self.config.priority > 0.0
    }
}

/// Versioned document describing set name, member list, and settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplSetConfig {
    #[serde(rename = "_id")]
    pub id: String,
    pub version: i64,
    pub members: Vec<MemberConfig>,
}

impl ReplSetConfig {
    /// `ok()` per spec: version >= 1 and members well-formed (unique ids,
    /// unique hosts).
    pub fn ok(&self) -> bool {
        if self.version < 1 || self.members.is_empty() {
            return false;
        }
        let mut ids = std::collections::HashSet::new();
        let mut hosts = std::collections::HashSet::new();
        for m in &self.members {
            if !ids.insert(m.id) {
                return false;
            }
            if !hosts.insert(&m.host) {
                return false;
            }
        }
        true
    }

    /// Count of members whose host matches `self_host`. Used to enforce
    /// "exactly one member satisfies isSelf(host)".
    pub fn count_self(&self, self_host: &HostPort) -> usize {
        self.members.iter().filter(|m| m.is_self(self_host)).count()
    }

    pub fn total_votes(&self) -> u32 {
        self.members.iter().map(|m| m.votes).sum()
    }
}
