/*!
 * ReplSet: the arena-owning container. Holds the member table, state
 * box, election module, and configuration by owning handles; Members
 * and workers refer back to it through `Arc`, not raw pointers.
 *
 * Members and the manager resolve each other by id through this
 * shared handle rather than by raw back-pointer.
 */

use crate::config::Config;
use crate::election::Election;
use crate::membertable::MemberTable;
use crate::model::{HostPort, Member, MemberConfig, MemberState, OpTime, ReplSetConfig};
use crate::rs_info;
use crate::statebox::StateBox;
use crate::transport::{ElectionTransport, HeartbeatTransport};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Operator-facing startup status, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupStatus {
    PreStart,
    LoadingConfig,
    EmptyConfig,
    EmptyUnreachable,
    BadConfig,
    Started,
    Fatal,
}

pub struct ReplSetStartupState {
    pub status: RwLock<StartupStatus>,
    pub message: RwLock<String>,
}

impl Default for ReplSetStartupState {
    fn default() -> Self {
        Self {
            status: RwLock::new(StartupStatus::PreStart),
            message: RwLock::new(String::new()),
        }
    }
}

/// The per-node replica-set object.
pub struct ReplSet {
    pub set_name: RwLock<String>,
    pub self_host: HostPort,
    pub self_config: RwLock<MemberConfig>,
    pub self_optime: RwLock<OpTime>,
    pub state_box: StateBox,
    pub members: RwLock<MemberTable>,
    pub config: RwLock<Option<ReplSetConfig>>,
    pub election: Election,
    pub app_config: Config,
    pub heartbeat_transport: Arc<dyn HeartbeatTransport>,
    pub election_transport: Arc<dyn ElectionTransport>,
    pub startup: ReplSetStartupState,
    election_round: AtomicI64,
}

impl ReplSet {
    pub fn new(
        self_host: HostPort,
        self_id: u32,
        app_config: Config,
        heartbeat_transport: Arc<dyn HeartbeatTransport>,
        election_transport: Arc<dyn ElectionTransport>,
    ) -> Arc<Self> {
        let election = Election::new(
            app_config.election.per_vote_timeout,
            app_config.election.election_window,
        );
        Arc::new(Self {
            set_name: RwLock::new(String::new()),
            self_config: RwLock::new(MemberConfig {
                id: self_id,
                host: self_host.clone(),
                votes: 1,
                priority: 1.0,
                arbiter_only: false,
                hidden: false,
                tags: Default::default(),
            }),
            self_host,
            self_optime: RwLock::new(OpTime::NULL),
            state_box: StateBox::new(self_id),
            members: RwLock::new(MemberTable::new()),
            config: RwLock::new(None),
            election,
            app_config,
            heartbeat_transport,
            election_transport,
            startup: ReplSetStartupState::default(),
            election_round: AtomicI64::new(0),
        })
    }

    pub fn self_id(&self) -> u32 {
        self.self_config.read().id
    }

    pub fn next_election_round(&self) -> u64 {
        self.election_round.fetch_add(1, Ordering::SeqCst) as u64 + 1
    }

    /// `i_am_arbiter_only`.
    pub fn i_am_arbiter_only(&self) -> bool {
        self.self_config.read().arbiter_only
    }

    /// `relinquish()`: Primary/Startup2 -> Recovering, arms the step-down
    /// cooldown so no election starts before it expires. No-op otherwise.
    /// Shared by the manager's own relinquish path and the configuration
    /// loader's `forgetPrimary` step, so both obey the same cooldown.
    pub fn relinquish(&self) {
        let snap = self.state_box.get();
        if snap.state.primary() || snap.state.startup2() {
            self.state_box.change(MemberState::Recovering);
            self.election
                .arm_step_down_cooldown(SystemTime::now(), self.app_config.election.step_down_cooldown);
            rs_info!("replSet info relinquished primary state");
        }
    }

    /// `find_by_id` matches self too, per the member-table contract.
    pub fn find_by_id(&self, id: u32) -> Option<Member> {
        if id == self.self_id() {
            let cfg = self.self_config.read().clone();
            return Some(Member::new(cfg));
        }
        self.members.read().find_by_id(id).cloned()
    }

    /// Read-only diagnostics snapshot: per-member optime plus a
    /// set-wide "majority up" boolean.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let snap = self.state_box.get();
        let table = self.members.read();
        let self_cfg = self.self_config.read();
        let cfg = self.config.read();
        let total_votes = cfg.as_ref().map(|c| c.total_votes()).unwrap_or(0);

        let mut members = Vec::with_capacity(table.len() + 1);
        members.push(MemberDiagnostics {
            id: self_cfg.id,
            name: self_cfg.host.to_string(),
            health: 1.0,
            state: snap.state.as_str().to_string(),
            uptime_seconds: 0,
            last_heartbeat: None,
            errmsg: String::new(),
            optime: *self.self_optime.read(),
            is_self: true,
        });
        for m in table.iter() {
            members.push(MemberDiagnostics {
                id: m.id(),
                name: m.config.host.to_string(),
                health: m.hbinfo.health,
                state: m.state().as_str().to_string(),
                uptime_seconds: m
                    .hbinfo
                    .up_since
                    .and_then(|t| t.elapsed().ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0),
                last_heartbeat: m.hbinfo.last_heartbeat,
                errmsg: m.hbinfo.last_heartbeat_msg.clone(),
                optime: m.hbinfo.op_time,
                is_self: false,
            });
        }

        DiagnosticsSnapshot {
            set: self.set_name.read().clone(),
            my_state: snap.state.as_str().to_string(),
            majority_up: self.election.a_majority_seems_to_be_up(
                self_cfg.votes,
                total_votes,
                &table,
            ),
            members,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDiagnostics {
    pub id: u32,
    pub name: String,
    pub health: f64,
    pub state: String,
    pub uptime_seconds: u64,
    pub last_heartbeat: Option<std::time::SystemTime>,
    pub errmsg: String,
    pub optime: OpTime,
    pub is_self: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub set: String,
    pub my_state: String,
    pub majority_up: bool,
    pub members: Vec<MemberDiagnostics>,
}
