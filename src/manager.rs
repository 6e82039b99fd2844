/*!
 * Manager: single-threaded cooperative evaluator. Consumes events from a
 * FIFO queue and drives state transitions. Each event is handled to
 * completion before the next is taken off the queue; blocking on I/O
 * (the election RPCs) is allowed, but no other manager event runs
 * concurrently with it.
 */

use crate::election::{i_am_potentially_hot, ElectOutcome, ElectionError};
use crate::model::{MemberState, ReplSetConfig};
use crate::replset::ReplSet;
use crate::{rs_debug, rs_info, rs_warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum ManagerEvent {
    CheckNewState,
    NewConfig(ReplSetConfig),
    Requeue,
}

pub struct Manager {
    rs: Arc<ReplSet>,
    rx: mpsc::Receiver<ManagerEvent>,
    tx: mpsc::Sender<ManagerEvent>,
    busy_with_elect_self: AtomicBool,
}

/// Installs a validated, higher-versioned config. Implemented by the
/// configuration loader; the manager calls through this trait so
/// `msgReceivedNewConfig` doesn't need to depend on the loader module
/// directly.
#[async_trait::async_trait]
pub trait ConfigInstaller: Send + Sync {
    async fn have_new_config(&self, rs: &Arc<ReplSet>, cfg: ReplSetConfig);
}

impl Manager {
    pub fn new(rs: Arc<ReplSet>) -> (Self, mpsc::Sender<ManagerEvent>) {
        let (tx, rx) = mpsc::channel(256);
        let sender = tx.clone();
        (
            Self {
                rs,
                rx,
                tx,
                busy_with_elect_self: AtomicBool::new(false),
            },
            sender,
        )
    }

    pub fn sender(&self) -> mpsc::Sender<ManagerEvent> {
        self.tx.clone()
    }

    /// Drains the event queue until the channel closes (process shutdown).
    pub async fn run(&mut self, installer: Arc<dyn ConfigInstaller>) {
        while let Some(event) = self.rx.recv().await {
            match event {
                ManagerEvent::CheckNewState | ManagerEvent::Requeue => {
                    self.check_new_state().await;
                }
                ManagerEvent::NewConfig(doc) => {
                    self.msg_received_new_config(doc, &installer).await;
                }
            }
        }
    }

    /// `msgReceivedNewConfig`: accept only a strictly higher version.
    pub async fn msg_received_new_config(
        &self,
        doc: ReplSetConfig,
        installer: &Arc<dyn ConfigInstaller>,
    ) {
        let current_version = self.rs.config.read().as_ref().map(|c| c.version).unwrap_or(-1);
        if doc.version > current_version {
            rs_info!("replset received new config version {}", doc.version);
            installer.have_new_config(&self.rs, doc).await;
        } else {
            rs_info!(
                "replset info msgReceivedNewConfig but version isn't higher {} {}",
                doc.version,
                current_version
            );
        }
    }

    /// The `CheckNewState` algorithm: decides elections, relinquishment,
    /// and primary-belief updates from the current member table.
    pub async fn check_new_state(&self) {
        if self.busy_with_elect_self.load(Ordering::SeqCst) {
            return;
        }

        let self_id = self.rs.self_id();
        let mut p = self.rs.state_box.get().primary;

        // Invalidate p: if it's a peer that is no longer up or no longer
        // reports primary, clear it.
        if let Some(pid) = p {
            if pid != self_id {
                let still_primary_and_up = self
                    .rs
                    .members
                    .read()
                    .find_by_id(pid)
                    .map(|m| m.hbinfo.up() && m.state().primary())
                    .unwrap_or(false);
                if !still_primary_and_up {
                    p = None;
                    self.rs.state_box.set_other_primary(None);
                }
            }
        }

        // findOtherPrimary: any peer reporting Primary and up. Two
        // simultaneous claimants are a diagnostic, not a crash.
        let p2 = {
            let table = self.rs.members.read();
            let mut candidates = table
                .iter()
                .filter(|m| m.state().primary() && m.hbinfo.up());
            match (candidates.next(), candidates.next()) {
                (Some(a), Some(b)) => {
                    rs_warn!(
                        "replSet warning DIAG 2 primary: {} and {}",
                        a.id(),
                        b.id()
                    );
                    return;
                }
                (Some(a), None) => Some(a.id()),
                (None, _) => None,
            }
        };

        match (p, p2) {
            (None, None) => self.consider_self_election().await,
            (None, Some(m)) => self.note_a_remote_is_primary(m),
            (Some(pid), None) if pid == self_id => {
                if !self.a_majority_seems_to_be_up() {
                    rs_info!("replSet can't see a majority of the set, relinquishing primary");
                    self.relinquish();
                }
            }
            (Some(pid), None) => {
                // p stays a believed peer primary; liveness check above
                // will invalidate it if warranted. No-op.
                let _ = pid;
            }
            (Some(pid), Some(m)) if pid == m => {
                // We already thought the same; all set.
            }
            (Some(pid), Some(m)) if pid == self_id => {
                if self.a_majority_seems_to_be_up() {
                    // Ignore for now, keep thinking we are primary.
                } else {
                    self.note_a_remote_is_primary(m);
                }
            }
            (Some(_old_peer), Some(new_peer)) => {
                // Switch observed primary from one peer to another: trust
                // the newest observation but surface a warning.
                rs_warn!(
                    "replSet warning switching observed primary to member {} while a different peer was previously believed primary",
                    new_peer
                );
                self.note_a_remote_is_primary(new_peer);
            }
        }
    }

    fn note_a_remote_is_primary(&self, member_id: u32) {
        if self.rs.state_box.get().primary == Some(member_id) {
            return;
        }
        let state = if self.rs.i_am_arbiter_only() {
            MemberState::Arbiter
        } else {
            MemberState::Recovering
        };
        self.rs.state_box.set(state, Some(member_id));
    }

    fn a_majority_seems_to_be_up(&self) -> bool {
        let self_votes = self.rs.self_config.read().votes;
        let total_votes = self
            .rs
            .config
            .read()
            .as_ref()
            .map(|c| c.total_votes())
            .unwrap_or(self_votes);
        let table = self.rs.members.read();
        self.rs
            .election
            .a_majority_seems_to_be_up(self_votes, total_votes, &table)
    }

    /// `relinquish()`: Primary -> Recovering, arms the step-down cooldown.
    fn relinquish(&self) {
        self.rs.relinquish();
    }

    async fn consider_self_election(&self) {
        let self_config = self.rs.self_config.read().clone();
        let current_state = self.rs.state_box.get().state;

        if !i_am_potentially_hot(&self_config, current_state) {
            return; // never try to be primary
        }
        if !self.a_majority_seems_to_be_up() {
            rs_debug!("replSet can't see a majority, won't consider electing self");
            return;
        }
        if !self.rs.election.can_attempt_election(SystemTime::now()) {
            return;
        }

        self.busy_with_elect_self.store(true, Ordering::SeqCst);

        let cfg_version = self.rs.config.read().as_ref().map(|c| c.version).unwrap_or(-1);
        let total_votes = self
            .rs
            .config
            .read()
            .as_ref()
            .map(|c| c.total_votes())
            .unwrap_or(self_config.votes);
        let peers: Vec<_> = self
            .rs
            .members
            .read()
            .iter()
            .filter(|m| m.hbinfo.up())
            .map(|m| (m.config.host.clone(), m.config.votes))
            .collect();
        let round = self.rs.next_election_round();
        let self_op_time = *self.rs.self_optime.read();

        let result = self
            .rs
            .election
            .elect_self(
                self.rs.election_transport.clone(),
                self.rs.self_id(),
                &self_config,
                self_op_time,
                cfg_version,
                total_votes,
                peers,
                round,
            )
            .await;

        match result {
            Ok(ElectOutcome::Won) => {
                // assumePrimary: publish Primary, then synchronize with
                // the (out-of-scope) oplog writer.
                self.rs.state_box.set_self_primary();
                rs_info!("replSet self ({}) is now primary", self.rs.self_id());
            }
            Err(ElectionError::Retry) => {
                // Put a fresh CheckNewState in the queue for eval later.
                let _ = self.tx.send(ManagerEvent::Requeue).await;
            }
            Err(ElectionError::Fatal(msg)) => {
                rs_warn!("replSet error unexpected assertion in rs manager: {}", msg);
            }
        }

        self.busy_with_elect_self.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::membertable::MemberTable;
    use crate::model::{HostPort, Member, MemberConfig};
    use crate::transport::fake::{
        AlwaysGrantElectionTransport, AlwaysVetoElectionTransport, FakeHeartbeatTransport,
    };
    use std::collections::HashMap;

    fn peer(id: u32, up: bool, state: MemberState) -> Member {
        let mut m = Member::new(MemberConfig {
            id,
            host: HostPort::new(format!("h{id}"), 27017),
            votes: 1,
            priority: 1.0,
            arbiter_only: false,
            hidden: false,
            tags: HashMap::new(),
        });
        m.hbinfo.health = if up { 1.0 } else { 0.0 };
        m.hbinfo.hbstate = state;
        m
    }

    fn build_rs(self_votes: u32, total_votes: i64) -> Arc<ReplSet> {
        let rs = ReplSet::new(
            HostPort::new("self", 27017),
            0,
            Config::default(),
            Arc::new(FakeHeartbeatTransport::new()),
            Arc::new(AlwaysGrantElectionTransport),
        );
        rs.self_config.write().votes = self_votes;
        *rs.config.write() = Some(ReplSetConfig {
            id: "rs0".into(),
            version: 1,
            members: vec![],
        });
        if let Some(cfg) = rs.config.write().as_mut() {
            cfg.members = vec![MemberConfig {
                id: 0,
                host: HostPort::new("self", 27017),
                votes: self_votes,
                priority: 1.0,
                arbiter_only: false,
                hidden: false,
                tags: HashMap::new(),
            }];
            // Pad out total votes with synthetic members purely for the
            // vote-sum math; peers list in the member table is what
            // actually drives `a_majority_seems_to_be_up`.
            let remaining = total_votes - self_votes as i64;
            for i in 1..=remaining.max(0) {
                cfg.members.push(MemberConfig {
                    id: i as u32,
                    host: HostPort::new(format!("pad{i}"), 1),
                    votes: 1,
                    priority: 1.0,
                    arbiter_only: false,
                    hidden: false,
                    tags: HashMap::new(),
                });
            }
        }
        rs
    }

    #[tokio::test]
    async fn scenario_two_node_peer_primary_transitions_to_recovering() {
        // Self is id 1-equivalent (0 here); peer is up and Primary.
        let rs = build_rs(1, 2);
        let mut table = MemberTable::new();
        table.push(peer(1, true, MemberState::Primary));
        *rs.members.write() = table;
        rs.state_box.set(MemberState::Startup2, None);

        let (manager, _tx) = Manager::new(rs.clone());
        manager.check_new_state().await;

        let snap = rs.state_box.get();
        assert_eq!(snap.state, MemberState::Recovering);
        assert_eq!(snap.primary, Some(1));
    }

    #[tokio::test]
    async fn scenario_loss_of_majority_relinquishes_primary() {
        let rs = build_rs(1, 3);
        let mut table = MemberTable::new();
        table.push(peer(1, false, MemberState::Down));
        table.push(peer(2, false, MemberState::Down));
        *rs.members.write() = table;
        rs.state_box.set_self_primary();

        let (manager, _tx) = Manager::new(rs.clone());
        manager.check_new_state().await;

        let snap = rs.state_box.get();
        assert_eq!(snap.state, MemberState::Recovering);
        assert_eq!(snap.primary, None);
        assert!(rs.election.stepped_down_until() > SystemTime::now());
    }

    #[tokio::test]
    async fn scenario_two_masters_produces_no_state_change() {
        let rs = build_rs(1, 3);
        let mut table = MemberTable::new();
        table.push(peer(1, true, MemberState::Primary));
        table.push(peer(2, true, MemberState::Primary));
        *rs.members.write() = table;
        rs.state_box.set(MemberState::Recovering, None);

        let (manager, _tx) = Manager::new(rs.clone());
        manager.check_new_state().await;

        let snap = rs.state_box.get();
        assert_eq!(snap.state, MemberState::Recovering);
        assert_eq!(snap.primary, None);
    }

    #[tokio::test]
    async fn scenario_split_brain_self_steps_down_for_peer_with_majority() {
        // Self is primary but only sees 1 of 5 configured votes; peer 2
        // is also primary and up (we can see it, even though the two of
        // us together still can't clear a majority of 5).
        let rs = build_rs(1, 5);
        let mut table = MemberTable::new();
        table.push(peer(2, true, MemberState::Primary));
        *rs.members.write() = table;
        rs.state_box.set_self_primary();

        let (manager, _tx) = Manager::new(rs.clone());
        manager.check_new_state().await;

        let snap = rs.state_box.get();
        assert_eq!(snap.state, MemberState::Recovering);
        assert_eq!(snap.primary, Some(2));
    }

    #[tokio::test]
    async fn scenario_solo_bootstrap_elects_self() {
        let rs = build_rs(1, 1);
        rs.self_config.write().priority = 1.0;
        rs.state_box.set(MemberState::Startup2, None);

        let (manager, _tx) = Manager::new(rs.clone());
        manager.check_new_state().await;

        let snap = rs.state_box.get();
        assert_eq!(snap.state, MemberState::Primary);
        assert_eq!(snap.primary, Some(0));
    }

    #[tokio::test]
    async fn priority_zero_blocks_self_election_even_with_majority() {
        let rs = build_rs(1, 1);
        rs.self_config.write().priority = 0.0;
        rs.state_box.set(MemberState::Startup2, None);

        let (manager, _tx) = Manager::new(rs.clone());
        manager.check_new_state().await;

        let snap = rs.state_box.get();
        assert_ne!(snap.state, MemberState::Primary);
    }

    #[tokio::test]
    async fn election_veto_requeues_rather_than_electing() {
        let rs = ReplSet::new(
            HostPort::new("self", 27017),
            0,
            Config::default(),
            Arc::new(FakeHeartbeatTransport::new()),
            Arc::new(AlwaysVetoElectionTransport),
        );
        *rs.config.write() = Some(ReplSetConfig {
            id: "rs0".into(),
            version: 1,
            members: vec![
                MemberConfig {
                    id: 0,
                    host: HostPort::new("self", 27017),
                    votes: 1,
                    priority: 1.0,
                    arbiter_only: false,
                    hidden: false,
                    tags: HashMap::new(),
                },
                MemberConfig {
                    id: 1,
                    host: HostPort::new("h1", 27017),
                    votes: 1,
                    priority: 1.0,
                    arbiter_only: false,
                    hidden: false,
                    tags: HashMap::new(),
                },
            ],
        });
        let mut table = MemberTable::new();
        table.push(peer(1, true, MemberState::Secondary));
        *rs.members.write() = table;
        rs.state_box.set(MemberState::Startup2, None);

        let (mut manager, tx) = Manager::new(rs.clone());
        manager.check_new_state().await;

        let snap = rs.state_box.get();
        assert_ne!(snap.state, MemberState::Primary);
        // A Requeue should have been enqueued.
        drop(tx);
        let event = manager.rx.try_recv();
        assert!(matches!(event, Ok(ManagerEvent::Requeue)));
    }
}
