/*!
 * Heartbeat Worker: one long-lived task per non-self member. Repeatedly
 * probes its peer, writes the result into that member's `HeartbeatInfo`,
 * and posts a `CheckNewState` event whenever a health-affecting change
 * occurs. Failures are all local: they degrade health and never
 * propagate. The worker terminates only when its member is orphaned.
 */

use crate::manager::ManagerEvent;
use crate::model::{HostPort, MemberState, OpTime};
use crate::replset::ReplSet;
use crate::transport::HeartbeatRequest;
use crate::{rs_debug, rs_warn};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// A snapshot of the fields whose change is "health-affecting" per spec:
/// up<->down, primary flag flipped, opTime changed materially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ObservedFacts {
    up: bool,
    is_primary: bool,
    op_time: OpTime,
}

pub struct HeartbeatWorker {
    pub peer_id: u32,
    generation: u64,
}

impl HeartbeatWorker {
    /// Spawns the worker task. Returns immediately; the task runs until
    /// the member table's generation no longer matches `generation`
    /// (i.e. the peer was orphaned by a reconfiguration).
    pub fn spawn(
        rs: Arc<ReplSet>,
        peer_id: u32,
        peer_host: HostPort,
        generation: u64,
        events: mpsc::Sender<ManagerEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let worker = HeartbeatWorker { peer_id, generation };
            worker.run(rs, peer_host, events).await;
        })
    }

    async fn run(&self, rs: Arc<ReplSet>, peer_host: HostPort, events: mpsc::Sender<ManagerEvent>) {
        let mut backoff = rs.app_config.heartbeat.backoff_min;
        loop {
            // Orphan check: if the table generation moved on, our Member
            // no longer exists in the active chain. Terminate.
            if rs.members.read().generation() != self.generation {
                rs_debug!("heartbeat worker for member {} orphaned, exiting", self.peer_id);
                return;
            }

            let before = self.read_facts(&rs);

            let set_name = rs.set_name.read().clone();
            let cfg_version = rs.config.read().as_ref().map(|c| c.version).unwrap_or(-1);
            let req = HeartbeatRequest {
                set_name,
                from_id: rs.self_id(),
                cfg_version,
            };

            let now = SystemTime::now();
            match tokio::time::timeout(
                rs.app_config.heartbeat.timeout,
                rs.heartbeat_transport.send_heartbeat(&peer_host, req),
            )
            .await
            {
                Ok(Ok(resp)) => {
                    backoff = rs.app_config.heartbeat.backoff_min;
                    {
                        let mut table = rs.members.write();
                        if table.generation() != self.generation {
                            return;
                        }
                        if let Some(m) = table.find_by_id_mut(self.peer_id) {
                            m.hbinfo.record_success(
                                now,
                                resp.state,
                                resp.op_time,
                                resp.cfg_version,
                                resp.hbmsg.clone(),
                            );
                        }
                    }

                    if resp.cfg_version > cfg_version {
                        if let Some(doc) = resp.config {
                            let _ = events.send(ManagerEvent::NewConfig(doc)).await;
                        }
                    }
                }
                Ok(Err(_transport_err)) => {
                    self.mark_down(&rs, now, "transport error");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(rs.app_config.heartbeat.backoff_max);
                }
                Err(_timeout) => {
                    self.mark_down(&rs, now, "heartbeat timeout");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(rs.app_config.heartbeat.backoff_max);
                }
            }

            let after = self.read_facts(&rs);
            if before != Some(after) {
                rs_debug!(
                    "heartbeat for member {} changed: {:?} -> {:?}",
                    self.peer_id,
                    before,
                    after
                );
                if events.send(ManagerEvent::CheckNewState).await.is_err() {
                    return;
                }
            }

            tokio::time::sleep(rs.app_config.heartbeat.interval).await;
        }
    }

    fn mark_down(&self, rs: &Arc<ReplSet>, now: SystemTime, msg: &str) {
        let mut table = rs.members.write();
        if table.generation() != self.generation {
            return;
        }
        if let Some(m) = table.find_by_id_mut(self.peer_id) {
            m.hbinfo.record_failure(now, msg);
        } else {
            rs_warn!("heartbeat worker for unknown member {}", self.peer_id);
        }
    }

    fn read_facts(&self, rs: &Arc<ReplSet>) -> Option<ObservedFacts> {
        let table = rs.members.read();
        let m = table.find_by_id(self.peer_id)?;
        Some(ObservedFacts {
            up: m.hbinfo.up(),
            is_primary: m.state() == MemberState::Primary,
            op_time: m.hbinfo.op_time,
        })
    }
}
