/*!
 * Configuration Loader: bootstraps the set from a local record plus seed
 * hosts, and re-runs on administrative or peer-driven reconfiguration.
 *
 * Three phases: collect candidates (self + seeds), select the
 * highest-versioned `ok` one, install it (`initFromConfig`). Retries
 * indefinitely on transient failure, sleeping 10-20s between attempts.
 */

use crate::error::{ReplSetError, Result};
use crate::heartbeat::HeartbeatWorker;
use crate::manager::{ConfigInstaller, ManagerEvent};
use crate::model::{HostPort, Member, MemberConfig, ReplSetConfig};
use crate::replset::{ReplSet, StartupStatus};
use crate::{rs_error, rs_info, rs_warn};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Outcome of querying one configuration candidate (self-record or a
/// seed host).
#[derive(Debug, Clone)]
pub enum CandidateResult {
    Ok(ReplSetConfig),
    Empty,
    Error,
}

/// Abstracts "ask this source for its best-known config". The local
/// record and each seed host are both candidate sources; tests supply
/// fakes instead of a real network + filesystem.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn query(&self) -> CandidateResult;
}

pub struct LocalRecordSource {
    pub path: String,
}

#[async_trait]
impl CandidateSource for LocalRecordSource {
    async fn query(&self) -> CandidateResult {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<ReplSetConfig>(&content) {
                Ok(cfg) if cfg.ok() => CandidateResult::Ok(cfg),
                Ok(_) => CandidateResult::Error,
                Err(_) => CandidateResult::Error,
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CandidateResult::Empty,
            Err(_) => CandidateResult::Error,
        }
    }
}

/// Parsed seed string: `"<setname>/<host1:port>,<host2:port>[,...]"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedList {
    pub set_name: String,
    pub hosts: Vec<HostPort>,
}

impl SeedList {
    /// Exactly one `/`; non-empty set name; comma-separated hosts;
    /// duplicate hosts are an error; a host equal to `self_host` is
    /// logged and skipped; an empty seed list is legal (single-node).
    pub fn parse(s: &str, self_host: &HostPort) -> Result<Self> {
        let mut parts = s.splitn(2, '/');
        let set_name = parts.next().unwrap_or("");
        let rest = parts.next().ok_or_else(|| {
            ReplSetError::BadSeedString(format!("seed string {s:?} is missing '/'"))
        })?;
        if s.matches('/').count() != 1 {
            return Err(ReplSetError::BadSeedString(format!(
                "seed string {s:?} must contain exactly one '/'"
            )));
        }
        if set_name.is_empty() {
            return Err(ReplSetError::BadSeedString(
                "seed string set name must be non-empty".into(),
            ));
        }

        let mut hosts = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for token in rest.split(',').filter(|t| !t.is_empty()) {
            let host = HostPort::parse(token).ok_or_else(|| {
                ReplSetError::BadSeedString(format!("invalid host:port {token:?}"))
            })?;
            if !seen.insert(host.clone()) {
                return Err(ReplSetError::BadSeedString(format!(
                    "duplicate seed host {host}"
                )));
            }
            if &host == self_host {
                rs_info!("replSet seed host {} is self, skipping", host);
                continue;
            }
            hosts.push(host);
        }

        Ok(Self {
            set_name: set_name.to_string(),
            hosts,
        })
    }
}

pub struct ConfigLoader {
    pub sources: Vec<Box<dyn CandidateSource>>,
    pub retry_sleep_min: Duration,
    pub retry_sleep_max: Duration,
    pub events: mpsc::Sender<ManagerEvent>,
}

impl ConfigLoader {
    /// Runs the collect/select retry loop until a config is ready to
    /// install, then installs it. Intended to run to completion once at
    /// startup; callers that want a background retry task should spawn
    /// this.
    pub async fn load_and_install(&self, rs: &Arc<ReplSet>) -> Result<()> {
        *rs.startup.status.write() = StartupStatus::LoadingConfig;
        loop {
            let mut best: Option<ReplSetConfig> = None;
            let mut any_error = false;
            let mut any_ok = false;

            for source in &self.sources {
                match source.query().await {
                    CandidateResult::Ok(cfg) => {
                        any_ok = true;
                        if best.as_ref().map(|b| cfg.version > b.version).unwrap_or(true) {
                            best = Some(cfg);
                        }
                    }
                    CandidateResult::Empty => {}
                    CandidateResult::Error => any_error = true,
                }
            }

            if let Some(cfg) = best {
                match self.init_from_config(rs, cfg).await {
                    Ok(()) => {
                        *rs.startup.status.write() = StartupStatus::Started;
                        return Ok(());
                    }
                    Err(ReplSetError::ConfigConflict { count }) => {
                        *rs.startup.status.write() = StartupStatus::Fatal;
                        *rs.startup.message.write() =
                            format!("self appears {count} times in the configuration");
                        rs.state_box.set(crate::model::MemberState::Fatal, None);
                        return Err(ReplSetError::ConfigConflict { count });
                    }
                    Err(e) => {
                        rs_warn!("replSet install failed, retrying: {}", e);
                    }
                }
            } else if !any_ok {
                let status = if any_error {
                    StartupStatus::EmptyUnreachable
                } else {
                    StartupStatus::EmptyConfig
                };
                *rs.startup.status.write() = status;
                rs_info!("replSet no usable config yet ({:?}), retrying", status);
            }

            tokio::time::sleep(self.retry_sleep_min).await;
        }
    }

    /// `initFromConfig`: validate, orphan old members, forget primary,
    /// install new members and start their heartbeat workers, preserve
    /// `oldPrimaryId` belief, persist if version advanced.
    pub async fn init_from_config(&self, rs: &Arc<ReplSet>, cfg: ReplSetConfig) -> Result<()> {
        let self_count = cfg.count_self(&rs.self_host);
        if self_count == 0 {
            return Err(ReplSetError::ConfigInvalid(
                "self does not appear in configuration".into(),
            ));
        }
        if self_count > 1 {
            return Err(ReplSetError::ConfigConflict { count: self_count });
        }
        if !cfg.ok() {
            return Err(ReplSetError::ConfigInvalid("configuration failed validation".into()));
        }

        let old_primary_id = rs.state_box.get().primary;

        // forgetPrimary: relinquish (and arm the step-down cooldown) if
        // we are primary, else just clear the believed primary.
        {
            let snap = rs.state_box.get();
            if snap.state.primary() {
                rs.relinquish();
            } else {
                rs.state_box.set_other_primary(None);
            }
        }

        let previous_version = rs.config.read().as_ref().map(|c| c.version);

        // Orphan the old peers in place, then install the new ones into
        // the same table so its bumped generation stays consistent with
        // the generation each freshly spawned worker is keyed to.
        let generation = {
            let mut table = rs.members.write();
            table.orphan_all();
            for member_cfg in cfg.members.iter().filter(|m| !m.is_self(&rs.self_host)) {
                table.push(Member::new(member_cfg.clone()));
            }
            table.generation()
        };

        let self_member_cfg = cfg
            .members
            .iter()
            .find(|m| m.is_self(&rs.self_host))
            .cloned()
            .expect("validated above: exactly one self member");
        *rs.self_config.write() = self_member_cfg;

        for member_cfg in cfg.members.iter().filter(|m| !m.is_self(&rs.self_host)) {
            HeartbeatWorker::spawn(
                rs.clone(),
                member_cfg.id,
                member_cfg.host.clone(),
                generation,
                self.events.clone(),
            );
        }

        if let Some(old_id) = old_primary_id {
            if cfg.members.iter().any(|m| m.id == old_id) {
                rs.state_box.set_other_primary(Some(old_id));
            }
        }

        if rs.state_box.get().state == crate::model::MemberState::Startup {
            rs.state_box.set(crate::model::MemberState::Startup2, None);
        }

        *rs.set_name.write() = cfg.id.clone();
        let version_advanced = previous_version.map(|v| cfg.version > v).unwrap_or(true);
        *rs.config.write() = Some(cfg.clone());

        if version_advanced {
            let local_path = rs.app_config.local_config_path.clone();
            if let Err(e) = persist_locally(&local_path, &cfg).await {
                rs_error!("replSet failed to persist configuration locally: {}", e);
            }
        }

        let _ = self.events.send(ManagerEvent::CheckNewState).await;
        Ok(())
    }
}

async fn persist_locally(path: &str, cfg: &ReplSetConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(cfg)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Wires the manager's `NewConfig` event back into the loader's
/// install path, satisfying `ConfigInstaller`.
pub struct LoaderInstaller {
    pub loader: Arc<ConfigLoader>,
}

#[async_trait]
impl ConfigInstaller for LoaderInstaller {
    async fn have_new_config(&self, rs: &Arc<ReplSet>, cfg: ReplSetConfig) {
        if let Err(e) = self.loader.init_from_config(rs, cfg).await {
            rs_error!("replSet reconfig install failed: {}", e);
            rs.state_box.set(crate::model::MemberState::Fatal, None);
        }
    }
}
