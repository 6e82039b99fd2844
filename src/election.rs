/*!
 * Election Module: majority-visibility check, the self-nomination
 * protocol, and the post-step-down cooldown.
 */

use crate::membertable::MemberTable;
use crate::model::{HostPort, MemberConfig, MemberState, OpTime};
use crate::transport::ElectionTransport;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectOutcome {
    Won,
    /// Caller should requeue a fresh `CheckNewState` and try again later.
    RetryAfterSleep,
}

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("election retry")]
    Retry,
    #[error("election failed irrecoverably: {0}")]
    Fatal(String),
}

pub struct Election {
    /// Earliest wall-clock at which self may again seek primary.
    stepped_down: Mutex<SystemTime>,
    per_vote_timeout: Duration,
    election_window: Duration,
}

impl Election {
    pub fn new(per_vote_timeout: Duration, election_window: Duration) -> Self {
        Self {
            stepped_down: Mutex::new(SystemTime::UNIX_EPOCH),
            per_vote_timeout,
            election_window,
        }
    }

    pub fn stepped_down_until(&self) -> SystemTime {
        *self.stepped_down.lock()
    }

    pub fn arm_step_down_cooldown(&self, now: SystemTime, cooldown: Duration) {
        *self.stepped_down.lock() = now + cooldown;
    }

    pub fn can_attempt_election(&self, now: SystemTime) -> bool {
        now >= self.stepped_down_until()
    }

    /// Sum of votes of self plus all peers with `hbinfo.up()` strictly
    /// exceeds half of the total configured votes.
    pub fn a_majority_seems_to_be_up(
        &self,
        self_votes: u32,
        total_votes: u32,
        table: &MemberTable,
    ) -> bool {
        let up_votes: u32 = table
            .iter()
            .filter(|m| m.hbinfo.up())
            .map(|m| m.config.votes)
            .sum::<u32>()
            + self_votes;
        (up_votes as f64) > (total_votes as f64) / 2.0
    }

    /// Preconditions (no believed primary, majority visible, potentially
    /// hot, cooldown elapsed) must already be satisfied by the caller.
    pub async fn elect_self(
        &self,
        transport: Arc<dyn ElectionTransport>,
        self_id: u32,
        self_config: &MemberConfig,
        self_op_time: OpTime,
        cfg_version: i64,
        total_votes: u32,
        peers: Vec<(HostPort, u32)>,
        round: u64,
    ) -> Result<ElectOutcome, ElectionError> {
        let window = tokio::time::timeout(
            self.election_window,
            self.run_protocol(
                transport,
                self_id,
                self_config,
                self_op_time,
                cfg_version,
                total_votes,
                peers,
                round,
            ),
        )
        .await;

        match window {
            Ok(result) => result,
            Err(_elapsed) => Err(ElectionError::Retry),
        }
    }

    async fn run_protocol(
        &self,
        transport: Arc<dyn ElectionTransport>,
        self_id: u32,
        self_config: &MemberConfig,
        self_op_time: OpTime,
        cfg_version: i64,
        total_votes: u32,
        peers: Vec<(HostPort, u32)>,
        round: u64,
    ) -> Result<ElectOutcome, ElectionError> {
        // Phase 1: freshness. Any veto means a fresher secondary exists;
        // back off rather than risk an unnecessary step-down war.
        let freshness_futs = peers.iter().map(|(host, _votes)| {
            let transport = transport.clone();
            let per_vote_timeout = self.per_vote_timeout;
            async move {
                tokio::time::timeout(
                    per_vote_timeout,
                    transport.freshness(host, self_id, self_op_time, cfg_version),
                )
                .await
            }
        });
        for result in join_all(freshness_futs).await {
            if let Ok(Ok(vote)) = result {
                if vote.veto {
                    return Err(ElectionError::Retry);
                }
            }
            // Timeouts and transport errors are treated as abstentions,
            // not vetoes.
        }

        // Phase 2: elect. Self always votes for itself.
        let mut granted_votes = self_config.votes;
        let elect_futs = peers.iter().map(|(host, votes)| {
            let transport = transport.clone();
            let per_vote_timeout = self.per_vote_timeout;
            let votes = *votes;
            async move {
                let res = tokio::time::timeout(
                    per_vote_timeout,
                    transport.elect(host, self_id, cfg_version, round),
                )
                .await;
                (res, votes)
            }
        });
        for (result, votes) in join_all(elect_futs).await {
            if let Ok(Ok(vote)) = result {
                if vote.vote > 0 {
                    granted_votes += votes;
                }
            }
        }

        if (granted_votes as f64) > (total_votes as f64) / 2.0 {
            Ok(ElectOutcome::Won)
        } else {
            Err(ElectionError::Retry)
        }
    }
}

/// `iAmPotentiallyHot`: non-arbiter, priority > 0, state eligible for
/// promotion. Priority zero is a hard gate, not merely advisory.
pub fn i_am_potentially_hot(self_config: &MemberConfig, current_state: MemberState) -> bool {
    !self_config.arbiter_only
        && self_config.priority > 0.0
        && matches!(
            current_state,
            MemberState::Secondary | MemberState::Recovering | MemberState::Startup2
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostPort, Member, MemberConfig};
    use crate::transport::fake::{AlwaysGrantElectionTransport, AlwaysVetoElectionTransport};
    use std::collections::HashMap;

    fn config(id: u32, votes: u32, priority: f64, arbiter: bool) -> MemberConfig {
        MemberConfig {
            id,
            host: HostPort::new(format!("h{id}"), 27017),
            votes,
            priority,
            arbiter_only: arbiter,
            hidden: false,
            tags: HashMap::new(),
        }
    }

    #[test]
    fn priority_zero_is_a_hard_election_gate() {
        let cfg = config(1, 1, 0.0, false);
        assert!(!i_am_potentially_hot(&cfg, MemberState::Secondary));
    }

    #[test]
    fn arbiter_can_never_be_potentially_hot() {
        let cfg = config(1, 1, 1.0, true);
        assert!(!i_am_potentially_hot(&cfg, MemberState::Secondary));
    }

    #[test]
    fn majority_requires_strictly_more_than_half() {
        let election = Election::new(Duration::from_secs(1), Duration::from_secs(1));
        let mut table = MemberTable::new();
        let mut m = Member::new(config(2, 1, 1.0, false));
        m.hbinfo.health = 1.0;
        table.push(m);
        // self has 1 vote, one up peer has 1 vote: 2 of 3 total -> majority.
        assert!(election.a_majority_seems_to_be_up(1, 3, &table));
        // self has 1 vote, peer down: 1 of 3 -> not majority.
        table.iter_mut().next().unwrap().hbinfo.health = 0.0;
        assert!(!election.a_majority_seems_to_be_up(1, 3, &table));
    }

    #[test]
    fn cooldown_blocks_election_until_elapsed() {
        let election = Election::new(Duration::from_secs(1), Duration::from_secs(1));
        let now = SystemTime::now();
        election.arm_step_down_cooldown(now, Duration::from_secs(60));
        assert!(!election.can_attempt_election(now));
        assert!(election.can_attempt_election(now + Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn elect_self_wins_with_unanimous_grant() {
        let election = Election::new(Duration::from_secs(1), Duration::from_secs(2));
        let self_cfg = config(0, 1, 1.0, false);
        let peers = vec![(HostPort::new("h1", 27017), 1), (HostPort::new("h2", 27017), 1)];
        let outcome = election
            .elect_self(
                Arc::new(AlwaysGrantElectionTransport),
                0,
                &self_cfg,
                OpTime::NULL,
                1,
                3,
                peers,
                1,
            )
            .await
            .unwrap();
        assert_eq!(outcome, ElectOutcome::Won);
    }

    #[tokio::test]
    async fn elect_self_retries_on_freshness_veto() {
        let election = Election::new(Duration::from_secs(1), Duration::from_secs(2));
        let self_cfg = config(0, 1, 1.0, false);
        let peers = vec![(HostPort::new("h1", 27017), 1)];
        let outcome = election
            .elect_self(
                Arc::new(AlwaysVetoElectionTransport),
                0,
                &self_cfg,
                OpTime::NULL,
                1,
                2,
                peers,
                1,
            )
            .await;
        assert!(matches!(outcome, Err(ElectionError::Retry)));
    }
}
