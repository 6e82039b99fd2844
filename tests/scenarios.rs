/*!
 * End-to-end scenarios against an in-process ReplSet wired to fake
 * heartbeat/election transports. No external services; mirrors the
 * shape of integration_tests.rs: construct real components, assert on
 * resulting state.
 */

use rsctl::configloader::ConfigLoader;
use rsctl::manager::Manager;
use rsctl::model::{HostPort, MemberConfig, MemberState, OpTime, ReplSetConfig};
use rsctl::replset::ReplSet;
use rsctl::transport::fake::{
    AlwaysGrantElectionTransport, AlwaysVetoElectionTransport, FakeHeartbeatTransport,
};
use rsctl::transport::HeartbeatResponse;
use rsctl::Config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn member_config(id: u32, host: &str, port: u16) -> MemberConfig {
    MemberConfig {
        id,
        host: HostPort::new(host, port),
        votes: 1,
        priority: 1.0,
        arbiter_only: false,
        hidden: false,
        tags: HashMap::new(),
    }
}

fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.heartbeat.interval = Duration::from_millis(20);
    cfg.heartbeat.timeout = Duration::from_millis(50);
    cfg.election.per_vote_timeout = Duration::from_millis(200);
    cfg.election.election_window = Duration::from_millis(500);
    cfg.loader.retry_sleep_min = Duration::from_millis(10);
    cfg
}

/// Scenario 1: solo bootstrap. A single-member config installs and the
/// node elects itself primary.
#[tokio::test]
async fn solo_bootstrap_elects_self() {
    let rs = ReplSet::new(
        HostPort::new("a", 27017),
        0,
        fast_config(),
        Arc::new(FakeHeartbeatTransport::new()),
        Arc::new(AlwaysGrantElectionTransport),
    );
    let (tx, _rx) = mpsc::channel(16);
    let loader = ConfigLoader {
        sources: vec![],
        retry_sleep_min: Duration::from_millis(1),
        retry_sleep_max: Duration::from_millis(1),
        events: tx,
    };
    let cfg = ReplSetConfig {
        id: "rs0".into(),
        version: 1,
        members: vec![member_config(0, "a", 27017)],
    };
    loader.init_from_config(&rs, cfg).await.unwrap();

    let (manager, _tx2) = Manager::new(rs.clone());
    manager.check_new_state().await;

    let snap = rs.state_box.get();
    assert_eq!(snap.state, MemberState::Primary);
    assert_eq!(snap.primary, Some(0));
}

/// Scenario 2: two-node set, peer is already primary. Self moves from
/// Startup2 to Recovering, believing the peer.
#[tokio::test]
async fn two_node_peer_is_primary() {
    let rs = ReplSet::new(
        HostPort::new("a", 27017),
        1,
        fast_config(),
        Arc::new(FakeHeartbeatTransport::new()),
        Arc::new(AlwaysGrantElectionTransport),
    );
    let (tx, _rx) = mpsc::channel(16);
    let loader = ConfigLoader {
        sources: vec![],
        retry_sleep_min: Duration::from_millis(1),
        retry_sleep_max: Duration::from_millis(1),
        events: tx,
    };
    let cfg = ReplSetConfig {
        id: "rs0".into(),
        version: 1,
        members: vec![member_config(0, "peer", 27018), member_config(1, "a", 27017)],
    };
    loader.init_from_config(&rs, cfg).await.unwrap();
    rs.members
        .write()
        .find_by_id_mut(0)
        .unwrap()
        .hbinfo
        .record_success(
            std::time::SystemTime::now(),
            MemberState::Primary,
            OpTime::new(1, 0),
            1,
            "ok",
        );

    let (manager, _tx2) = Manager::new(rs.clone());
    manager.check_new_state().await;

    let snap = rs.state_box.get();
    assert_eq!(snap.state, MemberState::Recovering);
    assert_eq!(snap.primary, Some(0));
}

/// Scenario 3: loss of majority while primary. Self relinquishes and
/// arms the step-down cooldown.
#[tokio::test]
async fn loss_of_majority_while_primary_relinquishes() {
    let rs = ReplSet::new(
        HostPort::new("a", 27017),
        0,
        fast_config(),
        Arc::new(FakeHeartbeatTransport::new()),
        Arc::new(AlwaysGrantElectionTransport),
    );
    let (tx, _rx) = mpsc::channel(16);
    let loader = ConfigLoader {
        sources: vec![],
        retry_sleep_min: Duration::from_millis(1),
        retry_sleep_max: Duration::from_millis(1),
        events: tx,
    };
    let cfg = ReplSetConfig {
        id: "rs0".into(),
        version: 1,
        members: vec![
            member_config(0, "a", 27017),
            member_config(1, "b", 27018),
            member_config(2, "c", 27019),
        ],
    };
    loader.init_from_config(&rs, cfg).await.unwrap();
    rs.state_box.set_self_primary();
    // Peers 1 and 2 start unknown (health 0), so majority is already lost.

    let (manager, _tx2) = Manager::new(rs.clone());
    manager.check_new_state().await;

    let snap = rs.state_box.get();
    assert_eq!(snap.state, MemberState::Recovering);
    assert_eq!(snap.primary, None);
    assert!(rs.election.stepped_down_until() > std::time::SystemTime::now());
}

/// Scenario 4: two peers claim primary simultaneously. No state change;
/// the manager is expected to log and wait for the next event.
#[tokio::test]
async fn two_peers_claim_primary_causes_no_state_change() {
    let rs = ReplSet::new(
        HostPort::new("a", 27017),
        0,
        fast_config(),
        Arc::new(FakeHeartbeatTransport::new()),
        Arc::new(AlwaysGrantElectionTransport),
    );
    let (tx, _rx) = mpsc::channel(16);
    let loader = ConfigLoader {
        sources: vec![],
        retry_sleep_min: Duration::from_millis(1),
        retry_sleep_max: Duration::from_millis(1),
        events: tx,
    };
    let cfg = ReplSetConfig {
        id: "rs0".into(),
        version: 1,
        members: vec![
            member_config(0, "a", 27017),
            member_config(1, "b", 27018),
            member_config(2, "c", 27019),
        ],
    };
    loader.init_from_config(&rs, cfg).await.unwrap();
    for id in [1u32, 2u32] {
        rs.members.write().find_by_id_mut(id).unwrap().hbinfo.record_success(
            std::time::SystemTime::now(),
            MemberState::Primary,
            OpTime::new(1, 0),
            1,
            "ok",
        );
    }
    rs.state_box.set(MemberState::Recovering, None);

    let (manager, _tx2) = Manager::new(rs.clone());
    manager.check_new_state().await;

    let snap = rs.state_box.get();
    assert_eq!(snap.state, MemberState::Recovering);
    assert_eq!(snap.primary, None);
}

/// Scenario 5: reconfig bumps version. A peer heartbeat response carries
/// a higher cfgVersion and attached doc; `msgReceivedNewConfig` installs
/// it, preserving the old primary belief since that member survives.
#[tokio::test]
async fn reconfig_bumps_version_and_preserves_primary_belief() {
    let rs = ReplSet::new(
        HostPort::new("a", 27017),
        0,
        fast_config(),
        Arc::new(FakeHeartbeatTransport::new()),
        Arc::new(AlwaysGrantElectionTransport),
    );
    let (tx, mut rx) = mpsc::channel(16);
    let loader = Arc::new(ConfigLoader {
        sources: vec![],
        retry_sleep_min: Duration::from_millis(1),
        retry_sleep_max: Duration::from_millis(1),
        events: tx.clone(),
    });
    let cfg_v3 = ReplSetConfig {
        id: "rs0".into(),
        version: 3,
        members: vec![member_config(0, "a", 27017), member_config(1, "b", 27018)],
    };
    loader.init_from_config(&rs, cfg_v3).await.unwrap();
    rs.state_box.set_other_primary(Some(1));
    let _ = rx.try_recv(); // drain the CheckNewState from install

    let (mut manager, _tx2) = Manager::new(rs.clone());
    let installer = Arc::new(rsctl::configloader::LoaderInstaller { loader: loader.clone() });

    let cfg_v5 = ReplSetConfig {
        id: "rs0".into(),
        version: 5,
        members: vec![
            member_config(0, "a", 27017),
            member_config(1, "b", 27018),
            member_config(2, "c", 27019),
        ],
    };
    manager.msg_received_new_config(cfg_v5, &installer).await;

    assert_eq!(rs.config.read().as_ref().unwrap().version, 5);
    assert_eq!(rs.state_box.get().primary, Some(1));
}

/// Scenario 6: split-brain resolution. Self believes itself primary but
/// only sees a minority; a peer is also primary and visible. Self steps
/// down in favor of the peer.
#[tokio::test]
async fn split_brain_self_steps_down() {
    let rs = ReplSet::new(
        HostPort::new("a", 27017),
        0,
        fast_config(),
        Arc::new(FakeHeartbeatTransport::new()),
        Arc::new(AlwaysVetoElectionTransport),
    );
    let (tx, _rx) = mpsc::channel(16);
    let loader = ConfigLoader {
        sources: vec![],
        retry_sleep_min: Duration::from_millis(1),
        retry_sleep_max: Duration::from_millis(1),
        events: tx,
    };
    // Peer 1 carries enough votes, while down, that self (1 vote) plus a
    // visible peer 2 (1 vote) still can't clear a majority of 5.
    let mut heavy_peer = member_config(1, "b", 27018);
    heavy_peer.votes = 3;
    let cfg = ReplSetConfig {
        id: "rs0".into(),
        version: 1,
        members: vec![member_config(0, "a", 27017), heavy_peer, member_config(2, "c", 27019)],
    };
    loader.init_from_config(&rs, cfg).await.unwrap();
    rs.state_box.set_self_primary();
    rs.members.write().find_by_id_mut(2).unwrap().hbinfo.record_success(
        std::time::SystemTime::now(),
        MemberState::Primary,
        OpTime::new(5, 0),
        1,
        "ok",
    );

    let (manager, _tx2) = Manager::new(rs.clone());
    manager.check_new_state().await;

    let snap = rs.state_box.get();
    assert_eq!(snap.state, MemberState::Recovering);
    assert_eq!(snap.primary, Some(2));
}

/// Round-trip sanity: the heartbeat transport fake actually drives
/// health up as the worker would see it, independent of the manager.
#[tokio::test]
async fn heartbeat_response_marks_peer_healthy() {
    let fake = FakeHeartbeatTransport::new();
    let peer = HostPort::new("peer", 27020);
    fake.set_response(
        &peer,
        HeartbeatResponse {
            ok: true,
            state: MemberState::Secondary,
            op_time: OpTime::new(2, 1),
            hbmsg: "ok".into(),
            cfg_version: 1,
            config: None,
            errmsg: None,
        },
    );
    use rsctl::transport::{HeartbeatRequest, HeartbeatTransport};
    let resp = fake
        .send_heartbeat(
            &peer,
            HeartbeatRequest {
                set_name: "rs0".into(),
                from_id: 0,
                cfg_version: 1,
            },
        )
        .await
        .unwrap();
    assert!(resp.ok);
    assert_eq!(resp.op_time, OpTime::new(2, 1));
}
