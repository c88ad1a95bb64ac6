//! End-to-end engine scenarios across module boundaries

use std::sync::{Arc, Mutex};
use voxbank::config::EngineConfig;
use voxbank::coordinator::SessionCoordinator;
use voxbank::currency::CurrencyId;
use voxbank::games::{BetCall, CasinoGame, GameKind, PlayerAction, StartGame};
use voxbank::snapshot::{EngineSnapshot, SnapshotSink};
use voxbank::{ChatId, EngineError, OpToken, UserId};

const ADMIN: UserId = UserId(1);

fn engine(seed: u64) -> Arc<SessionCoordinator> {
    let mut config = EngineConfig::default();
    config.admins = vec![ADMIN];
    config.rng_seed = Some(seed);
    Arc::new(SessionCoordinator::new(config).expect("engine must build"))
}

fn voxcent() -> CurrencyId {
    CurrencyId::new("voxcent")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_activity_credits_sum_exactly() {
    let engine = engine(1);
    let mut handles = vec![];
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                engine
                    .credit_on_activity(UserId(42), 20, OpToken::new())
                    .expect("credit");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }
    assert_eq!(engine.get_balance(UserId(42), &voxcent()).unwrap(), 1600);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_starts_yield_exactly_one_session() {
    let engine = engine(2);
    let mut handles = vec![];
    for i in 0..16 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .submit_action(
                    ChatId(5),
                    GameKind::Uno,
                    UserId(i),
                    PlayerAction::Start(StartGame::Uno),
                    0,
                    OpToken::new(),
                )
                .is_ok()
        }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.expect("task") {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert!(engine.session_view(ChatId(5), GameKind::Uno).is_ok());
}

/// Full dice rounds in many chats at once: no chat sees another chat's
/// state and every balance lands on a legal value
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn parallel_chats_do_not_cross_contaminate() {
    let engine = engine(3);
    let mut handles = vec![];
    for chat in 0..8i64 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let chat_id = ChatId(chat);
            let player = UserId(100 + chat);
            engine
                .admin_grant(&voxcent(), ADMIN, player, 100, OpToken::new())
                .expect("fund");
            let view = engine
                .submit_action(
                    chat_id,
                    GameKind::Casino,
                    player,
                    PlayerAction::Start(StartGame::Casino {
                        variant: CasinoGame::Dice,
                    }),
                    0,
                    OpToken::new(),
                )
                .expect("start");
            let view = engine
                .submit_action(
                    chat_id,
                    GameKind::Casino,
                    player,
                    PlayerAction::Bet {
                        amount: 50,
                        call: BetCall::Dice,
                    },
                    view.revision,
                    OpToken::new(),
                )
                .expect("bet");
            let view = engine
                .submit_action(
                    chat_id,
                    GameKind::Casino,
                    player,
                    PlayerAction::LockBets,
                    view.revision,
                    OpToken::new(),
                )
                .expect("lock");
            let view = engine
                .submit_action(
                    chat_id,
                    GameKind::Casino,
                    player,
                    PlayerAction::Spin,
                    view.revision,
                    OpToken::new(),
                )
                .expect("spin");
            assert!(view.terminal);
            player
        }));
    }

    for handle in handles {
        let player = handle.await.expect("task");
        let balance = engine.get_balance(player, &voxcent()).unwrap();
        // Lost the 50 stake, or won 3x on it
        assert!(
            balance == 50 || balance == 200,
            "unexpected balance {} for {}",
            balance,
            player
        );
    }
    // Every slot was released on resolution
    for chat in 0..8i64 {
        assert!(matches!(
            engine.session_view(ChatId(chat), GameKind::Casino),
            Err(EngineError::SessionNotFound(_))
        ));
    }
}

#[derive(Default)]
struct RecordingSink {
    snapshots: Mutex<Vec<EngineSnapshot>>,
}

#[async_trait::async_trait]
impl SnapshotSink for RecordingSink {
    async fn persist(&self, snapshot: &EngineSnapshot) -> Result<(), EngineError> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

#[tokio::test]
async fn snapshot_task_persists_to_sink() {
    let mut config = EngineConfig::default();
    config.admins = vec![ADMIN];
    config.session.snapshot_interval_secs = 60;
    let engine = Arc::new(SessionCoordinator::new(config).unwrap());
    engine
        .admin_grant(&voxcent(), ADMIN, UserId(2), 75, OpToken::new())
        .unwrap();

    let sink = Arc::new(RecordingSink::default());
    // The first interval tick fires immediately
    let task = Arc::clone(&engine).spawn_snapshotter(Arc::clone(&sink) as Arc<dyn SnapshotSink>);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    task.abort();

    let snapshots = sink.snapshots.lock().unwrap();
    assert!(!snapshots.is_empty());
    let accounts = &snapshots[0].accounts;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].user, UserId(2));
    assert_eq!(accounts[0].balance, 75);
}

#[tokio::test]
async fn sweeper_task_runs() {
    let engine = engine(4);
    let task = Arc::clone(&engine).spawn_sweeper();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    task.abort();
}

/// Resubmitting a retried settlement token must not pay twice
#[test]
fn settlement_token_resubmission_is_idempotent() {
    let engine = engine(6);
    engine
        .admin_grant(&voxcent(), ADMIN, UserId(2), 500, OpToken::new())
        .unwrap();
    let token = OpToken::new();
    let balance = engine.credit_on_activity(UserId(2), 50, token).unwrap();
    let again = engine.credit_on_activity(UserId(2), 50, token).unwrap();
    assert_eq!(balance, again);
    assert_eq!(engine.get_balance(UserId(2), &voxcent()).unwrap(), 501);
}
