use async_trait::async_trait;
use letterdash::identity::SessionStore;
use letterdash::oracle::{AnswerJudge, JudgeResult, ValidationRequest, Verdict};
use letterdash::protocol::SettingsUpdate;
use letterdash::transport::InMemoryBroker;
use letterdash::types::*;
use letterdash::GameService;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Scripted judge: the listed (category, answer) pairs are valid, everything
/// else is rejected.
struct ScriptedJudge {
    valid: HashSet<(String, String)>,
}

impl ScriptedJudge {
    fn accepting(pairs: &[(&str, &str)]) -> Arc<dyn AnswerJudge> {
        Arc::new(Self {
            valid: pairs
                .iter()
                .map(|(c, a)| (c.to_string(), a.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl AnswerJudge for ScriptedJudge {
    async fn judge(&self, request: ValidationRequest) -> JudgeResult<Vec<Verdict>> {
        Ok(request
            .answers
            .into_iter()
            .map(|q| {
                let is_valid = self.valid.contains(&(q.category.clone(), q.answer.clone()));
                Verdict {
                    category: q.category,
                    answer: q.answer,
                    is_valid,
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn service_on(
    broker: &InMemoryBroker,
    dir: &tempfile::TempDir,
    judge: Option<Arc<dyn AnswerJudge>>,
) -> Arc<GameService> {
    let session = SessionStore::new(dir.path()).unwrap();
    GameService::new_with_judge(
        Arc::new(broker.client()),
        session,
        judge,
        Duration::from_secs(5),
    )
    .unwrap()
}

async fn wait_for_game<F>(rx: &mut watch::Receiver<Option<Game>>, what: &str, pred: F) -> Game
where
    F: Fn(&Game) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let guard = rx.borrow_and_update();
                if let Some(game) = guard.as_ref() {
                    if pred(game) {
                        return game.clone();
                    }
                }
            }
            rx.changed().await.expect("state watch closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
}

async fn wait_for_no_game(rx: &mut watch::Receiver<Option<Game>>, what: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if rx.borrow_and_update().is_none() {
                return;
            }
            rx.changed().await.expect("state watch closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for: {what}"))
}

fn sheet(pairs: &[(&str, &str)]) -> AnswerSheet {
    pairs
        .iter()
        .map(|(c, a)| (c.to_string(), a.to_string()))
        .collect()
}

/// End-to-end flow over the shared broker: lobby, settings, a judged round
/// with a backfilled straggler, advancing rounds, play again, host leaving.
#[tokio::test]
async fn test_full_game_flow() {
    init_tracing();
    let broker = InMemoryBroker::new();
    let judge = ScriptedJudge::accepting(&[("حيوان", "سلحفاة")]);

    let host_dir = tempfile::tempdir().unwrap();
    let a_dir = tempfile::tempdir().unwrap();
    let b_dir = tempfile::tempdir().unwrap();

    let host = service_on(&broker, &host_dir, Some(judge));
    let player_a = service_on(&broker, &a_dir, None);
    let player_b = service_on(&broker, &b_dir, None);

    let mut host_rx = host.subscribe();
    let mut a_rx = player_a.subscribe();
    let mut b_rx = player_b.subscribe();

    // 1. Host creates the room, both players join.
    let code = host.create_game("خالد").await.unwrap();
    player_a.join_game(&code, "أمل").await.unwrap();
    player_b.join_game(&code, "بدر").await.unwrap();

    let lobby = wait_for_game(&mut host_rx, "all players in lobby", |g| {
        g.players.len() == 3
    })
    .await;
    assert_eq!(lobby.game_state, GamePhase::Lobby);
    assert!(lobby.is_host(host.player_id()));
    assert!(!lobby.is_host(player_a.player_id()));

    // Joiners mirror the same roster.
    wait_for_game(&mut a_rx, "player A sees the roster", |g| {
        g.players.len() == 3 && g.version > 0
    })
    .await;

    // 2. Host tweaks settings; core categories survive.
    host.update_settings(SettingsUpdate {
        rounds: Some(2),
        categories: Some(vec!["بلد".to_string()]),
    })
    .await
    .unwrap();
    let configured = wait_for_game(&mut b_rx, "settings applied", |g| g.total_rounds == 2).await;
    assert!(configured.categories.iter().any(|c| c == "بلد"));
    for core in CORE_CATEGORIES {
        assert!(configured.categories.iter().any(|c| c == core));
    }

    // 3. Round one.
    host.start_game().await.unwrap();
    wait_for_game(&mut b_rx, "spinning", |g| g.game_state == GamePhase::Spinning).await;

    host.choose_letter("س").await.unwrap();
    wait_for_game(&mut a_rx, "playing", |g| g.game_state == GamePhase::Playing).await;
    wait_for_game(&mut b_rx, "playing", |g| g.game_state == GamePhase::Playing).await;

    // B types an answer but never presses stop; the draft is both persisted
    // locally and streamed to the host.
    let b_draft = sheet(&[("حيوان", "سلحفاة")]);
    player_b.save_draft(&b_draft).await.unwrap();
    assert_eq!(player_b.draft_answers().await, Some(b_draft));

    // A presses stop with a nonsense plant and a duplicated animal.
    player_a
        .end_round(sheet(&[("نبات", "سمك؟؟"), ("حيوان", "سلحفاة")]))
        .await
        .unwrap();

    let scored = wait_for_game(&mut b_rx, "round scored", |g| {
        g.last_round_scores.is_some()
    })
    .await;
    assert_eq!(scored.game_state, GamePhase::Scoring);
    assert!(scored.all_submitted());
    assert!(scored.ai_error.is_none());

    let scores = scored.last_round_scores.as_ref().unwrap();
    // The duplicated valid animal pays 5 to each of A and B; the invalid
    // plant and B's empty plant pay nothing; the host submitted nothing.
    assert_eq!(scores[player_a.player_id()], 5);
    assert_eq!(scores[player_b.player_id()], 5);
    assert_eq!(scores[host.player_id()], 0);

    let validation = scored.round_validation.as_ref().unwrap();
    assert!(!validation[player_a.player_id()]["نبات"].is_valid);
    assert!(validation[player_a.player_id()]["حيوان"].is_valid);
    assert_eq!(
        scored.round_data[player_b.player_id()]["حيوان"],
        "سلحفاة",
        "B's answers were backfilled from the draft"
    );

    // Cumulative totals moved with the round.
    assert_eq!(scored.player(player_a.player_id()).unwrap().score, 5);
    assert_eq!(scored.player(player_b.player_id()).unwrap().score, 5);

    // 4. Next round spins again without the used letter.
    host.next_round().await.unwrap();
    let spinning = wait_for_game(&mut a_rx, "round two", |g| {
        g.game_state == GamePhase::Spinning && g.current_round == 2
    })
    .await;
    assert!(spinning.used_letters.contains(&"س".to_string()));
    assert!(spinning.last_round_scores.is_none());
    assert!(!spinning.remaining_letters().contains(&"س"));

    // 5. Host ends the game early, then everyone plays again.
    host.end_game().await.unwrap();
    wait_for_game(&mut b_rx, "winner screen", |g| {
        g.game_state == GamePhase::Winner
    })
    .await;

    host.play_again().await.unwrap();
    let fresh = wait_for_game(&mut a_rx, "back to lobby", |g| {
        g.game_state == GamePhase::Lobby
    })
    .await;
    assert!(fresh.players.iter().all(|p| p.score == 0));
    assert!(fresh.used_letters.is_empty());
    assert_eq!(fresh.current_round, 0);

    // 6. The host leaving kills the room for everyone.
    host.leave_game().await.unwrap();
    wait_for_no_game(&mut a_rx, "player A sees no game").await;
    wait_for_no_game(&mut b_rx, "player B sees no game").await;
    assert!(player_a.game().await.is_none());
}

/// A round where the first stopper is the only submitter and another player
/// has no draft at all: the straggler is backfilled with an empty sheet and
/// scores zero everywhere.
#[tokio::test]
async fn test_first_stop_without_drafts_backfills_empty() {
    let broker = InMemoryBroker::new();
    let judge = ScriptedJudge::accepting(&[("حيوان", "سمكة")]);

    let host_dir = tempfile::tempdir().unwrap();
    let a_dir = tempfile::tempdir().unwrap();

    let host = service_on(&broker, &host_dir, Some(judge));
    let player_a = service_on(&broker, &a_dir, None);
    let mut host_rx = host.subscribe();
    let mut a_rx = player_a.subscribe();

    let code = host.create_game("خالد").await.unwrap();
    player_a.join_game(&code, "أمل").await.unwrap();
    wait_for_game(&mut host_rx, "roster complete", |g| g.players.len() == 2).await;

    host.start_game().await.unwrap();
    host.choose_letter("س").await.unwrap();
    wait_for_game(&mut a_rx, "playing", |g| g.game_state == GamePhase::Playing).await;

    player_a
        .end_round(sheet(&[("حيوان", "سمكة")]))
        .await
        .unwrap();

    let scored = wait_for_game(&mut a_rx, "round scored", |g| {
        g.last_round_scores.is_some()
    })
    .await;

    let scores = scored.last_round_scores.as_ref().unwrap();
    assert_eq!(scores[player_a.player_id()], 10, "unique valid answer");
    assert_eq!(scores[host.player_id()], 0, "empty backfill scores zero");
    assert_eq!(
        scored.round_data[host.player_id()],
        AnswerSheet::new(),
        "host had no draft to backfill from"
    );
}

/// The judge failing mid-round zeroes everyone, records the error, and the
/// host can still repair a score manually.
#[tokio::test]
async fn test_judge_failure_and_manual_override() {
    struct BrokenJudge;

    #[async_trait]
    impl AnswerJudge for BrokenJudge {
        async fn judge(&self, _request: ValidationRequest) -> JudgeResult<Vec<Verdict>> {
            Err(letterdash::oracle::JudgeError::Api(
                "no credits left".to_string(),
            ))
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    let broker = InMemoryBroker::new();
    let host_dir = tempfile::tempdir().unwrap();
    let a_dir = tempfile::tempdir().unwrap();

    let host = service_on(&broker, &host_dir, Some(Arc::new(BrokenJudge)));
    let player_a = service_on(&broker, &a_dir, None);
    let mut host_rx = host.subscribe();
    let mut a_rx = player_a.subscribe();

    let code = host.create_game("خالد").await.unwrap();
    player_a.join_game(&code, "أمل").await.unwrap();
    wait_for_game(&mut host_rx, "roster complete", |g| g.players.len() == 2).await;

    host.start_game().await.unwrap();
    host.choose_letter("س").await.unwrap();
    wait_for_game(&mut a_rx, "playing", |g| g.game_state == GamePhase::Playing).await;

    player_a
        .end_round(sheet(&[("حيوان", "سلحفاة")]))
        .await
        .unwrap();

    let failed = wait_for_game(&mut a_rx, "failed scoring", |g| g.ai_error.is_some()).await;
    assert_eq!(
        failed.last_round_scores.as_ref().unwrap()[player_a.player_id()],
        0
    );
    assert_eq!(failed.player(player_a.player_id()).unwrap().score, 0);

    // Host repairs the answer the judge never got to see.
    host.override_score(player_a.player_id(), "حيوان", true, 10)
        .await
        .unwrap();
    let repaired = wait_for_game(&mut a_rx, "override applied", |g| {
        g.player(player_a.player_id()).is_some_and(|p| p.score == 10)
    })
    .await;
    assert_eq!(
        repaired.last_round_scores.as_ref().unwrap()[player_a.player_id()],
        10
    );

    // Sending the identical override again must not double-count.
    host.override_score(player_a.player_id(), "حيوان", true, 10)
        .await
        .unwrap();
    host.next_round().await.unwrap();
    let advanced = wait_for_game(&mut a_rx, "round two", |g| g.current_round == 2).await;
    assert_eq!(advanced.player(player_a.player_id()).unwrap().score, 10);
}

/// A non-host player leaving shrinks the roster but keeps the game alive.
#[tokio::test]
async fn test_player_leave_keeps_game_running() {
    let broker = InMemoryBroker::new();
    let host_dir = tempfile::tempdir().unwrap();
    let a_dir = tempfile::tempdir().unwrap();
    let b_dir = tempfile::tempdir().unwrap();

    let host = service_on(&broker, &host_dir, None);
    let player_a = service_on(&broker, &a_dir, None);
    let player_b = service_on(&broker, &b_dir, None);
    let mut host_rx = host.subscribe();
    let leaver_id = player_a.player_id().to_string();

    let code = host.create_game("خالد").await.unwrap();
    player_a.join_game(&code, "أمل").await.unwrap();
    player_b.join_game(&code, "بدر").await.unwrap();
    wait_for_game(&mut host_rx, "roster complete", |g| g.players.len() == 3).await;

    player_a.leave_game().await.unwrap();

    let after = wait_for_game(&mut host_rx, "roster shrinks", |g| g.players.len() == 2).await;
    assert!(after.player(&leaver_id).is_none());
    assert_eq!(after.game_state, GamePhase::Lobby);
    assert!(player_a.game().await.is_none());
}
