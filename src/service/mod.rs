//! The game service: one per application session, owning the transport
//! connection, the local session identity, and the mirrored canonical state.
//!
//! Every room member runs the same service. The creator of a room is its
//! host and additionally folds inbound actions into canonical state (see
//! `reducer`); everyone else only publishes intents and mirrors whatever the
//! host broadcasts.

mod reducer;
mod scoring;

use crate::identity::{generate_game_code, SessionStore};
use crate::oracle::AnswerJudge;
use crate::protocol::{actions_topic, state_topic, Action, SettingsUpdate, StateFrame};
use crate::transport::{PubSub, QoS, Subscription, TransportError};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

pub const DEFAULT_JUDGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The operation needs a joined room and there is none.
    #[error("no active game")]
    NoGame,
}

pub struct GameService {
    transport: Arc<dyn PubSub>,
    session: SessionStore,
    judge: Option<Arc<dyn AnswerJudge>>,
    judge_timeout: Duration,
    player_id: PlayerId,
    game: RwLock<Option<Game>>,
    updates: watch::Sender<Option<Game>>,
    /// Latest draft sheet per player, fed by SAVE_DRAFT actions. Only the
    /// host reads this, to backfill players who never pressed stop.
    remote_drafts: RwLock<HashMap<PlayerId, AnswerSheet>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GameService {
    /// Service without a judge. Rounds will zero out unless one is set, so
    /// this is mainly for non-host members and tests.
    pub fn new(
        transport: Arc<dyn PubSub>,
        session: SessionStore,
    ) -> Result<Arc<Self>, ServiceError> {
        Self::new_with_judge(transport, session, None, DEFAULT_JUDGE_TIMEOUT)
    }

    pub fn new_with_judge(
        transport: Arc<dyn PubSub>,
        session: SessionStore,
        judge: Option<Arc<dyn AnswerJudge>>,
        judge_timeout: Duration,
    ) -> Result<Arc<Self>, ServiceError> {
        let player_id = session.player_id()?;
        let (updates, _) = watch::channel(None);
        Ok(Arc::new(Self {
            transport,
            session,
            judge,
            judge_timeout,
            player_id,
            game: RwLock::new(None),
            updates,
            remote_drafts: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Watch the mirrored game. Receivers always see the latest full
    /// snapshot; dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Game>> {
        self.updates.subscribe()
    }

    pub async fn game(&self) -> Option<Game> {
        self.game.read().await.clone()
    }

    /// Create a room and become its host.
    pub async fn create_game(self: &Arc<Self>, name: &str) -> Result<GameCode, ServiceError> {
        let code = generate_game_code();
        let host = Player::new(self.player_id.clone(), name, true);
        let game = Game::new(code.clone(), host);

        let actions = self.transport.subscribe(&actions_topic(&code)).await?;
        let states = self.transport.subscribe(&state_topic(&code)).await?;
        self.session.remember_room(&code)?;
        self.set_game(Some(game)).await;
        self.spawn_host_loop(actions).await;
        self.spawn_mirror_loop(states).await;

        tracing::info!(code = %code, player = %self.player_id, "created game");
        Ok(code)
    }

    /// Join an existing room as a regular player.
    pub async fn join_game(self: &Arc<Self>, code: &str, name: &str) -> Result<(), ServiceError> {
        let player = Player::new(self.player_id.clone(), name, false);

        let states = self.transport.subscribe(&state_topic(code)).await?;
        self.session.remember_room(code)?;

        // Placeholder view until the host's first snapshot lands. Version 0
        // loses against anything the host publishes.
        let mut placeholder = Game::new(code.to_string(), player.clone());
        placeholder.version = 0;
        self.set_game(Some(placeholder)).await;
        self.spawn_mirror_loop(states).await;

        self.publish_action(Action::PlayerJoin(player)).await?;
        tracing::info!(code = %code, player = %self.player_id, "joined game");
        Ok(())
    }

    /// Leave the room. A leaving host terminates the room for everyone.
    pub async fn leave_game(&self) -> Result<(), ServiceError> {
        if let Some(game) = self.game.read().await.clone() {
            if game.is_host(&self.player_id) {
                self.publish_terminated(&game.game_code).await;
            } else {
                self.publish_action(Action::PlayerLeave {
                    player_id: self.player_id.clone(),
                })
                .await?;
            }
        }
        self.shutdown().await;
        Ok(())
    }

    pub async fn update_avatar(&self, avatar_url: &str) -> Result<(), ServiceError> {
        self.publish_action(Action::UpdateAvatar {
            player_id: self.player_id.clone(),
            avatar_url: avatar_url.to_string(),
        })
        .await
    }

    pub async fn update_settings(&self, settings: SettingsUpdate) -> Result<(), ServiceError> {
        self.publish_action(Action::UpdateSettings(settings)).await
    }

    pub async fn start_game(&self) -> Result<(), ServiceError> {
        self.publish_action(Action::StartGame).await
    }

    pub async fn choose_letter(&self, letter: &str) -> Result<(), ServiceError> {
        self.publish_action(Action::ChooseLetter {
            letter: letter.to_string(),
        })
        .await
    }

    /// Press stop: submit this player's answers and end the round.
    pub async fn end_round(&self, answers: AnswerSheet) -> Result<(), ServiceError> {
        self.publish_action(Action::EndRound {
            player_id: self.player_id.clone(),
            answers,
        })
        .await
    }

    pub async fn next_round(&self) -> Result<(), ServiceError> {
        self.publish_action(Action::NextRound).await
    }

    /// Host correction of a judged answer.
    pub async fn override_score(
        &self,
        player_id: &str,
        category: &str,
        is_valid: bool,
        score: i32,
    ) -> Result<(), ServiceError> {
        self.publish_action(Action::ManualOverrideScore {
            player_id: player_id.to_string(),
            category: category.to_string(),
            is_valid,
            score,
        })
        .await
    }

    pub async fn end_game(&self) -> Result<(), ServiceError> {
        self.publish_action(Action::EndGame).await
    }

    pub async fn play_again(&self) -> Result<(), ServiceError> {
        self.publish_action(Action::PlayAgain).await
    }

    /// Persist in-progress answers and stream them to the host so the round
    /// can be backfilled if somebody else presses stop first.
    pub async fn save_draft(&self, answers: &AnswerSheet) -> Result<(), ServiceError> {
        let game = self.game.read().await.clone().ok_or(ServiceError::NoGame)?;
        self.session
            .save_draft(&game.game_code, game.current_round, answers)?;
        self.publish_action_with_qos(
            Action::SaveDraft {
                player_id: self.player_id.clone(),
                round: game.current_round,
                answers: answers.clone(),
            },
            QoS::AtMostOnce,
        )
        .await
    }

    /// Recover this player's draft for the current round after a reload.
    pub async fn draft_answers(&self) -> Option<AnswerSheet> {
        let game = self.game.read().await.clone()?;
        self.session.load_draft(&game.game_code, game.current_round)
    }

    async fn publish_action(&self, action: Action) -> Result<(), ServiceError> {
        self.publish_action_with_qos(action, QoS::AtLeastOnce).await
    }

    async fn publish_action_with_qos(
        &self,
        action: Action,
        qos: QoS,
    ) -> Result<(), ServiceError> {
        let code = self
            .game
            .read()
            .await
            .as_ref()
            .map(|g| g.game_code.clone())
            .ok_or(ServiceError::NoGame)?;
        let payload = serde_json::to_string(&action).map_err(TransportError::from)?;
        self.transport
            .publish(&actions_topic(&code), payload, qos)
            .await?;
        Ok(())
    }

    async fn publish_terminated(&self, code: &str) {
        let frame = StateFrame::Terminated {
            reason: "host left the game".to_string(),
        };
        match serde_json::to_string(&frame) {
            Ok(payload) => {
                if let Err(e) = self
                    .transport
                    .publish(&state_topic(code), payload, QoS::AtLeastOnce)
                    .await
                {
                    tracing::warn!(error = %e, "failed to publish terminal state");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode terminal state"),
        }
    }

    /// Atomically replace the mirrored snapshot and notify observers.
    async fn set_game(&self, game: Option<Game>) {
        *self.game.write().await = game.clone();
        self.updates.send_replace(game);
    }

    async fn spawn_host_loop(self: &Arc<Self>, actions: Subscription) {
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move { service.run_host_loop(actions).await });
        self.tasks.lock().await.push(handle);
    }

    async fn spawn_mirror_loop(self: &Arc<Self>, states: Subscription) {
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move { service.run_mirror_loop(states).await });
        self.tasks.lock().await.push(handle);
    }

    async fn run_mirror_loop(self: Arc<Self>, mut states: Subscription) {
        while let Some(message) = states.recv().await {
            match serde_json::from_str::<StateFrame>(&message.payload) {
                Ok(frame) => {
                    if !self.handle_state_frame(frame).await {
                        return;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "ignoring unparseable state frame"),
            }
        }
    }

    /// Fold one state frame into the mirror. Returns `false` once the room
    /// is dead and the mirror loop should stop.
    pub(crate) async fn handle_state_frame(&self, frame: StateFrame) -> bool {
        match frame {
            StateFrame::Snapshot(incoming) => {
                let accept = match self.game.read().await.as_ref() {
                    None => true,
                    Some(current) => incoming.version > current.version,
                };
                if accept {
                    tracing::debug!(version = incoming.version, "mirroring snapshot");
                    self.set_game(Some(incoming)).await;
                }
                true
            }
            StateFrame::Terminated { reason } => {
                let is_host = self
                    .game
                    .read()
                    .await
                    .as_ref()
                    .is_some_and(|g| g.is_host(&self.player_id));
                if !is_host {
                    tracing::info!(reason = %reason, "room terminated by host");
                    self.session.forget_room();
                    self.set_game(None).await;
                }
                false
            }
        }
    }

    async fn shutdown(&self) {
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        self.session.forget_room();
        self.set_game(None).await;
        let _ = self.transport.close().await;
    }
}
