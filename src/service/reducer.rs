//! Host-side action folding.
//!
//! Only the host mutates canonical state. Actions arrive on the room's
//! actions topic and are processed strictly one at a time; END_ROUND awaits
//! the judge before the next action is read, so there is never more than one
//! mutation in flight. Each accepted action produces a complete successor
//! state that is swapped in and published; rejected actions change nothing
//! and publish nothing.

use super::scoring;
use super::GameService;
use crate::protocol::{state_topic, Action, SettingsUpdate, StateFrame};
use crate::transport::{QoS, Subscription};
use crate::types::*;

impl GameService {
    pub(crate) async fn run_host_loop(self: std::sync::Arc<Self>, mut actions: Subscription) {
        while let Some(message) = actions.recv().await {
            let action = match serde_json::from_str::<Action>(&message.payload) {
                Ok(action) => action,
                Err(e) => {
                    tracing::debug!(error = %e, "ignoring unparseable action");
                    continue;
                }
            };
            self.apply_action(action).await;
        }
    }

    /// Fold one inbound action into canonical state.
    pub(crate) async fn apply_action(&self, action: Action) {
        // Single authority guard: everyone hears the actions topic, but only
        // the host folds actions into canonical state.
        let Some(game) = self.game.read().await.clone() else {
            return;
        };
        if !game.is_host(self.player_id()) {
            return;
        }

        match action {
            Action::EndRound { player_id, answers } => {
                self.apply_end_round(game, player_id, answers).await;
            }
            Action::SaveDraft {
                player_id,
                round,
                answers,
            } => {
                self.apply_save_draft(&game, player_id, round, answers).await;
            }
            Action::PlayerLeave { player_id } => {
                self.apply_player_leave(game, player_id).await;
            }
            other => {
                let starts_round = matches!(other, Action::ChooseLetter { .. });
                if let Some(next) = reduce(&game, other) {
                    if starts_round {
                        self.remote_drafts.write().await.clear();
                    }
                    self.commit(next).await;
                }
            }
        }
    }

    /// First stop ends the round for everyone: the submitter's answers are
    /// recorded, stragglers are backfilled from their latest draft (or an
    /// empty sheet), and the round is scored before the next action runs.
    async fn apply_end_round(&self, game: Game, player_id: PlayerId, answers: AnswerSheet) {
        if game.game_state != GamePhase::Playing {
            return;
        }
        let Some(player) = game.player(&player_id) else {
            return;
        };
        if player.answers_submitted {
            return;
        }

        let mut next = game;
        record_answers(&mut next, &player_id, answers);

        let drafts = self.remote_drafts.read().await.clone();
        let stragglers: Vec<PlayerId> = next
            .players
            .iter()
            .filter(|p| !p.answers_submitted)
            .map(|p| p.id.clone())
            .collect();
        for id in &stragglers {
            let sheet = drafts.get(id).cloned().unwrap_or_default();
            record_answers(&mut next, id, sheet);
        }
        tracing::info!(
            stopped_by = %player_id,
            backfilled = stragglers.len(),
            "round stopped"
        );

        next.game_state = GamePhase::Scoring;
        next.last_round_scores = None;
        next.round_validation = None;
        next.ai_error = None;
        // Interim snapshot: SCORING with no scores yet drives the spinner.
        self.commit(next).await;

        let Some(current) = self.game.read().await.clone() else {
            return;
        };
        if current.last_round_scores.is_some() {
            // Already scored; never accumulate twice for one round.
            return;
        }

        let outcome =
            scoring::score_round(&current, self.judge.as_deref(), self.judge_timeout).await;

        let mut scored = current;
        for player in &mut scored.players {
            player.score += outcome.scores.get(&player.id).copied().unwrap_or(0);
        }
        scored.last_round_scores = Some(outcome.scores);
        scored.round_validation = Some(outcome.validation);
        scored.ai_error = outcome.ai_error;
        self.commit(scored).await;
    }

    async fn apply_save_draft(
        &self,
        game: &Game,
        player_id: PlayerId,
        round: u32,
        answers: AnswerSheet,
    ) {
        if game.game_state != GamePhase::Playing || game.current_round != round {
            return;
        }
        if game.player(&player_id).is_none() {
            return;
        }
        let allowed = retain_known_categories(game, answers);
        self.remote_drafts.write().await.insert(player_id, allowed);
    }

    async fn apply_player_leave(&self, game: Game, player_id: PlayerId) {
        let Some(player) = game.player(&player_id) else {
            return;
        };

        if player.is_host {
            // The room dies with its host.
            self.publish_terminated(&game.game_code).await;
            self.session.forget_room();
            self.set_game(None).await;
            return;
        }

        let mut next = game;
        next.players.retain(|p| p.id != player_id);
        next.round_data.remove(&player_id);
        self.remote_drafts.write().await.remove(&player_id);
        self.commit(next).await;
    }

    /// Swap in the successor state and publish it as the new canonical
    /// snapshot.
    async fn commit(&self, mut next: Game) {
        next.version += 1;
        let code = next.game_code.clone();
        self.set_game(Some(next.clone())).await;

        match serde_json::to_string(&StateFrame::Snapshot(next)) {
            Ok(payload) => {
                if let Err(e) = self
                    .transport
                    .publish(&state_topic(&code), payload, QoS::AtLeastOnce)
                    .await
                {
                    tracing::warn!(error = %e, "failed to publish state snapshot");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode state snapshot"),
        }
    }
}

fn record_answers(game: &mut Game, player_id: &str, answers: AnswerSheet) {
    let allowed = retain_known_categories(game, answers);
    game.round_data.insert(player_id.to_string(), allowed);
    if let Some(player) = game.player_mut(player_id) {
        player.answers_submitted = true;
    }
}

fn retain_known_categories(game: &Game, answers: AnswerSheet) -> AnswerSheet {
    answers
        .into_iter()
        .filter(|(category, _)| game.categories.contains(category))
        .collect()
}

/// The synchronous part of the action table. Returns the successor state, or
/// `None` when the action's preconditions do not hold.
fn reduce(game: &Game, action: Action) -> Option<Game> {
    match action {
        Action::PlayerJoin(player) => {
            if game.player(&player.id).is_some() {
                return None;
            }
            let mut next = game.clone();
            let mut joined = player;
            joined.is_host = false;
            joined.score = 0;
            joined.answers_submitted = false;
            next.players.push(joined);
            Some(next)
        }

        Action::UpdateAvatar {
            player_id,
            avatar_url,
        } => {
            game.player(&player_id)?;
            let mut next = game.clone();
            if let Some(player) = next.player_mut(&player_id) {
                player.avatar_url = Some(avatar_url);
            }
            Some(next)
        }

        Action::UpdateSettings(SettingsUpdate { rounds, categories }) => {
            if game.game_state != GamePhase::Lobby {
                return None;
            }
            let mut next = game.clone();
            let mut changed = false;
            if let Some(rounds) = rounds.filter(|r| *r >= 1) {
                next.total_rounds = rounds;
                changed = true;
            }
            if let Some(categories) = categories {
                next.categories = merge_with_core_categories(&categories);
                changed = true;
            }
            changed.then_some(next)
        }

        Action::StartGame => {
            if game.game_state != GamePhase::Lobby || game.players.is_empty() {
                return None;
            }
            let mut next = game.clone();
            next.game_state = GamePhase::Spinning;
            next.current_round = 1;
            next.current_letter.clear();
            next.used_letters.clear();
            next.round_data.clear();
            next.last_round_scores = None;
            next.round_validation = None;
            next.ai_error = None;
            Some(next)
        }

        Action::ChooseLetter { letter } => {
            if game.game_state != GamePhase::Spinning {
                return None;
            }
            if game.used_letters.iter().any(|l| *l == letter) {
                return None;
            }
            if !ARABIC_LETTERS.contains(&letter.as_str()) {
                return None;
            }
            let mut next = game.clone();
            next.current_letter = letter.clone();
            next.used_letters.push(letter);
            next.game_state = GamePhase::Playing;
            for player in &mut next.players {
                player.answers_submitted = false;
            }
            next.round_data.clear();
            next.last_round_scores = None;
            next.round_validation = None;
            next.ai_error = None;
            Some(next)
        }

        Action::NextRound => {
            if game.game_state != GamePhase::Scoring || game.last_round_scores.is_none() {
                return None;
            }
            let mut next = game.clone();
            if next.current_round >= next.total_rounds {
                next.game_state = GamePhase::Winner;
            } else {
                next.current_round += 1;
                next.game_state = GamePhase::Spinning;
                next.current_letter.clear();
                next.round_data.clear();
                next.last_round_scores = None;
                next.round_validation = None;
                next.ai_error = None;
            }
            Some(next)
        }

        Action::ManualOverrideScore {
            player_id,
            category,
            is_valid,
            score,
        } => {
            if game.game_state != GamePhase::Scoring {
                return None;
            }
            let old = *game.round_validation.as_ref()?.get(&player_id)?.get(&category)?;
            if old.score == score {
                // Re-applying the same override is a no-op.
                return None;
            }
            let delta = score - old.score;
            let mut next = game.clone();
            if let Some(entry) = next
                .round_validation
                .as_mut()
                .and_then(|v| v.get_mut(&player_id))
                .and_then(|row| row.get_mut(&category))
            {
                *entry = ValidationResult { is_valid, score };
            }
            if let Some(scores) = next.last_round_scores.as_mut() {
                *scores.entry(player_id.clone()).or_insert(0) += delta;
            }
            if let Some(player) = next.player_mut(&player_id) {
                player.score += delta;
            }
            Some(next)
        }

        Action::EndGame => {
            if game.game_state == GamePhase::Winner {
                return None;
            }
            let mut next = game.clone();
            next.game_state = GamePhase::Winner;
            Some(next)
        }

        Action::PlayAgain => {
            if game.game_state != GamePhase::Winner {
                return None;
            }
            let mut next = game.clone();
            next.game_state = GamePhase::Lobby;
            next.current_round = 0;
            next.current_letter.clear();
            next.used_letters.clear();
            next.round_data.clear();
            next.last_round_scores = None;
            next.round_validation = None;
            next.ai_error = None;
            for player in &mut next.players {
                player.score = 0;
                player.answers_submitted = false;
            }
            Some(next)
        }

        // Handled by the async paths above, or deliberately ignored.
        Action::EndRound { .. }
        | Action::SaveDraft { .. }
        | Action::PlayerLeave { .. }
        | Action::Unknown => None,
    }
}
