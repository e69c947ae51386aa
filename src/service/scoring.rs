//! Turns a round's submitted answers into validated, deterministic scores.
//!
//! The judge is only asked for per-answer validity. Point values come from
//! the local uniqueness rule: a valid answer shared by several players in the
//! same category is worth 5 to each of them, a valid answer nobody else used
//! is worth 10, anything invalid or empty is worth 0.

use crate::oracle::{AnswerJudge, AnswerQuery, ValidationRequest, Verdict};
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Everything the reducer needs to finalize a round.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RoundOutcome {
    pub scores: RoundScores,
    pub validation: RoundValidation,
    pub ai_error: Option<String>,
}

/// Normalize answer text for duplicate comparison (trim whitespace, lowercase)
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Hamza-carrying alif forms count as the bare alif when matching the letter.
fn fold_alif(c: char) -> char {
    match c {
        'أ' | 'إ' | 'آ' => 'ا',
        other => other,
    }
}

fn starts_with_letter(answer: &str, letter: &str) -> bool {
    match (answer.chars().next(), letter.chars().next()) {
        (Some(a), Some(l)) => fold_alif(a) == fold_alif(l),
        _ => false,
    }
}

/// Score the current round of `game`.
///
/// Failure policy is strict: if the judge errors, times out, or is not
/// configured, the whole round scores zero for everyone and the error is
/// reported through `ai_error`. The host can repair individual scores
/// afterwards with a manual override.
pub(crate) async fn score_round(
    game: &Game,
    judge: Option<&dyn AnswerJudge>,
    timeout: Duration,
) -> RoundOutcome {
    // Start from a zero matrix covering every player and category, so every
    // cell exists for the scoring screen and for manual overrides.
    let mut validation = RoundValidation::new();
    let mut scores = RoundScores::new();
    for player in &game.players {
        let mut row = BTreeMap::new();
        for category in &game.categories {
            row.insert(
                category.clone(),
                ValidationResult {
                    is_valid: false,
                    score: 0,
                },
            );
        }
        validation.insert(player.id.clone(), row);
        scores.insert(player.id.clone(), 0);
    }

    // Collect answers that survive the local checks. Identical answers in the
    // same category become a single judge query.
    let mut pending: Vec<(PlayerId, Category, String)> = Vec::new();
    let mut query_keys: BTreeSet<(Category, String)> = BTreeSet::new();
    let mut queries: Vec<AnswerQuery> = Vec::new();
    for (player_id, sheet) in &game.round_data {
        for (category, answer) in sheet {
            if !game.categories.contains(category) {
                continue;
            }
            let trimmed = answer.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !starts_with_letter(trimmed, &game.current_letter) {
                // Wrong starting letter is decided locally, no judge call.
                continue;
            }
            let normalized = normalize(trimmed);
            pending.push((player_id.clone(), category.clone(), normalized.clone()));
            if query_keys.insert((category.clone(), normalized)) {
                queries.push(AnswerQuery {
                    category: category.clone(),
                    answer: trimmed.to_string(),
                });
            }
        }
    }

    if pending.is_empty() {
        return RoundOutcome {
            scores,
            validation,
            ai_error: None,
        };
    }

    let verdicts = consult_judge(game, judge, queries, timeout).await;
    let verdicts = match verdicts {
        Ok(verdicts) => verdicts,
        Err(message) => {
            tracing::error!(error = %message, "answer validation failed, zeroing the round");
            return RoundOutcome {
                scores,
                validation,
                ai_error: Some(message),
            };
        }
    };

    let mut valid_by_key: HashMap<(Category, String), bool> = HashMap::new();
    for verdict in verdicts {
        let Verdict {
            category,
            answer,
            is_valid,
        } = verdict;
        valid_by_key.insert((category, normalize(&answer)), is_valid);
    }

    // Count how many players used each valid answer within its category.
    let mut usage: BTreeMap<(Category, String), u32> = BTreeMap::new();
    for (_, category, normalized) in &pending {
        let key = (category.clone(), normalized.clone());
        if valid_by_key.get(&key).copied().unwrap_or(false) {
            *usage.entry(key).or_insert(0) += 1;
        }
    }

    for (player_id, category, normalized) in pending {
        let key = (category.clone(), normalized);
        // A verdict the judge failed to return counts as invalid.
        let is_valid = valid_by_key.get(&key).copied().unwrap_or(false);
        let score = if is_valid {
            if usage.get(&key).copied().unwrap_or(0) > 1 {
                5
            } else {
                10
            }
        } else {
            0
        };

        if let Some(row) = validation.get_mut(&player_id) {
            row.insert(category, ValidationResult { is_valid, score });
        }
    }

    for (player_id, row) in &validation {
        let total = row.values().map(|v| v.score).sum();
        scores.insert(player_id.clone(), total);
    }

    RoundOutcome {
        scores,
        validation,
        ai_error: None,
    }
}

async fn consult_judge(
    game: &Game,
    judge: Option<&dyn AnswerJudge>,
    queries: Vec<AnswerQuery>,
    timeout: Duration,
) -> Result<Vec<Verdict>, String> {
    let Some(judge) = judge else {
        return Err("no judge configured".to_string());
    };

    let request = ValidationRequest {
        letter: game.current_letter.clone(),
        categories: game.categories.clone(),
        answers: queries,
        timeout,
    };

    tracing::debug!(
        judge = judge.name(),
        answers = request.answers.len(),
        letter = %request.letter,
        "consulting judge"
    );

    // The judge call is the only suspension point of a round; bound it so a
    // hung provider cannot stall the game forever.
    match tokio::time::timeout(timeout, judge.judge(request)).await {
        Err(_) => Err(format!("judge timed out after {timeout:?}")),
        Ok(Err(e)) => Err(e.to_string()),
        Ok(Ok(verdicts)) => Ok(verdicts),
    }
}
