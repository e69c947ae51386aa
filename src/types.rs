use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque ID types for type safety
pub type PlayerId = String;
pub type GameCode = String;
pub type Category = String;

/// One player's answers for the current round, keyed by category.
pub type AnswerSheet = BTreeMap<Category, String>;
/// All answers recorded for the current round, keyed by player id.
pub type RoundData = BTreeMap<PlayerId, AnswerSheet>;
/// Per-player point totals for the most recently scored round.
pub type RoundScores = BTreeMap<PlayerId, i32>;
/// Per-player, per-category verdicts for the most recently scored round.
pub type RoundValidation = BTreeMap<PlayerId, BTreeMap<Category, ValidationResult>>;

/// The letters a round letter can be spun from.
pub const ARABIC_LETTERS: &[&str] = &[
    "أ", "ب", "ت", "ث", "ج", "ح", "خ", "د", "ذ", "ر", "ز", "س", "ش", "ص", "ض", "ط", "ظ", "ع",
    "غ", "ف", "ق", "ك", "ل", "م", "ن", "ه", "و", "ي",
];

/// Categories every game always plays. These can never be removed.
pub const CORE_CATEGORIES: &[&str] = &["إنسان", "حيوان", "نبات", "جماد"];

/// Categories the host may toggle on in the lobby.
pub const OPTIONAL_CATEGORIES: &[&str] = &["بلد", "مدينة", "لون", "أكلة"];

pub const DEFAULT_TOTAL_ROUNDS: u32 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    Lobby,
    Spinning,
    Playing,
    Scoring,
    Winner,
}

/// Per-answer verdict, kept for the scoring screen and host overrides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub score: i32,
    pub is_host: bool,
    pub answers_submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, is_host: bool) -> Self {
        let avatar_url = Some(default_avatar_url(&id));
        Self {
            id,
            name: name.into(),
            score: 0,
            is_host,
            answers_submitted: false,
            avatar_url,
        }
    }
}

/// Deterministic placeholder avatar, seeded by the player id.
pub fn default_avatar_url(player_id: &str) -> String {
    format!("https://api.dicebear.com/8.x/bottts-neutral/svg?seed={player_id}")
}

/// The canonical game aggregate. One instance per room; only the host mutates
/// it, everyone else mirrors the snapshots the host publishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub game_code: GameCode,
    /// Monotonic snapshot counter. Mirrors only accept snapshots with a
    /// version greater than the one they already hold.
    pub version: u64,
    pub game_state: GamePhase,
    pub players: Vec<Player>,
    pub categories: Vec<Category>,
    pub total_rounds: u32,
    pub current_round: u32,
    pub current_letter: String,
    pub used_letters: Vec<String>,
    pub round_data: RoundData,
    /// Present only once scoring of the current round has completed. Absent
    /// while the judge call is in flight, which is what drives the
    /// "judging" spinner on clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_round_scores: Option<RoundScores>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_validation: Option<RoundValidation>,
    /// Set when the judge failed for the current round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_error: Option<String>,
}

impl Game {
    /// Fresh game in the lobby with `creator` as its only member.
    pub fn new(game_code: GameCode, creator: Player) -> Self {
        Self {
            game_code,
            version: 1,
            game_state: GamePhase::Lobby,
            players: vec![creator],
            categories: CORE_CATEGORIES.iter().map(|c| c.to_string()).collect(),
            total_rounds: DEFAULT_TOTAL_ROUNDS,
            current_round: 0,
            current_letter: String::new(),
            used_letters: Vec::new(),
            round_data: RoundData::new(),
            last_round_scores: None,
            round_validation: None,
            ai_error: None,
        }
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    pub fn is_host(&self, id: &str) -> bool {
        self.player(id).is_some_and(|p| p.is_host)
    }

    pub fn all_submitted(&self) -> bool {
        self.players.iter().all(|p| p.answers_submitted)
    }

    /// Letters still available for the next spin.
    pub fn remaining_letters(&self) -> Vec<&'static str> {
        ARABIC_LETTERS
            .iter()
            .copied()
            .filter(|l| !self.used_letters.iter().any(|u| u == l))
            .collect()
    }
}

/// Merge a requested category list with the core set. Core categories are
/// always kept, in their fixed order; requested extras follow, deduplicated.
pub fn merge_with_core_categories(requested: &[Category]) -> Vec<Category> {
    let mut merged: Vec<Category> = CORE_CATEGORIES.iter().map(|c| c.to_string()).collect();
    for cat in requested {
        if !merged.iter().any(|c| c == cat) {
            merged.push(cat.clone());
        }
    }
    merged
}
