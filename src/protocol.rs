use crate::types::*;
use serde::{Deserialize, Serialize};

/// Namespace prefix for all room topics.
pub const TOPIC_PREFIX: &str = "letterdash-v1";

/// Topic carrying player intents for the host of `code`.
pub fn actions_topic(code: &str) -> String {
    format!("{TOPIC_PREFIX}/{code}/actions")
}

/// Topic carrying the host's canonical snapshots for `code`.
pub fn state_topic(code: &str) -> String {
    format!("{TOPIC_PREFIX}/{code}/state")
}

/// Player intents published on the actions topic. Wire shape is
/// `{"type": "...", "payload": {...}}`; only the host acts on these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    PlayerJoin(Player),
    #[serde(rename_all = "camelCase")]
    UpdateAvatar {
        player_id: PlayerId,
        avatar_url: String,
    },
    UpdateSettings(SettingsUpdate),
    StartGame,
    ChooseLetter {
        letter: String,
    },
    #[serde(rename_all = "camelCase")]
    EndRound {
        player_id: PlayerId,
        answers: AnswerSheet,
    },
    NextRound,
    #[serde(rename_all = "camelCase")]
    ManualOverrideScore {
        player_id: PlayerId,
        category: Category,
        is_valid: bool,
        score: i32,
    },
    EndGame,
    PlayAgain,
    #[serde(rename_all = "camelCase")]
    PlayerLeave {
        player_id: PlayerId,
    },
    /// In-progress answers, streamed so the host can backfill players who
    /// never press stop before someone else ends the round.
    #[serde(rename_all = "camelCase")]
    SaveDraft {
        player_id: PlayerId,
        round: u32,
        answers: AnswerSheet,
    },
    /// Forward compatibility: anything we do not recognize is ignored.
    #[serde(other)]
    Unknown,
}

/// Frames published on the state topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateFrame {
    /// Full replacement snapshot of the canonical game.
    Snapshot(Game),
    /// The host is gone and the room is dead. Mirrors drop their state.
    Terminated { reason: String },
}

/// Settings the host may change while the game sits in the lobby.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rounds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Category>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_envelope_uses_type_and_payload() {
        let action = Action::ChooseLetter {
            letter: "س".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();

        assert_eq!(json["type"], "CHOOSE_LETTER");
        assert_eq!(json["payload"]["letter"], "س");
    }

    #[test]
    fn unit_actions_serialize_without_payload() {
        let json = serde_json::to_value(Action::StartGame).unwrap();
        assert_eq!(json["type"], "START_GAME");
        assert!(json.get("payload").is_none());

        let parsed: Action = serde_json::from_str(r#"{"type":"START_GAME"}"#).unwrap();
        assert_eq!(parsed, Action::StartGame);
    }

    #[test]
    fn end_round_payload_uses_camel_case() {
        let mut answers = AnswerSheet::new();
        answers.insert("حيوان".to_string(), "سلحفاة".to_string());
        let action = Action::EndRound {
            player_id: "p1".to_string(),
            answers,
        };
        let json = serde_json::to_value(&action).unwrap();

        assert_eq!(json["type"], "END_ROUND");
        assert_eq!(json["payload"]["playerId"], "p1");
        assert_eq!(json["payload"]["answers"]["حيوان"], "سلحفاة");
    }

    #[test]
    fn unrecognized_action_types_parse_as_unknown() {
        let parsed: Action = serde_json::from_str(r#"{"type":"SELF_DESTRUCT"}"#).unwrap();
        assert_eq!(parsed, Action::Unknown);
    }

    #[test]
    fn state_frame_round_trips_a_snapshot() {
        let host = Player::new("p1".into(), "خالد", true);
        let game = Game::new("ABCDE".into(), host);
        let frame = StateFrame::Snapshot(game.clone());

        let json = serde_json::to_string(&frame).unwrap();
        let back: StateFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StateFrame::Snapshot(game));
    }

    #[test]
    fn topics_are_scoped_by_room_code() {
        assert_eq!(actions_topic("ABCDE"), "letterdash-v1/ABCDE/actions");
        assert_eq!(state_topic("ABCDE"), "letterdash-v1/ABCDE/state");
    }
}
