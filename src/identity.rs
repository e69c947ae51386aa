//! Locally persisted session identity: the stable player id, the last-joined
//! room code, and per-round draft answers used for reload recovery.

use crate::types::{AnswerSheet, PlayerId};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;

/// Safe character set for room codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;

const PLAYER_ID_FILE: &str = "player-id";
const LAST_ROOM_FILE: &str = "last-room";

/// Generate a random short room code (5 characters)
pub fn generate_game_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct DraftRecord {
    round: u32,
    answers: AnswerSheet,
    saved_at: DateTime<Utc>,
}

/// Small directory-backed store, one per device. The player id is created
/// once and reused for every later session so a reloaded client keeps its
/// seat and score.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The stable player id for this device, created on first use.
    pub fn player_id(&self) -> io::Result<PlayerId> {
        let path = self.dir.join(PLAYER_ID_FILE);
        match std::fs::read_to_string(&path) {
            Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            _ => {
                let id = ulid::Ulid::new().to_string();
                std::fs::write(&path, &id)?;
                Ok(id)
            }
        }
    }

    /// Remember the room we connected to so a refreshed client can rejoin.
    pub fn remember_room(&self, code: &str) -> io::Result<()> {
        std::fs::write(self.dir.join(LAST_ROOM_FILE), code)
    }

    pub fn last_room(&self) -> Option<String> {
        let code = std::fs::read_to_string(self.dir.join(LAST_ROOM_FILE)).ok()?;
        let code = code.trim();
        (!code.is_empty()).then(|| code.to_string())
    }

    pub fn forget_room(&self) {
        let _ = std::fs::remove_file(self.dir.join(LAST_ROOM_FILE));
    }

    /// Persist in-progress answers for (room, round).
    pub fn save_draft(&self, room: &str, round: u32, answers: &AnswerSheet) -> io::Result<()> {
        let record = DraftRecord {
            round,
            answers: answers.clone(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(self.draft_path(room, round), json)
    }

    /// Recover the draft saved for (room, round), if any.
    pub fn load_draft(&self, room: &str, round: u32) -> Option<AnswerSheet> {
        let json = std::fs::read_to_string(self.draft_path(room, round)).ok()?;
        let record: DraftRecord = serde_json::from_str(&json).ok()?;
        Some(record.answers)
    }

    fn draft_path(&self, room: &str, round: u32) -> PathBuf {
        self.dir.join(format!("draft-{room}-{round}.json"))
    }
}
