//! Presence: who else has the document open.
//!
//! ```text
//! Awareness broadcast (Vec<AwarenessState>, one per tab)
//!       │
//!       ▼
//! collapse()  ── key = email, else client id
//!       │        same key → keep most recent last_active
//!       ▼
//! HashMap<key, Presence>  (SessionState::active_users)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::AwarenessState;

/// A collaborator shown in the document header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub client_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// `#rrggbb`, stable per presence key.
    pub color: String,
    /// Milliseconds since the Unix epoch.
    pub last_active: u64,
}

impl Presence {
    pub fn from_awareness(state: &AwarenessState) -> Self {
        let key = presence_key(state);
        Self {
            client_id: state.client_id.clone(),
            name: state.name.clone(),
            email: state.email.clone(),
            color: color_for(key),
            last_active: state.last_active,
        }
    }

    pub fn key(&self) -> &str {
        self.email
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(&self.client_id)
    }
}

/// Email when known so one user's tabs collapse, else the client id.
pub fn presence_key(state: &AwarenessState) -> &str {
    state
        .email
        .as_deref()
        .filter(|e| !e.is_empty())
        .unwrap_or(&state.client_id)
}

/// Rebuild the active-user map from a full awareness broadcast.
pub fn collapse(states: &[AwarenessState]) -> HashMap<String, Presence> {
    let mut users: HashMap<String, Presence> = HashMap::with_capacity(states.len());
    for state in states {
        let key = presence_key(state);
        match users.get(key) {
            Some(existing) if existing.last_active >= state.last_active => {}
            _ => {
                users.insert(key.to_string(), Presence::from_awareness(state));
            }
        }
    }
    users
}

/// Every badge shares one saturation and lightness; the hue comes from the
/// presence key.
const BADGE_SATURATION: f32 = 0.7;
const BADGE_LIGHTNESS: f32 = 0.6;

/// Stable badge color for a presence key, as `#rrggbb`.
pub fn color_for(key: &str) -> String {
    let [r, g, b] = badge_rgb(hue_for(key));
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Hue in degrees. FNV-1a, so it is stable across processes unlike
/// `DefaultHasher`.
fn hue_for(key: &str) -> f32 {
    let hash = key
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
    (hash % 360) as f32
}

fn badge_rgb(hue: f32) -> [u8; 3] {
    let chroma = (1.0 - (2.0 * BADGE_LIGHTNESS - 1.0).abs()) * BADGE_SATURATION;
    let sector = hue / 60.0;
    let second = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, second, 0.0),
        1 => (second, chroma, 0.0),
        2 => (0.0, chroma, second),
        3 => (0.0, second, chroma),
        4 => (second, 0.0, chroma),
        _ => (chroma, 0.0, second),
    };
    let base = BADGE_LIGHTNESS - chroma / 2.0;
    [r, g, b].map(|c| ((c + base).clamp(0.0, 1.0) * 255.0).round() as u8)
}
