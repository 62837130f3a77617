//! Deterministic identifiers.
//!
//! A card group is identified by its deck and foreign phrase, so saving the same phrase twice
//! updates one group. A card is identified by its group and direction, so toggling a
//! direction off and back on restores the same card id.

use uuid::Uuid;

use crate::types::{CardGroupId, CardId, DeckId, Direction};

pub const CARD_NAMESPACE: Uuid = Uuid::from_u128(0x6b9a8963_8e7c_4054_94c6_2c9769341b52);

pub fn card_group_id(deck_id: DeckId, foreign_phrase: &str) -> CardGroupId {
    Uuid::new_v5(&deck_id, foreign_phrase.trim().as_bytes())
}

pub fn card_id(group_id: CardGroupId, direction: Direction) -> CardId {
    Uuid::new_v5(&CARD_NAMESPACE, format!("{group_id}-{direction}").as_bytes())
}

/// Media file name used for a group's audio inside exported packages.
pub fn audio_filename() -> String {
    format!("{}.mp3", Uuid::new_v4().simple())
}
