//! The 14-digit episode id codec and the virtual anime id scheme.
//!
//! Real library rows use database-assigned `i64` ids directly. Fallback
//! results that have not (yet) been materialized into the library are
//! addressed with synthetic ids built from this codec so the external
//! dandanplay-compatible API never has to distinguish the two cases:
//!
//! - Virtual anime id: a 6-digit id starting at `900000`.
//! - Episode id: a fixed 14-digit decimal value, `25 || anime_id(06) ||
//!   source_order(02) || episode_number(04)`. A `episode_number` of
//!   `0000` denotes "the whole show" cache record rather than a single
//!   episode.

use crate::GatewayError;

/// First virtual anime id handed out by the fallback engine.
pub const VIRTUAL_ANIME_ID_BASE: i64 = 900_000;

const EPISODE_ID_PREFIX: i64 = 25;
const EPISODE_ID_LEN: usize = 14;

/// The decoded components of a 14-digit episode id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeIdParts {
    pub anime_id: i64,
    pub source_order: i32,
    pub episode_number: i32,
}

impl EpisodeIdParts {
    /// Whether this id's `episode_number` denotes the whole-show cache
    /// record rather than a single episode.
    pub fn is_whole_show(&self) -> bool {
        self.episode_number == 0
    }

    /// Encode these parts into the fixed-width 14-digit episode id.
    ///
    /// Returns an error if any field overflows its allotted width:
    /// `anime_id` must fit in 6 digits, `source_order` in 2, and
    /// `episode_number` in 4.
    pub fn encode(&self) -> crate::Result<i64> {
        if !(0..=999_999).contains(&self.anime_id) {
            return Err(GatewayError::InputInvalid(format!(
                "anime_id {} does not fit in 6 digits",
                self.anime_id
            )));
        }
        if !(0..=99).contains(&self.source_order) {
            return Err(GatewayError::InputInvalid(format!(
                "source_order {} does not fit in 2 digits",
                self.source_order
            )));
        }
        if !(0..=9999).contains(&self.episode_number) {
            return Err(GatewayError::InputInvalid(format!(
                "episode_number {} does not fit in 4 digits",
                self.episode_number
            )));
        }
        let encoded = EPISODE_ID_PREFIX * 1_000_000_000_000
            + self.anime_id * 1_000_000
            + (self.source_order as i64) * 10_000
            + self.episode_number as i64;
        Ok(encoded)
    }
}

/// Decode a 14-digit episode id into its components.
///
/// Rejects any value whose decimal length is not exactly 14, and any
/// value not beginning with the fixed `25` prefix.
pub fn decode_episode_id(episode_id: i64) -> crate::Result<EpisodeIdParts> {
    let digits = episode_id.to_string();
    if digits.len() != EPISODE_ID_LEN {
        return Err(GatewayError::InputInvalid(format!(
            "episode id {episode_id} must have exactly {EPISODE_ID_LEN} digits"
        )));
    }
    let prefix = episode_id / 1_000_000_000_000;
    if prefix != EPISODE_ID_PREFIX {
        return Err(GatewayError::InputInvalid(format!(
            "episode id {episode_id} does not start with prefix {EPISODE_ID_PREFIX}"
        )));
    }
    let remainder = episode_id % 1_000_000_000_000;
    let anime_id = remainder / 1_000_000;
    let remainder = remainder % 1_000_000;
    let source_order = remainder / 10_000;
    let episode_number = remainder % 10_000;
    Ok(EpisodeIdParts {
        anime_id,
        source_order: source_order as i32,
        episode_number: episode_number as i32,
    })
}

/// Whether an anime id falls in the virtual (not-yet-materialized) range.
pub fn is_virtual_anime_id(anime_id: i64) -> bool {
    anime_id >= VIRTUAL_ANIME_ID_BASE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let parts = EpisodeIdParts {
            anime_id: 900_123,
            source_order: 1,
            episode_number: 42,
        };
        let encoded = parts.encode().unwrap();
        assert_eq!(encoded.to_string().len(), 14);
        let decoded = decode_episode_id(encoded).unwrap();
        assert_eq!(decoded, parts);
    }

    #[test]
    fn whole_show_uses_zero_episode_number() {
        let parts = EpisodeIdParts {
            anime_id: 900_001,
            source_order: 0,
            episode_number: 0,
        };
        assert!(parts.is_whole_show());
        let encoded = parts.encode().unwrap();
        let decoded = decode_episode_id(encoded).unwrap();
        assert!(decoded.is_whole_show());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(decode_episode_id(123).is_err());
        assert!(decode_episode_id(2_500_000_000_000).is_err()); // 13 digits
    }

    #[test]
    fn rejects_wrong_prefix() {
        // Same width as a valid id but starting with 26 instead of 25.
        let bad = 26_000_000_000_000i64;
        assert!(decode_episode_id(bad).is_err());
    }

    #[test]
    fn encode_rejects_overflowing_fields() {
        let too_big_anime = EpisodeIdParts {
            anime_id: 1_000_000,
            source_order: 0,
            episode_number: 0,
        };
        assert!(too_big_anime.encode().is_err());

        let too_big_source = EpisodeIdParts {
            anime_id: 900_000,
            source_order: 100,
            episode_number: 0,
        };
        assert!(too_big_source.encode().is_err());

        let too_big_episode = EpisodeIdParts {
            anime_id: 900_000,
            source_order: 0,
            episode_number: 10_000,
        };
        assert!(too_big_episode.encode().is_err());
    }

    #[test]
    fn virtual_anime_id_range() {
        assert!(!is_virtual_anime_id(1));
        assert!(!is_virtual_anime_id(899_999));
        assert!(is_virtual_anime_id(900_000));
        assert!(is_virtual_anime_id(900_001));
    }
}
