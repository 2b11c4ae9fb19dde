//! Cache-key prefixes. These are a wire-level contract: multiple
//! gateway processes sharing one Redis instance must agree on them
//! byte-for-byte, so they are exposed as constants rather than
//! re-derived per caller.

/// Fallback search session state, keyed by a hash of the query.
pub const FALLBACK_SEARCH: &str = "fallback_search_";
/// Episode binding minted by the fallback engine, keyed by episode id.
pub const FALLBACK_EPISODE: &str = "fallback_episode_";
/// Anime binding minted by the fallback engine, keyed by virtual anime id.
pub const FALLBACK_ANIME: &str = "fallback_anime_";
/// Provider routing info for an episode id.
pub const EPISODE_MAPPING: &str = "episode_mapping_";
/// Raw comment payloads, keyed by episode id.
pub const COMMENTS: &str = "comments_";
/// Downsampled comment buffers, keyed by `<episode_id>_<cap>`.
pub const SAMPLED: &str = "sampled_";
/// Per-token, per-command rate limit cooldown.
pub const COMMAND_COOLDOWN: &str = "command_cooldown_";
/// A token's currently in-flight search session.
pub const TOKEN_SEARCH_TASK: &str = "token_search_task_";
/// A user's last-selected source, keyed by a hash of the user identity.
pub const USER_LAST_BANGUMI: &str = "user_last_bangumi_";

/// Build the `sampled_<episode_id>_<cap>` key for a downsampled buffer.
pub fn sampled_key(episode_id: i64, cap: usize) -> String {
    format!("{SAMPLED}{episode_id}_{cap}")
}

/// Build the `command_cooldown_<token>_<cmd>` key.
pub fn command_cooldown_key(token: &str, command: &str) -> String {
    format!("{COMMAND_COOLDOWN}{token}_{command}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampled_key_matches_wire_format() {
        assert_eq!(sampled_key(42, 500), "sampled_42_500");
    }

    #[test]
    fn command_cooldown_key_matches_wire_format() {
        assert_eq!(command_cooldown_key("tok", "refresh"), "command_cooldown_tok_refresh");
    }
}
