//! # Danmaku Gateway Fallback
//!
//! C8: the fallback engine. When a search or match request can't be
//! satisfied from the library, this crate drives the scraper adapters,
//! mints addressable virtual ids for not-yet-materialized results, and
//! (once a fallback resolves) persists the outcome into the library so
//! the next request for the same title is a direct hit.

pub mod chconvert;
pub mod comments;
pub mod match_fallback;
pub mod repository;
pub mod search_fallback;
pub mod session;
pub mod virtual_id;

pub use chconvert::{convert as convert_ch, ChConvert};
pub use comments::{fetch_comments, predownload_next_episode, sample_evenly};
pub use match_fallback::{
    is_blacklisted_filename, materialize, probe_and_select, run_match_fallback, score_candidates, AiMatcher,
    MatchQuery, MatchResult, ScoredCandidate, DEDUP_WINDOW,
};
pub use repository::{InMemoryLibraryRepository, LibraryRepository, PgLibraryRepository};
pub use search_fallback::{run_search_fallback, token_is_authorized, FallbackSearchItem, SEARCHING_PLACEHOLDER_ID};
pub use session::{FallbackSession, SessionState};
pub use virtual_id::{
    bind_anime, bind_episode, lookup_anime, lookup_episode, AnimeBinding, EpisodeBinding, VirtualIdMinter,
    BINDING_TTL, WHOLE_SHOW_TTL,
};
