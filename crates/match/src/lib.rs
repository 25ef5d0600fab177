pub mod matcher;
pub mod normalize;
pub(crate) mod util;

pub use matcher::{
    Matcher, MatcherConfig, ALIAS_CONFIDENCE, EXACT_CONFIDENCE, FUZZY_SCALE,
    RUNNER_UP_ALIAS_CONFIDENCE,
};
pub use normalize::{normalize, normalize_description, normalize_sku, normalize_unit, NormalizedLine};
