//! Simplified/traditional Chinese comment text conversion.
//!
//! TODO: this only covers a small curated set of characters that show
//! up disproportionately often in danmaku text (pronouns, common verbs,
//! a handful of show-title characters). A full OpenCC-equivalent
//! mapping is out of reach without vendoring OpenCC's dictionaries,
//! which this pack carries no crate for.

/// Which direction (if any) to rewrite comment text before it is
/// handed back to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChConvert {
    #[default]
    None,
    ToSimplified,
    ToTraditional,
}

const SIMPLIFIED_TO_TRADITIONAL: &[(char, char)] = &[
    ('这', '這'),
    ('里', '裡'),
    ('说', '說'),
    ('们', '們'),
    ('为', '為'),
    ('国', '國'),
    ('学', '學'),
    ('会', '會'),
    ('没', '沒'),
    ('过', '過'),
    ('现', '現'),
    ('实', '實'),
    ('时', '時'),
    ('开', '開'),
    ('发', '發'),
    ('个', '個'),
    ('来', '來'),
    ('爱', '愛'),
];

fn convert_with(text: &str, table: &[(char, char)], reverse: bool) -> String {
    text.chars()
        .map(|c| {
            table
                .iter()
                .find(|(s, t)| if reverse { *t == c } else { *s == c })
                .map(|(s, t)| if reverse { *s } else { *t })
                .unwrap_or(c)
        })
        .collect()
}

/// Apply `mode` to `text`, returning it unchanged for [`ChConvert::None`].
pub fn convert(text: &str, mode: ChConvert) -> String {
    match mode {
        ChConvert::None => text.to_string(),
        ChConvert::ToTraditional => convert_with(text, SIMPLIFIED_TO_TRADITIONAL, false),
        ChConvert::ToSimplified => convert_with(text, SIMPLIFIED_TO_TRADITIONAL, true),
    }
}
