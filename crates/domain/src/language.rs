use serde::{Deserialize, Serialize};

/// Languages the assistant can converse in.
///
/// Detection is deterministic (script + keyword scan, see the gateway's
/// language service); the enum is shared so templates, extractors, and
/// the state echo all agree on the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ru,
    En,
    Es,
    He,
}

impl Language {
    /// Two-letter ISO 639-1 code.
    pub fn code(self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
            Language::Es => "es",
            Language::He => "he",
        }
    }

    /// Parse a two-letter code; unknown codes map to English.
    pub fn from_code(code: &str) -> Self {
        match code {
            "ru" => Language::Ru,
            "es" => Language::Es,
            "he" => Language::He,
            _ => Language::En,
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::Es
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for lang in [Language::Ru, Language::En, Language::Es, Language::He] {
            assert_eq!(Language::from_code(lang.code()), lang);
        }
    }

    #[test]
    fn unknown_code_defaults_to_english() {
        assert_eq!(Language::from_code("fr"), Language::En);
    }
}
