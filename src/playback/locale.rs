/// Locale used for synthesized speech when the question names no language.
pub const DEFAULT_LOCALE: &str = "en-US";

const LOCALES: &[(&str, &str)] = &[
    ("ar", "ar-SA"),
    ("de", "de-DE"),
    ("en", "en-US"),
    ("es", "es-ES"),
    ("fr", "fr-FR"),
    ("hi", "hi-IN"),
    ("it", "it-IT"),
    ("ja", "ja-JP"),
    ("ko", "ko-KR"),
    ("nl", "nl-NL"),
    ("pl", "pl-PL"),
    ("pt", "pt-BR"),
    ("ru", "ru-RU"),
    ("sv", "sv-SE"),
    ("tr", "tr-TR"),
    ("zh", "zh-CN"),
];

/// Map a question language to a speech locale. Full tags pass through,
/// bare codes and common names go through the table.
pub fn locale_for_language(language: &str) -> String {
    let trimmed = language.trim();
    if trimmed.is_empty() {
        return DEFAULT_LOCALE.to_string();
    }
    if trimmed.contains('-') || trimmed.contains('_') {
        return trimmed.replace('_', "-");
    }

    let lower = trimmed.to_ascii_lowercase();
    let code = match lower.as_str() {
        "english" => "en",
        "spanish" | "español" => "es",
        "french" | "français" => "fr",
        "german" | "deutsch" => "de",
        "italian" => "it",
        "portuguese" | "português" => "pt",
        "japanese" => "ja",
        "chinese" | "mandarin" => "zh",
        "korean" => "ko",
        "arabic" => "ar",
        "russian" => "ru",
        "dutch" => "nl",
        other => other,
    };

    LOCALES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, locale)| locale.to_string())
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_codes_names_and_tags() {
        assert_eq!(locale_for_language("es"), "es-ES");
        assert_eq!(locale_for_language("FR"), "fr-FR");
        assert_eq!(locale_for_language("Portuguese"), "pt-BR");
        assert_eq!(locale_for_language("en_GB"), "en-GB");
        assert_eq!(locale_for_language(""), DEFAULT_LOCALE);
        assert_eq!(locale_for_language("klingon"), DEFAULT_LOCALE);
    }
}
