use regex::Regex;
use std::sync::OnceLock;

/// Strip stage directions such as `[pause]` or `(2s)` and collapse
/// whitespace so a listening script can be handed to a synthesizer.
pub fn speakable_script(script: &str) -> String {
    static CUE_RE: OnceLock<Regex> = OnceLock::new();
    let re = CUE_RE.get_or_init(|| {
        Regex::new(r"\[[^\]]*\]|\(\d+(?:\.\d+)?\s*s\)").expect("valid cue regex")
    });
    let stripped = re.replace_all(script, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
