//! Map a spoken transcript to the best matching option.
//!
//! Strategies apply in a fixed order and the first hit wins: ordinal
//! ("option two"), yes/no shortcut (two-option permission prompts),
//! direct substring, fuzzy similarity, and finally verbatim passthrough.
//! The function is pure and deterministic.

use crate::events::{BlockReason, MatchMethod, MatchResult};

/// Spoken ordinal → option index.
const ORDINAL_WORDS: &[(&str, usize)] = &[
    ("one", 0),
    ("first", 0),
    ("1", 0),
    ("two", 1),
    ("second", 1),
    ("2", 1),
    ("three", 2),
    ("third", 2),
    ("3", 2),
    ("four", 3),
    ("fourth", 3),
    ("4", 3),
    ("five", 4),
    ("fifth", 4),
    ("5", 4),
    ("six", 5),
    ("sixth", 5),
    ("6", 5),
    ("seven", 6),
    ("seventh", 6),
    ("7", 6),
    ("eight", 7),
    ("eighth", 7),
    ("8", 7),
    ("nine", 8),
    ("ninth", 8),
    ("9", 8),
    ("ten", 9),
    ("tenth", 9),
    ("10", 9),
];

/// Filler words stripped before ordinal lookup.
const ORDINAL_STRIP_WORDS: &[&str] = &["option", "the", "number", "pick"];

const YES_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "allow", "approve", "accept", "ok", "okay",
];

const NO_WORDS: &[&str] = &[
    "no", "nah", "nope", "deny", "reject", "decline", "refuse", "block",
];

/// Match a transcript against the available options.
///
/// With no options the transcript is returned verbatim at full
/// confidence; otherwise the strategy chain runs in priority order.
pub fn match_response(
    transcript: &str,
    options: Option<&[String]>,
    block_reason: Option<BlockReason>,
    fuzzy_threshold: f32,
) -> MatchResult {
    let options = match options {
        Some(options) if !options.is_empty() => options,
        _ => return verbatim(transcript),
    };

    if let Some(result) = try_ordinal(transcript, options) {
        return result;
    }
    if let Some(result) = try_yes_no(transcript, options, block_reason) {
        return result;
    }
    if let Some(result) = try_direct(transcript, options) {
        return result;
    }
    if let Some(result) = try_fuzzy(transcript, options, fuzzy_threshold) {
        return result;
    }
    verbatim(transcript)
}

fn verbatim(transcript: &str) -> MatchResult {
    MatchResult {
        matched_text: transcript.trim().to_string(),
        confidence: 1.0,
        method: MatchMethod::Verbatim,
    }
}

/// "option two", "the second one", "2" → `options[1]`.
fn try_ordinal(transcript: &str, options: &[String]) -> Option<MatchResult> {
    let lowered = transcript.to_lowercase();
    let words = lowered
        .split_whitespace()
        .filter(|w| !ORDINAL_STRIP_WORDS.contains(w));

    for word in words {
        let index = ORDINAL_WORDS
            .iter()
            .find(|(name, _)| *name == word)
            .map(|(_, index)| *index);
        if let Some(index) = index {
            if index < options.len() {
                return Some(MatchResult {
                    matched_text: options[index].clone(),
                    confidence: 0.95,
                    method: MatchMethod::Ordinal,
                });
            }
        }
    }
    None
}

/// Affirmative/negative shortcut for two-option permission prompts.
fn try_yes_no(
    transcript: &str,
    options: &[String],
    block_reason: Option<BlockReason>,
) -> Option<MatchResult> {
    if options.len() != 2 || block_reason != Some(BlockReason::PermissionPrompt) {
        return None;
    }

    let lowered = transcript.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    let index = if words.iter().any(|w| YES_WORDS.contains(w)) {
        0
    } else if words.iter().any(|w| NO_WORDS.contains(w)) {
        1
    } else {
        return None;
    };

    Some(MatchResult {
        matched_text: options[index].clone(),
        confidence: 0.9,
        method: MatchMethod::YesNo,
    })
}

/// Case-insensitive substring containment in either direction; the
/// longest matching option wins.
fn try_direct(transcript: &str, options: &[String]) -> Option<MatchResult> {
    let transcript_lower = transcript.to_lowercase();

    let best = options
        .iter()
        .filter(|option| {
            let option_lower = option.to_lowercase();
            option_lower.contains(&transcript_lower) || transcript_lower.contains(&option_lower)
        })
        .max_by_key(|option| option.len())?;

    Some(MatchResult {
        matched_text: best.clone(),
        confidence: 0.85,
        method: MatchMethod::Direct,
    })
}

/// Normalized similarity ratio against each option; best match wins when
/// it clears the threshold.
fn try_fuzzy(transcript: &str, options: &[String], threshold: f32) -> Option<MatchResult> {
    let transcript_lower = transcript.to_lowercase();

    let (best_option, best_ratio) = options
        .iter()
        .map(|option| {
            let ratio = similar::TextDiff::from_chars(
                transcript_lower.as_str(),
                option.to_lowercase().as_str(),
            )
            .ratio();
            (option, ratio)
        })
        .max_by(|(_, a), (_, b)| a.total_cmp(b))?;

    if best_ratio >= threshold {
        Some(MatchResult {
            matched_text: best_option.clone(),
            confidence: best_ratio,
            method: MatchMethod::Fuzzy,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f32 = 0.6;

    fn options(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_options_returns_verbatim() {
        let result = match_response("  deploy it  ", None, None, THRESHOLD);
        assert_eq!(result.method, MatchMethod::Verbatim);
        assert_eq!(result.matched_text, "deploy it");
        assert!((result.confidence - 1.0).abs() < f32::EPSILON);

        let empty: Vec<String> = vec![];
        let result = match_response("anything", Some(&empty), None, THRESHOLD);
        assert_eq!(result.method, MatchMethod::Verbatim);
    }

    #[test]
    fn ordinal_words_select_by_index() {
        let opts = options(&["RS256", "HS256", "ES512"]);

        let result = match_response("option two", Some(&opts), None, THRESHOLD);
        assert_eq!(result.method, MatchMethod::Ordinal);
        assert_eq!(result.matched_text, "HS256");
        assert!((result.confidence - 0.95).abs() < 1e-6);

        assert_eq!(
            match_response("the first one", Some(&opts), None, THRESHOLD).matched_text,
            "RS256"
        );
        assert_eq!(
            match_response("pick number 3", Some(&opts), None, THRESHOLD).matched_text,
            "ES512"
        );
    }

    #[test]
    fn ordinal_out_of_range_falls_through() {
        let opts = options(&["only"]);
        let result = match_response("five", Some(&opts), None, THRESHOLD);
        assert_ne!(result.method, MatchMethod::Ordinal);
    }

    #[test]
    fn yes_no_applies_only_to_two_option_permission_prompts() {
        let opts = options(&["Allow", "Deny"]);

        let yes = match_response(
            "yeah sure",
            Some(&opts),
            Some(BlockReason::PermissionPrompt),
            THRESHOLD,
        );
        assert_eq!(yes.method, MatchMethod::YesNo);
        assert_eq!(yes.matched_text, "Allow");
        assert!((yes.confidence - 0.9).abs() < 1e-6);

        let no = match_response(
            "nope",
            Some(&opts),
            Some(BlockReason::PermissionPrompt),
            THRESHOLD,
        );
        assert_eq!(no.matched_text, "Deny");

        // Wrong reason: the shortcut is skipped.
        let question = match_response(
            "yes",
            Some(&opts),
            Some(BlockReason::Question),
            THRESHOLD,
        );
        assert_ne!(question.method, MatchMethod::YesNo);

        // Three options: skipped.
        let three = options(&["Allow", "Deny", "Ask later"]);
        let result = match_response(
            "yes",
            Some(&three),
            Some(BlockReason::PermissionPrompt),
            THRESHOLD,
        );
        assert_ne!(result.method, MatchMethod::YesNo);
    }

    #[test]
    fn ordinal_beats_yes_no() {
        let opts = options(&["Allow", "Deny"]);
        let result = match_response(
            "yes option two",
            Some(&opts),
            Some(BlockReason::PermissionPrompt),
            THRESHOLD,
        );
        assert_eq!(result.method, MatchMethod::Ordinal);
        assert_eq!(result.matched_text, "Deny");
    }

    #[test]
    fn direct_substring_matches_in_both_directions() {
        let opts = options(&["Run tests", "Skip"]);

        let contains = match_response("please run tests now", Some(&opts), None, THRESHOLD);
        assert_eq!(contains.method, MatchMethod::Direct);
        assert_eq!(contains.matched_text, "Run tests");
        assert!((contains.confidence - 0.85).abs() < 1e-6);

        // Transcript contained in the option.
        let contained = match_response("skip", Some(&opts), None, THRESHOLD);
        assert_eq!(contained.method, MatchMethod::Direct);
        assert_eq!(contained.matched_text, "Skip");
    }

    #[test]
    fn direct_prefers_the_longest_matching_option() {
        let opts = options(&["test", "test everything"]);
        let result = match_response("test everything please", Some(&opts), None, THRESHOLD);
        assert_eq!(result.matched_text, "test everything");
    }

    #[test]
    fn fuzzy_matches_close_transcripts() {
        let opts = options(&["Postgres", "MySQL"]);
        let result = match_response("poztgres", Some(&opts), None, THRESHOLD);
        assert_eq!(result.method, MatchMethod::Fuzzy);
        assert_eq!(result.matched_text, "Postgres");
        assert!(result.confidence >= THRESHOLD);
    }

    #[test]
    fn unmatchable_transcript_falls_back_to_verbatim() {
        let opts = options(&["Alpha", "Beta"]);
        let result = match_response(
            "completely unrelated utterance",
            Some(&opts),
            None,
            THRESHOLD,
        );
        assert_eq!(result.method, MatchMethod::Verbatim);
        assert_eq!(result.matched_text, "completely unrelated utterance");
    }

    #[test]
    fn matching_is_deterministic() {
        let opts = options(&["RS256", "HS256"]);
        let a = match_response("option one", Some(&opts), None, THRESHOLD);
        let b = match_response("option one", Some(&opts), None, THRESHOLD);
        assert_eq!(a, b);
    }
}
