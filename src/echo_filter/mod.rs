//! Strips TTS echo that leaks into the final transcription.
//!
//! Invoked once at session end when both a final transcript and the spoken
//! TTS text exist. Two stages: a prefix-run strip, then a fuzzy
//! whole-sentence strip.

const PREFIX_MIN_RUN: usize = 3;
const FUZZY_MIN_WORDS: usize = 4;
const SILENCE: &str = "(silence)";

fn tokenize(s: &str) -> Vec<String> {
    s.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Longest prefix of `transcript` words matching a run of `tts` words
/// starting at any index. Returns the run length (0 if none ≥ 1).
fn longest_prefix_run(transcript: &[String], tts: &[String]) -> usize {
    let mut best = 0;
    for start in 0..tts.len() {
        let mut len = 0;
        while len < transcript.len()
            && start + len < tts.len()
            && transcript[len] == tts[start + len]
        {
            len += 1;
        }
        best = best.max(len);
    }
    best
}

/// Apply the echo-text filter to `transcript`, given the text that was
/// spoken via TTS during the same turn.
pub fn filter_echo(transcript: &str, tts_text: &str) -> String {
    let transcript_words = tokenize(transcript);
    let tts_words = tokenize(tts_text);

    if transcript_words.is_empty() || tts_words.is_empty() {
        return transcript.to_string();
    }

    // Stage 1: prefix-run strip.
    let run = longest_prefix_run(&transcript_words, &tts_words);
    let (remaining_words, stripped) = if run >= PREFIX_MIN_RUN {
        (transcript_words[run..].to_vec(), true)
    } else {
        (transcript_words.clone(), false)
    };

    if stripped && remaining_words.is_empty() {
        return SILENCE.to_string();
    }

    // Stage 2: fuzzy whole-sentence strip.
    if remaining_words.len() >= FUZZY_MIN_WORDS {
        let tts_set: std::collections::HashSet<&str> =
            tts_words.iter().map(|s| s.as_str()).collect();
        let overlap = remaining_words
            .iter()
            .filter(|w| tts_set.contains(w.as_str()))
            .count();
        if overlap * 2 > remaining_words.len() {
            return SILENCE.to_string();
        }
    }

    if stripped {
        remaining_words.join(" ")
    } else {
        transcript.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_three_word_prefix_run() {
        let out = filter_echo("Good morning friend how are you", "Good morning friend");
        assert_eq!(out, "how are you");
    }

    #[test]
    fn short_prefix_run_is_not_applied() {
        // Only a 1-word run ("the") matches; the prefix stage needs >= 3,
        // and the low word overlap means the fuzzy stage doesn't fire either.
        let out = filter_echo("the weather is nice today", "the quick brown fox");
        assert_eq!(out, "the weather is nice today");
    }

    #[test]
    fn prefix_strip_leaving_nothing_is_silence() {
        let out = filter_echo("good morning friend", "good morning friend");
        assert_eq!(out, "(silence)");
    }

    #[test]
    fn fuzzy_overlap_over_half_is_silence() {
        let out = filter_echo(
            "morning good friend you are",
            "good morning friend how are you",
        );
        assert_eq!(out, "(silence)");
    }

    #[test]
    fn unrelated_transcript_passes_through() {
        let out = filter_echo("stop talking", "The quick brown fox");
        assert_eq!(out, "stop talking");
    }

    #[test]
    fn filter_is_idempotent() {
        let tts = "Good morning friend";
        let once = filter_echo("Good morning friend how are you", tts);
        let twice = filter_echo(&once, tts);
        assert_eq!(once, twice);
    }
}
