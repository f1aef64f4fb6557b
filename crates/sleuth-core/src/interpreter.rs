//! Interpretation of generation-backend replies.
//!
//! Recognizes bracketed tokens emitted by a cooperative backend:
//! ```text
//! [STATUS:CONTINUING] or [STATUS:COMPLETE]
//! [ACTION:what happens next]
//! [FINDING:key=value]
//! [ANSWER:final conclusion]
//! ```
//!
//! Backends do not reliably follow this grammar, so each field degrades
//! through an ordered fallback chain (token, then natural-language patterns,
//! then a default). Parsing never fails.

use regex::Regex;
use sleuth_proto::{FieldSource, Findings, Interpretation, InterpretationStatus, Sources};
use std::sync::LazyLock;
use tracing::debug;

/// Action recorded when nothing in the reply describes one.
pub const DEFAULT_ACTION: &str = "Analyzing investigation";

/// Shortest trailing sentence accepted as an answer.
const MIN_ANSWER_SENTENCE_LEN: usize = 10;

/// Lower-case phrases that mark a reply as conclusive when no status token is present.
const COMPLETION_PHRASES: &[&str] = &[
    "investigation complete",
    "analysis complete",
    "concluded",
    "final answer",
    "root cause identified",
    "the root cause is",
    "solution found",
    "issue resolved",
    "in conclusion",
    "the cause is",
    "the problem is",
    "my recommendation is",
];

static STATUS_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[STATUS:(?i:(CONTINUING|COMPLETE))\]").unwrap());

static ACTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ACTION:([^\]]+)\]").unwrap());

static FINDING_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[FINDING:([^=\]]+)=([^\]]+)\]").unwrap());

static ANSWER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ANSWER:([^\]]+)\]").unwrap());

static ACTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)\bI (?:will|am|need to|should) ([^.\n]+)",
        r"(?i)\bNext,? I will ([^.\n]+)",
        r"(?i)(?:\bLet me|\bI'll) ([^.\n]+)",
        r"(?i)\bThe next step is to ([^.\n]+)",
        r"(?i)\bI recommend ([^.\n]+)",
    ])
});

static METRIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)\b([a-z]\w*(?:[ \t]+[a-z]\w*){0,3}?)[ \t]+(?:is|at|shows?|indicates?)(?:[ \t]+(?:at|about|around))?[ \t]+(\d+(?:\.\d+)?%?(?:ms|mb|gb)?)",
        r"(?i)\b([a-z]\w*(?:[ \t]+[a-z]\w*){0,3}?):[ \t]*(\d+(?:\.\d+)?%?(?:ms|mb|gb)?)",
        r"(?i)\b([a-z]\w*(?:[ \t]+[a-z]\w*){0,3}?)[ \t]+of[ \t]+(\d+(?:\.\d+)?%?(?:ms|mb|gb)?)",
    ])
});

static CONCLUSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)(?:In conclusion|Therefore|The (?:root )?cause is|The (?:issue|problem) is|This is (?:caused by|due to))[:,]?\s*([^.]+)",
        r"(?i)(?:I recommend|The solution is|To fix this)[:,]?\s*([^.]+)",
        r"(?i)(?:The investigation shows|Analysis reveals)[:,]?\s*([^.]+)",
    ])
});

static ANY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?:STATUS|ACTION|FINDING|ANSWER):[^\]]*\]").unwrap());

static SENTENCE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

/// Turns raw backend text into an [`Interpretation`].
#[derive(Debug, Clone)]
pub struct ResponseInterpreter {
    default_action: String,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self {
            default_action: DEFAULT_ACTION.to_string(),
        }
    }
}

impl ResponseInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the placeholder action used when none can be extracted.
    pub fn with_default_action(mut self, action: impl Into<String>) -> Self {
        self.default_action = action.into();
        self
    }

    /// Interprets a reply. Pure: the same input always yields the same output.
    ///
    /// Terminal escape sequences are stripped first since CLI backends
    /// colourise their output.
    pub fn parse(&self, reply: &str) -> Interpretation {
        let text = strip_ansi_escapes::strip_str(reply);

        let (status, status_source) = Self::extract_status(&text);
        let (action, action_source) = self.extract_action(&text);
        let (findings, findings_source) = Self::extract_findings(&text);
        let (answer, answer_source) = if status.is_complete() {
            match Self::extract_answer(&text) {
                Some((answer, source)) => (Some(answer), Some(source)),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        let interpretation = Interpretation {
            status,
            action,
            findings,
            answer,
            sources: Sources {
                status: status_source,
                action: action_source,
                findings: findings_source,
                answer: answer_source,
            },
        };
        debug!(
            status = %interpretation.status,
            findings = interpretation.findings.len(),
            has_answer = interpretation.answer.is_some(),
            "Interpreted backend reply"
        );
        interpretation
    }

    fn extract_status(text: &str) -> (InterpretationStatus, FieldSource) {
        if let Some(caps) = STATUS_TOKEN.captures(text) {
            let status = if caps[1].eq_ignore_ascii_case("complete") {
                InterpretationStatus::Complete
            } else {
                InterpretationStatus::Continuing
            };
            return (status, FieldSource::Token);
        }

        let lowered = text.to_lowercase();
        if COMPLETION_PHRASES.iter().any(|&p| lowered.contains(p)) {
            (InterpretationStatus::Complete, FieldSource::Heuristic)
        } else {
            (InterpretationStatus::Continuing, FieldSource::Default)
        }
    }

    fn extract_action(&self, text: &str) -> (String, FieldSource) {
        if let Some(caps) = ACTION_TOKEN.captures(text) {
            let action = caps[1].trim();
            if !action.is_empty() {
                return (action.to_string(), FieldSource::Token);
            }
        }

        first_capture(&ACTION_PATTERNS, text)
            .map(|action| (action, FieldSource::Pattern))
            .unwrap_or_else(|| (self.default_action.clone(), FieldSource::Default))
    }

    fn extract_findings(text: &str) -> (Findings, FieldSource) {
        let mut findings = Findings::new();
        for caps in FINDING_TOKEN.captures_iter(text) {
            let key = caps[1].trim();
            if !key.is_empty() {
                findings.insert(key, caps[2].trim());
            }
        }
        if !findings.is_empty() {
            return (findings, FieldSource::Token);
        }

        // Metric fallback only runs when the reply carried no finding tokens.
        for pattern in METRIC_PATTERNS.iter() {
            for caps in pattern.captures_iter(text) {
                let label = normalize_label(&caps[1]);
                if !label.is_empty() {
                    findings.insert(label, caps[2].trim());
                }
            }
        }

        if findings.is_empty() {
            (findings, FieldSource::Default)
        } else {
            (findings, FieldSource::Pattern)
        }
    }

    fn extract_answer(text: &str) -> Option<(String, FieldSource)> {
        if let Some(caps) = ANSWER_TOKEN.captures(text) {
            let answer = caps[1].trim();
            if !answer.is_empty() {
                return Some((answer.to_string(), FieldSource::Token));
            }
        }

        if let Some(answer) = first_capture(&CONCLUSION_PATTERNS, text) {
            return Some((answer, FieldSource::Pattern));
        }

        let prose = ANY_TOKEN.replace_all(text, " ");
        SENTENCE_BREAK
            .split(prose.trim())
            .map(str::trim)
            .filter(|s| s.chars().count() > MIN_ANSWER_SENTENCE_LEN)
            .last()
            .map(|s| (s.to_string(), FieldSource::Heuristic))
    }
}

/// Returns the first non-empty capture group 1 across `patterns`, in order.
fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        let caps = pattern.captures(text)?;
        let value = caps.get(1)?.as_str().trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// "The CPU Usage" -> "cpu_usage"
fn normalize_label(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let words = match words.split_first() {
        Some((&"the", rest)) if !rest.is_empty() => rest,
        _ => &words[..],
    };
    words.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Interpretation {
        ResponseInterpreter::new().parse(text)
    }

    #[test]
    fn test_status_token_continuing() {
        let result = parse("[STATUS:CONTINUING]\n[ACTION:Checking logs]");
        assert_eq!(result.status, InterpretationStatus::Continuing);
        assert_eq!(result.sources.status, FieldSource::Token);
        assert_eq!(result.action, "Checking logs");
        assert_eq!(result.sources.action, FieldSource::Token);
        assert!(result.answer.is_none());
    }

    #[test]
    fn test_status_token_value_is_case_insensitive() {
        assert_eq!(parse("[STATUS:complete]").status, InterpretationStatus::Complete);
        assert_eq!(parse("[STATUS:Continuing]").status, InterpretationStatus::Continuing);
        // Token body itself is case-sensitive.
        assert_eq!(parse("[status:complete]").sources.status, FieldSource::Default);
    }

    #[test]
    fn test_status_token_wins_over_phrases() {
        let result = parse("[STATUS:COMPLETE] I will keep continuing to gather more data.");
        assert_eq!(result.status, InterpretationStatus::Complete);

        let result = parse("[STATUS:CONTINUING] In conclusion, nothing is certain yet.");
        assert_eq!(result.status, InterpretationStatus::Continuing);
    }

    #[test]
    fn test_status_phrase_fallback() {
        let result = parse("Root cause identified: the cache is cold.");
        assert_eq!(result.status, InterpretationStatus::Complete);
        assert_eq!(result.sources.status, FieldSource::Heuristic);

        let result = parse("Still looking at the graphs.");
        assert_eq!(result.status, InterpretationStatus::Continuing);
        assert_eq!(result.sources.status, FieldSource::Default);
    }

    #[test]
    fn test_findings_tokens_in_order() {
        let result = parse("[FINDING:a=1] [FINDING:b=2]");
        assert_eq!(result.findings.keys(), vec!["a", "b"]);
        assert_eq!(result.findings.get("a"), Some("1"));
        assert_eq!(result.findings.get("b"), Some("2"));
        assert_eq!(result.sources.findings, FieldSource::Token);
    }

    #[test]
    fn test_findings_duplicate_token_overwrites() {
        let result = parse("[FINDING:a=1] [FINDING:b=2] [FINDING:a=3]");
        let pairs: Vec<_> = result.findings.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "2")]);
    }

    #[test]
    fn test_findings_tokens_suppress_metric_fallback() {
        let result = parse("[FINDING:root_cause=bad deploy]\nCPU usage is 85%");
        assert_eq!(result.findings.len(), 1);
        assert!(result.findings.get("cpu_usage").is_none());
    }

    #[test]
    fn test_findings_metric_fallback() {
        let result = parse("CPU usage is 85%.\nThe p99 latency is at 250ms.\nError rate: 5%");
        assert_eq!(result.sources.findings, FieldSource::Pattern);
        assert_eq!(result.findings.get("cpu_usage"), Some("85%"));
        assert_eq!(result.findings.get("p99_latency"), Some("250ms"));
        assert_eq!(result.findings.get("error_rate"), Some("5%"));
    }

    #[test]
    fn test_recommend_fallback() {
        let result = parse("I recommend restarting the service.");
        assert_eq!(result.status, InterpretationStatus::Continuing);
        assert_eq!(result.action, "restarting the service");
        assert_eq!(result.sources.action, FieldSource::Pattern);
        assert!(result.findings.is_empty());
        assert_eq!(result.sources.findings, FieldSource::Default);
        assert!(result.answer.is_none());
    }

    #[test]
    fn test_action_patterns_in_order() {
        assert_eq!(parse("Next, I will check the load balancer.").action, "check the load balancer");
        assert_eq!(parse("The next step is to inspect the heap.").action, "inspect the heap");
        assert_eq!(parse("Let me pull the traces.").action, "pull the traces");
        assert_eq!(parse("Nothing to see here.").action, DEFAULT_ACTION);
    }

    #[test]
    fn test_custom_default_action() {
        let interpreter = ResponseInterpreter::new().with_default_action("Waiting");
        assert_eq!(interpreter.parse("...").action, "Waiting");
    }

    #[test]
    fn test_answer_token() {
        let result = parse("Done.[STATUS:COMPLETE] Reviewed all data. [ANSWER:Scale up instances.]");
        assert_eq!(result.status, InterpretationStatus::Complete);
        assert_eq!(result.answer.as_deref(), Some("Scale up instances."));
        assert_eq!(result.sources.answer, Some(FieldSource::Token));
    }

    #[test]
    fn test_answer_conclusion_pattern() {
        let result = parse("[STATUS:COMPLETE] The root cause is a leaking connection pool. More later.");
        assert_eq!(result.answer.as_deref(), Some("a leaking connection pool"));
        assert_eq!(result.sources.answer, Some(FieldSource::Pattern));
    }

    #[test]
    fn test_answer_last_sentence_fallback() {
        let result = parse("[STATUS:COMPLETE] Looked around. Memory returned to baseline after rollback.");
        assert_eq!(result.answer.as_deref(), Some("Memory returned to baseline after rollback"));
        assert_eq!(result.sources.answer, Some(FieldSource::Heuristic));

        let result = parse("[STATUS:COMPLETE] The memory leak came from the cache layer. Done.");
        assert_eq!(result.answer.as_deref(), Some("The memory leak came from the cache layer"));
        assert_eq!(result.sources.answer, Some(FieldSource::Heuristic));

        let result = parse("[STATUS:COMPLETE] All good. Done!");
        assert!(result.answer.is_none());
    }

    #[test]
    fn test_answer_only_when_complete() {
        let result = parse("[STATUS:CONTINUING] [ANSWER:premature]");
        assert!(result.answer.is_none());
        assert!(result.sources.answer.is_none());
    }

    #[test]
    fn test_ansi_codes_are_stripped() {
        let result = parse("\x1b[32m[STATUS:COMPLETE]\x1b[0m [ANSWER:\x1b[1mRoll back\x1b[0m]");
        assert_eq!(result.status, InterpretationStatus::Complete);
        assert_eq!(result.answer.as_deref(), Some("Roll back"));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let text = "The error rate is 12%. I will check the deploy history. In conclusion: bad config.";
        let interpreter = ResponseInterpreter::new();
        assert_eq!(interpreter.parse(text), interpreter.parse(text));
    }

    #[test]
    fn test_empty_reply_uses_defaults() {
        let result = parse("");
        assert_eq!(result.status, InterpretationStatus::Continuing);
        assert_eq!(result.action, DEFAULT_ACTION);
        assert!(result.findings.is_empty());
        assert!(result.answer.is_none());
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("The CPU  Usage"), "cpu_usage");
        assert_eq!(normalize_label("the"), "the");
        assert_eq!(normalize_label("Latency"), "latency");
    }
}
