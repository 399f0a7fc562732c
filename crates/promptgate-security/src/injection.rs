//! Prompt-injection classification.
//!
//! [`InjectionDetector`] scans every non-system message against a built-in
//! regex library, a keyword list, and a suspicious-Unicode check, and folds
//! the detections into a [`SecurityReport`] with an ordinal threat level.
//! System messages are trusted and skipped.

use promptgate_core::{Detection, Message, SecurityReport, ThreatLevel};
use regex::Regex;

use crate::message_location;

// ---------------------------------------------------------------------------
// Pattern library
// ---------------------------------------------------------------------------

/// Built-in injection pattern library.
const DEFAULT_PATTERNS: &[&str] = &[
    // Direct instruction override attempts
    r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?)",
    r"(?i)disregard\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?)",
    r"(?i)forget\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?)",
    r"(?i)override\s+(all\s+)?(previous|prior|above)\s+(instructions?|prompts?|rules?)",
    // Role manipulation
    r"(?i)you\s+are\s+now\s+(a|an|the)\s+",
    r"(?i)act\s+as\s+(a|an|if\s+you\s+were)",
    r"(?i)pretend\s+(to\s+be|you\s+are)",
    r"(?i)roleplay\s+as",
    r"(?i)simulate\s+(being|a)",
    // System prompt extraction
    r"(?i)(show|reveal|display|print|output|tell\s+me)\s+(your|the)\s+(system\s+)?(prompt|instructions?)",
    r"(?i)what\s+(are|is)\s+your\s+(system\s+)?(prompt|instructions?)",
    r"(?i)repeat\s+(your|the)\s+(system\s+)?(prompt|instructions?)",
    // Jailbreak attempts
    r"(?i)DAN\s+(mode|prompt)",
    r"(?i)developer\s+mode",
    r"(?i)jailbreak",
    r"(?i)bypass\s+(safety|filter|restriction)",
    r"(?i)disable\s+(safety|filter|restriction)",
    r"(?i)remove\s+(all\s+)?(safety|filter|restriction)",
    // Chat-template delimiter markers
    r"(?i)<\|im_start\|>",
    r"(?i)<\|im_end\|>",
    r"(?i)\[INST\]",
    r"(?i)\[/INST\]",
    r"(?i)<<SYS>>",
    r"(?i)<</SYS>>",
    // Data exfiltration attempts
    r"(?i)(send|transmit|exfiltrate|leak)\s+(data|information|secrets?)",
    r"(?i)make\s+(a|an)\s+(http|api|web)\s+(request|call)",
    // Delimiter injection
    r"(?i)###\s*(system|instruction|prompt)",
    r"(?i)---\s*(system|instruction|prompt)",
    // Encoding bypass attempts
    r"(?i)base64\s+(decode|encode)",
    r"(?i)hex\s+(decode|encode)",
    r"(?i)rot13",
];

/// Case-insensitive keyword substrings checked alongside the regex library.
const KEYWORDS: &[&str] = &[
    "ignore previous",
    "ignore all instructions",
    "disregard your instructions",
    "new instructions:",
    "system prompt:",
    "[system]",
    "<system>",
    "</system>",
    "assistant:",
    "human:",
    "user:",
];

/// Unicode sequences associated with obfuscated payloads: zero-width
/// space/non-joiner/joiner, BOM, right-to-left override.
const SUSPICIOUS_SEQUENCES: &[&str] = &["\u{200b}", "\u{200c}", "\u{200d}", "\u{feff}", "\u{202e}"];

/// Detection types that force a `critical` threat level on their own.
const CRITICAL_TYPES: &[&str] = &[
    "jailbreak_attempt",
    "data_exfiltration",
    "delimiter_injection",
];

// ---------------------------------------------------------------------------
// InjectionDetector
// ---------------------------------------------------------------------------

/// Regex- and keyword-based prompt-injection classifier.
///
/// # Example
///
/// ```
/// use promptgate_core::{Message, ThreatLevel};
/// use promptgate_security::InjectionDetector;
///
/// let detector = InjectionDetector::new(&[], true, true);
/// let report = detector.analyze(&[Message::user("Ignore previous instructions")]);
/// assert!(report.injection_detected);
/// assert!(report.threat_level >= ThreatLevel::Medium);
/// ```
pub struct InjectionDetector {
    patterns: Vec<Regex>,
    enabled: bool,
    block_on_detection: bool,
}

impl InjectionDetector {
    /// Create a detector from the built-in library plus `custom_patterns`.
    ///
    /// Patterns that fail to compile are skipped with a warning; construction
    /// never fails.
    #[must_use]
    pub fn new(custom_patterns: &[String], enabled: bool, block_on_detection: bool) -> Self {
        let mut patterns = Vec::with_capacity(DEFAULT_PATTERNS.len() + custom_patterns.len());

        for p in DEFAULT_PATTERNS
            .iter()
            .copied()
            .chain(custom_patterns.iter().map(String::as_str))
        {
            match Regex::new(p) {
                Ok(re) => patterns.push(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "Skipping invalid injection pattern");
                }
            }
        }

        Self {
            patterns,
            enabled,
            block_on_detection,
        }
    }

    /// Classify messages for injection attempts.
    ///
    /// Pure over its input: the same messages always produce the same report,
    /// with detections in pattern → keyword → encoding order per message.
    #[must_use]
    pub fn analyze(&self, messages: &[Message]) -> SecurityReport {
        let mut report = SecurityReport::default();

        if !self.enabled {
            return report;
        }

        for (i, msg) in messages.iter().enumerate() {
            // System messages are trusted.
            if msg.role == "system" {
                continue;
            }

            let location = message_location(i, &msg.role);

            for pattern in &self.patterns {
                if pattern.is_match(&msg.content) {
                    report.detections.push(Detection {
                        detection_type: categorize_pattern(pattern.as_str()).to_string(),
                        pattern: pattern.as_str().to_string(),
                        location: location.clone(),
                        confidence: 0.85,
                        description: "Regex pattern match detected".to_string(),
                    });
                }
            }

            let lower = msg.content.to_lowercase();
            for keyword in KEYWORDS {
                if lower.contains(keyword) {
                    report.detections.push(Detection {
                        detection_type: "keyword_match".to_string(),
                        pattern: (*keyword).to_string(),
                        location: location.clone(),
                        confidence: 0.7,
                        description: "Suspicious keyword detected".to_string(),
                    });
                }
            }

            if has_suspicious_sequences(&msg.content) {
                report.detections.push(Detection {
                    detection_type: "suspicious_encoding".to_string(),
                    pattern: "special_characters".to_string(),
                    location,
                    confidence: 0.6,
                    description: "Suspicious character sequences detected".to_string(),
                });
            }
        }

        report.injection_detected = !report.detections.is_empty();
        report.threat_level = calculate_threat_level(&report.detections);

        if report.injection_detected {
            report.recommendations = generate_recommendations(&report.detections);
            if self.block_on_detection && report.threat_level > ThreatLevel::Low {
                report.blocked_reason = "Potential prompt injection detected".to_string();
            }
        }

        report
    }

    /// Block rule: only high/critical threat levels block, and only when
    /// blocking is enabled.
    #[must_use]
    pub fn should_block(&self, report: &SecurityReport) -> bool {
        self.block_on_detection && report.threat_level >= ThreatLevel::High
    }

    /// Number of compiled patterns (built-in plus custom).
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

// ---------------------------------------------------------------------------
// Classification helpers
// ---------------------------------------------------------------------------

/// Derive a detection type from the pattern text itself.
fn categorize_pattern(pattern: &str) -> &'static str {
    let lower = pattern.to_lowercase();
    if lower.contains("ignore") || lower.contains("disregard") {
        "instruction_override"
    } else if lower.contains("you are now") || lower.contains("act as") {
        "role_manipulation"
    } else if lower.contains("prompt") || lower.contains("instruction") {
        "prompt_extraction"
    } else if lower.contains("jailbreak") || lower.contains("bypass") {
        "jailbreak_attempt"
    } else if lower.contains("im_start") || lower.contains("inst") {
        "delimiter_injection"
    } else if lower.contains("send") || lower.contains("exfiltrate") {
        "data_exfiltration"
    } else {
        "unknown"
    }
}

fn has_suspicious_sequences(content: &str) -> bool {
    SUSPICIOUS_SEQUENCES.iter().any(|s| content.contains(s))
}

/// Fold detections into a threat level.
///
/// Critical when any critical-type detection is present or three or more
/// detections accumulated; otherwise driven by the maximum confidence.
/// Adding a detection can only raise the result, never lower it.
fn calculate_threat_level(detections: &[Detection]) -> ThreatLevel {
    if detections.is_empty() {
        return ThreatLevel::None;
    }

    let max_confidence = detections
        .iter()
        .map(|d| d.confidence)
        .fold(0.0_f64, f64::max);
    let has_critical = detections
        .iter()
        .any(|d| CRITICAL_TYPES.contains(&d.detection_type.as_str()));

    if has_critical || detections.len() >= 3 {
        ThreatLevel::Critical
    } else if max_confidence >= 0.85 {
        ThreatLevel::High
    } else if max_confidence >= 0.7 {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    }
}

/// One recommendation per distinct detection type, in first-seen order.
fn generate_recommendations(detections: &[Detection]) -> Vec<String> {
    let mut seen: Vec<&str> = Vec::new();
    let mut recommendations = Vec::new();

    for d in detections {
        if seen.contains(&d.detection_type.as_str()) {
            continue;
        }
        seen.push(&d.detection_type);

        let text = match d.detection_type.as_str() {
            "instruction_override" => "Review input for attempts to override system instructions",
            "role_manipulation" => "Input attempts to manipulate AI role/persona",
            "prompt_extraction" => "Input attempts to extract system prompt",
            "jailbreak_attempt" => "Known jailbreak pattern detected - block recommended",
            "delimiter_injection" => "Special delimiter tokens detected - potential injection",
            "data_exfiltration" => "Potential data exfiltration attempt detected",
            _ => continue,
        };
        recommendations.push(text.to_string());
    }

    recommendations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
