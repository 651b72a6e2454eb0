use std::collections::HashMap;

use crate::scan::{Detection, DetectionKind};

/// Replace detected spans with typed placeholders.
///
/// Placeholders are numbered per kind in span order (`[EMAIL_1]`,
/// `[EMAIL_2]`, `[CARD_1]`). Overlapping detections collapse into the
/// first span's placeholder. Returns the redacted text and the list of
/// placeholders applied.
#[must_use]
pub fn redact(text: &str, detections: &[Detection]) -> (String, Vec<String>) {
    RedactionPass::new().redact(text, detections)
}

/// Redaction with placeholder numbering carried across multiple texts,
/// so the messages of one request share a single counter space.
#[derive(Debug, Default)]
pub struct RedactionPass {
    counters: HashMap<DetectionKind, u32>,
}

impl RedactionPass {
    /// Start a fresh pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Redact one text, continuing this pass's numbering.
    #[must_use]
    pub fn redact(&mut self, text: &str, detections: &[Detection]) -> (String, Vec<String>) {
        let mut sorted: Vec<&Detection> = detections.iter().collect();
        sorted.sort_by_key(|d| (d.start, d.end));

        let mut output = String::with_capacity(text.len());
        let mut applied = Vec::new();
        let mut cursor = 0;

        for detection in sorted {
            // Skip spans swallowed by an earlier replacement.
            if detection.start < cursor {
                continue;
            }
            let counter = self.counters.entry(detection.kind).or_insert(0);
            *counter += 1;
            let placeholder = format!("[{}_{}]", detection.kind.placeholder_stem(), counter);

            output.push_str(&text[cursor..detection.start]);
            output.push_str(&placeholder);
            applied.push(placeholder);
            cursor = detection.end;
        }
        output.push_str(&text[cursor..]);

        (output, applied)
    }
}
