use tollgate_core::ChatRequest;

/// Characters per token for the conservative estimate. English text runs
/// about four characters per token; rounding up over-reserves slightly,
/// which the commit step releases.
const CHARS_PER_TOKEN: u64 = 4;

/// Fixed per-message framing overhead, matching the chat wire format's
/// role and separator tokens.
const PER_MESSAGE_OVERHEAD: u64 = 4;

/// Conservative token estimate for a text span.
///
/// Used for pre-dispatch reservation sizing and mid-stream partial-bill
/// accumulation. Replaced by authoritative provider usage whenever the
/// provider reports it.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    (text.chars().count() as u64).div_ceil(CHARS_PER_TOKEN)
}

/// Estimate the input tokens of a full chat request, including message
/// framing overhead.
#[must_use]
pub fn estimate_request_tokens(request: &ChatRequest) -> u64 {
    request
        .messages
        .iter()
        .map(|m| estimate_tokens(&m.content) + estimate_tokens(&m.role) + PER_MESSAGE_OVERHEAD)
        .sum()
}
