//! Content-policy classification.

use novel_llm::Error;

/// Phrases backends use when they reject a request on safety grounds.
const POLICY_MARKERS: &[&str] = &[
    "prohibited",
    "safety",
    "content policy",
    "content_policy",
    "content_filter",
    "content management policy",
    "candidate was blocked",
    "model output must contain",
    "blocked due to",
    "violates",
];

/// Status codes a policy rejection can arrive with.
const POLICY_STATUSES: &[u16] = &[400, 403, 451];

/// Openers of a refusal written as ordinary text instead of an error.
const REFUSAL_MARKERS: &[&str] = &[
    "i can't help with",
    "i cannot help with",
    "i can't assist",
    "i cannot assist",
    "i can't write",
    "i cannot write",
    "i can't create",
    "i cannot create",
    "i'm unable to",
    "i am unable to",
    "i won't be able to",
    "against my guidelines",
    "content policy",
    "我無法",
    "我不能協助",
    "無法協助",
    "無法提供",
    "抱歉，我不能",
];

/// Whether an error is a safety or content-block rejection.
///
/// Refusals reported by the backend always count. API errors count only
/// when their status is one a rejection arrives with and their body
/// matches a known rejection phrasing; a bare 400 is a malformed request,
/// not a policy block. Network, rate-limit, auth and parse failures never
/// count.
pub fn is_content_policy_error(error: &Error) -> bool {
    match error {
        Error::Refused { .. } => true,
        Error::Api { status, message } if POLICY_STATUSES.contains(status) => {
            let message = message.to_lowercase();
            POLICY_MARKERS.iter().any(|m| message.contains(m))
        }
        _ => false,
    }
}

/// Whether generated text is a refusal rather than the requested content.
///
/// Only the opening of the text is inspected so that dialogue inside a
/// chapter ("I can't help with that," she said) does not trip it.
pub fn is_refusal_text(text: &str) -> bool {
    let head: String = text.trim().chars().take(200).collect::<String>().to_lowercase();
    REFUSAL_MARKERS.iter().any(|m| head.contains(m))
}
