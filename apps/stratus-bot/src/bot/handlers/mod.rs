pub mod callback;
pub mod message;
pub mod payment;

/// Force-reply prompt used by the gift flow; a reply to this exact text is
/// routed to the recipient-resolution branch.
pub const GIFT_PROMPT: &str = "💝 Reply to this message with the @username of the gift recipient.";
