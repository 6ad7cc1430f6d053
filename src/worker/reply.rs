//! Reply detection for `stopIfReplied` workers.
//!
//! The lifecycle manager only consumes the `repliedObserved` flag of an
//! execution report. Executors that fetch raw mail can use
//! [`reply_observed`] to compute it.

use mail_parser::{HeaderValue, Message, MessageParser};

/// Whether any of `raw_messages` (RFC 822) is a reply to the worker's mail.
///
/// A message counts as a reply when its `In-Reply-To` or `References` names
/// one of `sent_message_ids`, or when it comes from one of `recipients` with
/// a subject starting with "Re:". Unparseable messages are skipped.
pub fn reply_observed<B: AsRef<[u8]>>(
    raw_messages: &[B],
    sent_message_ids: &[String],
    recipients: &[String],
) -> bool {
    let sent: Vec<String> = sent_message_ids.iter().map(|id| normalize_id(id)).collect();
    let recipients: Vec<String> = recipients.iter().map(|r| r.trim().to_ascii_lowercase()).collect();

    let parser = MessageParser::default();
    raw_messages.iter().any(|raw| match parser.parse(raw.as_ref()) {
        Some(message) => is_reply(&message, &sent, &recipients),
        None => {
            tracing::debug!("Skipping unparseable message during reply detection");
            false
        }
    })
}

fn is_reply(message: &Message<'_>, sent: &[String], recipients: &[String]) -> bool {
    let threads_onto_sent = header_ids(message.in_reply_to())
        .chain(header_ids(message.references()))
        .any(|id| sent.contains(&normalize_id(id)));
    if threads_onto_sent {
        return true;
    }

    let from_recipient = message
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .is_some_and(|from| recipients.contains(&from.to_ascii_lowercase()));
    let reply_subject = message
        .subject()
        .is_some_and(|s| s.trim_start().to_ascii_lowercase().starts_with("re:"));

    from_recipient && reply_subject
}

fn header_ids<'a>(value: &'a HeaderValue<'_>) -> Box<dyn Iterator<Item = &'a str> + 'a> {
    match value {
        HeaderValue::Text(id) => Box::new(std::iter::once(id.as_ref())),
        HeaderValue::TextList(ids) => Box::new(ids.iter().map(|id| id.as_ref())),
        _ => Box::new(std::iter::empty()),
    }
}

/// Message IDs compare without angle brackets, case-insensitively.
fn normalize_id(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_ascii_lowercase()
}
