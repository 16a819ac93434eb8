//! Reply dispatch: SMTP submission or an IMAP draft.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use super::imap::open_session;
use super::{DispatchMode, MailConfig};
use crate::error::{MailError, PortError};
use crate::ports::Dispatcher;
use crate::workflow::state::EmailRecord;

/// `Re: <subject>` without stacking prefixes.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: your email".to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Build an in-thread reply to `email`.
pub fn build_reply(from: &str, email: &EmailRecord, draft: &str) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&email.sender)?)
        .subject(reply_subject(&email.subject));

    if !email.message_id.is_empty() {
        let references = if email.references.is_empty() {
            email.message_id.clone()
        } else {
            format!("{} {}", email.references, email.message_id)
        };
        builder = builder
            .in_reply_to(email.message_id.clone())
            .references(references);
    }

    builder
        .body(draft.to_string())
        .map_err(|e| MailError::Build(e.to_string()))
}

fn send_smtp(config: &MailConfig, message: &Message) -> Result<(), MailError> {
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );
    let transport = SmtpTransport::relay(&config.smtp_host)
        .map_err(|e| MailError::Smtp(format!("relay error: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();
    transport
        .send(message)
        .map_err(|e| MailError::Smtp(format!("send failed: {e}")))?;
    Ok(())
}

fn save_draft(config: &MailConfig, message: &Message) -> Result<(), MailError> {
    let mut session = open_session(config)?;
    session.append(&config.drafts_mailbox, "\\Draft \\Seen", &message.formatted())?;
    session.logout();
    Ok(())
}

/// Dispatcher that replies in-thread, either as a saved draft or sent mail.
pub struct MailDispatcher {
    config: MailConfig,
}

impl MailDispatcher {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dispatcher for MailDispatcher {
    async fn dispatch(&self, email: &EmailRecord, draft: &str) -> Result<(), PortError> {
        let message = build_reply(&self.config.from_address, email, draft)
            .map_err(|e| PortError::DispatchFailed(e.to_string()))?;
        let config = self.config.clone();
        let mode = config.dispatch_mode;

        tokio::task::spawn_blocking(move || match mode {
            DispatchMode::Send => send_smtp(&config, &message),
            DispatchMode::Draft => save_draft(&config, &message),
        })
        .await
        .map_err(|e| PortError::DispatchFailed(format!("dispatch task failed: {e}")))?
        .map_err(|e| PortError::DispatchFailed(e.to_string()))?;

        info!(email_id = %email.id, to = %email.sender, mode = ?mode, "Reply dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> EmailRecord {
        EmailRecord {
            id: "9".into(),
            thread_id: "<root@client.com>".into(),
            message_id: "<m2@client.com>".into(),
            references: "<root@client.com>".into(),
            sender: "jo@client.com".into(),
            subject: "Refix my loan".into(),
            body: "Please fix my rate.".into(),
        }
    }

    #[test]
    fn reply_subject_prefixes_once() {
        assert_eq!(reply_subject("Refix"), "Re: Refix");
        assert_eq!(reply_subject("RE: Refix"), "RE: Refix");
        assert_eq!(reply_subject("  "), "Re: your email");
    }

    #[test]
    fn reply_carries_threading_headers() {
        let message = build_reply("support@desk.com", &email(), "Dear Jo,\n\nDone.").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Re: Refix my loan"));
        assert!(raw.contains("In-Reply-To: <m2@client.com>"));
        assert!(raw.contains("References: <root@client.com> <m2@client.com>"));
        assert!(raw.contains("To: jo@client.com"));
    }

    #[test]
    fn reply_without_message_id_has_no_thread_headers() {
        let mut email = email();
        email.message_id.clear();
        let message = build_reply("support@desk.com", &email, "Hi").unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(!raw.contains("In-Reply-To"));
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let mut email = email();
        email.sender = "not an address".into();
        let err = build_reply("support@desk.com", &email, "Hi").unwrap_err();
        assert!(matches!(err, MailError::InvalidAddress { .. }));
    }
}
