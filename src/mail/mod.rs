//! Mailbox integration: IMAP inbox source, reply dispatcher, message parsing.

pub mod dispatch;
pub mod imap;
pub mod parse;

pub use dispatch::MailDispatcher;
pub use imap::ImapInbox;
pub use parse::parse_email;

use std::str::FromStr;

use secrecy::SecretString;

use crate::config::{env_parse, env_required};
use crate::error::ConfigError;

/// How approved replies leave the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Store the reply in the drafts mailbox for a human to send.
    #[default]
    Draft,
    /// Submit the reply over SMTP.
    Send,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "send" => Ok(Self::Send),
            other => Err(format!("expected draft or send, got '{other}'")),
        }
    }
}

/// Mail account configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    pub allowed_senders: Vec<String>,
    pub dispatch_mode: DispatchMode,
    pub drafts_mailbox: String,
}

impl MailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = env_required("EMAIL_IMAP_HOST")?;
        let imap_port: u16 = env_parse("EMAIL_IMAP_PORT", 993)?;
        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));
        let smtp_port: u16 = env_parse("EMAIL_SMTP_PORT", 587)?;
        let username = env_required("EMAIL_USERNAME")?;
        let password = SecretString::from(env_required("EMAIL_PASSWORD")?);
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let allowed_senders =
            parse_allowlist(&std::env::var("TRIAGE_ALLOWED_SENDERS").unwrap_or_else(|_| "*".into()));
        let dispatch_mode: DispatchMode = env_parse("TRIAGE_DISPATCH_MODE", DispatchMode::Draft)?;
        let drafts_mailbox =
            std::env::var("TRIAGE_DRAFTS_MAILBOX").unwrap_or_else(|_| "Drafts".to_string());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            allowed_senders,
            dispatch_mode,
            drafts_mailbox,
        })
    }
}

fn parse_allowlist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Check if a sender address is in the allowlist.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}
