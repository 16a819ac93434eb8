//! Assembles the live service: mailbox, model-backed agents, engine, and router.

use std::sync::Arc;

use axum::Router;

use crate::agents::writer::DEFAULT_SIGNATURE;
use crate::agents::{
    KnowledgeBase, KnowledgeRetriever, LlmClassifier, LlmDrafter, LlmProofreader,
    LlmQueryConstructor,
};
use crate::config::{EngineConfig, ServerConfig, TriggerMode};
use crate::error::Result;
use crate::llm::{LlmConfig, create_provider};
use crate::mail::{ImapInbox, MailConfig, MailDispatcher};
use crate::ports::Capabilities;
use crate::server::{AppState, RunRegistry, routes};
use crate::workflow::WorkflowEngine;

/// Every configuration section the service reads at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineConfig,
    pub trigger: TriggerMode,
    pub server: ServerConfig,
    pub mail: MailConfig,
    pub llm: LlmConfig,
    pub signature: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            engine: EngineConfig::from_env()?,
            trigger: TriggerMode::from_env()?,
            server: ServerConfig::from_env()?,
            mail: MailConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            signature: std::env::var("TRIAGE_SIGNATURE")
                .unwrap_or_else(|_| DEFAULT_SIGNATURE.to_string()),
        })
    }
}

/// A wired service, ready to serve or poll.
pub struct App {
    pub engine: Arc<WorkflowEngine>,
    pub registry: Arc<RunRegistry>,
    pub trigger: TriggerMode,
}

impl App {
    /// Build the real capabilities from `settings` and wrap them in an engine.
    pub fn build(settings: Settings) -> Result<Self> {
        let llm = create_provider(&settings.llm)?;
        let knowledge = Arc::new(KnowledgeBase::load(&settings.server.knowledge_dir)?);

        let capabilities = Capabilities {
            inbox: Arc::new(ImapInbox::new(settings.mail.clone())),
            classifier: Arc::new(LlmClassifier::new(llm.clone())),
            queries: Arc::new(LlmQueryConstructor::new(llm.clone())),
            retriever: Arc::new(KnowledgeRetriever::new(knowledge, llm.clone())),
            drafter: Arc::new(LlmDrafter::new(llm.clone()).with_signature(settings.signature)),
            proofreader: Arc::new(LlmProofreader::new(llm)),
            dispatcher: Arc::new(MailDispatcher::new(settings.mail)),
        };

        Ok(Self {
            engine: Arc::new(WorkflowEngine::new(capabilities, settings.engine)),
            registry: Arc::new(RunRegistry::new()),
            trigger: settings.trigger,
        })
    }

    pub fn router(&self) -> Router {
        routes(
            AppState {
                engine: self.engine.clone(),
                registry: self.registry.clone(),
            },
            self.trigger == TriggerMode::Webhook,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use secrecy::SecretString;

    use super::*;
    use crate::error::Error;
    use crate::mail::DispatchMode;

    fn settings(model: &str, knowledge_dir: PathBuf) -> Settings {
        Settings {
            engine: EngineConfig::default(),
            trigger: TriggerMode::Webhook,
            server: ServerConfig {
                port: 0,
                knowledge_dir,
            },
            mail: MailConfig {
                imap_host: "imap.example.com".into(),
                imap_port: 993,
                smtp_host: "smtp.example.com".into(),
                smtp_port: 587,
                username: "support@example.com".into(),
                password: SecretString::from("secret"),
                from_address: "support@example.com".into(),
                allowed_senders: vec!["*".into()],
                dispatch_mode: DispatchMode::Draft,
                drafts_mailbox: "Drafts".into(),
            },
            llm: LlmConfig {
                api_key: SecretString::from("sk-test"),
                model: model.into(),
                base_url: crate::llm::openai::DEFAULT_BASE_URL.into(),
            },
            signature: DEFAULT_SIGNATURE.into(),
        }
    }

    #[test]
    fn builds_with_missing_knowledge_dir() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(settings("gpt-4o", dir.path().join("absent"))).unwrap();
        assert_eq!(app.engine.config().max_trials, 2);
        assert_eq!(app.trigger, TriggerMode::Webhook);
        let _router = app.router();
    }

    #[test]
    fn provider_error_surfaces_as_llm_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = App::build(settings(" ", dir.path().to_path_buf()))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Llm(_)));
    }
}
