//! Entry point that wires composition, persistence and delivery together.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::{DeliveryBroadcaster, DeliveryEvent};
use crate::compose::{ActorContext, ContentComposer, Placeholders, StyleInliner};
use crate::config::{validate_config, PostmanConfig};
use crate::db::message_repo::{self, MessageFilter};
use crate::db::{attachment_repo, Database};
use crate::error::{ConfigError, PostmanError, Result, TransportError};
use crate::layout::{Layout, LayoutResolver, ViewRenderer};
use crate::lifecycle::MessageLifecycle;
use crate::message::{now, Message};
use crate::queue::{AutoRetry, DeliveryQueue, ImmediateQueue, WorkerQueue};
use crate::retry::{DelaySpec, RetryPolicy, RetryScheduler};
use crate::transport::{MailTransport, SmtpTransport};
use crate::web_version::{WebVersionClaims, WebVersionSigner};

/// How queued messages are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Send on the calling thread when enqueued.
    Immediate,
    /// Send on `config.workers` background threads.
    #[default]
    Workers,
    /// Background threads that also schedule backoff retries on transport
    /// failures.
    WorkersWithRetry,
}

enum QueueBackend {
    Immediate(ImmediateQueue),
    Workers(WorkerQueue),
}

impl QueueBackend {
    fn as_queue(&self) -> &dyn DeliveryQueue {
        match self {
            QueueBackend::Immediate(queue) => queue,
            QueueBackend::Workers(queue) => queue,
        }
    }
}

pub struct PostmanBuilder {
    config: PostmanConfig,
    database: Option<Database>,
    transport: Option<Arc<dyn MailTransport>>,
    inliner: Option<Arc<dyn StyleInliner>>,
    renderer: Option<Arc<dyn ViewRenderer>>,
    layouts: Vec<(String, Layout)>,
    queue_mode: QueueMode,
}

impl PostmanBuilder {
    pub fn new(config: PostmanConfig) -> Self {
        Self {
            config,
            database: None,
            transport: None,
            inliner: None,
            renderer: None,
            layouts: Vec::new(),
            queue_mode: QueueMode::default(),
        }
    }

    /// Uses an already open database instead of `config.database`.
    pub fn database(mut self, db: Database) -> Self {
        self.database = Some(db);
        self
    }

    /// Uses the given transport instead of building one from `config.smtp`.
    pub fn transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn inliner(mut self, inliner: Arc<dyn StyleInliner>) -> Self {
        self.inliner = Some(inliner);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn ViewRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Registers a layout, replacing a configured variant of the same name.
    pub fn layout(mut self, name: impl Into<String>, layout: Layout) -> Self {
        self.layouts.push((name.into(), layout));
        self
    }

    pub fn queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    pub fn build(self) -> Result<Postman> {
        validate_config(&self.config)?;
        let config = Arc::new(self.config);

        let db = match self.database {
            Some(db) => db,
            None => {
                let path = config.database_path().ok_or_else(|| ConfigError::Validation {
                    message: "No database path configured and no home directory found".to_string(),
                })?;
                Database::open(&path)?
            }
        };

        let transport: Arc<dyn MailTransport> = match (self.transport, &config.smtp) {
            (Some(transport), _) => transport,
            (None, Some(smtp)) => Arc::new(SmtpTransport::from_config(smtp)?),
            (None, None) => {
                return Err(TransportError::NotConfigured(
                    "no smtp section and no transport supplied".to_string(),
                )
                .into())
            }
        };

        let mut layouts = LayoutResolver::from_config(&config).with_database(db.clone());
        if let Some(renderer) = self.renderer {
            layouts = layouts.with_renderer(renderer);
        }
        for (name, layout) in self.layouts {
            layouts.register(name, layout);
        }

        let mut composer =
            ContentComposer::new(Arc::clone(&config), Arc::new(layouts)).with_database(db.clone());
        if let Some(inliner) = self.inliner {
            composer = composer.with_inliner(inliner);
        }

        let events = DeliveryBroadcaster::default();
        let signer = Arc::new(WebVersionSigner::from_config(&config)?);
        let lifecycle = Arc::new(
            MessageLifecycle::new(db.clone(), Arc::clone(&config), transport, Arc::clone(&signer))
                .with_events(events.clone()),
        );
        let retry = Arc::new(RetryScheduler::new(db.clone(), events.clone()));
        let policy = RetryPolicy::from(&config.retry);

        let queue = match self.queue_mode {
            QueueMode::Immediate => QueueBackend::Immediate(ImmediateQueue::new(Arc::clone(&lifecycle))),
            QueueMode::Workers => {
                QueueBackend::Workers(WorkerQueue::start(Arc::clone(&lifecycle), config.workers)?)
            }
            QueueMode::WorkersWithRetry => QueueBackend::Workers(WorkerQueue::with_retry(
                Arc::clone(&lifecycle),
                config.workers,
                Some(AutoRetry {
                    scheduler: Arc::clone(&retry),
                    policy,
                }),
            )?),
        };

        log::info!("Postman ready ({:?} delivery)", self.queue_mode);

        Ok(Postman {
            config,
            db,
            composer,
            lifecycle,
            retry,
            policy,
            signer,
            events,
            queue,
        })
    }
}

pub struct Postman {
    config: Arc<PostmanConfig>,
    db: Database,
    composer: ContentComposer,
    lifecycle: Arc<MessageLifecycle>,
    retry: Arc<RetryScheduler>,
    policy: RetryPolicy,
    signer: Arc<WebVersionSigner>,
    events: DeliveryBroadcaster,
    queue: QueueBackend,
}

impl Postman {
    pub fn builder(config: PostmanConfig) -> PostmanBuilder {
        PostmanBuilder::new(config)
    }

    pub fn config(&self) -> &PostmanConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn compose(
        &self,
        subject: &str,
        content_text: &str,
        content_html: &str,
        placeholders: &Placeholders,
        styles: &str,
        use_layout: bool,
        actor: Option<&ActorContext>,
    ) -> Result<Message> {
        Ok(self.composer.compose(
            subject,
            content_text,
            content_html,
            placeholders,
            styles,
            use_layout,
            actor,
        )?)
    }

    pub fn create(
        &self,
        template_code: &str,
        placeholders: &Placeholders,
        subject: Option<&str>,
        actor: Option<&ActorContext>,
    ) -> Result<Message> {
        Ok(self.composer.create(template_code, placeholders, subject, actor)?)
    }

    pub fn send_immediately(&self, message: &mut Message) -> Result<bool> {
        self.lifecycle.send_immediately(message)
    }

    pub fn send_by_id(&self, id: i64) -> Result<bool> {
        self.lifecycle.send_by_id(id)
    }

    pub fn send_to_queue(&self, message: &mut Message) -> Result<bool> {
        self.lifecycle.send_to_queue(message, self.queue.as_queue())
    }

    pub fn repeat_after(&self, message: &mut Message, max_tries: u32, delay: DelaySpec) -> Result<bool> {
        self.retry
            .repeat_after(message, max_tries, delay, self.queue.as_queue())
    }

    /// Schedules a retry with the configured backoff.
    pub fn repeat(&self, message: &mut Message) -> Result<bool> {
        self.retry
            .repeat_with_policy(message, &self.policy, self.queue.as_queue())
    }

    /// Stores a file as media and links it to a message. With `embed` set,
    /// the html can reference it as `#embed[<key>]#`.
    pub fn attach_file(&self, message_id: i64, path: &Path, embed: Option<&str>) -> Result<i64> {
        if message_repo::find_by_id(&self.db, message_id)?.is_none() {
            return Err(PostmanError::MessageNotFound(message_id));
        }

        let origin_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        let mime = mime_guess::from_path(path).first_raw();
        let media_id = attachment_repo::insert_media(
            &self.db,
            &origin_name,
            &path.to_string_lossy(),
            mime,
            now(),
        )?;
        Ok(attachment_repo::attach(&self.db, message_id, media_id, embed)?)
    }

    pub fn find_message(&self, id: i64) -> Result<Option<Message>> {
        Ok(Message::load(&self.db, id)?)
    }

    pub fn find_message_by_code(&self, code: &str) -> Result<Option<Message>> {
        Ok(Message::load_by_code(&self.db, code)?)
    }

    /// Returns one page of matching messages and the total match count.
    pub fn list_messages(&self, filter: &MessageFilter) -> Result<(Vec<Message>, u64)> {
        let (rows, total) = message_repo::query(&self.db, filter)?;
        Ok((rows.into_iter().map(Message::from_row).collect(), total))
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        Ok(message_repo::soft_delete(&self.db, id, now())?)
    }

    pub fn restore_message(&self, id: i64) -> Result<bool> {
        Ok(message_repo::restore(&self.db, id)?)
    }

    /// Resolves a web-version link back to its message.
    ///
    /// Returns `None` when the hash does not belong to `token`.
    pub fn open_web_version(&self, token: &str, hash: &str) -> Result<Option<Message>> {
        let claims: WebVersionClaims = self.signer.open(hash)?;
        if claims.c != token {
            log::warn!("Web version hash does not match token {}", token);
            return Ok(None);
        }
        Ok(Message::load_by_code(&self.db, token)?.filter(|m| !m.is_deleted()))
    }

    /// Enqueues every live message that has neither been sent nor failed.
    pub fn requeue_unsent(&self) -> Result<usize> {
        match &self.queue {
            QueueBackend::Workers(queue) => queue.requeue_unsent(),
            QueueBackend::Immediate(queue) => {
                let pending = message_repo::find_pending(&self.db)?;
                for (id, _) in &pending {
                    queue.enqueue(*id)?;
                }
                Ok(pending.len())
            }
        }
    }

    /// Stops background delivery and waits for in-flight sends.
    pub fn shutdown(self) {
        if let QueueBackend::Workers(queue) = self.queue {
            queue.wait();
        }
    }
}
