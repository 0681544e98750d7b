pub mod broadcast;
pub mod compose;
pub mod config;
pub mod db;
pub mod embed;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod logging;
pub mod message;
pub mod postman;
pub mod queue;
pub mod retry;
pub mod secrets;
pub mod transport;
pub mod web_version;

pub use broadcast::{DeliveryBroadcaster, DeliveryEvent, DeliveryPhase};
pub use compose::{ActorContext, ContentComposer, Placeholders, StyleInliner};
pub use config::{load_config, load_config_from_str, PostmanConfig};
pub use db::Database;
pub use embed::EmbeddedResourceResolver;
pub use error::{
    ComposeError, ConfigError, PostmanError, QueueError, Result, TransportError,
};
pub use layout::{Layout, LayoutResolver, LayoutTriplet, ViewRenderer};
pub use lifecycle::MessageLifecycle;
pub use message::{Address, AddressBook, AddressType, ErrorKind, Field, FieldError, Message, MessageState};
pub use postman::{Postman, PostmanBuilder, QueueMode};
pub use queue::{DeliveryQueue, ImmediateQueue, WorkerQueue};
pub use retry::{DelaySpec, RetryPolicy, RetryScheduler};
pub use secrets::{LinkCipher, SecretError, SecretSource};
pub use transport::{MailTransport, MemoryTransport, OutgoingMail, SmtpTransport};
pub use web_version::WebVersionSigner;
