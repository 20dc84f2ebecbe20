//! Outbound integrations for newly published versions.
//!
//! [`WebhookNotifier`] implements [`modvault_core::NotificationSink`] by
//! POSTing a [`VersionPublished`] event to every configured URL. Delivery
//! retries are the dispatcher's concern, not the sink's.

pub mod webhook;

pub use webhook::{
    parse_url_list, VersionPublished, WebhookConfig, WebhookNotifier, EVENT_VERSION_PUBLISHED,
};
