//! Modvault publisher.
//!
//! Wires the finalization pipeline from `modvault-core` to object storage,
//! SQLite, the archive validator and webhooks, driven by one
//! [`PublisherConfig`].
//!
//! # Quick Start
//!
//! ```no_run
//! use modvault::{Publisher, PublisherConfig};
//! use modvault_core::{FinalizeContext, Mod, NewVersion, Stability};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PublisherConfig::from_file(std::path::Path::new("modvault.yaml"))?;
//! let publisher = Publisher::open(config).await?;
//!
//! let owner = Mod {
//!     id: "mod-a".to_string(),
//!     name: "ModA".to_string(),
//!     mod_reference: "ModA".to_string(),
//!     last_published_at: None,
//! };
//! publisher.register_mod(&owner)?;
//!
//! let request = NewVersion {
//!     changelog: "First release".to_string(),
//!     stability: Stability::Release,
//! };
//! let response = publisher
//!     .publish(&FinalizeContext::background(), &owner, "upload-1", &request)
//!     .await?;
//! println!("published {} ({:?})", response.version.version, response.review);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod publisher;

pub use config::{PublisherConfig, MEMORY_DATABASE};
pub use publisher::Publisher;
