//! cirrus - Record-oriented BaaS client SDK
//!
//! This library provides a client for record-oriented Backend-as-a-Service
//! APIs: typed [`Record`]s with row-level access control, a declarative
//! [`Query`] builder, public and private [`Database`]s, session-based
//! authentication, and a pub/sub channel surface. All operations flow
//! through an explicitly constructed [`Container`].
//!
//! # Example
//!
//! ```no_run
//! use cirrus::{ApiConfig, Container, Query, Record, Value};
//!
//! # async fn example() -> Result<(), cirrus::Error> {
//! let config = ApiConfig::new("https://api.example.com", "api-key")?;
//! let container = Container::new(config);
//!
//! let user = container.auth().login_with_username("alice", "secret").await?;
//! println!("logged in as {}", user.record_id());
//!
//! let mut note = Record::new("note")?;
//! note.set("title", Value::from("hello"))?;
//! let saved = container.public_db().save(&note).await?;
//!
//! let query = Query::new("note")?.equal_to("title", Value::from("hello"));
//! let result = container.public_db().query(&query).await?;
//! for record in &result {
//!     println!("{}: {:?}", record.record_id(), record.get("title"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod container;
pub mod database;
pub mod error;
pub mod pubsub;
pub mod query;
pub mod record;
pub mod transport;
pub mod types;

// Re-export primary types at crate root for convenience
pub use auth::AuthContainer;
pub use container::{ApiConfig, ApiKey, Container};
pub use database::{BatchSaveOutput, Database, DatabaseScope, SaveOptions};
pub use error::{Error, ErrorCode, ServerError};
pub use pubsub::{ChannelSubscription, PubsubContainer, PubsubEvent};
pub use query::{Query, QueryResult};
pub use record::{AccessLevel, Acl, Asset, GeoLocation, Record, Reference, Value};
pub use types::{RecordId, RecordType, Role, ServerUrl};

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
