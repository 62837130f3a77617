//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed `PgConnection` (a pooled connection or an open
//! transaction) and returns models from [`crate::db::models`].
//!
//! - [`Users`]: accounts, admin flags, and proxy identity resolution
//! - [`Emails`]: addresses linked to a user
//! - [`ApiKeys`]: encrypted provider keys
//! - [`ProtectedEmails`]: addresses that may not be deleted or demoted
//! - [`Decks`]: decks and their summaries
//! - [`CardGroups`]: card groups, their direction rows, and audio
//!
//! ```ignore
//! use flashdeck::db::handlers::{Decks, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let deck = Decks::new(&mut tx).get_by_id(deck_id).await?;
//! tx.commit().await?;
//! ```

pub mod api_keys;
pub mod card_groups;
pub mod decks;
pub mod emails;
pub mod protected_emails;
pub mod repository;
pub mod users;

pub use api_keys::ApiKeys;
pub use card_groups::CardGroups;
pub use decks::Decks;
pub use emails::Emails;
pub use protected_emails::ProtectedEmails;
pub use repository::Repository;
pub use users::Users;
