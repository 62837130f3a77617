//! Identity and authorization.
//!
//! flashdeck does not authenticate anyone itself. An upstream identity proxy verifies the user
//! and forwards their email in a header (`cf-access-authenticated-user-email` by default); the
//! [`current_user`] extractor maps that email to a profile, creating one on first sight.
//!
//! # Identity sources
//!
//! 1. **Proxy header**: the verified email, trimmed and lowercased. Enabled by default.
//! 2. **Local bypass**: a configured substitute email used only when no header is present.
//!    Development only.
//!
//! With neither present the request fails with 401.
//!
//! # Authorization
//!
//! - Every user owns their decks, cards, emails and stored key.
//! - Admins may also manage other users and their emails, but never read other users' decks.
//! - Addresses in the [`admins::AdminPolicy`] are made admin on every sighting and are protected
//!   from demotion and deletion.
//!
//! # Modules
//!
//! - [`admins`]: the always-admin allow-list built from configuration
//! - [`current_user`]: the [`CurrentUser`](crate::api::models::users::CurrentUser) extractor
//! - [`permissions`]: permission checks and the [`RequiresPermission`](permissions::RequiresPermission) extractor
//! - [`utils`]: logout URL computation
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use flashdeck::auth::permissions::{RequiresPermission, operation, resource};
//!
//! async fn list_users(
//!     State(state): State<AppState>,
//!     current_user: RequiresPermission<resource::Users, operation::ReadAll>,
//! ) -> Result<Json<AdminUserListResponse>> {
//!     // only admins get here
//! }
//! ```

pub mod admins;
pub mod current_user;
pub mod permissions;
pub mod utils;
