//! The CRUD trait shared by the deck and user repositories.

use std::collections::HashMap;

use crate::db::errors::Result;

/// CRUD over one table, for the repositories whose rows have plain create/update shapes.
///
/// [`Decks`](super::Decks) and [`Users`](super::Users) implement it. Card groups are upserted by
/// their deterministic id, and emails, keys and protected addresses have narrower operations, so
/// those repositories expose inherent methods only.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest;
    /// Partial update: `None` fields are left unchanged
    type UpdateRequest;
    type Response;
    type Id: Send + Sync;
    /// Scoping for [`Repository::list`]: the deck owner, or a page of users
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// Fetch several rows at once, keyed by id. Missing ids are simply absent.
    ///
    /// The dashboard overview uses this to look up the decks of its recent entries.
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    /// Returns whether a row was deleted
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;
}
