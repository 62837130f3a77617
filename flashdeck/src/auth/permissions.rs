//! Permission checks and the typed [`RequiresPermission`] extractor.
//!
//! Every signed-in user may perform `*Own` operations on their own resources. Admins may also
//! perform `*All` operations on users and their emails. Decks, cards and stored keys are
//! personal: nobody gets `*All` on them, admins included.

use std::marker::PhantomData;
use std::ops::Deref;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    errors::{Error, Result},
    types::{Operation, Permission, Resource, UserId},
};

pub fn has_permission(user: &CurrentUser, resource: Resource, operation: Operation) -> bool {
    match operation {
        Operation::CreateOwn | Operation::ReadOwn | Operation::UpdateOwn | Operation::DeleteOwn => true,
        Operation::CreateAll | Operation::ReadAll | Operation::UpdateAll | Operation::DeleteAll => {
            user.is_admin && matches!(resource, Resource::Users | Resource::Emails)
        }
    }
}

pub fn can_read_all_resources(user: &CurrentUser, resource: Resource) -> bool {
    has_permission(user, resource, Operation::ReadAll)
}

/// Check that `owner_id` is the caller, returning 403 otherwise.
pub fn ensure_owner(user: &CurrentUser, resource: Resource, operation: Operation, owner_id: UserId) -> Result<()> {
    if owner_id == user.id && has_permission(user, resource, operation) {
        return Ok(());
    }
    Err(Error::InsufficientPermissions {
        required: Permission::Allow(resource, operation),
        action: operation,
        resource: format!("{resource} owned by another user"),
    })
}

pub trait ResourceMarker {
    const RESOURCE: Resource;
}

pub trait OperationMarker {
    const OPERATION: Operation;
}

pub mod resource {
    use super::ResourceMarker;
    use crate::types::Resource;

    macro_rules! resource_marker {
        ($($name:ident),*) => {
            $(
                pub struct $name;
                impl ResourceMarker for $name {
                    const RESOURCE: Resource = Resource::$name;
                }
            )*
        };
    }

    resource_marker!(Users, Emails, ApiKeys, Decks, Cards);
}

pub mod operation {
    use super::OperationMarker;
    use crate::types::Operation;

    macro_rules! operation_marker {
        ($($name:ident),*) => {
            $(
                pub struct $name;
                impl OperationMarker for $name {
                    const OPERATION: Operation = Operation::$name;
                }
            )*
        };
    }

    operation_marker!(CreateAll, CreateOwn, ReadAll, ReadOwn, UpdateAll, UpdateOwn, DeleteAll, DeleteOwn);
}

/// Extractor that resolves the current user and rejects with 403 unless they hold `O` on `R`.
pub struct RequiresPermission<R, O>(pub CurrentUser, PhantomData<(R, O)>);

impl<R, O> Deref for RequiresPermission<R, O> {
    type Target = CurrentUser;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<R, O> FromRequestParts<AppState> for RequiresPermission<R, O>
where
    R: ResourceMarker + Send + Sync,
    O: OperationMarker + Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !has_permission(&user, R::RESOURCE, O::OPERATION) {
            return Err(Error::InsufficientPermissions {
                required: Permission::Allow(R::RESOURCE, O::OPERATION),
                action: O::OPERATION,
                resource: R::RESOURCE.to_string(),
            });
        }
        Ok(Self(user, PhantomData))
    }
}
