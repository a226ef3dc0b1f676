//! Procedure access policies and resource-scoped ownership checks.

use axum::http::HeaderMap;
use send_messages_module::{LineClient, MessagingError};
use tracing::debug;

use crate::errors::NormalizedError;
use crate::models::ResourceScope;

/// Owner recorded for group resources created without an identity.
pub const ANONYMOUS_OWNER: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    None,
    Optional,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    Health,
    EventsListPersonal,
    EventsListGroup,
    EventsCreate,
    EventsUpdate,
    EventsDelete,
    FilesListPersonal,
    FilesListGroup,
    FilesUpload,
    FilesRename,
    FilesDelete,
}

impl Procedure {
    pub const ALL: [Procedure; 11] = [
        Procedure::Health,
        Procedure::EventsListPersonal,
        Procedure::EventsListGroup,
        Procedure::EventsCreate,
        Procedure::EventsUpdate,
        Procedure::EventsDelete,
        Procedure::FilesListPersonal,
        Procedure::FilesListGroup,
        Procedure::FilesUpload,
        Procedure::FilesRename,
        Procedure::FilesDelete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Procedure::Health => "health",
            Procedure::EventsListPersonal => "events.listPersonal",
            Procedure::EventsListGroup => "events.listGroup",
            Procedure::EventsCreate => "events.create",
            Procedure::EventsUpdate => "events.update",
            Procedure::EventsDelete => "events.delete",
            Procedure::FilesListPersonal => "files.listPersonal",
            Procedure::FilesListGroup => "files.listGroup",
            Procedure::FilesUpload => "files.upload",
            Procedure::FilesRename => "files.rename",
            Procedure::FilesDelete => "files.delete",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|procedure| procedure.name() == name)
    }

    /// Mixed-context procedures serve personal and group callers alike and
    /// run the resource scope check themselves.
    pub fn policy(&self) -> AuthPolicy {
        match self {
            Procedure::Health => AuthPolicy::None,
            Procedure::EventsListPersonal | Procedure::FilesListPersonal => AuthPolicy::Required,
            Procedure::EventsListGroup | Procedure::FilesListGroup => AuthPolicy::Optional,
            Procedure::EventsCreate
            | Procedure::EventsUpdate
            | Procedure::EventsDelete
            | Procedure::FilesUpload
            | Procedure::FilesRename
            | Procedure::FilesDelete => AuthPolicy::Optional,
        }
    }
}

/// Policy for a raw procedure name; unknown names fail closed.
pub fn policy_for(name: &str) -> AuthPolicy {
    Procedure::parse(name)
        .map(|procedure| procedure.policy())
        .unwrap_or(AuthPolicy::Required)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("identity lookup failed: {0}")]
    Lookup(#[from] MessagingError),
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

async fn resolve_identity(line: &LineClient, headers: &HeaderMap) -> Result<Identity, AuthError> {
    let token = extract_bearer_token(headers).ok_or(AuthError::MissingToken)?;
    let profile = line.get_profile_for_access_token(&token).await?;
    Ok(Identity {
        user_id: profile.user_id,
        display_name: Some(profile.display_name).filter(|name| !name.is_empty()),
    })
}

/// Apply a procedure policy before it runs.
///
/// `Required` surfaces lookup failures; `Optional` degrades to anonymous.
pub async fn authorize(
    policy: AuthPolicy,
    line: &LineClient,
    headers: &HeaderMap,
) -> Result<Option<Identity>, AuthError> {
    match policy {
        AuthPolicy::None => Ok(None),
        AuthPolicy::Optional => match resolve_identity(line, headers).await {
            Ok(identity) => Ok(Some(identity)),
            Err(err) => {
                debug!("optional identity not resolved: {}", err);
                Ok(None)
            }
        },
        AuthPolicy::Required => resolve_identity(line, headers).await.map(Some),
    }
}

/// Ownership check against the persisted scope of an existing resource.
///
/// Group resources accept any caller presenting the same group id; personal
/// resources accept only their owner.
pub fn check_resource_scope(
    identity: Option<&Identity>,
    scope: ResourceScope<'_>,
    caller_group_id: Option<&str>,
) -> Result<(), NormalizedError> {
    if let Some(group_id) = scope.group_id {
        if caller_group_id == Some(group_id) {
            return Ok(());
        }
        return Err(NormalizedError::authorization(format!(
            "resource belongs to group {} and caller supplied {}",
            group_id,
            caller_group_id.unwrap_or("no group")
        )));
    }
    let Some(identity) = identity else {
        return Err(NormalizedError::authentication(
            "personal resource requires a signed-in caller",
        ));
    };
    if identity.user_id != scope.owner_id {
        return Err(NormalizedError::authorization(format!(
            "user {} does not own this resource",
            identity.user_id
        )));
    }
    Ok(())
}

/// Owner id for a new resource in the requested scope.
pub fn check_create_scope(
    identity: Option<&Identity>,
    group_id: Option<&str>,
) -> Result<String, NormalizedError> {
    match (identity, group_id) {
        (Some(identity), _) => Ok(identity.user_id.clone()),
        (None, Some(_)) => Ok(ANONYMOUS_OWNER.to_string()),
        (None, None) => Err(NormalizedError::authentication(
            "personal resources require a signed-in caller",
        )),
    }
}
