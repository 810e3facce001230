//! AuthorityStore adapter (C2): token → identity, project → role resolution.
//!
//! The real store (relational, holding projects/collaborator roles) is an
//! external collaborator accessed only through this narrow trait. The core
//! never touches SQL directly.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Resolved identity for an authenticated connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: Uuid,
    pub can_edit: bool,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub effective_client_id: Uuid,
}

/// The closed set of handshake failures. All are handshake-fatal: the caller
/// closes the channel with code 4001 and this string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("NO_TOKEN")]
    NoToken,
    #[error("BAD_TOKEN")]
    BadToken,
    #[error("PROJECT_NOT_FOUND")]
    ProjectNotFound,
    #[error("NOT_A_COLLABORATOR")]
    NotACollaborator,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoToken => "NO_TOKEN",
            Self::BadToken => "BAD_TOKEN",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::NotACollaborator => "NOT_A_COLLABORATOR",
        }
    }
}

/// Adapter over the relational store of projects and collaborator roles.
///
/// `canEdit` is true iff the user owns the project or holds an active
/// collaborator record with role editor/admin. Implementations may do I/O;
/// the core calls this only at handshake time, never under a session lock.
#[async_trait]
pub trait AuthorityStore: Send + Sync {
    async fn authenticate(
        &self,
        token: &str,
        project_id: Uuid,
        client_id_hint: Option<Uuid>,
    ) -> Result<Identity, AuthError>;
}

/// An in-memory authority store for tests and local development: tokens are
/// opaque keys into a fixed table of identities, every known token can edit
/// every known project.
#[derive(Debug, Default)]
pub struct InMemoryAuthorityStore {
    tokens: DashMap<String, (Uuid, String, bool)>,
    known_projects: DashMap<Uuid, ()>,
}

impl InMemoryAuthorityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_token(
        &self,
        token: impl Into<String>,
        user_id: Uuid,
        display_name: impl Into<String>,
        can_edit: bool,
    ) {
        self.tokens
            .insert(token.into(), (user_id, display_name.into(), can_edit));
    }

    pub fn register_project(&self, project_id: Uuid) {
        self.known_projects.insert(project_id, ());
    }
}

#[async_trait]
impl AuthorityStore for InMemoryAuthorityStore {
    async fn authenticate(
        &self,
        token: &str,
        project_id: Uuid,
        client_id_hint: Option<Uuid>,
    ) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::NoToken);
        }
        let Some(entry) = self.tokens.get(token) else {
            return Err(AuthError::BadToken);
        };
        if !self.known_projects.is_empty() && !self.known_projects.contains_key(&project_id) {
            return Err(AuthError::ProjectNotFound);
        }
        let (user_id, display_name, can_edit) = entry.value().clone();

        Ok(Identity {
            user_id,
            can_edit,
            display_name,
            avatar_url: None,
            effective_client_id: client_id_hint.unwrap_or_else(Uuid::new_v4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let store = InMemoryAuthorityStore::new();
        let err = store
            .authenticate("", Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::NoToken);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let store = InMemoryAuthorityStore::new();
        let err = store
            .authenticate("nope", Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::BadToken);
    }

    #[tokio::test]
    async fn known_token_resolves_identity_and_generates_client_id() {
        let store = InMemoryAuthorityStore::new();
        let user_id = Uuid::new_v4();
        store.register_token("tok", user_id, "Ada", true);

        let identity = store
            .authenticate("tok", Uuid::new_v4(), None)
            .await
            .unwrap();
        assert_eq!(identity.user_id, user_id);
        assert!(identity.can_edit);
        assert_ne!(identity.effective_client_id, Uuid::nil());
    }

    #[tokio::test]
    async fn client_id_hint_is_preserved() {
        let store = InMemoryAuthorityStore::new();
        let user_id = Uuid::new_v4();
        let hint = Uuid::new_v4();
        store.register_token("tok", user_id, "Ada", true);

        let identity = store
            .authenticate("tok", Uuid::new_v4(), Some(hint))
            .await
            .unwrap();
        assert_eq!(identity.effective_client_id, hint);
    }

    #[tokio::test]
    async fn unregistered_project_is_rejected_when_catalog_is_nonempty() {
        let store = InMemoryAuthorityStore::new();
        let user_id = Uuid::new_v4();
        store.register_token("tok", user_id, "Ada", true);
        store.register_project(Uuid::new_v4());

        let err = store
            .authenticate("tok", Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::ProjectNotFound);
    }
}
