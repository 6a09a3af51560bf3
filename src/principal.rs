//! Principal resolution.
//!
//! Heartbeats and ownership checks refer to the caller behind a task. End users
//! (web app, service API) and console accounts (debugger, explore) live in
//! different identity stores, so resolution depends on the invocation source.

use crate::error::GenerationError;
use crate::request::InvokeFrom;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    EndUser { id: String },
    Account { id: String },
}

impl Principal {
    pub fn id(&self) -> &str {
        match self {
            Principal::EndUser { id } | Principal::Account { id } => id,
        }
    }

    pub fn is_end_user(&self) -> bool {
        matches!(self, Principal::EndUser { .. })
    }
}

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    async fn resolve(
        &self,
        invoke_from: InvokeFrom,
        principal_id: &str,
    ) -> Result<Principal, GenerationError>;
}

/// Resolver that trusts the id it is given and only picks the principal kind.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourcePrincipalResolver;

#[async_trait]
impl PrincipalResolver for SourcePrincipalResolver {
    async fn resolve(
        &self,
        invoke_from: InvokeFrom,
        principal_id: &str,
    ) -> Result<Principal, GenerationError> {
        if principal_id.is_empty() {
            return Err(GenerationError::InvalidRequest(
                "principal id is empty".to_string(),
            ));
        }
        let id = principal_id.to_string();
        Ok(if invoke_from.is_end_user() {
            Principal::EndUser { id }
        } else {
            Principal::Account { id }
        })
    }
}
