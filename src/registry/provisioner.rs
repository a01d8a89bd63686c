//! Find-or-create for the target repository

use crate::common::cancellable;
use crate::error::{ApiError, ReassemblerError, Result};
use crate::logging::Logger;
use crate::registry::{RegistryApi, Repository, RepositoryPolicy};
use tokio_util::sync::CancellationToken;

pub struct RepositoryProvisioner<'a> {
    registry: &'a dyn RegistryApi,
    policy: RepositoryPolicy,
    output: Logger,
}

impl<'a> RepositoryProvisioner<'a> {
    pub fn new(registry: &'a dyn RegistryApi, output: Logger) -> Self {
        Self {
            registry,
            policy: RepositoryPolicy::standard(),
            output,
        }
    }

    /// Return the existing repository, or create it with the fixed policy
    ///
    /// Exactly one match is required; any other count is an inconsistency in the
    /// registry's answer and aborts the run.
    pub async fn ensure(
        &self,
        name: &str,
        registry_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Repository> {
        let lookup = cancellable(cancel, async {
            Ok::<_, ReassemblerError>(self.registry.describe_repository(name, registry_id).await)
        })
        .await?;

        match lookup {
            Ok(mut repositories) if repositories.len() == 1 => {
                let repository = repositories.remove(0);
                self.output
                    .info(&format!("Repository {} already exists", repository.name));
                Ok(repository)
            }
            Ok(repositories) => Err(ReassemblerError::UnexpectedRepositoryCount {
                repository: name.to_string(),
                count: repositories.len(),
            }),
            Err(ApiError::NotFound(_)) => {
                self.output
                    .step(&format!("Repository {} not found, creating it", name));
                let repository = cancellable(cancel, async {
                    self.registry
                        .create_repository(name, registry_id, &self.policy)
                        .await
                        .map_err(|source| ReassemblerError::RepositoryCreate {
                            repository: name.to_string(),
                            source,
                        })
                })
                .await?;
                self.output.success(&format!(
                    "Created repository {} ({})",
                    repository.name, repository.uri
                ));
                Ok(repository)
            }
            Err(source) => Err(ReassemblerError::RepositoryLookup {
                repository: name.to_string(),
                source,
            }),
        }
    }
}
