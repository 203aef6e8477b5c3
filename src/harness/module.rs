use super::{DeathReason, Heart};
use crate::library::{BoxedError, EmptyResult};
use async_trait::async_trait;
use std::any::type_name;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

/// Executable module
#[async_trait]
pub trait Module {
    /// Executed before running the core loop
    async fn pre_startup(&mut self) -> EmptyResult {
        Ok(())
    }

    /// Core run loop of the module
    ///
    /// When the function returns `Some(_)` the death of the returned [`Heart`] is awaited before calling the shutdown hook.
    /// Useful for situations where you dispatch background tasks in the run loop but want to hand-off the program lifecycle management.
    ///
    /// Returning `None` results in the program entering a shutdown state and calling the `post_shutdown` hook.
    async fn run(&mut self) -> Result<Option<Heart>, BoxedError>;

    /// Shutdown hook executed after the core loop terminated, regardless of whether the startup succeeded
    #[instrument(skip(self))]
    async fn post_shutdown(&mut self, termination_reason: &ModuleTerminationReason) {
        if termination_reason.is_failure() {
            error!("Module terminated with an error");
        } else {
            info!("Module exited normally");
        }
    }
}

/// Reason why a module has terminated
#[derive(Error, Debug)]
pub enum ModuleTerminationReason {
    /// Startup routine threw an error
    #[error("startup routine threw an error")]
    StartupFailed(#[source] BoxedError),
    /// Core run loop threw an error
    #[error("error during operation")]
    OperationalError(#[source] BoxedError),
    /// [`Heart`] provided by module died
    #[error("heart provided by module died: {0}")]
    HeartDied(DeathReason),
    /// Run loop exited cleanly
    #[error("run loop exited cleanly")]
    ExitedNormally,
    /// Timeout during startup
    #[error("timeout during startup")]
    Timeout,
}

impl ModuleTerminationReason {
    /// Whether the process should exit with a non-zero status code
    ///
    /// A heart that has been killed from within the module counts as a failure since modules only do so when
    /// something they depend on is gone for good.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            ModuleTerminationReason::ExitedNormally
                | ModuleTerminationReason::HeartDied(DeathReason::Terminated)
        )
    }
}

/// Runner for [`Module`] implementations
pub struct ModuleRunner {
    startup_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ModuleRunner {
    /// Creates a new instance with custom timeouts
    pub fn new(startup_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            startup_timeout,
            shutdown_timeout,
        }
    }
}

impl Default for ModuleRunner {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl ModuleRunner {
    /// Executes a [`Module`] until it exits by calling the corresponding lifecycle functions in order
    /// and returns the reason why it terminated.
    #[instrument(skip(self, module), fields(module_name = type_name::<M>()))]
    pub async fn run<M: Module + Send + Sync>(&self, mut module: M) -> ModuleTerminationReason {
        info!("Commencing module startup sequence");
        let startup = timeout(self.startup_timeout, module.pre_startup()).await;

        let termination_reason = match startup {
            Ok(Ok(_)) => self.run_loop(&mut module).await,
            Ok(Err(error)) => {
                error!(?error, "Module startup sequence encountered an error");
                ModuleTerminationReason::StartupFailed(error)
            }
            Err(_) => {
                error!("Module startup sequence timed out");
                ModuleTerminationReason::Timeout
            }
        };

        info!("Commencing module shutdown sequence");
        let result = timeout(
            self.shutdown_timeout,
            module.post_shutdown(&termination_reason),
        )
        .await;

        if result.is_err() {
            error!("Module shutdown sequence timed out");
        }

        termination_reason
    }

    #[instrument(skip(self, module))]
    async fn run_loop<M: Module + Send + Sync>(&self, module: &mut M) -> ModuleTerminationReason {
        info!("Executing module run procedure");
        match module.run().await {
            Ok(None) => {
                debug!("Module run procedure completed successfully");
                ModuleTerminationReason::ExitedNormally
            }
            Ok(Some(mut heart)) => {
                debug!("Module run procedure completed successfully, entering run loop");
                let death_reason = heart.death().await;
                info!(%death_reason, "Heart provided by run procedure died");
                ModuleTerminationReason::HeartDied(death_reason)
            }
            Err(error) => {
                info!(?error, "Module run procedure encountered an error");
                ModuleTerminationReason::OperationalError(error)
            }
        }
    }
}
