//! Per-plugin supervisor tasks
//!
//! Each runner owns one task that starts its plugin, drains its input, and
//! surfaces errors. Supervision follows one state machine:
//!
//! ```text
//! Init -> Running -> Faulted ----(restartable)----> Reinitializing -> Running
//!             |         |                                 |
//!             v         +--(not restartable)--> broadcast shutdown
//!          Exited                                         |
//!       (terminal)                   retry exhausted -> broadcast shutdown
//! ```
//!
//! Restartable plugins treat a clean exit the same as a fault.

mod decoder;
mod fo;
mod input;

#[cfg(test)]
#[path = "runner_test.rs"]
mod runner_test;

pub use decoder::{DecoderContext, DecoderHandle, DecoderRunner};
pub use fo::{FoRunner, spawn_filter, spawn_output};
pub use input::{InputRunner, spawn_input};

use std::sync::Arc;

use tracing::error;

use crate::globals::Globals;
use crate::plugin::{PluginKind, PluginWrapper};
use crate::retry::RetryHelper;
use strom_config::PluginInstanceConfig;

/// Re-create and re-init a faulted plugin until it comes up, the retry
/// budget runs out, or shutdown intervenes.
///
/// Returns the fresh instance, or `None` when the supervisor must exit
/// (exhaustion already broadcast a fault shutdown).
pub(crate) async fn recreate_plugin(
    wrapper: &PluginWrapper,
    config: &PluginInstanceConfig,
    retry: &mut RetryHelper,
    globals: &Arc<Globals>,
) -> Option<PluginKind> {
    let token = globals.shutdown_token();
    loop {
        if globals.is_stopping() {
            return None;
        }

        let waited = tokio::select! {
            r = retry.wait() => r,
            _ = token.cancelled() => return None,
        };
        if let Err(e) = waited {
            error!(plugin = %wrapper.name(), error = %e, "giving up on restart");
            globals.fault_shutdown();
            return None;
        }

        let mut fresh = wrapper.create();
        match fresh.plugin_mut().init(config) {
            Ok(()) => {
                retry.reset();
                return Some(fresh);
            }
            Err(e) => {
                error!(plugin = %wrapper.name(), error = %e, "re-initialization failed");
            }
        }
    }
}
