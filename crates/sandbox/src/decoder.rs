//! Sandbox-backed decoder plugin

use std::path::PathBuf;

use strom_pipeline::{
    Decoded, Decoder, DecoderContext, Plugin, PluginError, PluginInstanceConfig,
};
use tracing::error;

use crate::host::{RhaiSandbox, SandboxKind, SandboxSpec};
use crate::{DEFAULT_SAMPLE_DENOMINATOR, Result, SandboxError};

/// Decoder that delegates each pack to an embedded script
///
/// The script's injected batch becomes the decode result: the first
/// injected message overwrites the original input pack, later ones go
/// into packs drawn through the runner. A positive script return is fatal
/// and escalates to a process shutdown.
pub struct SandboxDecoder {
    sandbox: Option<RhaiSandbox>,
    ctx: Option<DecoderContext>,
}

impl SandboxDecoder {
    pub fn new() -> Self {
        Self {
            sandbox: None,
            ctx: None,
        }
    }

    /// The meters of the underlying host, when initialized
    pub fn sandbox(&self) -> Option<&RhaiSandbox> {
        self.sandbox.as_ref()
    }
}

impl Default for SandboxDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a host spec from the shared sandbox config keys
pub(crate) fn spec_from_config(config: &PluginInstanceConfig) -> Result<SandboxSpec> {
    let script_path = config.get_path("script_path").ok_or_else(|| {
        SandboxError::Compile {
            path: PathBuf::new(),
            reason: "missing required option 'script_path'".to_string(),
        }
    })?;

    let mut spec = SandboxSpec::new(&script_path);
    if let Some(limit) = config.get_int("memory_limit") {
        spec.memory_limit = limit.max(0) as usize;
    }
    if let Some(limit) = config.get_int("instruction_limit") {
        spec.instruction_limit = limit.max(0) as u64;
    }
    if let Some(limit) = config.get_int("output_limit") {
        spec.output_limit = limit.max(0) as usize;
    }
    if let Some(denom) = config.get_int("duration_sample_denominator") {
        spec.sample_denominator = denom.max(1) as u32;
    } else {
        spec.sample_denominator = DEFAULT_SAMPLE_DENOMINATOR;
    }
    if config.get_bool("preserve_data").unwrap_or(false) {
        let mut preserved = script_path.clone();
        preserved.set_extension("data.json");
        spec.preserve_path = Some(preserved);
    }
    Ok(spec)
}

impl Plugin for SandboxDecoder {
    fn init(&mut self, config: &PluginInstanceConfig) -> std::result::Result<(), PluginError> {
        if self.sandbox.is_some() {
            return Ok(());
        }
        let spec = spec_from_config(config).map_err(|e| PluginError::msg(e.to_string()))?;
        let sandbox = RhaiSandbox::init(spec, SandboxKind::Decoder)
            .map_err(|e| PluginError::msg(e.to_string()))?;
        self.sandbox = Some(sandbox);
        Ok(())
    }
}

impl Decoder for SandboxDecoder {
    fn attach(&mut self, ctx: DecoderContext) {
        self.ctx = Some(ctx);
    }

    fn decode(&mut self, pack: strom_pipeline::Pack) -> Decoded {
        let Some(sandbox) = self.sandbox.as_mut() else {
            return Decoded::Fail(pack, PluginError::msg("sandbox not running"));
        };

        let input = pack.message().clone();
        let (ret, batch) = sandbox.process_message(&input);

        if ret > 0 {
            let reason = sandbox.last_error();
            error!(error = %reason, "sandbox decoder fatal, shutting down");
            if let Some(sb) = self.sandbox.take() {
                let _ = sb.destroy();
            }
            if let Some(ctx) = &self.ctx {
                ctx.globals().fault_shutdown();
            }
            return Decoded::Fail(pack, PluginError::msg(format!("FATAL: {reason}")));
        }
        if ret < 0 {
            return Decoded::Fail(
                pack,
                PluginError::msg(format!("failed parsing: {}", input.payload())),
            );
        }
        if batch.is_empty() {
            return Decoded::Drop(pack);
        }

        // First injected message rides the original input pack; the rest
        // draw fresh packs through the runner.
        let mut packs = Vec::with_capacity(batch.len());
        let mut messages = batch.into_iter();
        if let Some(first) = messages.next() {
            pack.set_message(first);
            packs.push(pack);
        }
        for msg in messages {
            let fresh = self.ctx.as_ref().and_then(|ctx| ctx.new_pack());
            match fresh {
                Some(p) => {
                    p.set_message(msg);
                    packs.push(p);
                }
                None => {
                    error!("no pack available for sandbox emission; message dropped");
                }
            }
        }
        Decoded::Emit(packs)
    }

    fn shutdown(&mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            let _ = sandbox.destroy();
        }
    }
}
