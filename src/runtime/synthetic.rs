//! In-process runtime emitting BGRA test patterns
//!
//! Chain documents list their elements:
//!
//! ```json
//! {
//!   "id": "preview",
//!   "elements": [
//!     { "id": "cam", "type": "generator", "width": 1920, "height": 1080, "fps": 30 },
//!     { "id": "exporter", "type": "frame_exporter" }
//!   ]
//! }
//! ```
//!
//! Each generator runs on its own thread and hands every pattern frame to
//! the chain's enabled exporters. Exporters start disabled and follow
//! `{"<id>": {"command": "on"|"off"}}` commands; generators accept the same
//! commands to resume or pause.

use super::{ChainBackend, ErrorHook, ExportCallback, PipelineRuntime};
use crate::frame::FrameMetadata;
use crate::utils::sos::SignalOfStop;
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reported when an exporter is switched on before a callback was installed.
pub const ERROR_NO_CALLBACK: i32 = -1;

const DEFAULT_FPS: u32 = 30;
const MAX_FPS: u32 = 240;

fn default_fps() -> u32 {
    DEFAULT_FPS
}

#[derive(Debug, Deserialize)]
struct ChainSpec {
    #[serde(default)]
    id: Option<String>,
    elements: Vec<ElementSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ElementSpec {
    Generator {
        id: String,
        width: u32,
        height: u32,
        #[serde(default = "default_fps")]
        fps: u32,
    },
    FrameExporter {
        id: String,
    },
}

impl ElementSpec {
    fn id(&self) -> &str {
        match self {
            ElementSpec::Generator { id, .. } | ElementSpec::FrameExporter { id } => id,
        }
    }
}

struct ExportPort {
    enabled: AtomicBool,
    callback: Mutex<Option<ExportCallback>>,
}

impl ExportPort {
    fn has_callback(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn deliver(&self, pixels: &[u8], meta: FrameMetadata) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(pixels, meta);
        }
    }
}

struct GeneratorState {
    meta: FrameMetadata,
    fps: u32,
    paused: AtomicBool,
}

enum Element {
    Generator(Arc<GeneratorState>),
    Exporter(Arc<ExportPort>),
}

/// Runtime that fabricates frames instead of reading a camera.
pub struct SyntheticRuntime {
    initialized: AtomicBool,
    finalized: AtomicBool,
    created: AtomicUsize,
    live_chains: Arc<AtomicUsize>,
}

impl SyntheticRuntime {
    pub fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            live_chains: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Chains created by this runtime and not yet dropped
    pub fn live_chains(&self) -> usize {
        self.live_chains.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.finalized.load(Ordering::SeqCst) {
            bail!("runtime already finalized");
        }
        if !self.initialized.load(Ordering::SeqCst) {
            bail!("runtime not initialized");
        }
        Ok(())
    }
}

impl Default for SyntheticRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRuntime for SyntheticRuntime {
    fn initialize(&self, config: &str) -> Result<()> {
        if self.finalized.load(Ordering::SeqCst) {
            bail!("runtime already finalized");
        }
        serde_json::from_str::<Value>(config).context("global configuration is not valid JSON")?;
        if self.initialized.swap(true, Ordering::SeqCst) {
            bail!("runtime already initialized");
        }
        log::info!("Synthetic runtime initialized");
        Ok(())
    }

    fn create_chain(&self, config: &str, on_error: ErrorHook) -> Result<Box<dyn ChainBackend>> {
        self.ensure_running()?;
        let spec: ChainSpec =
            serde_json::from_str(config).context("malformed chain configuration")?;
        let number = self.created.fetch_add(1, Ordering::SeqCst);
        let name = spec.id.unwrap_or_else(|| format!("chain{number}"));

        if spec.elements.is_empty() {
            bail!("chain `{name}` has no elements");
        }

        let mut elements = HashMap::new();
        let mut generators = Vec::new();
        let mut exporters = Vec::new();
        for element in spec.elements {
            let id = element.id().to_string();
            if id.is_empty() {
                bail!("chain `{name}`: element without id");
            }
            if elements.contains_key(&id) {
                bail!("chain `{name}`: duplicate element id `{id}`");
            }
            let built = match element {
                ElementSpec::Generator {
                    width, height, fps, ..
                } => {
                    let meta = FrameMetadata::new(width, height);
                    if width == 0 || height == 0 || meta.byte_len().is_none() {
                        bail!("chain `{name}`: generator `{id}` has invalid size {width}x{height}");
                    }
                    if fps == 0 || fps > MAX_FPS {
                        bail!("chain `{name}`: generator `{id}` fps must be within 1..={MAX_FPS}");
                    }
                    let state = Arc::new(GeneratorState {
                        meta,
                        fps,
                        paused: AtomicBool::new(false),
                    });
                    generators.push((id.clone(), state.clone()));
                    Element::Generator(state)
                }
                ElementSpec::FrameExporter { .. } => {
                    let port = Arc::new(ExportPort {
                        enabled: AtomicBool::new(false),
                        callback: Mutex::new(None),
                    });
                    exporters.push(port.clone());
                    Element::Exporter(port)
                }
            };
            elements.insert(id, built);
        }

        self.live_chains.fetch_add(1, Ordering::SeqCst);
        let mut chain = SyntheticChain {
            name,
            elements,
            on_error,
            stop: SignalOfStop::new(),
            workers: Vec::new(),
            live_chains: self.live_chains.clone(),
        };

        for (id, state) in generators {
            let exporters = exporters.clone();
            let stop = chain.stop.clone();
            let worker = thread::Builder::new()
                .name(format!("{}/{}", chain.name, id))
                .spawn(move || generate(state, exporters, stop))
                .with_context(|| format!("failed to spawn generator `{id}`"))?;
            chain.workers.push(worker);
        }

        log::info!(
            "Synthetic chain `{}` created with {} element(s)",
            chain.name,
            chain.elements.len()
        );
        Ok(Box::new(chain))
    }

    fn finalize(&self) {
        if !self.initialized.load(Ordering::SeqCst) || self.finalized.swap(true, Ordering::SeqCst) {
            log::warn!("Synthetic runtime finalized while not running");
            return;
        }
        let live = self.live_chains();
        if live > 0 {
            log::warn!("Synthetic runtime finalized with {live} live chain(s)");
        }
        log::info!("Synthetic runtime finalized");
    }
}

fn generate(state: Arc<GeneratorState>, exporters: Vec<Arc<ExportPort>>, stop: SignalOfStop) {
    let interval = Duration::from_secs_f64(1.0 / state.fps as f64);
    // Sizes are checked when the chain is created
    let len = state.meta.byte_len().unwrap_or(0);
    let mut pixels = vec![0u8; len];
    let mut tick: u64 = 0;

    loop {
        let started = Instant::now();
        let wanted = !state.paused.load(Ordering::Acquire)
            && exporters.iter().any(|p| p.enabled.load(Ordering::Acquire));
        if wanted {
            paint(&mut pixels, state.meta, tick);
            tick = tick.wrapping_add(1);
            for port in &exporters {
                port.deliver(&pixels, state.meta);
            }
        }

        let remaining = interval.saturating_sub(started.elapsed());
        if stop.wait_timeout(remaining) {
            break;
        }
    }
}

/// Scrolling BGRA gradient, different on every tick.
fn paint(pixels: &mut [u8], meta: FrameMetadata, tick: u64) {
    let width = meta.width.max(1) as usize;
    let shift = tick as usize;
    for (i, px) in pixels.chunks_exact_mut(4).enumerate() {
        let (x, y) = (i % width, i / width);
        px[0] = x.wrapping_add(shift) as u8;
        px[1] = y.wrapping_add(shift / 2) as u8;
        px[2] = (x ^ y) as u8;
        px[3] = 0xFF;
    }
}

struct SyntheticChain {
    name: String,
    elements: HashMap<String, Element>,
    on_error: ErrorHook,
    stop: SignalOfStop,
    workers: Vec<JoinHandle<()>>,
    live_chains: Arc<AtomicUsize>,
}

impl ChainBackend for SyntheticChain {
    fn set_export_callback(&mut self, stage: &str, callback: ExportCallback) -> Result<()> {
        match self.elements.get(stage) {
            Some(Element::Exporter(port)) => {
                *port.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
                Ok(())
            }
            Some(Element::Generator(_)) => {
                bail!("chain `{}`: `{stage}` is not a frame exporter", self.name)
            }
            None => bail!("chain `{}`: unknown element `{stage}`", self.name),
        }
    }

    fn execute(&mut self, command: &str) -> Result<()> {
        let doc: serde_json::Map<String, Value> =
            serde_json::from_str(command).context("command is not a JSON object")?;
        if doc.is_empty() {
            bail!("empty command");
        }

        // Validate everything before touching any element
        let mut actions = Vec::with_capacity(doc.len());
        for (target, body) in &doc {
            let element = self
                .elements
                .get(target)
                .ok_or_else(|| anyhow!("chain `{}`: unknown element `{target}`", self.name))?;
            let on = match body.get("command").and_then(Value::as_str) {
                Some("on") => true,
                Some("off") => false,
                Some(other) => bail!("element `{target}`: unsupported command `{other}`"),
                None => bail!("element `{target}`: missing `command`"),
            };
            actions.push((target.as_str(), element, on));
        }

        for (target, element, on) in actions {
            match element {
                Element::Exporter(port) => {
                    if on && !port.has_callback() {
                        (self.on_error)(target, ERROR_NO_CALLBACK);
                    }
                    port.enabled.store(on, Ordering::Release);
                }
                Element::Generator(state) => state.paused.store(!on, Ordering::Release),
            }
            log::debug!(
                "Chain `{}`: `{target}` switched {}",
                self.name,
                if on { "on" } else { "off" }
            );
        }
        Ok(())
    }
}

impl Drop for SyntheticChain {
    fn drop(&mut self) {
        self.stop.cancel();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Chain `{}`: generator thread panicked", self.name);
            }
        }
        self.live_chains.fetch_sub(1, Ordering::SeqCst);
        log::debug!("Synthetic chain `{}` destroyed", self.name);
    }
}
