//! Output side of the pipeline: the tick loop that turns the current scene and
//! the latest spectrum into fixture values.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    bus::FixtureBus,
    config::ControllerConfig,
    mapping::{self, DimmerValues, RgbValues, StrobeValues},
    scene::{DimmerProgram, LightAssignment, LightProgram, RgbProgram, StrobeProgram},
    timeline::PlaybackClock,
    ErrorLog, FrameSlot, OculizerError, Result, Rig, Scene, SceneManager, SpectrumFrame,
};

/// Values produced for one fixture on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureValues {
    Dimmer(DimmerValues),
    Rgb(RgbValues),
    Strobe(StrobeValues),
}

impl FixtureValues {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            FixtureValues::Dimmer(values) => &values[..],
            FixtureValues::Rgb(values) => &values[..],
            FixtureValues::Strobe(values) => &values[..],
        }
    }
}

/// Evaluates one program. Returns `Ok(None)` for frequency programs when no
/// spectrum frame has arrived yet.
pub fn evaluate<R: Rng + ?Sized>(
    program: &LightProgram,
    frame: Option<&SpectrumFrame>,
    t: f64,
    rng: &mut R,
) -> Result<Option<FixtureValues>> {
    let values = match program {
        LightProgram::Dimmer(program) => FixtureValues::Dimmer(match program {
            DimmerProgram::Frequency(params) => match frame {
                Some(frame) => mapping::frequency_to_dimmer(frame, params)?,
                None => return Ok(None),
            },
            DimmerProgram::Static(params) => mapping::static_dimmer(params, rng),
            DimmerProgram::Periodic(params) => mapping::periodic_dimmer(params, t),
        }),
        LightProgram::Rgb(program) => FixtureValues::Rgb(match program {
            RgbProgram::Frequency(params) => match frame {
                Some(frame) => mapping::frequency_to_rgb(frame, params, rng)?,
                None => return Ok(None),
            },
            RgbProgram::Static(params) => mapping::static_rgb(params, rng),
            RgbProgram::Periodic(params) => mapping::periodic_rgb(params, t, rng),
        }),
        LightProgram::Strobe(program) => FixtureValues::Strobe(match program {
            StrobeProgram::Frequency(params) => match frame {
                Some(frame) => mapping::frequency_to_strobe_gate(frame, params)?,
                None => return Ok(None),
            },
            StrobeProgram::Static(params) => mapping::static_strobe(params, rng),
            StrobeProgram::Periodic(params) => mapping::periodic_strobe(params, t),
        }),
    };
    Ok(Some(values))
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub scene_changed: bool,
    pub switched_off: usize,
    pub written: usize,
    pub awaiting_spectrum: usize,
    pub failed: usize,
}

/// Single-threaded tick logic. [`LightController`] drives it from a worker
/// thread; tests call [`LightEngine::tick`] directly.
pub struct LightEngine<B> {
    scenes: Arc<SceneManager>,
    rig: Arc<Rig>,
    frames: FrameSlot,
    errors: ErrorLog,
    bus: B,
    rng: StdRng,
    previous: Option<Arc<Scene>>,
}

impl<B: FixtureBus> LightEngine<B> {
    pub fn new(scenes: Arc<SceneManager>, frames: FrameSlot, errors: ErrorLog, bus: B) -> Self {
        let rig = scenes.rig().clone();
        Self {
            scenes,
            rig,
            frames,
            errors,
            bus,
            rng: StdRng::from_entropy(),
            previous: None,
        }
    }

    /// Replaces the generator used for `random` settings.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Runs one tick at show time `t` seconds.
    pub fn tick(&mut self, t: f64) -> TickSummary {
        let scene = self.scenes.current();
        let frame = self.frames.latest();
        let mut summary = TickSummary::default();

        let changed = match &self.previous {
            Some(previous) => !Arc::ptr_eq(previous, &scene),
            None => true,
        };
        if changed {
            summary.scene_changed = true;
            summary.switched_off = self.switch_off_outgoing(&scene);
        }

        for light in scene.lights() {
            match self.apply(light, frame.as_deref(), t) {
                Ok(true) => summary.written += 1,
                Ok(false) => summary.awaiting_spectrum += 1,
                Err(err) => {
                    summary.failed += 1;
                    self.errors.push("controller", err);
                }
            }
        }

        if let Err(err) = self.bus.flush() {
            self.errors.push("controller", err);
        }
        self.previous = Some(scene);
        debug!(?summary, "tick");
        summary
    }

    /// Writes off values to fixtures that the outgoing scene drove and the
    /// incoming one does not. On the first tick every rig fixture the scene
    /// leaves unused is switched off.
    fn switch_off_outgoing(&mut self, scene: &Scene) -> usize {
        let outgoing: Vec<String> = match &self.previous {
            Some(previous) => {
                info!(from = previous.name(), to = scene.name(), "applying scene");
                let mut seen = HashSet::new();
                previous
                    .fixture_names()
                    .filter(|name| !scene.references(name) && seen.insert(*name))
                    .map(str::to_string)
                    .collect()
            }
            None => {
                info!(scene = scene.name(), "applying initial scene");
                self.rig
                    .fixtures()
                    .iter()
                    .filter(|profile| !scene.references(&profile.name))
                    .map(|profile| profile.name.clone())
                    .collect()
            }
        };

        let mut count = 0;
        for name in outgoing {
            // Fixtures the rig does not know were never written.
            let Some(profile) = self.rig.fixture(&name) else {
                continue;
            };
            match self.bus.write(profile.start_address, &profile.blackout()) {
                Ok(()) => count += 1,
                Err(err) => self.errors.push("controller", err),
            }
        }
        count
    }

    /// Returns `Ok(false)` when the light waits for its first spectrum frame.
    fn apply(&mut self, light: &LightAssignment, frame: Option<&SpectrumFrame>, t: f64) -> Result<bool> {
        let profile = self
            .rig
            .fixture(&light.fixture)
            .ok_or_else(|| OculizerError::mapping(&light.fixture, "fixture is not part of the rig"))?;
        if profile.kind != light.kind() {
            return Err(OculizerError::mapping(
                &light.fixture,
                format!("program drives a {} but the fixture is a {}", light.kind(), profile.kind),
            ));
        }

        let values = match evaluate(&light.program, frame, t, &mut self.rng) {
            Ok(Some(values)) => values,
            Ok(None) => return Ok(false),
            Err(err @ OculizerError::Mapping { .. }) => return Err(err),
            Err(err) => return Err(OculizerError::mapping(&light.fixture, err.to_string())),
        };
        self.bus.write(profile.start_address, values.as_slice())?;
        Ok(true)
    }
}

impl<B> std::fmt::Debug for LightEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightEngine")
            .field("scenes", &self.scenes)
            .field("previous", &self.previous.as_ref().map(|scene| scene.name().to_string()))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Stopped,
}

impl ControllerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ControllerState::Idle,
            1 => ControllerState::Running,
            _ => ControllerState::Stopped,
        }
    }
}

/// Owns the light thread. `Idle → Running → Stopped`, with `Stopped` terminal.
pub struct LightController<B> {
    config: ControllerConfig,
    state: Arc<AtomicU8>,
    engine: Option<LightEngine<B>>,
    worker: Option<JoinHandle<LightEngine<B>>>,
}

impl<B: FixtureBus + 'static> LightController<B> {
    pub fn new(engine: LightEngine<B>, config: ControllerConfig) -> Self {
        Self {
            config,
            state: Arc::new(AtomicU8::new(ControllerState::Idle as u8)),
            engine: Some(engine),
            worker: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The engine, while it is not owned by the worker thread.
    pub fn engine(&self) -> Option<&LightEngine<B>> {
        self.engine.as_ref()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state() != ControllerState::Idle {
            return Err(OculizerError::msg(format!(
                "controller cannot start from {:?}",
                self.state()
            )));
        }
        let mut engine = self
            .engine
            .take()
            .ok_or_else(|| OculizerError::msg("controller has no engine"))?;

        self.state
            .store(ControllerState::Running as u8, Ordering::Release);
        let state = self.state.clone();
        let interval = Duration::from_millis(self.config.tick_interval_ms);

        let spawned = thread::Builder::new()
            .name("oculizer-lights".into())
            .spawn(move || {
                let clock = PlaybackClock::start();
                while state.load(Ordering::Acquire) == ControllerState::Running as u8 {
                    engine.tick(clock.seconds());
                    if interval.is_zero() {
                        thread::yield_now();
                    } else {
                        thread::sleep(interval);
                    }
                }
                engine
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(tick_ms = self.config.tick_interval_ms, "light controller started");
                Ok(())
            }
            Err(err) => {
                self.state
                    .store(ControllerState::Stopped as u8, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Stops the tick loop at the next tick boundary and waits for it. Safe to
    /// call more than once. Does not black out the rig.
    pub fn stop(&mut self) -> Result<()> {
        let previous = self
            .state
            .swap(ControllerState::Stopped as u8, Ordering::AcqRel);
        if let Some(worker) = self.worker.take() {
            let engine = worker
                .join()
                .map_err(|_| OculizerError::msg("light thread panicked"))?;
            self.engine = Some(engine);
        }
        if ControllerState::from_u8(previous) != ControllerState::Stopped {
            info!("light controller stopped");
        }
        Ok(())
    }

    pub fn into_engine(mut self) -> Result<LightEngine<B>> {
        self.stop()?;
        self.engine
            .take()
            .ok_or_else(|| OculizerError::msg("controller has no engine"))
    }
}

impl<B> Drop for LightController<B> {
    fn drop(&mut self) {
        self.state
            .store(ControllerState::Stopped as u8, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<B> std::fmt::Debug for LightController<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightController")
            .field("state", &ControllerState::from_u8(self.state.load(Ordering::Acquire)))
            .field("config", &self.config)
            .finish()
    }
}
