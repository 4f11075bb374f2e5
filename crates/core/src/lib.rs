//! Core library for the Oculizer light controller.
//!
//! Audio is captured and reduced to magnitude spectra on one thread, while a
//! second thread evaluates the active scene against the latest spectrum and
//! writes fixture values to a lighting bus. Each module owns one piece of that
//! pipeline (capture, analysis, scenes, mapping, output).

pub mod analysis;
pub mod audio;
pub mod bus;
pub mod config;
pub mod controller;
pub mod error;
pub mod fixture;
pub mod mapping;
pub mod scene;
pub mod timeline;

pub use analysis::{BlockAssembler, SpectrumAnalyzer, SpectrumFrame};
pub use audio::{AudioListener, BlockProcessor, ErrorLog, ErrorRecord, FrameSlot};
pub use bus::{DmxUniverse, FixtureBus, RecordedWrite, RecordingBus};
pub use config::{AppConfig, AudioConfig, ControllerConfig};
pub use controller::{ControllerState, FixtureValues, LightController, LightEngine, TickSummary};
pub use error::{OculizerError, Result};
pub use fixture::{FixtureDefinition, FixtureKind, FixtureProfile, Rig, RigDefinition};
pub use scene::manager::SceneManager;
pub use scene::{
    LightAssignment, LightDefinition, LightProgram, MemoryScenes, Modulator, Scene,
    SceneDefinition, SceneDirectory, SceneReport, SceneSet, SceneSource,
};
pub use timeline::PlaybackClock;
