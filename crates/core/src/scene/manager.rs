use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use super::{Scene, SceneReport, SceneSet, SceneSource};
use crate::{OculizerError, Result, Rig};

/// Owns the loaded scenes and publishes the current one.
///
/// Readers take an `Arc<Scene>` snapshot without locking. Writers (scene
/// switches and reloads) are serialised by the set lock and publish the new
/// scene in one atomic store.
pub struct SceneManager {
    rig: Arc<Rig>,
    sample_rate: u32,
    source: Box<dyn SceneSource>,
    scenes: Mutex<SceneSet>,
    current: ArcSwap<Scene>,
}

impl SceneManager {
    /// Loads every scene from `source` and makes `initial` current, or the
    /// first scene by name when `initial` is `None`.
    pub fn new(
        rig: Arc<Rig>,
        sample_rate: u32,
        source: impl SceneSource + 'static,
        initial: Option<&str>,
    ) -> Result<(Self, SceneReport)> {
        let definitions = source.load()?;
        let (scenes, report) = SceneSet::compile(&definitions, &rig, sample_rate)?;

        let current = match initial {
            Some(name) => scenes
                .get(name)
                .ok_or_else(|| OculizerError::SceneNotFound(name.to_string()))?,
            None => scenes
                .names()
                .next()
                .and_then(|name| scenes.get(name))
                .ok_or_else(|| OculizerError::config("no scenes were loaded"))?,
        };
        info!(scene = current.name(), count = scenes.len(), "scenes loaded");

        let manager = Self {
            rig,
            sample_rate,
            source: Box::new(source),
            scenes: Mutex::new(scenes),
            current: ArcSwap::new(current),
        };
        Ok((manager, report))
    }

    pub fn rig(&self) -> &Arc<Rig> {
        &self.rig
    }

    /// Snapshot of the current scene.
    pub fn current(&self) -> Arc<Scene> {
        self.current.load_full()
    }

    pub fn current_name(&self) -> String {
        self.current.load().name().to_string()
    }

    pub fn scene_names(&self) -> Vec<String> {
        self.scenes.lock().names().map(str::to_string).collect()
    }

    /// Makes `name` the current scene. Unknown names leave the current scene
    /// untouched.
    pub fn set_scene(&self, name: &str) -> Result<()> {
        let scenes = self.scenes.lock();
        let scene = scenes
            .get(name)
            .ok_or_else(|| OculizerError::SceneNotFound(name.to_string()))?;
        self.current.store(scene);
        info!(scene = name, "scene switched");
        Ok(())
    }

    /// Switches to the scene after the current one in name order, wrapping.
    pub fn next_scene(&self) -> Result<String> {
        self.step(1)
    }

    /// Switches to the scene before the current one in name order, wrapping.
    pub fn previous_scene(&self) -> Result<String> {
        self.step(-1)
    }

    fn step(&self, offset: isize) -> Result<String> {
        let scenes = self.scenes.lock();
        let names: Vec<&str> = scenes.names().collect();
        if names.is_empty() {
            return Err(OculizerError::config("no scenes were loaded"));
        }

        let current = self.current.load();
        let position = names
            .iter()
            .position(|name| *name == current.name())
            .unwrap_or(0) as isize;
        let target = names[(position + offset).rem_euclid(names.len() as isize) as usize];
        let scene = scenes
            .get(target)
            .ok_or_else(|| OculizerError::SceneNotFound(target.to_string()))?;
        self.current.store(scene);
        info!(scene = target, "scene switched");
        Ok(target.to_string())
    }

    /// Re-reads the scene store. The current scene keeps its name and picks
    /// up its new definition. If that name disappeared nothing changes and
    /// `SceneNotFound` is returned.
    pub fn reload(&self) -> Result<SceneReport> {
        let definitions = self.source.load()?;
        let (fresh, report) = SceneSet::compile(&definitions, &self.rig, self.sample_rate)?;

        let mut scenes = self.scenes.lock();
        let current_name = self.current.load().name().to_string();
        let current = fresh
            .get(&current_name)
            .ok_or_else(|| OculizerError::SceneNotFound(current_name.clone()))?;

        *scenes = fresh;
        self.current.store(current);
        info!(scene = %current_name, count = scenes.len(), "scenes reloaded");
        Ok(report)
    }
}

impl std::fmt::Debug for SceneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneManager")
            .field("rig", &self.rig.name())
            .field("sample_rate", &self.sample_rate)
            .field("current", &self.current.load().name())
            .finish()
    }
}
