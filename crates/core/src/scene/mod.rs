use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    mapping::{
        Band, BandMapping, Color, Level, OutputRange, Periodic, PeriodicRgb, PowerRange,
        RgbFrequency, Setting, StaticDimmer, StaticRgb, StaticStrobe, StrobeGate, Waveform,
    },
    FixtureKind, OculizerError, Result, Rig,
};

pub mod manager;

/// Rule class deciding how a light's values are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulator {
    #[serde(alias = "fft")]
    Frequency,
    #[serde(alias = "bool")]
    Static,
    #[serde(alias = "time")]
    Periodic,
}

/// One light as written in a scene file. Which fields are required depends
/// on the modulator; [`LightAssignment::compile`] checks them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FixtureKind,
    pub modulator: Modulator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_range: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_range: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness_range: Option<OutputRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_range: Option<OutputRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Setting<Color>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strobe: Option<Setting<Level>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<Setting<Level>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<Setting<Level>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Waveform>,
    /// Oscillation frequency in Hz for periodic lights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
}

/// A scene as written in the external store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDefinition {
    pub lights: Vec<LightDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DimmerProgram {
    Frequency(BandMapping),
    Static(StaticDimmer),
    Periodic(Periodic),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RgbProgram {
    Frequency(RgbFrequency),
    Static(StaticRgb),
    Periodic(PeriodicRgb),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrobeProgram {
    Frequency(StrobeGate),
    Static(StaticStrobe),
    Periodic(Periodic),
}

/// Validated parameters for every fixture kind and modulator combination.
#[derive(Debug, Clone, PartialEq)]
pub enum LightProgram {
    Dimmer(DimmerProgram),
    Rgb(RgbProgram),
    Strobe(StrobeProgram),
}

impl LightProgram {
    pub fn kind(&self) -> FixtureKind {
        match self {
            LightProgram::Dimmer(_) => FixtureKind::Dimmer,
            LightProgram::Rgb(_) => FixtureKind::Rgb,
            LightProgram::Strobe(_) => FixtureKind::Strobe,
        }
    }

    pub fn modulator(&self) -> Modulator {
        match self {
            LightProgram::Dimmer(DimmerProgram::Frequency(_))
            | LightProgram::Rgb(RgbProgram::Frequency(_))
            | LightProgram::Strobe(StrobeProgram::Frequency(_)) => Modulator::Frequency,
            LightProgram::Dimmer(DimmerProgram::Static(_))
            | LightProgram::Rgb(RgbProgram::Static(_))
            | LightProgram::Strobe(StrobeProgram::Static(_)) => Modulator::Static,
            LightProgram::Dimmer(DimmerProgram::Periodic(_))
            | LightProgram::Rgb(RgbProgram::Periodic(_))
            | LightProgram::Strobe(StrobeProgram::Periodic(_)) => Modulator::Periodic,
        }
    }
}

/// A light inside a scene: the fixture it drives and how.
#[derive(Debug, Clone, PartialEq)]
pub struct LightAssignment {
    pub fixture: String,
    pub program: LightProgram,
}

impl LightAssignment {
    /// Validates a definition. Bands are checked against the Nyquist
    /// frequency of `sample_rate`.
    pub fn compile(definition: &LightDefinition, sample_rate: u32) -> Result<Self> {
        let fields = Fields {
            light: definition,
            sample_rate,
        };
        let program = match (definition.kind, definition.modulator) {
            (FixtureKind::Dimmer, Modulator::Frequency) => {
                LightProgram::Dimmer(DimmerProgram::Frequency(fields.band_mapping()?))
            }
            (FixtureKind::Dimmer, Modulator::Static) => {
                LightProgram::Dimmer(DimmerProgram::Static(StaticDimmer {
                    brightness: fields.level(definition.brightness, "brightness")?,
                }))
            }
            (FixtureKind::Dimmer, Modulator::Periodic) => {
                LightProgram::Dimmer(DimmerProgram::Periodic(fields.periodic()?))
            }
            (FixtureKind::Rgb, Modulator::Frequency) => {
                LightProgram::Rgb(RgbProgram::Frequency(RgbFrequency {
                    mapping: fields.band_mapping()?,
                    color: definition.color.unwrap_or(Setting::Random),
                    strobe: match definition.strobe {
                        None => Level::OFF,
                        Some(Setting::Fixed(level)) => level,
                        Some(Setting::Random) => {
                            return Err(fields.invalid("strobe cannot be random for frequency lights"))
                        }
                    },
                }))
            }
            (FixtureKind::Rgb, Modulator::Static) => LightProgram::Rgb(RgbProgram::Static(StaticRgb {
                brightness: fields.level(definition.brightness, "brightness")?,
                color: fields.color()?,
                strobe: definition.strobe.unwrap_or(Setting::Fixed(Level::OFF)),
            })),
            (FixtureKind::Rgb, Modulator::Periodic) => {
                LightProgram::Rgb(RgbProgram::Periodic(PeriodicRgb {
                    periodic: fields.periodic()?,
                    color: definition.color.unwrap_or(Setting::Random),
                    strobe: definition.strobe.unwrap_or(Setting::Fixed(Level::OFF)),
                }))
            }
            (FixtureKind::Strobe, Modulator::Frequency) => {
                let band = fields.band()?;
                let threshold = match (definition.threshold, definition.power_range) {
                    (Some(threshold), _) => threshold,
                    (None, Some([low, _])) => low,
                    (None, None) => return Err(fields.missing("threshold")),
                };
                LightProgram::Strobe(StrobeProgram::Frequency(StrobeGate { band, threshold }))
            }
            (FixtureKind::Strobe, Modulator::Static) => {
                LightProgram::Strobe(StrobeProgram::Static(StaticStrobe {
                    speed: fields.level(definition.speed, "speed")?,
                    brightness: fields.level(definition.brightness, "brightness")?,
                }))
            }
            (FixtureKind::Strobe, Modulator::Periodic) => {
                LightProgram::Strobe(StrobeProgram::Periodic(fields.periodic()?))
            }
        };

        Ok(Self {
            fixture: definition.name.clone(),
            program,
        })
    }

    pub fn kind(&self) -> FixtureKind {
        self.program.kind()
    }
}

/// Field accessors that turn missing or malformed values into
/// configuration errors naming the light.
struct Fields<'a> {
    light: &'a LightDefinition,
    sample_rate: u32,
}

impl Fields<'_> {
    fn invalid(&self, reason: impl std::fmt::Display) -> OculizerError {
        OculizerError::config(format!("light `{}`: {reason}", self.light.name))
    }

    fn missing(&self, field: &str) -> OculizerError {
        self.invalid(format!(
            "{} {:?} light requires `{field}`",
            self.light.kind, self.light.modulator
        ))
    }

    fn band(&self) -> Result<Band> {
        let [low, high] = self
            .light
            .frequency_range
            .ok_or_else(|| self.missing("frequency_range"))?;
        Band::new(low, high, self.sample_rate).map_err(|err| self.attribute(err))
    }

    /// Prefixes configuration errors with the light name; other errors pass
    /// through unchanged.
    fn attribute(&self, err: OculizerError) -> OculizerError {
        match err {
            OculizerError::Configuration(reason) => self.invalid(reason),
            other => other,
        }
    }

    fn band_mapping(&self) -> Result<BandMapping> {
        let [low, high] = self
            .light
            .power_range
            .ok_or_else(|| self.missing("power_range"))?;
        Ok(BandMapping {
            band: self.band()?,
            power: PowerRange::new(low, high).map_err(|err| self.attribute(err))?,
            output: self.light.brightness_range.unwrap_or_default(),
        })
    }

    fn level(&self, value: Option<Setting<Level>>, field: &str) -> Result<Setting<Level>> {
        value.ok_or_else(|| self.missing(field))
    }

    fn color(&self) -> Result<Setting<Color>> {
        self.light.color.ok_or_else(|| self.missing("color"))
    }

    fn periodic(&self) -> Result<Periodic> {
        let waveform = self.light.waveform.ok_or_else(|| self.missing("waveform"))?;
        let frequency_hz = self.light.frequency.ok_or_else(|| self.missing("frequency"))?;
        if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
            return Err(self.invalid(format!(
                "oscillation frequency must be positive, got {frequency_hz}"
            )));
        }
        let brightness = self.light.brightness_range;
        let speed = self.light.speed_range;
        if brightness.is_none() && speed.is_none() {
            return Err(self.missing("brightness_range` or `speed_range"));
        }
        Ok(Periodic {
            waveform,
            frequency_hz,
            brightness,
            speed,
        })
    }
}

/// A named, immutable set of light assignments.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    name: String,
    lights: Vec<LightAssignment>,
}

impl Scene {
    pub fn new(name: impl Into<String>, lights: Vec<LightAssignment>) -> Self {
        Self {
            name: name.into(),
            lights,
        }
    }

    /// Validates a definition against the rig. Fixtures missing from the rig
    /// are returned as unresolved rather than failing; a kind mismatch fails.
    pub fn compile(
        name: &str,
        definition: &SceneDefinition,
        rig: &Rig,
        sample_rate: u32,
    ) -> Result<(Self, Vec<String>)> {
        let mut lights = Vec::with_capacity(definition.lights.len());
        let mut unresolved = Vec::new();

        for light in &definition.lights {
            let assignment = LightAssignment::compile(light, sample_rate).map_err(|err| match err {
                OculizerError::Configuration(reason) => {
                    OculizerError::config(format!("scene `{name}`: {reason}"))
                }
                other => other,
            })?;
            match rig.fixture(&assignment.fixture) {
                Some(profile) if profile.kind != assignment.kind() => {
                    return Err(OculizerError::config(format!(
                        "scene `{name}`: light `{}` is declared {} but the rig fixture is {}",
                        assignment.fixture,
                        assignment.kind(),
                        profile.kind
                    )));
                }
                Some(_) => {}
                None => {
                    if !unresolved.contains(&assignment.fixture) {
                        unresolved.push(assignment.fixture.clone());
                    }
                }
            }
            lights.push(assignment);
        }

        Ok((Self::new(name, lights), unresolved))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lights(&self) -> &[LightAssignment] {
        &self.lights
    }

    pub fn references(&self, fixture: &str) -> bool {
        self.lights.iter().any(|light| light.fixture == fixture)
    }

    pub fn fixture_names(&self) -> impl Iterator<Item = &str> {
        self.lights.iter().map(|light| light.fixture.as_str())
    }
}

/// Fixture references that did not resolve against the rig, per scene.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneReport {
    pub unresolved: BTreeMap<String, Vec<String>>,
}

impl SceneReport {
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Every loaded scene, keyed and ordered by name.
#[derive(Debug, Clone, Default)]
pub struct SceneSet {
    scenes: BTreeMap<String, Arc<Scene>>,
}

impl SceneSet {
    pub fn compile(
        definitions: &BTreeMap<String, SceneDefinition>,
        rig: &Rig,
        sample_rate: u32,
    ) -> Result<(Self, SceneReport)> {
        let mut scenes = BTreeMap::new();
        let mut report = SceneReport::default();

        for (name, definition) in definitions {
            let (scene, unresolved) = Scene::compile(name, definition, rig, sample_rate)?;
            if !unresolved.is_empty() {
                warn!(scene = %name, fixtures = ?unresolved, "scene references fixtures missing from the rig");
                report.unresolved.insert(name.clone(), unresolved);
            }
            scenes.insert(name.clone(), Arc::new(scene));
        }

        debug!(count = scenes.len(), "compiled scenes");
        Ok((Self { scenes }, report))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Scene>> {
        self.scenes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scenes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

/// External store of scene definitions.
pub trait SceneSource: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, SceneDefinition>>;
}

/// Reads every `*.json` file of a directory, keyed by file stem.
#[derive(Debug, Clone)]
pub struct SceneDirectory {
    path: PathBuf,
}

impl SceneDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SceneSource for SceneDirectory {
    fn load(&self) -> Result<BTreeMap<String, SceneDefinition>> {
        let mut scenes = BTreeMap::new();
        for entry in std::fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path)?;
            let definition: SceneDefinition = serde_json::from_str(&text).map_err(|err| {
                OculizerError::config(format!("{}: {err}", path.display()))
            })?;
            scenes.insert(stem.to_string(), definition);
        }
        Ok(scenes)
    }
}

/// In-memory store whose contents can be swapped between reloads.
#[derive(Debug, Default)]
pub struct MemoryScenes {
    scenes: RwLock<BTreeMap<String, SceneDefinition>>,
}

impl MemoryScenes {
    pub fn new(scenes: BTreeMap<String, SceneDefinition>) -> Self {
        Self {
            scenes: RwLock::new(scenes),
        }
    }

    pub fn replace(&self, scenes: BTreeMap<String, SceneDefinition>) {
        *self.scenes.write() = scenes;
    }
}

impl SceneSource for MemoryScenes {
    fn load(&self) -> Result<BTreeMap<String, SceneDefinition>> {
        Ok(self.scenes.read().clone())
    }
}

impl<S: SceneSource + ?Sized> SceneSource for Arc<S> {
    fn load(&self) -> Result<BTreeMap<String, SceneDefinition>> {
        (**self).load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FixtureProfile, RigDefinition};

    fn rig() -> Rig {
        let definition: RigDefinition = serde_json::from_str(
            r#"{ "lights": [
                { "name": "ropes", "type": "dimmer" },
                { "name": "rgb1", "type": "rgb" },
                { "name": "strobe", "type": "strobe" }
            ] }"#,
        )
        .unwrap();
        Rig::from_definition(definition).unwrap()
    }

    fn light(json: &str) -> LightDefinition {
        serde_json::from_str(json).unwrap()
    }

    fn scene(json: &str) -> SceneDefinition {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn compiles_every_kind_and_modulator() {
        let cases = [
            r#"{ "name": "a", "type": "dimmer", "modulator": "frequency",
                 "frequency_range": [20, 200], "power_range": [5, 35] }"#,
            r#"{ "name": "a", "type": "dimmer", "modulator": "static", "brightness": 128 }"#,
            r#"{ "name": "a", "type": "dimmer", "modulator": "periodic",
                 "waveform": "sine", "frequency": 0.5, "brightness_range": [0, 255] }"#,
            r#"{ "name": "a", "type": "rgb", "modulator": "fft", "frequency_range": [0, 2000],
                 "power_range": [1, 15], "color": "random", "strobe": false }"#,
            r#"{ "name": "a", "type": "rgb", "modulator": "bool", "brightness": "random",
                 "color": "blue", "strobe": true }"#,
            r#"{ "name": "a", "type": "rgb", "modulator": "time", "waveform": "triangle",
                 "frequency": 2, "brightness_range": [10, 250], "color": "red" }"#,
            r#"{ "name": "a", "type": "strobe", "modulator": "frequency",
                 "frequency_range": [4000, 8000], "threshold": 3.5 }"#,
            r#"{ "name": "a", "type": "strobe", "modulator": "static", "speed": 255, "brightness": 255 }"#,
            r#"{ "name": "a", "type": "strobe", "modulator": "periodic", "waveform": "square",
                 "frequency": 1, "speed_range": [0, 255], "brightness_range": [0, 255] }"#,
        ];
        let expected = [
            (FixtureKind::Dimmer, Modulator::Frequency),
            (FixtureKind::Dimmer, Modulator::Static),
            (FixtureKind::Dimmer, Modulator::Periodic),
            (FixtureKind::Rgb, Modulator::Frequency),
            (FixtureKind::Rgb, Modulator::Static),
            (FixtureKind::Rgb, Modulator::Periodic),
            (FixtureKind::Strobe, Modulator::Frequency),
            (FixtureKind::Strobe, Modulator::Static),
            (FixtureKind::Strobe, Modulator::Periodic),
        ];

        for (json, (kind, modulator)) in cases.iter().zip(expected) {
            let assignment = LightAssignment::compile(&light(json), 44_100).unwrap();
            assert_eq!(assignment.program.kind(), kind);
            assert_eq!(assignment.program.modulator(), modulator);
        }
    }

    #[test]
    fn strobe_threshold_defaults_to_low_power() {
        let assignment = LightAssignment::compile(
            &light(
                r#"{ "name": "s", "type": "strobe", "modulator": "fft",
                     "frequency_range": [4000, 8000], "power_range": [2.5, 9] }"#,
            ),
            44_100,
        )
        .unwrap();
        match assignment.program {
            LightProgram::Strobe(StrobeProgram::Frequency(gate)) => assert_eq!(gate.threshold, 2.5),
            other => panic!("unexpected program {other:?}"),
        }
    }

    #[test]
    fn zero_width_power_range_fails_at_load() {
        let err = LightAssignment::compile(
            &light(
                r#"{ "name": "d", "type": "dimmer", "modulator": "frequency",
                     "frequency_range": [20, 200], "power_range": [10, 10] }"#,
            ),
            44_100,
        )
        .unwrap_err();
        assert!(matches!(err, OculizerError::Configuration(_)));
        assert!(err.to_string().contains("`d`"));
    }

    #[test]
    fn band_above_nyquist_fails_at_load() {
        let err = LightAssignment::compile(
            &light(
                r#"{ "name": "d", "type": "dimmer", "modulator": "frequency",
                     "frequency_range": [20, 30000], "power_range": [1, 2] }"#,
            ),
            44_100,
        )
        .unwrap_err();
        assert!(matches!(err, OculizerError::OutOfRange { .. }));
    }

    #[test]
    fn missing_fields_are_configuration_errors() {
        let cases = [
            r#"{ "name": "d", "type": "dimmer", "modulator": "frequency", "power_range": [1, 2] }"#,
            r#"{ "name": "d", "type": "dimmer", "modulator": "static" }"#,
            r#"{ "name": "d", "type": "dimmer", "modulator": "periodic", "waveform": "sine", "frequency": 1 }"#,
            r#"{ "name": "d", "type": "dimmer", "modulator": "periodic", "waveform": "sine",
                 "frequency": 0, "brightness_range": [0, 255] }"#,
            r#"{ "name": "r", "type": "rgb", "modulator": "fft", "frequency_range": [0, 200],
                 "power_range": [1, 2], "strobe": "random" }"#,
        ];
        for json in cases {
            let result = LightAssignment::compile(&light(json), 44_100);
            assert!(
                matches!(result, Err(OculizerError::Configuration(_))),
                "{json} -> {result:?}"
            );
        }
    }

    #[test]
    fn unresolved_fixtures_are_reported_not_fatal() {
        let definition = scene(
            r#"{ "lights": [
                { "name": "rgb1", "type": "rgb", "modulator": "static", "brightness": 255, "color": "red" },
                { "name": "lasers", "type": "dimmer", "modulator": "static", "brightness": 255 }
            ] }"#,
        );
        let (scene, unresolved) = Scene::compile("party", &definition, &rig(), 44_100).unwrap();

        assert_eq!(scene.lights().len(), 2);
        assert_eq!(unresolved, vec!["lasers".to_string()]);
        assert!(scene.references("lasers"));
    }

    #[test]
    fn kind_mismatch_with_rig_fails() {
        let definition = scene(
            r#"{ "lights": [
                { "name": "ropes", "type": "rgb", "modulator": "static", "brightness": 255, "color": "red" }
            ] }"#,
        );
        let err = Scene::compile("bad", &definition, &rig(), 44_100).unwrap_err();
        assert!(err.to_string().contains("ropes"));
    }

    #[test]
    fn scene_set_collects_reports() {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "a".to_string(),
            scene(r#"{ "lights": [ { "name": "ghost", "type": "dimmer", "modulator": "static", "brightness": 1 } ] }"#),
        );
        definitions.insert("b".to_string(), SceneDefinition::default());

        let (set, report) = SceneSet::compile(&definitions, &rig(), 44_100).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(report.unresolved["a"], vec!["ghost".to_string()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn directory_source_keys_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("static.json"),
            r#"{ "name": "static", "type": "static", "lights": [] }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenes = SceneDirectory::new(dir.path()).load().unwrap();
        assert_eq!(scenes.keys().collect::<Vec<_>>(), vec!["static"]);
    }

    #[test]
    fn explicit_rig_profiles_resolve() {
        let rig = Rig::new("one", vec![FixtureProfile::new("lamp", FixtureKind::Dimmer, 10)]).unwrap();
        let definition = scene(
            r#"{ "lights": [ { "name": "lamp", "type": "dimmer", "modulator": "static", "brightness": 9 } ] }"#,
        );
        let (_, unresolved) = Scene::compile("s", &definition, &rig, 44_100).unwrap();
        assert!(unresolved.is_empty());
    }
}
