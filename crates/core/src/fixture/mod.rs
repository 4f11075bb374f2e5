//! Fixture profiles and the rig they are patched into.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{OculizerError, Result};

/// Number of addressable slots in one DMX universe.
pub const UNIVERSE_SIZE: usize = 512;

/// Kind of physical fixture. Decides how many values a light writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureKind {
    Dimmer,
    Rgb,
    Strobe,
}

impl FixtureKind {
    /// Output values per write: dimmer (brightness), rgb (brightness, R, G,
    /// B, strobe, reserved), strobe (speed, brightness).
    pub fn value_count(self) -> usize {
        match self {
            FixtureKind::Dimmer => 1,
            FixtureKind::Rgb => 6,
            FixtureKind::Strobe => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FixtureKind::Dimmer => "dimmer",
            FixtureKind::Rgb => "rgb",
            FixtureKind::Strobe => "strobe",
        }
    }
}

impl std::fmt::Display for FixtureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A patched fixture: identity, kind and DMX address range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureProfile {
    pub name: String,
    pub kind: FixtureKind,
    /// First DMX address, 1-based.
    pub start_address: u16,
    pub channel_count: u16,
}

impl FixtureProfile {
    pub fn new(name: impl Into<String>, kind: FixtureKind, start_address: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            start_address,
            channel_count: kind.value_count() as u16,
        }
    }

    /// Last DMX address occupied by the fixture.
    pub fn end_address(&self) -> u16 {
        self.start_address + self.channel_count.saturating_sub(1)
    }

    /// The all-off write for this fixture.
    pub fn blackout(&self) -> Vec<u8> {
        vec![0; self.kind.value_count()]
    }
}

/// Entry of a rig definition file. Address and channel count are optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FixtureKind,
    #[serde(default, alias = "start_channel")]
    pub start_address: Option<u16>,
    #[serde(default)]
    pub channels: Option<u16>,
}

/// On-disk rig definition: a named list of fixtures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigDefinition {
    #[serde(default)]
    pub name: String,
    pub lights: Vec<FixtureDefinition>,
}

/// The fixed set of fixture profiles for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct Rig {
    name: String,
    fixtures: Vec<FixtureProfile>,
    by_name: HashMap<String, usize>,
}

impl Rig {
    /// Builds a rig from explicit profiles, checking names and address ranges.
    pub fn new(name: impl Into<String>, fixtures: Vec<FixtureProfile>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(fixtures.len());
        for (index, fixture) in fixtures.iter().enumerate() {
            validate_profile(fixture)?;
            if by_name.insert(fixture.name.clone(), index).is_some() {
                return Err(OculizerError::config(format!(
                    "fixture `{}` is defined more than once",
                    fixture.name
                )));
            }
        }

        Ok(Self {
            name: name.into(),
            fixtures,
            by_name,
        })
    }

    /// Patches a rig definition. Fixtures without an address follow the
    /// previous fixture, starting at address 1.
    pub fn from_definition(definition: RigDefinition) -> Result<Self> {
        let mut next_address: u32 = 1;
        let mut fixtures = Vec::with_capacity(definition.lights.len());

        for light in definition.lights {
            let start = light.start_address.map(u32::from).unwrap_or(next_address);
            let channels = light.channels.unwrap_or(light.kind.value_count() as u16);
            if start == 0 || start as usize > UNIVERSE_SIZE {
                return Err(OculizerError::config(format!(
                    "fixture `{}` does not fit in the universe (address {start})",
                    light.name
                )));
            }
            next_address = start + u32::from(channels);
            fixtures.push(FixtureProfile {
                name: light.name,
                kind: light.kind,
                start_address: start as u16,
                channel_count: channels,
            });
        }

        Self::new(definition.name, fixtures)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let definition: RigDefinition = serde_json::from_str(&text)?;
        Self::from_definition(definition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fixture(&self, name: &str) -> Option<&FixtureProfile> {
        self.by_name.get(name).map(|index| &self.fixtures[*index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn fixtures(&self) -> &[FixtureProfile] {
        &self.fixtures
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

fn validate_profile(fixture: &FixtureProfile) -> Result<()> {
    let needed = fixture.kind.value_count() as u16;
    if fixture.channel_count < needed {
        return Err(OculizerError::config(format!(
            "{} fixture `{}` needs {needed} channels but declares {}",
            fixture.kind, fixture.name, fixture.channel_count
        )));
    }
    let end = fixture.start_address as usize + fixture.channel_count as usize - 1;
    if fixture.start_address == 0 || end > UNIVERSE_SIZE {
        return Err(OculizerError::config(format!(
            "fixture `{}` spans addresses {}..={end}, outside 1..={UNIVERSE_SIZE}",
            fixture.name, fixture.start_address
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(json: &str) -> RigDefinition {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn patches_fixtures_sequentially() {
        let rig = Rig::from_definition(definition(
            r#"{
                "name": "testing",
                "lights": [
                    { "name": "ropes", "type": "dimmer" },
                    { "name": "rgb1", "type": "rgb" },
                    { "name": "strobe", "type": "strobe" },
                    { "name": "lamp", "type": "dimmer", "start_address": 100 }
                ]
            }"#,
        ))
        .unwrap();

        assert_eq!(rig.len(), 4);
        assert_eq!(rig.fixture("ropes").unwrap().start_address, 1);
        assert_eq!(rig.fixture("rgb1").unwrap().start_address, 2);
        assert_eq!(rig.fixture("rgb1").unwrap().end_address(), 7);
        assert_eq!(rig.fixture("strobe").unwrap().start_address, 8);
        assert_eq!(rig.fixture("lamp").unwrap().start_address, 100);
        assert!(rig.fixture("lasers").is_none());
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Rig::from_definition(definition(
            r#"{ "lights": [
                { "name": "rgb1", "type": "rgb" },
                { "name": "rgb1", "type": "rgb" }
            ] }"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("rgb1"));
    }

    #[test]
    fn rejects_fixtures_past_the_universe() {
        let result = Rig::from_definition(definition(
            r#"{ "lights": [ { "name": "rgb1", "type": "rgb", "start_address": 510 } ] }"#,
        ));
        assert!(matches!(result, Err(OculizerError::Configuration(_))));
    }

    #[test]
    fn rejects_too_few_channels() {
        let result = Rig::new(
            "tiny",
            vec![FixtureProfile {
                name: "rgb1".into(),
                kind: FixtureKind::Rgb,
                start_address: 1,
                channel_count: 3,
            }],
        );
        assert!(result.is_err());
    }

    #[test]
    fn blackout_matches_kind_width() {
        assert_eq!(FixtureProfile::new("a", FixtureKind::Dimmer, 1).blackout(), vec![0]);
        assert_eq!(FixtureProfile::new("b", FixtureKind::Rgb, 1).blackout(), vec![0; 6]);
        assert_eq!(FixtureProfile::new("c", FixtureKind::Strobe, 1).blackout(), vec![0, 0]);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rig.json");
        std::fs::write(&path, r#"{ "lights": [ { "name": "d", "type": "dimmer" } ] }"#).unwrap();

        let rig = Rig::load(&path).unwrap();
        assert!(rig.contains("d"));
    }
}
