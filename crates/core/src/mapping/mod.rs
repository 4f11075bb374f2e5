//! Pure conversions from spectral energy and elapsed time into fixture values.
//!
//! Every function here is side-effect free. Settings that may be `"random"`
//! draw from the caller's RNG on every call, so a seeded RNG makes the whole
//! module deterministic.

use std::f64::consts::TAU;

use rand::Rng;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::{OculizerError, Result, SpectrumFrame};

/// Values for an rgb fixture: brightness, red, green, blue, strobe, reserved.
pub type RgbValues = [u8; 6];
/// Values for a dimmer: brightness.
pub type DimmerValues = [u8; 1];
/// Values for a strobe fixture: speed, brightness.
pub type StrobeValues = [u8; 2];

/// Fixed colour palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Pink,
    White,
}

impl Color {
    pub const ALL: [Color; 8] = [
        Color::Red,
        Color::Orange,
        Color::Yellow,
        Color::Green,
        Color::Blue,
        Color::Purple,
        Color::Pink,
        Color::White,
    ];

    pub fn rgb(self) -> [u8; 3] {
        match self {
            Color::Red => [255, 0, 0],
            Color::Orange => [255, 127, 0],
            Color::Yellow => [255, 255, 0],
            Color::Green => [0, 255, 0],
            Color::Blue => [0, 0, 255],
            Color::Purple => [75, 0, 130],
            Color::Pink => [255, 0, 255],
            Color::White => [255, 255, 255],
        }
    }
}

/// A DMX level. Deserializes from `0..=255` or from a boolean flag
/// (`true` = 255).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawLevel")]
pub struct Level(pub u8);

impl Level {
    pub const OFF: Level = Level(0);
    pub const FULL: Level = Level(255);
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Flag(bool),
    Value(u8),
}

impl From<RawLevel> for Level {
    fn from(raw: RawLevel) -> Self {
        match raw {
            RawLevel::Flag(true) => Level::FULL,
            RawLevel::Flag(false) => Level::OFF,
            RawLevel::Value(value) => Level(value),
        }
    }
}

/// Types a `"random"` setting can draw.
pub trait Randomize: Sized {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

impl Randomize for Level {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Level(rng.gen_range(0..=255))
    }
}

impl Randomize for Color {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Color::ALL[rng.gen_range(0..Color::ALL.len())]
    }
}

/// A configured value, or the `"random"` sentinel which is re-drawn on every
/// evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting<T> {
    Fixed(T),
    Random,
}

impl<T: Randomize + Copy> Setting<T> {
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        match self {
            Setting::Fixed(value) => *value,
            Setting::Random => T::random(rng),
        }
    }
}

impl<T> Setting<T> {
    pub fn is_random(&self) -> bool {
        matches!(self, Setting::Random)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Setting<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw<T> {
            Fixed(T),
            Keyword(String),
        }

        match Raw::<T>::deserialize(deserializer)? {
            Raw::Fixed(value) => Ok(Setting::Fixed(value)),
            Raw::Keyword(word) if word.eq_ignore_ascii_case("random") => Ok(Setting::Random),
            Raw::Keyword(word) => Err(D::Error::custom(format!(
                "expected a value or \"random\", found `{word}`"
            ))),
        }
    }
}

impl<T: Serialize> Serialize for Setting<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Setting::Fixed(value) => value.serialize(serializer),
            Setting::Random => serializer.serialize_str("random"),
        }
    }
}

/// Periodic waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    #[serde(alias = "sawtooth_forward")]
    SawtoothForward,
    #[serde(alias = "sawtooth_backward")]
    SawtoothBackward,
}

impl Waveform {
    /// Normalised value in `[0, 1]` at time `t` for an oscillation of
    /// `frequency_hz`.
    pub fn sample(self, frequency_hz: f64, t: f64) -> f64 {
        let cycles = frequency_hz * t;
        match self {
            Waveform::Sine => 0.5 + 0.5 * (TAU * cycles).sin(),
            // sign(0) counts as positive so the output is only ever 0 or 1.
            Waveform::Square => {
                if (TAU * cycles).sin() >= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Waveform::Triangle => (cycles.rem_euclid(2.0) - 1.0).abs(),
            Waveform::SawtoothForward => cycles.rem_euclid(1.0),
            Waveform::SawtoothBackward => 1.0 - cycles.rem_euclid(1.0),
        }
    }
}

/// Frequency band in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub low_hz: f32,
    pub high_hz: f32,
}

impl Band {
    /// Validates the band against the Nyquist frequency of `sample_rate`.
    pub fn new(low_hz: f32, high_hz: f32, sample_rate: u32) -> Result<Self> {
        if low_hz.is_nan() || high_hz.is_nan() || low_hz < 0.0 || low_hz > high_hz {
            return Err(OculizerError::config(format!(
                "invalid frequency range [{low_hz}, {high_hz}]"
            )));
        }
        let nyquist_hz = sample_rate as f32 / 2.0;
        if high_hz > nyquist_hz {
            return Err(OculizerError::OutOfRange {
                high_hz,
                nyquist_hz,
            });
        }
        Ok(Self { low_hz, high_hz })
    }
}

/// Power thresholds. Construction rejects a zero-width range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerRange {
    low: f32,
    high: f32,
}

impl PowerRange {
    pub fn new(low: f32, high: f32) -> Result<Self> {
        if low.is_nan() || high.is_nan() {
            return Err(OculizerError::config("power range must be numeric"));
        }
        if high == low {
            return Err(OculizerError::config(format!(
                "power range [{low}, {high}] has zero width (division by zero)"
            )));
        }
        if high < low {
            return Err(OculizerError::config(format!(
                "power range [{low}, {high}] is inverted"
            )));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f32 {
        self.low
    }

    pub fn high(&self) -> f32 {
        self.high
    }
}

/// Output bounds. `min > max` inverts the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 2]", into = "[u8; 2]")]
pub struct OutputRange {
    pub min: u8,
    pub max: u8,
}

impl OutputRange {
    pub const FULL: OutputRange = OutputRange { min: 0, max: 255 };
}

impl From<[u8; 2]> for OutputRange {
    fn from([min, max]: [u8; 2]) -> Self {
        Self { min, max }
    }
}

impl From<OutputRange> for [u8; 2] {
    fn from(range: OutputRange) -> Self {
        [range.min, range.max]
    }
}

impl Default for OutputRange {
    fn default() -> Self {
        Self::FULL
    }
}

/// Band energy scaled into an output range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandMapping {
    pub band: Band,
    pub power: PowerRange,
    pub output: OutputRange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RgbFrequency {
    pub mapping: BandMapping,
    pub color: Setting<Color>,
    pub strobe: Level,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrobeGate {
    pub band: Band,
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticDimmer {
    pub brightness: Setting<Level>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticRgb {
    pub brightness: Setting<Level>,
    pub color: Setting<Color>,
    pub strobe: Setting<Level>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticStrobe {
    pub speed: Setting<Level>,
    pub brightness: Setting<Level>,
}

/// Time-driven oscillation. Each target range is optional; a missing
/// brightness range holds full brightness and a missing speed range holds 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Periodic {
    pub waveform: Waveform,
    pub frequency_hz: f64,
    pub brightness: Option<OutputRange>,
    pub speed: Option<OutputRange>,
}

impl Periodic {
    fn brightness_at(&self, t: f64) -> u8 {
        match self.brightness {
            Some(range) => periodic_value(self.waveform, self.frequency_hz, t, range),
            None => Level::FULL.0,
        }
    }

    fn speed_at(&self, t: f64) -> u8 {
        match self.speed {
            Some(range) => periodic_value(self.waveform, self.frequency_hz, t, range),
            None => Level::OFF.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicRgb {
    pub periodic: Periodic,
    pub color: Setting<Color>,
    pub strobe: Setting<Level>,
}

/// Mean magnitude over the bins `[low, high)` of the band.
///
/// Fails with [`OculizerError::OutOfRange`] when the band reaches past the
/// Nyquist frequency of the frame. An empty bin span yields `0`.
pub fn band_energy(frame: &SpectrumFrame, band: Band) -> Result<f32> {
    let nyquist_hz = frame.nyquist_hz();
    if band.high_hz > nyquist_hz {
        return Err(OculizerError::OutOfRange {
            high_hz: band.high_hz,
            nyquist_hz,
        });
    }

    let low = frame.bin_index(band.low_hz);
    let high = frame.bin_index(band.high_hz).min(frame.magnitudes.len());
    if low >= high {
        return Ok(0.0);
    }

    let bins = &frame.magnitudes[low..high];
    Ok(bins.iter().sum::<f32>() / bins.len() as f32)
}

/// Linear clamp-and-scale from power to an output value.
///
/// `power <= low` gives `min_out`, `power >= high` gives `max_out`, values in
/// between are interpolated and truncated.
pub fn power_to_brightness(power: f32, low: f32, high: f32, min_out: u8, max_out: u8) -> u8 {
    if power <= low {
        return min_out;
    }
    if power >= high {
        return max_out;
    }
    let fraction = (power - low) / (high - low);
    let value = min_out as f32 + fraction * (max_out as f32 - min_out as f32);
    to_dmx(value as f64)
}

pub fn frequency_to_dimmer(frame: &SpectrumFrame, mapping: &BandMapping) -> Result<DimmerValues> {
    Ok([band_brightness(frame, mapping)?])
}

pub fn frequency_to_rgb<R: Rng + ?Sized>(
    frame: &SpectrumFrame,
    params: &RgbFrequency,
    rng: &mut R,
) -> Result<RgbValues> {
    let brightness = band_brightness(frame, &params.mapping)?;
    let color = params.color.resolve(rng);
    Ok(rgb_values(brightness, color, params.strobe.0))
}

/// Hard on/off gate: `(255, 255)` at or above the threshold, `(0, 0)` below.
pub fn frequency_to_strobe_gate(frame: &SpectrumFrame, gate: &StrobeGate) -> Result<StrobeValues> {
    let energy = band_energy(frame, gate.band)?;
    if energy >= gate.threshold {
        Ok([255, 255])
    } else {
        Ok([0, 0])
    }
}

pub fn static_dimmer<R: Rng + ?Sized>(params: &StaticDimmer, rng: &mut R) -> DimmerValues {
    [params.brightness.resolve(rng).0]
}

pub fn static_rgb<R: Rng + ?Sized>(params: &StaticRgb, rng: &mut R) -> RgbValues {
    let brightness = params.brightness.resolve(rng).0;
    let color = params.color.resolve(rng);
    rgb_values(brightness, color, params.strobe.resolve(rng).0)
}

pub fn static_strobe<R: Rng + ?Sized>(params: &StaticStrobe, rng: &mut R) -> StrobeValues {
    [params.speed.resolve(rng).0, params.brightness.resolve(rng).0]
}

/// Evaluates `waveform` at time `t` (seconds) and scales it into `range`.
pub fn periodic_value(waveform: Waveform, frequency_hz: f64, t: f64, range: OutputRange) -> u8 {
    let span = range.max as f64 - range.min as f64;
    to_dmx(range.min as f64 + span * waveform.sample(frequency_hz, t))
}

pub fn periodic_dimmer(params: &Periodic, t: f64) -> DimmerValues {
    [params.brightness_at(t)]
}

pub fn periodic_strobe(params: &Periodic, t: f64) -> StrobeValues {
    [params.speed_at(t), params.brightness_at(t)]
}

pub fn periodic_rgb<R: Rng + ?Sized>(params: &PeriodicRgb, t: f64, rng: &mut R) -> RgbValues {
    let brightness = params.periodic.brightness_at(t);
    let color = params.color.resolve(rng);
    let strobe = match params.periodic.speed {
        Some(_) => params.periodic.speed_at(t),
        None => params.strobe.resolve(rng).0,
    };
    rgb_values(brightness, color, strobe)
}

fn band_brightness(frame: &SpectrumFrame, mapping: &BandMapping) -> Result<u8> {
    let energy = band_energy(frame, mapping.band)?;
    Ok(power_to_brightness(
        energy,
        mapping.power.low(),
        mapping.power.high(),
        mapping.output.min,
        mapping.output.max,
    ))
}

fn rgb_values(brightness: u8, color: Color, strobe: u8) -> RgbValues {
    let [r, g, b] = color.rgb();
    [brightness, r, g, b, strobe, 0]
}

fn to_dmx(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    const SAMPLE_RATE: u32 = 44_100;
    const BLOCK: usize = 2_205;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn band(low: f32, high: f32) -> Band {
        Band::new(low, high, SAMPLE_RATE).unwrap()
    }

    #[test]
    fn band_energy_is_mean_over_half_open_bins() {
        let mut magnitudes = vec![0.0; BLOCK / 2 + 1];
        // 20 Hz per bin: [20, 100) covers bins 1..5.
        for (i, value) in magnitudes.iter_mut().enumerate().take(6) {
            *value = i as f32;
        }
        let frame = SpectrumFrame::new(SAMPLE_RATE, BLOCK, magnitudes);

        let energy = band_energy(&frame, band(20.0, 100.0)).unwrap();
        assert!((energy - 2.5).abs() < 1e-6);
    }

    #[test]
    fn band_energy_of_empty_span_is_zero() {
        let frame = SpectrumFrame::uniform(SAMPLE_RATE, BLOCK, 9.0);
        assert_eq!(band_energy(&frame, band(100.0, 100.0)).unwrap(), 0.0);
        assert_eq!(band_energy(&frame, band(100.0, 105.0)).unwrap(), 0.0);
    }

    #[test]
    fn bands_above_nyquist_are_out_of_range() {
        let frame = SpectrumFrame::uniform(SAMPLE_RATE, BLOCK, 1.0);
        let above = Band {
            low_hz: 23_000.0,
            high_hz: 30_000.0,
        };
        assert!(matches!(
            band_energy(&frame, above),
            Err(OculizerError::OutOfRange { .. })
        ));
        assert!(matches!(
            frequency_to_strobe_gate(&frame, &StrobeGate { band: above, threshold: 0.0 }),
            Err(OculizerError::OutOfRange { .. })
        ));
        assert!(matches!(
            Band::new(23_000.0, 30_000.0, SAMPLE_RATE),
            Err(OculizerError::OutOfRange { .. })
        ));
        assert!(Band::new(0.0, 22_050.0, SAMPLE_RATE).is_ok());
    }

    #[test]
    fn inverted_band_is_a_configuration_error() {
        assert!(matches!(
            Band::new(200.0, 20.0, SAMPLE_RATE),
            Err(OculizerError::Configuration(_))
        ));
    }

    #[test]
    fn power_to_brightness_clamps_and_scales() {
        assert_eq!(power_to_brightness(5.0, 10.0, 20.0, 0, 255), 0);
        assert_eq!(power_to_brightness(25.0, 10.0, 20.0, 0, 255), 255);
        let mid = power_to_brightness(15.0, 10.0, 20.0, 0, 255);
        assert!((126..=128).contains(&mid));
        assert_eq!(power_to_brightness(10.0, 10.0, 20.0, 40, 200), 40);
        assert_eq!(power_to_brightness(20.0, 10.0, 20.0, 40, 200), 200);
    }

    #[test]
    fn zero_width_power_range_is_rejected() {
        assert!(matches!(
            PowerRange::new(10.0, 10.0),
            Err(OculizerError::Configuration(_))
        ));
        assert!(PowerRange::new(20.0, 10.0).is_err());
        assert!(PowerRange::new(10.0, 20.0).is_ok());
    }

    #[test]
    fn dimmer_follows_band_energy() {
        let mapping = BandMapping {
            band: band(20.0, 200.0),
            power: PowerRange::new(5.0, 35.0).unwrap(),
            output: OutputRange::FULL,
        };
        let at = |energy| {
            let frame = SpectrumFrame::uniform(SAMPLE_RATE, BLOCK, energy);
            frequency_to_dimmer(&frame, &mapping).unwrap()[0]
        };

        assert_eq!(at(5.0), 0);
        assert_eq!(at(35.0), 255);
        assert!((126..=128).contains(&at(20.0)));
    }

    #[test]
    fn rgb_uses_palette_and_strobe() {
        let params = RgbFrequency {
            mapping: BandMapping {
                band: band(20.0, 200.0),
                power: PowerRange::new(1.0, 2.0).unwrap(),
                output: OutputRange::FULL,
            },
            color: Setting::Fixed(Color::Purple),
            strobe: Level::FULL,
        };
        let frame = SpectrumFrame::uniform(SAMPLE_RATE, BLOCK, 3.0);

        let values = frequency_to_rgb(&frame, &params, &mut rng()).unwrap();
        assert_eq!(values, [255, 75, 0, 130, 255, 0]);
    }

    #[test]
    fn random_colour_is_drawn_per_call() {
        let params = StaticRgb {
            brightness: Setting::Fixed(Level(200)),
            color: Setting::Random,
            strobe: Setting::Fixed(Level::OFF),
        };
        let mut rng = rng();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let values = static_rgb(&params, &mut rng);
            assert_eq!(values[0], 200);
            assert!(Color::ALL.iter().any(|c| c.rgb() == [values[1], values[2], values[3]]));
            seen.insert([values[1], values[2], values[3]]);
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn fixed_static_values_are_idempotent() {
        let params = StaticStrobe {
            speed: Setting::Fixed(Level(120)),
            brightness: Setting::Fixed(Level(90)),
        };
        let mut rng = rng();
        let first = static_strobe(&params, &mut rng);
        let second = static_strobe(&params, &mut rng);
        assert_eq!(first, [120, 90]);
        assert_eq!(first, second);

        let dimmer = StaticDimmer {
            brightness: Setting::Fixed(Level(33)),
        };
        assert_eq!(static_dimmer(&dimmer, &mut rng), [33]);
    }

    #[test]
    fn strobe_gate_is_hard_threshold() {
        let gate = StrobeGate {
            band: band(2_000.0, 8_000.0),
            threshold: 4.0,
        };
        let below = SpectrumFrame::uniform(SAMPLE_RATE, BLOCK, 3.99);
        let at = SpectrumFrame::uniform(SAMPLE_RATE, BLOCK, 4.0);
        assert_eq!(frequency_to_strobe_gate(&below, &gate).unwrap(), [0, 0]);
        assert_eq!(frequency_to_strobe_gate(&at, &gate).unwrap(), [255, 255]);
    }

    #[test]
    fn square_wave_only_hits_the_extremes() {
        assert_eq!(periodic_value(Waveform::Square, 1.0, 0.0, OutputRange::FULL), 255);
        assert_eq!(periodic_value(Waveform::Square, 1.0, 0.75, OutputRange::FULL), 0);
        for step in 0..200 {
            let value = periodic_value(Waveform::Square, 1.0, step as f64 * 0.01, OutputRange::FULL);
            assert!(value == 0 || value == 255, "got {value}");
        }
    }

    #[test]
    fn waveform_shapes() {
        let range = OutputRange { min: 0, max: 200 };
        assert_eq!(periodic_value(Waveform::Sine, 1.0, 0.0, range), 100);
        assert_eq!(periodic_value(Waveform::Sine, 1.0, 0.25, range), 200);
        assert_eq!(periodic_value(Waveform::Triangle, 1.0, 0.0, range), 200);
        assert_eq!(periodic_value(Waveform::Triangle, 1.0, 1.0, range), 0);
        assert_eq!(periodic_value(Waveform::Triangle, 0.5, 1.0, range), 100);
        assert_eq!(periodic_value(Waveform::SawtoothForward, 2.0, 0.125, range), 50);
        assert_eq!(periodic_value(Waveform::SawtoothBackward, 2.0, 0.125, range), 150);
        assert_eq!(periodic_value(Waveform::SawtoothForward, 1.0, -0.25, range), 150);
    }

    #[test]
    fn periodic_strobe_drives_both_targets() {
        let params = Periodic {
            waveform: Waveform::SawtoothForward,
            frequency_hz: 1.0,
            brightness: Some(OutputRange { min: 100, max: 200 }),
            speed: None,
        };
        assert_eq!(periodic_strobe(&params, 0.5), [0, 150]);

        let both = Periodic {
            speed: Some(OutputRange::FULL),
            ..params
        };
        assert_eq!(periodic_strobe(&both, 0.5), [127, 150]);
        assert_eq!(periodic_dimmer(&both, 0.5), [150]);
    }

    #[test]
    fn settings_parse_literals_and_random() {
        let level: Setting<Level> = serde_json::from_str("200").unwrap();
        assert_eq!(level, Setting::Fixed(Level(200)));
        let flag: Setting<Level> = serde_json::from_str("true").unwrap();
        assert_eq!(flag, Setting::Fixed(Level::FULL));
        let color: Setting<Color> = serde_json::from_str("\"pink\"").unwrap();
        assert_eq!(color, Setting::Fixed(Color::Pink));
        let random: Setting<Color> = serde_json::from_str("\"random\"").unwrap();
        assert!(random.is_random());
        assert!(serde_json::from_str::<Setting<Color>>("\"teal\"").is_err());
        assert_eq!(serde_json::to_string(&random).unwrap(), "\"random\"");
    }

    #[test]
    fn waveform_names_accept_both_spellings() {
        let a: Waveform = serde_json::from_str("\"sawtoothForward\"").unwrap();
        let b: Waveform = serde_json::from_str("\"sawtooth_backward\"").unwrap();
        assert_eq!(a, Waveform::SawtoothForward);
        assert_eq!(b, Waveform::SawtoothBackward);
    }
}
