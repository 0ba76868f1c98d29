//! Vertex colors: marker classification for rendered voxel centers and the
//! label → RGB table used to paint points.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Result, VoxError};

pub type Rgb = [u8; 3];

/// Color used for labels the map does not know.
pub const NEUTRAL_GRAY: Rgb = [128, 128, 128];

/// Normalized red channel must be strictly above this.
pub const MARKER_RED_MIN: f64 = 0.9;
/// Normalized green channel must be strictly below this.
pub const MARKER_GREEN_MAX: f64 = 0.1;
/// Normalized blue channel must be strictly below this.
pub const MARKER_BLUE_MAX: f64 = 0.1;

/// Hard thresholds that separate voxel-center markers (near-pure red by
/// default) from everything else in a rendered mesh.
///
/// All comparisons are strict, so a channel sitting exactly on a threshold
/// is not a marker: `(229.5, 25.5, 25.5)` is rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerThresholds {
    pub red_min: f64,
    pub green_max: f64,
    pub blue_max: f64,
}

impl Default for MarkerThresholds {
    fn default() -> Self {
        Self {
            red_min: MARKER_RED_MIN,
            green_max: MARKER_GREEN_MAX,
            blue_max: MARKER_BLUE_MAX,
        }
    }
}

impl MarkerThresholds {
    /// `rgb` holds channels in `[0, 255]`.
    #[inline]
    pub fn is_marker(&self, rgb: [f64; 3]) -> bool {
        let [r, g, b] = rgb.map(|c| c / 255.0);
        r > self.red_min && g < self.green_max && b < self.blue_max
    }
}

/// [`MarkerThresholds::is_marker`] with the default thresholds.
#[inline]
pub fn is_marker(rgb: [f64; 3]) -> bool {
    MarkerThresholds::default().is_marker(rgb)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorMapJson {
    /// `[[r, g, b], ...]` indexed by label.
    List(Vec<[f64; 3]>),
    /// `{"0": [r, g, b], ...}` keyed by decimal label.
    Keyed(BTreeMap<String, [f64; 3]>),
}

/// Range the channel values of a color map file are written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelScale {
    /// `[0, 1]` when every value in the file lies in that range, else `[0, 255]`.
    #[default]
    Auto,
    /// `[0, 1]`, as matplotlib-style palettes are stored.
    Unit,
    /// `[0, 255]`.
    Byte,
}

impl ChannelScale {
    fn resolve<'a>(self, mut values: impl Iterator<Item = &'a [f64; 3]>) -> Self {
        match self {
            ChannelScale::Auto => {
                if values.all(|rgb| rgb.iter().all(|c| (0.0..=1.0).contains(c))) {
                    ChannelScale::Unit
                } else {
                    ChannelScale::Byte
                }
            }
            fixed => fixed,
        }
    }

    #[inline]
    fn channel(self, v: f64) -> u8 {
        let v = match self {
            ChannelScale::Unit => v * 255.0,
            _ => v,
        };
        v.round().clamp(0.0, 255.0) as u8
    }
}

impl FromStr for ChannelScale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ChannelScale::Auto),
            "unit" => Ok(ChannelScale::Unit),
            "byte" => Ok(ChannelScale::Byte),
            other => Err(format!("unknown channel scale {other:?} (auto, unit, byte)")),
        }
    }
}

impl fmt::Display for ChannelScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelScale::Auto => "auto",
            ChannelScale::Unit => "unit",
            ChannelScale::Byte => "byte",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorMap {
    entries: BTreeMap<i32, Rgb>,
    pub fallback: Rgb,
}

impl Default for ColorMap {
    fn default() -> Self {
        Self::new(NEUTRAL_GRAY)
    }
}

impl ColorMap {
    pub fn new(fallback: Rgb) -> Self {
        Self {
            entries: BTreeMap::new(),
            fallback,
        }
    }

    pub fn insert(&mut self, label: i32, rgb: Rgb) {
        self.entries.insert(label, rgb);
    }

    /// Parses either JSON form (list indexed by label, or object keyed by
    /// decimal label), detecting the channel scale.
    pub fn from_json_reader<R: Read>(reader: R, fallback: Rgb) -> Result<Self> {
        Self::from_json_reader_scaled(reader, fallback, ChannelScale::Auto)
    }

    /// Like [`ColorMap::from_json_reader`] with the channel scale given.
    /// Values are converted to `[0, 255]`, rounded and clamped.
    pub fn from_json_reader_scaled<R: Read>(
        reader: R,
        fallback: Rgb,
        scale: ChannelScale,
    ) -> Result<Self> {
        let raw: ColorMapJson = serde_json::from_reader(reader)?;
        let mut map = Self::new(fallback);

        let scale = match &raw {
            ColorMapJson::List(list) => scale.resolve(list.iter()),
            ColorMapJson::Keyed(keyed) => scale.resolve(keyed.values()),
        };

        match raw {
            ColorMapJson::List(list) => {
                for (label, rgb) in list.into_iter().enumerate() {
                    let label = i32::try_from(label).map_err(|_| VoxError::invalid_label(label))?;
                    map.insert(label, rgb.map(|c| scale.channel(c)));
                }
            }
            ColorMapJson::Keyed(keyed) => {
                for (key, rgb) in keyed {
                    let label: i32 = key.trim().parse().map_err(|_| VoxError::invalid_label(&key))?;
                    map.insert(label, rgb.map(|c| scale.channel(c)));
                }
            }
        }

        log::debug!("loaded color map with {} entries ({scale} scale)", map.len());
        Ok(map)
    }

    pub fn from_json_str(s: &str, fallback: Rgb) -> Result<Self> {
        Self::from_json_reader(s.as_bytes(), fallback)
    }

    #[inline]
    pub fn color(&self, label: i32) -> Rgb {
        self.entries.get(&label).copied().unwrap_or(self.fallback)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
