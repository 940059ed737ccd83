// Block colour detection
//
// Readings are ambient-subtracted RGBC counts. A reading whose clear channel is at
// or below the empty threshold means no block is in front of the sensor; anything
// else is matched against the palette by normalised channel difference.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockColor {
    Red,
    Green,
    Blue,
    Yellow,
    White,
}

/// Raw colour sensor reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgbc {
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub c: u16,
}

impl Rgbc {
    pub fn new(r: u16, g: u16, b: u16, c: u16) -> Self {
        Self { r, g, b, c }
    }
}

/// Colour sensor collaborator: `None` means no block in front of the sensor
pub trait ColorSensor {
    fn block_color(&mut self) -> Option<BlockColor>;
}

/// Source of raw readings (the physical read cycle)
pub trait RawColorSource {
    fn read(&mut self) -> Rgbc;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub color: BlockColor,
    pub rgb: [u16; 3],
}

/// Reference colours and the empty threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub empty_threshold: u16,
    pub entries: Vec<PaletteEntry>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            empty_threshold: 40,
            entries: vec![
                PaletteEntry { color: BlockColor::Red, rgb: [180, 40, 40] },
                PaletteEntry { color: BlockColor::Green, rgb: [50, 160, 60] },
                PaletteEntry { color: BlockColor::Blue, rgb: [40, 60, 170] },
                PaletteEntry { color: BlockColor::Yellow, rgb: [150, 140, 40] },
                PaletteEntry { color: BlockColor::White, rgb: [110, 110, 110] },
            ],
        }
    }
}

impl Palette {
    /// Closest palette colour, or `None` below the empty threshold
    pub fn classify(&self, reading: Rgbc) -> Option<BlockColor> {
        if reading.c <= self.empty_threshold {
            return None;
        }

        let sample = normalise([reading.r, reading.g, reading.b]);
        self.entries
            .iter()
            .map(|entry| {
                let reference = normalise(entry.rgb);
                let diff: f32 = sample
                    .iter()
                    .zip(reference.iter())
                    .map(|(a, b)| (a - b).abs())
                    .sum();
                (entry.color, diff)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(color, _)| color)
    }
}

/// Scale channels so they sum to 255, removing overall brightness
fn normalise(rgb: [u16; 3]) -> [f32; 3] {
    let sum: f32 = rgb.iter().map(|&v| v as f32).sum();
    if sum == 0.0 {
        return [0.0; 3];
    }
    rgb.map(|v| v as f32 / sum * 255.0)
}

/// Colour sensor built from a raw source and a palette
pub struct PaletteSensor<R> {
    source: R,
    palette: Palette,
}

impl<R: RawColorSource> PaletteSensor<R> {
    pub fn new(source: R, palette: Palette) -> Self {
        Self { source, palette }
    }

    pub fn source_mut(&mut self) -> &mut R {
        &mut self.source
    }
}

impl<R: RawColorSource> ColorSensor for PaletteSensor<R> {
    fn block_color(&mut self) -> Option<BlockColor> {
        let reading = self.source.read();
        self.palette.classify(reading)
    }
}
