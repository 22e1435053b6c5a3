//! Global simulation parameters and the material palette.
//!
//! A [`SimulationSettings`] value is built once per run, has its materials
//! registered up front, and is then treated as read-only. Every generation
//! directory receives the same serialized snapshot (`base.vxa`), so all
//! organisms in a generation share one palette and one set of physical
//! constants.

use quick_xml::Writer;
use quick_xml::events::BytesText;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Voxel digits in descriptor files are single ASCII characters, which caps
/// the palette at nine registered materials plus the reserved empty slot.
pub const MAX_MATERIALS: usize = 9;

/// Errors raised when validating simulation settings.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("heap fraction {0} is outside (0, 1]")]
    HeapFraction(f64),
    #[error("simulation time {0} must be positive")]
    SimTime(f64),
    #[error("material palette is full ({MAX_MATERIALS} materials)")]
    PaletteFull,
}

/// Display color for a material, as 8-bit channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// One voxel-type definition referenced by index from morphology cells.
///
/// Immutable once registered; index 0 is always the empty material and is
/// never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Material {
    pub color: Rgba,
    /// Young's modulus in pascals.
    pub elastic_mod: f64,
    /// Density in kg/m^3.
    pub density: f64,
    /// Coefficient of thermal expansion; non-zero makes the material
    /// actuate under the thermal oscillation.
    pub cte: f64,
}

/// Ordered registry of materials owned by the settings value.
///
/// Registration hands out indices monotonically increasing from 1; index 0
/// is reserved for empty space and never returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MaterialPalette {
    materials: Vec<Material>,
}

impl MaterialPalette {
    /// Number of valid voxel indices, counting the reserved empty slot.
    pub fn index_count(&self) -> usize {
        self.materials.len() + 1
    }

    /// Whether a morphology cell may carry this value.
    pub fn contains_index(&self, index: u8) -> bool {
        (index as usize) < self.index_count()
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    fn register(&mut self, material: Material) -> Result<u8, ConfigError> {
        if self.materials.len() >= MAX_MATERIALS {
            return Err(ConfigError::PaletteFull);
        }
        self.materials.push(material);
        Ok(self.materials.len() as u8)
    }
}

/// Thermal oscillation driving actuated materials.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThermalSettings {
    pub enable_expansion: bool,
    pub temp_enabled: bool,
    pub vary_temp_enabled: bool,
    /// Oscillation period in seconds.
    pub temp_period: f64,
    /// Baseline temperature in degrees Celsius.
    pub temp_base: f64,
    /// Oscillation amplitude around the baseline.
    pub temp_amplitude: f64,
}

impl Default for ThermalSettings {
    fn default() -> Self {
        Self {
            enable_expansion: true,
            temp_enabled: true,
            vary_temp_enabled: true,
            temp_period: 0.1,
            temp_base: 25.0,
            temp_amplitude: 20.0,
        }
    }
}

/// Global physical parameters shared by every organism in a generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSettings {
    heap_fraction: f64,
    sim_time: f64,
    thermal: ThermalSettings,
    palette: MaterialPalette,
}

impl SimulationSettings {
    /// Validate and construct settings. Fails fast; no partial object is
    /// produced on invalid input.
    pub fn new(
        heap_fraction: f64,
        sim_time: f64,
        thermal: ThermalSettings,
    ) -> Result<Self, ConfigError> {
        if !(heap_fraction > 0.0 && heap_fraction <= 1.0) {
            return Err(ConfigError::HeapFraction(heap_fraction));
        }
        if !(sim_time > 0.0) {
            return Err(ConfigError::SimTime(sim_time));
        }
        Ok(Self {
            heap_fraction,
            sim_time,
            thermal,
            palette: MaterialPalette::default(),
        })
    }

    /// Settings preloaded with the stock two-material palette: a stiff
    /// passive material (index 1) and a soft actuated one (index 2).
    pub fn with_default_materials(
        heap_fraction: f64,
        sim_time: f64,
    ) -> Result<Self, ConfigError> {
        let mut settings = Self::new(heap_fraction, sim_time, ThermalSettings::default())?;
        settings.register_material(Rgba::new(0, 255, 0, 255), 1e9, 1e3, 0.0)?;
        settings.register_material(Rgba::new(255, 0, 0, 255), 1e7, 1e6, 0.01)?;
        Ok(settings)
    }

    /// Append a material to the palette and return its voxel index.
    pub fn register_material(
        &mut self,
        color: Rgba,
        elastic_mod: f64,
        density: f64,
        cte: f64,
    ) -> Result<u8, ConfigError> {
        let index = self.palette.register(Material {
            color,
            elastic_mod,
            density,
            cte,
        })?;
        debug!(index, elastic_mod, density, cte, "registered material");
        Ok(index)
    }

    pub fn heap_fraction(&self) -> f64 {
        self.heap_fraction
    }

    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn thermal(&self) -> &ThermalSettings {
        &self.thermal
    }

    pub fn palette(&self) -> &MaterialPalette {
        &self.palette
    }

    /// Serialize the full settings and palette snapshot as a VXA document.
    pub fn write_vxa(&self, path: &Path) -> io::Result<()> {
        let mut buffer = Vec::new();
        {
            let mut writer = Writer::new_with_indent(&mut buffer, b' ', 2);
            self.write_vxa_events(&mut writer)?;
        }
        buffer.push(b'\n');
        fs::write(path, &buffer)?;
        debug!(path = %path.display(), "wrote settings snapshot");
        Ok(())
    }

    fn write_vxa_events<W: io::Write>(&self, writer: &mut Writer<W>) -> io::Result<()> {
        writer
            .create_element("VXA")
            .with_attribute(("Version", "1.1"))
            .write_inner_content(|vxa| {
                vxa.create_element("GPU").write_inner_content(|gpu| {
                    write_text(gpu, "HeapSize", format_f64(self.heap_fraction))
                })?;
                vxa.create_element("Simulator").write_inner_content(|sim| {
                    sim.create_element("Integration").write_inner_content(|i| {
                        write_text(i, "DtFrac", "0.95".into())
                    })?;
                    sim.create_element("StopCondition").write_inner_content(|s| {
                        s.create_element("StopConditionFormula")
                            .write_inner_content(|f| {
                                f.create_element("mtSUB").write_inner_content(|sub| {
                                    write_text(sub, "mtVAR", "t".into())?;
                                    write_text(sub, "mtCONST", format_f64(self.sim_time))
                                })?;
                                Ok(())
                            })?;
                        Ok(())
                    })?;
                    sim.create_element("RecordHistory").write_inner_content(|r| {
                        write_text(r, "RecordStepSize", "0".into())?;
                        write_text(r, "RecordVoxel", "1".into())?;
                        write_text(r, "RecordLink", "0".into())
                    })?;
                    Ok(())
                })?;
                vxa.create_element("Environment").write_inner_content(|env| {
                    let thermal = &self.thermal;
                    env.create_element("Thermal").write_inner_content(|t| {
                        write_text(t, "TempEnabled", flag(thermal.temp_enabled))?;
                        write_text(t, "VaryTempEnabled", flag(thermal.vary_temp_enabled))?;
                        write_text(t, "TempPeriod", format_f64(thermal.temp_period))?;
                        write_text(t, "TempBase", format_f64(thermal.temp_base))?;
                        write_text(t, "TempAmplitude", format_f64(thermal.temp_amplitude))
                    })?;
                    write_text(env, "EnableExpansion", flag(thermal.enable_expansion))?;
                    env.create_element("Gravity").write_inner_content(|g| {
                        write_text(g, "GravEnabled", "1".into())?;
                        write_text(g, "GravAcc", "-9.81".into())?;
                        write_text(g, "FloorEnabled", "1".into())
                    })?;
                    Ok(())
                })?;
                vxa.create_element("VXC")
                    .with_attribute(("Version", "0.94"))
                    .write_inner_content(|vxc| {
                        vxc.create_element("Lattice").write_inner_content(|l| {
                            write_text(l, "Lattice_Dim", "0.01".into())
                        })?;
                        vxc.create_element("Palette").write_inner_content(|pal| {
                            for (slot, material) in self.palette.materials().iter().enumerate() {
                                let id = (slot + 1).to_string();
                                pal.create_element("Material")
                                    .with_attribute(("ID", id.as_str()))
                                    .write_inner_content(|m| write_material(m, material))?;
                            }
                            Ok(())
                        })?;
                        Ok(())
                    })?;
                Ok(())
            })?;
        Ok(())
    }
}

fn write_material<W: io::Write>(writer: &mut Writer<W>, material: &Material) -> io::Result<()> {
    writer.create_element("Display").write_inner_content(|d| {
        write_text(d, "Red", format_channel(material.color.r))?;
        write_text(d, "Green", format_channel(material.color.g))?;
        write_text(d, "Blue", format_channel(material.color.b))?;
        write_text(d, "Alpha", format_channel(material.color.a))
    })?;
    writer.create_element("Mechanical").write_inner_content(|m| {
        write_text(m, "MatModel", "0".into())?;
        write_text(m, "Elastic_Mod", format_f64(material.elastic_mod))?;
        write_text(m, "Density", format_f64(material.density))?;
        write_text(m, "CTE", format_f64(material.cte))?;
        write_text(m, "uStatic", "1".into())?;
        write_text(m, "uDynamic", "0.5".into())
    })?;
    Ok(())
}

fn write_text<W: io::Write>(writer: &mut Writer<W>, tag: &str, text: String) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(&text))?;
    Ok(())
}

fn format_f64(value: f64) -> String {
    format!("{value}")
}

fn format_channel(channel: u8) -> String {
    format!("{:.4}", f64::from(channel) / 255.0)
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_heap_fraction_bounds() {
        for heap in [0.001, 0.5, 1.0] {
            assert!(SimulationSettings::new(heap, 1.0, ThermalSettings::default()).is_ok());
        }
    }

    #[test]
    fn rejects_invalid_heap_fraction() {
        for heap in [0.0, -0.5, 1.0001, f64::NAN] {
            let err = SimulationSettings::new(heap, 1.0, ThermalSettings::default())
                .expect_err("heap fraction should be rejected");
            assert!(matches!(err, ConfigError::HeapFraction(_)));
        }
    }

    #[test]
    fn rejects_invalid_sim_time() {
        for time in [0.0, -2.0, f64::NAN] {
            let err = SimulationSettings::new(0.5, time, ThermalSettings::default())
                .expect_err("sim time should be rejected");
            assert!(matches!(err, ConfigError::SimTime(_)));
        }
    }

    #[test]
    fn material_indices_increase_from_one() {
        let mut settings =
            SimulationSettings::new(0.5, 5.0, ThermalSettings::default()).expect("settings");
        for expected in 1..=3u8 {
            let index = settings
                .register_material(Rgba::new(0, 0, 0, 255), 1e6, 1e3, 0.0)
                .expect("register");
            assert_eq!(index, expected);
        }
        assert_eq!(settings.palette().index_count(), 4);
    }

    #[test]
    fn palette_overflow_is_rejected() {
        let mut settings =
            SimulationSettings::new(0.5, 5.0, ThermalSettings::default()).expect("settings");
        for _ in 0..MAX_MATERIALS {
            settings
                .register_material(Rgba::new(0, 0, 0, 255), 1e6, 1e3, 0.0)
                .expect("register");
        }
        let err = settings
            .register_material(Rgba::new(0, 0, 0, 255), 1e6, 1e3, 0.0)
            .expect_err("palette should be full");
        assert_eq!(err, ConfigError::PaletteFull);
    }

    #[test]
    fn default_palette_matches_stock_materials() {
        let settings = SimulationSettings::with_default_materials(0.5, 5.0).expect("settings");
        let materials = settings.palette().materials();
        assert_eq!(materials.len(), 2);
        assert_eq!(materials[0].elastic_mod, 1e9);
        assert_eq!(materials[0].cte, 0.0);
        assert_eq!(materials[1].density, 1e6);
        assert_eq!(materials[1].cte, 0.01);
    }

    #[test]
    fn default_thermal_oscillation() {
        let thermal = ThermalSettings::default();
        assert!(thermal.enable_expansion);
        assert_eq!(thermal.temp_period, 0.1);
        assert_eq!(thermal.temp_base, 25.0);
        assert_eq!(thermal.temp_amplitude, 20.0);
    }

    #[test]
    fn vxa_snapshot_contains_palette_and_globals() {
        let settings = SimulationSettings::with_default_materials(0.25, 3.0).expect("settings");
        let dir = std::env::temp_dir().join(format!("voxbots_vxa_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("base.vxa");
        settings.write_vxa(&path).expect("write vxa");
        let text = std::fs::read_to_string(&path).expect("read back");
        assert!(text.contains("<HeapSize>0.25</HeapSize>"));
        assert!(text.contains("<mtCONST>3</mtCONST>"));
        assert!(text.contains("Material ID=\"2\""));
        assert!(text.contains("<CTE>0.01</CTE>"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
