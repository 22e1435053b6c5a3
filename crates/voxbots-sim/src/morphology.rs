//! Encoding organism morphologies as per-organism descriptor files.
//!
//! A morphology is a 3D array of material indices supplied by the
//! evolutionary loop. Encoding validates every cell against the palette
//! before any I/O happens, then writes a VXD document whose voxel data is
//! stored as one ASCII digit string per z-layer.

use crate::generation::GenerationDir;
use crate::settings::MaterialPalette;
use ndarray::Array3;
use quick_xml::Writer;
use quick_xml::events::{BytesCData, BytesText};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// 3D grid of material indices; index 0 is empty space.
pub type Morphology = Array3<u8>;

/// Per-organism encoding failures. Raised before anything is written, so a
/// rejected morphology leaves no descriptor behind.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("morphology has no voxels")]
    Empty,
    #[error(
        "voxel ({x}, {y}, {z}) references material {index}, but only {count} indices are registered"
    )]
    UnknownMaterial {
        x: usize,
        y: usize,
        z: usize,
        index: u8,
        count: usize,
    },
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
}

/// Failures while reading a descriptor back from disk.
#[derive(Debug, Error)]
pub enum DescriptorReadError {
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
    #[error("descriptor is not well-formed XML: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("descriptor is missing its {0} element")]
    MissingElement(&'static str),
    #[error("descriptor dimension {0} is not a valid size")]
    BadDimension(&'static str),
    #[error("descriptor holds {actual} layers, expected {expected}")]
    LayerCount { expected: usize, actual: usize },
    #[error("layer {layer} holds {actual} voxels, expected {expected}")]
    LayerLength {
        layer: usize,
        expected: usize,
        actual: usize,
    },
    #[error("layer {layer} contains non-digit voxel {value:?}")]
    BadVoxel { layer: usize, value: char },
}

/// Descriptor filename for a given label and organism id.
pub fn descriptor_file_name(label: &str, id: u32) -> String {
    format!("{label}_{id}.vxd")
}

/// Validate `morphology` against `palette` and write it into the generation
/// directory as `{label}_{id}.vxd`. Re-encoding the same label and id
/// overwrites the previous descriptor; the result on disk depends only on
/// the arguments.
pub fn encode_morphology(
    palette: &MaterialPalette,
    generation: &mut GenerationDir,
    morphology: &Morphology,
    label: &str,
    id: u32,
    step_size: u32,
) -> Result<PathBuf, EncodeError> {
    validate_morphology(palette, morphology)?;
    let path = generation.path().join(descriptor_file_name(label, id));
    let mut buffer = Vec::new();
    {
        let mut writer = Writer::new_with_indent(&mut buffer, b' ', 2);
        write_vxd_events(&mut writer, morphology, step_size)?;
    }
    buffer.push(b'\n');
    fs::write(&path, &buffer)?;
    generation.record_descriptor(id);
    debug!(path = %path.display(), voxels = morphology.len(), "encoded morphology");
    Ok(path)
}

fn validate_morphology(
    palette: &MaterialPalette,
    morphology: &Morphology,
) -> Result<(), EncodeError> {
    if morphology.is_empty() {
        return Err(EncodeError::Empty);
    }
    for ((x, y, z), &index) in morphology.indexed_iter() {
        if !palette.contains_index(index) {
            return Err(EncodeError::UnknownMaterial {
                x,
                y,
                z,
                index,
                count: palette.index_count(),
            });
        }
    }
    Ok(())
}

fn write_vxd_events<W: io::Write>(
    writer: &mut Writer<W>,
    morphology: &Morphology,
    step_size: u32,
) -> io::Result<()> {
    let (nx, ny, nz) = morphology.dim();
    writer.create_element("VXD").write_inner_content(|vxd| {
        vxd.create_element("RecordStepSize")
            .with_attribute(("replace", "VXA.Simulator.RecordHistory.RecordStepSize"))
            .write_text_content(BytesText::new(&step_size.to_string()))?;
        vxd.create_element("Structure")
            .with_attribute(("replace", "VXA.VXC.Structure"))
            .with_attribute(("Compression", "ASCII_READABLE"))
            .write_inner_content(|s| {
                s.create_element("X_Voxels")
                    .write_text_content(BytesText::new(&nx.to_string()))?;
                s.create_element("Y_Voxels")
                    .write_text_content(BytesText::new(&ny.to_string()))?;
                s.create_element("Z_Voxels")
                    .write_text_content(BytesText::new(&nz.to_string()))?;
                s.create_element("Data").write_inner_content(|data| {
                    for z in 0..nz {
                        let mut layer = String::with_capacity(nx * ny);
                        for y in 0..ny {
                            for x in 0..nx {
                                let digit = b'0' + morphology[[x, y, z]];
                                layer.push(digit as char);
                            }
                        }
                        data.create_element("Layer")
                            .write_cdata_content(BytesCData::new(&layer))?;
                    }
                    Ok(())
                })?;
                Ok(())
            })?;
        Ok(())
    })?;
    Ok(())
}

/// Read a descriptor file back into a morphology. Used to inspect staged
/// generations and to verify that encoding is lossless.
pub fn read_descriptor(path: &Path) -> Result<Morphology, DescriptorReadError> {
    let text = fs::read_to_string(path)?;
    let document = roxmltree::Document::parse(&text)?;
    let structure = document
        .descendants()
        .find(|node| node.has_tag_name("Structure"))
        .ok_or(DescriptorReadError::MissingElement("Structure"))?;
    let nx = read_dimension(&structure, "X_Voxels")?;
    let ny = read_dimension(&structure, "Y_Voxels")?;
    let nz = read_dimension(&structure, "Z_Voxels")?;
    let data = structure
        .children()
        .find(|node| node.has_tag_name("Data"))
        .ok_or(DescriptorReadError::MissingElement("Data"))?;

    let layers: Vec<&str> = data
        .children()
        .filter(|node| node.has_tag_name("Layer"))
        .map(|node| node.text().unwrap_or_default())
        .collect();
    if layers.len() != nz {
        return Err(DescriptorReadError::LayerCount {
            expected: nz,
            actual: layers.len(),
        });
    }

    let mut morphology = Array3::zeros((nx, ny, nz));
    for (z, layer) in layers.into_iter().enumerate() {
        if layer.chars().count() != nx * ny {
            return Err(DescriptorReadError::LayerLength {
                layer: z,
                expected: nx * ny,
                actual: layer.chars().count(),
            });
        }
        for (offset, value) in layer.chars().enumerate() {
            let digit = value
                .to_digit(10)
                .ok_or(DescriptorReadError::BadVoxel { layer: z, value })?;
            morphology[[offset % nx, offset / nx, z]] = digit as u8;
        }
    }
    Ok(morphology)
}

fn read_dimension(
    structure: &roxmltree::Node<'_, '_>,
    tag: &'static str,
) -> Result<usize, DescriptorReadError> {
    let node = structure
        .children()
        .find(|node| node.has_tag_name(tag))
        .ok_or(DescriptorReadError::MissingElement(tag))?;
    node.text()
        .and_then(|text| text.trim().parse::<usize>().ok())
        .filter(|&size| size > 0)
        .ok_or(DescriptorReadError::BadDimension(tag))
}
