use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use log::{debug, info};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::registry::{GroupId, ImageId, MeasurementConfig};
use crate::error::ConfigError;
use crate::model::FitsHeader;
use crate::utils::{headers, resolve};

pub const DEFAULT_GAIN_KEYWORD: &str = "GAIN";
pub const DEFAULT_SATURATION_KEYWORD: &str = "SATURATE";
pub const DEFAULT_FLUX_SCALE_KEYWORD: &str = "FLXSCALE";

static KEYWORD_RE: OnceLock<Regex> = OnceLock::new();

fn keyword_re() -> &'static Regex {
    KEYWORD_RE.get_or_init(|| Regex::new(r"^[A-Z0-9_-]{1,8}$").unwrap())
}

/// Keyword names and fallback constants applied while opening measurement
/// images. A fixed override takes precedence over the header keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub gain_keyword: String,
    pub saturation_keyword: String,
    pub flux_scale_keyword: String,
    pub gain: Option<f64>,
    pub saturation: Option<f64>,
    pub flux_scale: Option<f64>,
    pub psf: Option<PathBuf>,
    pub weight: Option<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            gain_keyword: DEFAULT_GAIN_KEYWORD.into(),
            saturation_keyword: DEFAULT_SATURATION_KEYWORD.into(),
            flux_scale_keyword: DEFAULT_FLUX_SCALE_KEYWORD.into(),
            gain: None,
            saturation: None,
            flux_scale: None,
            psf: None,
            weight: None,
        }
    }
}

/// One FITS exposure selected for measurement, with the calibration
/// metadata the fitting stage needs. A gain or saturation of 0.0 means
/// "none".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementImage {
    pub path: PathBuf,
    pub psf_path: Option<PathBuf>,
    pub weight_path: Option<PathBuf>,
    pub gain: f64,
    pub saturation: f64,
    pub flux_scale: f64,
    #[serde(skip)]
    header: FitsHeader,
}

impl MeasurementImage {
    pub fn open(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let header = headers::read_image_header(path)
            .with_context(|| format!("Failed to load measurement image {:?}", path))?;

        let gain = options
            .gain
            .or_else(|| header.get_f64(&options.gain_keyword))
            .unwrap_or(0.0);
        let saturation = options
            .saturation
            .or_else(|| header.get_f64(&options.saturation_keyword))
            .unwrap_or(0.0);
        let flux_scale = options
            .flux_scale
            .or_else(|| header.get_f64(&options.flux_scale_keyword))
            .unwrap_or(1.0);

        debug!(
            "measurement image {:?}: gain={} saturation={} flux_scale={}",
            path, gain, saturation, flux_scale
        );

        Ok(Self {
            path: path.to_path_buf(),
            psf_path: options.psf.clone(),
            weight_path: options.weight.clone(),
            gain,
            saturation,
            flux_scale,
            header,
        })
    }

    pub fn header(&self) -> &FitsHeader {
        &self.header
    }

    pub fn keyword(&self, key: &str) -> Option<&str> {
        self.header.get(key)
    }
}

/// Maps a measurement image to the key of the subgroup it belongs to.
pub trait GroupingCriteria {
    fn group_key(&self, image: &MeasurementImage) -> Result<String, ConfigError>;
}

/// Groups images by the value of a FITS header keyword.
#[derive(Debug, Clone)]
pub struct ByKeyword {
    keyword: String,
}

impl ByKeyword {
    pub fn new(keyword: &str) -> Result<Self, ConfigError> {
        if !keyword_re().is_match(keyword) {
            return Err(ConfigError::InvalidKeyword(keyword.to_string()));
        }
        Ok(Self {
            keyword: keyword.to_string(),
        })
    }
}

impl GroupingCriteria for ByKeyword {
    fn group_key(&self, image: &MeasurementImage) -> Result<String, ConfigError> {
        image
            .keyword(&self.keyword)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::MissingKeyword {
                keyword: self.keyword.clone(),
                path: image.path.clone(),
            })
    }
}

/// Groups images by the first capture group of a regular expression
/// applied to a keyword's value.
#[derive(Debug, Clone)]
pub struct ByPattern {
    keyword: String,
    pattern: Regex,
}

impl ByPattern {
    pub fn new(keyword: &str, pattern: &str) -> Result<Self, ConfigError> {
        if !keyword_re().is_match(keyword) {
            return Err(ConfigError::InvalidKeyword(keyword.to_string()));
        }
        let pattern = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        if pattern.captures_len() < 2 {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.as_str().to_string(),
                reason: "pattern must contain a capture group".into(),
            });
        }
        Ok(Self {
            keyword: keyword.to_string(),
            pattern,
        })
    }
}

impl GroupingCriteria for ByPattern {
    fn group_key(&self, image: &MeasurementImage) -> Result<String, ConfigError> {
        let value = image
            .keyword(&self.keyword)
            .ok_or_else(|| ConfigError::MissingKeyword {
                keyword: self.keyword.clone(),
                path: image.path.clone(),
            })?;
        let captures =
            self.pattern
                .captures(value)
                .ok_or_else(|| ConfigError::PatternMismatch {
                    keyword: self.keyword.clone(),
                    pattern: self.pattern.as_str().to_string(),
                    value: value.to_string(),
                    path: image.path.clone(),
                })?;
        match captures.get(1) {
            Some(m) => Ok(m.as_str().to_string()),
            None => Err(ConfigError::PatternMismatch {
                keyword: self.keyword.clone(),
                pattern: self.pattern.as_str().to_string(),
                value: value.to_string(),
                path: image.path.clone(),
            }),
        }
    }
}

/// A mutable tree of measurement images. A group is either a leaf holding
/// images or a parent holding named subgroups, never both.
#[derive(Debug, Clone, Default)]
pub struct ImageGroup {
    name: Option<String>,
    images: Vec<MeasurementImage>,
    subgroups: Vec<ImageGroup>,
}

impl ImageGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<top>")
    }

    pub fn is_split(&self) -> bool {
        !self.subgroups.is_empty()
    }

    pub fn images(&self) -> &[MeasurementImage] {
        &self.images
    }

    pub fn subgroups(&self) -> &[ImageGroup] {
        &self.subgroups
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
            + self
                .subgroups
                .iter()
                .map(ImageGroup::image_count)
                .sum::<usize>()
    }

    pub fn add_images(
        &mut self,
        images: impl IntoIterator<Item = MeasurementImage>,
    ) -> Result<(), ConfigError> {
        if self.is_split() {
            return Err(ConfigError::AlreadySplit(self.display_name().to_string()));
        }
        self.images.extend(images);
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Option<String>, Vec<MeasurementImage>, Vec<ImageGroup>) {
        (self.name, self.images, self.subgroups)
    }

    /// Partitions a leaf's images into named subgroups, one per distinct
    /// grouping key, sorted by key.
    pub fn split(&mut self, criteria: &dyn GroupingCriteria) -> Result<(), ConfigError> {
        if self.is_split() {
            return Err(ConfigError::AlreadySplit(self.display_name().to_string()));
        }

        let mut by_key: std::collections::BTreeMap<String, Vec<MeasurementImage>> =
            std::collections::BTreeMap::new();
        for image in &self.images {
            let key = criteria.group_key(image)?;
            by_key.entry(key).or_default().push(image.clone());
        }

        debug!(
            "split group `{}` into {} subgroup(s)",
            self.display_name(),
            by_key.len()
        );

        self.images.clear();
        self.subgroups = by_key
            .into_iter()
            .map(|(key, images)| ImageGroup {
                name: Some(key),
                images,
                subgroups: Vec::new(),
            })
            .collect();
        Ok(())
    }
}

/// The frozen form of an [`ImageGroup`], produced when a group is
/// registered into a [`MeasurementConfig`]. Images carry stable ids from
/// here on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementGroup {
    pub(crate) id: GroupId,
    pub(crate) name: Option<String>,
    pub(crate) images: Vec<ImageId>,
    pub(crate) subgroups: Vec<GroupId>,
}

impl MeasurementGroup {
    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<top>")
    }

    pub fn images(&self) -> &[ImageId] {
        &self.images
    }

    pub fn subgroups(&self) -> &[GroupId] {
        &self.subgroups
    }
}

/// Resolves the given paths (FITS files or directories of FITS files),
/// reads every image header in parallel and returns the images as one flat
/// group, ready to be split and registered.
pub fn load_fits_images<I, P>(paths: I, options: &LoadOptions) -> Result<ImageGroup>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let files = resolve::resolve_inputs(paths)?;
    info!("loading {} measurement image(s)", files.len());

    let images = files
        .par_iter()
        .map(|p| MeasurementImage::open(p, options))
        .collect::<Result<Vec<_>>>()?;

    let mut group = ImageGroup::new();
    group.add_images(images)?;
    Ok(group)
}

pub fn write_measurement_images<W: Write>(
    config: &MeasurementConfig,
    w: &mut W,
) -> io::Result<()> {
    for group in config.root_groups() {
        write_group(config, group, 0, w)?;
    }
    Ok(())
}

fn write_group<W: Write>(
    config: &MeasurementConfig,
    group: &MeasurementGroup,
    depth: usize,
    w: &mut W,
) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    writeln!(w, "{}group {} ({}):", indent, group.display_name(), group.id())?;
    for &image_id in group.images() {
        if let Ok(image) = config.image(image_id) {
            writeln!(
                w,
                "{}  {} {:?} gain={} saturation={} flux_scale={}",
                indent, image_id, image.path, image.gain, image.saturation, image.flux_scale
            )?;
        }
    }
    for &sub_id in group.subgroups() {
        if let Ok(sub) = config.group(sub_id) {
            write_group(config, sub, depth + 1, w)?;
        }
    }
    Ok(())
}

pub fn print_measurement_images(config: &MeasurementConfig) -> io::Result<()> {
    write_measurement_images(config, &mut io::stdout().lock())
}
