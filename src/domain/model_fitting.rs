use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::registry::{GroupId, MeasurementConfig, ModelId, ParameterId};
use crate::error::ConfigError;

/// Fitting-space transform of a free parameter. Exponential parameters are
/// fitted in log space, which keeps strictly positive quantities positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeType {
    Linear,
    Exponential,
}

impl fmt::Display for RangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Exponential => write!(f, "exponential"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RangeBounds {
    /// Fixed limits, independent of the initial value.
    Absolute(f64, f64),
    /// Limits derived from the initial value: additive for linear ranges,
    /// multiplicative for exponential ones.
    AroundInitial(f64),
}

/// Allowed interval of a free parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub bounds: RangeBounds,
    pub range_type: RangeType,
}

impl Range {
    pub fn new(bounds: RangeBounds, range_type: RangeType) -> Self {
        Self { bounds, range_type }
    }

    pub fn absolute(lo: f64, hi: f64, range_type: RangeType) -> Self {
        Self::new(RangeBounds::Absolute(lo, hi), range_type)
    }

    pub fn around_initial(width: f64, range_type: RangeType) -> Self {
        Self::new(RangeBounds::AroundInitial(width), range_type)
    }

    pub fn limits(&self, initial: f64) -> (f64, f64) {
        match self.bounds {
            RangeBounds::Absolute(lo, hi) => (lo, hi),
            RangeBounds::AroundInitial(width) => match self.range_type {
                RangeType::Linear => (initial - width, initial + width),
                RangeType::Exponential => (initial / width, initial * width),
            },
        }
    }
}

/// Detection-stage estimates of one source, used to seed per-source
/// parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceEstimate {
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub iso_flux: f64,
    pub radius: f64,
    pub aspect_ratio: f64,
    pub angle: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceProperty {
    CentroidX,
    CentroidY,
    IsoFlux,
    Radius,
    AspectRatio,
    Angle,
}

impl SourceProperty {
    fn value_of(self, source: &SourceEstimate) -> f64 {
        match self {
            Self::CentroidX => source.centroid_x,
            Self::CentroidY => source.centroid_y,
            Self::IsoFlux => source.iso_flux,
            Self::Radius => source.radius,
            Self::AspectRatio => source.aspect_ratio,
            Self::Angle => source.angle,
        }
    }
}

impl fmt::Display for SourceProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CentroidX => "centroid_x",
            Self::CentroidY => "centroid_y",
            Self::IsoFlux => "iso_flux",
            Self::Radius => "radius",
            Self::AspectRatio => "aspect_ratio",
            Self::Angle => "angle",
        };
        write!(f, "{}", name)
    }
}

/// A per-source scalar: a literal constant or a detection property,
/// optionally scaled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ValueSpec {
    Constant(f64),
    Property(SourceProperty),
    ScaledProperty { property: SourceProperty, scale: f64 },
}

impl ValueSpec {
    pub fn evaluate(&self, source: &SourceEstimate) -> f64 {
        match *self {
            Self::Constant(v) => v,
            Self::Property(p) => p.value_of(source),
            Self::ScaledProperty { property, scale } => property.value_of(source) * scale,
        }
    }
}

impl From<f64> for ValueSpec {
    fn from(v: f64) -> Self {
        Self::Constant(v)
    }
}

impl From<SourceProperty> for ValueSpec {
    fn from(p: SourceProperty) -> Self {
        Self::Property(p)
    }
}

impl fmt::Display for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{}", v),
            Self::Property(p) => write!(f, "{}", p),
            Self::ScaledProperty { property, scale } => write!(f, "{} * {}", scale, property),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantParameter {
    pub value: ValueSpec,
}

impl ConstantParameter {
    pub fn new(value: impl Into<ValueSpec>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeParameter {
    pub initial: ValueSpec,
    pub range: Range,
}

impl FreeParameter {
    pub fn new(initial: impl Into<ValueSpec>, range: Range) -> Self {
        Self {
            initial: initial.into(),
            range,
        }
    }
}

/// A parameter computed from previously registered parameters. Inputs must
/// already exist when the parameter is registered, which keeps the
/// dependency graph acyclic.
#[derive(Clone)]
pub struct DependentParameter {
    pub inputs: Vec<ParameterId>,
    func: Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>,
}

impl DependentParameter {
    pub fn new(
        inputs: Vec<ParameterId>,
        func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            inputs,
            func: Arc::new(func),
        }
    }

    pub fn evaluate(&self, input_values: &[f64]) -> f64 {
        (self.func)(input_values)
    }
}

impl fmt::Debug for DependentParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentParameter")
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Parameter {
    Constant(ConstantParameter),
    Free(FreeParameter),
    Dependent(DependentParameter),
}

impl Parameter {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant(_) => "constant",
            Self::Free(_) => "free",
            Self::Dependent(_) => "dependent",
        }
    }
}

impl From<ConstantParameter> for Parameter {
    fn from(p: ConstantParameter) -> Self {
        Self::Constant(p)
    }
}

impl From<FreeParameter> for Parameter {
    fn from(p: FreeParameter) -> Self {
        Self::Free(p)
    }
}

impl From<DependentParameter> for Parameter {
    fn from(p: DependentParameter) -> Self {
        Self::Dependent(p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointSourceModel {
    pub x: ParameterId,
    pub y: ParameterId,
    pub flux: ParameterId,
}

impl PointSourceModel {
    pub fn new(x: ParameterId, y: ParameterId, flux: ParameterId) -> Self {
        Self { x, y, flux }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SersicModel {
    pub x: ParameterId,
    pub y: ParameterId,
    pub flux: ParameterId,
    pub effective_radius: ParameterId,
    pub aspect_ratio: ParameterId,
    pub angle: ParameterId,
    pub n: ParameterId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialModel {
    pub x: ParameterId,
    pub y: ParameterId,
    pub flux: ParameterId,
    pub effective_radius: ParameterId,
    pub aspect_ratio: ParameterId,
    pub angle: ParameterId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeVaucouleursModel {
    pub x: ParameterId,
    pub y: ParameterId,
    pub flux: ParameterId,
    pub effective_radius: ParameterId,
    pub aspect_ratio: ParameterId,
    pub angle: ParameterId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    PointSource(PointSourceModel),
    Sersic(SersicModel),
    Exponential(ExponentialModel),
    DeVaucouleurs(DeVaucouleursModel),
}

impl Model {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::PointSource(_) => "point source",
            Self::Sersic(_) => "sersic",
            Self::Exponential(_) => "exponential",
            Self::DeVaucouleurs(_) => "de vaucouleurs",
        }
    }

    pub fn parameter_ids(&self) -> Vec<ParameterId> {
        match *self {
            Self::PointSource(m) => vec![m.x, m.y, m.flux],
            Self::Sersic(m) => vec![
                m.x,
                m.y,
                m.flux,
                m.effective_radius,
                m.aspect_ratio,
                m.angle,
                m.n,
            ],
            Self::Exponential(m) => {
                vec![m.x, m.y, m.flux, m.effective_radius, m.aspect_ratio, m.angle]
            }
            Self::DeVaucouleurs(m) => {
                vec![m.x, m.y, m.flux, m.effective_radius, m.aspect_ratio, m.angle]
            }
        }
    }
}

impl From<PointSourceModel> for Model {
    fn from(m: PointSourceModel) -> Self {
        Self::PointSource(m)
    }
}

impl From<SersicModel> for Model {
    fn from(m: SersicModel) -> Self {
        Self::Sersic(m)
    }
}

impl From<ExponentialModel> for Model {
    fn from(m: ExponentialModel) -> Self {
        Self::Exponential(m)
    }
}

impl From<DeVaucouleursModel> for Model {
    fn from(m: DeVaucouleursModel) -> Self {
        Self::DeVaucouleurs(m)
    }
}

/// Detection-stage flux used to seed a model's flux parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FluxParameterType {
    Iso,
}

pub const DEFAULT_POSITION_RANGE: f64 = 20.0;
pub const DEFAULT_FLUX_RANGE_FACTOR: f64 = 1.0e3;

/// Convenience pair of free position parameters seeded from the source
/// centroid, allowed to move a fixed number of pixels.
pub fn get_pos_parameters(config: &mut MeasurementConfig) -> (ParameterId, ParameterId) {
    let x = config.add_free_parameter(FreeParameter::new(
        SourceProperty::CentroidX,
        Range::around_initial(DEFAULT_POSITION_RANGE, RangeType::Linear),
    ));
    let y = config.add_free_parameter(FreeParameter::new(
        SourceProperty::CentroidY,
        Range::around_initial(DEFAULT_POSITION_RANGE, RangeType::Linear),
    ));
    (x, y)
}

/// Free flux parameter seeded from the requested detection flux, fitted in
/// log space.
pub fn get_flux_parameter(
    config: &mut MeasurementConfig,
    flux_type: FluxParameterType,
) -> ParameterId {
    match flux_type {
        FluxParameterType::Iso => config.add_free_parameter(FreeParameter::new(
            SourceProperty::IsoFlux,
            Range::around_initial(DEFAULT_FLUX_RANGE_FACTOR, RangeType::Exponential),
        )),
    }
}

/// Attaches a model to a registered measurement group.
pub fn add_model(
    config: &mut MeasurementConfig,
    group: GroupId,
    model: impl Into<Model>,
) -> Result<ModelId, ConfigError> {
    config.add_model(group, model.into())
}

/// Engine selection and iteration cap for the least-squares fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FittingOptions {
    pub engine: String,
    pub max_iterations: u32,
}

impl Default for FittingOptions {
    fn default() -> Self {
        Self {
            engine: "levmar".into(),
            max_iterations: 100,
        }
    }
}

impl FittingOptions {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fitting options from {:?}", path))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse fitting options in {:?}", path))
    }
}

pub fn write_parameters<W: Write>(config: &MeasurementConfig, w: &mut W) -> io::Result<()> {
    for (id, parameter) in config.parameters() {
        match parameter {
            Parameter::Constant(p) => writeln!(w, "{}: constant value={}", id, p.value)?,
            Parameter::Free(p) => {
                let range = match (p.range.bounds, p.range.range_type) {
                    (RangeBounds::Absolute(lo, hi), _) => format!("[{}, {}]", lo, hi),
                    (RangeBounds::AroundInitial(w), RangeType::Linear) => format!("±{}", w),
                    (RangeBounds::AroundInitial(w), RangeType::Exponential) => format!("×{}", w),
                };
                writeln!(
                    w,
                    "{}: free initial={} range={} ({})",
                    id, p.initial, range, p.range.range_type
                )?;
            }
            Parameter::Dependent(p) => {
                let inputs: Vec<String> = p.inputs.iter().map(|i| i.to_string()).collect();
                writeln!(w, "{}: dependent on [{}]", id, inputs.join(", "))?;
            }
        }
    }
    Ok(())
}

pub fn print_parameters(config: &MeasurementConfig) -> io::Result<()> {
    write_parameters(config, &mut io::stdout().lock())
}

pub fn write_model_fitting_info<W: Write>(
    config: &MeasurementConfig,
    w: &mut W,
) -> io::Result<()> {
    let options = config.options();
    writeln!(
        w,
        "model fitting: engine={} max_iterations={}",
        options.engine, options.max_iterations
    )?;

    let mut by_group: BTreeMap<GroupId, Vec<&Model>> = BTreeMap::new();
    for (group_id, model) in config.models() {
        by_group.entry(*group_id).or_default().push(model);
    }
    for (group_id, models) in by_group {
        let name = config
            .group(group_id)
            .map(|g| g.display_name().to_string())
            .unwrap_or_else(|_| group_id.to_string());
        writeln!(w, "group {}: {} model(s)", name, models.len())?;
        for model in models {
            let params: Vec<String> = model
                .parameter_ids()
                .iter()
                .map(|p| p.to_string())
                .collect();
            writeln!(w, "  {} [{}]", model.kind_name(), params.join(", "))?;
        }
    }
    Ok(())
}

pub fn print_model_fitting_info(config: &MeasurementConfig) -> io::Result<()> {
    write_model_fitting_info(config, &mut io::stdout().lock())
}
