use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::domain::aperture::Aperture;
use crate::domain::measurement_images::{ImageGroup, MeasurementGroup, MeasurementImage};
use crate::domain::model_fitting::{
    ConstantParameter, DependentParameter, FittingOptions, FreeParameter, Model, Parameter,
};
use crate::domain::output::OutputColumn;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub u32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image #{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group #{}", self.0)
    }
}

impl fmt::Display for ParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "parameter #{}", self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model #{}", self.0)
    }
}

/// Registry of everything a measurement run is configured with: images and
/// their grouping, model-fitting parameters and models, apertures, output
/// columns and fitting options.
///
/// Built once by the configuration code and passed by reference to every
/// consumer; no state lives outside it. Handles returned by the `add_*`
/// methods are only meaningful for the registry that issued them.
#[derive(Debug, Default)]
pub struct MeasurementConfig {
    images: Vec<MeasurementImage>,
    groups: Vec<MeasurementGroup>,
    roots: Vec<GroupId>,
    parameters: Vec<Parameter>,
    models: Vec<(GroupId, Model)>,
    apertures: Vec<(GroupId, Aperture)>,
    output_columns: Vec<OutputColumn>,
    options: FittingOptions,
}

impl MeasurementConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Freezes an [`ImageGroup`] tree: images and groups receive stable
    /// ids, and the returned root id becomes the target for model and
    /// aperture attachment.
    pub fn add_measurement_group(&mut self, group: ImageGroup) -> GroupId {
        let image_count = group.image_count();
        let id = self.register_group(group);
        self.roots.push(id);
        info!(
            "registered measurement group {} with {} image(s)",
            id, image_count
        );
        id
    }

    fn register_group(&mut self, group: ImageGroup) -> GroupId {
        let (name, images, subgroups) = group.into_parts();
        let id = GroupId(self.groups.len() as u32);
        self.groups.push(MeasurementGroup {
            id,
            name,
            images: Vec::new(),
            subgroups: Vec::new(),
        });

        let image_ids: Vec<ImageId> = images
            .into_iter()
            .map(|image| {
                let image_id = ImageId(self.images.len() as u32);
                self.images.push(image);
                image_id
            })
            .collect();
        let subgroup_ids: Vec<GroupId> = subgroups
            .into_iter()
            .map(|subgroup| self.register_group(subgroup))
            .collect();

        let node = &mut self.groups[id.0 as usize];
        node.images = image_ids;
        node.subgroups = subgroup_ids;
        id
    }

    pub fn images(&self) -> &[MeasurementImage] {
        &self.images
    }

    pub fn image(&self, id: ImageId) -> Result<&MeasurementImage, ConfigError> {
        self.images
            .get(id.0 as usize)
            .ok_or(ConfigError::UnknownImage(id))
    }

    pub fn group(&self, id: GroupId) -> Result<&MeasurementGroup, ConfigError> {
        self.groups
            .get(id.0 as usize)
            .ok_or(ConfigError::UnknownGroup(id))
    }

    pub fn root_groups(&self) -> impl Iterator<Item = &MeasurementGroup> {
        self.roots.iter().map(|id| &self.groups[id.0 as usize])
    }

    /// Depth-first lookup of a group by name.
    pub fn find_group(&self, name: &str) -> Option<GroupId> {
        self.groups
            .iter()
            .find(|g| g.name() == Some(name))
            .map(MeasurementGroup::id)
    }

    pub fn add_constant_parameter(&mut self, parameter: ConstantParameter) -> ParameterId {
        self.push_parameter(Parameter::Constant(parameter))
    }

    pub fn add_free_parameter(&mut self, parameter: FreeParameter) -> ParameterId {
        self.push_parameter(Parameter::Free(parameter))
    }

    pub fn add_dependent_parameter(
        &mut self,
        parameter: DependentParameter,
    ) -> Result<ParameterId, ConfigError> {
        for &input in &parameter.inputs {
            self.parameter(input)?;
        }
        Ok(self.push_parameter(Parameter::Dependent(parameter)))
    }

    pub fn add_parameter(
        &mut self,
        parameter: impl Into<Parameter>,
    ) -> Result<ParameterId, ConfigError> {
        match parameter.into() {
            Parameter::Dependent(p) => self.add_dependent_parameter(p),
            other => Ok(self.push_parameter(other)),
        }
    }

    fn push_parameter(&mut self, parameter: Parameter) -> ParameterId {
        let id = ParameterId(self.parameters.len() as u32);
        debug!("registered {} {}", parameter.kind_name(), id);
        self.parameters.push(parameter);
        id
    }

    pub fn parameter(&self, id: ParameterId) -> Result<&Parameter, ConfigError> {
        self.parameters
            .get(id.0 as usize)
            .ok_or(ConfigError::UnknownParameter(id))
    }

    pub fn parameters(&self) -> impl Iterator<Item = (ParameterId, &Parameter)> {
        self.parameters
            .iter()
            .enumerate()
            .map(|(i, p)| (ParameterId(i as u32), p))
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn add_model(&mut self, group: GroupId, model: Model) -> Result<ModelId, ConfigError> {
        self.group(group)?;
        for parameter in model.parameter_ids() {
            self.parameter(parameter)?;
        }
        let id = ModelId(self.models.len() as u32);
        debug!("registered {} model {} on {}", model.kind_name(), id, group);
        self.models.push((group, model));
        Ok(id)
    }

    pub fn model(&self, id: ModelId) -> Result<(GroupId, &Model), ConfigError> {
        self.models
            .get(id.0 as usize)
            .map(|(group, model)| (*group, model))
            .ok_or(ConfigError::UnknownModel(id))
    }

    pub fn models(&self) -> &[(GroupId, Model)] {
        &self.models
    }

    pub fn add_aperture(&mut self, group: GroupId, aperture: Aperture) -> Result<(), ConfigError> {
        self.group(group)?;
        debug!(
            "registered {} aperture diameter(s) on {}",
            aperture.diameters().len(),
            group
        );
        self.apertures.push((group, aperture));
        Ok(())
    }

    pub fn apertures(&self) -> &[(GroupId, Aperture)] {
        &self.apertures
    }

    pub fn add_output_column(
        &mut self,
        name: &str,
        parameters: Vec<ParameterId>,
    ) -> Result<(), ConfigError> {
        if name.is_empty() {
            return Err(ConfigError::EmptyColumnName);
        }
        if self.output_columns.iter().any(|c| c.name == name) {
            return Err(ConfigError::DuplicateColumn(name.to_string()));
        }
        for &parameter in &parameters {
            self.parameter(parameter)?;
        }
        self.output_columns.push(OutputColumn {
            name: name.to_string(),
            parameters,
        });
        Ok(())
    }

    pub fn output_columns(&self) -> &[OutputColumn] {
        &self.output_columns
    }

    pub fn options(&self) -> &FittingOptions {
        &self.options
    }

    pub fn set_fitting_options(&mut self, options: FittingOptions) {
        self.options = options;
    }

    /// Cross-module invariants checked once the configuration is fully
    /// built. Handles are re-verified so a valid registry stays valid no
    /// matter how it was assembled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_columns.is_empty() {
            return Err(ConfigError::NoOutputColumns);
        }
        for (group, model) in &self.models {
            self.group(*group)?;
            for parameter in model.parameter_ids() {
                self.parameter(parameter)?;
            }
        }
        for (group, _) in &self.apertures {
            self.group(*group)?;
        }
        for column in &self.output_columns {
            for &parameter in &column.parameters {
                self.parameter(parameter)?;
            }
        }
        info!(
            "measurement configuration valid: {} image(s), {} group(s), {} parameter(s), {} model(s), {} output column(s)",
            self.images.len(),
            self.groups.len(),
            self.parameters.len(),
            self.models.len(),
            self.output_columns.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::header::BLOCK_SIZE;
    use crate::prelude::*;
    use std::io::Write as _;
    use std::path::Path;

    fn write_fits(path: &Path, extra: &[(&str, &str)]) {
        let mut cards: Vec<(String, String)> = vec![
            ("SIMPLE".into(), "T".into()),
            ("BITPIX".into(), "8".into()),
            ("NAXIS".into(), "2".into()),
            ("NAXIS1".into(), "4".into()),
            ("NAXIS2".into(), "4".into()),
        ];
        for (k, v) in extra {
            cards.push((k.to_string(), v.to_string()));
        }
        let mut out = Vec::new();
        for (k, v) in &cards {
            out.extend_from_slice(format!("{:<8}= {:<70}", k, v).as_bytes());
        }
        out.extend_from_slice(format!("{:<80}", "END").as_bytes());
        while out.len() % BLOCK_SIZE != 0 {
            out.push(b' ');
        }
        out.extend(std::iter::repeat(0u8).take(BLOCK_SIZE));
        std::fs::File::create(path)
            .unwrap()
            .write_all(&out)
            .unwrap();
    }

    #[test]
    fn test_new_config_is_empty() {
        let config = MeasurementConfig::new();
        assert!(config.images().is_empty());
        assert_eq!(config.parameter_count(), 0);
        assert!(config.models().is_empty());
        assert!(config.output_columns().is_empty());
        assert_eq!(config.options(), &FittingOptions::default());
    }

    #[test]
    fn test_freeze_assigns_sequential_ids() {
        let tmp = tempfile::tempdir().unwrap();
        write_fits(&tmp.path().join("a.fits"), &[("FILTER", "'R'")]);
        write_fits(&tmp.path().join("b.fits"), &[("FILTER", "'G'")]);
        let mut group = load_fits_images([tmp.path()], &LoadOptions::default()).unwrap();
        group.split(&ByKeyword::new("FILTER").unwrap()).unwrap();

        let mut config = MeasurementConfig::new();
        let root = config.add_measurement_group(group);

        assert_eq!(config.images().len(), 2);
        let root_group = config.group(root).unwrap();
        assert_eq!(root_group.subgroups().len(), 2);
        assert_eq!(config.find_group("G"), Some(root_group.subgroups()[0]));
        assert_eq!(config.find_group("R"), Some(root_group.subgroups()[1]));
        assert_eq!(config.find_group("B"), None);

        let g = config.group(config.find_group("G").unwrap()).unwrap();
        assert_eq!(g.images().len(), 1);
        assert!(config.image(g.images()[0]).is_ok());
    }

    #[test]
    fn test_unknown_handles() {
        let config = MeasurementConfig::new();
        assert!(matches!(
            config.group(GroupId(3)),
            Err(ConfigError::UnknownGroup(GroupId(3)))
        ));
        assert!(matches!(
            config.image(ImageId(0)),
            Err(ConfigError::UnknownImage(_))
        ));
        assert!(matches!(
            config.parameter(ParameterId(0)),
            Err(ConfigError::UnknownParameter(_))
        ));
        assert!(matches!(
            config.model(ModelId(0)),
            Err(ConfigError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_add_model_requires_known_group() {
        let mut config = MeasurementConfig::new();
        let (x, y) = get_pos_parameters(&mut config);
        let flux = get_flux_parameter(&mut config, FluxParameterType::Iso);
        let err = add_model(&mut config, GroupId(0), PointSourceModel::new(x, y, flux));
        assert!(matches!(err, Err(ConfigError::UnknownGroup(_))));
    }

    #[test]
    fn test_validate_requires_output_columns() {
        let config = MeasurementConfig::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoOutputColumns)
        ));
    }

    // End-to-end configuration driven entirely through the prelude, the
    // way a user configuration script would be written.
    #[test]
    fn test_full_configuration_scenario() {
        let tmp = tempfile::tempdir().unwrap();
        write_fits(
            &tmp.path().join("r1.fits"),
            &[("FILTER", "'R'"), ("GAIN", "1.8")],
        );
        write_fits(&tmp.path().join("r2.fits"), &[("FILTER", "'R'")]);
        write_fits(&tmp.path().join("g1.fits"), &[("FILTER", "'G'")]);

        let mut group = load_fits_images([tmp.path()], &LoadOptions::default()).unwrap();
        group.split(&ByKeyword::new("FILTER").unwrap()).unwrap();

        let mut config = MeasurementConfig::new();
        config.add_measurement_group(group);
        let r_group = config.find_group("R").unwrap();
        let g_group = config.find_group("G").unwrap();

        let (x, y) = get_pos_parameters(&mut config);
        let flux = get_flux_parameter(&mut config, FluxParameterType::Iso);
        let radius = config.add_free_parameter(FreeParameter::new(
            SourceProperty::Radius,
            Range::around_initial(10.0, RangeType::Exponential),
        ));
        let aspect = config.add_free_parameter(FreeParameter::new(
            1.0,
            Range::absolute(0.1, 1.0, RangeType::Linear),
        ));
        let angle = config.add_free_parameter(FreeParameter::new(
            SourceProperty::Angle,
            Range::absolute(-90.0, 90.0, RangeType::Linear),
        ));
        let n = config.add_constant_parameter(ConstantParameter::new(4.0));
        let mag = config
            .add_parameter(DependentParameter::new(vec![flux], |v| {
                -2.5 * v[0].log10()
            }))
            .unwrap();

        add_model(&mut config, r_group, PointSourceModel::new(x, y, flux)).unwrap();
        add_model(
            &mut config,
            g_group,
            SersicModel {
                x,
                y,
                flux,
                effective_radius: radius,
                aspect_ratio: aspect,
                angle,
                n,
            },
        )
        .unwrap();

        add_aperture_photometry(&mut config, r_group, &[5.0, 10.0]).unwrap();
        add_aperture_photometry(&mut config, g_group, &[5.0]).unwrap();

        add_output_column(&mut config, "position", vec![x, y]).unwrap();
        add_output_column(&mut config, "flux", vec![flux]).unwrap();
        add_output_column(&mut config, "mag", vec![mag]).unwrap();

        config.set_fitting_options(FittingOptions {
            max_iterations: 200,
            ..FittingOptions::default()
        });

        config.validate().unwrap();
        assert_eq!(config.images().len(), 3);
        assert_eq!(config.models().len(), 2);
        assert_eq!(config.apertures().len(), 2);
        assert_eq!(config.output_columns().len(), 3);

        let mut out = Vec::new();
        write_measurement_images(&config, &mut out).unwrap();
        write_parameters(&config, &mut out).unwrap();
        write_model_fitting_info(&config, &mut out).unwrap();
        write_apertures(&config, &mut out).unwrap();
        write_output_columns(&config, &mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("r1.fits"));
        assert!(rendered.contains("sersic"));
        assert!(rendered.contains("max_iterations=200"));
        assert!(rendered.contains("apertures [5, 10] px"));
        assert!(rendered.contains("mag"));
    }
}
