use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::domain::registry::{MeasurementConfig, ParameterId};
use crate::error::ConfigError;

/// A named catalog column fed by one or more registered model-fitting
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    pub name: String,
    pub parameters: Vec<ParameterId>,
}

/// Registers a catalog column. Column names are unique; every referenced
/// parameter must already be registered.
pub fn add_output_column(
    config: &mut MeasurementConfig,
    name: &str,
    parameters: Vec<ParameterId>,
) -> Result<(), ConfigError> {
    config.add_output_column(name, parameters)
}

pub fn write_output_columns<W: Write>(config: &MeasurementConfig, w: &mut W) -> io::Result<()> {
    for column in config.output_columns() {
        let params: Vec<String> = column.parameters.iter().map(|p| p.to_string()).collect();
        writeln!(w, "{}: [{}]", column.name, params.join(", "))?;
    }
    Ok(())
}

pub fn print_output_columns(config: &MeasurementConfig) -> io::Result<()> {
    write_output_columns(config, &mut io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model_fitting::{get_pos_parameters, ConstantParameter};

    #[test]
    fn test_add_output_column() {
        let mut config = MeasurementConfig::new();
        let (x, y) = get_pos_parameters(&mut config);
        add_output_column(&mut config, "position", vec![x, y]).unwrap();
        assert_eq!(config.output_columns().len(), 1);
        assert_eq!(config.output_columns()[0].name, "position");
    }

    #[test]
    fn test_duplicate_column_name() {
        let mut config = MeasurementConfig::new();
        let c = config.add_constant_parameter(ConstantParameter::new(1.0));
        add_output_column(&mut config, "flux", vec![c]).unwrap();
        let err = add_output_column(&mut config, "flux", vec![c]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateColumn(_)));
    }

    #[test]
    fn test_empty_column_name() {
        let mut config = MeasurementConfig::new();
        let err = add_output_column(&mut config, "", Vec::new()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyColumnName));
    }

    #[test]
    fn test_unknown_parameter() {
        let mut config = MeasurementConfig::new();
        let err = add_output_column(&mut config, "flux", vec![ParameterId(7)]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownParameter(ParameterId(7))));
    }

    #[test]
    fn test_write_output_columns() {
        let mut config = MeasurementConfig::new();
        let (x, y) = get_pos_parameters(&mut config);
        add_output_column(&mut config, "position", vec![x, y]).unwrap();

        let mut out = Vec::new();
        write_output_columns(&config, &mut out).unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("position"));
        assert!(rendered.contains("parameter #0"));
    }
}
