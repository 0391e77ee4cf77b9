use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::domain::registry::{GroupId, MeasurementConfig};
use crate::error::ConfigError;

/// Upper bound on apertures attached to one group; the catalog flag word
/// reserves one bit per aperture.
pub const MAX_APERTURES: usize = 32;

/// Circular aperture diameters, in pixels, measured on every image of the
/// target group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aperture {
    diameters: Vec<f64>,
}

impl Aperture {
    pub fn new(diameters: &[f64]) -> Result<Self, ConfigError> {
        if diameters.is_empty() {
            return Err(ConfigError::EmptyAperture);
        }
        if diameters.len() > MAX_APERTURES {
            return Err(ConfigError::TooManyApertures {
                count: diameters.len(),
                limit: MAX_APERTURES,
            });
        }
        for &d in diameters {
            if !d.is_finite() || d <= 0.0 {
                return Err(ConfigError::InvalidAperture(d));
            }
        }
        Ok(Self {
            diameters: diameters.to_vec(),
        })
    }

    pub fn diameters(&self) -> &[f64] {
        &self.diameters
    }
}

/// Validates the diameters and attaches them to a registered group.
pub fn add_aperture_photometry(
    config: &mut MeasurementConfig,
    group: GroupId,
    diameters: &[f64],
) -> Result<(), ConfigError> {
    let aperture = Aperture::new(diameters)?;
    config.add_aperture(group, aperture)
}

pub fn write_apertures<W: Write>(config: &MeasurementConfig, w: &mut W) -> io::Result<()> {
    for (group_id, aperture) in config.apertures() {
        let name = config
            .group(*group_id)
            .map(|g| g.display_name().to_string())
            .unwrap_or_else(|_| group_id.to_string());
        let diameters: Vec<String> = aperture
            .diameters()
            .iter()
            .map(|d| d.to_string())
            .collect();
        writeln!(w, "group {}: apertures [{}] px", name, diameters.join(", "))?;
    }
    Ok(())
}

pub fn print_apertures(config: &MeasurementConfig) -> io::Result<()> {
    write_apertures(config, &mut io::stdout().lock())
}
