//! Single import surface for measurement configuration code.
//!
//! Everything a configuration script needs is re-exported here, so
//! `use sourcemeter::prelude::*;` is the only import required. This module
//! aggregates names only; it defines nothing and transforms nothing.

pub use crate::domain::measurement_images::{
    load_fits_images, print_measurement_images, write_measurement_images, ByKeyword, ByPattern,
    GroupingCriteria, ImageGroup, LoadOptions, MeasurementGroup, MeasurementImage,
};

pub use crate::domain::model_fitting::{
    add_model, get_flux_parameter, get_pos_parameters, print_model_fitting_info,
    print_parameters, write_model_fitting_info, write_parameters, ConstantParameter,
    DependentParameter, DeVaucouleursModel, ExponentialModel, FittingOptions, FluxParameterType,
    FreeParameter, Model, Parameter, PointSourceModel, Range, RangeBounds, RangeType,
    SersicModel, SourceEstimate, SourceProperty, ValueSpec,
};

pub use crate::domain::aperture::{
    add_aperture_photometry, print_apertures, write_apertures, Aperture, MAX_APERTURES,
};

pub use crate::domain::output::{
    add_output_column, print_output_columns, write_output_columns, OutputColumn,
};

pub use crate::domain::registry::{
    GroupId, ImageId, MeasurementConfig, ModelId, ParameterId,
};

pub use crate::error::ConfigError;
