//! The closed set of observed elements and their canonical units.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MetError;

/// A measured or forecast quantity.
///
/// Every stored value is normalized to the element's canonical unit before
/// it leaves a parser; nothing downstream converts units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    Temperature,
    Precipitation,
    WindSpeed,
    WindDirection,
    PressureMsl,
    Sunshine,
}

impl Element {
    /// Canonical unit this element is stored in.
    pub fn canonical_unit(&self) -> &'static str {
        match self {
            Element::Temperature => "K",
            Element::Precipitation => "kg/m²",
            Element::WindSpeed => "m/s",
            Element::WindDirection => "°",
            Element::PressureMsl => "Pa",
            Element::Sunshine => "s",
        }
    }

    /// Stable wire/storage name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Element::Temperature => "temperature",
            Element::Precipitation => "precipitation",
            Element::WindSpeed => "wind_speed",
            Element::WindDirection => "wind_direction",
            Element::PressureMsl => "pressure_msl",
            Element::Sunshine => "sunshine",
        }
    }

    /// All elements, in storage-name order.
    pub fn all() -> &'static [Element] {
        &[
            Element::Precipitation,
            Element::PressureMsl,
            Element::Sunshine,
            Element::Temperature,
            Element::WindDirection,
            Element::WindSpeed,
        ]
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Element {
    type Err = MetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(Element::Temperature),
            "precipitation" => Ok(Element::Precipitation),
            "wind_speed" => Ok(Element::WindSpeed),
            "wind_direction" => Ok(Element::WindDirection),
            "pressure_msl" => Ok(Element::PressureMsl),
            "sunshine" => Ok(Element::Sunshine),
            other => Err(MetError::UnknownElement(other.to_string())),
        }
    }
}
