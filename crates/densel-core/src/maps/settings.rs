use crate::engine::config::MapDefaults;
use crate::engine::protocol::ReturnShape;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

pub use crate::engine::config::MapStyle;

impl MapStyle {
    pub fn return_shape(self) -> ReturnShape {
        match self {
            MapStyle::Solid => ReturnShape::Mesh,
            MapStyle::Lines => ReturnShape::LinesMesh,
            MapStyle::LitLines => ReturnShape::LitLinesMesh,
        }
    }
}

/// Contour parameters that require a new mesh from the engine when changed.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    pub contour_level: f64,
    pub radius: f64,
    pub style: MapStyle,
    /// Centre of the contoured region, usually the view origin.
    pub origin: Point3<f64>,
    pub alpha: f32,
}

impl DisplaySettings {
    pub fn from_defaults(defaults: &MapDefaults) -> Self {
        Self {
            contour_level: 0.5,
            radius: defaults.radius,
            style: defaults.style,
            origin: Point3::origin(),
            alpha: defaults.alpha,
        }
    }
}

/// Values the engine proposes for a freshly loaded map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedSettings {
    pub rmsd: f64,
    pub weight: f64,
    pub centre: Point3<f64>,
    pub contour_level: f64,
    pub radius: f64,
    pub is_em: bool,
}

/// Reply payload of `get_map_molecule_centre`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapCentre {
    pub updated_centre: Point3<f64>,
    pub suggested_radius: f64,
    pub success: bool,
}

/// Column selection for reading a map from reflection (MTZ) data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtzColumns {
    #[serde(rename = "F")]
    pub f: String,
    #[serde(rename = "PHI")]
    pub phi: String,
    #[serde(rename = "W", default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub use_weight: bool,
    /// Overrides the engine's own difference-map inference when set.
    #[serde(default)]
    pub is_difference: Option<bool>,
    #[serde(default)]
    pub calculate_structure_factors: bool,
    #[serde(rename = "Fobs", default)]
    pub fobs: Option<String>,
    #[serde(rename = "SigFobs", default)]
    pub sig_fobs: Option<String>,
    #[serde(rename = "FreeR", default)]
    pub free_r: Option<String>,
}

impl MtzColumns {
    pub fn new(f: impl Into<String>, phi: impl Into<String>) -> Self {
        Self {
            f: f.into(),
            phi: phi.into(),
            weight: None,
            use_weight: false,
            is_difference: None,
            calculate_structure_factors: false,
            fobs: None,
            sig_fobs: None,
            free_r: None,
        }
    }

    pub fn difference(mut self, is_difference: bool) -> Self {
        self.is_difference = Some(is_difference);
        self
    }

    /// Requests that the observed data be associated with the map for
    /// structure-factor calculation.
    pub fn with_observations(
        mut self,
        fobs: impl Into<String>,
        sig_fobs: impl Into<String>,
        free_r: impl Into<String>,
    ) -> Self {
        self.calculate_structure_factors = true;
        self.fobs = Some(fobs.into());
        self.sig_fobs = Some(sig_fobs.into());
        self.free_r = Some(free_r.into());
        self
    }

    /// The observation columns, when structure factors are requested and all
    /// three are named.
    pub fn observations(&self) -> Option<(&str, &str, &str)> {
        if !self.calculate_structure_factors {
            return None;
        }
        Some((
            self.fobs.as_deref()?,
            self.sig_fobs.as_deref()?,
            self.free_r.as_deref()?,
        ))
    }
}

/// Colour a standard map's contour by the values of another map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OtherMapColouring {
    pub other_map: i64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub absolute: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn style_selects_mesh_shape() {
        assert_eq!(MapStyle::Solid.return_shape(), ReturnShape::Mesh);
        assert_eq!(MapStyle::Lines.return_shape(), ReturnShape::LinesMesh);
        assert_eq!(MapStyle::LitLines.return_shape(), ReturnShape::LitLinesMesh);
    }

    #[test]
    fn mtz_columns_accept_conventional_keys() {
        let columns: MtzColumns = serde_json::from_value(json!({
            "F": "FWT",
            "PHI": "PHWT",
            "is_difference": false
        }))
        .unwrap();
        assert_eq!(columns, MtzColumns::new("FWT", "PHWT").difference(false));
    }

    #[test]
    fn observations_require_every_column() {
        let mut columns = MtzColumns::new("FWT", "PHWT").with_observations("FP", "SIGFP", "FREE");
        assert_eq!(columns.observations(), Some(("FP", "SIGFP", "FREE")));
        columns.free_r = None;
        assert_eq!(columns.observations(), None);
        assert_eq!(MtzColumns::new("FWT", "PHWT").observations(), None);
    }

    #[test]
    fn map_centre_decodes_from_engine_json() {
        let centre: MapCentre = serde_json::from_value(json!({
            "updated_centre": [1.0, 2.0, 3.0],
            "suggested_radius": 20.0,
            "success": true
        }))
        .unwrap();
        assert_eq!(centre.updated_centre, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn style_names_are_kebab_case() {
        assert_eq!(serde_json::to_value(MapStyle::LitLines).unwrap(), json!("lit-lines"));
    }
}
