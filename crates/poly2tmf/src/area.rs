//! Land-cover/feature area types. Declaration order is clip priority:
//! earlier variants claim ground first, later variants only get what is
//! left, and `Ocean` is the implicit fill for whatever no shape claimed.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AreaType {
    /// Carved out of the tile entirely (e.g. an airport handled elsewhere).
    Hole,
    Road,
    Railroad,
    Stream,
    Canal,
    Pond,
    Lake,
    Reservoir,
    /// Land poking through closed water; subtracted from water masks.
    Island,
    Urban,
    Town,
    Forest,
    Grass,
    /// Declared land extent; non-hole features never reach past it.
    Landmass,
    /// Default fill for unclaimed ground. Never read from input.
    Ocean,
}

impl AreaType {
    /// All area types in clip-priority order.
    pub const ALL: [AreaType; 15] = [
        AreaType::Hole,
        AreaType::Road,
        AreaType::Railroad,
        AreaType::Stream,
        AreaType::Canal,
        AreaType::Pond,
        AreaType::Lake,
        AreaType::Reservoir,
        AreaType::Island,
        AreaType::Urban,
        AreaType::Town,
        AreaType::Forest,
        AreaType::Grass,
        AreaType::Landmass,
        AreaType::Ocean,
    ];

    /// Parse an input directory name. "Default" is the historical alias
    /// for the landmass cover.
    pub fn from_dir_name(name: &str) -> Result<AreaType> {
        let area = match name.to_ascii_lowercase().as_str() {
            "hole" => AreaType::Hole,
            "road" => AreaType::Road,
            "railroad" => AreaType::Railroad,
            "stream" => AreaType::Stream,
            "canal" => AreaType::Canal,
            "pond" => AreaType::Pond,
            "lake" => AreaType::Lake,
            "reservoir" => AreaType::Reservoir,
            "island" => AreaType::Island,
            "urban" => AreaType::Urban,
            "town" => AreaType::Town,
            "forest" => AreaType::Forest,
            "grass" => AreaType::Grass,
            "landmass" | "default" => AreaType::Landmass,
            other => bail!("unknown area type directory '{}'", other),
        };
        Ok(area)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AreaType::Hole => "Hole",
            AreaType::Road => "Road",
            AreaType::Railroad => "Railroad",
            AreaType::Stream => "Stream",
            AreaType::Canal => "Canal",
            AreaType::Pond => "Pond",
            AreaType::Lake => "Lake",
            AreaType::Reservoir => "Reservoir",
            AreaType::Island => "Island",
            AreaType::Urban => "Urban",
            AreaType::Town => "Town",
            AreaType::Forest => "Forest",
            AreaType::Grass => "Grass",
            AreaType::Landmass => "Landmass",
            AreaType::Ocean => "Ocean",
        }
    }

    #[inline]
    pub fn is_hole(&self) -> bool {
        matches!(self, AreaType::Hole)
    }

    #[inline]
    pub fn is_landmass(&self) -> bool {
        matches!(self, AreaType::Landmass)
    }

    #[inline]
    pub fn is_island(&self) -> bool {
        matches!(self, AreaType::Island)
    }

    /// Closed water gets flattened to one elevation per triangle fan.
    #[inline]
    pub fn is_closed_water(&self) -> bool {
        matches!(self, AreaType::Pond | AreaType::Lake | AreaType::Reservoir)
    }

    /// Flowing water: elevation capped at a 0.20 slope from the local low.
    #[inline]
    pub fn is_stream(&self) -> bool {
        matches!(self, AreaType::Stream | AreaType::Canal)
    }

    /// Graded surfaces: elevation capped at a 0.30 slope from the local low.
    #[inline]
    pub fn is_road(&self) -> bool {
        matches!(self, AreaType::Road | AreaType::Railroad)
    }

    #[inline]
    pub fn is_ocean(&self) -> bool {
        matches!(self, AreaType::Ocean)
    }

    /// Material assigned when the input record does not name one.
    pub fn default_material(&self) -> &'static str {
        self.name()
    }
}

impl std::fmt::Display for AreaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_matches_declaration() {
        assert!(AreaType::Hole < AreaType::Lake);
        assert!(AreaType::Lake < AreaType::Island);
        assert!(AreaType::Landmass < AreaType::Ocean);

        for pair in AreaType::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_dir_name_aliases() {
        assert_eq!(AreaType::from_dir_name("Lake").unwrap(), AreaType::Lake);
        assert_eq!(AreaType::from_dir_name("default").unwrap(), AreaType::Landmass);
        assert!(AreaType::from_dir_name("Volcano").is_err());
    }

    #[test]
    fn test_predicates() {
        assert!(AreaType::Canal.is_stream());
        assert!(AreaType::Railroad.is_road());
        assert!(AreaType::Reservoir.is_closed_water());
        assert!(!AreaType::Stream.is_closed_water());
    }
}
