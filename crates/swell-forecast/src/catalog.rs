//! The static spot catalog.
//!
//! The bundled catalog covers the French Atlantic coast. A deployment can
//! replace it with a TOML file of `[[spots]]` tables.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::ForecastError;
use crate::types::Spot;

const BUNDLED_SPOTS: &[(i64, &str, f64, f64)] = &[
    (1, "La Gravière", 43.664, -1.448),
    (2, "La Nord", 43.670, -1.450),
    (3, "La Sud", 43.657, -1.449),
    (4, "Les Culs Nuls", 43.675, -1.451),
    (5, "La Centrale", 43.661, -1.447),
    (6, "Les Bourdaines", 43.695, -1.455),
    (7, "Les Estagnots", 43.688, -1.452),
    (8, "Le Penon", 43.703, -1.456),
    (9, "Les Casernes", 43.710, -1.458),
    (10, "La Piste", 43.642, -1.445),
    (11, "Le Santocha", 43.648, -1.444),
    (12, "Moliets Plage", 43.847, -1.390),
    (13, "Vieux Boucau", 43.791, -1.398),
    (14, "Messanges", 43.813, -1.393),
    (15, "Mimizan Plage", 44.201, -1.306),
    (16, "Côte des Basques", 43.476, -1.568),
    (17, "Grande Plage", 43.483, -1.558),
    (18, "La Milady", 43.470, -1.572),
    (19, "Marbella", 43.465, -1.575),
    (20, "Parlementia", 43.430, -1.610),
    (21, "Lafitenia", 43.413, -1.625),
    (22, "Erretegia", 43.442, -1.590),
    (23, "Pavillon Royal", 43.455, -1.580),
    (24, "Ilbarritz", 43.460, -1.577),
    (25, "Les Cavaliers", 43.521, -1.533),
    (26, "Les Corsaires", 43.518, -1.534),
    (27, "La Barre", 43.530, -1.525),
    (28, "Hendaye Plage", 43.368, -1.768),
    (29, "Lacanau Océan", 45.002, -1.197),
    (30, "La Sud Lacanau", 44.997, -1.199),
    (31, "Le Super Sud", 44.990, -1.200),
    (32, "Le Porge Océan", 44.868, -1.171),
    (33, "Hourtin Plage", 45.180, -1.152),
    (34, "Carcans Plage", 45.073, -1.181),
    (35, "Le Grand Crohot", 44.740, -1.240),
    (36, "La Torche", 47.842, -4.348),
    (37, "La Palue", 48.243, -4.538),
    (38, "Pors Carn", 47.797, -4.368),
    (39, "La Presqu'île", 48.271, -4.497),
    (40, "Guidel Plage", 47.776, -3.509),
    (41, "Quiberon", 47.488, -3.122),
    (42, "Donnant", 47.327, -3.205),
    (43, "Sainte-Barbe", 47.606, -3.104),
    (44, "Tronoën", 47.832, -4.310),
    (45, "Les Sables-d'Olonne", 46.497, -1.796),
    (46, "Brétignolles-sur-Mer", 46.627, -1.867),
    (47, "La Sauzaie", 46.632, -1.870),
    (48, "Bud Bud", 46.380, -1.499),
    (49, "Royan — Grande Conche", 45.621, -1.040),
    (50, "Saint-Palais-sur-Mer", 45.638, -1.090),
    (51, "Les Huttes", 45.922, -1.360),
    (52, "Vert Bois", 45.896, -1.380),
    (53, "La Côte Sauvage", 45.686, -1.141),
    (54, "Les Boucholeurs", 46.197, -1.411),
    (55, "Tarnos", 43.553, -1.471),
    (56, "Labenne Océan", 43.597, -1.455),
    (57, "Ondres Plage", 43.574, -1.461),
    (58, "Biscarrosse Plage", 44.454, -1.268),
    (59, "Contis Plage", 44.087, -1.331),
    (60, "Lespécier", 44.228, -1.289),
    (61, "Le Truc Vert", 44.756, -1.235),
    (62, "Montalivet", 45.375, -1.080),
    (63, "Soulac-sur-Mer", 45.513, -1.125),
    (64, "Le Pin Sec", 45.283, -1.065),
];

/// The bundled catalog, in catalog order.
pub fn default_catalog() -> Vec<Spot> {
    BUNDLED_SPOTS
        .iter()
        .map(|&(id, name, lat, lng)| Spot::new(id, name, lat, lng))
        .collect()
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    spots: Vec<Spot>,
}

/// Load and validate a catalog file.
///
/// # Errors
/// Returns `ForecastError::Catalog` if the file is unreadable, malformed,
/// empty, has duplicate ids or out-of-range coordinates.
pub fn load_catalog(path: &Path) -> Result<Vec<Spot>, ForecastError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ForecastError::Catalog(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_catalog(&contents)
}

pub fn parse_catalog(contents: &str) -> Result<Vec<Spot>, ForecastError> {
    let file: CatalogFile =
        toml::from_str(contents).map_err(|e| ForecastError::Catalog(e.to_string()))?;

    if file.spots.is_empty() {
        return Err(ForecastError::Catalog("catalog has no spots".to_string()));
    }

    let mut seen = HashSet::new();
    for spot in &file.spots {
        if !seen.insert(spot.id) {
            return Err(ForecastError::Catalog(format!("duplicate spot id {}", spot.id)));
        }
        if !(-90.0..=90.0).contains(&spot.lat) || !(-180.0..=180.0).contains(&spot.lng) {
            return Err(ForecastError::Catalog(format!(
                "spot {} has out-of-range coordinates ({}, {})",
                spot.id, spot.lat, spot.lng
            )));
        }
    }

    Ok(file.spots)
}

/// Resolve a spot by id.
pub fn find_spot(catalog: &[Spot], spot_id: i64) -> Option<&Spot> {
    catalog.iter().find(|s| s.id == spot_id)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_bundled_catalog() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 64);
        assert_eq!(catalog[0].name, "La Gravière");
        let ids: HashSet<_> = catalog.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), catalog.len());
    }

    #[test]
    fn test_find_spot() {
        let catalog = default_catalog();
        assert_eq!(find_spot(&catalog, 36).unwrap().name, "La Torche");
        assert!(find_spot(&catalog, 999).is_none());
    }

    #[test]
    fn test_parse_catalog_file() {
        let toml = r#"
            [[spots]]
            id = 1
            name = "Home break"
            lat = 43.664
            lng = -1.448

            [[spots]]
            id = 2
            name = "Point"
            lat = 43.670
            lng = -1.450
        "#;
        let spots = parse_catalog(toml).unwrap();
        assert_eq!(spots.len(), 2);
        assert_eq!(spots[1].name, "Point");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let toml = r#"
            [[spots]]
            id = 1
            name = "A"
            lat = 43.0
            lng = -1.0

            [[spots]]
            id = 1
            name = "B"
            lat = 44.0
            lng = -1.0
        "#;
        let err = parse_catalog(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let toml = "[[spots]]\nid = 1\nname = \"A\"\nlat = 95.0\nlng = 0.0\n";
        assert!(parse_catalog(toml).is_err());
    }

    #[test]
    fn test_empty_catalog_rejected() {
        assert!(parse_catalog("spots = []").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_catalog(Path::new("/nonexistent/spots.toml")).unwrap_err();
        assert!(matches!(err, ForecastError::Catalog(_)));
    }
}
