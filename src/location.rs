//! # Anchorage Registry
//!
//! Each place the vessel anchors gets its own depth log, so tide history from
//! one bay never pollutes another. The registry maps a position to the first
//! known anchorage within `max_location_distance` meters, or creates a new one.
//!
//! Anchorages are stored as a JSON array in `locations.json`:
//!
//! ```json
//! [{ "id": 1, "name": "Location 26.28514, -80.09035",
//!    "position": { "latitude": 26.285139, "longitude": -80.090347 } }]
//! ```
//!
//! Ids are 1-based positions in that array and never change.

use crate::Position;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while resolving or saving anchorages.
#[derive(Error, Debug)]
pub enum LocationError {
    /// Registry file could not be written
    #[error("location registry IO: {0}")]
    Io(#[from] io::Error),

    /// Registry could not be serialized
    #[error("location registry encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    /// An update referenced an id that was never issued
    #[error("unknown anchorage id {0}")]
    UnknownId(u32),
}

/// A distinct recording location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchorage {
    /// Stable 1-based identifier, also used for the depth log file name
    pub id: u32,
    /// Display name, editable by the user
    pub name: String,
    /// Where the anchorage was first recorded
    pub position: Position,
}

/// Maps a position to the anchorage whose depth log should be used.
pub trait LocationResolver {
    /// Find the anchorage for `position`, creating one if none is close enough.
    fn resolve(&mut self, position: &Position) -> Result<Anchorage, LocationError>;

    /// Replace the stored details of an existing anchorage.
    fn update(&mut self, anchorage: &Anchorage) -> Result<(), LocationError>;
}

/// JSON-file backed [`LocationResolver`].
#[derive(Debug)]
pub struct LocationRegistry {
    path: PathBuf,
    max_distance: f64,
    anchorages: Option<Vec<Anchorage>>,
}

impl LocationRegistry {
    /// Registry stored at `path`; loaded lazily on first use.
    pub fn new<P: AsRef<Path>>(path: P, max_distance: f64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_distance,
            anchorages: None,
        }
    }

    /// All known anchorages.
    pub fn anchorages(&mut self) -> &[Anchorage] {
        self.loaded()
    }

    fn loaded(&mut self) -> &mut Vec<Anchorage> {
        let path = &self.path;
        self.anchorages.get_or_insert_with(|| load_anchorages(path))
    }

    /// First anchorage within the maximum distance of `position`.
    pub fn find_nearest(&mut self, position: &Position) -> Option<Anchorage> {
        let max_distance = self.max_distance;
        self.loaded()
            .iter()
            .find(|anchorage| anchorage.position.distance_to(position) <= max_distance)
            .cloned()
    }

    fn save(&mut self) -> Result<(), LocationError> {
        let json = serde_json::to_string_pretty(self.loaded())?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl LocationResolver for LocationRegistry {
    fn resolve(&mut self, position: &Position) -> Result<Anchorage, LocationError> {
        debug!(
            latitude = position.latitude,
            longitude = position.longitude,
            "Identifying current location"
        );

        if let Some(anchorage) = self.find_nearest(position) {
            return Ok(anchorage);
        }

        let anchorages = self.loaded();
        let anchorage = Anchorage {
            id: anchorages.len() as u32 + 1,
            name: format!(
                "Location {:.5}, {:.5}",
                position.latitude, position.longitude
            ),
            position: *position,
        };
        anchorages.push(anchorage.clone());
        self.save()?;

        info!(id = anchorage.id, name = %anchorage.name, "Added new anchorage");
        Ok(anchorage)
    }

    fn update(&mut self, anchorage: &Anchorage) -> Result<(), LocationError> {
        let index = anchorage
            .id
            .checked_sub(1)
            .ok_or(LocationError::UnknownId(anchorage.id))? as usize;
        let slot = self
            .loaded()
            .get_mut(index)
            .ok_or(LocationError::UnknownId(anchorage.id))?;
        *slot = anchorage.clone();
        self.save()?;

        info!(id = anchorage.id, name = %anchorage.name, "Saved anchorage");
        Ok(())
    }
}

/// Read the registry file; anything unreadable starts an empty registry.
fn load_anchorages(path: &Path) -> Vec<Anchorage> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            debug!(path = %path.display(), %error, "No location registry, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str(&raw) {
        Ok(anchorages) => anchorages,
        Err(error) => {
            warn!(path = %path.display(), %error, "Unreadable location registry, starting empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_haversine_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(0.0, 1.0);
        assert!((a.distance_to(&b) - 111_195.0).abs() < 200.0);
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn test_new_position_creates_anchorage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locations.json");
        let mut registry = LocationRegistry::new(&path, 100.0);

        let anchorage = registry
            .resolve(&Position::new(26.285139, -80.090347))
            .unwrap();
        assert_eq!(anchorage.id, 1);
        assert_eq!(anchorage.name, "Location 26.28514, -80.09035");
        assert!(path.exists());
    }

    #[test]
    fn test_nearby_position_reuses_anchorage() {
        let dir = tempdir().unwrap();
        let mut registry = LocationRegistry::new(dir.path().join("locations.json"), 100.0);

        let first = registry.resolve(&Position::new(41.5, -70.6)).unwrap();
        // About 55 m north: same anchorage.
        let near = registry.resolve(&Position::new(41.5005, -70.6)).unwrap();
        // About 1.1 km north: a new one.
        let far = registry.resolve(&Position::new(41.51, -70.6)).unwrap();

        assert_eq!(first.id, near.id);
        assert_eq!(far.id, 2);
        assert_eq!(registry.anchorages().len(), 2);
    }

    #[test]
    fn test_registry_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locations.json");
        {
            let mut registry = LocationRegistry::new(&path, 100.0);
            registry.resolve(&Position::new(41.5, -70.6)).unwrap();
        }

        let mut reloaded = LocationRegistry::new(&path, 100.0);
        let again = reloaded.resolve(&Position::new(41.5, -70.6)).unwrap();
        assert_eq!(again.id, 1);
        assert_eq!(reloaded.anchorages().len(), 1);
    }

    #[test]
    fn test_update_renames_anchorage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locations.json");
        let mut registry = LocationRegistry::new(&path, 100.0);

        let mut anchorage = registry.resolve(&Position::new(41.5, -70.6)).unwrap();
        anchorage.name = "Hadley Harbor".to_string();
        registry.update(&anchorage).unwrap();

        let mut reloaded = LocationRegistry::new(&path, 100.0);
        assert_eq!(reloaded.anchorages()[0].name, "Hadley Harbor");
    }

    #[test]
    fn test_update_unknown_id_fails() {
        let dir = tempdir().unwrap();
        let mut registry = LocationRegistry::new(dir.path().join("locations.json"), 100.0);
        let ghost = Anchorage {
            id: 7,
            name: "Nowhere".to_string(),
            position: Position::new(0.0, 0.0),
        };
        assert!(matches!(
            registry.update(&ghost),
            Err(LocationError::UnknownId(7))
        ));
    }

    #[test]
    fn test_corrupt_registry_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locations.json");
        fs::write(&path, "{ not json").unwrap();

        let mut registry = LocationRegistry::new(&path, 100.0);
        assert!(registry.anchorages().is_empty());
    }
}
