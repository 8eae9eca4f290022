//! Country / city / coordinate resolution against the reference catalog.

use std::sync::Arc;

use crate::models::{CityEntry, CountryCatalog, LocationConfig, DEFAULT_COUNTRY};
use crate::settings::ValidationError;

/// Two coordinates closer than this (decimal degrees, per axis) name the same place.
pub const COORDINATE_EPSILON: f64 = 0.001;

/// What the city selector shows.
#[derive(Debug, Clone, PartialEq)]
pub enum CitySelection {
    Named(String),
    /// Coordinates were typed in by hand.
    Custom,
}

impl CitySelection {
    pub fn name(&self) -> Option<&str> {
        match self {
            CitySelection::Named(name) => Some(name),
            CitySelection::Custom => None,
        }
    }
}

/// A complete selector state: a country is always chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSelection {
    pub country: String,
    pub city: CitySelection,
}

#[derive(Debug, Clone, Default)]
pub struct LocationResolver {
    catalog: Arc<CountryCatalog>,
}

impl LocationResolver {
    pub fn new(catalog: Arc<CountryCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &CountryCatalog {
        &self.catalog
    }

    fn find_city(&self, country: &str, city: &str) -> Option<&CityEntry> {
        self.catalog.cities(country)?.iter().find(|entry| entry.name == city)
    }

    /// Coordinates of a named city, if the catalog knows it.
    pub fn coordinates_for(&self, country: &str, city: &str) -> Option<(f64, f64)> {
        self.find_city(country, city).map(|entry| (entry.latitude, entry.longitude))
    }

    /// City pre-selected when the user switches country: the first in the list,
    /// or `Custom` for a country without cities.
    pub fn default_city(&self, country: &str) -> CitySelection {
        self.catalog
            .cities(country)
            .and_then(|cities| cities.first())
            .map(|entry| CitySelection::Named(entry.name.clone()))
            .unwrap_or(CitySelection::Custom)
    }

    /// Writes a selector state into a location being edited.
    ///
    /// A named city overwrites the coordinates with the catalog's. `Custom` keeps
    /// whatever coordinates the user typed and clears `city`. A named city that is
    /// not in the catalog is treated as `Custom`. Returns the selection applied.
    pub fn apply_selection(
        &self,
        location: &mut LocationConfig,
        country: &str,
        city: &CitySelection,
    ) -> CitySelection {
        location.country = Some(country.to_string());

        if let CitySelection::Named(name) = city {
            if let Some(entry) = self.find_city(country, name) {
                location.latitude = entry.latitude;
                location.longitude = entry.longitude;
                location.city = Some(entry.name.clone());
                return CitySelection::Named(entry.name.clone());
            }
            tracing::debug!("City {} not listed for {}, keeping manual coordinates", name, country);
        }

        location.city = None;
        CitySelection::Custom
    }

    /// Picks the selector state for a stored location.
    ///
    /// Country: the stored one, else the default country, else (when the catalog
    /// does not list it) the catalog's first country. City: the stored city when
    /// the country lists it; otherwise the first city, in list order, whose
    /// latitude and longitude are both within [`COORDINATE_EPSILON`] of the stored
    /// coordinates; otherwise `Custom`.
    pub fn resolve(&self, stored: Option<&LocationConfig>) -> LocationSelection {
        let country = self.resolve_country(stored.and_then(|l| l.country.as_deref()));

        let Some(location) = stored else {
            return LocationSelection { country, city: CitySelection::Custom };
        };

        if let Some(name) = location.city.as_deref() {
            if self.find_city(&country, name).is_some() {
                return LocationSelection { country, city: CitySelection::Named(name.to_string()) };
            }
        }

        let city = self
            .match_coordinates(&country, location.latitude, location.longitude)
            .map(|entry| CitySelection::Named(entry.name.clone()))
            .unwrap_or(CitySelection::Custom);

        LocationSelection { country, city }
    }

    fn resolve_country(&self, stored: Option<&str>) -> String {
        let wanted = stored.unwrap_or(DEFAULT_COUNTRY);
        if self.catalog.contains(wanted) {
            return wanted.to_string();
        }
        match self.catalog.first_country() {
            Some(first) => {
                tracing::debug!("Country {} not in catalog, falling back to {}", wanted, first);
                first.to_string()
            }
            None => wanted.to_string(),
        }
    }

    /// First city (list order, no distance ranking) within epsilon on both axes.
    pub fn match_coordinates(&self, country: &str, latitude: f64, longitude: f64) -> Option<&CityEntry> {
        self.catalog.cities(country)?.iter().find(|entry| {
            (entry.latitude - latitude).abs() < COORDINATE_EPSILON
                && (entry.longitude - longitude).abs() < COORDINATE_EPSILON
        })
    }
}

/// Rejects coordinates outside the valid ranges (NaN included).
pub fn validate_coordinates(location: &LocationConfig) -> Result<(), ValidationError> {
    if !(-90.0..=90.0).contains(&location.latitude) {
        return Err(ValidationError::LatitudeOutOfRange(location.latitude.to_string()));
    }
    if !(-180.0..=180.0).contains(&location.longitude) {
        return Err(ValidationError::LongitudeOutOfRange(location.longitude.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_must_be_in_range() {
        assert!(validate_coordinates(&LocationConfig::new(51.5, -0.1)).is_ok());
        assert!(matches!(
            validate_coordinates(&LocationConfig::new(91.0, 0.0)),
            Err(ValidationError::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            validate_coordinates(&LocationConfig::new(0.0, f64::NAN)),
            Err(ValidationError::LongitudeOutOfRange(_))
        ));
    }

    fn resolver() -> LocationResolver {
        LocationResolver::new(Arc::new(CountryCatalog::new(vec![
            (
                "United Kingdom".to_string(),
                vec![
                    CityEntry::new("A", 51.5, -0.1),
                    CityEntry::new("B", 51.5001, -0.1001),
                    CityEntry::new("Leeds", 53.8008, -1.5491),
                ],
            ),
            ("Egypt".to_string(), vec![CityEntry::new("Cairo", 30.0444, 31.2357)]),
            ("Atlantis".to_string(), vec![]),
        ])))
    }

    fn stored(country: Option<&str>, city: Option<&str>, lat: f64, lng: f64) -> LocationConfig {
        let mut location = LocationConfig::new(lat, lng);
        location.country = country.map(str::to_string);
        location.city = city.map(str::to_string);
        location
    }

    #[test]
    fn reverse_match_takes_first_entry_in_list_order() {
        let selection = resolver().resolve(Some(&stored(Some("United Kingdom"), None, 51.5, -0.1)));
        assert_eq!(selection.city, CitySelection::Named("A".into()));
    }

    #[test]
    fn reverse_match_requires_both_axes_within_epsilon() {
        let r = resolver();
        assert!(r.match_coordinates("United Kingdom", 51.5, -0.2).is_none());
        assert!(r.match_coordinates("United Kingdom", 51.6, -0.1).is_none());
        assert_eq!(r.match_coordinates("United Kingdom", 53.8012, -1.5487).unwrap().name, "Leeds");
    }

    #[test]
    fn no_match_falls_back_to_custom() {
        let selection = resolver().resolve(Some(&stored(Some("United Kingdom"), None, 10.0, 10.0)));
        assert_eq!(selection.country, "United Kingdom");
        assert_eq!(selection.city, CitySelection::Custom);
    }

    #[test]
    fn stored_city_is_selected_when_listed() {
        let selection = resolver().resolve(Some(&stored(Some("Egypt"), Some("Cairo"), 0.0, 0.0)));
        assert_eq!(selection.city, CitySelection::Named("Cairo".into()));
    }

    #[test]
    fn unlisted_stored_city_falls_back_through_coordinates() {
        let r = resolver();
        let by_coords = r.resolve(Some(&stored(Some("United Kingdom"), Some("Gone"), 53.8008, -1.5491)));
        assert_eq!(by_coords.city, CitySelection::Named("Leeds".into()));

        let custom = r.resolve(Some(&stored(Some("United Kingdom"), Some("Gone"), 0.0, 0.0)));
        assert_eq!(custom.city, CitySelection::Custom);
    }

    #[test]
    fn unknown_country_defaults_to_first_key() {
        let selection = resolver().resolve(Some(&stored(Some("Narnia"), None, 30.0444, 31.2357)));
        assert_eq!(selection.country, "United Kingdom");
        assert_eq!(selection.city, CitySelection::Custom);
    }

    #[test]
    fn missing_country_uses_default_country() {
        let selection = resolver().resolve(Some(&stored(None, None, 51.5, -0.1)));
        assert_eq!(selection.country, DEFAULT_COUNTRY);
        assert_eq!(selection.city, CitySelection::Named("A".into()));
    }

    #[test]
    fn empty_catalog_still_yields_a_selection() {
        let r = LocationResolver::default();
        let selection = r.resolve(Some(&stored(Some("Egypt"), Some("Cairo"), 30.0, 31.0)));
        assert_eq!(selection, LocationSelection { country: "Egypt".into(), city: CitySelection::Custom });
        assert_eq!(r.resolve(None).country, DEFAULT_COUNTRY);
    }

    #[test]
    fn forward_named_city_overwrites_coordinates() {
        let r = resolver();
        let mut location = LocationConfig::new(0.0, 0.0);
        let applied = r.apply_selection(&mut location, "Egypt", &CitySelection::Named("Cairo".into()));
        assert_eq!(applied, CitySelection::Named("Cairo".into()));
        assert_eq!((location.latitude, location.longitude), (30.0444, 31.2357));
        assert_eq!(location.city.as_deref(), Some("Cairo"));
        assert_eq!(location.country.as_deref(), Some("Egypt"));
    }

    #[test]
    fn forward_custom_keeps_manual_coordinates() {
        let r = resolver();
        let mut location = stored(Some("Egypt"), Some("Cairo"), 12.345, 67.891);
        let applied = r.apply_selection(&mut location, "Egypt", &CitySelection::Custom);
        assert_eq!(applied, CitySelection::Custom);
        assert_eq!((location.latitude, location.longitude), (12.345, 67.891));
        assert!(location.is_custom());
    }

    #[test]
    fn default_city_is_first_listed() {
        let r = resolver();
        assert_eq!(r.default_city("Egypt"), CitySelection::Named("Cairo".into()));
        assert_eq!(r.default_city("Atlantis"), CitySelection::Custom);
        assert_eq!(r.coordinates_for("United Kingdom", "Leeds"), Some((53.8008, -1.5491)));
    }
}
