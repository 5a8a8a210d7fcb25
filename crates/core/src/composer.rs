use crate::types::{non_blank, LocationRecord};

/// Separator placed between address components.
pub const ADDRESS_SEPARATOR: &str = ", ";

/// Builds the display address for a location.
///
/// Components are visited as `formattedAddress`, `line1`, `city`, `state`,
/// `postalCode`, `country`; blank components are dropped and the rest are
/// joined with [`ADDRESS_SEPARATOR`]. Returns `None` rather than an empty
/// string when nothing qualifies.
pub fn compose(location: Option<&LocationRecord>) -> Option<String> {
    let parts: Vec<&str> = location?
        .address_components()
        .into_iter()
        .filter_map(non_blank)
        .collect();

    if parts.is_empty() {
        return None;
    }

    Some(parts.join(ADDRESS_SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kota() -> LocationRecord {
        LocationRecord {
            formatted_address: Some("Mahaveer Nagar III Cir".into()),
            line1: Some("Mahaveer Nagar III Circle".into()),
            city: Some("Kota".into()),
            state: Some("Rajasthan".into()),
            country: Some("India".into()),
            postal_code: Some("324005".into()),
            ..LocationRecord::default()
        }
    }

    #[test]
    fn absent_location_composes_to_none() {
        assert_eq!(compose(None), None);
    }

    #[test]
    fn location_without_components_composes_to_none() {
        let location = LocationRecord {
            latitude: Some(25.1),
            longitude: Some(75.8),
            name: Some("Main gate".into()),
            ..LocationRecord::default()
        };
        assert_eq!(compose(Some(&location)), None);
        assert_eq!(compose(Some(&LocationRecord::default())), None);
    }

    #[test]
    fn full_location_follows_display_order() {
        assert_eq!(
            compose(Some(&kota())).as_deref(),
            Some("Mahaveer Nagar III Cir, Mahaveer Nagar III Circle, Kota, Rajasthan, 324005, India")
        );
    }

    #[test]
    fn order_does_not_depend_on_document_field_order() {
        let location: LocationRecord = serde_json::from_value(json!({
            "country": "India",
            "postalCode": "324005",
            "state": "Rajasthan",
            "city": "Kota",
            "line1": "Mahaveer Nagar III Circle",
            "formattedAddress": "Mahaveer Nagar III Cir"
        }))
        .expect("decode location");
        assert_eq!(compose(Some(&location)), compose(Some(&kota())));
    }

    #[test]
    fn blank_components_are_skipped_and_values_trimmed() {
        let location = LocationRecord {
            formatted_address: Some("".into()),
            line1: Some("  12 Station Road ".into()),
            city: Some("\t".into()),
            country: Some("India".into()),
            ..LocationRecord::default()
        };
        assert_eq!(
            compose(Some(&location)).as_deref(),
            Some("12 Station Road, India")
        );
    }

    #[test]
    fn compose_is_stable_across_calls() {
        let location = kota();
        let first = compose(Some(&location));
        let second = compose(Some(&location));
        assert_eq!(first, second);
    }
}
