//! Pure normalization helpers shared by the source clients. No hidden
//! state; safe to call from concurrent enrichment tasks.

use serde_json::Value;

/// Make an image or listing path absolute against a site origin.
/// Scheme-qualified inputs pass through unchanged.
pub fn absolutize(origin: &str, path: &str) -> String {
    if path.is_empty() || path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", origin, path)
    } else {
        format!("{}/{}", origin, path)
    }
}

/// Stringify a JSON scalar; arrays, objects and null become empty.
pub fn value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

pub fn field_string(data: &Value, key: &str) -> String {
    data.get(key).map(value_string).unwrap_or_default()
}

/// Probe several keys in order and return the first non-empty value.
pub fn first_non_empty(data: &Value, keys: &[&str]) -> String {
    for key in keys {
        let value = field_string(data, key);
        if !value.is_empty() {
            return value;
        }
    }
    String::new()
}

/// Boolean coercion for flags the sources encode as "0"/"1", counters or
/// empty strings.
pub fn parse_flag(raw: &str) -> bool {
    !raw.is_empty() && raw != "0" && !raw.eq_ignore_ascii_case("false")
}

pub fn has_geolocation(latitude: &str, longitude: &str) -> bool {
    !latitude.is_empty() && !longitude.is_empty()
}

/// Pick a primary image and the capped list of additional ones. When
/// `primary` is empty the first image is promoted. The primary never
/// reappears among the additionals and duplicates are dropped.
pub fn split_images(primary: &str, images: Vec<String>, cap: usize) -> (String, Vec<String>) {
    let mut rest = images.into_iter().filter(|img| !img.is_empty());
    let primary = if primary.is_empty() {
        rest.next().unwrap_or_default()
    } else {
        primary.to_string()
    };

    let mut additional = Vec::new();
    for image in rest {
        if image != primary && !additional.contains(&image) {
            additional.push(image);
            if additional.len() == cap {
                break;
            }
        }
    }
    (primary, additional)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absolutize_passes_schemed_urls_through() {
        assert_eq!(
            absolutize("https://inmoup.com.ar", "https://cdn.example.com/a.jpg"),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            absolutize("https://inmoup.com.ar", "http://cdn.example.com/a.jpg"),
            "http://cdn.example.com/a.jpg"
        );
    }

    #[test]
    fn absolutize_prefixes_relative_paths() {
        assert_eq!(
            absolutize("https://inmoup.com.ar", "/fotos/a.jpg"),
            "https://inmoup.com.ar/fotos/a.jpg"
        );
        // Missing leading slash gets one.
        assert_eq!(
            absolutize("https://www.mendozaprop.com", "fotos/a.jpg"),
            "https://www.mendozaprop.com/fotos/a.jpg"
        );
        assert_eq!(absolutize("https://inmoup.com.ar", ""), "");
    }

    #[test]
    fn value_string_handles_scalars_only() {
        assert_eq!(value_string(&json!("  abc ")), "abc");
        assert_eq!(value_string(&json!(42)), "42");
        assert_eq!(value_string(&json!(-32.89)), "-32.89");
        assert_eq!(value_string(&json!(true)), "true");
        assert_eq!(value_string(&json!(null)), "");
        assert_eq!(value_string(&json!([1, 2])), "");
        assert_eq!(value_string(&json!({"a": 1})), "");
    }

    #[test]
    fn first_non_empty_respects_key_order() {
        let data = json!({"latitude": "", "google_lat": "-32.9"});
        assert_eq!(first_non_empty(&data, &["latitude", "google_lat"]), "-32.9");
        assert_eq!(first_non_empty(&data, &["missing"]), "");
    }

    #[test]
    fn parse_flag_coerces_source_encodings() {
        assert!(parse_flag("1"));
        assert!(parse_flag("2"));
        assert!(parse_flag("true"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("false"));
    }

    #[test]
    fn geolocation_requires_both_coordinates() {
        assert!(has_geolocation("-32.9", "-68.8"));
        assert!(!has_geolocation("-32.9", ""));
        assert!(!has_geolocation("", "-68.8"));
        assert!(!has_geolocation("", ""));
    }

    #[test]
    fn split_images_promotes_first_when_no_primary() {
        let (primary, additional) = split_images(
            "",
            vec!["a.jpg".to_string(), "b.jpg".to_string(), "c.jpg".to_string()],
            10,
        );
        assert_eq!(primary, "a.jpg");
        assert_eq!(additional, vec!["b.jpg", "c.jpg"]);
    }

    #[test]
    fn split_images_never_duplicates_the_primary() {
        let (primary, additional) = split_images(
            "a.jpg",
            vec!["a.jpg".to_string(), "b.jpg".to_string(), "b.jpg".to_string()],
            10,
        );
        assert_eq!(primary, "a.jpg");
        assert_eq!(additional, vec!["b.jpg"]);
    }

    #[test]
    fn split_images_enforces_the_cap() {
        let images: Vec<String> = (0..30).map(|i| format!("img{}.jpg", i)).collect();
        let (primary, additional) = split_images("", images, 10);
        assert_eq!(primary, "img0.jpg");
        assert_eq!(additional.len(), 10);
    }
}
