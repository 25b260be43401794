use serde::{Deserialize, Serialize};
use url::Url;

use super::AcquisitionError;

/// Geographic rectangle in decimal degrees, rendered as `box:LAT_MIN,LON_MIN,LAT_MAX,LON_MAX`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        }
    }

    /// Reject inverted or out-of-range corners.
    pub fn validate(&self) -> Result<(), AcquisitionError> {
        let coords = [self.lat_min, self.lon_min, self.lat_max, self.lon_max];
        if coords.iter().any(|value| !value.is_finite()) {
            return Err(AcquisitionError::InvalidQuery(
                "bounding box coordinates must be finite".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.lat_min) || !(-90.0..=90.0).contains(&self.lat_max) {
            return Err(AcquisitionError::InvalidQuery(format!(
                "latitude out of range in box {self}"
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon_min) || !(-180.0..=180.0).contains(&self.lon_max)
        {
            return Err(AcquisitionError::InvalidQuery(format!(
                "longitude out of range in box {self}"
            )));
        }
        if self.lat_min >= self.lat_max {
            return Err(AcquisitionError::InvalidQuery(format!(
                "lat_min must be below lat_max in box {self}"
            )));
        }
        if self.lon_min >= self.lon_max {
            return Err(AcquisitionError::InvalidQuery(format!(
                "lon_min must be below lon_max in box {self}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.lat_min, self.lon_min, self.lat_max, self.lon_max
        )
    }
}

/// Search filters understood by the archive.
///
/// Field names in TOML follow the archive's tag names (`gen`, `cnt`, `box`,
/// `q_gt`, ...). Unset filters are left out of the rendered query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Query {
    /// Free-text species name (English or scientific).
    pub name: Option<String>,
    #[serde(rename = "gen")]
    pub genus: Option<String>,
    #[serde(rename = "ssp")]
    pub subspecies: Option<String>,
    #[serde(rename = "rec")]
    pub recordist: Option<String>,
    #[serde(rename = "cnt")]
    pub country: Option<String>,
    #[serde(rename = "loc")]
    pub location: Option<String>,
    #[serde(rename = "box")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(rename = "type")]
    pub sound_type: Option<String>,
    #[serde(rename = "q")]
    pub quality: Option<String>,
    #[serde(rename = "q_lt")]
    pub quality_below: Option<String>,
    #[serde(rename = "q_gt")]
    pub quality_above: Option<String>,
    #[serde(rename = "len")]
    pub length: Option<String>,
    pub area: Option<String>,
    pub since: Option<String>,
    pub year: Option<String>,
    pub month: Option<String>,
}

impl Query {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_genus(mut self, genus: impl Into<String>) -> Self {
        self.genus = Some(genus.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn with_sound_type(mut self, sound_type: impl Into<String>) -> Self {
        self.sound_type = Some(sound_type.into());
        self
    }

    pub fn with_quality_above(mut self, grade: impl Into<String>) -> Self {
        self.quality_above = Some(grade.into());
        self
    }

    pub fn validate(&self) -> Result<(), AcquisitionError> {
        if let Some(bounding_box) = &self.bounding_box {
            bounding_box.validate()?;
        }
        if self.render_terms().is_empty() {
            return Err(AcquisitionError::InvalidQuery(
                "query has no filters".to_string(),
            ));
        }
        Ok(())
    }

    /// Render the `query` parameter, e.g. `gen:Parus cnt:"united kingdom" q>:C`.
    pub fn render(&self) -> Result<String, AcquisitionError> {
        self.validate()?;
        Ok(self.render_terms().join(" "))
    }

    /// Full request URL for one result page.
    pub fn page_url(
        &self,
        api_url: &str,
        page: u32,
        api_key: Option<&str>,
    ) -> Result<Url, AcquisitionError> {
        let query = self.render()?;
        let page = page.max(1).to_string();
        let mut params = vec![("query", query.as_str()), ("page", page.as_str())];
        if let Some(key) = api_key {
            params.push(("key", key));
        }
        Url::parse_with_params(api_url, &params).map_err(|source| AcquisitionError::Url {
            url: api_url.to_string(),
            source,
        })
    }

    fn render_terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        if let Some(name) = non_empty(&self.name) {
            terms.push(name.to_string());
        }
        push_tag(&mut terms, "gen", &self.genus);
        push_tag(&mut terms, "ssp", &self.subspecies);
        push_tag(&mut terms, "rec", &self.recordist);
        push_tag(&mut terms, "cnt", &self.country);
        push_tag(&mut terms, "loc", &self.location);
        if let Some(bounding_box) = &self.bounding_box {
            terms.push(format!("box:{bounding_box}"));
        }
        push_tag(&mut terms, "type", &self.sound_type);
        push_tag(&mut terms, "q", &self.quality);
        push_tag(&mut terms, "q<", &self.quality_below);
        push_tag(&mut terms, "q>", &self.quality_above);
        push_tag(&mut terms, "len", &self.length);
        push_tag(&mut terms, "area", &self.area);
        push_tag(&mut terms, "since", &self.since);
        push_tag(&mut terms, "year", &self.year);
        push_tag(&mut terms, "month", &self.month);
        terms
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn push_tag(terms: &mut Vec<String>, tag: &str, value: &Option<String>) {
    let Some(value) = non_empty(value) else {
        return;
    };
    if value.contains(char::is_whitespace) {
        terms.push(format!("{tag}:\"{value}\""));
    } else {
        terms.push(format!("{tag}:{value}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_tags_in_fixed_order() {
        let query = Query::default()
            .with_quality_above("C")
            .with_box(BoundingBox::new(41.208, 1.836, 41.566, 2.508))
            .with_genus("Parus");
        assert_eq!(
            query.render().unwrap(),
            "gen:Parus box:41.208,1.836,41.566,2.508 q>:C"
        );
    }

    #[test]
    fn quotes_multi_word_values() {
        let query = Query::default()
            .with_name("Common Eider")
            .with_country("united kingdom")
            .with_sound_type("alarm call");
        assert_eq!(
            query.render().unwrap(),
            "Common Eider cnt:\"united kingdom\" type:\"alarm call\""
        );
    }

    #[test]
    fn empty_query_is_rejected() {
        let query = Query {
            genus: Some("  ".to_string()),
            ..Query::default()
        };
        assert!(matches!(
            query.render(),
            Err(AcquisitionError::InvalidQuery(_))
        ));
    }

    #[test]
    fn inverted_box_is_rejected() {
        let inverted = BoundingBox::new(41.5, 1.8, 41.2, 2.5);
        assert!(inverted.validate().is_err());
        let flat = BoundingBox::new(41.2, 2.5, 41.5, 2.5);
        assert!(flat.validate().is_err());
        let outside = BoundingBox::new(-95.0, 0.0, 10.0, 1.0);
        assert!(outside.validate().is_err());
        assert!(BoundingBox::new(39.369, -0.474, 39.54, -0.311).validate().is_ok());
    }

    #[test]
    fn page_url_encodes_query_and_key() {
        let query = Query::default().with_genus("Tachycineta").with_quality_above("C");
        let url = query
            .page_url("https://example.org/api/2/recordings", 3, Some("secret"))
            .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("query".to_string(), "gen:Tachycineta q>:C".to_string()),
                ("page".to_string(), "3".to_string()),
                ("key".to_string(), "secret".to_string()),
            ]
        );
    }
}
