//! Paper record model for OpenAlex works.
//!
//! Every field is optional: the API omits or nulls fields freely, and a record
//! must survive decoding regardless. Nested blocks keep unknown keys in an
//! `extra` map so the stored document carries everything the API returned.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Columns kept when a record is written to the document store.
pub const PERSISTED_COLUMNS: &[&str] = &[
    "id",
    "title",
    "fwci",
    "cited_by_count",
    "type",
    "type_crossref",
    "topics",
    "locations",
    "locations_count",
    "primary_location",
    "primary_topic",
    "concepts",
    "relevance_score",
    "publication_date",
    "authorships",
    "publication_year",
    "language",
    "abstract_inverted_index",
    "referenced_works",
    "grants",
    "apc_list",
    "apc_paid",
];

/// A single bibliographic work as returned by the works endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaperRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub fwci: Option<f64>,
    pub cited_by_count: Option<i64>,
    #[serde(rename = "type")]
    pub work_type: Option<String>,
    pub type_crossref: Option<String>,
    pub topics: Option<Vec<Tag>>,
    pub primary_topic: Option<Tag>,
    pub concepts: Option<Vec<Tag>>,
    pub locations: Option<Vec<Location>>,
    pub locations_count: Option<i64>,
    pub primary_location: Option<Location>,
    pub relevance_score: Option<f64>,
    pub publication_date: Option<String>,
    pub publication_year: Option<i32>,
    pub language: Option<String>,
    pub authorships: Option<Vec<Authorship>>,
    pub abstract_inverted_index: Option<Value>,
    pub referenced_works: Option<Vec<String>>,
    pub grants: Option<Vec<Grant>>,
    pub apc_list: Option<Apc>,
    pub apc_paid: Option<Apc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Topic, concept or keyword tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub score: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Where a work is hosted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub is_oa: Option<bool>,
    pub landing_page_url: Option<String>,
    pub pdf_url: Option<String>,
    pub source: Option<Source>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Journal or repository a location belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub issn_l: Option<String>,
    pub issn: Option<Vec<String>>,
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Authorship {
    pub author_position: Option<String>,
    pub author: Option<AuthorRef>,
    pub institutions: Option<Vec<Institution>>,
    pub countries: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorRef {
    pub id: Option<String>,
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Institution {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub country_code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Funding entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Grant {
    pub funder: Option<String>,
    pub funder_display_name: Option<String>,
    pub award_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Article processing charge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Apc {
    pub value: Option<f64>,
    pub currency: Option<String>,
    pub value_usd: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PaperRecord {
    /// Serial numbers (ISSNs) of the primary source.
    ///
    /// `None` when the location, source or ISSN list is absent; the caller
    /// cannot tell whether such a record is a duplicate.
    pub fn serial_numbers(&self) -> Option<&[String]> {
        self.primary_location
            .as_ref()?
            .source
            .as_ref()?
            .issn
            .as_deref()
    }

    pub fn source(&self) -> Option<&Source> {
        self.primary_location.as_ref()?.source.as_ref()
    }

    pub fn authorships(&self) -> &[Authorship] {
        self.authorships.as_deref().unwrap_or_default()
    }

    pub fn grants(&self) -> &[Grant] {
        self.grants.as_deref().unwrap_or_default()
    }

    pub fn topics(&self) -> &[Tag] {
        self.topics.as_deref().unwrap_or_default()
    }

    pub fn concepts(&self) -> &[Tag] {
        self.concepts.as_deref().unwrap_or_default()
    }

    /// Project the record onto [`PERSISTED_COLUMNS`]; absent columns become `null`.
    pub fn to_document(&self) -> serde_json::Result<Map<String, Value>> {
        let mut full = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(PERSISTED_COLUMNS
            .iter()
            .map(|column| (column.to_string(), full.remove(*column).unwrap_or(Value::Null)))
            .collect())
    }
}

impl Authorship {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref()?.display_name.as_deref()
    }

    pub fn institutions(&self) -> &[Institution] {
        self.institutions.as_deref().unwrap_or_default()
    }

    pub fn countries(&self) -> &[String] {
        self.countries.as_deref().unwrap_or_default()
    }
}
