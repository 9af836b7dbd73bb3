//! Record flattening.
//!
//! Turns nested bibliographic documents into flat key/value rows for CSV
//! output and the dashboard. Two document shapes are handled:
//!
//! - [`flatten`]: an `abstracts-retrieval-response` document (coredata,
//!   author groups, funding list, author keywords, links)
//! - [`flatten_work`]: an OpenAlex work ([`PaperRecord`])
//!
//! Neither function fails. Absent or oddly-shaped nested blocks resolve to an
//! empty string or [`NOT_AVAILABLE`].

use crate::record::PaperRecord;
use serde_json::{Map, Value};

/// A flat row: every value is a JSON scalar.
pub type FlatRecord = Map<String, Value>;

/// Placeholder for missing single-valued fields
pub const NOT_AVAILABLE: &str = "N/A";

const RESPONSE_KEY: &str = "abstracts-retrieval-response";

pub const CREATOR_GIVEN_NAME: &str = "creator_given_name";
pub const CREATOR_SURNAME: &str = "creator_surname";
pub const CREATOR_AUID: &str = "creator_auid";
pub const LINK_SELF: &str = "link_self";
pub const LINK_SCOPUS: &str = "link_scopus";
pub const COUNTRIES: &str = "Countries";
pub const ORGANIZATIONS: &str = "Organizations";
pub const FUNDING_AGENCIES: &str = "Funding Agencies";
pub const AUTH_KEYWORDS: &str = "auth-keywords";

/// Coerce a block that may be a single object or a list into a list.
///
/// Anything else (missing, null, scalar) becomes an empty list.
pub fn ensure_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(obj @ Value::Object(_)) => vec![obj],
        _ => Vec::new(),
    }
}

/// Text content of a scalar or a `{"$": ...}` node.
fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(map) => return map.get("$").and_then(text_of),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Comma-join non-empty values with no trailing comma.
fn join<I>(values: I) -> String
where
    I: IntoIterator<Item = String>,
{
    values
        .into_iter()
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// Collapse any JSON value into a scalar.
///
/// Lists become a comma-joined string of their elements' text, `{"$": ...}`
/// nodes become their text, other objects become compact JSON.
pub fn flatten_value(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::String(join(items.iter().map(|item| match flatten_value(item) {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        }))),
        Value::Object(map) => match map.get("$") {
            Some(inner) => flatten_value(inner),
            None => Value::String(value.to_string()),
        },
        scalar => scalar.clone(),
    }
}

/// Countries and organization names across an author-group block.
pub fn extract_author_affiliations(author_group: Option<&Value>) -> (String, String) {
    let mut countries = Vec::new();
    let mut organizations = Vec::new();

    for group in ensure_list(author_group) {
        for affiliation in ensure_list(group.get("affiliation")) {
            if let Some(country) = affiliation.get("country").and_then(text_of) {
                countries.push(country);
            }
            for org in ensure_list(affiliation.get("organization")) {
                if let Some(name) = text_of(org) {
                    organizations.push(name);
                }
            }
        }
    }

    (join(countries), join(organizations))
}

/// Matched agency names across a funding block.
pub fn extract_funding_agencies(funding: Option<&Value>) -> String {
    join(
        ensure_list(funding)
            .into_iter()
            .filter_map(|entry| entry.get("xocs:funding-agency-matched-string").and_then(text_of)),
    )
}

/// Author keyword terms from an `authkeywords` block.
pub fn extract_keywords(auth_keywords: Option<&Value>) -> String {
    let keywords = auth_keywords.and_then(|k| k.get("author-keyword"));
    join(ensure_list(keywords).into_iter().filter_map(text_of))
}

/// `@href` of the first link whose `@rel` equals `rel`.
pub fn link_href(links: Option<&Value>, rel: &str) -> Option<String> {
    ensure_list(links)
        .into_iter()
        .find(|link| link.get("@rel").and_then(Value::as_str) == Some(rel))
        .and_then(|link| link.get("@href"))
        .and_then(text_of)
}

fn path<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |node, key| node.get(*key))
}

/// Flatten an `abstracts-retrieval-response` document.
///
/// A document without the response wrapper is treated as an already-flat
/// row: its scalar fields pass through unchanged and derived fields it
/// already carries are kept.
pub fn flatten(document: &Value) -> FlatRecord {
    let response = document.get(RESPONSE_KEY);
    let coredata = match response {
        Some(response) => response.get("coredata"),
        None => Some(document),
    };

    let mut flat = FlatRecord::new();
    if let Some(Value::Object(core)) = coredata {
        for (key, value) in core {
            if key == "dc:creator" || key == "link" {
                continue;
            }
            flat.insert(key.clone(), flatten_value(value));
        }
    }

    match coredata.and_then(|c| c.get("dc:creator")) {
        Some(creator) => {
            let authors = ensure_list(creator.get("author"));
            let first = authors.first().copied();
            let field = |key: &str| {
                first
                    .and_then(|a| a.get(key))
                    .and_then(text_of)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string())
            };
            flat.insert(CREATOR_GIVEN_NAME.into(), Value::String(field("ce:given-name")));
            flat.insert(CREATOR_SURNAME.into(), Value::String(field("ce:surname")));
            flat.insert(CREATOR_AUID.into(), Value::String(field("@auid")));
        }
        None => {
            for key in [CREATOR_GIVEN_NAME, CREATOR_SURNAME, CREATOR_AUID] {
                keep_or(&mut flat, key, NOT_AVAILABLE);
            }
        }
    }

    match coredata.and_then(|c| c.get("link")) {
        Some(links) => {
            for (key, rel) in [(LINK_SELF, "self"), (LINK_SCOPUS, "scopus")] {
                let href = link_href(Some(links), rel).unwrap_or_else(|| NOT_AVAILABLE.to_string());
                flat.insert(key.into(), Value::String(href));
            }
        }
        None => {
            keep_or(&mut flat, LINK_SELF, NOT_AVAILABLE);
            keep_or(&mut flat, LINK_SCOPUS, NOT_AVAILABLE);
        }
    }

    match response {
        Some(response) => {
            let author_group = path(response, &["item", "bibrecord", "head", "author-group"]);
            let funding = path(response, &["item", "xocs:meta", "xocs:funding-list", "xocs:funding"]);
            let (countries, organizations) = extract_author_affiliations(author_group);

            flat.insert(COUNTRIES.into(), Value::String(countries));
            flat.insert(ORGANIZATIONS.into(), Value::String(organizations));
            flat.insert(FUNDING_AGENCIES.into(), Value::String(extract_funding_agencies(funding)));
            flat.insert(AUTH_KEYWORDS.into(), Value::String(extract_keywords(response.get("authkeywords"))));
        }
        None => {
            for key in [COUNTRIES, ORGANIZATIONS, FUNDING_AGENCIES, AUTH_KEYWORDS] {
                keep_or(&mut flat, key, "");
            }
        }
    }

    flat
}

fn keep_or(flat: &mut FlatRecord, key: &str, default: &str) {
    flat.entry(key.to_string())
        .or_insert_with(|| Value::String(default.to_string()));
}

/// Flatten an OpenAlex work into a CSV row.
pub fn flatten_work(work: &PaperRecord) -> FlatRecord {
    let mut flat = FlatRecord::new();
    let text = |value: Option<&String>| Value::String(value.cloned().unwrap_or_default());
    let number = |value: Option<Value>| value.unwrap_or(Value::Null);

    let source = work.source();
    let authorships = work.authorships();

    flat.insert("id".into(), text(work.id.as_ref()));
    flat.insert("title".into(), text(work.title.as_ref()));
    flat.insert("publication_year".into(), number(work.publication_year.map(Value::from)));
    flat.insert("publication_date".into(), text(work.publication_date.as_ref()));
    flat.insert("language".into(), text(work.language.as_ref()));
    flat.insert("type".into(), text(work.work_type.as_ref()));
    flat.insert("type_crossref".into(), text(work.type_crossref.as_ref()));
    flat.insert("cited_by_count".into(), number(work.cited_by_count.map(Value::from)));
    flat.insert("fwci".into(), number(work.fwci.map(Value::from)));
    flat.insert(
        "source".into(),
        Value::String(
            source
                .and_then(|s| s.display_name.clone())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        ),
    );
    flat.insert("issn".into(), Value::String(work.serial_numbers().map(|s| s.join(",")).unwrap_or_default()));
    flat.insert("issn_l".into(), text(source.and_then(|s| s.issn_l.as_ref())));
    flat.insert(
        "authors".into(),
        Value::String(join(authorships.iter().filter_map(|a| a.author_name().map(str::to_string)))),
    );
    flat.insert(
        "countries".into(),
        Value::String(join(authorships.iter().flat_map(|a| a.countries().iter().cloned()))),
    );
    flat.insert(
        "institutions".into(),
        Value::String(join(
            authorships
                .iter()
                .flat_map(|a| a.institutions())
                .filter_map(|i| i.display_name.clone()),
        )),
    );
    flat.insert(
        "funders".into(),
        Value::String(join(work.grants().iter().filter_map(|g| g.funder_display_name.clone()))),
    );
    flat.insert(
        "primary_topic".into(),
        text(work.primary_topic.as_ref().and_then(|t| t.display_name.as_ref())),
    );
    flat.insert(
        "topics".into(),
        Value::String(join(work.topics().iter().filter_map(|t| t.display_name.clone()))),
    );
    flat.insert(
        "concepts".into(),
        Value::String(join(work.concepts().iter().filter_map(|c| c.display_name.clone()))),
    );
    flat.insert(
        "referenced_works".into(),
        Value::String(work.referenced_works.as_deref().map(|r| r.join(",")).unwrap_or_default()),
    );
    flat.insert("locations_count".into(), number(work.locations_count.map(Value::from)));
    flat.insert(
        "apc_list_usd".into(),
        number(work.apc_list.as_ref().and_then(|a| a.value_usd).map(Value::from)),
    );
    flat.insert(
        "apc_paid_usd".into(),
        number(work.apc_paid.as_ref().and_then(|a| a.value_usd).map(Value::from)),
    );
    flat.insert(
        "abstract".into(),
        Value::String(work.abstract_inverted_index.as_ref().map(reconstruct_abstract).unwrap_or_default()),
    );

    flat
}

/// Reconstruct abstract text from an inverted index (`word -> [positions]`).
pub fn reconstruct_abstract(inverted_index: &Value) -> String {
    let Some(obj) = inverted_index.as_object() else {
        return String::new();
    };

    let mut words: Vec<(i64, &str)> = Vec::new();
    for (word, positions) in obj {
        if let Some(pos_array) = positions.as_array() {
            for pos in pos_array {
                if let Some(p) = pos.as_i64() {
                    words.push((p, word.as_str()));
                }
            }
        }
    }

    words.sort_by_key(|(pos, _)| *pos);
    words.iter().map(|(_, w)| *w).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scopus_document() -> Value {
        json!({
            "abstracts-retrieval-response": {
                "coredata": {
                    "dc:title": "Deep learning for crops",
                    "citedby-count": "12",
                    "prism:isbn": [{"@length": "13", "$": "9781234567897"}],
                    "dc:creator": {"author": [{"ce:given-name": "Ada", "ce:surname": "Lovelace", "@auid": "42"}]},
                    "link": [
                        {"@rel": "self", "@href": "https://api.example/self"},
                        {"@rel": "scopus", "@href": "https://www.example/record"}
                    ]
                },
                "item": {
                    "bibrecord": {"head": {"author-group": [
                        {"affiliation": {"country": "Thailand", "organization": [{"$": "Faculty of Engineering"}, {"$": "Chulalongkorn University"}]}},
                        {"affiliation": {"country": "Japan", "organization": {"$": "Kyoto University"}}},
                        {"affiliation": {"organization": {"$": "Unknown Lab"}}}
                    ]}},
                    "xocs:meta": {"xocs:funding-list": {"xocs:funding": [
                        {"xocs:funding-agency-matched-string": "NSF"},
                        {"xocs:funding-agency-acronym": "X"},
                        {"xocs:funding-agency-matched-string": "JSPS"}
                    ]}}
                },
                "authkeywords": {"author-keyword": [{"$": "deep learning"}, {"$": "agriculture"}]}
            }
        })
    }

    #[test]
    fn test_ensure_list_shapes() {
        let obj = json!({"a": 1});
        let arr = json!([1, 2]);
        assert_eq!(ensure_list(Some(&obj)).len(), 1);
        assert_eq!(ensure_list(Some(&arr)).len(), 2);
        assert!(ensure_list(Some(&json!("x"))).is_empty());
        assert!(ensure_list(None).is_empty());
    }

    #[test]
    fn test_countries_skip_missing_without_trailing_comma() {
        let group = json!([
            {"affiliation": {"country": "Thailand"}},
            {"affiliation": {"country": "Japan"}},
            {"affiliation": {"organization": {"$": "Somewhere"}}}
        ]);
        let (countries, organizations) = extract_author_affiliations(Some(&group));
        assert_eq!(countries, "Thailand,Japan");
        assert_eq!(organizations, "Somewhere");
    }

    #[test]
    fn test_single_object_author_group() {
        let group = json!({"affiliation": {"country": "Chile", "organization": [{"$": "A"}, {"$": "B"}]}});
        let (countries, organizations) = extract_author_affiliations(Some(&group));
        assert_eq!(countries, "Chile");
        assert_eq!(organizations, "A,B");
    }

    #[test]
    fn test_link_selection() {
        let links = json!([{"@rel": "self", "@href": "A"}, {"@rel": "scopus", "@href": "B"}]);
        let flat = flatten(&json!({"abstracts-retrieval-response": {"coredata": {"link": links}}}));
        assert_eq!(flat[LINK_SELF], json!("A"));
        assert_eq!(flat[LINK_SCOPUS], json!("B"));

        let empty = flatten(&json!({"abstracts-retrieval-response": {"coredata": {"link": []}}}));
        assert_eq!(empty[LINK_SELF], json!(NOT_AVAILABLE));
        assert_eq!(empty[LINK_SCOPUS], json!(NOT_AVAILABLE));
    }

    #[test]
    fn test_flatten_full_document() {
        let flat = flatten(&scopus_document());

        assert_eq!(flat["dc:title"], json!("Deep learning for crops"));
        assert_eq!(flat["prism:isbn"], json!("9781234567897"));
        assert_eq!(flat[CREATOR_GIVEN_NAME], json!("Ada"));
        assert_eq!(flat[CREATOR_SURNAME], json!("Lovelace"));
        assert_eq!(flat[CREATOR_AUID], json!("42"));
        assert_eq!(flat[LINK_SELF], json!("https://api.example/self"));
        assert_eq!(flat[COUNTRIES], json!("Thailand,Japan"));
        assert_eq!(
            flat[ORGANIZATIONS],
            json!("Faculty of Engineering,Chulalongkorn University,Kyoto University,Unknown Lab")
        );
        assert_eq!(flat[FUNDING_AGENCIES], json!("NSF,JSPS"));
        assert_eq!(flat[AUTH_KEYWORDS], json!("deep learning,agriculture"));
        assert!(!flat.contains_key("dc:creator"));
        assert!(!flat.contains_key("link"));
        assert!(flat.values().all(|v| !v.is_array() && !v.is_object()));
    }

    #[test]
    fn test_missing_blocks_resolve_to_placeholders() {
        let flat = flatten(&json!({"abstracts-retrieval-response": {"coredata": {"dc:title": "T"}}}));
        assert_eq!(flat[CREATOR_GIVEN_NAME], json!(NOT_AVAILABLE));
        assert_eq!(flat[LINK_SCOPUS], json!(NOT_AVAILABLE));
        assert_eq!(flat[COUNTRIES], json!(""));
        assert_eq!(flat[FUNDING_AGENCIES], json!(""));
        assert_eq!(flat[AUTH_KEYWORDS], json!(""));

        let odd = flatten(&json!({"abstracts-retrieval-response": {"coredata": null, "item": 5}}));
        assert_eq!(odd[CREATOR_AUID], json!(NOT_AVAILABLE));
        assert_eq!(odd[ORGANIZATIONS], json!(""));
    }

    #[test]
    fn test_flatten_is_idempotent_on_its_output() {
        let once = flatten(&scopus_document());
        let twice = flatten(&Value::Object(once.clone()));
        for (key, value) in &once {
            assert_eq!(twice.get(key), Some(value), "field {} changed", key);
        }
    }

    #[test]
    fn test_flatten_work() -> serde_json::Result<()> {
        let work: PaperRecord = serde_json::from_value(json!({
            "id": "https://openalex.org/W1",
            "title": "Paper",
            "publication_year": 2024,
            "cited_by_count": 7,
            "primary_location": {"source": {"display_name": "Journal", "issn": ["1234-5678", "9999-0000"], "issn_l": "1234-5678"}},
            "authorships": [
                {"author": {"display_name": "A One"}, "countries": ["TH"], "institutions": [{"display_name": "CU"}]},
                {"author": {"display_name": "B Two"}, "countries": [], "institutions": []}
            ],
            "grants": [{"funder_display_name": "NSF"}],
            "abstract_inverted_index": {"world": [1], "Hello": [0]},
            "apc_list": {"value": 100, "currency": "EUR", "value_usd": 110}
        }))?;
        let flat = flatten_work(&work);

        assert_eq!(flat["issn"], json!("1234-5678,9999-0000"));
        assert_eq!(flat["source"], json!("Journal"));
        assert_eq!(flat["authors"], json!("A One,B Two"));
        assert_eq!(flat["countries"], json!("TH"));
        assert_eq!(flat["institutions"], json!("CU"));
        assert_eq!(flat["funders"], json!("NSF"));
        assert_eq!(flat["abstract"], json!("Hello world"));
        assert_eq!(flat["apc_list_usd"], json!(110.0));
        assert_eq!(flat["apc_paid_usd"], Value::Null);
        assert_eq!(flat["fwci"], Value::Null);
        Ok(())
    }

    #[test]
    fn test_flatten_work_without_source() {
        let flat = flatten_work(&PaperRecord::default());
        assert_eq!(flat["source"], json!(NOT_AVAILABLE));
        assert_eq!(flat["issn"], json!(""));
        assert_eq!(flat["abstract"], json!(""));
    }

    #[test]
    fn test_reconstruct_abstract() {
        let index = json!({"is": [1], "This": [0], "test": [3], "a": [2]});
        assert_eq!(reconstruct_abstract(&index), "This is a test");
        assert_eq!(reconstruct_abstract(&json!(null)), "");
    }
}
