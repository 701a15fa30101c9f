/// [crate::properties] contains the records stored in the graph (maps, factors, evidence,
/// the quality-matrix hierarchy, methods and resources) together with their wire shapes.
use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::{
    error::EvidenceMapError,
    identity::{ColumnId, MethodId, ResourceId, RowId},
};

/// Accepts a string, a number or null and yields a string. Years and suitability values
/// arrive from the front end as either.
pub(crate) fn de_stringish<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    })
}

fn de_order<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

/// A tenant container. An empty password means the map is public.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MapRecord {
    pub name: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub password: String,
}

impl MapRecord {
    pub fn is_public(&self) -> bool {
        self.password.is_empty()
    }

    /// Plaintext gate: public maps admit any caller, protected maps an exact match.
    pub fn admits(&self, password: Option<&str>) -> bool {
        self.is_public() || password == Some(self.password.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    #[serde(rename = "mapName", default)]
    pub map_name: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub definition: String,
}

impl FromRow<'_, SqliteRow> for Factor {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Factor {
            name: row.try_get("name")?,
            map_name: row.try_get("map_name")?,
            definition: row.try_get("definition")?,
        })
    }
}

/// Citation metadata supplied when an evidence relationship is first saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceMetadata {
    #[serde(deserialize_with = "de_stringish")]
    pub doi: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub title: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub author: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub year: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub journal: String,
}

/// Properties carried by an EVIDENCE relationship.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(deserialize_with = "de_stringish")]
    pub doi: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub title: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub author: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub year: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub journal: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub level: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub causality: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub notes: String,
}

impl Evidence {
    /// Display label used by the graph view, e.g. `(Maslach, 2001)`.
    pub fn label(&self) -> String {
        format!("({}, {})", self.author, self.year)
    }
}

/// An EVIDENCE relationship addressed by factor names, as exported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvidenceEdge {
    pub source: String,
    pub target: String,
    pub props: Evidence,
}

impl FromRow<'_, SqliteRow> for EvidenceEdge {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(EvidenceEdge {
            source: row.try_get("source")?,
            target: row.try_get("target")?,
            props: Evidence {
                doi: row.try_get("doi")?,
                title: row.try_get("title")?,
                author: row.try_get("author")?,
                year: row.try_get("year")?,
                journal: row.try_get("journal")?,
                level: row.try_get("level")?,
                causality: row.try_get("causality")?,
                notes: row.try_get("notes")?,
            },
        })
    }
}

/// A matrix row: one research-design sub-category placed under `level1` (group) and
/// `level2` (category).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub id: RowId,
    #[serde(default, deserialize_with = "de_stringish")]
    pub name: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub level1: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub level2: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub definition: String,
    #[serde(rename = "catDefinition", default, deserialize_with = "de_stringish")]
    pub cat_definition: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub risks: String,
    #[serde(default, deserialize_with = "de_order")]
    pub order: i64,
}

impl FromRow<'_, SqliteRow> for MatrixRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(MatrixRow {
            id: RowId(row.try_get("id")?),
            name: row.try_get("name")?,
            level1: row.try_get("group_name")?,
            level2: row.try_get("category")?,
            definition: row.try_get("definition")?,
            cat_definition: row.try_get("cat_definition")?,
            risks: row.try_get("risks")?,
            order: row.try_get("ord")?,
        })
    }
}

/// A matrix column: one data-collection technique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixColumn {
    pub id: ColumnId,
    #[serde(default, deserialize_with = "de_stringish")]
    pub name: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub risks: String,
    #[serde(default, deserialize_with = "de_order")]
    pub order: i64,
}

impl FromRow<'_, SqliteRow> for MatrixColumn {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(MatrixColumn {
            id: ColumnId(row.try_get("id")?),
            name: row.try_get("name")?,
            risks: row.try_get("risks")?,
            order: row.try_get("ord")?,
        })
    }
}

/// A research method placed in a cell. `val` is the method's own suitability rating and
/// `resources` is an opaque list kept verbatim for the front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellMethod {
    pub id: MethodId,
    #[serde(default, deserialize_with = "de_stringish")]
    pub name: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub val: String,
    #[serde(default)]
    pub resources: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub methods: Vec<CellMethod>,
    #[serde(default, deserialize_with = "de_stringish")]
    pub suitability: String,
}

/// Wire form of a whole quality matrix. Cells are keyed `"<rowId>_<colId>"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    #[serde(default)]
    pub rows: Vec<MatrixRow>,
    #[serde(default)]
    pub cols: Vec<MatrixColumn>,
    #[serde(default)]
    pub data: BTreeMap<String, Cell>,
}

/// A research method as stored, whether created by a matrix save or on first reference from
/// the resource endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchMethod {
    pub id: MethodId,
    pub name: String,
    pub suitability: String,
    pub resources: Vec<Value>,
    #[serde(rename = "matrixType")]
    pub matrix_type: Option<String>,
}

impl FromRow<'_, SqliteRow> for ResearchMethod {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let resources_str: &str = row.try_get("resources")?;
        let resources = serde_json::from_str::<Vec<Value>>(resources_str).unwrap_or_default();
        Ok(ResearchMethod {
            id: MethodId(row.try_get("id")?),
            name: row.try_get("name")?,
            suitability: row.try_get("suitability")?,
            resources,
            matrix_type: row.try_get("matrix_type")?,
        })
    }
}

#[derive(EnumSetType, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Bibliographic reference (article, book), usually DOI- or ISBN-backed.
    Reference,
    /// Normative standard (ISO, IEEE, ...).
    Standard,
}

pub type ResourceKindSet = EnumSet<ResourceKind>;

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Reference => "reference",
            ResourceKind::Standard => "standard",
        }
    }

    /// Prefix of generated resource ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ResourceKind::Reference => "res",
            ResourceKind::Standard => "std",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = EvidenceMapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reference" => Ok(ResourceKind::Reference),
            "standard" => Ok(ResourceKind::Standard),
            _ => Err(EvidenceMapError::InvalidRequest(format!(
                "Unknown resource type '{s}'"
            ))),
        }
    }
}

/// Fields supplied by the caller when attaching a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDraft {
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default, deserialize_with = "de_stringish")]
    pub title: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub author: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub year: String,
    #[serde(default, deserialize_with = "de_stringish")]
    pub journal: String,
    #[serde(rename = "abstract", default, deserialize_with = "de_stringish")]
    pub abstract_text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(rename = "methodId")]
    pub method_id: MethodId,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub doi: Option<String>,
    pub title: String,
    pub author: String,
    pub year: String,
    pub journal: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub tags: Vec<String>,
    pub attributes: Option<Value>,
}

impl Resource {
    /// Year as a sortable number; "n.d." and other non-numeric years sort last.
    pub fn sort_year(&self) -> i64 {
        self.year
            .trim()
            .get(..4)
            .and_then(|y| y.parse::<i64>().ok())
            .unwrap_or(i64::MIN)
    }

    /// Untagged resources pass every tag filter; tagged ones need one tag in common.
    pub fn matches_tags(&self, wanted: &[String]) -> bool {
        wanted.is_empty() || self.tags.is_empty() || self.tags.iter().any(|t| wanted.contains(t))
    }
}

impl FromRow<'_, SqliteRow> for Resource {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let kind_str: &str = row.try_get("kind")?;
        let tags_str: &str = row.try_get("tags")?;
        let attributes_str: Option<&str> = row.try_get("attributes")?;
        let tags = serde_json::from_str::<Vec<String>>(tags_str)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let attributes = match attributes_str {
            Some(s) => Some(
                serde_json::from_str::<Value>(s).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            ),
            None => None,
        };
        Ok(Resource {
            id: ResourceId(row.try_get("id")?),
            method_id: MethodId(row.try_get("method_id")?),
            kind: ResourceKind::from_str(kind_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            doi: row.try_get("doi")?,
            title: row.try_get("title")?,
            author: row.try_get("author")?,
            year: row.try_get("year")?,
            journal: row.try_get("journal")?,
            abstract_text: row.try_get("abstract")?,
            tags,
            attributes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagAction {
    Add,
    Remove,
}

/// Normalized citation record returned by the DOI and ISBN lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub doi: String,
    pub title: String,
    pub year: String,
    pub author: String,
    pub journal: String,
    #[serde(rename = "abstract", skip_serializing_if = "Option::is_none", default)]
    pub abstract_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_password_gate() {
        let public = MapRecord {
            name: "open".into(),
            password: String::new(),
        };
        assert!(public.admits(None));
        assert!(public.admits(Some("anything")));

        let protected = MapRecord {
            name: "closed".into(),
            password: "p".into(),
        };
        assert!(protected.admits(Some("p")));
        assert!(!protected.admits(Some("wrong")));
        assert!(!protected.admits(None));
    }

    #[test]
    fn test_lenient_numbers() {
        let meta: EvidenceMetadata =
            serde_json::from_str(r#"{"doi":"10.1/x","year":2001,"title":null}"#).unwrap();
        assert_eq!(meta.year, "2001");
        assert_eq!(meta.title, "");

        let row: MatrixRow =
            serde_json::from_str(r#"{"id":"r1","name":"Case study","order":"3"}"#).unwrap();
        assert_eq!(row.order, 3);
        let row: MatrixRow = serde_json::from_str(r#"{"id":"r1","order":null}"#).unwrap();
        assert_eq!(row.order, 0);
    }

    #[test]
    fn test_matrix_records_default() {
        let row = MatrixRow {
            id: "r1".into(),
            level1: "Exploratory".into(),
            ..Default::default()
        };
        assert_eq!(row.order, 0);
        assert!(row.cat_definition.is_empty());
        assert_eq!(MatrixColumn::default().id, ColumnId::default());
        assert_eq!(CellMethod::default().id.as_str(), "");
        let method = ResearchMethod {
            id: "m1".into(),
            ..Default::default()
        };
        assert!(method.resources.is_empty() && method.matrix_type.is_none());
    }

    #[test]
    fn test_resource_tag_filter() {
        let mut resource = Resource {
            id: ResourceId("res-1".into()),
            method_id: MethodId("m1".into()),
            kind: ResourceKind::Reference,
            doi: None,
            title: "t".into(),
            author: "a".into(),
            year: "2020".into(),
            journal: String::new(),
            abstract_text: String::new(),
            tags: vec![],
            attributes: None,
        };
        assert!(resource.matches_tags(&["x".to_string()]));
        resource.tags = vec!["y".into()];
        assert!(!resource.matches_tags(&["x".to_string()]));
        assert!(resource.matches_tags(&["x".to_string(), "y".to_string()]));
        assert!(resource.matches_tags(&[]));
    }

    #[test]
    fn test_sort_year() {
        let mut resource = Resource {
            id: ResourceId("res-1".into()),
            method_id: MethodId("m1".into()),
            kind: ResourceKind::Standard,
            doi: None,
            title: String::new(),
            author: String::new(),
            year: "2019-05".into(),
            journal: String::new(),
            abstract_text: String::new(),
            tags: vec![],
            attributes: None,
        };
        assert_eq!(resource.sort_year(), 2019);
        resource.year = "n.d.".into();
        assert_eq!(resource.sort_year(), i64::MIN);
    }

    #[test]
    fn test_resource_kind_round_trip_names() {
        assert_eq!("Standard".parse::<ResourceKind>().unwrap(), ResourceKind::Standard);
        assert_eq!(ResourceKind::Reference.to_string(), "reference");
        assert!("book".parse::<ResourceKind>().is_err());
        let set: ResourceKindSet = [ResourceKind::Reference].into_iter().collect();
        assert!(set.contains(ResourceKind::Reference));
        assert!(!set.contains(ResourceKind::Standard));
    }
}
