/// [crate::identity] holds the composite-key conventions that scope graph nodes either to a
/// tenant map or to the shared classification hierarchy.
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};
use uuid::Uuid;

use crate::error::EvidenceMapError;

/// Name of the singleton root node that owns every map.
pub const ROOT_NAME: &str = "Maps";

/// Paradigm loaded when a matrix request does not name one.
pub const DEFAULT_PARADIGM: &str = "qualitative";

/// Identity of a Factor. Names are only unique within a map.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FactorKey {
    pub map_name: String,
    pub name: String,
}

impl FactorKey {
    pub fn new(map_name: impl Into<String>, name: impl Into<String>) -> Self {
        FactorKey {
            map_name: map_name.into(),
            name: name.into(),
        }
    }
}

impl Display for FactorKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}::{}", self.map_name, self.name)
    }
}

/// Identity of an Evidence relationship: the ordered factor pair plus the DOI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvidenceKey {
    pub map_name: String,
    pub source: String,
    pub target: String,
    pub doi: String,
}

impl Display for EvidenceKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}::{} -[{}]-> {}",
            self.map_name, self.source, self.doi, self.target
        )
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }
    };
}

opaque_id!(
    /// Client-assigned id of a matrix row (research design sub-category).
    RowId
);
opaque_id!(
    /// Client-assigned id of a matrix column (data collection technique).
    ColumnId
);
opaque_id!(
    /// Client-assigned id of a research method.
    MethodId
);
opaque_id!(
    /// Server-generated id of a resource attached to a method.
    ResourceId
);

impl ResourceId {
    /// Generate a fresh id with the given kind prefix (`res`, `std`). Random v4 tokens, so
    /// concurrent calls within one millisecond cannot collide.
    pub fn generate(prefix: &str) -> Self {
        ResourceId(format!("{}-{}", prefix, Uuid::new_v4().simple()))
    }
}

/// Composite key of a matrix cell. The `"<rowId>_<colId>"` string only exists on the wire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub row: RowId,
    pub column: ColumnId,
}

impl CellKey {
    pub fn new(row: impl Into<RowId>, column: impl Into<ColumnId>) -> Self {
        CellKey {
            row: row.into(),
            column: column.into(),
        }
    }

    /// Split a wire key against the known row and column ids. Ids may themselves contain
    /// underscores, so every split point is tried and the one naming a known row and a known
    /// column wins.
    pub fn resolve(
        wire: &str,
        rows: &BTreeSet<RowId>,
        columns: &BTreeSet<ColumnId>,
    ) -> Result<CellKey, EvidenceMapError> {
        let resolved = wire
            .match_indices('_')
            .map(|(idx, _)| (&wire[..idx], &wire[idx + 1..]))
            .find(|(row, col)| {
                rows.contains(&RowId::from(*row)) && columns.contains(&ColumnId::from(*col))
            });
        match resolved {
            Some((row, col)) => Ok(CellKey::new(row, col)),
            None => Err(EvidenceMapError::InvalidRequest(format!(
                "cell key '{wire}' does not name a submitted row and column"
            ))),
        }
    }

    pub fn to_wire(&self) -> String {
        format!("{}_{}", self.row, self.column)
    }
}

impl Display for CellKey {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(&self.to_wire())
    }
}
