//! Static column projections

use super::engine::SegmentError;
use std::collections::HashSet;

/// A named, ordered projection of master columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSchema {
    name: String,
    file_name: String,
    columns: Vec<String>,
}

impl SegmentSchema {
    /// Build a schema. Column names must be non-empty and unique within the schema.
    pub fn new(
        name: impl Into<String>,
        file_name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, SegmentError> {
        let name = name.into();
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(SegmentError::InvalidSchema {
                schema: name,
                reason: "no columns declared".to_string(),
            });
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(SegmentError::InvalidSchema {
                    schema: name.clone(),
                    reason: format!("column '{}' declared twice", column),
                });
            }
        }
        Ok(Self {
            name,
            file_name: file_name.into(),
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File name of the extract written under the workspace.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Declared columns, in declared order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Columns that are absent from `header`.
    pub fn missing_from(&self, header: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !header.contains(c))
            .cloned()
            .collect()
    }
}

/// The declared set of schemas for a run. Schema names and file names are unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSet {
    schemas: Vec<SegmentSchema>,
}

impl SchemaSet {
    pub fn new(schemas: Vec<SegmentSchema>) -> Result<Self, SegmentError> {
        let mut names = HashSet::new();
        let mut files = HashSet::new();
        for schema in &schemas {
            if !names.insert(schema.name()) {
                return Err(SegmentError::InvalidSchema {
                    schema: schema.name().to_string(),
                    reason: "schema name declared twice".to_string(),
                });
            }
            if !files.insert(schema.file_name()) {
                return Err(SegmentError::InvalidSchema {
                    schema: schema.name().to_string(),
                    reason: format!("extract file '{}' already used", schema.file_name()),
                });
            }
        }
        Ok(Self { schemas })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentSchema> {
        self.schemas.iter()
    }

    pub fn get(&self, name: &str) -> Option<&SegmentSchema> {
        self.schemas.iter().find(|s| s.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.schemas.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// The five topic schemas of a land listing evaluation.
    ///
    /// Affordability columns are part of `Socio-economic`; there is no
    /// separate affordability extract.
    pub fn builtin() -> Self {
        let schemas = vec![
            schema(PROPERTY, "property.csv", &["Property Address", "City", "State", "Zip"]),
            schema(
                ENVIRONMENTAL,
                "environmental.csv",
                &["In SFHA", "Fema Flood Zone", "FEMA Map Date", "Floodplain Area"],
            ),
            schema(
                GROWTH_TRENDS,
                "growthTrends.csv",
                &[
                    "% Pop Grwth 2020-2024(5m)",
                    "% Pop Grwth 2024-2029(5m)",
                    "% Pop Grwth 2020-2024(10m)",
                    "% Pop Grwth 2024-2029(10m)",
                    "% HU Grwth 2020-2024(5m)",
                    "% HU Grwth 2020-2024(10m)",
                ],
            ),
            schema(OCCUPANCY, "housingUnitsAndOccupancy.csv", &occupancy_columns()),
            schema(SOCIO_ECONOMIC, "demographics.csv", &socio_economic_columns()),
        ];
        Self { schemas }
    }
}

pub(crate) const PROPERTY: &str = "Property";
pub(crate) const ENVIRONMENTAL: &str = "Environmental";
pub(crate) const GROWTH_TRENDS: &str = "Growth Trends";
pub(crate) const OCCUPANCY: &str = "Occupancy";
pub(crate) const SOCIO_ECONOMIC: &str = "Socio-economic";

fn schema<S: AsRef<str>>(name: &str, file: &str, columns: &[S]) -> SegmentSchema {
    SegmentSchema {
        name: name.to_string(),
        file_name: file.to_string(),
        columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
    }
}

/// Expand radius-suffixed column stems, 5 mile block first then 10 mile.
fn by_radius(stems: &[&str]) -> Vec<String> {
    ["5", "10"]
        .iter()
        .flat_map(|radius| stems.iter().map(move |stem| format!("{}_{}", stem, radius)))
        .collect()
}

fn occupancy_columns() -> Vec<String> {
    by_radius(&[
        "TotHUs",
        "OccHUs",
        "OwnerOcc",
        "RenterOcc",
        "AvgOwnerHHSize",
        "AvgRenterHHSize",
        "VacHUs",
        "VacantForSale",
        "VacantForRent",
        "VacantSeasonal",
        "MobileHomes",
        "MobileHomesPerK",
    ])
}

fn socio_economic_columns() -> Vec<String> {
    let demographics = by_radius(&[
        "TotPop",
        "Age0_4",
        "Age5_9",
        "Age10_14",
        "Age15_19",
        "Age20_24",
        "Age25_34",
        "Age35_44",
        "Age45_54",
        "Age55_59",
        "Age60_64",
        "Age65_74",
        "Age75_84",
        "Over85",
        "TotHHs",
        "MedianHHInc",
        "AvgHHInc",
        "InKindergarten",
        "InElementary",
        "InHighSchool",
        "InCollege",
        "Disabled",
        "DisabledUnder18",
        "NonInst18_64",
        "Disabled18_64",
        "NonInstOver65",
        "DisabledElder",
    ]);
    let affordability = by_radius(&[
        "HvalUnder50",
        "Hval50",
        "Hval100",
        "Hval150",
        "Hval200",
        "Hval300",
        "Hval500",
        "HvalOverMillion",
        "HvalOver2Million",
        "MedianHValue",
        "MedianGrossRent",
        "AvgGrossRent",
    ]);
    demographics.into_iter().chain(affordability).collect()
}
