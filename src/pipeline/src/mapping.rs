//! Category label -> integer code tables.
//!
//! Each domain is a JSON object `{"label": code, ...}` in the mapping
//! directory. Mappings are loaded once at startup and handed to the
//! normalizers; a label missing from a table is `CategoryCode::Unmapped`,
//! never an error.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::PipelineError;

/// Category domains with a mapping file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryDomain {
    Sex,
    Weather,
    GroundState,
    RaceType,
    RaceClass,
    Around,
}

impl CategoryDomain {
    pub fn name(&self) -> &'static str {
        match self {
            CategoryDomain::Sex => "sex",
            CategoryDomain::Weather => "weather",
            CategoryDomain::GroundState => "ground_state",
            CategoryDomain::RaceType => "race_type",
            CategoryDomain::RaceClass => "race_class",
            CategoryDomain::Around => "around",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }
}

impl fmt::Display for CategoryDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a category lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CategoryCode {
    Mapped(u8),
    #[default]
    Unmapped,
}

impl CategoryCode {
    /// The code as a nullable value, for writing tables.
    pub fn value(self) -> Option<u8> {
        match self {
            CategoryCode::Mapped(code) => Some(code),
            CategoryCode::Unmapped => None,
        }
    }

    pub fn from_value(value: Option<u8>) -> Self {
        value.map_or(CategoryCode::Unmapped, CategoryCode::Mapped)
    }
}

/// One domain's label table, in file order.
#[derive(Debug, Clone)]
pub struct CategoryMap {
    domain: CategoryDomain,
    labels: Vec<(String, u8)>,
    index: HashMap<String, u8>,
    /// Alternation of all labels in file order; leftmost match wins, then
    /// the earlier label.
    pattern: Regex,
}

impl CategoryMap {
    /// Parse a JSON object of label -> code.
    ///
    /// Codes must fit in a byte and be distinct across labels.
    pub fn from_json(domain: CategoryDomain, text: &str) -> Result<Self, PipelineError> {
        let malformed = |reason: String| PipelineError::MalformedMapping { domain, reason };

        let object: Map<String, Value> =
            serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
        if object.is_empty() {
            return Err(malformed("no labels".to_string()));
        }

        let mut labels = Vec::with_capacity(object.len());
        let mut seen_codes: HashMap<u8, String> = HashMap::new();
        for (label, value) in object {
            let code = value
                .as_u64()
                .and_then(|c| u8::try_from(c).ok())
                .ok_or_else(|| malformed(format!("code for {:?} is not a small integer", label)))?;
            if let Some(other) = seen_codes.insert(code, label.clone()) {
                return Err(malformed(format!(
                    "labels {:?} and {:?} share code {}",
                    other, label, code
                )));
            }
            labels.push((label, code));
        }

        let alternation = labels
            .iter()
            .map(|(label, _)| regex::escape(label))
            .collect::<Vec<_>>()
            .join("|");
        let pattern =
            Regex::new(&format!("({})", alternation)).map_err(|e| malformed(e.to_string()))?;
        let index = labels.iter().cloned().collect();

        Ok(Self {
            domain,
            labels,
            index,
            pattern,
        })
    }

    /// Load `<dir>/<domain>.json`.
    pub fn load(domain: CategoryDomain, dir: &Path) -> Result<Self, PipelineError> {
        let path = dir.join(domain.file_name());
        let text = fs::read_to_string(&path)
            .map_err(|_| PipelineError::MissingMapping { domain, path })?;
        Self::from_json(domain, &text)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Look up an exact label (surrounding whitespace ignored).
    pub fn code(&self, label: &str) -> CategoryCode {
        let label = label.trim();
        match self.index.get(label) {
            Some(&code) => CategoryCode::Mapped(code),
            None => {
                if !label.is_empty() {
                    debug!("unmapped {} label {:?}", self.domain, label);
                }
                CategoryCode::Unmapped
            }
        }
    }

    /// Look up an optional label.
    pub fn code_opt(&self, label: Option<&str>) -> CategoryCode {
        label.map_or(CategoryCode::Unmapped, |l| self.code(l))
    }

    /// First label occurring in free text.
    pub fn find_in<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.pattern.find(text).map(|m| m.as_str())
    }

    /// Code of the first label occurring in free text.
    pub fn code_in(&self, text: &str) -> CategoryCode {
        self.find_in(text)
            .map_or(CategoryCode::Unmapped, |label| self.code(label))
    }
}

/// All domain tables, loaded once and passed to the normalizers.
#[derive(Debug, Clone)]
pub struct Mappings {
    pub sex: CategoryMap,
    pub weather: CategoryMap,
    pub ground_state: CategoryMap,
    pub race_type: CategoryMap,
    pub race_class: CategoryMap,
    pub around: CategoryMap,
}

impl Mappings {
    /// Load every domain from a directory. Any missing file is fatal.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self, PipelineError> {
        let dir = dir.as_ref();
        Ok(Self {
            sex: CategoryMap::load(CategoryDomain::Sex, dir)?,
            weather: CategoryMap::load(CategoryDomain::Weather, dir)?,
            ground_state: CategoryMap::load(CategoryDomain::GroundState, dir)?,
            race_type: CategoryMap::load(CategoryDomain::RaceType, dir)?,
            race_class: CategoryMap::load(CategoryDomain::RaceClass, dir)?,
            around: CategoryMap::load(CategoryDomain::Around, dir)?,
        })
    }

    pub fn get(&self, domain: CategoryDomain) -> &CategoryMap {
        match domain {
            CategoryDomain::Sex => &self.sex,
            CategoryDomain::Weather => &self.weather,
            CategoryDomain::GroundState => &self.ground_state,
            CategoryDomain::RaceType => &self.race_type,
            CategoryDomain::RaceClass => &self.race_class,
            CategoryDomain::Around => &self.around,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Small mappings shared by normalizer tests.
    pub fn mappings() -> Mappings {
        let map = |domain, json: &str| CategoryMap::from_json(domain, json).unwrap();
        Mappings {
            sex: map(CategoryDomain::Sex, r#"{"牡": 0, "牝": 1, "セ": 2}"#),
            weather: map(
                CategoryDomain::Weather,
                r#"{"晴": 0, "曇": 1, "小雨": 2, "雨": 3, "小雪": 4, "雪": 5}"#,
            ),
            ground_state: map(
                CategoryDomain::GroundState,
                r#"{"良": 0, "稍重": 1, "重": 2, "不良": 3, "稍": 4, "不": 5}"#,
            ),
            race_type: map(CategoryDomain::RaceType, r#"{"芝": 0, "ダ": 1, "障": 2}"#),
            race_class: map(
                CategoryDomain::RaceClass,
                r#"{"G1": 9, "G2": 8, "G3": 7, "(L)": 6, "オープン": 5,
                    "3勝クラス": 4, "2勝クラス": 3, "1勝クラス": 2, "未勝利": 1, "新馬": 0}"#,
            ),
            around: map(CategoryDomain::Around, r#"{"右": 0, "左": 1, "直": 2}"#),
        }
    }
}
