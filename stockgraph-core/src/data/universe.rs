//! Universe configuration — the securities to cluster and their display names.
//!
//! Stored as a TOML table keyed by security id. Iteration order is always
//! lexicographic by id, which makes every derived matrix reproducible.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SecurityId;

#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse universe TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize universe: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("universe is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub securities: BTreeMap<SecurityId, String>,
}

impl Universe {
    pub fn new(securities: BTreeMap<SecurityId, String>) -> Result<Self, UniverseError> {
        if securities.is_empty() {
            return Err(UniverseError::Empty);
        }
        Ok(Self { securities })
    }

    /// Load a universe from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = std::fs::read_to_string(path).map_err(|source| UniverseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a universe from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, UniverseError> {
        let universe: Universe = toml::from_str(content)?;
        Self::new(universe.securities)
    }

    pub fn to_toml(&self) -> Result<String, UniverseError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Security ids in fetch order.
    pub fn get_stock_items(&self) -> Vec<SecurityId> {
        self.securities.keys().cloned().collect()
    }

    /// Display names, positionally aligned with [`Self::get_stock_items`].
    pub fn get_stock_names(&self) -> Vec<String> {
        self.securities.values().cloned().collect()
    }

    pub fn name_of(&self, security: &SecurityId) -> Option<&str> {
        self.securities.get(security).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.securities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.securities.is_empty()
    }

    /// Large-cap KRX listings across sectors (internet, steel, telecom,
    /// autos, biotech, utilities, retail, finance, entertainment).
    pub fn default_krx() -> Self {
        let entries = [
            ("035420", "네이버"),
            ("035720", "카카오"),
            ("036570", "ncsoft"),
            ("005490", "posco"),
            ("004020", "현대제철"),
            ("000660", "sk하이닉스"),
            ("034730", "SK"),
            ("017670", "SKT"),
            ("030200", "KT"),
            ("066570", "lg전자"),
            ("032640", "lg유플러스"),
            ("000150", "두산"),
            ("000880", "한화"),
            ("005380", "현대차"),
            ("000270", "기아차"),
            ("005930", "삼성전자"),
            ("008770", "호텔신라"),
            ("068270", "셀트리온"),
            ("068760", "셀트리온제약"),
            ("086900", "메디톡스"),
            ("041960", "코미팜"),
            ("047810", "한국항공우주"),
            ("015760", "한국전력"),
            ("036460", "한국가스공사"),
            ("028050", "삼성엔지니어링"),
            ("004800", "효성"),
            ("001040", "CJ"),
            ("097950", "CJ제일제당"),
            ("007310", "오뚜기"),
            ("069960", "현대백화점"),
            ("004170", "신세계"),
            ("055550", "신한지주"),
            ("105560", "KB금융"),
            ("029780", "삼성카드"),
            ("024110", "기업은행"),
            ("139480", "이마트"),
            ("071840", "하이마트"),
            ("012450", "한화테크윈"),
            ("030520", "한글과컴퓨터"),
            ("041510", "sm엔터"),
            ("035900", "JYP엔터"),
        ];

        Self {
            securities: entries
                .into_iter()
                .map(|(id, name)| (SecurityId::new(id), name.to_string()))
                .collect(),
        }
    }
}
