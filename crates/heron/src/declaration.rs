//
// declaration.rs
//
// Indexable declarations produced by the analyzer
//

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::Range;
use url::Url;

/// Kind of a declaration, persisted by its raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeclarationKind {
    Class,
    Function,
    Property,
    TypeAlias,
    Constructor,
    Variable,
}

impl DeclarationKind {
    pub fn raw_value(self) -> i32 {
        match self {
            DeclarationKind::Class => 0,
            DeclarationKind::Function => 1,
            DeclarationKind::Property => 2,
            DeclarationKind::TypeAlias => 3,
            DeclarationKind::Constructor => 4,
            DeclarationKind::Variable => 5,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(DeclarationKind::Class),
            1 => Some(DeclarationKind::Function),
            2 => Some(DeclarationKind::Property),
            3 => Some(DeclarationKind::TypeAlias),
            4 => Some(DeclarationKind::Constructor),
            5 => Some(DeclarationKind::Variable),
            _ => None,
        }
    }
}

/// Visibility of a declaration, persisted by its raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Internal,
    Private,
}

impl Visibility {
    pub fn raw_value(self) -> i32 {
        match self {
            Visibility::Public => 0,
            Visibility::Protected => 1,
            Visibility::Internal => 2,
            Visibility::Private => 3,
        }
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Visibility::Public),
            1 => Some(Visibility::Protected),
            2 => Some(Visibility::Internal),
            3 => Some(Visibility::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub uri: Url,
    pub range: Range,
}

/// One named, indexable program entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub fq_name: String,
    pub short_name: String,
    pub kind: DeclarationKind,
    pub visibility: Visibility,
    pub extension_receiver_type: Option<String>,
    pub location: Option<Location>,
}

impl Declaration {
    /// Build a declaration whose short name is the last segment of `fq_name`
    pub fn new(fq_name: impl Into<String>, kind: DeclarationKind) -> Self {
        let fq_name = fq_name.into();
        let short_name = fq_name
            .rsplit('.')
            .next()
            .unwrap_or(fq_name.as_str())
            .to_string();
        Self {
            fq_name,
            short_name,
            kind,
            visibility: Visibility::Public,
            extension_receiver_type: None,
            location: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_receiver(mut self, receiver: Option<String>) -> Self {
        self.extension_receiver_type = receiver;
        self
    }

    pub fn with_location(mut self, uri: Url, range: Range) -> Self {
        self.location = Some(Location { uri, range });
        self
    }

    /// The pair that identifies persisted rows of this declaration
    pub fn key(&self) -> (&str, Option<&str>) {
        (&self.fq_name, self.extension_receiver_type.as_deref())
    }
}
