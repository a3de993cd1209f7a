use std::fmt::{self, Display};
use std::sync::Arc;

use cartograph_schema::Type;
use serde::{Deserialize, Serialize};

/// How many values a target expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryMode {
    /// Exactly one value
    Discover,
    /// Every value any operation can produce, as a collection
    Gather,
    /// A value assembled from its children. Representable, but no built-in
    /// strategy resolves it.
    Build,
}

/// One requested output: a type, an optional nested shape and a mode.
/// Nodes are immutable and compare by type name, children and mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuerySpecTypeNode {
    ty: Arc<Type>,
    children: Vec<QuerySpecTypeNode>,
    mode: QueryMode,
}

impl QuerySpecTypeNode {
    /// A node with an explicit mode and children
    pub fn new(ty: Arc<Type>, children: Vec<QuerySpecTypeNode>, mode: QueryMode) -> Self {
        Self { ty, children, mode }
    }

    /// Requests exactly one `ty`
    pub fn discover(ty: Arc<Type>) -> Self {
        Self::new(ty, Vec::new(), QueryMode::Discover)
    }

    /// Requests every `ty` available
    pub fn gather(ty: Arc<Type>) -> Self {
        Self::new(ty, Vec::new(), QueryMode::Gather)
    }

    /// Requests `ty` assembled from `children`
    pub fn build(ty: Arc<Type>, children: Vec<QuerySpecTypeNode>) -> Self {
        Self::new(ty, children, QueryMode::Build)
    }

    /// The requested type
    pub fn ty(&self) -> &Arc<Type> {
        &self.ty
    }

    /// The nested shape
    pub fn children(&self) -> &[QuerySpecTypeNode] {
        &self.children
    }

    /// The mode
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// The same node in another mode
    pub fn with_mode(&self, mode: QueryMode) -> Self {
        Self::new(self.ty.clone(), self.children.clone(), mode)
    }
}

impl Display for QuerySpecTypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            QueryMode::Discover => write!(f, "{}", self.ty),
            QueryMode::Gather => write!(f, "gather {}", self.ty),
            QueryMode::Build => write!(f, "build {}", self.ty),
        }
    }
}
