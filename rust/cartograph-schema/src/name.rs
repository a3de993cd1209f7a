use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{SchemaError, SchemaResult};

/// The base name used for collection types. `Order[]` and `Array<Order>` both
/// resolve to `Array<Order>`.
pub const ARRAY_TYPE_NAME: &str = "Array";

/// A fully-qualified type name, optionally carrying type parameters
/// (`Array<com.acme.Order>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    fully_qualified_name: String,
    parameters: Vec<QualifiedName>,
}

impl QualifiedName {
    /// A name without type parameters
    pub fn new(fully_qualified_name: impl Into<String>) -> Self {
        Self {
            fully_qualified_name: fully_qualified_name.into(),
            parameters: Vec::new(),
        }
    }

    /// The collection name whose members are `member`
    pub fn array_of(member: QualifiedName) -> Self {
        Self {
            fully_qualified_name: ARRAY_TYPE_NAME.to_string(),
            parameters: vec![member],
        }
    }

    /// Parses `com.acme.Order`, `Array<com.acme.Order>` or `com.acme.Order[]`
    pub fn parse(name: &str) -> SchemaResult<Self> {
        let name = name.trim();
        let invalid = |reason: &str| SchemaError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }

        if let Some(member) = name.strip_suffix("[]") {
            return Ok(Self::array_of(Self::parse(member)?));
        }

        let Some(open) = name.find('<') else {
            if name.contains('>') || name.contains(',') {
                return Err(invalid("unbalanced type parameters"));
            }
            return Ok(Self::new(name));
        };

        let inner = name[open + 1..]
            .strip_suffix('>')
            .ok_or_else(|| invalid("type parameters are not closed"))?;

        let mut parameters = Vec::new();
        let mut depth = 0usize;
        let mut start = 0usize;
        for (index, character) in inner.char_indices() {
            match character {
                '<' => depth += 1,
                '>' => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| invalid("unbalanced type parameters"))?
                }
                ',' if depth == 0 => {
                    parameters.push(Self::parse(&inner[start..index])?);
                    start = index + 1;
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(invalid("unbalanced type parameters"));
        }
        parameters.push(Self::parse(&inner[start..])?);

        Ok(Self {
            fully_qualified_name: name[..open].trim().to_string(),
            parameters,
        })
    }

    /// The name without type parameters
    pub fn fully_qualified_name(&self) -> &str {
        &self.fully_qualified_name
    }

    /// Type parameters, outermost first
    pub fn parameters(&self) -> &[QualifiedName] {
        &self.parameters
    }

    /// The canonical name including type parameters. This is the identity
    /// of a type throughout the engine.
    pub fn parameterized_name(&self) -> String {
        if self.parameters.is_empty() {
            return self.fully_qualified_name.clone();
        }
        let parameters = self
            .parameters
            .iter()
            .map(|parameter| parameter.parameterized_name())
            .collect::<Vec<_>>()
            .join(",");
        format!("{}<{}>", self.fully_qualified_name, parameters)
    }

    /// The last segment of the name, for display
    pub fn short_name(&self) -> &str {
        self.fully_qualified_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.fully_qualified_name)
    }

    /// True when this names a collection
    pub fn is_array(&self) -> bool {
        self.fully_qualified_name == ARRAY_TYPE_NAME && self.parameters.len() == 1
    }

    /// The member name of a collection
    pub fn member(&self) -> Option<&QualifiedName> {
        if self.is_array() {
            self.parameters.first()
        } else {
            None
        }
    }
}

impl Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parameterized_name())
    }
}

impl FromStr for QualifiedName {
    type Err = SchemaError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::parse(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_treats_bracket_shorthand_as_an_array() -> anyhow::Result<()> {
        let shorthand = QualifiedName::parse("com.acme.Order[]")?;
        let explicit = QualifiedName::parse("Array<com.acme.Order>")?;

        assert_eq!(shorthand, explicit);
        assert_eq!(shorthand.parameterized_name(), "Array<com.acme.Order>");
        assert_eq!(
            shorthand.member().map(|member| member.short_name()),
            Some("Order")
        );
        Ok(())
    }

    #[test]
    fn it_parses_nested_parameters() -> anyhow::Result<()> {
        let name = QualifiedName::parse("Map<String, Array<Order>>")?;

        assert_eq!(name.fully_qualified_name(), "Map");
        assert_eq!(name.parameters().len(), 2);
        assert_eq!(name.parameterized_name(), "Map<String,Array<Order>>");
        Ok(())
    }

    #[test]
    fn it_rejects_unbalanced_names() {
        assert!(QualifiedName::parse("Array<Order").is_err());
        assert!(QualifiedName::parse("Order>").is_err());
        assert!(QualifiedName::parse("").is_err());
    }
}
