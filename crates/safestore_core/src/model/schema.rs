//! Data model descriptions: entities, attributes and to-one relationships.
//!
//! # Responsibility
//! - Describe the persisted entity types the store can instantiate.
//! - Resolve inheritance (sub-entities share their root entity's table).
//!
//! # Invariants
//! - A validated model has unique entity names, acyclic known parents,
//!   resolvable relationship destinations and consistent inverses.
//! - Names starting with `_` are reserved for store bookkeeping columns.
//! - Within one hierarchy a column name maps to exactly one column kind.

use super::value::Value;
use super::ModelError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

fn default_model_version() -> u32 {
    1
}

fn default_optional() -> bool {
    true
}

/// Scalar attribute storage type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Integer,
    Double,
    Text,
    Boolean,
    Binary,
}

impl AttributeType {
    /// Converts `value` to this attribute's canonical representation.
    ///
    /// Integers widen to doubles and booleans accept `0`/`1`; every other
    /// mismatch is rejected with a human-readable reason.
    pub fn coerce(self, value: Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
            (Self::Integer, Value::Boolean(v)) => Ok(Value::Integer(i64::from(v))),
            (Self::Double, Value::Double(v)) => Ok(Value::Double(v)),
            (Self::Double, Value::Integer(v)) => Ok(Value::Double(v as f64)),
            (Self::Text, Value::Text(v)) => Ok(Value::Text(v)),
            (Self::Boolean, Value::Boolean(v)) => Ok(Value::Boolean(v)),
            (Self::Boolean, Value::Integer(0)) => Ok(Value::Boolean(false)),
            (Self::Boolean, Value::Integer(1)) => Ok(Value::Boolean(true)),
            (Self::Binary, Value::Binary(v)) => Ok(Value::Binary(v)),
            (kind, other) => Err(format!(
                "expected {} value, got {}",
                kind.label(),
                other.type_name()
            )),
        }
    }

    pub(crate) fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Double => "REAL",
            Self::Text => "TEXT",
            Self::Binary => "BLOB",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AttributeType,
    /// Optional attributes may be saved without a value.
    #[serde(default = "default_optional")]
    pub optional: bool,
    /// Applied when a new object is inserted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl AttributeDescription {
    pub fn new(name: impl Into<String>, kind: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// To-one relationship stored as a foreign-key column on the owner's table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescription {
    pub name: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            is_abstract: false,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Makes this entity a sub-entity of `parent`.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Abstract entities can be fetched but never instantiated.
    pub fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Adds an optional attribute without a default value.
    pub fn attribute(self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attribute_with(AttributeDescription::new(name, kind))
    }

    pub fn attribute_with(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn to_one(mut self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.relationships.push(RelationshipDescription {
            name: name.into(),
            destination: destination.into(),
            inverse: None,
        });
        self
    }

    pub fn to_one_with_inverse(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        self.relationships.push(RelationshipDescription {
            name: name.into(),
            destination: destination.into(),
            inverse: Some(inverse.into()),
        });
        self
    }
}

/// Column of a hierarchy table, as derived from the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Attribute(AttributeType),
    Relationship,
}

/// Foreign-key column of `table`, used by rows of the `owners` entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InboundReference {
    pub table: String,
    pub column: String,
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn sql_type(&self) -> &'static str {
        match &self.kind {
            ColumnKind::Attribute(kind) => kind.sql_type(),
            ColumnKind::Relationship => "INTEGER",
        }
    }
}

/// Named, versioned collection of entity descriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default = "default_model_version")]
    pub version: u32,
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

impl Model {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_model_version(),
            entities: Vec::new(),
        }
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn find_entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|entity| entity.name == name)
    }

    /// Returns the entity and its ancestors, root first.
    pub fn lineage(&self, name: &str) -> Vec<&EntityDescription> {
        let mut chain = Vec::new();
        let mut current = self.find_entity(name);
        while let Some(entity) = current {
            if chain.iter().any(|seen: &&EntityDescription| seen.name == entity.name) {
                break;
            }
            chain.push(entity);
            current = entity
                .parent
                .as_deref()
                .and_then(|parent| self.find_entity(parent));
        }
        chain.reverse();
        chain
    }

    /// Name of the root entity whose table stores `name`.
    pub fn root_name(&self, name: &str) -> Option<&str> {
        self.lineage(name).first().map(|entity| entity.name.as_str())
    }

    /// All attributes of `name`, inherited ones first.
    pub fn attributes_of(&self, name: &str) -> Vec<&AttributeDescription> {
        self.lineage(name)
            .into_iter()
            .flat_map(|entity| entity.attributes.iter())
            .collect()
    }

    /// All relationships of `name`, inherited ones first.
    pub fn relationships_of(&self, name: &str) -> Vec<&RelationshipDescription> {
        self.lineage(name)
            .into_iter()
            .flat_map(|entity| entity.relationships.iter())
            .collect()
    }

    pub fn attribute(&self, entity: &str, key: &str) -> Option<&AttributeDescription> {
        self.attributes_of(entity)
            .into_iter()
            .find(|attribute| attribute.name == key)
    }

    pub fn relationship(&self, entity: &str, key: &str) -> Option<&RelationshipDescription> {
        self.relationships_of(entity)
            .into_iter()
            .find(|relationship| relationship.name == key)
    }

    /// `name` followed by every entity that inherits from it.
    pub fn entity_and_descendants(&self, name: &str) -> Vec<&str> {
        self.entities
            .iter()
            .filter(|entity| {
                self.lineage(&entity.name)
                    .iter()
                    .any(|ancestor| ancestor.name == name)
            })
            .map(|entity| entity.name.as_str())
            .collect()
    }

    /// Entities without a parent; each owns one table.
    pub fn root_entities(&self) -> Vec<&EntityDescription> {
        self.entities
            .iter()
            .filter(|entity| entity.parent.is_none())
            .collect()
    }

    /// Union of columns over every entity stored in `root`'s table.
    pub(crate) fn table_columns(&self, root: &str) -> Vec<Column> {
        let mut columns: Vec<Column> = Vec::new();
        for name in self.entity_and_descendants(root) {
            let Some(entity) = self.find_entity(name) else {
                continue;
            };
            for attribute in &entity.attributes {
                if !columns.iter().any(|column| column.name == attribute.name) {
                    columns.push(Column {
                        name: attribute.name.clone(),
                        kind: ColumnKind::Attribute(attribute.kind),
                    });
                }
            }
            for relationship in &entity.relationships {
                if !columns.iter().any(|column| column.name == relationship.name) {
                    columns.push(Column {
                        name: relationship.name.clone(),
                        kind: ColumnKind::Relationship,
                    });
                }
            }
        }
        columns
    }

    /// Foreign-key columns that can point into `root`'s table.
    pub(crate) fn inbound_references(&self, root: &str) -> Vec<InboundReference> {
        let mut references: Vec<InboundReference> = Vec::new();
        for entity in &self.entities {
            for relationship in &entity.relationships {
                if self.root_name(&relationship.destination) != Some(root) {
                    continue;
                }
                let Some(table) = self.root_name(&entity.name) else {
                    continue;
                };
                let owners = self
                    .entity_and_descendants(&entity.name)
                    .into_iter()
                    .map(str::to_string);
                match references
                    .iter_mut()
                    .find(|r| r.table == table && r.column == relationship.name)
                {
                    Some(existing) => {
                        for owner in owners {
                            if !existing.owners.contains(&owner) {
                                existing.owners.push(owner);
                            }
                        }
                    }
                    None => references.push(InboundReference {
                        table: table.to_string(),
                        column: relationship.name.clone(),
                        owners: owners.collect(),
                    }),
                }
            }
        }
        references
    }

    /// Checks structural consistency of the model.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::Invalid("model name cannot be empty".to_string()));
        }

        let mut names = HashSet::new();
        for entity in &self.entities {
            check_name("entity", &entity.name)?;
            if !names.insert(entity.name.as_str()) {
                return Err(ModelError::Invalid(format!(
                    "duplicate entity `{}`",
                    entity.name
                )));
            }
        }

        for entity in &self.entities {
            self.validate_lineage(entity)?;
            self.validate_members(entity)?;
        }

        for root in self.root_entities() {
            let mut kinds: HashMap<&str, ColumnKind> = HashMap::new();
            for name in self.entity_and_descendants(&root.name) {
                let Some(entity) = self.find_entity(name) else {
                    continue;
                };
                let members = entity
                    .attributes
                    .iter()
                    .map(|a| (a.name.as_str(), ColumnKind::Attribute(a.kind)))
                    .chain(
                        entity
                            .relationships
                            .iter()
                            .map(|r| (r.name.as_str(), ColumnKind::Relationship)),
                    );
                for (column, kind) in members {
                    match kinds.get(column) {
                        Some(existing) if *existing != kind => {
                            return Err(ModelError::Invalid(format!(
                                "column `{column}` has conflicting types in hierarchy `{}`",
                                root.name
                            )));
                        }
                        Some(_) => {}
                        None => {
                            kinds.insert(column, kind);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_lineage(&self, entity: &EntityDescription) -> Result<(), ModelError> {
        let mut seen = HashSet::new();
        let mut current = Some(entity);
        while let Some(node) = current {
            if !seen.insert(node.name.as_str()) {
                return Err(ModelError::Invalid(format!(
                    "entity `{}` has a cyclic parent chain",
                    entity.name
                )));
            }
            current = match node.parent.as_deref() {
                Some(parent) => Some(self.find_entity(parent).ok_or_else(|| {
                    ModelError::Invalid(format!(
                        "entity `{}` names unknown parent `{parent}`",
                        node.name
                    ))
                })?),
                None => None,
            };
        }
        Ok(())
    }

    fn validate_members(&self, entity: &EntityDescription) -> Result<(), ModelError> {
        let mut keys = HashSet::new();
        for attribute in self.attributes_of(&entity.name) {
            check_name("attribute", &attribute.name)?;
            if !keys.insert(attribute.name.as_str()) {
                return Err(ModelError::Invalid(format!(
                    "entity `{}` declares `{}` twice",
                    entity.name, attribute.name
                )));
            }
            if let Some(default) = &attribute.default_value {
                attribute.kind.coerce(default.clone()).map_err(|reason| {
                    ModelError::Invalid(format!(
                        "default of `{}.{}`: {reason}",
                        entity.name, attribute.name
                    ))
                })?;
            }
        }

        for relationship in self.relationships_of(&entity.name) {
            check_name("relationship", &relationship.name)?;
            if !keys.insert(relationship.name.as_str()) {
                return Err(ModelError::Invalid(format!(
                    "entity `{}` declares `{}` twice",
                    entity.name, relationship.name
                )));
            }
            if self.find_entity(&relationship.destination).is_none() {
                return Err(ModelError::Invalid(format!(
                    "relationship `{}.{}` targets unknown entity `{}`",
                    entity.name, relationship.name, relationship.destination
                )));
            }
            if let Some(inverse) = relationship.inverse.as_deref() {
                let back = self
                    .relationship(&relationship.destination, inverse)
                    .ok_or_else(|| {
                        ModelError::Invalid(format!(
                            "inverse `{}.{inverse}` of `{}.{}` does not exist",
                            relationship.destination, entity.name, relationship.name
                        ))
                    })?;
                if back.inverse.as_deref() != Some(relationship.name.as_str()) {
                    return Err(ModelError::Invalid(format!(
                        "inverse of `{}.{}` does not point back",
                        entity.name, relationship.name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn check_name(what: &str, name: &str) -> Result<(), ModelError> {
    let valid = !name.is_empty()
        && !name.starts_with('_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ModelError::Invalid(format!("invalid {what} name `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::{AttributeDescription, AttributeType, EntityDescription, Model};
    use crate::model::Value;

    fn sample() -> Model {
        Model::new("Sample")
            .entity(
                EntityDescription::new("Item")
                    .attribute("title", AttributeType::Text)
                    .to_one_with_inverse("owner", "Owner", "item"),
            )
            .entity(
                EntityDescription::new("SpecialItem")
                    .parent("Item")
                    .attribute("level", AttributeType::Integer),
            )
            .entity(EntityDescription::new("Owner").to_one_with_inverse("item", "Item", "owner"))
    }

    #[test]
    fn valid_model_resolves_inheritance() {
        let model = sample();
        model.validate().unwrap();

        assert_eq!(model.root_name("SpecialItem"), Some("Item"));
        let attributes: Vec<_> = model
            .attributes_of("SpecialItem")
            .into_iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(attributes, vec!["title", "level"]);
        assert_eq!(
            model.entity_and_descendants("Item"),
            vec!["Item", "SpecialItem"]
        );
        let columns: Vec<_> = model
            .table_columns("Item")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(columns, vec!["title", "owner", "level"]);
        let inbound = model.inbound_references("Item");
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].table, "Owner");
        assert_eq!(inbound[0].column, "item");
        assert_eq!(inbound[0].owners, vec!["Owner".to_string()]);
    }

    #[test]
    fn validation_rejects_unknown_parent_and_reserved_names() {
        let orphan = Model::new("M").entity(EntityDescription::new("A").parent("Missing"));
        assert!(orphan.validate().is_err());

        let reserved = Model::new("M")
            .entity(EntityDescription::new("A").attribute("_pk", AttributeType::Integer));
        assert!(reserved.validate().is_err());
    }

    #[test]
    fn validation_rejects_one_sided_inverse() {
        let model = Model::new("M")
            .entity(EntityDescription::new("A").to_one_with_inverse("b", "B", "a"))
            .entity(EntityDescription::new("B").to_one("a", "A"));
        assert!(model.validate().is_err());
    }

    #[test]
    fn validation_rejects_mistyped_default() {
        let model = Model::new("M").entity(EntityDescription::new("A").attribute_with(
            AttributeDescription::new("count", AttributeType::Integer).default_value("zero"),
        ));
        assert!(model.validate().is_err());
    }

    #[test]
    fn coerce_widens_and_rejects() {
        assert_eq!(
            AttributeType::Double.coerce(Value::Integer(2)),
            Ok(Value::Double(2.0))
        );
        assert_eq!(
            AttributeType::Boolean.coerce(Value::Integer(1)),
            Ok(Value::Boolean(true))
        );
        assert!(AttributeType::Integer.coerce(Value::Text("1".into())).is_err());
    }

    #[test]
    fn model_parses_from_json() {
        let json = r#"{
            "name": "Sample",
            "version": 2,
            "entities": [
                {"name": "Item", "attributes": [
                    {"name": "title", "type": "text", "optional": false, "default_value": ""}
                ]}
            ]
        }"#;
        let model: Model = serde_json::from_str(json).unwrap();
        model.validate().unwrap();
        assert_eq!(model.version, 2);
        let title = model.attribute("Item", "title").unwrap();
        assert!(!title.optional);
        assert_eq!(title.default_value, Some(Value::Text(String::new())));
    }
}
