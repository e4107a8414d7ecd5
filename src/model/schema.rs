// Class and feature definitions for model nodes
//
// A syntax registers one ClassDefinition per node class it produces. The
// resolution step consults the registry to learn whether a relation is a
// containment, whether it is many-valued, and what its inverse is.

use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    /// A plain string-valued property stored in the node's attributes
    Attribute,
    /// Owned children; the child's container back-link points at the owner
    Containment,
    /// Non-owning cross reference, possibly to a proxy
    Reference,
}

#[derive(Debug, Clone)]
pub struct FeatureDefinition {
    pub name: &'static str,
    pub kind: FeatureKind,
    pub many: bool,
    /// Name of the inverse relation on the target class, if any
    pub opposite: Option<&'static str>,
}

impl FeatureDefinition {
    pub fn attribute(name: &'static str) -> Self {
        FeatureDefinition {
            name,
            kind: FeatureKind::Attribute,
            many: false,
            opposite: None,
        }
    }

    pub fn containment(name: &'static str, many: bool) -> Self {
        FeatureDefinition {
            name,
            kind: FeatureKind::Containment,
            many,
            opposite: None,
        }
    }

    pub fn reference(name: &'static str, many: bool, opposite: Option<&'static str>) -> Self {
        FeatureDefinition {
            name,
            kind: FeatureKind::Reference,
            many,
            opposite,
        }
    }

    pub fn is_containment(&self) -> bool {
        self.kind == FeatureKind::Containment
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassDefinition {
    pub features: Vec<FeatureDefinition>,
    /// Attribute that identifies instances of this class inside a document. Used when a URI
    /// fragment is not a node path.
    pub id_attribute: Option<&'static str>,
}

impl ClassDefinition {
    pub fn feature(&self, name: &str) -> Option<&FeatureDefinition> {
        self.features.iter().find(|f| f.name == name)
    }
}

/// Thread-safe registry of class definitions, cheap to clone.
pub struct SchemaRegistry(Arc<RwLock<HashMap<String, Arc<ClassDefinition>>>>);

impl Clone for SchemaRegistry {
    fn clone(&self) -> Self {
        SchemaRegistry(self.0.clone())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        SchemaRegistry(Arc::new(RwLock::new(HashMap::new())))
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SchemaRegistry")
            .field(&self.list_classes())
            .finish()
    }
}

impl SchemaRegistry {
    /// Register a class definition
    ///
    /// If a class with this name already exists, it will be overwritten and a log message emitted.
    pub fn register(&self, class: impl Into<String>, definition: ClassDefinition) {
        let class = class.into();
        let mut writer = self.0.write();
        if writer.contains_key(&class) {
            tracing::info!(
                "[SchemaRegistry::register] Overwriting existing class definition: {}",
                class
            );
        }
        writer.insert(class, Arc::new(definition));
    }

    pub fn get(&self, class: &str) -> Option<Arc<ClassDefinition>> {
        let reader = self.0.read();
        reader.get(class).cloned()
    }

    /// Look up the definition of `feature` on `class`.
    pub fn feature(&self, class: &str, feature: &str) -> Option<FeatureDefinition> {
        self.get(class)
            .and_then(|definition| definition.feature(feature).cloned())
    }

    pub fn list_classes(&self) -> Vec<String> {
        let reader = self.0.read();
        let mut classes: Vec<String> = reader.keys().cloned().collect();
        classes.sort();
        classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookups_and_overwrite() {
        let registry = SchemaRegistry::default();
        registry.register(
            "Entry",
            ClassDefinition {
                features: vec![FeatureDefinition::reference("refs", true, Some("referrers"))],
                id_attribute: Some("name"),
            },
        );
        let clone = registry.clone();
        let refs = clone.feature("Entry", "refs").unwrap();
        assert!(refs.many);
        assert_eq!(refs.opposite, Some("referrers"));
        assert!(clone.feature("Entry", "children").is_none());

        registry.register("Entry", ClassDefinition::default());
        assert!(clone.feature("Entry", "refs").is_none());
        assert_eq!(registry.list_classes(), vec!["Entry".to_string()]);
    }
}
