use std::collections::BTreeMap;
use std::sync::Arc;

use mirrorline_core::{AppError, AppResult};
use mirrorline_domain::{ResourceDescriptor, ResourceType, catalog};

/// Explicit map from resource type to descriptor, built once at startup.
#[derive(Clone)]
pub struct DescriptorRegistry {
    descriptors: Arc<BTreeMap<ResourceType, Arc<ResourceDescriptor>>>,
}

impl DescriptorRegistry {
    /// Creates a registry, rejecting duplicate types and unknown dependencies.
    pub fn new(descriptors: Vec<ResourceDescriptor>) -> AppResult<Self> {
        let mut by_type = BTreeMap::new();
        for descriptor in descriptors {
            let resource_type = descriptor.resource_type().clone();
            if by_type
                .insert(resource_type.clone(), Arc::new(descriptor))
                .is_some()
            {
                return Err(AppError::Validation(format!(
                    "descriptor '{resource_type}' is registered twice"
                )));
            }
        }

        for descriptor in by_type.values() {
            if let Some(dependency) = descriptor.dependency()
                && !by_type.contains_key(&dependency.resource_type)
            {
                return Err(AppError::Validation(format!(
                    "descriptor '{}' depends on unregistered type '{}'",
                    descriptor.resource_type(),
                    dependency.resource_type
                )));
            }
        }

        Ok(Self {
            descriptors: Arc::new(by_type),
        })
    }

    /// Creates a registry holding the built-in reference descriptors.
    pub fn reference() -> AppResult<Self> {
        Self::new(catalog::reference_catalog()?)
    }

    /// Returns the descriptor for a resource type.
    pub fn get(&self, resource_type: &ResourceType) -> AppResult<Arc<ResourceDescriptor>> {
        self.descriptors.get(resource_type).cloned().ok_or_else(|| {
            AppError::NotFound(format!("no descriptor registered for '{resource_type}'"))
        })
    }

    /// Returns the types whose descriptor declares a dependency on the given type.
    #[must_use]
    pub fn dependent_types(&self, resource_type: &ResourceType) -> Vec<ResourceType> {
        self.descriptors
            .values()
            .filter(|descriptor| {
                descriptor
                    .dependency()
                    .is_some_and(|dependency| &dependency.resource_type == resource_type)
            })
            .map(|descriptor| descriptor.resource_type().clone())
            .collect()
    }

    /// Returns registered resource types in order.
    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceType> {
        self.descriptors.keys()
    }
}

#[cfg(test)]
mod tests {
    use mirrorline_domain::{FieldPath, ResourceDescriptor, ResourceType, catalog};

    use super::DescriptorRegistry;

    #[test]
    fn reference_registry_resolves_dependents() {
        let registry = DescriptorRegistry::reference().unwrap_or_else(|_| unreachable!());
        let auth = ResourceType::new(catalog::CASEBOOK_AUTH).unwrap_or_else(|_| unreachable!());

        let dependents = registry.dependent_types(&auth);
        let names: Vec<&str> = dependents.iter().map(ResourceType::as_str).collect();
        assert_eq!(names, vec![catalog::CASEBOOK_CASE, catalog::CASEBOOK_CLIENT]);
    }

    #[test]
    fn duplicate_descriptors_are_rejected() {
        let descriptor = || {
            ResourceDescriptor::builder(
                ResourceType::new("widget_v1").unwrap_or_else(|_| unreachable!()),
                "Widgets",
                FieldPath::new("id").unwrap_or_else(|_| unreachable!()),
            )
            .build()
            .unwrap_or_else(|_| unreachable!())
        };

        assert!(DescriptorRegistry::new(vec![descriptor(), descriptor()]).is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let result = DescriptorRegistry::new(vec![
            catalog::casebook_client().unwrap_or_else(|_| unreachable!()),
        ]);
        assert!(result.is_err());
    }
}
