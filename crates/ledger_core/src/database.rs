use serde::{Deserialize, Serialize};

use crate::OrganizationId;

/// Distinguishes the shared control plane from a tenant's ingested data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Control,
    Tenant,
}

/// The namespace every statement issued by the store is scoped to.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub schema_type: SchemaType,
    pub schema: String,
}

impl DatabaseSchema {
    pub fn control(schema: impl Into<String>) -> Self {
        Self {
            schema_type: SchemaType::Control,
            schema: schema.into(),
        }
    }

    pub fn tenant(schema: impl Into<String>) -> Self {
        Self {
            schema_type: SchemaType::Tenant,
            schema: schema.into(),
        }
    }

    pub fn for_organization(organization: OrganizationId) -> Self {
        Self::tenant(format!("org_{}", organization.0.simple()))
    }

    pub fn is_tenant(&self) -> bool {
        self.schema_type == SchemaType::Tenant
    }
}
