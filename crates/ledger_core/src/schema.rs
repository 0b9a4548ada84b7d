use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DataType, FieldId, LedgerError, LedgerResult};

pub const ID_COLUMN: &str = "id";
pub const OBJECT_ID_FIELD: &str = "object_id";
pub const UPDATED_AT_FIELD: &str = "updated_at";
pub const VALID_FROM_COLUMN: &str = "valid_from";
pub const VALID_UNTIL_COLUMN: &str = "valid_until";

/// Columns owned by the store that a client data model may not declare.
pub const RESERVED_COLUMNS: [&str; 3] = [ID_COLUMN, VALID_FROM_COLUMN, VALID_UNTIL_COLUMN];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub is_enum: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: FieldId::new(),
            name: name.into(),
            data_type,
            nullable: false,
            is_enum: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_enum_values(mut self) -> Self {
        self.is_enum = true;
        self
    }

    pub fn with_id(mut self, id: FieldId) -> Self {
        self.id = id;
        self
    }

    /// Whether observed values of this field are recorded in the enum dictionary.
    pub fn tracks_enum_values(&self) -> bool {
        self.is_enum && self.data_type.supports_enum()
    }
}

/// Many-to-one relation: `child_table.child_field` references `parent_table.parent_field`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToSingle {
    pub name: String,
    pub parent_table_name: String,
    pub parent_field_name: String,
    pub child_table_name: String,
    pub child_field_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "TableRepr")]
pub struct Table {
    pub name: String,
    pub fields: BTreeMap<String, Field>,
    pub links_to_single: BTreeMap<String, LinkToSingle>,
}

#[derive(Deserialize)]
struct TableRepr {
    name: String,
    #[serde(default)]
    fields: BTreeMap<String, Field>,
    #[serde(default)]
    links_to_single: BTreeMap<String, LinkToSingle>,
}

impl From<TableRepr> for Table {
    fn from(repr: TableRepr) -> Self {
        let mut table = Table {
            name: repr.name,
            fields: repr.fields,
            links_to_single: repr.links_to_single,
        };
        table.ensure_invariant_fields();
        table
    }
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        let mut table = Self {
            name: name.into(),
            fields: BTreeMap::new(),
            links_to_single: BTreeMap::new(),
        };
        table.ensure_invariant_fields();
        table
    }

    fn ensure_invariant_fields(&mut self) {
        self.fields
            .entry(OBJECT_ID_FIELD.to_string())
            .or_insert_with(|| Field::new(OBJECT_ID_FIELD, DataType::String));
        self.fields
            .entry(UPDATED_AT_FIELD.to_string())
            .or_insert_with(|| Field::new(UPDATED_AT_FIELD, DataType::Timestamp));
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn with_link(mut self, link: LinkToSingle) -> Self {
        self.links_to_single.insert(link.name.clone(), link);
        self
    }

    pub fn field(&self, name: &str) -> LedgerResult<&Field> {
        self.fields.get(name).ok_or_else(|| {
            LedgerError::model_inconsistency(format!(
                "field '{name}' is not declared on table '{}'",
                self.name
            ))
        })
    }

    pub fn link(&self, name: &str) -> LedgerResult<&LinkToSingle> {
        self.links_to_single.get(name).ok_or_else(|| {
            LedgerError::model_inconsistency(format!(
                "link '{name}' is not declared on table '{}'",
                self.name
            ))
        })
    }

    /// Fields whose values feed the enum dictionary.
    pub fn enum_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|field| field.tracks_enum_values())
    }

    pub fn validate(&self) -> LedgerResult<()> {
        for field in self.fields.values() {
            if RESERVED_COLUMNS.contains(&field.name.as_str()) {
                return Err(LedgerError::validation(format!(
                    "field name '{}' on table '{}' is reserved",
                    field.name, self.name
                )));
            }
        }
        for link in self.links_to_single.values() {
            if link.child_table_name != self.name {
                return Err(LedgerError::model_inconsistency(format!(
                    "link '{}' declared on '{}' names child table '{}'",
                    link.name, self.name, link.child_table_name
                )));
            }
            self.field(&link.child_field_name)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn table(&self, name: &str) -> LedgerResult<&Table> {
        self.tables.get(name).ok_or_else(|| {
            LedgerError::model_inconsistency(format!("table '{name}' is not in the data model"))
        })
    }

    /// Checks every table and that each link lands on a declared parent field.
    pub fn validate(&self) -> LedgerResult<()> {
        for table in self.tables.values() {
            table.validate()?;
            for link in table.links_to_single.values() {
                self.table(&link.parent_table_name)?
                    .field(&link.parent_field_name)?;
            }
        }
        Ok(())
    }
}
