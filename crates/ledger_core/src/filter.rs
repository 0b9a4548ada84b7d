use serde::{Deserialize, Serialize};

use crate::{DataType, LedgerError, LedgerResult, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    Avg,
    Count,
    CountDistinct,
    Max,
    Min,
    Sum,
}

impl Aggregator {
    /// Type of the aggregate for a column of `field_type`.
    pub fn result_type(self, field_type: DataType) -> DataType {
        match self {
            Aggregator::Count | Aggregator::CountDistinct => DataType::Int,
            Aggregator::Avg | Aggregator::Sum => DataType::Float,
            Aggregator::Max | Aggregator::Min => field_type,
        }
    }

    pub fn accepts(self, field_type: DataType) -> bool {
        match self {
            Aggregator::Count | Aggregator::CountDistinct => true,
            Aggregator::Avg | Aggregator::Sum => {
                matches!(field_type, DataType::Int | DataType::Float)
            }
            Aggregator::Max | Aggregator::Min => {
                !matches!(field_type, DataType::Bool | DataType::Unknown)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Lower,
    LowerOrEqual,
    IsInList,
    IsNotInList,
    StringStartsWith,
    StringEndsWith,
    StringContains,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    None,
    Single(Value),
    List(Vec<Value>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field_name: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(
        field_name: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            value: FilterValue::Single(value.into()),
        }
    }

    pub fn in_list(field_name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field_name: field_name.into(),
            operator: FilterOperator::IsInList,
            value: FilterValue::List(values),
        }
    }

    pub fn not_in_list(field_name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field_name: field_name.into(),
            operator: FilterOperator::IsNotInList,
            value: FilterValue::List(values),
        }
    }

    pub fn unary(field_name: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field_name: field_name.into(),
            operator,
            value: FilterValue::None,
        }
    }

    /// Checks the operand shape against the operator and the column type.
    pub fn validate(&self, field_type: DataType) -> LedgerResult<()> {
        let shape_ok = match (self.operator, &self.value) {
            (FilterOperator::IsEmpty | FilterOperator::IsNotEmpty, FilterValue::None) => true,
            (FilterOperator::IsInList | FilterOperator::IsNotInList, FilterValue::List(values)) => {
                values.iter().all(|value| compatible(value, field_type))
            }
            (
                FilterOperator::StringStartsWith
                | FilterOperator::StringEndsWith
                | FilterOperator::StringContains,
                FilterValue::Single(Value::String(_)),
            ) => field_type == DataType::String,
            (
                FilterOperator::Equal
                | FilterOperator::NotEqual
                | FilterOperator::Greater
                | FilterOperator::GreaterOrEqual
                | FilterOperator::Lower
                | FilterOperator::LowerOrEqual,
                FilterValue::Single(value),
            ) => compatible(value, field_type),
            _ => false,
        };
        if shape_ok {
            Ok(())
        } else {
            Err(LedgerError::validation(format!(
                "filter {:?} on '{}' ({field_type}) has an incompatible operand",
                self.operator, self.field_name
            )))
        }
    }
}

fn compatible(value: &Value, field_type: DataType) -> bool {
    value.clone().coerce_to(field_type).is_some()
}
