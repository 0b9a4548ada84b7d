//! Read path over versioned tables: field reads along link paths, filtered
//! aggregates and bulk scans. Every table touched contributes only its
//! currently valid rows.

use std::collections::BTreeMap;

use log::debug;
use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{
    Alias, Cond, Expr, ExprTrait, Func, JoinType, LikeExpr, Order, Query, Value as SeaValue,
};

use crate::db::{
    ObjectColumns, PhysicalTable, is_current, is_current_in, query_all, query_one, read_value,
    value_to_sea,
};
use vigil_ledger_core::{
    Aggregator, ClientObject, ClientPayload, DataModel, DataType, DatabaseSchema, Filter,
    FilterOperator, FilterValue, LedgerError, LedgerResult, LinkToSingle, Table, Value,
};

const VALUE_ALIAS: &str = "value";

fn table_alias(position: usize) -> Alias {
    Alias::new(format!("t{position}"))
}

/// Reads `field_name` on the table reached by following `path` from the
/// payload's own table. The join chain is built from the data model, so an
/// unknown link, table or field is a model inconsistency rather than missing
/// data; a chain that matches no current row is `NotFound`.
pub async fn get_db_field<C>(
    conn: &C,
    schema: &DatabaseSchema,
    data_model: &DataModel,
    payload: &dyn ClientPayload,
    path: &[String],
    field_name: &str,
) -> LedgerResult<Option<Value>>
where
    C: ConnectionTrait,
{
    let base_id = payload.object_id()?;
    let trigger = data_model.table(payload.table_name())?;

    let mut hops: Vec<(&LinkToSingle, &Table)> = Vec::with_capacity(path.len());
    let mut current = trigger;
    for link_name in path {
        let link = current.link(link_name)?;
        current.field(&link.child_field_name)?;
        let parent = data_model.table(&link.parent_table_name)?;
        parent.field(&link.parent_field_name)?;
        hops.push((link, parent));
        current = parent;
    }
    let field = current.field(field_name)?;

    let backend = conn.get_database_backend();
    let mut select = Query::select();
    select
        .expr_as(
            Expr::col((table_alias(hops.len()), Alias::new(field.name.as_str()))),
            Alias::new(VALUE_ALIAS),
        )
        .from_as(
            PhysicalTable::resolve(backend, schema, &trigger.name).table_ref(),
            table_alias(0),
        );
    for (position, (link, parent)) in hops.iter().enumerate() {
        let child = table_alias(position);
        let next = table_alias(position + 1);
        select.join_as(
            JoinType::InnerJoin,
            PhysicalTable::resolve(backend, schema, &parent.name).table_ref(),
            next.clone(),
            Expr::col((child, Alias::new(link.child_field_name.as_str())))
                .equals((next, Alias::new(link.parent_field_name.as_str()))),
        );
    }
    select.and_where(Expr::col((table_alias(0), ObjectColumns::ObjectId)).eq(base_id.as_str()));
    for position in 0..=hops.len() {
        select.and_where(is_current_in(&format!("t{position}")));
    }
    select.limit(1);

    match query_one(conn, &select).await? {
        Some(row) => read_value(&row, VALUE_ALIAS, field.data_type),
        None => {
            debug!(
                "resolver: no current row for '{base_id}' along {path:?} to '{field_name}'"
            );
            Err(LedgerError::not_found(format!(
                "no current row for object '{base_id}' of '{}' along path {path:?}",
                trigger.name
            )))
        }
    }
}

pub async fn aggregate<C>(
    conn: &C,
    schema: &DatabaseSchema,
    table: &Table,
    field_name: &str,
    aggregator: Aggregator,
    filters: &[Filter],
) -> LedgerResult<Option<Value>>
where
    C: ConnectionTrait,
{
    let field = table.field(field_name)?;
    if !aggregator.accepts(field.data_type) {
        return Err(LedgerError::validation(format!(
            "{aggregator:?} cannot aggregate '{}' of type {}",
            field.name, field.data_type
        )));
    }

    let column = Expr::col(Alias::new(field.name.as_str()));
    let double = || Alias::new("DOUBLE PRECISION");
    let expr: Expr = match aggregator {
        Aggregator::Count => Func::count(column).into(),
        Aggregator::CountDistinct => Func::count_distinct(column).into(),
        Aggregator::Max => Func::max(column).into(),
        Aggregator::Min => Func::min(column).into(),
        Aggregator::Avg => Func::cast_as(Func::avg(column), double()).into(),
        Aggregator::Sum => Func::cast_as(Func::sum(column), double()).into(),
    };

    let mut condition = Cond::all().add(is_current());
    for filter in filters {
        let filter_field = table.field(&filter.field_name)?;
        filter.validate(filter_field.data_type)?;
        condition = condition.add(filter_condition(filter, filter_field.data_type));
    }

    let backend = conn.get_database_backend();
    let select = Query::select()
        .expr_as(expr, Alias::new(VALUE_ALIAS))
        .from(PhysicalTable::resolve(backend, schema, &table.name).table_ref())
        .cond_where(condition)
        .to_owned();

    let row = query_one(conn, &select).await?;
    let result_type = aggregator.result_type(field.data_type);
    match (row, aggregator) {
        (Some(row), Aggregator::Count | Aggregator::CountDistinct) => {
            let count: Option<i64> = row.try_get("", VALUE_ALIAS)?;
            Ok(Some(Value::Int(count.unwrap_or(0))))
        }
        (Some(row), _) => read_value(&row, VALUE_ALIAS, result_type),
        (None, Aggregator::Count | Aggregator::CountDistinct) => Ok(Some(Value::Int(0))),
        (None, _) => Ok(None),
    }
}

/// Operand values are bound after coercion to the column type, so an integer
/// compared against a float column binds as a float.
fn bind(value: &Value, data_type: DataType) -> SeaValue {
    match value.clone().coerce_to(data_type) {
        Some(coerced) => value_to_sea(&coerced),
        None => value_to_sea(value),
    }
}

/// `!` rather than a backslash: it needs no quoting in any backend's literals.
const LIKE_ESCAPE: char = '!';

fn like_pattern(prefix: &str, text: &str, suffix: &str) -> LikeExpr {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    LikeExpr::new(format!("{prefix}{escaped}{suffix}")).escape(LIKE_ESCAPE)
}

fn filter_condition(filter: &Filter, data_type: DataType) -> Cond {
    let column = || Expr::col(Alias::new(filter.field_name.as_str()));
    let single = match &filter.value {
        FilterValue::Single(value) => Some(value),
        _ => None,
    };
    let list: Vec<SeaValue> = match &filter.value {
        FilterValue::List(values) => values.iter().map(|value| bind(value, data_type)).collect(),
        _ => Vec::new(),
    };
    let text = single.and_then(Value::as_str).unwrap_or_default();

    match filter.operator {
        FilterOperator::IsEmpty => {
            let mut cond = Cond::any().add(column().is_null());
            if data_type == DataType::String {
                cond = cond.add(column().eq(""));
            }
            cond
        }
        FilterOperator::IsNotEmpty => {
            let mut cond = Cond::all().add(column().is_not_null());
            if data_type == DataType::String {
                cond = cond.add(column().ne(""));
            }
            cond
        }
        FilterOperator::IsInList => Cond::all().add(column().is_in(list)),
        FilterOperator::IsNotInList => Cond::all().add(column().is_not_in(list)),
        FilterOperator::StringStartsWith => {
            Cond::all().add(column().like(like_pattern("", text, "%")))
        }
        FilterOperator::StringEndsWith => {
            Cond::all().add(column().like(like_pattern("%", text, "")))
        }
        FilterOperator::StringContains => {
            Cond::all().add(column().like(like_pattern("%", text, "%")))
        }
        comparison => {
            let Some(value) = single else {
                return Cond::all();
            };
            let operand = bind(value, data_type);
            let expr = match comparison {
                FilterOperator::NotEqual => column().ne(operand),
                FilterOperator::Greater => column().gt(operand),
                FilterOperator::GreaterOrEqual => column().gte(operand),
                FilterOperator::Lower => column().lt(operand),
                FilterOperator::LowerOrEqual => column().lte(operand),
                _ => column().eq(operand),
            };
            Cond::all().add(expr)
        }
    }
}

/// Every currently valid row of `table`, ordered by object id.
pub async fn list_all_objects<C>(
    conn: &C,
    schema: &DatabaseSchema,
    table: &Table,
) -> LedgerResult<Vec<ClientObject>>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let select = Query::select()
        .columns(table.fields.keys().map(|name| Alias::new(name.as_str())))
        .from(PhysicalTable::resolve(backend, schema, &table.name).table_ref())
        .and_where(is_current())
        .order_by(ObjectColumns::ObjectId, Order::Asc)
        .to_owned();
    let rows = query_all(conn, &select).await?;

    let mut objects = Vec::with_capacity(rows.len());
    for row in rows {
        let mut data = BTreeMap::new();
        for field in table.fields.values() {
            data.insert(field.name.clone(), read_value(&row, &field.name, field.data_type)?);
        }
        objects.push(ClientObject {
            table_name: table.name.clone(),
            data,
        });
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use sea_orm::sea_query::{Alias, Query, SqliteQueryBuilder, Value as SeaValue};

    use super::{bind, filter_condition};
    use vigil_ledger_core::{DataType, Filter, FilterOperator, Value};

    fn render(filter: &Filter, data_type: DataType) -> String {
        Query::select()
            .column(Alias::new("amount"))
            .from(Alias::new("t"))
            .cond_where(filter_condition(filter, data_type))
            .to_string(SqliteQueryBuilder)
    }

    #[test]
    fn like_filters_use_an_escape_character() {
        let filter = Filter::new("name", FilterOperator::StringStartsWith, "50%_off!");
        let sql = render(&filter, DataType::String);
        assert!(sql.contains("'50!%!_off!!%'"), "{sql}");
        assert!(sql.contains("ESCAPE '!'"), "{sql}");
    }

    #[test]
    fn integer_operands_bind_as_floats_on_float_columns() {
        assert_eq!(bind(&Value::Int(10), DataType::Float), SeaValue::Double(Some(10.0)));
        assert_eq!(bind(&Value::Int(10), DataType::Int), SeaValue::BigInt(Some(10)));
    }

    #[test]
    fn empty_string_counts_as_empty() {
        let filter = Filter::unary("name", FilterOperator::IsEmpty);
        let sql = render(&filter, DataType::String);
        assert!(sql.contains("IS NULL"), "{sql}");
        assert!(sql.contains("= ''"), "{sql}");
        let sql = render(&Filter::unary("amount", FilterOperator::IsEmpty), DataType::Float);
        assert!(!sql.contains("= ''"), "{sql}");
    }

    #[test]
    fn list_filters_render_in_clauses() {
        let filter = Filter::in_list("name", vec![Value::from("a"), Value::from("b")]);
        let sql = render(&filter, DataType::String);
        assert!(sql.contains("IN ('a', 'b')"), "{sql}");
    }
}
