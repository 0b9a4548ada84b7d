use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, Statement};

use crate::db::{DataModelEnumValues, LedgerSchemaVersion, build_stmt, id_col};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(LedgerSchemaVersion::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LedgerSchemaVersion::Version)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LedgerSchemaVersion::Checksum)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerSchemaVersion::AppliedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DataModelEnumValues::Table)
                    .if_not_exists()
                    .col(id_col(backend, DataModelEnumValues::Id, false))
                    .col(id_col(backend, DataModelEnumValues::FieldId, false))
                    .col(ColumnDef::new(DataModelEnumValues::TextValue).text().null())
                    .col(ColumnDef::new(DataModelEnumValues::FloatValue).double().null())
                    .col(
                        ColumnDef::new(DataModelEnumValues::LastSeen)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_data_model_enum_values")
                            .col(DataModelEnumValues::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Targets of the dictionary upserts' ON CONFLICT clauses.
        manager
            .create_index(
                Index::create()
                    .name("data_model_enum_values_text_uidx")
                    .table(DataModelEnumValues::Table)
                    .col(DataModelEnumValues::FieldId)
                    .col(DataModelEnumValues::TextValue)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("data_model_enum_values_float_uidx")
                    .table(DataModelEnumValues::Table)
                    .col(DataModelEnumValues::FieldId)
                    .col(DataModelEnumValues::FloatValue)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        let checksum = blake3::hash(self.name().as_bytes()).to_hex().to_string();
        let insert = Query::insert()
            .into_table(LedgerSchemaVersion::Table)
            .columns([LedgerSchemaVersion::Version, LedgerSchemaVersion::Checksum])
            .values_panic([self.name().to_string().into(), checksum.into()])
            .to_owned();
        let (sql, values) = build_stmt(backend, &insert);
        manager
            .get_connection()
            .execute_raw(Statement::from_sql_and_values(backend, sql, values))
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(DataModelEnumValues::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(LedgerSchemaVersion::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
