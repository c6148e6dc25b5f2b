use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AutoroleConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AutoroleConfigs::GuildId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AutoroleConfigs::Enabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AutoroleConfigs::Invites)
                            .json_binary()
                            .not_null()
                            .default(Expr::value("[]")),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AutoroleConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AutoroleConfigs {
    Table,
    GuildId,
    Enabled,
    Invites,
}
