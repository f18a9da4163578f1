//! Per (establishment, emission point) sequential counter.
//!
//! The counter row is the lock: allocation is a single upsert, so two
//! writers on the same key serialize on that row while other keys proceed.
//! The stored value never drops below the highest sequential already issued,
//! which keeps the counter consistent with invoices imported or inserted
//! without it.

use sea_orm::{ConnectionTrait, QuerySelect, Statement, entity::prelude::*};

use crate::{
    EngineError, ResultEngine,
    access_key::{MAX_SEQUENTIAL, require_digits},
    invoice,
};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "invoice_sequences")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub establishment: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub emission_point: String,
    pub last_sequential: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

const ALLOCATE_SQL: &str = "INSERT INTO invoice_sequences (establishment, emission_point, last_sequential) \
     VALUES (?, ?, (SELECT COALESCE(MAX(sequential), 0) + 1 FROM electronic_invoices \
                    WHERE establishment = ? AND emission_point = ?)) \
     ON CONFLICT (establishment, emission_point) DO UPDATE SET last_sequential = \
       MAX(invoice_sequences.last_sequential, \
           (SELECT COALESCE(MAX(sequential), 0) FROM electronic_invoices \
            WHERE establishment = excluded.establishment \
              AND emission_point = excluded.emission_point)) + 1 \
     RETURNING last_sequential";

pub(crate) fn validate_key(establishment: &str, emission_point: &str) -> ResultEngine<()> {
    require_digits("establishment", establishment, 3)?;
    require_digits("emission point", emission_point, 3)
}

/// Reserves the next sequential for the key on `conn`.
///
/// Call it inside the transaction that inserts the invoice, so a failed
/// generation gives the number back on rollback.
pub(crate) async fn allocate<C: ConnectionTrait>(
    conn: &C,
    establishment: &str,
    emission_point: &str,
) -> ResultEngine<i64> {
    validate_key(establishment, emission_point)?;
    let backend = conn.get_database_backend();
    let row = conn
        .query_one(Statement::from_sql_and_values(
            backend,
            ALLOCATE_SQL,
            vec![
                establishment.into(),
                emission_point.into(),
                establishment.into(),
                emission_point.into(),
            ],
        ))
        .await?
        .ok_or_else(|| EngineError::Storage("sequence upsert returned no row".to_string()))?;
    let next: i64 = row.try_get("", "last_sequential")?;
    if next > MAX_SEQUENTIAL {
        return Err(EngineError::Validation(format!(
            "sequential range exhausted for {establishment}-{emission_point}"
        )));
    }
    Ok(next)
}

/// Highest sequential reserved or issued for the key, `0` if none.
pub(crate) async fn last<C: ConnectionTrait>(
    conn: &C,
    establishment: &str,
    emission_point: &str,
) -> ResultEngine<i64> {
    validate_key(establishment, emission_point)?;
    let reserved = Entity::find_by_id((establishment.to_string(), emission_point.to_string()))
        .one(conn)
        .await?
        .map_or(0, |counter| counter.last_sequential);
    let issued = invoice::Entity::find()
        .select_only()
        .column_as(invoice::Column::Sequential.max(), "max_sequential")
        .filter(invoice::Column::Establishment.eq(establishment))
        .filter(invoice::Column::EmissionPoint.eq(emission_point))
        .into_tuple::<Option<i64>>()
        .one(conn)
        .await?
        .flatten()
        .unwrap_or(0);
    Ok(reserved.max(issued))
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::MigratorTrait;
    use sea_orm::{Database, DatabaseConnection, TransactionTrait};

    async fn db() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        migration::Migrator::up(&db, None).await.unwrap();
        db
    }

    #[tokio::test]
    async fn allocation_counts_per_key() {
        let db = db().await;
        assert_eq!(allocate(&db, "001", "001").await.unwrap(), 1);
        assert_eq!(allocate(&db, "001", "001").await.unwrap(), 2);
        assert_eq!(allocate(&db, "001", "002").await.unwrap(), 1);
        assert_eq!(last(&db, "001", "001").await.unwrap(), 2);
        assert_eq!(last(&db, "002", "001").await.unwrap(), 0);

        let counter = Entity::find_by_id(("001".to_string(), "002".to_string()))
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.last_sequential, 1);
    }

    #[tokio::test]
    async fn rolled_back_allocation_is_given_back() {
        let db = db().await;
        let tx = db.begin().await.unwrap();
        assert_eq!(allocate(&tx, "001", "001").await.unwrap(), 1);
        tx.rollback().await.unwrap();

        assert_eq!(last(&db, "001", "001").await.unwrap(), 0);
        assert_eq!(allocate(&db, "001", "001").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_key_is_rejected() {
        let db = db().await;
        assert!(matches!(
            allocate(&db, "01", "001").await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            last(&db, "001", "1a1").await,
            Err(EngineError::Validation(_))
        ));
    }
}
