use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use cotiza_core::cpq::inventory::{MovementKind, StockMovement};
use cotiza_core::domain::product::{Product, ProductId};
use cotiza_core::domain::quote::QuoteId;

use super::{format_decimal, parse_decimal, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_product(&mut conn, id).await
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (id, name, base_price, tax_rate, unit, stock, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_price = excluded.base_price,
                tax_rate = excluded.tax_rate,
                unit = excluded.unit,
                stock = excluded.stock,
                active = excluded.active",
        )
        .bind(&product.id.0)
        .bind(&product.name)
        .bind(format_decimal(product.base_price))
        .bind(format_decimal(product.tax_rate))
        .bind(&product.unit)
        .bind(product.stock)
        .bind(product.active)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, base_price, tax_rate, unit, stock, active
             FROM product
             WHERE active = 1
             ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }
}

pub(crate) async fn find_product(
    conn: &mut SqliteConnection,
    id: &ProductId,
) -> Result<Option<Product>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, name, base_price, tax_rate, unit, stock, active
         FROM product
         WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(product_from_row).transpose()
}

/// Current stock, `None` when the product does not track inventory or no
/// longer exists.
pub(crate) async fn stock_of(
    conn: &mut SqliteConnection,
    id: &ProductId,
) -> Result<Option<i64>, RepositoryError> {
    let stock: Option<Option<i64>> = sqlx::query_scalar("SELECT stock FROM product WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(stock.flatten())
}

/// Atomic conditional decrement. `false` means the row no longer holds enough
/// stock, i.e. a concurrent approval got there first.
pub(crate) async fn deduct_stock(
    conn: &mut SqliteConnection,
    id: &ProductId,
    quantity: i64,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE product
         SET stock = stock - ?
         WHERE id = ? AND stock IS NOT NULL AND stock >= ?",
    )
    .bind(quantity)
    .bind(&id.0)
    .bind(quantity)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn restore_stock(
    conn: &mut SqliteConnection,
    id: &ProductId,
    quantity: i64,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE product
         SET stock = stock + ?
         WHERE id = ? AND stock IS NOT NULL",
    )
    .bind(quantity)
    .bind(&id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn record_deductions(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
    movements: &[StockMovement],
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    for movement in movements {
        sqlx::query(
            "INSERT INTO stock_deduction (quote_id, product_id, quantity, deducted_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&quote_id.0)
        .bind(&movement.product_id.0)
        .bind(movement.quantity)
        .bind(now.to_rfc3339())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Deductions of `quote_id` not yet given back, in the order they were taken.
pub(crate) async fn outstanding_deductions(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
) -> Result<Vec<StockMovement>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT d.product_id, p.name AS product_name, d.quantity
         FROM stock_deduction d
         JOIN product p ON p.id = d.product_id
         WHERE d.quote_id = ? AND d.restored_at IS NULL
         ORDER BY d.rowid ASC",
    )
    .bind(&quote_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(StockMovement {
                product_id: ProductId(row.try_get("product_id")?),
                product_name: row.try_get("product_name")?,
                quantity: row.try_get("quantity")?,
                kind: MovementKind::Deduct,
            })
        })
        .collect()
}

pub(crate) async fn mark_deductions_restored(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
    now: DateTime<Utc>,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(
        "UPDATE stock_deduction SET restored_at = ? WHERE quote_id = ? AND restored_at IS NULL",
    )
    .bind(now.to_rfc3339())
    .bind(&quote_id.0)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn product_from_row(row: &SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        name: row.try_get("name")?,
        base_price: parse_decimal("base_price", &row.try_get::<String, _>("base_price")?)?,
        tax_rate: parse_decimal("tax_rate", &row.try_get::<String, _>("tax_rate")?)?,
        unit: row.try_get("unit")?,
        stock: row.try_get("stock")?,
        active: row.try_get("active")?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use cotiza_core::domain::product::{Product, ProductId};

    use super::{deduct_stock, restore_stock, stock_of, SqlProductRepository};
    use crate::repositories::ProductRepository;
    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    fn product(id: &str, stock: Option<i64>) -> Product {
        Product {
            id: ProductId(id.to_owned()),
            name: format!("{id} name"),
            base_price: Decimal::new(1_999, 2),
            tax_rate: Decimal::new(1_600, 2),
            unit: "unit".to_owned(),
            stock,
            active: true,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trip_keeps_null_stock() {
        let pool = pool().await;
        let repo = SqlProductRepository::new(pool.clone());
        repo.save(product("svc", None)).await.expect("save");

        let found = repo.find_by_id(&ProductId("svc".to_owned())).await.expect("find");
        let found = found.expect("product exists");
        assert_eq!(found.stock, None);
        assert_eq!(found.tax_rate, Decimal::new(1_600, 2));
        assert_eq!(repo.list_active().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn conditional_decrement_never_overdraws() {
        let pool = pool().await;
        let repo = SqlProductRepository::new(pool.clone());
        repo.save(product("box", Some(5))).await.expect("save");
        let id = ProductId("box".to_owned());
        let mut conn = pool.acquire().await.expect("conn");

        assert!(!deduct_stock(&mut conn, &id, 6).await.expect("short"));
        assert_eq!(stock_of(&mut conn, &id).await.expect("stock"), Some(5));

        assert!(deduct_stock(&mut conn, &id, 5).await.expect("exact"));
        assert_eq!(stock_of(&mut conn, &id).await.expect("stock"), Some(0));

        assert!(restore_stock(&mut conn, &id, 5).await.expect("restore"));
        assert_eq!(stock_of(&mut conn, &id).await.expect("stock"), Some(5));
    }

    #[tokio::test]
    async fn untracked_stock_is_never_mutated() {
        let pool = pool().await;
        let repo = SqlProductRepository::new(pool.clone());
        repo.save(product("svc", None)).await.expect("save");
        let id = ProductId("svc".to_owned());
        let mut conn = pool.acquire().await.expect("conn");

        assert!(!deduct_stock(&mut conn, &id, 1).await.expect("deduct"));
        assert!(!restore_stock(&mut conn, &id, 1).await.expect("restore"));
        assert_eq!(stock_of(&mut conn, &id).await.expect("stock"), None);
    }
}
