use serde::Serialize;
use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Demo directory rows shipped in `config/fixtures/seed_data.sql`.
const SEED_CLIENTS: &[SeedClient] = &[
    SeedClient { id: "client-acme", active: true },
    SeedClient { id: "client-globex", active: true },
    SeedClient { id: "client-initech", active: false },
];

const SEED_PRODUCTS: &[SeedProduct] = &[
    SeedProduct { id: "prod-laptop", active: true, tracks_stock: true },
    SeedProduct { id: "prod-monitor", active: true, tracks_stock: true },
    SeedProduct { id: "prod-cable", active: true, tracks_stock: true },
    SeedProduct { id: "prod-install", active: true, tracks_stock: false },
    SeedProduct { id: "prod-fax", active: false, tracks_stock: true },
];

/// Idempotent demo clients and products for local runs and the CLI smoke check.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_data.sql");

    /// `INSERT OR IGNORE` throughout, so loading twice changes nothing and
    /// never resets stock that approvals already consumed.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            clients: SEED_CLIENTS.iter().map(|client| client.id).collect(),
            products: SEED_PRODUCTS.iter().map(|product| product.id).collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for client in SEED_CLIENTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM client WHERE id = ?1 AND active = ?2)",
            )
            .bind(client.id)
            .bind(client.active)
            .fetch_one(pool)
            .await?;
            checks.push((client.id, present == 1));
        }

        for product in SEED_PRODUCTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM product
                    WHERE id = ?1 AND active = ?2 AND (stock IS NOT NULL) = ?3
                 )",
            )
            .bind(product.id)
            .bind(product.active)
            .bind(product.tracks_stock)
            .fetch_one(pool)
            .await?;
            checks.push((product.id, present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the demo rows together with any quote raised against a demo
    /// client.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let clients = sql_array_from_ids(SEED_CLIENTS.iter().map(|client| client.id));
        let products = sql_array_from_ids(SEED_PRODUCTS.iter().map(|product| product.id));

        let mut tx = pool.begin().await?;
        sqlx::query(&format!(
            "DELETE FROM audit_event
             WHERE quote_id IN (SELECT id FROM quote WHERE client_id IN {clients})"
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("DELETE FROM quote WHERE client_id IN {clients}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM stock_deduction WHERE product_id IN {products}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM product WHERE id IN {products}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM client WHERE id IN {clients}"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedClient {
    id: &'static str,
    active: bool,
}

#[derive(Debug, Clone, Copy)]
struct SeedProduct {
    id: &'static str,
    active: bool,
    tracks_stock: bool,
}

fn sql_array_from_ids<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    let quoted = ids.map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug, Serialize)]
pub struct SeedResult {
    pub clients: Vec<&'static str>,
    pub products: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::SeedDataset;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_not_empty() {
        assert!(SeedDataset::SQL.contains("INSERT OR IGNORE INTO product"));
    }

    #[tokio::test]
    async fn seed_loads_idempotently_and_cleans_up() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = SeedDataset::load(&pool).await.expect("load");
        assert_eq!(first.clients.len(), 3);
        assert_eq!(first.products.len(), 5);
        let first_check = SeedDataset::verify(&pool).await.expect("verify");
        assert!(first_check.all_present, "{:?}", first_check.checks);

        sqlx::query("UPDATE product SET stock = 1 WHERE id = 'prod-monitor'")
            .execute(&pool)
            .await
            .expect("consume stock");
        SeedDataset::load(&pool).await.expect("reload");
        let stock: Option<i64> =
            sqlx::query_scalar("SELECT stock FROM product WHERE id = 'prod-monitor'")
                .fetch_one(&pool)
                .await
                .expect("stock");
        assert_eq!(stock, Some(1));

        SeedDataset::clean(&pool).await.expect("clean");
        let verification = SeedDataset::verify(&pool).await.expect("verify after clean");
        assert!(verification.checks.iter().all(|(_, present)| !present));
    }
}
