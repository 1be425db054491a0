use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use cotiza_core::domain::client::{Client, ClientId};

use super::{ClientRepository, RepositoryError};
use crate::DbPool;

pub struct SqlClientRepository {
    pool: DbPool,
}

impl SqlClientRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ClientRepository for SqlClientRepository {
    async fn find_by_id(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        find_client(&mut conn, id).await
    }

    async fn save(&self, client: Client) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO client (id, name, email, phone, address, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                phone = excluded.phone,
                address = excluded.address,
                active = excluded.active",
        )
        .bind(&client.id.0)
        .bind(&client.name)
        .bind(client.email.as_deref())
        .bind(client.phone.as_deref())
        .bind(client.address.as_deref())
        .bind(client.active)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) async fn find_client(
    conn: &mut SqliteConnection,
    id: &ClientId,
) -> Result<Option<Client>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, name, email, phone, address, active
         FROM client
         WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(client_from_row).transpose()
}

fn client_from_row(row: &SqliteRow) -> Result<Client, RepositoryError> {
    Ok(Client {
        id: ClientId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        active: row.try_get("active")?,
    })
}
