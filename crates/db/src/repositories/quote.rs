use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use cotiza_core::domain::client::ClientId;
use cotiza_core::domain::product::ProductId;
use cotiza_core::domain::quote::{Quote, QuoteId, QuoteLine, QuoteNumber, QuoteStatus};

use super::{
    format_date, format_decimal, parse_date, parse_decimal, parse_status, parse_timestamp,
    parse_u32, RepositoryError,
};

const QUOTE_COLUMNS: &str = "id, quote_number, client_id, quote_date, valid_until, notes,
    discount_percent, subtotal, discount_amount, tax_amount, total_amount, status,
    created_at, updated_at";

const LINE_COLUMNS: &str = "line_number, product_id, product_name, quantity, unit_price,
    discount_percent, tax_rate, line_subtotal, discount_amount, line_total, tax_amount,
    line_total_with_tax";

/// Listing row joined with the client name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuoteSummary {
    pub id: QuoteId,
    pub quote_number: QuoteNumber,
    pub client_id: ClientId,
    pub client_name: String,
    pub quote_date: NaiveDate,
    pub valid_until: NaiveDate,
    pub total_amount: Decimal,
    pub status: QuoteStatus,
    pub line_count: u32,
}

pub(crate) async fn insert_quote(
    conn: &mut SqliteConnection,
    quote: &Quote,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quote (
            id, quote_number, client_id, quote_date, valid_until, notes,
            discount_percent, subtotal, discount_amount, tax_amount, total_amount, status,
            created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&quote.id.0)
    .bind(quote.quote_number.to_string())
    .bind(&quote.client_id.0)
    .bind(format_date(quote.quote_date))
    .bind(format_date(quote.valid_until))
    .bind(quote.notes.as_deref())
    .bind(format_decimal(quote.discount_percent))
    .bind(format_decimal(quote.subtotal))
    .bind(format_decimal(quote.discount_amount))
    .bind(format_decimal(quote.tax_amount))
    .bind(format_decimal(quote.total_amount))
    .bind(i64::from(quote.status.code()))
    .bind(quote.created_at.to_rfc3339())
    .bind(quote.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn insert_lines(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
    lines: &[QuoteLine],
) -> Result<(), RepositoryError> {
    for line in lines {
        sqlx::query(
            "INSERT INTO quote_line (
                quote_id, line_number, product_id, product_name, quantity, unit_price,
                discount_percent, tax_rate, line_subtotal, discount_amount, line_total,
                tax_amount, line_total_with_tax
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&quote_id.0)
        .bind(i64::from(line.line_number))
        .bind(&line.product_id.0)
        .bind(&line.product_name)
        .bind(i64::from(line.quantity))
        .bind(format_decimal(line.unit_price))
        .bind(format_decimal(line.discount_percent))
        .bind(format_decimal(line.tax_rate))
        .bind(format_decimal(line.line_subtotal))
        .bind(format_decimal(line.discount_amount))
        .bind(format_decimal(line.line_total))
        .bind(format_decimal(line.tax_amount))
        .bind(format_decimal(line.line_total_with_tax))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub(crate) async fn delete_lines(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query("DELETE FROM quote_line WHERE quote_id = ?")
        .bind(&quote_id.0)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

/// Rewrites header fields and totals, guarded by the status the caller read.
/// `false` means another writer moved the quote in between.
pub(crate) async fn update_header(
    conn: &mut SqliteConnection,
    quote: &Quote,
    expected_status: QuoteStatus,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE quote
         SET client_id = ?, valid_until = ?, notes = ?, discount_percent = ?,
             subtotal = ?, discount_amount = ?, tax_amount = ?, total_amount = ?,
             updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(&quote.client_id.0)
    .bind(format_date(quote.valid_until))
    .bind(quote.notes.as_deref())
    .bind(format_decimal(quote.discount_percent))
    .bind(format_decimal(quote.subtotal))
    .bind(format_decimal(quote.discount_amount))
    .bind(format_decimal(quote.tax_amount))
    .bind(format_decimal(quote.total_amount))
    .bind(quote.updated_at.to_rfc3339())
    .bind(&quote.id.0)
    .bind(i64::from(expected_status.code()))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn compare_and_set_status(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
    from: QuoteStatus,
    to: QuoteStatus,
    now: DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE quote
         SET status = ?, updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(i64::from(to.code()))
    .bind(now.to_rfc3339())
    .bind(&quote_id.0)
    .bind(i64::from(from.code()))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub(crate) async fn load_status(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
) -> Result<Option<QuoteStatus>, RepositoryError> {
    let code: Option<i64> = sqlx::query_scalar("SELECT status FROM quote WHERE id = ?")
        .bind(&quote_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    code.map(parse_status).transpose()
}

pub(crate) async fn load_quote(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
) -> Result<Option<Quote>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quote WHERE id = ?"))
        .bind(&quote_id.0)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut quote = quote_from_row(&row)?;
    quote.lines = load_lines(conn, quote_id).await?;
    Ok(Some(quote))
}

pub(crate) async fn load_lines(
    conn: &mut SqliteConnection,
    quote_id: &QuoteId,
) -> Result<Vec<QuoteLine>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM quote_line WHERE quote_id = ? ORDER BY line_number ASC"
    ))
    .bind(&quote_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(line_from_row).collect()
}

/// Every quote number issued for `year`, fed to `QuoteNumber::next_for_year`.
pub(crate) async fn numbers_for_year(
    conn: &mut SqliteConnection,
    year: i32,
) -> Result<Vec<String>, RepositoryError> {
    let pattern = format!("{}%", QuoteNumber::year_prefix(year));
    let numbers = sqlx::query_scalar("SELECT quote_number FROM quote WHERE quote_number LIKE ?")
        .bind(pattern)
        .fetch_all(&mut *conn)
        .await?;

    Ok(numbers)
}

/// Quotes in one of `statuses` whose validity date is strictly before `today`.
pub(crate) async fn due_for_expiry(
    conn: &mut SqliteConnection,
    statuses: &[QuoteStatus],
    today: NaiveDate,
) -> Result<Vec<(QuoteId, QuoteStatus)>, RepositoryError> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT id, status
         FROM quote
         WHERE status IN ({placeholders}) AND valid_until < ?
         ORDER BY valid_until ASC, quote_number ASC"
    );
    let mut query = sqlx::query(&sql);
    for status in statuses {
        query = query.bind(i64::from(status.code()));
    }
    let rows = query.bind(format_date(today)).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| {
            Ok((QuoteId(row.try_get("id")?), parse_status(row.try_get::<i64, _>("status")?)?))
        })
        .collect()
}

pub(crate) async fn list_summaries(
    conn: &mut SqliteConnection,
    status: Option<QuoteStatus>,
) -> Result<Vec<QuoteSummary>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT q.id, q.quote_number, q.client_id, c.name AS client_name, q.quote_date,
                q.valid_until, q.total_amount, q.status,
                (SELECT COUNT(*) FROM quote_line l WHERE l.quote_id = q.id) AS line_count
         FROM quote q
         JOIN client c ON c.id = q.client_id
         WHERE (? IS NULL OR q.status = ?)
         ORDER BY q.quote_date DESC, q.quote_number DESC",
    )
    .bind(status.map(|status| i64::from(status.code())))
    .bind(status.map(|status| i64::from(status.code())))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(QuoteSummary {
                id: QuoteId(row.try_get("id")?),
                quote_number: parse_number(&row.try_get::<String, _>("quote_number")?)?,
                client_id: ClientId(row.try_get("client_id")?),
                client_name: row.try_get("client_name")?,
                quote_date: parse_date("quote_date", &row.try_get::<String, _>("quote_date")?)?,
                valid_until: parse_date(
                    "valid_until",
                    &row.try_get::<String, _>("valid_until")?,
                )?,
                total_amount: parse_decimal(
                    "total_amount",
                    &row.try_get::<String, _>("total_amount")?,
                )?,
                status: parse_status(row.try_get::<i64, _>("status")?)?,
                line_count: parse_u32("line_count", row.try_get::<i64, _>("line_count")?)?,
            })
        })
        .collect()
}

fn parse_number(value: &str) -> Result<QuoteNumber, RepositoryError> {
    value.parse::<QuoteNumber>().map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, RepositoryError> {
    parse_decimal(column, &row.try_get::<String, _>(column)?)
}

fn quote_from_row(row: &SqliteRow) -> Result<Quote, RepositoryError> {
    Ok(Quote {
        id: QuoteId(row.try_get("id")?),
        quote_number: parse_number(&row.try_get::<String, _>("quote_number")?)?,
        client_id: ClientId(row.try_get("client_id")?),
        quote_date: parse_date("quote_date", &row.try_get::<String, _>("quote_date")?)?,
        valid_until: parse_date("valid_until", &row.try_get::<String, _>("valid_until")?)?,
        notes: row.try_get("notes")?,
        discount_percent: decimal_column(row, "discount_percent")?,
        subtotal: decimal_column(row, "subtotal")?,
        discount_amount: decimal_column(row, "discount_amount")?,
        tax_amount: decimal_column(row, "tax_amount")?,
        total_amount: decimal_column(row, "total_amount")?,
        status: parse_status(row.try_get::<i64, _>("status")?)?,
        lines: Vec::new(),
        created_at: parse_timestamp("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

fn line_from_row(row: &SqliteRow) -> Result<QuoteLine, RepositoryError> {
    Ok(QuoteLine {
        line_number: parse_u32("line_number", row.try_get::<i64, _>("line_number")?)?,
        product_id: ProductId(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        quantity: parse_u32("quantity", row.try_get::<i64, _>("quantity")?)?,
        unit_price: decimal_column(row, "unit_price")?,
        discount_percent: decimal_column(row, "discount_percent")?,
        tax_rate: decimal_column(row, "tax_rate")?,
        line_subtotal: decimal_column(row, "line_subtotal")?,
        discount_amount: decimal_column(row, "discount_amount")?,
        line_total: decimal_column(row, "line_total")?,
        tax_amount: decimal_column(row, "tax_amount")?,
        line_total_with_tax: decimal_column(row, "line_total_with_tax")?,
    })
}
