use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, QueryBuilder, Row, Sqlite, SqlitePool,
};
use thiserror::Error;

use order_board_core::{
    csv::{field, CsvRecord},
    types::{STORE_LOCATION_TYPE, STORE_NAME_MARKER},
    Center, ListedProduct, OrderControl, OrderFlag, StoreCode,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Returns a handle for reading stores and their center affiliation.
    pub fn locations(&self) -> LocationRepository {
        LocationRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for reading the center list.
    pub fn centers(&self) -> CenterRepository {
        CenterRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for reading and closing order controls.
    pub fn order_controls(&self) -> OrderControlRepository {
        OrderControlRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for reading submitted store orders.
    pub fn store_orders(&self) -> StoreOrderRepository {
        StoreOrderRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for reading planned order detail rows.
    pub fn demand_rows(&self) -> DemandRowRepository {
        DemandRowRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for looking up product names.
    pub fn products(&self) -> ProductRepository {
        ProductRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
}

/// Store code exactly as found in the database, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RawStoreCode {
    pub code: Option<String>,
    /// SQLite storage class reported by `typeof()`.
    pub value_type: String,
}

impl RawStoreCode {
    /// `true` when the value was stored as an integer, as expected.
    pub fn is_integer(&self) -> bool {
        self.value_type == "integer"
    }
}

/// Repository over `m_locations`.
#[derive(Clone)]
pub struct LocationRepository {
    pool: SqlitePool,
}

impl LocationRepository {
    /// Returns the center owning the location, or `None` when the location is
    /// unknown or has no center.
    pub async fn find_center_id(&self, location_id: i64) -> Result<Option<i64>, LocationError> {
        let row = sqlx::query("SELECT center_id FROM m_locations WHERE id = ?")
            .bind(location_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| row.get::<Option<i64>, _>("center_id")))
    }

    /// Lists store codes counted in summaries: enabled, not deleted, not the head office.
    pub async fn list_eligible_store_codes(
        &self,
        center_id: i64,
    ) -> Result<Vec<RawStoreCode>, LocationError> {
        let rows = sqlx::query_as::<_, RawStoreCode>(
            "SELECT CAST(no AS TEXT) AS code, typeof(no) AS value_type \
               FROM m_locations \
              WHERE center_id = ? \
                AND disable_flg = 0 \
                AND deleted = 0 \
                AND no <> ? \
              ORDER BY no",
        )
        .bind(center_id)
        .bind(order_board_core::types::HEAD_OFFICE_STORE_CODE)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Lists active store codes in ascending order, for one center or for all
    /// centers when `center_id` is `None`.
    ///
    /// Active stores are enabled, undeleted locations of the store type whose
    /// name carries the store marker.
    pub async fn list_active_store_codes(
        &self,
        center_id: Option<i64>,
    ) -> Result<Vec<RawStoreCode>, LocationError> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT CAST(no AS TEXT) AS code, typeof(no) AS value_type \
               FROM m_locations WHERE type = ",
        );
        builder.push_bind(STORE_LOCATION_TYPE);
        builder.push(" AND disable_flg = 0 AND deleted = 0 AND name LIKE ");
        builder.push_bind(format!("%{STORE_NAME_MARKER}%"));
        if let Some(center_id) = center_id {
            builder.push(" AND center_id = ");
            builder.push_bind(center_id);
        }
        builder.push(" ORDER BY no");

        let rows = builder
            .build_query_as::<RawStoreCode>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository over `m_centers`.
#[derive(Clone)]
pub struct CenterRepository {
    pool: SqlitePool,
}

impl CenterRepository {
    /// Lists every center ordered by id, for the center picker.
    pub async fn list_all(&self) -> Result<Vec<Center>, CenterError> {
        let rows = sqlx::query("SELECT id, name FROM m_centers ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Center {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }
}

#[derive(Debug, Error)]
pub enum CenterError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository over `t_order_controls`.
#[derive(Clone)]
pub struct OrderControlRepository {
    pool: SqlitePool,
}

const ORDER_CONTROL_COLUMNS: &str =
    "SELECT id, center_id, business_date, CAST(order_flag AS TEXT) AS order_flag \
       FROM t_order_controls";

impl OrderControlRepository {
    /// Loads the control with the most recent business date for the center.
    ///
    /// Rows sharing a business date are ordered by highest id.
    pub async fn latest_for_center(
        &self,
        center_id: i64,
    ) -> Result<Option<OrderControl>, OrderControlError> {
        let row = sqlx::query_as::<_, OrderControlRow>(&format!(
            "{ORDER_CONTROL_COLUMNS} WHERE center_id = ? \
             ORDER BY business_date DESC, id DESC LIMIT 1"
        ))
        .bind(center_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrderControlRow::into_domain).transpose()
    }

    /// Loads a control by its identifier.
    pub async fn find_by_id(&self, id: i64) -> Result<Option<OrderControl>, OrderControlError> {
        let row = sqlx::query_as::<_, OrderControlRow>(&format!(
            "{ORDER_CONTROL_COLUMNS} WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrderControlRow::into_domain).transpose()
    }

    /// Loads the control for an exact center and business date, highest id first.
    pub async fn find_for_date(
        &self,
        center_id: i64,
        business_date: NaiveDate,
    ) -> Result<Option<OrderControl>, OrderControlError> {
        let row = sqlx::query_as::<_, OrderControlRow>(&format!(
            "{ORDER_CONTROL_COLUMNS} WHERE center_id = ? AND business_date = ? \
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(center_id)
        .bind(to_db_date(business_date))
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrderControlRow::into_domain).transpose()
    }

    /// Returns `true` when the center has at least one closed control.
    pub async fn has_closed_for_center(&self, center_id: i64) -> Result<bool, OrderControlError> {
        let (found,): (i64,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM t_order_controls WHERE center_id = ? AND order_flag = ?)",
        )
        .bind(center_id)
        .bind(OrderFlag::Closed.as_code())
        .fetch_one(&self.pool)
        .await?;

        Ok(found != 0)
    }

    /// Moves the control from open to closed.
    ///
    /// The update only matches rows that are not closed yet, so concurrent
    /// callers cannot both observe the transition.
    pub async fn close(&self, id: i64) -> Result<CloseOutcome, OrderControlError> {
        let result = sqlx::query(
            "UPDATE t_order_controls SET order_flag = ? WHERE id = ? AND order_flag <> ?",
        )
        .bind(OrderFlag::Closed.as_code())
        .bind(id)
        .bind(OrderFlag::Closed.as_code())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(CloseOutcome::Closed);
        }

        let exists = sqlx::query("SELECT 1 FROM t_order_controls WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();

        Ok(if exists {
            CloseOutcome::AlreadyClosed
        } else {
            CloseOutcome::NotFound
        })
    }
}

/// Result of [`OrderControlRepository::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
    NotFound,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderControlRow {
    id: i64,
    center_id: i64,
    business_date: String,
    order_flag: Option<String>,
}

impl OrderControlRow {
    fn into_domain(self) -> Result<OrderControl, OrderControlError> {
        let business_date = NaiveDate::parse_from_str(self.business_date.trim(), "%Y-%m-%d")
            .map_err(|_| OrderControlError::InvalidBusinessDate {
                id: self.id,
                value: self.business_date.clone(),
            })?;
        let order_flag = self
            .order_flag
            .as_deref()
            .and_then(OrderFlag::from_code)
            .unwrap_or(OrderFlag::Open);

        Ok(OrderControl {
            id: self.id,
            center_id: self.center_id,
            business_date,
            order_flag,
        })
    }
}

#[derive(Debug, Error)]
pub enum OrderControlError {
    #[error("order control {id} has an unreadable business date: {value}")]
    InvalidBusinessDate { id: i64, value: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository over `t_store_orders`.
#[derive(Clone)]
pub struct StoreOrderRepository {
    pool: SqlitePool,
}

impl StoreOrderRepository {
    /// Returns the distinct store codes among `store_codes` that submitted at
    /// least one row for `business_date`.
    pub async fn submitted_store_codes(
        &self,
        business_date: NaiveDate,
        store_codes: &[StoreCode],
    ) -> Result<Vec<RawStoreCode>, StoreOrderError> {
        if store_codes.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT CAST(tencd AS TEXT) AS code, typeof(tencd) AS value_type \
               FROM t_store_orders WHERE hatymd = ",
        );
        builder.push_bind(to_db_date(business_date));
        builder.push(" AND tencd IN (");
        let mut separated = builder.separated(", ");
        for code in store_codes {
            match code.as_number() {
                Some(value) => separated.push_bind(value),
                None => separated.push_bind(code.as_str().to_string()),
            };
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<RawStoreCode>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Lists submitted rows linked to an order control, ordered by store, product and slot.
    pub async fn list_for_control(
        &self,
        order_control_id: i64,
    ) -> Result<Vec<StoreOrderRow>, StoreOrderError> {
        let rows = sqlx::query_as::<_, StoreOrderRow>(
            "SELECT CAST(tencd AS TEXT) AS store_code, \
                    shohincd AS product_code, \
                    bin AS delivery_slot, \
                    hatymd AS order_date, \
                    cases, cases2, cases3 \
               FROM t_store_orders \
              WHERE order_control_id = ? \
              ORDER BY tencd, shohincd, bin",
        )
        .bind(order_control_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Submitted order row as used by the historical export.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoreOrderRow {
    pub store_code: Option<String>,
    pub product_code: Option<String>,
    pub delivery_slot: Option<i64>,
    pub order_date: Option<String>,
    pub cases: Option<i64>,
    pub cases2: Option<i64>,
    pub cases3: Option<i64>,
}

#[derive(Debug, Error)]
pub enum StoreOrderError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository over `t_demand_rows`.
#[derive(Clone)]
pub struct DemandRowRepository {
    pool: SqlitePool,
}

impl DemandRowRepository {
    /// Joins planned rows with submitted rows for one order control.
    ///
    /// Submitted `cases`, `cases2`, `cases3` and `zaiko` take precedence over
    /// the planned values; rows nobody submitted keep the plan.
    pub async fn export_for_control(
        &self,
        order_control_id: i64,
    ) -> Result<Vec<CurrentExportRow>, DemandRowError> {
        let rows = sqlx::query_as::<_, CurrentExportRow>(
            r#"
SELECT CAST(d.tencd AS TEXT)        AS store_code,
       d.shohincd                   AS product_code,
       d.hinmei                     AS product_name,
       d.bumoncd                    AS department_code,
       d.hatread                    AS order_lead_days,
       d.irisu                      AS units_per_case,
       d.yoso                       AS forecast,
       d.heikinhanbaisu             AS average_sales,
       d.jhansu1                    AS recent_sales1,
       d.jhansu2                    AS recent_sales2,
       d.jhansu3                    AS recent_sales3,
       d.nyukasu1                   AS inbound1,
       d.nyukasu2                   AS inbound2,
       d.nyukasu3                   AS inbound3,
       d.hatymd                     AS order_date,
       d.bara                       AS loose_units,
       COALESCE(s.cases, d.cases)   AS cases,
       d.gyo                        AS line_no,
       d.bin                        AS delivery_slot,
       COALESCE(s.zaiko, d.zaiko)   AS stock,
       d.hansu1                     AS sales1,
       d.hansu2                     AS sales2,
       d.hansu3                     AS sales3,
       d.hansu4                     AS sales4,
       d.midashi                    AS heading,
       d.bara2                      AS loose_units2,
       COALESCE(s.cases2, d.cases2) AS cases2,
       d.tsuikabin                  AS extra_slot,
       d.bara3                      AS loose_units3,
       COALESCE(s.cases3, d.cases3) AS cases3,
       d.doshinkbn                  AS same_day_kind,
       d.tenpokbn                   AS store_kind,
       d.nyukasu0                   AS inbound0
  FROM t_demand_rows AS d
  LEFT JOIN t_store_orders AS s
    ON d.tencd = s.tencd
   AND d.shohincd = s.shohincd
   AND d.bin = s.bin
   AND d.hatymd = s.hatymd
   AND s.order_control_id = ?
 WHERE d.order_control_id = ?
 ORDER BY d.tencd, d.shohincd, d.bin
            "#,
        )
        .bind(order_control_id)
        .bind(order_control_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Lists distinct `(hinmei, irisu)` pairs ordered by name.
    ///
    /// `name_filter` matches anywhere in the product name; LIKE wildcards in
    /// it are taken literally.
    pub async fn list_products(
        &self,
        name_filter: Option<&str>,
    ) -> Result<Vec<ListedProduct>, DemandRowError> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT hinmei, irisu FROM t_demand_rows",
        );
        if let Some(fragment) = name_filter {
            builder.push(" WHERE hinmei LIKE ");
            builder.push_bind(contains_pattern(fragment));
            builder.push(" ESCAPE '\\'");
        }
        builder.push(" ORDER BY hinmei, irisu");

        let rows: Vec<(Option<String>, Option<i64>)> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|(product_name, units_per_case)| ListedProduct {
                product_name,
                units_per_case,
            })
            .collect())
    }
}

/// One row of the live submission export.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CurrentExportRow {
    pub store_code: Option<String>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub department_code: Option<String>,
    pub order_lead_days: Option<i64>,
    pub units_per_case: Option<i64>,
    pub forecast: Option<i64>,
    pub average_sales: Option<f64>,
    pub recent_sales1: Option<i64>,
    pub recent_sales2: Option<i64>,
    pub recent_sales3: Option<i64>,
    pub inbound1: Option<i64>,
    pub inbound2: Option<i64>,
    pub inbound3: Option<i64>,
    pub order_date: Option<String>,
    pub loose_units: Option<i64>,
    pub cases: Option<i64>,
    pub line_no: Option<i64>,
    pub delivery_slot: Option<i64>,
    pub stock: Option<i64>,
    pub sales1: Option<i64>,
    pub sales2: Option<i64>,
    pub sales3: Option<i64>,
    pub sales4: Option<i64>,
    pub heading: Option<String>,
    pub loose_units2: Option<i64>,
    pub cases2: Option<i64>,
    pub extra_slot: Option<i64>,
    pub loose_units3: Option<i64>,
    pub cases3: Option<i64>,
    pub same_day_kind: Option<String>,
    pub store_kind: Option<String>,
    pub inbound0: Option<i64>,
}

impl CsvRecord for CurrentExportRow {
    fn header() -> &'static [&'static str] {
        &[
            "tencd",
            "shohincd",
            "hinmei",
            "bumoncd",
            "hatread",
            "irisu",
            "yoso",
            "heikinhanbaisu",
            "jhansu1",
            "jhansu2",
            "jhansu3",
            "nyukasu1",
            "nyukasu2",
            "nyukasu3",
            "hatymd",
            "bara",
            "cases",
            "gyo",
            "bin",
            "zaiko",
            "hansu1",
            "hansu2",
            "hansu3",
            "hansu4",
            "midashi",
            "bara2",
            "cases2",
            "tsuikabin",
            "bara3",
            "cases3",
            "doshinkbn",
            "tenpokbn",
            "nyukasu0",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            field(&self.store_code),
            field(&self.product_code),
            field(&self.product_name),
            field(&self.department_code),
            field(&self.order_lead_days),
            field(&self.units_per_case),
            field(&self.forecast),
            field(&self.average_sales),
            field(&self.recent_sales1),
            field(&self.recent_sales2),
            field(&self.recent_sales3),
            field(&self.inbound1),
            field(&self.inbound2),
            field(&self.inbound3),
            field(&self.order_date),
            field(&self.loose_units),
            field(&self.cases),
            field(&self.line_no),
            field(&self.delivery_slot),
            field(&self.stock),
            field(&self.sales1),
            field(&self.sales2),
            field(&self.sales3),
            field(&self.sales4),
            field(&self.heading),
            field(&self.loose_units2),
            field(&self.cases2),
            field(&self.extra_slot),
            field(&self.loose_units3),
            field(&self.cases3),
            field(&self.same_day_kind),
            field(&self.store_kind),
            field(&self.inbound0),
        ]
    }
}

#[derive(Debug, Error)]
pub enum DemandRowError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository over the product catalog (`m_products`).
#[derive(Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Maps product codes to display names. Unknown codes are simply absent.
    pub async fn names_for_codes(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, String>, ProductError> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT cd, name FROM m_products WHERE cd IN (");
        let mut separated = builder.separated(", ");
        for code in codes {
            separated.push_bind(code.as_str());
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("cd"), row.get::<String, _>("name")))
            .collect())
    }
}

#[derive(Debug, Error)]
pub enum ProductError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// `%fragment%` with backslash, `%` and `_` escaped for `LIKE ... ESCAPE`.
fn contains_pattern(fragment: &str) -> String {
    let mut pattern = String::with_capacity(fragment.len() + 2);
    pattern.push('%');
    for c in fragment.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn to_db_date(value: NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}
