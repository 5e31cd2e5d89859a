use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use order_board_core::{
    business_date::{self, BusinessDateError},
    context::{self, CenterContext},
    csv::{self, HistoricalExportRow},
    LockOutcome, OrderFlag, OrderList, OrderSummary, Reconciliation, StoreCode,
};
use order_board_storage::{
    CenterError, CloseOutcome, Database, DemandRowError, LocationError, OrderControlError,
    ProductError, RawStoreCode, StoreOrderError,
};
use order_board_util::AppConfig;

/// Knobs the summary engine needs from configuration.
#[derive(Debug, Clone)]
pub struct SummarySettings {
    pub fallback_center_id: i64,
    pub timezone: Tz,
    pub group_size: usize,
}

impl SummarySettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, SettingsError> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|_| SettingsError::InvalidTimezone(config.timezone.clone()))?;

        Ok(Self {
            fallback_center_id: config.default_center_id,
            timezone,
            group_size: config.pending_group_size,
        })
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Live submission export for one order control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentExport {
    pub csv: String,
    pub business_date: String,
}

/// Export of a past business day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalExport {
    pub csv: String,
    pub business_date: String,
    pub order_control_id: i64,
}

/// Lock flag as reported to callers, with the control it came from when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockFlagLookup {
    pub order_control_id: Option<i64>,
    pub order_flag: Option<OrderFlag>,
}

/// Composes the repositories into the order status board operations.
#[derive(Clone)]
pub struct OrderSummaryService {
    database: Database,
    catalog: Database,
    settings: SummarySettings,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl OrderSummaryService {
    /// `catalog` holds `m_products`; pass a clone of `database` when they share a file.
    pub fn new(database: Database, catalog: Database, settings: SummarySettings) -> Self {
        Self {
            database,
            catalog,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_group_size(&self) -> usize {
        self.settings.group_size
    }

    fn today(&self) -> NaiveDate {
        (self.clock)()
            .with_timezone(&self.settings.timezone)
            .date_naive()
    }

    /// Resolves the effective and control centers for a request.
    pub async fn resolve_context(
        &self,
        center_id: Option<i64>,
        location_id: Option<i64>,
    ) -> Result<CenterContext, EngineError> {
        let location_center_id = match location_id {
            Some(location_id) if context::needs_location_lookup(center_id, Some(location_id)) => {
                self.database
                    .locations()
                    .find_center_id(location_id)
                    .await?
            }
            _ => None,
        };

        Ok(context::resolve_context(
            center_id,
            location_center_id,
            self.settings.fallback_center_id,
        ))
    }

    /// Builds the status board for the current business day.
    pub async fn get_summary(
        &self,
        center_id: Option<i64>,
        location_id: Option<i64>,
        group_size: usize,
    ) -> Result<OrderSummary, EngineError> {
        let ctx = self.resolve_context(center_id, location_id).await?;

        let control = self
            .database
            .order_controls()
            .latest_for_center(ctx.control_center_id)
            .await?;
        let business_date = match &control {
            Some(control) => control.business_date,
            None => {
                debug!(
                    stage = "summary",
                    control_center_id = ctx.control_center_id,
                    "no order control yet; using today"
                );
                self.today()
            }
        };

        let centers = self.database.centers().list_all().await?;

        let eligible = normalize_store_codes(
            self.database
                .locations()
                .list_eligible_store_codes(ctx.effective_center_id)
                .await?,
            "summary",
            "m_locations",
        );
        let submitted = if eligible.is_empty() {
            Vec::new()
        } else {
            normalize_store_codes(
                self.database
                    .store_orders()
                    .submitted_store_codes(business_date, &eligible)
                    .await?,
                "summary",
                "t_store_orders",
            )
        };

        let counts = Reconciliation::new(eligible, submitted).counts(group_size);

        let order_flag = match &control {
            Some(control) => Some(control.order_flag),
            None => {
                self.get_lock_flag(None, Some(ctx.effective_center_id), location_id)
                    .await?
                    .order_flag
            }
        };

        info!(
            stage = "summary",
            center_id = ctx.effective_center_id,
            control_center_id = ctx.control_center_id,
            business_date = %business_date,
            total = counts.total,
            completed = counts.completed,
            pending = counts.pending,
            "order summary computed"
        );
        counter!("summary_requests_total").increment(1);

        Ok(OrderSummary {
            business_date_db: business_date::format_db(business_date),
            business_date_view: business_date::format_view(business_date),
            centers,
            center_id: ctx.effective_center_id,
            location_id,
            summary: counts,
            order_flag,
            order_control_id: control.map(|control| control.id),
        })
    }

    /// Reads the lock flag; an explicit control id bypasses center resolution.
    ///
    /// A missing control is reported as `order_flag: None`, not as an error.
    pub async fn get_lock_flag(
        &self,
        order_control_id: Option<i64>,
        center_id: Option<i64>,
        location_id: Option<i64>,
    ) -> Result<LockFlagLookup, EngineError> {
        let repo = self.database.order_controls();
        let control = match order_control_id {
            Some(id) => repo.find_by_id(id).await?,
            None => {
                let ctx = self.resolve_context(center_id, location_id).await?;
                repo.latest_for_center(ctx.control_center_id).await?
            }
        };

        Ok(LockFlagLookup {
            order_control_id: control.as_ref().map(|c| c.id).or(order_control_id),
            order_flag: control.map(|c| c.order_flag),
        })
    }

    /// Closes the ordering window. Closing an already closed control succeeds.
    pub async fn toggle_lock(&self, order_control_id: i64) -> Result<LockOutcome, EngineError> {
        let outcome = self
            .database
            .order_controls()
            .close(order_control_id)
            .await?;

        match outcome {
            CloseOutcome::Closed => {
                info!(stage = "lock", order_control_id, "ordering window closed");
                counter!("order_lock_total", "outcome" => "closed").increment(1);
                Ok(LockOutcome::closed_now())
            }
            CloseOutcome::AlreadyClosed => {
                info!(stage = "lock", order_control_id, "ordering window was already closed");
                counter!("order_lock_total", "outcome" => "already_closed").increment(1);
                Ok(LockOutcome::already_closed())
            }
            CloseOutcome::NotFound => {
                warn!(stage = "lock", order_control_id, "order control not found");
                counter!("order_lock_total", "outcome" => "not_found").increment(1);
                Err(EngineError::NotFound(format!(
                    "order control {order_control_id} does not exist"
                )))
            }
        }
    }

    /// Exports planned rows merged with submitted quantities for one order control.
    pub async fn export_current_csv(
        &self,
        order_control_id: &str,
    ) -> Result<CurrentExport, EngineError> {
        let id = parse_order_control_id(order_control_id)?;

        let rows = self.database.demand_rows().export_for_control(id).await?;
        let business_date = match self.database.order_controls().find_by_id(id).await? {
            Some(control) => control.business_date,
            None => {
                warn!(
                    stage = "export",
                    order_control_id = id,
                    "order control missing; labelling export with today"
                );
                self.today()
            }
        };

        info!(
            stage = "export",
            kind = "current",
            order_control_id = id,
            rows = rows.len(),
            "current order export generated"
        );
        counter!("csv_exports_total", "kind" => "current", "result" => "ok").increment(1);

        Ok(CurrentExport {
            csv: csv::encode(&rows),
            business_date: business_date::format_db(business_date),
        })
    }

    /// Exports submitted rows for an exact past business day.
    pub async fn export_historical_csv(
        &self,
        business_date: &str,
        center_id: Option<i64>,
        location_id: Option<i64>,
    ) -> Result<HistoricalExport, EngineError> {
        let date = business_date::parse_input(business_date)?;
        let ctx = self.resolve_context(center_id, location_id).await?;

        let Some(control) = self
            .database
            .order_controls()
            .find_for_date(ctx.control_center_id, date)
            .await?
        else {
            counter!("csv_exports_total", "kind" => "historical", "result" => "not_found")
                .increment(1);
            return Err(EngineError::NotFound(format!(
                "no order control for center {} on {}",
                ctx.control_center_id,
                business_date::format_db(date)
            )));
        };

        let rows = self
            .database
            .store_orders()
            .list_for_control(control.id)
            .await?;

        let product_codes: Vec<String> = rows
            .iter()
            .filter_map(|row| row.product_code.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let names = self.catalog.products().names_for_codes(&product_codes).await?;
        let unnamed = product_codes
            .iter()
            .filter(|code| !names.contains_key(*code))
            .count();
        if unnamed > 0 {
            debug!(stage = "export", unnamed, "catalog has no name for some products");
        }

        let export_rows: Vec<HistoricalExportRow> = rows
            .into_iter()
            .map(|row| HistoricalExportRow {
                store_code: StoreCode::parse(row.store_code.as_deref().unwrap_or_default()),
                product_name: row
                    .product_code
                    .as_ref()
                    .and_then(|code| names.get(code))
                    .cloned()
                    .unwrap_or_default(),
                product_code: row.product_code,
                delivery_slot: row.delivery_slot,
                order_date: row.order_date,
                cases: row.cases,
                cases2: row.cases2,
                cases3: row.cases3,
            })
            .collect();

        info!(
            stage = "export",
            kind = "historical",
            order_control_id = control.id,
            business_date = %date,
            rows = export_rows.len(),
            "historical order export generated"
        );
        counter!("csv_exports_total", "kind" => "historical", "result" => "ok").increment(1);

        Ok(HistoricalExport {
            csv: csv::encode(&export_rows),
            business_date: business_date::format_db(date),
            order_control_id: control.id,
        })
    }

    /// Builds the order list: distinct products, the stores in scope and
    /// whether the center already has a closed ordering window.
    ///
    /// Stores come from the explicit center, else the location's center
    /// (none when the location is unknown), else every center.
    pub async fn get_order_list(
        &self,
        product_name: Option<&str>,
        center_id: Option<i64>,
        location_id: Option<i64>,
    ) -> Result<OrderList, EngineError> {
        let name_filter = product_name.map(str::trim).filter(|name| !name.is_empty());

        let scope = match (context::supplied_id(center_id), location_id) {
            (Some(center_id), _) => StoreScope::Center(center_id),
            (None, Some(location_id)) => {
                match self.database.locations().find_center_id(location_id).await? {
                    Some(center_id) => StoreScope::Center(center_id),
                    None => StoreScope::Nothing,
                }
            }
            (None, None) => StoreScope::AllCenters,
        };

        let locations = self.database.locations();
        let raw_codes = match scope {
            StoreScope::Center(center_id) => {
                locations.list_active_store_codes(Some(center_id)).await?
            }
            StoreScope::AllCenters => locations.list_active_store_codes(None).await?,
            StoreScope::Nothing => Vec::new(),
        };
        let store_codes = normalize_store_codes(raw_codes, "order_list", "m_locations");

        let scope_center = match scope {
            StoreScope::Center(center_id) => Some(center_id),
            _ => None,
        };
        let orderable = match scope_center {
            Some(center_id) => {
                self.database
                    .order_controls()
                    .has_closed_for_center(center_id)
                    .await?
            }
            None => false,
        };

        let products = self.database.demand_rows().list_products(name_filter).await?;
        if products.is_empty() {
            warn!(
                stage = "order_list",
                product_name = name_filter.unwrap_or_default(),
                stores = store_codes.len(),
                "no products matched"
            );
        } else {
            info!(
                stage = "order_list",
                products = products.len(),
                stores = store_codes.len(),
                orderable,
                "order list built"
            );
        }
        counter!("order_list_requests_total").increment(1);

        Ok(OrderList {
            centers: self.database.centers().list_all().await?,
            center_id: scope_center,
            product_name: name_filter.map(str::to_string),
            products,
            store_codes,
            orderable,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum StoreScope {
    Center(i64),
    AllCenters,
    Nothing,
}

fn parse_order_control_id(raw: &str) -> Result<i64, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(
            "order_control_id is required".to_string(),
        ));
    }
    trimmed.parse().map_err(|_| {
        EngineError::Validation(format!("order_control_id must be numeric (got {trimmed})"))
    })
}

/// Converts storage values into store codes, logging anything that is not a plain integer.
fn normalize_store_codes(
    rows: Vec<RawStoreCode>,
    stage: &'static str,
    source: &'static str,
) -> Vec<StoreCode> {
    rows.into_iter()
        .filter_map(|raw| {
            let Some(text) = raw.code.as_deref() else {
                warn!(stage, source, "null store code skipped");
                return None;
            };
            let code = StoreCode::parse(text);
            if is_irregular(&raw, &code) {
                warn!(
                    stage,
                    source,
                    value = text,
                    value_type = %raw.value_type,
                    "unexpected store code value; using its text form"
                );
            }
            Some(code)
        })
        .collect()
}

fn is_irregular(raw: &RawStoreCode, code: &StoreCode) -> bool {
    !raw.is_integer() || !code.is_numeric()
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("failed to load locations: {0}")]
    Location(#[from] LocationError),
    #[error("failed to load centers: {0}")]
    Center(#[from] CenterError),
    #[error("order control error: {0}")]
    OrderControl(#[from] OrderControlError),
    #[error("failed to load store orders: {0}")]
    StoreOrder(#[from] StoreOrderError),
    #[error("failed to load demand rows: {0}")]
    DemandRow(#[from] DemandRowError),
    #[error("failed to load product names: {0}")]
    Product(#[from] ProductError),
}

impl From<BusinessDateError> for EngineError {
    fn from(err: BusinessDateError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FALLBACK_CENTER: i64 = 341;

    fn fixed_clock() -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
        // 2025-01-10 05:00 in Asia/Tokyo
        Arc::new(|| {
            Utc.with_ymd_and_hms(2025, 1, 9, 20, 0, 0)
                .single()
                .expect("valid instant")
        })
    }

    fn settings() -> SummarySettings {
        SummarySettings {
            fallback_center_id: FALLBACK_CENTER,
            timezone: chrono_tz::Asia::Tokyo,
            group_size: 10,
        }
    }

    async fn empty_database() -> Database {
        let database = Database::connect("sqlite::memory:")
            .await
            .expect("connect");
        database.run_migrations().await.expect("migrations");
        database
    }

    async fn exec(database: &Database, sql: &str) {
        sqlx::query(sql)
            .execute(database.pool())
            .await
            .unwrap_or_else(|err| panic!("seed failed: {err}\n{sql}"));
    }

    async fn seed_stores(database: &Database) {
        exec(
            database,
            "INSERT INTO m_centers (id, name) VALUES (12, '岡山センター'), (341, '広島センター')",
        )
        .await;
        exec(
            database,
            "INSERT INTO m_locations (id, center_id, no, disable_flg, deleted) VALUES \
             (1, 341, 1, 0, 0), (2, 341, 101, 0, 0), (3, 341, 102, 0, 0), (4, 341, 103, 0, 0), \
             (5, 341, 104, 1, 0), (6, 341, 105, 0, 1), (7, 12, 201, 0, 0), (8, 12, 202, 0, 0)",
        )
        .await;
    }

    async fn seeded_service() -> OrderSummaryService {
        let database = empty_database().await;
        seed_stores(&database).await;
        exec(
            &database,
            "INSERT INTO t_order_controls (id, center_id, business_date, order_flag) VALUES \
             (1, 341, '2025-01-09', '1'), (2, 341, '2025-01-10', '0'), (3, 12, '2025-01-08', '1')",
        )
        .await;
        exec(
            &database,
            "INSERT INTO t_store_orders (tencd, shohincd, bin, hatymd, order_control_id, cases) VALUES \
             (101, 'P1', 1, '2025-01-10', 2, 4), (102, 'P1', 1, '2025-01-09', 1, 2), \
             (201, 'P1', 1, '2025-01-10', NULL, 1)",
        )
        .await;

        OrderSummaryService::new(database.clone(), database, settings()).with_clock(fixed_clock())
    }

    #[tokio::test]
    async fn summary_counts_completed_and_pending_stores() {
        let service = seeded_service().await;

        let summary = service
            .get_summary(Some(341), None, 10)
            .await
            .expect("summary");

        assert_eq!(summary.business_date_db, "2025-01-10");
        assert_eq!(summary.business_date_view, "2025年01月10日(金)");
        assert_eq!(summary.summary.total, 3);
        assert_eq!(summary.summary.completed, 1);
        assert_eq!(summary.summary.pending, 2);
        assert_eq!(summary.summary.pending_list, "102,103");
        assert_eq!(summary.order_flag, Some(OrderFlag::Open));
        assert_eq!(summary.order_control_id, Some(2));
        assert_eq!(summary.center_id, 341);
        assert_eq!(summary.centers.len(), 2);
    }

    #[tokio::test]
    async fn summary_without_stores_reports_placeholder() {
        let service = seeded_service().await;

        let summary = service
            .get_summary(Some(77), None, 10)
            .await
            .expect("summary");

        assert_eq!(summary.summary.total, 0);
        assert_eq!(summary.summary.completed, 0);
        assert_eq!(summary.summary.pending, 0);
        assert_eq!(summary.summary.pending_list, "-");
    }

    #[tokio::test]
    async fn summary_without_control_uses_today_and_unknown_flag() {
        let database = empty_database().await;
        seed_stores(&database).await;
        let service = OrderSummaryService::new(database.clone(), database, settings())
            .with_clock(fixed_clock());

        let summary = service
            .get_summary(Some(341), None, 10)
            .await
            .expect("summary");

        assert_eq!(summary.business_date_db, "2025-01-10");
        assert_eq!(summary.order_flag, None);
        assert_eq!(summary.order_control_id, None);
        assert_eq!(summary.summary.pending_list, "101,102,103");
    }

    #[tokio::test]
    async fn summary_defaults_to_fallback_center() {
        let service = seeded_service().await;

        let summary = service.get_summary(None, None, 10).await.expect("summary");

        assert_eq!(summary.center_id, FALLBACK_CENTER);
        assert_eq!(summary.order_control_id, Some(2));
    }

    #[tokio::test]
    async fn location_drives_control_center() {
        let service = seeded_service().await;

        let summary = service
            .get_summary(None, Some(7), 10)
            .await
            .expect("summary");

        assert_eq!(summary.order_control_id, Some(3));
        assert_eq!(summary.business_date_db, "2025-01-08");
        assert_eq!(summary.order_flag, Some(OrderFlag::Closed));
        assert_eq!(summary.center_id, FALLBACK_CENTER);
        assert_eq!(summary.location_id, Some(7));
    }

    #[tokio::test]
    async fn location_and_direct_resolution_agree() {
        let service = seeded_service().await;

        let via_location = service.resolve_context(None, Some(7)).await.expect("ctx");
        let direct = service.resolve_context(Some(12), None).await.expect("ctx");
        let both = service.resolve_context(Some(12), Some(7)).await.expect("ctx");

        assert_eq!(via_location.control_center_id, direct.control_center_id);
        assert_eq!(direct, both);

        let unknown = service.resolve_context(None, Some(999)).await.expect("ctx");
        assert_eq!(unknown.control_center_id, FALLBACK_CENTER);
    }

    #[tokio::test]
    async fn pending_list_breaks_into_groups() {
        let database = empty_database().await;
        exec(
            &database,
            "INSERT INTO m_locations (center_id, no) VALUES \
             (9, 301), (9, 302), (9, 303), (9, 304), (9, 305)",
        )
        .await;
        let service = OrderSummaryService::new(database.clone(), database, settings())
            .with_clock(fixed_clock());

        let summary = service.get_summary(Some(9), None, 2).await.expect("summary");

        assert_eq!(summary.summary.pending_list, "301,302<br>303,304<br>305");
    }

    #[tokio::test]
    async fn text_store_codes_are_kept_and_sorted_last() {
        let database = empty_database().await;
        exec(
            &database,
            "INSERT INTO m_locations (center_id, no) VALUES (9, 'X1'), (9, 20), (9, 3)",
        )
        .await;
        let service = OrderSummaryService::new(database.clone(), database, settings())
            .with_clock(fixed_clock());

        let summary = service.get_summary(Some(9), None, 10).await.expect("summary");

        assert_eq!(summary.summary.total, 3);
        assert_eq!(summary.summary.pending_list, "3,20,X1");
    }

    #[tokio::test]
    async fn lock_flag_prefers_explicit_control_id() {
        let service = seeded_service().await;

        let explicit = service
            .get_lock_flag(Some(1), Some(341), None)
            .await
            .expect("flag");
        assert_eq!(explicit.order_flag, Some(OrderFlag::Closed));

        let by_center = service
            .get_lock_flag(None, Some(341), None)
            .await
            .expect("flag");
        assert_eq!(by_center.order_flag, Some(OrderFlag::Open));
        assert_eq!(by_center.order_control_id, Some(2));

        let missing = service
            .get_lock_flag(Some(404), None, None)
            .await
            .expect("flag");
        assert_eq!(missing.order_flag, None);

        let no_control = service
            .get_lock_flag(None, Some(77), None)
            .await
            .expect("flag");
        assert_eq!(no_control.order_flag, None);
    }

    #[tokio::test]
    async fn toggle_lock_is_idempotent() {
        let service = seeded_service().await;

        let first = service.toggle_lock(2).await.expect("close");
        assert_eq!(first, LockOutcome::closed_now());

        let second = service.toggle_lock(2).await.expect("close again");
        assert_eq!(second, LockOutcome::already_closed());

        let flag = service.get_lock_flag(Some(2), None, None).await.expect("flag");
        assert_eq!(flag.order_flag, Some(OrderFlag::Closed));
    }

    #[tokio::test]
    async fn toggle_lock_unknown_id_is_not_found() {
        let service = seeded_service().await;

        let err = service.toggle_lock(999).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn current_export_prefers_submitted_cases() {
        let service = seeded_service().await;
        exec(
            &service.database,
            "INSERT INTO t_demand_rows (order_control_id, tencd, shohincd, hinmei, hatymd, bin, cases, zaiko) VALUES \
             (2, 101, 'P1', '牛乳 1L', '2025-01-10', 1, 9, 7), \
             (2, 102, 'P1', '牛乳 1L', '2025-01-10', 1, 6, 2)",
        )
        .await;

        let export = service.export_current_csv("2").await.expect("export");

        assert_eq!(export.business_date, "2025-01-10");
        let lines: Vec<&str> = export.csv.lines().collect();
        assert_eq!(lines.len(), 3);
        let header: Vec<&str> = lines[0].split(',').collect();
        assert_eq!(header.len(), 33);
        let cases_idx = header.iter().position(|h| *h == "cases").expect("cases column");

        let submitted: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(submitted[0], "101");
        assert_eq!(submitted[2], "\"牛乳 1L\"");
        assert_eq!(submitted[cases_idx], "4");

        let planned: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(planned[0], "102");
        assert_eq!(planned[cases_idx], "6");
    }

    #[tokio::test]
    async fn current_export_rejects_missing_or_bad_id() {
        let service = seeded_service().await;

        assert!(matches!(
            service.export_current_csv("").await,
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            service.export_current_csv("abc").await,
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn current_export_for_unknown_control_is_header_only() {
        let service = seeded_service().await;

        let export = service.export_current_csv(" 55 ").await.expect("export");

        assert_eq!(export.business_date, "2025-01-10");
        assert_eq!(export.csv.lines().count(), 1);
    }

    #[tokio::test]
    async fn historical_export_without_control_is_not_found() {
        let service = seeded_service().await;

        let err = service
            .export_historical_csv("2025-01-01", Some(341), None)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn historical_export_validates_date() {
        let service = seeded_service().await;

        for input in ["", "   ", "01/09/2025"] {
            let err = service
                .export_historical_csv(input, Some(341), None)
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)), "input {input:?}");
        }
    }

    #[tokio::test]
    async fn historical_export_enriches_names_from_catalog() {
        let service = seeded_service().await;
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog_url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("catalog.db").display()
        );
        let catalog = Database::connect(&catalog_url).await.expect("catalog");
        exec(
            &catalog,
            "CREATE TABLE m_products (cd TEXT PRIMARY KEY, name TEXT NOT NULL)",
        )
        .await;
        exec(&catalog, "INSERT INTO m_products (cd, name) VALUES ('P1', '牛乳')").await;
        exec(
            &service.database,
            "INSERT INTO t_store_orders (tencd, shohincd, bin, hatymd, order_control_id, cases, cases2) VALUES \
             (103, 'P9', 2, '2025-01-09', 1, 1, 3)",
        )
        .await;
        let service = OrderSummaryService::new(service.database.clone(), catalog, settings())
            .with_clock(fixed_clock());

        let export = service
            .export_historical_csv(" 2025-01-09 ", None, None)
            .await
            .expect("export");

        assert_eq!(export.order_control_id, 1);
        assert_eq!(export.business_date, "2025-01-09");
        assert_eq!(
            export.csv,
            "area,shohincd,hinmei,bin,hatymd,cases,cases2,cases3\n\
             102,P1,牛乳,1,2025-01-09,2,,\n\
             103,P9,,2,2025-01-09,1,3,\n"
        );
    }

    #[test]
    fn settings_reject_unknown_timezone() {
        let mut config = AppConfig {
            bind_addr: "127.0.0.1:0".parse().expect("addr"),
            environment: order_board_util::Environment::Test,
            database_url: "sqlite::memory:".to_string(),
            catalog_database_url: None,
            timezone: "Asia/Tokyo".to_string(),
            default_center_id: FALLBACK_CENTER,
            pending_group_size: 10,
            run_migrations: true,
        };
        let parsed = SummarySettings::from_config(&config).expect("valid settings");
        assert_eq!(parsed.timezone, chrono_tz::Asia::Tokyo);

        config.timezone = "Mars/Olympus".to_string();
        let err = SummarySettings::from_config(&config).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidTimezone(tz) if tz == "Mars/Olympus"));
    }

    async fn seed_order_list(database: &Database) {
        exec(
            database,
            "UPDATE m_locations SET name = 'テスト店' WHERE center_id IN (12, 341) AND no <> 1",
        )
        .await;
        exec(database, "UPDATE m_locations SET type = 1, name = '本部' WHERE no = 1").await;
        exec(
            database,
            "INSERT INTO t_demand_rows (order_control_id, tencd, shohincd, hinmei, irisu, hatymd, bin) VALUES \
             (2, 101, 'P1', '牛乳', 12, '2025-01-10', 1), \
             (2, 102, 'P1', '牛乳', 12, '2025-01-10', 1), \
             (2, 101, 'P2', '食パン', 10, '2025-01-10', 1)",
        )
        .await;
    }

    #[tokio::test]
    async fn order_list_for_center_lists_active_stores_and_products() {
        let service = seeded_service().await;
        seed_order_list(&service.database).await;

        let list = service
            .get_order_list(None, Some(341), None)
            .await
            .expect("order list");

        assert_eq!(list.center_id, Some(341));
        let stores: Vec<&str> = list.store_codes.iter().map(StoreCode::as_str).collect();
        assert_eq!(stores, vec!["101", "102", "103"]);
        assert_eq!(list.products.len(), 2);
        assert_eq!(list.products[0].product_name.as_deref(), Some("牛乳"));
        assert_eq!(list.products[0].units_per_case, Some(12));
        assert!(list.orderable);
        assert_eq!(list.centers.len(), 2);
    }

    #[tokio::test]
    async fn order_list_filters_products_by_name() {
        let service = seeded_service().await;
        seed_order_list(&service.database).await;

        let list = service
            .get_order_list(Some("  パン "), Some(341), None)
            .await
            .expect("order list");

        assert_eq!(list.product_name.as_deref(), Some("パン"));
        assert_eq!(list.products.len(), 1);
        assert_eq!(list.products[0].product_name.as_deref(), Some("食パン"));
    }

    #[tokio::test]
    async fn order_list_scope_follows_location_or_all_centers() {
        let service = seeded_service().await;
        seed_order_list(&service.database).await;
        exec(&service.database, "UPDATE t_order_controls SET order_flag = '0'").await;

        let via_location = service
            .get_order_list(None, None, Some(7))
            .await
            .expect("order list");
        let stores: Vec<&str> = via_location.store_codes.iter().map(StoreCode::as_str).collect();
        assert_eq!(stores, vec!["201", "202"]);
        assert_eq!(via_location.center_id, Some(12));
        assert!(!via_location.orderable);

        let everywhere = service
            .get_order_list(Some(""), None, None)
            .await
            .expect("order list");
        assert_eq!(everywhere.center_id, None);
        assert_eq!(everywhere.product_name, None);
        assert_eq!(everywhere.store_codes.len(), 5);
        assert!(!everywhere.orderable);

        let unknown_location = service
            .get_order_list(None, None, Some(999))
            .await
            .expect("order list");
        assert!(unknown_location.store_codes.is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            let bytes = self.0.lock().expect("log buffer poisoned");
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .expect("log buffer poisoned")
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn raw(code: Option<&str>, value_type: &str) -> RawStoreCode {
        RawStoreCode {
            code: code.map(str::to_string),
            value_type: value_type.to_string(),
        }
    }

    fn normalize_with_logs(rows: Vec<RawStoreCode>) -> (Vec<StoreCode>, String) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let codes = tracing::subscriber::with_default(subscriber, || {
            normalize_store_codes(rows, "summary", "m_locations")
        });
        (codes, logs.contents())
    }

    #[test]
    fn text_store_code_logs_integrity_warning() {
        let (codes, logs) = normalize_with_logs(vec![
            raw(Some("101"), "integer"),
            raw(Some("X9"), "text"),
            raw(None, "null"),
        ]);

        assert_eq!(codes, vec![StoreCode::from_number(101), StoreCode::parse("X9")]);
        assert!(logs.contains("WARN"), "logs: {logs}");
        assert!(logs.contains("unexpected store code value"), "logs: {logs}");
        assert!(logs.contains("X9"), "logs: {logs}");
        assert!(logs.contains("null store code skipped"), "logs: {logs}");
    }

    #[test]
    fn integer_store_codes_log_nothing() {
        let (codes, logs) = normalize_with_logs(vec![raw(Some("7"), "integer")]);

        assert_eq!(codes, vec![StoreCode::from_number(7)]);
        assert!(logs.is_empty(), "logs: {logs}");
    }

    #[test]
    fn irregular_codes_are_detected_by_type_or_shape() {
        assert!(!is_irregular(&raw(Some("7"), "integer"), &StoreCode::parse("7")));
        assert!(is_irregular(&raw(Some("7"), "text"), &StoreCode::parse("7")));
        assert!(is_irregular(&raw(Some("7.5"), "real"), &StoreCode::parse("7.5")));
    }
}
