//! SQLite-backed ledger.
//!
//! Decimals are stored as TEXT to keep exact values and timestamps as fixed-width
//! RFC 3339 strings so they sort lexically.

use super::models::*;
use super::PositionLedger;
use crate::config::{ExitModel, ScannerConfig};
use crate::strategy::OpportunityScore;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const POSITION_COLUMNS: &str = r#"
    id, market_id, market_name, token_yes, token_no,
    entry_price_yes, entry_price_no, amount_yes, amount_no,
    current_price_yes, current_price_no, current_value_yes, current_value_no,
    pnl, pnl_percent, status, active_side, is_yes_closed, is_no_closed,
    created_at, updated_at, closed_at
"#;

const TRADE_COLUMNS: &str = r#"
    id, position_id, market_id, market_name, side, trade_type,
    amount, price, total_value, order_id, executed_at
"#;

const OPPORTUNITY_COLUMNS: &str = r#"
    id, market_id, market_name, price_yes, price_no, divergence, score,
    volume_24h, liquidity, is_active, is_traded, detected_at, updated_at
"#;

/// Ledger backed by a single SQLite connection.
///
/// The connection is guarded by a mutex; no method holds the guard across an await.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the database at `db_path` and initialize the schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_schema()?;

        info!("Ledger initialized at {:?}", path);
        Ok(ledger)
    }

    /// In-memory ledger, used by tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("ledger connection mutex poisoned"))
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            -- Scanner configuration (singleton row)
            CREATE TABLE IF NOT EXISTS scanner_config (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                auto_trading_enabled INTEGER NOT NULL,
                scan_interval_seconds INTEGER NOT NULL,
                max_markets_per_scan INTEGER NOT NULL,
                min_score_to_trade INTEGER NOT NULL,
                min_score_to_show INTEGER NOT NULL,
                min_volume_24h TEXT NOT NULL,
                min_liquidity TEXT NOT NULL,
                max_active_positions INTEGER NOT NULL,
                max_capital_per_trade TEXT NOT NULL,
                max_total_capital TEXT NOT NULL,
                default_ratio_yes INTEGER NOT NULL,
                default_ratio_no INTEGER NOT NULL,
                exit_model TEXT NOT NULL,
                stop_loss_percent TEXT NOT NULL,
                take_profit_percent TEXT NOT NULL,
                leg_stop_loss_percent TEXT NOT NULL,
                leg_take_profit_price TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Positions
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market_id TEXT NOT NULL,
                market_name TEXT NOT NULL,
                token_yes TEXT NOT NULL,
                token_no TEXT NOT NULL,
                entry_price_yes TEXT NOT NULL,
                entry_price_no TEXT NOT NULL,
                amount_yes TEXT NOT NULL,
                amount_no TEXT NOT NULL,
                current_price_yes TEXT NOT NULL,
                current_price_no TEXT NOT NULL,
                current_value_yes TEXT NOT NULL,
                current_value_no TEXT NOT NULL,
                pnl TEXT NOT NULL,
                pnl_percent TEXT NOT NULL,
                status TEXT NOT NULL,
                active_side TEXT NOT NULL,
                is_yes_closed INTEGER NOT NULL,
                is_no_closed INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
            CREATE INDEX IF NOT EXISTS idx_positions_market ON positions(market_id);

            -- Trade history (append-only)
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id INTEGER NOT NULL REFERENCES positions(id),
                market_id TEXT NOT NULL,
                market_name TEXT NOT NULL,
                side TEXT NOT NULL,
                trade_type TEXT NOT NULL,
                amount TEXT NOT NULL,
                price TEXT NOT NULL,
                total_value TEXT NOT NULL,
                order_id TEXT,
                executed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_position ON trades(position_id);

            -- Stored opportunities
            CREATE TABLE IF NOT EXISTS opportunities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market_id TEXT NOT NULL,
                market_name TEXT NOT NULL,
                price_yes TEXT NOT NULL,
                price_no TEXT NOT NULL,
                divergence TEXT NOT NULL,
                score INTEGER NOT NULL,
                volume_24h TEXT NOT NULL,
                liquidity TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                is_traded INTEGER NOT NULL,
                detected_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_opportunities_market ON opportunities(market_id);
            CREATE INDEX IF NOT EXISTS idx_opportunities_score ON opportunities(score);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }
}

impl PositionLedger for SqliteLedger {
    fn load_scanner_config(&self) -> Result<ScannerConfig> {
        let existing = self
            .conn()?
            .query_row(
                r#"
                SELECT auto_trading_enabled, scan_interval_seconds, max_markets_per_scan,
                       min_score_to_trade, min_score_to_show, min_volume_24h, min_liquidity,
                       max_active_positions, max_capital_per_trade, max_total_capital,
                       default_ratio_yes, default_ratio_no, exit_model, stop_loss_percent,
                       take_profit_percent, leg_stop_loss_percent, leg_take_profit_price
                FROM scanner_config WHERE id = 1
                "#,
                [],
                |row| {
                    Ok(ScannerConfig {
                        auto_trading_enabled: row.get(0)?,
                        scan_interval_seconds: row.get(1)?,
                        max_markets_per_scan: row.get(2)?,
                        min_score_to_trade: row.get(3)?,
                        min_score_to_show: row.get(4)?,
                        min_volume_24h: read_decimal(row, 5)?,
                        min_liquidity: read_decimal(row, 6)?,
                        max_active_positions: row.get(7)?,
                        max_capital_per_trade: read_decimal(row, 8)?,
                        max_total_capital: read_decimal(row, 9)?,
                        default_ratio_yes: row.get(10)?,
                        default_ratio_no: row.get(11)?,
                        exit_model: read_exit_model(row, 12)?,
                        stop_loss_percent: read_decimal(row, 13)?,
                        take_profit_percent: read_decimal(row, 14)?,
                        leg_stop_loss_percent: read_decimal(row, 15)?,
                        leg_take_profit_price: read_decimal(row, 16)?,
                    })
                },
            )
            .optional()?;

        match existing {
            Some(config) => Ok(config),
            None => {
                let config = ScannerConfig::default();
                self.save_scanner_config(&config)?;
                info!("No scanner config found, created defaults");
                Ok(config)
            }
        }
    }

    fn save_scanner_config(&self, config: &ScannerConfig) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO scanner_config (id, auto_trading_enabled, scan_interval_seconds,
                max_markets_per_scan, min_score_to_trade, min_score_to_show, min_volume_24h,
                min_liquidity, max_active_positions, max_capital_per_trade, max_total_capital,
                default_ratio_yes, default_ratio_no, exit_model, stop_loss_percent,
                take_profit_percent, leg_stop_loss_percent, leg_take_profit_price, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
            ON CONFLICT(id) DO UPDATE SET
                auto_trading_enabled = ?1,
                scan_interval_seconds = ?2,
                max_markets_per_scan = ?3,
                min_score_to_trade = ?4,
                min_score_to_show = ?5,
                min_volume_24h = ?6,
                min_liquidity = ?7,
                max_active_positions = ?8,
                max_capital_per_trade = ?9,
                max_total_capital = ?10,
                default_ratio_yes = ?11,
                default_ratio_no = ?12,
                exit_model = ?13,
                stop_loss_percent = ?14,
                take_profit_percent = ?15,
                leg_stop_loss_percent = ?16,
                leg_take_profit_price = ?17,
                updated_at = ?18
            "#,
            params![
                config.auto_trading_enabled,
                config.scan_interval_seconds,
                config.max_markets_per_scan,
                config.min_score_to_trade,
                config.min_score_to_show,
                config.min_volume_24h.to_string(),
                config.min_liquidity.to_string(),
                config.max_active_positions,
                config.max_capital_per_trade.to_string(),
                config.max_total_capital.to_string(),
                config.default_ratio_yes,
                config.default_ratio_no,
                config.exit_model.to_string(),
                config.stop_loss_percent.to_string(),
                config.take_profit_percent.to_string(),
                config.leg_stop_loss_percent.to_string(),
                config.leg_take_profit_price.to_string(),
                timestamp(Utc::now()),
            ],
        )?;

        debug!(auto_trading = config.auto_trading_enabled, exit_model = %config.exit_model, "Scanner config saved");
        Ok(())
    }

    fn create_position(&self, new: &NewPosition) -> Result<Position> {
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO positions (market_id, market_name, token_yes, token_no,
                                   entry_price_yes, entry_price_no, amount_yes, amount_no,
                                   current_price_yes, current_price_no,
                                   current_value_yes, current_value_no,
                                   pnl, pnl_percent, status, active_side,
                                   is_yes_closed, is_no_closed, created_at, updated_at, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?5, ?6, ?7, ?8, '0', '0', ?9, ?10, 0, 0, ?11, ?11, NULL)
            "#,
            params![
                new.market_id,
                new.market_name,
                new.token_yes,
                new.token_no,
                new.entry_price_yes.to_string(),
                new.entry_price_no.to_string(),
                new.amount_yes.to_string(),
                new.amount_no.to_string(),
                PositionStatus::Active.as_str(),
                ActiveSide::Both.as_str(),
                timestamp(now),
            ],
        )?;
        let id = conn.last_insert_rowid();

        debug!(id, market_id = %new.market_id, "Position created");

        Ok(Position {
            id,
            market_id: new.market_id.clone(),
            market_name: new.market_name.clone(),
            token_yes: new.token_yes.clone(),
            token_no: new.token_no.clone(),
            entry_price_yes: new.entry_price_yes,
            entry_price_no: new.entry_price_no,
            amount_yes: new.amount_yes,
            amount_no: new.amount_no,
            current_price_yes: new.entry_price_yes,
            current_price_no: new.entry_price_no,
            current_value_yes: new.amount_yes,
            current_value_no: new.amount_no,
            pnl: Decimal::ZERO,
            pnl_percent: Decimal::ZERO,
            status: PositionStatus::Active,
            active_side: ActiveSide::Both,
            is_yes_closed: false,
            is_no_closed: false,
            created_at: now,
            updated_at: now,
            closed_at: None,
        })
    }

    fn update_position(&self, position: &Position) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE positions SET
                amount_yes = ?2,
                amount_no = ?3,
                current_price_yes = ?4,
                current_price_no = ?5,
                current_value_yes = ?6,
                current_value_no = ?7,
                pnl = ?8,
                pnl_percent = ?9,
                status = ?10,
                active_side = ?11,
                is_yes_closed = ?12,
                is_no_closed = ?13,
                updated_at = ?14,
                closed_at = ?15
            WHERE id = ?1 AND status = 'ACTIVE'
            "#,
            params![
                position.id,
                position.amount_yes.to_string(),
                position.amount_no.to_string(),
                position.current_price_yes.to_string(),
                position.current_price_no.to_string(),
                position.current_value_yes.to_string(),
                position.current_value_no.to_string(),
                position.pnl.to_string(),
                position.pnl_percent.to_string(),
                position.status.as_str(),
                position.active_side.as_str(),
                position.is_yes_closed,
                position.is_no_closed,
                timestamp(Utc::now()),
                position.closed_at.map(timestamp),
            ],
        )?;

        if updated == 1 {
            return Ok(true);
        }

        let exists = conn
            .query_row("SELECT 1 FROM positions WHERE id = ?1", [position.id], |_| Ok(()))
            .optional()?
            .is_some();
        anyhow::ensure!(exists, "position {} not found", position.id);
        Ok(false)
    }

    fn get_position(&self, id: i64) -> Result<Option<Position>> {
        let sql = format!("SELECT {} FROM positions WHERE id = ?1", POSITION_COLUMNS);
        Ok(self
            .conn()?
            .query_row(&sql, [id], position_from_row)
            .optional()?)
    }

    fn find_active_by_market(&self, market_id: &str) -> Result<Option<Position>> {
        let sql = format!(
            "SELECT {} FROM positions WHERE market_id = ?1 AND status = ?2 ORDER BY id LIMIT 1",
            POSITION_COLUMNS
        );
        Ok(self
            .conn()?
            .query_row(
                &sql,
                params![market_id, PositionStatus::Active.as_str()],
                position_from_row,
            )
            .optional()?)
    }

    fn list_active(&self) -> Result<Vec<Position>> {
        let sql = format!(
            "SELECT {} FROM positions WHERE status = ?1 ORDER BY id",
            POSITION_COLUMNS
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let positions = stmt
            .query_map([PositionStatus::Active.as_str()], position_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(positions)
    }

    fn count_active(&self) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM positions WHERE status = ?1",
            [PositionStatus::Active.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn record_trade(&self, trade: &NewTrade) -> Result<Trade> {
        let now = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO trades (position_id, market_id, market_name, side, trade_type,
                                amount, price, total_value, order_id, executed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                trade.position_id,
                trade.market_id,
                trade.market_name,
                trade.side.as_str(),
                trade.trade_type.as_str(),
                trade.amount.to_string(),
                trade.price.to_string(),
                trade.total_value.to_string(),
                trade.order_id,
                timestamp(now),
            ],
        )?;

        Ok(Trade {
            id: conn.last_insert_rowid(),
            position_id: trade.position_id,
            market_id: trade.market_id.clone(),
            market_name: trade.market_name.clone(),
            side: trade.side,
            trade_type: trade.trade_type,
            amount: trade.amount,
            price: trade.price,
            total_value: trade.total_value,
            order_id: trade.order_id.clone(),
            executed_at: now,
        })
    }

    fn trades_for_position(&self, position_id: i64) -> Result<Vec<Trade>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE position_id = ?1 ORDER BY id",
            TRADE_COLUMNS
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let trades = stmt
            .query_map([position_id], trade_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(trades)
    }

    fn record_opportunities(&self, opportunities: &[OpportunityScore]) -> Result<()> {
        let now = timestamp(Utc::now());
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        for opp in opportunities {
            let updated = tx.execute(
                r#"
                UPDATE opportunities SET
                    market_name = ?2, price_yes = ?3, price_no = ?4, divergence = ?5,
                    score = ?6, volume_24h = ?7, liquidity = ?8, updated_at = ?9
                WHERE market_id = ?1 AND is_active = 1
                "#,
                params![
                    opp.market_id,
                    opp.market_name,
                    opp.price_yes.to_string(),
                    opp.price_no.to_string(),
                    opp.divergence().to_string(),
                    opp.total_score,
                    opp.volume_24h.to_string(),
                    opp.liquidity.to_string(),
                    now,
                ],
            )?;

            if updated == 0 {
                tx.execute(
                    r#"
                    INSERT INTO opportunities (market_id, market_name, price_yes, price_no,
                                               divergence, score, volume_24h, liquidity,
                                               is_active, is_traded, detected_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 0, ?9, ?9)
                    "#,
                    params![
                        opp.market_id,
                        opp.market_name,
                        opp.price_yes.to_string(),
                        opp.price_no.to_string(),
                        opp.divergence().to_string(),
                        opp.total_score,
                        opp.volume_24h.to_string(),
                        opp.liquidity.to_string(),
                        now,
                    ],
                )?;
            }
        }

        tx.commit()?;
        debug!(count = opportunities.len(), "Opportunities recorded");
        Ok(())
    }

    fn mark_opportunity_traded(&self, market_id: &str) -> Result<()> {
        self.conn()?.execute(
            "UPDATE opportunities SET is_traded = 1, updated_at = ?2 WHERE market_id = ?1 AND is_active = 1",
            params![market_id, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    fn top_opportunities(&self, limit: usize, min_score: u8) -> Result<Vec<StoredOpportunity>> {
        let sql = format!(
            r#"
            SELECT {} FROM opportunities
            WHERE is_active = 1 AND is_traded = 0 AND score >= ?1
            ORDER BY score DESC, updated_at DESC
            LIMIT ?2
            "#,
            OPPORTUNITY_COLUMNS
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let opportunities = stmt
            .query_map(params![min_score, limit], opportunity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(opportunities)
    }

    fn deactivate_stale_opportunities(&self, max_age: chrono::Duration) -> Result<usize> {
        let cutoff = timestamp(Utc::now() - max_age);
        let count = self.conn()?.execute(
            "UPDATE opportunities SET is_active = 0 WHERE is_active = 1 AND detected_at < ?1",
            [cutoff],
        )?;

        if count > 0 {
            debug!(count, "Deactivated stale opportunities");
        }
        Ok(count)
    }
}

// ==================== Row mapping ====================

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn read_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Ok(Decimal::from_str(&raw).unwrap_or_default())
}

fn read_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    Ok(DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now()))
}

fn read_optional_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

fn read_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: anyhow::Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn read_exit_model(row: &Row<'_>, idx: usize) -> rusqlite::Result<ExitModel> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        id: row.get(0)?,
        market_id: row.get(1)?,
        market_name: row.get(2)?,
        token_yes: row.get(3)?,
        token_no: row.get(4)?,
        entry_price_yes: read_decimal(row, 5)?,
        entry_price_no: read_decimal(row, 6)?,
        amount_yes: read_decimal(row, 7)?,
        amount_no: read_decimal(row, 8)?,
        current_price_yes: read_decimal(row, 9)?,
        current_price_no: read_decimal(row, 10)?,
        current_value_yes: read_decimal(row, 11)?,
        current_value_no: read_decimal(row, 12)?,
        pnl: read_decimal(row, 13)?,
        pnl_percent: read_decimal(row, 14)?,
        status: read_enum(row, 15)?,
        active_side: read_enum(row, 16)?,
        is_yes_closed: row.get(17)?,
        is_no_closed: row.get(18)?,
        created_at: read_time(row, 19)?,
        updated_at: read_time(row, 20)?,
        closed_at: read_optional_time(row, 21)?,
    })
}

fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        position_id: row.get(1)?,
        market_id: row.get(2)?,
        market_name: row.get(3)?,
        side: read_enum(row, 4)?,
        trade_type: read_enum(row, 5)?,
        amount: read_decimal(row, 6)?,
        price: read_decimal(row, 7)?,
        total_value: read_decimal(row, 8)?,
        order_id: row.get(9)?,
        executed_at: read_time(row, 10)?,
    })
}

fn opportunity_from_row(row: &Row<'_>) -> rusqlite::Result<StoredOpportunity> {
    Ok(StoredOpportunity {
        id: row.get(0)?,
        market_id: row.get(1)?,
        market_name: row.get(2)?,
        price_yes: read_decimal(row, 3)?,
        price_no: read_decimal(row, 4)?,
        divergence: read_decimal(row, 5)?,
        score: row.get(6)?,
        volume_24h: read_decimal(row, 7)?,
        liquidity: read_decimal(row, 8)?,
        is_active: row.get(9)?,
        is_traded: row.get(10)?,
        detected_at: read_time(row, 11)?,
        updated_at: read_time(row, 12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::OpportunityScore;
    use rust_decimal_macros::dec;

    fn new_position(market_id: &str) -> NewPosition {
        NewPosition {
            market_id: market_id.to_string(),
            market_name: format!("Market {}", market_id),
            token_yes: format!("{}-yes", market_id),
            token_no: format!("{}-no", market_id),
            entry_price_yes: dec!(0.40),
            entry_price_no: dec!(0.55),
            amount_yes: dec!(60),
            amount_no: dec!(40),
        }
    }

    fn opportunity(market_id: &str, score: u8) -> OpportunityScore {
        OpportunityScore {
            market_id: market_id.to_string(),
            market_name: format!("Market {}", market_id),
            slug: None,
            token_yes: "y".to_string(),
            token_no: "n".to_string(),
            price_yes: dec!(0.45),
            price_no: dec!(0.50),
            divergence_score: dec!(10),
            volume_score: dec!(5),
            liquidity_score: dec!(5),
            timing_score: dec!(5),
            activity_score: dec!(5),
            total_score: score,
            spread_percent: dec!(5),
            estimated_net_profit: dec!(0.03),
            volume_24h: dec!(20000),
            liquidity: dec!(5000),
            hours_to_resolution: None,
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn test_scanner_config_is_created_with_defaults() {
        let ledger = SqliteLedger::in_memory().unwrap();

        let config = ledger.load_scanner_config().unwrap();
        assert_eq!(config, ScannerConfig::default());

        let mut updated = config.clone();
        updated.auto_trading_enabled = true;
        updated.exit_model = ExitModel::Independent;
        updated.leg_take_profit_price = dec!(0.95);
        ledger.save_scanner_config(&updated).unwrap();

        assert_eq!(ledger.load_scanner_config().unwrap(), updated);
    }

    #[test]
    fn test_create_and_query_active_positions() {
        let ledger = SqliteLedger::in_memory().unwrap();

        let first = ledger.create_position(&new_position("m1")).unwrap();
        let second = ledger.create_position(&new_position("m2")).unwrap();
        assert_ne!(first.id, second.id);

        assert_eq!(ledger.count_active().unwrap(), 2);
        let found = ledger.find_active_by_market("m1").unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert_eq!(found.amount_yes, dec!(60));
        assert_eq!(found.current_value_no, dec!(40));
        assert_eq!(found.active_side, ActiveSide::Both);
        assert!(ledger.find_active_by_market("missing").unwrap().is_none());
    }

    #[test]
    fn test_closed_position_leaves_active_set() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let mut position = ledger.create_position(&new_position("m1")).unwrap();

        position.mark_leg_closed(Side::Yes);
        position.mark_leg_closed(Side::No);
        position.status = PositionStatus::Closed;
        position.closed_at = Some(Utc::now());
        ledger.update_position(&position).unwrap();

        assert_eq!(ledger.count_active().unwrap(), 0);
        assert!(ledger.find_active_by_market("m1").unwrap().is_none());

        let stored = ledger.get_position(position.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Closed);
        assert!(stored.is_yes_closed && stored.is_no_closed);
        assert!(stored.closed_at.is_some());
    }

    #[test]
    fn test_terminal_position_is_never_reopened() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let position = ledger.create_position(&new_position("m1")).unwrap();
        let stale = ledger.list_active().unwrap().remove(0);

        let mut liquidated = position.clone();
        liquidated.mark_leg_closed(Side::Yes);
        liquidated.mark_leg_closed(Side::No);
        liquidated.status = PositionStatus::Liquidated;
        liquidated.closed_at = Some(Utc::now());
        assert!(ledger.update_position(&liquidated).unwrap());

        // A copy read before the close must not write back
        assert!(!ledger.update_position(&stale).unwrap());

        let stored = ledger.get_position(position.id).unwrap().unwrap();
        assert_eq!(stored.status, PositionStatus::Liquidated);
        assert_eq!(stored.amount_yes, Decimal::ZERO);
        assert!(stored.is_yes_closed && stored.is_no_closed);
        assert_eq!(ledger.count_active().unwrap(), 0);
    }

    #[test]
    fn test_update_unknown_position_fails() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let mut position = ledger.create_position(&new_position("m1")).unwrap();
        position.id = 999;
        assert!(ledger.update_position(&position).is_err());
    }

    #[test]
    fn test_trades_are_recorded_in_order() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let position = ledger.create_position(&new_position("m1")).unwrap();

        ledger
            .record_trade(
                &NewTrade::for_position(&position, Side::Yes, TradeType::Entry, dec!(60), dec!(0.40), dec!(60))
                    .with_order_id(Some("order-1".to_string())),
            )
            .unwrap();
        ledger
            .record_trade(&NewTrade::for_position(
                &position,
                Side::Yes,
                TradeType::Exit,
                dec!(60),
                dec!(0.50),
                dec!(75),
            ))
            .unwrap();

        let trades = ledger.trades_for_position(position.id).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].trade_type, TradeType::Entry);
        assert_eq!(trades[0].order_id.as_deref(), Some("order-1"));
        assert_eq!(trades[1].trade_type, TradeType::Exit);
        assert_eq!(trades[1].total_value, dec!(75));
    }

    #[test]
    fn test_opportunities_upsert_and_traded_flag() {
        let ledger = SqliteLedger::in_memory().unwrap();

        ledger
            .record_opportunities(&[opportunity("m1", 6), opportunity("m2", 9)])
            .unwrap();
        // Re-detection updates the active record in place
        ledger.record_opportunities(&[opportunity("m1", 8)]).unwrap();

        let top = ledger.top_opportunities(10, 0).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].market_id, "m2");
        assert_eq!(top[1].score, 8);
        assert_eq!(top[1].divergence, dec!(0.05));

        ledger.mark_opportunity_traded("m2").unwrap();
        let top = ledger.top_opportunities(10, 7).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].market_id, "m1");
    }

    #[test]
    fn test_stale_opportunities_are_deactivated() {
        let ledger = SqliteLedger::in_memory().unwrap();
        ledger.record_opportunities(&[opportunity("m1", 6)]).unwrap();

        // Nothing is older than an hour yet
        assert_eq!(
            ledger
                .deactivate_stale_opportunities(chrono::Duration::hours(1))
                .unwrap(),
            0
        );

        // A negative age puts the cutoff in the future
        assert_eq!(
            ledger
                .deactivate_stale_opportunities(chrono::Duration::seconds(-60))
                .unwrap(),
            1
        );
        assert!(ledger.top_opportunities(10, 0).unwrap().is_empty());
    }
}
