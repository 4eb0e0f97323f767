//! Append-only trading ledgers.
//!
//! Two files live under the configured log directory:
//! - `operations.txt`: one timestamped diagnostic line per event;
//! - `orders.md`: a markdown table with one row per completed position.
//!
//! Every write opens, appends and closes the file, so rows survive any
//! interruption and external tools can tail the files safely.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use rust_decimal::Decimal;

const ORDERS_HEADER: &str =
    "| Time | Event | Instrument | Open Balance | Close Balance | Profit | PnL % | Order ID |";
const ORDERS_SEPARATOR: &str =
    "|------|-------|------------|--------------|---------------|--------|-------|----------|";

/// One completed position, ready for the close ledger.
#[derive(Debug, Clone)]
pub struct CloseRecord<'a> {
    pub inst_id: &'a str,
    pub open_balance: Decimal,
    pub close_balance: Decimal,
    /// Realized PnL ratio as reported by the exchange, if available.
    pub realized_pnl_ratio: Option<Decimal>,
    pub order_id: &'a str,
}

/// File-backed operations log and close ledger.
pub struct Ledger {
    ops_path: PathBuf,
    orders_path: PathBuf,
}

impl Ledger {
    /// Create the log directory if needed and bind both files inside it.
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            ops_path: dir.join("operations.txt"),
            orders_path: dir.join("orders.md"),
        })
    }

    /// Append one timestamped line to the operations log.
    pub fn operation(&self, message: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ops_path)?;
        writeln!(file, "{} {}", timestamp(), message)
    }

    /// Append a close row, emitting the table header first when the file
    /// is missing or empty.
    pub fn close(&self, record: &CloseRecord) -> io::Result<()> {
        let need_header = fs::metadata(&self.orders_path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.orders_path)?;
        if need_header {
            writeln!(file, "{ORDERS_HEADER}")?;
            writeln!(file, "{ORDERS_SEPARATOR}")?;
        }

        let profit = record.close_balance - record.open_balance;
        writeln!(
            file,
            "| {} | close | {} | {:.2} | {:.2} | {:.2} | {} | {} |",
            timestamp(),
            record.inst_id,
            record.open_balance,
            record.close_balance,
            profit,
            format_ratio(record.realized_pnl_ratio),
            record.order_id,
        )
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Render the realized ratio as a percentage, `-` when unknown.
fn format_ratio(ratio: Option<Decimal>) -> String {
    match ratio {
        Some(r) => format!("{:.2}%", r * Decimal::ONE_HUNDRED),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(ratio: Option<Decimal>) -> CloseRecord<'static> {
        CloseRecord {
            inst_id: "BTC-USDT-SWAP",
            open_balance: dec!(1000),
            close_balance: dec!(1010.5),
            realized_pnl_ratio: ratio,
            order_id: "ord-1",
        }
    }

    #[test]
    fn test_header_written_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("logs")).unwrap();

        ledger.close(&record(None)).unwrap();
        ledger.close(&record(None)).unwrap();

        let content = fs::read_to_string(dir.path().join("logs/orders.md")).unwrap();
        let headers = content.lines().filter(|l| l.starts_with("| Time |")).count();
        assert_eq!(headers, 1);
        let rows = content.lines().filter(|l| l.contains("| close |")).count();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_close_row_contents() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path()).unwrap();

        ledger.close(&record(Some(dec!(0.0314)))).unwrap();

        let content = fs::read_to_string(dir.path().join("orders.md")).unwrap();
        let row = content.lines().last().unwrap();
        assert!(row.contains("| BTC-USDT-SWAP |"));
        assert!(row.contains("| 1000.00 |"));
        assert!(row.contains("| 1010.50 |"));
        assert!(row.contains("| 10.50 |"));
        assert!(row.contains("| 3.14% |"));
        assert!(row.ends_with("| ord-1 |"));
    }

    #[test]
    fn test_unknown_ratio_renders_dash() {
        assert_eq!(format_ratio(None), "-");
        assert_eq!(format_ratio(Some(dec!(-0.025))), "-2.50%");
    }

    #[test]
    fn test_operations_lines_appended() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path()).unwrap();

        ledger.operation("first").unwrap();
        ledger.operation("second").unwrap();

        let content = fs::read_to_string(dir.path().join("operations.txt")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        assert!(lines[1].ends_with(" second"));
    }
}
