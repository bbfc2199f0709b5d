use crate::aggregation::AggregatedStat;
use crate::consolidator::ExpenseRecord;
use crate::pipeline::RunReport;
use crate::registry::RegistryEntry;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// ROW TYPES (field names are the read API's JSON keys)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub registro_ans: Option<String>,
    pub cnpj: String,
    pub razao_social: Option<String>,
    pub modalidade: Option<String>,
    pub uf: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub cnpj: String,
    pub data_referencia: String,
    pub ano: i32,
    pub trimestre: u8,
    pub valor: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorTotal {
    pub razao_social: Option<String>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionTotal {
    pub uf: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_geral: Option<f64>,
    pub media_geral: Option<f64>,
    pub top_5: Vec<OperatorTotal>,
    pub distribuicao_uf: Vec<RegionTotal>,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // despesas.cnpj is declared as a reference but expenses of operators
    // missing from the registry are still stored
    conn.pragma_update(None, "foreign_keys", "OFF")?;

    // ==========================================================================
    // Operators (registry attributes, one row per identifier)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS operadoras (
            registro_ans TEXT,
            cnpj TEXT PRIMARY KEY,
            razao_social TEXT,
            modalidade TEXT,
            uf TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Expenses (one row per consolidated record)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS despesas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cnpj TEXT NOT NULL REFERENCES operadoras(cnpj),
            data_referencia TEXT NOT NULL,
            ano INTEGER NOT NULL,
            trimestre INTEGER NOT NULL,
            valor REAL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS despesas_agregadas (
            cnpj TEXT PRIMARY KEY,
            razao_social TEXT NOT NULL,
            registro_ans TEXT NOT NULL,
            modalidade TEXT NOT NULL,
            uf TEXT NOT NULL,
            total_despesas REAL NOT NULL,
            media_trimestral REAL NOT NULL,
            desvio_padrao_despesas REAL
        )",
        [],
    )?;

    // ==========================================================================
    // Run reports (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            report TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute("CREATE INDEX IF NOT EXISTS idx_cnpj ON despesas(cnpj)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_cnpj_cad ON operadoras(cnpj)", [])?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_data_referencia ON despesas(data_referencia)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// LOADING (each call replaces the previous contents)
// ============================================================================

pub fn replace_operators(conn: &Connection, entries: &[RegistryEntry]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM operadoras", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO operadoras (registro_ans, cnpj, razao_social, modalidade, uf)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for entry in entries {
            stmt.execute(params![
                entry.registry_code,
                entry.identifier,
                entry.legal_name,
                entry.category,
                entry.region,
            ])
            .with_context(|| format!("Failed to insert operator {}", entry.identifier))?;
        }
    }

    tx.commit()?;
    info!(rows = entries.len(), "operadoras loaded");
    Ok(entries.len())
}

pub fn replace_expenses(conn: &Connection, records: &[ExpenseRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM despesas", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO despesas (cnpj, data_referencia, ano, trimestre, valor)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for record in records {
            let period = record.period();
            let data_referencia = period
                .start_date()
                .map(|d| d.format("%Y-%m-%d").to_string())
                .with_context(|| format!("Invalid period {}", period))?;

            stmt.execute(params![
                record.identifier,
                data_referencia,
                record.year,
                record.quarter.number(),
                record.amount,
            ])?;
        }
    }

    tx.commit()?;
    info!(rows = records.len(), "despesas loaded");
    Ok(records.len())
}

pub fn replace_aggregates(conn: &Connection, stats: &[AggregatedStat]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM despesas_agregadas", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO despesas_agregadas (
                cnpj, razao_social, registro_ans, modalidade, uf,
                total_despesas, media_trimestral, desvio_padrao_despesas
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for stat in stats {
            stmt.execute(params![
                stat.identifier,
                stat.legal_name,
                stat.registry_code,
                stat.category,
                stat.region,
                stat.total,
                stat.mean,
                stat.std_dev,
            ])?;
        }
    }

    tx.commit()?;
    info!(rows = stats.len(), "despesas_agregadas loaded");
    Ok(stats.len())
}

pub fn insert_run_report(conn: &Connection, report: &RunReport) -> Result<()> {
    let report_json = serde_json::to_string(report)?;

    conn.execute(
        "INSERT OR REPLACE INTO ingest_runs (run_id, started_at, finished_at, report)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            report.run_id,
            report.started_at.to_rfc3339(),
            report.finished_at.map(|dt| dt.to_rfc3339()),
            report_json,
        ],
    )
    .context("Failed to insert run report")?;

    Ok(())
}

pub fn get_latest_run(conn: &Connection) -> Result<Option<RunReport>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT report FROM ingest_runs ORDER BY started_at DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    json.map(|s| serde_json::from_str(&s).context("Failed to parse stored run report"))
        .transpose()
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM despesas", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// READ QUERIES
// ============================================================================

fn operator_from_row(row: &rusqlite::Row) -> rusqlite::Result<Operator> {
    Ok(Operator {
        registro_ans: row.get(0)?,
        cnpj: row.get(1)?,
        razao_social: row.get(2)?,
        modalidade: row.get(3)?,
        uf: row.get(4)?,
    })
}

/// Paginated listing, optionally filtered by a substring of name or identifier
pub fn list_operators(
    conn: &Connection,
    page: u32,
    limit: u32,
    search: Option<&str>,
) -> Result<Page<Operator>> {
    let pattern = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));

    let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

    let (total, data) = match &pattern {
        Some(pattern) => {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM operadoras WHERE razao_social LIKE ?1 OR cnpj LIKE ?1",
                [pattern],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT registro_ans, cnpj, razao_social, modalidade, uf
                 FROM operadoras
                 WHERE razao_social LIKE ?1 OR cnpj LIKE ?1
                 ORDER BY razao_social
                 LIMIT ?2 OFFSET ?3",
            )?;
            let data = stmt
                .query_map(params![pattern, limit, offset], operator_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            (total, data)
        }
        None => {
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM operadoras", [], |row| row.get(0))?;

            let mut stmt = conn.prepare(
                "SELECT registro_ans, cnpj, razao_social, modalidade, uf
                 FROM operadoras
                 ORDER BY razao_social
                 LIMIT ?1 OFFSET ?2",
            )?;
            let data = stmt
                .query_map(params![limit, offset], operator_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            (total, data)
        }
    };

    Ok(Page {
        data,
        total,
        page,
        limit,
    })
}

pub fn get_operator(conn: &Connection, cnpj: &str) -> Result<Option<Operator>> {
    let operator = conn
        .query_row(
            "SELECT registro_ans, cnpj, razao_social, modalidade, uf
             FROM operadoras WHERE cnpj = ?1",
            [cnpj],
            operator_from_row,
        )
        .optional()?;

    Ok(operator)
}

/// Expense history of one operator, newest period first
pub fn get_operator_expenses(conn: &Connection, cnpj: &str) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT cnpj, data_referencia, ano, trimestre, valor
         FROM despesas
         WHERE cnpj = ?1
         ORDER BY data_referencia DESC, id",
    )?;

    let expenses = stmt
        .query_map([cnpj], |row| {
            Ok(Expense {
                cnpj: row.get(0)?,
                data_referencia: row.get(1)?,
                ano: row.get(2)?,
                trimestre: row.get(3)?,
                valor: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(expenses)
}

pub fn get_statistics(conn: &Connection) -> Result<Statistics> {
    let (total_geral, media_geral): (Option<f64>, Option<f64>) = conn.query_row(
        "SELECT SUM(valor), AVG(valor) FROM despesas",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT o.razao_social, SUM(d.valor) AS total
         FROM despesas d
         JOIN operadoras o ON d.cnpj = o.cnpj
         GROUP BY d.cnpj
         HAVING total IS NOT NULL
         ORDER BY total DESC
         LIMIT 5",
    )?;
    let top_5 = stmt
        .query_map([], |row| {
            Ok(OperatorTotal {
                razao_social: row.get(0)?,
                total: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT o.uf, SUM(d.valor) AS total
         FROM despesas d
         JOIN operadoras o ON d.cnpj = o.cnpj
         WHERE o.uf IS NOT NULL AND o.uf != 'N/A'
         GROUP BY o.uf
         HAVING total IS NOT NULL
         ORDER BY total DESC",
    )?;
    let distribuicao_uf = stmt
        .query_map([], |row| {
            Ok(RegionTotal {
                uf: row.get(0)?,
                total: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Statistics {
        total_geral,
        media_geral,
        top_5,
        distribuicao_uf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Quarter;

    fn operator(cnpj: &str, name: &str, uf: Option<&str>) -> RegistryEntry {
        RegistryEntry {
            registry_code: Some("123456".into()),
            identifier: cnpj.to_string(),
            legal_name: Some(name.to_string()),
            category: Some("Medicina de Grupo".into()),
            region: uf.map(str::to_string),
        }
    }

    fn expense(cnpj: &str, year: i32, quarter: Quarter, amount: Option<f64>) -> ExpenseRecord {
        ExpenseRecord {
            identifier: cnpj.to_string(),
            legal_name: Some("X".into()),
            quarter,
            year,
            amount,
        }
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        replace_operators(
            &conn,
            &[
                operator("12345678000195", "SAUDE TOTAL", Some("SP")),
                operator("11222333000181", "VIDA PLENA", Some("MG")),
                operator("00000191000100", "CAIXA SAUDE", None),
            ],
        )
        .unwrap();

        replace_expenses(
            &conn,
            &[
                expense("12345678000195", 2024, Quarter::Q1, Some(100.0)),
                expense("12345678000195", 2024, Quarter::Q3, Some(300.0)),
                expense("11222333000181", 2024, Quarter::Q2, Some(50.0)),
                expense("00000191000100", 2024, Quarter::Q2, None),
            ],
        )
        .unwrap();

        conn
    }

    #[test]
    fn test_reload_replaces_contents() {
        let conn = seeded();
        assert_eq!(verify_count(&conn).unwrap(), 4);

        replace_expenses(&conn, &[expense("12345678000195", 2023, Quarter::Q4, Some(1.0))]).unwrap();
        assert_eq!(verify_count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_list_operators_pagination() {
        let conn = seeded();

        let first = list_operators(&conn, 1, 2, None).unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.data.len(), 2);
        assert_eq!(first.page, 1);
        assert_eq!(first.limit, 2);

        let second = list_operators(&conn, 2, 2, None).unwrap();
        assert_eq!(second.data.len(), 1);

        let beyond = list_operators(&conn, 5, 2, None).unwrap();
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.total, 3);
    }

    #[test]
    fn test_list_operators_search() {
        let conn = seeded();

        let by_name = list_operators(&conn, 1, 10, Some("saude")).unwrap();
        assert_eq!(by_name.total, 2);

        let by_cnpj = list_operators(&conn, 1, 10, Some("11222333")).unwrap();
        assert_eq!(by_cnpj.total, 1);
        assert_eq!(by_cnpj.data[0].razao_social.as_deref(), Some("VIDA PLENA"));
    }

    #[test]
    fn test_get_operator() {
        let conn = seeded();
        let found = get_operator(&conn, "12345678000195").unwrap().unwrap();
        assert_eq!(found.uf.as_deref(), Some("SP"));
        assert!(get_operator(&conn, "99999999999999").unwrap().is_none());
    }

    #[test]
    fn test_expenses_newest_first_with_period_date() {
        let conn = seeded();
        let expenses = get_operator_expenses(&conn, "12345678000195").unwrap();

        assert_eq!(expenses.len(), 2);
        assert_eq!(expenses[0].data_referencia, "2024-07-01");
        assert_eq!(expenses[0].trimestre, 3);
        assert_eq!(expenses[1].data_referencia, "2024-01-01");
    }

    #[test]
    fn test_statistics() {
        let conn = seeded();
        let stats = get_statistics(&conn).unwrap();

        assert_eq!(stats.total_geral, Some(450.0));
        assert_eq!(stats.media_geral, Some(150.0));
        assert_eq!(stats.top_5.len(), 2);
        assert_eq!(stats.top_5[0].razao_social.as_deref(), Some("SAUDE TOTAL"));
        assert_eq!(stats.top_5[0].total, 400.0);

        let ufs: Vec<&str> = stats.distribuicao_uf.iter().map(|r| r.uf.as_str()).collect();
        assert_eq!(ufs, vec!["SP", "MG"]);
    }

    #[test]
    fn test_run_report_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        assert!(get_latest_run(&conn).unwrap().is_none());

        let mut report = RunReport::new();
        report.operators = 7;
        report.finish();
        insert_run_report(&conn, &report).unwrap();

        let stored = get_latest_run(&conn).unwrap().unwrap();
        assert_eq!(stored.run_id, report.run_id);
        assert_eq!(stored.operators, 7);
    }
}
