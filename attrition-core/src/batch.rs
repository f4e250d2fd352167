//! Пакетная оценка сотрудников из CSV.
//!
//! Заголовки колонок совпадают с ключами полей формы (`age`, `over_time`, ...).
//! Колонка `employee_id` (или `id`) переносится в результат, остальные колонки
//! игнорируются. Ошибка валидации строки записывается в колонку `error` и не
//! прерывает обработку файла.

use crate::{assess_and_record, Analyzer, AnalyzerStats};
use crate::form::FormInput;
use crate::risk::RiskLevel;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{Read, Write};
use tracing::{debug, info, warn};

const ID_COLUMNS: [&str; 2] = ["employee_id", "id"];

/// Итог пакетной оценки.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub rows: usize,
    pub failed: usize,
    pub stats: AnalyzerStats,
}

#[derive(Debug, Serialize)]
struct BatchRow<'a> {
    row: usize,
    id: &'a str,
    probability: Option<String>,
    risk_level: Option<RiskLevel>,
    flagged: Option<bool>,
    top_factor: Option<&'a str>,
    error: Option<String>,
}

/// Оценить все строки CSV и записать результаты в `writer`.
///
/// # Ошибки
///
/// Недопустимая чувствительность, ошибка ввода-вывода или ошибка записи результата.
/// Ошибки отдельных строк, включая строки с неверным числом полей, в результат
/// функции не попадают.
pub fn assess_csv<R: Read, W: Write>(
    analyzer: &Analyzer,
    reader: R,
    writer: W,
    sensitivity: Option<f64>,
) -> Result<BatchSummary> {
    // Недопустимый порог отклоняет весь файл, а не каждую строку
    let sensitivity = analyzer.sensitivity_range().resolve(sensitivity)?;

    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers().context("failed to read CSV header")?.clone();

    let id_column = headers
        .iter()
        .position(|h| ID_COLUMNS.contains(&h.trim()));
    let form_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| analyzer.schema().field(h.trim()).is_some())
        .map(|(i, h)| (i, h.trim().to_string()))
        .collect();

    for (i, header) in headers.iter().enumerate() {
        if Some(i) != id_column && !form_columns.iter().any(|(j, _)| *j == i) {
            warn!(column = header, "CSV column is not a form field, ignored");
        }
    }

    let mut wtr = csv::Writer::from_writer(writer);
    let mut stats = AnalyzerStats::new();
    let mut rows = 0;
    let mut failed = 0;

    for (index, record) in rdr.records().enumerate() {
        let row = index + 1;
        rows += 1;
        let record = match record {
            Ok(record) => record,
            Err(err) if err.is_io_error() => {
                return Err(err).with_context(|| format!("failed to read CSV row {row}"));
            }
            // Битая строка (например, не то число полей) не прерывает файл
            Err(err) => {
                failed += 1;
                let err = anyhow::Error::from(err).context(format!("malformed CSV row {row}"));
                stats.record_failure(&err);
                warn!(row, error = %err, "CSV row skipped");
                wtr.serialize(BatchRow {
                    row,
                    id: "",
                    probability: None,
                    risk_level: None,
                    flagged: None,
                    top_factor: None,
                    error: Some(format!("{err:#}")),
                })
                .with_context(|| format!("failed to write result for CSV row {row}"))?;
                continue;
            }
        };

        let input = FormInput::from_strings(
            form_columns
                .iter()
                .filter_map(|(i, key)| record.get(*i).map(|value| (key.as_str(), value))),
        );
        let id = id_column.and_then(|i| record.get(i)).unwrap_or("");

        let output = match assess_and_record(analyzer, &mut stats, &input, Some(sensitivity)) {
            Ok(assessment) => {
                let top_factor = assessment
                    .explanation
                    .as_ref()
                    .and_then(|e| e.top_factor())
                    .map(|(name, _)| name.to_string());
                wtr.serialize(BatchRow {
                    row,
                    id,
                    probability: Some(format!("{:.4}", assessment.probability)),
                    risk_level: Some(assessment.risk_level),
                    flagged: Some(assessment.flagged),
                    top_factor: top_factor.as_deref(),
                    error: None,
                })
            }
            Err(err) => {
                failed += 1;
                debug!(row, error = %err, "CSV row rejected");
                wtr.serialize(BatchRow {
                    row,
                    id,
                    probability: None,
                    risk_level: None,
                    flagged: None,
                    top_factor: None,
                    error: Some(format!("{err:#}")),
                })
            }
        };
        output.with_context(|| format!("failed to write result for CSV row {row}"))?;
    }

    wtr.flush().context("failed to flush CSV output")?;
    info!(rows, failed, "batch assessment finished");

    Ok(BatchSummary {
        rows,
        failed,
        stats,
    })
}
