//! График вкладов фич в предсказание.
//!
//! Раскладка повторяет `shap.plots.bar` для одного объяснения: столбцы упорядочены
//! по модулю вклада, а если фич больше, чем `max_display`, последний столбец
//! суммирует оставшиеся («Sum of N other features»).

use crate::model::explain::Explanation;
use serde::Serialize;
use std::fmt::Write as _;

/// Пояснения под графиком.
pub const HOW_TO_READ: [&str; 3] = [
    "Features pushing risk up increase attrition likelihood",
    "Features pushing risk down reduce attrition likelihood",
    "The model evaluates combined effects, not single rules",
];

/// Блок «About this Project» под результатом.
pub const ABOUT: [&str; 3] = [
    "This system predicts employee attrition risk using a machine learning model trained on historical HR data.",
    "Attrition is a rare and multi-factorial event, so predictions are expressed as risk levels rather than absolute yes/no outcomes.",
    "The objective is early identification of potential risk, enabling proactive HR interventions.",
];

/// Блок «Key Learnings».
pub const KEY_LEARNINGS: [&str; 4] = [
    "Attrition prediction requires combining compensation, engagement, and career signals",
    "Imbalanced datasets produce compressed but meaningful probabilities",
    "Explainability (SHAP) is critical for trust in HR analytics",
    "Deployment demands strict feature alignment between training and inference",
];

/// Направление влияния фичи на риск.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    fn of(value: f64) -> Self {
        if value < 0.0 {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBar {
    /// Подпись в формате `"{значение} = {колонка}"`.
    pub label: String,
    /// Колонка; `None` для агрегированного столбца.
    pub feature: Option<String>,
    pub value: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionChart {
    pub base_value: f64,
    pub output_value: f64,
    pub bars: Vec<ChartBar>,
    /// Сколько фич попало в агрегированный столбец.
    pub other_count: usize,
}

impl AttributionChart {
    pub fn from_explanation(explanation: &Explanation, max_display: usize) -> Self {
        let mut order: Vec<usize> = (0..explanation.values.len()).collect();
        order.sort_by(|&a, &b| {
            explanation.values[b]
                .abs()
                .total_cmp(&explanation.values[a].abs())
        });

        let shown = if order.len() > max_display {
            max_display.saturating_sub(1)
        } else {
            order.len()
        };

        let mut bars: Vec<ChartBar> = order[..shown]
            .iter()
            .map(|&i| {
                let feature = &explanation.feature_names[i];
                let value = explanation.values[i];
                ChartBar {
                    label: format!("{} = {}", format_value(explanation.data[i]), feature),
                    feature: Some(feature.clone()),
                    value,
                    direction: Direction::of(value),
                }
            })
            .collect();

        let rest = &order[shown..];
        if !rest.is_empty() {
            let value: f64 = rest.iter().map(|&i| explanation.values[i]).sum();
            bars.push(ChartBar {
                label: format!("Sum of {} other features", rest.len()),
                feature: None,
                value,
                direction: Direction::of(value),
            });
        }

        Self {
            base_value: explanation.base_value,
            output_value: explanation.output_value,
            bars,
            other_count: rest.len(),
        }
    }

    /// Текстовое представление для терминала; `width` — длина самого длинного столбца.
    pub fn render_text(&self, width: usize) -> String {
        let label_width = self
            .bars
            .iter()
            .map(|bar| bar.label.chars().count())
            .max()
            .unwrap_or(0);
        let max_abs = self
            .bars
            .iter()
            .map(|bar| bar.value.abs())
            .fold(0.0_f64, f64::max);

        let mut out = String::new();
        for bar in &self.bars {
            let length = if max_abs > 0.0 {
                ((bar.value.abs() / max_abs) * width as f64).round() as usize
            } else {
                0
            };
            let fill = match bar.direction {
                Direction::Up => "█",
                Direction::Down => "░",
            };
            let _ = writeln!(
                out,
                "{:>label_width$}  {:<width$}  {:+.3}",
                bar.label,
                fill.repeat(length),
                bar.value,
            );
        }
        let _ = writeln!(
            out,
            "base value {:+.3} → model output {:+.3} (log-odds)",
            self.base_value, self.output_value
        );
        out
    }
}

/// Число без лишних нулей, как в подписях shap (`1`, `0.5`, `3000`).
fn format_value(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    let formatted = format!("{value:.3}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
